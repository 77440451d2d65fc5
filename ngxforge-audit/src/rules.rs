//! Audit rules
//!
//! One canonical, ordered rule list. A rule pairs a check, which reports
//! findings against a [`Config`], with an optional fix, which turns the
//! config into a [`ConfigPatch`] for one node or for every flagged node.

use crate::cleaner::{
    append_line, directive_args, has_directive, has_header, remove_directive, remove_header,
    top_level,
};
use crate::redirect;
use ngxforge_core::config::*;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

// ============================================================
// Types
// ============================================================

/// Issue severity, most severe first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

impl Severity {
    /// Points taken off the score per issue
    pub fn penalty(self) -> u32 {
        match self {
            Severity::Critical => 20,
            Severity::Warning => 10,
            Severity::Info => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Warning => "warning",
            Severity::Info => "info",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Security,
    Performance,
    Config,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Category::Security => "security",
            Category::Performance => "performance",
            Category::Config => "config",
        })
    }
}

/// What a rule inspects. Fixes are applied in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleScope {
    Global,
    Events,
    Http,
    Server,
    Location,
    Upstream,
    Redirect,
}

/// One finding of one rule
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Issue {
    pub rule_id: &'static str,
    pub severity: Severity,
    pub category: Category,
    pub title: &'static str,
    pub message: String,
    /// Offending server, location or upstream; `None` for context-wide rules
    pub node_id: Option<NodeId>,
    pub can_auto_fix: bool,
}

/// What a check reports before the rule stamps its metadata on it
struct Finding {
    node_id: Option<NodeId>,
    message: String,
}

impl Finding {
    fn context(message: String) -> Self {
        Self {
            node_id: None,
            message,
        }
    }

    fn node(id: NodeId, message: String) -> Self {
        Self {
            node_id: Some(id),
            message,
        }
    }
}

type CheckFn = fn(&Config) -> Vec<Finding>;

/// Produces the fix for one node, or for every flagged node when no id is
/// given. An id that names no live node yields an empty patch.
type FixFn = fn(&Config, Option<&NodeId>) -> ConfigPatch;

pub struct AuditRule {
    pub id: &'static str,
    pub title: &'static str,
    pub severity: Severity,
    pub category: Category,
    pub scope: RuleScope,
    check_fn: CheckFn,
    fix_fn: Option<FixFn>,
}

impl AuditRule {
    pub fn can_auto_fix(&self) -> bool {
        self.fix_fn.is_some()
    }

    pub fn check(&self, config: &Config) -> Vec<Issue> {
        (self.check_fn)(config)
            .into_iter()
            .map(|finding| Issue {
                rule_id: self.id,
                severity: self.severity,
                category: self.category,
                title: self.title,
                message: finding.message,
                node_id: finding.node_id,
                can_auto_fix: self.can_auto_fix(),
            })
            .collect()
    }

    /// `None` for detection-only rules
    pub fn fix(&self, config: &Config, node_id: Option<&NodeId>) -> Option<ConfigPatch> {
        self.fix_fn.map(|fix| fix(config, node_id))
    }
}

impl fmt::Debug for AuditRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditRule")
            .field("id", &self.id)
            .field("severity", &self.severity)
            .field("category", &self.category)
            .field("scope", &self.scope)
            .field("can_auto_fix", &self.can_auto_fix())
            .finish()
    }
}

// ============================================================
// Remediation values
// ============================================================

pub const SECURE_PROTOCOLS: [&str; 2] = ["TLSv1.2", "TLSv1.3"];

const WEAK_PROTOCOLS: [&str; 4] = ["SSLv2", "SSLv3", "TLSv1", "TLSv1.1"];

pub const STRONG_CIPHERS: &str = "ECDHE-ECDSA-AES128-GCM-SHA256:ECDHE-RSA-AES128-GCM-SHA256:\
ECDHE-ECDSA-AES256-GCM-SHA384:ECDHE-RSA-AES256-GCM-SHA384:\
ECDHE-ECDSA-CHACHA20-POLY1305:ECDHE-RSA-CHACHA20-POLY1305";

const WEAK_CIPHER_MARKERS: [&str; 6] = ["RC4", "DES", "MD5", "NULL", "EXPORT", "ADH"];

pub const SECURITY_HEADERS: [(&str, &str); 3] = [
    ("X-Frame-Options", "SAMEORIGIN"),
    ("X-Content-Type-Options", "nosniff"),
    ("Referrer-Policy", "strict-origin-when-cross-origin"),
];

pub const HSTS_HEADER: (&str, &str) = (
    "Strict-Transport-Security",
    "max-age=31536000; includeSubDomains",
);

pub const PROXY_HEADERS: [(&str, &str); 4] = [
    ("Host", "$host"),
    ("X-Real-IP", "$remote_addr"),
    ("X-Forwarded-For", "$proxy_add_x_forwarded_for"),
    ("X-Forwarded-Proto", "$scheme"),
];

pub const GZIP_TYPES: [&str; 8] = [
    "text/plain",
    "text/css",
    "text/xml",
    "text/javascript",
    "application/javascript",
    "application/json",
    "application/xml",
    "image/svg+xml",
];

// ============================================================
// Rule list
// ============================================================

/// Every rule, in report and fix order
pub static RULES: &[AuditRule] = &[
    AuditRule {
        id: "worker-processes",
        title: "Worker processes not sized automatically",
        severity: Severity::Info,
        category: Category::Performance,
        scope: RuleScope::Global,
        check_fn: check_worker_processes,
        fix_fn: Some(fix_worker_processes),
    },
    AuditRule {
        id: "worker-connections",
        title: "Low worker connection limit",
        severity: Severity::Info,
        category: Category::Performance,
        scope: RuleScope::Events,
        check_fn: check_worker_connections,
        fix_fn: Some(fix_worker_connections),
    },
    AuditRule {
        id: "server-tokens",
        title: "nginx version exposed",
        severity: Severity::Warning,
        category: Category::Security,
        scope: RuleScope::Http,
        check_fn: check_server_tokens,
        fix_fn: Some(fix_server_tokens),
    },
    AuditRule {
        id: "gzip-disabled",
        title: "Compression disabled",
        severity: Severity::Warning,
        category: Category::Performance,
        scope: RuleScope::Http,
        check_fn: check_gzip,
        fix_fn: Some(fix_gzip),
    },
    AuditRule {
        id: "sendfile-disabled",
        title: "sendfile disabled",
        severity: Severity::Info,
        category: Category::Performance,
        scope: RuleScope::Http,
        check_fn: check_sendfile,
        fix_fn: Some(fix_sendfile),
    },
    AuditRule {
        id: "keepalive-timeout",
        title: "Long keepalive timeout",
        severity: Severity::Info,
        category: Category::Performance,
        scope: RuleScope::Http,
        check_fn: check_keepalive_timeout,
        fix_fn: Some(fix_keepalive_timeout),
    },
    AuditRule {
        id: "server-name-missing",
        title: "Server without a name",
        severity: Severity::Warning,
        category: Category::Config,
        scope: RuleScope::Server,
        check_fn: check_server_name,
        fix_fn: None,
    },
    AuditRule {
        id: "duplicate-default-server",
        title: "Several default servers on one port",
        severity: Severity::Warning,
        category: Category::Config,
        scope: RuleScope::Server,
        check_fn: check_duplicate_default_server,
        fix_fn: Some(fix_duplicate_default_server),
    },
    AuditRule {
        id: "ssl-protocols",
        title: "Outdated TLS protocols",
        severity: Severity::Critical,
        category: Category::Security,
        scope: RuleScope::Server,
        check_fn: check_ssl_protocols,
        fix_fn: Some(fix_ssl_protocols),
    },
    AuditRule {
        id: "ssl-ciphers",
        title: "Weak TLS cipher list",
        severity: Severity::Warning,
        category: Category::Security,
        scope: RuleScope::Server,
        check_fn: check_ssl_ciphers,
        fix_fn: Some(fix_ssl_ciphers),
    },
    AuditRule {
        id: "security-headers",
        title: "Security headers missing",
        severity: Severity::Warning,
        category: Category::Security,
        scope: RuleScope::Server,
        check_fn: check_security_headers,
        fix_fn: Some(fix_security_headers),
    },
    AuditRule {
        id: "hsts-missing",
        title: "HSTS header missing",
        severity: Severity::Info,
        category: Category::Security,
        scope: RuleScope::Server,
        check_fn: check_hsts,
        fix_fn: Some(fix_hsts),
    },
    AuditRule {
        id: "autoindex-enabled",
        title: "Directory listing enabled",
        severity: Severity::Warning,
        category: Category::Security,
        scope: RuleScope::Location,
        check_fn: check_autoindex,
        fix_fn: Some(fix_autoindex),
    },
    AuditRule {
        id: "proxy-headers",
        title: "Proxy headers incomplete",
        severity: Severity::Info,
        category: Category::Config,
        scope: RuleScope::Location,
        check_fn: check_proxy_headers,
        fix_fn: Some(fix_proxy_headers),
    },
    AuditRule {
        id: "upstream-empty",
        title: "Upstream without servers",
        severity: Severity::Critical,
        category: Category::Config,
        scope: RuleScope::Upstream,
        check_fn: check_upstream_empty,
        fix_fn: None,
    },
    AuditRule {
        id: "https-redirect",
        title: "HTTP not redirected to HTTPS",
        severity: Severity::Warning,
        category: Category::Security,
        scope: RuleScope::Redirect,
        check_fn: check_https_redirect,
        fix_fn: Some(redirect::fix_https_redirects),
    },
];

pub fn find_rule(id: &str) -> Option<&'static AuditRule> {
    RULES.iter().find(|rule| rule.id == id)
}

/// A server whose passthrough issues a `return 301|302|307|308` outside
/// any nested block. Such virtual hosts serve no content and never get
/// response headers.
pub fn is_redirect_only(server: &ServerConfig) -> bool {
    directive_args(&top_level(&server.custom_directives), "return")
        .iter()
        .any(|args| matches!(args.split_whitespace().next(), Some("301" | "302" | "307" | "308")))
}

// ============================================================
// Patch helpers
// ============================================================

/// Edit every server satisfying `needs_fix`, narrowed to `target` when given
fn patch_servers(
    config: &Config,
    target: Option<&NodeId>,
    needs_fix: impl Fn(&ServerConfig) -> bool,
    edit: impl Fn(&mut ServerConfig),
) -> ConfigPatch {
    let mut servers = config.servers.clone();
    let mut changed = false;
    for server in &mut servers {
        let selected = target.is_none_or(|id| &server.id == id) && needs_fix(server);
        if selected {
            edit(server);
            changed = true;
        }
    }
    if changed {
        ConfigPatch {
            servers: Some(servers),
            ..Default::default()
        }
    } else {
        ConfigPatch::default()
    }
}

fn patch_locations(
    config: &Config,
    target: Option<&NodeId>,
    needs_fix: impl Fn(&LocationConfig) -> bool,
    edit: impl Fn(&mut LocationConfig),
) -> ConfigPatch {
    let mut locations = config.locations.clone();
    let mut changed = false;
    for location in &mut locations {
        let selected = target.is_none_or(|id| &location.id == id) && needs_fix(location);
        if selected {
            edit(location);
            changed = true;
        }
    }
    if changed {
        ConfigPatch {
            locations: Some(locations),
            ..Default::default()
        }
    } else {
        ConfigPatch::default()
    }
}

fn http_patch(config: &Config, edit: impl FnOnce(&mut HttpConfig)) -> ConfigPatch {
    let mut http = config.http.clone();
    edit(&mut http);
    ConfigPatch {
        http: Some(http),
        ..Default::default()
    }
}

fn header_line(name: &str, value: &str) -> String {
    format!("add_header {} \"{}\" always;", name, value)
}

// ============================================================
// Main context and events
// ============================================================

fn check_worker_processes(config: &Config) -> Vec<Finding> {
    match config.global.worker_processes {
        WorkerProcesses::Auto => Vec::new(),
        WorkerProcesses::Count(count) => vec![Finding::context(format!(
            "worker_processes is {}; auto sizes the pool to the CPU count",
            count
        ))],
    }
}

fn fix_worker_processes(config: &Config, _: Option<&NodeId>) -> ConfigPatch {
    let mut global = config.global.clone();
    global.worker_processes = WorkerProcesses::Auto;
    global.custom_directives = remove_directive(&global.custom_directives, "worker_processes");
    ConfigPatch {
        global: Some(global),
        ..Default::default()
    }
}

const MIN_WORKER_CONNECTIONS: u32 = 1024;

fn check_worker_connections(config: &Config) -> Vec<Finding> {
    let connections = config.events.worker_connections;
    if connections >= MIN_WORKER_CONNECTIONS {
        return Vec::new();
    }
    vec![Finding::context(format!(
        "worker_connections is {}, below {}",
        connections, MIN_WORKER_CONNECTIONS
    ))]
}

fn fix_worker_connections(config: &Config, _: Option<&NodeId>) -> ConfigPatch {
    let mut events = config.events.clone();
    events.worker_connections = MIN_WORKER_CONNECTIONS;
    events.custom_directives = remove_directive(&events.custom_directives, "worker_connections");
    ConfigPatch {
        events: Some(events),
        ..Default::default()
    }
}

// ============================================================
// HTTP
// ============================================================

fn check_server_tokens(config: &Config) -> Vec<Finding> {
    if !config.http.server_tokens {
        return Vec::new();
    }
    vec![Finding::context(
        "server_tokens is on; error pages and the Server header reveal the nginx version"
            .to_string(),
    )]
}

fn fix_server_tokens(config: &Config, _: Option<&NodeId>) -> ConfigPatch {
    http_patch(config, |http| {
        http.server_tokens = false;
        http.custom_directives = remove_directive(&http.custom_directives, "server_tokens");
    })
}

fn check_gzip(config: &Config) -> Vec<Finding> {
    if config.http.gzip.enabled {
        return Vec::new();
    }
    vec![Finding::context("gzip compression is off".to_string())]
}

fn fix_gzip(config: &Config, _: Option<&NodeId>) -> ConfigPatch {
    http_patch(config, |http| {
        http.gzip = GzipConfig {
            enabled: true,
            comp_level: 5,
            min_length: 256,
            types: GZIP_TYPES.iter().map(|t| t.to_string()).collect(),
            vary: true,
        };
        for key in ["gzip", "gzip_comp_level", "gzip_min_length", "gzip_types", "gzip_vary"] {
            http.custom_directives = remove_directive(&http.custom_directives, key);
        }
    })
}

fn check_sendfile(config: &Config) -> Vec<Finding> {
    if config.http.sendfile {
        return Vec::new();
    }
    vec![Finding::context(
        "sendfile is off; static files are copied through user space".to_string(),
    )]
}

fn fix_sendfile(config: &Config, _: Option<&NodeId>) -> ConfigPatch {
    http_patch(config, |http| {
        http.sendfile = true;
        http.tcp_nopush = true;
        for key in ["sendfile", "tcp_nopush"] {
            http.custom_directives = remove_directive(&http.custom_directives, key);
        }
    })
}

const MAX_KEEPALIVE_TIMEOUT: u32 = 75;
const RECOMMENDED_KEEPALIVE_TIMEOUT: u32 = 65;

fn check_keepalive_timeout(config: &Config) -> Vec<Finding> {
    let timeout = config.http.keepalive_timeout;
    if timeout <= MAX_KEEPALIVE_TIMEOUT {
        return Vec::new();
    }
    vec![Finding::context(format!(
        "keepalive_timeout is {}s; idle connections hold workers for too long",
        timeout
    ))]
}

fn fix_keepalive_timeout(config: &Config, _: Option<&NodeId>) -> ConfigPatch {
    http_patch(config, |http| {
        http.keepalive_timeout = RECOMMENDED_KEEPALIVE_TIMEOUT;
        http.custom_directives = remove_directive(&http.custom_directives, "keepalive_timeout");
    })
}

// ============================================================
// Servers
// ============================================================

fn check_server_name(config: &Config) -> Vec<Finding> {
    config
        .servers
        .iter()
        .filter(|s| !is_redirect_only(s))
        .filter(|s| matches!(s.server_name.trim(), "" | "_"))
        .map(|s| {
            Finding::node(
                s.id,
                format!("server on port {} has no server_name", s.listen.port),
            )
        })
        .collect()
}

/// Servers repeating `default_server` on a port already claimed by an
/// earlier server
fn extra_default_servers(config: &Config) -> Vec<(NodeId, u16, NodeId)> {
    let mut first_per_port: HashMap<u16, NodeId> = HashMap::new();
    let mut extras = Vec::new();
    for server in config.servers.iter().filter(|s| s.listen.default_server) {
        match first_per_port.get(&server.listen.port) {
            Some(first) => extras.push((server.id, server.listen.port, *first)),
            None => {
                first_per_port.insert(server.listen.port, server.id);
            }
        }
    }
    extras
}

fn check_duplicate_default_server(config: &Config) -> Vec<Finding> {
    extra_default_servers(config)
        .into_iter()
        .map(|(id, port, first)| {
            let name = config.server(&id).map_or("_", |s| s.display_name());
            let first_name = config.server(&first).map_or("_", |s| s.display_name());
            Finding::node(
                id,
                format!(
                    "server {} is another default_server on port {} (first: {})",
                    name, port, first_name
                ),
            )
        })
        .collect()
}

fn fix_duplicate_default_server(config: &Config, target: Option<&NodeId>) -> ConfigPatch {
    let extras: Vec<NodeId> = extra_default_servers(config)
        .into_iter()
        .map(|(id, _, _)| id)
        .collect();
    patch_servers(
        config,
        target,
        |s| extras.contains(&s.id),
        |s| s.listen.default_server = false,
    )
}

fn weak_protocols(ssl: &SslConfig) -> Vec<&str> {
    ssl.protocols
        .iter()
        .map(String::as_str)
        .filter(|p| WEAK_PROTOCOLS.iter().any(|w| w.eq_ignore_ascii_case(p)))
        .collect()
}

fn needs_protocol_fix(server: &ServerConfig) -> bool {
    server.ssl.enabled && (server.ssl.protocols.is_empty() || !weak_protocols(&server.ssl).is_empty())
}

fn check_ssl_protocols(config: &Config) -> Vec<Finding> {
    config
        .servers
        .iter()
        .filter(|s| needs_protocol_fix(s))
        .map(|s| {
            let weak = weak_protocols(&s.ssl);
            let message = if weak.is_empty() {
                format!(
                    "server {} does not pin ssl_protocols; older nginx builds still offer TLSv1 and TLSv1.1",
                    s.display_name()
                )
            } else {
                format!("server {} allows {}", s.display_name(), weak.join(", "))
            };
            Finding::node(s.id, message)
        })
        .collect()
}

fn fix_ssl_protocols(config: &Config, target: Option<&NodeId>) -> ConfigPatch {
    patch_servers(config, target, needs_protocol_fix, |s| {
        s.ssl.set_protocols(SECURE_PROTOCOLS);
        s.custom_directives = remove_directive(&s.custom_directives, "ssl_protocols");
    })
}

/// Cipher list is empty or enables a broken suite
fn weak_ciphers(ciphers: &str) -> bool {
    if ciphers.trim().is_empty() {
        return true;
    }
    ciphers
        .split(':')
        .map(str::trim)
        .filter(|suite| !suite.starts_with('!') && !suite.starts_with('-'))
        .any(|suite| {
            let suite = suite.to_ascii_uppercase();
            WEAK_CIPHER_MARKERS.iter().any(|marker| suite.contains(marker))
        })
}

fn needs_cipher_fix(server: &ServerConfig) -> bool {
    server.ssl.enabled && weak_ciphers(&server.ssl.ciphers)
}

fn check_ssl_ciphers(config: &Config) -> Vec<Finding> {
    config
        .servers
        .iter()
        .filter(|s| needs_cipher_fix(s))
        .map(|s| {
            let message = if s.ssl.ciphers.trim().is_empty() {
                format!("server {} relies on the default cipher list", s.display_name())
            } else {
                format!(
                    "server {} enables weak ciphers: {}",
                    s.display_name(),
                    s.ssl.ciphers
                )
            };
            Finding::node(s.id, message)
        })
        .collect()
}

fn fix_ssl_ciphers(config: &Config, target: Option<&NodeId>) -> ConfigPatch {
    patch_servers(config, target, needs_cipher_fix, |s| {
        s.ssl.ciphers = STRONG_CIPHERS.to_string();
        s.custom_directives = remove_directive(&s.custom_directives, "ssl_ciphers");
    })
}

fn missing_security_headers(server: &ServerConfig) -> Vec<&'static str> {
    SECURITY_HEADERS
        .iter()
        .map(|(name, _)| *name)
        .filter(|name| !has_header(&server.custom_directives, "add_header", name))
        .collect()
}

fn needs_security_headers(server: &ServerConfig) -> bool {
    !is_redirect_only(server) && !missing_security_headers(server).is_empty()
}

fn check_security_headers(config: &Config) -> Vec<Finding> {
    config
        .servers
        .iter()
        .filter(|s| needs_security_headers(s))
        .map(|s| {
            Finding::node(
                s.id,
                format!(
                    "server {} does not send {}",
                    s.display_name(),
                    missing_security_headers(s).join(", ")
                ),
            )
        })
        .collect()
}

fn fix_security_headers(config: &Config, target: Option<&NodeId>) -> ConfigPatch {
    patch_servers(config, target, needs_security_headers, |s| {
        for (name, value) in SECURITY_HEADERS {
            s.custom_directives = remove_header(&s.custom_directives, "add_header", name);
            append_line(&mut s.custom_directives, &header_line(name, value));
        }
    })
}

fn needs_hsts(server: &ServerConfig) -> bool {
    server.ssl.enabled
        && !is_redirect_only(server)
        && !has_header(&server.custom_directives, "add_header", HSTS_HEADER.0)
}

fn check_hsts(config: &Config) -> Vec<Finding> {
    config
        .servers
        .iter()
        .filter(|s| needs_hsts(s))
        .map(|s| {
            Finding::node(
                s.id,
                format!(
                    "TLS server {} does not send Strict-Transport-Security",
                    s.display_name()
                ),
            )
        })
        .collect()
}

fn fix_hsts(config: &Config, target: Option<&NodeId>) -> ConfigPatch {
    patch_servers(config, target, needs_hsts, |s| {
        let (name, value) = HSTS_HEADER;
        s.custom_directives = remove_header(&s.custom_directives, "add_header", name);
        append_line(&mut s.custom_directives, &header_line(name, value));
    })
}

// ============================================================
// Locations
// ============================================================

fn autoindex_on(text: &str) -> bool {
    directive_args(text, "autoindex")
        .iter()
        .any(|args| args.eq_ignore_ascii_case("on"))
}

fn check_autoindex(config: &Config) -> Vec<Finding> {
    let servers = config
        .servers
        .iter()
        .filter(|s| autoindex_on(&s.custom_directives))
        .map(|s| {
            Finding::node(
                s.id,
                format!("server {} lists directory contents", s.display_name()),
            )
        });
    let locations = config
        .locations
        .iter()
        .filter(|l| autoindex_on(&l.custom_directives))
        .map(|l| {
            Finding::node(
                l.id,
                format!("location {} {} lists directory contents", l.modifier, l.path),
            )
        });
    servers.chain(locations).collect()
}

fn fix_autoindex(config: &Config, target: Option<&NodeId>) -> ConfigPatch {
    let servers = patch_servers(
        config,
        target,
        |s| autoindex_on(&s.custom_directives),
        |s| s.custom_directives = remove_directive(&s.custom_directives, "autoindex"),
    );
    let locations = patch_locations(
        config,
        target,
        |l| autoindex_on(&l.custom_directives),
        |l| l.custom_directives = remove_directive(&l.custom_directives, "autoindex"),
    );
    servers.merge(locations)
}

fn missing_proxy_headers(location: &LocationConfig) -> Vec<&'static str> {
    PROXY_HEADERS
        .iter()
        .map(|(name, _)| *name)
        .filter(|name| location.proxy_header(name).is_none_or(|h| !h.enabled))
        .collect()
}

fn needs_proxy_headers(location: &LocationConfig) -> bool {
    location.proxy.is_some() && !missing_proxy_headers(location).is_empty()
}

fn check_proxy_headers(config: &Config) -> Vec<Finding> {
    config
        .locations
        .iter()
        .filter(|l| needs_proxy_headers(l))
        .map(|l| {
            Finding::node(
                l.id,
                format!(
                    "proxied location {} does not forward {}",
                    l.path,
                    missing_proxy_headers(l).join(", ")
                ),
            )
        })
        .collect()
}

fn fix_proxy_headers(config: &Config, target: Option<&NodeId>) -> ConfigPatch {
    patch_locations(config, target, needs_proxy_headers, |l| {
        for name in missing_proxy_headers(l) {
            if let Some((_, value)) = PROXY_HEADERS.iter().find(|(n, _)| *n == name) {
                l.custom_directives = remove_header(&l.custom_directives, "proxy_set_header", name);
                l.set_proxy_header(name, value);
            }
        }
    })
}

// ============================================================
// Upstreams and redirects
// ============================================================

fn check_upstream_empty(config: &Config) -> Vec<Finding> {
    config
        .upstreams
        .iter()
        .filter(|u| u.servers.is_empty() && !has_directive(&u.custom_directives, "server"))
        .map(|u| Finding::node(u.id, format!("upstream {} has no servers", u.name)))
        .collect()
}

fn check_https_redirect(config: &Config) -> Vec<Finding> {
    config
        .servers
        .iter()
        .filter(|s| redirect::needs_https_redirect(config, s))
        .map(|s| {
            Finding::node(
                s.id,
                format!(
                    "plain HTTP requests for {} are not redirected to HTTPS",
                    s.display_name()
                ),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tls_server(name: &str) -> ServerConfig {
        let mut server = ServerConfig::new(name);
        server.listen.port = 443;
        server.ssl.enabled = true;
        server.ssl.certificate = "/etc/ssl/site.crt".to_string();
        server.ssl.certificate_key = "/etc/ssl/site.key".to_string();
        server
    }

    fn issues_of(rule_id: &str, config: &Config) -> Vec<Issue> {
        find_rule(rule_id).unwrap().check(config)
    }

    fn fixed(rule_id: &str, config: &Config) -> Config {
        let patch = find_rule(rule_id).unwrap().fix(config, None).unwrap();
        config.clone().with_patch(patch)
    }

    #[test]
    fn test_rule_list_is_canonical() {
        let ids: Vec<&str> = RULES.iter().map(|r| r.id).collect();
        assert_eq!(ids.len(), 16);
        assert_eq!(ids[0], "worker-processes");
        assert_eq!(ids[15], "https-redirect");

        let detection_only: Vec<&str> = RULES
            .iter()
            .filter(|r| !r.can_auto_fix())
            .map(|r| r.id)
            .collect();
        assert_eq!(detection_only, vec!["server-name-missing", "upstream-empty"]);

        // Fix order follows the rule order
        assert!(RULES.windows(2).all(|w| w[0].scope <= w[1].scope));
    }

    #[test]
    fn test_severity_order() {
        let mut severities = vec![Severity::Info, Severity::Critical, Severity::Warning];
        severities.sort();
        assert_eq!(
            severities,
            vec![Severity::Critical, Severity::Warning, Severity::Info]
        );
        assert_eq!(serde_json::to_string(&Severity::Critical).unwrap(), "\"critical\"");
    }

    #[test]
    fn test_redirect_only_detection() {
        let mut server = ServerConfig::new("example.com");
        assert!(!is_redirect_only(&server));
        server.custom_directives = "return 301 https://$host$request_uri;".to_string();
        assert!(is_redirect_only(&server));
        server.custom_directives = "return 404;".to_string();
        assert!(!is_redirect_only(&server));
        server.custom_directives = "return 308 https://example.com;".to_string();
        assert!(is_redirect_only(&server));

        // A conditional redirect still serves content
        server.custom_directives =
            "if ($host = old.example.com) {\n    return 301 https://example.com$request_uri;\n}".to_string();
        assert!(!is_redirect_only(&server));
    }

    #[test]
    fn test_context_rules_fix() {
        let mut config = Config::default();
        config.http.keepalive_timeout = 300;
        config.http.custom_directives = "gzip_types text/plain;\nlog_format main $request;".to_string();

        for id in [
            "worker-processes",
            "worker-connections",
            "server-tokens",
            "gzip-disabled",
            "sendfile-disabled",
            "keepalive-timeout",
        ] {
            assert_eq!(issues_of(id, &config).len(), 1, "{}", id);
            config = fixed(id, &config);
            assert!(issues_of(id, &config).is_empty(), "{}", id);
        }

        assert_eq!(config.global.worker_processes, WorkerProcesses::Auto);
        assert_eq!(config.events.worker_connections, 1024);
        assert!(!config.http.server_tokens);
        assert!(config.http.gzip.enabled && config.http.gzip.vary);
        assert_eq!(config.http.gzip.comp_level, 5);
        assert_eq!(config.http.gzip.min_length, 256);
        assert!(config.http.sendfile && config.http.tcp_nopush);
        assert_eq!(config.http.keepalive_timeout, 65);
        assert_eq!(config.http.custom_directives, "log_format main $request;");
    }

    #[test]
    fn test_server_name_missing_is_detection_only() {
        let mut config = Config::default();
        config.servers.push(ServerConfig::new("_"));
        config.servers.push(ServerConfig::new(""));
        let mut redirect = ServerConfig::new("");
        redirect.custom_directives = "return 301 https://$host$request_uri;".to_string();
        config.servers.push(redirect);

        let issues = issues_of("server-name-missing", &config);
        assert_eq!(issues.len(), 2);
        assert!(issues.iter().all(|i| !i.can_auto_fix));
        assert!(find_rule("server-name-missing").unwrap().fix(&config, None).is_none());
    }

    #[test]
    fn test_duplicate_default_server_keeps_first() {
        let mut config = Config::default();
        for name in ["a", "b", "c"] {
            let mut server = ServerConfig::new(name);
            server.listen.default_server = true;
            config.servers.push(server);
        }
        config.servers[2].listen.port = 8080;

        let issues = issues_of("duplicate-default-server", &config);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].node_id, Some(config.servers[1].id));

        let config = fixed("duplicate-default-server", &config);
        let flags: Vec<bool> = config.servers.iter().map(|s| s.listen.default_server).collect();
        assert_eq!(flags, vec![true, false, true]);
    }

    #[test]
    fn test_tls_rules() {
        let mut config = Config::default();
        let mut server = tls_server("example.com");
        server.ssl.set_protocols(["TLSv1", "TLSv1.2"]);
        server.ssl.ciphers = "HIGH:RC4-SHA:!aNULL".to_string();
        server.custom_directives = "ssl_protocols SSLv3;\nssl_session_cache shared:SSL:10m;".to_string();
        config.servers.push(server);
        config.servers.push(ServerConfig::new("plain.example.com"));

        let protocols = issues_of("ssl-protocols", &config);
        assert_eq!(protocols.len(), 1);
        assert_eq!(protocols[0].severity, Severity::Critical);
        assert!(protocols[0].message.contains("TLSv1"));
        assert_eq!(issues_of("ssl-ciphers", &config).len(), 1);

        let config = fixed("ssl-ciphers", &fixed("ssl-protocols", &config));
        let server = &config.servers[0];
        assert_eq!(server.ssl.protocols, vec!["TLSv1.2", "TLSv1.3"]);
        assert_eq!(server.ssl.ciphers, STRONG_CIPHERS);
        assert_eq!(server.custom_directives, "ssl_session_cache shared:SSL:10m;");
        assert!(issues_of("ssl-protocols", &config).is_empty());
        assert!(issues_of("ssl-ciphers", &config).is_empty());
    }

    #[test]
    fn test_excluded_ciphers_are_not_weak() {
        assert!(!weak_ciphers("HIGH:!aNULL:!MD5"));
        assert!(!weak_ciphers(STRONG_CIPHERS));
        assert!(weak_ciphers("DES-CBC3-SHA"));
        assert!(weak_ciphers(""));
    }

    #[test]
    fn test_header_rules_replace_instead_of_duplicating() {
        let mut config = Config::default();
        let mut server = tls_server("example.com");
        server.custom_directives = "add_header x-frame-options DENY;\naccess_log off;".to_string();
        config.servers.push(server);

        let issues = issues_of("security-headers", &config);
        assert_eq!(issues.len(), 1);
        assert!(issues[0].message.contains("X-Content-Type-Options"));
        assert!(!issues[0].message.contains("X-Frame-Options"));
        assert_eq!(issues_of("hsts-missing", &config).len(), 1);

        let config = fixed("hsts-missing", &fixed("security-headers", &config));
        let text = &config.servers[0].custom_directives;
        assert_eq!(text.matches("X-Frame-Options").count() + text.matches("x-frame-options").count(), 1);
        assert!(text.starts_with("access_log off;"));
        assert!(text.contains(r#"add_header Strict-Transport-Security "max-age=31536000; includeSubDomains" always;"#));
        assert!(issues_of("security-headers", &config).is_empty());
        assert!(issues_of("hsts-missing", &config).is_empty());
    }

    #[test]
    fn test_redirect_only_servers_get_no_headers() {
        let mut config = Config::default();
        let mut server = tls_server("example.com");
        server.custom_directives = "return 301 https://www.example.com$request_uri;".to_string();
        config.servers.push(server);

        assert!(issues_of("security-headers", &config).is_empty());
        assert!(issues_of("hsts-missing", &config).is_empty());
        assert!(fix_security_headers(&config, None).is_empty());
    }

    #[test]
    fn test_autoindex_on_servers_and_locations() {
        let mut config = Config::default();
        let mut server = ServerConfig::new("files.example.com");
        server.custom_directives = "autoindex on;".to_string();
        let mut location = LocationConfig::new(server.id, LocationModifier::None, "/pub/");
        location.custom_directives = "autoindex on;\nautoindex_exact_size off;".to_string();
        let mut quiet = LocationConfig::new(server.id, LocationModifier::None, "/");
        quiet.custom_directives = "autoindex off;".to_string();
        config.servers.push(server);
        config.locations.push(location);
        config.locations.push(quiet);

        assert_eq!(issues_of("autoindex-enabled", &config).len(), 2);

        let config = fixed("autoindex-enabled", &config);
        assert_eq!(config.servers[0].custom_directives, "");
        assert_eq!(config.locations[0].custom_directives, "autoindex_exact_size off;");
        assert_eq!(config.locations[1].custom_directives, "autoindex off;");
    }

    #[test]
    fn test_proxy_headers_merge() {
        let mut config = Config::default();
        let server = ServerConfig::new("api.example.com");
        let mut location = LocationConfig::new(server.id, LocationModifier::None, "/api/");
        location.proxy = Some(ProxyTarget::Url("http://127.0.0.1:3000".to_string()));
        location.set_proxy_header("host", "$http_host");
        location.set_proxy_header("X-Real-IP", "$remote_addr");
        location.proxy_headers[1].enabled = false;
        let static_files = LocationConfig::new(server.id, LocationModifier::None, "/");
        config.servers.push(server);
        config.locations.push(location);
        config.locations.push(static_files);

        let issues = issues_of("proxy-headers", &config);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].node_id, Some(config.locations[0].id));

        let config = fixed("proxy-headers", &config);
        let location = &config.locations[0];
        assert_eq!(location.proxy_headers.len(), 4);
        // Existing headers keep their value
        assert_eq!(location.proxy_header("Host").unwrap().value, "$http_host");
        assert!(location.proxy_header("X-Real-IP").unwrap().enabled);
        assert!(issues_of("proxy-headers", &config).is_empty());
    }

    #[test]
    fn test_empty_upstream_is_critical_and_not_fixable() {
        let mut config = Config::default();
        config.upstreams.push(UpstreamConfig::new("backend"));
        let mut healthy = UpstreamConfig::new("healthy");
        healthy.servers.push(UpstreamServer::new("10.0.0.1", 8080));
        config.upstreams.push(healthy);

        let issues = issues_of("upstream-empty", &config);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, Severity::Critical);
        assert!(!issues[0].can_auto_fix);
        assert_eq!(issues[0].node_id, Some(config.upstreams[0].id));

        // Servers kept as passthrough still count
        config.upstreams[0].custom_directives = "server 10.0.0.2:8080 max_conns=100;".to_string();
        assert!(issues_of("upstream-empty", &config).is_empty());
    }

    #[test]
    fn test_targeted_fix_leaves_passing_nodes_alone() {
        let mut config = Config::default();
        let mut redirect = tls_server("example.com");
        redirect.custom_directives = "return 301 https://www.example.com$request_uri;".to_string();
        let redirect_id = redirect.id;
        config.servers.push(redirect);

        for id in ["security-headers", "hsts-missing", "autoindex-enabled"] {
            let patch = find_rule(id).unwrap().fix(&config, Some(&redirect_id)).unwrap();
            assert!(patch.is_empty(), "{}", id);
        }
    }

    #[test]
    fn test_targeted_default_server_fix_keeps_first() {
        let mut config = Config::default();
        for name in ["a", "b"] {
            let mut server = ServerConfig::new(name);
            server.listen.default_server = true;
            config.servers.push(server);
        }
        let first = config.servers[0].id;
        let second = config.servers[1].id;
        let rule = find_rule("duplicate-default-server").unwrap();

        assert!(rule.fix(&config, Some(&first)).unwrap().is_empty());

        let config = config.clone().with_patch(rule.fix(&config, Some(&second)).unwrap());
        let flags: Vec<bool> = config.servers.iter().map(|s| s.listen.default_server).collect();
        assert_eq!(flags, vec![true, false]);
    }

    #[test]
    fn test_fix_for_missing_node_is_empty() {
        let mut config = Config::default();
        config.servers.push(tls_server("example.com"));
        let ghost = NodeId::new();
        for rule in RULES.iter().filter(|r| r.scope >= RuleScope::Server) {
            if let Some(patch) = rule.fix(&config, Some(&ghost)) {
                assert!(patch.is_empty(), "{}", rule.id);
            }
        }
    }
}
