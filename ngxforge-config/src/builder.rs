//! Model builder
//!
//! Converts the generic AST into a structured [`Config`]. Each scope (main,
//! events, http, server, location, upstream) has a dispatch table from
//! directive name to handler. A directive without a handler, or whose
//! handler does not understand its arguments, is written back verbatim to
//! the owning entity's passthrough text.

use crate::parser::ast::*;
use ngxforge_core::config::*;
use std::collections::HashMap;

/// Applies a directive to a target. Returns `false` when the arguments are
/// not understood, in which case the directive is kept as passthrough.
type Handler<T> = fn(&mut T, &Directive) -> bool;

/// Directive name → handler lookup for one scope
struct DispatchTable<T> {
    handlers: HashMap<&'static str, Handler<T>>,
}

impl<T> DispatchTable<T> {
    fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    fn register(mut self, name: &'static str, handler: Handler<T>) -> Self {
        self.handlers.insert(name, handler);
        self
    }

    fn dispatch(&self, target: &mut T, directive: &Directive) -> bool {
        self.handlers
            .get(directive.name.as_str())
            .is_some_and(|handler| handler(target, directive))
    }
}

/// Server being built, plus which `listen` line the model holds
struct ServerScope {
    server: ServerConfig,
    modeled_listen: Option<ModeledListen>,
}

struct ModeledListen {
    source: String,
    ssl: bool,
}

/// Location being built, plus the pending websocket idiom state
struct LocationScope {
    location: LocationConfig,
    http_version: Option<String>,
}

impl LocationScope {
    fn finish(mut self) -> LocationConfig {
        match self.http_version.take() {
            Some(version) if version == "1.1" && self.location.proxy_header("Upgrade").is_some() => {
                self.location.websocket = true;
                self.location.proxy_headers.retain(|h| {
                    !(h.name.eq_ignore_ascii_case("Upgrade")
                        || (h.name.eq_ignore_ascii_case("Connection")
                            && h.value.to_ascii_lowercase().contains("upgrade")))
                });
            }
            Some(version) => push_line(
                &mut self.location.custom_directives,
                &format!("proxy_http_version {};", version),
            ),
            None => {}
        }
        self.location
    }
}

/// AST → [`Config`] converter
pub struct ModelBuilder {
    global: DispatchTable<GlobalConfig>,
    events: DispatchTable<EventsConfig>,
    http: DispatchTable<HttpConfig>,
    server: DispatchTable<ServerScope>,
    location: DispatchTable<LocationScope>,
    upstream: DispatchTable<UpstreamConfig>,
}

impl ModelBuilder {
    pub fn new() -> Self {
        let global = DispatchTable::new()
            .register("user", global_user)
            .register("worker_processes", global_worker_processes)
            .register("error_log", global_error_log)
            .register("pid", global_pid);

        let events = DispatchTable::new()
            .register("worker_connections", events_worker_connections)
            .register("use", events_use)
            .register("multi_accept", events_multi_accept);

        let http = DispatchTable::new()
            .register("sendfile", |h: &mut HttpConfig, d| set_flag(&mut h.sendfile, d))
            .register("tcp_nopush", |h: &mut HttpConfig, d| set_flag(&mut h.tcp_nopush, d))
            .register("tcp_nodelay", |h: &mut HttpConfig, d| set_flag(&mut h.tcp_nodelay, d))
            .register("server_tokens", |h: &mut HttpConfig, d| set_flag(&mut h.server_tokens, d))
            .register("keepalive_timeout", http_keepalive_timeout)
            .register("client_max_body_size", http_client_max_body_size)
            .register("default_type", http_default_type)
            .register("include", http_include)
            .register("gzip", |h: &mut HttpConfig, d| set_flag(&mut h.gzip.enabled, d))
            .register("gzip_vary", |h: &mut HttpConfig, d| set_flag(&mut h.gzip.vary, d))
            .register("gzip_comp_level", http_gzip_comp_level)
            .register("gzip_min_length", http_gzip_min_length)
            .register("gzip_types", http_gzip_types);

        let server = DispatchTable::new()
            .register("listen", server_listen)
            .register("server_name", server_name)
            .register("root", server_root)
            .register("index", server_index)
            .register("ssl", |s: &mut ServerScope, d| set_flag(&mut s.server.ssl.enabled, d))
            .register("ssl_certificate", server_ssl_certificate)
            .register("ssl_certificate_key", server_ssl_certificate_key)
            .register("ssl_protocols", server_ssl_protocols)
            .register("ssl_ciphers", server_ssl_ciphers);

        let location = DispatchTable::new()
            .register("proxy_pass", location_proxy_pass)
            .register("proxy_set_header", location_proxy_set_header)
            .register("proxy_http_version", location_proxy_http_version)
            .register("alias", location_alias)
            .register("try_files", location_try_files)
            .register("return", location_return)
            .register("rewrite", location_rewrite)
            .register("allow", |l: &mut LocationScope, d| push_arg(&mut l.location.access.allow, d))
            .register("deny", |l: &mut LocationScope, d| push_arg(&mut l.location.access.deny, d))
            .register("auth_basic", location_auth_basic)
            .register("auth_basic_user_file", location_auth_basic_user_file)
            .register("add_header", location_add_header);

        let upstream = DispatchTable::new()
            .register("server", upstream_server)
            .register("ip_hash", |u: &mut UpstreamConfig, d| {
                set_strategy(u, d, LoadBalanceStrategy::IpHash)
            })
            .register("least_conn", |u: &mut UpstreamConfig, d| {
                set_strategy(u, d, LoadBalanceStrategy::LeastConn)
            });

        Self {
            global,
            events,
            http,
            server,
            location,
            upstream,
        }
    }

    /// Build the structured config. Never fails: anything not understood is
    /// preserved as passthrough text.
    pub fn build(&self, ast: &Ast) -> Config {
        let mut config = Config::default();

        for node in &ast.nodes {
            match node {
                Node::Directive(directive) => {
                    if !self.global.dispatch(&mut config.global, directive) {
                        push_line(&mut config.global.custom_directives, &directive.to_source());
                    }
                }
                Node::Block(block) => match block.name.as_str() {
                    "events" => self.build_events(block, &mut config.events),
                    "http" => self.build_http(block, &mut config),
                    // Site snippets carry server/upstream blocks at the top level
                    "server" => self.build_server(block, &mut config),
                    "upstream" => self.build_upstream(block, &mut config),
                    _ => push_line(&mut config.global.custom_directives, &block.to_source(0)),
                },
            }
        }

        resolve_upstream_refs(&mut config);
        config
    }

    fn build_events(&self, block: &Block, events: &mut EventsConfig) {
        for child in &block.children {
            match child {
                Node::Directive(directive) => {
                    if !self.events.dispatch(events, directive) {
                        push_line(&mut events.custom_directives, &directive.to_source());
                    }
                }
                Node::Block(nested) => push_line(&mut events.custom_directives, &nested.to_source(0)),
            }
        }
    }

    fn build_http(&self, block: &Block, config: &mut Config) {
        for child in &block.children {
            match child {
                Node::Directive(directive) => {
                    if !self.http.dispatch(&mut config.http, directive) {
                        push_line(&mut config.http.custom_directives, &directive.to_source());
                    }
                }
                Node::Block(nested) => match nested.name.as_str() {
                    "server" => self.build_server(nested, config),
                    "upstream" => self.build_upstream(nested, config),
                    _ => push_line(&mut config.http.custom_directives, &nested.to_source(0)),
                },
            }
        }
    }

    fn build_server(&self, block: &Block, config: &mut Config) {
        let mut scope = ServerScope {
            server: ServerConfig::default(),
            modeled_listen: None,
        };
        let mut locations = Vec::new();

        for child in &block.children {
            match child {
                Node::Directive(directive) => {
                    if !self.server.dispatch(&mut scope, directive) {
                        push_line(&mut scope.server.custom_directives, &directive.to_source());
                    }
                }
                Node::Block(nested) if nested.name == "location" => {
                    locations.push(self.build_location(nested, scope.server.id));
                }
                Node::Block(nested) => {
                    push_line(&mut scope.server.custom_directives, &nested.to_source(0))
                }
            }
        }

        tracing::debug!(
            "Built server {} (port {}) with {} locations",
            scope.server.display_name(),
            scope.server.listen.port,
            locations.len()
        );
        config.servers.push(scope.server);
        config.locations.extend(locations);
    }

    fn build_location(&self, block: &Block, server_id: NodeId) -> LocationConfig {
        let (modifier, path) = location_target(&block.args);
        let mut scope = LocationScope {
            location: LocationConfig::new(server_id, modifier, path),
            http_version: None,
        };

        for child in &block.children {
            match child {
                Node::Directive(directive) => {
                    if !self.location.dispatch(&mut scope, directive) {
                        push_line(&mut scope.location.custom_directives, &directive.to_source());
                    }
                }
                Node::Block(nested) if nested.name == "location" => {
                    tracing::debug!(
                        "Nested location {} at line {} is not modeled",
                        nested.args.join(" "),
                        nested.line
                    );
                    push_line(
                        &mut scope.location.custom_directives,
                        &format!("# nested location {} is not modeled", nested.args.join(" ")),
                    );
                }
                Node::Block(nested) => {
                    push_line(&mut scope.location.custom_directives, &nested.to_source(0))
                }
            }
        }

        scope.finish()
    }

    fn build_upstream(&self, block: &Block, config: &mut Config) {
        let name = block.args.join(" ");
        let mut upstream = UpstreamConfig::new(name);

        for child in &block.children {
            match child {
                Node::Directive(directive) => {
                    if !self.upstream.dispatch(&mut upstream, directive) {
                        push_line(&mut upstream.custom_directives, &directive.to_source());
                    }
                }
                Node::Block(nested) => push_line(&mut upstream.custom_directives, &nested.to_source(0)),
            }
        }

        config.upstreams.push(upstream);
    }
}

impl Default for ModelBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Point `proxy_pass http://<name>` at the upstream called `<name>`.
///
/// Runs after every block is built since upstreams may be declared after
/// the servers that use them.
fn resolve_upstream_refs(config: &mut Config) {
    let upstreams = &config.upstreams;
    for location in &mut config.locations {
        let resolved = match &location.proxy {
            Some(ProxyTarget::Url(url)) => url
                .strip_prefix("http://")
                .and_then(|name| upstreams.iter().find(|u| u.name == name))
                .map(|u| u.id),
            _ => None,
        };
        if let Some(id) = resolved {
            tracing::debug!("Location {} proxies to upstream {}", location.path, id);
            location.proxy = Some(ProxyTarget::Upstream(id));
        }
    }
}

// ============================================================
// Shared helpers
// ============================================================

fn push_line(text: &mut String, line: &str) {
    if !text.is_empty() {
        text.push('\n');
    }
    text.push_str(line);
}

fn single_arg(directive: &Directive) -> Option<&str> {
    match directive.args.as_slice() {
        [arg] => Some(arg.as_str()),
        _ => None,
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "on" => Some(true),
        "off" => Some(false),
        _ => None,
    }
}

fn set_flag(field: &mut bool, directive: &Directive) -> bool {
    match single_arg(directive).and_then(parse_flag) {
        Some(value) => {
            *field = value;
            true
        }
        None => false,
    }
}

fn set_string(field: &mut String, directive: &Directive) -> bool {
    match single_arg(directive) {
        Some(value) => {
            *field = value.to_string();
            true
        }
        None => false,
    }
}

fn push_arg(list: &mut Vec<String>, directive: &Directive) -> bool {
    match single_arg(directive) {
        Some(value) => {
            list.push(value.to_string());
            true
        }
        None => false,
    }
}

/// nginx time value in seconds: `65`, `65s`, `2m`, `1h`
fn parse_seconds(value: &str) -> Option<u32> {
    let (digits, multiplier) = match value.char_indices().last()? {
        (i, 's') => (&value[..i], 1),
        (i, 'm') => (&value[..i], 60),
        (i, 'h') => (&value[..i], 3600),
        _ => (value, 1),
    };
    digits.parse::<u32>().ok()?.checked_mul(multiplier)
}

/// Split `location` arguments into modifier and path
fn location_target(args: &[String]) -> (LocationModifier, String) {
    match args {
        [first, rest @ ..] => match LocationModifier::from_token(first) {
            Some(modifier) => (
                modifier,
                rest.first().cloned().unwrap_or_else(|| "/".to_string()),
            ),
            None => (LocationModifier::None, first.clone()),
        },
        [] => (LocationModifier::None, "/".to_string()),
    }
}

/// Lenient `listen` parsing. Returns the listen spec and whether `ssl` was
/// present. Unrecognized parameters are ignored.
pub fn parse_listen(args: &[String]) -> (ListenConfig, bool) {
    let mut listen = ListenConfig::default();
    let mut ssl = false;

    if let Some(target) = args.first() {
        if let Ok(port) = target.parse::<u16>() {
            listen.port = port;
        } else if let Some((address, port)) = target.rsplit_once(':') {
            if let Ok(port) = port.parse::<u16>() {
                listen.port = port;
                if !address.is_empty() {
                    listen.address = Some(address.to_string());
                }
            }
        } else {
            listen.address = Some(target.clone());
        }
    }

    for arg in args {
        match arg.to_ascii_lowercase().as_str() {
            "default_server" | "default" => listen.default_server = true,
            "http2" => listen.http2 = true,
            "ssl" => ssl = true,
            _ => {}
        }
    }

    (listen, ssl)
}

// ============================================================
// Main context
// ============================================================

fn global_user(global: &mut GlobalConfig, directive: &Directive) -> bool {
    if directive.args.is_empty() || directive.args.len() > 2 {
        return false;
    }
    global.user = Some(directive.args.join(" "));
    true
}

fn global_worker_processes(global: &mut GlobalConfig, directive: &Directive) -> bool {
    match single_arg(directive) {
        Some("auto") => global.worker_processes = WorkerProcesses::Auto,
        Some(count) => match count.parse() {
            Ok(count) => global.worker_processes = WorkerProcesses::Count(count),
            Err(_) => return false,
        },
        None => return false,
    }
    true
}

fn global_error_log(global: &mut GlobalConfig, directive: &Directive) -> bool {
    let (path, level) = match directive.args.as_slice() {
        [path] => (path, None),
        [path, level] => match level.parse::<LogLevel>() {
            Ok(level) => (path, Some(level)),
            Err(_) => return false,
        },
        _ => return false,
    };
    global.error_log = Some(ErrorLog {
        path: path.clone(),
        level,
    });
    true
}

fn global_pid(global: &mut GlobalConfig, directive: &Directive) -> bool {
    match single_arg(directive) {
        Some(path) => {
            global.pid = Some(path.to_string());
            true
        }
        None => false,
    }
}

// ============================================================
// Events
// ============================================================

fn events_worker_connections(events: &mut EventsConfig, directive: &Directive) -> bool {
    match single_arg(directive).and_then(|v| v.parse().ok()) {
        Some(count) => {
            events.worker_connections = count;
            true
        }
        None => false,
    }
}

fn events_use(events: &mut EventsConfig, directive: &Directive) -> bool {
    match single_arg(directive).and_then(|v| v.parse::<EventMethod>().ok()) {
        Some(method) => {
            events.use_method = Some(method);
            true
        }
        None => false,
    }
}

fn events_multi_accept(events: &mut EventsConfig, directive: &Directive) -> bool {
    set_flag(&mut events.multi_accept, directive)
}

// ============================================================
// HTTP
// ============================================================

fn http_keepalive_timeout(http: &mut HttpConfig, directive: &Directive) -> bool {
    match single_arg(directive).and_then(parse_seconds) {
        Some(seconds) => {
            http.keepalive_timeout = seconds;
            true
        }
        None => false,
    }
}

fn http_client_max_body_size(http: &mut HttpConfig, directive: &Directive) -> bool {
    set_string(&mut http.client_max_body_size, directive)
}

fn http_default_type(http: &mut HttpConfig, directive: &Directive) -> bool {
    match single_arg(directive) {
        Some(mime) => {
            http.default_type = Some(mime.to_string());
            true
        }
        None => false,
    }
}

fn http_include(http: &mut HttpConfig, directive: &Directive) -> bool {
    match single_arg(directive) {
        Some(path) if path.ends_with("mime.types") && !http.include_mime_types => {
            http.include_mime_types = true;
            true
        }
        _ => false,
    }
}

fn http_gzip_comp_level(http: &mut HttpConfig, directive: &Directive) -> bool {
    match single_arg(directive).and_then(|v| v.parse::<u8>().ok()) {
        Some(level @ 1..=9) => {
            http.gzip.comp_level = level;
            true
        }
        _ => false,
    }
}

fn http_gzip_min_length(http: &mut HttpConfig, directive: &Directive) -> bool {
    match single_arg(directive).and_then(|v| v.parse().ok()) {
        Some(length) => {
            http.gzip.min_length = length;
            true
        }
        None => false,
    }
}

fn http_gzip_types(http: &mut HttpConfig, directive: &Directive) -> bool {
    if directive.args.is_empty() {
        return false;
    }
    http.gzip.types = directive.args.clone();
    true
}

// ============================================================
// Server
// ============================================================

fn server_listen(scope: &mut ServerScope, directive: &Directive) -> bool {
    let (listen, ssl) = parse_listen(&directive.args);
    let replace = match &scope.modeled_listen {
        None => true,
        // A TLS listen takes the model over from a plain one
        Some(current) if ssl && !current.ssl => {
            push_line(&mut scope.server.custom_directives, &current.source);
            true
        }
        Some(_) => false,
    };
    if !replace {
        return false;
    }

    scope.server.listen = listen;
    if ssl {
        scope.server.ssl.enabled = true;
    }
    scope.modeled_listen = Some(ModeledListen {
        source: directive.to_source(),
        ssl,
    });
    true
}

fn server_name(scope: &mut ServerScope, directive: &Directive) -> bool {
    if directive.args.is_empty() {
        return false;
    }
    scope.server.server_name = directive.args.join(" ");
    true
}

fn server_root(scope: &mut ServerScope, directive: &Directive) -> bool {
    set_string(&mut scope.server.root, directive)
}

fn server_index(scope: &mut ServerScope, directive: &Directive) -> bool {
    if directive.args.is_empty() {
        return false;
    }
    scope.server.index = directive.args.join(" ");
    true
}

fn server_ssl_certificate(scope: &mut ServerScope, directive: &Directive) -> bool {
    // A second certificate (e.g. ECDSA next to RSA) stays passthrough
    scope.server.ssl.certificate.is_empty()
        && set_string(&mut scope.server.ssl.certificate, directive)
}

fn server_ssl_certificate_key(scope: &mut ServerScope, directive: &Directive) -> bool {
    scope.server.ssl.certificate_key.is_empty()
        && set_string(&mut scope.server.ssl.certificate_key, directive)
}

fn server_ssl_protocols(scope: &mut ServerScope, directive: &Directive) -> bool {
    if directive.args.is_empty() {
        return false;
    }
    scope.server.ssl.set_protocols(directive.args.iter().cloned());
    true
}

fn server_ssl_ciphers(scope: &mut ServerScope, directive: &Directive) -> bool {
    set_string(&mut scope.server.ssl.ciphers, directive)
}

// ============================================================
// Location
// ============================================================

fn location_proxy_pass(scope: &mut LocationScope, directive: &Directive) -> bool {
    match single_arg(directive) {
        Some(url) if scope.location.proxy.is_none() => {
            scope.location.proxy = Some(ProxyTarget::Url(url.to_string()));
            true
        }
        _ => false,
    }
}

fn location_proxy_set_header(scope: &mut LocationScope, directive: &Directive) -> bool {
    match directive.args.as_slice() {
        [name, value] => {
            scope.location.set_proxy_header(name, value);
            true
        }
        _ => false,
    }
}

fn location_proxy_http_version(scope: &mut LocationScope, directive: &Directive) -> bool {
    match single_arg(directive) {
        Some(version) => {
            scope.http_version = Some(version.to_string());
            true
        }
        None => false,
    }
}

fn location_alias(scope: &mut LocationScope, directive: &Directive) -> bool {
    match single_arg(directive) {
        Some(path) => {
            scope.location.alias = Some(path.to_string());
            true
        }
        None => false,
    }
}

fn location_try_files(scope: &mut LocationScope, directive: &Directive) -> bool {
    if directive.args.is_empty() {
        return false;
    }
    scope.location.try_files = directive.args.clone();
    true
}

fn location_return(scope: &mut LocationScope, directive: &Directive) -> bool {
    if scope.location.return_rule.is_some() {
        return false;
    }
    let rule = match directive.args.as_slice() {
        [code] => match code.parse() {
            Ok(code) => ReturnRule { code, url: None },
            // `return URL` is a temporary redirect
            Err(_) => ReturnRule {
                code: 302,
                url: Some(code.clone()),
            },
        },
        [code, url] => match code.parse() {
            Ok(code) => ReturnRule {
                code,
                url: Some(url.clone()),
            },
            Err(_) => return false,
        },
        _ => return false,
    };
    scope.location.return_rule = Some(rule);
    true
}

fn location_rewrite(scope: &mut LocationScope, directive: &Directive) -> bool {
    if scope.location.rewrite.is_some() {
        return false;
    }
    match directive.args.as_slice() {
        [pattern, replacement] => {
            scope.location.rewrite = Some(RewriteRule {
                pattern: pattern.clone(),
                replacement: replacement.clone(),
                flag: "last".to_string(),
            });
            true
        }
        [pattern, replacement, flag] => {
            scope.location.rewrite = Some(RewriteRule {
                pattern: pattern.clone(),
                replacement: replacement.clone(),
                flag: flag.clone(),
            });
            true
        }
        _ => false,
    }
}

fn location_auth_basic(scope: &mut LocationScope, directive: &Directive) -> bool {
    match single_arg(directive) {
        Some(realm) => {
            scope.location.access.auth_basic = Some(realm.to_string());
            true
        }
        None => false,
    }
}

fn location_auth_basic_user_file(scope: &mut LocationScope, directive: &Directive) -> bool {
    match single_arg(directive) {
        Some(path) => {
            scope.location.access.auth_basic_user_file = Some(path.to_string());
            true
        }
        None => false,
    }
}

fn location_add_header(scope: &mut LocationScope, directive: &Directive) -> bool {
    let [name, value, rest @ ..] = directive.args.as_slice() else {
        return false;
    };
    if !rest.iter().all(|arg| arg == "always") {
        return false;
    }

    let cors = &mut scope.location.cors;
    let field = match name.to_ascii_lowercase().as_str() {
        "access-control-allow-origin" => &mut cors.allow_origin,
        "access-control-allow-methods" => &mut cors.allow_methods,
        "access-control-allow-headers" => &mut cors.allow_headers,
        _ => return false,
    };
    *field = value.clone();
    cors.enabled = true;
    true
}

// ============================================================
// Upstream
// ============================================================

fn upstream_server(upstream: &mut UpstreamConfig, directive: &Directive) -> bool {
    let Some((target, params)) = directive.args.split_first() else {
        return false;
    };

    let mut server = match target.rsplit_once(':') {
        Some((address, port)) => match port.parse::<u16>() {
            Ok(port) => UpstreamServer::new(address, port),
            Err(_) => UpstreamServer::new(target.as_str(), 80),
        },
        None => UpstreamServer::new(target.as_str(), 80),
    };

    // Any parameter outside the model keeps the whole line as passthrough
    for param in params {
        let understood = if let Some(weight) = param.strip_prefix("weight=") {
            weight.parse().map(|w| server.weight = w).is_ok()
        } else if let Some(max_fails) = param.strip_prefix("max_fails=") {
            max_fails.parse().map(|m| server.max_fails = m).is_ok()
        } else if let Some(timeout) = param.strip_prefix("fail_timeout=") {
            parse_seconds(timeout).map(|t| server.fail_timeout = t).is_some()
        } else if param == "backup" {
            server.backup = true;
            true
        } else if param == "down" {
            server.down = true;
            true
        } else {
            false
        };
        if !understood {
            return false;
        }
    }

    upstream.servers.push(server);
    true
}

fn set_strategy(
    upstream: &mut UpstreamConfig,
    directive: &Directive,
    strategy: LoadBalanceStrategy,
) -> bool {
    if !directive.args.is_empty() {
        return false;
    }
    upstream.strategy = strategy;
    true
}
