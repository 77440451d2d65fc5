//! Configuration type definitions
//!
//! These types are the structured form of an nginx configuration. Every
//! directive the parser does not model is kept verbatim in the owning
//! entity's `custom_directives` text so that nothing is lost on the way
//! back to text.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque identity of a server, location or upstream.
///
/// Ids are never reused: every call to [`NodeId::new`] yields a fresh one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(Uuid);

impl NodeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Root configuration: one nginx.conf worth of entities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    /// Main-context settings
    #[serde(default)]
    pub global: GlobalConfig,

    /// `events { }` settings
    #[serde(default)]
    pub events: EventsConfig,

    /// `http { }` defaults
    #[serde(default)]
    pub http: HttpConfig,

    /// Virtual hosts in declaration order
    #[serde(default)]
    pub servers: Vec<ServerConfig>,

    /// Locations of all servers, in declaration order
    #[serde(default)]
    pub locations: Vec<LocationConfig>,

    /// Upstream pools
    #[serde(default)]
    pub upstreams: Vec<UpstreamConfig>,

    /// Text this config was last parsed from. Opaque to the core.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

// ============================================================
// Main context
// ============================================================

/// Process-wide settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct GlobalConfig {
    /// `user` (user and optional group)
    pub user: Option<String>,

    #[serde(default)]
    pub worker_processes: WorkerProcesses,

    pub error_log: Option<ErrorLog>,

    pub pid: Option<String>,

    #[serde(default)]
    pub custom_directives: String,
}

/// `worker_processes` policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerProcesses {
    Auto,
    Count(u32),
}

impl Default for WorkerProcesses {
    fn default() -> Self {
        WorkerProcesses::Count(1)
    }
}

/// `error_log` target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorLog {
    pub path: String,
    pub level: Option<LogLevel>,
}

/// nginx log severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Notice,
    Warn,
    Error,
    Crit,
    Alert,
    Emerg,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Notice => "notice",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Crit => "crit",
            LogLevel::Alert => "alert",
            LogLevel::Emerg => "emerg",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "notice" => Ok(LogLevel::Notice),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "crit" => Ok(LogLevel::Crit),
            "alert" => Ok(LogLevel::Alert),
            "emerg" => Ok(LogLevel::Emerg),
            other => Err(format!("unknown log level: {}", other)),
        }
    }
}

// ============================================================
// Events
// ============================================================

/// Connection-accept policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventsConfig {
    #[serde(default = "default_worker_connections")]
    pub worker_connections: u32,

    /// `use` connection processing method
    pub use_method: Option<EventMethod>,

    #[serde(default)]
    pub multi_accept: bool,

    #[serde(default)]
    pub custom_directives: String,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            worker_connections: default_worker_connections(),
            use_method: None,
            multi_accept: false,
            custom_directives: String::new(),
        }
    }
}

fn default_worker_connections() -> u32 {
    512
}

/// Connection multiplexing backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventMethod {
    Epoll,
    Kqueue,
    Select,
    Poll,
    DevPoll,
    Eventport,
}

impl EventMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventMethod::Epoll => "epoll",
            EventMethod::Kqueue => "kqueue",
            EventMethod::Select => "select",
            EventMethod::Poll => "poll",
            EventMethod::DevPoll => "/dev/poll",
            EventMethod::Eventport => "eventport",
        }
    }
}

impl FromStr for EventMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "epoll" => Ok(EventMethod::Epoll),
            "kqueue" => Ok(EventMethod::Kqueue),
            "select" => Ok(EventMethod::Select),
            "poll" => Ok(EventMethod::Poll),
            "/dev/poll" => Ok(EventMethod::DevPoll),
            "eventport" => Ok(EventMethod::Eventport),
            other => Err(format!("unknown event method: {}", other)),
        }
    }
}

// ============================================================
// HTTP
// ============================================================

/// Document-serving defaults of the `http` block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default)]
    pub sendfile: bool,

    #[serde(default)]
    pub tcp_nopush: bool,

    #[serde(default = "default_bool_true")]
    pub tcp_nodelay: bool,

    /// Keepalive timeout in seconds
    #[serde(default = "default_keepalive_timeout")]
    pub keepalive_timeout: u32,

    /// `include mime.types` present
    #[serde(default)]
    pub include_mime_types: bool,

    pub default_type: Option<String>,

    #[serde(default = "default_bool_true")]
    pub server_tokens: bool,

    /// Size with nginx unit suffix, e.g. `1m`
    #[serde(default = "default_body_size")]
    pub client_max_body_size: String,

    #[serde(default)]
    pub gzip: GzipConfig,

    #[serde(default)]
    pub custom_directives: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            sendfile: false,
            tcp_nopush: false,
            tcp_nodelay: true,
            keepalive_timeout: default_keepalive_timeout(),
            include_mime_types: false,
            default_type: None,
            server_tokens: true,
            client_max_body_size: default_body_size(),
            gzip: GzipConfig::default(),
            custom_directives: String::new(),
        }
    }
}

fn default_bool_true() -> bool {
    true
}

fn default_keepalive_timeout() -> u32 {
    75
}

fn default_body_size() -> String {
    "1m".to_string()
}

/// Compression policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GzipConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_gzip_level")]
    pub comp_level: u8,

    #[serde(default = "default_gzip_min_length")]
    pub min_length: u32,

    /// MIME types beyond the implicit `text/html`
    #[serde(default)]
    pub types: Vec<String>,

    #[serde(default)]
    pub vary: bool,
}

impl Default for GzipConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            comp_level: default_gzip_level(),
            min_length: default_gzip_min_length(),
            types: Vec::new(),
            vary: false,
        }
    }
}

fn default_gzip_level() -> u8 {
    1
}

fn default_gzip_min_length() -> u32 {
    20
}

// ============================================================
// Servers
// ============================================================

/// One virtual host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ServerConfig {
    #[serde(default)]
    pub id: NodeId,

    #[serde(default)]
    pub listen: ListenConfig,

    /// `server_name` pattern(s), space separated
    #[serde(default)]
    pub server_name: String,

    #[serde(default)]
    pub ssl: SslConfig,

    /// Document root, empty when unset
    #[serde(default)]
    pub root: String,

    /// Index files, empty when unset
    #[serde(default)]
    pub index: String,

    #[serde(default)]
    pub custom_directives: String,
}

impl ServerConfig {
    pub fn new(server_name: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
            ..Default::default()
        }
    }

    /// Name used in messages, `_` when the server has none
    pub fn display_name(&self) -> &str {
        if self.server_name.trim().is_empty() {
            "_"
        } else {
            &self.server_name
        }
    }
}

/// Listen specification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListenConfig {
    /// Address part before the port, e.g. `127.0.0.1` or `[::]`
    pub address: Option<String>,

    #[serde(default = "default_listen_port")]
    pub port: u16,

    #[serde(default)]
    pub default_server: bool,

    #[serde(default)]
    pub http2: bool,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            address: None,
            port: default_listen_port(),
            default_server: false,
            http2: false,
        }
    }
}

fn default_listen_port() -> u16 {
    80
}

/// TLS configuration of a server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SslConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub certificate: String,

    #[serde(default)]
    pub certificate_key: String,

    /// Allowed protocol versions, kept in order without duplicates
    #[serde(default)]
    pub protocols: Vec<String>,

    #[serde(default)]
    pub ciphers: String,

    /// Emit a plain-HTTP sibling that redirects to this server
    #[serde(default)]
    pub force_redirect: bool,
}

impl SslConfig {
    /// Replace the protocol list, dropping repeated entries
    pub fn set_protocols<I, S>(&mut self, protocols: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.protocols.clear();
        for protocol in protocols {
            let protocol = protocol.into();
            if !self.protocols.contains(&protocol) {
                self.protocols.push(protocol);
            }
        }
    }
}

// ============================================================
// Locations
// ============================================================

/// One routing rule, owned by exactly one server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationConfig {
    #[serde(default)]
    pub id: NodeId,

    /// Owning server
    pub server_id: NodeId,

    #[serde(default)]
    pub modifier: LocationModifier,

    pub path: String,

    /// `proxy_pass` target
    pub proxy: Option<ProxyTarget>,

    #[serde(default)]
    pub proxy_headers: Vec<ProxyHeader>,

    #[serde(default)]
    pub cors: CorsConfig,

    /// WebSocket upgrade idiom enabled
    #[serde(default)]
    pub websocket: bool,

    pub alias: Option<String>,

    #[serde(default)]
    pub try_files: Vec<String>,

    #[serde(rename = "return")]
    pub return_rule: Option<ReturnRule>,

    pub rewrite: Option<RewriteRule>,

    #[serde(default)]
    pub access: AccessControl,

    #[serde(default)]
    pub custom_directives: String,
}

impl LocationConfig {
    pub fn new(server_id: NodeId, modifier: LocationModifier, path: impl Into<String>) -> Self {
        Self {
            id: NodeId::new(),
            server_id,
            modifier,
            path: path.into(),
            proxy: None,
            proxy_headers: Vec::new(),
            cors: CorsConfig::default(),
            websocket: false,
            alias: None,
            try_files: Vec::new(),
            return_rule: None,
            rewrite: None,
            access: AccessControl::default(),
            custom_directives: String::new(),
        }
    }

    /// Insert a header or update the existing one with the same name.
    ///
    /// Names compare case-insensitively; an update also re-enables the header.
    pub fn set_proxy_header(&mut self, name: &str, value: &str) {
        match self
            .proxy_headers
            .iter_mut()
            .find(|h| h.name.eq_ignore_ascii_case(name))
        {
            Some(header) => {
                header.value = value.to_string();
                header.enabled = true;
            }
            None => self.proxy_headers.push(ProxyHeader {
                name: name.to_string(),
                value: value.to_string(),
                enabled: true,
            }),
        }
    }

    pub fn proxy_header(&self, name: &str) -> Option<&ProxyHeader> {
        self.proxy_headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
    }
}

/// Location match modifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LocationModifier {
    /// Plain prefix match
    #[default]
    None,
    /// `=`
    Exact,
    /// `~`
    Regex,
    /// `~*`
    RegexCaseInsensitive,
    /// `^~`
    PrefixPriority,
}

impl LocationModifier {
    /// Recognize a modifier token as written in a `location` line
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "=" => Some(LocationModifier::Exact),
            "~" => Some(LocationModifier::Regex),
            "~*" => Some(LocationModifier::RegexCaseInsensitive),
            "^~" => Some(LocationModifier::PrefixPriority),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LocationModifier::None => "",
            LocationModifier::Exact => "=",
            LocationModifier::Regex => "~",
            LocationModifier::RegexCaseInsensitive => "~*",
            LocationModifier::PrefixPriority => "^~",
        }
    }

    pub fn is_prefix(&self) -> bool {
        matches!(self, LocationModifier::None | LocationModifier::PrefixPriority)
    }

    pub fn is_regex(&self) -> bool {
        matches!(self, LocationModifier::Regex | LocationModifier::RegexCaseInsensitive)
    }
}

impl fmt::Display for LocationModifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where `proxy_pass` sends requests. A literal URL and an upstream
/// reference are mutually exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyTarget {
    Url(String),
    Upstream(NodeId),
}

/// `proxy_set_header` entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyHeader {
    pub name: String,
    pub value: String,
    #[serde(default = "default_bool_true")]
    pub enabled: bool,
}

/// CORS response headers of a location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CorsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub allow_origin: String,
    #[serde(default)]
    pub allow_methods: String,
    #[serde(default)]
    pub allow_headers: String,
}

/// `return code [url]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnRule {
    pub code: u16,
    pub url: Option<String>,
}

/// `rewrite pattern replacement [flag]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewriteRule {
    pub pattern: String,
    pub replacement: String,
    #[serde(default = "default_rewrite_flag")]
    pub flag: String,
}

fn default_rewrite_flag() -> String {
    "last".to_string()
}

/// allow/deny lists and basic auth
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AccessControl {
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
    pub auth_basic: Option<String>,
    pub auth_basic_user_file: Option<String>,
}

// ============================================================
// Upstreams
// ============================================================

/// Named pool of backends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default)]
    pub id: NodeId,

    pub name: String,

    #[serde(default)]
    pub strategy: LoadBalanceStrategy,

    #[serde(default)]
    pub servers: Vec<UpstreamServer>,

    #[serde(default)]
    pub custom_directives: String,
}

impl UpstreamConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: NodeId::new(),
            name: name.into(),
            strategy: LoadBalanceStrategy::default(),
            servers: Vec::new(),
            custom_directives: String::new(),
        }
    }
}

/// Load distribution strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalanceStrategy {
    #[default]
    RoundRobin,
    LeastConn,
    IpHash,
}

/// One backend of an upstream pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamServer {
    pub address: String,

    #[serde(default = "default_listen_port")]
    pub port: u16,

    #[serde(default = "default_weight")]
    pub weight: u32,

    #[serde(default = "default_max_fails")]
    pub max_fails: u32,

    /// Seconds
    #[serde(default = "default_fail_timeout")]
    pub fail_timeout: u32,

    #[serde(default)]
    pub backup: bool,

    #[serde(default)]
    pub down: bool,
}

impl UpstreamServer {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            weight: default_weight(),
            max_fails: default_max_fails(),
            fail_timeout: default_fail_timeout(),
            backup: false,
            down: false,
        }
    }
}

fn default_weight() -> u32 {
    1
}

fn default_max_fails() -> u32 {
    1
}

fn default_fail_timeout() -> u32 {
    10
}
