//! HTTPS redirect resolver
//!
//! Gives a TLS server a plain-HTTP sibling on port 80 whose only content is
//! a redirect to HTTPS. An existing port-80 server with the same name is
//! taken over in place rather than duplicated: its locations are dropped
//! and its passthrough becomes the redirect. Further port-80 servers with
//! that name are deleted so no conflicting listener remains.

use crate::cleaner::{directive_args, remove_directive_where};
use crate::rules::is_redirect_only;
use ngxforge_core::config::*;

const HTTP_PORT: u16 = 80;
const HTTPS_PORT: u16 = 443;

/// The single directive a redirect server carries
pub fn redirect_directive(tls_port: u16) -> String {
    if tls_port == HTTPS_PORT {
        "return 301 https://$host$request_uri;".to_string()
    } else {
        format!("return 301 https://$host:{}$request_uri;", tls_port)
    }
}

/// `listen` arguments for plain HTTP on port 80
fn plain_listen_on_80(args: &str) -> bool {
    let mut parts = args.split_whitespace();
    let Some(target) = parts.next() else {
        return false;
    };
    let port = target.rsplit_once(':').map_or(target, |(_, port)| port);
    port == "80" && !parts.any(|p| p.eq_ignore_ascii_case("ssl"))
}

/// Other servers answering plain HTTP for the same name
fn port_80_twins<'a>(config: &'a Config, server: &'a ServerConfig) -> impl Iterator<Item = &'a ServerConfig> {
    config.servers.iter().filter(move |candidate| {
        candidate.id != server.id
            && candidate.listen.port == HTTP_PORT
            && candidate.server_name.trim() == server.server_name.trim()
    })
}

/// Whether a TLS server still lacks its redirecting sibling
pub fn needs_https_redirect(config: &Config, server: &ServerConfig) -> bool {
    if !server.ssl.enabled || is_redirect_only(server) {
        return false;
    }
    if server.ssl.force_redirect {
        return true;
    }

    let twins: Vec<&ServerConfig> = port_80_twins(config, server).collect();
    let serves_plain = directive_args(&server.custom_directives, "listen")
        .iter()
        .any(|args| plain_listen_on_80(args));
    let in_shape = matches!(twins.as_slice(), [twin] if is_redirect_only(twin)) && !serves_plain;

    (serves_plain || !twins.is_empty()) && !in_shape
}

/// Rewrite a server in place into a bare port-80 redirect
fn hijack(server: &mut ServerConfig, redirect: &str) {
    server.root.clear();
    server.index.clear();
    server.listen.port = HTTP_PORT;
    server.listen.http2 = false;
    server.ssl = SslConfig::default();
    server.custom_directives = redirect.to_string();
}

fn redirect_server(target: &ServerConfig, redirect: &str) -> ServerConfig {
    ServerConfig {
        server_name: target.server_name.clone(),
        listen: ListenConfig {
            address: target.listen.address.clone(),
            port: HTTP_PORT,
            ..Default::default()
        },
        custom_directives: redirect.to_string(),
        ..Default::default()
    }
}

/// Resolve the HTTPS redirect of one TLS server. Returns an empty patch
/// when `target` names no server.
pub fn resolve_https_redirect(config: &Config, target: &NodeId) -> ConfigPatch {
    let Some(server) = config.server(target) else {
        return ConfigPatch::default();
    };
    let redirect = redirect_directive(server.listen.port);
    let twins: Vec<NodeId> = port_80_twins(config, server).map(|t| t.id).collect();
    let name = server.display_name().to_string();

    let mut next = config.clone();
    match twins.split_first() {
        Some((keep, extras)) => {
            let dropped = next.remove_locations_of(keep);
            for id in extras {
                next.remove_server(id);
            }
            if let Some(twin) = next.server_mut(keep) {
                hijack(twin, &redirect);
            }
            tracing::debug!(
                "Converted port 80 server {} into a redirect ({} locations dropped, {} duplicates removed)",
                name,
                dropped,
                extras.len()
            );
        }
        None => {
            next.servers.push(redirect_server(server, &redirect));
            tracing::debug!("Added port 80 redirect server for {}", name);
        }
    }

    if let Some(server) = next.server_mut(target) {
        server.ssl.force_redirect = false;
        server.ssl.enabled = true;
        server.custom_directives =
            remove_directive_where(&server.custom_directives, "listen", plain_listen_on_80);
    }

    ConfigPatch {
        servers: Some(next.servers),
        locations: Some(next.locations),
        ..Default::default()
    }
}

/// Fix entry point: one server if it needs a redirect, or every server that does
pub fn fix_https_redirects(config: &Config, target: Option<&NodeId>) -> ConfigPatch {
    if let Some(id) = target {
        return match config.server(id) {
            Some(server) if needs_https_redirect(config, server) => {
                resolve_https_redirect(config, id)
            }
            _ => ConfigPatch::default(),
        };
    }

    let targets: Vec<NodeId> = config
        .servers
        .iter()
        .filter(|s| needs_https_redirect(config, s))
        .map(|s| s.id)
        .collect();

    let mut next = config.clone();
    for id in &targets {
        let patch = resolve_https_redirect(&next, id);
        next.apply(patch);
    }

    if next == *config {
        ConfigPatch::default()
    } else {
        ConfigPatch {
            servers: Some(next.servers),
            locations: Some(next.locations),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tls_server(name: &str, force_redirect: bool) -> ServerConfig {
        let mut server = ServerConfig::new(name);
        server.listen.port = 443;
        server.ssl.enabled = true;
        server.ssl.force_redirect = force_redirect;
        server
    }

    fn plain_server(name: &str) -> ServerConfig {
        let mut server = ServerConfig::new(name);
        server.root = "/var/www/html".to_string();
        server.index = "index.html".to_string();
        server.custom_directives = "access_log off;".to_string();
        server
    }

    #[test]
    fn test_redirect_directive() {
        assert_eq!(redirect_directive(443), "return 301 https://$host$request_uri;");
        assert_eq!(redirect_directive(8443), "return 301 https://$host:8443$request_uri;");
    }

    #[test]
    fn test_new_redirect_server() {
        let mut config = Config::default();
        let server = tls_server("example.com", true);
        let id = server.id;
        config.servers.push(server);

        let config = config.clone().with_patch(resolve_https_redirect(&config, &id));
        assert_eq!(config.servers.len(), 2);

        let redirect = &config.servers[1];
        assert_eq!(redirect.listen.port, 80);
        assert_eq!(redirect.server_name, "example.com");
        assert!(!redirect.ssl.enabled);
        assert_eq!(redirect.custom_directives, "return 301 https://$host$request_uri;");

        let tls = &config.servers[0];
        assert!(!tls.ssl.force_redirect);
        assert!(tls.ssl.enabled);
        assert!(!needs_https_redirect(&config, tls));
    }

    #[test]
    fn test_hijack_existing_server() {
        let mut config = Config::default();
        let plain = plain_server("example.com");
        let plain_id = plain.id;
        let stray = plain_server("example.com");
        let stray_id = stray.id;
        let other = plain_server("other.example.com");
        let tls = tls_server("example.com", true);
        let tls_id = tls.id;

        for server in [&plain, &stray, &other] {
            config
                .locations
                .push(LocationConfig::new(server.id, LocationModifier::None, "/"));
        }
        config
            .locations
            .push(LocationConfig::new(plain_id, LocationModifier::Exact, "/health"));
        config.servers.extend([plain, stray, other, tls]);

        assert!(needs_https_redirect(&config, &config.servers[3]));
        let config = config.clone().with_patch(resolve_https_redirect(&config, &tls_id));

        assert_eq!(config.servers.len(), 3);
        assert!(config.server(&stray_id).is_none());
        let hijacked = config.server(&plain_id).unwrap();
        assert_eq!(hijacked.listen.port, 80);
        assert!(hijacked.root.is_empty() && hijacked.index.is_empty());
        assert_eq!(hijacked.custom_directives, "return 301 https://$host$request_uri;");
        assert_eq!(config.locations_of(&plain_id).count(), 0);
        assert_eq!(config.locations.len(), 1);
        assert!(config.check_references().is_ok());
    }

    #[test]
    fn test_resolver_is_idempotent() {
        let mut config = Config::default();
        let tls = tls_server("example.com", true);
        let tls_id = tls.id;
        config.servers.push(plain_server("example.com"));
        config.servers.push(tls);

        let once = config.clone().with_patch(resolve_https_redirect(&config, &tls_id));
        let twice = once.clone().with_patch(resolve_https_redirect(&once, &tls_id));
        assert_eq!(once, twice);
        assert!(fix_https_redirects(&once, None).is_empty());
    }

    #[test]
    fn test_dual_stack_listen_is_moved_out() {
        let mut config = Config::default();
        let mut tls = tls_server("example.com", false);
        tls.custom_directives = "listen 80;\nlisten [::]:80;\nlisten [::]:443 ssl;".to_string();
        config.servers.push(tls);

        assert!(needs_https_redirect(&config, &config.servers[0]));
        let config = config.clone().with_patch(fix_https_redirects(&config, None));
        assert_eq!(config.servers[0].custom_directives, "listen [::]:443 ssl;");
        assert_eq!(config.servers.len(), 2);
        assert!(!needs_https_redirect(&config, &config.servers[0]));
    }

    #[test]
    fn test_https_only_server_is_left_alone() {
        let mut config = Config::default();
        config.servers.push(tls_server("example.com", false));
        assert!(!needs_https_redirect(&config, &config.servers[0]));

        // A redirect twin to another host counts as in shape
        let mut twin = ServerConfig::new("example.com");
        twin.custom_directives = "return 308 https://www.example.com$request_uri;".to_string();
        config.servers.push(twin);
        assert!(!needs_https_redirect(&config, &config.servers[0]));
    }

    #[test]
    fn test_targeted_fix_ignores_servers_in_shape() {
        let mut config = Config::default();
        let plain = plain_server("example.com");
        let plain_id = plain.id;
        let tls = tls_server("example.com", false);
        let tls_id = tls.id;
        config.servers.push(tls);

        // No port 80 twin: nothing to redirect
        assert!(fix_https_redirects(&config, Some(&tls_id)).is_empty());

        // A plain server is never the TLS side of a redirect
        config.servers.push(plain);
        assert!(fix_https_redirects(&config, Some(&plain_id)).is_empty());

        let fixed = config.clone().with_patch(fix_https_redirects(&config, Some(&tls_id)));
        assert_eq!(fixed.servers.len(), 2);
        assert!(fixed.servers.iter().all(|s| s.listen.port != 80 || !s.ssl.enabled));
        assert!(fix_https_redirects(&fixed, Some(&tls_id)).is_empty());
    }

    #[test]
    fn test_missing_target_is_empty_patch() {
        let config = Config::default();
        assert!(resolve_https_redirect(&config, &NodeId::new()).is_empty());
    }
}
