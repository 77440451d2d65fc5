//! Entity lookup, cascading removal and partial updates on [`Config`]

use crate::config::types::*;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// A partial configuration.
///
/// Each present section replaces the corresponding section of the config it
/// is applied to; absent sections leave it untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ConfigPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global: Option<GlobalConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events: Option<EventsConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub servers: Option<Vec<ServerConfig>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locations: Option<Vec<LocationConfig>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstreams: Option<Vec<UpstreamConfig>>,
}

impl ConfigPatch {
    pub fn is_empty(&self) -> bool {
        self.global.is_none()
            && self.events.is_none()
            && self.http.is_none()
            && self.servers.is_none()
            && self.locations.is_none()
            && self.upstreams.is_none()
    }

    /// Patch that replaces every entity collection with the ones in `config`
    pub fn entities_of(config: &Config) -> Self {
        Self {
            servers: Some(config.servers.clone()),
            locations: Some(config.locations.clone()),
            upstreams: Some(config.upstreams.clone()),
            ..Default::default()
        }
    }

    /// Combine two patches; sections of `later` win
    pub fn merge(self, later: ConfigPatch) -> ConfigPatch {
        ConfigPatch {
            global: later.global.or(self.global),
            events: later.events.or(self.events),
            http: later.http.or(self.http),
            servers: later.servers.or(self.servers),
            locations: later.locations.or(self.locations),
            upstreams: later.upstreams.or(self.upstreams),
        }
    }
}

impl Config {
    /// Merge a partial configuration into this one
    pub fn apply(&mut self, patch: ConfigPatch) {
        if let Some(global) = patch.global {
            self.global = global;
        }
        if let Some(events) = patch.events {
            self.events = events;
        }
        if let Some(http) = patch.http {
            self.http = http;
        }
        if let Some(servers) = patch.servers {
            self.servers = servers;
        }
        if let Some(locations) = patch.locations {
            self.locations = locations;
        }
        if let Some(upstreams) = patch.upstreams {
            self.upstreams = upstreams;
        }
    }

    /// Consuming form of [`Config::apply`]
    pub fn with_patch(mut self, patch: ConfigPatch) -> Self {
        self.apply(patch);
        self
    }

    pub fn server(&self, id: &NodeId) -> Option<&ServerConfig> {
        self.servers.iter().find(|s| &s.id == id)
    }

    pub fn server_mut(&mut self, id: &NodeId) -> Option<&mut ServerConfig> {
        self.servers.iter_mut().find(|s| &s.id == id)
    }

    pub fn location(&self, id: &NodeId) -> Option<&LocationConfig> {
        self.locations.iter().find(|l| &l.id == id)
    }

    pub fn location_mut(&mut self, id: &NodeId) -> Option<&mut LocationConfig> {
        self.locations.iter_mut().find(|l| &l.id == id)
    }

    pub fn upstream(&self, id: &NodeId) -> Option<&UpstreamConfig> {
        self.upstreams.iter().find(|u| &u.id == id)
    }

    pub fn upstream_by_name(&self, name: &str) -> Option<&UpstreamConfig> {
        self.upstreams.iter().find(|u| u.name == name)
    }

    /// Locations owned by a server, in declaration order
    pub fn locations_of<'a>(
        &'a self,
        server_id: &'a NodeId,
    ) -> impl Iterator<Item = &'a LocationConfig> + 'a {
        self.locations.iter().filter(move |l| &l.server_id == server_id)
    }

    /// Remove a server together with every location it owns
    pub fn remove_server(&mut self, id: &NodeId) -> Option<ServerConfig> {
        let index = self.servers.iter().position(|s| &s.id == id)?;
        self.locations.retain(|l| &l.server_id != id);
        Some(self.servers.remove(index))
    }

    /// Remove every location owned by a server, returning how many went
    pub fn remove_locations_of(&mut self, server_id: &NodeId) -> usize {
        let before = self.locations.len();
        self.locations.retain(|l| &l.server_id != server_id);
        before - self.locations.len()
    }

    /// Remove an upstream; locations proxying to it fall back to no target
    pub fn remove_upstream(&mut self, id: &NodeId) -> Option<UpstreamConfig> {
        let index = self.upstreams.iter().position(|u| &u.id == id)?;
        for location in &mut self.locations {
            if location.proxy == Some(ProxyTarget::Upstream(*id)) {
                location.proxy = None;
            }
        }
        Some(self.upstreams.remove(index))
    }

    /// Check that every location belongs to a live server and every upstream
    /// reference resolves
    pub fn check_references(&self) -> Result<()> {
        for location in &self.locations {
            if self.server(&location.server_id).is_none() {
                return Err(Error::Reference(format!(
                    "location '{}' ({}) belongs to missing server {}",
                    location.path, location.id, location.server_id
                )));
            }
            if let Some(ProxyTarget::Upstream(upstream_id)) = &location.proxy {
                if self.upstream(upstream_id).is_none() {
                    return Err(Error::Reference(format!(
                        "location '{}' ({}) proxies to missing upstream {}",
                        location.path, location.id, upstream_id
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_servers() -> (Config, NodeId, NodeId) {
        let mut config = Config::default();
        let a = ServerConfig::new("a.example.com");
        let b = ServerConfig::new("b.example.com");
        let (a_id, b_id) = (a.id, b.id);
        config.servers.push(a);
        config.servers.push(b);
        config.locations.push(LocationConfig::new(a_id, LocationModifier::None, "/"));
        config.locations.push(LocationConfig::new(b_id, LocationModifier::None, "/"));
        config.locations.push(LocationConfig::new(a_id, LocationModifier::Exact, "/health"));
        (config, a_id, b_id)
    }

    #[test]
    fn test_remove_server_cascades() {
        let (mut config, a_id, b_id) = two_servers();
        let removed = config.remove_server(&a_id).unwrap();

        assert_eq!(removed.server_name, "a.example.com");
        assert_eq!(config.servers.len(), 1);
        assert_eq!(config.locations.len(), 1);
        assert_eq!(config.locations[0].server_id, b_id);
        assert!(config.check_references().is_ok());
    }

    #[test]
    fn test_locations_of_keeps_order() {
        let (config, a_id, _) = two_servers();
        let paths: Vec<&str> = config.locations_of(&a_id).map(|l| l.path.as_str()).collect();
        assert_eq!(paths, vec!["/", "/health"]);
    }

    #[test]
    fn test_dangling_location_is_reported() {
        let (mut config, a_id, _) = two_servers();
        config.servers.retain(|s| s.id != a_id);
        assert!(matches!(config.check_references(), Err(Error::Reference(_))));
    }

    #[test]
    fn test_remove_upstream_clears_targets() {
        let (mut config, _, _) = two_servers();
        let upstream = UpstreamConfig::new("backend");
        let upstream_id = upstream.id;
        config.upstreams.push(upstream);
        config.locations[0].proxy = Some(ProxyTarget::Upstream(upstream_id));

        config.remove_upstream(&upstream_id);
        assert!(config.locations[0].proxy.is_none());
        assert!(config.check_references().is_ok());
    }

    #[test]
    fn test_apply_patch_replaces_sections() {
        let (mut config, _, _) = two_servers();
        let mut http = config.http.clone();
        http.server_tokens = false;

        let patch = ConfigPatch {
            http: Some(http),
            ..Default::default()
        };
        assert!(!patch.is_empty());
        config.apply(patch);

        assert!(!config.http.server_tokens);
        assert_eq!(config.servers.len(), 2);
        assert!(ConfigPatch::default().is_empty());
    }

    #[test]
    fn test_merge_prefers_later_sections() {
        let mut early = HttpConfig::default();
        early.sendfile = true;
        let mut late = HttpConfig::default();
        late.gzip.enabled = true;

        let merged = ConfigPatch {
            http: Some(early),
            global: Some(GlobalConfig::default()),
            ..Default::default()
        }
        .merge(ConfigPatch {
            http: Some(late),
            ..Default::default()
        });

        let http = merged.http.unwrap();
        assert!(http.gzip.enabled);
        assert!(!http.sendfile);
        assert!(merged.global.is_some());
    }
}
