//! Monitor client configuration.

use std::time::Duration;

use serde::Deserialize;
use skerry_auth::AuthMethodList;
use skerry_types::EntityKind;

/// Monitor client tuning, spliced into the embedding daemon's config.
///
/// Interval fields are seconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonClientConfig {
    /// Monitor roster: `"name=host:port"` entries (bare `host:port` gets
    /// a generated name).
    pub mon_hosts: Vec<String>,
    /// Tick interval while hunting for a live monitor.
    pub mon_client_hunt_interval: f64,
    /// Tick interval once a session is established.
    pub mon_client_ping_interval: f64,
    /// Auth methods required of daemon principals (osd, mds, mon).
    pub auth_cluster_required: String,
    /// Auth methods required of client principals.
    pub auth_client_required: String,
    /// Fallback auth methods when the required list is empty.
    pub auth_supported: String,
    /// Lifetime of service tickets, which also paces rotating-key
    /// refresh.
    pub auth_service_ticket_ttl: f64,
}

impl Default for MonClientConfig {
    fn default() -> Self {
        Self {
            mon_hosts: Vec::new(),
            mon_client_hunt_interval: 3.0,
            mon_client_ping_interval: 10.0,
            auth_cluster_required: String::new(),
            auth_client_required: String::new(),
            auth_supported: "ticket, none".to_string(),
            auth_service_ticket_ttl: 3600.0,
        }
    }
}

impl MonClientConfig {
    /// Tick interval while hunting.
    pub fn hunt_interval(&self) -> Duration {
        Duration::from_secs_f64(self.mon_client_hunt_interval)
    }

    /// Tick interval with a live session.
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs_f64(self.mon_client_ping_interval)
    }

    /// Service ticket lifetime.
    pub fn ticket_ttl(&self) -> Duration {
        Duration::from_secs_f64(self.auth_service_ticket_ttl)
    }

    /// Resolve the auth method list for a principal kind.
    ///
    /// Daemon principals (osd, mds, mon) read `auth_cluster_required`,
    /// everything else reads `auth_client_required`; an empty selection
    /// falls back to `auth_supported`.
    pub fn auth_methods_for(&self, kind: EntityKind) -> AuthMethodList {
        let required = match kind {
            EntityKind::Osd | EntityKind::Mds | EntityKind::Mon => &self.auth_cluster_required,
            EntityKind::Client => &self.auth_client_required,
        };
        let selected = if required.trim().is_empty() {
            &self.auth_supported
        } else {
            required
        };
        AuthMethodList::parse(selected)
    }
}
