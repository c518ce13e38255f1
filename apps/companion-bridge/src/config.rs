use companion_proto::PHONE_CAPABILITY;
use companion_sync::{BridgeConfig, SnapshotPolicy};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_prefs_path")]
    pub prefs_path: String,
    #[serde(default = "default_capability")]
    pub capability: String,
    #[serde(default)]
    pub snapshot_policy: SnapshotPolicy,
    #[serde(default)]
    pub log_filter: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            prefs_path: default_prefs_path(),
            capability: default_capability(),
            snapshot_policy: SnapshotPolicy::default(),
            log_filter: None,
        }
    }
}

impl AppConfig {
    /// Reads `COMPANION_*` variables; anything missing or unparsable falls
    /// back to defaults.
    pub fn from_env() -> Self {
        config::Config::builder()
            .add_source(
                config::Environment::with_prefix("COMPANION")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map(AppConfig::normalize)
            .unwrap_or_else(|_| AppConfig::default())
    }

    fn normalize(mut self) -> Self {
        self.log_filter = Self::normalize_opt(self.log_filter.take());
        if self.prefs_path.trim().is_empty() {
            self.prefs_path = default_prefs_path();
        }
        if self.capability.trim().is_empty() {
            self.capability = default_capability();
        }
        self
    }

    fn normalize_opt(value: Option<String>) -> Option<String> {
        value.and_then(|s| {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
    }

    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            capability: self.capability.clone(),
            snapshot_policy: self.snapshot_policy,
            ..BridgeConfig::default()
        }
    }
}

fn default_prefs_path() -> String {
    "companion-prefs.json".to_string()
}

fn default_capability() -> String {
    PHONE_CAPABILITY.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let cfg = AppConfig {
            prefs_path: "  ".into(),
            capability: String::new(),
            snapshot_policy: SnapshotPolicy::RejectOlder,
            log_filter: Some("   ".into()),
        }
        .normalize();
        assert_eq!(cfg.prefs_path, "companion-prefs.json");
        assert_eq!(cfg.capability, "coach_phone_app");
        assert_eq!(cfg.log_filter, None);
        assert_eq!(cfg.snapshot_policy, SnapshotPolicy::RejectOlder);
    }

    #[test]
    fn deserializes_from_map_source() {
        let cfg: AppConfig = config::Config::builder()
            .set_override("snapshot_policy", "reject_older")
            .unwrap()
            .set_override("log_filter", " debug ")
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize::<AppConfig>()
            .unwrap()
            .normalize();
        assert_eq!(cfg.snapshot_policy, SnapshotPolicy::RejectOlder);
        assert_eq!(cfg.log_filter.as_deref(), Some("debug"));
        assert_eq!(cfg.prefs_path, "companion-prefs.json");
    }

    #[test]
    fn bridge_config_carries_overrides() {
        let cfg = AppConfig {
            capability: "custom_phone".into(),
            snapshot_policy: SnapshotPolicy::RejectOlder,
            ..AppConfig::default()
        };
        let bridge = cfg.bridge_config();
        assert_eq!(bridge.capability, "custom_phone");
        assert_eq!(bridge.snapshot_policy, SnapshotPolicy::RejectOlder);
        assert_eq!(bridge.cache_key, "cached_companion_data");
    }
}
