// ABOUTME: implements update_config over an explicitly owned, lock-guarded in-process store.
// ABOUTME: sensitive keys are refused before the store is touched, so their values never leak.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use ops_common::UpdateConfigArgs;
use serde_json::json;

use super::ToolError;
use crate::policy::CommandPolicy;

const KNOWN_CONFIG_KEYS: &[&str] = &[
    "log_level",
    "max_jobs",
    "retention_days",
    "batch_size",
    "timeout_seconds",
    "debug_mode",
];

/// Shared across requests. Concurrent writers to the same key are last-write-wins.
#[derive(Debug, Clone, Default)]
pub struct ConfigStore {
    inner: Arc<RwLock<HashMap<String, String>>>,
}

impl ConfigStore {
    pub fn seeded() -> Self {
        let store = Self::default();
        store.set("log_level", "INFO");
        store.set("max_jobs", "100");
        store.set("retention_days", "30");
        store
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let map = self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        map.get(key).cloned()
    }

    pub fn set(&self, key: &str, value: &str) -> Option<String> {
        let mut map = self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        map.insert(key.to_string(), value.to_string())
    }
}

pub fn update_config(
    policy: &CommandPolicy,
    store: &ConfigStore,
    args: UpdateConfigArgs,
) -> Result<serde_json::Value, ToolError> {
    policy.evaluate_config_key(&args.key).into_result()?;

    let key = args.key.trim();
    let value = match &args.value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Bool(_) | serde_json::Value::Number(_) => args.value.to_string(),
        _ => {
            return Err(ToolError::InvalidArguments(
                "config value must be a string, number, or boolean".to_string(),
            ))
        }
    };

    if !KNOWN_CONFIG_KEYS.contains(&key) {
        tracing::warn!(key, "config key not in known set, accepting anyway");
    }

    let previous = store.set(key, &value);
    tracing::info!(key, value = %value, previous = ?previous, "config updated");

    Ok(json!({
        "ok": true,
        "key": key,
        "value": value,
        "previous": previous,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(key: &str, value: serde_json::Value) -> UpdateConfigArgs {
        UpdateConfigArgs {
            key: key.to_string(),
            value,
        }
    }

    #[test]
    fn scalar_values_are_stringified() {
        let policy = CommandPolicy::default();
        let store = ConfigStore::seeded();

        let payload = update_config(&policy, &store, args("max_jobs", json!(250))).unwrap();
        assert_eq!(payload["value"], "250");
        assert_eq!(payload["previous"], "100");

        let payload = update_config(&policy, &store, args("debug_mode", json!(true))).unwrap();
        assert_eq!(payload["value"], "true");
        assert!(payload["previous"].is_null());
    }

    #[test]
    fn structured_values_are_rejected() {
        let policy = CommandPolicy::default();
        let store = ConfigStore::seeded();
        let err = update_config(&policy, &store, args("log_level", json!(["a"]))).unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
        assert_eq!(store.get("log_level").as_deref(), Some("INFO"));
    }

    #[test]
    fn unknown_keys_are_accepted() {
        let policy = CommandPolicy::default();
        let store = ConfigStore::seeded();
        let payload = update_config(&policy, &store, args("queue_name", json!("BATCH"))).unwrap();
        assert_eq!(payload["ok"], true);
        assert_eq!(store.get("queue_name").as_deref(), Some("BATCH"));
    }

    #[test]
    fn sensitive_key_is_refused_before_store_is_touched() {
        let policy = CommandPolicy::default();
        let store = ConfigStore::seeded();
        let err = update_config(&policy, &store, args("DB_Password", json!("x"))).unwrap_err();
        assert!(matches!(err, ToolError::PolicyDenied(_)));
        assert_eq!(store.get("DB_Password"), None);
    }

    #[test]
    fn clones_share_state() {
        let store = ConfigStore::seeded();
        let other = store.clone();
        other.set("log_level", "WARN");
        assert_eq!(store.get("log_level").as_deref(), Some("WARN"));
    }
}
