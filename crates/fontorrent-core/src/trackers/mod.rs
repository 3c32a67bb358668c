//! Tracker (discovery endpoint) configuration.
//!
//! Sessions announce to WebSocket trackers only. The configured list is
//! sanitized on every load and save, persisted through a
//! [`PreferenceStore`] under [`TRACKERS_STORAGE_KEY`], and never left empty.
//!
//! | Scheme | Accepted |
//! |--------|----------|
//! | `wss://` | always |
//! | `ws://` | unless the policy is [`SchemePolicy::SecureOnly`] |

use std::collections::HashSet;

use serde_json::Value;

use crate::config::TrackerConfig;
use crate::error::{Error, Result};
use crate::prefs::PreferenceStore;
use crate::TRACKERS_STORAGE_KEY;

/// Built-in tracker set used when nothing valid is persisted.
pub const DEFAULT_TRACKERS: [&str; 4] = [
    "wss://tracker.openwebtorrent.com",
    "wss://tracker.webtorrent.io",
    "wss://tracker.btorrent.xyz",
    "wss://tracker.fastcast.nz",
];

const SECURE_SCHEME: &str = "wss://";
const INSECURE_SCHEME: &str = "ws://";

/// Which tracker URL schemes are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemePolicy {
    /// Only `wss://`
    SecureOnly,
    /// `wss://` and `ws://`
    AllowInsecure,
}

impl SchemePolicy {
    /// Policy from the tracker configuration.
    #[must_use]
    pub const fn from_config(config: &TrackerConfig) -> Self {
        if config.allow_insecure {
            Self::AllowInsecure
        } else {
            Self::SecureOnly
        }
    }

    /// Whether `url` uses an accepted scheme and names a host.
    #[must_use]
    pub fn accepts(self, url: &str) -> bool {
        let has_scheme = |scheme: &str| {
            url.len() > scheme.len()
                && url
                    .get(..scheme.len())
                    .is_some_and(|prefix| prefix.eq_ignore_ascii_case(scheme))
        };

        match self {
            Self::SecureOnly => has_scheme(SECURE_SCHEME),
            Self::AllowInsecure => has_scheme(SECURE_SCHEME) || has_scheme(INSECURE_SCHEME),
        }
    }

    /// Accepted schemes, for messages.
    #[must_use]
    pub const fn describe(self) -> &'static str {
        match self {
            Self::SecureOnly => "wss://",
            Self::AllowInsecure => "wss://, ws://",
        }
    }
}

/// Trim entries, drop those with unaccepted schemes, and deduplicate while
/// keeping first-seen order.
pub fn sanitize<I, S>(list: I, policy: SchemePolicy) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    list.into_iter()
        .map(|url| url.as_ref().trim().to_string())
        .filter(|url| policy.accepts(url))
        .filter(|url| seen.insert(url.clone()))
        .collect()
}

/// Union of `preferred` and `existing`, `preferred` first, nothing removed.
#[must_use]
pub fn merge(preferred: &[String], existing: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut merged = Vec::with_capacity(preferred.len() + existing.len());
    for url in preferred.iter().chain(existing) {
        if seen.insert(url.as_str()) {
            merged.push(url.clone());
        }
    }
    merged
}

fn defaults() -> Vec<String> {
    DEFAULT_TRACKERS.iter().map(ToString::to_string).collect()
}

/// The configured tracker list and its persistence.
#[derive(Debug)]
pub struct TrackerStore<P> {
    prefs: P,
    policy: SchemePolicy,
    trackers: Vec<String>,
}

impl<P: PreferenceStore> TrackerStore<P> {
    /// Load the persisted list, falling back to [`DEFAULT_TRACKERS`] if it is
    /// absent, unreadable or holds no valid endpoint.
    pub fn load(prefs: P, policy: SchemePolicy) -> Self {
        let trackers = match prefs.get(TRACKERS_STORAGE_KEY) {
            Ok(Some(Value::Array(values))) => {
                let list = sanitize(values.iter().filter_map(Value::as_str), policy);
                if list.is_empty() {
                    tracing::debug!("Persisted tracker list has no valid endpoint, using defaults");
                    defaults()
                } else {
                    list
                }
            }
            Ok(Some(other)) => {
                tracing::debug!("Persisted tracker list is not an array ({}), using defaults", other);
                defaults()
            }
            Ok(None) => defaults(),
            Err(e) => {
                tracing::debug!("Failed to read persisted trackers, using defaults: {}", e);
                defaults()
            }
        };

        Self {
            prefs,
            policy,
            trackers,
        }
    }

    /// The current tracker list.
    #[must_use]
    pub fn trackers(&self) -> &[String] {
        &self.trackers
    }

    /// The scheme policy in force.
    #[must_use]
    pub const fn policy(&self) -> SchemePolicy {
        self.policy
    }

    /// Sanitize `list` and make it the configured set.
    ///
    /// Persistence failures are logged and otherwise ignored: the in-memory
    /// list stays authoritative.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoValidTrackers`] if nothing survives sanitizing; the
    /// previous list is kept.
    pub fn save<I, S>(&mut self, list: I) -> Result<&[String]>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let cleaned = sanitize(list, self.policy);
        if cleaned.is_empty() {
            return Err(Error::NoValidTrackers(self.policy.describe().to_string()));
        }

        self.trackers = cleaned;
        self.persist();
        Ok(&self.trackers)
    }

    /// Restore and persist the built-in defaults.
    pub fn reset(&mut self) -> &[String] {
        self.trackers = defaults();
        self.persist();
        &self.trackers
    }

    fn persist(&mut self) {
        let value = Value::from(self.trackers.clone());
        if let Err(e) = self.prefs.set(TRACKERS_STORAGE_KEY, value) {
            tracing::warn!("Failed to persist tracker list: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prefs::{JsonPreferences, MemoryPreferences};
    use serde_json::json;
    use tempfile::TempDir;

    fn strings(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_sanitize_trims_filters_dedups() {
        let input = [
            "  wss://a.example ",
            "udp://tracker.example:80",
            "https://tracker.example/announce",
            "ws://b.example",
            "wss://a.example",
            "",
            "wss://",
        ];
        assert_eq!(
            sanitize(input, SchemePolicy::AllowInsecure),
            strings(&["wss://a.example", "ws://b.example"])
        );
        assert_eq!(
            sanitize(input, SchemePolicy::SecureOnly),
            strings(&["wss://a.example"])
        );
    }

    #[test]
    fn test_sanitize_idempotent() {
        let inputs = [
            vec![" wss://a ", "ws://a", "wss://a", "http://x", "ws://b "],
            vec![],
            vec!["WSS://Upper.example", "wss://upper.example"],
        ];
        for policy in [SchemePolicy::SecureOnly, SchemePolicy::AllowInsecure] {
            for input in &inputs {
                let once = sanitize(input, policy);
                assert_eq!(sanitize(&once, policy), once);
            }
        }
    }

    #[test]
    fn test_merge_keeps_existing() {
        let merged = merge(
            &strings(&["wss://new", "wss://shared"]),
            &strings(&["wss://shared", "udp://legacy:80"]),
        );
        assert_eq!(
            merged,
            strings(&["wss://new", "wss://shared", "udp://legacy:80"])
        );
    }

    #[test]
    fn test_load_defaults_when_absent() {
        let store = TrackerStore::load(MemoryPreferences::new(), SchemePolicy::AllowInsecure);
        assert_eq!(store.trackers(), defaults().as_slice());
    }

    #[test]
    fn test_load_defaults_when_invalid() {
        for value in [json!("wss://a"), json!({"a": 1}), json!([]), json!(["http://x", 3])] {
            let prefs = MemoryPreferences::with(TRACKERS_STORAGE_KEY, value);
            let store = TrackerStore::load(prefs, SchemePolicy::AllowInsecure);
            assert_eq!(store.trackers(), defaults().as_slice());
        }
    }

    #[test]
    fn test_load_sanitizes_persisted() {
        let prefs = MemoryPreferences::with(
            TRACKERS_STORAGE_KEY,
            json!([" wss://a ", 7, "wss://a", "ws://b"]),
        );
        let store = TrackerStore::load(prefs, SchemePolicy::SecureOnly);
        assert_eq!(store.trackers(), strings(&["wss://a"]).as_slice());
    }

    #[test]
    fn test_save_empty_rejected() {
        let mut store = TrackerStore::load(MemoryPreferences::new(), SchemePolicy::AllowInsecure);
        store.save(["wss://kept"]).unwrap();

        let empty: [&str; 0] = [];
        assert!(matches!(store.save(empty), Err(Error::NoValidTrackers(_))));
        assert!(store.save(["http://invalid"]).is_err());
        assert_eq!(store.trackers(), strings(&["wss://kept"]).as_slice());
    }

    #[test]
    fn test_rejected_save_keeps_persisted_list() {
        let tmp_dir = TempDir::new().unwrap();
        let path = tmp_dir.path().join("preferences.json");

        let mut store =
            TrackerStore::load(JsonPreferences::new(&path), SchemePolicy::AllowInsecure);
        store.save(["wss://kept"]).unwrap();

        let empty: [&str; 0] = [];
        assert!(store.save(empty).is_err());
        assert!(store.save(["udp://x:80", "  "]).is_err());

        let persisted = JsonPreferences::new(&path)
            .get(TRACKERS_STORAGE_KEY)
            .unwrap();
        assert_eq!(persisted, Some(json!(["wss://kept"])));
    }

    #[test]
    fn test_save_secure_context() {
        let mut store = TrackerStore::load(MemoryPreferences::new(), SchemePolicy::SecureOnly);
        let saved = store.save(["wss://a", "ws://a", "wss://a"]).unwrap().to_vec();
        assert_eq!(saved, strings(&["wss://a"]));
    }

    #[test]
    fn test_save_persists() {
        let tmp_dir = TempDir::new().unwrap();
        let path = tmp_dir.path().join("preferences.json");

        let mut store =
            TrackerStore::load(JsonPreferences::new(&path), SchemePolicy::AllowInsecure);
        store.save(["wss://one", "ws://two"]).unwrap();

        let reloaded =
            TrackerStore::load(JsonPreferences::new(&path), SchemePolicy::AllowInsecure);
        assert_eq!(reloaded.trackers(), strings(&["wss://one", "ws://two"]).as_slice());
    }

    #[test]
    fn test_save_survives_persist_failure() {
        let tmp_dir = TempDir::new().unwrap();
        let blocker = tmp_dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();

        let prefs = JsonPreferences::new(blocker.join("preferences.json"));
        let mut store = TrackerStore::load(prefs, SchemePolicy::AllowInsecure);
        let saved = store.save(["wss://memory-only"]).unwrap().to_vec();

        assert_eq!(saved, strings(&["wss://memory-only"]));
        assert_eq!(store.trackers(), saved.as_slice());
    }

    #[test]
    fn test_reset() {
        let mut store = TrackerStore::load(MemoryPreferences::new(), SchemePolicy::AllowInsecure);
        store.save(["wss://custom"]).unwrap();
        assert_eq!(store.reset(), defaults().as_slice());
    }
}
