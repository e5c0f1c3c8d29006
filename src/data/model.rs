//! Flag data as served by the service.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::Value;

/// All flags and segments known to the SDK at one point in time.
///
/// Snapshots are immutable; updates produce a new snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlagData {
    /// Flags by key.
    ///
    /// Value is wrapped in `TryParse` so that if we fail to parse one flag (e.g., new server
    /// format), we can still serve other flags.
    #[serde(default)]
    pub flags: HashMap<String, TryParse<Flag>>,
    /// Segments by key. Segments are only consulted by rule matching, which is delegated to an
    /// external evaluator, so they are kept uninterpreted.
    #[serde(default)]
    pub segments: HashMap<String, serde_json::Value>,
}

impl FlagData {
    /// Parse the body of a full data set (`{"flags": {...}, "segments": {...}}`).
    pub fn from_json(json: &[u8]) -> serde_json::Result<FlagData> {
        serde_json::from_slice(json)
    }

    /// Look up a flag that has not been deleted.
    pub fn flag(&self, key: &str) -> Option<&TryParse<Flag>> {
        self.flags
            .get(key)
            .filter(|flag| !matches!(flag, TryParse::Parsed(flag) if flag.deleted))
    }

    /// Keys of all flags that have not been deleted.
    pub fn flag_keys(&self) -> impl Iterator<Item = &str> {
        self.flags
            .iter()
            .filter(|(_, flag)| !matches!(flag, TryParse::Parsed(flag) if flag.deleted))
            .map(|(key, _)| key.as_str())
    }

    /// Insert or replace a flag unless the stored one has the same or a newer version.
    ///
    /// Returns `true` if the data changed.
    pub fn upsert_flag(&mut self, key: &str, flag: TryParse<Flag>) -> bool {
        let incoming = flag.version();
        let current = self.flags.get(key).and_then(TryParse::version);
        if let (Some(current), Some(incoming)) = (current, incoming) {
            if incoming <= current {
                return false;
            }
        }
        self.flags.insert(key.to_owned(), flag);
        true
    }

    /// Replace a flag with a deleted marker carrying `version`.
    pub fn delete_flag(&mut self, key: &str, version: u64) -> bool {
        self.upsert_flag(key, TryParse::Parsed(Flag::tombstone(key, version)))
    }

    /// Insert or replace a segment unless the stored one has the same or a newer version.
    pub fn upsert_segment(&mut self, key: &str, segment: serde_json::Value) -> bool {
        let version = |segment: &serde_json::Value| segment.get("version")?.as_u64();
        if let (Some(current), Some(incoming)) =
            (self.segments.get(key).and_then(version), version(&segment))
        {
            if incoming <= current {
                return false;
            }
        }
        self.segments.insert(key.to_owned(), segment);
        true
    }
}

/// `TryParse` allows the subfield to fail parsing without failing the parsing of the whole
/// structure.
///
/// This can be helpful to isolate errors in a subtree. e.g., if configuration for one flag parses,
/// the rest of the flags are still usable.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(untagged)]
pub enum TryParse<T> {
    /// Successfully parsed.
    Parsed(T),
    /// Parsing failed.
    ParseFailed(serde_json::Value),
}

impl<'a, T> From<&'a TryParse<T>> for Option<&'a T> {
    fn from(value: &TryParse<T>) -> Option<&T> {
        match value {
            TryParse::Parsed(v) => Some(v),
            TryParse::ParseFailed(_) => None,
        }
    }
}

impl TryParse<Flag> {
    fn version(&self) -> Option<u64> {
        match self {
            TryParse::Parsed(flag) => Some(flag.version),
            TryParse::ParseFailed(json) => json.get("version")?.as_u64(),
        }
    }
}

/// A feature flag definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Flag {
    pub key: String,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub on: bool,
    #[serde(default)]
    pub variations: Vec<Value>,
    #[serde(default)]
    pub off_variation: Option<usize>,
    #[serde(default)]
    pub fallthrough: VariationOrRollout,
    /// Targets for the `user` kind.
    #[serde(default)]
    pub targets: Vec<Target>,
    #[serde(default)]
    pub context_targets: Vec<Target>,
    /// Rules are evaluated by an external evaluator.
    #[serde(default)]
    pub rules: Vec<serde_json::Value>,
    /// Prerequisites are evaluated by an external evaluator.
    #[serde(default)]
    pub prerequisites: Vec<serde_json::Value>,
    #[serde(default)]
    pub track_events: bool,
    #[serde(default)]
    pub track_events_fallthrough: bool,
    #[serde(default)]
    pub deleted: bool,
}

impl Flag {
    fn tombstone(key: &str, version: u64) -> Flag {
        Flag {
            key: key.to_owned(),
            version,
            on: false,
            variations: Vec::new(),
            off_variation: None,
            fallthrough: VariationOrRollout::default(),
            targets: Vec::new(),
            context_targets: Vec::new(),
            rules: Vec::new(),
            prerequisites: Vec::new(),
            track_events: false,
            track_events_fallthrough: false,
            deleted: true,
        }
    }
}

/// Context keys that always receive a given variation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Target {
    /// Absent for the legacy `targets` list, which always targets `user`.
    #[serde(default)]
    pub context_kind: Option<String>,
    #[serde(default)]
    pub values: Vec<String>,
    pub variation: usize,
}

/// Either a fixed variation or a percentage rollout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct VariationOrRollout {
    #[serde(default)]
    pub variation: Option<usize>,
    /// Rollouts are evaluated by an external evaluator.
    #[serde(default)]
    pub rollout: Option<serde_json::Value>,
}
