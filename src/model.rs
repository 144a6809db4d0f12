/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The data model shared by the reconciler, the codec and the external
//! trait boundaries (spec §3).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::timestamp::Timestamp;

/// Local identifier handed back to `ScriptStore`. Opaque to the core.
pub type LocalId = i64;

/// User-configurable script settings the core cares about, plus whatever
/// else the embedder attaches. The passthrough keys round-trip untouched,
/// the way `sync15_traits::Payload` flattens unknown JSON alongside its
/// named fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "shouldUpdate")]
    pub should_update: Option<bool>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A local script, as seen by the reconciler. The `ScriptStore` plugin
/// owns everything about the record; this is the projection the core
/// needs to diff it against the remote side (spec §3 "Script (local)").
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptRecord {
    pub id: LocalId,
    pub uri: String,
    pub last_modified: Option<Timestamp>,
    pub position: i64,
    pub custom: serde_json::Value,
    pub config: ScriptConfig,
    pub code: String,
}

/// A handle to a remote object, as returned by `SyncProvider::list`.
/// Opaque beyond `name`/`uri` — providers may carry extra fields a given
/// transport needs (etags, revision ids) by wrapping this or storing a
/// side-table keyed by `name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    pub name: String,
    pub uri: String,
}

/// One entry in the remote meta file's `info` map (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetaEntry {
    pub modified: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<i64>,
}

/// The single remote metadata blob (spec §3 "Remote meta file").
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteMeta {
    pub timestamp: Timestamp,
    pub info: HashMap<String, MetaEntry>,
}

/// Per-service local metadata, persisted under `sync.services.<name>.meta`
/// (spec §3 "Local meta"). Absence (`timestamp: None`) means "first sync".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "lastSync")]
    pub last_sync: Option<Timestamp>,
}

impl LocalMeta {
    pub fn is_first_sync(&self) -> bool {
        self.timestamp.is_none()
    }
}

/// The bytes of a remote script payload once decoded by the codec, ready
/// to be imported into the local store via `ScriptStore::update`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedScript {
    pub custom: Option<serde_json::Value>,
    pub config: ScriptConfig,
    pub last_modified: Option<Timestamp>,
    pub position: Option<i64>,
    pub code: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_meta_absent_timestamp_is_first_sync() {
        let m = LocalMeta::default();
        assert!(m.is_first_sync());
        let m2 = LocalMeta {
            timestamp: Some(Timestamp(1)),
            last_sync: None,
        };
        assert!(!m2.is_first_sync());
    }

    #[test]
    fn script_config_serializes_camel_case_and_keeps_extra() {
        let mut extra = serde_json::Map::new();
        extra.insert("notes".into(), serde_json::json!("hi"));
        let cfg = ScriptConfig {
            enabled: Some(true),
            should_update: Some(false),
            extra,
        };
        let v = serde_json::to_value(&cfg).unwrap();
        assert_eq!(v["enabled"], serde_json::json!(true));
        assert_eq!(v["shouldUpdate"], serde_json::json!(false));
        assert_eq!(v["notes"], serde_json::json!("hi"));
    }
}
