/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! External collaborator traits (spec §6): the provider contract, the
//! script-store plugin contract, and the UI messaging sink. The core only
//! ever reaches these systems through the boundaries defined here —
//! mirrors `sync15_traits::SyncEngine`, which is deliberately the only
//! seam between the generic sync machinery and a concrete component.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::model::{LocalId, RemoteMeta, RemoteObject, ScriptRecord};
use crate::naming::DEFAULT_META_FILE;

/// A partial update to a local script's sync-owned metadata (spec §4.6
/// `updateLocal`: "no script body touched").
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScriptInfoPatch {
    pub position: Option<i64>,
}

/// What gets handed to [`ScriptStore::update`] when importing a remote
/// script (spec §4.6 `putLocal`).
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptImport {
    pub uri: String,
    pub custom: Option<Value>,
    pub config: crate::model::ScriptConfig,
    pub last_modified: Option<crate::timestamp::Timestamp>,
    pub position: Option<i64>,
    pub code: String,
}

/// The script-store plugin contract (spec §6.3). Implemented by the
/// embedder; the core never touches storage directly.
pub trait ScriptStore: Send + Sync {
    fn list(&self) -> Vec<ScriptRecord>;
    fn get_code(&self, id: LocalId) -> Option<String>;
    fn update(&self, data: ScriptImport) -> anyhow::Result<()>;
    fn remove(&self, id: LocalId) -> anyhow::Result<()>;
    /// Re-normalizes local positions. Returns whether anything changed
    /// (spec §4.6 post-phase step 1).
    fn sort_scripts(&self) -> anyhow::Result<bool>;
    fn update_script_info(&self, id: LocalId, patch: ScriptInfoPatch) -> anyhow::Result<()>;
}

/// The provider contract (spec §6.2). One implementation per registered
/// cloud storage backend (OAuth flow + HTTP verbs are the provider's
/// concern, not the core's).
#[async_trait]
pub trait SyncProvider: Send + Sync {
    fn name(&self) -> &str;
    fn display_name(&self) -> &str;

    /// Arbitrary provider-reported capabilities/limits, surfaced verbatim
    /// in `getStates()` (spec §4.5).
    fn properties(&self) -> Value {
        Value::Null
    }

    /// If present, only URLs under this prefix are offered to
    /// `check_auth` by the registry (an optimization; providers may still
    /// decline any URL via `check_auth`'s own return value).
    fn url_prefix(&self) -> Option<&str> {
        None
    }

    /// The remote object name used for the meta file (spec §6.1).
    fn meta_file(&self) -> &str {
        DEFAULT_META_FILE
    }

    /// Minimum gap between outgoing requests (spec §4.4 `delayTime`).
    fn delay_time(&self) -> Duration {
        Duration::from_millis(1000)
    }

    /// Synchronous: derives a bearer header from the stored token, if
    /// any. Returning `None` means there is no usable token yet (spec
    /// §4.4 `prepare()`: "calls `initToken()` (synchronous...) and, if
    /// tokened, `user()`").
    fn init_token(&self) -> Option<String> {
        None
    }

    async fn authorize(&self) -> anyhow::Result<()>;
    async fn revoke(&self) -> anyhow::Result<()>;
    /// Whether this provider's auth flow is completed by `url` (spec
    /// §4.5 `checkAuthUrl`).
    fn check_auth(&self, url: &str) -> bool {
        let _ = url;
        false
    }
    /// Confirms the bearer token is actually valid (spec §4.4
    /// `prepare()`).
    async fn user(&self) -> anyhow::Result<()>;

    async fn list(&self) -> anyhow::Result<Vec<RemoteObject>>;
    async fn get(&self, obj: &RemoteObject) -> anyhow::Result<Vec<u8>>;
    /// Uploads `bytes` for `obj`. Per spec §4.6 `putRemote`, the caller
    /// may pass an object whose `name` is empty to mean "let the server
    /// route by `uri`"; the provider returns the object record actually
    /// written (with its resolved `name`).
    async fn put(&self, obj: &RemoteObject, bytes: Vec<u8>) -> anyhow::Result<RemoteObject>;
    async fn remove(&self, obj: &RemoteObject) -> anyhow::Result<()>;

    /// Best-effort provider-level lock (spec §4.6). Default: no-op.
    async fn acquire_lock(&self) -> anyhow::Result<()> {
        Ok(())
    }
    async fn release_lock(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn get_user_config(&self) -> Value {
        Value::Null
    }
    async fn set_user_config(&self, config: Value) -> anyhow::Result<()> {
        let _ = config;
        Ok(())
    }

    /// Fetches and parses the remote meta file. The default rethrows any
    /// error; a provider may translate a 404 into an empty meta file
    /// instead (spec §6.2, §7 "decode"). Parse errors are annotated with
    /// the failing field path, since a hand-edited meta file is the kind
    /// of input that fails in the field rather than in a test.
    async fn get_meta(&self, obj: &RemoteObject) -> anyhow::Result<RemoteMeta> {
        let bytes = self.get(obj).await?;
        let de = &mut serde_json::Deserializer::from_slice(&bytes);
        serde_path_to_error::deserialize(de)
            .map_err(|e| anyhow::anyhow!("malformed meta file at `{}`: {}", e.path(), e.inner()))
    }

    /// Hook for translating a `get_meta` failure (spec §6.2
    /// `handleMetaError`). Default: rethrow.
    fn handle_meta_error(&self, err: anyhow::Error) -> anyhow::Result<RemoteMeta> {
        Err(err)
    }
}

/// Produces a fresh `SyncProvider` instance. Registered with the registry
/// prior to `initialize()` (spec §4.5 `register(Factory)`).
pub trait ProviderFactory: Send + Sync {
    fn create(&self) -> std::sync::Arc<dyn SyncProvider>;
}

/// UI messaging sink (spec §6.5). Dropped silently if absent.
pub trait SyncUi: Send + Sync {
    fn emit(&self, snapshot: Vec<crate::registry::ServiceSnapshot>);
}
