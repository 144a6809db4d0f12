/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Provider-agnostic reconciliation core for syncing user scripts
//! against a remote storage backend. An embedder supplies a
//! [`provider::SyncProvider`] per backend, a [`provider::ScriptStore`]
//! for local persistence, and an [`config::OptionStore`] for settings;
//! this crate owns naming, the wire codec, auth/sync state, debounced
//! triggering, rate limiting, and the five-bucket reconciliation
//! algorithm that keeps the two sides converged.

mod codec;
mod config;
mod error;
mod model;
mod naming;
mod provider;
mod reconciler;
mod registry;
mod service;
mod state;
mod timestamp;

pub use crate::codec::{parse_script_data, to_v1_bytes, to_v2_bytes};
pub use crate::config::{MemoryOptionStore, OptionStore, ServiceConfig, SyncConfig};
pub use crate::error::{is_unauthorized, Error, Result, UnauthorizedError};
pub use crate::model::{
    LocalId, LocalMeta, MetaEntry, ParsedScript, RemoteMeta, RemoteObject, ScriptConfig, ScriptRecord,
};
pub use crate::naming::{filename_for, is_script_file, parse_uri_from_filename, percent_encode_uri, DEFAULT_META_FILE};
pub use crate::provider::{ProviderFactory, ScriptImport, ScriptInfoPatch, ScriptStore, SyncProvider, SyncUi};
pub use crate::reconciler::{normalize_meta, Reconciler};
pub use crate::registry::{ServiceSnapshot, SyncManager};
pub use crate::service::{GapLimiter, Reconcile, ServiceBase, WorkChain};
pub use crate::state::{AuthState, Progress, StateCell, SyncState};
pub use crate::timestamp::Timestamp;
