/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

/// Errors produced by the reconciliation core.
///
/// Provider and script-store implementations return `anyhow::Error` at
/// their trait boundary (different embedders produce wildly different
/// error types there), so most variants here just wrap one of those.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The provider's token is missing or was rejected. Sync does not run.
    #[error("not authorized with the current provider")]
    Unauthorized,

    /// A single transport-level failure (HTTP, network) from a provider call.
    #[error("transport error: {0}")]
    Transport(#[source] anyhow::Error),

    /// A JSON document failed to parse where the spec requires us to fail
    /// rather than fall back (e.g. the remote meta file, absent a provider
    /// translation via `handle_meta_error`).
    #[error("failed to decode JSON: {0}")]
    Decode(#[from] serde_json::Error),

    /// One or more per-item operations, or a post-phase step, failed during
    /// a sync. The sync as a whole is considered failed; `SyncState`
    /// becomes `Error`.
    #[error("{} operation(s) failed during sync", .0.len())]
    Fatal(Vec<Error>),

    /// Catch-all for provider/store errors that don't need their own
    /// variant (mirrors `sync15_traits::SyncEngine`'s `anyhow::Result`).
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True if this error should drive `AuthState` to `Unauthorized` rather
    /// than `Error` (spec §4.4 `prepare()`).
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Error::Unauthorized) || matches!(self, Error::Other(err) if is_unauthorized(err))
    }
}

/// Marker a provider can wrap a rejected/missing token in so `prepare()`
/// can tell that failure apart from any other `user()` error without
/// knowing the provider's concrete error type (spec §7 "unauthorized").
#[derive(Debug, thiserror::Error)]
#[error("not authorized with the provider")]
pub struct UnauthorizedError;

/// True if `err`'s cause chain includes an [`UnauthorizedError`].
pub fn is_unauthorized(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.downcast_ref::<UnauthorizedError>().is_some())
}
