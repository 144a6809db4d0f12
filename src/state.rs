/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Finite-state cells for auth and sync (spec §4.3).
//!
//! The original design note (spec §9) calls out the "dynamic event
//! emitter spread onto the service" pattern as something to re-architect
//! into explicit pub/sub. A `tokio::sync::watch` channel is the closest
//! typed equivalent to "give me the latest value, plus a way to wait for
//! the next change" that the teacher's own async-capable crates
//! (`fairy-bridge`) reach for, so each cell owns one instead of a vector
//! of boxed callbacks.

use tokio::sync::watch;

/// Auth state machine (spec §4.3). Transitions are unrestricted among
/// these values; there is no enforced ordering between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthState {
    #[default]
    Idle,
    Initializing,
    Authorizing,
    Authorized,
    Unauthorized,
    Error,
}

/// Sync state machine (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncState {
    #[default]
    Idle,
    Ready,
    Syncing,
    Error,
}

/// A single finite-state holder with a debounced (here: coalesced by
/// `watch`'s "latest value wins" semantics) change notification.
pub struct StateCell<S> {
    tx: watch::Sender<S>,
}

impl<S: Copy + PartialEq + Send + Sync + 'static> StateCell<S> {
    pub fn new(initial: S) -> Self {
        Self {
            tx: watch::Sender::new(initial),
        }
    }

    pub fn get(&self) -> S {
        *self.tx.borrow()
    }

    /// Sets the new value and fires the change notification. A no-op
    /// (including no notification) if the value is unchanged, matching
    /// `watch`'s own "only notify on change" behavior — the spec doesn't
    /// require renotifying on a same-value set.
    pub fn set(&self, value: S) {
        self.tx.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<S> {
        self.tx.subscribe()
    }

    /// Applies `f` to the current value in place and notifies
    /// subscribers. Used for counters like [`Progress`] where callers want
    /// a read-modify-write rather than a full replacement.
    pub fn update(&self, f: impl FnOnce(&mut S)) {
        self.tx.send_if_modified(|current| {
            f(current);
            true
        });
    }
}

impl<S: Copy + PartialEq + Send + Sync + 'static + std::str::FromStr> StateCell<S> {
    /// Sets from a stringly-typed value (e.g. over an FFI boundary),
    /// logging a warning and doing nothing if it doesn't parse into a
    /// known state (spec §4.3: "no-ops with a warning").
    pub fn set_if_valid(&self, raw: &str) {
        match raw.parse::<S>() {
            Ok(value) => self.set(value),
            Err(_) => log::warn!("ignoring unrecognized state value {raw:?}"),
        }
    }
}

impl std::str::FromStr for AuthState {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "idle" => AuthState::Idle,
            "initializing" => AuthState::Initializing,
            "authorizing" => AuthState::Authorizing,
            "authorized" => AuthState::Authorized,
            "unauthorized" => AuthState::Unauthorized,
            "error" => AuthState::Error,
            _ => return Err(()),
        })
    }
}

impl std::str::FromStr for SyncState {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "idle" => SyncState::Idle,
            "ready" => SyncState::Ready,
            "syncing" => SyncState::Syncing,
            "error" => SyncState::Error,
            _ => return Err(()),
        })
    }
}

/// Progress for the current (or most recent) fetch batch (spec §3, §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    pub finished: u32,
    pub total: u32,
}
