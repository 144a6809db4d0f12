/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Per-provider service lifecycle (spec §4.4): auth priming, the
//! debounced+serialized sync trigger, and the strict-gap rate limiter
//! that guards every outgoing request.
//!
//! This is composition, not inheritance. The re-architecture spec §9
//! calls for `ServiceBase` to hold a provider and a reconciler behind
//! trait objects rather than the original's "factory.extend" prototype
//! chain.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

use serde_json::Value;

use crate::config::{OptionStore, ServiceConfig};
use crate::error::{Error, Result};
use crate::model::LocalMeta;
use crate::provider::SyncProvider;
use crate::state::{AuthState, Progress, StateCell, SyncState};
use crate::timestamp::Timestamp;

/// How long auto-sync waits after a sync attempt before re-arming (spec
/// §4.4 "Auto-sync").
const AUTO_SYNC_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Minimum coalescing window before a triggered sync actually runs (spec
/// §4.4 "Coalescing delay").
const COALESCE_DELAY: Duration = Duration::from_secs(10);

/// The reconciliation seam (Component F implements this). Kept generic
/// so `ServiceBase` never needs to know the five-bucket algorithm.
/// Mirrors how `sync15_traits::SyncEngine` is the only thing
/// `sync15::sync::synchronize` knows about a concrete collection.
#[async_trait]
pub trait Reconcile: Send + Sync {
    async fn run(
        &self,
        provider: &dyn SyncProvider,
        config: &ServiceConfig<'_>,
        limiter: &GapLimiter,
    ) -> Result<()>;
}

/// A strict minimum-gap request limiter: at most one request per `gap`,
/// never a burst. Deliberately not the token-bucket `RateLimiter`
/// pattern; see `DESIGN.md` for why that shape doesn't fit `delayTime`.
///
/// Also the single choke point every outgoing fetch passes through, so it
/// doubles as the place `progress` is kept (spec §4.4 `loadData`:
/// "Fetches increment `progress.total` at enqueue and `progress.finished`
/// at completion... A change notification fires on both").
pub struct GapLimiter {
    gap: Duration,
    last_fetch: AsyncMutex<Option<Instant>>,
    progress: Arc<StateCell<Progress>>,
}

impl GapLimiter {
    pub fn new(gap: Duration, progress: Arc<StateCell<Progress>>) -> Self {
        Self {
            gap,
            last_fetch: AsyncMutex::new(None),
            progress,
        }
    }

    /// Blocks until at least `gap` has elapsed since the previous call
    /// returned, then stamps the new `last_fetch` time.
    pub async fn wait(&self) {
        let mut last_fetch = self.last_fetch.lock().await;
        if let Some(last) = *last_fetch {
            let elapsed = last.elapsed();
            if elapsed < self.gap {
                tokio::time::sleep(self.gap - elapsed).await;
            }
        }
        *last_fetch = Some(Instant::now());
    }

    /// Runs `fut` through the rate limiter, bumping `progress.total` at
    /// enqueue and `progress.finished` once `fut` settles, success or
    /// failure (spec §4.4 `loadData`). Every provider call in the
    /// reconciler goes through this rather than calling `wait()` directly.
    pub async fn track<F: Future>(&self, fut: F) -> F::Output {
        self.progress.update(|p| p.total += 1);
        self.wait().await;
        let result = fut.await;
        self.progress.update(|p| p.finished += 1);
        result
    }
}

/// Shared across every `ServiceBase` so that at most one `sync()` runs
/// at a time process-wide (spec §4.4 "Work serialization"). The registry
/// constructs one and hands a clone to each service it creates.
pub type WorkChain = Arc<AsyncMutex<()>>;

pub fn new_work_chain() -> WorkChain {
    Arc::new(AsyncMutex::new(()))
}

struct CoalesceState {
    deadline: Instant,
    generation: u64,
}

/// Per-provider sync lifecycle: auth priming, debounced triggering,
/// rate-limited fetches, and progress/auto-sync bookkeeping (spec §4.4).
pub struct ServiceBase<R> {
    name: String,
    provider: Arc<dyn SyncProvider>,
    store: Arc<dyn OptionStore>,
    reconciler: R,
    work_chain: WorkChain,
    limiter: GapLimiter,
    auth_state: StateCell<AuthState>,
    sync_state: StateCell<SyncState>,
    progress: Arc<StateCell<Progress>>,
    coalesce: AsyncMutex<Option<CoalesceState>>,
    auto_sync: AsyncMutex<Option<JoinHandle<()>>>,
}

impl<R: Reconcile + 'static> ServiceBase<R> {
    pub fn new(
        provider: Arc<dyn SyncProvider>,
        store: Arc<dyn OptionStore>,
        reconciler: R,
        work_chain: WorkChain,
    ) -> Arc<Self> {
        let delay = provider.delay_time();
        let progress = Arc::new(StateCell::new(Progress::default()));
        Arc::new(Self {
            name: provider.name().to_string(),
            limiter: GapLimiter::new(delay, progress.clone()),
            provider,
            store,
            reconciler,
            work_chain,
            auth_state: StateCell::new(AuthState::Idle),
            sync_state: StateCell::new(SyncState::Idle),
            progress,
            coalesce: AsyncMutex::new(None),
            auto_sync: AsyncMutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn auth_state(&self) -> AuthState {
        self.auth_state.get()
    }

    pub fn sync_state(&self) -> SyncState {
        self.sync_state.get()
    }

    pub fn progress(&self) -> Progress {
        self.progress.get()
    }

    pub fn subscribe_auth(&self) -> tokio::sync::watch::Receiver<AuthState> {
        self.auth_state.subscribe()
    }

    pub fn subscribe_sync(&self) -> tokio::sync::watch::Receiver<SyncState> {
        self.sync_state.subscribe()
    }

    /// Subscribes to this service's fetch progress (spec §3, §4.4
    /// `loadData`), so a watcher can surface in-flight fetch counts to the
    /// UI the same way auth/sync state changes do.
    pub fn subscribe_progress(&self) -> tokio::sync::watch::Receiver<Progress> {
        self.progress.subscribe()
    }

    fn config(&self) -> ServiceConfig<'_> {
        crate::config::SyncConfig::new(self.store.as_ref()).service(&self.name)
    }

    /// Primes auth state from whatever token the provider already has
    /// (spec §4.4 `prepare()`): synchronous `init_token()`, then, if
    /// tokened, an async `user()` call to confirm it's still valid. On
    /// failure the error kind decides `AuthState` (spec §7 "unauthorized"
    /// vs "error"); either way `SyncState` resets to `idle` and the
    /// failure is surfaced to the caller.
    pub async fn prepare(&self) -> Result<()> {
        self.auth_state.set(AuthState::Initializing);
        match self.provider.init_token() {
            None => {
                self.auth_state.set(AuthState::Unauthorized);
                self.sync_state.set(SyncState::Idle);
                Ok(())
            }
            Some(_) => match self.provider.user().await {
                Ok(()) => {
                    self.auth_state.set(AuthState::Authorized);
                    Ok(())
                }
                Err(err) => {
                    self.sync_state.set(SyncState::Idle);
                    if crate::error::is_unauthorized(&err) {
                        self.auth_state.set(AuthState::Unauthorized);
                        Err(Error::Unauthorized)
                    } else {
                        self.auth_state.set(AuthState::Error);
                        Err(Error::Transport(err))
                    }
                }
            },
        }
    }

    /// Whether this service is the registry's current service right now
    /// (spec §4.4 gate 1/2: "authorized and the *current* service").
    /// Reads `sync.current` directly rather than needing the registry to
    /// push currency down; `ServiceBase` already holds the option store.
    fn is_current(&self) -> bool {
        crate::config::SyncConfig::new(self.store.as_ref()).current().as_deref() == Some(self.name.as_str())
    }

    /// Whether a sync is currently eligible to run at all: authorized,
    /// current, and not already syncing.
    pub fn check_sync(&self) -> bool {
        self.auth_state.get() == AuthState::Authorized
            && self.sync_state.get() != SyncState::Syncing
            && self.is_current()
    }

    pub fn display_name(&self) -> &str {
        self.provider.display_name()
    }

    pub fn properties(&self) -> Value {
        self.provider.properties()
    }

    pub fn user_config(&self) -> Value {
        self.provider.get_user_config()
    }

    pub fn last_sync(&self) -> Option<Timestamp> {
        self.config().get::<LocalMeta>("meta", LocalMeta::default()).last_sync
    }

    /// Whether `url` completes this service's auth flow (spec §4.5
    /// `checkAuthUrl`, per-provider half).
    pub fn check_auth(&self, url: &str) -> bool {
        self.provider.check_auth(url)
    }

    pub async fn authorize(&self) -> Result<()> {
        self.auth_state.set(AuthState::Authorizing);
        match self.provider.authorize().await {
            Ok(()) => {
                self.auth_state.set(AuthState::Authorized);
                Ok(())
            }
            Err(err) => {
                self.auth_state.set(AuthState::Error);
                Err(Error::Other(err))
            }
        }
    }

    pub async fn revoke(&self) -> Result<()> {
        self.provider.revoke().await.map_err(Error::Other)?;
        self.auth_state.set(AuthState::Unauthorized);
        Ok(())
    }

    /// Pushes provider-specific config then re-checks sync eligibility
    /// (spec §4.5 `setConfig`).
    pub async fn set_user_config(&self, value: Value) -> Result<()> {
        self.provider.set_user_config(value).await.map_err(Error::Other)
    }

    /// Requests a sync. Repeated calls within `COALESCE_DELAY` of each
    /// other merge into a single run; each call pushes the deadline
    /// forward, and only the task holding the latest generation actually
    /// runs `sync()` (spec §4.4 "Coalescing delay ≥10s").
    pub async fn start_sync(self: &Arc<Self>) {
        if !self.check_sync() {
            return;
        }
        self.sync_state.set(SyncState::Ready);
        let generation = {
            let mut guard = self.coalesce.lock().await;
            let generation = guard.as_ref().map_or(0, |s| s.generation + 1);
            *guard = Some(CoalesceState {
                deadline: Instant::now() + COALESCE_DELAY,
                generation,
            });
            generation
        };

        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let wait = {
                    let guard = this.coalesce.lock().await;
                    match &*guard {
                        Some(state) if state.generation == generation => {
                            let now = Instant::now();
                            (state.deadline > now).then(|| state.deadline - now)
                        }
                        // a later call superseded us; it owns the run.
                        _ => return,
                    }
                };
                match wait {
                    Some(d) => tokio::time::sleep(d).await,
                    None => break,
                }
            }
            {
                let mut guard = this.coalesce.lock().await;
                if matches!(&*guard, Some(state) if state.generation == generation) {
                    *guard = None;
                }
            }
            // Re-check current-and-authorized right before the
            // ready->syncing transition (spec §4.4 gate 2): a provider
            // swap during the coalescing wait must no-op here rather
            // than run against the wrong provider.
            if this.check_sync() {
                if let Err(err) = this.sync().await {
                    log::warn!("debounced sync for {} failed: {err}", this.name);
                }
            } else {
                this.sync_state.set(SyncState::Idle);
            }
        });
    }

    /// Runs a sync immediately, serialized against every other
    /// registered service via the shared work chain (spec §4.4 "Work
    /// serialization").
    pub async fn sync(self: &Arc<Self>) -> Result<()> {
        let _slot = self.work_chain.lock().await;
        self.sync_state.set(SyncState::Syncing);
        let config = self.config();
        let result = self
            .reconciler
            .run(self.provider.as_ref(), &config, &self.limiter)
            .await;
        match &result {
            Ok(()) => self.sync_state.set(SyncState::Idle),
            Err(err) if err.is_unauthorized() => {
                self.auth_state.set(AuthState::Unauthorized);
                self.sync_state.set(SyncState::Error);
            }
            Err(_) => self.sync_state.set(SyncState::Error),
        }
        self.rearm_auto_sync().await;
        result
    }

    async fn rearm_auto_sync(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(AUTO_SYNC_INTERVAL).await;
            this.start_sync().await;
        });
        let mut guard = self.auto_sync.lock().await;
        if let Some(old) = guard.replace(handle) {
            old.abort();
        }
    }
}
