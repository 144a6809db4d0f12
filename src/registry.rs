/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The process-wide registry and dispatcher (spec §4.5).
//!
//! The original design note (spec §9) calls out the work-chain promise,
//! the `services` map and the config root as global mutable state to be
//! re-architected into a singleton. `SyncManager` is that singleton,
//! grounded on `sync_manager::manager::SyncManager` — the teacher's own
//! per-process registry of weakly-held sync engines.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::Value;

use crate::config::{OptionStore, SyncConfig};
use crate::error::{Error, Result};
use crate::provider::{ProviderFactory, ScriptStore, SyncUi};
use crate::reconciler::Reconciler;
use crate::service::{new_work_chain, ServiceBase, WorkChain};
use crate::state::{AuthState, Progress, SyncState};
use crate::timestamp::Timestamp;

/// How long to hold after observing a state/progress change before
/// snapshotting and notifying, so a burst of rapid transitions (e.g. every
/// fetch in a sync's apply phase) collapses into one `SyncUi::emit` rather
/// than one per change (spec §4.3 "debounced"; §5 "next tick granularity
/// is sufficient").
const NOTIFY_DEBOUNCE: Duration = Duration::from_millis(50);

/// A point-in-time view of one registered service, as returned by
/// [`SyncManager::get_states`] (spec §4.5 `getStates()`).
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceSnapshot {
    pub name: String,
    pub display_name: String,
    pub auth_state: AuthState,
    pub sync_state: SyncState,
    pub last_sync: Option<Timestamp>,
    pub progress: Progress,
    pub properties: Value,
    pub user_config: Value,
}

type RegisteredService<S> = Arc<ServiceBase<Reconciler<S>>>;

/// The singleton registry: owns every instantiated provider, the shared
/// work chain, and the option-store config root (spec §4.5, §9).
pub struct SyncManager<S> {
    store: Arc<S>,
    options: Arc<dyn OptionStore>,
    work_chain: WorkChain,
    factories: RwLock<Vec<Box<dyn ProviderFactory>>>,
    services: RwLock<HashMap<String, RegisteredService<S>>>,
    ui: RwLock<Option<Arc<dyn SyncUi>>>,
    initialized: std::sync::atomic::AtomicBool,
}

impl<S: ScriptStore + 'static> SyncManager<S> {
    pub fn new(store: Arc<S>, options: Arc<dyn OptionStore>) -> Arc<Self> {
        Arc::new(Self {
            store,
            options,
            work_chain: new_work_chain(),
            factories: RwLock::new(Vec::new()),
            services: RwLock::new(HashMap::new()),
            ui: RwLock::new(None),
            initialized: std::sync::atomic::AtomicBool::new(false),
        })
    }

    pub fn set_ui(&self, ui: Arc<dyn SyncUi>) {
        *self.ui.write() = Some(ui);
    }

    /// Accepts a provider factory prior to initialization (spec §4.5
    /// `register(Factory)`).
    pub fn register(&self, factory: Box<dyn ProviderFactory>) {
        self.factories.write().push(factory);
    }

    /// Idempotent: builds the root config, instantiates each registered
    /// factory exactly once, indexes by `service.name`, then checks
    /// whether the current service should sync (spec §4.5
    /// `initialize()`).
    pub async fn initialize(self: &Arc<Self>) {
        if self
            .initialized
            .swap(true, std::sync::atomic::Ordering::SeqCst)
        {
            return;
        }
        let _config = SyncConfig::new(self.options.as_ref());

        let factories = std::mem::take(&mut *self.factories.write());
        for factory in factories {
            let provider = factory.create();
            let name = provider.name().to_string();
            let svc = ServiceBase::new(
                provider,
                self.options.clone(),
                Reconciler::new(self.store.clone()),
                self.work_chain.clone(),
            );
            self.spawn_state_watcher(&svc);
            self.services.write().insert(name, svc);
        }

        if let Some(svc) = self.current_service() {
            if let Err(err) = svc.prepare().await {
                log::warn!("prepare failed for {}: {err}", svc.name());
            }
            if svc.check_sync() {
                svc.start_sync().await;
            }
            self.notify();
        }
    }

    /// Reads `sync.current` (spec §4.5 `getCurrent()`).
    pub fn get_current(&self) -> Option<String> {
        SyncConfig::new(self.options.as_ref()).current()
    }

    fn current_service(&self) -> Option<RegisteredService<S>> {
        let name = self.get_current()?;
        self.services.read().get(&name).cloned()
    }

    fn service(&self, name: &str) -> Option<RegisteredService<S>> {
        self.services.read().get(name).cloned()
    }

    pub async fn sync(&self) -> Result<()> {
        let result = match self.current_service() {
            Some(svc) => svc.sync().await,
            None => Err(no_current_service()),
        };
        self.notify();
        result
    }

    pub async fn authorize(&self) -> Result<()> {
        let result = match self.current_service() {
            Some(svc) => svc.authorize().await,
            None => Err(no_current_service()),
        };
        self.notify();
        result
    }

    pub async fn revoke(&self) -> Result<()> {
        let result = match self.current_service() {
            Some(svc) => svc.revoke().await,
            None => Err(no_current_service()),
        };
        self.notify();
        result
    }

    /// Pushes provider-specific config to the named service, then
    /// re-checks whether it should sync (spec §4.5 `setConfig`).
    pub async fn set_config(&self, name: &str, value: Value) -> Result<()> {
        let svc = self.service(name).ok_or_else(no_current_service)?;
        svc.set_user_config(value).await?;
        if svc.check_sync() {
            svc.start_sync().await;
        }
        Ok(())
    }

    /// Asks every registered service whether `url` completes its auth
    /// flow; the first positive wins (spec §4.5 `checkAuthUrl`).
    pub fn check_auth_url(&self, url: &str) -> Option<String> {
        self.services
            .read()
            .values()
            .find(|svc| svc.check_auth(url))
            .map(|svc| svc.name().to_string())
    }

    /// Snapshots every registered service (spec §4.5 `getStates()`).
    pub fn get_states(&self) -> Vec<ServiceSnapshot> {
        self.services
            .read()
            .values()
            .map(|svc| ServiceSnapshot {
                name: svc.name().to_string(),
                display_name: svc.display_name().to_string(),
                auth_state: svc.auth_state(),
                sync_state: svc.sync_state(),
                last_sync: svc.last_sync(),
                progress: svc.progress(),
                properties: svc.properties(),
                user_config: svc.user_config(),
            })
            .collect()
    }

    /// The `sync.current` option-change hook (spec §4.5 "watches
    /// `sync.current`; any truthy value re-runs `initialize()`"). Safe to
    /// call on every option write; only acts on the option this registry
    /// cares about.
    pub async fn on_option_changed(self: &Arc<Self>, path: &str, value: &Value) {
        if path == "sync.current" && value.as_str().map_or(false, |s| !s.is_empty()) {
            self.initialize().await;
        }
    }

    fn notify(&self) {
        if let Some(ui) = self.ui.read().as_ref() {
            ui.emit(self.get_states());
        }
    }

    /// Observes one service's auth/sync/progress cells for the lifetime of
    /// the registry and debounces their changes into `notify()` calls
    /// (spec §2 "a debounced notifier pushes aggregated state to UI
    /// consumers"; §4.3 "fires a change callback which, debounced, emits
    /// an aggregated state snapshot"). This is what makes a background
    /// sync — one triggered by `ServiceBase::start_sync`'s own coalescing
    /// task, or by auto-sync, neither of which goes through this
    /// registry's `sync()` wrapper — visible to the UI: those paths only
    /// mutate the service's state cells directly, so without a watcher on
    /// those cells their transitions and progress updates would never
    /// reach `SyncUi::emit`.
    ///
    /// Holds only a `Weak` reference back to the registry so the watcher
    /// task doesn't keep it alive; it exits as soon as the registry (and
    /// so every state cell's sender) is dropped.
    fn spawn_state_watcher(self: &Arc<Self>, svc: &RegisteredService<S>) {
        let registry: Weak<SyncManager<S>> = Arc::downgrade(self);
        let mut auth_rx = svc.subscribe_auth();
        let mut sync_rx = svc.subscribe_sync();
        let mut progress_rx = svc.subscribe_progress();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    res = auth_rx.changed() => if res.is_err() { break; },
                    res = sync_rx.changed() => if res.is_err() { break; },
                    res = progress_rx.changed() => if res.is_err() { break; },
                }
                tokio::time::sleep(NOTIFY_DEBOUNCE).await;
                match registry.upgrade() {
                    Some(registry) => registry.notify(),
                    None => break,
                }
            }
        });
    }
}

fn no_current_service() -> Error {
    Error::Other(anyhow::anyhow!("no current sync service configured"))
}
