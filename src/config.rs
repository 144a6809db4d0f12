/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Typed facade over the `sync.*` option subtree (spec §4.2, §6.4).
//!
//! `OptionStore` is the external collaborator: a flat key/value JSON store
//! the embedder provides (options are addressed by dotted path, e.g.
//! `"sync.services.webdav.token"`). This module never talks to storage
//! directly; every read/write is one `get_option`/`set_option` call.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// The embedder's option store (spec §6.4). Reads/writes are not
/// transactional; each call persists (or observes) immediately.
pub trait OptionStore: Send + Sync {
    fn get_option(&self, path: &str) -> Option<Value>;
    fn set_option(&self, path: &str, value: Value);

    /// Removes `prefix` and every key nested under it (`prefix.*`), for
    /// `ServiceConfig::clear()` (spec §4.2). Keys are flat dotted paths,
    /// so a plain `set_option(prefix, {})` leaves existing children
    /// untouched; embedders must actually drop them here.
    fn clear_prefix(&self, prefix: &str);
}

/// An in-memory `OptionStore`, for tests and for embedders without a
/// persistence layer of their own. Mirrors the teacher's habit of shipping
/// an in-memory fake alongside every externally-supplied trait (e.g.
/// `sync15::state`'s `InMemoryClient`).
#[derive(Default)]
pub struct MemoryOptionStore {
    inner: parking_lot::Mutex<serde_json::Map<String, Value>>,
}

impl MemoryOptionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OptionStore for MemoryOptionStore {
    fn get_option(&self, path: &str) -> Option<Value> {
        self.inner.lock().get(path).cloned()
    }

    fn set_option(&self, path: &str, value: Value) {
        self.inner.lock().insert(path.to_string(), value);
    }

    fn clear_prefix(&self, prefix: &str) {
        let nested = format!("{prefix}.");
        self.inner
            .lock()
            .retain(|key, _| key != prefix && !key.starts_with(&nested));
    }
}

fn join(parts: &[&str]) -> String {
    parts.join(".")
}

/// Root view over the `sync` option subtree.
pub struct SyncConfig<'a> {
    store: &'a dyn OptionStore,
}

impl<'a> SyncConfig<'a> {
    /// Ensures `sync` has at least `{services: {}}`, the way `initialize()`
    /// is specified to (spec §4.2).
    pub fn new(store: &'a dyn OptionStore) -> Self {
        let cfg = SyncConfig { store };
        if cfg.store.get_option("sync.services").is_none() {
            cfg.store
                .set_option("sync.services", Value::Object(Default::default()));
        }
        cfg
    }

    pub fn get<T: DeserializeOwned>(&self, path: &str, default: T) -> T {
        get_typed(self.store, &join(&["sync", path]), default)
    }

    pub fn set<T: Serialize>(&self, path: &str, value: T) {
        set_typed(self.store, &join(&["sync", path]), value)
    }

    /// A facade scoped to one named provider's subtree
    /// (`sync.services.<name>`).
    pub fn service(&self, name: &str) -> ServiceConfig<'a> {
        ServiceConfig {
            store: self.store,
            name: name.to_string(),
        }
    }

    pub fn current(&self) -> Option<String> {
        self.get("current", None)
    }

    pub fn set_current(&self, name: &str) {
        self.set("current", name);
    }
}

/// A facade scoped to one provider's `sync.services.<name>` subtree
/// (spec §4.2: "service-scoped facades prepend `services, <serviceName>`
/// to each key").
pub struct ServiceConfig<'a> {
    store: &'a dyn OptionStore,
    name: String,
}

impl<'a> ServiceConfig<'a> {
    pub fn get<T: DeserializeOwned>(&self, path: &str, default: T) -> T {
        get_typed(self.store, &self.full_path(path), default)
    }

    pub fn set<T: Serialize>(&self, path: &str, value: T) {
        set_typed(self.store, &self.full_path(path), value)
    }

    /// Reads an option rooted at the top of the store rather than under
    /// this service's `sync.services.<name>` subtree, for the handful of
    /// options that are global to the whole script store rather than
    /// per-provider (spec §6.4: `lastModified`, `syncScriptStatus`).
    pub fn global<T: DeserializeOwned>(&self, path: &str, default: T) -> T {
        get_typed(self.store, path, default)
    }

    /// Wipes the whole service subtree (spec §4.2 `clear()`).
    pub fn clear(&self) {
        self.store
            .clear_prefix(&join(&["sync", "services", &self.name]));
    }

    fn full_path(&self, path: &str) -> String {
        join(&["sync", "services", &self.name, path])
    }
}

fn get_typed<T: DeserializeOwned>(store: &dyn OptionStore, path: &str, default: T) -> T {
    store
        .get_option(path)
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or(default)
}

fn set_typed<T: Serialize>(store: &dyn OptionStore, path: &str, value: T) {
    match serde_json::to_value(value) {
        Ok(v) => store.set_option(path, v),
        Err(e) => log::warn!("failed to serialize option at {path}: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_ensures_services_map_exists() {
        let store = MemoryOptionStore::new();
        let _cfg = SyncConfig::new(&store);
        assert_eq!(
            store.get_option("sync.services"),
            Some(Value::Object(Default::default()))
        );
    }

    #[test]
    fn service_facade_prefixes_path() {
        let store = MemoryOptionStore::new();
        let cfg = SyncConfig::new(&store);
        let svc = cfg.service("webdav");
        svc.set("token", "abc123");
        assert_eq!(
            store.get_option("sync.services.webdav.token"),
            Some(Value::String("abc123".into()))
        );
        assert_eq!(svc.get::<String>("token", String::new()), "abc123");
    }

    #[test]
    fn clear_wipes_only_the_service_subtree() {
        let store = MemoryOptionStore::new();
        let cfg = SyncConfig::new(&store);
        cfg.service("webdav").set("token", "abc");
        cfg.set_current("webdav");
        cfg.service("webdav").clear();
        assert_eq!(
            cfg.service("webdav").get::<String>("token", String::new()),
            ""
        );
        // untouched sibling state survives
        assert_eq!(cfg.current(), Some("webdav".to_string()));
    }

    #[test]
    fn missing_value_falls_back_to_default() {
        let store = MemoryOptionStore::new();
        let cfg = SyncConfig::new(&store);
        assert_eq!(cfg.get::<bool>("syncScriptStatus", true), true);
    }
}
