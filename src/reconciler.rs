/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The five-bucket reconciliation algorithm (spec §4.6). This is the
//! single most load-bearing module in the crate — every invariant and
//! scenario in spec §8 pins its behavior.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::codec;
use crate::config::ServiceConfig;
use crate::error::{Error, Result};
use crate::model::{LocalId, LocalMeta, MetaEntry, RemoteMeta, RemoteObject, ScriptRecord};
use crate::provider::{ScriptImport, ScriptInfoPatch, ScriptStore, SyncProvider};
use crate::service::{GapLimiter, Reconcile};
use crate::timestamp::Timestamp;

/// Rebuilds `meta.info` from the current remote listing (spec §4.6
/// "Meta normalization"), a pure function independent of local state —
/// the re-architecture of the original's "merged info object with
/// side-effect reduce" (spec §9) into something testable on its own.
pub fn normalize_meta(mut meta: RemoteMeta, remote_list: &[RemoteObject], now: Timestamp) -> (RemoteMeta, bool) {
    let mut changed = meta.timestamp.is_zero() || meta.info.len() != remote_list.len();
    let mut info = HashMap::with_capacity(remote_list.len());
    for obj in remote_list {
        let mut entry = meta.info.remove(&obj.uri).unwrap_or_else(|| {
            changed = true;
            MetaEntry {
                modified: Timestamp::EPOCH,
                position: None,
            }
        });
        if entry.modified.is_zero() {
            entry.modified = now;
            changed = true;
        }
        info.insert(obj.uri.clone(), entry);
    }
    meta.info = info;
    (meta, changed)
}

#[derive(Default)]
struct Plan {
    put_local: Vec<RemoteObject>,
    put_remote: Vec<PutRemoteJob>,
    update_local: Vec<UpdateLocalJob>,
    del_local: Vec<LocalId>,
    del_remote: Vec<RemoteObject>,
}

struct PutRemoteJob {
    record: ScriptRecord,
    effective_last_modified: Timestamp,
}

struct UpdateLocalJob {
    id: LocalId,
    position: i64,
}

/// Classifies every local and remote-only item into exactly one of the
/// five buckets (spec §4.6 "Classification"). Mutates `info` in place
/// for the one case classification itself resolves (the local-wins
/// position conflict); every other `info` mutation happens in the apply
/// phase, against the bucket it belongs to.
fn classify(
    local_list: &[ScriptRecord],
    remote_list: &[RemoteObject],
    mut info: HashMap<String, MetaEntry>,
    first_sync: bool,
    outdated: bool,
    remote_timestamp: Timestamp,
    global_last_modified: Timestamp,
) -> (Plan, HashMap<String, MetaEntry>, bool) {
    let mut changed = false;
    let mut remaining: HashMap<String, RemoteObject> =
        remote_list.iter().cloned().map(|o| (o.uri.clone(), o)).collect();
    let mut plan = Plan::default();

    for local in local_list {
        if let Some(entry) = info.get_mut(&local.uri) {
            let stale = first_sync
                || local.last_modified.is_none()
                || entry.modified > local.last_modified.unwrap();
            if stale {
                if let Some(remote) = remaining.get(&local.uri).cloned() {
                    plan.put_local.push(remote);
                }
            } else {
                let lm = local.last_modified.unwrap();
                if entry.modified < lm {
                    plan.put_remote.push(PutRemoteJob {
                        record: local.clone(),
                        effective_last_modified: lm,
                    });
                }
                if entry.position != Some(local.position) {
                    let remote_position_wins =
                        entry.position.map_or(false, |p| p != 0) && global_last_modified <= remote_timestamp;
                    if remote_position_wins {
                        plan.update_local.push(UpdateLocalJob {
                            id: local.id,
                            position: entry.position.unwrap(),
                        });
                    } else {
                        entry.position = Some(local.position);
                        changed = true;
                    }
                }
            }
            remaining.remove(&local.uri);
        } else {
            let local_wins =
                first_sync || !outdated || local.last_modified.map_or(false, |lm| lm > remote_timestamp);
            if local_wins {
                plan.put_remote.push(PutRemoteJob {
                    record: local.clone(),
                    effective_last_modified: local.last_modified.unwrap_or_else(Timestamp::now),
                });
            } else {
                plan.del_local.push(local.id);
            }
        }
    }

    for remote in remaining.into_values() {
        if outdated {
            plan.put_local.push(remote);
        } else {
            plan.del_remote.push(remote);
        }
    }

    (plan, info, changed)
}

type BoxFut<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Ties the classifier/apply algorithm to a concrete local store. The
/// same instance is reused across every registered provider; only the
/// `SyncProvider` passed into `run` changes (spec §4.5 / §4.6).
pub struct Reconciler<S> {
    store: Arc<S>,
}

impl<S: ScriptStore + 'static> Reconciler<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    async fn run_locked(
        &self,
        provider: &dyn SyncProvider,
        config: &ServiceConfig<'_>,
        limiter: &GapLimiter,
    ) -> Result<()> {
        let meta_name = provider.meta_file().to_string();
        let meta_object = RemoteObject {
            name: meta_name.clone(),
            uri: String::new(),
        };

        let remote_meta = match limiter.track(provider.get_meta(&meta_object)).await {
            Ok(meta) => meta,
            Err(err) => provider.handle_meta_error(err).map_err(Error::Transport)?,
        };

        let remote_objects: Vec<RemoteObject> = limiter
            .track(provider.list())
            .await
            .map_err(Error::Transport)?
            .into_iter()
            .filter(|obj| obj.name != meta_name)
            .collect();

        let local_list = self.store.list();
        let local_meta: LocalMeta = config.get("meta", LocalMeta::default());
        let global_last_modified: Timestamp = config.global("lastModified", Timestamp::default());
        let sync_script_status: bool = config.global("syncScriptStatus", true);

        let now = Timestamp::now();
        let remote_timestamp = remote_meta.timestamp;
        let first_sync = local_meta.is_first_sync();
        let outdated = first_sync || remote_timestamp > local_meta.timestamp.unwrap_or(Timestamp::EPOCH);

        let (mut meta, normalize_changed) = normalize_meta(remote_meta, &remote_objects, now);
        let info = std::mem::take(&mut meta.info);

        let (plan, info, classify_changed) = classify(
            &local_list,
            &remote_objects,
            info,
            first_sync,
            outdated,
            remote_timestamp,
            global_last_modified,
        );
        let touches_remote_info = !plan.put_remote.is_empty() || !plan.del_remote.is_empty();

        log::debug!(
            "classified {} local / {} remote into {} putLocal, {} putRemote, {} updateLocal, {} delLocal, {} delRemote",
            local_list.len(),
            remote_objects.len(),
            plan.put_local.len(),
            plan.put_remote.len(),
            plan.update_local.len(),
            plan.del_local.len(),
            plan.del_remote.len(),
        );

        let info = Mutex::new(info);
        let mut errors = self
            .apply(provider, limiter, plan, sync_script_status, &info)
            .await;
        meta.info = info.into_inner();
        log::info!("apply phase finished with {} error(s)", errors.len());

        let mut remote_changed = normalize_changed || classify_changed || touches_remote_info;

        match self.store.sort_scripts() {
            Ok(true) => {
                remote_changed = true;
                for local in self.store.list() {
                    if let Some(entry) = meta.info.get_mut(&local.uri) {
                        entry.position = Some(local.position);
                    }
                }
            }
            Ok(false) => {}
            Err(err) => errors.push(Error::Other(err)),
        }

        if remote_changed {
            meta.timestamp = now;
            match serde_json::to_vec(&meta) {
                Ok(bytes) => {
                    if let Err(err) = limiter.track(provider.put(&meta_object, bytes)).await {
                        errors.push(Error::Transport(err));
                    }
                }
                Err(err) => errors.push(Error::Decode(err)),
            }
        }

        // Unconditional per spec §9 open question (c): the local clock
        // advances to whatever we attempted to write, independent of
        // whether that write actually landed.
        config.set(
            "meta",
            LocalMeta {
                timestamp: Some(meta.timestamp),
                last_sync: Some(now),
            },
        );

        if errors.is_empty() {
            log::info!("sync completed cleanly");
            Ok(())
        } else {
            log::error!("sync finished with {} unrecovered error(s)", errors.len());
            Err(Error::Fatal(errors))
        }
    }

    async fn apply(
        &self,
        provider: &dyn SyncProvider,
        limiter: &GapLimiter,
        plan: Plan,
        sync_script_status: bool,
        info: &Mutex<HashMap<String, MetaEntry>>,
    ) -> Vec<Error> {
        let mut jobs: Vec<BoxFut> = Vec::new();

        for remote in plan.put_local {
            jobs.push(Box::pin(self.apply_put_local(
                provider,
                limiter,
                remote,
                sync_script_status,
                info,
            )));
        }
        for job in plan.put_remote {
            jobs.push(Box::pin(self.apply_put_remote(provider, limiter, job, info)));
        }
        for remote in plan.del_remote {
            jobs.push(Box::pin(self.apply_del_remote(provider, limiter, remote, info)));
        }
        for id in plan.del_local {
            jobs.push(Box::pin(self.apply_del_local(id)));
        }
        for job in plan.update_local {
            jobs.push(Box::pin(self.apply_update_local(job)));
        }

        futures::future::join_all(jobs)
            .await
            .into_iter()
            .filter_map(Result::err)
            .collect()
    }

    async fn apply_put_local(
        &self,
        provider: &dyn SyncProvider,
        limiter: &GapLimiter,
        remote: RemoteObject,
        sync_script_status: bool,
        info: &Mutex<HashMap<String, MetaEntry>>,
    ) -> Result<()> {
        log::trace!("putLocal {}", remote.uri);
        let bytes = limiter.track(provider.get(&remote)).await.map_err(Error::Transport)?;
        let mut parsed = codec::parse_script_data(&bytes);
        if parsed.code.is_empty() {
            return Ok(());
        }

        if let Some(entry) = info.lock().get(&remote.uri).copied() {
            parsed.last_modified = Some(entry.modified);
            if let Some(position) = entry.position.filter(|&p| p > 0) {
                parsed.position = Some(position);
            }
        }
        if !sync_script_status {
            parsed.config.enabled = None;
        }

        self.store
            .update(ScriptImport {
                uri: remote.uri,
                custom: parsed.custom,
                config: parsed.config,
                last_modified: parsed.last_modified,
                position: parsed.position,
                code: parsed.code,
            })
            .map_err(Error::Other)
    }

    async fn apply_put_remote(
        &self,
        provider: &dyn SyncProvider,
        limiter: &GapLimiter,
        job: PutRemoteJob,
        info: &Mutex<HashMap<String, MetaEntry>>,
    ) -> Result<()> {
        log::trace!("putRemote {}", job.record.uri);
        let code = self
            .store
            .get_code(job.record.id)
            .unwrap_or_else(|| job.record.code.clone());
        let record = ScriptRecord { code, ..job.record };
        let bytes = codec::to_v1_bytes(&record);

        info.lock().insert(
            record.uri.clone(),
            MetaEntry {
                modified: job.effective_last_modified,
                position: Some(record.position),
            },
        );

        // name left empty: the provider routes the write by `uri`
        // instead of reusing a possibly-stale remote name.
        let target = RemoteObject {
            name: String::new(),
            uri: record.uri,
        };
        limiter.track(provider.put(&target, bytes)).await.map(|_| ()).map_err(Error::Transport)
    }

    async fn apply_del_remote(
        &self,
        provider: &dyn SyncProvider,
        limiter: &GapLimiter,
        remote: RemoteObject,
        info: &Mutex<HashMap<String, MetaEntry>>,
    ) -> Result<()> {
        log::trace!("delRemote {}", remote.uri);
        limiter.track(provider.remove(&remote)).await.map_err(Error::Transport)?;
        info.lock().remove(&remote.uri);
        Ok(())
    }

    async fn apply_del_local(&self, id: LocalId) -> Result<()> {
        log::trace!("delLocal {id:?}");
        self.store.remove(id).map_err(Error::Other)
    }

    async fn apply_update_local(&self, job: UpdateLocalJob) -> Result<()> {
        log::trace!("updateLocal {:?} -> position {}", job.id, job.position);
        self.store
            .update_script_info(
                job.id,
                ScriptInfoPatch {
                    position: Some(job.position),
                },
            )
            .map_err(Error::Other)
    }
}

#[async_trait]
impl<S: ScriptStore + 'static> Reconcile for Reconciler<S> {
    /// Acquires the provider lock, runs the algorithm, and releases the
    /// lock on every exit path. Rust has no `try`/`finally`; rather than
    /// fake one with an async `Drop`, the single awaited call to
    /// `run_locked` makes this one exit path to guard.
    async fn run(&self, provider: &dyn SyncProvider, config: &ServiceConfig<'_>, limiter: &GapLimiter) -> Result<()> {
        provider.acquire_lock().await.map_err(Error::Other)?;
        let result = self.run_locked(provider, config, limiter).await;
        if let Err(err) = provider.release_lock().await {
            log::warn!("failed to release sync lock: {err}");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MemoryOptionStore, SyncConfig};
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::time::Duration;

    struct FakeStore {
        scripts: Mutex<Vec<ScriptRecord>>,
        next_id: AtomicI64,
        sorted: Mutex<bool>,
    }

    impl FakeStore {
        fn new(scripts: Vec<ScriptRecord>) -> Arc<Self> {
            let next_id = scripts.iter().map(|s| s.id).max().unwrap_or(0) + 1;
            Arc::new(Self {
                scripts: Mutex::new(scripts),
                next_id: AtomicI64::new(next_id),
                sorted: Mutex::new(false),
            })
        }
    }

    impl ScriptStore for FakeStore {
        fn list(&self) -> Vec<ScriptRecord> {
            self.scripts.lock().clone()
        }

        fn get_code(&self, id: LocalId) -> Option<String> {
            self.scripts.lock().iter().find(|s| s.id == id).map(|s| s.code.clone())
        }

        fn update(&self, data: ScriptImport) -> anyhow::Result<()> {
            let mut scripts = self.scripts.lock();
            if let Some(existing) = scripts.iter_mut().find(|s| s.uri == data.uri) {
                existing.last_modified = data.last_modified;
                existing.code = data.code;
                existing.config = data.config;
                if let Some(custom) = data.custom {
                    existing.custom = custom;
                }
                if let Some(position) = data.position {
                    existing.position = position;
                }
            } else {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                scripts.push(ScriptRecord {
                    id,
                    uri: data.uri,
                    last_modified: data.last_modified,
                    position: data.position.unwrap_or(0),
                    custom: data.custom.unwrap_or(serde_json::Value::Null),
                    config: data.config,
                    code: data.code,
                });
            }
            Ok(())
        }

        fn remove(&self, id: LocalId) -> anyhow::Result<()> {
            self.scripts.lock().retain(|s| s.id != id);
            Ok(())
        }

        fn sort_scripts(&self) -> anyhow::Result<bool> {
            Ok(*self.sorted.lock())
        }

        fn update_script_info(&self, id: LocalId, patch: ScriptInfoPatch) -> anyhow::Result<()> {
            if let Some(position) = patch.position {
                if let Some(script) = self.scripts.lock().iter_mut().find(|s| s.id == id) {
                    script.position = position;
                }
            }
            Ok(())
        }
    }

    struct FakeProvider {
        objects: Mutex<HashMap<String, Vec<u8>>>,
        meta: Mutex<Vec<u8>>,
    }

    impl FakeProvider {
        fn new(meta: &RemoteMeta, scripts: &[(&str, &str)]) -> Self {
            let mut objects = HashMap::new();
            for (uri, code) in scripts {
                let name = crate::naming::filename_for(None, uri);
                objects.insert(name, code.as_bytes().to_vec());
            }
            Self {
                objects: Mutex::new(objects),
                meta: Mutex::new(serde_json::to_vec(meta).unwrap()),
            }
        }
    }

    #[async_trait]
    impl SyncProvider for FakeProvider {
        fn name(&self) -> &str {
            "fake"
        }
        fn display_name(&self) -> &str {
            "Fake"
        }
        fn delay_time(&self) -> Duration {
            Duration::from_millis(0)
        }
        async fn authorize(&self) -> anyhow::Result<()> {
            Ok(())
        }
        async fn revoke(&self) -> anyhow::Result<()> {
            Ok(())
        }
        async fn user(&self) -> anyhow::Result<()> {
            Ok(())
        }
        async fn list(&self) -> anyhow::Result<Vec<RemoteObject>> {
            let mut out: Vec<RemoteObject> = self
                .objects
                .lock()
                .keys()
                .filter_map(|name| {
                    crate::naming::parse_uri_from_filename(name).map(|(_, uri)| RemoteObject {
                        name: name.clone(),
                        uri,
                    })
                })
                .collect();
            out.push(RemoteObject {
                name: crate::naming::DEFAULT_META_FILE.to_string(),
                uri: String::new(),
            });
            Ok(out)
        }
        async fn get(&self, obj: &RemoteObject) -> anyhow::Result<Vec<u8>> {
            if obj.name == crate::naming::DEFAULT_META_FILE {
                return Ok(self.meta.lock().clone());
            }
            self.objects
                .lock()
                .get(&obj.name)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no such object"))
        }
        async fn put(&self, obj: &RemoteObject, bytes: Vec<u8>) -> anyhow::Result<RemoteObject> {
            if obj.uri.is_empty() && obj.name == crate::naming::DEFAULT_META_FILE {
                *self.meta.lock() = bytes;
                return Ok(obj.clone());
            }
            let name = crate::naming::filename_for(None, &obj.uri);
            self.objects.lock().insert(name.clone(), bytes);
            Ok(RemoteObject {
                name,
                uri: obj.uri.clone(),
            })
        }
        async fn remove(&self, obj: &RemoteObject) -> anyhow::Result<()> {
            let name = if obj.name.is_empty() {
                crate::naming::filename_for(None, &obj.uri)
            } else {
                obj.name.clone()
            };
            self.objects.lock().remove(&name);
            Ok(())
        }
    }

    fn script(id: LocalId, uri: &str, last_modified: i64, position: i64) -> ScriptRecord {
        ScriptRecord {
            id,
            uri: uri.to_string(),
            last_modified: Some(Timestamp(last_modified)),
            position,
            custom: serde_json::Value::Null,
            config: Default::default(),
            code: "// code".to_string(),
        }
    }

    async fn run_sync(
        store: Arc<FakeStore>,
        provider: &FakeProvider,
        options: &MemoryOptionStore,
    ) -> Result<()> {
        env_logger::try_init().ok();
        let cfg = SyncConfig::new(options);
        let svc_cfg = cfg.service("fake");
        let reconciler = Reconciler::new(store);
        let limiter = GapLimiter::new(
            Duration::from_millis(0),
            Arc::new(crate::state::StateCell::new(crate::state::Progress::default())),
        );
        reconciler.run(provider, &svc_cfg, &limiter).await
    }

    #[tokio::test]
    async fn s1_first_sync_uploads_local_only_script() {
        let store = FakeStore::new(vec![script(1, "a", 1000, 1)]);
        let provider = FakeProvider::new(&RemoteMeta::default(), &[]);
        let options = MemoryOptionStore::new();

        run_sync(store.clone(), &provider, &options).await.unwrap();

        let meta: RemoteMeta = serde_json::from_slice(&provider.meta.lock()).unwrap();
        assert_eq!(meta.info.len(), 1);
        let entry = meta.info.get("a").unwrap();
        assert_eq!(entry.modified, Timestamp(1000));
        assert_eq!(entry.position, Some(1));
        assert!(meta.timestamp.as_millis() > 0);

        let cfg = SyncConfig::new(&options);
        let local_meta: LocalMeta = cfg.service("fake").get("meta", LocalMeta::default());
        assert!(local_meta.timestamp.is_some());
        assert!(local_meta.last_sync.is_some());
    }

    #[tokio::test]
    async fn s2_pulls_new_remote_item() {
        let mut meta = RemoteMeta {
            timestamp: Timestamp(200),
            info: HashMap::new(),
        };
        meta.info.insert(
            "b".to_string(),
            MetaEntry {
                modified: Timestamp(200),
                position: Some(1),
            },
        );
        let provider = FakeProvider::new(
            &meta,
            &[("b", r#"{"version":1,"more":{},"code":"// remote"}"#)],
        );
        let store = FakeStore::new(vec![]);
        let options = MemoryOptionStore::new();
        {
            let cfg = SyncConfig::new(&options);
            cfg.service("fake").set(
                "meta",
                LocalMeta {
                    timestamp: Some(Timestamp(100)),
                    last_sync: Some(Timestamp(100)),
                },
            );
        }

        run_sync(store.clone(), &provider, &options).await.unwrap();

        let scripts = store.list();
        assert_eq!(scripts.len(), 1);
        assert_eq!(scripts[0].uri, "b");
        assert_eq!(scripts[0].code, "// remote");
    }

    #[tokio::test]
    async fn s3_remote_deletion_removes_local_script() {
        let meta = RemoteMeta {
            timestamp: Timestamp(400),
            info: HashMap::new(),
        };
        let provider = FakeProvider::new(&meta, &[]);
        let store = FakeStore::new(vec![script(1, "c", 250, 0)]);
        let options = MemoryOptionStore::new();
        {
            let cfg = SyncConfig::new(&options);
            cfg.service("fake").set(
                "meta",
                LocalMeta {
                    timestamp: Some(Timestamp(300)),
                    last_sync: Some(Timestamp(300)),
                },
            );
        }

        run_sync(store.clone(), &provider, &options).await.unwrap();

        assert!(store.list().is_empty());
    }

    #[tokio::test]
    async fn s4_remote_position_wins_under_low_global_last_modified() {
        let mut meta = RemoteMeta {
            timestamp: Timestamp(500),
            info: HashMap::new(),
        };
        meta.info.insert(
            "d".to_string(),
            MetaEntry {
                modified: Timestamp(500),
                position: Some(2),
            },
        );
        let provider = FakeProvider::new(&meta, &[("d", "// remote")]);
        let store = FakeStore::new(vec![script(1, "d", 500, 5)]);
        let options = MemoryOptionStore::new();
        {
            let cfg = SyncConfig::new(&options);
            cfg.service("fake").set(
                "meta",
                LocalMeta {
                    timestamp: Some(Timestamp(1)),
                    last_sync: None,
                },
            );
            options.set_option("lastModified", serde_json::json!(100));
        }

        run_sync(store.clone(), &provider, &options).await.unwrap();

        let scripts = store.list();
        assert_eq!(scripts[0].position, 2, "remote position should win");
    }

    #[tokio::test]
    async fn s5_local_wins_by_mtime_and_bumps_meta() {
        let mut meta = RemoteMeta {
            timestamp: Timestamp(50),
            info: HashMap::new(),
        };
        meta.info.insert(
            "e".to_string(),
            MetaEntry {
                modified: Timestamp(100),
                position: Some(0),
            },
        );
        let provider = FakeProvider::new(&meta, &[("e", "// stale remote")]);
        let store = FakeStore::new(vec![script(1, "e", 200, 0)]);
        let options = MemoryOptionStore::new();
        {
            let cfg = SyncConfig::new(&options);
            cfg.service("fake").set(
                "meta",
                LocalMeta {
                    timestamp: Some(Timestamp(1)),
                    last_sync: None,
                },
            );
        }

        run_sync(store.clone(), &provider, &options).await.unwrap();

        let out_meta: RemoteMeta = serde_json::from_slice(&provider.meta.lock()).unwrap();
        assert_eq!(out_meta.info.get("e").unwrap().modified, Timestamp(200));
    }

    #[tokio::test]
    async fn s6_status_strip_drops_enabled_flag_on_import() {
        let mut meta = RemoteMeta {
            timestamp: Timestamp(10),
            info: HashMap::new(),
        };
        meta.info.insert(
            "f".to_string(),
            MetaEntry {
                modified: Timestamp(10),
                position: Some(0),
            },
        );
        let provider = FakeProvider::new(
            &meta,
            &[("f", r#"{"version":1,"more":{"enabled":true},"code":"// x"}"#)],
        );
        let store = FakeStore::new(vec![]);
        let options = MemoryOptionStore::new();
        options.set_option("syncScriptStatus", serde_json::json!(false));

        run_sync(store.clone(), &provider, &options).await.unwrap();

        let scripts = store.list();
        assert_eq!(scripts.len(), 1);
        assert!(scripts[0].config.enabled.is_none(), "enabled must not cross devices");
    }

    #[tokio::test]
    async fn invariant_meta_cardinality_matches_remote_listing() {
        let store = FakeStore::new(vec![script(1, "a", 1000, 0), script(2, "b", 2000, 1)]);
        let provider = FakeProvider::new(&RemoteMeta::default(), &[]);
        let options = MemoryOptionStore::new();

        run_sync(store.clone(), &provider, &options).await.unwrap();

        let meta: RemoteMeta = serde_json::from_slice(&provider.meta.lock()).unwrap();
        let remote_count = provider.list().await.unwrap().len() - 1; // exclude meta
        assert_eq!(meta.info.len(), remote_count);
        for entry in meta.info.values() {
            assert!(entry.modified.as_millis() > 0);
        }
    }

    #[test]
    fn normalize_meta_marks_changed_on_fresh_entries() {
        let (normalized, changed) = normalize_meta(
            RemoteMeta::default(),
            &[RemoteObject {
                name: "vm@2-a".into(),
                uri: "a".into(),
            }],
            Timestamp(42),
        );
        assert!(changed);
        assert_eq!(normalized.info.get("a").unwrap().modified, Timestamp(42));
    }
}
