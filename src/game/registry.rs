//! In-memory NPC registry
//!
//! The authoritative "which NPCs exist in this process" index. Owned by the
//! host and shared by `Arc`; there is no global instance.
//!
//! Locking:
//! - `npcs` (RwLock) is held only while the map itself is touched, never
//!   across storage I/O.
//! - `writer` (Mutex) serializes every mutating operation (`register*`,
//!   `update*`, `unregister*`, `load_all`, `reload`, `shutdown`) for its
//!   whole duration, storage reads included. Readers never take it.
//!
//! Callers that edit an existing NPC go through [`NpcRegistry::update`] so
//! the edit is applied to the current entry, never to an older snapshot.
//!
//! Per-NPC writes are queued to a single persistence task and applied in
//! order. They are fire-and-forget: failures are logged, the in-memory
//! state stays as it is.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex, RwLock};

use crate::database::{NpcStorage, StorageError};
use crate::game::npc::NpcEntity;
use crate::game::types::{NpcRecord, Player, SkinType};
use crate::game::world::World;
use crate::skin;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Level '{0}' could not be found")]
    UnresolvableLevel(String),

    #[error("An NPC with the name '{0}' already exists")]
    DuplicateName(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("NPC persistence task is not running")]
    WriterClosed,
}

enum PersistOp {
    Save(NpcRecord),
    Delete(String),
    SaveAll(Vec<NpcRecord>, oneshot::Sender<Result<(), StorageError>>),
    Flush(oneshot::Sender<()>),
}

pub struct NpcRegistry {
    npcs: RwLock<HashMap<String, NpcEntity>>,
    writer: Mutex<()>,
    storage: Arc<dyn NpcStorage>,
    world: Arc<dyn World>,
    skin_dir: PathBuf,
    persist_tx: mpsc::UnboundedSender<PersistOp>,
}

impl NpcRegistry {
    /// Build an empty registry and start its persistence task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        storage: Arc<dyn NpcStorage>,
        world: Arc<dyn World>,
        skin_dir: impl Into<PathBuf>,
    ) -> Self {
        let (persist_tx, persist_rx) = mpsc::unbounded_channel();
        tokio::spawn(persist_loop(storage.clone(), persist_rx));
        Self {
            npcs: RwLock::new(HashMap::new()),
            writer: Mutex::new(()),
            storage,
            world,
            skin_dir: skin_dir.into(),
            persist_tx,
        }
    }

    pub fn storage(&self) -> &Arc<dyn NpcStorage> {
        &self.storage
    }

    pub fn world(&self) -> &Arc<dyn World> {
        &self.world
    }

    pub fn skin_dir(&self) -> &Path {
        &self.skin_dir
    }

    // ─── Bulk load ──────────────────────────────────────────────────────────

    /// Load every durable record, spawn it and index it. Records whose level
    /// cannot be resolved are skipped and stay in storage untouched.
    pub async fn load_all(&self) -> Result<usize, RegistryError> {
        let _gate = self.writer.lock().await;
        let loaded = self.load_locked().await?;
        let count = loaded.len();
        let mut npcs = self.npcs.write().await;
        for npc in loaded {
            if let Some(old) = npcs.insert(npc.id().to_string(), npc) {
                old.despawn();
            }
        }
        Ok(count)
    }

    /// Rebuild the index from storage. Readers keep seeing the old entries
    /// until the new set is swapped in; the old entities are then despawned.
    /// On a storage error nothing changes.
    pub async fn reload(&self) -> Result<usize, RegistryError> {
        let _gate = self.writer.lock().await;
        let loaded = self.load_locked().await?;
        let count = loaded.len();
        let fresh: HashMap<String, NpcEntity> =
            loaded.into_iter().map(|npc| (npc.id().to_string(), npc)).collect();

        let old = std::mem::replace(&mut *self.npcs.write().await, fresh);
        for npc in old.values() {
            npc.despawn();
        }
        tracing::debug!("[npc] [reloaded] replaced={} loaded={}", old.len(), count);
        Ok(count)
    }

    /// Read storage and build spawned entities, without touching the index.
    async fn load_locked(&self) -> Result<Vec<NpcEntity>, RegistryError> {
        // Queued writes must land before we read storage back.
        self.flush().await;
        let records = self.storage.load_all().await?;
        let total = records.len();

        let mut loaded = Vec::with_capacity(total);
        for record in records {
            let Some(level) = self.world.resolve_level(&record.level_name) else {
                tracing::warn!(
                    "[npc] [level_missing] npc={} level={}, skipping",
                    record.name_tag,
                    record.level_name
                );
                continue;
            };
            let record = self.resolve_skin(record);
            let npc = NpcEntity::new(record, level, self.world.clone());
            npc.spawn();
            loaded.push(npc);
        }

        tracing::info!("[npc] [loaded] count={} skipped={}", loaded.len(), total - loaded.len());
        Ok(loaded)
    }

    /// Pick the skin an NPC loads with. Asset files win; when they are gone
    /// the descriptor stored with the record is kept.
    fn resolve_skin(&self, mut record: NpcRecord) -> NpcRecord {
        let Some(skin_id) = record.skin_identifier().map(str::to_string) else {
            return record;
        };
        match skin::resolve(&skin_id, &self.skin_dir) {
            Ok(resolved) => record.skin = resolved,
            Err(e) => match record.skin_type {
                SkinType::PersistentSkin => tracing::warn!(
                    "[npc] [skin_fallback] npc={} skin={} {}; using stored skin",
                    record.name_tag,
                    skin_id,
                    e
                ),
                SkinType::PlayerSkin => tracing::debug!(
                    "[npc] [skin_skip] npc={} skin={} {}",
                    record.name_tag,
                    skin_id,
                    e
                ),
            },
        }
        record
    }

    async fn clear_locked(&self) {
        let old: Vec<NpcEntity> = self.npcs.write().await.drain().map(|(_, npc)| npc).collect();
        for npc in &old {
            npc.despawn();
        }
        tracing::debug!("[npc] [cleared] count={}", old.len());
    }

    // ─── Mutations ──────────────────────────────────────────────────────────

    /// Insert or overwrite by id and queue a save. Returns once memory is
    /// updated; durability happens in the background.
    pub async fn register(&self, npc: NpcEntity) {
        let _gate = self.writer.lock().await;
        self.insert(npc).await;
    }

    /// Creation path: refuse a name another NPC already uses
    /// (case-insensitive), otherwise index, spawn and queue a save. The check,
    /// the insert and the spawn all happen under the writer lock, so two
    /// racing creations cannot both win and a concurrent reload cannot leave
    /// a stray entity in the world.
    pub async fn register_unique(&self, npc: NpcEntity) -> Result<(), RegistryError> {
        let _gate = self.writer.lock().await;
        let name = npc.record().name_tag.clone();
        let taken = self
            .npcs
            .read()
            .await
            .values()
            .any(|other| other.id() != npc.id() && other.record().name_matches(&name));
        if taken {
            return Err(RegistryError::DuplicateName(name));
        }
        npc.spawn();
        self.insert(npc).await;
        Ok(())
    }

    /// Edit the NPC currently indexed under `id` and store the result.
    /// Lookup, edit and insert run under the writer lock, so the edit always
    /// sees the latest entity. Returns `None` when the id is not registered.
    pub async fn update<F>(&self, id: &str, edit: F) -> Option<NpcEntity>
    where
        F: FnOnce(NpcEntity) -> NpcEntity,
    {
        let _gate = self.writer.lock().await;
        let current = self.npcs.read().await.get(id).cloned()?;
        Some(self.apply_edit(current, edit).await)
    }

    /// [`update`](Self::update) keyed by a case-insensitive name tag.
    pub async fn update_by_name<F>(&self, name: &str, edit: F) -> Option<NpcEntity>
    where
        F: FnOnce(NpcEntity) -> NpcEntity,
    {
        let _gate = self.writer.lock().await;
        let current = self
            .npcs
            .read()
            .await
            .values()
            .find(|npc| npc.record().name_matches(name))
            .cloned()?;
        Some(self.apply_edit(current, edit).await)
    }

    async fn apply_edit<F>(&self, current: NpcEntity, edit: F) -> NpcEntity
    where
        F: FnOnce(NpcEntity) -> NpcEntity,
    {
        let id = current.id().to_string();
        let updated = edit(current);
        debug_assert_eq!(updated.id(), id);
        self.insert(updated.clone()).await;
        updated
    }

    async fn insert(&self, npc: NpcEntity) {
        let record = npc.record().clone();
        let runtime_id = npc.runtime_id();
        let replaced = self.npcs.write().await.insert(record.id.clone(), npc);
        if let Some(old) = replaced.filter(|old| old.runtime_id() != runtime_id) {
            old.despawn();
        }
        tracing::debug!("[npc] [register] id={} name={}", record.id, record.name_tag);
        self.persist(PersistOp::Save(record));
    }

    /// Evict, despawn and queue a delete. Unknown ids are ignored.
    pub async fn unregister(&self, id: &str) -> bool {
        let _gate = self.writer.lock().await;
        let removed = self.npcs.write().await.remove(id);
        match removed {
            Some(npc) => {
                self.evict(npc);
                true
            }
            None => false,
        }
    }

    /// Like [`unregister`](Self::unregister), keyed by a case-insensitive
    /// name tag. Returns the removed entity.
    pub async fn unregister_by_name(&self, name: &str) -> Option<NpcEntity> {
        let _gate = self.writer.lock().await;
        let mut npcs = self.npcs.write().await;
        let id = npcs
            .values()
            .find(|npc| npc.record().name_matches(name))
            .map(|npc| npc.id().to_string())?;
        let npc = npcs.remove(&id)?;
        drop(npcs);
        self.evict(npc.clone());
        Some(npc)
    }

    fn evict(&self, npc: NpcEntity) {
        npc.despawn();
        tracing::debug!("[npc] [unregister] id={} name={}", npc.id(), npc.record().name_tag);
        self.persist(PersistOp::Delete(npc.id().to_string()));
    }

    /// Write every in-memory record in one backend batch and wait for it.
    pub async fn save_all(&self) -> Result<usize, RegistryError> {
        let records = self.records().await;
        let count = records.len();
        let (tx, rx) = oneshot::channel();
        self.persist(PersistOp::SaveAll(records, tx));
        rx.await.map_err(|_| RegistryError::WriterClosed)??;
        tracing::info!("[npc] [saved_all] count={}", count);
        Ok(count)
    }

    /// Wait until every write queued so far has been applied.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        self.persist(PersistOp::Flush(tx));
        let _ = rx.await;
    }

    /// Despawn everything and drain the write queue. The durable records
    /// are left alone.
    pub async fn shutdown(&self) {
        let _gate = self.writer.lock().await;
        self.clear_locked().await;
        self.flush().await;
    }

    fn persist(&self, op: PersistOp) {
        if self.persist_tx.send(op).is_err() {
            tracing::error!("[npc] [persist_dropped] writer task is gone");
        }
    }

    // ─── Snapshots ──────────────────────────────────────────────────────────

    pub async fn get_all(&self) -> Vec<NpcEntity> {
        self.npcs.read().await.values().cloned().collect()
    }

    pub async fn get_by_id(&self, id: &str) -> Option<NpcEntity> {
        self.npcs.read().await.get(id).cloned()
    }

    /// Case-insensitive lookup by name tag.
    pub async fn find_by_name(&self, name: &str) -> Option<NpcEntity> {
        self.npcs
            .read()
            .await
            .values()
            .find(|npc| npc.record().name_matches(name))
            .cloned()
    }

    pub async fn find_by_runtime_id(&self, runtime_id: i64) -> Option<NpcEntity> {
        self.npcs
            .read()
            .await
            .values()
            .find(|npc| npc.runtime_id() == runtime_id)
            .cloned()
    }

    pub async fn records(&self) -> Vec<NpcRecord> {
        self.npcs.read().await.values().map(|npc| npc.record().clone()).collect()
    }

    pub async fn len(&self) -> usize {
        self.npcs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.npcs.read().await.is_empty()
    }

    // ─── World events ───────────────────────────────────────────────────────

    /// A player joined: show them every NPC's skin.
    pub async fn on_player_join(&self, player: &Player) {
        for npc in self.get_all().await {
            npc.send_skin(Some(std::slice::from_ref(player)));
        }
    }
}

async fn persist_loop(storage: Arc<dyn NpcStorage>, mut rx: mpsc::UnboundedReceiver<PersistOp>) {
    while let Some(op) = rx.recv().await {
        match op {
            PersistOp::Save(record) => {
                if let Err(e) = storage.save(&record).await {
                    tracing::error!("[npc] [save_failed] id={} backend={} {}", record.id, storage.kind(), e);
                }
            }
            PersistOp::Delete(id) => {
                if let Err(e) = storage.delete(&id).await {
                    tracing::error!("[npc] [delete_failed] id={} backend={} {}", id, storage.kind(), e);
                }
            }
            PersistOp::SaveAll(records, reply) => {
                let result = storage.save_all(&records).await;
                if let Err(e) = &result {
                    tracing::error!("[npc] [save_all_failed] count={} backend={} {}", records.len(), storage.kind(), e);
                }
                let _ = reply.send(result);
            }
            PersistOp::Flush(reply) => {
                let _ = reply.send(());
            }
        }
    }
    tracing::debug!("[npc] [writer_stopped]");
}
