//! NPC entity adapter: one registry entry plus its presence in the world.

use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::game::types::{Level, NpcRecord, Player, Position, SkinType};
use crate::game::world::World;
use crate::skin::SkinDescriptor;

/// First runtime entity id handed to NPCs; keeps them clear of player ids.
pub const NPC_START_NUM: i64 = 3_221_225_472;

/// How long a `PlayerSkin` NPC waits before mirroring viewers' skins, so
/// the client has finished adding the entity.
pub const PLAYER_SKIN_DELAY: Duration = Duration::from_secs(2);

static NEXT_RUNTIME_ID: AtomicI64 = AtomicI64::new(NPC_START_NUM);

const STATE_LOADED: u8 = 0;
const STATE_SPAWNED: u8 = 1;
const STATE_DESPAWNED: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NpcState {
    /// Built from a record, not yet in the world.
    Loaded,
    Spawned,
    Despawned,
}

/// A registry entry. Clones share the same runtime id and world presence,
/// so a snapshot handed to a command still despawns the real entity.
#[derive(Clone)]
pub struct NpcEntity {
    record: NpcRecord,
    level: Level,
    runtime_id: i64,
    state: Arc<AtomicU8>,
    world: Arc<dyn World>,
}

impl fmt::Debug for NpcEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NpcEntity")
            .field("id", &self.record.id)
            .field("name_tag", &self.record.name_tag)
            .field("level", &self.level.name)
            .field("runtime_id", &self.runtime_id)
            .field("state", &self.state())
            .finish()
    }
}

impl NpcEntity {
    /// Wrap a fully assembled record. The skin must already be final; the
    /// adapter is never rebuilt to patch it afterwards.
    pub fn new(record: NpcRecord, level: Level, world: Arc<dyn World>) -> Self {
        Self {
            record,
            level,
            runtime_id: NEXT_RUNTIME_ID.fetch_add(1, Ordering::Relaxed),
            state: Arc::new(AtomicU8::new(STATE_LOADED)),
            world,
        }
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn record(&self) -> &NpcRecord {
        &self.record
    }

    pub fn into_record(self) -> NpcRecord {
        self.record
    }

    pub fn level(&self) -> &Level {
        &self.level
    }

    pub fn runtime_id(&self) -> i64 {
        self.runtime_id
    }

    pub fn state(&self) -> NpcState {
        match self.state.load(Ordering::Acquire) {
            STATE_SPAWNED => NpcState::Spawned,
            STATE_DESPAWNED => NpcState::Despawned,
            _ => NpcState::Loaded,
        }
    }

    pub fn is_spawned(&self) -> bool {
        self.state() == NpcState::Spawned
    }

    /// Same entity, edited record. Used by the mutation commands before
    /// handing the entity back to the registry.
    pub fn with_record(mut self, edit: impl FnOnce(&mut NpcRecord)) -> Self {
        let id = self.record.id.clone();
        edit(&mut self.record);
        // The storage key never changes.
        self.record.id = id;
        self
    }

    /// Put the entity in the world, then broadcast its skin.
    pub fn spawn(&self) {
        let prev = self.state.swap(STATE_SPAWNED, Ordering::AcqRel);
        if prev != STATE_SPAWNED {
            self.world.spawn_entity(self);
            tracing::debug!(
                "[npc] [spawn] name={} runtime_id={} level={}",
                self.record.name_tag,
                self.runtime_id,
                self.level.name
            );
        }
        self.send_skin(None);
    }

    /// Remove from the world. Safe to call any number of times.
    pub fn despawn(&self) {
        let prev = self.state.swap(STATE_DESPAWNED, Ordering::AcqRel);
        if prev == STATE_SPAWNED {
            self.world.despawn_entity(self);
            tracing::debug!("[npc] [despawn] name={} runtime_id={}", self.record.name_tag, self.runtime_id);
        }
    }

    /// Move to `position` in `level` (respawning so viewers see the new spot).
    pub fn teleport(self, level: Level, position: Position) -> Self {
        let mut moved = self.with_record(|r| {
            r.level_name = level.name.clone();
            r.position = position;
        });
        moved.level = level;
        if moved.is_spawned() {
            moved.despawn();
            moved.spawn();
        }
        moved
    }

    /// Replace the skin and rebroadcast it when the entity is live.
    pub fn set_skin(self, skin: SkinDescriptor, skin_type: SkinType) -> Self {
        let updated = self.with_record(|r| {
            r.skin = skin;
            r.skin_type = skin_type;
        });
        if updated.is_spawned() {
            updated.send_skin(None);
        }
        updated
    }

    /// Send the NPC's appearance to `targets` (or everyone in the level).
    ///
    /// `PersistentSkin` sends the stored descriptor now. `PlayerSkin` waits
    /// [`PLAYER_SKIN_DELAY`] and then shows each viewer their own skin.
    pub fn send_skin(&self, targets: Option<&[Player]>) {
        match self.record.skin_type {
            SkinType::PersistentSkin => {
                let viewers = self.viewers(targets);
                for viewer in &viewers {
                    self.world.send_skin(viewer, self.runtime_id, &self.record.skin);
                }
                tracing::trace!(
                    "[npc] [send_skin] name={} kind=persistent viewers={}",
                    self.record.name_tag,
                    viewers.len()
                );
            }
            SkinType::PlayerSkin => {
                let Ok(handle) = tokio::runtime::Handle::try_current() else {
                    tracing::warn!(
                        "[npc] [send_skin] name={} player skin needs a runtime, skipped",
                        self.record.name_tag
                    );
                    return;
                };
                let npc = self.clone();
                let targets = targets.map(<[Player]>::to_vec);
                handle.spawn(async move {
                    tokio::time::sleep(PLAYER_SKIN_DELAY).await;
                    if !npc.is_spawned() {
                        return;
                    }
                    for viewer in npc.viewers(targets.as_deref()) {
                        npc.world.send_skin(&viewer, npc.runtime_id, &viewer.skin);
                    }
                });
            }
        }
    }

    fn viewers(&self, targets: Option<&[Player]>) -> Vec<Player> {
        match targets {
            Some(t) => t.to_vec(),
            None => self.world.current_viewers(&self.level.name),
        }
    }
}
