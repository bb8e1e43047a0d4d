//! World runtime boundary.
//!
//! The NPC subsystem never owns entities, levels or player sessions; it asks
//! the runtime through [`World`]. [`LocalWorld`] is a headless in-process
//! implementation used by the standalone server and the tests.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::game::npc::NpcEntity;
use crate::game::types::{Level, Player, Position};
use crate::skin::SkinDescriptor;

/// Calls into the game runtime. Treated as black boxes: nothing here retries.
pub trait World: Send + Sync {
    /// Look up (loading if necessary) a level by name.
    fn resolve_level(&self, name: &str) -> Option<Level>;

    fn spawn_entity(&self, npc: &NpcEntity);

    fn despawn_entity(&self, npc: &NpcEntity);

    /// Players currently able to see entities in `level`.
    fn current_viewers(&self, level: &str) -> Vec<Player>;

    /// Skin packet for one viewer: "entity `runtime_id` looks like `skin`".
    fn send_skin(&self, viewer: &Player, runtime_id: i64, skin: &SkinDescriptor);

    fn teleport_player(&self, player: &Player, position: Position);
}

/// One skin packet as recorded by [`LocalWorld`].
#[derive(Debug, Clone, PartialEq)]
pub struct SkinPacket {
    pub viewer: String,
    pub runtime_id: i64,
    pub skin_id: String,
    pub texture_len: usize,
}

#[derive(Debug, Default)]
struct LocalState {
    levels: BTreeSet<String>,
    players: HashMap<String, Player>,
    spawned: HashMap<i64, String>,
    packets: Vec<SkinPacket>,
}

/// Headless world: a fixed set of levels, joined players, and a log of
/// everything the NPC layer asked it to do.
#[derive(Debug, Default)]
pub struct LocalWorld {
    state: Mutex<LocalState>,
}

impl LocalWorld {
    pub fn new<I, S>(levels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let state = LocalState {
            levels: levels.into_iter().map(Into::into).collect(),
            ..Default::default()
        };
        Self { state: Mutex::new(state) }
    }

    fn state(&self) -> MutexGuard<'_, LocalState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_level(&self, name: impl Into<String>) {
        self.state().levels.insert(name.into());
    }

    pub fn join(&self, player: Player) {
        tracing::info!("[world] [player_join] name={} level={}", player.name, player.level_name);
        self.state().players.insert(player.name.clone(), player);
    }

    pub fn leave(&self, name: &str) {
        self.state().players.remove(name);
    }

    pub fn player(&self, name: &str) -> Option<Player> {
        self.state().players.get(name).cloned()
    }

    pub fn is_spawned(&self, runtime_id: i64) -> bool {
        self.state().spawned.contains_key(&runtime_id)
    }

    pub fn spawned_count(&self) -> usize {
        self.state().spawned.len()
    }

    /// Skin packets sent so far, oldest first.
    pub fn skin_packets(&self) -> Vec<SkinPacket> {
        self.state().packets.clone()
    }
}

impl World for LocalWorld {
    fn resolve_level(&self, name: &str) -> Option<Level> {
        self.state().levels.contains(name).then(|| Level::new(name))
    }

    fn spawn_entity(&self, npc: &NpcEntity) {
        let record = npc.record();
        tracing::debug!(
            "[world] [spawn] runtime_id={} name={} level={}",
            npc.runtime_id(),
            record.name_tag,
            record.level_name
        );
        self.state().spawned.insert(npc.runtime_id(), record.level_name.clone());
    }

    fn despawn_entity(&self, npc: &NpcEntity) {
        tracing::debug!("[world] [despawn] runtime_id={}", npc.runtime_id());
        self.state().spawned.remove(&npc.runtime_id());
    }

    fn current_viewers(&self, level: &str) -> Vec<Player> {
        self.state()
            .players
            .values()
            .filter(|p| p.level_name == level)
            .cloned()
            .collect()
    }

    fn send_skin(&self, viewer: &Player, runtime_id: i64, skin: &SkinDescriptor) {
        self.state().packets.push(SkinPacket {
            viewer: viewer.name.clone(),
            runtime_id,
            skin_id: skin.skin_id.clone(),
            texture_len: skin.texture.len(),
        });
    }

    fn teleport_player(&self, player: &Player, position: Position) {
        if let Some(p) = self.state().players.get_mut(&player.name) {
            p.position = position;
        }
    }
}
