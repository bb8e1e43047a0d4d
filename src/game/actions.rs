//! Named NPC actions.
//!
//! Other server modules register a handler under an id; an NPC bound to
//! that id runs the handler when a player hits it. Ids are not checked at
//! storage time, so a record may name an action nobody registered (yet).

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::game::npc::NpcEntity;
use crate::game::types::Player;

pub type ActionHandler = Arc<dyn Fn(&NpcEntity, &Player) + Send + Sync>;

#[derive(Default)]
pub struct ActionRegistry {
    actions: RwLock<HashMap<String, ActionHandler>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the handler for `id`.
    pub fn register<F>(&self, id: impl Into<String>, handler: F)
    where
        F: Fn(&NpcEntity, &Player) + Send + Sync + 'static,
    {
        let id = id.into();
        tracing::info!("[npc] [action_registered] id={}", id);
        self.actions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(handler));
    }

    pub fn contains(&self, id: &str) -> bool {
        self.actions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .actions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Run the handler bound to `action_id`. Returns `false` when there is
    /// nothing to run.
    pub fn execute(&self, action_id: Option<&str>, npc: &NpcEntity, player: &Player) -> bool {
        let Some(id) = action_id else { return false };
        // Clone the handler out so it runs without the lock held.
        let handler = self
            .actions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned();
        match handler {
            Some(handler) => {
                tracing::debug!("[npc] [action] id={} npc={} player={}", id, npc.id(), player.name);
                handler(npc, player);
                true
            }
            None => {
                tracing::warn!("[npc] [action_missing] id={} npc={}", id, npc.id());
                false
            }
        }
    }
}
