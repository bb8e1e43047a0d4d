//! NPC game layer: records, entities, the registry and the commands that
//! drive it.

pub mod actions;
pub mod commands;
pub mod npc;
pub mod registry;
pub mod types;
pub mod world;
