//! npckeeper - NPC registry with pluggable persistence
//!
//! Keeps the set of server-side NPCs, spawns them into the world and stores
//! them in JSON files, SQLite or MySQL.

// ============================================
// Core Modules
// ============================================

/// Host configuration (conf/npc.yaml)
pub mod config;
/// Storage backends and the backend factory
pub mod database;
/// Skin texture/geometry resolution
pub mod skin;

// ============================================
// Game Layer
// ============================================

/// Registry, entity adapter, actions and commands
pub mod game;
