//! Shared NPC game types.
//!
//! `NpcRecord`      → the durable unit written by every storage backend
//! `SkinDescriptor` → import from `crate::skin::SkinDescriptor`
//! `Player`/`Level` → what the world runtime hands us (see `game::world`)

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::skin::SkinDescriptor;

/// Location plus orientation. Flattened into `NpcRecord` so the flat-file
/// documents keep `x`, `y`, `z`, `pitch`, `yaw`, `headYaw` at the top level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub pitch: f32,
    pub yaw: f32,
    pub head_yaw: f32,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z, ..Default::default() }
    }

    pub fn with_rotation(mut self, pitch: f32, yaw: f32, head_yaw: f32) -> Self {
        self.pitch = pitch;
        self.yaw = yaw;
        self.head_yaw = head_yaw;
        self
    }
}

/// How an NPC gets its appearance.
///
/// Stored as `SMALLINT` in the SQL backends (`PlayerSkin = 0`,
/// `PersistentSkin = 1`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SkinType {
    /// Mirror whichever player is looking at the NPC.
    #[default]
    PlayerSkin,
    /// Fixed appearance stored with the record.
    PersistentSkin,
}

impl SkinType {
    pub fn as_i16(self) -> i16 {
        match self {
            SkinType::PlayerSkin => 0,
            SkinType::PersistentSkin => 1,
        }
    }
}

impl TryFrom<i16> for SkinType {
    type Error = i16;

    fn try_from(v: i16) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(SkinType::PlayerSkin),
            1 => Ok(SkinType::PersistentSkin),
            other => Err(other),
        }
    }
}

impl FromStr for SkinType {
    type Err = String;

    /// Accepts the command spellings, case-insensitive. The historical
    /// `PersistantSkin` spelling is still understood.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "playerskin" | "player" => Ok(SkinType::PlayerSkin),
            "persistentskin" | "persistantskin" | "persistent" => Ok(SkinType::PersistentSkin),
            _ => Err(format!("unknown skin type '{s}'")),
        }
    }
}

impl fmt::Display for SkinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkinType::PlayerSkin => f.write_str("PlayerSkin"),
            SkinType::PersistentSkin => f.write_str("PersistentSkin"),
        }
    }
}

fn default_scale() -> f32 {
    1.0
}

/// One persisted NPC. `id` is the only key any backend uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NpcRecord {
    pub id: String,
    pub name_tag: String,
    pub display_name: String,
    pub level_name: String,
    #[serde(flatten)]
    pub position: Position,
    #[serde(default = "default_scale")]
    pub scale: f32,
    pub is_visible: bool,
    pub is_always_show_name: bool,
    #[serde(default)]
    pub action_id: Option<String>,
    #[serde(default)]
    pub skin_type: SkinType,
    #[serde(default)]
    pub geometry_file_name: Option<String>,
    #[serde(default)]
    pub skin: SkinDescriptor,
}

impl NpcRecord {
    /// Fresh record with a newly generated id. Visible, name shown on hover
    /// only, no action bound, placeholder skin.
    pub fn new(
        name_tag: impl Into<String>,
        display_name: impl Into<String>,
        level_name: impl Into<String>,
        position: Position,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name_tag: name_tag.into(),
            display_name: display_name.into(),
            level_name: level_name.into(),
            position,
            scale: default_scale(),
            is_visible: true,
            is_always_show_name: false,
            action_id: None,
            skin_type: SkinType::PlayerSkin,
            geometry_file_name: None,
            skin: SkinDescriptor::placeholder(),
        }
    }

    /// Skin identifier derived from `geometry_file_name` (`guard.json` → `guard`).
    pub fn skin_identifier(&self) -> Option<&str> {
        let name = self.geometry_file_name.as_deref()?.trim();
        if name.is_empty() {
            return None;
        }
        let stem = std::path::Path::new(name).file_stem()?.to_str()?;
        (!stem.is_empty()).then_some(stem)
    }

    pub fn name_matches(&self, name: &str) -> bool {
        self.name_tag.to_lowercase() == name.to_lowercase()
    }
}

/// A level (world) as resolved by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Level {
    pub name: String,
}

impl Level {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// The slice of a player session this crate needs.
#[derive(Debug, Clone, PartialEq)]
pub struct Player {
    pub name: String,
    pub level_name: String,
    pub position: Position,
    pub skin: SkinDescriptor,
}

impl Player {
    pub fn new(name: impl Into<String>, level_name: impl Into<String>, position: Position) -> Self {
        Self {
            name: name.into(),
            level_name: level_name.into(),
            position,
            skin: SkinDescriptor::placeholder(),
        }
    }

    pub fn with_skin(mut self, skin: SkinDescriptor) -> Self {
        self.skin = skin;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skin_type_codes() {
        assert_eq!(SkinType::PlayerSkin.as_i16(), 0);
        assert_eq!(SkinType::PersistentSkin.as_i16(), 1);
        assert_eq!(SkinType::try_from(1), Ok(SkinType::PersistentSkin));
        assert_eq!(SkinType::try_from(7), Err(7));
    }

    #[test]
    fn skin_type_parses_command_spellings() {
        assert_eq!("PlayerSkin".parse(), Ok(SkinType::PlayerSkin));
        assert_eq!("persistentskin".parse(), Ok(SkinType::PersistentSkin));
        assert_eq!("PersistantSkin".parse(), Ok(SkinType::PersistentSkin));
        assert!("guard".parse::<SkinType>().is_err());
    }

    #[test]
    fn record_uses_camel_case_keys() {
        let rec = NpcRecord::new("Bob", "Bob the Guide", "world", Position::new(10.0, 64.0, 10.0));
        let value = serde_json::to_value(&rec).unwrap();
        assert_eq!(value["nameTag"], "Bob");
        assert_eq!(value["displayName"], "Bob the Guide");
        assert_eq!(value["headYaw"], 0.0);
        assert_eq!(value["x"], 10.0);
        assert_eq!(value["isAlwaysShowName"], false);
        assert!(value.get("position").is_none());
    }

    #[test]
    fn missing_scale_defaults_to_one() {
        let json = r#"{
            "id": "a", "nameTag": "Bob", "displayName": "Bob", "levelName": "world",
            "x": 1.0, "y": 2.0, "z": 3.0, "pitch": 0.0, "yaw": 0.0, "headYaw": 0.0,
            "isVisible": true, "isAlwaysShowName": false
        }"#;
        let rec: NpcRecord = serde_json::from_str(json).unwrap();
        assert_eq!(rec.scale, 1.0);
        assert_eq!(rec.skin_type, SkinType::PlayerSkin);
        assert!(rec.action_id.is_none());
    }

    #[test]
    fn skin_identifier_strips_extension() {
        let mut rec = NpcRecord::new("Sam", "Sam", "world", Position::default());
        assert_eq!(rec.skin_identifier(), None);
        rec.geometry_file_name = Some("guard.json".into());
        assert_eq!(rec.skin_identifier(), Some("guard"));
        rec.geometry_file_name = Some("  ".into());
        assert_eq!(rec.skin_identifier(), None);
    }

    #[test]
    fn name_match_ignores_case() {
        let rec = NpcRecord::new("Bob", "Bob", "world", Position::default());
        assert!(rec.name_matches("BOB"));
        assert!(!rec.name_matches("Bobby"));
    }

    #[test]
    fn ids_are_unique() {
        let a = NpcRecord::new("a", "a", "w", Position::default());
        let b = NpcRecord::new("a", "a", "w", Position::default());
        assert_ne!(a.id, b.id);
    }
}
