//! `/npc …` command semantics.
//!
//! Argument parsing and permission checks belong to the host's command
//! front end; these methods take parsed arguments and return the line to
//! show the commander. Every failure maps to a short [`CommandError`]
//! message naming the precondition that failed.

use std::sync::Arc;

use crate::database::StorageError;
use crate::game::actions::ActionRegistry;
use crate::game::npc::NpcEntity;
use crate::game::registry::{NpcRegistry, RegistryError};
use crate::game::types::{Level, NpcRecord, Player, SkinType};
use crate::skin::{self, SkinDescriptor, SkinError};

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("No NPC found with name '{0}'")]
    NotFound(String),

    #[error("An NPC with the name '{0}' already exists")]
    DuplicateName(String),

    #[error("No action named '{0}', register it from your plugin first")]
    UnknownAction(String),

    #[error("Skin folder '{0}' has been created. Place .png and optionally .json files inside")]
    SkinFolderCreated(String),

    #[error("Missing texture file '{0}'")]
    MissingTexture(String),

    #[error("Invalid skin texture '{0}'. Must be 64x32, 64x64 or 128x128")]
    InvalidTexture(String),

    #[error("Invalid geometry file '{0}'")]
    InvalidGeometry(String),

    #[error("Level '{0}' is not loaded")]
    UnresolvableLevel(String),

    #[error("Could not read the skin folder")]
    SkinFolder(#[source] std::io::Error),

    #[error("NPC storage is unavailable, see the server log")]
    Storage(#[source] StorageError),

    #[error("NPC persistence is not running")]
    WriterClosed,
}

impl From<SkinError> for CommandError {
    fn from(e: SkinError) -> Self {
        tracing::warn!("[npc] [skin_rejected] {}", e);
        match e {
            SkinError::MissingTexture(file) => CommandError::MissingTexture(file),
            SkinError::InvalidTexture { name, .. } => CommandError::InvalidTexture(name),
            SkinError::InvalidGeometry { name, .. } => CommandError::InvalidGeometry(name),
            SkinError::Io { source, .. } => CommandError::SkinFolder(source),
        }
    }
}

impl From<RegistryError> for CommandError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::UnresolvableLevel(level) => CommandError::UnresolvableLevel(level),
            RegistryError::DuplicateName(name) => CommandError::DuplicateName(name),
            RegistryError::Storage(e) => {
                tracing::error!("[npc] [command_storage] {}", e);
                CommandError::Storage(e)
            }
            RegistryError::WriterClosed => CommandError::WriterClosed,
        }
    }
}

pub type CommandResult = Result<String, CommandError>;

/// Everything the settings form can change in one go.
#[derive(Debug, Clone, PartialEq)]
pub struct NpcSettings {
    pub display_name: String,
    pub action_id: Option<String>,
    pub is_visible: bool,
    pub is_always_show_name: bool,
    pub skin_type: SkinType,
}

impl NpcSettings {
    /// Current values, used to prefill the form.
    pub fn from_record(record: &NpcRecord) -> Self {
        Self {
            display_name: record.display_name.clone(),
            action_id: record.action_id.clone(),
            is_visible: record.is_visible,
            is_always_show_name: record.is_always_show_name,
            skin_type: record.skin_type,
        }
    }

    fn apply(self, record: &mut NpcRecord) {
        record.display_name = self.display_name;
        record.action_id = self.action_id.filter(|a| !a.trim().is_empty());
        record.is_visible = self.is_visible;
        record.is_always_show_name = self.is_always_show_name;
        record.skin_type = self.skin_type;
    }
}

pub struct NpcCommands {
    registry: Arc<NpcRegistry>,
    actions: Arc<ActionRegistry>,
}

impl NpcCommands {
    pub fn new(registry: Arc<NpcRegistry>, actions: Arc<ActionRegistry>) -> Self {
        Self { registry, actions }
    }

    pub fn registry(&self) -> &Arc<NpcRegistry> {
        &self.registry
    }

    pub fn help(&self) -> String {
        [
            "NPC commands:",
            "/npc help - Show this help menu",
            "/npc list - List all the NPCs currently loaded",
            "/npc create <Name> <DisplayName> <SkinName> - Create an NPC with a skin from the skin folder",
            "/npc create <Name> <DisplayName> <PlayerSkin|PersistentSkin> - Create an NPC using your current skin",
            "/npc remove <Name> - Remove an NPC from the world and the database",
            "/npc goto <Name> - Teleport yourself to the NPC",
            "/npc tp <Name> - Teleport the NPC to your location",
            "/npc setskin <Name> - Set the NPC skin to your current skin",
            "/npc setskin <Name> <SkinName> - Set the NPC skin from .png/.json files in the skin folder",
            "/npc bind <Name> <ActionName> - Bind an action to an NPC",
            "/npc reload - Reload all NPCs from the database",
        ]
        .join("\n")
    }

    pub async fn list(&self) -> String {
        let mut records = self.registry.records().await;
        if records.is_empty() {
            return "There are no NPCs currently loaded".to_string();
        }
        records.sort_by_key(|r| r.name_tag.to_lowercase());
        let mut out = format!("NPCs currently loaded: ({})", records.len());
        for r in &records {
            out.push_str(&format!("\n- {} in level {}", r.name_tag, r.level_name));
        }
        out
    }

    /// `/npc create <Name> <DisplayName> <PlayerSkin|PersistentSkin>`
    pub async fn create_from_player(
        &self,
        commander: &Player,
        name: &str,
        display_name: &str,
        skin_type: SkinType,
    ) -> CommandResult {
        self.ensure_name_free(name).await?;
        let level = self.commander_level(commander)?;

        let mut record = NpcRecord::new(name, display_name, &commander.level_name, commander.position);
        record.skin_type = skin_type;
        if skin_type == SkinType::PersistentSkin {
            record.skin = commander.skin.clone();
        }

        self.create(record, level).await?;
        Ok(format!("NPC '{name}' has been created with {skin_type}"))
    }

    /// `/npc create <Name> <DisplayName> <SkinName>`
    pub async fn create_from_asset(
        &self,
        commander: &Player,
        name: &str,
        display_name: &str,
        skin_name: &str,
    ) -> CommandResult {
        self.ensure_name_free(name).await?;
        let skin = self.load_asset_skin(skin_name)?;
        let level = self.commander_level(commander)?;

        let mut record = NpcRecord::new(name, display_name, &commander.level_name, commander.position);
        record.skin_type = SkinType::PersistentSkin;
        record.geometry_file_name = Some(format!("{skin_name}.json"));
        record.skin = skin;

        self.create(record, level).await?;
        Ok(format!("NPC '{name}' has been created and spawned"))
    }

    pub async fn remove(&self, name: &str) -> CommandResult {
        self.registry
            .unregister_by_name(name)
            .await
            .ok_or_else(|| CommandError::NotFound(name.to_string()))?;
        Ok(format!("NPC '{name}' has been removed and deleted from the database"))
    }

    /// `/npc goto <Name>`: move the commander to the NPC.
    pub async fn goto(&self, commander: &Player, name: &str) -> CommandResult {
        let npc = self.find(name).await?;
        self.registry.world().teleport_player(commander, npc.record().position);
        Ok(format!("You have been teleported to NPC '{name}'"))
    }

    /// `/npc tp <Name>`: move the NPC to the commander.
    pub async fn teleport_here(&self, commander: &Player, name: &str) -> CommandResult {
        let level = self.commander_level(commander)?;
        let position = commander.position;
        self.edit(name, |npc| npc.teleport(level, position)).await?;
        Ok(format!("You have updated the position of the npc '{name}' successfully"))
    }

    /// `/npc setskin <Name>`: copy the commander's live skin.
    pub async fn set_skin_from_player(&self, commander: &Player, name: &str) -> CommandResult {
        let skin = commander.skin.clone();
        self.edit(name, |npc| {
            npc.with_record(|r| r.geometry_file_name = None)
                .set_skin(skin, SkinType::PersistentSkin)
        })
        .await?;
        Ok(format!("Skin of NPC '{name}' has been updated to your skin"))
    }

    /// `/npc setskin <Name> <SkinName>`
    pub async fn set_skin_from_asset(&self, name: &str, skin_name: &str) -> CommandResult {
        self.find(name).await?;
        let skin = self.load_asset_skin(skin_name)?;
        let with_geometry = skin.has_custom_geometry();

        self.edit(name, |npc| {
            npc.with_record(|r| r.geometry_file_name = Some(format!("{skin_name}.json")))
                .set_skin(skin, SkinType::PersistentSkin)
        })
        .await?;

        Ok(format!(
            "Skin of NPC '{name}' has been updated using '{skin_name}.png'{}",
            if with_geometry { " and geometry" } else { "" }
        ))
    }

    /// `/npc bind <Name> <ActionName>`
    pub async fn bind(&self, name: &str, action: &str) -> CommandResult {
        self.find(name).await?;
        if !self.actions.contains(action) {
            return Err(CommandError::UnknownAction(action.to_string()));
        }
        self.edit(name, |npc| npc.with_record(|r| r.action_id = Some(action.to_string())))
            .await?;
        self.registry.save_all().await?;
        Ok(format!("Action '{action}' bound successfully to the npc '{name}'"))
    }

    /// Settings form submit: apply, persist everything, rebuild.
    pub async fn update_settings(&self, name: &str, settings: NpcSettings) -> CommandResult {
        self.edit(name, |npc| npc.with_record(|r| settings.apply(r))).await?;
        self.registry.save_all().await?;
        self.registry.reload().await?;
        Ok(format!("Settings of NPC '{name}' have been saved"))
    }

    pub async fn reload(&self) -> CommandResult {
        let count = self.registry.reload().await?;
        Ok(format!("NPCs have been reloaded from the database ({count} loaded)"))
    }

    /// A player hit an entity; run the bound action if it is one of ours.
    pub async fn on_player_hit(&self, player: &Player, runtime_id: i64) -> bool {
        let Some(npc) = self.registry.find_by_runtime_id(runtime_id).await else {
            return false;
        };
        self.actions.execute(npc.record().action_id.as_deref(), &npc, player)
    }

    // ─── helpers ────────────────────────────────────────────────────────────

    async fn find(&self, name: &str) -> Result<NpcEntity, CommandError> {
        self.registry
            .find_by_name(name)
            .await
            .ok_or_else(|| CommandError::NotFound(name.to_string()))
    }

    /// Apply `edit` to the registered NPC called `name`, under the registry
    /// writer lock.
    async fn edit<F>(&self, name: &str, edit: F) -> Result<NpcEntity, CommandError>
    where
        F: FnOnce(NpcEntity) -> NpcEntity,
    {
        self.registry
            .update_by_name(name, edit)
            .await
            .ok_or_else(|| CommandError::NotFound(name.to_string()))
    }

    /// Cheap early check; `register_unique` repeats it under the lock.
    async fn ensure_name_free(&self, name: &str) -> Result<(), CommandError> {
        match self.registry.find_by_name(name).await {
            Some(_) => Err(CommandError::DuplicateName(name.to_string())),
            None => Ok(()),
        }
    }

    fn commander_level(&self, commander: &Player) -> Result<Level, CommandError> {
        self.registry
            .world()
            .resolve_level(&commander.level_name)
            .ok_or_else(|| CommandError::UnresolvableLevel(commander.level_name.clone()))
    }

    /// Scaffold the skin folder on first use, then resolve.
    fn load_asset_skin(&self, skin_name: &str) -> Result<SkinDescriptor, CommandError> {
        let dir = self.registry.skin_dir();
        if skin::ensure_skin_dir(dir).map_err(CommandError::SkinFolder)? {
            return Err(CommandError::SkinFolderCreated(dir.display().to_string()));
        }
        Ok(skin::resolve(skin_name, dir)?)
    }

    async fn create(&self, record: NpcRecord, level: Level) -> Result<(), CommandError> {
        let npc = NpcEntity::new(record, level, self.registry.world().clone());
        self.registry.register_unique(npc.clone()).await?;
        tracing::info!(
            "[npc] [created] id={} name={} skin_type={}",
            npc.id(),
            npc.record().name_tag,
            npc.record().skin_type
        );
        Ok(())
    }
}
