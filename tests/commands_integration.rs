use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use npckeeper::database::json::JsonStorage;
use npckeeper::database::{NpcStorage, StorageError, StorageKind};
use npckeeper::game::actions::ActionRegistry;
use npckeeper::game::commands::{CommandError, NpcCommands, NpcSettings};
use npckeeper::game::registry::NpcRegistry;
use npckeeper::game::types::{NpcRecord, Player, Position, SkinType};
use npckeeper::game::world::LocalWorld;
use npckeeper::skin::SkinDescriptor;

struct Harness {
    dir: TempDir,
    world: Arc<LocalWorld>,
    storage: Arc<dyn NpcStorage>,
    actions: Arc<ActionRegistry>,
    commands: NpcCommands,
}

impl Harness {
    fn skin_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("npc_skins")
    }
}

/// JSON storage whose `load_all` is slow, so a reload holds the registry
/// writer lock long enough for other commands to queue behind it.
struct SlowLoadStorage {
    inner: JsonStorage,
    delay: Duration,
}

#[async_trait]
impl NpcStorage for SlowLoadStorage {
    fn kind(&self) -> StorageKind {
        StorageKind::Json
    }

    async fn load_all(&self) -> Result<Vec<NpcRecord>, StorageError> {
        tokio::time::sleep(self.delay).await;
        self.inner.load_all().await
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<NpcRecord>, StorageError> {
        self.inner.get_by_id(id).await
    }

    async fn save(&self, record: &NpcRecord) -> Result<(), StorageError> {
        self.inner.save(record).await
    }

    async fn save_all(&self, records: &[NpcRecord]) -> Result<(), StorageError> {
        self.inner.save_all(records).await
    }

    async fn delete(&self, id: &str) -> Result<(), StorageError> {
        self.inner.delete(id).await
    }
}

async fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let storage: Arc<dyn NpcStorage> = Arc::new(JsonStorage::open(dir.path().join("npc_db")).await.unwrap());
    harness_with(dir, storage)
}

async fn slow_load_harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let storage: Arc<dyn NpcStorage> = Arc::new(SlowLoadStorage {
        inner: JsonStorage::open(dir.path().join("npc_db")).await.unwrap(),
        delay: Duration::from_millis(300),
    });
    harness_with(dir, storage)
}

fn harness_with(dir: TempDir, storage: Arc<dyn NpcStorage>) -> Harness {
    let world = Arc::new(LocalWorld::new(["world", "lobby"]));
    let registry = Arc::new(NpcRegistry::new(storage.clone(), world.clone(), dir.path().join("npc_skins")));
    let actions = Arc::new(ActionRegistry::new());
    let commands = NpcCommands::new(registry, actions.clone());
    Harness { dir, world, storage, actions, commands }
}

fn commander(skin: SkinDescriptor) -> Player {
    Player::new("admin", "world", Position::new(12.5, 70.0, -4.0).with_rotation(10.0, 90.0, 90.0)).with_skin(skin)
}

fn live_skin() -> SkinDescriptor {
    SkinDescriptor::builder("admin.skin").texture(vec![7; 64 * 64 * 4], 64, 64).build()
}

const GUARD_GEOMETRY: &str = r#"{
    "format_version": "1.12.0",
    "minecraft:geometry": [
        { "description": { "identifier": "geometry.unknown" }, "bones": [] }
    ]
}"#;

fn write_guard_assets(dir: &Path) {
    std::fs::create_dir_all(dir).unwrap();
    image::RgbaImage::from_pixel(64, 64, image::Rgba([200, 10, 10, 255]))
        .save(dir.join("guard.png"))
        .unwrap();
    std::fs::write(dir.join("guard.json"), GUARD_GEOMETRY).unwrap();
}

#[tokio::test]
async fn test_create_from_live_skin_persists_texture() {
    let h = harness().await;
    let admin = commander(live_skin());

    let msg = h
        .commands
        .create_from_player(&admin, "Bob", "Bob the Guide", SkinType::PersistentSkin)
        .await
        .unwrap();
    assert!(msg.contains("Bob"));

    let npc = h.commands.registry().find_by_name("Bob").await.unwrap();
    assert!(npc.is_spawned());
    assert_eq!(npc.record().skin_type, SkinType::PersistentSkin);
    assert_eq!(npc.record().position, admin.position);

    h.commands.registry().flush().await;
    let stored = h.storage.get_by_id(npc.id()).await.unwrap().unwrap();
    assert_eq!(stored.skin.texture, live_skin().texture);
    assert_eq!(stored.skin_type, SkinType::PersistentSkin);
}

#[tokio::test]
async fn test_create_from_asset_uses_namespaced_geometry() {
    let h = harness().await;
    write_guard_assets(&h.skin_dir());

    h.commands
        .create_from_asset(&commander(live_skin()), "Sam", "Guard Sam", "guard")
        .await
        .unwrap();

    let npc = h.commands.registry().find_by_name("sam").await.unwrap();
    let rec = npc.record();
    assert_eq!(rec.skin_type, SkinType::PersistentSkin);
    assert_eq!(rec.geometry_file_name.as_deref(), Some("guard.json"));
    assert_eq!(rec.skin.geometry_name.as_deref(), Some("geometry.guard"));
    assert_eq!((rec.skin.width, rec.skin.height), (64, 64));
}

#[tokio::test]
async fn test_duplicate_name_is_rejected_without_write() {
    let h = harness().await;
    let admin = commander(live_skin());
    h.commands
        .create_from_player(&admin, "Bob", "Bob", SkinType::PlayerSkin)
        .await
        .unwrap();

    let err = h
        .commands
        .create_from_player(&admin, "BOB", "Other Bob", SkinType::PersistentSkin)
        .await
        .unwrap_err();
    assert!(matches!(err, CommandError::DuplicateName(ref n) if n == "BOB"));

    h.commands.registry().flush().await;
    assert_eq!(h.storage.load_all().await.unwrap().len(), 1);
    assert_eq!(h.commands.registry().len().await, 1);
}

#[tokio::test]
async fn test_first_asset_use_creates_skin_folder() {
    let h = harness().await;
    assert!(!h.skin_dir().exists());

    let err = h
        .commands
        .create_from_asset(&commander(live_skin()), "Sam", "Sam", "guard")
        .await
        .unwrap_err();
    assert!(matches!(err, CommandError::SkinFolderCreated(_)));
    assert!(h.skin_dir().is_dir());
    assert!(h.commands.registry().is_empty().await);
}

#[tokio::test]
async fn test_missing_texture_is_reported_before_any_write() {
    let h = harness().await;
    std::fs::create_dir_all(h.skin_dir()).unwrap();

    let err = h
        .commands
        .create_from_asset(&commander(live_skin()), "Sam", "Sam", "nobody")
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Missing texture file 'nobody.png'");

    h.commands.registry().flush().await;
    assert!(h.storage.load_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_level_is_rejected() {
    let h = harness().await;
    let stray = Player::new("admin", "nether", Position::default());
    let err = h
        .commands
        .create_from_player(&stray, "Bob", "Bob", SkinType::PlayerSkin)
        .await
        .unwrap_err();
    assert!(matches!(err, CommandError::UnresolvableLevel(ref l) if l == "nether"));
}

#[tokio::test]
async fn test_remove_deletes_from_storage() {
    let h = harness().await;
    let admin = commander(live_skin());
    h.commands
        .create_from_player(&admin, "Bob", "Bob", SkinType::PersistentSkin)
        .await
        .unwrap();
    let npc = h.commands.registry().find_by_name("Bob").await.unwrap();

    h.commands.remove("bob").await.unwrap();
    h.commands.registry().flush().await;
    assert!(h.storage.get_by_id(npc.id()).await.unwrap().is_none());
    assert!(!h.world.is_spawned(npc.runtime_id()));

    let err = h.commands.remove("bob").await.unwrap_err();
    assert!(matches!(err, CommandError::NotFound(_)));
}

#[tokio::test]
async fn test_goto_and_tp() {
    let h = harness().await;
    let admin = commander(live_skin());
    h.world.join(admin.clone());
    h.commands
        .create_from_player(&admin, "Bob", "Bob", SkinType::PersistentSkin)
        .await
        .unwrap();

    let mut moved_admin = admin.clone();
    moved_admin.level_name = "lobby".into();
    moved_admin.position = Position::new(-20.0, 65.0, 8.0);
    h.commands.teleport_here(&moved_admin, "Bob").await.unwrap();

    let npc = h.commands.registry().find_by_name("Bob").await.unwrap();
    assert_eq!(npc.record().level_name, "lobby");
    assert_eq!(npc.record().position, moved_admin.position);
    assert!(h.world.is_spawned(npc.runtime_id()));

    h.commands.goto(&admin, "Bob").await.unwrap();
    assert_eq!(h.world.player("admin").unwrap().position, moved_admin.position);

    h.commands.registry().flush().await;
    let stored = h.storage.get_by_id(npc.id()).await.unwrap().unwrap();
    assert_eq!(stored.level_name, "lobby");
}

#[tokio::test]
async fn test_set_skin_from_asset_and_player() {
    let h = harness().await;
    write_guard_assets(&h.skin_dir());
    let admin = commander(live_skin());
    h.commands
        .create_from_player(&admin, "Bob", "Bob", SkinType::PlayerSkin)
        .await
        .unwrap();

    let msg = h.commands.set_skin_from_asset("Bob", "guard").await.unwrap();
    assert!(msg.contains("and geometry"));
    let npc = h.commands.registry().find_by_name("Bob").await.unwrap();
    assert_eq!(npc.record().skin_type, SkinType::PersistentSkin);
    assert_eq!(npc.record().geometry_file_name.as_deref(), Some("guard.json"));
    assert_eq!(npc.record().skin.skin_id, "guard.Custom");

    h.commands.set_skin_from_player(&admin, "Bob").await.unwrap();
    let npc = h.commands.registry().find_by_name("Bob").await.unwrap();
    assert_eq!(npc.record().skin, live_skin());
    assert!(npc.record().geometry_file_name.is_none());
}

#[tokio::test]
async fn test_bind_requires_registered_action() {
    let h = harness().await;
    let admin = commander(live_skin());
    h.commands
        .create_from_player(&admin, "Bob", "Bob", SkinType::PersistentSkin)
        .await
        .unwrap();

    let err = h.commands.bind("Bob", "open-shop").await.unwrap_err();
    assert!(matches!(err, CommandError::UnknownAction(_)));

    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    h.actions.register("open-shop", move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    h.commands.bind("Bob", "open-shop").await.unwrap();

    let npc = h.commands.registry().find_by_name("Bob").await.unwrap();
    let stored = h.storage.get_by_id(npc.id()).await.unwrap().unwrap();
    assert_eq!(stored.action_id.as_deref(), Some("open-shop"));

    assert!(h.commands.on_player_hit(&admin, npc.runtime_id()).await);
    assert!(!h.commands.on_player_hit(&admin, -1).await);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_update_settings_saves_and_reloads() {
    let h = harness().await;
    let admin = commander(live_skin());
    h.commands
        .create_from_player(&admin, "Bob", "Bob", SkinType::PersistentSkin)
        .await
        .unwrap();
    let before = h.commands.registry().find_by_name("Bob").await.unwrap();

    let mut settings = NpcSettings::from_record(before.record());
    settings.display_name = "Bob the Banker".into();
    settings.is_always_show_name = true;
    settings.action_id = Some("  ".into());
    h.commands.update_settings("Bob", settings).await.unwrap();

    let after = h.commands.registry().find_by_name("Bob").await.unwrap();
    assert_eq!(after.id(), before.id());
    assert_ne!(after.runtime_id(), before.runtime_id());
    assert_eq!(after.record().display_name, "Bob the Banker");
    assert!(after.record().is_always_show_name);
    assert!(after.record().action_id.is_none());

    let stored = h.storage.get_by_id(before.id()).await.unwrap().unwrap();
    assert_eq!(stored.display_name, "Bob the Banker");
}

#[tokio::test]
async fn test_list_and_reload() {
    let h = harness().await;
    assert_eq!(h.commands.list().await, "There are no NPCs currently loaded");

    let admin = commander(live_skin());
    for name in ["Zed", "amy"] {
        h.commands
            .create_from_player(&admin, name, name, SkinType::PersistentSkin)
            .await
            .unwrap();
    }

    let list = h.commands.list().await;
    let amy = list.find("amy").unwrap();
    let zed = list.find("Zed").unwrap();
    assert!(amy < zed);

    let msg = h.commands.reload().await.unwrap();
    assert!(msg.contains("2 loaded"));
    assert!(h.commands.help().contains("/npc bind"));
}

#[tokio::test]
async fn test_tp_after_concurrent_remove_does_not_resurrect() {
    let h = Arc::new(slow_load_harness().await);
    let admin = commander(live_skin());
    h.commands
        .create_from_player(&admin, "Bob", "Bob", SkinType::PersistentSkin)
        .await
        .unwrap();
    let id = h.commands.registry().find_by_name("Bob").await.unwrap().id().to_string();

    // Hold the writer lock with a slow reload, queue a remove, then a tp.
    let reload = {
        let h = h.clone();
        tokio::spawn(async move { h.commands.reload().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    let remove = {
        let h = h.clone();
        tokio::spawn(async move { h.commands.remove("Bob").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut lobby_admin = admin.clone();
    lobby_admin.level_name = "lobby".into();
    let tp = h.commands.teleport_here(&lobby_admin, "Bob").await;

    reload.await.unwrap().unwrap();
    remove.await.unwrap().unwrap();
    assert!(matches!(tp, Err(CommandError::NotFound(_))));

    h.commands.registry().flush().await;
    assert!(h.commands.registry().get_by_id(&id).await.is_none());
    assert!(h.storage.get_by_id(&id).await.unwrap().is_none());
    assert_eq!(h.world.spawned_count(), 0);
}

#[tokio::test]
async fn test_concurrent_edits_keep_both_changes() {
    let h = harness().await;
    let admin = commander(live_skin());
    h.commands
        .create_from_player(&admin, "Bob", "Bob", SkinType::PersistentSkin)
        .await
        .unwrap();
    h.actions.register("wave", |_, _| {});

    let mut lobby_admin = admin.clone();
    lobby_admin.level_name = "lobby".into();
    let (bound, moved) = tokio::join!(
        h.commands.bind("Bob", "wave"),
        h.commands.teleport_here(&lobby_admin, "Bob"),
    );
    bound.unwrap();
    moved.unwrap();

    let npc = h.commands.registry().find_by_name("Bob").await.unwrap();
    assert_eq!(npc.record().action_id.as_deref(), Some("wave"));
    assert_eq!(npc.record().level_name, "lobby");
    assert!(h.world.is_spawned(npc.runtime_id()));

    h.commands.registry().flush().await;
    let stored = h.storage.get_by_id(npc.id()).await.unwrap().unwrap();
    assert_eq!(stored.action_id.as_deref(), Some("wave"));
    assert_eq!(stored.level_name, "lobby");
}

#[tokio::test]
async fn test_create_during_reload_leaves_no_stray_entity() {
    let h = Arc::new(slow_load_harness().await);
    let admin = commander(live_skin());

    let reload = {
        let h = h.clone();
        tokio::spawn(async move { h.commands.reload().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    h.commands
        .create_from_player(&admin, "Bob", "Bob", SkinType::PersistentSkin)
        .await
        .unwrap();
    reload.await.unwrap().unwrap();

    let npc = h.commands.registry().find_by_name("Bob").await.unwrap();
    assert!(h.world.is_spawned(npc.runtime_id()));
    assert_eq!(h.world.spawned_count(), 1);
}
