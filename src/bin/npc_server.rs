use std::path::Path;
use std::sync::Arc;
use anyhow::{Context, Result};
use npckeeper::config::NpcConfig;
use npckeeper::database::open_storage;
use npckeeper::game::registry::NpcRegistry;
use npckeeper::game::world::LocalWorld;
use npckeeper::skin;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_ansi(std::io::IsTerminal::is_terminal(&std::io::stderr()))
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut conf_file = "conf/npc.yaml".to_string();

    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "--h" | "--?" | "/?" => {
                println!("Usage: npc_server [--conf FILE]");
                return Ok(());
            }
            "--conf" => {
                if i + 1 < args.len() {
                    i += 1;
                    conf_file = args[i].clone();
                } else {
                    eprintln!("Error: --conf requires a FILE argument");
                    return Ok(());
                }
            }
            _ => {}
        }
        i += 1;
    }

    let config = NpcConfig::from_file(&conf_file)
        .with_context(|| format!("Cannot load config: {}", conf_file))?;

    let storage = open_storage(&config.storage_type, &config.storage_location)
        .await
        .with_context(|| format!("Cannot open {} storage", config.storage_type))?;

    skin::ensure_skin_dir(Path::new(&config.skin_dir))
        .with_context(|| format!("Cannot create skin folder: {}", config.skin_dir))?;

    let world = Arc::new(LocalWorld::new(config.levels.iter().cloned()));
    let registry = Arc::new(NpcRegistry::new(storage, world, &config.skin_dir));

    let loaded = registry.load_all().await.context("Cannot load NPCs")?;
    tracing::info!(
        "[npc] [started] NPC Server Started storage={} npcs={}",
        config.storage_type,
        loaded
    );

    tokio::signal::ctrl_c().await.context("Cannot listen for shutdown signal")?;
    tracing::info!("[npc] [stopping] saving NPCs");

    if let Err(e) = registry.save_all().await {
        tracing::error!("[npc] [save_on_exit_failed] {}", e);
    }
    registry.shutdown().await;

    tracing::info!("[npc] [stopped]");
    Ok(())
}
