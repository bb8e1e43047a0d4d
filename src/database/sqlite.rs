//! Embedded SQLite binding.
//!
//! Schema is created on connect. Booleans are stored as `INTEGER`, floats as
//! `REAL` (orientation round-trips exactly through f64), the skin as a JSON
//! text column.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;

use super::{
    keep_valid, skin_from_json, skin_to_json, skin_type_from_code, NpcStorage, StorageError,
    StorageKind, NPC_COLUMNS,
};
use crate::game::types::{NpcRecord, Position};

const KIND: StorageKind = StorageKind::Sqlite;

const CREATE_TABLE: &str = "
CREATE TABLE IF NOT EXISTS Npcs (
    Id TEXT PRIMARY KEY,
    NameTag TEXT NOT NULL,
    LevelName TEXT NOT NULL,
    X REAL NOT NULL,
    Y REAL NOT NULL,
    Z REAL NOT NULL,
    Pitch REAL NOT NULL,
    Yaw REAL NOT NULL,
    HeadYaw REAL NOT NULL,
    Scale REAL NOT NULL DEFAULT 1,
    SkinJson TEXT NOT NULL,
    IsVisible INTEGER NOT NULL,
    IsAlwaysShowName INTEGER NOT NULL,
    ActionId TEXT,
    SkinType SMALLINT NOT NULL DEFAULT 0,
    DisplayName TEXT NOT NULL,
    GeometryFileName TEXT
)";

fn upsert_sql() -> String {
    format!(
        "INSERT OR REPLACE INTO Npcs ({NPC_COLUMNS}) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
    )
}

#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// `location` is either a `sqlite:` URL or a plain file path. For a path
    /// the parent folder and the file are created when missing.
    pub async fn connect(location: &str) -> Result<Self, StorageError> {
        let options = if location.starts_with("sqlite:") {
            SqliteConnectOptions::from_str(location)
                .map_err(|e| StorageError::Configuration(format!("bad sqlite url: {e}")))?
        } else {
            let path = Path::new(location);
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| StorageError::unavailable(KIND, e))?;
            }
            SqliteConnectOptions::new().filename(path)
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options.create_if_missing(true))
            .await
            .map_err(|e| StorageError::unavailable(KIND, e))?;

        Self::from_pool(pool).await
    }

    /// Wrap an existing pool, making sure the table exists.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StorageError> {
        sqlx::query(CREATE_TABLE)
            .execute(&pool)
            .await
            .map_err(|e| StorageError::unavailable(KIND, e))?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn read_npc(row: &SqliteRow) -> Result<NpcRecord, StorageError> {
    let id: String = row
        .try_get("Id")
        .map_err(|e| StorageError::corrupt("<unknown>", e))?;
    let bad = |e: sqlx::Error| StorageError::corrupt(&id, e);

    let skin_json: String = row.try_get("SkinJson").map_err(bad)?;
    let skin_code: i16 = row.try_get("SkinType").map_err(bad)?;
    let visible: i64 = row.try_get("IsVisible").map_err(bad)?;
    let always: i64 = row.try_get("IsAlwaysShowName").map_err(bad)?;
    let pitch: f64 = row.try_get("Pitch").map_err(bad)?;
    let yaw: f64 = row.try_get("Yaw").map_err(bad)?;
    let head_yaw: f64 = row.try_get("HeadYaw").map_err(bad)?;
    let scale: f64 = row.try_get("Scale").map_err(bad)?;

    Ok(NpcRecord {
        name_tag: row.try_get("NameTag").map_err(bad)?,
        display_name: row.try_get("DisplayName").map_err(bad)?,
        level_name: row.try_get("LevelName").map_err(bad)?,
        position: Position {
            x: row.try_get("X").map_err(bad)?,
            y: row.try_get("Y").map_err(bad)?,
            z: row.try_get("Z").map_err(bad)?,
            pitch: pitch as f32,
            yaw: yaw as f32,
            head_yaw: head_yaw as f32,
        },
        scale: scale as f32,
        is_visible: visible != 0,
        is_always_show_name: always != 0,
        action_id: row.try_get("ActionId").map_err(bad)?,
        skin_type: skin_type_from_code(&id, skin_code)?,
        geometry_file_name: row.try_get("GeometryFileName").map_err(bad)?,
        skin: skin_from_json(&id, &skin_json)?,
        id,
    })
}

async fn write_npc<'e, E>(executor: E, record: &NpcRecord) -> Result<(), StorageError>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let skin_json = skin_to_json(record)?;
    let p = &record.position;
    sqlx::query(&upsert_sql())
        .bind(&record.id)
        .bind(&record.name_tag)
        .bind(&record.level_name)
        .bind(p.x)
        .bind(p.y)
        .bind(p.z)
        .bind(f64::from(p.pitch))
        .bind(f64::from(p.yaw))
        .bind(f64::from(p.head_yaw))
        .bind(f64::from(record.scale))
        .bind(skin_json)
        .bind(i64::from(record.is_visible))
        .bind(i64::from(record.is_always_show_name))
        .bind(record.action_id.as_deref())
        .bind(record.skin_type.as_i16())
        .bind(&record.display_name)
        .bind(record.geometry_file_name.as_deref())
        .execute(executor)
        .await
        .map_err(|e| StorageError::unavailable(KIND, e))?;
    Ok(())
}

#[async_trait]
impl NpcStorage for SqliteStorage {
    fn kind(&self) -> StorageKind {
        KIND
    }

    async fn load_all(&self) -> Result<Vec<NpcRecord>, StorageError> {
        let rows = sqlx::query(&format!("SELECT {NPC_COLUMNS} FROM Npcs"))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::unavailable(KIND, e))?;
        Ok(keep_valid(KIND, rows.iter().map(read_npc)))
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<NpcRecord>, StorageError> {
        let row = sqlx::query(&format!("SELECT {NPC_COLUMNS} FROM Npcs WHERE Id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::unavailable(KIND, e))?;
        row.as_ref().map(read_npc).transpose()
    }

    async fn save(&self, record: &NpcRecord) -> Result<(), StorageError> {
        write_npc(&self.pool, record).await
    }

    async fn save_all(&self, records: &[NpcRecord]) -> Result<(), StorageError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::unavailable(KIND, e))?;
        for record in records {
            // Dropping `tx` on error rolls the whole batch back.
            write_npc(&mut *tx, record).await?;
        }
        tx.commit()
            .await
            .map_err(|e| StorageError::unavailable(KIND, e))
    }

    async fn delete(&self, id: &str) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM Npcs WHERE Id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::unavailable(KIND, e))?;
        Ok(())
    }
}
