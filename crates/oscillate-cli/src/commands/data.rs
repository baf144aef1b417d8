//! Export and import of per-guild data

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use oscillate_core::store::GuildExport;
use oscillate_core::{GuildId, SqliteStore, StateStore};

use crate::output::{print_json, OutputContext};

/// File written when no output path is given
pub fn default_export_path(guild_id: GuildId) -> PathBuf {
    PathBuf::from(format!("guild_{}_export.json", guild_id))
}

/// Write everything stored for a guild to a JSON file
pub async fn export_data(
    db_path: &Path,
    guild_id: GuildId,
    output: Option<&Path>,
    ctx: &OutputContext,
) -> Result<()> {
    let store = open_store(db_path).await?;
    let export = store
        .export_guild(guild_id)
        .await
        .with_context(|| format!("Failed to export guild {}", guild_id));
    close_store(&store).await;
    let export = export?;

    let path = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_export_path(guild_id));
    let json = serde_json::to_string_pretty(&export)?;
    std::fs::write(&path, json)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    if ctx.is_json() {
        print_json(&serde_json::json!({
            "guild_id": guild_id,
            "file": path,
            "history_entries": export.track_history.len(),
        }));
    } else {
        ctx.success(&format!("Data exported to {}", path.display()));
    }
    Ok(())
}

/// Load an export file into the database
pub async fn import_data(file: &Path, db_path: &Path, ctx: &OutputContext) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let export: GuildExport = serde_json::from_str(&content)
        .with_context(|| format!("{} is not a guild export", file.display()))?;
    let guild_id = export.guild_id;

    let store = open_store(db_path).await?;
    let imported = store.import_guild(export).await;
    close_store(&store).await;
    let imported = imported.with_context(|| format!("Failed to import guild {}", guild_id))?;

    if ctx.is_json() {
        print_json(&serde_json::json!({
            "guild_id": guild_id,
            "history_entries": imported,
        }));
    } else {
        ctx.success(&format!(
            "Data imported from {} ({} history entries for guild {})",
            file.display(),
            imported,
            guild_id
        ));
    }
    Ok(())
}

pub(crate) async fn open_store(db_path: &Path) -> Result<SqliteStore> {
    let store = SqliteStore::new(db_path);
    store
        .initialize()
        .await
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;
    Ok(store)
}

pub(crate) async fn close_store(store: &SqliteStore) {
    if let Err(e) = store.close().await {
        tracing::warn!("Failed to close database: {}", e);
    }
}
