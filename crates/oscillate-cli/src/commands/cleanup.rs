//! Cleanup command - prune old play history

use std::path::Path;

use anyhow::{Context, Result};

use super::data::{close_store, open_store};
use crate::output::{print_json, OutputContext};

/// Delete history rows older than `days`
pub async fn cleanup(db_path: &Path, days: u32, ctx: &OutputContext) -> Result<()> {
    let store = open_store(db_path).await?;
    let deleted = store.cleanup_old_history(days).await;
    close_store(&store).await;
    let deleted = deleted.context("Failed to clean up history")?;

    if ctx.is_json() {
        print_json(&serde_json::json!({ "deleted": deleted, "days": days }));
    } else {
        ctx.success(&format!("Cleaned up {} old records", deleted));
    }
    Ok(())
}
