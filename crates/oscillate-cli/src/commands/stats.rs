//! Stats command - per-guild play statistics

use std::path::Path;

use anyhow::{Context, Result};
use oscillate_core::{GuildId, StateStore};

use super::data::{close_store, open_store};
use crate::output::{print_json, OutputContext, TopTrackRow};

const TOP_TRACKS: usize = 10;

/// Show totals, last activity, most active user and the top tracks of a guild
pub async fn stats(db_path: &Path, guild_id: GuildId, ctx: &OutputContext) -> Result<()> {
    let store = open_store(db_path).await?;
    let result = async {
        let stats = store.guild_stats(guild_id).await?;
        let top = store.top_tracks(guild_id, TOP_TRACKS).await?;
        Ok::<_, oscillate_core::OscillateError>((stats, top))
    }
    .await;
    close_store(&store).await;
    let (stats, top) =
        result.with_context(|| format!("Failed to read statistics for guild {}", guild_id))?;

    if ctx.is_json() {
        print_json(&serde_json::json!({
            "statistics": stats,
            "top_tracks": top,
        }));
        return Ok(());
    }

    ctx.header(&format!("Guild {} statistics", guild_id));
    let mut pairs = vec![
        ("Total tracks played", stats.total_tracks_played.to_string()),
        (
            "Total playtime",
            format!("{} seconds", stats.total_playtime_seconds),
        ),
        (
            "Last activity",
            stats.last_activity.unwrap_or_else(|| "-".to_string()),
        ),
    ];
    if let Some(user) = &stats.most_active_user {
        pairs.push((
            "Most active user",
            format!("{} ({} requests)", user.user_id, user.request_count),
        ));
    }
    ctx.print_kv(&pairs);

    println!();
    ctx.info("Top tracks:");
    let rows: Vec<TopTrackRow> = top
        .into_iter()
        .enumerate()
        .map(|(i, entry)| TopTrackRow {
            rank: i + 1,
            title: entry.track.title,
            plays: entry.play_count,
        })
        .collect();
    ctx.print(&rows);
    Ok(())
}
