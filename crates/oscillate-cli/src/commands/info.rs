//! Info command - package version and features

use anyhow::Result;

use crate::output::{print_json, OutputContext};

pub const FEATURES: [&str; 7] = [
    "Audio filters rendered as ffmpeg graphs (EQ, bass boost, nightcore, 8D, echo, karaoke)",
    "Queue with shuffle, single and queue loop modes",
    "Prometheus metrics",
    "SQLite persistence with auto-save",
    "Idle timeout and shared ffmpeg process limits",
    "Adaptive bitrate under load",
    "Async runtime on tokio",
];

pub fn info(ctx: &OutputContext) -> Result<()> {
    let pairs = [
        ("Version", oscillate_core::VERSION.to_string()),
        ("Author", "rae1st".to_string()),
        ("Repository", "https://github.com/rae1st/oscillate".to_string()),
        ("License", "MIT".to_string()),
    ];

    if ctx.is_json() {
        let mut map: serde_json::Map<String, serde_json::Value> = pairs
            .iter()
            .map(|(k, v)| (k.to_lowercase(), serde_json::Value::String(v.clone())))
            .collect();
        map.insert("features".to_string(), serde_json::json!(FEATURES));
        print_json(&map);
        return Ok(());
    }

    ctx.header("oscillate audio streaming engine");
    ctx.print_kv(&pairs);
    println!();
    ctx.info("Features:");
    for feature in FEATURES {
        ctx.success(feature);
    }
    Ok(())
}
