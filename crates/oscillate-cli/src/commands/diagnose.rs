//! Diagnose command - check the ffmpeg and libopus runtime

use anyhow::Result;
use oscillate_core::{ffmpeg, opus};

use crate::output::{print_json, CheckRow, OutputContext};

/// Run the system checks. Returns false when ffmpeg or libopus is missing.
pub async fn diagnose(ffmpeg_path: Option<&str>, ctx: &OutputContext) -> Result<bool> {
    let mut checks = Vec::new();

    let (ffmpeg_ok, version) = ffmpeg::check_availability(ffmpeg_path).await;
    checks.push(CheckRow::new(
        "ffmpeg",
        ffmpeg_ok,
        match version {
            Some(version) => format!("version {}", version),
            None => "not found or not working, see https://ffmpeg.org/download.html".to_string(),
        },
    ));

    // Only meaningful once the binary runs
    if ffmpeg_ok {
        let pipeline_ok = ffmpeg::probe_pipeline(ffmpeg_path).await;
        if !pipeline_ok {
            ctx.warn("ffmpeg runs but could not decode a test source; playback may fail");
        }
        checks.push(CheckRow::new(
            "ffmpeg pipeline",
            pipeline_ok,
            if pipeline_ok {
                "lavfi source decoded"
            } else {
                "test pipeline failed"
            },
        ));
    }

    let opus_library = opus::find_library();
    checks.push(CheckRow::new(
        "libopus",
        opus_library.is_some(),
        match &opus_library {
            Some(path) => path.display().to_string(),
            None => "not found, install libopus0 (Debian) or libopus-dev".to_string(),
        },
    ));

    let ready = ffmpeg_ok && opus_library.is_some();

    if ctx.is_json() {
        print_json(&serde_json::json!({
            "ready": ready,
            "checks": checks,
        }));
        return Ok(ready);
    }

    ctx.header("oscillate system diagnostics");
    ctx.print(&checks);
    println!();
    if ready {
        ctx.success("All checks passed, oscillate is ready to use");
    } else {
        let missing: Vec<&str> = checks
            .iter()
            .filter(|c| !c.is_ok())
            .map(|c| c.check.as_str())
            .collect();
        ctx.error(&format!("Missing dependencies: {}", missing.join(", ")));
    }

    Ok(ready)
}
