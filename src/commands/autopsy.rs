use anyhow::{Context, Result};

use obscura::engine::DiscoveryEngine;

use super::{print_json, OutputFormat};

pub async fn autopsy(
    engine: &DiscoveryEngine,
    channel_id: String,
    format: OutputFormat,
) -> Result<()> {
    let fingerprint = engine
        .autopsy(&channel_id)
        .await
        .with_context(|| format!("Autopsy of {channel_id} failed"))?;

    if format == OutputFormat::Json {
        return print_json(&fingerprint);
    }

    println!("Channel autopsy: {channel_id}");
    println!("================================");
    println!("  Uploads analysed: {}", fingerprint.upload_timestamps.len());
    println!("  Bot likelihood:   {}/100", fingerprint.bot_likelihood);
    println!("  Pattern:          {}", fingerprint.pattern);
    match fingerprint.interval_variance_score {
        Some(cv) => println!("  Interval CV:      {cv:.3}"),
        None => println!("  Interval CV:      n/a (too few uploads)"),
    }
    match fingerprint.dormant_days {
        Some(days) => println!("  Dormant for:      {days} days"),
        None => println!("  Dormant for:      n/a"),
    }
    if !fingerprint.burst_days.is_empty() {
        let days: Vec<String> = fingerprint
            .burst_days
            .iter()
            .map(|d| d.format("%Y-%m-%d").to_string())
            .collect();
        println!("  Burst days:       {}", days.join(", "));
    }
    if !fingerprint.flags.is_empty() {
        println!("  Flags:            {}", fingerprint.flags.join(", "));
    }
    Ok(())
}
