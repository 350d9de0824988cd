//! `jobscale cooldown show|reset`.

use anyhow::Result;
use chrono::{DateTime, Utc};

use jobscale_autoscale::{Autoscaler, Direction};

use super::select;

fn stamp(at: Option<DateTime<Utc>>) -> String {
    at.map_or_else(|| "never".to_string(), |t| t.to_rfc3339())
}

pub async fn show(autoscaler: &Autoscaler, worker: Option<&str>) -> Result<()> {
    for name in select(autoscaler, worker)? {
        let Some(scaler) = autoscaler.get(name) else {
            continue;
        };
        let state = scaler.cooldown_state().await;
        println!("{name}");
        for direction in [Direction::Up, Direction::Down] {
            let remaining = scaler.cooldown_remaining(direction).await;
            println!(
                "  {:<10} last={} remaining={}s",
                direction.as_str(),
                stamp(state.last(direction)),
                remaining.as_secs()
            );
        }
    }
    Ok(())
}

pub async fn reset(autoscaler: &Autoscaler, worker: Option<&str>) -> Result<()> {
    autoscaler.reset_cooldowns(worker).await?;
    match worker {
        Some(name) => println!("cooldowns reset for {name}"),
        None => println!("cooldowns reset for all workers"),
    }
    Ok(())
}
