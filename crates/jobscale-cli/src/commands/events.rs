//! `jobscale events` and `jobscale prune-events`.

use anyhow::Result;
use chrono::{Duration, Utc};

use crate::runtime::State;

pub async fn list(state: &State, worker: Option<&str>, limit: usize) -> Result<()> {
    let events = state.list_events(worker, limit).await?;
    if events.is_empty() {
        println!("no scale events recorded");
        return Ok(());
    }
    for e in events {
        let dry = if e.dry_run { " [dry run]" } else { "" };
        println!(
            "{} {:<12} {:<10} {} -> {}  {}{dry}",
            e.created_at.format("%Y-%m-%d %H:%M:%S"),
            e.worker_name,
            e.action.as_str(),
            e.from_workers,
            e.to_workers,
            e.reason
        );
    }
    Ok(())
}

pub async fn prune(state: &State, older_than_days: u32) -> Result<()> {
    let cutoff = Utc::now() - Duration::days(i64::from(older_than_days));
    let removed = state.prune_events_before(cutoff).await?;
    println!("removed {removed} events older than {}", cutoff.to_rfc3339());
    Ok(())
}
