//! Read-only views: `metrics`, `workers`, `list`.

use std::collections::BTreeMap;

use anyhow::Result;
use clap::ValueEnum;

use jobscale_autoscale::Autoscaler;
use jobscale_metrics::{MetricsSnapshot, render_prometheus};

use super::select;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum MetricsFormat {
    #[default]
    Text,
    Prometheus,
    Json,
}

pub async fn metrics(autoscaler: &Autoscaler, worker: Option<&str>, format: MetricsFormat) -> Result<()> {
    let mut snapshots: Vec<(String, MetricsSnapshot)> = Vec::new();
    for name in select(autoscaler, worker)? {
        snapshots.push((name.to_string(), autoscaler.metrics(name).await?));
    }

    match format {
        MetricsFormat::Prometheus => print!("{}", render_prometheus(&snapshots)),
        MetricsFormat::Json => {
            let by_worker: BTreeMap<_, _> = snapshots.into_iter().collect();
            println!("{}", serde_json::to_string_pretty(&by_worker)?);
        }
        MetricsFormat::Text => {
            for (name, m) in &snapshots {
                println!("{name}");
                println!("  queue depth:       {}", m.queue_depth);
                println!("  oldest job age:    {:.1}s", m.oldest_job_age_seconds);
                println!("  completed/minute:  {}", m.jobs_completed_per_minute);
                println!("  claimed:           {}", m.claimed_jobs);
                println!("  failed:            {}", m.failed_jobs);
                println!("  blocked:           {}", m.blocked_jobs);
                println!("  active workers:    {}", m.active_workers);
                for (queue, depth) in &m.per_queue_depth {
                    println!("    {queue}: {depth}");
                }
            }
        }
    }
    Ok(())
}

pub async fn workers(autoscaler: &Autoscaler, worker: Option<&str>) -> Result<()> {
    for name in select(autoscaler, worker)? {
        let current = autoscaler.current_workers(name).await?;
        println!("{name}: {current}");
    }
    Ok(())
}

pub fn list(autoscaler: &Autoscaler) -> Result<()> {
    println!(
        "{:<20} {:<12} {:>5} {:>5} {:<14} {:<8} {:<7}",
        "WORKER", "ADAPTER", "MIN", "MAX", "STRATEGY", "ENABLED", "DRY RUN"
    );
    for name in autoscaler.registered_workers() {
        let Some(scaler) = autoscaler.get(name) else {
            continue;
        };
        let c = scaler.config();
        println!(
            "{:<20} {:<12} {:>5} {:>5} {:<14} {:<8} {:<7}",
            c.name,
            scaler.adapter().name(),
            c.min_workers,
            c.max_workers,
            c.scaling_strategy.as_str(),
            c.enabled,
            c.dry_run
        );
    }
    Ok(())
}
