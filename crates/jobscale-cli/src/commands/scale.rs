//! `jobscale scale` and `jobscale scale-all` — trigger orchestration runs.

use anyhow::{Result, bail};

use jobscale_autoscale::{Autoscaler, ScaleResult};

fn report(result: &ScaleResult) {
    println!("{}", result.summary());
}

/// Run one worker group. With `wait`, block until its lock is free.
pub async fn scale(autoscaler: &Autoscaler, worker: &str, wait: bool) -> Result<()> {
    let result = if wait {
        autoscaler.scale_wait(worker).await?
    } else {
        autoscaler.scale(worker).await?
    };
    report(&result);
    if !result.is_success() {
        bail!("scale run for '{worker}' failed");
    }
    Ok(())
}

pub async fn scale_all(autoscaler: &Autoscaler) -> Result<()> {
    let results = autoscaler.scale_all().await;
    results.iter().for_each(report);

    let failed: Vec<&str> = results
        .iter()
        .filter(|r| !r.is_success())
        .map(ScaleResult::worker)
        .collect();
    if !failed.is_empty() {
        bail!("scale run failed for: {}", failed.join(", "));
    }
    Ok(())
}
