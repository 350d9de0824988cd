//! Prometheus text exposition format.
//!
//! Renders backlog snapshots into the Prometheus text exposition format
//! for scraping by a Prometheus server or compatible agent.

use jobscale_state::MetricsSnapshot;

type Gauge = (&'static str, &'static str, fn(&MetricsSnapshot) -> String);

const GAUGES: &[Gauge] = &[
    ("jobscale_queue_depth", "Jobs ready but not yet claimed.", |s| {
        s.queue_depth.to_string()
    }),
    (
        "jobscale_oldest_job_age_seconds",
        "Age of the oldest ready job in seconds.",
        |s| format!("{:.2}", s.oldest_job_age_seconds),
    ),
    (
        "jobscale_jobs_completed_per_minute",
        "Jobs finished during the last minute.",
        |s| s.jobs_completed_per_minute.to_string(),
    ),
    ("jobscale_claimed_jobs", "Jobs currently claimed by a worker.", |s| {
        s.claimed_jobs.to_string()
    }),
    ("jobscale_failed_jobs", "Jobs in the failed state.", |s| {
        s.failed_jobs.to_string()
    }),
    ("jobscale_blocked_jobs", "Jobs blocked on a concurrency limit.", |s| {
        s.blocked_jobs.to_string()
    }),
    (
        "jobscale_active_workers",
        "Worker processes with a recent heartbeat.",
        |s| s.active_workers.to_string(),
    ),
];

/// Render `(worker group, snapshot)` pairs into Prometheus text format.
///
/// Produces GAUGE metrics with `worker` labels, plus a per-queue depth
/// series labelled with both `worker` and `queue`.
pub fn render_prometheus(snapshots: &[(String, MetricsSnapshot)]) -> String {
    let mut out = String::new();

    for (name, help, value) in GAUGES {
        out.push_str(&format!("# HELP {name} {help}\n"));
        out.push_str(&format!("# TYPE {name} gauge\n"));
        for (worker, s) in snapshots {
            out.push_str(&format!("{name}{{worker=\"{worker}\"}} {}\n", value(s)));
        }
    }

    out.push_str("# HELP jobscale_queue_depth_by_queue Ready jobs per queue.\n");
    out.push_str("# TYPE jobscale_queue_depth_by_queue gauge\n");
    for (worker, s) in snapshots {
        for (queue, depth) in &s.per_queue_depth {
            out.push_str(&format!(
                "jobscale_queue_depth_by_queue{{worker=\"{worker}\",queue=\"{queue}\"}} {depth}\n"
            ));
        }
    }

    out
}
