//! The scaling decision: a pure function of metrics, fleet size and config.
//!
//! ```text
//! disabled                        → no_change
//! current == 0 and from-zero bar  → scale_up (fast path)
//! current < max and (depth OR age over the up bar)      → scale_up
//! current > min and ((depth AND age under the down bar) OR idle) → scale_down
//! otherwise                       → no_change (pinned at a bound, or normal)
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use jobscale_state::{EventAction, MetricsSnapshot};

use crate::config::{ScalingStrategy, WorkerConfig};

pub const FROM_ZERO_TAG: &str = "scale_from_zero";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleAction {
    ScaleUp,
    ScaleDown,
    NoChange,
}

impl ScaleAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ScaleAction::ScaleUp => "scale_up",
            ScaleAction::ScaleDown => "scale_down",
            ScaleAction::NoChange => "no_change",
        }
    }
}

impl fmt::Display for ScaleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ScaleAction> for EventAction {
    fn from(action: ScaleAction) -> Self {
        match action {
            ScaleAction::ScaleUp => EventAction::ScaleUp,
            ScaleAction::ScaleDown => EventAction::ScaleDown,
            ScaleAction::NoChange => EventAction::NoChange,
        }
    }
}

/// An immutable scaling decision.
///
/// Fields are private so `scale_up` always grows, `scale_down` always
/// shrinks and `no_change` keeps the count. Replacing the target goes
/// through [`Decision::with_target`], which returns a new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    action: ScaleAction,
    from: u32,
    to: u32,
    reason: String,
}

impl Decision {
    /// `to` is raised to `from + 1` if it would not grow the fleet.
    pub fn scale_up(from: u32, to: u32, reason: impl Into<String>) -> Self {
        Self {
            action: ScaleAction::ScaleUp,
            from,
            to: to.max(from.saturating_add(1)),
            reason: reason.into(),
        }
    }

    /// `to` is lowered to `from - 1` if it would not shrink the fleet.
    pub fn scale_down(from: u32, to: u32, reason: impl Into<String>) -> Self {
        Self {
            action: ScaleAction::ScaleDown,
            from,
            to: to.min(from.saturating_sub(1)),
            reason: reason.into(),
        }
    }

    pub fn no_change(current: u32, reason: impl Into<String>) -> Self {
        Self {
            action: ScaleAction::NoChange,
            from: current,
            to: current,
            reason: reason.into(),
        }
    }

    pub fn action(&self) -> ScaleAction {
        self.action
    }

    pub fn from(&self) -> u32 {
        self.from
    }

    pub fn to(&self) -> u32 {
        self.to
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn delta(&self) -> i64 {
        i64::from(self.to) - i64::from(self.from)
    }

    pub fn is_change(&self) -> bool {
        self.action != ScaleAction::NoChange
    }

    pub fn is_from_zero(&self) -> bool {
        self.action == ScaleAction::ScaleUp && self.from == 0
    }

    /// Same decision with a different target, e.g. after clamping.
    pub fn with_target(&self, to: u32) -> Self {
        Self {
            to,
            ..self.clone()
        }
    }

    /// Same step size applied to a freshly observed fleet size.
    pub fn rebased(&self, from: u32, to: u32) -> Self {
        Self {
            from,
            to,
            reason: format!("{} (rebased from {})", self.reason, self.from),
            ..self.clone()
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} -> {} ({})", self.action, self.from, self.to, self.reason)
    }
}

/// Compute a decision. No I/O; identical inputs give identical output.
pub fn decide(metrics: &MetricsSnapshot, current: u32, config: &WorkerConfig) -> Decision {
    if !config.enabled {
        return Decision::no_change(current, "autoscaler disabled");
    }

    let up = scale_up_reasons(metrics, config);
    let down = scale_down_reason(metrics, config);

    if current == 0
        && config.scale_from_zero_configured()
        && let Some(decision) = from_zero(metrics, config, up.is_empty())
    {
        return decision;
    }

    if !up.is_empty() && current < config.max_workers {
        let to = scale_up_target(metrics, current, config);
        return Decision::scale_up(current, to, up.join(", "));
    }

    if let Some(reason) = &down
        && current > config.min_workers
    {
        let to = scale_down_target(metrics, current, config);
        return Decision::scale_down(current, to, reason.clone());
    }

    let reason = if !up.is_empty() {
        format!("at max_workers ({})", config.max_workers)
    } else if down.is_some() {
        format!("at min_workers ({})", config.min_workers)
    } else {
        "metrics within normal range".to_string()
    };
    Decision::no_change(current, reason)
}

/// Fast path for a cold fleet. `None` falls through to the ordinary checks.
fn from_zero(metrics: &MetricsSnapshot, config: &WorkerConfig, up_quiet: bool) -> Option<Decision> {
    let (Some(depth_bar), Some(latency_bar)) = (
        config.scale_from_zero_queue_depth,
        config.scale_from_zero_latency_seconds,
    ) else {
        return None;
    };

    if metrics.queue_depth < depth_bar || config.max_workers == 0 {
        return None;
    }

    let age = metrics.oldest_job_age_seconds;
    if age >= latency_bar {
        let to = config.clamp(config.scale_up_increment);
        return Some(Decision::scale_up(
            0,
            to,
            format!(
                "{FROM_ZERO_TAG}: queue_depth={} >= {depth_bar}, latency={age:.1}s >= {latency_bar:.1}s",
                metrics.queue_depth
            ),
        ));
    }

    // Give an already running peer the chance to claim a brand new job.
    up_quiet.then(|| {
        Decision::no_change(
            0,
            format!("{FROM_ZERO_TAG}: waiting, latency={age:.1}s < {latency_bar:.1}s"),
        )
    })
}

fn scale_up_reasons(metrics: &MetricsSnapshot, config: &WorkerConfig) -> Vec<String> {
    let mut reasons = Vec::new();
    if metrics.queue_depth >= config.scale_up_queue_depth {
        reasons.push(format!(
            "queue_depth={} >= {}",
            metrics.queue_depth, config.scale_up_queue_depth
        ));
    }
    if metrics.oldest_job_age_seconds >= config.scale_up_latency_seconds {
        reasons.push(format!(
            "latency={:.1}s >= {:.1}s",
            metrics.oldest_job_age_seconds, config.scale_up_latency_seconds
        ));
    }
    reasons
}

fn scale_down_reason(metrics: &MetricsSnapshot, config: &WorkerConfig) -> Option<String> {
    if metrics.is_idle() {
        return Some("idle (no queued or claimed jobs)".to_string());
    }
    let depth_low = metrics.queue_depth <= config.scale_down_queue_depth;
    let latency_low = metrics.oldest_job_age_seconds <= config.scale_down_latency_seconds;
    (depth_low && latency_low).then(|| {
        format!(
            "queue_depth={} <= {}, latency={:.1}s <= {:.1}s",
            metrics.queue_depth,
            config.scale_down_queue_depth,
            metrics.oldest_job_age_seconds,
            config.scale_down_latency_seconds
        )
    })
}

fn scale_up_target(metrics: &MetricsSnapshot, current: u32, config: &WorkerConfig) -> u32 {
    let step = match config.scaling_strategy {
        ScalingStrategy::Fixed | ScalingStrategy::StepFunction => config.scale_up_increment,
        ScalingStrategy::Proportional => {
            let jobs_over = metrics.queue_depth.saturating_sub(config.scale_up_queue_depth);
            let by_jobs = jobs_over.div_ceil(config.scale_up_jobs_per_worker.max(1));

            let latency_over =
                (metrics.oldest_job_age_seconds - config.scale_up_latency_seconds).max(0.0);
            let by_latency = (latency_over / config.scale_up_latency_per_worker).ceil() as u64;

            let needed = by_jobs.max(by_latency).max(u64::from(config.scale_up_increment));
            u32::try_from(needed).unwrap_or(u32::MAX)
        }
    };
    config.clamp(current.saturating_add(step))
}

fn scale_down_target(metrics: &MetricsSnapshot, current: u32, config: &WorkerConfig) -> u32 {
    let step = match config.scaling_strategy {
        ScalingStrategy::Fixed | ScalingStrategy::StepFunction => config.scale_down_decrement,
        ScalingStrategy::Proportional => {
            if metrics.is_idle() {
                return config.min_workers;
            }
            let jobs_under = config.scale_down_queue_depth.saturating_sub(metrics.queue_depth);
            let by_jobs = jobs_under / config.scale_down_jobs_per_worker.max(1);
            let needed = by_jobs.max(u64::from(config.scale_down_decrement));
            u32::try_from(needed).unwrap_or(u32::MAX)
        }
    };
    config.clamp(current.saturating_sub(step))
}
