//! Best-effort audit trail of orchestration outcomes.

use std::sync::Arc;

use async_trait::async_trait;
use jobscale_state::{ScaleEvent, SharedStore, StateStore};
use tracing::warn;

/// Append-only writer for [`ScaleEvent`]s.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn append(&self, event: &ScaleEvent) -> anyhow::Result<()>;
}

#[async_trait]
impl EventSink for StateStore {
    async fn append(&self, event: &ScaleEvent) -> anyhow::Result<()> {
        Ok(self.append_event(event)?)
    }
}

#[async_trait]
impl EventSink for SharedStore {
    async fn append(&self, event: &ScaleEvent) -> anyhow::Result<()> {
        Ok(self.append_event(event).await?)
    }
}

/// Write `event` to `sink`, logging instead of failing.
pub(crate) async fn append_best_effort(sink: &Arc<dyn EventSink>, event: &ScaleEvent) {
    if let Err(e) = sink.append(event).await {
        warn!(
            worker = %event.worker_name,
            action = event.action.as_str(),
            error = %e,
            "failed to record scale event"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use jobscale_state::EventAction;

    #[tokio::test]
    async fn state_store_is_a_sink() {
        let state = StateStore::open_in_memory().unwrap();
        let sink: Arc<dyn EventSink> = Arc::new(state.clone());
        append_best_effort(
            &sink,
            &ScaleEvent {
                worker_name: "default".to_string(),
                action: EventAction::ScaleUp,
                from_workers: 1,
                to_workers: 2,
                reason: "queue_depth=150 >= 100".to_string(),
                metrics: None,
                dry_run: false,
                created_at: Utc::now(),
            },
        )
        .await;
        let events = state.list_events(Some("default"), 10).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].to_workers, 2);
    }
}
