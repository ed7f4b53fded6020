use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::time::sleep;
use tracing::{info, warn};
use uuid::Uuid;

use crate::notify::{Audience, PushMessage};
use crate::state::AppState;

/// Periodic sweep for deliveries stuck unassigned past the threshold.
/// Runs once at startup, then on the configured interval, forever. A failed
/// sweep is logged and the schedule continues.
pub async fn run_watchdog(state: Arc<AppState>, interval: Duration, threshold: Duration) {
    info!(
        interval_secs = interval.as_secs(),
        threshold_secs = threshold.as_secs(),
        "watchdog started"
    );

    loop {
        let flagged = sweep(&state, threshold);
        if flagged > 0 {
            warn!(flagged, "unassigned deliveries past threshold");
        }
        sleep(interval).await;
    }
}

/// One pass: flag and notify each stale unassigned delivery exactly once.
/// The persisted flag makes re-runs (and restarts) idempotent.
pub fn sweep(state: &AppState, threshold: Duration) -> usize {
    let cutoff = Utc::now()
        - chrono::Duration::from_std(threshold).unwrap_or_else(|_| chrono::Duration::minutes(30));

    let stale = state.deliveries.stale_unassigned(cutoff);
    for delivery in &stale {
        state.notifier.dispatch(
            Audience::ActiveStaff,
            PushMessage {
                title: "Mission non assignee depuis 30 min".to_string(),
                body: format!(
                    "Livraison #{} attend toujours un livreur",
                    short_ref(delivery.id)
                ),
                data: json!({ "type": "assignment_timer", "delivery_id": delivery.id }),
            },
        );
        state.deliveries.mark_watchdog_alerted(delivery.id);
        state.metrics.watchdog_alerts_total.inc();
    }

    stale.len()
}

fn short_ref(id: Uuid) -> String {
    let simple = id.simple().to_string();
    simple[simple.len() - 6..].to_uppercase()
}
