//! Recurring optimization
//!
//! Every tick, one task per running auto-pilot experiment runs
//! [`Engine::optimize`] concurrently. A tick waits for its tasks before the
//! next tick is taken, and missed ticks are skipped, so passes for one
//! experiment never overlap.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::aggregator::EventLog;
use crate::kv::KvStore;
use crate::Engine;

/// Handle of a running scheduler.
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop after the current tick finishes and wait for it.
    pub async fn shutdown(self) {
        // The loop may already be gone; nothing left to signal then.
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "optimizer scheduler ended abnormally");
        }
    }
}

/// Start optimizing every running auto-pilot experiment each `period`.
///
/// The first pass runs one `period` after the call. Must be called from
/// within a tokio runtime.
pub fn spawn<S, L>(engine: Arc<Engine<S, L>>, period: Duration) -> SchedulerHandle
where
    S: KvStore + 'static,
    L: EventLog + 'static,
{
    let (shutdown, mut stop) = watch::channel(false);
    let task = tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(period_ms = period.as_millis(), "optimizer scheduler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => run_tick(&engine).await,
                _ = stop.changed() => break,
            }
        }
        info!("optimizer scheduler stopped");
    });
    SchedulerHandle { shutdown, task }
}

async fn run_tick<S, L>(engine: &Arc<Engine<S, L>>)
where
    S: KvStore + 'static,
    L: EventLog + 'static,
{
    let experiments = engine.registry().auto_pilot_running();
    if experiments.is_empty() {
        return;
    }

    let mut passes = JoinSet::new();
    for experiment_id in experiments {
        let engine = Arc::clone(engine);
        passes.spawn(async move {
            let outcome = engine.optimize(&experiment_id).await;
            (experiment_id, outcome)
        });
    }

    while let Some(joined) = passes.join_next().await {
        match joined {
            Ok((experiment_id, Ok(outcome))) => {
                debug!(
                    experiment_id = %experiment_id,
                    outcome = outcome.label(),
                    "scheduled pass done"
                );
            }
            Ok((experiment_id, Err(e))) => {
                warn!(experiment_id = %experiment_id, error = %e, "scheduled pass failed");
            }
            Err(e) => warn!(error = %e, "scheduled pass panicked"),
        }
    }
}
