//! Periodic expiry sweep.
//!
//! Timeouts are cooperative: nothing is force-resolved. The sweep only
//! evicts unfinished battles whose current phase has outlived its deadline.

use crate::arena::Arena;
use crate::battle::Battle;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::info;

/// Run one sweep against a shared arena. Returns the evicted battles.
pub async fn sweep_once(arena: &Mutex<Arena>) -> Vec<Battle> {
    let mut arena = arena.lock().await;
    arena.sweep(Utc::now())
}

/// Spawn a task that sweeps the arena every `interval`.
///
/// Evicted battles are sent on `evicted` when a channel is given, so the
/// host can tidy up announcements and threads. The task stops when the
/// handle is aborted or the receiver is dropped.
pub fn spawn_expiry_sweep(
    arena: Arc<Mutex<Arena>>,
    interval: Duration,
    evicted: Option<mpsc::UnboundedSender<Battle>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            match &evicted {
                Some(tx) => tokio::select! {
                    _ = tx.closed() => return,
                    _ = ticker.tick() => {}
                },
                None => {
                    ticker.tick().await;
                }
            }
            let expired = sweep_once(&arena).await;
            if !expired.is_empty() {
                info!(count = expired.len(), "expiry sweep evicted battles");
            }
            if let Some(tx) = &evicted {
                for battle in expired {
                    if tx.send(battle).is_err() {
                        return;
                    }
                }
            }
        }
    })
}

/// Spawn the sweep using the arena's configured interval.
pub async fn spawn_configured_sweep(
    arena: Arc<Mutex<Arena>>,
    evicted: Option<mpsc::UnboundedSender<Battle>>,
) -> JoinHandle<()> {
    let interval = arena.lock().await.config().sweep_interval;
    spawn_expiry_sweep(arena, interval, evicted)
}
