//! Flush Scheduler: per-agent periodic ticker dispatching `flush` commands.
//!
//! A single background task ticks at a global cadence (`flush_tick_ms`,
//! default 100 ms) and compares each registered agent's `next_flush_at`
//! deadline against now. Deadlines that have passed emit
//! [`ScheduleEvent::DispatchFlush`]; the Orchestrator Core is responsible
//! for actually writing the command and reporting the outcome back via
//! [`FlushSchedulerHandle::record_send_result`], which governs skew
//! control and backpressure escalation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Events the scheduler raises for the Orchestrator Core to act on.
#[derive(Debug, Clone)]
pub enum ScheduleEvent {
    /// A `flush` command is due for this agent.
    DispatchFlush { agent_id: String },
    /// Three consecutive `stdin_full` failures exhausted the backoff budget.
    BackpressureExhausted { agent_id: String },
}

#[derive(Debug, Clone)]
struct AgentSchedule {
    interval: Duration,
    backoff: Duration,
    next_flush_at: Instant,
    consecutive_failures: u32,
}

/// Shared per-agent deadline table and the background ticker that scans it.
pub struct FlushScheduler {
    tick_interval: Duration,
    schedules: Arc<Mutex<HashMap<String, AgentSchedule>>>,
    event_tx: mpsc::Sender<ScheduleEvent>,
    cancel: CancellationToken,
}

impl FlushScheduler {
    /// Construct a scheduler ticking at `tick_interval`, publishing
    /// [`ScheduleEvent`]s on `event_tx`.
    #[must_use]
    pub fn new(
        tick_interval: Duration,
        event_tx: mpsc::Sender<ScheduleEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            tick_interval,
            schedules: Arc::new(Mutex::new(HashMap::new())),
            event_tx,
            cancel,
        }
    }

    /// Spawn the background tick loop and return a control handle.
    #[must_use]
    pub fn spawn(self) -> FlushSchedulerHandle {
        let schedules = Arc::clone(&self.schedules);
        let tick_interval = self.tick_interval;
        let event_tx = self.event_tx.clone();
        let cancel = self.cancel.clone();

        let join_handle = tokio::spawn(Self::run(
            tick_interval,
            Arc::clone(&schedules),
            event_tx,
            cancel.clone(),
        ));

        FlushSchedulerHandle {
            schedules,
            cancel,
            join_handle: Some(join_handle),
        }
    }

    async fn run(
        tick_interval: Duration,
        schedules: Arc<Mutex<HashMap<String, AgentSchedule>>>,
        event_tx: mpsc::Sender<ScheduleEvent>,
        cancel: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(tick_interval);
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!("flush scheduler: cancellation received, stopping");
                    break;
                }
                _ = ticker.tick() => {
                    let due: Vec<String> = {
                        let Ok(guard) = schedules.lock() else { continue };
                        let now = Instant::now();
                        guard
                            .iter()
                            .filter(|(_, s)| s.next_flush_at <= now)
                            .map(|(agent_id, _)| agent_id.clone())
                            .collect()
                    };
                    for agent_id in due {
                        if event_tx
                            .send(ScheduleEvent::DispatchFlush { agent_id: agent_id.clone() })
                            .await
                            .is_err()
                        {
                            warn!(agent_id, "flush scheduler: event_tx closed, stopping");
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// Control handle for a running [`FlushScheduler`].
pub struct FlushSchedulerHandle {
    schedules: Arc<Mutex<HashMap<String, AgentSchedule>>>,
    cancel: CancellationToken,
    join_handle: Option<JoinHandle<()>>,
}

impl FlushSchedulerHandle {
    /// Register (or re-register) an agent with a flush interval and
    /// backoff duration, scheduling its first deadline one interval out.
    pub fn register(&self, agent_id: String, interval: Duration, backoff: Duration) {
        if let Ok(mut guard) = self.schedules.lock() {
            guard.insert(
                agent_id,
                AgentSchedule {
                    interval,
                    backoff,
                    next_flush_at: Instant::now() + interval,
                    consecutive_failures: 0,
                },
            );
        }
    }

    /// Remove an agent from the schedule (on exit or removal).
    pub fn unregister(&self, agent_id: &str) {
        if let Ok(mut guard) = self.schedules.lock() {
            guard.remove(agent_id);
        }
    }

    /// Report the outcome of a flush dispatch attempt.
    ///
    /// On success, `next_flush_at` advances from `last_flush_at` (now), not
    /// from receipt of the corresponding ACK, to prevent deadline pile-up.
    /// On a `stdin_full` failure, the deadline backs off by the agent's
    /// configured `flush_backoff_s`; a third consecutive failure emits
    /// [`ScheduleEvent::BackpressureExhausted`] via `event_tx` — callers
    /// observe this through the orchestrator's own event routing, since a
    /// handle has no receiver of its own.
    #[must_use]
    pub fn record_send_result(&self, agent_id: &str, success: bool) -> Option<ScheduleEvent> {
        let Ok(mut guard) = self.schedules.lock() else {
            return None;
        };
        let schedule = guard.get_mut(agent_id)?;

        if success {
            schedule.consecutive_failures = 0;
            schedule.next_flush_at = Instant::now() + schedule.interval;
            None
        } else {
            schedule.consecutive_failures += 1;
            schedule.next_flush_at = Instant::now() + schedule.backoff;
            if schedule.consecutive_failures >= 3 {
                Some(ScheduleEvent::BackpressureExhausted {
                    agent_id: agent_id.to_owned(),
                })
            } else {
                None
            }
        }
    }

    /// Stop the background ticker and wait for it to exit.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successful_send_advances_deadline_by_full_interval() {
        let (tx, _rx) = mpsc::channel(8);
        let scheduler = FlushScheduler::new(Duration::from_millis(100), tx, CancellationToken::new());
        let handle = scheduler.spawn();
        handle.register("fw".into(), Duration::from_secs(60), Duration::from_secs(1));

        let before = Instant::now();
        assert!(handle.record_send_result("fw", true).is_none());
        let guard = handle.schedules.lock().unwrap();
        let schedule = guard.get("fw").unwrap();
        assert!(schedule.next_flush_at >= before + Duration::from_secs(59));
    }

    #[test]
    fn three_consecutive_failures_exhausts_backpressure_budget() {
        let (tx, _rx) = mpsc::channel(8);
        let scheduler = FlushScheduler::new(Duration::from_millis(100), tx, CancellationToken::new());
        let handle = scheduler.spawn();
        handle.register("fw".into(), Duration::from_secs(60), Duration::from_millis(10));

        assert!(handle.record_send_result("fw", false).is_none());
        assert!(handle.record_send_result("fw", false).is_none());
        let third = handle.record_send_result("fw", false);
        assert!(matches!(third, Some(ScheduleEvent::BackpressureExhausted { .. })));
    }
}
