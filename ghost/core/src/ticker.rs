//! Tick Scheduler
//!
//! A spawned task that feeds synthetic time events into the same queue the
//! daemon pushes external requests through, so ticks serialize with
//! everything else. One OnSecondChange per tick, one OnMinuteChange every
//! sixtieth tick, both carrying the local wall-clock time as references.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;

use chrono::Timelike;

use crate::events::GhostEvent;
use crate::ghost::InputMsg;
use crate::protocol::Request;

/// Owns the ticking task.
#[derive(Debug)]
pub struct TickScheduler {
    handle: JoinHandle<()>,
}

impl TickScheduler {
    /// Start ticking into `tx` every `period`. The first tick fires one
    /// period after the call, not immediately.
    #[must_use]
    pub fn spawn(tx: mpsc::Sender<InputMsg>, period: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(start, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut ticks = IntervalStream::new(interval);
            let mut count: u64 = 0;
            while ticks.next().await.is_some() {
                count += 1;
                if tx.send(Self::tick_msg(GhostEvent::OnSecondChange)).await.is_err() {
                    break;
                }
                if count % 60 == 0
                    && tx.send(Self::tick_msg(GhostEvent::OnMinuteChange)).await.is_err()
                {
                    break;
                }
            }
            tracing::debug!("tick scheduler stopped");
        });
        Self { handle }
    }

    fn tick_msg(event: GhostEvent) -> InputMsg {
        let now = chrono::Local::now();
        let request = Request::synthetic(event.as_str())
            .with_reference(0, &now.hour().to_string())
            .with_reference(1, &now.minute().to_string())
            .with_reference(2, &now.second().to_string());
        InputMsg::Request {
            request,
            reply: None,
        }
    }

    /// Stop ticking. Idempotent.
    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for TickScheduler {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
