use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::trace;

use crate::connection::{ConnectionEvent, Scheduler};

/// Reconnect timers as sleeping tasks; at most one per connection.
pub struct TokioScheduler {
    events: UnboundedSender<ConnectionEvent>,
    timers: HashMap<usize, JoinHandle<()>>,
}

impl TokioScheduler {
    pub fn new(events: UnboundedSender<ConnectionEvent>) -> Self {
        Self {
            events,
            timers: HashMap::new(),
        }
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&mut self, id: usize, token: u64, delay: Duration) {
        let events = self.events.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(ConnectionEvent::ReconnectDue { id, token });
        });
        if let Some(previous) = self.timers.insert(id, timer) {
            previous.abort();
        }
    }

    fn cancel(&mut self, id: usize) {
        if let Some(timer) = self.timers.remove(&id) {
            trace!(id, "reconnect timer cancelled");
            timer.abort();
        }
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        for (_, timer) in self.timers.drain() {
            timer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test(start_paused = true)]
    async fn fires_once_after_delay() {
        let (events, mut rx) = mpsc::unbounded_channel();
        let mut scheduler = TokioScheduler::new(events);
        scheduler.schedule(1, 7, Duration::from_millis(1000));

        assert_eq!(
            rx.recv().await,
            Some(ConnectionEvent::ReconnectDue { id: 1, token: 7 })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_replaces_the_previous_timer() {
        let (events, mut rx) = mpsc::unbounded_channel();
        let mut scheduler = TokioScheduler::new(events);
        scheduler.schedule(0, 1, Duration::from_millis(100));
        scheduler.schedule(0, 2, Duration::from_millis(200));

        assert_eq!(
            rx.recv().await,
            Some(ConnectionEvent::ReconnectDue { id: 0, token: 2 })
        );
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_fires() {
        let (events, mut rx) = mpsc::unbounded_channel();
        let mut scheduler = TokioScheduler::new(events);
        scheduler.schedule(0, 1, Duration::from_millis(100));
        scheduler.cancel(0);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(rx.try_recv().is_err());
    }
}
