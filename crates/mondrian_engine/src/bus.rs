//! Per-job broadcast bus for SSE delivery.
//!
//! One bounded broadcast channel per live job. Delivery is best-effort and
//! lossy: a subscriber that lags loses the oldest events and keeps receiving.
//! The channel closes when the job reaches a terminal state.

use mondrian_protocol::{JobId, StreamEvent};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::trace;

pub struct EventBus {
    channels: Mutex<HashMap<JobId, broadcast::Sender<StreamEvent>>>,
    capacity: usize,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Subscribe to a job's events, creating the channel on first use.
    pub fn subscribe(&self, job_id: JobId) -> broadcast::Receiver<StreamEvent> {
        let mut channels = self.channels.lock().expect("bus lock poisoned");
        channels
            .entry(job_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Publish to a job's subscribers. A send error only means nobody is
    /// listening, which is fine.
    pub fn publish(&self, event: &StreamEvent) {
        let sender = {
            let channels = self.channels.lock().expect("bus lock poisoned");
            channels.get(&event.job_id()).cloned()
        };
        if let Some(sender) = sender {
            trace!("Publishing {} for job {}", event.name(), event.job_id());
            let _ = sender.send(event.clone());
        }
    }

    /// Drop a job's channel. Existing receivers drain buffered events and
    /// then observe the stream closing.
    pub fn close(&self, job_id: JobId) {
        self.channels
            .lock()
            .expect("bus lock poisoned")
            .remove(&job_id);
    }

    /// Jobs with a live channel (heartbeat fan-out).
    pub fn live_jobs(&self) -> Vec<JobId> {
        self.channels
            .lock()
            .expect("bus lock poisoned")
            .keys()
            .copied()
            .collect()
    }

    /// Drop every channel (shutdown).
    pub fn close_all(&self) {
        self.channels.lock().expect("bus lock poisoned").clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_subscriber() {
        let bus = EventBus::new(8);
        let job_id = JobId::new();
        let mut rx = bus.subscribe(job_id);

        bus.publish(&StreamEvent::heartbeat(job_id));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.name(), "heartbeat");
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_silent() {
        let bus = EventBus::new(8);
        bus.publish(&StreamEvent::heartbeat(JobId::new()));
    }

    #[tokio::test]
    async fn lagging_subscriber_drops_oldest_and_continues() {
        let bus = EventBus::new(2);
        let job_id = JobId::new();
        let mut rx = bus.subscribe(job_id);

        for _ in 0..5 {
            bus.publish(&StreamEvent::heartbeat(job_id));
        }

        // The first receive reports the lag, then delivery resumes with the
        // newest buffered events.
        match rx.recv().await {
            Err(broadcast::error::RecvError::Lagged(missed)) => assert!(missed >= 1),
            other => panic!("expected lag, got {:?}", other),
        }
        assert!(rx.recv().await.is_ok());
    }

    #[tokio::test]
    async fn close_ends_the_stream_after_draining() {
        let bus = EventBus::new(8);
        let job_id = JobId::new();
        let mut rx = bus.subscribe(job_id);

        bus.publish(&StreamEvent::done(job_id));
        bus.close(job_id);

        assert_eq!(rx.recv().await.unwrap().name(), "done");
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }

    #[tokio::test]
    async fn channels_are_per_job() {
        let bus = EventBus::new(8);
        let a = JobId::new();
        let b = JobId::new();
        let mut rx_a = bus.subscribe(a);

        bus.publish(&StreamEvent::heartbeat(b));
        bus.publish(&StreamEvent::heartbeat(a));

        let event = rx_a.recv().await.unwrap();
        assert_eq!(event.job_id(), a);
        assert!(rx_a.try_recv().is_err());
    }
}
