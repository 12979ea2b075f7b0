// Per-device concurrency limiting
//
// Embedded HTTP servers on amplifier units fall over when hammered, so
// every call to one device passes through that device's semaphore.
// Waiters queue FIFO; requests to different devices stay independent.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub struct DeviceLimiters {
    capacity: usize,
    semaphores: DashMap<String, Arc<Semaphore>>,
}

impl DeviceLimiters {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            semaphores: DashMap::new(),
        }
    }

    /// Wait for an in-flight slot on `device_id`. The slot is released
    /// when the returned permit drops.
    pub async fn acquire(&self, device_id: &str) -> OwnedSemaphorePermit {
        let semaphore = self
            .semaphores
            .entry(device_id.to_owned())
            .or_insert_with(|| Arc::new(Semaphore::new(self.capacity)))
            .clone();
        semaphore
            .acquire_owned()
            .await
            .expect("device semaphore is never closed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn never_exceeds_capacity_per_device() {
        let limiters = Arc::new(DeviceLimiters::new(3));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..20)
            .map(|_| {
                let limiters = Arc::clone(&limiters);
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                tokio::spawn(async move {
                    let _permit = limiters.acquire("amp_10.0.0.5").await;
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for task in tasks {
            task.await.expect("task completes");
        }

        assert!(peak.load(Ordering::SeqCst) <= 3, "peak {peak:?} exceeded capacity");
    }

    #[tokio::test]
    async fn devices_are_limited_independently() {
        let limiters = DeviceLimiters::new(1);
        let _first = limiters.acquire("amp_a").await;
        // A slot on another device is granted immediately even while the
        // first device's only slot is held.
        let second = tokio::time::timeout(Duration::from_millis(50), limiters.acquire("amp_b")).await;
        assert!(second.is_ok());
    }
}
