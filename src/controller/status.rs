//! Status request coalescing
//!
//! Any number of callers may ask for tunnel status while a single backend
//! request is in flight. The first caller triggers the backend request; the
//! rest are parked and all of them are answered, in the order they asked,
//! when the backend reports.

use serde::{Deserialize, Serialize};
use std::mem;

/// Gateway and byte counters reported by the backend
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelStatus {
    pub server_ipv4_gateway: String,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
}

/// Continuation waiting for one status result
pub type StatusCallback = Box<dyn FnOnce(TunnelStatus) + Send>;

/// Queue of callbacks waiting on one outstanding backend status request
#[derive(Default)]
pub struct StatusCoalescer {
    pending: Vec<StatusCallback>,
}

impl StatusCoalescer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a callback. Returns true when the caller must issue the backend
    /// request, i.e. no request was outstanding.
    pub fn enqueue(&mut self, callback: StatusCallback) -> bool {
        let request_status = self.pending.is_empty();
        self.pending.push(callback);
        request_status
    }

    /// Answer every parked callback exactly once, in enqueue order.
    ///
    /// The queue is swapped out before any callback runs, so it is empty
    /// again by the time the first callback executes.
    pub fn resolve(&mut self, status: &TunnelStatus) -> usize {
        let callbacks = mem::take(&mut self.pending);
        let count = callbacks.len();
        for callback in callbacks {
            callback(status.clone());
        }
        count
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recorder(log: &Arc<Mutex<Vec<(usize, TunnelStatus)>>>, id: usize) -> StatusCallback {
        let log = log.clone();
        Box::new(move |status| log.lock().unwrap().push((id, status)))
    }

    #[test]
    fn test_only_first_enqueue_requests() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut coalescer = StatusCoalescer::new();

        assert!(coalescer.enqueue(recorder(&log, 0)));
        assert!(!coalescer.enqueue(recorder(&log, 1)));
        assert!(!coalescer.enqueue(recorder(&log, 2)));
        assert_eq!(coalescer.len(), 3);
    }

    #[test]
    fn test_resolve_in_fifo_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut coalescer = StatusCoalescer::new();
        for id in 0..4 {
            coalescer.enqueue(recorder(&log, id));
        }

        let status = TunnelStatus {
            server_ipv4_gateway: "10.64.0.1".to_string(),
            tx_bytes: 10,
            rx_bytes: 20,
        };
        assert_eq!(coalescer.resolve(&status), 4);
        assert!(coalescer.is_empty());

        let log = log.lock().unwrap();
        let order: Vec<usize> = log.iter().map(|(id, _)| *id).collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
        assert!(log.iter().all(|(_, s)| *s == status));
    }

    #[test]
    fn test_fresh_queue_after_resolve() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut coalescer = StatusCoalescer::new();
        coalescer.enqueue(recorder(&log, 0));
        coalescer.resolve(&TunnelStatus::default());

        assert!(coalescer.enqueue(recorder(&log, 1)));
        assert_eq!(coalescer.resolve(&TunnelStatus::default()), 1);
        assert_eq!(coalescer.resolve(&TunnelStatus::default()), 0);
    }
}
