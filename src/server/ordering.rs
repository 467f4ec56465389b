//! Ordering manager (`spec.md` §4.6).
//!
//! Worker tasks complete requests in whatever order the back-end handler
//! happens to finish them. The wire contract requires replies to leave in
//! the order their requests arrived, so this sits between the workers and
//! the framer: it tracks arrival order and a pool of completed-but-not-yet-
//! emitted responses, draining onto an outbound channel whenever the
//! oldest arrival has its response ready.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, Notify};

use crate::protocol::Packet;

struct State {
    incoming: VecDeque<u32>,
    completed: HashMap<u32, Packet>,
    working: usize,
}

/// Serializes worker completions back into request-arrival order.
///
/// Cloning shares the same underlying queue; every clone sees the same
/// arrival order and drains onto the same outbound channel.
#[derive(Clone)]
pub struct OrderingManager {
    state: Arc<Mutex<State>>,
    outbound: mpsc::UnboundedSender<Packet>,
    idle: Arc<Notify>,
}

impl OrderingManager {
    /// Build a manager whose drained, in-order responses are sent on the
    /// returned receiver. The dispatcher reads that receiver and writes
    /// each packet to the wire.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Packet>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                state: Arc::new(Mutex::new(State {
                    incoming: VecDeque::new(),
                    completed: HashMap::new(),
                    working: 0,
                })),
                outbound: tx,
                idle: Arc::new(Notify::new()),
            },
            rx,
        )
    }

    /// Record that a request with `id` has arrived, before any worker
    /// picks it up. Must be called in the exact order requests are
    /// decoded off the wire.
    pub async fn register_arrival(&self, id: u32) {
        let mut state = self.state.lock().await;
        state.incoming.push_back(id);
        state.working += 1;
    }

    /// Record that `id`'s response is ready, and emit everything now
    /// unblocked at the front of the arrival queue.
    ///
    /// A response whose `Packet::id()` is `None` (shouldn't occur for
    /// anything workers submit) is dropped rather than panicking.
    pub async fn complete(&self, id: u32, response: Packet) {
        let mut state = self.state.lock().await;
        state.completed.insert(id, response);
        self.drain_locked(&mut state);
        if state.working == 0 {
            self.idle.notify_waiters();
        }
    }

    fn drain_locked(&self, state: &mut State) {
        while let Some(&front) = state.incoming.front() {
            let Some(response) = state.completed.remove(&front) else {
                break;
            };
            state.incoming.pop_front();
            state.working -= 1;
            // Outbound is unbounded and only closes with the manager
            // itself, so a send error here means the dispatcher already
            // shut the connection down; dropping the response is correct.
            let _ = self.outbound.send(response);
        }
    }

    /// Wait until every registered arrival has been emitted.
    pub async fn close(&self) {
        loop {
            {
                let state = self.state.lock().await;
                if state.working == 0 {
                    return;
                }
            }
            self.idle.notified().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::packet::Status;

    fn status(id: u32) -> Packet {
        Packet::Status(Status::ok(id))
    }

    #[tokio::test]
    async fn emits_in_arrival_order_even_when_later_id_completes_first() {
        let (mgr, mut rx) = OrderingManager::new();
        mgr.register_arrival(7).await;
        mgr.register_arrival(8).await;

        // id 8's worker finishes first.
        mgr.complete(8, status(8)).await;
        assert!(rx.try_recv().is_err(), "8 must wait on 7");

        mgr.complete(7, status(7)).await;
        assert_eq!(rx.recv().await.unwrap().id(), Some(7));
        assert_eq!(rx.recv().await.unwrap().id(), Some(8));
    }

    #[tokio::test]
    async fn single_request_emits_immediately() {
        let (mgr, mut rx) = OrderingManager::new();
        mgr.register_arrival(1).await;
        mgr.complete(1, status(1)).await;
        assert_eq!(rx.recv().await.unwrap().id(), Some(1));
    }

    #[tokio::test]
    async fn close_waits_for_all_arrivals_to_drain() {
        let (mgr, mut rx) = OrderingManager::new();
        mgr.register_arrival(1).await;
        mgr.register_arrival(2).await;

        let mgr2 = mgr.clone();
        let waiter = tokio::spawn(async move {
            mgr2.close().await;
        });

        mgr.complete(2, status(2)).await;
        mgr.complete(1, status(1)).await;

        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("close() should resolve once both arrivals drain")
            .unwrap();

        assert_eq!(rx.recv().await.unwrap().id(), Some(1));
        assert_eq!(rx.recv().await.unwrap().id(), Some(2));
    }

    #[tokio::test]
    async fn three_requests_arbitrary_completion_order() {
        let (mgr, mut rx) = OrderingManager::new();
        for id in [1, 2, 3] {
            mgr.register_arrival(id).await;
        }
        mgr.complete(3, status(3)).await;
        mgr.complete(1, status(1)).await;
        // Only id 1 can emit yet; 3 is stuck behind 2.
        assert_eq!(rx.recv().await.unwrap().id(), Some(1));
        assert!(rx.try_recv().is_err());

        mgr.complete(2, status(2)).await;
        assert_eq!(rx.recv().await.unwrap().id(), Some(2));
        assert_eq!(rx.recv().await.unwrap().id(), Some(3));
    }
}
