//! Buffered requests and their single-fire wake-up.
//!
//! A request that finds no live destination parks a `PendingRequest` in its
//! worker's queue and awaits the matching receiver. The worker task wakes it
//! exactly once, either with an `Admission` when a reload completes or by
//! dropping it when the request is cancelled or the worker stops.
//!
//! Admissions form a hand-off chain: each carries a receiver that resolves
//! once its predecessor's request has been written to the destination (or
//! abandoned), so requests reach the backend in arrival order without ever
//! waiting on an earlier response.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tokio::sync::oneshot::{self, error::TryRecvError};

use crate::registry::LiveDestination;

static REQUEST_SEQ: AtomicU64 = AtomicU64::new(1);

/// Arrival-order identifier for a buffered request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestSeq(u64);

impl RequestSeq {
    pub fn next() -> Self {
        Self(REQUEST_SEQ.fetch_add(1, Ordering::Relaxed))
    }
}

/// A request waiting for its worker to become live.
#[derive(Debug)]
pub struct PendingRequest {
    seq: RequestSeq,
    waiter: oneshot::Sender<Admission>,
    enqueued_at: Instant,
}

impl PendingRequest {
    pub fn new(seq: RequestSeq) -> (Self, oneshot::Receiver<Admission>) {
        let (waiter, rx) = oneshot::channel();
        (
            Self {
                seq,
                waiter,
                enqueued_at: Instant::now(),
            },
            rx,
        )
    }

    pub fn seq(&self) -> RequestSeq {
        self.seq
    }

    pub fn enqueued_at(&self) -> Instant {
        self.enqueued_at
    }

    /// The caller stopped waiting (timeout, disconnect, explicit cancel).
    pub fn is_cancelled(&self) -> bool {
        self.waiter.is_closed()
    }

    /// Hand the admission to the waiting caller. Gives it back if the caller is gone.
    pub fn admit(self, admission: Admission) -> Result<(), Admission> {
        self.waiter.send(admission)
    }
}

/// Permission to forward a request to a specific live destination.
#[derive(Debug)]
pub struct Admission {
    pub live: LiveDestination,
    after: Option<oneshot::Receiver<()>>,
    release: Option<oneshot::Sender<()>>,
}

impl Admission {
    /// Wait until the request admitted before this one has been handed to the
    /// destination, then take the turn. A dropped predecessor counts as done.
    ///
    /// Dropping this future passes the turn along once the predecessor is done.
    pub async fn into_turn(mut self) -> Turn {
        if let Some(after) = self.after.as_mut() {
            let _ = after.await;
        }
        self.after = None;
        Turn(self.release.take())
    }
}

impl Drop for Admission {
    fn drop(&mut self) {
        // Abandoned mid-chain: keep the successor behind our predecessor.
        if let (Some(after), Some(release)) = (self.after.take(), self.release.take()) {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        let _ = after.await;
                        let _ = release.send(());
                    });
                }
                Err(_) => {
                    let _ = release.send(());
                }
            }
        }
    }
}

/// The right to be written next. Dropping it lets the successor go.
#[derive(Debug)]
pub struct Turn(Option<oneshot::Sender<()>>);

impl Drop for Turn {
    fn drop(&mut self) {
        if let Some(release) = self.0.take() {
            let _ = release.send(());
        }
    }
}

/// Orders admissions of one worker: a request admitted while its
/// predecessor has not been handed off yet waits behind it.
#[derive(Debug, Default)]
pub struct HandOffChain {
    tail: Option<oneshot::Receiver<()>>,
}

impl HandOffChain {
    /// Admit `request` behind everything admitted before. Returns false if
    /// the caller already gave up; the chain is left intact.
    pub fn admit(&mut self, request: PendingRequest, live: &LiveDestination) -> bool {
        let after = self.unresolved_tail();
        let (release, next) = oneshot::channel();
        let admission = Admission {
            live: live.clone(),
            after,
            release: Some(release),
        };
        match request.admit(admission) {
            Ok(()) => {
                self.tail = Some(next);
                true
            }
            Err(mut returned) => {
                self.tail = returned.after.take();
                false
            }
        }
    }

    /// Forget the chain, e.g. when a new destination goes live.
    pub fn reset(&mut self) {
        self.tail = None;
    }

    fn unresolved_tail(&mut self) -> Option<oneshot::Receiver<()>> {
        let mut tail = self.tail.take()?;
        match tail.try_recv() {
            Err(TryRecvError::Empty) => Some(tail),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Destination, Generation};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    fn live() -> LiveDestination {
        LiveDestination {
            generation: Generation::new(1),
            destination: Arc::new(Destination::new("http://127.0.0.1:1".parse().unwrap())),
        }
    }

    #[test]
    fn test_request_seq_is_monotonic() {
        let a = RequestSeq::next();
        let b = RequestSeq::next();
        assert!(b > a);
    }

    fn admit_all(chain: &mut HandOffChain, requests: Vec<PendingRequest>) -> usize {
        requests
            .into_iter()
            .filter(|r| !r.is_cancelled())
            .map(|r| chain.admit(r, &live()))
            .filter(|admitted| *admitted)
            .count()
    }

    #[tokio::test]
    async fn test_turns_follow_arrival_order() {
        let mut chain = HandOffChain::default();
        let (a, rx_a) = PendingRequest::new(RequestSeq::next());
        let (b, rx_b) = PendingRequest::new(RequestSeq::next());
        assert_eq!(admit_all(&mut chain, vec![a, b]), 2);

        let adm_a = rx_a.await.unwrap();
        let adm_b = rx_b.await.unwrap();

        // B may not go until A has been handed off.
        let b_turn = tokio::spawn(adm_b.into_turn());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!b_turn.is_finished());

        let turn_a = adm_a.into_turn().await;
        drop(turn_a);
        timeout(Duration::from_millis(200), b_turn)
            .await
            .expect("b released after a")
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_requests_are_skipped() {
        let mut chain = HandOffChain::default();
        let (a, rx_a) = PendingRequest::new(RequestSeq::next());
        let (b, rx_b) = PendingRequest::new(RequestSeq::next());
        let (c, rx_c) = PendingRequest::new(RequestSeq::next());
        drop(rx_b);
        assert_eq!(admit_all(&mut chain, vec![a, b, c]), 2);

        let adm_a = rx_a.await.unwrap();
        let adm_c = rx_c.await.unwrap();
        let c_turn = tokio::spawn(adm_c.into_turn());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!c_turn.is_finished());

        // Dropping the turn counts as handed off.
        drop(adm_a.into_turn().await);
        timeout(Duration::from_millis(200), c_turn)
            .await
            .expect("c follows a directly")
            .unwrap();
    }

    #[tokio::test]
    async fn test_dropped_admission_keeps_successor_behind_predecessor() {
        let mut chain = HandOffChain::default();
        let (a, rx_a) = PendingRequest::new(RequestSeq::next());
        let (b, rx_b) = PendingRequest::new(RequestSeq::next());
        let (c, rx_c) = PendingRequest::new(RequestSeq::next());
        admit_all(&mut chain, vec![a, b, c]);

        let adm_a = rx_a.await.unwrap();
        let adm_b = rx_b.await.unwrap();
        let adm_c = rx_c.await.unwrap();

        // B gives up while A is still being sent.
        drop(adm_b);
        let c_turn = tokio::spawn(adm_c.into_turn());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!c_turn.is_finished());

        drop(adm_a.into_turn().await);
        timeout(Duration::from_millis(200), c_turn)
            .await
            .expect("c proceeds once a is handed off")
            .unwrap();
    }

    #[tokio::test]
    async fn test_late_arrival_waits_for_unsent_flush() {
        let mut chain = HandOffChain::default();
        let (a, rx_a) = PendingRequest::new(RequestSeq::next());
        admit_all(&mut chain, vec![a]);
        let adm_a = rx_a.await.unwrap();

        // Arrives after the flush while A is not yet handed off.
        let (late, rx_late) = PendingRequest::new(RequestSeq::next());
        assert!(chain.admit(late, &live()));
        let late_turn = tokio::spawn(rx_late.await.unwrap().into_turn());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!late_turn.is_finished());

        drop(adm_a.into_turn().await);
        timeout(Duration::from_millis(200), late_turn)
            .await
            .expect("late request follows the flush")
            .unwrap();

        // With nothing outstanding, the next request goes straight through.
        let (next, rx_next) = PendingRequest::new(RequestSeq::next());
        assert!(chain.admit(next, &live()));
        timeout(Duration::from_millis(50), rx_next.await.unwrap().into_turn())
            .await
            .expect("no predecessor left");
    }

}
