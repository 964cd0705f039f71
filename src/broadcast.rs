//! Periodic frame broadcast to stream observers.
//!
//! One tokio task, started by the first [`FrameBroadcaster::subscribe`],
//! polls the matrix every `1 / updates_per_second` and sends the snapshot to
//! every observer. It is never restarted. The poll rate is independent of how
//! often the matrix changes.
//!
//! Delivery is best effort: an observer whose delivery fails (gone, or its
//! queue is full) is removed on the spot and the cycle carries on with the
//! others.

use crate::error::{JumbotronError, Result};
use crate::matrix::Matrix;
use crate::pixel::Pixel;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

/// Streamed payload: `{"data": [[pixel, ...], ...], "timestamp": ns}`.
#[derive(Serialize)]
pub struct FrameMessage<'a> {
    pub data: &'a [Vec<Pixel>],
    /// Nanoseconds since the UNIX epoch, strictly increasing per broadcaster.
    pub timestamp: u64,
}

/// A stream client. `deliver` must not block.
pub trait Observer: Send {
    fn deliver(&mut self, payload: &Arc<str>) -> Result<()>;
}

/// Observer backed by a bounded channel; the receiving half is drained by
/// the connection task.
pub struct ChannelObserver {
    tx: mpsc::Sender<Arc<str>>,
}

impl ChannelObserver {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl Observer for ChannelObserver {
    fn deliver(&mut self, payload: &Arc<str>) -> Result<()> {
        self.tx
            .try_send(payload.clone())
            .map_err(|_| JumbotronError::ObserverDeliveryFailure)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

pub struct FrameBroadcaster {
    matrix: Arc<Matrix>,
    period: Duration,
    last_timestamp: AtomicU64,
    next_id: AtomicU64,
    started: AtomicBool,
    observers: Mutex<Vec<(ObserverId, Box<dyn Observer>)>>,
}

impl FrameBroadcaster {
    pub fn new(matrix: Arc<Matrix>, updates_per_second: u32) -> Self {
        Self {
            matrix,
            period: Duration::from_secs(1) / updates_per_second.max(1),
            last_timestamp: AtomicU64::new(0),
            next_id: AtomicU64::new(1),
            started: AtomicBool::new(false),
            observers: Mutex::new(Vec::new()),
        }
    }

    fn lock_observers(&self) -> MutexGuard<'_, Vec<(ObserverId, Box<dyn Observer>)>> {
        self.observers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add an observer without starting the loop.
    pub fn register(&self, observer: Box<dyn Observer>) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock_observers().push((id, observer));
        id
    }

    /// Add an observer and make sure the broadcast loop is running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn subscribe(self: &Arc<Self>, observer: Box<dyn Observer>) -> ObserverId {
        let id = self.register(observer);
        self.ensure_started();
        id
    }

    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut observers = self.lock_observers();
        let before = observers.len();
        observers.retain(|(oid, _)| *oid != id);
        observers.len() != before
    }

    pub fn observer_count(&self) -> usize {
        self.lock_observers().len()
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    fn ensure_started(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!(
            "Starting frame broadcast every {}ms",
            self.period.as_millis()
        );
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run().await });
    }

    async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            self.broadcast_once();
        }
    }

    // Wall clock, bumped by a nanosecond when it has not moved (or moved
    // back) since the last frame.
    fn next_timestamp(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        let prev = self
            .last_timestamp
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |prev| {
                Some(now.max(prev + 1))
            })
            .unwrap_or(now);
        now.max(prev + 1)
    }

    /// One cycle: snapshot, serialize once, deliver to everyone.
    /// Returns how many observers received the frame.
    pub fn broadcast_once(&self) -> usize {
        if self.observer_count() == 0 {
            return 0;
        }

        let grid = self.matrix.snapshot();
        let message = FrameMessage {
            data: &grid,
            timestamp: self.next_timestamp(),
        };
        let payload: Arc<str> = match serde_json::to_string(&message) {
            Ok(json) => json.into(),
            Err(e) => {
                tracing::error!("Cannot serialize frame: {}", e);
                return 0;
            }
        };

        let mut observers = self.lock_observers();
        observers.retain_mut(|(id, observer)| match observer.deliver(&payload) {
            Ok(()) => true,
            Err(e) => {
                tracing::info!("Dropping stream observer {:?}: {}", id, e);
                false
            }
        });
        observers.len()
    }
}
