//! Position reports travelling from the render thread to the manager.
//!
//! Every mixing sound produces one [`PositionReport`] per render slice. The
//! render thread pushes it through a [`ReportSink`] and the manager drains
//! the matching [`ReportQueue`] during `update`.
//!
//! The sink is real-time safe: the queue is a preallocated bounded channel,
//! so `commit` never locks, allocates or waits. When the queue is full the
//! oldest unread report is evicted to make room for the new one.

use crate::sound::SoundId;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Default number of report slots
pub const DEFAULT_REPORT_CAPACITY: usize = 1024;

/// Attempts at evict-then-send before giving up on a report. Only reached
/// when several producers race for the last free slot.
const OVERFLOW_RETRIES: usize = 4;

/// Where a sound was when a slice of it was rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionReport {
    /// Sound the slice belongs to
    pub id: SoundId,
    /// Driver frame at which the first rendered frame will be heard
    pub frame: i64,
    /// Sound position (in frames) of the first rendered frame
    pub position: i64,
    /// Number of frames the sound actually delivered
    pub got_frames: usize,
}

/// Create a report channel with room for `capacity` unread reports
pub fn report_channel(capacity: usize) -> (ReportSink, ReportQueue) {
    let (sender, receiver) = crossbeam_channel::bounded(capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    (
        ReportSink {
            sender,
            evict: receiver.clone(),
            dropped: dropped.clone(),
        },
        ReportQueue { receiver, dropped },
    )
}

/// Producer side, handed to drivers. Cheap to clone, one per render thread.
#[derive(Clone)]
pub struct ReportSink {
    sender: Sender<PositionReport>,
    evict: Receiver<PositionReport>,
    dropped: Arc<AtomicU64>,
}

impl ReportSink {
    /// Queue a report. Never blocks; on overflow the oldest report is lost.
    pub fn commit(&self, report: PositionReport) {
        let mut report = report;
        for _ in 0..OVERFLOW_RETRIES {
            match self.sender.try_send(report) {
                Ok(()) => return,
                Err(TrySendError::Full(rejected)) => {
                    report = rejected;
                    if self.evict.try_recv().is_ok() {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Total reports lost to overflow so far
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Consumer side, owned by the manager
pub struct ReportQueue {
    receiver: Receiver<PositionReport>,
    dropped: Arc<AtomicU64>,
}

impl ReportQueue {
    /// Hand every report queued at call time to `f`, oldest first.
    ///
    /// Reports committed while draining are left for the next call, so a
    /// busy producer cannot keep this loop alive. Returns the number of
    /// reports delivered.
    pub fn drain(&self, mut f: impl FnMut(PositionReport)) -> usize {
        let pending = self.receiver.len();
        let mut delivered = 0;
        for _ in 0..pending {
            match self.receiver.try_recv() {
                Ok(report) => {
                    f(report);
                    delivered += 1;
                }
                Err(_) => break,
            }
        }
        delivered
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
