//! Single-slot frame handoff between the capture loop and the worker.

use std::sync::Mutex;

use presence_hw::Frame;

/// Overwrite-on-write exchange slot holding at most one frame.
///
/// The producer never blocks and never queues: a frame the worker has not
/// taken yet is simply replaced by the newer one. The lock is held only
/// for the swap, never across processing.
#[derive(Default)]
pub struct FrameSlot {
    slot: Mutex<Option<Frame>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish the latest frame, discarding any unconsumed predecessor.
    pub fn publish(&self, frame: Frame) {
        let mut slot = self.slot.lock().expect("frame slot lock poisoned");
        *slot = Some(frame);
    }

    /// Take the pending frame, leaving the slot empty.
    pub fn take(&self) -> Option<Frame> {
        self.slot.lock().expect("frame slot lock poisoned").take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    fn frame(sequence: u32) -> Frame {
        Frame {
            data: vec![0; 12],
            width: 2,
            height: 2,
            timestamp: Instant::now(),
            sequence,
        }
    }

    #[test]
    fn take_from_empty_slot_is_none() {
        let slot = FrameSlot::new();
        assert!(slot.take().is_none());
    }

    #[test]
    fn newest_frame_replaces_unconsumed_one() {
        let slot = FrameSlot::new();
        slot.publish(frame(1));
        slot.publish(frame(2));
        slot.publish(frame(3));

        let taken = slot.take().expect("a frame is pending");
        assert_eq!(taken.sequence, 3);
        // The intermediates were discarded, not queued.
        assert!(slot.take().is_none());
    }

    #[test]
    fn take_clears_the_slot() {
        let slot = FrameSlot::new();
        slot.publish(frame(7));
        assert!(slot.take().is_some());
        assert!(slot.take().is_none());
    }

    #[test]
    fn fast_producer_never_accumulates_backlog() {
        let slot = Arc::new(FrameSlot::new());
        let producer_slot = Arc::clone(&slot);

        let producer = std::thread::spawn(move || {
            for seq in 0..10_000u32 {
                producer_slot.publish(frame(seq));
            }
        });

        // Slow consumer: sequences must be strictly increasing and the slot
        // never yields the same frame twice.
        let mut last_seen: Option<u32> = None;
        let mut taken = 0u32;
        while !producer.is_finished() {
            if let Some(f) = slot.take() {
                if let Some(prev) = last_seen {
                    assert!(f.sequence > prev, "stale frame {} after {}", f.sequence, prev);
                }
                last_seen = Some(f.sequence);
                taken += 1;
                std::thread::sleep(std::time::Duration::from_micros(200));
            }
        }
        producer.join().unwrap();

        // Far fewer takes than publishes: intermediates were dropped.
        assert!(taken < 10_000);
    }
}
