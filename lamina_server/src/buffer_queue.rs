// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-layer buffer queues.
//!
//! A client renders into buffers and hands them over with
//! [`BufferProducer::queue_buffer`]. The compositor's
//! [`BufferQueueConsumer`] acquires them at latch time and releases them with
//! a fence once they are off screen; released buffers come back to the
//! producer through [`BufferProducer::take_released`].
//!
//! Acquisition honors desired present times: a buffer due after the expected
//! present time of the coming refresh stays queued, and a queued buffer whose
//! successor is already due is dropped.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use lamina_core::buffer::{
    AcquireOutcome, BufferConsumer, BufferId, BufferItem, Fence, GraphicBuffer, ScalingMode,
};
use lamina_core::geometry::PixelRect;
use lamina_core::time::{Duration, HostTime};
use lamina_core::transform::Orientation;
use parking_lot::Mutex;

use crate::clock;
use crate::error::{Error, Result};

/// Window within which desired present times are trusted.
const MAX_REASONABLE: Duration = Duration::from_secs(1);

/// Told when a producer queues a buffer.
pub trait FrameAvailableListener: Send + Sync {
    /// A new buffer is ready to latch.
    fn on_frame_available(&self);
}

/// What a producer submits with a buffer.
#[derive(Clone, Debug)]
pub struct QueuedBuffer {
    /// The buffer.
    pub buffer: GraphicBuffer,
    /// Signals when rendering has finished.
    pub acquire_fence: Fence,
    /// Source crop; empty for the whole buffer.
    pub crop: PixelRect,
    /// Orientation to apply when displaying.
    pub transform: Orientation,
    /// How to fit a differently sized buffer.
    pub scaling_mode: ScalingMode,
    /// Desired present time; `None` stamps the buffer with the queue time
    /// and exempts it from frame dropping.
    pub timestamp: Option<HostTime>,
}

impl QueuedBuffer {
    /// A buffer with no fence, crop, or transform, presented as soon as
    /// possible.
    #[must_use]
    pub fn new(buffer: GraphicBuffer) -> Self {
        Self {
            buffer,
            acquire_fence: Fence::NO_FENCE,
            crop: PixelRect::EMPTY,
            transform: Orientation::ROT_0,
            scaling_mode: ScalingMode::Freeze,
            timestamp: None,
        }
    }
}

#[derive(Debug)]
struct Entry {
    item: BufferItem,
    auto_timestamp: bool,
}

struct Core {
    queue: VecDeque<Entry>,
    released: VecDeque<(BufferId, Fence)>,
    acquired: Vec<BufferId>,
    default_size: (u32, u32),
    transform_hint: Orientation,
    abandoned: bool,
    frame_counter: u64,
    listener: Option<Arc<dyn FrameAvailableListener>>,
}

impl fmt::Debug for Core {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Core")
            .field("queued", &self.queue.len())
            .field("acquired", &self.acquired)
            .field("released", &self.released.len())
            .field("default_size", &self.default_size)
            .field("abandoned", &self.abandoned)
            .finish_non_exhaustive()
    }
}

/// Creates a connected producer and consumer pair.
#[must_use]
pub fn buffer_queue(width: u32, height: u32) -> (BufferProducer, BufferQueueConsumer) {
    let core = Arc::new(Mutex::new(Core {
        queue: VecDeque::new(),
        released: VecDeque::new(),
        acquired: Vec::new(),
        default_size: (width, height),
        transform_hint: Orientation::ROT_0,
        abandoned: false,
        frame_counter: 0,
        listener: None,
    }));
    (
        BufferProducer {
            core: Arc::clone(&core),
        },
        BufferQueueConsumer { core },
    )
}

/// The client's end of a buffer queue.
#[derive(Clone, Debug)]
pub struct BufferProducer {
    core: Arc<Mutex<Core>>,
}

impl BufferProducer {
    /// Queues a buffer and returns its frame number.
    ///
    /// Fails once the layer has been removed.
    pub fn queue_buffer(&self, input: QueuedBuffer) -> Result<u64> {
        let (frame_number, listener) = {
            let mut core = self.core.lock();
            if core.abandoned {
                return Err(Error::ConnectionClosed);
            }
            core.frame_counter += 1;
            let frame_number = core.frame_counter;
            let auto_timestamp = input.timestamp.is_none();
            core.queue.push_back(Entry {
                item: BufferItem {
                    buffer: input.buffer,
                    acquire_fence: input.acquire_fence,
                    crop: input.crop,
                    transform: input.transform,
                    scaling_mode: input.scaling_mode,
                    timestamp: input.timestamp.unwrap_or_else(clock::now),
                    frame_number,
                },
                auto_timestamp,
            });
            (frame_number, core.listener.clone())
        };
        if let Some(listener) = listener {
            listener.on_frame_available();
        }
        Ok(frame_number)
    }

    /// Takes back a buffer the compositor is done with. The fence signals
    /// when the buffer may be written again.
    pub fn take_released(&self) -> Option<(BufferId, Fence)> {
        self.core.lock().released.pop_front()
    }

    /// The size the compositor expects.
    #[must_use]
    pub fn default_size(&self) -> (u32, u32) {
        self.core.lock().default_size
    }

    /// The orientation to pre-rotate content to.
    #[must_use]
    pub fn transform_hint(&self) -> Orientation {
        self.core.lock().transform_hint
    }

    /// Returns `true` once the layer has been removed.
    #[must_use]
    pub fn is_abandoned(&self) -> bool {
        self.core.lock().abandoned
    }

    /// Buffers queued and not yet acquired.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.core.lock().queue.len()
    }
}

/// The compositor's end of a buffer queue.
#[derive(Debug)]
pub struct BufferQueueConsumer {
    core: Arc<Mutex<Core>>,
}

impl BufferQueueConsumer {
    /// Registers the listener told about new buffers.
    pub fn set_frame_available_listener(&self, listener: Arc<dyn FrameAvailableListener>) {
        self.core.lock().listener = Some(listener);
    }
}

impl BufferConsumer for BufferQueueConsumer {
    fn acquire_next_ready(&mut self, expected_present: HostTime) -> AcquireOutcome {
        let mut core = self.core.lock();
        if core.queue.is_empty() {
            return AcquireOutcome::NoBuffer;
        }
        if expected_present != HostTime::ZERO {
            let earliest = expected_present - MAX_REASONABLE;
            // Drop the head while its successor is already due.
            while core.queue.len() > 1 && !core.queue[0].auto_timestamp {
                let desired = core.queue[1].item.timestamp;
                if desired < earliest || desired > expected_present {
                    break;
                }
                if let Some(dropped) = core.queue.pop_front() {
                    tracing::trace!(frame = dropped.item.frame_number, "dropping stale frame");
                    core.released
                        .push_back((dropped.item.buffer.id, Fence::NO_FENCE));
                }
            }
            let desired = core.queue[0].item.timestamp;
            if desired > expected_present && desired < expected_present + MAX_REASONABLE {
                return AcquireOutcome::PresentLater;
            }
        }
        match core.queue.pop_front() {
            Some(entry) => {
                core.acquired.push(entry.item.buffer.id);
                AcquireOutcome::Acquired(entry.item)
            }
            None => AcquireOutcome::NoBuffer,
        }
    }

    fn release(&mut self, buffer: BufferId, release_fence: Fence) {
        let mut core = self.core.lock();
        let before = core.acquired.len();
        core.acquired.retain(|id| *id != buffer);
        if core.acquired.len() == before {
            tracing::debug!(?buffer, "release of a buffer that was not acquired");
            return;
        }
        if !core.abandoned {
            core.released.push_back((buffer, release_fence));
        }
    }

    fn queued_frames(&self) -> usize {
        self.core.lock().queue.len()
    }

    fn set_default_buffer_size(&mut self, width: u32, height: u32) {
        self.core.lock().default_size = (width, height);
    }

    fn set_transform_hint(&mut self, hint: Orientation) {
        self.core.lock().transform_hint = hint;
    }

    fn abandon(&mut self) {
        let mut core = self.core.lock();
        core.abandoned = true;
        core.queue.clear();
        core.released.clear();
        core.listener = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lamina_core::buffer::PixelFormat;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn buffer(id: u64) -> GraphicBuffer {
        GraphicBuffer {
            id: BufferId(id),
            width: 10,
            height: 10,
            format: PixelFormat::RGBX_8888,
        }
    }

    fn at(id: u64, t: i64) -> QueuedBuffer {
        QueuedBuffer {
            timestamp: Some(HostTime(t)),
            ..QueuedBuffer::new(buffer(id))
        }
    }

    fn acquired_id(outcome: AcquireOutcome) -> u64 {
        match outcome {
            AcquireOutcome::Acquired(item) => item.buffer.id.0,
            other => panic!("expected a buffer, got {other:?}"),
        }
    }

    const SEC: i64 = 1_000_000_000;

    #[test]
    fn frames_are_numbered_and_acquired_in_order() {
        let (producer, mut consumer) = buffer_queue(10, 10);
        assert_eq!(producer.queue_buffer(QueuedBuffer::new(buffer(1))).unwrap(), 1);
        assert_eq!(producer.queue_buffer(QueuedBuffer::new(buffer(2))).unwrap(), 2);
        assert_eq!(consumer.queued_frames(), 2);
        assert_eq!(acquired_id(consumer.acquire_next_ready(HostTime::ZERO)), 1);
        assert_eq!(acquired_id(consumer.acquire_next_ready(HostTime::ZERO)), 2);
        assert!(matches!(
            consumer.acquire_next_ready(HostTime::ZERO),
            AcquireOutcome::NoBuffer
        ), "queue drained");
    }

    #[test]
    fn future_buffer_is_presented_later() {
        let (producer, mut consumer) = buffer_queue(10, 10);
        producer.queue_buffer(at(1, 10 * SEC + 5_000)).unwrap();
        assert!(
            matches!(consumer.acquire_next_ready(HostTime(10 * SEC)), AcquireOutcome::PresentLater),
            "due after the coming refresh"
        );
        assert_eq!(consumer.queued_frames(), 1, "not consumed");
        assert_eq!(acquired_id(consumer.acquire_next_ready(HostTime(10 * SEC + 5_000))), 1);
    }

    #[test]
    fn far_future_timestamp_is_ignored() {
        let (producer, mut consumer) = buffer_queue(10, 10);
        producer.queue_buffer(at(1, 20 * SEC)).unwrap();
        assert_eq!(
            acquired_id(consumer.acquire_next_ready(HostTime(10 * SEC))),
            1,
            "a desired time over a second out is not trusted"
        );
    }

    #[test]
    fn stale_frames_are_dropped_when_successor_is_due() {
        let (producer, mut consumer) = buffer_queue(10, 10);
        producer.queue_buffer(at(1, 10 * SEC - 2_000)).unwrap();
        producer.queue_buffer(at(2, 10 * SEC - 1_000)).unwrap();
        producer.queue_buffer(at(3, 10 * SEC + 1_000)).unwrap();
        assert_eq!(acquired_id(consumer.acquire_next_ready(HostTime(10 * SEC))), 2);
        assert_eq!(
            producer.take_released().map(|(id, _)| id),
            Some(BufferId(1)),
            "dropped frame goes back to the producer"
        );
        assert_eq!(consumer.queued_frames(), 1, "future frame kept");
    }

    #[test]
    fn auto_timestamped_frames_are_never_dropped() {
        let (producer, mut consumer) = buffer_queue(10, 10);
        producer.queue_buffer(QueuedBuffer::new(buffer(1))).unwrap();
        producer.queue_buffer(QueuedBuffer::new(buffer(2))).unwrap();
        let expected = clock::now() + Duration::from_millis(16);
        assert_eq!(acquired_id(consumer.acquire_next_ready(expected)), 1);
        assert_eq!(producer.take_released(), None);
    }

    #[test]
    fn release_returns_buffer_with_fence() {
        let (producer, mut consumer) = buffer_queue(10, 10);
        producer.queue_buffer(QueuedBuffer::new(buffer(4))).unwrap();
        let id = BufferId(acquired_id(consumer.acquire_next_ready(HostTime::ZERO)));
        let fence = Fence::pending();
        consumer.release(id, fence.clone());
        let (back, back_fence) = producer.take_released().unwrap();
        assert_eq!(back, id);
        fence.signal(HostTime(9));
        assert_eq!(back_fence.signal_time(), Some(HostTime(9)), "same fence");
        consumer.release(id, Fence::NO_FENCE);
        assert_eq!(producer.take_released(), None, "double release ignored");
    }

    #[test]
    fn abandoned_queue_rejects_producers() {
        let (producer, mut consumer) = buffer_queue(10, 10);
        producer.queue_buffer(QueuedBuffer::new(buffer(1))).unwrap();
        consumer.abandon();
        assert!(producer.is_abandoned(), "abandon is visible to the producer");
        assert_eq!(consumer.queued_frames(), 0, "queue flushed");
        assert!(matches!(
            producer.queue_buffer(QueuedBuffer::new(buffer(2))),
            Err(Error::ConnectionClosed)
        ), "queueing after abandon fails");
    }

    #[test]
    fn consumer_hints_reach_the_producer() {
        let (producer, mut consumer) = buffer_queue(10, 10);
        consumer.set_default_buffer_size(64, 32);
        consumer.set_transform_hint(Orientation::ROT_90);
        assert_eq!(producer.default_size(), (64, 32));
        assert_eq!(producer.transform_hint(), Orientation::ROT_90);
    }

    #[test]
    fn listener_hears_every_queue() {
        struct Count(AtomicUsize);
        impl FrameAvailableListener for Count {
            fn on_frame_available(&self) {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }
        let (producer, consumer) = buffer_queue(10, 10);
        let count = Arc::new(Count(AtomicUsize::new(0)));
        consumer.set_frame_available_listener(count.clone());
        producer.queue_buffer(QueuedBuffer::new(buffer(1))).unwrap();
        producer.queue_buffer(QueuedBuffer::new(buffer(2))).unwrap();
        assert_eq!(count.0.load(Ordering::Relaxed), 2);
    }
}
