// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Graphic buffers, fences, and the consumer side of a layer's buffer queue.
//!
//! The compositor never touches pixel memory. A [`GraphicBuffer`] is a
//! descriptor (identity, size, format) and a [`Fence`] is a shareable
//! handle that some other party signals with a timestamp.

use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicI64, Ordering};

use crate::geometry::PixelRect;
use crate::time::HostTime;
use crate::transform::Orientation;

/// A pixel format code.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PixelFormat(pub u32);

impl PixelFormat {
    /// 32-bit RGBA with alpha.
    pub const RGBA_8888: Self = Self(1);
    /// 32-bit RGB with an ignored padding byte.
    pub const RGBX_8888: Self = Self(2);
    /// Packed 24-bit RGB.
    pub const RGB_888: Self = Self(3);
    /// Packed 16-bit RGB.
    pub const RGB_565: Self = Self(4);
    /// 32-bit BGRA with alpha.
    pub const BGRA_8888: Self = Self(5);
    /// sRGB-encoded RGBA with alpha.
    pub const SRGB_A_8888: Self = Self(0xC);
    /// sRGB-encoded RGB with padding.
    pub const SRGB_X_8888: Self = Self(0xD);

    /// Returns `true` if buffers of this format never need blending.
    ///
    /// Device-specific formats (`0x100..=0x1FF`) and unknown formats are
    /// treated as opaque.
    #[must_use]
    pub const fn is_opaque(self) -> bool {
        if self.0 >= 0x100 && self.0 <= 0x1FF {
            return true;
        }
        !matches!(self, Self::RGBA_8888 | Self::BGRA_8888 | Self::SRGB_A_8888)
    }
}

impl fmt::Debug for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::RGBA_8888 => f.write_str("RGBA_8888"),
            Self::RGBX_8888 => f.write_str("RGBX_8888"),
            Self::RGB_888 => f.write_str("RGB_888"),
            Self::RGB_565 => f.write_str("RGB_565"),
            Self::BGRA_8888 => f.write_str("BGRA_8888"),
            Self::SRGB_A_8888 => f.write_str("SRGB_A_8888"),
            Self::SRGB_X_8888 => f.write_str("SRGB_X_8888"),
            Self(other) => write!(f, "PixelFormat({other:#x})"),
        }
    }
}

/// How a buffer whose size differs from the window is fitted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum ScalingMode {
    /// Only buffers matching the window size are accepted.
    #[default]
    Freeze,
    /// Stretch the buffer to the window.
    ScaleToWindow,
    /// Scale uniformly and crop to the window aspect ratio.
    ScaleCrop,
    /// Crop without scaling.
    NoScaleCrop,
}

impl ScalingMode {
    /// Returns `true` if any buffer size is acceptable.
    #[inline]
    #[must_use]
    pub const fn is_fixed_size(self) -> bool {
        !matches!(self, Self::Freeze)
    }
}

/// Identity of a graphic buffer allocation.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BufferId(pub u64);

impl fmt::Debug for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BufferId({})", self.0)
    }
}

/// Descriptor of a graphic buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GraphicBuffer {
    /// Allocation identity.
    pub id: BufferId,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Pixel format.
    pub format: PixelFormat,
}

impl GraphicBuffer {
    /// The buffer's full extent.
    #[must_use]
    pub fn bounds(&self) -> PixelRect {
        PixelRect::from_size(dim(self.width), dim(self.height))
    }
}

pub(crate) fn dim(v: u32) -> i32 {
    i32::try_from(v).unwrap_or(i32::MAX)
}

const PENDING: i64 = i64::MAX;

/// A synchronization handle carrying a signal timestamp.
///
/// `Fence::NO_FENCE` stands for "nothing to wait on" and counts as already
/// signaled with no known time. Clones share state: signaling one signals
/// all.
#[derive(Clone, Default)]
pub struct Fence {
    inner: Option<Arc<AtomicI64>>,
}

impl Fence {
    /// The absent fence.
    pub const NO_FENCE: Self = Self { inner: None };

    /// A fence that has not signaled yet.
    #[must_use]
    pub fn pending() -> Self {
        Self {
            inner: Some(Arc::new(AtomicI64::new(PENDING))),
        }
    }

    /// A fence that already signaled at `at`.
    #[must_use]
    pub fn signaled(at: HostTime) -> Self {
        Self {
            inner: Some(Arc::new(AtomicI64::new(at.0))),
        }
    }

    /// Marks the fence signaled at `at`. Later calls are ignored.
    pub fn signal(&self, at: HostTime) {
        if let Some(inner) = &self.inner {
            _ = inner.compare_exchange(PENDING, at.0, Ordering::Release, Ordering::Relaxed);
        }
    }

    /// Returns `true` unless this is [`Fence::NO_FENCE`].
    #[inline]
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.inner.is_some()
    }

    /// Returns `true` once signaled. The absent fence is always signaled.
    #[must_use]
    pub fn is_signaled(&self) -> bool {
        self.inner
            .as_ref()
            .is_none_or(|t| t.load(Ordering::Acquire) != PENDING)
    }

    /// The signal time, if the fence is valid and has signaled.
    #[must_use]
    pub fn signal_time(&self) -> Option<HostTime> {
        let t = self.inner.as_ref()?.load(Ordering::Acquire);
        (t != PENDING).then_some(HostTime(t))
    }
}

impl fmt::Debug for Fence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.inner, self.signal_time()) {
            (None, _) => f.write_str("Fence::NO_FENCE"),
            (Some(_), None) => f.write_str("Fence(pending)"),
            (Some(_), Some(t)) => write!(f, "Fence(signaled at {})", t.0),
        }
    }
}

/// A buffer handed from a producer to the compositor, with its metadata.
#[derive(Clone, Debug)]
pub struct BufferItem {
    /// The buffer.
    pub buffer: GraphicBuffer,
    /// Signals when the producer has finished writing.
    pub acquire_fence: Fence,
    /// Source crop in buffer coordinates; empty means the whole buffer.
    pub crop: PixelRect,
    /// Orientation to apply when displaying.
    pub transform: Orientation,
    /// How to fit a differently sized buffer.
    pub scaling_mode: ScalingMode,
    /// Desired present time chosen by the producer.
    pub timestamp: HostTime,
    /// Monotonic frame counter assigned at queue time.
    pub frame_number: u64,
}

/// Outcome of asking a consumer for the next ready buffer.
#[derive(Clone, Debug)]
pub enum AcquireOutcome {
    /// A buffer was acquired.
    Acquired(BufferItem),
    /// Nothing is queued.
    NoBuffer,
    /// The head buffer is scheduled for a later refresh.
    PresentLater,
}

/// The compositor's end of a layer's buffer queue.
///
/// Implementations own the queue's slots. The compositor acquires at most one
/// item per latch and gives every acquired item back through
/// [`release`](Self::release) once it is no longer needed (either rejected
/// or replaced by a newer buffer).
pub trait BufferConsumer: Send {
    /// Acquires the oldest item that should be shown at or before
    /// `expected_present`.
    fn acquire_next_ready(&mut self, expected_present: HostTime) -> AcquireOutcome;

    /// Returns a previously acquired buffer to the producer.
    fn release(&mut self, buffer: BufferId, release_fence: Fence);

    /// Number of queued items not yet acquired.
    fn queued_frames(&self) -> usize;

    /// Size producers should allocate when they do not choose one.
    fn set_default_buffer_size(&mut self, width: u32, height: u32) {
        _ = (width, height);
    }

    /// Orientation the producer should pre-rotate to.
    fn set_transform_hint(&mut self, hint: Orientation) {
        _ = hint;
    }

    /// Stops accepting new buffers. Called when the layer is removed.
    fn abandon(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opacity_by_format() {
        assert!(!PixelFormat::RGBA_8888.is_opaque(), "RGBA has alpha");
        assert!(!PixelFormat::BGRA_8888.is_opaque(), "BGRA has alpha");
        assert!(!PixelFormat::SRGB_A_8888.is_opaque(), "sRGB_A has alpha");
        assert!(PixelFormat::RGBX_8888.is_opaque(), "RGBX is opaque");
        assert!(PixelFormat::RGB_565.is_opaque(), "565 is opaque");
        assert!(PixelFormat(0x142).is_opaque(), "device format");
        assert!(PixelFormat(0x7777).is_opaque(), "unknown format");
    }

    #[test]
    fn only_freeze_rejects_resizes() {
        assert!(!ScalingMode::Freeze.is_fixed_size(), "freeze");
        assert!(ScalingMode::ScaleToWindow.is_fixed_size(), "scale");
        assert!(ScalingMode::ScaleCrop.is_fixed_size(), "crop");
        assert!(ScalingMode::NoScaleCrop.is_fixed_size(), "no-scale crop");
    }

    #[test]
    fn fence_signals_once() {
        let f = Fence::pending();
        let shared = f.clone();
        assert!(!f.is_signaled(), "fresh fence is pending");
        assert_eq!(f.signal_time(), None, "no time yet");
        shared.signal(HostTime(100));
        shared.signal(HostTime(200));
        assert!(f.is_signaled(), "clones share state");
        assert_eq!(f.signal_time(), Some(HostTime(100)), "first signal wins");
    }

    #[test]
    fn no_fence_is_signaled_without_time() {
        let f = Fence::NO_FENCE;
        assert!(!f.is_valid(), "absent fence");
        assert!(f.is_signaled(), "nothing to wait for");
        assert_eq!(f.signal_time(), None, "no time known");
        assert_eq!(
            Fence::signaled(HostTime(5)).signal_time(),
            Some(HostTime(5)),
            "pre-signaled"
        );
    }

    #[test]
    fn format_debug_names_known_codes() {
        use alloc::format;
        assert_eq!(format!("{:?}", PixelFormat::RGB_565), "RGB_565");
        assert_eq!(format!("{:?}", PixelFormat(0x101)), "PixelFormat(0x101)");
    }
}
