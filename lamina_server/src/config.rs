// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Compositor configuration.
//!
//! All settings have defaults, so an empty TOML document is a valid
//! configuration:
//!
//! ```toml
//! [vsync]
//! min_resync_samples = 3
//! error_threshold_ns2 = 160000000000
//!
//! [phase]
//! app_phase_offset_ns = 0
//! compositor_phase_offset_ns = 0
//!
//! [display]
//! refresh_period_ns = 16666667
//! width = 1920
//! height = 1080
//! ```

use std::path::Path;

use lamina_core::time::Duration;
use lamina_core::vsync::VsyncModelConfig;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Top-level compositor configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositorConfig {
    /// Vsync model fitting.
    pub vsync: VsyncSection,
    /// Listener phase offsets.
    pub phase: PhaseSection,
    /// Transaction waits.
    pub transaction: TransactionSection,
    /// Client-facing limits.
    pub limits: LimitsSection,
    /// Primary display fallback settings.
    pub display: DisplaySection,
    /// Frame latency records.
    pub frame_tracker: FrameTrackerSection,
    /// Debug switches.
    pub debug: DebugSection,
}

impl CompositorConfig {
    /// Parses a TOML document. Missing fields take their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Reads and parses a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}

/// Vsync model thresholds. Mirrors [`VsyncModelConfig`] with nanosecond
/// integers for the durations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VsyncSection {
    /// Samples needed before the model is trusted.
    pub min_resync_samples: usize,
    /// Size of the resync sample ring.
    pub max_resync_samples: usize,
    /// Size of the present-fence error ring.
    pub num_present_samples: usize,
    /// Resync samples without a present fence before the error resets.
    pub max_resync_samples_without_present: usize,
    /// Mean squared error (ns²) above which resync is requested.
    pub error_threshold_ns2: i64,
    /// Constant subtracted from present-fence signal times.
    pub present_time_offset_ns: i64,
    /// Upper bound of the wake-up latency estimate.
    pub max_wakeup_latency_ns: i64,
}

impl VsyncSection {
    /// Builds the model configuration.
    #[must_use]
    pub const fn model_config(&self) -> VsyncModelConfig {
        VsyncModelConfig {
            min_resync_samples: self.min_resync_samples,
            max_resync_samples: self.max_resync_samples,
            num_present_samples: self.num_present_samples,
            max_resync_samples_without_present: self.max_resync_samples_without_present,
            error_threshold_ns2: self.error_threshold_ns2,
            present_time_offset: Duration(self.present_time_offset_ns),
            max_wakeup_latency: Duration(self.max_wakeup_latency_ns),
        }
    }
}

impl Default for VsyncSection {
    fn default() -> Self {
        let c = VsyncModelConfig::standard();
        Self {
            min_resync_samples: c.min_resync_samples,
            max_resync_samples: c.max_resync_samples,
            num_present_samples: c.num_present_samples,
            max_resync_samples_without_present: c.max_resync_samples_without_present,
            error_threshold_ns2: c.error_threshold_ns2,
            present_time_offset_ns: c.present_time_offset.nanos(),
            max_wakeup_latency_ns: c.max_wakeup_latency.nanos(),
        }
    }
}

/// Phase offsets of the two event dispatchers relative to the vsync model.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseSection {
    /// Offset of application vsync events.
    pub app_phase_offset_ns: i64,
    /// Offset of the compositor's own wake-ups.
    pub compositor_phase_offset_ns: i64,
}

/// Bounds on blocking transaction waits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionSection {
    /// How long a synchronous or animation transaction may wait.
    pub sync_timeout_ms: u64,
}

impl Default for TransactionSection {
    fn default() -> Self {
        Self {
            sync_timeout_ms: 5000,
        }
    }
}

impl TransactionSection {
    /// The timeout as a std duration.
    #[must_use]
    pub const fn sync_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.sync_timeout_ms)
    }
}

/// Client-facing limits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsSection {
    /// Largest width or height a layer may request.
    pub max_surface_dimension: u32,
}

impl Default for LimitsSection {
    fn default() -> Self {
        Self {
            max_surface_dimension: 4096,
        }
    }
}

/// Primary display settings used when the composer does not report them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplaySection {
    /// Refresh period.
    pub refresh_period_ns: i64,
    /// Panel width.
    pub width: u32,
    /// Panel height.
    pub height: u32,
}

impl Default for DisplaySection {
    fn default() -> Self {
        Self {
            refresh_period_ns: 16_666_667,
            width: 1920,
            height: 1080,
        }
    }
}

impl DisplaySection {
    /// The refresh period.
    #[must_use]
    pub const fn refresh_period(&self) -> Duration {
        Duration(self.refresh_period_ns)
    }
}

/// Frame latency record settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameTrackerSection {
    /// Records kept per layer and for animations.
    pub num_frame_records: usize,
}

impl Default for FrameTrackerSection {
    fn default() -> Self {
        Self {
            num_frame_records: lamina_core::stats::NUM_FRAME_RECORDS,
        }
    }
}

/// Debug switches.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugSection {
    /// Compose every layer with the GPU.
    pub disable_hwc: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_the_default() {
        let config = CompositorConfig::from_toml_str("").unwrap();
        assert_eq!(config, CompositorConfig::default(), "all sections default");
        assert_eq!(config.display.refresh_period_ns, 16_666_667);
        assert_eq!(config.transaction.sync_timeout_ms, 5000);
        assert_eq!(config.limits.max_surface_dimension, 4096);
        assert_eq!(config.frame_tracker.num_frame_records, 128);
        assert!(!config.debug.disable_hwc, "composer enabled by default");
    }

    #[test]
    fn default_vsync_section_matches_standard_model() {
        let section = VsyncSection::default();
        let model = section.model_config();
        let standard = VsyncModelConfig::standard();
        assert_eq!(model.min_resync_samples, standard.min_resync_samples);
        assert_eq!(model.max_resync_samples, standard.max_resync_samples);
        assert_eq!(model.error_threshold_ns2, standard.error_threshold_ns2);
        assert_eq!(model.max_wakeup_latency, standard.max_wakeup_latency);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = CompositorConfig::from_toml_str(
            r#"
            [vsync]
            min_resync_samples = 6

            [phase]
            compositor_phase_offset_ns = 1000000

            [debug]
            disable_hwc = true
            "#,
        )
        .unwrap();
        assert_eq!(config.vsync.min_resync_samples, 6);
        assert_eq!(
            config.vsync.max_resync_samples,
            VsyncSection::default().max_resync_samples,
            "unset field keeps its default"
        );
        assert_eq!(config.phase.compositor_phase_offset_ns, 1_000_000);
        assert_eq!(config.phase.app_phase_offset_ns, 0);
        assert!(config.debug.disable_hwc, "switch parsed");
    }

    #[test]
    fn malformed_document_is_a_config_error() {
        let err = CompositorConfig::from_toml_str("[limits]\nmax_surface_dimension = \"big\"")
            .unwrap_err();
        assert!(
            matches!(err, crate::Error::Config(_)),
            "expected a config error, got {err:?}"
        );
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = CompositorConfig::load("/nonexistent/lamina.toml").unwrap_err();
        assert!(matches!(err, crate::Error::Io(_)), "got {err:?}");
    }
}
