use std::{path::Path, sync::OnceLock, time::Duration};

use serde::{Deserialize, Serialize};

use crate::Result;

/// Environment variable that overrides the display amplification.
pub const DISPLAY_AMP_ENV: &str = "PCMSCOPE_DISPLAY_AMP";
pub const DEFAULT_DISPLAY_AMP: u32 = 6;
const DISPLAY_AMP_RANGE: std::ops::RangeInclusive<u32> = 1..=20;

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub display: DisplayConfig,
    pub tone: ToneConfig,
}

impl AppConfig {
    pub fn live_defaults() -> Self {
        Self::default()
    }

    /// Loads a configuration from a JSON file. Missing fields keep their
    /// defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Configuration specific to the audio devices.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub capture_channels: u16,
    pub playback_channels: u16,
    /// Period of the visualisation tick; the device period is derived from it.
    pub update_period_ms: u32,
    /// Extra frames requested on the capture period so a tick never waits
    /// on a partially filled period.
    pub capture_headroom_frames: usize,
    /// Device ring size in periods.
    pub buffer_periods: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            capture_channels: 1,
            playback_channels: 2,
            update_period_ms: 30,
            capture_headroom_frames: 10,
            buffer_periods: 4,
        }
    }
}

impl AudioConfig {
    /// Frames that elapse during one update period, using whole
    /// microseconds per sample.
    pub fn period_frames(&self) -> usize {
        let us_per_sample = (1_000_000 / self.sample_rate.max(1)).max(1);
        ((self.update_period_ms * 1000) / us_per_sample).max(1) as usize
    }

    pub fn capture_period_frames(&self) -> usize {
        self.period_frames() + self.capture_headroom_frames
    }

    pub fn update_period(&self) -> Duration {
        Duration::from_millis(u64::from(self.update_period_ms))
    }
}

/// Which slice of a capture block feeds the spectral transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpectrumWindow {
    /// The whole period, whatever its length.
    #[default]
    FullBlock,
    /// The largest power-of-two prefix of the period.
    PowerOfTwoPrefix,
}

/// Layout and scaling of the oscilloscope and spectrum bands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub amplification: u32,
    /// Vertical margin above and below the waveform band.
    pub waveform_margin: i32,
    /// Horizontal margin on both sides of the spectrum band.
    pub spectrum_border: i32,
    /// Bins ignored at both ends of the spectrum (DC and near Nyquist).
    pub skip_bins: usize,
    pub label_interval_bins: usize,
    pub window: SpectrumWindow,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            amplification: DEFAULT_DISPLAY_AMP,
            waveform_margin: 20,
            spectrum_border: 80,
            skip_bins: 70,
            label_interval_bins: 100,
            window: SpectrumWindow::FullBlock,
        }
    }
}

impl DisplayConfig {
    /// Amplification after applying the environment override, if present
    /// and valid.
    pub fn effective_amplification(&self) -> u32 {
        self.amplification_with(env_amplification())
    }

    fn amplification_with(&self, override_amp: Option<u32>) -> u32 {
        override_amp.unwrap_or(self.amplification)
    }
}

/// Settings for the background tone task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToneConfig {
    /// Periods synthesised and submitted per playback write.
    pub periods_per_write: usize,
    pub idle_poll_ms: u64,
    pub shutdown_grace_ms: u64,
}

impl Default for ToneConfig {
    fn default() -> Self {
        Self {
            periods_per_write: 4,
            idle_poll_ms: 50,
            shutdown_grace_ms: 10,
        }
    }
}

impl ToneConfig {
    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

fn env_amplification() -> Option<u32> {
    static CACHED: OnceLock<Option<u32>> = OnceLock::new();
    *CACHED.get_or_init(|| {
        let raw = std::env::var(DISPLAY_AMP_ENV).ok()?;
        let amp = parse_amplification(&raw);
        match amp {
            Some(amp) => {
                tracing::info!(amp, "display amplification overridden by {DISPLAY_AMP_ENV}")
            }
            None => tracing::warn!(raw = %raw, "ignoring invalid {DISPLAY_AMP_ENV}"),
        }
        amp
    })
}

/// Parses an amplification override. Accepts decimal, `0x` hex and leading
/// zero octal. Anything unparsable or outside 1..=20 is rejected.
pub fn parse_amplification(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    let (digits, radix) = if let Some(hex) = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
    {
        (hex, 16)
    } else if raw.len() > 1 && raw.starts_with('0') {
        (&raw[1..], 8)
    } else {
        (raw, 10)
    };

    u32::from_str_radix(digits, radix)
        .ok()
        .filter(|amp| DISPLAY_AMP_RANGE.contains(amp))
}
