//! Capture and playback endpoints.
//!
//! A [`DeviceHandle`] wraps one configured driver in a fixed direction. The
//! driver itself sits behind [`PcmDriver`], which exposes blocking,
//! period-oriented transfers and reports buffer faults as values so the
//! transfer engine can recover from them. Two backends exist: [`cpal_backend`]
//! talks to the host audio system and [`sim`] is a deterministic stand-in
//! with fault injection.

pub mod cpal_backend;
pub mod sim;

use std::fmt;

use crate::{Result, ScopeError};

pub use self::cpal_backend::CpalBackend;
pub use self::sim::{SimBackend, SimFault, SimProbe, SimSignal};

/// Width in bytes of one signed 16-bit sample.
pub const SAMPLE_WIDTH: usize = std::mem::size_of::<i16>();

/// Stream direction of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Capture,
    Playback,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Capture => f.pad("capture"),
            Self::Playback => f.pad("playback"),
        }
    }
}

/// Parameters asked of a driver. Access is always interleaved and samples
/// are always signed 16-bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HwRequest {
    pub channels: u16,
    pub rate: u32,
    pub period_frames: usize,
    pub buffer_periods: usize,
}

/// Parameters a driver actually settled on. Rate and period may differ
/// from the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HwParams {
    pub channels: u16,
    pub rate: u32,
    pub period_frames: usize,
    pub buffer_frames: usize,
}

impl HwParams {
    pub fn period_us(&self) -> u64 {
        (self.period_frames as u64 * 1_000_000) / u64::from(self.rate.max(1))
    }

    /// Samples in one period across all channels.
    pub fn period_samples(&self) -> usize {
        self.period_frames * usize::from(self.channels)
    }
}

/// Transfer outcome a driver reports instead of a frame count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PcmFault {
    /// Underrun on playback, overrun on capture. The stream stays stopped
    /// until [`PcmDriver::prepare`] is called.
    Xrun,
    /// Any other driver error.
    Io(String),
}

impl fmt::Display for PcmFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Xrun => f.write_str("xrun"),
            Self::Io(reason) => f.write_str(reason),
        }
    }
}

/// Source of driver instances, one per opened endpoint.
pub trait PcmBackend {
    /// Opens the endpoint for `direction`. Fails with
    /// [`ScopeError::DeviceUnavailable`].
    fn open(&self, direction: Direction) -> Result<Box<dyn PcmDriver>>;
}

/// A single opened endpoint.
///
/// `read` and `write` move whole frames of interleaved samples and return
/// how many frames were transferred.
pub trait PcmDriver: Send {
    /// Applies hardware parameters, choosing the nearest supported rate and
    /// period. Fails with [`ScopeError::ConfigurationRejected`].
    fn apply(&mut self, request: &HwRequest) -> Result<HwParams>;

    /// Blocks until at least one period can be written.
    fn wait_ready(&mut self);

    fn read(&mut self, buf: &mut [i16], frames: usize) -> std::result::Result<usize, PcmFault>;

    fn write(&mut self, buf: &[i16], frames: usize) -> std::result::Result<usize, PcmFault>;

    /// Clears an xrun and makes the stream runnable again.
    fn prepare(&mut self) -> std::result::Result<(), PcmFault>;

    /// Discards pending playback data immediately.
    fn drop_pending(&mut self);

    /// Blocks until pending playback data has been played.
    fn drain(&mut self);
}

/// An opened, configured endpoint.
pub struct DeviceHandle {
    direction: Direction,
    params: HwParams,
    /// One period of capture data. Empty for playback.
    pub(crate) buffer: Vec<i16>,
    pub(crate) driver: Box<dyn PcmDriver>,
}

impl DeviceHandle {
    /// Opens and configures an endpoint.
    ///
    /// Callers must use [`DeviceHandle::params`] afterwards; the requested
    /// rate and period are only hints.
    pub fn open(
        backend: &dyn PcmBackend,
        direction: Direction,
        request: HwRequest,
    ) -> Result<Self> {
        if request.channels == 0 {
            return Err(ScopeError::InvalidInput("channel count must be at least one"));
        }
        if request.period_frames == 0 {
            return Err(ScopeError::InvalidInput("period size must be positive"));
        }

        let mut driver = backend.open(direction)?;
        let params = driver.apply(&request)?;

        let buffer = match direction {
            Direction::Capture => vec![0; params.period_samples()],
            Direction::Playback => Vec::new(),
        };

        tracing::info!(
            %direction,
            rate = params.rate,
            channels = params.channels,
            frames = params.period_frames,
            period_us = params.period_us(),
            buf_sz = buffer.len() * SAMPLE_WIDTH,
            "audio device configured"
        );

        Ok(Self {
            direction,
            params,
            buffer,
            driver,
        })
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn params(&self) -> &HwParams {
        &self.params
    }

    /// Samples per transfer chunk (one period across all channels).
    pub fn chunk_samples(&self) -> usize {
        self.params.period_samples()
    }

    /// Resets the stream to a runnable state.
    pub fn prepare(&mut self) {
        if let Err(fault) = self.driver.prepare() {
            tracing::warn!(direction = %self.direction, %fault, "prepare failed");
        }
    }

    /// Discards queued playback data.
    pub fn drop_pending(&mut self) {
        self.driver.drop_pending();
    }

    /// Drains pending playback data and releases the endpoint.
    pub fn close(mut self) {
        if self.direction == Direction::Playback {
            self.driver.drain();
        }
        tracing::debug!(direction = %self.direction, "audio device closed");
    }
}

impl fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("direction", &self.direction)
            .field("params", &self.params)
            .field("buffer", &self.buffer.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(channels: u16, period_frames: usize) -> HwRequest {
        HwRequest {
            channels,
            rate: 44_100,
            period_frames,
            buffer_periods: 4,
        }
    }

    #[test]
    fn capture_buffer_sized_to_negotiated_period() {
        let backend = SimBackend::new().with_period_limits(64, 512);
        let handle = DeviceHandle::open(&backend, Direction::Capture, request(2, 4096)).unwrap();

        assert_eq!(handle.params().period_frames, 512);
        assert_eq!(handle.buffer.len(), 1024);
        assert!(handle.buffer.iter().all(|&s| s == 0));
    }

    #[test]
    fn reads_back_nearest_rate() {
        let backend = SimBackend::new().with_rates(&[22_050, 48_000]);
        let handle = DeviceHandle::open(&backend, Direction::Playback, request(2, 256)).unwrap();

        assert_eq!(handle.params().rate, 48_000);
        assert!(handle.buffer.is_empty());
    }

    #[test]
    fn rejects_degenerate_requests() {
        let backend = SimBackend::new();
        let err = DeviceHandle::open(&backend, Direction::Capture, request(0, 256)).unwrap_err();
        assert!(matches!(err, ScopeError::InvalidInput(_)));
        let err = DeviceHandle::open(&backend, Direction::Capture, request(1, 0)).unwrap_err();
        assert!(matches!(err, ScopeError::InvalidInput(_)));
    }

    #[test]
    fn reports_open_and_configure_failures() {
        let backend = SimBackend::new().unavailable(Direction::Capture);
        let err = DeviceHandle::open(&backend, Direction::Capture, request(1, 256)).unwrap_err();
        assert!(matches!(err, ScopeError::DeviceUnavailable(_)));
        assert!(err.is_fatal());

        let backend = SimBackend::new().with_max_channels(1);
        let err = DeviceHandle::open(&backend, Direction::Playback, request(2, 256)).unwrap_err();
        assert!(matches!(err, ScopeError::ConfigurationRejected(_)));
    }

    #[test]
    fn close_drains_playback_only() {
        let backend = SimBackend::new();
        let capture = DeviceHandle::open(&backend, Direction::Capture, request(1, 256)).unwrap();
        let playback = DeviceHandle::open(&backend, Direction::Playback, request(2, 256)).unwrap();

        capture.close();
        playback.close();

        assert_eq!(backend.probe(Direction::Capture).drain_calls(), 0);
        assert_eq!(backend.probe(Direction::Playback).drain_calls(), 1);
    }
}
