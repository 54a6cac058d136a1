//! Blocking period transfers with xrun recovery.
//!
//! Underruns and overruns are treated as ordinary events: the stream is
//! prepared again and the pipeline carries on. Capture never fails; a tick
//! without a full period simply yields [`ReadOutcome::NoData`].

use crate::device::{DeviceHandle, Direction, PcmFault};
use crate::{Result, ScopeError};

/// One period of interleaved capture samples, borrowed from the device
/// buffer. Overwritten by the next read.
#[derive(Debug, Clone, Copy)]
pub struct AudioBlock<'a> {
    samples: &'a [i16],
    channels: usize,
}

impl<'a> AudioBlock<'a> {
    pub fn new(samples: &'a [i16], channels: usize) -> Self {
        Self {
            samples,
            channels: channels.max(1),
        }
    }

    pub fn samples(&self) -> &'a [i16] {
        self.samples
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels
    }

    /// Samples of a single channel in frame order.
    pub fn channel(&self, channel: usize) -> impl Iterator<Item = i16> + 'a {
        self.samples
            .iter()
            .skip(channel)
            .step_by(self.channels)
            .copied()
    }

    /// Sample of the first channel at `frame`.
    pub fn frame_value(&self, frame: usize) -> i16 {
        self.samples
            .get(frame * self.channels)
            .copied()
            .unwrap_or_default()
    }
}

/// Result of one capture poll.
#[derive(Debug, Clone, Copy)]
pub enum ReadOutcome<'a> {
    Block(AudioBlock<'a>),
    /// Nothing usable this tick. Not an error.
    NoData,
}

impl<'a> ReadOutcome<'a> {
    pub fn block(self) -> Option<AudioBlock<'a>> {
        match self {
            Self::Block(block) => Some(block),
            Self::NoData => None,
        }
    }
}

/// Counters from a completed playback write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteReport {
    pub chunks: usize,
    pub frames: usize,
    pub underruns: usize,
    pub errors: usize,
}

impl DeviceHandle {
    /// Writes interleaved samples one period at a time.
    ///
    /// Each chunk waits for device capacity first. An underrun prepares the
    /// stream and moves on to the next chunk, other driver errors are logged
    /// and skipped. A chunk that transfers fewer frames than it asked for
    /// aborts the call with [`ScopeError::ShortTransfer`]. Trailing samples
    /// that do not fill a whole frame are ignored.
    pub fn write(&mut self, samples: &[i16]) -> Result<WriteReport> {
        if self.direction() != Direction::Playback {
            return Err(ScopeError::InvalidInput("write requires a playback device"));
        }

        let channels = usize::from(self.params().channels);
        let chunk_samples = self.chunk_samples();
        let usable = samples.len() / channels * channels;
        let mut report = WriteReport::default();

        for (index, chunk) in samples[..usable].chunks(chunk_samples).enumerate() {
            let offset = index * chunk_samples;
            let requested = chunk.len() / channels;
            report.chunks += 1;

            self.driver.wait_ready();
            match self.driver.write(chunk, requested) {
                Ok(transferred) if transferred == requested => report.frames += transferred,
                Ok(transferred) => {
                    tracing::warn!(offset, requested, transferred, "short write");
                    return Err(ScopeError::ShortTransfer {
                        offset,
                        requested,
                        transferred,
                    });
                }
                Err(PcmFault::Xrun) => {
                    tracing::warn!(offset, "underrun occurred");
                    report.underruns += 1;
                    self.prepare();
                }
                Err(PcmFault::Io(reason)) => {
                    tracing::warn!(offset, %reason, "error from write");
                    report.errors += 1;
                }
            }
        }

        Ok(report)
    }

    /// Polls exactly one period from a capture device.
    ///
    /// An overrun prepares the stream so the next poll can succeed; both an
    /// overrun and a short read drop this tick's data.
    pub fn read(&mut self) -> ReadOutcome<'_> {
        if self.direction() != Direction::Capture {
            tracing::error!("read called on a playback device");
            return ReadOutcome::NoData;
        }

        let frames = self.params().period_frames;
        let channels = usize::from(self.params().channels);

        match self.driver.read(&mut self.buffer, frames) {
            Ok(read) if read == frames => {
                ReadOutcome::Block(AudioBlock::new(&self.buffer, channels))
            }
            Ok(read) => {
                tracing::warn!(read, expected = frames, "short read");
                ReadOutcome::NoData
            }
            Err(PcmFault::Xrun) => {
                tracing::warn!("overrun occurred");
                self.prepare();
                ReadOutcome::NoData
            }
            Err(PcmFault::Io(reason)) => {
                tracing::warn!(%reason, "error from read");
                ReadOutcome::NoData
            }
        }
    }
}
