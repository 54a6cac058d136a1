//! Keyboard-controlled additive tone generator.
//!
//! The foreground key handler flips flags in a [`ToneSet`]; a background
//! [`ToneTask`] owns the playback device and a [`ToneSynth`] that turns the
//! active flags into audio. The flags are the only state the two sides share.

use std::{
    f64::consts::TAU,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
};

use crate::{config::ToneConfig, device::DeviceHandle, Result, ScopeError};

/// Number of independently switchable tones.
pub const TONE_SLOTS: usize = 11;

/// Peak level of the summed signal with every slot active.
const FULL_SCALE: f64 = 32_000.0;

/// Frequency assigned to a tone slot.
pub fn slot_frequency(slot: usize) -> f64 {
    80.0 + 100.0 * slot as f64
}

/// Per-slot on/off flags shared between the key handler and the tone task.
///
/// Each flag has one writer and one reader, so plain atomics suffice.
#[derive(Debug, Clone, Default)]
pub struct ToneSet {
    slots: Arc<[AtomicBool; TONE_SLOTS]>,
}

impl ToneSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, slot: usize, active: bool) {
        if let Some(flag) = self.slots.get(slot) {
            flag.store(active, Ordering::Release);
        }
    }

    pub fn activate(&self, slot: usize) {
        self.set(slot, true);
    }

    pub fn deactivate(&self, slot: usize) {
        self.set(slot, false);
    }

    pub fn clear(&self) {
        for flag in self.slots.iter() {
            flag.store(false, Ordering::Release);
        }
    }

    pub fn is_active(&self, slot: usize) -> bool {
        self.slots
            .get(slot)
            .map(|flag| flag.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    pub fn any_active(&self) -> bool {
        self.slots.iter().any(|flag| flag.load(Ordering::Acquire))
    }

    pub fn snapshot(&self) -> [bool; TONE_SLOTS] {
        std::array::from_fn(|slot| self.slots[slot].load(Ordering::Acquire))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthState {
    Idle,
    Playing,
}

/// What one [`ToneSynth::step`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthStep {
    /// Nothing active, nothing written.
    Idle,
    /// The last slot was released and pending playback was dropped.
    Stopped,
    /// A buffer of this many frames was submitted.
    Wrote(usize),
}

/// Additive sine generator bound to one playback stream layout.
///
/// Every slot keeps its own oscillator phase, carried across buffers so
/// tones stay continuous at buffer boundaries.
#[derive(Debug)]
pub struct ToneSynth {
    tones: ToneSet,
    state: SynthState,
    rate: f64,
    channels: usize,
    frames_per_write: usize,
    phases: [f64; TONE_SLOTS],
    buffer: Vec<i16>,
}

impl ToneSynth {
    pub fn new(
        tones: ToneSet,
        rate: u32,
        channels: u16,
        period_frames: usize,
        config: &ToneConfig,
    ) -> Self {
        let channels = usize::from(channels.max(1));
        let frames_per_write = period_frames.max(1) * config.periods_per_write.max(1);
        Self {
            tones,
            state: SynthState::Idle,
            rate: f64::from(rate.max(1)),
            channels,
            frames_per_write,
            phases: [0.0; TONE_SLOTS],
            buffer: vec![0; frames_per_write * channels],
        }
    }

    /// Builds a synthesizer matching a playback device's negotiated layout.
    pub fn for_device(tones: ToneSet, device: &DeviceHandle, config: &ToneConfig) -> Self {
        let params = device.params();
        Self::new(
            tones,
            params.rate,
            params.channels,
            params.period_frames,
            config,
        )
    }

    pub fn state(&self) -> SynthState {
        self.state
    }

    pub fn frames_per_write(&self) -> usize {
        self.frames_per_write
    }

    /// Fills the internal buffer with the sum of the active slots and
    /// returns it. Every channel of a frame carries the same value.
    pub fn render(&mut self, active: &[bool; TONE_SLOTS]) -> &[i16] {
        let amplitude = FULL_SCALE / TONE_SLOTS as f64;
        let increments: [f64; TONE_SLOTS] =
            std::array::from_fn(|slot| slot_frequency(slot) / self.rate);

        for frame in self.buffer.chunks_exact_mut(self.channels) {
            let mut sum = 0.0;
            for slot in 0..TONE_SLOTS {
                if active[slot] {
                    sum += amplitude * (TAU * self.phases[slot]).sin();
                    self.phases[slot] = (self.phases[slot] + increments[slot]).fract();
                }
            }
            frame.fill(sum.round() as i16);
        }

        &self.buffer
    }

    /// Advances the state machine once.
    ///
    /// Entering `Playing` prepares the stream; leaving it drops whatever is
    /// still queued. While playing each step renders and writes one buffer,
    /// which blocks on device readiness.
    pub fn step(&mut self, device: &mut DeviceHandle) -> SynthStep {
        let active = self.tones.snapshot();
        let any = active.iter().any(|&on| on);

        match (self.state, any) {
            (SynthState::Idle, false) => return SynthStep::Idle,
            (SynthState::Playing, false) => {
                tracing::debug!("tones released, dropping playback");
                device.drop_pending();
                self.state = SynthState::Idle;
                return SynthStep::Stopped;
            }
            (SynthState::Idle, true) => {
                tracing::debug!("tone pressed, preparing playback");
                device.prepare();
                self.state = SynthState::Playing;
            }
            (SynthState::Playing, true) => {}
        }

        let frames = self.frames_per_write;
        let samples = self.render(&active);
        match device.write(samples) {
            Ok(report) => tracing::trace!(?report, "tone buffer written"),
            Err(err) => tracing::warn!(%err, "tone buffer write failed"),
        }
        SynthStep::Wrote(frames)
    }
}

/// Background thread that owns the playback device while tones run.
#[derive(Debug)]
pub struct ToneTask {
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<DeviceHandle>>,
}

impl ToneTask {
    /// Moves `device` into a new thread that plays whatever `tones` selects
    /// until shutdown is requested.
    pub fn spawn(device: DeviceHandle, tones: ToneSet, config: ToneConfig) -> Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = shutdown.clone();

        let thread = thread::Builder::new()
            .name("tone-synth".to_string())
            .spawn(move || run_tone_task(device, tones, config, flag))
            .map_err(|e| ScopeError::msg(format!("failed to start tone task: {e}")))?;

        Ok(Self {
            shutdown,
            thread: Some(thread),
        })
    }

    /// Asks the task to stop after its current buffer.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    /// Stops the task and hands the playback device back.
    pub fn join(mut self) -> Result<DeviceHandle> {
        self.request_shutdown();
        self.thread
            .take()
            .ok_or_else(|| ScopeError::msg("tone task already joined"))?
            .join()
            .map_err(|_| ScopeError::msg("tone task panicked"))
    }
}

impl Drop for ToneTask {
    fn drop(&mut self) {
        self.request_shutdown();
    }
}

fn run_tone_task(
    mut device: DeviceHandle,
    tones: ToneSet,
    config: ToneConfig,
    shutdown: Arc<AtomicBool>,
) -> DeviceHandle {
    let mut synth = ToneSynth::for_device(tones, &device, &config);
    tracing::debug!(frames = synth.frames_per_write(), "tone task started");

    while !shutdown.load(Ordering::Acquire) {
        match synth.step(&mut device) {
            SynthStep::Wrote(_) => thread::yield_now(),
            SynthStep::Idle | SynthStep::Stopped => thread::sleep(config.idle_poll()),
        }
    }

    if synth.state() == SynthState::Playing {
        device.drop_pending();
    }
    tracing::debug!("tone task stopped");
    device
}
