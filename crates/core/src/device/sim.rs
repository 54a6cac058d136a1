//! Deterministic in-process endpoint.
//!
//! Every transfer can be scripted to fail through [`SimFault`], and a
//! [`SimProbe`] exposes what the driver saw after its handle has been moved
//! elsewhere (into the tone task, for instance). With real-time pacing
//! enabled the simulated device blocks for the duration of the audio it
//! moves, which is enough to drive the application without hardware.

use std::{
    collections::{HashSet, VecDeque},
    f64::consts::TAU,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use super::{Direction, HwParams, HwRequest, PcmBackend, PcmDriver, PcmFault};
use crate::{Result, ScopeError};

/// Scripted outcome for the next transfer on a simulated endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimFault {
    /// Overrun on capture, underrun on playback. Latches until prepare.
    Xrun,
    /// Driver error other than an xrun.
    Error(String),
    /// Transfer succeeds but moves at most this many frames.
    Short(usize),
}

/// Signal produced by a simulated capture endpoint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SimSignal {
    Silence,
    Sine { hz: f64, amplitude: i16 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    Setup,
    Prepared,
    Running,
    Xrun,
}

#[derive(Debug, Clone)]
struct SimConfig {
    rates: Vec<u32>,
    min_period: usize,
    max_period: usize,
    max_channels: u16,
    unavailable: HashSet<Direction>,
    realtime: bool,
    record_writes: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            rates: Vec::new(),
            min_period: 1,
            max_period: usize::MAX,
            max_channels: 8,
            unavailable: HashSet::new(),
            realtime: false,
            record_writes: true,
        }
    }
}

#[derive(Debug)]
struct SimDevice {
    params: Option<HwParams>,
    stream: StreamState,
    faults: VecDeque<SimFault>,
    signal: SimSignal,
    phase: f64,
    written: Vec<i16>,
    reads: usize,
    writes: usize,
    waits: usize,
    prepares: usize,
    drops: usize,
    drains: usize,
}

impl SimDevice {
    fn new() -> Self {
        Self {
            params: None,
            stream: StreamState::Setup,
            faults: VecDeque::new(),
            signal: SimSignal::Silence,
            phase: 0.0,
            written: Vec::new(),
            reads: 0,
            writes: 0,
            waits: 0,
            prepares: 0,
            drops: 0,
            drains: 0,
        }
    }

    /// Checks stream state and consumes the next scripted fault. Returns the
    /// frame limit for this transfer.
    fn begin_transfer(&mut self, frames: usize) -> std::result::Result<usize, PcmFault> {
        match self.stream {
            StreamState::Xrun => return Err(PcmFault::Xrun),
            StreamState::Setup => return Err(PcmFault::Io("stream not prepared".into())),
            StreamState::Prepared | StreamState::Running => {}
        }

        match self.faults.pop_front() {
            Some(SimFault::Xrun) => {
                self.stream = StreamState::Xrun;
                Err(PcmFault::Xrun)
            }
            Some(SimFault::Error(reason)) => Err(PcmFault::Io(reason)),
            Some(SimFault::Short(limit)) => {
                self.stream = StreamState::Running;
                Ok(frames.min(limit))
            }
            None => {
                self.stream = StreamState::Running;
                Ok(frames)
            }
        }
    }

    fn synthesize(&mut self, out: &mut [i16], channels: usize, rate: u32) {
        for frame in out.chunks_exact_mut(channels) {
            let value = match self.signal {
                SimSignal::Silence => 0,
                SimSignal::Sine { hz, amplitude } => {
                    let value = (f64::from(amplitude) * (TAU * self.phase).sin()).round() as i16;
                    self.phase = (self.phase + hz / f64::from(rate)).fract();
                    value
                }
            };
            frame.fill(value);
        }
    }

    fn pacing(&self, frames: usize, realtime: bool) -> Option<Duration> {
        let params = self.params?;
        realtime.then(|| {
            Duration::from_micros((frames as u64 * 1_000_000) / u64::from(params.rate.max(1)))
        })
    }
}

fn lock(state: &Mutex<SimDevice>) -> MutexGuard<'_, SimDevice> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Backend handing out simulated endpoints. Each direction keeps its state
/// across reopen so a probe taken up front stays valid.
#[derive(Debug, Clone)]
pub struct SimBackend {
    config: SimConfig,
    capture: Arc<Mutex<SimDevice>>,
    playback: Arc<Mutex<SimDevice>>,
}

impl Default for SimBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SimBackend {
    pub fn new() -> Self {
        Self {
            config: SimConfig::default(),
            capture: Arc::new(Mutex::new(SimDevice::new())),
            playback: Arc::new(Mutex::new(SimDevice::new())),
        }
    }

    /// Restricts the rates the device accepts. Requests snap to the nearest.
    pub fn with_rates(mut self, rates: &[u32]) -> Self {
        self.config.rates = rates.to_vec();
        self
    }

    pub fn with_period_limits(mut self, min: usize, max: usize) -> Self {
        self.config.min_period = min.max(1);
        self.config.max_period = max.max(self.config.min_period);
        self
    }

    pub fn with_max_channels(mut self, channels: u16) -> Self {
        self.config.max_channels = channels;
        self
    }

    pub fn unavailable(mut self, direction: Direction) -> Self {
        self.config.unavailable.insert(direction);
        self
    }

    /// Blocks transfers for the wall-clock time of the audio they move.
    pub fn realtime(mut self, realtime: bool) -> Self {
        self.config.realtime = realtime;
        self
    }

    /// Keeps every written sample for [`SimProbe::written`]. On by default;
    /// long running sessions should turn it off.
    pub fn record_writes(mut self, record: bool) -> Self {
        self.config.record_writes = record;
        self
    }

    pub fn with_signal(self, signal: SimSignal) -> Self {
        lock(&self.capture).signal = signal;
        self
    }

    pub fn probe(&self, direction: Direction) -> SimProbe {
        SimProbe {
            state: self.state(direction).clone(),
        }
    }

    fn state(&self, direction: Direction) -> &Arc<Mutex<SimDevice>> {
        match direction {
            Direction::Capture => &self.capture,
            Direction::Playback => &self.playback,
        }
    }
}

impl PcmBackend for SimBackend {
    fn open(&self, direction: Direction) -> Result<Box<dyn PcmDriver>> {
        if self.config.unavailable.contains(&direction) {
            return Err(ScopeError::DeviceUnavailable(format!(
                "simulated {direction} endpoint is disabled"
            )));
        }

        Ok(Box::new(SimPcm {
            config: self.config.clone(),
            state: self.state(direction).clone(),
        }))
    }
}

struct SimPcm {
    config: SimConfig,
    state: Arc<Mutex<SimDevice>>,
}

impl PcmDriver for SimPcm {
    fn apply(&mut self, request: &HwRequest) -> Result<HwParams> {
        if request.channels > self.config.max_channels {
            return Err(ScopeError::ConfigurationRejected(format!(
                "{} channels requested, device supports {}",
                request.channels, self.config.max_channels
            )));
        }

        let rate = self
            .config
            .rates
            .iter()
            .copied()
            .min_by_key(|rate| rate.abs_diff(request.rate))
            .unwrap_or(request.rate);
        let period_frames = request
            .period_frames
            .clamp(self.config.min_period, self.config.max_period);
        let params = HwParams {
            channels: request.channels,
            rate,
            period_frames,
            buffer_frames: period_frames * request.buffer_periods.max(1),
        };

        let mut device = lock(&self.state);
        device.params = Some(params);
        device.stream = StreamState::Prepared;
        device.phase = 0.0;
        Ok(params)
    }

    fn wait_ready(&mut self) {
        lock(&self.state).waits += 1;
    }

    fn read(&mut self, buf: &mut [i16], frames: usize) -> std::result::Result<usize, PcmFault> {
        let (transferred, pause) = {
            let mut device = lock(&self.state);
            device.reads += 1;
            let params = device
                .params
                .ok_or_else(|| PcmFault::Io("hardware parameters not set".into()))?;
            let channels = usize::from(params.channels);
            let frames = frames.min(buf.len() / channels);

            let transferred = device.begin_transfer(frames)?;
            device.synthesize(&mut buf[..transferred * channels], channels, params.rate);
            (transferred, device.pacing(transferred, self.config.realtime))
        };

        if let Some(pause) = pause {
            std::thread::sleep(pause);
        }
        Ok(transferred)
    }

    fn write(&mut self, buf: &[i16], frames: usize) -> std::result::Result<usize, PcmFault> {
        let (transferred, pause) = {
            let mut device = lock(&self.state);
            device.writes += 1;
            let params = device
                .params
                .ok_or_else(|| PcmFault::Io("hardware parameters not set".into()))?;
            let channels = usize::from(params.channels);
            let frames = frames.min(buf.len() / channels);

            let transferred = device.begin_transfer(frames)?;
            if self.config.record_writes {
                device
                    .written
                    .extend_from_slice(&buf[..transferred * channels]);
            }
            (transferred, device.pacing(transferred, self.config.realtime))
        };

        if let Some(pause) = pause {
            std::thread::sleep(pause);
        }
        Ok(transferred)
    }

    fn prepare(&mut self) -> std::result::Result<(), PcmFault> {
        let mut device = lock(&self.state);
        device.prepares += 1;
        device.stream = StreamState::Prepared;
        Ok(())
    }

    fn drop_pending(&mut self) {
        let mut device = lock(&self.state);
        device.drops += 1;
        device.stream = StreamState::Setup;
    }

    fn drain(&mut self) {
        let mut device = lock(&self.state);
        device.drains += 1;
        device.stream = StreamState::Setup;
    }
}

/// Inspection and scripting handle for one simulated endpoint.
#[derive(Debug, Clone)]
pub struct SimProbe {
    state: Arc<Mutex<SimDevice>>,
}

impl SimProbe {
    /// Queues outcomes for the next transfers, in order.
    pub fn push_faults(&self, faults: impl IntoIterator<Item = SimFault>) {
        lock(&self.state).faults.extend(faults);
    }

    pub fn set_signal(&self, signal: SimSignal) {
        lock(&self.state).signal = signal;
    }

    /// Every sample accepted by playback writes so far.
    pub fn written(&self) -> Vec<i16> {
        lock(&self.state).written.clone()
    }

    pub fn params(&self) -> Option<HwParams> {
        lock(&self.state).params
    }

    pub fn is_xrun(&self) -> bool {
        lock(&self.state).stream == StreamState::Xrun
    }

    pub fn is_running(&self) -> bool {
        lock(&self.state).stream == StreamState::Running
    }

    pub fn read_calls(&self) -> usize {
        lock(&self.state).reads
    }

    pub fn write_calls(&self) -> usize {
        lock(&self.state).writes
    }

    pub fn wait_calls(&self) -> usize {
        lock(&self.state).waits
    }

    pub fn prepare_calls(&self) -> usize {
        lock(&self.state).prepares
    }

    pub fn drop_calls(&self) -> usize {
        lock(&self.state).drops
    }

    pub fn drain_calls(&self) -> usize {
        lock(&self.state).drains
    }
}
