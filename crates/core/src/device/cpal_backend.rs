//! Host audio endpoints through CPAL.
//!
//! CPAL is callback driven while the rest of the pipeline expects blocking,
//! period-sized transfers. Each endpoint therefore owns a dedicated thread
//! that keeps the `cpal::Stream` alive (streams are not `Send` on every
//! platform), and samples cross between the callback and the blocking side
//! through a lock-free SPSC ring:
//!
//! ```text
//!  capture:  device callback ──push──► rtrb ring ──read()──► DeviceHandle
//!  playback: DeviceHandle ──write()──► rtrb ring ──pop────► device callback
//! ```
//!
//! A capture ring that fills up latches an overrun and a playback ring that
//! runs dry while the stream is running latches an underrun. Either stays set
//! until [`PcmDriver::prepare`], mirroring how a kernel PCM stream stops on an
//! xrun.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    BufferSize, FromSample, Sample, SampleFormat, SizedSample, StreamConfig,
    SupportedBufferSize, SupportedStreamConfig, SupportedStreamConfigRange,
};
use rtrb::{Consumer, Producer, RingBuffer};

use super::{Direction, HwParams, HwRequest, PcmBackend, PcmDriver, PcmFault};
use crate::{Result, ScopeError};

const MIN_POLL: Duration = Duration::from_millis(1);

/// Backend for the default CPAL host.
#[derive(Debug, Clone, Default)]
pub struct CpalBackend {
    device_name: Option<String>,
}

/// One endpoint reported by [`CpalBackend::list_endpoints`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointInfo {
    pub name: String,
    pub direction: Direction,
    pub is_default: bool,
}

impl CpalBackend {
    /// Uses the host's default input and output devices.
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses the named device for both directions.
    pub fn with_device(name: impl Into<String>) -> Self {
        Self {
            device_name: Some(name.into()),
        }
    }

    /// Lists capture and playback endpoints of the default host.
    pub fn list_endpoints() -> Result<Vec<EndpointInfo>> {
        let host = cpal::default_host();
        let default_input = host.default_input_device().and_then(|d| d.name().ok());
        let default_output = host.default_output_device().and_then(|d| d.name().ok());

        let mut endpoints = Vec::new();
        let inputs = host
            .input_devices()
            .map_err(|e| ScopeError::DeviceUnavailable(e.to_string()))?;
        for device in inputs {
            if let Ok(name) = device.name() {
                endpoints.push(EndpointInfo {
                    is_default: default_input.as_deref() == Some(name.as_str()),
                    name,
                    direction: Direction::Capture,
                });
            }
        }

        let outputs = host
            .output_devices()
            .map_err(|e| ScopeError::DeviceUnavailable(e.to_string()))?;
        for device in outputs {
            if let Ok(name) = device.name() {
                endpoints.push(EndpointInfo {
                    is_default: default_output.as_deref() == Some(name.as_str()),
                    name,
                    direction: Direction::Playback,
                });
            }
        }

        Ok(endpoints)
    }

    fn find_device(&self, direction: Direction) -> Result<cpal::Device> {
        let host = cpal::default_host();

        let Some(wanted) = &self.device_name else {
            let device = match direction {
                Direction::Capture => host.default_input_device(),
                Direction::Playback => host.default_output_device(),
            };
            return device.ok_or_else(|| {
                ScopeError::DeviceUnavailable(format!("no default {direction} device"))
            });
        };

        let mut devices = match direction {
            Direction::Capture => host.input_devices(),
            Direction::Playback => host.output_devices(),
        }
        .map_err(|e| ScopeError::DeviceUnavailable(e.to_string()))?;

        devices
            .find(|device| device.name().map(|name| name == *wanted).unwrap_or(false))
            .ok_or_else(|| {
                ScopeError::DeviceUnavailable(format!("no {direction} device named `{wanted}`"))
            })
    }
}

impl PcmBackend for CpalBackend {
    fn open(&self, direction: Direction) -> Result<Box<dyn PcmDriver>> {
        let device = self.find_device(direction)?;
        tracing::debug!(
            %direction,
            device = device.name().unwrap_or_else(|_| "unknown".to_string()),
            "opened audio endpoint"
        );

        Ok(Box::new(CpalPcm {
            direction,
            device: Some(device),
            shared: Arc::new(StreamFlags::default()),
            ring: None,
            params: None,
            poll: MIN_POLL,
            stop_tx: None,
            thread: None,
        }))
    }
}

/// Flags shared between the device callback and the blocking side.
#[derive(Debug, Default)]
struct StreamFlags {
    xrun: AtomicBool,
    /// Playback only: the callback consumes queued samples.
    running: AtomicBool,
    prepared: AtomicBool,
    /// Playback only: the callback discards everything queued.
    flush: AtomicBool,
    failed: AtomicBool,
}

enum Ring {
    Capture(Consumer<i16>),
    Playback(Producer<i16>),
}

enum CallbackEnd {
    Capture(Producer<i16>),
    Playback(Consumer<i16>),
}

struct CpalPcm {
    direction: Direction,
    device: Option<cpal::Device>,
    shared: Arc<StreamFlags>,
    ring: Option<Ring>,
    params: Option<HwParams>,
    poll: Duration,
    stop_tx: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl CpalPcm {
    fn channels(&self) -> usize {
        self.params
            .map(|params| usize::from(params.channels))
            .unwrap_or(1)
    }

}

/// Latched stream fault, device loss first.
fn stream_fault(flags: &StreamFlags) -> std::result::Result<(), PcmFault> {
    if flags.failed.load(Ordering::Acquire) {
        return Err(PcmFault::Io("audio device is no longer available".into()));
    }
    if flags.xrun.load(Ordering::Acquire) {
        return Err(PcmFault::Xrun);
    }
    Ok(())
}

/// Empties whatever is queued in a ring.
fn discard_queued(consumer: &mut Consumer<i16>) {
    let queued = consumer.slots();
    if let Ok(chunk) = consumer.read_chunk(queued) {
        chunk.commit_all();
    }
}

impl PcmDriver for CpalPcm {
    fn apply(&mut self, request: &HwRequest) -> Result<HwParams> {
        let device = self.device.take().ok_or_else(|| {
            ScopeError::ConfigurationRejected("stream is already configured".into())
        })?;

        let (supported, period_frames) = negotiate(&device, self.direction, request)?;
        let format = supported.sample_format();
        let params = HwParams {
            channels: request.channels,
            rate: supported.sample_rate().0,
            period_frames,
            buffer_frames: period_frames * request.buffer_periods.max(2),
        };
        let config = StreamConfig {
            channels: params.channels,
            sample_rate: supported.sample_rate(),
            buffer_size: match supported.buffer_size() {
                SupportedBufferSize::Range { .. } => BufferSize::Fixed(period_frames as u32),
                SupportedBufferSize::Unknown => BufferSize::Default,
            },
        };

        let (producer, consumer) =
            RingBuffer::<i16>::new(params.buffer_frames * usize::from(params.channels));
        let end = match self.direction {
            Direction::Capture => {
                self.ring = Some(Ring::Capture(consumer));
                CallbackEnd::Capture(producer)
            }
            Direction::Playback => {
                self.ring = Some(Ring::Playback(producer));
                CallbackEnd::Playback(consumer)
            }
        };

        self.shared.prepared.store(true, Ordering::Release);
        let (ready_tx, ready_rx) = mpsc::channel();
        let (stop_tx, stop_rx) = mpsc::channel();
        let shared = self.shared.clone();
        let thread = thread::Builder::new()
            .name(format!("pcm-{}", self.direction))
            .spawn(move || run_stream(device, config, format, end, shared, ready_tx, stop_rx))
            .map_err(|e| ScopeError::DeviceUnavailable(e.to_string()))?;

        let started = ready_rx.recv().unwrap_or_else(|_| {
            Err(ScopeError::ConfigurationRejected(
                "stream thread exited before starting".into(),
            ))
        });
        if let Err(err) = started {
            let _ = thread.join();
            return Err(err);
        }

        self.poll = Duration::from_micros(params.period_us() / 4).max(MIN_POLL);
        self.params = Some(params);
        self.stop_tx = Some(stop_tx);
        self.thread = Some(thread);
        Ok(params)
    }

    fn wait_ready(&mut self) {
        let period = self.params.map(|p| p.period_samples()).unwrap_or(0);
        let Some(Ring::Playback(producer)) = &self.ring else {
            return;
        };

        while producer.slots() < period
            && self.shared.prepared.load(Ordering::Acquire)
            && !self.shared.xrun.load(Ordering::Acquire)
            && !self.shared.failed.load(Ordering::Acquire)
        {
            thread::sleep(self.poll);
        }
    }

    fn read(&mut self, buf: &mut [i16], frames: usize) -> std::result::Result<usize, PcmFault> {
        let channels = self.channels();
        let wanted = frames.min(buf.len() / channels) * channels;
        stream_fault(&self.shared)?;
        let Some(Ring::Capture(consumer)) = &mut self.ring else {
            return Err(PcmFault::Io("not a configured capture stream".into()));
        };

        while consumer.slots() < wanted {
            stream_fault(&self.shared)?;
            thread::sleep(self.poll);
        }

        let chunk = consumer
            .read_chunk(wanted)
            .map_err(|e| PcmFault::Io(e.to_string()))?;
        let (first, second) = chunk.as_slices();
        buf[..first.len()].copy_from_slice(first);
        buf[first.len()..wanted].copy_from_slice(second);
        chunk.commit_all();

        Ok(wanted / channels)
    }

    fn write(&mut self, buf: &[i16], frames: usize) -> std::result::Result<usize, PcmFault> {
        let channels = self.channels();
        let wanted = frames.min(buf.len() / channels) * channels;
        stream_fault(&self.shared)?;
        if !self.shared.prepared.load(Ordering::Acquire) {
            return Err(PcmFault::Io("stream not prepared".into()));
        }
        let Some(Ring::Playback(producer)) = &mut self.ring else {
            return Err(PcmFault::Io("not a configured playback stream".into()));
        };

        let mut written = 0;
        while written < wanted {
            let room = producer.slots() / channels * channels;
            let count = room.min(wanted - written);
            if count > 0 {
                let chunk = producer
                    .write_chunk_uninit(count)
                    .map_err(|e| PcmFault::Io(e.to_string()))?;
                written += chunk.fill_from_iter(buf[written..wanted].iter().copied());
                self.shared.running.store(true, Ordering::Release);
                continue;
            }

            // Frames already queued are lost with the stream.
            stream_fault(&self.shared)?;
            thread::sleep(self.poll);
        }

        Ok(written / channels)
    }

    fn prepare(&mut self) -> std::result::Result<(), PcmFault> {
        if self.shared.failed.load(Ordering::Acquire) {
            return Err(PcmFault::Io("audio device is no longer available".into()));
        }

        if let Some(Ring::Capture(consumer)) = &mut self.ring {
            // Stale samples from before the overrun.
            discard_queued(consumer);
        }

        self.shared.running.store(false, Ordering::Release);
        self.shared.xrun.store(false, Ordering::Release);
        self.shared.prepared.store(true, Ordering::Release);
        Ok(())
    }

    fn drop_pending(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        self.shared.prepared.store(false, Ordering::Release);
        self.shared.flush.store(true, Ordering::Release);
    }

    fn drain(&mut self) {
        if let Some(Ring::Playback(producer)) = &self.ring {
            let capacity = producer.buffer().capacity();
            while producer.slots() < capacity
                && self.shared.running.load(Ordering::Acquire)
                && !self.shared.failed.load(Ordering::Acquire)
            {
                thread::sleep(self.poll);
            }
        }
        self.shared.running.store(false, Ordering::Release);
        self.shared.prepared.store(false, Ordering::Release);
    }
}

impl Drop for CpalPcm {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Picks the configuration whose rate range is closest to the request,
/// preferring formats that convert losslessly to signed 16-bit.
fn negotiate(
    device: &cpal::Device,
    direction: Direction,
    request: &HwRequest,
) -> Result<(SupportedStreamConfig, usize)> {
    let ranges: Vec<SupportedStreamConfigRange> = match direction {
        Direction::Capture => device.supported_input_configs().map(|c| c.collect()),
        Direction::Playback => device.supported_output_configs().map(|c| c.collect()),
    }
    .map_err(|e| ScopeError::ConfigurationRejected(e.to_string()))?;

    let range = ranges
        .iter()
        .filter(|range| range.channels() == request.channels)
        .filter_map(|range| format_rank(range.sample_format()).map(|rank| (range, rank)))
        .min_by_key(|(range, rank)| (rate_distance(range, request.rate), *rank))
        .map(|(range, _)| range)
        .ok_or_else(|| {
            ScopeError::ConfigurationRejected(format!(
                "no interleaved {}-channel {direction} configuration in a supported format",
                request.channels
            ))
        })?;

    let rate = request
        .rate
        .max(range.min_sample_rate().0)
        .min(range.max_sample_rate().0);
    let supported = range.clone().with_sample_rate(cpal::SampleRate(rate));

    let period_frames = clamp_period(supported.buffer_size(), request.period_frames);
    Ok((supported, period_frames))
}

/// Nearest period the device's buffer size range allows.
fn clamp_period(buffer_size: &SupportedBufferSize, requested: usize) -> usize {
    match buffer_size {
        SupportedBufferSize::Range { min, max } => {
            requested.max(*min as usize).min(*max as usize)
        }
        SupportedBufferSize::Unknown => requested,
    }
}

fn format_rank(format: SampleFormat) -> Option<u8> {
    match format {
        SampleFormat::I16 => Some(0),
        SampleFormat::F32 => Some(1),
        SampleFormat::U16 => Some(2),
        _ => None,
    }
}

fn rate_distance(range: &SupportedStreamConfigRange, rate: u32) -> u32 {
    let (min, max) = (range.min_sample_rate().0, range.max_sample_rate().0);
    if rate < min {
        min - rate
    } else if rate > max {
        rate - max
    } else {
        0
    }
}

fn run_stream(
    device: cpal::Device,
    config: StreamConfig,
    format: SampleFormat,
    end: CallbackEnd,
    shared: Arc<StreamFlags>,
    ready_tx: mpsc::Sender<Result<()>>,
    stop_rx: mpsc::Receiver<()>,
) {
    let stream = build_stream(&device, &config, format, end, shared).and_then(|stream| {
        stream
            .play()
            .map_err(|e| ScopeError::ConfigurationRejected(e.to_string()))?;
        Ok(stream)
    });

    let stream = match stream {
        Ok(stream) => stream,
        Err(err) => {
            let _ = ready_tx.send(Err(err));
            return;
        }
    };
    let _ = ready_tx.send(Ok(()));

    // Returns on stop or when the driver is dropped.
    let _ = stop_rx.recv();
    drop(stream);
}

fn build_stream(
    device: &cpal::Device,
    config: &StreamConfig,
    format: SampleFormat,
    end: CallbackEnd,
    shared: Arc<StreamFlags>,
) -> Result<cpal::Stream> {
    let stream = match end {
        CallbackEnd::Capture(producer) => match format {
            SampleFormat::I16 => build_capture::<i16>(device, config, producer, shared),
            SampleFormat::F32 => build_capture::<f32>(device, config, producer, shared),
            SampleFormat::U16 => build_capture::<u16>(device, config, producer, shared),
            other => {
                return Err(ScopeError::ConfigurationRejected(format!(
                    "unsupported sample format {other:?}"
                )))
            }
        },
        CallbackEnd::Playback(consumer) => match format {
            SampleFormat::I16 => build_playback::<i16>(device, config, consumer, shared),
            SampleFormat::F32 => build_playback::<f32>(device, config, consumer, shared),
            SampleFormat::U16 => build_playback::<u16>(device, config, consumer, shared),
            other => {
                return Err(ScopeError::ConfigurationRejected(format!(
                    "unsupported sample format {other:?}"
                )))
            }
        },
    };

    stream.map_err(|e| ScopeError::ConfigurationRejected(e.to_string()))
}

fn error_callback(
    direction: Direction,
    shared: Arc<StreamFlags>,
) -> impl FnMut(cpal::StreamError) + Send + 'static {
    move |err| {
        tracing::error!(%direction, %err, "audio stream error");
        if matches!(err, cpal::StreamError::DeviceNotAvailable) {
            shared.failed.store(true, Ordering::Release);
        }
    }
}

fn build_capture<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut producer: Producer<i16>,
    shared: Arc<StreamFlags>,
) -> std::result::Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample,
    i16: FromSample<T>,
{
    let on_error = error_callback(Direction::Capture, shared.clone());
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            push_captured(data, &mut producer, &shared)
        },
        on_error,
        None,
    )
}

fn build_playback<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut consumer: Consumer<i16>,
    shared: Arc<StreamFlags>,
) -> std::result::Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample + FromSample<i16>,
{
    let on_error = error_callback(Direction::Playback, shared.clone());
    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            pull_playback(data, &mut consumer, &shared)
        },
        on_error,
        None,
    )
}

/// Capture callback body. A callback that does not fit in the ring latches
/// an overrun; nothing more is queued until the stream is prepared.
fn push_captured<T>(data: &[T], producer: &mut Producer<i16>, flags: &StreamFlags)
where
    T: SizedSample,
    i16: FromSample<T>,
{
    if flags.xrun.load(Ordering::Acquire) {
        return;
    }
    match producer.write_chunk_uninit(data.len()) {
        Ok(chunk) => {
            chunk.fill_from_iter(data.iter().map(|&sample| i16::from_sample(sample)));
        }
        Err(_) => flags.xrun.store(true, Ordering::Release),
    }
}

/// Playback callback body. Running out of queued samples while running
/// latches an underrun; the rest of the callback is silence.
fn pull_playback<T>(data: &mut [T], consumer: &mut Consumer<i16>, flags: &StreamFlags)
where
    T: SizedSample + FromSample<i16>,
{
    if flags.flush.swap(false, Ordering::AcqRel) {
        discard_queued(consumer);
    }

    let mut filled = 0;
    if flags.running.load(Ordering::Acquire) {
        let available = data.len().min(consumer.slots());
        if let Ok(chunk) = consumer.read_chunk(available) {
            let (first, second) = chunk.as_slices();
            for (out, &sample) in data.iter_mut().zip(first.iter().chain(second)) {
                *out = T::from_sample(sample);
            }
            filled = available;
            chunk.commit_all();
        }

        if filled < data.len() {
            flags.running.store(false, Ordering::Release);
            flags.xrun.store(true, Ordering::Release);
        }
    }

    for out in &mut data[filled..] {
        *out = T::EQUILIBRIUM;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpal::SampleRate;

    fn driver(direction: Direction, ring: Ring, capacity: usize) -> CpalPcm {
        let shared = Arc::new(StreamFlags::default());
        shared.prepared.store(true, Ordering::Release);
        CpalPcm {
            direction,
            device: None,
            shared,
            ring: Some(ring),
            params: Some(HwParams {
                channels: 1,
                rate: 8_000,
                period_frames: capacity / 4,
                buffer_frames: capacity,
            }),
            poll: MIN_POLL,
            stop_tx: None,
            thread: None,
        }
    }

    fn push_all(producer: &mut Producer<i16>, samples: &[i16]) {
        for &sample in samples {
            producer.push(sample).unwrap();
        }
    }

    #[test]
    fn capture_overflow_latches_overrun() {
        let (mut producer, consumer) = RingBuffer::<i16>::new(8);
        let flags = StreamFlags::default();

        push_captured(&[1_i16; 6], &mut producer, &flags);
        assert!(!flags.xrun.load(Ordering::Acquire));
        assert_eq!(consumer.slots(), 6);

        push_captured(&[2_i16; 6], &mut producer, &flags);
        assert!(flags.xrun.load(Ordering::Acquire));

        // Latched: further callbacks queue nothing even when they would fit.
        push_captured(&[3_i16; 1], &mut producer, &flags);
        assert_eq!(consumer.slots(), 6);
    }

    #[test]
    fn capture_converts_float_samples() {
        let (mut producer, mut consumer) = RingBuffer::<i16>::new(8);
        let flags = StreamFlags::default();

        push_captured(&[0.5_f32, -1.0, 0.0], &mut producer, &flags);

        let first = consumer.pop().unwrap();
        assert!((16_000..=16_500).contains(&first), "{first}");
        assert_eq!(consumer.pop().unwrap(), i16::MIN);
        assert_eq!(consumer.pop().unwrap(), 0);
    }

    #[test]
    fn playback_starvation_latches_underrun() {
        let (mut producer, mut consumer) = RingBuffer::<i16>::new(16);
        let flags = StreamFlags::default();
        flags.running.store(true, Ordering::Release);
        push_all(&mut producer, &[5, 6, 7, 8]);

        let mut out = [9_i16; 8];
        pull_playback(&mut out, &mut consumer, &flags);

        assert_eq!(out, [5, 6, 7, 8, 0, 0, 0, 0]);
        assert!(flags.xrun.load(Ordering::Acquire));
        assert!(!flags.running.load(Ordering::Acquire));
    }

    #[test]
    fn stopped_playback_is_silent_without_xrun() {
        let (mut producer, mut consumer) = RingBuffer::<i16>::new(16);
        let flags = StreamFlags::default();
        push_all(&mut producer, &[5, 6]);

        let mut out = [1_u16; 4];
        pull_playback(&mut out, &mut consumer, &flags);

        assert_eq!(out, [u16::EQUILIBRIUM; 4]);
        assert!(!flags.xrun.load(Ordering::Acquire));
        assert_eq!(consumer.slots(), 2);
    }

    #[test]
    fn flush_discards_queued_playback() {
        let (mut producer, mut consumer) = RingBuffer::<i16>::new(16);
        let flags = StreamFlags::default();
        push_all(&mut producer, &[5, 6, 7, 8]);
        flags.flush.store(true, Ordering::Release);

        let mut out = [1_i16; 4];
        pull_playback(&mut out, &mut consumer, &flags);

        assert_eq!(out, [0; 4]);
        assert_eq!(consumer.slots(), 0);
        assert!(!flags.flush.load(Ordering::Acquire));
    }

    #[test]
    fn prepare_discards_stale_capture() {
        let (mut producer, consumer) = RingBuffer::<i16>::new(32);
        let mut pcm = driver(Direction::Capture, Ring::Capture(consumer), 32);
        push_all(&mut producer, &[1; 10]);
        pcm.shared.xrun.store(true, Ordering::Release);

        let mut buf = [0_i16; 4];
        assert_eq!(pcm.read(&mut buf, 4), Err(PcmFault::Xrun));

        pcm.prepare().unwrap();
        assert!(!pcm.shared.xrun.load(Ordering::Acquire));
        push_all(&mut producer, &[7; 4]);
        assert_eq!(pcm.read(&mut buf, 4), Ok(4));
        assert_eq!(buf, [7; 4]);
    }

    #[test]
    fn device_loss_during_write_is_an_error() {
        let (producer, _consumer) = RingBuffer::<i16>::new(4);
        let mut pcm = driver(Direction::Playback, Ring::Playback(producer), 4);
        let flags = pcm.shared.clone();

        let failer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            flags.failed.store(true, Ordering::Release);
        });
        // Only half fits; the rest waits on a ring nobody drains.
        let result = pcm.write(&[3; 8], 8);
        failer.join().unwrap();

        assert!(matches!(result, Err(PcmFault::Io(_))));
        assert!(pcm.prepare().is_err());
    }

    #[test]
    fn underrun_during_write_is_an_xrun() {
        let (producer, _consumer) = RingBuffer::<i16>::new(4);
        let mut pcm = driver(Direction::Playback, Ring::Playback(producer), 4);
        let flags = pcm.shared.clone();

        let starver = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            flags.xrun.store(true, Ordering::Release);
        });
        let result = pcm.write(&[3; 8], 8);
        starver.join().unwrap();

        assert_eq!(result, Err(PcmFault::Xrun));
    }

    #[test]
    fn rate_distance_to_supported_range() {
        let range = SupportedStreamConfigRange::new(
            2,
            SampleRate(22_050),
            SampleRate(48_000),
            SupportedBufferSize::Unknown,
            SampleFormat::I16,
        );

        assert_eq!(rate_distance(&range, 44_100), 0);
        assert_eq!(rate_distance(&range, 8_000), 14_050);
        assert_eq!(rate_distance(&range, 96_000), 48_000);
    }

    #[test]
    fn prefers_lossless_formats() {
        assert_eq!(format_rank(SampleFormat::I16), Some(0));
        assert!(format_rank(SampleFormat::F32) < format_rank(SampleFormat::U16));
        assert_eq!(format_rank(SampleFormat::I32), None);
    }

    #[test]
    fn period_clamped_to_buffer_range() {
        let range = SupportedBufferSize::Range { min: 64, max: 1024 };

        assert_eq!(clamp_period(&range, 1363), 1024);
        assert_eq!(clamp_period(&range, 16), 64);
        assert_eq!(clamp_period(&range, 256), 256);
        assert_eq!(clamp_period(&SupportedBufferSize::Unknown, 1363), 1363);
    }
}
