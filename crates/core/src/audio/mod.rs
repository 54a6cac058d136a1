use std::fmt;

use crate::{
    config::AppConfig,
    device::{DeviceHandle, Direction, HwParams, HwRequest, PcmBackend},
    synth::{ToneSet, ToneTask},
    visual::{Canvas, Control, EventHandler, TickOutcome, Visualizer},
    Result,
};

/// One complete audio session: a capture device feeding the visualizer and
/// a playback device owned by the background tone task.
///
/// Everything the session needs is owned here, so several sessions can
/// coexist and [`AudioSession::shutdown`] tears one down completely.
pub struct AudioSession {
    config: AppConfig,
    tones: ToneSet,
    visualizer: Visualizer,
    tone_task: ToneTask,
    capture_params: HwParams,
    playback_params: HwParams,
}

impl AudioSession {
    /// Opens both devices and starts the tone task. Device errors are
    /// returned as-is; they are fatal for the caller.
    pub fn start(backend: &dyn PcmBackend, config: AppConfig) -> Result<Self> {
        let audio = &config.audio;
        let capture = DeviceHandle::open(
            backend,
            Direction::Capture,
            HwRequest {
                channels: audio.capture_channels,
                rate: audio.sample_rate,
                period_frames: audio.capture_period_frames(),
                buffer_periods: audio.buffer_periods,
            },
        )?;
        let playback = DeviceHandle::open(
            backend,
            Direction::Playback,
            HwRequest {
                channels: audio.playback_channels,
                rate: audio.sample_rate,
                period_frames: audio.period_frames(),
                buffer_periods: audio.buffer_periods,
            },
        )?;
        let capture_params = *capture.params();
        let playback_params = *playback.params();

        let tones = ToneSet::new();
        let tone_task = ToneTask::spawn(playback, tones.clone(), config.tone.clone())?;
        let visualizer = Visualizer::new(capture, tones.clone(), config.display.clone());

        tracing::info!("audio session started");
        Ok(Self {
            config,
            tones,
            visualizer,
            tone_task,
            capture_params,
            playback_params,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Tone flags, shared with the background task.
    pub fn tones(&self) -> &ToneSet {
        &self.tones
    }

    pub fn visualizer(&self) -> &Visualizer {
        &self.visualizer
    }

    pub fn visualizer_mut(&mut self) -> &mut Visualizer {
        &mut self.visualizer
    }

    pub fn capture_params(&self) -> HwParams {
        self.capture_params
    }

    pub fn playback_params(&self) -> HwParams {
        self.playback_params
    }

    /// Runs one visualisation tick.
    pub fn tick(&mut self, canvas: &mut dyn Canvas) -> TickOutcome {
        self.visualizer.tick(canvas)
    }

    /// Silences the tones, gives the task a moment to notice, then drains
    /// and closes both devices.
    pub fn shutdown(self) -> Result<()> {
        let Self {
            config,
            tones,
            visualizer,
            tone_task,
            ..
        } = self;

        tones.clear();
        tone_task.request_shutdown();
        std::thread::sleep(config.tone.shutdown_grace());

        let playback = tone_task.join()?;
        visualizer.into_capture().close();
        playback.close();

        tracing::info!("audio session closed");
        Ok(())
    }
}

impl EventHandler for AudioSession {
    fn update(&mut self, canvas: &mut dyn Canvas) -> Control {
        self.tick(canvas);
        Control::Continue
    }

    fn key(&mut self, key: char, pressed: bool) -> Control {
        self.visualizer.handle_key(key, pressed)
    }

    fn button(&mut self, button: u32, x: i32, y: i32, pressed: bool) -> Control {
        self.visualizer.handle_button(button, x, y, pressed);
        Control::Continue
    }

    fn resize(&mut self, width: i32, height: i32) {
        tracing::debug!(width, height, "canvas resized");
    }
}

impl fmt::Debug for AudioSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioSession")
            .field("visualizer", &self.visualizer)
            .field("capture_params", &self.capture_params)
            .field("playback_params", &self.playback_params)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::device::{SimBackend, SimSignal};
    use crate::visual::RecordingCanvas;
    use crate::ScopeError;

    fn small_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.audio.sample_rate = 8_000;
        config.audio.update_period_ms = 16;
        config.tone.idle_poll_ms = 5;
        config
    }

    #[test]
    fn negotiates_both_directions() {
        let backend = SimBackend::new().with_rates(&[48_000]);
        let session = AudioSession::start(&backend, AppConfig::default()).unwrap();

        assert_eq!(session.capture_params().rate, 48_000);
        assert_eq!(session.capture_params().channels, 1);
        assert_eq!(session.capture_params().period_frames, 1373);
        assert_eq!(session.playback_params().channels, 2);
        assert_eq!(session.playback_params().period_frames, 1363);

        session.shutdown().unwrap();
    }

    #[test]
    fn keys_drive_tones_and_shutdown_drains() {
        let backend = SimBackend::new().with_signal(SimSignal::Sine {
            hz: 440.0,
            amplitude: 4_000,
        });
        let playback = backend.probe(Direction::Playback);
        let capture = backend.probe(Direction::Capture);
        let mut session = AudioSession::start(&backend, small_config()).unwrap();
        let mut canvas = RecordingCanvas::new(400, 300);

        assert_eq!(session.update(&mut canvas), Control::Continue);
        assert!(!canvas.ops().is_empty());

        session.key('3', true);
        assert!(session.tones().is_active(2));
        let deadline = Instant::now() + Duration::from_secs(5);
        while playback.write_calls() == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(playback.write_calls() > 0);
        session.key('3', false);

        assert_eq!(session.key('q', true), Control::Quit);
        session.shutdown().unwrap();

        assert_eq!(playback.drain_calls(), 1);
        assert_eq!(capture.drain_calls(), 0);
    }

    #[test]
    fn held_tone_does_not_accumulate_samples() {
        let backend = SimBackend::new().realtime(true).record_writes(false);
        let playback = backend.probe(Direction::Playback);
        let mut session = AudioSession::start(&backend, small_config()).unwrap();

        session.key('1', true);
        let deadline = Instant::now() + Duration::from_secs(5);
        while playback.write_calls() < 4 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(playback.write_calls() >= 4);
        assert!(playback.written().is_empty());

        session.key('1', false);
        session.shutdown().unwrap();
        assert!(playback.written().is_empty());
    }

    #[test]
    fn startup_fails_without_devices() {
        let backend = SimBackend::new().unavailable(Direction::Playback);
        let err = AudioSession::start(&backend, small_config()).unwrap_err();
        assert!(matches!(err, ScopeError::DeviceUnavailable(_)));
    }
}
