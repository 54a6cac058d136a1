//! Oscilloscope and spectrum drawing.
//!
//! The windowing toolkit is an outside collaborator: it calls into an
//! [`EventHandler`] on every tick and input event and provides a [`Canvas`]
//! to draw on. [`Visualizer`] is the handler that polls the capture device
//! once per tick and draws the waveform, the spectrum below it and any
//! fading click markers.

use crate::{
    analysis::{SpectralAnalyzer, Spectrum},
    config::DisplayConfig,
    device::DeviceHandle,
    synth::ToneSet,
    transfer::{AudioBlock, ReadOutcome},
};

/// Packed `0xRRGGBB` colour.
pub type Rgb = u32;

pub const fn rgb(r: u8, g: u8, b: u8) -> Rgb {
    ((r as u32) << 16) | ((g as u32) << 8) | b as u32
}

pub const GREEN: Rgb = rgb(0x10, 0xa0, 0x10);
pub const GREY: Rgb = rgb(0x60, 0x60, 0x60);
pub const BLACK: Rgb = 0;
pub const WHITE: Rgb = 0xff_ffff;

/// Range amplified samples are wrapped into before they are drawn.
pub const WRAP_MIN: i32 = -32_767;
pub const WRAP_MAX: i32 = 32_766;

/// Drawing primitives offered by the toolkit. Coordinates are pixels with
/// the origin in the top left corner.
pub trait Canvas {
    fn width(&self) -> i32;
    fn height(&self) -> i32;
    fn fill_rectangle(&mut self, x: i32, y: i32, width: i32, height: i32, color: Rgb);
    fn draw_rectangle(&mut self, x: i32, y: i32, width: i32, height: i32, color: Rgb);
    fn draw_line(&mut self, x0: i32, y0: i32, x1: i32, y1: i32, color: Rgb);
    /// Fills the circle inscribed in the `size` square at (`x`, `y`).
    fn fill_circle(&mut self, x: i32, y: i32, size: i32, color: Rgb);
    fn draw_string(&mut self, x: i32, y: i32, text: &str, color: Rgb);
}

/// Whether the toolkit should keep running after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    Quit,
}

/// Callbacks the toolkit invokes.
pub trait EventHandler {
    /// Periodic update tick.
    fn update(&mut self, canvas: &mut dyn Canvas) -> Control;
    fn key(&mut self, key: char, pressed: bool) -> Control;
    fn button(&mut self, button: u32, x: i32, y: i32, pressed: bool) -> Control;
    fn resize(&mut self, _width: i32, _height: i32) {}
}

/// Linear map of `value` from `[in_lo, in_hi]` onto `[out_lo, out_hi]`.
/// Either range may be descending.
pub fn rescale(in_lo: f32, in_hi: f32, value: f32, out_lo: f32, out_hi: f32) -> f32 {
    if in_hi == in_lo {
        return out_lo;
    }
    out_lo + (value - in_lo) * (out_hi - out_lo) / (in_hi - in_lo)
}

/// Wraps `value` into `[min, max]` modulo the width of the range.
pub fn wrap_into(value: i64, min: i32, max: i32) -> i32 {
    let span = i64::from(max) - i64::from(min) + 1;
    (i64::from(min) + (value - i64::from(min)).rem_euclid(span)) as i32
}

/// Adds `amplification` times the sample to itself and wraps the result
/// into [`WRAP_MIN`]..=[`WRAP_MAX`]. Loud signals fold over instead of
/// clipping.
pub fn amplify(sample: i16, amplification: u32) -> i32 {
    let value = i64::from(sample) * (i64::from(amplification) + 1);
    wrap_into(value, WRAP_MIN, WRAP_MAX)
}

/// Tone slot bound to a key: `1`..`9` are slots 0..8, `0` is slot 9 and
/// `-` is slot 10.
pub fn tone_slot_for_key(key: char) -> Option<usize> {
    match key {
        '1'..='9' => Some(key as usize - '1' as usize),
        '0' => Some(9),
        '-' => Some(10),
        _ => None,
    }
}

const MARKER_COUNT: usize = 8;
const MARKER_AFTERGLOW: Rgb = 0xff_c0c0;
/// Red decay per tick; green and blue fall one step faster.
const MARKER_STEP: u8 = (255 / (200 / 30)) as u8;
const MARKER_MAX_SIZE: i32 = 300;

#[derive(Debug, Clone, Copy, Default)]
struct Marker {
    color: Rgb,
    x: i32,
    y: i32,
}

/// Ring of click markers. A fresh marker flashes the canvas on the next
/// tick, then shows as a growing circle that fades to black.
#[derive(Debug, Default)]
pub struct Markers {
    slots: [Marker; MARKER_COUNT],
    next: usize,
}

impl Markers {
    pub fn push(&mut self, x: i32, y: i32) {
        self.slots[self.next] = Marker { color: WHITE, x, y };
        self.next = (self.next + 1) % MARKER_COUNT;
    }

    pub fn active(&self) -> usize {
        self.slots.iter().filter(|m| m.color != BLACK).count()
    }

    pub fn draw(&mut self, canvas: &mut dyn Canvas) {
        let mut flash = false;

        for marker in &mut self.slots {
            match marker.color {
                BLACK => continue,
                WHITE => {
                    flash = true;
                    marker.color = MARKER_AFTERGLOW;
                    continue;
                }
                _ => {}
            }

            if !flash {
                let red = (marker.color >> 16) as i32 & 0xff;
                let size = MARKER_MAX_SIZE - red / 2;
                canvas.fill_circle(
                    marker.x - size / 2,
                    marker.y - size / 2,
                    size,
                    marker.color,
                );
            }
            marker.color = fade(marker.color);
        }

        if flash {
            canvas.fill_rectangle(0, 0, canvas.width(), canvas.height(), WHITE);
        }
    }
}

fn fade(color: Rgb) -> Rgb {
    let [_, r, g, b] = color.to_be_bytes();
    rgb(
        r.saturating_sub(MARKER_STEP),
        g.saturating_sub(MARKER_STEP + 1),
        b.saturating_sub(MARKER_STEP + 1),
    )
}

#[derive(Debug, Clone, Copy)]
pub struct Palette {
    pub background: Rgb,
    pub waveform: Rgb,
    pub spectrum: Rgb,
    pub labels: Rgb,
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            background: BLACK,
            waveform: GREEN,
            spectrum: GREEN,
            labels: GREY,
        }
    }
}

/// What a tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Drawn,
    /// The capture poll produced nothing; the previous frame stays.
    NoData,
    Paused,
}

/// Running tick counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickStats {
    pub drawn: u64,
    pub skipped: u64,
}

/// The per-tick capture and drawing driver.
#[derive(Debug)]
pub struct Visualizer {
    capture: DeviceHandle,
    analyzer: SpectralAnalyzer,
    tones: ToneSet,
    display: DisplayConfig,
    amplification: u32,
    palette: Palette,
    markers: Markers,
    paused: bool,
    stats: TickStats,
}

impl Visualizer {
    pub fn new(capture: DeviceHandle, tones: ToneSet, display: DisplayConfig) -> Self {
        let amplification = display.effective_amplification();
        tracing::info!(amplification, "display amplification");
        let analyzer = SpectralAnalyzer::with_window(capture.params().rate, display.window);

        Self {
            capture,
            analyzer,
            tones,
            display,
            amplification,
            palette: Palette::default(),
            markers: Markers::default(),
            paused: false,
            stats: TickStats::default(),
        }
    }

    pub fn with_palette(mut self, palette: Palette) -> Self {
        self.palette = palette;
        self
    }

    pub fn amplification(&self) -> u32 {
        self.amplification
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn stats(&self) -> TickStats {
        self.stats
    }

    pub fn markers(&self) -> &Markers {
        &self.markers
    }

    /// Releases the capture device, e.g. to close it at shutdown.
    pub fn into_capture(self) -> DeviceHandle {
        self.capture
    }

    /// Polls one capture period and redraws everything from it.
    pub fn tick(&mut self, canvas: &mut dyn Canvas) -> TickOutcome {
        let Self {
            capture,
            analyzer,
            display,
            amplification,
            palette,
            markers,
            paused,
            stats,
            ..
        } = self;

        let block = match capture.read() {
            ReadOutcome::Block(block) => block,
            ReadOutcome::NoData => {
                stats.skipped += 1;
                return TickOutcome::NoData;
            }
        };
        if *paused {
            return TickOutcome::Paused;
        }

        let (width, height) = (canvas.width(), canvas.height());
        canvas.fill_rectangle(0, 0, width, height, palette.background);
        draw_waveform(
            canvas,
            &block,
            *amplification,
            display.waveform_margin,
            palette.waveform,
        );

        match analyzer.analyze(&block) {
            Ok(spectrum) => draw_spectrum(canvas, &spectrum, display, palette),
            Err(err) => tracing::warn!(%err, "spectrum skipped"),
        }

        markers.draw(canvas);
        stats.drawn += 1;
        TickOutcome::Drawn
    }

    pub fn handle_key(&mut self, key: char, pressed: bool) -> Control {
        if let Some(slot) = tone_slot_for_key(key) {
            self.tones.set(slot, pressed);
            return Control::Continue;
        }

        match key {
            ' ' if pressed => {
                self.paused = !self.paused;
                tracing::debug!(paused = self.paused, "pause toggled");
            }
            'q' if pressed => return Control::Quit,
            _ => {}
        }
        Control::Continue
    }

    pub fn handle_button(&mut self, button: u32, x: i32, y: i32, pressed: bool) {
        tracing::debug!(button, x, y, pressed, "pointer button");
        if pressed {
            self.markers.push(x, y);
        }
    }
}

impl EventHandler for Visualizer {
    fn update(&mut self, canvas: &mut dyn Canvas) -> Control {
        self.tick(canvas);
        Control::Continue
    }

    fn key(&mut self, key: char, pressed: bool) -> Control {
        self.handle_key(key, pressed)
    }

    fn button(&mut self, button: u32, x: i32, y: i32, pressed: bool) -> Control {
        self.handle_button(button, x, y, pressed);
        Control::Continue
    }
}

fn draw_waveform(
    canvas: &mut dyn Canvas,
    block: &AudioBlock<'_>,
    amplification: u32,
    margin: i32,
    color: Rgb,
) {
    let (width, height) = (canvas.width(), canvas.height());
    let frames = block.frames();
    if frames == 0 || width <= 0 {
        return;
    }

    let (mut px, mut py) = (0, height / 2);
    for x in 0..width {
        let frame = rescale(0.0, width as f32, x as f32, 0.0, frames as f32) as usize;
        let value = amplify(block.frame_value(frame.min(frames - 1)), amplification);
        let y = rescale(
            WRAP_MIN as f32,
            WRAP_MAX as f32,
            value as f32,
            (height - margin) as f32,
            margin as f32,
        ) as i32;

        canvas.draw_line(px, py, x, y, color);
        px = x;
        py = y;
    }
}

/// Bins dropped at each end, reduced when the spectrum is too short to
/// leave anything between them.
fn effective_skip(bins: usize, skip: usize) -> usize {
    if skip * 2 < bins {
        skip
    } else {
        bins / 4
    }
}

fn draw_spectrum(
    canvas: &mut dyn Canvas,
    spectrum: &Spectrum<'_>,
    display: &DisplayConfig,
    palette: &Palette,
) {
    let (width, height) = (canvas.width(), canvas.height());
    let border = display.spectrum_border;
    let skip = effective_skip(spectrum.len(), display.skip_bins);
    let (lo, hi) = (skip, spectrum.len() - skip);
    let Some((min, max)) = spectrum.min_max(lo..hi) else {
        return;
    };
    if width - border <= border {
        return;
    }

    let (base, top) = (height - 40, height - 120);
    canvas.draw_rectangle(border, top - 5, width - 2 * border, base - top + 10, palette.labels);

    let bins = spectrum.bins();
    let mut previous: Option<(i32, i32)> = None;
    for x in border..width - border {
        let bin = rescale(
            border as f32,
            (width - border) as f32,
            x as f32,
            lo as f32,
            hi as f32,
        ) as usize;
        let value = bins[bin.clamp(lo, hi - 1)];
        let y = if max > min {
            rescale(min, max, value, base as f32, top as f32) as i32
        } else {
            base
        };

        let (px, py) = previous.unwrap_or((border, y));
        canvas.draw_line(px, py, x, y, palette.spectrum);
        previous = Some((x, y));
    }

    let interval = display.label_interval_bins.max(1);
    for bin in (lo..hi).step_by(interval) {
        let x = rescale(
            lo as f32,
            hi as f32,
            bin as f32,
            border as f32,
            (width - border) as f32,
        ) as i32;
        let label = format!("{:.0}", spectrum.frequency(bin));
        canvas.draw_string(x, height - 20, &label, palette.labels);
    }
}

/// One recorded drawing call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrawOp {
    FillRectangle { x: i32, y: i32, width: i32, height: i32, color: Rgb },
    DrawRectangle { x: i32, y: i32, width: i32, height: i32, color: Rgb },
    Line { x0: i32, y0: i32, x1: i32, y1: i32, color: Rgb },
    FillCircle { x: i32, y: i32, size: i32, color: Rgb },
    Text { x: i32, y: i32, text: String, color: Rgb },
}

/// Canvas that records every call instead of drawing. Used by headless
/// toolkits and tests.
#[derive(Debug, Clone, Default)]
pub struct RecordingCanvas {
    width: i32,
    height: i32,
    ops: Vec<DrawOp>,
}

impl RecordingCanvas {
    pub fn new(width: i32, height: i32) -> Self {
        Self {
            width,
            height,
            ops: Vec::new(),
        }
    }

    pub fn resize(&mut self, width: i32, height: i32) {
        self.width = width;
        self.height = height;
    }

    pub fn ops(&self) -> &[DrawOp] {
        &self.ops
    }

    /// Hands back the recorded calls and starts a fresh recording.
    pub fn take_ops(&mut self) -> Vec<DrawOp> {
        std::mem::take(&mut self.ops)
    }
}

impl Canvas for RecordingCanvas {
    fn width(&self) -> i32 {
        self.width
    }

    fn height(&self) -> i32 {
        self.height
    }

    fn fill_rectangle(&mut self, x: i32, y: i32, width: i32, height: i32, color: Rgb) {
        self.ops.push(DrawOp::FillRectangle { x, y, width, height, color });
    }

    fn draw_rectangle(&mut self, x: i32, y: i32, width: i32, height: i32, color: Rgb) {
        self.ops.push(DrawOp::DrawRectangle { x, y, width, height, color });
    }

    fn draw_line(&mut self, x0: i32, y0: i32, x1: i32, y1: i32, color: Rgb) {
        self.ops.push(DrawOp::Line { x0, y0, x1, y1, color });
    }

    fn fill_circle(&mut self, x: i32, y: i32, size: i32, color: Rgb) {
        self.ops.push(DrawOp::FillCircle { x, y, size, color });
    }

    fn draw_string(&mut self, x: i32, y: i32, text: &str, color: Rgb) {
        self.ops.push(DrawOp::Text {
            x,
            y,
            text: text.to_string(),
            color,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Direction, HwRequest, SimBackend, SimFault, SimSignal};

    const WIDTH: i32 = 320;
    const HEIGHT: i32 = 240;

    fn visualizer(backend: &SimBackend) -> Visualizer {
        let capture = DeviceHandle::open(
            backend,
            Direction::Capture,
            HwRequest {
                channels: 1,
                rate: 8_000,
                period_frames: 256,
                buffer_periods: 4,
            },
        )
        .unwrap();
        Visualizer::new(capture, ToneSet::new(), DisplayConfig::default())
    }

    fn sine_backend() -> SimBackend {
        SimBackend::new().with_signal(SimSignal::Sine {
            hz: 1_000.0,
            amplitude: 2_000,
        })
    }

    fn count(ops: &[DrawOp], pred: impl Fn(&DrawOp) -> bool) -> usize {
        ops.iter().filter(|op| pred(op)).count()
    }

    #[test]
    fn sample_range_maps_onto_band() {
        let height = 480.0;
        let lo = f32::from(i16::MIN);
        let hi = f32::from(i16::MAX);
        let (out_lo, out_hi) = (20.0, height - 20.0);

        let mid = rescale(lo, hi, 0.0, out_lo, out_hi);
        assert!((mid - (out_lo + out_hi) / 2.0).abs() < 0.01);
        assert_eq!(rescale(lo, hi, lo, out_lo, out_hi), out_lo);
        assert_eq!(rescale(lo, hi, hi, out_lo, out_hi), out_hi);
        assert_eq!(rescale(5.0, 5.0, 7.0, 1.0, 2.0), 1.0);
    }

    #[test]
    fn amplified_samples_stay_in_range() {
        for amplification in [1_u32, 6, 13, 20, 1_000] {
            for sample in (i16::MIN..=i16::MAX).step_by(97).chain([i16::MIN, i16::MAX]) {
                let value = amplify(sample, amplification);
                assert!(
                    (WRAP_MIN..=WRAP_MAX).contains(&value),
                    "{sample} x {amplification} -> {value}"
                );
            }
        }
        assert_eq!(amplify(100, 6), 700);
        assert_eq!(amplify(0, 20), 0);
        assert_eq!(wrap_into(i64::from(WRAP_MAX) + 1, WRAP_MIN, WRAP_MAX), WRAP_MIN);
    }

    #[test]
    fn key_bindings() {
        assert_eq!(tone_slot_for_key('1'), Some(0));
        assert_eq!(tone_slot_for_key('4'), Some(3));
        assert_eq!(tone_slot_for_key('0'), Some(9));
        assert_eq!(tone_slot_for_key('-'), Some(10));
        assert_eq!(tone_slot_for_key('x'), None);

        let backend = SimBackend::new();
        let tones = ToneSet::new();
        let capture = visualizer(&backend).into_capture();
        let mut vis = Visualizer::new(capture, tones.clone(), DisplayConfig::default());

        assert_eq!(vis.handle_key('4', true), Control::Continue);
        assert!(tones.is_active(3));
        vis.handle_key('4', false);
        assert!(!tones.any_active());

        vis.handle_key(' ', true);
        vis.handle_key(' ', false);
        assert!(vis.is_paused());
        assert_eq!(vis.handle_key('q', true), Control::Quit);
    }

    #[test]
    fn draws_waveform_and_spectrum() {
        let backend = sine_backend();
        let mut vis = visualizer(&backend);
        let mut canvas = RecordingCanvas::new(WIDTH, HEIGHT);

        assert_eq!(vis.tick(&mut canvas), TickOutcome::Drawn);
        let ops = canvas.ops();

        assert_eq!(
            ops[0],
            DrawOp::FillRectangle {
                x: 0,
                y: 0,
                width: WIDTH,
                height: HEIGHT,
                color: BLACK
            }
        );
        let lines = count(ops, |op| matches!(op, DrawOp::Line { .. }));
        assert_eq!(lines as i32, WIDTH + (WIDTH - 160));
        assert!(count(ops, |op| matches!(op, DrawOp::Text { .. })) > 0);
        assert_eq!(count(ops, |op| matches!(op, DrawOp::DrawRectangle { .. })), 1);

        // Waveform lines stay inside the margins.
        for op in ops.iter().take(WIDTH as usize + 1).skip(1) {
            if let DrawOp::Line { y1, .. } = op {
                assert!((20..=HEIGHT - 20).contains(y1));
            }
        }
        assert_eq!(vis.stats().drawn, 1);
    }

    #[test]
    fn overrun_tick_draws_nothing() {
        let backend = sine_backend();
        let probe = backend.probe(Direction::Capture);
        let mut vis = visualizer(&backend);
        let mut canvas = RecordingCanvas::new(WIDTH, HEIGHT);

        probe.push_faults([SimFault::Xrun]);
        assert_eq!(vis.tick(&mut canvas), TickOutcome::NoData);
        assert!(canvas.ops().is_empty());
        assert_eq!(vis.stats().skipped, 1);

        assert_eq!(vis.tick(&mut canvas), TickOutcome::Drawn);
    }

    #[test]
    fn paused_ticks_still_poll_capture() {
        let backend = sine_backend();
        let probe = backend.probe(Direction::Capture);
        let mut vis = visualizer(&backend);
        let mut canvas = RecordingCanvas::new(WIDTH, HEIGHT);

        vis.handle_key(' ', true);
        assert_eq!(vis.tick(&mut canvas), TickOutcome::Paused);
        assert!(canvas.ops().is_empty());
        assert_eq!(probe.read_calls(), 1);
    }

    #[test]
    fn click_marker_flashes_then_fades_out() {
        let backend = sine_backend();
        let mut vis = visualizer(&backend);
        let mut canvas = RecordingCanvas::new(WIDTH, HEIGHT);

        vis.handle_button(1, 100, 120, true);
        vis.tick(&mut canvas);
        let ops = canvas.take_ops();
        assert_eq!(
            ops.last(),
            Some(&DrawOp::FillRectangle {
                x: 0,
                y: 0,
                width: WIDTH,
                height: HEIGHT,
                color: WHITE
            })
        );

        let mut sizes = Vec::new();
        for _ in 0..10 {
            vis.tick(&mut canvas);
            for op in canvas.take_ops() {
                if let DrawOp::FillCircle { size, .. } = op {
                    sizes.push(size);
                }
            }
        }

        assert!(!sizes.is_empty());
        assert!(sizes.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(vis.markers().active(), 0);
    }

    #[test]
    fn release_does_not_add_a_marker() {
        let backend = sine_backend();
        let mut vis = visualizer(&backend);

        vis.handle_button(1, 10, 10, true);
        vis.handle_button(1, 10, 10, false);
        assert_eq!(vis.markers().active(), 1);

        vis.handle_button(1, 50, 60, true);
        vis.handle_button(1, 50, 60, false);
        assert_eq!(vis.markers().active(), 2);
    }

    #[test]
    fn fade_reaches_black() {
        let mut color = MARKER_AFTERGLOW;
        let mut steps = 0;
        while color != BLACK {
            color = fade(color);
            steps += 1;
        }
        assert_eq!(steps, 7);
    }

    #[test]
    fn skip_shrinks_for_short_spectra() {
        assert_eq!(effective_skip(686, 70), 70);
        assert_eq!(effective_skip(128, 70), 32);
        assert_eq!(effective_skip(1, 70), 0);
    }
}
