use std::{fmt, sync::Arc};

use realfft::{num_complex::Complex32, ComplexToReal, RealFftPlanner, RealToComplex};

use crate::{config::SpectrumWindow, transfer::AudioBlock, Result, ScopeError};

/// Magnitude spectrum of the most recent analysis, borrowed from the
/// analyzer's workspace. Only bins below Nyquist are exposed.
#[derive(Debug, Clone, Copy)]
pub struct Spectrum<'a> {
    bins: &'a [f32],
    bin_hz: f32,
}

impl<'a> Spectrum<'a> {
    pub fn bins(&self) -> &'a [f32] {
        self.bins
    }

    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    /// Width of one bin in Hz.
    pub fn bin_hz(&self) -> f32 {
        self.bin_hz
    }

    pub fn frequency(&self, bin: usize) -> f32 {
        bin as f32 * self.bin_hz
    }

    /// Bin with the largest magnitude, ignoring `skip` bins at the low end.
    pub fn peak_bin(&self, skip: usize) -> Option<usize> {
        self.bins
            .iter()
            .enumerate()
            .skip(skip)
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(bin, _)| bin)
    }

    /// Smallest and largest magnitude over `range`.
    pub fn min_max(&self, range: std::ops::Range<usize>) -> Option<(f32, f32)> {
        self.bins.get(range)?.iter().fold(None, |acc, &value| match acc {
            None => Some((value, value)),
            Some((min, max)) => Some((min.min(value), max.max(value))),
        })
    }
}

/// Maps a signed 16-bit sample linearly onto [-1, 1].
pub fn normalize_sample(sample: i16) -> f32 {
    let span = f32::from(i16::MAX) - f32::from(i16::MIN);
    (f32::from(sample) - f32::from(i16::MIN)) / span * 2.0 - 1.0
}

/// Forward real FFT over capture blocks with a workspace that lives as
/// long as the analyzer. Buffers are only rebuilt when the transform length
/// changes.
///
/// Each bin's magnitude is `0.5 * sqrt(re² + im²)`. The first channel of a
/// block is analysed; [`SpectrumWindow`] picks either the whole period or its
/// largest power-of-two prefix.
pub struct SpectralAnalyzer {
    sample_rate: u32,
    window: SpectrumWindow,
    planner: RealFftPlanner<f32>,
    fft: Option<FftResources>,
}

impl SpectralAnalyzer {
    pub fn new(sample_rate: u32) -> Self {
        Self::with_window(sample_rate, SpectrumWindow::default())
    }

    pub fn with_window(sample_rate: u32, window: SpectrumWindow) -> Self {
        Self {
            sample_rate,
            window,
            planner: RealFftPlanner::new(),
            fft: None,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn window(&self) -> SpectrumWindow {
        self.window
    }

    /// Number of frames the transform uses for a block of `frames`.
    pub fn transform_len(&self, frames: usize) -> usize {
        match self.window {
            SpectrumWindow::FullBlock => frames,
            SpectrumWindow::PowerOfTwoPrefix if frames == 0 => 0,
            SpectrumWindow::PowerOfTwoPrefix => 1 << frames.ilog2(),
        }
    }

    /// Transforms the first channel of a capture block.
    pub fn analyze(&mut self, block: &AudioBlock<'_>) -> Result<Spectrum<'_>> {
        let len = self.transform_len(block.frames());
        let fft = self.prepare_fft(len)?;

        for (slot, sample) in fft.input.iter_mut().zip(block.channel(0)) {
            *slot = normalize_sample(sample);
        }

        self.transform()
    }

    /// Transforms an already normalised signal.
    pub fn analyze_signal(&mut self, signal: &[f32]) -> Result<Spectrum<'_>> {
        let len = self.transform_len(signal.len());
        let fft = self.prepare_fft(len)?;
        fft.input.copy_from_slice(&signal[..len]);

        self.transform()
    }

    /// Inverse transform of the last analysed spectrum, scaled by `1 / n` so
    /// it reproduces the normalised input.
    pub fn reconstruct(&mut self) -> Result<&[f32]> {
        let fft = self
            .fft
            .as_mut()
            .ok_or(ScopeError::InvalidInput("nothing has been analysed yet"))?;

        fft.inverse_input.copy_from_slice(&fft.spectrum);
        // Real input always has purely real DC and Nyquist bins.
        if let Some(dc) = fft.inverse_input.first_mut() {
            dc.im = 0.0;
        }
        if fft.size % 2 == 0 {
            if let Some(nyquist) = fft.inverse_input.last_mut() {
                nyquist.im = 0.0;
            }
        }

        fft.inverse.process_with_scratch(
            &mut fft.inverse_input,
            &mut fft.output,
            &mut fft.inverse_scratch,
        )?;

        let scale = 1.0 / fft.size as f32;
        for value in &mut fft.output {
            *value *= scale;
        }
        Ok(&fft.output)
    }

    fn transform(&mut self) -> Result<Spectrum<'_>> {
        let sample_rate = self.sample_rate as f32;
        let fft = self
            .fft
            .as_mut()
            .ok_or(ScopeError::InvalidInput("transform requested before planning"))?;

        // Clobbers `input`; callers refill it before every transform.
        fft.forward
            .process_with_scratch(&mut fft.input, &mut fft.spectrum, &mut fft.forward_scratch)?;

        for (magnitude, bin) in fft.magnitudes.iter_mut().zip(&fft.spectrum) {
            *magnitude = 0.5 * bin.norm();
        }

        Ok(Spectrum {
            bins: &fft.magnitudes,
            bin_hz: sample_rate / fft.size as f32,
        })
    }

    fn prepare_fft(&mut self, size: usize) -> Result<&mut FftResources> {
        if size < 2 {
            return Err(ScopeError::InvalidInput(
                "spectral analysis requires at least two frames",
            ));
        }

        let rebuild = self
            .fft
            .as_ref()
            .map(|fft| fft.size != size)
            .unwrap_or(true);

        if rebuild {
            tracing::debug!(size, "planning spectral transform");
            let forward = self.planner.plan_fft_forward(size);
            let inverse = self.planner.plan_fft_inverse(size);
            let forward_scratch = forward.make_scratch_vec();
            let inverse_scratch = inverse.make_scratch_vec();
            let spectrum = forward.make_output_vec();
            let inverse_input = inverse.make_input_vec();
            let input = forward.make_input_vec();
            let output = inverse.make_output_vec();
            self.fft = Some(FftResources {
                size,
                forward,
                inverse,
                input,
                spectrum,
                forward_scratch,
                magnitudes: vec![0.0; size / 2],
                inverse_input,
                inverse_scratch,
                output,
            });
        }

        self.fft
            .as_mut()
            .ok_or(ScopeError::InvalidInput("spectral workspace missing"))
    }
}

struct FftResources {
    size: usize,
    forward: Arc<dyn RealToComplex<f32>>,
    inverse: Arc<dyn ComplexToReal<f32>>,
    input: Vec<f32>,
    spectrum: Vec<Complex32>,
    forward_scratch: Vec<Complex32>,
    magnitudes: Vec<f32>,
    inverse_input: Vec<Complex32>,
    inverse_scratch: Vec<Complex32>,
    output: Vec<f32>,
}

impl fmt::Debug for SpectralAnalyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectralAnalyzer")
            .field("sample_rate", &self.sample_rate)
            .field("window", &self.window)
            .field("fft", &self.fft)
            .finish()
    }
}

impl fmt::Debug for FftResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FftResources")
            .field("size", &self.size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::f32::consts::TAU;

    use super::*;

    fn sine_block(hz: f32, rate: f32, frames: usize, channels: usize) -> Vec<i16> {
        (0..frames)
            .flat_map(|i| {
                let value = (20_000.0 * (TAU * hz * i as f32 / rate).sin()) as i16;
                std::iter::repeat(value).take(channels)
            })
            .collect()
    }

    #[test]
    fn normalizes_full_sample_range() {
        assert_eq!(normalize_sample(i16::MIN), -1.0);
        assert_eq!(normalize_sample(i16::MAX), 1.0);
        assert!(normalize_sample(0).abs() < 1e-4);
    }

    #[test]
    fn bin_count_is_half_the_channel_frames() {
        let mut analyzer = SpectralAnalyzer::new(44_100);

        let mono = vec![0_i16; 1373];
        let spectrum = analyzer.analyze(&AudioBlock::new(&mono, 1)).unwrap();
        assert_eq!(spectrum.len(), 686);

        let stereo = vec![0_i16; 256 * 2];
        let spectrum = analyzer.analyze(&AudioBlock::new(&stereo, 2)).unwrap();
        assert_eq!(spectrum.len(), 128);
    }

    #[test]
    fn power_of_two_prefix_window() {
        let mut analyzer = SpectralAnalyzer::with_window(44_100, SpectrumWindow::PowerOfTwoPrefix);
        let mono = vec![0_i16; 1373];

        assert_eq!(analyzer.transform_len(1373), 1024);
        let spectrum = analyzer.analyze(&AudioBlock::new(&mono, 1)).unwrap();
        assert_eq!(spectrum.len(), 512);
    }

    #[test]
    fn locates_a_pure_tone() {
        let mut analyzer = SpectralAnalyzer::new(8_000);
        let samples = sine_block(1_000.0, 8_000.0, 256, 1);

        let spectrum = analyzer.analyze(&AudioBlock::new(&samples, 1)).unwrap();

        assert_eq!(spectrum.bin_hz(), 31.25);
        assert_eq!(spectrum.peak_bin(1), Some(32));
        assert!(spectrum.bins().iter().all(|&m| m >= 0.0));
    }

    #[test]
    fn inverse_reconstructs_signal() {
        let mut analyzer = SpectralAnalyzer::new(8_000);
        for len in [64_usize, 1373] {
            let signal: Vec<f32> = (0..len)
                .map(|i| {
                    let t = i as f32;
                    0.6 * (t * 0.37).sin() - 0.3 * (t * 1.91).cos() + 0.05
                })
                .collect();

            analyzer.analyze_signal(&signal).unwrap();
            let restored = analyzer.reconstruct().unwrap();

            assert_eq!(restored.len(), len);
            for (a, b) in signal.iter().zip(restored) {
                assert!((a - b).abs() < 1e-4, "{a} vs {b}");
            }
        }
    }

    #[test]
    fn rejects_tiny_blocks() {
        let mut analyzer = SpectralAnalyzer::new(8_000);
        let err = analyzer.analyze(&AudioBlock::new(&[1], 1)).unwrap_err();
        assert!(matches!(err, ScopeError::InvalidInput(_)));
        assert!(analyzer.reconstruct().is_err());
    }

    #[test]
    fn min_max_over_range() {
        let mut analyzer = SpectralAnalyzer::new(8_000);
        let samples = sine_block(1_000.0, 8_000.0, 256, 1);
        let spectrum = analyzer.analyze(&AudioBlock::new(&samples, 1)).unwrap();

        let (min, max) = spectrum.min_max(4..120).unwrap();
        assert!(min <= max);
        assert_eq!(max, spectrum.bins()[32]);
        assert!(spectrum.min_max(200..300).is_none());
    }
}
