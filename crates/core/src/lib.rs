//! Core library for the pcmscope audio oscilloscope.
//!
//! The crate covers the real-time audio path: opening and configuring PCM
//! endpoints, blocking period transfers that recover from underruns and
//! overruns, the spectral transform applied to captured periods, the
//! keyboard-driven tone generator running on its own thread, and the
//! per-tick driver that turns a captured period into draw calls. The window
//! toolkit itself is external and reached through [`visual::Canvas`] and
//! [`visual::EventHandler`].

pub mod analysis;
pub mod audio;
pub mod config;
pub mod device;
pub mod error;
pub mod synth;
pub mod transfer;
pub mod visual;

pub use analysis::{SpectralAnalyzer, Spectrum};
pub use audio::AudioSession;
pub use config::{AppConfig, AudioConfig, DisplayConfig, SpectrumWindow, ToneConfig};
pub use device::{
    CpalBackend, DeviceHandle, Direction, HwParams, HwRequest, PcmBackend, PcmDriver, PcmFault,
    SimBackend,
};
pub use error::{Result, ScopeError};
pub use synth::{ToneSet, ToneSynth, ToneTask};
pub use transfer::{AudioBlock, ReadOutcome, WriteReport};
pub use visual::{Canvas, Control, EventHandler, RecordingCanvas, TickOutcome, Visualizer};
