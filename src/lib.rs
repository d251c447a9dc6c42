//! Adaptive-rate analog acquisition.
//!
//! A calibration pass samples a block at the device's maximum rate, finds the
//! highest frequency carrying signal and drops the conversion rate to what that
//! bandwidth needs. From then on every block feeds a running average that a
//! timer flushes to telemetry.

pub mod aggregator;
pub mod block;
pub mod calibrator;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod peripheral;
pub mod pipeline;
pub mod rate;
pub mod sampler;
pub mod signal;
pub mod telemetry;

#[cfg(not(target_os = "espidf"))]
pub mod sim;

#[cfg(target_os = "espidf")]
pub mod esp_adc;
#[cfg(target_os = "espidf")]
pub mod mqtt;
#[cfg(target_os = "espidf")]
pub mod network;

pub use aggregator::{Flush, RunningAggregator};
pub use block::Block;
pub use calibrator::{Calibration, SpectralCalibrator, Spectrum};
pub use config::{PipelineConfig, ThresholdMode};
pub use error::{Error, PeripheralFault, Result};
pub use events::{EventHub, PipelineEvents};
pub use peripheral::{AdcPeripheral, ConversionFormat, RateBounds};
pub use pipeline::{Pipeline, Step};
pub use rate::{select_rate, RateController};
pub use sampler::BlockSampler;
pub use signal::{BinarySemaphore, CompletionSignal};
pub use telemetry::{Flusher, LogSink, TelemetrySink};
