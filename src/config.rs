use std::time::Duration;

use crate::constants::*;
use crate::error::{Error, Result};

/// How the calibrator decides which spectral bins carry signal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThresholdMode {
	/// `mean + k * stddev` over the folded power spectrum.
	Adaptive { k: f32 },
	/// A fixed global threshold in dB. Degraded fallback only.
	Fixed { db: f32 },
}

impl Default for ThresholdMode {
	fn default() -> Self {
		ThresholdMode::Adaptive { k: THRESHOLD_K }
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
	pub block_len: usize,
	pub device_max_rate_hz: u32,
	pub device_min_rate_hz: u32,
	pub flush_period: Duration,
	pub threshold: ThresholdMode,
	pub noise_floor_db: f32,
	pub nyquist_margin: f32,
	pub capture_timeout: Option<Duration>,
	pub read_rounds: usize,
	pub recalibrate_every: u32,
	pub max_capture_failures: u32,
	pub calibration_retry_blocks: u32,
	pub topic: String,
}

impl Default for PipelineConfig {
	fn default() -> Self {
		Self {
			block_len: BLOCK_LENGTH,
			device_max_rate_hz: DEVICE_MAX_RATE_HZ,
			device_min_rate_hz: DEVICE_MIN_RATE_HZ,
			flush_period: FLUSH_PERIOD,
			threshold: ThresholdMode::default(),
			noise_floor_db: NOISE_FLOOR_DB,
			nyquist_margin: NYQUIST_MARGIN,
			capture_timeout: Some(CAPTURE_TIMEOUT),
			read_rounds: READ_ROUNDS,
			recalibrate_every: RECALIBRATE_EVERY,
			max_capture_failures: MAX_CAPTURE_FAILURES,
			calibration_retry_blocks: CALIBRATION_RETRY_BLOCKS,
			topic: TELEMETRY_TOPIC.to_string(),
		}
	}
}

impl PipelineConfig {
	/// Checks every input before any hardware is touched.
	pub fn validate(&self) -> Result<()> {
		if !self.block_len.is_power_of_two() || self.block_len < 2 {
			return Err(Error::InvalidBlockSize(self.block_len));
		}
		if self.device_min_rate_hz == 0 || self.device_min_rate_hz > self.device_max_rate_hz {
			return Err(Error::Configuration(format!(
				"device rate bounds [{}, {}] Hz are empty",
				self.device_min_rate_hz, self.device_max_rate_hz
			)));
		}
		if self.flush_period.is_zero() {
			return Err(Error::Configuration("flush period must be non-zero".into()));
		}
		match self.threshold {
			ThresholdMode::Adaptive { k } if !k.is_finite() || k < 0.0 => {
				return Err(Error::Configuration(format!(
					"threshold sensitivity {k} must be finite and non-negative"
				)));
			}
			ThresholdMode::Fixed { db } if !db.is_finite() => {
				return Err(Error::Configuration("fixed threshold must be finite".into()));
			}
			_ => {}
		}
		if !self.noise_floor_db.is_finite() {
			return Err(Error::Configuration("noise floor must be finite".into()));
		}
		if !self.nyquist_margin.is_finite() || self.nyquist_margin < 1.0 {
			return Err(Error::Configuration(format!(
				"nyquist margin {} must be at least 1",
				self.nyquist_margin
			)));
		}
		if self.read_rounds == 0 || self.read_rounds > self.block_len {
			return Err(Error::Configuration(format!(
				"read rounds {} must be within [1, {}]",
				self.read_rounds, self.block_len
			)));
		}
		if self.topic.is_empty() {
			return Err(Error::Configuration("telemetry topic is empty".into()));
		}
		Ok(())
	}
}
