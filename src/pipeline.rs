//! Calibrate once at full rate, then keep sampling at the reduced rate.
//!
//! The pipeline owns every piece of acquisition state. The only thing handed
//! out is the accumulator, which the flush timer reads from its own context.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{error, info, warn};

use crate::aggregator::RunningAggregator;
use crate::calibrator::{Calibration, SpectralCalibrator};
use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use crate::peripheral::{AdcPeripheral, RateBounds};
use crate::rate::RateController;
use crate::sampler::BlockSampler;
use crate::signal::CompletionSignal;

#[derive(Debug, Clone, PartialEq)]
pub enum Step {
	Calibrated { bandwidth_hz: f32, rate_hz: u32 },
	/// Calibration failed and the pipeline fell back to the device maximum.
	FellBack { rate_hz: u32, error: Error },
	Sampled { samples: usize, rate_hz: u32 },
	CaptureFailed(Error),
}

pub struct Pipeline<P, S> {
	config: PipelineConfig,
	sampler: BlockSampler<P, S>,
	calibrator: SpectralCalibrator,
	rate: RateController,
	aggregator: Arc<RunningAggregator>,
	active_rate_hz: u32,
	calibrated: bool,
	/// The last calibration pass failed and the sampler runs at full rate.
	fell_back: bool,
	blocks_since_calibration: u32,
	consecutive_failures: u32,
}

impl<P: AdcPeripheral, S: CompletionSignal> Pipeline<P, S> {
	pub fn new(config: PipelineConfig, peripheral: P, signal: Arc<S>) -> Result<Self> {
		config.validate()?;

		let device = peripheral.rate_bounds();
		let bounds = RateBounds {
			min_hz: config.device_min_rate_hz.max(device.min_hz),
			max_hz: config.device_max_rate_hz.min(device.max_hz),
		};
		if bounds.min_hz > bounds.max_hz {
			return Err(Error::Configuration(format!(
				"configured rates [{}, {}] Hz do not overlap device rates [{}, {}] Hz",
				config.device_min_rate_hz, config.device_max_rate_hz, device.min_hz, device.max_hz
			)));
		}

		let mut sampler =
			BlockSampler::new(peripheral, signal, config.read_rounds, config.capture_timeout)?;
		sampler.configure(bounds.max_hz)?;
		let calibrator =
			SpectralCalibrator::new(config.block_len, config.threshold, config.noise_floor_db)?;

		info!(
			"Pipeline ready: {} sample blocks, rates [{}, {}] Hz, flush every {:?}",
			config.block_len, bounds.min_hz, bounds.max_hz, config.flush_period
		);

		Ok(Self {
			rate: RateController::new(config.nyquist_margin, bounds),
			config,
			sampler,
			calibrator,
			aggregator: Arc::new(RunningAggregator::new()),
			active_rate_hz: bounds.max_hz,
			calibrated: false,
			fell_back: false,
			blocks_since_calibration: 0,
			consecutive_failures: 0,
		})
	}

	pub fn config(&self) -> &PipelineConfig {
		&self.config
	}

	/// Handle for the flush context.
	pub fn aggregator(&self) -> Arc<RunningAggregator> {
		self.aggregator.clone()
	}

	pub fn active_rate_hz(&self) -> u32 {
		self.active_rate_hz
	}

	pub fn is_calibrated(&self) -> bool {
		self.calibrated
	}

	/// Whether the last calibration pass failed and a retry is pending.
	pub fn is_fallen_back(&self) -> bool {
		self.fell_back
	}

	pub fn sampler(&self) -> &BlockSampler<P, S> {
		&self.sampler
	}

	pub fn sampler_mut(&mut self) -> &mut BlockSampler<P, S> {
		&mut self.sampler
	}

	/// One calibration pass: capture at full rate, estimate the bandwidth and
	/// switch the sampler to the reduced rate.
	pub fn calibrate(&mut self) -> Result<Calibration> {
		let max_hz = self.rate.bounds().max_hz;
		self.sampler.configure(max_hz)?;
		let block = self.sampler.capture_block(self.config.block_len)?;
		let calibration = self.calibrator.analyze(&block)?;

		let rate_hz = self.rate.select_rate(calibration.bandwidth_hz);
		self.sampler.configure(rate_hz)?;
		self.active_rate_hz = rate_hz;
		self.calibrated = true;
		self.fell_back = false;

		info!(
			"Calibrated: bandwidth {:.1} Hz, sampling at {} Hz (was {} Hz)",
			calibration.bandwidth_hz, rate_hz, max_hz
		);
		Ok(calibration)
	}

	fn calibrate_or_fall_back(&mut self) -> Step {
		self.blocks_since_calibration = 0;
		self.consecutive_failures = 0;
		match self.calibrate() {
			Ok(calibration) => Step::Calibrated {
				bandwidth_hz: calibration.bandwidth_hz,
				rate_hz: self.active_rate_hz,
			},
			Err(error) => {
				let max_hz = self.rate.bounds().max_hz;
				error!("Calibration failed ({}), sampling at {} Hz", error, max_hz);
				if let Err(e) = self.sampler.configure(max_hz) {
					error!("Failed to restore full rate: {}", e);
				}
				self.active_rate_hz = self.sampler.rate_hz();
				self.calibrated = false;
				self.fell_back = true;
				Step::FellBack {
					rate_hz: self.active_rate_hz,
					error,
				}
			}
		}
	}

	/// Captures one block at the active rate into the accumulator.
	pub fn sample_once(&mut self) -> Result<usize> {
		let block = self.sampler.capture_block(self.config.block_len)?;
		self.aggregator.on_samples(block.samples());
		Ok(block.len())
	}

	fn needs_calibration(&self) -> bool {
		let retry_due = if self.fell_back {
			self.config.calibration_retry_blocks > 0
				&& self.blocks_since_calibration >= self.config.calibration_retry_blocks
		} else {
			!self.calibrated
		};
		retry_due
			|| (self.config.recalibrate_every > 0
				&& self.blocks_since_calibration >= self.config.recalibrate_every)
			|| (self.config.max_capture_failures > 0
				&& self.consecutive_failures >= self.config.max_capture_failures)
	}

	/// Advances the pipeline by one capture.
	pub fn step(&mut self) -> Step {
		if self.needs_calibration() {
			return self.calibrate_or_fall_back();
		}

		match self.sample_once() {
			Ok(samples) => {
				self.consecutive_failures = 0;
				self.blocks_since_calibration += 1;
				Step::Sampled {
					samples,
					rate_hz: self.active_rate_hz,
				}
			}
			Err(error) => {
				self.consecutive_failures += 1;
				warn!(
					"Capture failed ({} in a row): {}",
					self.consecutive_failures, error
				);
				Step::CaptureFailed(error)
			}
		}
	}

	/// Steps until `stop` is set.
	pub fn run(&mut self, stop: &AtomicBool) {
		while !stop.load(Ordering::Acquire) {
			self.step();
		}
		info!("Acquisition stopped at {} Hz", self.active_rate_hz);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::aggregator::Flush;
	use crate::events::EventHub;
	use crate::peripheral::ConversionFormat;
	use crate::signal::BinarySemaphore;
	use crate::sim::{SimulatedAdc, Tone};
	use std::time::Duration;

	fn pipeline(
		config: PipelineConfig,
		adc: impl FnOnce(Arc<EventHub<BinarySemaphore>>) -> SimulatedAdc,
	) -> Pipeline<SimulatedAdc, BinarySemaphore> {
		let signal = Arc::new(BinarySemaphore::new());
		let hub = Arc::new(EventHub::new(signal.clone()));
		Pipeline::new(config, adc(hub), signal).unwrap()
	}

	fn config() -> PipelineConfig {
		PipelineConfig {
			block_len: 1024,
			capture_timeout: Some(Duration::from_millis(50)),
			..Default::default()
		}
	}

	#[test]
	fn calibrates_before_sampling() {
		let mut pipeline = pipeline(config(), |hub| {
			SimulatedAdc::new(hub, ConversionFormat::Type2)
				.with_dc(2048.0)
				.with_tone(Tone::new(2_000.0, 1000.0))
		});
		assert!(!pipeline.is_calibrated());

		let Step::Calibrated {
			bandwidth_hz,
			rate_hz,
		} = pipeline.step()
		else {
			panic!("first step must calibrate");
		};
		// An off-bin tone leaks into its neighbours, so the estimate errs high.
		assert!(bandwidth_hz >= 2_000.0 && bandwidth_hz < 4_000.0, "{bandwidth_hz}");
		assert_eq!(rate_hz, pipeline.active_rate_hz());
		assert!(rate_hz < pipeline.config().device_max_rate_hz);
		assert_eq!(pipeline.sampler().peripheral().sample_rate_hz(), rate_hz);

		assert_eq!(
			pipeline.step(),
			Step::Sampled {
				samples: 1024,
				rate_hz
			}
		);
		assert_eq!(pipeline.aggregator().flush().count(), 1024);
	}

	#[test]
	fn dc_only_channel_drops_to_minimum_rate() {
		let mut pipeline = pipeline(config(), |hub| {
			SimulatedAdc::new(hub, ConversionFormat::Type2).with_dc(1000.0)
		});
		let calibration = pipeline.calibrate().unwrap();
		// Only the DC bins rise above the threshold.
		assert!(calibration.bandwidth_hz < 200.0);
		assert_eq!(pipeline.active_rate_hz(), pipeline.config().device_min_rate_hz);
	}

	#[test]
	fn silent_channel_keeps_full_rate() {
		let mut pipeline =
			pipeline(config(), |hub| SimulatedAdc::new(hub, ConversionFormat::Type2));
		assert_eq!(pipeline.calibrate().unwrap().bandwidth_hz, 0.0);
		assert_eq!(pipeline.active_rate_hz(), pipeline.config().device_max_rate_hz);
	}

	#[test]
	fn failed_calibration_falls_back_to_max() {
		let mut pipeline = pipeline(config(), |hub| {
			SimulatedAdc::new(hub, ConversionFormat::Type2).with_tone(Tone::new(500.0, 100.0))
		});
		pipeline.sampler_mut().peripheral_mut().fail_next_starts(1);
		assert!(matches!(
			pipeline.step(),
			Step::FellBack { rate_hz, error: Error::Acquisition(_) }
				if rate_hz == pipeline.config().device_max_rate_hz
		));
		assert!(!pipeline.is_calibrated());
		assert!(pipeline.is_fallen_back());
		assert!(matches!(pipeline.step(), Step::Sampled { .. }));
	}

	#[test]
	fn failed_calibration_is_retried_after_backoff() {
		let mut pipeline = pipeline(
			PipelineConfig {
				calibration_retry_blocks: 3,
				..config()
			},
			|hub| SimulatedAdc::new(hub, ConversionFormat::Type2).with_dc(2048.0),
		);
		pipeline.sampler_mut().peripheral_mut().fail_next_starts(1);
		assert!(matches!(pipeline.step(), Step::FellBack { .. }));

		for _ in 0..3 {
			assert!(matches!(
				pipeline.step(),
				Step::Sampled { rate_hz, .. } if rate_hz == pipeline.config().device_max_rate_hz
			));
		}
		assert!(matches!(pipeline.step(), Step::Calibrated { .. }));
		assert!(pipeline.is_calibrated());
		assert!(!pipeline.is_fallen_back());
		assert!(pipeline.active_rate_hz() < pipeline.config().device_max_rate_hz);
	}

	#[test]
	fn zero_backoff_stays_at_full_rate() {
		let mut pipeline = pipeline(
			PipelineConfig {
				calibration_retry_blocks: 0,
				..config()
			},
			|hub| SimulatedAdc::new(hub, ConversionFormat::Type2).with_dc(2048.0),
		);
		pipeline.sampler_mut().peripheral_mut().fail_next_starts(1);
		assert!(matches!(pipeline.step(), Step::FellBack { .. }));
		for _ in 0..20 {
			assert!(matches!(pipeline.step(), Step::Sampled { .. }));
		}
	}

	#[test]
	fn repeated_capture_failures_trigger_recalibration() {
		let mut pipeline = pipeline(
			PipelineConfig {
				max_capture_failures: 2,
				..config()
			},
			|hub| SimulatedAdc::new(hub, ConversionFormat::Type2).with_dc(2048.0),
		);
		assert!(matches!(pipeline.step(), Step::Calibrated { .. }));

		pipeline.sampler_mut().peripheral_mut().fail_next_starts(2);
		assert!(matches!(pipeline.step(), Step::CaptureFailed(_)));
		assert!(matches!(pipeline.step(), Step::CaptureFailed(_)));
		assert!(matches!(pipeline.step(), Step::Calibrated { .. }));
		assert!(matches!(pipeline.step(), Step::Sampled { .. }));
	}

	#[test]
	fn recalibrates_periodically() {
		let mut pipeline = pipeline(
			PipelineConfig {
				recalibrate_every: 2,
				..config()
			},
			|hub| SimulatedAdc::new(hub, ConversionFormat::Type2).with_dc(2048.0),
		);
		let steps: Vec<bool> = (0..6)
			.map(|_| matches!(pipeline.step(), Step::Calibrated { .. }))
			.collect();
		assert_eq!(steps, vec![true, false, false, true, false, false]);
	}

	#[test]
	fn calibration_blocks_do_not_reach_the_accumulator() {
		let mut pipeline = pipeline(config(), |hub| {
			SimulatedAdc::new(hub, ConversionFormat::Type2).with_dc(100.0)
		});
		pipeline.step();
		assert_eq!(pipeline.aggregator().flush(), Flush::NoData);
		pipeline.step();
		assert_eq!(
			pipeline.aggregator().flush(),
			Flush::Window {
				mean: 100.0,
				count: 1024
			}
		);
	}

	#[test]
	fn rejects_disjoint_rate_bounds() {
		let signal = Arc::new(BinarySemaphore::new());
		let hub = Arc::new(EventHub::new(signal.clone()));
		let adc = SimulatedAdc::new(hub, ConversionFormat::Type2);
		let config = PipelineConfig {
			device_min_rate_hz: 90_000,
			device_max_rate_hz: 100_000,
			..config()
		};
		assert!(matches!(
			Pipeline::new(config, adc, signal),
			Err(Error::Configuration(_))
		));
	}
}
