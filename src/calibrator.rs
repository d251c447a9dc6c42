//! FFT-based estimate of the effective signal bandwidth of one block.

use std::sync::Arc;

use log::debug;
use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::block::Block;
use crate::config::ThresholdMode;
use crate::error::{Error, Result};

/// Folded power spectrum of one block, in dB per bin.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
	power_db: Vec<f32>,
	sample_rate_hz: u32,
	block_len: usize,
}

impl Spectrum {
	pub fn power_db(&self) -> &[f32] {
		&self.power_db
	}

	pub fn len(&self) -> usize {
		self.power_db.len()
	}

	pub fn is_empty(&self) -> bool {
		self.power_db.is_empty()
	}

	/// Centre frequency of `bin`: `bin * sample_rate / block_len`.
	pub fn bin_hz(&self, bin: usize) -> f32 {
		(bin as f64 * self.sample_rate_hz as f64 / self.block_len as f64) as f32
	}

	/// Mean and population standard deviation over all bins.
	pub fn stats(&self) -> (f32, f32) {
		let n = self.power_db.len() as f64;
		if n == 0.0 {
			return (0.0, 0.0);
		}
		let mean = self.power_db.iter().map(|&p| p as f64).sum::<f64>() / n;
		let var = self
			.power_db
			.iter()
			.map(|&p| {
				let diff = p as f64 - mean;
				diff * diff
			})
			.sum::<f64>() / n;
		(mean as f32, var.sqrt() as f32)
	}

	/// Highest bin whose power strictly exceeds `threshold_db`.
	pub fn highest_bin_above(&self, threshold_db: f32) -> Option<usize> {
		self.power_db.iter().rposition(|&p| p > threshold_db)
	}
}

/// Outcome of one calibration pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
	pub bandwidth_hz: f32,
	pub bin: Option<usize>,
	pub threshold_db: f32,
	pub mean_db: f32,
	pub stddev_db: f32,
}

pub struct SpectralCalibrator {
	fft: Arc<dyn Fft<f32>>,
	hann_window: Vec<f32>,
	threshold: ThresholdMode,
	noise_floor_db: f32,
}

impl SpectralCalibrator {
	pub fn new(block_len: usize, threshold: ThresholdMode, noise_floor_db: f32) -> Result<Self> {
		check_block_len(block_len)?;
		Ok(Self {
			fft: plan(block_len),
			hann_window: hann_window(block_len),
			threshold,
			noise_floor_db,
		})
	}

	pub fn block_len(&self) -> usize {
		self.fft.len()
	}

	pub fn threshold_mode(&self) -> ThresholdMode {
		self.threshold
	}

	/// Detected bandwidth of `block` in Hz, 0 when no bin rises above the threshold.
	pub fn calibrate(&mut self, block: &Block) -> Result<f32> {
		Ok(self.analyze(block)?.bandwidth_hz)
	}

	pub fn analyze(&mut self, block: &Block) -> Result<Calibration> {
		let spectrum = self.spectrum(block)?;
		let (mean_db, stddev_db) = spectrum.stats();
		let threshold_db = match self.threshold {
			ThresholdMode::Adaptive { k } => mean_db + k * stddev_db,
			ThresholdMode::Fixed { db } => db,
		};

		let bin = spectrum.highest_bin_above(threshold_db);
		let bandwidth_hz = bin.map_or(0.0, |bin| spectrum.bin_hz(bin));
		debug!(
			"Spectrum mean {:.2} dB, stddev {:.2} dB, threshold {:.2} dB, top bin {:?} -> {:.1} Hz",
			mean_db, stddev_db, threshold_db, bin, bandwidth_hz
		);

		Ok(Calibration {
			bandwidth_hz,
			bin,
			threshold_db,
			mean_db,
			stddev_db,
		})
	}

	/// Windowed, folded power spectrum of `block`, clamped to the noise floor.
	pub fn spectrum(&mut self, block: &Block) -> Result<Spectrum> {
		let n = block.len();
		check_block_len(n)?;
		if n != self.fft.len() {
			self.fft = plan(n);
			self.hann_window = hann_window(n);
		}

		let mut samples: Vec<Complex<f32>> = block
			.samples()
			.iter()
			.zip(&self.hann_window)
			.map(|(&sample, &w)| Complex::new(sample * w, 0.0))
			.collect();

		// Output comes back in natural bin order.
		self.fft.process(&mut samples);

		let scale = n as f32;
		let power_db = samples[..n / 2]
			.iter()
			.map(|bin| {
				let power = bin.norm_sqr() / scale;
				let db = 10.0 * power.log10();
				// log10(0) is -inf, which max() maps onto the floor as well.
				db.max(self.noise_floor_db)
			})
			.collect();

		Ok(Spectrum {
			power_db,
			sample_rate_hz: block.sample_rate_hz(),
			block_len: n,
		})
	}
}

fn check_block_len(len: usize) -> Result<()> {
	if len < 2 || !len.is_power_of_two() {
		return Err(Error::InvalidBlockSize(len));
	}
	Ok(())
}

// The planner itself is not Send, so only the planned FFT is kept.
fn plan(len: usize) -> Arc<dyn Fft<f32>> {
	FftPlanner::new().plan_fft_forward(len)
}

/// Periodic Hann window, zero at the first sample.
fn hann_window(len: usize) -> Vec<f32> {
	(0..len)
		.map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / len as f32).cos()))
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;
	use rand::rngs::StdRng;
	use rand::{Rng, SeedableRng};

	const RATE: u32 = 83_333;
	const N: usize = 2048;

	fn calibrator() -> SpectralCalibrator {
		SpectralCalibrator::new(N, ThresholdMode::Adaptive { k: 1.0 }, 0.0).unwrap()
	}

	fn tone_block(bins: &[(usize, f64)], dc: f64, noise: f64) -> Block {
		let mut rng = StdRng::seed_from_u64(42);
		let samples = (0..N)
			.map(|i| {
				let mut v = dc;
				for &(bin, amplitude) in bins {
					v += amplitude * (2.0 * std::f64::consts::PI * bin as f64 * i as f64 / N as f64).sin();
				}
				if noise > 0.0 {
					v += rng.gen_range(-noise..=noise);
				}
				v as f32
			})
			.collect();
		Block::new(samples, RATE, 0)
	}

	fn bin_width() -> f32 {
		RATE as f32 / N as f32
	}

	#[test]
	fn pure_tone_maps_to_its_bin() {
		let block = tone_block(&[(100, 1000.0)], 0.0, 0.05);
		let calibration = calibrator().analyze(&block).unwrap();
		let expected = 100.0 * RATE as f32 / (2.0 * 1024.0);
		// Hann leakage lights up the neighbouring bins as well.
		assert!(
			(calibration.bandwidth_hz - expected).abs() <= bin_width() * 1.01,
			"got {} Hz, expected about {} Hz",
			calibration.bandwidth_hz,
			expected
		);
		assert!(calibration.threshold_db > calibration.mean_db);
	}

	#[test]
	fn dc_offset_does_not_hide_tone() {
		let block = tone_block(&[(100, 1000.0)], 2048.0, 0.0);
		let bandwidth = calibrator().calibrate(&block).unwrap();
		assert!((bandwidth - 100.0 * bin_width()).abs() <= bin_width() * 1.01);
	}

	#[test]
	fn highest_tone_wins() {
		let block = tone_block(&[(40, 800.0), (300, 200.0)], 2048.0, 0.0);
		let bandwidth = calibrator().calibrate(&block).unwrap();
		assert!((bandwidth - 300.0 * bin_width()).abs() <= bin_width() * 1.01);
	}

	#[test]
	fn flat_spectrum_yields_zero() {
		let block = Block::new(vec![0.0; N], RATE, 0);
		let calibration = calibrator().analyze(&block).unwrap();
		assert_eq!(calibration.bandwidth_hz, 0.0);
		assert_eq!(calibration.bin, None);
		assert_eq!(calibration.stddev_db, 0.0);
	}

	#[test]
	fn fixed_threshold_mode() {
		let block = tone_block(&[(100, 1000.0)], 0.0, 0.0);
		let mut calibrator =
			SpectralCalibrator::new(N, ThresholdMode::Fixed { db: 200.0 }, 0.0).unwrap();
		assert_eq!(calibrator.calibrate(&block).unwrap(), 0.0);
	}

	#[test]
	fn rejects_non_power_of_two() {
		assert_eq!(
			SpectralCalibrator::new(1000, ThresholdMode::default(), 0.0).err(),
			Some(Error::InvalidBlockSize(1000))
		);
		let block = Block::new(vec![1.0; 1000], RATE, 0);
		assert_eq!(calibrator().calibrate(&block), Err(Error::InvalidBlockSize(1000)));
	}

	#[test]
	fn replans_for_other_lengths() {
		let mut calibrator = calibrator();
		let samples = (0..256)
			.map(|i| (1000.0 * (2.0 * std::f64::consts::PI * 20.0 * i as f64 / 256.0).sin()) as f32)
			.collect();
		let block = Block::new(samples, RATE, 0);
		let spectrum = calibrator.spectrum(&block).unwrap();
		assert_eq!(spectrum.len(), 128);
		assert_eq!(calibrator.block_len(), 256);
		let bandwidth = calibrator.calibrate(&block).unwrap();
		let width = RATE as f32 / 256.0;
		assert!((bandwidth - 20.0 * width).abs() <= width * 1.01);
	}

	proptest! {
		#![proptest_config(ProptestConfig::with_cases(32))]

		#[test]
		fn bandwidth_stays_below_nyquist(
			samples in prop::collection::vec(0.0f32..4096.0, 256),
		) {
			let mut calibrator = SpectralCalibrator::new(256, ThresholdMode::default(), 0.0).unwrap();
			let block = Block::new(samples, RATE, 0);
			let bandwidth = calibrator.calibrate(&block).unwrap();
			prop_assert!(bandwidth >= 0.0);
			prop_assert!(bandwidth <= RATE as f32 / 2.0);
		}

		#[test]
		fn calibration_is_deterministic(
			samples in prop::collection::vec(-2048.0f32..2048.0, 512),
		) {
			let block = Block::new(samples, RATE, 0);
			let mut first = SpectralCalibrator::new(512, ThresholdMode::default(), 0.0).unwrap();
			let mut second = SpectralCalibrator::new(512, ThresholdMode::default(), 0.0).unwrap();
			let a = first.analyze(&block).unwrap();
			prop_assert_eq!(a, first.analyze(&block).unwrap());
			prop_assert_eq!(a, second.analyze(&block).unwrap());
		}
	}
}
