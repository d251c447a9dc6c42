//! Interrupt-driven block capture.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, trace};

use crate::block::Block;
use crate::constants::MAX_EMPTY_READS;
use crate::error::{Error, Result};
use crate::peripheral::{AdcPeripheral, RateBounds};
use crate::signal::CompletionSignal;

pub struct BlockSampler<P, S> {
	peripheral: P,
	signal: Arc<S>,
	rate_hz: u32,
	read_rounds: usize,
	timeout: Option<Duration>,
	sequence: u64,
}

impl<P: AdcPeripheral, S: CompletionSignal> BlockSampler<P, S> {
	/// Takes ownership of the peripheral. `signal` must be the slot the
	/// peripheral raises on conversion completion. The peripheral starts out at
	/// its maximum rate.
	pub fn new(
		mut peripheral: P,
		signal: Arc<S>,
		read_rounds: usize,
		timeout: Option<Duration>,
	) -> Result<Self> {
		let rate_hz = peripheral.rate_bounds().max_hz;
		peripheral.set_sample_rate(rate_hz)?;
		Ok(Self {
			peripheral,
			signal,
			rate_hz,
			read_rounds: read_rounds.max(1),
			timeout,
			sequence: 0,
		})
	}

	pub fn rate_hz(&self) -> u32 {
		self.rate_hz
	}

	pub fn rate_bounds(&self) -> RateBounds {
		self.peripheral.rate_bounds()
	}

	pub fn peripheral(&self) -> &P {
		&self.peripheral
	}

	pub fn peripheral_mut(&mut self) -> &mut P {
		&mut self.peripheral
	}

	/// Reprograms the conversion rate for the following captures.
	pub fn configure(&mut self, rate_hz: u32) -> Result<()> {
		let bounds = self.peripheral.rate_bounds();
		if !bounds.contains(rate_hz) {
			return Err(Error::UnsupportedRate {
				requested: rate_hz,
				min: bounds.min_hz,
				max: bounds.max_hz,
			});
		}
		if rate_hz != self.rate_hz {
			self.peripheral.set_sample_rate(rate_hz)?;
			debug!("Sampler reconfigured {} Hz -> {} Hz", self.rate_hz, rate_hz);
			self.rate_hz = rate_hz;
		}
		Ok(())
	}

	/// Captures `length` contiguous samples at the configured rate.
	///
	/// Blocks the calling task until the peripheral signals completion, then
	/// drains its buffer in read rounds until the block is full. Conversion
	/// results beyond `length` are dropped. The peripheral is stopped on every
	/// exit path.
	pub fn capture_block(&mut self, length: usize) -> Result<Block> {
		// A wake left over from the previous capture must not satisfy this one.
		self.signal.clear();
		self.peripheral.start()?;

		let collected = self.collect(length);
		let stopped = self.peripheral.stop();

		if let Err(fault) = &stopped {
			error!("Failed to stop conversion: {}", fault);
		}
		let samples = collected?;
		stopped?;

		let block = Block::new(samples, self.rate_hz, self.sequence);
		self.sequence += 1;
		Ok(block)
	}

	fn collect(&mut self, length: usize) -> Result<Vec<f32>> {
		let format = self.peripheral.format();
		let round_results = length.div_ceil(self.read_rounds).max(1);
		let mut raw = vec![0u8; round_results * format.result_bytes()];
		let mut samples = Vec::with_capacity(length);
		let mut round = 0usize;

		while samples.len() < length {
			if !self.signal.wait(self.timeout) {
				let waited = self.timeout.unwrap_or_default();
				error!(
					"No conversion completion within {:?} ({} of {} samples)",
					waited,
					samples.len(),
					length
				);
				return Err(Error::AcquisitionTimeout(waited));
			}

			let mut empty_reads = 0;
			while samples.len() < length && empty_reads < MAX_EMPTY_READS {
				let read = self.peripheral.read_available(&mut raw)?;
				if read == 0 {
					empty_reads += 1;
					continue;
				}
				let remaining = length - samples.len();
				let decoded = format.decode_into(&raw[..read], &mut samples, remaining);
				round += 1;
				trace!("Read round {}: {} bytes, {} samples", round, read, decoded);
			}
		}

		debug!(
			"Captured {} samples at {} Hz in {} read rounds",
			samples.len(),
			self.rate_hz,
			round
		);
		Ok(samples)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::events::EventHub;
	use crate::peripheral::ConversionFormat;
	use crate::signal::BinarySemaphore;
	use crate::sim::{SimulatedAdc, Tone};

	fn sampler(
		adc: impl FnOnce(Arc<EventHub<BinarySemaphore>>) -> SimulatedAdc,
	) -> BlockSampler<SimulatedAdc, BinarySemaphore> {
		let signal = Arc::new(BinarySemaphore::new());
		let hub = Arc::new(EventHub::new(signal.clone()));
		BlockSampler::new(adc(hub), signal, 4, Some(Duration::from_millis(50))).unwrap()
	}

	#[test]
	fn captures_requested_length() {
		let mut sampler =
			sampler(|hub| SimulatedAdc::new(hub, ConversionFormat::Type2).with_dc(2048.0));
		let block = sampler.capture_block(1024).unwrap();
		assert_eq!(block.len(), 1024);
		assert_eq!(block.sample_rate_hz(), sampler.rate_bounds().max_hz);
		assert!(block.samples().iter().all(|&s| s == 2048.0));
		assert!(!sampler.peripheral().is_running());
	}

	#[test]
	fn partial_reads_loop_until_full() {
		let mut sampler = sampler(|hub| {
			SimulatedAdc::new(hub, ConversionFormat::Type1)
				.with_tone(Tone::new(1000.0, 500.0))
				.with_dc(2048.0)
				.with_max_read_bytes(6)
				.with_frame_results(10)
		});
		let block = sampler.capture_block(333).unwrap();
		assert_eq!(block.len(), 333);
		assert!(sampler.peripheral().reads() > 333 / 3);
	}

	#[test]
	fn sequence_advances_per_capture() {
		let mut sampler = sampler(|hub| SimulatedAdc::new(hub, ConversionFormat::Type2));
		assert_eq!(sampler.capture_block(64).unwrap().sequence(), 0);
		assert_eq!(sampler.capture_block(64).unwrap().sequence(), 1);
	}

	#[test]
	fn duplicate_completions_do_not_leak_into_next_capture() {
		let mut sampler = sampler(|hub| {
			SimulatedAdc::new(hub, ConversionFormat::Type2).with_duplicate_completions(5)
		});
		sampler.capture_block(128).unwrap();
		sampler.peripheral_mut().set_silent(true);
		// The stale wakes from the first capture must not let this one proceed.
		assert!(matches!(sampler.capture_block(128), Err(Error::AcquisitionTimeout(_))));
		assert!(!sampler.peripheral().is_running());
	}

	#[test]
	fn start_fault_is_acquisition_error() {
		let mut sampler = sampler(|hub| SimulatedAdc::new(hub, ConversionFormat::Type2));
		sampler.peripheral_mut().fail_next_starts(1);
		let err = sampler.capture_block(64).unwrap_err();
		assert!(err.is_acquisition());
		// Retrying the whole capture succeeds.
		assert_eq!(sampler.capture_block(64).unwrap().len(), 64);
	}

	#[test]
	fn configure_checks_bounds() {
		let mut sampler = sampler(|hub| SimulatedAdc::new(hub, ConversionFormat::Type2));
		let bounds = sampler.rate_bounds();
		assert!(matches!(
			sampler.configure(bounds.max_hz + 1),
			Err(Error::UnsupportedRate { .. })
		));
		assert!(matches!(sampler.configure(0), Err(Error::UnsupportedRate { .. })));
		sampler.configure(bounds.min_hz).unwrap();
		assert_eq!(sampler.rate_hz(), bounds.min_hz);
		assert_eq!(sampler.peripheral().sample_rate_hz(), bounds.min_hz);
		assert_eq!(sampler.capture_block(16).unwrap().sample_rate_hz(), bounds.min_hz);
	}
}
