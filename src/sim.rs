//! Synthetic conversion peripheral for running the pipeline off-target.
//!
//! Produces the sum of a DC level, a set of tones and uniform noise, quantised
//! to 12 bit conversion results in the driver's buffer layout. Conversions are
//! delivered in frames; each new frame raises the completion callback like the
//! watermark interrupt would.

use std::f64::consts::PI;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::constants::{DEVICE_MAX_RATE_HZ, DEVICE_MIN_RATE_HZ};
use crate::error::PeripheralFault;
use crate::events::PipelineEvents;
use crate::peripheral::{AdcPeripheral, Conversion, ConversionFormat, RateBounds};

const FULL_SCALE: f64 = 4095.0;

/// Results per completion frame unless configured otherwise.
const DEFAULT_FRAME_RESULTS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tone {
	pub frequency_hz: f64,
	pub amplitude: f64,
}

impl Tone {
	pub fn new(frequency_hz: f64, amplitude: f64) -> Self {
		Self {
			frequency_hz,
			amplitude,
		}
	}
}

pub struct SimulatedAdc {
	events: Arc<dyn PipelineEvents>,
	format: ConversionFormat,
	bounds: RateBounds,
	rate_hz: u32,
	tones: Vec<Tone>,
	dc: f64,
	noise: f64,
	rng: StdRng,
	time_s: f64,
	running: bool,
	silent: bool,
	duplicate_completions: u32,
	failing_starts: u32,
	frame_results: usize,
	available: usize,
	max_read_bytes: Option<usize>,
	paced: bool,
	reads: usize,
}

impl SimulatedAdc {
	pub fn new(events: Arc<dyn PipelineEvents>, format: ConversionFormat) -> Self {
		Self {
			events,
			format,
			bounds: RateBounds {
				min_hz: DEVICE_MIN_RATE_HZ,
				max_hz: DEVICE_MAX_RATE_HZ,
			},
			rate_hz: DEVICE_MAX_RATE_HZ,
			tones: Vec::new(),
			dc: 0.0,
			noise: 0.0,
			rng: StdRng::seed_from_u64(0x5eed),
			time_s: 0.0,
			running: false,
			silent: false,
			duplicate_completions: 0,
			failing_starts: 0,
			frame_results: DEFAULT_FRAME_RESULTS,
			available: 0,
			max_read_bytes: None,
			paced: false,
			reads: 0,
		}
	}

	pub fn with_tone(mut self, tone: Tone) -> Self {
		self.tones.push(tone);
		self
	}

	pub fn with_dc(mut self, dc: f64) -> Self {
		self.dc = dc;
		self
	}

	/// Uniform noise in `[-amplitude, amplitude]` counts.
	pub fn with_noise(mut self, amplitude: f64, seed: u64) -> Self {
		self.noise = amplitude;
		self.rng = StdRng::seed_from_u64(seed);
		self
	}

	pub fn with_frame_results(mut self, results: usize) -> Self {
		self.frame_results = results.max(1);
		self
	}

	/// Caps every read, forcing partial reads.
	pub fn with_max_read_bytes(mut self, bytes: usize) -> Self {
		self.max_read_bytes = Some(bytes);
		self
	}

	/// Takes as long as real conversions would to fill each frame.
	pub fn with_pacing(mut self) -> Self {
		self.paced = true;
		self
	}

	/// Fires the completion callback this many extra times on start.
	pub fn with_duplicate_completions(mut self, extra: u32) -> Self {
		self.duplicate_completions = extra;
		self
	}

	/// Stops raising completion callbacks, like a stalled peripheral.
	pub fn set_silent(&mut self, silent: bool) {
		self.silent = silent;
	}

	pub fn fail_next_starts(&mut self, count: u32) {
		self.failing_starts = count;
	}

	pub fn is_running(&self) -> bool {
		self.running
	}

	pub fn sample_rate_hz(&self) -> u32 {
		self.rate_hz
	}

	/// Number of `read_available` calls so far.
	pub fn reads(&self) -> usize {
		self.reads
	}

	fn complete(&self) {
		if !self.silent {
			self.events.on_complete();
		}
	}

	fn next_conversion(&mut self) -> Conversion {
		let t = self.time_s;
		let mut value = self.dc;
		for tone in &self.tones {
			value += tone.amplitude * (2.0 * PI * tone.frequency_hz * t).sin();
		}
		if self.noise > 0.0 {
			value += self.rng.gen_range(-self.noise..=self.noise);
		}
		self.time_s += 1.0 / self.rate_hz as f64;
		Conversion {
			channel: 0,
			data: value.round().clamp(0.0, FULL_SCALE) as u16,
		}
	}
}

impl AdcPeripheral for SimulatedAdc {
	fn rate_bounds(&self) -> RateBounds {
		self.bounds
	}

	fn format(&self) -> ConversionFormat {
		self.format
	}

	fn set_sample_rate(&mut self, rate_hz: u32) -> Result<(), PeripheralFault> {
		if self.running {
			return Err(PeripheralFault {
				op: "config",
				code: -1,
			});
		}
		self.rate_hz = rate_hz;
		Ok(())
	}

	fn start(&mut self) -> Result<(), PeripheralFault> {
		if self.failing_starts > 0 {
			self.failing_starts -= 1;
			return Err(PeripheralFault {
				op: "start",
				code: 0x103,
			});
		}
		self.running = true;
		self.available = self.frame_results;
		for _ in 0..=self.duplicate_completions {
			self.complete();
		}
		Ok(())
	}

	fn stop(&mut self) -> Result<(), PeripheralFault> {
		self.running = false;
		self.available = 0;
		Ok(())
	}

	fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, PeripheralFault> {
		self.reads += 1;
		if !self.running {
			return Err(PeripheralFault {
				op: "read",
				code: 0x103,
			});
		}
		if self.available == 0 {
			// The next frame is converting.
			if self.paced {
				thread::sleep(Duration::from_secs_f64(
					self.frame_results as f64 / self.rate_hz as f64,
				));
			}
			self.available = self.frame_results;
			self.complete();
			return Ok(0);
		}

		let result_bytes = self.format.result_bytes();
		let cap = self.max_read_bytes.unwrap_or(buf.len()).min(buf.len());
		let results = (cap / result_bytes).min(self.available);
		for chunk in buf[..results * result_bytes].chunks_exact_mut(result_bytes) {
			let conversion = self.next_conversion();
			self.format.encode(conversion, chunk);
		}
		self.available -= results;
		Ok(results * result_bytes)
	}
}
