use std::time::Duration;

/// One contiguous capture of samples at a known rate.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
	samples: Vec<f32>,
	sample_rate_hz: u32,
	sequence: u64,
}

impl Block {
	pub fn new(samples: Vec<f32>, sample_rate_hz: u32, sequence: u64) -> Self {
		Self {
			samples,
			sample_rate_hz,
			sequence,
		}
	}

	pub fn samples(&self) -> &[f32] {
		&self.samples
	}

	pub fn len(&self) -> usize {
		self.samples.len()
	}

	pub fn is_empty(&self) -> bool {
		self.samples.is_empty()
	}

	pub fn sample_rate_hz(&self) -> u32 {
		self.sample_rate_hz
	}

	/// Position of this block in the capture sequence, starting at 0.
	pub fn sequence(&self) -> u64 {
		self.sequence
	}

	/// Time spanned by the block at its sampling rate.
	pub fn duration(&self) -> Duration {
		if self.sample_rate_hz == 0 {
			return Duration::ZERO;
		}
		Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate_hz as f64)
	}

	pub fn into_samples(self) -> Vec<f32> {
		self.samples
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn duration_follows_rate() {
		let block = Block::new(vec![0.0; 1000], 2000, 3);
		assert_eq!(block.duration(), Duration::from_millis(500));
		assert_eq!(block.sequence(), 3);
		assert_eq!(Block::new(vec![1.0], 0, 0).duration(), Duration::ZERO);
	}
}
