//! Running average shared between the sampling task and the flush timer.
//!
//! Sums and counts live behind one mutex, so a flush always sees a pair that
//! was updated together and every sample lands in exactly one window.

use std::sync::Mutex;

#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct Accumulator {
	sum: f64,
	count: u64,
}

/// Result of closing one flush window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Flush {
	Window { mean: f64, count: u64 },
	/// Nothing was sampled since the previous flush.
	NoData,
}

impl Flush {
	pub fn mean(&self) -> Option<f64> {
		match self {
			Flush::Window { mean, .. } => Some(*mean),
			Flush::NoData => None,
		}
	}

	pub fn count(&self) -> u64 {
		match self {
			Flush::Window { count, .. } => *count,
			Flush::NoData => 0,
		}
	}
}

#[derive(Debug, Default)]
pub struct RunningAggregator {
	inner: Mutex<Accumulator>,
}

impl RunningAggregator {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn on_sample(&self, value: f32) {
		let mut acc = self.inner.lock().unwrap_or_else(|e| e.into_inner());
		acc.sum += value as f64;
		acc.count += 1;
	}

	/// Adds a whole block under a single lock acquisition.
	pub fn on_samples(&self, values: &[f32]) {
		let sum: f64 = values.iter().map(|&v| v as f64).sum();
		let mut acc = self.inner.lock().unwrap_or_else(|e| e.into_inner());
		acc.sum += sum;
		acc.count += values.len() as u64;
	}

	/// Takes the current window and starts a new one.
	pub fn flush(&self) -> Flush {
		let acc = std::mem::take(&mut *self.inner.lock().unwrap_or_else(|e| e.into_inner()));
		if acc.count == 0 {
			return Flush::NoData;
		}
		Flush::Window {
			mean: acc.sum / acc.count as f64,
			count: acc.count,
		}
	}
}
