//! Reduced sampling rate selection from a detected bandwidth.

use log::warn;

use crate::peripheral::RateBounds;

/// `margin * bandwidth`, rounded up, without any device clipping. 0 for a
/// zero or invalid bandwidth.
pub fn nyquist_rate(bandwidth_hz: f32, margin: f32) -> u32 {
	if bandwidth_hz.is_nan() || bandwidth_hz <= 0.0 {
		return 0;
	}
	let rate = (bandwidth_hz as f64 * margin as f64).ceil();
	if rate >= u32::MAX as f64 {
		u32::MAX
	} else {
		rate as u32
	}
}

/// `min(2 * bandwidth, device_max)`, falling back to `device_max` when nothing
/// was detected.
pub fn select_rate(bandwidth_hz: f32, device_max_hz: u32) -> u32 {
	match nyquist_rate(bandwidth_hz, 2.0) {
		0 => device_max_hz,
		rate => rate.min(device_max_hz),
	}
}

/// Applies the Nyquist margin policy within the device's supported range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateController {
	margin: f32,
	bounds: RateBounds,
}

impl RateController {
	pub fn new(margin: f32, bounds: RateBounds) -> Self {
		Self { margin, bounds }
	}

	pub fn bounds(&self) -> RateBounds {
		self.bounds
	}

	/// The rate to sample at for `bandwidth_hz`. Never zero and never above the
	/// device maximum; rates under the device minimum are raised to it.
	pub fn select_rate(&self, bandwidth_hz: f32) -> u32 {
		match nyquist_rate(bandwidth_hz, self.margin) {
			0 => {
				warn!(
					"No bandwidth detected, keeping device maximum of {} Hz",
					self.bounds.max_hz
				);
				self.bounds.max_hz
			}
			rate => rate.clamp(self.bounds.min_hz, self.bounds.max_hz),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const R: u32 = 80_000;

	#[test]
	fn select_rate_properties() {
		assert_eq!(select_rate(0.0, R), R);
		assert_eq!(select_rate(R as f32 / 4.0, R), R / 2);
		assert_eq!(select_rate(R as f32, R), R);
	}

	#[test]
	fn nyquist_rate_rounds_up() {
		assert_eq!(nyquist_rate(0.0, 2.0), 0);
		assert_eq!(nyquist_rate(f32::NAN, 2.0), 0);
		assert_eq!(nyquist_rate(100.25, 2.0), 201);
		assert_eq!(nyquist_rate(1000.0, 2.5), 2500);
	}

	#[test]
	fn controller_stays_in_bounds() {
		let controller = RateController::new(
			2.0,
			RateBounds {
				min_hz: 611,
				max_hz: R,
			},
		);
		assert_eq!(controller.select_rate(0.0), R);
		assert_eq!(controller.select_rate(10.0), 611);
		assert_eq!(controller.select_rate(R as f32 / 4.0), R / 2);
		assert_eq!(controller.select_rate(R as f32), R);
	}
}
