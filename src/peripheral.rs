//! Boundary to the continuous-conversion peripheral.
//!
//! The peripheral fills an internal buffer on its own once started and raises a
//! completion signal from interrupt context each time the buffer watermark is
//! reached. Everything above this trait only sees raw conversion results.

use crate::error::PeripheralFault;

/// Sampling rates the peripheral accepts, inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateBounds {
	pub min_hz: u32,
	pub max_hz: u32,
}

impl RateBounds {
	pub fn contains(&self, rate_hz: u32) -> bool {
		(self.min_hz..=self.max_hz).contains(&rate_hz)
	}
}

/// Layout of one raw conversion result in the driver buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionFormat {
	/// 16 bit little-endian: data in bits 0..12, channel in bits 12..16.
	Type1,
	/// 32 bit little-endian: data in bits 0..12, channel in bits 13..17, unit in bit 17.
	Type2,
}

/// One decoded conversion result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conversion {
	pub channel: u8,
	pub data: u16,
}

impl ConversionFormat {
	/// Bytes taken by one result (`SOC_ADC_DIGI_RESULT_BYTES`).
	pub const fn result_bytes(self) -> usize {
		match self {
			ConversionFormat::Type1 => 2,
			ConversionFormat::Type2 => 4,
		}
	}

	pub fn decode(self, raw: &[u8]) -> Conversion {
		match self {
			ConversionFormat::Type1 => {
				let word = u16::from_le_bytes([raw[0], raw[1]]);
				Conversion {
					channel: (word >> 12) as u8,
					data: word & 0x0fff,
				}
			}
			ConversionFormat::Type2 => {
				let word = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
				Conversion {
					channel: ((word >> 13) & 0x0f) as u8,
					data: (word & 0x0fff) as u16,
				}
			}
		}
	}

	/// Encodes a result the way the driver lays it out. Used by simulated peripherals.
	pub fn encode(self, conversion: Conversion, out: &mut [u8]) {
		match self {
			ConversionFormat::Type1 => {
				let word = (conversion.data & 0x0fff) | ((conversion.channel as u16 & 0x0f) << 12);
				out[..2].copy_from_slice(&word.to_le_bytes());
			}
			ConversionFormat::Type2 => {
				let word =
					(conversion.data as u32 & 0x0fff) | ((conversion.channel as u32 & 0x0f) << 13);
				out[..4].copy_from_slice(&word.to_le_bytes());
			}
		}
	}

	/// Decodes every whole result in `raw` into samples, appending at most
	/// `limit` of them to `out`. Returns how many were appended.
	pub fn decode_into(self, raw: &[u8], out: &mut Vec<f32>, limit: usize) -> usize {
		let before = out.len();
		for chunk in raw.chunks_exact(self.result_bytes()).take(limit) {
			out.push(self.decode(chunk).data as f32);
		}
		out.len() - before
	}
}

/// The continuous-conversion peripheral as seen by the block sampler.
///
/// Implementations raise their completion signal (see [`crate::signal`]) from
/// interrupt context whenever a conversion frame is ready.
pub trait AdcPeripheral {
	fn rate_bounds(&self) -> RateBounds;

	fn format(&self) -> ConversionFormat;

	/// Reprograms the conversion rate. Only called while stopped.
	fn set_sample_rate(&mut self, rate_hz: u32) -> Result<(), PeripheralFault>;

	fn start(&mut self) -> Result<(), PeripheralFault>;

	fn stop(&mut self) -> Result<(), PeripheralFault>;

	/// Copies whatever is buffered, up to `buf.len()` bytes, without blocking.
	/// Returns the number of bytes written, 0 when nothing is pending.
	fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, PeripheralFault>;
}
