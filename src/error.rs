use thiserror::Error;

/// A fault reported by the conversion peripheral, carrying the driver status code.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("peripheral {op} failed with status {code}")]
pub struct PeripheralFault {
	pub op: &'static str,
	pub code: i32,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
	#[error("invalid configuration: {0}")]
	Configuration(String),

	#[error("sampling rate {requested} Hz outside device bounds [{min}, {max}] Hz")]
	UnsupportedRate { requested: u32, min: u32, max: u32 },

	#[error("acquisition failed: {0}")]
	Acquisition(#[from] PeripheralFault),

	#[error("no completion signal within {0:?}")]
	AcquisitionTimeout(std::time::Duration),

	#[error("block length {0} is not a power of two")]
	InvalidBlockSize(usize),

	#[error("publish failed: {0}")]
	Publish(String),
}

impl Error {
	/// Whether the failure happened while talking to the peripheral, as opposed
	/// to a programming or configuration mistake.
	pub fn is_acquisition(&self) -> bool {
		matches!(self, Error::Acquisition(_) | Error::AcquisitionTimeout(_))
	}
}

pub type Result<T> = std::result::Result<T, Error>;
