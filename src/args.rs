//! Argument parsing for running the pipeline against the simulated ADC

use std::time::Duration;

use adaptive_sampler::constants::*;
use adaptive_sampler::{PipelineConfig, ThresholdMode};
use clap::Parser;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
	/// Samples per block (power of two)
	#[clap(short, long, default_value_t = BLOCK_LENGTH)]
	pub block_len: usize,
	/// Highest conversion rate of the device in Hz
	#[clap(long, default_value_t = DEVICE_MAX_RATE_HZ)]
	pub max_rate: u32,
	/// Lowest conversion rate of the device in Hz
	#[clap(long, default_value_t = DEVICE_MIN_RATE_HZ)]
	pub min_rate: u32,
	/// Seconds between published averages
	#[clap(short, long, default_value_t = FLUSH_PERIOD.as_secs_f64())]
	pub flush_secs: f64,
	/// Threshold sensitivity k in mean + k * stddev
	#[clap(short, long, default_value_t = THRESHOLD_K)]
	pub k: f32,
	/// Use a fixed threshold in dB instead of the adaptive one
	#[clap(long)]
	pub fixed_threshold: Option<f32>,
	/// Multiplier applied to the detected bandwidth
	#[clap(short, long, default_value_t = NYQUIST_MARGIN)]
	pub margin: f32,
	/// Reduced-rate blocks between calibration passes (0 = never)
	#[clap(long, default_value_t = RECALIBRATE_EVERY)]
	pub recalibrate_every: u32,
	/// Full-rate blocks before a failed calibration is retried (0 = never)
	#[clap(long, default_value_t = CALIBRATION_RETRY_BLOCKS)]
	pub calibration_retry: u32,
	/// Telemetry topic
	#[clap(long, default_value = TELEMETRY_TOPIC)]
	pub topic: String,
	/// Simulated tone frequencies in Hz
	#[clap(short, long, default_value = "1200")]
	pub tone: Vec<f64>,
	/// Simulated tone amplitude in conversion counts
	#[clap(long, default_value_t = 800.0)]
	pub amplitude: f64,
	/// Simulated uniform noise amplitude in conversion counts
	#[clap(long, default_value_t = 2.0)]
	pub noise: f64,
	/// Stop after this many seconds (runs until Ctrl-C when omitted)
	#[clap(short, long)]
	pub duration: Option<f64>,
	#[clap(flatten)]
	pub verbose: clap_verbosity_flag::Verbosity<clap_verbosity_flag::InfoLevel>,
}

impl Args {
	pub fn pipeline_config(&self) -> PipelineConfig {
		PipelineConfig {
			block_len: self.block_len,
			device_max_rate_hz: self.max_rate,
			device_min_rate_hz: self.min_rate,
			flush_period: Duration::from_secs_f64(self.flush_secs.max(0.0)),
			threshold: match self.fixed_threshold {
				Some(db) => ThresholdMode::Fixed { db },
				None => ThresholdMode::Adaptive { k: self.k },
			},
			nyquist_margin: self.margin,
			recalibrate_every: self.recalibrate_every,
			calibration_retry_blocks: self.calibration_retry,
			topic: self.topic.clone(),
			..Default::default()
		}
	}
}

/// Match verbosity filter with tracing subscriber log levels
pub fn convert_filter(filter: log::LevelFilter) -> tracing_subscriber::filter::LevelFilter {
	match filter {
		log::LevelFilter::Off => tracing_subscriber::filter::LevelFilter::OFF,
		log::LevelFilter::Error => tracing_subscriber::filter::LevelFilter::ERROR,
		log::LevelFilter::Warn => tracing_subscriber::filter::LevelFilter::WARN,
		log::LevelFilter::Info => tracing_subscriber::filter::LevelFilter::INFO,
		log::LevelFilter::Debug => tracing_subscriber::filter::LevelFilter::DEBUG,
		log::LevelFilter::Trace => tracing_subscriber::filter::LevelFilter::TRACE,
	}
}
