use std::time::Duration;

/// Upper bound of the continuous ADC driver on the ESP32-S3
/// (`SOC_ADC_SAMPLE_FREQ_THRES_HIGH`), in Hertz.
pub const DEVICE_MAX_RATE_HZ: u32 = 83_333;

/// Lower bound of the continuous ADC driver (`SOC_ADC_SAMPLE_FREQ_THRES_LOW`).
pub const DEVICE_MIN_RATE_HZ: u32 = 611;

/// Represents the number of samples captured in a single block.
///
/// A calibration pass runs a 2048-point FFT over one block, so this has to be a
/// power of two. Larger blocks give finer frequency resolution during
/// calibration but take longer to capture at the reduced rate.
pub const BLOCK_LENGTH: usize = 2048;

/// Number of non-blocking driver reads a block is split into.
pub const READ_ROUNDS: usize = 4;

/// Empty reads tolerated before going back to waiting on the completion signal.
pub const MAX_EMPTY_READS: usize = 8;

pub const FLUSH_PERIOD: Duration = Duration::from_secs(5);

pub const CAPTURE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Sensitivity multiplier `k` of the adaptive `mean + k * stddev` threshold.
pub const THRESHOLD_K: f32 = 1.0;

/// Power below which a spectral bin is considered silent. 0 dB is one
/// conversion count squared per bin.
pub const NOISE_FLOOR_DB: f32 = 0.0;

pub const NYQUIST_MARGIN: f32 = 2.0;

/// Reduced-rate blocks between two calibration passes, 0 disables re-calibration.
pub const RECALIBRATE_EVERY: u32 = 0;

pub const MAX_CAPTURE_FAILURES: u32 = 3;

/// Full-rate blocks sampled after a failed calibration before it is retried,
/// 0 stays at full rate until another trigger fires.
pub const CALIBRATION_RETRY_BLOCKS: u32 = 16;

pub const TELEMETRY_TOPIC: &str = "sensor/average";

pub const WIFI_SSID: &str = match option_env!("WIFI_SSID") {
	Some(ssid) => ssid,
	None => "adaptive-sampler",
};

pub const WIFI_PASSWORD: &str = match option_env!("WIFI_PASSWORD") {
	Some(password) => password,
	None => "",
};

pub const MQTT_BROKER_URL: &str = match option_env!("MQTT_BROKER_URL") {
	Some(url) => url,
	None => "mqtt://192.168.1.10:1883",
};
