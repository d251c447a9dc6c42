#[cfg(not(target_os = "espidf"))]
mod args;

#[cfg(target_os = "espidf")]
fn main() -> anyhow::Result<()> {
	use std::sync::atomic::AtomicBool;
	use std::sync::Arc;

	use adaptive_sampler::constants::*;
	use adaptive_sampler::esp_adc::{EspAdc, FreeRtosSemaphore};
	use adaptive_sampler::mqtt::MqttSink;
	use adaptive_sampler::{network, EventHub, Flusher, Pipeline, PipelineConfig};
	use esp_idf_svc::eventloop::EspSystemEventLoop;
	use esp_idf_svc::hal::peripherals::Peripherals;
	use esp_idf_svc::log::EspLogger;
	use esp_idf_svc::sys;
	use esp_idf_svc::timer::EspTaskTimerService;
	use log::info;

	// Initialize the ESP-IDF system
	esp_idf_svc::sys::link_patches();
	EspLogger::initialize_default();

	info!("Adaptive sampler starting...");

	let peripherals = Peripherals::take()?;
	let sysloop = EspSystemEventLoop::take()?;
	let nvs = network::init_nvs()?;

	let config = PipelineConfig::default();
	config.validate()?;

	// Every collaborator reports into the same hub
	let signal = Arc::new(FreeRtosSemaphore::new()?);
	let events = Arc::new(EventHub::new(signal.clone()));

	network::spawn_wifi_thread(peripherals.modem, sysloop, nvs, events.clone())?;
	let sink = MqttSink::new(MQTT_BROKER_URL, "adaptive-sampler", events.clone())?;

	let frame_bytes = (config.block_len / config.read_rounds * 4) as u32;
	let adc = EspAdc::new(events.clone(), sys::adc_channel_t_ADC_CHANNEL_0, frame_bytes)?;
	let mut pipeline = Pipeline::new(config.clone(), adc, signal)?;

	let mut flusher = Flusher::new(pipeline.aggregator(), sink, events, config.topic.clone());
	let timer_service = EspTaskTimerService::new()?;
	let flush_timer = timer_service.timer(move || {
		flusher.tick();
	})?;
	flush_timer.every(config.flush_period)?;

	// Never set: the acquisition task runs for the lifetime of the device.
	let stop = AtomicBool::new(false);
	pipeline.run(&stop);

	drop(flush_timer);
	Ok(())
}

#[cfg(not(target_os = "espidf"))]
fn main() -> anyhow::Result<()> {
	use std::sync::atomic::{AtomicBool, Ordering};
	use std::sync::Arc;
	use std::time::{Duration, Instant};

	use adaptive_sampler::sim::{SimulatedAdc, Tone};
	use adaptive_sampler::telemetry::spawn_flush_thread;
	use adaptive_sampler::{
		BinarySemaphore, ConversionFormat, EventHub, Flusher, LogSink, Pipeline, PipelineEvents,
	};
	use clap::Parser;
	use log::info;

	let args = args::Args::parse();
	tracing_subscriber::fmt()
		.with_max_level(args::convert_filter(args.verbose.log_level_filter()))
		.init();

	info!("Adaptive sampler starting against a simulated ADC...");

	let config = args.pipeline_config();
	config.validate()?;

	let signal = Arc::new(BinarySemaphore::new());
	let events = Arc::new(EventHub::new(signal.clone()));
	// No network collaborator off-target: the log sink is always reachable.
	events.on_connected();

	let mut adc = SimulatedAdc::new(events.clone(), ConversionFormat::Type2)
		.with_dc(2048.0)
		.with_noise(args.noise, 0x5eed)
		.with_pacing();
	for &frequency in &args.tone {
		adc = adc.with_tone(Tone::new(frequency, args.amplitude / args.tone.len() as f64));
	}

	let mut pipeline = Pipeline::new(config.clone(), adc, signal)?;

	let stop = Arc::new(AtomicBool::new(false));
	{
		let stop = stop.clone();
		ctrlc::set_handler(move || stop.store(true, Ordering::Release))?;
	}

	let flusher = Flusher::new(
		pipeline.aggregator(),
		LogSink::new(events.clone()),
		events.clone(),
		config.topic.clone(),
	);
	let flush_thread = spawn_flush_thread(flusher, config.flush_period, stop.clone())?;

	let deadline = args.duration.map(|secs| Instant::now() + Duration::from_secs_f64(secs.max(0.0)));
	while !stop.load(Ordering::Acquire) {
		if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
			stop.store(true, Ordering::Release);
			break;
		}
		pipeline.step();
	}

	flush_thread
		.join()
		.map_err(|_| anyhow::anyhow!("flush thread panicked"))?;

	let stats = events.publish_stats();
	info!(
		"Stopped at {} Hz after {} acknowledged publishes",
		pipeline.active_rate_hz(),
		stats.acked
	);
	Ok(())
}
