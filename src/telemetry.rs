//! Periodic flush of the running average to the telemetry transport.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{error, info, warn};

use crate::aggregator::{Flush, RunningAggregator};
use crate::error::Result;
use crate::events::{EventHub, PipelineEvents};
use crate::signal::CompletionSignal;

/// Outbound telemetry transport.
pub trait TelemetrySink: Send {
	/// Queues `payload` on `topic` without waiting for delivery. Returns the
	/// message id the acknowledgement will carry.
	fn publish(&mut self, topic: &str, payload: &str) -> Result<u32>;
}

pub fn format_average(mean: f64) -> String {
	format!("{:.3}", mean)
}

/// Sink that writes every message to the log and acknowledges it immediately.
pub struct LogSink {
	events: Arc<dyn PipelineEvents>,
	next_id: u32,
}

impl LogSink {
	pub fn new(events: Arc<dyn PipelineEvents>) -> Self {
		Self {
			events,
			next_id: 1,
		}
	}
}

impl TelemetrySink for LogSink {
	fn publish(&mut self, topic: &str, payload: &str) -> Result<u32> {
		let id = self.next_id;
		self.next_id = self.next_id.wrapping_add(1);
		info!("[{}] {}", topic, payload);
		self.events.on_publish_ack(id, true);
		Ok(id)
	}
}

#[derive(Debug, Clone, PartialEq)]
pub enum FlushOutcome {
	Published { mean: f64, count: u64, message_id: u32 },
	NoData,
	/// The window was computed but the network was down, so it was dropped.
	Offline { mean: f64, count: u64 },
	Failed { mean: f64, count: u64 },
}

/// Closes aggregation windows and publishes their averages. Runs on the timer
/// context, apart from the sampling task.
pub struct Flusher<T, S> {
	aggregator: Arc<RunningAggregator>,
	sink: T,
	events: Arc<EventHub<S>>,
	topic: String,
}

impl<T: TelemetrySink, S: CompletionSignal> Flusher<T, S> {
	pub fn new(
		aggregator: Arc<RunningAggregator>,
		sink: T,
		events: Arc<EventHub<S>>,
		topic: impl Into<String>,
	) -> Self {
		Self {
			aggregator,
			sink,
			events,
			topic: topic.into(),
		}
	}

	pub fn sink(&self) -> &T {
		&self.sink
	}

	pub fn tick(&mut self) -> FlushOutcome {
		let (mean, count) = match self.aggregator.flush() {
			Flush::Window { mean, count } => (mean, count),
			Flush::NoData => {
				warn!("No samples in this window, nothing to publish");
				return FlushOutcome::NoData;
			}
		};

		if !self.events.is_connected() {
			warn!(
				"Dropping average {:.3} of {} samples, network not associated",
				mean, count
			);
			return FlushOutcome::Offline { mean, count };
		}

		let sent_at = Instant::now();
		match self.sink.publish(&self.topic, &format_average(mean)) {
			Ok(message_id) => {
				self.events.track_publish(message_id, sent_at);
				info!(
					"Published average {:.3} of {} samples (message {})",
					mean, count, message_id
				);
				FlushOutcome::Published {
					mean,
					count,
					message_id,
				}
			}
			Err(e) => {
				error!("Failed to publish average: {}", e);
				FlushOutcome::Failed { mean, count }
			}
		}
	}
}

/// Deadline following one that fired at `now`. A late tick restarts the
/// schedule from `now` rather than firing the missed periods back to back.
fn next_deadline(next: Instant, now: Instant, period: Duration) -> Instant {
	let following = next + period;
	if following <= now {
		now + period
	} else {
		following
	}
}

/// Runs `flusher` every `period` on its own thread until `stop` is set.
pub fn spawn_flush_thread<T, S>(
	mut flusher: Flusher<T, S>,
	period: Duration,
	stop: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<()>>
where
	T: TelemetrySink + 'static,
	S: CompletionSignal + 'static,
{
	thread::Builder::new()
		.stack_size(8192)
		.name("flush timer".into())
		.spawn(move || {
			let mut next = Instant::now() + period;
			while !stop.load(Ordering::Acquire) {
				let now = Instant::now();
				if now < next {
					thread::sleep((next - now).min(Duration::from_millis(50)));
					continue;
				}
				flusher.tick();
				next = next_deadline(next, Instant::now(), period);
			}
		})
}
