//! Callbacks raised by the collaborators around the pipeline.
//!
//! The conversion peripheral, the network stack and the telemetry transport
//! all report into one [`PipelineEvents`] implementation instead of each
//! registering its own free function.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::signal::CompletionSignal;

/// Publishes awaiting acknowledgement (and acknowledgements awaiting their
/// publish) before the oldest is forgotten.
const MAX_IN_FLIGHT: usize = 16;

pub trait PipelineEvents: Send + Sync {
	/// Conversion frame ready. Called from interrupt context; returns whether the
	/// handler should yield.
	fn on_complete(&self) -> bool;

	fn on_connected(&self);

	fn on_disconnected(&self);

	/// Broker acknowledgement (or failure) for a previously published message.
	fn on_publish_ack(&self, message_id: u32, success: bool);
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishStats {
	pub acked: u32,
	pub failed: u32,
	pub last_latency: Option<Duration>,
}

#[derive(Default)]
struct PublishLedger {
	/// Send times of publishes not yet acknowledged.
	in_flight: VecDeque<(u32, Instant)>,
	/// Acknowledgements that arrived before their publish was tracked.
	early_acks: VecDeque<(u32, Instant)>,
}

fn push_bounded(queue: &mut VecDeque<(u32, Instant)>, entry: (u32, Instant)) {
	if queue.len() == MAX_IN_FLIGHT {
		if let Some((dropped, _)) = queue.pop_front() {
			debug!("Forgetting publish {}", dropped);
		}
	}
	queue.push_back(entry);
}

fn take(queue: &mut VecDeque<(u32, Instant)>, message_id: u32) -> Option<Instant> {
	queue
		.iter()
		.position(|(id, _)| *id == message_id)
		.and_then(|index| queue.remove(index))
		.map(|(_, at)| at)
}

pub struct EventHub<S> {
	signal: Arc<S>,
	connected: AtomicBool,
	publishes: Mutex<PublishLedger>,
	acked: AtomicU32,
	failed: AtomicU32,
	last_latency: Mutex<Option<Duration>>,
}

impl<S: CompletionSignal> EventHub<S> {
	pub fn new(signal: Arc<S>) -> Self {
		Self {
			signal,
			connected: AtomicBool::new(false),
			publishes: Mutex::new(PublishLedger::default()),
			acked: AtomicU32::new(0),
			failed: AtomicU32::new(0),
			last_latency: Mutex::new(None),
		}
	}

	pub fn signal(&self) -> &Arc<S> {
		&self.signal
	}

	pub fn is_connected(&self) -> bool {
		self.connected.load(Ordering::Acquire)
	}

	/// Records when `message_id` was handed to the transport. `sent_at` must be
	/// taken before the publish call, since the transport may acknowledge
	/// before it returns.
	pub fn track_publish(&self, message_id: u32, sent_at: Instant) {
		let early_ack = {
			let mut publishes = self.publishes.lock().unwrap_or_else(|e| e.into_inner());
			match take(&mut publishes.early_acks, message_id) {
				Some(acked_at) => Some(acked_at),
				None => {
					push_bounded(&mut publishes.in_flight, (message_id, sent_at));
					None
				}
			}
		};
		if let Some(acked_at) = early_ack {
			self.record_latency(message_id, acked_at.saturating_duration_since(sent_at));
		}
	}

	fn record_latency(&self, message_id: u32, latency: Duration) {
		*self.last_latency.lock().unwrap_or_else(|e| e.into_inner()) = Some(latency);
		info!("Publish {} acknowledged after {:?}", message_id, latency);
	}

	pub fn publish_stats(&self) -> PublishStats {
		PublishStats {
			acked: self.acked.load(Ordering::Relaxed),
			failed: self.failed.load(Ordering::Relaxed),
			last_latency: *self.last_latency.lock().unwrap_or_else(|e| e.into_inner()),
		}
	}
}

impl<S: CompletionSignal> PipelineEvents for EventHub<S> {
	fn on_complete(&self) -> bool {
		self.signal.notify()
	}

	fn on_connected(&self) {
		if !self.connected.swap(true, Ordering::AcqRel) {
			info!("Network associated, telemetry enabled");
		}
	}

	fn on_disconnected(&self) {
		if self.connected.swap(false, Ordering::AcqRel) {
			warn!("Network lost, telemetry paused");
		}
	}

	fn on_publish_ack(&self, message_id: u32, success: bool) {
		let acked_at = Instant::now();
		let sent_at = {
			let mut publishes = self.publishes.lock().unwrap_or_else(|e| e.into_inner());
			let sent_at = take(&mut publishes.in_flight, message_id);
			if sent_at.is_none() && success {
				push_bounded(&mut publishes.early_acks, (message_id, acked_at));
			}
			sent_at
		};

		if !success {
			self.failed.fetch_add(1, Ordering::Relaxed);
			warn!("Publish {} was not acknowledged by the broker", message_id);
			return;
		}

		self.acked.fetch_add(1, Ordering::Relaxed);
		match sent_at {
			Some(sent_at) => {
				self.record_latency(message_id, acked_at.saturating_duration_since(sent_at))
			}
			None => debug!("Acknowledgement for untracked publish {}", message_id),
		}
	}
}
