//! Single-slot wake-up between the conversion interrupt and the acquisition task.
//!
//! The slot holds at most one pending wake. Raising it while it is already
//! raised is a no-op, so a burst of interrupts before the task resumes turns
//! into exactly one wake-up.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

pub trait CompletionSignal: Send + Sync {
	/// Raises the slot. May be called from interrupt context by implementations
	/// that support it. Returns true when a waiter should be scheduled
	/// immediately (the interrupt handler should yield).
	fn notify(&self) -> bool;

	/// Blocks until the slot is raised, then lowers it. `None` waits forever.
	/// Returns false if the timeout elapsed first.
	fn wait(&self, timeout: Option<Duration>) -> bool;

	/// Lowers the slot without waiting, discarding a stale wake.
	fn clear(&self);
}

/// Converts a wait timeout into scheduler ticks at `tick_rate_hz`.
///
/// `None` maps to `forever`. A finite timeout saturates one tick short of
/// `forever` so it can never turn into an unbounded wait, and a non-zero
/// timeout shorter than a tick still waits one tick.
pub fn timeout_ticks(timeout: Option<Duration>, tick_rate_hz: u32, forever: u32) -> u32 {
	let Some(timeout) = timeout else {
		return forever;
	};
	let millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
	let ticks = millis.saturating_mul(u64::from(tick_rate_hz)) / 1000;
	if ticks == 0 && !timeout.is_zero() {
		1
	} else {
		ticks.min(u64::from(forever.saturating_sub(1))) as u32
	}
}

/// Binary semaphore for thread contexts.
#[derive(Debug, Default)]
pub struct BinarySemaphore {
	raised: Mutex<bool>,
	cond: Condvar,
}

impl BinarySemaphore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn is_raised(&self) -> bool {
		*self.raised.lock().unwrap_or_else(|e| e.into_inner())
	}
}

impl CompletionSignal for BinarySemaphore {
	fn notify(&self) -> bool {
		let mut raised = self.raised.lock().unwrap_or_else(|e| e.into_inner());
		let woke = !*raised;
		*raised = true;
		self.cond.notify_one();
		woke
	}

	fn wait(&self, timeout: Option<Duration>) -> bool {
		let mut raised = self.raised.lock().unwrap_or_else(|e| e.into_inner());
		match timeout {
			None => {
				while !*raised {
					raised = self.cond.wait(raised).unwrap_or_else(|e| e.into_inner());
				}
			}
			Some(timeout) => {
				let deadline = Instant::now() + timeout;
				while !*raised {
					let now = Instant::now();
					if now >= deadline {
						return false;
					}
					raised = self
						.cond
						.wait_timeout(raised, deadline - now)
						.unwrap_or_else(|e| e.into_inner())
						.0;
				}
			}
		}
		*raised = false;
		true
	}

	fn clear(&self) {
		*self.raised.lock().unwrap_or_else(|e| e.into_inner()) = false;
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Arc;
	use std::thread;

	#[test]
	fn repeated_notifies_coalesce() {
		let signal = BinarySemaphore::new();
		assert!(signal.notify());
		assert!(!signal.notify());
		assert!(!signal.notify());

		assert!(signal.wait(Some(Duration::from_millis(10))));
		// Only one wake was pending.
		assert!(!signal.wait(Some(Duration::from_millis(10))));
	}

	#[test]
	fn wait_times_out() {
		let signal = BinarySemaphore::new();
		let started = Instant::now();
		assert!(!signal.wait(Some(Duration::from_millis(20))));
		assert!(started.elapsed() >= Duration::from_millis(20));
	}

	#[test]
	fn wakes_waiter_on_other_thread() {
		let signal = Arc::new(BinarySemaphore::new());
		let notifier = signal.clone();
		let handle = thread::spawn(move || {
			thread::sleep(Duration::from_millis(10));
			notifier.notify();
		});
		assert!(signal.wait(None));
		handle.join().unwrap();
		assert!(!signal.is_raised());
	}

	#[test]
	fn timeout_ticks_scales_with_tick_rate() {
		assert_eq!(timeout_ticks(Some(Duration::from_secs(1)), 100, u32::MAX), 100);
		assert_eq!(timeout_ticks(Some(Duration::from_millis(250)), 1000, u32::MAX), 250);
		assert_eq!(timeout_ticks(Some(Duration::ZERO), 100, u32::MAX), 0);
		// Shorter than one tick still waits.
		assert_eq!(timeout_ticks(Some(Duration::from_millis(1)), 100, u32::MAX), 1);
		assert_eq!(timeout_ticks(None, 100, u32::MAX), u32::MAX);
	}

	#[test]
	fn huge_timeout_saturates_below_forever() {
		assert_eq!(timeout_ticks(Some(Duration::MAX), 1000, u32::MAX), u32::MAX - 1);
		assert_eq!(
			timeout_ticks(Some(Duration::from_millis(u64::MAX)), 1000, u32::MAX),
			u32::MAX - 1
		);
	}

	#[test]
	fn clear_discards_stale_wake() {
		let signal = BinarySemaphore::new();
		signal.notify();
		signal.clear();
		assert!(!signal.wait(Some(Duration::ZERO)));
	}
}
