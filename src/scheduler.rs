// Every deadline is reference + i * cycle_duration, taken from a single reference time,
// so a slow cycle never pushes later ones back

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::plan::TestPlan;
use crate::session::InstrumentSession;
use crate::storage::StorageMode;
use crate::transport::Transport;

// Captures are triggered this long before the end of their cycle.
pub const CAPTURE_MARGIN: Duration = Duration::from_millis(50);

pub const POLL_INTERVAL: Duration = Duration::from_millis(1);

// Coarse sleeps stop this far ahead of a deadline and are cut into slices
// so an interrupt is noticed quickly
pub const FINE_WINDOW: Duration = Duration::from_millis(20);
pub const COARSE_SLICE: Duration = Duration::from_millis(100);

pub trait Clock {
	// Monotonic time since the clock's origin.
	fn now(&self) -> Duration;
	fn sleep(&self, d:Duration);
}

pub struct MonotonicClock {
	origin: Instant,
}

impl MonotonicClock {
	pub fn new() -> Self {
		Self { origin: Instant::now() }
	}
}

impl Default for MonotonicClock {
	fn default() -> Self {
		Self::new()
	}
}

impl Clock for MonotonicClock {
	fn now(&self) -> Duration {
		self.origin.elapsed()
	}

	fn sleep(&self, d:Duration) {
		thread::sleep(d)
	}
}

// What the scheduler asks of the instrument in each cycle.
pub trait CycleActions {
	fn set_file_target(&mut self, index:u32, base_name:&str, mode:StorageMode) -> Result<()>;
	fn set_cursors(&mut self) -> Result<()>;
	fn capture_waveform(&mut self) -> Result<()>;
	fn capture_screen(&mut self) -> Result<()>;
	fn measure_jitter(&mut self) -> Result<f64>;
}

impl<T: Transport> CycleActions for InstrumentSession<T> {
	fn set_file_target(&mut self, index:u32, base_name:&str, mode:StorageMode) -> Result<()> {
		InstrumentSession::set_file_target(self, index, base_name, mode)
	}

	fn set_cursors(&mut self) -> Result<()> {
		InstrumentSession::set_cursors(self)
	}

	fn capture_waveform(&mut self) -> Result<()> {
		InstrumentSession::capture_waveform(self)
	}

	fn capture_screen(&mut self) -> Result<()> {
		InstrumentSession::capture_screen(self)
	}

	fn measure_jitter(&mut self) -> Result<f64> {
		InstrumentSession::measure_jitter(self)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleEvent {
	pub index: u32,
	// When the captures of this cycle start.
	pub trigger: Duration,
	// End of the cycle window.
	pub deadline: Duration,
}

// Lazily yields the events of a run, 1-based.
pub struct CycleEvents {
	next: u32,
	count: u32,
	reference: Duration,
	cycle_duration: Duration,
	margin: Duration,
}

impl Iterator for CycleEvents {
	type Item = CycleEvent;

	fn next(&mut self) -> Option<CycleEvent> {
		if self.next > self.count {
			return None;
		}
		let index = self.next;
		self.next += 1;

		let offset = self.cycle_duration.checked_mul(index)?;
		Some(CycleEvent {
			index,
			trigger: self.reference + offset.saturating_sub(self.margin),
			deadline: self.reference + offset,
		})
	}

	fn size_hint(&self) -> (usize, Option<usize>) {
		let left = (self.count + 1).saturating_sub(self.next) as usize;
		(0, Some(left))
	}
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
	pub index: u32,
	pub trigger_s: f64,
	pub deadline_s: f64,
	// When the captures actually started, relative to the reference.
	pub started_s: f64,
	pub jitter_s: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
	pub cycles_planned: u32,
	pub interrupted: bool,
	pub cycles: Vec<CycleReport>,
}

impl RunSummary {
	pub fn cycles_completed(&self) -> usize {
		self.cycles.len()
	}
}

pub struct CycleScheduler<C: Clock> {
	plan: TestPlan,
	clock: C,
	stop: Arc<AtomicBool>,
	capture_margin: Duration,
}

impl<C: Clock> CycleScheduler<C> {
	pub fn new(plan:TestPlan, clock:C) -> Result<Self> {
		plan.validate()?;
		Ok(Self { plan, clock, stop: Arc::new(AtomicBool::new(false)), capture_margin: CAPTURE_MARGIN })
	}

	// Shares an externally owned stop flag, e.g. one set from a signal handler.
	pub fn with_stop_flag(mut self, stop:Arc<AtomicBool>) -> Self {
		self.stop = stop;
		self
	}

	pub fn stop_flag(&self) -> Arc<AtomicBool> {
		Arc::clone(&self.stop)
	}

	pub fn events(&self, reference:Duration) -> CycleEvents {
		CycleEvents {
			next: 1,
			count: self.plan.cycle_count,
			reference,
			cycle_duration: self.plan.cycle_duration(),
			margin: self.capture_margin,
		}
	}

	fn stopped(&self) -> bool {
		self.stop.load(Ordering::SeqCst)
	}

	// Returns false if the run was interrupted before the deadline
	fn wait_until(&self, deadline:Duration) -> bool {
		loop {
			if self.stopped() {
				return false;
			}
			let now = self.clock.now();
			if now >= deadline {
				return true;
			}

			let remaining = deadline - now;
			let nap = if remaining > FINE_WINDOW {
				(remaining - FINE_WINDOW).min(COARSE_SLICE)
			} else {
				POLL_INTERVAL.min(remaining)
			};
			self.clock.sleep(nap);
		}
	}

	fn capture<A: CycleActions>(&self, actions:&mut A) -> Result<Option<f64>> {
		actions.set_cursors()?;
		for _ in 0..self.plan.waveforms_per_cycle {
			actions.capture_waveform()?;
		}
		actions.capture_screen()?;

		if !self.plan.measure_jitter {
			return Ok(None);
		}
		match actions.measure_jitter() {
			Ok(delay) => Ok(Some(delay)),
			Err(e) if !e.is_fatal() => {
				warn!("No jitter measurement this cycle: {}", e);
				Ok(None)
			}
			Err(e) => Err(e),
		}
	}

	fn failed(index:u32, e:Error) -> Error {
		error!("Cycle {} failed: {}", index, e);
		e
	}

	// Runs every cycle of the plan, or until the stop flag is raised.
	// A fatal error aborts the run; the caller still owns and closes the session.
	pub fn run<A: CycleActions>(&self, actions:&mut A) -> Result<RunSummary> {
		let reference = self.clock.now();
		let secs = |t: Duration| t.saturating_sub(reference).as_secs_f64();
		let mut summary = RunSummary { cycles_planned: self.plan.cycle_count, interrupted: false, cycles: vec![] };

		info!(
			"Starting {} cycles of {:?}, {} waveforms each",
			self.plan.cycle_count,
			self.plan.cycle_duration(),
			self.plan.waveforms_per_cycle
		);

		for event in self.events(reference) {
			actions
				.set_file_target(event.index, &self.plan.file_base, self.plan.storage_mode)
				.map_err(|e| Self::failed(event.index, e))?;

			if !self.wait_until(event.trigger) {
				summary.interrupted = true;
				break;
			}

			let started = self.clock.now();
			debug!("Cycle {} started {:?} after its trigger", event.index, started.saturating_sub(event.trigger));
			let jitter_s = self.capture(actions).map_err(|e| Self::failed(event.index, e))?;

			summary.cycles.push(CycleReport {
				index: event.index,
				trigger_s: secs(event.trigger),
				deadline_s: secs(event.deadline),
				started_s: secs(started),
				jitter_s,
			});
			info!("Cycle {}/{} captured", event.index, self.plan.cycle_count);

			if event.index < self.plan.cycle_count && !self.wait_until(event.deadline) {
				summary.interrupted = true;
				break;
			}
		}

		if summary.interrupted {
			info!("Run interrupted after {} cycles", summary.cycles_completed());
		}
		Ok(summary)
	}
}
