
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::storage::StorageMode;

pub const DEFAULT_CYCLE_COUNT: u32 = 10;
pub const DEFAULT_PROGRAM_PERIOD_MS: f64 = 1.0;
pub const DEFAULT_CYCLE_DURATION_MS: u64 = 100_000;
pub const DEFAULT_WAVEFORMS_PER_CYCLE: u32 = 10;
pub const DEFAULT_REPLY_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_FILE_BASE: &str = "jitter";

// Immutable once a run starts. Fields missing from a plan file take their
// defaults, which match the command line defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestPlan {
	pub ip_address: String,
	pub cycle_count: u32,
	// Period of the program under test, in milliseconds.
	pub program_period_ms: f64,
	pub cycle_duration_ms: u64,
	pub waveforms_per_cycle: u32,
	pub file_base: String,
	pub storage_mode: StorageMode,
	pub measure_jitter: bool,
	pub reply_timeout_ms: u64,
}

impl Default for TestPlan {
	fn default() -> Self {
		Self {
			ip_address: String::new(),
			cycle_count: DEFAULT_CYCLE_COUNT,
			program_period_ms: DEFAULT_PROGRAM_PERIOD_MS,
			cycle_duration_ms: DEFAULT_CYCLE_DURATION_MS,
			waveforms_per_cycle: DEFAULT_WAVEFORMS_PER_CYCLE,
			file_base: DEFAULT_FILE_BASE.to_owned(),
			storage_mode: StorageMode::default(),
			measure_jitter: false,
			reply_timeout_ms: DEFAULT_REPLY_TIMEOUT_MS,
		}
	}
}

impl TestPlan {
	pub fn new(ip_address:impl Into<String>) -> Self {
		Self { ip_address: ip_address.into(), ..Self::default() }
	}

	pub fn from_json_file(path:&Path) -> Result<Self> {
		let plan_error = |source: Box<dyn std::error::Error + Send + Sync>| Error::PlanFile {
			path: path.to_path_buf(),
			source,
		};

		let text = fs::read_to_string(path).map_err(|e| plan_error(e.into()))?;
		let plan: TestPlan = serde_json::from_str(&text).map_err(|e| plan_error(e.into()))?;
		plan.validate()?;
		Ok(plan)
	}

	pub fn validate(&self) -> Result<()> {
		let invalid = |msg: &str| Err(Error::InvalidPlan(msg.to_owned()));

		if self.ip_address.trim().is_empty() {
			return invalid("ip_address is empty");
		}
		if self.cycle_count == 0 {
			return invalid("cycle_count must be at least 1");
		}
		if !(self.program_period_ms.is_finite() && self.program_period_ms > 0.0) {
			return invalid("program_period_ms must be a positive number");
		}
		if self.cycle_duration_ms == 0 {
			return invalid("cycle_duration_ms must be positive");
		}
		if self.waveforms_per_cycle == 0 {
			return invalid("waveforms_per_cycle must be at least 1");
		}
		if self.reply_timeout_ms == 0 {
			return invalid("reply_timeout_ms must be positive");
		}
		if self.file_base.is_empty() || self.file_base.contains(['/', '\\']) {
			return invalid("file_base must be a plain, non-empty file name");
		}
		Ok(())
	}

	pub fn cycle_duration(&self) -> Duration {
		Duration::from_millis(self.cycle_duration_ms)
	}

	pub fn reply_timeout(&self) -> Duration {
		Duration::from_millis(self.reply_timeout_ms)
	}

	// Lower bound on how long the run takes, ignoring the capture margin.
	pub fn total_duration(&self) -> Duration {
		self.cycle_duration() * self.cycle_count
	}
}
