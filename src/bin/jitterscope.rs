
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use log::{error, info, warn};

use jitterscope::plan::{DEFAULT_CYCLE_COUNT, DEFAULT_PROGRAM_PERIOD_MS, DEFAULT_REPLY_TIMEOUT_MS, DEFAULT_WAVEFORMS_PER_CYCLE};
use jitterscope::scheduler::{CycleScheduler, MonotonicClock, RunSummary};
use jitterscope::session::InstrumentSession;
use jitterscope::storage::{StorageMode, StorageSink};
use jitterscope::transport::Transport;
use jitterscope::{Error, Result, TestPlan};

#[derive(Parser, Debug)]
#[command(name = "jitterscope")]
#[command(about = "Captures scope waveforms and screenshots on a fixed schedule to measure timing jitter", long_about = None)]
struct Cli {
	/// Scope address
	#[arg(required_unless_present = "plan")]
	ip_address: Option<String>,

	/// Number of cycles
	#[arg(short = 'n', long = "tnum", default_value_t = DEFAULT_CYCLE_COUNT)]
	cycles: u32,

	/// Period of the program under test, in ms
	#[arg(short = 'p', long = "prgtime", default_value_t = DEFAULT_PROGRAM_PERIOD_MS)]
	program_period_ms: f64,

	/// Length of one cycle, in seconds
	#[arg(short = 't', long = "ttime", default_value_t = 100.0)]
	cycle_duration_s: f64,

	/// Waveforms captured per cycle
	#[arg(short = 'w', long = "wnum", default_value_t = DEFAULT_WAVEFORMS_PER_CYCLE)]
	waveforms: u32,

	#[arg(short = 'm', long, value_enum, default_value_t = StorageMode::Csv)]
	mode: StorageMode,

	/// File name stem; cycle i writes to <base><i>
	#[arg(short = 'b', long, default_value = "jitter")]
	base: String,

	#[arg(short = 'o', long, default_value = ".")]
	out_dir: PathBuf,

	/// Reply timeout, in ms
	#[arg(long, default_value_t = DEFAULT_REPLY_TIMEOUT_MS)]
	timeout: u64,

	/// Load the test plan from a JSON file; an address given on the command line overrides its ip_address
	#[arg(long, conflicts_with_all = ["cycles", "program_period_ms", "cycle_duration_s", "waveforms", "mode", "base", "timeout", "jitter"])]
	plan: Option<PathBuf>,

	/// Read the C1-C2 delay after every cycle
	#[arg(short = 'j', long)]
	jitter: bool,

	/// Write <base>-summary.json when the run ends
	#[arg(long)]
	summary: bool,
}

impl Cli {
	fn test_plan(&self) -> Result<TestPlan> {
		let mut plan = match &self.plan {
			Some(path) => TestPlan::from_json_file(path)?,
			None => TestPlan {
				cycle_count: self.cycles,
				program_period_ms: self.program_period_ms,
				cycle_duration_ms: seconds_to_ms(self.cycle_duration_s)?,
				waveforms_per_cycle: self.waveforms,
				file_base: self.base.clone(),
				storage_mode: self.mode,
				measure_jitter: self.jitter,
				reply_timeout_ms: self.timeout,
				..TestPlan::default()
			},
		};
		if let Some(ip) = &self.ip_address {
			plan.ip_address = ip.clone();
		}
		plan.validate()?;
		Ok(plan)
	}
}

fn seconds_to_ms(s:f64) -> Result<u64> {
	if !(s.is_finite() && s > 0.0) {
		return Err(Error::InvalidPlan(format!("cycle time must be a positive number of seconds, got {}", s)));
	}
	Ok((s * 1000.0).round() as u64)
}

fn drive<T: Transport>(session:&mut InstrumentSession<T>, plan:&TestPlan, stop:Arc<AtomicBool>) -> Result<RunSummary> {
	session.configure_display()?;
	session.configure_channels(plan.program_period_ms)?;
	session.check_sample_rate_adequate()?;

	let scheduler = CycleScheduler::new(plan.clone(), MonotonicClock::new())?.with_stop_flag(stop);
	scheduler.run(session)
}

fn run(cli:Cli) -> Result<RunSummary> {
	let plan = cli.test_plan()?;

	fs::create_dir_all(&cli.out_dir).map_err(|source| Error::Storage{ path: cli.out_dir.clone(), source })?;
	let sink = StorageSink::new(&cli.out_dir);

	let stop = Arc::new(AtomicBool::new(false));
	let handler_flag = Arc::clone(&stop);
	if let Err(e) = ctrlc::set_handler(move || handler_flag.store(true, Ordering::SeqCst)) {
		warn!("Ctrl-C will not stop the run cleanly: {}", e);
	}

	info!("Expected run time {:?}", plan.total_duration());
	let mut session = InstrumentSession::open(&plan.ip_address, plan.reply_timeout(), sink.clone())?;

	// The link is released whether or not the run succeeded
	let outcome = drive(&mut session, &plan, stop);
	let closed = session.close();
	let summary = outcome?;
	closed?;

	if cli.summary {
		let path = sink.write_json(&format!("{}-summary.json", plan.file_base), &summary)?;
		info!("Summary written to {}", path.display());
	}
	Ok(summary)
}

fn main() -> ExitCode {
	env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

	match run(Cli::parse()) {
		Ok(summary) => {
			let jitter:Vec<f64> = summary.cycles.iter().filter_map(|c| c.jitter_s).collect();
			if !jitter.is_empty() {
				let worst = jitter.iter().fold(0.0f64, |acc, j| acc.max(j.abs()));
				info!("Worst C1-C2 delay {:.3e} s over {} measurements", worst, jitter.len());
			}
			info!("Completed {} of {} cycles", summary.cycles_completed(), summary.cycles_planned);
			ExitCode::SUCCESS
		},
		Err(e) => {
			error!("{}", e);
			eprintln!("jitterscope: {}", e);
			ExitCode::from(2)
		},
	}
}
