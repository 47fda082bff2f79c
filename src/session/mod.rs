// Configuration has to go Connected -> DisplayConfigured -> ChannelsConfigured -> Ready <-> Capturing.
// Anything called early fails with OutOfSequence instead of being reordered.

use std::fmt;
use std::thread;
use std::time::Duration;

use log::{debug, info};
use regex::Regex;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::storage::{StorageMode, StorageSink};
use crate::transport::{Transport, Vxi11Transport};
use crate::units::parse_scaled;

pub mod waveform;

use waveform::{Sample, CSV_HEADER};

lazy_static! {
	static ref IDN_RE: Regex = Regex::new("([^,]+),([^,]+),([^,]+),([^,\\s]+)").unwrap();
}

// Sample rate has to exceed the signal frequency by this factor for delay measurements to hold
pub const MIN_OVERSAMPLING:f64 = 5000.0;

// Cursor placement in divisions, relative to the program period in ms
pub const CURSOR_BASE_DIV:f64 = 7.0;
pub const CURSOR_PERIOD_DIV:f64 = 0.25;
pub const CURSOR_WIDTH_DIV:f64 = 1.0;

pub const DEFAULT_SETTLE_DURATION_SEC:f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase { Connected, DisplayConfigured, ChannelsConfigured, Ready, Capturing }

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Channel { C1, C2 }

impl Channel {
	pub const ALL:[Channel; 2] = [Channel::C1, Channel::C2];

	pub fn label(self) -> &'static str {
		match self {
			Channel::C1 => "C1",
			Channel::C2 => "C2",
		}
	}
}

impl fmt::Display for Channel {
	fn fmt(&self, f:&mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.label()) }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
	pub manufacturer: String,
	pub model: String,
	pub serial_num: String,
	pub fw_version: String,
}

impl Identity {
	pub fn parse(idn:&str) -> Result<Self> {
		let cap = IDN_RE.captures(idn.trim()).ok_or_else(|| Error::MalformedResponse(idn.to_owned()))?;
		Ok(Identity {
			manufacturer: cap[1].to_owned(),
			model: cap[2].to_owned(),
			serial_num: cap[3].to_owned(),
			fw_version: cap[4].to_owned(),
		})
	}
}

impl fmt::Display for Identity {
	fn fmt(&self, f:&mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{} {} (serial {}, firmware {})", self.manufacturer, self.model, self.serial_num, self.fw_version)
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileTarget {
	pub stem: String,
	pub mode: StorageMode,
}

pub struct InstrumentSession<T: Transport> {
	transport: T,
	sink: StorageSink,
	identity: Identity,
	phase: Phase,
	program_period_ms: Option<f64>,
	target: Option<FileTarget>,
	settle_duration: Duration,
}

impl InstrumentSession<Vxi11Transport> {

	pub fn open(ip_address:&str, timeout:Duration, sink:StorageSink) -> Result<Self> {
		let transport = Vxi11Transport::connect(ip_address, timeout)?;
		Self::connect(transport, timeout, sink)
	}

}

impl<T: Transport> InstrumentSession<T> {

	pub fn connect(mut transport:T, timeout:Duration, sink:StorageSink) -> Result<Self> {
		transport.set_timeout(timeout)?;
		let identity = Identity::parse(&transport.query("*IDN?")?)?;
		info!("Connected to {}", identity);

		Ok(Self {
			transport,
			sink,
			identity,
			phase: Phase::Connected,
			program_period_ms: None,
			target: None,
			settle_duration: Duration::from_secs_f32(DEFAULT_SETTLE_DURATION_SEC),
		})
	}

	pub fn identity(&self) -> &Identity { &self.identity }
	pub fn phase(&self) -> Phase { self.phase }
	pub fn program_period_ms(&self) -> Option<f64> { self.program_period_ms }
	pub fn file_target(&self) -> Option<&FileTarget> { self.target.as_ref() }

	// How long the display gets to redraw after the menu is hidden
	pub fn set_settle_duration(&mut self, d:Duration) { self.settle_duration = d; }

	fn require(&self, operation:&'static str, at_least:Phase) -> Result<()> {
		if self.phase < at_least { Err(Error::OutOfSequence{ operation, phase: self.phase }) }
		else { Ok(()) }
	}

	fn send_all(&mut self, commands:&[&str]) -> Result<()> {
		commands.iter().try_for_each(|cmd| self.transport.send(cmd))
	}

	fn query_value(&mut self, command:&str) -> Result<f64> {
		let reply = self.transport.query(command)?;
		Ok(parse_scaled(&reply)?.magnitude)
	}

	// Puts display, trigger and probe settings back to known defaults.
	// Calling it again is harmless, but it drops the session back to
	// `DisplayConfigured` since persistence is switched off.
	pub fn configure_display(&mut self) -> Result<()> {
		self.send_all(&["PERS OFF", "TRMD NORM", "C1:ATTN 1", "C2:ATTN 1", "SCSV OFF"])?;
		self.phase = Phase::DisplayConfigured;
		debug!("Display configured");
		Ok(())
	}

	// Scales the time base to the program period and turns on infinite persistence
	// so successive triggers overlay.
	pub fn configure_channels(&mut self, program_period_ms:f64) -> Result<()> {
		self.require("configure_channels", Phase::DisplayConfigured)?;
		if !(program_period_ms.is_finite() && program_period_ms > 0.0) {
			return Err(Error::InvalidPlan(format!("program period must be positive, got {} ms", program_period_ms)));
		}

		let tdiv_sec = program_period_ms / 1000.0;
		self.transport.send(&format!("TDIV {:.3E}S", tdiv_sec))?;
		self.transport.send(&format!("TRDL {:.3E}S", 3.0 * tdiv_sec))?;
		self.send_all(&["PESU INFINITE", "PERS ON"])?;

		self.program_period_ms = Some(program_period_ms);
		self.phase = Phase::ChannelsConfigured;
		debug!("Channels configured for a {} ms program period", program_period_ms);
		Ok(())
	}

	// Fails unless the sample rate is above `MIN_OVERSAMPLING` times the signal
	// frequency. Returns the ratio. Settings are never changed here.
	pub fn check_sample_rate_adequate(&mut self) -> Result<f64> {
		let sample_rate = self.query_value("SARA?")?;
		let signal_frequency = self.query_value("C1:PAVA? FREQ")?;

		if sample_rate > MIN_OVERSAMPLING * signal_frequency {
			let ratio = sample_rate / signal_frequency;
			info!("Sample rate {:.3e} Sa/s is {:.0}x the {:.3e} Hz signal", sample_rate, ratio, signal_frequency);
			Ok(ratio)
		} else {
			Err(Error::InsufficientSampleRate{ sample_rate, signal_frequency })
		}
	}

	pub fn set_cursors(&mut self) -> Result<()> {
		self.require("set_cursors", Phase::ChannelsConfigured)?;
		let period = self.program_period_ms.ok_or(Error::OutOfSequence{ operation: "set_cursors", phase: self.phase })?;

		let reference = CURSOR_BASE_DIV + CURSOR_PERIOD_DIV / period;
		self.transport.send("CRMS HREL")?;
		self.transport.send(&format!("CRST HREF,{:.2}DIV,HDIF,{:.2}DIV", reference, reference + CURSOR_WIDTH_DIV))?;

		if self.phase < Phase::Ready { self.phase = Phase::Ready; }
		Ok(())
	}

	// Selects `<base_name><index>` as the stem for the next captures. The storage
	// mode of the first target holds for the rest of the session.
	pub fn set_file_target(&mut self, index:u32, base_name:&str, mode:StorageMode) -> Result<()> {
		let first = match &self.target {
			Some(target) if target.mode != mode => {
				return Err(Error::OutOfSequence{ operation: "set_file_target", phase: self.phase });
			},
			Some(_) => false,
			None    => true,
		};

		let stem = format!("{}{}", base_name, index);
		if mode == StorageMode::Usb {
			if first {
				self.transport.send(&format!("DIR DISK,UDSK,CREATE,\"/{}\"", base_name))?;
			}
			self.transport.send(&format!("FLNM TYPE,C1,FILE,'{}'", stem))?;
		}

		debug!("Capturing to {} ({})", stem, mode);
		self.target = Some(FileTarget{ stem, mode });
		Ok(())
	}

	fn capturing<R>(&mut self, operation:&'static str, f:impl FnOnce(&mut Self, &FileTarget) -> Result<R>) -> Result<R> {
		self.require(operation, Phase::Ready)?;
		let target = self.target.clone().ok_or(Error::OutOfSequence{ operation, phase: self.phase })?;

		self.phase = Phase::Capturing;
		let result = f(self, &target);
		self.phase = Phase::Ready;
		result
	}

	fn read_waveform_block(&mut self, channel:Channel) -> Result<Vec<u8>> {
		self.transport.send(&format!("{}:WF? DAT2", channel))?;
		let raw = self.transport.read_raw_block()?;
		Ok(waveform::definite_block(&raw)?.to_vec())
	}

	pub fn transfer_waveform(&mut self, channel:Channel) -> Result<Vec<Sample>> {
		let codes = self.read_waveform_block(channel)?;

		let vdiv = self.query_value(&format!("{}:VDIV?", channel))?;
		let vofs = self.query_value(&format!("{}:OFST?", channel))?;
		let sps  = self.query_value("SARA?")?;
		if sps <= 0.0 {
			return Err(Error::MalformedResponse(format!("sample rate {}", sps)));
		}

		Ok(waveform::scale(channel, &codes, vdiv, vofs, sps))
	}

	// Stores one acquisition the way the storage mode says.
	pub fn capture_waveform(&mut self) -> Result<()> {
		self.capturing("capture_waveform", |s, target| {
			match target.mode {
				StorageMode::Csv => {
					let mut rows:Vec<Sample> = vec![];
					for channel in Channel::ALL {
						rows.extend(s.transfer_waveform(channel)?);
					}
					s.sink.append_csv_block(&target.stem, &CSV_HEADER, &rows)?;
				},
				StorageMode::Usb => {
					for channel in Channel::ALL {
						s.transport.send(&format!("STO {},UDSK", channel))?;
					}
				},
				StorageMode::Raw => {
					for channel in Channel::ALL {
						let block = s.read_waveform_block(channel)?;
						s.sink.append_raw(&target.stem, channel.label(), &block)?;
					}
				},
			}
			Ok(())
		})
	}

	pub fn capture_screen(&mut self) -> Result<()> {
		self.capturing("capture_screen", |s, target| {
			s.transport.send("MENU OFF")?;
			thread::sleep(s.settle_duration);

			s.transport.send("SCDP")?;
			let image = s.transport.read_raw_block()?;
			let path = s.sink.write_screenshot(&target.stem, &image)?;
			debug!("Screen saved to {}", path.display());
			Ok(())
		})
	}

	// Delay between the first rising edges of C1 and C2, in seconds.
	pub fn measure_jitter(&mut self) -> Result<f64> {
		self.require("measure_jitter", Phase::ChannelsConfigured)?;

		let reply = self.transport.query("C1-C2:MEAD? FRR")?;
		if reply.contains("****") {
			return Err(Error::MeasurementUnavailable(reply.trim().to_owned()));
		}
		Ok(parse_scaled(&reply)?.magnitude)
	}

	pub fn close(mut self) -> Result<()> {
		info!("Closing connection to {}", self.identity.model);
		self.transport.close()
	}

}
