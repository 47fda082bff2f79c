// Scripted stand-ins for the scope and the wall clock, shared by the unit tests

use std::cell::{Cell, RefCell};
use std::io;
use std::rc::Rc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::scheduler::Clock;
use crate::transport::Transport;

pub const IDN:&str = "Siglent Technologies,SDS1204X-E,SDSMMEBC2R1234,8.1.6.1.37R2\n";
pub const C1_CODES:&[u8] = &[0, 25, (-25i8) as u8, 50];
pub const C2_CODES:&[u8] = &[10, 20, 30, 40];
pub const SCREEN:&[u8] = b"BM\x36\x00\x00\x00fake-bitmap";

#[derive(Default)]
struct Script {
	replies: Vec<(String, String)>,
	blocks: Vec<(String, Vec<u8>)>,
	log: Vec<String>,
	last_sent: Option<String>,
	timeout: Option<Duration>,
	closed: bool,
}

fn unanswered(cmd:&str) -> Error {
	Error::Connection(io::Error::new(io::ErrorKind::TimedOut, format!("no reply scripted for {:?}", cmd)))
}

// Replies are looked up by the longest scripted prefix of the command
fn lookup<'a, V>(entries:&'a [(String, V)], cmd:&str) -> Option<&'a V> {
	entries.iter()
		.filter(|(prefix, _)| cmd.starts_with(prefix.as_str()))
		.max_by_key(|(prefix, _)| prefix.len())
		.map(|(_, v)| v)
}

fn upsert<V>(entries:&mut Vec<(String, V)>, key:&str, value:V) {
	match entries.iter_mut().find(|(k, _)| k == key) {
		Some(entry) => entry.1 = value,
		None        => entries.push((key.to_owned(), value)),
	}
}

#[derive(Clone, Default)]
pub struct ScriptedTransport {
	script: Rc<RefCell<Script>>,
}

impl ScriptedTransport {

	pub fn reply(self, prefix:&str, text:&str) -> Self {
		upsert(&mut self.script.borrow_mut().replies, prefix, text.to_owned());
		self
	}

	pub fn block(self, prefix:&str, data:&[u8]) -> Self {
		upsert(&mut self.script.borrow_mut().blocks, prefix, data.to_vec());
		self
	}

	pub fn without_block(self, prefix:&str) -> Self {
		self.script.borrow_mut().blocks.retain(|(k, _)| k != prefix);
		self
	}

	pub fn sent(&self) -> Vec<String> { self.script.borrow().log.clone() }
	pub fn clear_log(&self) { self.script.borrow_mut().log.clear(); }
	pub fn timeout(&self) -> Option<Duration> { self.script.borrow().timeout }
	pub fn closed(&self) -> bool { self.script.borrow().closed }

}

impl Transport for ScriptedTransport {

	fn send(&mut self, command:&str) -> Result<()> {
		let mut script = self.script.borrow_mut();
		script.log.push(command.to_owned());
		script.last_sent = Some(command.to_owned());
		Ok(())
	}

	fn query(&mut self, command:&str) -> Result<String> {
		let mut script = self.script.borrow_mut();
		script.log.push(command.to_owned());
		lookup(&script.replies, command).cloned().ok_or_else(|| unanswered(command))
	}

	fn read_raw_block(&mut self) -> Result<Vec<u8>> {
		let script = self.script.borrow();
		let last = script.last_sent.clone().unwrap_or_default();
		lookup(&script.blocks, &last).cloned().ok_or_else(|| unanswered(&last))
	}

	fn set_timeout(&mut self, timeout:Duration) -> Result<()> {
		self.script.borrow_mut().timeout = Some(timeout);
		Ok(())
	}

	fn close(&mut self) -> Result<()> {
		self.script.borrow_mut().closed = true;
		Ok(())
	}

}

fn waveform_reply(channel:&str, codes:&[u8]) -> Vec<u8> {
	let mut raw = format!("{}:WF DAT2,#9{:09}", channel, codes.len()).into_bytes();
	raw.extend_from_slice(codes);
	raw.extend_from_slice(b"\n\n");
	raw
}

// A scope that answers everything a full run asks for.
pub fn scope() -> ScriptedTransport {
	ScriptedTransport::default()
		.reply("*IDN?", IDN)
		.reply("SARA?", "SARA 1.00GSa/s\n")
		.reply("C1:PAVA? FREQ", "C1:PAVA FREQ,1.00KHz\n")
		.reply("C1:VDIV?", "C1:VDIV 5.00E-01V\n")
		.reply("C2:VDIV?", "C2:VDIV 5.00E-01V\n")
		.reply("C1:OFST?", "C1:OFST 0.00E+00V\n")
		.reply("C2:OFST?", "C2:OFST 0.00E+00V\n")
		.reply("C1-C2:MEAD? FRR", "C1-C2:MEAD FRR,2.50E-07S\n")
		.block("C1:WF? DAT2", &waveform_reply("C1", C1_CODES))
		.block("C2:WF? DAT2", &waveform_reply("C2", C2_CODES))
		.block("SCDP", SCREEN)
}

// Time only moves when something sleeps or calls `advance`.
#[derive(Clone, Default)]
pub struct FakeClock {
	now: Rc<Cell<Duration>>,
	sleeps: Rc<Cell<u32>>,
}

impl FakeClock {
	pub fn advance(&self, d:Duration) { self.now.set(self.now.get() + d); }
	pub fn sleeps(&self) -> u32 { self.sleeps.get() }
}

impl Clock for FakeClock {
	fn now(&self) -> Duration { self.now.get() }

	fn sleep(&self, d:Duration) {
		self.sleeps.set(self.sleeps.get() + 1);
		self.advance(d);
	}
}
