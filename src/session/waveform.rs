
use serde::Serialize;

use crate::error::{Error, Result};
use super::Channel;

// Vertical codes per division in a DAT2 transfer
pub const CODES_PER_DIV:f64 = 25.0;

pub const CSV_HEADER:[&str; 3] = ["channel", "time_s", "voltage_v"];

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sample {
	pub channel: Channel,
	pub time_s: f64,
	pub voltage_v: f64,
}

// Extracts the payload of an IEEE 488.2 block such as "C1:WF DAT2,#9000001000<data>\n\n"
pub fn definite_block(raw:&[u8]) -> Result<&[u8]> {
	let malformed = || Error::MalformedResponse(String::from_utf8_lossy(&raw[..raw.len().min(32)]).into_owned());

	let hash = raw.iter().position(|b| *b == b'#').ok_or_else(malformed)?;
	let n_digits = match raw.get(hash + 1).copied() {
		Some(d @ b'1'..=b'9') => (d - b'0') as usize,
		_ => return Err(malformed()),
	};

	let len_start = hash + 2;
	let len_digits = raw.get(len_start..len_start + n_digits).ok_or_else(malformed)?;
	let len:usize = std::str::from_utf8(len_digits)
		.ok()
		.and_then(|s| s.parse().ok())
		.ok_or_else(malformed)?;

	let data_start = len_start + n_digits;
	raw.get(data_start..data_start + len).ok_or_else(malformed)
}

// Codes are signed bytes centred on the screen; the offset shifts the trace the other way
pub fn scale(channel:Channel, codes:&[u8], volts_per_div:f64, offset_v:f64, sample_rate:f64) -> Vec<Sample> {
	codes.iter()
		.enumerate()
		.map(|(idx, code)| Sample {
			channel,
			time_s: idx as f64 / sample_rate,
			voltage_v: (*code as i8 as f64) * (volts_per_div / CODES_PER_DIV) - offset_v,
		})
		.collect()
}
