
// Numeric replies from the scope look like "SARA 1.00GSa/s", "C1:PAVA FREQ,1.000000E+03Hz"
// or "C1-C2:MEAD FRR,-2.50E-07S".  The value is always the last number in the reply.

use regex::Regex;

use crate::error::{Error, Result};

lazy_static! {
	static ref VALUE_RE: Regex = Regex::new(
		r"(?P<num>[-+]?(?:\d+\.?\d*|\.\d+)(?:[eE][-+]?\d+)?)\s?(?P<prefix>[GMKkmun])?(?P<unit>[A-Za-z/%]*)$"
	).unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiPrefix { Giga, Mega, Kilo, Milli, Micro, Nano }

impl SiPrefix {

	pub fn from_char(c:char) -> Option<Self> {
		match c {
			'G'       => Some(SiPrefix::Giga),
			'M'       => Some(SiPrefix::Mega),
			'K' | 'k' => Some(SiPrefix::Kilo),
			'm'       => Some(SiPrefix::Milli),
			'u'       => Some(SiPrefix::Micro),
			'n'       => Some(SiPrefix::Nano),
			_         => None,
		}
	}

	pub fn factor(self) -> f64 {
		match self {
			SiPrefix::Giga  => 1e9,
			SiPrefix::Mega  => 1e6,
			SiPrefix::Kilo  => 1e3,
			SiPrefix::Milli => 1e-3,
			SiPrefix::Micro => 1e-6,
			SiPrefix::Nano  => 1e-9,
		}
	}

}

// A reply value scaled to its SI base unit.
#[derive(Debug, Clone, PartialEq)]
pub struct ScaledValue {
	pub magnitude: f64,
	pub unit: String,
}

pub fn parse_scaled(response:&str) -> Result<ScaledValue> {
	let trimmed = response.trim_end();
	let malformed = || Error::MalformedResponse(response.to_owned());

	let cap = VALUE_RE.captures(trimmed).ok_or_else(malformed)?;
	let number:f64 = cap["num"].parse().map_err(|_| malformed())?;

	let factor = cap.name("prefix")
		.and_then(|m| m.as_str().chars().next())
		.and_then(SiPrefix::from_char)
		.map_or(1.0, SiPrefix::factor);

	Ok(ScaledValue{ magnitude: number * factor, unit: cap["unit"].to_owned() })
}

#[cfg(test)]
mod tests {
	use super::*;

	fn close(a:f64, b:f64) -> bool { ((a - b) / b).abs() < 1e-12 }

	#[test]
	fn every_prefix_scales_to_base_units() {
		let cases = [
			("SARA 1.00GSa/s", 1.0e9, "Sa/s"),
			("SARA 500MSa/s", 5.0e8, "Sa/s"),
			("C1:PAVA FREQ,2.50KHz", 2.5e3, "Hz"),
			("SARA 250kSa/s", 2.5e5, "Sa/s"),
			("TDIV 5.00mS", 5.0e-3, "S"),
			("C1-C2:MEAD FRR,12.5uS", 1.25e-5, "S"),
			("C1-C2:MEAD FRR,-80.0nS", -8.0e-8, "S"),
			("C1:VDIV 2.00V", 2.0, "V"),
		];
		for (reply, expected, unit) in cases.iter() {
			let value = parse_scaled(reply).unwrap();
			assert!(close(value.magnitude, *expected), "{} parsed as {}", reply, value.magnitude);
			assert_eq!(value.unit, *unit);
		}
	}

	#[test]
	fn magnitudes_survive_scaling_and_inverse_scaling() {
		let prefixes = [(Some('G'), 1e9), (Some('M'), 1e6), (Some('K'), 1e3), (Some('m'), 1e-3), (Some('u'), 1e-6), (Some('n'), 1e-9), (None, 1.0)];
		for magnitude in [0.001, 1.0, 3.75, 42.0, 999.5].iter() {
			for (prefix, factor) in prefixes.iter() {
				let reply = match prefix {
					Some(p) => format!("X {}{}Hz", magnitude, p),
					None    => format!("X {}Hz", magnitude),
				};
				let value = parse_scaled(&reply).unwrap();
				assert!(close(value.magnitude / factor, *magnitude), "{} parsed as {}", reply, value.magnitude);
			}
		}
	}

	#[test]
	fn exponent_form_and_separating_space_are_accepted() {
		assert!(close(parse_scaled("TDIV 1.00E-03S").unwrap().magnitude, 1e-3));
		assert!(close(parse_scaled("C1:PAVA FREQ,1.000000E+03Hz\n").unwrap().magnitude, 1e3));
		assert!(close(parse_scaled("SARA 2.00 GSa/s").unwrap().magnitude, 2e9));
	}

	#[test]
	fn digits_in_the_prefix_tokens_are_skipped() {
		let value = parse_scaled("C2:OFST -1.50E-01V").unwrap();
		assert!(close(value.magnitude, -0.15));
		assert_eq!(value.unit, "V");
	}

	#[test]
	fn replies_without_a_trailing_number_are_malformed() {
		for reply in ["C1-C2:MEAD FRR,****", "", "SARA ?", "C1:PAVA FREQ,1.0Hz extra"].iter() {
			match parse_scaled(reply) {
				Err(Error::MalformedResponse(r)) => assert_eq!(r, *reply),
				other => panic!("{:?} gave {:?}", reply, other),
			}
		}
	}
}
