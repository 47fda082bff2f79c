use std::io;
use std::path::PathBuf;

use crate::session::Phase;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	// The transport could not be reached or a reply did not arrive in time.
	#[error("Connection error: {0}")]
	Connection(#[source] io::Error),

	#[error("Malformed response: {0:?}")]
	MalformedResponse(String),

	#[error("Sample rate {sample_rate} Sa/s is not above 5000 x signal frequency {signal_frequency} Hz")]
	InsufficientSampleRate { sample_rate: f64, signal_frequency: f64 },

	// The scope has no valid measurement for the current trigger state.
	#[error("Measurement unavailable: {0}")]
	MeasurementUnavailable(String),

	#[error("{operation} called out of sequence (session is {phase:?})")]
	OutOfSequence { operation: &'static str, phase: Phase },

	#[error("Storage error on {}: {source}", path.display())]
	Storage {
		path: PathBuf,
		#[source]
		source: io::Error,
	},

	#[error("Invalid test plan: {0}")]
	InvalidPlan(String),

	#[error("Unable to read test plan {}: {source}", path.display())]
	PlanFile {
		path: PathBuf,
		#[source]
		source: Box<dyn std::error::Error + Send + Sync>,
	},
}

impl Error {
	// Only a missing measurement lets a run carry on with the next cycle.
	pub fn is_fatal(&self) -> bool {
		!matches!(self, Error::MeasurementUnavailable(_))
	}

	pub(crate) fn storage(path:impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Error {
		let path = path.into();
		move |source| Error::Storage { path, source }
	}
}
