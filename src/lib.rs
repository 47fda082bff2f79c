
#[macro_use]
extern crate lazy_static;

// External data representation, a protocol for serializing data to be sent over the network
pub mod xdr;

// Remote procedure call, a protocol build on top of XDR to provide something like C-style function calls over the network
pub mod rpc;

// A protocol using RPC that's meant to communicate with instruments like oscilloscopes, power supplies, waveform generators, etc
pub mod vxi11;

pub mod error;

// Reply values like "1.00GSa/s" with SI prefixes
pub mod units;

// Command channel to the scope, VXI-11 in production
pub mod transport;

// Where captures land on the host
pub mod storage;

// Ordered configuration and capture commands for one scope
pub mod session;

pub mod plan;

// Absolute-deadline pacing of capture cycles
pub mod scheduler;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
pub use plan::TestPlan;
pub use scheduler::{CycleScheduler, MonotonicClock, RunSummary};
pub use session::InstrumentSession;
pub use storage::{StorageMode, StorageSink};
