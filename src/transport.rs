
use std::str;
use std::time::Duration;

use log::{debug, warn};

use crate::error::{Error, Result};
use crate::vxi11::CoreClient;

pub trait Transport {
	// Sends a command that produces no reply.
	fn send(&mut self, command:&str) -> Result<()>;

	// Sends a command and returns its textual reply.
	fn query(&mut self, command:&str) -> Result<String>;

	// Reads the next reply as raw bytes, for binary transfers.
	fn read_raw_block(&mut self) -> Result<Vec<u8>>;

	fn set_timeout(&mut self, timeout:Duration) -> Result<()>;

	fn close(&mut self) -> Result<()>;
}

pub struct Vxi11Transport {
	host: String,
	core: CoreClient,
}

impl Vxi11Transport {
	pub fn connect(host:&str, timeout:Duration) -> Result<Self> {
		let core = CoreClient::new(host, timeout).map_err(Error::Connection)?;
		Self::link(host, core)
	}

	// Opens the device link on an already connected core channel
	pub fn link(host:&str, mut core:CoreClient) -> Result<Self> {
		core.create_link().map_err(Error::Connection)?;
		debug!("Created VXI-11 link to {}", host);
		Ok(Self { host: host.to_owned(), core })
	}
}

impl Transport for Vxi11Transport {
	fn send(&mut self, command:&str) -> Result<()> {
		debug!("{} <- {}", self.host, command);
		self.core.write(command.as_bytes()).map_err(Error::Connection)
	}

	fn query(&mut self, command:&str) -> Result<String> {
		debug!("{} <- {}", self.host, command);
		let reply = self.core.ask(command.as_bytes()).map_err(Error::Connection)?;
		let text = str::from_utf8(&reply)
			.map_err(|_| Error::MalformedResponse(String::from_utf8_lossy(&reply).into_owned()))?;
		debug!("{} -> {}", self.host, text.trim_end());
		Ok(text.to_owned())
	}

	fn read_raw_block(&mut self) -> Result<Vec<u8>> {
		let data = self.core.read().map_err(Error::Connection)?;
		debug!("{} -> {} bytes", self.host, data.len());
		Ok(data)
	}

	fn set_timeout(&mut self, timeout:Duration) -> Result<()> {
		self.core.set_io_timeout(timeout).map_err(Error::Connection)
	}

	fn close(&mut self) -> Result<()> {
		if self.core.link().is_none() {
			return Ok(());
		}
		self.core.destroy_link().map_err(Error::Connection)?;
		debug!("Destroyed VXI-11 link to {}", self.host);
		Ok(())
	}
}

impl Drop for Vxi11Transport {
	fn drop(&mut self) {
		if let Err(e) = self.close() {
			warn!("Unable to destroy link to {}: {}", self.host, e);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::rpc::tcp_clients::{loopback::{self, Answer}, TcpClient};
	use crate::vxi11::{CREATE_LINK, DESTROY_LINK, DEVICE_CORE_PROG, DEVICE_CORE_VERS, DEVICE_READ, DEVICE_WRITE};
	use std::thread::JoinHandle;

	fn transport(answers:Vec<Answer>) -> (Vxi11Transport, JoinHandle<Vec<Vec<u8>>>) {
		let mut script = vec![loopback::results(|p| {
			p.pack_i32(0)?;
			p.pack_i32(3)?;
			p.pack_u32(0)?;
			p.pack_u32(1024)
		})];
		script.extend(answers);
		let (addr, server) = loopback::serve(script);

		let client = TcpClient::connect(addr, DEVICE_CORE_PROG, DEVICE_CORE_VERS, Duration::from_secs(2)).unwrap();
		let t = Vxi11Transport::link("scope", CoreClient::with_client(client, Duration::from_millis(500))).unwrap();
		(t, server)
	}

	fn procedures(calls:&[Vec<u8>]) -> Vec<u32> {
		calls.iter().map(|c| loopback::procedure(c)).collect()
	}

	fn wrote(command:&str) -> Answer {
		let size = command.len() as u32;
		loopback::results(move |p| { p.pack_i32(0)?; p.pack_u32(size) })
	}

	fn destroyed() -> Answer {
		loopback::results(|p| p.pack_i32(0))
	}

	#[test]
	fn query_round_trips_text_and_drop_destroys_the_link() {
		let idn = loopback::results(|p| {
			p.pack_i32(0)?;
			p.pack_i32(4)?;
			p.pack_variable_len_opaque(b"Siglent,SDS1204X-E,X,1\n")
		});
		let (mut t, server) = transport(vec![wrote("*IDN?"), idn, destroyed()]);

		assert_eq!(t.query("*IDN?").unwrap(), "Siglent,SDS1204X-E,X,1\n");
		drop(t);

		assert_eq!(procedures(&server.join().unwrap()), vec![CREATE_LINK, DEVICE_WRITE, DEVICE_READ, DESTROY_LINK]);
	}

	#[test]
	fn explicit_close_is_not_repeated_on_drop() {
		let (mut t, server) = transport(vec![destroyed()]);

		t.close().unwrap();
		t.close().unwrap();
		drop(t);

		assert_eq!(procedures(&server.join().unwrap()), vec![CREATE_LINK, DESTROY_LINK]);
	}

	#[test]
	fn io_failures_surface_as_connection_errors() {
		let (mut t, server) = transport(vec![Answer::Hangup]);

		assert!(matches!(t.send("PERS OFF"), Err(Error::Connection(_))));
		assert!(matches!(t.query("SARA?"), Err(Error::Connection(_))));
		assert!(matches!(t.read_raw_block(), Err(Error::Connection(_))));
		drop(t);
		server.join().unwrap();
	}

	#[test]
	fn non_utf8_reply_is_malformed() {
		let garbage = loopback::results(|p| {
			p.pack_i32(0)?;
			p.pack_i32(4)?;
			p.pack_variable_len_opaque(&[0xff, 0xfe])
		});
		let (mut t, server) = transport(vec![wrote("C1:WF?"), garbage, destroyed()]);

		assert!(matches!(t.query("C1:WF?"), Err(Error::MalformedResponse(_))));
		drop(t);
		server.join().unwrap();
	}
}
