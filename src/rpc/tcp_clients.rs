
use std::io::{self, Error, ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::xdr;
use super::{xdr_pack, xdr_unpack};

const LAST_FRAGMENT:u32 = 0x8000_0000;

pub struct TcpClient {
	pub stream: TcpStream,
	pub prog: u32,
	pub vers: u32,
	pub lastxid: u32,
	pub packer: xdr::Packer,
	pub unpacker: xdr::Unpacker,
	broken: bool,
}

fn resolve<A: ToSocketAddrs>(addr: A) -> io::Result<SocketAddr> {
	addr.to_socket_addrs()?
		.next()
		.ok_or_else(|| Error::new(ErrorKind::NotFound, "Address did not resolve"))
}

impl TcpClient {

	// The timeout bounds the connect as well as every later read and write on the stream
	pub fn connect<A: ToSocketAddrs>(addr: A, prog: u32, vers: u32, timeout: Duration) -> io::Result<Self> {
		let stream = TcpStream::connect_timeout(&resolve(addr)?, timeout)?;
		stream.set_read_timeout(Some(timeout))?;
		stream.set_write_timeout(Some(timeout))?;
		stream.set_nodelay(true)?;
		Ok(Self{ stream, prog, vers, lastxid: 0, packer: xdr::Packer::new(), unpacker: xdr::Unpacker::new(), broken: false })
	}

	pub fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
		self.stream.set_read_timeout(Some(timeout))?;
		self.stream.set_write_timeout(Some(timeout))
	}

	pub fn start_call(&mut self, prc:u32) -> io::Result<()> {
		self.lastxid = self.lastxid.wrapping_add(1);
		self.packer.reset();
		xdr_pack::pack_callheader_no_auth(&mut self.packer, self.lastxid, self.prog, self.vers, prc)
	}

	// A failed send or receive can leave part of a record on the stream, after which record
	// boundaries are lost; every later call fails until a new client is connected
	fn broke(&mut self, e:io::Error) -> io::Error {
		self.broken = true;
		e
	}

	// Sends whatever has been packed since start_call and loads the matching reply into the unpacker
	pub fn do_call(&mut self) -> io::Result<()> {
		if self.broken {
			return Err(Error::new(ErrorKind::NotConnected, "Connection lost sync after an earlier I/O failure"));
		}

		let call = self.packer.as_bytes();
		let len = u32::try_from(call.len()).map_err(|_| Error::new(ErrorKind::InvalidInput, "RPC call too large"))?;

		let mut send_bytes:Vec<u8> = Vec::with_capacity(call.len() + 4);
		send_bytes.write_u32::<BigEndian>(len | LAST_FRAGMENT)?;
		send_bytes.extend_from_slice(call);
		if let Err(e) = self.stream.write_all(&send_bytes) {
			return Err(self.broke(e));
		}

		loop {
			let reply = match read_record(&mut self.stream) {
				Ok(reply) => reply,
				Err(e)    => return Err(self.broke(e)),
			};
			self.unpacker.reset(&reply);

			let (xid, _) = xdr_unpack::unpack_replyheader(&mut self.unpacker)?;
			if xid == self.lastxid {
				return Ok(());
			} else if xid < self.lastxid {
				// Stale reply to a call that already timed out on our side
				continue;
			} else {
				return Err(Error::new(ErrorKind::InvalidData, "Reply xid is ahead of the last call"));
			}
		}
	}

}

// Reassembles one record-marked message from its fragments
pub fn read_record<R: Read>(rdr:&mut R) -> io::Result<Vec<u8>> {
	let mut reply:Vec<u8> = vec![];

	let mut last = false;
	while !last {
		let header:u32 = rdr.read_u32::<BigEndian>()?;
		last = (header & LAST_FRAGMENT) != 0;
		let n = (header & !LAST_FRAGMENT) as usize;

		let start = reply.len();
		reply.resize(start + n, 0);
		rdr.read_exact(&mut reply[start..])?;
	}

	Ok(reply)
}

// One-connection RPC server for tests, answering calls from a script
#[cfg(test)]
pub(crate) mod loopback {
	use std::io::Write;
	use std::net::{SocketAddr, TcpListener};
	use std::thread::{self, JoinHandle};

	use crate::xdr::Packer;
	use super::{read_record, LAST_FRAGMENT};

	pub enum Answer {
		// Accepted, successful reply carrying these result bytes
		Result(Vec<u8>),
		// Same, but for the call before the current one
		Stale(Vec<u8>),
		// Record header promising more bytes than are ever sent
		Partial,
		Hangup,
	}

	pub fn results(f:impl FnOnce(&mut Packer) -> std::io::Result<()>) -> Answer {
		let mut packer = Packer::new();
		f(&mut packer).unwrap();
		Answer::Result(packer.as_bytes().to_vec())
	}

	fn reply(stream:&mut impl Write, xid:u32, body:&[u8]) {
		let mut packer = Packer::new();
		for word in [xid, 1, 0, 0, 0, 0] { packer.pack_u32(word).unwrap(); }
		let len = (packer.as_bytes().len() + body.len()) as u32;
		stream.write_all(&(len | LAST_FRAGMENT).to_be_bytes()).unwrap();
		stream.write_all(packer.as_bytes()).unwrap();
		stream.write_all(body).unwrap();
	}

	pub fn procedure(call:&[u8]) -> u32 { u32::from_be_bytes([call[20], call[21], call[22], call[23]]) }

	// Call arguments follow a 40-byte header with no auth
	pub fn args(call:&[u8]) -> &[u8] { &call[40..] }

	// Returns the address to connect to and a handle yielding every call record received
	pub fn serve(answers:Vec<Answer>) -> (SocketAddr, JoinHandle<Vec<Vec<u8>>>) {
		let listener = TcpListener::bind("127.0.0.1:0").unwrap();
		let addr = listener.local_addr().unwrap();

		let handle = thread::spawn(move || {
			let (mut stream, _) = listener.accept().unwrap();
			let mut calls = vec![];
			let mut answers = answers.into_iter().peekable();

			while answers.peek().is_some() {
				let call = match read_record(&mut stream) {
					Ok(call) => call,
					Err(_)   => break,
				};
				let xid = u32::from_be_bytes([call[0], call[1], call[2], call[3]]);
				calls.push(call);

				for answer in answers.by_ref() {
					match answer {
						Answer::Stale(body)  => reply(&mut stream, xid.wrapping_sub(1), &body),
						Answer::Result(body) => { reply(&mut stream, xid, &body); break; },
						Answer::Partial      => {
							stream.write_all(&(64 | LAST_FRAGMENT).to_be_bytes()).unwrap();
							stream.write_all(&xid.to_be_bytes()).unwrap();
							break;
						},
						Answer::Hangup       => return calls,
					}
				}
			}

			// Hold the connection until the client lets go
			let _ = read_record(&mut stream);
			calls
		});

		(addr, handle)
	}
}
