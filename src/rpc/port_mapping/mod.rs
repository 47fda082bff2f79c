
pub const PMAP_PROG:u32 = 100000;
pub const PMAP_VERS:u32 = 2;
pub const PMAP_PORT:u16 = 111;

pub const PMAPPROC_GETPORT:u32 = 3;     // (mapping) -> unsigned int

use std::io::{self, Error, ErrorKind};
use std::time::Duration;

use super::IPPROTO_TCP;
use super::xdr_pack;
use super::tcp_clients::TcpClient;

#[derive(Debug)]
pub struct Mapping {
	pub program: u32,
	pub version: u32,
	pub protocol: u32,
	pub port: u32,
}

impl Mapping {
	pub fn tcp(program:u32, version:u32) -> Self {
		Self{ program, version, protocol: IPPROTO_TCP, port: 0 }
	}
}

pub struct TcpPortMapperClient {
	tcp_client: TcpClient,
}

impl TcpPortMapperClient {

	pub fn new(host:&str, timeout:Duration) -> io::Result<Self> {
		let tcp_client = TcpClient::connect((host, PMAP_PORT), PMAP_PROG, PMAP_VERS, timeout)?;
		Ok(Self{ tcp_client })
	}

	pub fn get_port(&mut self, m:&Mapping) -> io::Result<u16> {
		self.tcp_client.start_call(PMAPPROC_GETPORT)?;
		xdr_pack::pack_mapping(&mut self.tcp_client.packer, m.program, m.version, m.protocol, m.port)?;
		self.tcp_client.do_call()?;

		let port:u32 = self.tcp_client.unpacker.unpack_u32()?;
		if !self.tcp_client.unpacker.all_data_consumed() {
			return Err(Error::new(ErrorKind::InvalidData, "Data unexpectedly left over after unpacking port"));
		}

		match u16::try_from(port) {
			Ok(0) => Err(Error::new(ErrorKind::NotFound, "Program is not registered with the port mapper")),
			Ok(p) => Ok(p),
			Err(_) => Err(Error::new(ErrorKind::InvalidData, "Port mapper returned a port out of range")),
		}
	}

}
