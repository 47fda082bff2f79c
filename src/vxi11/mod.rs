
// Device core
pub const DEVICE_CORE_PROG:u32  = 0x0607af;
pub const DEVICE_CORE_VERS:u32  = 1;
pub const CREATE_LINK:u32       = 10;
pub const DEVICE_WRITE:u32      = 11;
pub const DEVICE_READ:u32       = 12;
pub const DESTROY_LINK:u32      = 23;

pub const CLIENT_ID:i32 = 3333;
pub const DEFAULT_LOCK_TIMEOUT:u32 = 10000;
pub const DEVICE_NAME:&str = "inst0";

pub const OPERATION_FLAGS_END_ONLY:i32 = 8;

// Reason bits in a device_read reply
pub const REASON_REQCNT:i32 = 1;
pub const REASON_CHR:i32    = 2;
pub const REASON_END:i32    = 4;

// Extra time the socket waits beyond the device-side I/O timeout
const SOCKET_SLACK:Duration = Duration::from_secs(1);

use std::io::{self, Error, ErrorKind};
use std::time::Duration;

use log::debug;

use crate::rpc::port_mapping::{TcpPortMapperClient, Mapping};
use crate::rpc::tcp_clients::TcpClient;

pub mod xdr_pack;

fn err(msg:&str) -> io::Error { Error::new(ErrorKind::Other, msg) }

fn device_error(code:i32) -> io::Error {
    match code {
        1  => err("Syntax error"),
        3  => err("Device not accessible"),
        4  => err("Invalid link identifier"),
        5  => err("Parameter error"),
        9  => err("Out of resources"),
        11 => err("Device locked by another link"),
        15 => Error::new(ErrorKind::TimedOut, "I/O timeout"),
        17 => err("I/O error"),
        21 => err("Invalid address"),
        23 => err("Abort"),
        _  => err(&format!("Unknown device error {}", code)),
    }
}

fn millis(d:Duration) -> u32 { u32::try_from(d.as_millis()).unwrap_or(u32::MAX) }

pub struct CoreClient {
    client: TcpClient,
    opt_link: Option<Link>,
    io_timeout: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct Link {
    pub link_id: i32,
    pub abort_port: u16,
    pub max_recv_size: u32,
}

impl CoreClient {

    fn get_link(&self) -> io::Result<Link> {
        self.opt_link.ok_or_else(|| Error::new(ErrorKind::NotConnected, "No link"))
    }

    pub fn new(host:&str, io_timeout:Duration) -> io::Result<Self> {
        let socket_timeout = io_timeout + SOCKET_SLACK;

        // Find the port to use for the core program
        let mut pmap_client = TcpPortMapperClient::new(host, socket_timeout)?;
        let port = pmap_client.get_port(&Mapping::tcp(DEVICE_CORE_PROG, DEVICE_CORE_VERS))?;
        debug!("VXI-11 core channel of {} is on port {}", host, port);

        let client = TcpClient::connect((host, port), DEVICE_CORE_PROG, DEVICE_CORE_VERS, socket_timeout)?;

        Ok(Self::with_client(client, io_timeout))
    }

    // Takes over an RPC client already connected to the core channel
    pub fn with_client(client:TcpClient, io_timeout:Duration) -> Self {
        CoreClient{ client, opt_link: None, io_timeout }
    }

    pub fn set_io_timeout(&mut self, io_timeout:Duration) -> io::Result<()> {
        self.io_timeout = io_timeout;
        self.client.set_timeout(io_timeout + SOCKET_SLACK)
    }

    pub fn link(&self) -> Option<Link> { self.opt_link }

    pub fn create_link(&mut self) -> io::Result<()> {
        if self.opt_link.is_some() {
            return Err(err("Already connected to a link"));
        }

        self.client.start_call(CREATE_LINK)?;
        xdr_pack::pack_create_link_parms(&mut self.client.packer, CLIENT_ID, false, DEFAULT_LOCK_TIMEOUT, DEVICE_NAME)?;
        self.client.do_call()?;

        let error:i32         = self.client.unpacker.unpack_i32()?;
        let link_id:i32       = self.client.unpacker.unpack_i32()?;
        let abort_port:u32    = self.client.unpacker.unpack_u32()?;
        let max_recv_size:u32 = self.client.unpacker.unpack_u32()?;

        if error != 0 {
            return Err(device_error(error));
        }

        let abort_port = u16::try_from(abort_port).map_err(|_| err("Abort port out of range"))?;
        self.opt_link = Some(Link{ link_id, abort_port, max_recv_size });
        Ok(())
    }

    pub fn ask(&mut self, data:&[u8]) -> io::Result<Vec<u8>> {
        self.write(data)?;
        self.read()
    }

    pub fn write(&mut self, data:&[u8]) -> io::Result<()> {
        let link = self.get_link()?;
        if data.is_empty() { return Ok(()); }

        // Messages longer than the device accepts go out in chunks, END only on the last one
        let chunk_len = (link.max_recv_size as usize).max(1);
        let mut chunks = data.chunks(chunk_len).peekable();

        while let Some(chunk) = chunks.next() {
            let flags = if chunks.peek().is_none() { OPERATION_FLAGS_END_ONLY } else { 0 };

            self.client.start_call(DEVICE_WRITE)?;
            xdr_pack::pack_device_write_parms(&mut self.client.packer, link.link_id, millis(self.io_timeout), DEFAULT_LOCK_TIMEOUT, flags, chunk)?;
            self.client.do_call()?;

            let error:i32 = self.client.unpacker.unpack_i32()?;
            let size:u32  = self.client.unpacker.unpack_u32()?;

            if error != 0 {
                return Err(device_error(error));
            }
            if size as usize != chunk.len() {
                return Err(err("Number of bytes in confirmation doesn't match number of bytes sent"));
            }
        }

        Ok(())
    }

    // Keeps reading until the device flags the end of the message
    pub fn read(&mut self) -> io::Result<Vec<u8>> {
        let link = self.get_link()?;
        let mut ans:Vec<u8> = vec![];

        loop {
            self.client.start_call(DEVICE_READ)?;
            xdr_pack::pack_device_read_parms(&mut self.client.packer, link.link_id, u32::MAX, millis(self.io_timeout), DEFAULT_LOCK_TIMEOUT, 0, 0)?;
            self.client.do_call()?;

            let error:i32    = self.client.unpacker.unpack_i32()?;
            let reason:i32   = self.client.unpacker.unpack_i32()?;
            let data:Vec<u8> = self.client.unpacker.unpack_variable_len_opaque()?;

            if error != 0 {
                return Err(device_error(error));
            }

            ans.extend_from_slice(&data);

            if reason & (REASON_END | REASON_CHR) != 0 {
                return Ok(ans);
            } else if reason & REASON_REQCNT == 0 && data.is_empty() {
                return Err(err("Device returned no data and no reason to stop"));
            }
        }
    }

    pub fn destroy_link(&mut self) -> io::Result<()> {
        let link = self.get_link()?;

        self.client.start_call(DESTROY_LINK)?;
        xdr_pack::pack_device_link(&mut self.client.packer, link.link_id)?;
        self.client.do_call()?;
        self.opt_link = None;

        match self.client.unpacker.unpack_i32()? {
            0    => Ok(()),
            code => Err(device_error(code)),
        }
    }

}
