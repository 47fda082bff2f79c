
use std::io::{self, Error, ErrorKind};

use crate::xdr::Unpacker;
use crate::rpc::{REPLY, MSG_DENIED, RPC_MISMATCH, AUTH_ERROR, MSG_ACCEPTED, PROG_UNAVAIL, PROG_MISMATCH, PROC_UNAVAIL, GARBAGE_ARGS, SUCCESS};

fn err(msg:&str) -> io::Error { Error::new(ErrorKind::Other, msg) }

pub struct Auth {
	pub flavor: i32,
	pub body: Vec<u8>,
}

pub fn unpack_auth(unpacker:&mut Unpacker) -> io::Result<Auth> {
	let flavor:i32  = unpacker.unpack_enum()?;
	let body:Vec<u8> = unpacker.unpack_variable_len_opaque()?;
	Ok(Auth{ flavor, body })
}

// Returns the xid of an accepted, successful reply and leaves the unpacker at the procedure results
pub fn unpack_replyheader(unpacker:&mut Unpacker) -> io::Result<(u32, Auth)> {
	let xid:u32 = unpacker.unpack_u32()?;

	if unpacker.unpack_enum()? != REPLY { return Err(err("Expected REPLY message type")); }

	match unpacker.unpack_enum()? {
		MSG_DENIED => {
			return match unpacker.unpack_enum()? {
				RPC_MISMATCH => Err(err("Message denied due to RPC_MISMATCH")),
				AUTH_ERROR   => Err(err("Message denied due to AUTH_ERROR")),
				_            => Err(err("Message denied for an unknown reason")),
			};
		},
		MSG_ACCEPTED => { },
		_            => return Err(err("Neither MSG_DENIED nor MSG_ACCEPTED in reply")),
	}

	let verf = unpack_auth(unpacker)?;

	match unpacker.unpack_enum()? {
		SUCCESS       => Ok((xid, verf)),
		PROG_UNAVAIL  => Err(err("Program unavailable")),
		PROG_MISMATCH => Err(err("Program version mismatch")),
		PROC_UNAVAIL  => Err(err("Procedure unavailable")),
		GARBAGE_ARGS  => Err(err("Garbage args")),
		_             => Err(err("Call failed for unknown reason")),
	}
}
