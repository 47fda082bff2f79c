
use std::io::{self, Cursor, Error, ErrorKind, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

fn err(msg:&str) -> io::Error { Error::new(ErrorKind::InvalidData, msg) }

#[derive(Default)]
pub struct Packer {
	buff: Vec<u8>,
}

// Replies are read through a position instead of draining the front of the buffer
#[derive(Default)]
pub struct Unpacker {
	buff: Vec<u8>,
	pos: usize,
}

impl Packer {

	pub fn new() -> Self { Self::default() }

	pub fn reset(&mut self) { self.buff.clear(); }

	pub fn as_bytes(&self) -> &[u8] { &self.buff }

	// Packing methods that can only add multiples of four bytes, so if we started off with the correct
	// padding, we'll end up with the correct padding
	pub fn pack_u32(&mut self, x:u32) -> io::Result<()> { self.buff.write_u32::<BigEndian>(x) }
	pub fn pack_i32(&mut self, x:i32) -> io::Result<()> { self.buff.write_i32::<BigEndian>(x) }

	pub fn pack_bool(&mut self, b:bool) -> io::Result<()> { self.pack_i32(if b { 1 } else { 0 }) }

	pub fn pack_enum(&mut self, x:i32) -> io::Result<()> { self.pack_i32(x) }

	pub fn pack_variable_len_opaque(&mut self, data:&[u8]) -> io::Result<()> {
		let len = u32::try_from(data.len()).map_err(|_| err("Opaque data too long for XDR"))?;
		self.pack_u32(len)?;
		self.buff.write_all(data)?;

		while self.buff.len() % 4 != 0 { self.buff.push(0); }
		Ok(())
	}

	pub fn pack_string(&mut self, s:&str) -> io::Result<()> {
		if !s.is_ascii() { return Err(err("XDR strings must be ASCII")); }
		self.pack_variable_len_opaque(s.as_bytes())
	}

}

impl Unpacker {

	pub fn new() -> Self { Self::default() }

	pub fn reset(&mut self, data:&[u8]) {
		self.buff.clear();
		self.buff.extend_from_slice(data);
		self.pos = 0;
	}

	pub fn all_data_consumed(&self) -> bool { self.pos >= self.buff.len() }

	fn remaining(&self) -> &[u8] { &self.buff[self.pos..] }

	fn take(&mut self, n:usize) -> io::Result<&[u8]> {
		if self.remaining().len() < n {
			return Err(Error::new(ErrorKind::UnexpectedEof, "Tried to read past the end of the XDR buffer"));
		}
		let start = self.pos;
		self.pos += n;
		Ok(&self.buff[start..self.pos])
	}

	pub fn unpack_u32(&mut self) -> io::Result<u32> { Cursor::new(self.take(4)?).read_u32::<BigEndian>() }
	pub fn unpack_i32(&mut self) -> io::Result<i32> { Cursor::new(self.take(4)?).read_i32::<BigEndian>() }

	// An enum is just an i32 with a restricted set of values.  Which values are valid depends on the
	// application, so at this level an enum is the same as an i32
	pub fn unpack_enum(&mut self) -> io::Result<i32> { self.unpack_i32() }


	pub fn unpack_variable_len_opaque(&mut self) -> io::Result<Vec<u8>> {
		let n = self.unpack_u32()? as usize;
		let padded = (n + 3) & !3;
		let data = self.take(padded)?;
		Ok(data[..n].to_vec())
	}

}
