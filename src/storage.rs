// Files are opened per operation and never held between captures

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// Where a capture ends up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
	// Scaled samples appended to `<stem>.csv`.
	#[default]
	Csv,
	// Stored by the scope on its own USB drive.
	Usb,
	// Raw sample codes appended to `<stem>-<channel>.dat`.
	Raw,
}

impl fmt::Display for StorageMode {
	fn fmt(&self, f:&mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			StorageMode::Csv => "csv",
			StorageMode::Usb => "usb",
			StorageMode::Raw => "raw",
		})
	}
}


#[derive(Debug, Clone)]
pub struct StorageSink {
	dir: PathBuf,
}

impl StorageSink {
	pub fn new(dir:impl Into<PathBuf>) -> Self {
		Self { dir: dir.into() }
	}

	pub fn csv_path(&self, stem:&str) -> PathBuf {
		self.dir.join(format!("{}.csv", stem))
	}

	pub fn screenshot_path(&self, stem:&str) -> PathBuf {
		self.dir.join(format!("{}.jpg", stem))
	}

	pub fn raw_path(&self, stem:&str, channel:&str) -> PathBuf {
		self.dir.join(format!("{}-{}.dat", stem, channel))
	}

	fn open_append(path:&Path) -> Result<File> {
		OpenOptions::new()
			.create(true)
			.append(true)
			.open(path)
			.map_err(Error::storage(path))
	}

	// Appends one block to `<stem>.csv`: a header row followed by `rows`.
	// Earlier blocks in the file are never touched.
	pub fn append_csv_block<R: Serialize>(&self, stem:&str, header:&[&str], rows:&[R]) -> Result<PathBuf> {
		let path = self.csv_path(stem);
		let file = Self::open_append(&path)?;

		let mut wtr = csv::WriterBuilder::new().has_headers(false).from_writer(file);
		wtr.write_record(header).map_err(|e| Error::storage(&path)(e.into()))?;
		for row in rows {
			wtr.serialize(row).map_err(|e| Error::storage(&path)(e.into()))?;
		}
		wtr.flush().map_err(Error::storage(&path))?;

		Ok(path)
	}

	pub fn write_screenshot(&self, stem:&str, image:&[u8]) -> Result<PathBuf> {
		let path = self.screenshot_path(stem);
		fs::write(&path, image).map_err(Error::storage(&path))?;
		Ok(path)
	}

	pub fn append_raw(&self, stem:&str, channel:&str, data:&[u8]) -> Result<PathBuf> {
		let path = self.raw_path(stem, channel);
		let mut file = Self::open_append(&path)?;
		file.write_all(data).map_err(Error::storage(&path))?;
		file.flush().map_err(Error::storage(&path))?;
		Ok(path)
	}

	pub fn write_json<T: Serialize>(&self, name:&str, value:&T) -> Result<PathBuf> {
		let path = self.dir.join(name);
		let json = serde_json::to_vec_pretty(value)
			.map_err(|e| Error::storage(&path)(e.into()))?;
		fs::write(&path, json).map_err(Error::storage(&path))?;
		Ok(path)
	}
}
