use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Mutex;

use crate::error::{FsError, Result};

/// Byte-level access to the container backing store.
///
/// The container addresses its store by absolute byte offset because the
/// header fields and the bitmap live below block granularity.
pub trait ByteDevice: Send + Sync {
  /// Fill `buf` from `position`, failing with `ShortRead` when the store
  /// holds fewer bytes than requested.
  fn read_at(&self, position: u64, buf: &mut [u8]) -> Result<()>;

  /// Write all of `buf` at `position`. A no-op on empty input.
  fn write_at(&self, position: u64, buf: &[u8]) -> Result<()>;

  /// Grow or shrink the store to `length` bytes.
  fn set_len(&self, length: u64) -> Result<()>;
}

/// A container backed by a plain host file.
pub struct FileDevice(Mutex<File>);

impl FileDevice {
  /// Create the backing file; fails if it already exists.
  pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .create_new(true)
      .open(path)?;
    Ok(Self(Mutex::new(file)))
  }

  /// Open an existing backing file for read and write.
  pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
    let file = OpenOptions::new().read(true).write(true).open(path)?;
    Ok(Self(Mutex::new(file)))
  }
}

impl ByteDevice for FileDevice {
  fn read_at(&self, position: u64, buf: &mut [u8]) -> Result<()> {
    let mut file = self.0.lock().unwrap();
    file.seek(SeekFrom::Start(position))?;
    let mut got = 0;
    while got < buf.len() {
      let n = file.read(&mut buf[got..])?;
      if n == 0 {
        return Err(FsError::ShortRead { position, wanted: buf.len(), got });
      }
      got += n;
    }
    Ok(())
  }

  fn write_at(&self, position: u64, buf: &[u8]) -> Result<()> {
    if buf.is_empty() {
      return Ok(());
    }
    let mut file = self.0.lock().unwrap();
    file.seek(SeekFrom::Start(position))?;
    let mut wrote = 0;
    while wrote < buf.len() {
      let n = file.write(&buf[wrote..])?;
      if n == 0 {
        return Err(FsError::ShortWrite { position, wanted: buf.len(), wrote });
      }
      wrote += n;
    }
    Ok(())
  }

  fn set_len(&self, length: u64) -> Result<()> {
    let file = self.0.lock().unwrap();
    file.set_len(length)?;
    Ok(())
  }
}
