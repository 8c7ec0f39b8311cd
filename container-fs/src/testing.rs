//! In-memory test double for the device seam.

use std::sync::Mutex;

use crate::device::ByteDevice;
use crate::error::{FsError, Result};

/// A `ByteDevice` over a growable byte vector. Writes past the end extend
/// the store the way a sparse host file would.
pub struct MemoryDevice {
  bytes: Mutex<Vec<u8>>,
}

impl MemoryDevice {
  pub fn new() -> Self {
    Self { bytes: Mutex::new(Vec::new()) }
  }

  pub fn len(&self) -> usize {
    self.bytes.lock().unwrap().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl Default for MemoryDevice {
  fn default() -> Self {
    Self::new()
  }
}

impl ByteDevice for MemoryDevice {
  fn read_at(&self, position: u64, buf: &mut [u8]) -> Result<()> {
    let bytes = self.bytes.lock().unwrap();
    let start = position as usize;
    let available = bytes.len().saturating_sub(start);
    if available < buf.len() {
      return Err(FsError::ShortRead {
        position,
        wanted: buf.len(),
        got: available,
      });
    }
    buf.copy_from_slice(&bytes[start..start + buf.len()]);
    Ok(())
  }

  fn write_at(&self, position: u64, buf: &[u8]) -> Result<()> {
    if buf.is_empty() {
      return Ok(());
    }
    let mut bytes = self.bytes.lock().unwrap();
    let end = position as usize + buf.len();
    if bytes.len() < end {
      bytes.resize(end, 0);
    }
    bytes[position as usize..end].copy_from_slice(buf);
    Ok(())
  }

  fn set_len(&self, length: u64) -> Result<()> {
    self.bytes.lock().unwrap().resize(length as usize, 0);
    Ok(())
  }
}
