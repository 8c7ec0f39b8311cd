//! Little-endian field codec shared by all block layouts.

use crate::error::{FsError, Result};

pub fn read_u32(buf: &[u8], offset: usize) -> u32 {
  u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap())
}

pub fn read_i64(buf: &[u8], offset: usize) -> i64 {
  i64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap())
}

pub fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
  buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

pub fn write_i64(buf: &mut [u8], offset: usize, value: i64) {
  buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

/// Strip the NUL padding that fixed-width string fields carry on disk.
pub fn trim_trailing_nuls(bytes: &[u8]) -> &[u8] {
  let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
  &bytes[..end]
}

/// Decode a fixed-width NUL-padded UTF-8 field.
pub fn read_string(buf: &[u8], offset: usize, width: usize) -> Result<String> {
  let raw = trim_trailing_nuls(&buf[offset..offset + width]);
  core::str::from_utf8(raw)
    .map(str::to_owned)
    .map_err(|_| FsError::Malformed(format!("string field at offset {offset} is not UTF-8")))
}

/// Encode `value` into a fixed-width field, padding with NULs. The caller
/// has already validated that `value` fits.
pub fn write_string(buf: &mut [u8], offset: usize, width: usize, value: &str) {
  let bytes = value.as_bytes();
  assert!(bytes.len() <= width);
  buf[offset..offset + bytes.len()].copy_from_slice(bytes);
  buf[offset + bytes.len()..offset + width].fill(0);
}

/// Pack block offsets into the on-disk child-list form, 8 bytes each.
pub fn pack_offsets(offsets: &[i64]) -> Vec<u8> {
  let mut packed = Vec::with_capacity(offsets.len() * 8);
  for offset in offsets {
    packed.extend_from_slice(&offset.to_le_bytes());
  }
  packed
}

/// Decode a packed child list back into offsets.
pub fn unpack_offsets(bytes: &[u8]) -> Result<Vec<i64>> {
  if bytes.len() % 8 != 0 {
    return Err(FsError::Malformed(format!(
      "offset array of {} bytes is not a multiple of 8",
      bytes.len()
    )));
  }
  Ok(
    bytes
      .chunks_exact(8)
      .map(|chunk| i64::from_le_bytes(chunk.try_into().unwrap()))
      .collect(),
  )
}
