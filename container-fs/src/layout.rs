//! On-disk block layouts and chain traversal.
//!
//! Three block kinds share a 4-byte signature prefix: the header block at
//! offset 0, one metadata block per file or directory, and data blocks
//! carrying overflow payload. All integers are little-endian; offsets are
//! signed 64-bit with −1 meaning "no link".

use std::sync::Arc;

use crate::codec;
use crate::device::ByteDevice;
use crate::error::{FsError, Result};
use crate::{
  DATA_RESERVED, DATA_SIGNATURE, FORMAT_VERSION, HEADER_RESERVED, HEADER_SIGNATURE,
  METADATA_RESERVED, METADATA_SIGNATURE, NAME_BYTES, NO_LINK, STAMP_BYTES,
};

/// Decoded header block fields (the bitmap that follows them on disk is
/// owned by `Bitmap`, not duplicated here).
#[derive(Debug, Clone)]
pub struct HeaderBlock {
  pub version: u32,
  pub name: String,
  pub block_size: u32,
  pub block_count: u32,
  pub created: String,
}

impl HeaderBlock {
  /// The fixed 1024-byte region before the bitmap.
  pub fn to_bytes(&self) -> Vec<u8> {
    let mut buf = vec![0u8; HEADER_RESERVED];
    buf[0..4].copy_from_slice(&HEADER_SIGNATURE);
    codec::write_u32(&mut buf, 8, self.version);
    codec::write_string(&mut buf, 16, NAME_BYTES, &self.name);
    codec::write_u32(&mut buf, 288, self.block_size);
    codec::write_u32(&mut buf, 296, self.block_count);
    codec::write_string(&mut buf, 304, STAMP_BYTES, &self.created);
    buf
  }

  pub fn from_bytes(buf: &[u8]) -> Result<Self> {
    if buf[0..4] != HEADER_SIGNATURE {
      return Err(FsError::Malformed("bad header signature".into()));
    }
    let version = codec::read_u32(buf, 8);
    if version != FORMAT_VERSION {
      return Err(FsError::Malformed(format!("unsupported format version {version}")));
    }
    Ok(Self {
      version,
      name: codec::read_string(buf, 16, NAME_BYTES)?,
      block_size: codec::read_u32(buf, 288),
      block_count: codec::read_u32(buf, 296),
      created: codec::read_string(buf, 304, STAMP_BYTES)?,
    })
  }
}

/// Overflow payload block, forward-linked through `child`.
#[derive(Debug, Clone)]
pub struct DataBlock {
  pub parent: i64,
  pub child: i64,
  pub payload: Vec<u8>,
}

impl DataBlock {
  pub fn data_length(&self) -> u32 {
    self.payload.len() as u32
  }

  pub fn to_bytes(&self, block_size: u32) -> Vec<u8> {
    assert!(self.payload.len() <= block_size as usize - DATA_RESERVED);
    let mut buf = vec![0u8; block_size as usize];
    buf[0..4].copy_from_slice(&DATA_SIGNATURE);
    codec::write_i64(&mut buf, 4, self.parent);
    codec::write_i64(&mut buf, 12, self.child);
    codec::write_u32(&mut buf, 20, self.data_length());
    buf[DATA_RESERVED..DATA_RESERVED + self.payload.len()].copy_from_slice(&self.payload);
    buf
  }

  pub fn from_bytes(buf: &[u8]) -> Result<Self> {
    if buf[0..4] != DATA_SIGNATURE {
      return Err(FsError::Malformed("bad data-block signature".into()));
    }
    let data_length = codec::read_u32(buf, 20) as usize;
    if data_length > buf.len() - DATA_RESERVED {
      return Err(FsError::Malformed(format!(
        "data length {data_length} exceeds block capacity"
      )));
    }
    Ok(Self {
      parent: codec::read_i64(buf, 4),
      child: codec::read_i64(buf, 12),
      payload: buf[DATA_RESERVED..DATA_RESERVED + data_length].to_vec(),
    })
  }
}

/// One file or directory. The first 512 bytes are the fixed header; the
/// remainder holds the local payload (file bytes, or a packed child-offset
/// array for directories).
#[derive(Debug, Clone)]
pub struct MetadataBlock {
  pub parent: i64,
  pub child_data: i64,
  pub full_length: u32,
  pub is_directory: bool,
  pub is_file: bool,
  pub name: String,
  pub created: String,
  pub updated: String,
  pub payload: Vec<u8>,
}

impl MetadataBlock {
  /// A fresh empty directory node.
  pub fn directory(name: &str, parent: i64, stamp: &str) -> Self {
    Self {
      parent,
      child_data: NO_LINK,
      full_length: 0,
      is_directory: true,
      is_file: false,
      name: name.to_owned(),
      created: stamp.to_owned(),
      updated: stamp.to_owned(),
      payload: Vec::new(),
    }
  }

  /// A fresh file node holding the local slice of its payload.
  pub fn file(name: &str, parent: i64, child_data: i64, full_length: u32, local: &[u8], stamp: &str) -> Self {
    Self {
      parent,
      child_data,
      full_length,
      is_directory: false,
      is_file: true,
      name: name.to_owned(),
      created: stamp.to_owned(),
      updated: stamp.to_owned(),
      payload: local.to_vec(),
    }
  }

  pub fn local_length(&self) -> u32 {
    self.payload.len() as u32
  }

  pub fn to_bytes(&self, block_size: u32) -> Vec<u8> {
    assert!(self.payload.len() <= block_size as usize - METADATA_RESERVED);
    let mut buf = vec![0u8; block_size as usize];
    buf[0..4].copy_from_slice(&METADATA_SIGNATURE);
    codec::write_i64(&mut buf, 4, self.parent);
    codec::write_i64(&mut buf, 12, self.child_data);
    codec::write_u32(&mut buf, 20, self.full_length);
    codec::write_u32(&mut buf, 28, self.local_length());
    codec::write_u32(&mut buf, 32, self.is_directory as u32);
    codec::write_u32(&mut buf, 36, self.is_file as u32);
    codec::write_string(&mut buf, 40, NAME_BYTES, &self.name);
    codec::write_string(&mut buf, 296, STAMP_BYTES, &self.created);
    codec::write_string(&mut buf, 328, STAMP_BYTES, &self.updated);
    buf[METADATA_RESERVED..METADATA_RESERVED + self.payload.len()].copy_from_slice(&self.payload);
    buf
  }

  pub fn from_bytes(buf: &[u8]) -> Result<Self> {
    if buf[0..4] != METADATA_SIGNATURE {
      return Err(FsError::Malformed("bad metadata signature".into()));
    }
    let local_length = codec::read_u32(buf, 28) as usize;
    if local_length > buf.len() - METADATA_RESERVED {
      return Err(FsError::Malformed(format!(
        "local length {local_length} exceeds block capacity"
      )));
    }
    Ok(Self {
      parent: codec::read_i64(buf, 4),
      child_data: codec::read_i64(buf, 12),
      full_length: codec::read_u32(buf, 20),
      is_directory: codec::read_u32(buf, 32) != 0,
      is_file: codec::read_u32(buf, 36) != 0,
      name: codec::read_string(buf, 40, NAME_BYTES)?,
      created: codec::read_string(buf, 296, STAMP_BYTES)?,
      updated: codec::read_string(buf, 328, STAMP_BYTES)?,
      payload: buf[METADATA_RESERVED..METADATA_RESERVED + local_length].to_vec(),
    })
  }

  /// Reassemble the full file payload: local bytes, then the chain.
  pub fn file_data(
    &self,
    device: &Arc<dyn ByteDevice>,
    block_size: u32,
    block_count: u32,
  ) -> Result<Vec<u8>> {
    assert!(self.is_file);
    let mut data = self.payload.clone();
    for (_, block) in walk_chain(device, self.child_data, block_size, block_count)? {
      data.extend_from_slice(&block.payload);
    }
    Ok(data)
  }

  /// Decode the packed child-offset list, local payload plus overflow chain.
  pub fn child_offsets(
    &self,
    device: &Arc<dyn ByteDevice>,
    block_size: u32,
    block_count: u32,
  ) -> Result<Vec<i64>> {
    assert!(self.is_directory);
    let mut offsets = codec::unpack_offsets(&self.payload)?;
    for (_, block) in walk_chain(device, self.child_data, block_size, block_count)? {
      offsets.extend(codec::unpack_offsets(&block.payload)?);
    }
    Ok(offsets)
  }

  /// Number of data blocks chained off this node.
  pub fn data_block_count(
    &self,
    device: &Arc<dyn ByteDevice>,
    block_size: u32,
    block_count: u32,
  ) -> Result<usize> {
    Ok(walk_chain(device, self.child_data, block_size, block_count)?.len())
  }
}

/// Follow a data-block chain from `head`, returning each position with its
/// decoded block. Stops at −1 or at an empty block (end-of-chain even when
/// its child link is set). A walk longer than the pool is a cycle.
pub fn walk_chain(
  device: &Arc<dyn ByteDevice>,
  head: i64,
  block_size: u32,
  block_count: u32,
) -> Result<Vec<(i64, DataBlock)>> {
  let mut visited = Vec::new();
  let mut position = head;
  while position >= 0 {
    if visited.len() >= block_count as usize {
      return Err(FsError::Malformed("data chain does not terminate".into()));
    }
    let mut buf = vec![0u8; block_size as usize];
    device.read_at(position as u64, &mut buf)?;
    let block = DataBlock::from_bytes(&buf)?;
    let next = block.child;
    let done = block.payload.is_empty();
    visited.push((position, block));
    if done {
      break;
    }
    position = next;
  }
  Ok(visited)
}

/// Concatenated payload of the chain starting at `head`.
pub fn read_chain(
  device: &Arc<dyn ByteDevice>,
  head: i64,
  block_size: u32,
  block_count: u32,
) -> Result<Vec<u8>> {
  let mut data = Vec::new();
  for (_, block) in walk_chain(device, head, block_size, block_count)? {
    data.extend_from_slice(&block.payload);
  }
  Ok(data)
}

/// Positions occupied by the chain starting at `head`.
pub fn chain_positions(
  device: &Arc<dyn ByteDevice>,
  head: i64,
  block_size: u32,
  block_count: u32,
) -> Result<Vec<i64>> {
  Ok(
    walk_chain(device, head, block_size, block_count)?
      .into_iter()
      .map(|(position, _)| position)
      .collect(),
  )
}

/// Any block, discriminated by its signature bytes.
pub enum Block {
  Header(HeaderBlock),
  Metadata(MetadataBlock),
  Data(DataBlock),
}

impl Block {
  pub fn from_bytes(buf: &[u8]) -> Result<Self> {
    let signature: [u8; 4] = buf[0..4].try_into().unwrap();
    match signature {
      HEADER_SIGNATURE => Ok(Block::Header(HeaderBlock::from_bytes(buf)?)),
      METADATA_SIGNATURE => Ok(Block::Metadata(MetadataBlock::from_bytes(buf)?)),
      DATA_SIGNATURE => Ok(Block::Data(DataBlock::from_bytes(buf)?)),
      _ => Err(FsError::Malformed(format!(
        "unknown block signature {signature:02X?}"
      ))),
    }
  }

  /// One-line human description for the inspection API.
  pub fn describe(&self, position: i64) -> String {
    match self {
      Block::Header(header) => format!(
        "{position}: header `{}` version {}, {} blocks of {} bytes, created {}",
        header.name, header.version, header.block_count, header.block_size, header.created
      ),
      Block::Metadata(meta) => {
        let kind = if meta.is_directory { "directory" } else { "file" };
        format!(
          "{position}: metadata for {kind} `{}`, parent {}, chain head {}, {} bytes total ({} local)",
          meta.name, meta.parent, meta.child_data, meta.full_length, meta.local_length()
        )
      }
      Block::Data(data) => format!(
        "{position}: data block, parent {}, child {}, {} payload bytes",
        data.parent, data.child, data.data_length()
      ),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::MemoryDevice;

  const BS: u32 = 4096;

  fn device() -> Arc<dyn ByteDevice> {
    Arc::new(MemoryDevice::new())
  }

  #[test]
  fn header_round_trips_at_fixed_offsets() {
    let header = HeaderBlock {
      version: FORMAT_VERSION,
      name: "backup".into(),
      block_size: BS,
      block_count: 8192,
      created: "01/31/2024 08:15:00.000001".into(),
    };
    let buf = header.to_bytes();
    assert_eq!(buf.len(), HEADER_RESERVED);
    assert_eq!(&buf[0..4], &[0x01; 4]);
    assert_eq!(codec::read_u32(&buf, 288), BS);
    assert_eq!(codec::read_u32(&buf, 296), 8192);

    let decoded = HeaderBlock::from_bytes(&buf).unwrap();
    assert_eq!(decoded.name, "backup");
    assert_eq!(decoded.created, header.created);
  }

  #[test]
  fn bad_header_version_is_malformed() {
    let mut buf = HeaderBlock {
      version: FORMAT_VERSION,
      name: "x".into(),
      block_size: BS,
      block_count: 4096,
      created: String::new(),
    }
    .to_bytes();
    codec::write_u32(&mut buf, 8, 7);
    assert!(matches!(HeaderBlock::from_bytes(&buf), Err(FsError::Malformed(_))));
  }

  #[test]
  fn data_block_round_trips() {
    let block = DataBlock {
      parent: 4096,
      child: NO_LINK,
      payload: vec![0xAB; 100],
    };
    let buf = block.to_bytes(BS);
    assert_eq!(buf.len(), BS as usize);
    assert_eq!(&buf[0..4], &[0xFF; 4]);
    assert_eq!(codec::read_i64(&buf, 12), NO_LINK);
    assert_eq!(codec::read_u32(&buf, 20), 100);

    let decoded = DataBlock::from_bytes(&buf).unwrap();
    assert_eq!(decoded.parent, 4096);
    assert_eq!(decoded.payload, block.payload);
  }

  #[test]
  fn metadata_round_trips_both_flavors() {
    let stamp = "12/24/2023 23:59:59.999999";
    let dir = MetadataBlock::directory("logs", 4096, stamp);
    let decoded = MetadataBlock::from_bytes(&dir.to_bytes(BS)).unwrap();
    assert!(decoded.is_directory && !decoded.is_file);
    assert_eq!(decoded.name, "logs");
    assert_eq!(decoded.child_data, NO_LINK);
    assert_eq!(decoded.payload, Vec::<u8>::new());

    let file = MetadataBlock::file("a.bin", 4096, 3 * 4096, 9000, &[7u8; 3584], stamp);
    let decoded = MetadataBlock::from_bytes(&file.to_bytes(BS)).unwrap();
    assert!(decoded.is_file && !decoded.is_directory);
    assert_eq!(decoded.full_length, 9000);
    assert_eq!(decoded.local_length(), 3584);
    assert_eq!(decoded.child_data, 3 * 4096);
    assert_eq!(decoded.created, stamp);
  }

  #[test]
  fn unknown_signature_is_malformed() {
    let buf = vec![0x42u8; BS as usize];
    assert!(matches!(Block::from_bytes(&buf), Err(FsError::Malformed(_))));
  }

  #[test]
  fn chain_walk_concatenates_until_no_link() {
    let device = device();
    // two-block chain: 100 bytes then 50 bytes
    let second = DataBlock { parent: 4096, child: NO_LINK, payload: vec![2u8; 50] };
    let first = DataBlock { parent: 0, child: 2 * 4096, payload: vec![1u8; 100] };
    device.write_at(4096, &first.to_bytes(BS)).unwrap();
    device.write_at(2 * 4096, &second.to_bytes(BS)).unwrap();

    let data = read_chain(&device, 4096, BS, 16).unwrap();
    assert_eq!(data.len(), 150);
    assert_eq!(&data[..100], &[1u8; 100][..]);
    assert_eq!(&data[100..], &[2u8; 50][..]);
    assert_eq!(chain_positions(&device, 4096, BS, 16).unwrap(), vec![4096, 2 * 4096]);
    assert!(chain_positions(&device, NO_LINK, BS, 16).unwrap().is_empty());
  }

  #[test]
  fn empty_block_ends_the_chain_despite_child_link() {
    let device = device();
    let stub = DataBlock { parent: 0, child: 5 * 4096, payload: Vec::new() };
    device.write_at(4096, &stub.to_bytes(BS)).unwrap();
    let walked = walk_chain(&device, 4096, BS, 16).unwrap();
    assert_eq!(walked.len(), 1);
    assert_eq!(read_chain(&device, 4096, BS, 16).unwrap(), Vec::<u8>::new());
  }

  #[test]
  fn chain_cycle_is_malformed() {
    let device = device();
    let looped = DataBlock { parent: 0, child: 4096, payload: vec![1u8; 8] };
    device.write_at(4096, &looped.to_bytes(BS)).unwrap();
    assert!(matches!(
      walk_chain(&device, 4096, BS, 16),
      Err(FsError::Malformed(_))
    ));
  }

  #[test]
  fn directory_offsets_span_the_overflow_chain() {
    let device = device();
    let tail: Vec<i64> = (0..16).map(|i| (100 + i) * 4096).collect();
    let chain_block = DataBlock {
      parent: 4096,
      child: NO_LINK,
      payload: codec::pack_offsets(&tail),
    };
    device.write_at(2 * 4096, &chain_block.to_bytes(BS)).unwrap();

    let mut dir = MetadataBlock::directory("big", 0, "");
    dir.child_data = 2 * 4096;
    dir.payload = codec::pack_offsets(&[4096, 8192]);

    let offsets = dir.child_offsets(&device, BS, 512).unwrap();
    assert_eq!(offsets.len(), 18);
    assert_eq!(offsets[0], 4096);
    assert_eq!(offsets[17], 115 * 4096);
    assert_eq!(dir.data_block_count(&device, BS, 512).unwrap(), 1);
  }
}
