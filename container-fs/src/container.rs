//! The container: one host file holding a header, a free-block bitmap, and
//! a pool of equally sized blocks encoding a tree of directories and files.

use std::cmp::min;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use log::{debug, info};

use crate::bitmap::Bitmap;
use crate::codec;
use crate::device::{ByteDevice, FileDevice};
use crate::error::{FsError, Result};
use crate::layout::{self, Block, DataBlock, HeaderBlock, MetadataBlock};
use crate::{DATA_RESERVED, FORMAT_VERSION, HEADER_RESERVED, METADATA_RESERVED, NAME_BYTES, NO_LINK};

/// Geometry constraints from the on-disk format: both axes are multiples of
/// 4096, and the bitmap must fit inside block 0 behind the fixed header.
const GEOMETRY_STEP: u32 = 4096;

/// Blocks reserved up front in the backing file before any payload is written.
const INITIAL_RESERVATION_BLOCKS: u64 = 256;

/// Snapshot of the header fields plus the live allocation counters.
#[derive(Debug, Clone)]
pub struct ContainerStats {
  pub version: u32,
  pub name: String,
  pub block_size: u32,
  pub block_count: u32,
  pub free_blocks: u32,
  pub total_bytes: u64,
  pub free_bytes: u64,
  pub created: String,
}

/// One directory's contents: file entries with their byte lengths,
/// subdirectory names, and the directory's own block offset.
#[derive(Debug, Clone, Default)]
pub struct DirectoryListing {
  pub files: Vec<(String, u32)>,
  pub directories: Vec<String>,
  pub position: i64,
}

/// A mounted container. Owns the device, the decoded header, and the
/// bitmap; single-writer by contract.
pub struct Container {
  device: Arc<dyn ByteDevice>,
  header: HeaderBlock,
  bitmap: Bitmap,
  logging: bool,
}

fn now_stamp() -> String {
  Utc::now().format("%m/%d/%Y %H:%M:%S%.6f").to_string()
}

/// File names match trimmed and ASCII case-insensitive; directory path
/// segments match byte-for-byte.
fn file_names_equal(candidate: &str, wanted: &str) -> bool {
  candidate.trim().eq_ignore_ascii_case(wanted.trim())
}

fn validate_geometry(name: &str, block_size: u32, block_count: u32) -> Result<()> {
  if name.is_empty() {
    return Err(FsError::InvalidParam("container name is empty".into()));
  }
  if name.len() > NAME_BYTES {
    return Err(FsError::InvalidParam(format!(
      "container name exceeds {NAME_BYTES} bytes"
    )));
  }
  if block_size < GEOMETRY_STEP || block_size % GEOMETRY_STEP != 0 {
    return Err(FsError::InvalidParam(format!(
      "block size {block_size} must be a positive multiple of {GEOMETRY_STEP}"
    )));
  }
  if block_count < GEOMETRY_STEP || block_count % GEOMETRY_STEP != 0 {
    return Err(FsError::InvalidParam(format!(
      "block count {block_count} must be a positive multiple of {GEOMETRY_STEP}"
    )));
  }
  // keeps the bitmap inside block 0, behind the 1024-byte fixed header
  if block_size < block_count / 4 {
    return Err(FsError::InvalidParam(format!(
      "block size {block_size} is too small for a bitmap of {block_count} blocks"
    )));
  }
  Ok(())
}

impl Container {
  /// Create a new container file at `path`. Fails if the file exists.
  pub fn create<P: AsRef<Path>>(
    path: P,
    name: &str,
    block_size: u32,
    block_count: u32,
    logging: bool,
  ) -> Result<Self> {
    validate_geometry(name, block_size, block_count)?;
    let display = path.as_ref().display().to_string();
    let device = FileDevice::create(&path).map_err(|err| match err {
      FsError::Io(inner) if inner.kind() == std::io::ErrorKind::AlreadyExists => {
        FsError::AlreadyExists(display)
      }
      other => other,
    })?;
    Self::create_on(Arc::new(device), name, block_size, block_count, logging)
  }

  /// Create a container on an already-constructed device.
  pub fn create_on(
    device: Arc<dyn ByteDevice>,
    name: &str,
    block_size: u32,
    block_count: u32,
    logging: bool,
  ) -> Result<Self> {
    validate_geometry(name, block_size, block_count)?;
    device.set_len(block_size as u64 * INITIAL_RESERVATION_BLOCKS)?;

    let stamp = now_stamp();
    let header = HeaderBlock {
      version: FORMAT_VERSION,
      name: name.to_owned(),
      block_size,
      block_count,
      created: stamp.clone(),
    };
    device.write_at(0, &header.to_bytes())?;

    let mut bitmap = Bitmap::new(block_size, block_count);
    bitmap.mark_used(0, &device)?;
    bitmap.mark_used(1, &device)?;

    let root = MetadataBlock::directory(".", 0, &stamp);
    device.write_at(block_size as u64, &root.to_bytes(block_size))?;

    if logging {
      info!("created container `{name}`: {block_count} blocks of {block_size} bytes");
    }
    Ok(Self { device, header, bitmap, logging })
  }

  /// Open an existing container file.
  pub fn open<P: AsRef<Path>>(path: P, logging: bool) -> Result<Self> {
    Self::open_on(Arc::new(FileDevice::open(path)?), logging)
  }

  /// Open a container on an already-constructed device.
  pub fn open_on(device: Arc<dyn ByteDevice>, logging: bool) -> Result<Self> {
    let mut fixed = vec![0u8; HEADER_RESERVED];
    device.read_at(0, &mut fixed)?;
    let header = HeaderBlock::from_bytes(&fixed)?;

    let mut bits = vec![0u8; (header.block_count / 8) as usize];
    device.read_at(HEADER_RESERVED as u64, &mut bits)?;
    let bitmap = Bitmap::from_bytes(&bits, header.block_size, header.block_count);

    if logging {
      info!(
        "opened container `{}`: {} of {} blocks free",
        header.name,
        bitmap.count_free(),
        header.block_count
      );
    }
    Ok(Self { device, header, bitmap, logging })
  }

  pub fn name(&self) -> &str {
    &self.header.name
  }

  pub fn block_size(&self) -> u32 {
    self.header.block_size
  }

  pub fn block_count(&self) -> u32 {
    self.header.block_count
  }

  pub fn created(&self) -> &str {
    &self.header.created
  }

  pub fn stats(&self) -> ContainerStats {
    let free_blocks = self.bitmap.count_free();
    ContainerStats {
      version: self.header.version,
      name: self.header.name.clone(),
      block_size: self.header.block_size,
      block_count: self.header.block_count,
      free_blocks,
      total_bytes: self.header.block_size as u64 * self.header.block_count as u64,
      free_bytes: free_blocks as u64 * self.header.block_size as u64,
      created: self.header.created.clone(),
    }
  }

  // ---- block primitives -------------------------------------------------

  fn root_position(&self) -> i64 {
    self.header.block_size as i64
  }

  fn local_capacity(&self) -> usize {
    self.header.block_size as usize - METADATA_RESERVED
  }

  fn chain_capacity(&self) -> usize {
    self.header.block_size as usize - DATA_RESERVED
  }

  fn read_block_bytes(&self, position: i64) -> Result<Vec<u8>> {
    let block_size = self.header.block_size as i64;
    let pool = block_size * self.header.block_count as i64;
    if position < 0 || position % block_size != 0 || position >= pool {
      return Err(FsError::Malformed(format!(
        "block offset {position} is outside the pool"
      )));
    }
    let mut buf = vec![0u8; self.header.block_size as usize];
    self.device.read_at(position as u64, &mut buf)?;
    Ok(buf)
  }

  fn load_metadata(&self, position: i64) -> Result<MetadataBlock> {
    MetadataBlock::from_bytes(&self.read_block_bytes(position)?)
  }

  fn zero_block(&self, position: i64) -> Result<()> {
    self
      .device
      .write_at(position as u64, &vec![0u8; self.header.block_size as usize])
  }

  /// Overflow data blocks needed for `length` payload bytes once the local
  /// metadata payload is full.
  fn overflow_blocks(&self, length: usize) -> usize {
    let local = self.local_capacity();
    if length <= local {
      0
    } else {
      (length - local).div_ceil(self.chain_capacity())
    }
  }

  /// Write `payload` across `positions` as a forward-linked chain rooted at
  /// the metadata block `owner`.
  fn write_chain(&self, owner: i64, positions: &[i64], payload: &[u8]) -> Result<()> {
    let capacity = self.chain_capacity();
    let mut remaining = payload;
    for (k, &position) in positions.iter().enumerate() {
      let parent = if k == 0 { owner } else { positions[k - 1] };
      let child = if k + 1 < positions.len() { positions[k + 1] } else { NO_LINK };
      let take = min(capacity, remaining.len());
      let block = DataBlock { parent, child, payload: remaining[..take].to_vec() };
      self
        .device
        .write_at(position as u64, &block.to_bytes(self.header.block_size))?;
      remaining = &remaining[take..];
    }
    Ok(())
  }

  /// Zero-fill the chain hanging off `head` and release it in the bitmap.
  fn release_chain(&mut self, head: i64) -> Result<()> {
    let positions = layout::chain_positions(
      &self.device,
      head,
      self.header.block_size,
      self.header.block_count,
    )?;
    if positions.is_empty() {
      return Ok(());
    }
    for &position in &positions {
      self.zero_block(position)?;
    }
    self.bitmap.free(&positions, &self.device)
  }

  // ---- path resolution --------------------------------------------------

  fn segments(path: &str) -> Vec<&str> {
    path
      .split('/')
      .filter(|segment| !segment.is_empty() && *segment != ".")
      .collect()
  }

  /// Walk the tree from the root, matching each segment against directory
  /// children byte-for-byte. Never descends into file nodes.
  fn find_directory(&self, path: &str) -> Result<(MetadataBlock, i64)> {
    let mut position = self.root_position();
    let mut meta = self.load_metadata(position)?;
    for segment in Self::segments(path) {
      let mut matched = None;
      for child_position in self.child_offsets(&meta)? {
        let child = self.load_metadata(child_position)?;
        if child.is_directory && child.name == segment {
          matched = Some((child, child_position));
          break;
        }
      }
      match matched {
        Some((child, child_position)) => {
          meta = child;
          position = child_position;
        }
        None => return Err(FsError::NotFound(path.to_owned())),
      }
    }
    Ok((meta, position))
  }

  /// First file child of `parent` matching `name`.
  fn find_file(&self, parent: &MetadataBlock, name: &str) -> Result<(MetadataBlock, i64)> {
    for position in self.child_offsets(parent)? {
      let child = self.load_metadata(position)?;
      if child.is_file && file_names_equal(&child.name, name) {
        return Ok((child, position));
      }
    }
    Err(FsError::FileNotFound(name.to_owned()))
  }

  fn child_offsets(&self, meta: &MetadataBlock) -> Result<Vec<i64>> {
    meta.child_offsets(&self.device, self.header.block_size, self.header.block_count)
  }

  // ---- files ------------------------------------------------------------

  /// Reassemble a whole file.
  pub fn read_file(&self, path: &str, name: &str) -> Result<Vec<u8>> {
    let (parent, _) = self.find_directory(path)?;
    let (meta, _) = self.find_file(&parent, name)?;
    meta.file_data(&self.device, self.header.block_size, self.header.block_count)
  }

  /// Read `count` bytes starting at `start` within the file.
  pub fn read_file_range(&self, path: &str, name: &str, start: u32, count: u32) -> Result<Vec<u8>> {
    let (parent, _) = self.find_directory(path)?;
    let (meta, _) = self.find_file(&parent, name)?;
    let length = meta.full_length;
    let end = match start.checked_add(count) {
      Some(end) if start <= length && end <= length => end,
      _ => return Err(FsError::OutOfRange { start, count, length }),
    };
    let data = meta.file_data(&self.device, self.header.block_size, self.header.block_count)?;
    Ok(data[start as usize..end as usize].to_vec())
  }

  /// Store `data` as a new file under `path`.
  pub fn write_file(&mut self, path: &str, name: &str, data: &[u8]) -> Result<()> {
    if name.trim().is_empty() {
      return Err(FsError::InvalidParam("file name is empty".into()));
    }
    if name.len() > NAME_BYTES {
      return Err(FsError::InvalidParam(format!("file name exceeds {NAME_BYTES} bytes")));
    }
    let (parent, parent_position) = self.find_directory(path)?;
    for position in self.child_offsets(&parent)? {
      let child = self.load_metadata(position)?;
      if child.is_file && file_names_equal(&child.name, name) {
        return Err(FsError::AlreadyExists(name.to_owned()));
      }
    }

    let overflow = self.overflow_blocks(data.len());
    let positions = self.bitmap.allocate(overflow + 1, &self.device)?;
    let meta_position = positions[0];
    let chain = &positions[1..];

    let local_take = min(self.local_capacity(), data.len());
    // data blocks land before the metadata that points at them
    self.write_chain(meta_position, chain, &data[local_take..])?;

    let stamp = now_stamp();
    let meta = MetadataBlock::file(
      name,
      parent_position,
      chain.first().copied().unwrap_or(NO_LINK),
      data.len() as u32,
      &data[..local_take],
      &stamp,
    );
    self
      .device
      .write_at(meta_position as u64, &meta.to_bytes(self.header.block_size))?;
    self.append_child(parent_position, meta_position)?;

    if self.logging {
      debug!(
        "wrote file `{name}` under `{path}`: {} bytes across {} blocks",
        data.len(),
        overflow + 1
      );
    }
    Ok(())
  }

  /// Remove a file: zero-fill and release every block it occupies, then
  /// drop it from its parent's child list.
  pub fn delete_file(&mut self, path: &str, name: &str) -> Result<()> {
    let (parent, parent_position) = self.find_directory(path)?;
    let (meta, meta_position) = self.find_file(&parent, name)?;

    let mut doomed = vec![meta_position];
    doomed.extend(layout::chain_positions(
      &self.device,
      meta.child_data,
      self.header.block_size,
      self.header.block_count,
    )?);
    for &position in &doomed {
      self.zero_block(position)?;
    }
    self.bitmap.free(&doomed, &self.device)?;
    self.remove_child(parent_position, meta_position)?;

    if self.logging {
      debug!("deleted file `{name}` under `{path}`: released {} blocks", doomed.len());
    }
    Ok(())
  }

  // ---- directories ------------------------------------------------------

  /// List one directory.
  pub fn read_directory(&self, path: &str) -> Result<DirectoryListing> {
    let (meta, position) = self.find_directory(path)?;
    let mut listing = DirectoryListing { position, ..Default::default() };
    for child_position in self.child_offsets(&meta)? {
      let child = self.load_metadata(child_position)?;
      if child.is_directory {
        listing.directories.push(child.name);
      } else if child.is_file {
        listing.files.push((child.name, child.full_length));
      }
    }
    Ok(listing)
  }

  /// Create the directory named by the last segment of `path`.
  pub fn write_directory(&mut self, path: &str) -> Result<()> {
    let segments = Self::segments(path);
    let Some((&name, parents)) = segments.split_last() else {
      return Err(FsError::InvalidParam("path names the root directory".into()));
    };
    if name.len() > NAME_BYTES {
      return Err(FsError::InvalidParam(format!(
        "directory name exceeds {NAME_BYTES} bytes"
      )));
    }
    let parent_path = parents.join("/");
    let (parent, parent_position) = self.find_directory(&parent_path)?;
    for position in self.child_offsets(&parent)? {
      let child = self.load_metadata(position)?;
      // directory names clash byte-exact, matching segment resolution;
      // only file names fold case
      let clash = if child.is_file {
        file_names_equal(&child.name, name)
      } else {
        child.name == name
      };
      if clash {
        return Err(FsError::AlreadyExists(name.to_owned()));
      }
    }

    let positions = self.bitmap.allocate(1, &self.device)?;
    let meta = MetadataBlock::directory(name, parent_position, &now_stamp());
    self
      .device
      .write_at(positions[0] as u64, &meta.to_bytes(self.header.block_size))?;
    self.append_child(parent_position, positions[0])?;

    if self.logging {
      debug!("created directory `{path}` at offset {}", positions[0]);
    }
    Ok(())
  }

  /// Remove an empty directory.
  pub fn delete_directory(&mut self, path: &str) -> Result<()> {
    if Self::segments(path).is_empty() {
      return Err(FsError::InvalidParam("the root directory cannot be deleted".into()));
    }
    let (meta, position) = self.find_directory(path)?;
    if !self.child_offsets(&meta)?.is_empty() {
      return Err(FsError::NotEmpty(path.to_owned()));
    }

    self.release_chain(meta.child_data)?;
    self.zero_block(position)?;
    self.bitmap.free(&[position], &self.device)?;
    self.remove_child(meta.parent, position)?;

    if self.logging {
      debug!("deleted directory `{path}` at offset {position}");
    }
    Ok(())
  }

  // ---- child lists ------------------------------------------------------

  fn append_child(&mut self, directory: i64, child: i64) -> Result<()> {
    let meta = self.load_metadata(directory)?;
    let mut offsets = self.child_offsets(&meta)?;
    offsets.push(child);
    self.rewrite_child_list(directory, &offsets)
  }

  fn remove_child(&mut self, directory: i64, child: i64) -> Result<()> {
    let meta = self.load_metadata(directory)?;
    let offsets: Vec<i64> = self
      .child_offsets(&meta)?
      .into_iter()
      .filter(|&offset| offset != child)
      .collect();
    self.rewrite_child_list(directory, &offsets)
  }

  /// Replace a directory's child list. The new overflow chain is written
  /// and the metadata rewritten before the old chain is released, so a
  /// `NoSpace` failure leaves the directory exactly as it was, and
  /// shrinking lists still never leak blocks.
  fn rewrite_child_list(&mut self, directory: i64, offsets: &[i64]) -> Result<()> {
    let mut meta = self.load_metadata(directory)?;
    let old_chain = meta.child_data;

    let packed = codec::pack_offsets(offsets);
    let local_take = min(self.local_capacity(), packed.len());
    let overflow = self.overflow_blocks(packed.len());
    let chain = if overflow > 0 {
      self.bitmap.allocate(overflow, &self.device)?
    } else {
      Vec::new()
    };
    self.write_chain(directory, &chain, &packed[local_take..])?;

    meta.child_data = chain.first().copied().unwrap_or(NO_LINK);
    meta.payload = packed[..local_take].to_vec();
    meta.updated = now_stamp();
    self
      .device
      .write_at(directory as u64, &meta.to_bytes(self.header.block_size))?;
    self.release_chain(old_chain)
  }

  // ---- inspection -------------------------------------------------------

  /// One raw block, for offline inspection.
  pub fn read_raw_block(&self, position: i64) -> Result<Vec<u8>> {
    let block_size = self.header.block_size as i64;
    let pool = block_size * self.header.block_count as i64;
    if position < 0 || position % block_size != 0 || position >= pool {
      return Err(FsError::InvalidParam(format!(
        "position {position} is not a block offset inside the pool"
      )));
    }
    let mut buf = vec![0u8; self.header.block_size as usize];
    self.device.read_at(position as u64, &mut buf)?;
    Ok(buf)
  }

  /// Decode the block at `position` and describe it.
  pub fn enumerate_block(&self, position: i64) -> Result<String> {
    let buf = self.read_raw_block(position)?;
    Ok(Block::from_bytes(&buf)?.describe(position))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::MemoryDevice;
  use tempfile::TempDir;

  const BS: u32 = 4096;
  const BC: u32 = 4096;
  const FRESH_FREE: u32 = BC - 2;

  fn memory_container() -> Container {
    Container::create_on(Arc::new(MemoryDevice::new()), "unit", BS, BC, false).unwrap()
  }

  #[test]
  fn create_reserves_header_and_root() {
    let fs = memory_container();
    let stats = fs.stats();
    assert_eq!(stats.free_blocks, FRESH_FREE);
    assert_eq!(stats.total_bytes, BS as u64 * BC as u64);
    assert_eq!(stats.free_bytes, FRESH_FREE as u64 * BS as u64);

    let root = fs.read_directory("/").unwrap();
    assert!(root.files.is_empty());
    assert!(root.directories.is_empty());
    assert_eq!(root.position, BS as i64);
    // "", "/" and "." all denote the root
    assert_eq!(fs.read_directory("").unwrap().position, BS as i64);
    assert_eq!(fs.read_directory(".").unwrap().position, BS as i64);
  }

  #[test]
  fn geometry_is_validated() {
    let reject = |name: &str, bs: u32, bc: u32| {
      let device: Arc<dyn ByteDevice> = Arc::new(MemoryDevice::new());
      assert!(matches!(
        Container::create_on(device, name, bs, bc, false),
        Err(FsError::InvalidParam(_))
      ));
    };
    reject("c", 2048, 4096); // block size below the floor
    reject("c", 4100, 4096); // block size not a multiple
    reject("c", 4096, 2048); // block count below the floor
    reject("c", 4096, 4100); // block count not a multiple
    reject("c", 4096, 32768); // bitmap would not fit behind the header
    reject("", 4096, 4096);
  }

  #[test]
  fn stamps_use_the_container_format() {
    let stamp = now_stamp();
    assert_eq!(stamp.len(), 26);
    assert!(
      chrono::NaiveDateTime::parse_from_str(&stamp, "%m/%d/%Y %H:%M:%S%.f").is_ok(),
      "unparseable stamp {stamp}"
    );
  }

  #[test]
  fn small_file_lives_in_the_metadata_block() {
    let mut fs = memory_container();
    fs.write_file("/", "hello.txt", b"Hello, world!").unwrap();
    assert_eq!(fs.read_file("/", "hello.txt").unwrap(), b"Hello, world!");
    assert_eq!(fs.stats().free_blocks, FRESH_FREE - 1);

    let listing = fs.read_directory("/").unwrap();
    assert_eq!(listing.files, vec![("hello.txt".to_owned(), 13)]);
  }

  #[test]
  fn large_file_chains_overflow_blocks() {
    let mut fs = memory_container();
    let payload = vec![b'x'; 10_000];
    fs.write_file("/", "big.bin", &payload).unwrap();
    // local capacity 3584, chain capacity 4032: two overflow blocks
    assert_eq!(fs.stats().free_blocks, FRESH_FREE - 3);
    assert_eq!(fs.read_file("/", "big.bin").unwrap(), payload);
  }

  #[test]
  fn ranged_reads_slice_the_payload() {
    let mut fs = memory_container();
    let payload: Vec<u8> = (0..9000u32).map(|i| (i % 251) as u8).collect();
    fs.write_file("/", "r.bin", &payload).unwrap();

    for (start, count) in [(0u32, 9000u32), (0, 1), (3583, 2), (3584, 4032), (8999, 1), (9000, 0)] {
      assert_eq!(
        fs.read_file_range("/", "r.bin", start, count).unwrap(),
        payload[start as usize..(start + count) as usize],
        "range {start}+{count}"
      );
    }
    assert!(matches!(
      fs.read_file_range("/", "r.bin", 9001, 0),
      Err(FsError::OutOfRange { .. })
    ));
    assert!(matches!(
      fs.read_file_range("/", "r.bin", 8000, 1001),
      Err(FsError::OutOfRange { .. })
    ));
  }

  #[test]
  fn lookups_report_the_right_missing_piece() {
    let mut fs = memory_container();
    assert!(matches!(fs.read_file("/nope", "f"), Err(FsError::NotFound(_))));
    assert!(matches!(fs.read_file("/", "f"), Err(FsError::FileNotFound(_))));

    fs.write_file("/", "Hello.txt", b"hi").unwrap();
    // duplicate detection is trimmed and case-insensitive
    assert!(matches!(
      fs.write_file("/", "HELLO.TXT", b"other"),
      Err(FsError::AlreadyExists(_))
    ));
    assert_eq!(fs.read_file("/", " hello.txt ").unwrap(), b"hi");

    // directory segments stay byte-exact, for creation as well as lookup
    fs.write_directory("/Docs").unwrap();
    assert!(matches!(fs.read_directory("/docs"), Err(FsError::NotFound(_))));
    fs.write_directory("/docs").unwrap();
    assert!(fs.read_directory("/docs").unwrap().directories.is_empty());
    assert_ne!(
      fs.read_directory("/Docs").unwrap().position,
      fs.read_directory("/docs").unwrap().position
    );
  }

  #[test]
  fn nested_directories_list_their_contents() {
    let mut fs = memory_container();
    fs.write_directory("/a").unwrap();
    fs.write_directory("/a/b").unwrap();
    fs.write_file("/a/b", "x.bin", &[0u8]).unwrap();

    let leaf = fs.read_directory("/a/b").unwrap();
    assert_eq!(leaf.files, vec![("x.bin".to_owned(), 1)]);
    assert!(leaf.directories.is_empty());

    let mid = fs.read_directory("/a").unwrap();
    assert_eq!(mid.directories, vec!["b".to_owned()]);
    assert!(mid.files.is_empty());

    assert!(matches!(fs.write_directory("/a"), Err(FsError::AlreadyExists(_))));
  }

  #[test]
  fn delete_directory_requires_empty() {
    let mut fs = memory_container();
    let before = fs.stats().free_blocks;
    fs.write_directory("/a").unwrap();
    fs.write_file("/a", "f", b"payload").unwrap();

    assert!(matches!(fs.delete_directory("/a"), Err(FsError::NotEmpty(_))));
    fs.delete_file("/a", "f").unwrap();
    fs.delete_directory("/a").unwrap();
    assert_eq!(fs.stats().free_blocks, before);
    assert!(matches!(fs.read_directory("/a"), Err(FsError::NotFound(_))));
    assert!(matches!(fs.delete_directory("/"), Err(FsError::InvalidParam(_))));
  }

  #[test]
  fn delete_then_rewrite_restores_free_count() {
    let mut fs = memory_container();
    let payload = vec![b'y'; 10_000];
    fs.write_file("/", "f", &payload).unwrap();
    let used = fs.stats().free_blocks;
    fs.delete_file("/", "f").unwrap();
    assert_eq!(fs.stats().free_blocks, FRESH_FREE);
    fs.write_file("/", "f", &payload).unwrap();
    assert_eq!(fs.stats().free_blocks, used);
    assert_eq!(fs.read_file("/", "f").unwrap(), payload);
  }

  #[test]
  fn oversized_write_fails_without_marking_blocks() {
    let mut fs = memory_container();
    // larger than the whole pool can hold
    let payload = vec![0u8; 3584 + 4094 * 4032];
    assert!(matches!(
      fs.write_file("/", "huge", &payload),
      Err(FsError::NoSpace { .. })
    ));
    assert_eq!(fs.stats().free_blocks, FRESH_FREE);
    assert!(matches!(fs.read_file("/", "huge"), Err(FsError::FileNotFound(_))));
  }

  #[test]
  fn wide_directory_spills_into_an_overflow_chain() {
    let mut fs = memory_container();
    // 500 children * 8 bytes > the 3584-byte local payload
    for i in 0..500 {
      fs.write_file("/", &format!("f{i:03}"), &[]).unwrap();
    }
    // one overflow block carries the child-list tail
    assert_eq!(fs.stats().free_blocks, FRESH_FREE - 500 - 1);

    let listing = fs.read_directory("/").unwrap();
    assert_eq!(listing.files.len(), 500);
    assert!(listing.files.iter().any(|(name, _)| name == "f499"));

    for i in 0..500 {
      fs.delete_file("/", &format!("f{i:03}")).unwrap();
    }
    // shrinking the list released the overflow chain as well
    assert_eq!(fs.stats().free_blocks, FRESH_FREE);
  }

  #[test]
  fn failed_list_growth_leaves_the_directory_intact() {
    let mut fs = memory_container();
    fs.write_directory("/d").unwrap();
    // fill the pool down to a single free block: 2 reserved + 1 directory
    // + 3642 filler blocks + 449 files + 1 child-list overflow block
    fs.write_file("/", "filler", &vec![0u8; 3584 + 3641 * 4032]).unwrap();
    for i in 0..449 {
      fs.write_file("/d", &format!("f{i:03}"), &[]).unwrap();
    }
    // 449 children spill past the local payload, so /d already carries an
    // overflow chain block
    assert_eq!(fs.stats().free_blocks, 1);

    // the next write takes the last free block for its metadata; growing
    // the child list then finds no room for the replacement chain
    assert!(matches!(
      fs.write_file("/d", "one-more", &[]),
      Err(FsError::NoSpace { .. })
    ));

    // the failure must not have touched the existing chain: the directory
    // survives and stays fully usable
    let listing = fs.read_directory("/d").unwrap();
    assert_eq!(listing.files.len(), 449);
    fs.delete_file("/d", "f000").unwrap();
    assert_eq!(fs.read_directory("/d").unwrap().files.len(), 448);
  }

  #[test]
  fn inspection_decodes_blocks_by_signature() {
    let mut fs = memory_container();
    fs.write_file("/", "probe", b"z").unwrap();

    assert!(fs.enumerate_block(0).unwrap().contains("header"));
    let root = fs.enumerate_block(BS as i64).unwrap();
    assert!(root.contains("directory"), "{root}");
    let file = fs.enumerate_block(2 * BS as i64).unwrap();
    assert!(file.contains("file `probe`"), "{file}");

    assert_eq!(fs.read_raw_block(0).unwrap().len(), BS as usize);
    assert!(matches!(fs.read_raw_block(100), Err(FsError::InvalidParam(_))));
    assert!(matches!(fs.read_raw_block(-4096), Err(FsError::InvalidParam(_))));
  }

  #[test]
  fn reopen_reproduces_the_bitmap_bit_for_bit() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("c.cfs");

    let mut fs = Container::create(&path, "reopen", BS, BC, false).unwrap();
    fs.write_directory("/a").unwrap();
    fs.write_file("/a", "f.bin", &vec![7u8; 10_000]).unwrap();
    let before = fs.stats();
    let raw_bitmap = fs.read_raw_block(0).unwrap();
    drop(fs);

    let fs = Container::open(&path, false).unwrap();
    let after = fs.stats();
    assert_eq!(after.free_blocks, before.free_blocks);
    assert_eq!(after.name, "reopen");
    assert_eq!(after.created, before.created);
    assert_eq!(fs.read_raw_block(0).unwrap(), raw_bitmap);
    assert_eq!(fs.read_file("/a", "f.bin").unwrap(), vec![7u8; 10_000]);

    assert!(matches!(
      Container::create(&path, "reopen", BS, BC, false),
      Err(FsError::AlreadyExists(_))
    ));
  }
}
