use thiserror::Error;

pub type Result<T> = core::result::Result<T, FsError>;

/// Everything the core can fail with. All operations propagate these to the
/// caller; nothing is retried or rolled back inside the core.
#[derive(Debug, Error)]
pub enum FsError {
  #[error("invalid parameter: {0}")]
  InvalidParam(String),

  #[error("`{0}` already exists")]
  AlreadyExists(String),

  #[error("directory `{0}` not found")]
  NotFound(String),

  #[error("file `{0}` not found")]
  FileNotFound(String),

  #[error("directory `{0}` is not empty")]
  NotEmpty(String),

  #[error("not enough free blocks: requested {requested}, available {available}")]
  NoSpace { requested: usize, available: usize },

  #[error("range {start}+{count} exceeds file length {length}")]
  OutOfRange { start: u32, count: u32, length: u32 },

  #[error("malformed container: {0}")]
  Malformed(String),

  #[error("short read at offset {position}: wanted {wanted} bytes, got {got}")]
  ShortRead { position: u64, wanted: usize, got: usize },

  #[error("short write at offset {position}: wanted {wanted} bytes, wrote {wrote}")]
  ShortWrite { position: u64, wanted: usize, wrote: usize },

  #[error("i/o failure: {0}")]
  Io(#[from] std::io::Error),
}
