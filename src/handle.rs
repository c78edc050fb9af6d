//! File handles: positioned and sequential I/O over an in-memory working
//! buffer, flushed to blob storage on sync/close
//!
//! A handle owns a descriptor (3 and up; 0-2 stay reserved), a working
//! buffer, a cached stat, a position and mode flags. Writes mark the handle
//! dirty; `sync`/`datasync` flush through the owning [`Filesystem`] and
//! clear the flag. Handles are single-owner: they are not meant to be
//! shared across tasks.

use tracing::warn;

use crate::error::{FsError, Result};
use crate::fs::options::{ReadOptions, WriteFlag, WriteOptions};
use crate::fs::{FileStat, Filesystem};
use crate::metadata::types::{now_millis, Entry};

/// Default chunk size for streaming reads and writes.
pub const DEFAULT_HIGH_WATER_MARK: usize = 16 * 1024;

/// Parsed `fopen`-style open flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags {
	pub readable: bool,
	pub writable: bool,
	pub append: bool,
	pub create: bool,
	pub truncate: bool,
	pub exclusive: bool,
}

impl OpenFlags {
	pub fn parse(flags: &str) -> Result<Self> {
		let (readable, writable, append, create, truncate, exclusive) = match flags {
			"r" => (true, false, false, false, false, false),
			"r+" => (true, true, false, false, false, false),
			"w" => (false, true, false, true, true, false),
			"w+" => (true, true, false, true, true, false),
			"a" => (false, true, true, true, false, false),
			"a+" => (true, true, true, true, false, false),
			"x" | "wx" => (false, true, false, true, true, true),
			"wx+" => (true, true, false, true, true, true),
			"ax" => (false, true, true, true, false, true),
			"ax+" => (true, true, true, true, false, true),
			other => {
				return Err(FsError::invalid(format!("unknown open flags {other:?}")))
			}
		};
		Ok(Self { readable, writable, append, create, truncate, exclusive })
	}
}

/// An open file.
pub struct FileHandle {
	fs: Filesystem,
	fd: u64,
	path: String,
	entry_id: u64,
	flags: OpenFlags,
	buffer: Vec<u8>,
	position: usize,
	stat_cache: Entry,
	pending_mtime: Option<i64>,
	dirty: bool,
	closed: bool,
}

impl std::fmt::Debug for FileHandle {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("FileHandle")
			.field("fd", &self.fd)
			.field("path", &self.path)
			.field("entry_id", &self.entry_id)
			.field("flags", &self.flags)
			.field("position", &self.position)
			.field("stat_cache", &self.stat_cache)
			.field("pending_mtime", &self.pending_mtime)
			.field("dirty", &self.dirty)
			.field("closed", &self.closed)
			.finish()
	}
}

impl FileHandle {
	pub(crate) async fn open(
		fs: Filesystem, target: &str, flags: OpenFlags, mode: u32,
	) -> Result<Self> {
		let (entry, buffer) = fs.open_inner(target, flags, mode).await?;
		let fd = fs.allocate_fd();
		let position = if flags.append { buffer.len() } else { 0 };
		Ok(Self {
			fs,
			fd,
			path: entry.path.clone(),
			entry_id: entry.id,
			flags,
			buffer,
			position,
			stat_cache: entry,
			pending_mtime: None,
			dirty: false,
			closed: false,
		})
	}

	pub fn fd(&self) -> u64 {
		self.fd
	}

	pub fn path(&self) -> &str {
		&self.path
	}

	pub fn position(&self) -> u64 {
		self.position as u64
	}

	pub fn is_dirty(&self) -> bool {
		self.dirty
	}

	pub fn is_closed(&self) -> bool {
		self.closed
	}

	fn check_open(&self) -> Result<()> {
		if self.closed {
			return Err(FsError::BadDescriptor { fd: self.fd });
		}
		Ok(())
	}

	/// Copy up to `min(length, out capacity, remaining)` bytes into
	/// `out[offset..]`. An explicit `position` reads without moving the
	/// handle position; otherwise the position advances past the bytes
	/// read. At or past EOF, zero bytes are read.
	pub fn read(
		&mut self, out: &mut [u8], offset: usize, length: Option<usize>, position: Option<u64>,
	) -> Result<usize> {
		self.check_open()?;
		if !self.flags.readable {
			return Err(FsError::BadDescriptor { fd: self.fd });
		}
		if offset > out.len() {
			return Err(FsError::invalid(format!(
				"offset {offset} is beyond the buffer length {}",
				out.len()
			)));
		}
		let capacity = out.len() - offset;
		let wanted = length.unwrap_or(capacity).min(capacity);
		let start = position.map(|p| p as usize).unwrap_or(self.position);
		if start >= self.buffer.len() {
			return Ok(0);
		}
		let count = wanted.min(self.buffer.len() - start);
		out[offset..offset + count].copy_from_slice(&self.buffer[start..start + count]);
		if position.is_none() {
			self.position = start + count;
		}
		Ok(count)
	}

	/// Write at the handle position (always EOF in append mode) and
	/// advance past the written bytes.
	pub fn write(&mut self, data: &[u8]) -> Result<usize> {
		let at = if self.flags.append { self.buffer.len() } else { self.position };
		self.write_impl(data, at, true)
	}

	/// Write UTF-8 text at the handle position.
	pub fn write_str(&mut self, text: &str) -> Result<usize> {
		self.write(text.as_bytes())
	}

	/// Write at an explicit position without moving the handle position.
	/// Append mode ignores the position and writes at EOF.
	pub fn write_at(&mut self, data: &[u8], position: u64) -> Result<usize> {
		let at = if self.flags.append { self.buffer.len() } else { position as usize };
		self.write_impl(data, at, false)
	}

	fn write_impl(&mut self, data: &[u8], at: usize, advance: bool) -> Result<usize> {
		self.check_open()?;
		if !self.flags.writable {
			return Err(FsError::BadDescriptor { fd: self.fd });
		}
		let end = at + data.len();
		if at > self.buffer.len() {
			// writing past EOF zero-fills the gap
			self.buffer.resize(at, 0);
		}
		if end > self.buffer.len() {
			self.buffer.resize(end, 0);
		}
		self.buffer[at..end].copy_from_slice(data);
		if advance {
			self.position = end;
		}
		self.pending_mtime = Some(now_millis());
		self.dirty = true;
		Ok(data.len())
	}

	/// Shrink, or zero-extend, the working buffer. Dirty only when the
	/// length actually changes.
	pub fn truncate(&mut self, length: u64) -> Result<()> {
		self.check_open()?;
		if !self.flags.writable {
			return Err(FsError::BadDescriptor { fd: self.fd });
		}
		let length = length as usize;
		if length == self.buffer.len() {
			return Ok(());
		}
		self.buffer.resize(length, 0);
		self.position = self.position.min(length);
		self.pending_mtime = Some(now_millis());
		self.dirty = true;
		Ok(())
	}

	/// Stat snapshot reflecting the pending (unflushed) size and
	/// timestamps.
	pub fn stat(&self) -> Result<FileStat> {
		self.check_open()?;
		let entry = &self.stat_cache;
		Ok(FileStat {
			id: entry.id,
			path: entry.path.clone(),
			kind: entry.kind,
			mode: entry.full_mode(),
			uid: entry.uid,
			gid: entry.gid,
			nlink: entry.nlink,
			size: self.buffer.len() as u64,
			link_target: entry.link_target.clone(),
			atime: entry.atime,
			mtime: self.pending_mtime.unwrap_or(entry.mtime),
			ctime: self.pending_mtime.unwrap_or(entry.ctime),
			birthtime: entry.birthtime,
			tier: entry.tier,
		})
	}

	/// Flush data and metadata to durable storage. A clean handle is a
	/// no-op (and preserves mtime).
	pub async fn sync(&mut self) -> Result<()> {
		self.check_open()?;
		if !self.dirty {
			return Ok(());
		}
		let entry = self.fs.flush_file(self.entry_id, &self.buffer).await?;
		self.stat_cache = entry;
		self.pending_mtime = None;
		self.dirty = false;
		Ok(())
	}

	/// Flush file data. Metadata is co-located with data in this store,
	/// so this is equivalent to [`sync`](Self::sync).
	pub async fn datasync(&mut self) -> Result<()> {
		self.sync().await
	}

	/// Close the handle, flushing dirty data first. Idempotent; every
	/// operation after close fails with `EBADF`.
	pub async fn close(&mut self) -> Result<()> {
		if self.closed {
			return Ok(());
		}
		let flush_result = if self.dirty { self.sync().await } else { Ok(()) };
		self.closed = true;
		self.fs.release_fd(self.fd);
		flush_result
	}

	/// Refresh the cached stat from the store (drops pending timestamps
	/// only if the handle is clean).
	pub async fn refresh_stat(&mut self) -> Result<()> {
		self.check_open()?;
		let entry = self.fs.stat_by_id(self.entry_id).await?;
		self.stat_cache = entry;
		Ok(())
	}
}

impl Drop for FileHandle {
	fn drop(&mut self) {
		if !self.closed {
			if self.dirty {
				warn!(
					"File handle {} for {} dropped with unsynced data; call close()",
					self.fd, self.path
				);
			}
			self.fs.release_fd(self.fd);
		}
	}
}

/// Lazy pull stream over a file's content in `high_water_mark` chunks.
pub struct ReadStream {
	fs: Filesystem,
	path: String,
	options: ReadOptions,
	high_water_mark: usize,
	loaded: Option<Vec<u8>>,
	offset: usize,
}

impl ReadStream {
	pub(crate) async fn open(fs: Filesystem, target: &str, options: ReadOptions) -> Result<Self> {
		// fail fast on missing files and directories
		let stat = fs.stat(target).await?;
		if stat.is_directory() {
			return Err(FsError::IsDirectory { path: stat.path });
		}
		let high_water_mark = options.high_water_mark.unwrap_or(DEFAULT_HIGH_WATER_MARK);
		Ok(Self { fs, path: stat.path, options, high_water_mark, loaded: None, offset: 0 })
	}

	/// The next chunk, or `None` at end of stream.
	pub async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
		if let Some(signal) = &self.options.signal {
			if signal.is_cancelled() {
				return Err(FsError::Cancelled);
			}
		}
		if self.loaded.is_none() {
			let bytes = self.fs.read(&self.path, self.options.clone()).await?;
			self.loaded = Some(bytes);
		}
		let data = self.loaded.as_ref().expect("loaded above");
		if self.offset >= data.len() {
			return Ok(None);
		}
		let count = self.high_water_mark.min(data.len() - self.offset);
		let chunk = data[self.offset..self.offset + count].to_vec();
		self.offset += count;
		Ok(Some(chunk))
	}

	/// Drain the remaining chunks into one buffer.
	pub async fn collect(&mut self) -> Result<Vec<u8>> {
		let mut out = Vec::new();
		while let Some(chunk) = self.next_chunk().await? {
			out.extend_from_slice(&chunk);
		}
		Ok(out)
	}
}

/// Buffered push stream; chunks past the high-water mark flush as
/// appends, and `finish` flushes the remainder.
pub struct WriteStream {
	fs: Filesystem,
	path: String,
	options: WriteOptions,
	buffer: Vec<u8>,
	high_water_mark: usize,
	finished: bool,
}

impl WriteStream {
	pub(crate) async fn open(
		fs: Filesystem, target: &str, options: WriteOptions,
	) -> Result<Self> {
		// apply creation/truncation/exclusive semantics up front
		fs.write(target, b"", options.clone()).await?;
		let path = crate::path::resolve(&[target]);
		// subsequent flushes extend what the open created
		let options = WriteOptions { flag: WriteFlag::Append, ..options };
		Ok(Self {
			fs,
			path,
			options,
			buffer: Vec::new(),
			high_water_mark: DEFAULT_HIGH_WATER_MARK,
			finished: false,
		})
	}

	pub async fn write(&mut self, chunk: impl AsRef<[u8]>) -> Result<()> {
		if self.finished {
			return Err(FsError::invalid("write stream already finished"));
		}
		self.buffer.extend_from_slice(chunk.as_ref());
		if self.buffer.len() >= self.high_water_mark {
			self.flush().await?;
		}
		Ok(())
	}

	pub async fn flush(&mut self) -> Result<()> {
		if self.buffer.is_empty() {
			return Ok(());
		}
		let chunk = std::mem::take(&mut self.buffer);
		self.fs.write(&self.path, chunk, self.options.clone()).await
	}

	/// Flush the remainder and seal the stream.
	pub async fn finish(&mut self) -> Result<()> {
		if self.finished {
			return Ok(());
		}
		self.flush().await?;
		self.finished = true;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::error::ErrorCode;

	async fn fs() -> Filesystem {
		Filesystem::in_memory().await.unwrap()
	}

	#[tokio::test]
	async fn test_open_flags_contracts() {
		let fs = fs().await;
		// r requires existence
		let err = fs.open("/missing", "r", None).await.unwrap_err();
		assert_eq!(err.code(), Some(ErrorCode::Enoent));

		// w creates
		let mut handle = fs.open("/f", "w", None).await.unwrap();
		assert!(handle.fd() >= 3);
		handle.close().await.unwrap();

		// x forbids an existing file
		let err = fs.open("/f", "wx", None).await.unwrap_err();
		assert_eq!(err.code(), Some(ErrorCode::Eexist));
	}

	#[tokio::test]
	async fn test_write_then_read_through_handle() {
		let fs = fs().await;
		let mut handle = fs.open("/f", "w+", None).await.unwrap();
		handle.write(b"hello world").unwrap();
		assert!(handle.is_dirty());
		handle.sync().await.unwrap();
		assert!(!handle.is_dirty());

		let mut out = [0u8; 5];
		let read = handle.read(&mut out, 0, None, Some(6)).unwrap();
		assert_eq!(read, 5);
		assert_eq!(&out, b"world");
		handle.close().await.unwrap();

		assert_eq!(
			fs.read_to_string("/f", ReadOptions::default()).await.unwrap(),
			"hello world"
		);
	}

	#[tokio::test]
	async fn test_positioned_read_does_not_move_position() {
		let fs = fs().await;
		fs.write("/f", "abcdef", WriteOptions::default()).await.unwrap();
		let mut handle = fs.open("/f", "r", None).await.unwrap();

		let mut out = [0u8; 2];
		handle.read(&mut out, 0, None, Some(3)).unwrap();
		assert_eq!(&out, b"de");
		assert_eq!(handle.position(), 0);

		// sequential read starts from the handle position
		handle.read(&mut out, 0, None, None).unwrap();
		assert_eq!(&out, b"ab");
		assert_eq!(handle.position(), 2);
		handle.close().await.unwrap();
	}

	#[tokio::test]
	async fn test_read_at_eof_returns_zero() {
		let fs = fs().await;
		fs.write("/f", "ab", WriteOptions::default()).await.unwrap();
		let mut handle = fs.open("/f", "r", None).await.unwrap();
		let mut out = [0u8; 4];
		assert_eq!(handle.read(&mut out, 0, None, Some(10)).unwrap(), 0);
		handle.close().await.unwrap();
	}

	#[tokio::test]
	async fn test_offset_beyond_buffer_is_invalid() {
		let fs = fs().await;
		fs.write("/f", "ab", WriteOptions::default()).await.unwrap();
		let mut handle = fs.open("/f", "r", None).await.unwrap();
		let mut out = [0u8; 2];
		let err = handle.read(&mut out, 3, None, None).unwrap_err();
		assert_eq!(err.code(), Some(ErrorCode::Einval));
		handle.close().await.unwrap();
	}

	#[tokio::test]
	async fn test_write_past_eof_zero_fills() {
		let fs = fs().await;
		let mut handle = fs.open("/f", "w", None).await.unwrap();
		handle.write_at(b"xy", 4).unwrap();
		handle.close().await.unwrap();

		let bytes = fs.read("/f", ReadOptions::default()).await.unwrap();
		assert_eq!(bytes, vec![0, 0, 0, 0, b'x', b'y']);
	}

	#[tokio::test]
	async fn test_append_mode_forces_eof_writes() {
		let fs = fs().await;
		fs.write("/log", "start-", WriteOptions::default()).await.unwrap();
		let mut handle = fs.open("/log", "a", None).await.unwrap();
		// explicit position is ignored in append mode
		handle.write_at(b"end", 0).unwrap();
		handle.close().await.unwrap();

		assert_eq!(
			fs.read_to_string("/log", ReadOptions::default()).await.unwrap(),
			"start-end"
		);
	}

	#[tokio::test]
	async fn test_truncate_dirty_only_on_change() {
		let fs = fs().await;
		fs.write("/f", "abcdef", WriteOptions::default()).await.unwrap();
		let mut handle = fs.open("/f", "r+", None).await.unwrap();

		handle.truncate(6).unwrap();
		assert!(!handle.is_dirty());

		handle.truncate(3).unwrap();
		assert!(handle.is_dirty());
		assert_eq!(handle.stat().unwrap().size, 3);
		handle.close().await.unwrap();
		assert_eq!(fs.stat("/f").await.unwrap().size, 3);
	}

	#[tokio::test]
	async fn test_close_is_idempotent_then_ebadf() {
		let fs = fs().await;
		let mut handle = fs.open("/f", "w", None).await.unwrap();
		handle.close().await.unwrap();
		handle.close().await.unwrap();

		let mut out = [0u8; 1];
		let err = handle.read(&mut out, 0, None, None).unwrap_err();
		assert_eq!(err.code(), Some(ErrorCode::Ebadf));
		assert!(handle.write(b"x").is_err());
		assert!(handle.stat().is_err());
	}

	#[tokio::test]
	async fn test_read_on_write_only_handle_fails() {
		let fs = fs().await;
		let mut handle = fs.open("/f", "w", None).await.unwrap();
		let mut out = [0u8; 1];
		let err = handle.read(&mut out, 0, None, None).unwrap_err();
		assert_eq!(err.code(), Some(ErrorCode::Ebadf));
		handle.close().await.unwrap();
	}

	#[tokio::test]
	async fn test_no_op_sync_preserves_mtime() {
		let fs = fs().await;
		fs.write("/f", "x", WriteOptions::default()).await.unwrap();
		let before = fs.stat("/f").await.unwrap().mtime;
		let mut handle = fs.open("/f", "r+", None).await.unwrap();
		tokio::time::sleep(std::time::Duration::from_millis(5)).await;
		handle.sync().await.unwrap();
		handle.close().await.unwrap();
		assert_eq!(fs.stat("/f").await.unwrap().mtime, before);
	}

	#[tokio::test]
	async fn test_with_handle_closes_on_error() {
		let fs = fs().await;
		let result: crate::error::Result<()> = fs
			.with_handle("/f", "w", |handle| {
				Box::pin(async move {
					handle.write(b"partial")?;
					Err(FsError::invalid("boom"))
				})
			})
			.await;
		assert!(result.is_err());
		// the scope closed (and flushed) the handle on the error path
		assert_eq!(
			fs.read_to_string("/f", ReadOptions::default()).await.unwrap(),
			"partial"
		);
	}

	#[tokio::test]
	async fn test_read_stream_chunks() {
		let fs = fs().await;
		let payload = vec![7u8; 40 * 1024];
		fs.write("/big", &payload, WriteOptions::default()).await.unwrap();

		let mut stream = fs.create_read_stream("/big", ReadOptions::default()).await.unwrap();
		let first = stream.next_chunk().await.unwrap().unwrap();
		assert_eq!(first.len(), DEFAULT_HIGH_WATER_MARK);
		let rest = stream.collect().await.unwrap();
		assert_eq!(first.len() + rest.len(), payload.len());
	}

	#[tokio::test]
	async fn test_write_stream_lands_on_finish() {
		let fs = fs().await;
		let mut stream =
			fs.create_write_stream("/out", WriteOptions::default()).await.unwrap();
		stream.write("chunk-1 ").await.unwrap();
		stream.write("chunk-2").await.unwrap();
		stream.finish().await.unwrap();

		assert_eq!(
			fs.read_to_string("/out", ReadOptions::default()).await.unwrap(),
			"chunk-1 chunk-2"
		);
		assert!(stream.write("late").await.is_err());
	}
}
