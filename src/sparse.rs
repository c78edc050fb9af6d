//! Sparse view: a read-only façade that filters the visible namespace
//!
//! Wraps a [`Filesystem`] and an [`IncludeChecker`]; paths the checker
//! excludes surface as `ENOENT`, directory listings are filtered post-hoc,
//! and recursive walks prune subtrees the checker can never match. The
//! sparse layer never mutates the underlying filesystem.

use crate::error::{FsError, Result};
use crate::fs::options::{Dirent, ReadOptions, ReaddirOptions, ReaddirPage};
use crate::fs::{FileStat, Filesystem};
use crate::metadata::types::EntryKind;
use crate::path;
use crate::pattern::{IncludeChecker, IncludeCheckerOptions};

/// Listing options specific to the sparse view, layered on top of the
/// plain readdir options.
#[derive(Debug, Clone, Default)]
pub struct SparseReaddirOptions {
	pub base: ReaddirOptions,
	/// Glob applied to entry names (not full paths).
	pub filter: Option<String>,
	/// Keep only entries of this kind.
	pub entry_type: Option<EntryKind>,
	/// Show dot-prefixed entries (default true).
	pub include_hidden: Option<bool>,
}

/// A filtered, read-only view of a filesystem.
pub struct SparseView {
	fs: Filesystem,
	checker: IncludeChecker,
}

impl SparseView {
	pub fn new(fs: Filesystem, options: IncludeCheckerOptions) -> Result<Self> {
		Ok(Self { fs, checker: IncludeChecker::new(options)? })
	}

	pub fn with_checker(fs: Filesystem, checker: IncludeChecker) -> Self {
		Self { fs, checker }
	}

	pub fn checker(&self) -> &IncludeChecker {
		&self.checker
	}

	fn ensure_visible(&self, target: &str) -> Result<String> {
		let resolved = path::resolve(&[target]);
		if resolved == "/" {
			return Ok(resolved);
		}
		if self.checker.should_include(&resolved) {
			Ok(resolved)
		} else {
			Err(FsError::not_found(resolved))
		}
	}

	pub async fn read(&self, target: &str, options: ReadOptions) -> Result<Vec<u8>> {
		let resolved = self.ensure_visible(target)?;
		self.fs.read(&resolved, options).await
	}

	pub async fn read_to_string(&self, target: &str, options: ReadOptions) -> Result<String> {
		let resolved = self.ensure_visible(target)?;
		self.fs.read_to_string(&resolved, options).await
	}

	pub async fn stat(&self, target: &str) -> Result<FileStat> {
		let resolved = self.ensure_visible(target)?;
		self.fs.stat(&resolved).await
	}

	pub async fn lstat(&self, target: &str) -> Result<FileStat> {
		let resolved = self.ensure_visible(target)?;
		self.fs.lstat(&resolved).await
	}

	pub async fn exists(&self, target: &str) -> Result<bool> {
		let resolved = path::resolve(&[target]);
		if resolved != "/" && !self.checker.should_include(&resolved) {
			return Ok(false);
		}
		self.fs.exists(&resolved).await
	}

	pub async fn readlink(&self, target: &str) -> Result<String> {
		let resolved = self.ensure_visible(target)?;
		self.fs.readlink(&resolved).await
	}

	pub async fn realpath(&self, target: &str) -> Result<String> {
		let resolved = self.ensure_visible(target)?;
		self.fs.realpath(&resolved).await
	}

	/// Visible child names.
	pub async fn list(&self, target: &str) -> Result<Vec<String>> {
		let page = self.readdir(target, SparseReaddirOptions::default()).await?;
		Ok(page.entries.into_iter().map(|d| d.name).collect())
	}

	/// Directory listing filtered by the include checker plus the
	/// per-call `filter`/`entry_type`/`include_hidden` options (filters
	/// intersect). Recursive walks use traversal pruning to skip subtrees
	/// the pattern set can never match.
	pub async fn readdir(
		&self, target: &str, options: SparseReaddirOptions,
	) -> Result<ReaddirPage> {
		let resolved = path::resolve(&[target]);
		if resolved != "/" && !self.checker.should_traverse_directory(&resolved) {
			return Err(FsError::not_found(resolved));
		}

		let name_filter = match &options.filter {
			Some(source) => {
				let cache = crate::pattern::MatcherCache::new(16);
				let parsed = crate::pattern::ParsedPattern::parse(source)?;
				Some(crate::pattern::CompiledPattern::compile(parsed, &cache)?)
			}
			None => None,
		};
		let include_hidden = options.include_hidden.unwrap_or(true);

		if !options.base.recursive {
			let page = self.fs.readdir(&resolved, options.base.clone()).await?;
			let entries = page
				.entries
				.into_iter()
				.filter(|dirent| self.visible(dirent))
				.filter(|dirent| keep(dirent, &name_filter, options.entry_type, include_hidden))
				.collect();
			return Ok(ReaddirPage { entries, cursor: page.cursor });
		}

		// recursive: walk directories manually so excluded subtrees are
		// pruned instead of listed and filtered
		let mut collected: Vec<Dirent> = Vec::new();
		let mut stack: Vec<String> = vec![resolved];
		while let Some(dir) = stack.pop() {
			let page = self.fs.readdir(&dir, ReaddirOptions::default()).await?;
			for dirent in page.entries {
				let full = dirent.path();
				if dirent.is_directory() {
					if self.checker.should_traverse_directory(&full) {
						if keep(&dirent, &name_filter, options.entry_type, include_hidden) {
							collected.push(dirent);
						}
						stack.push(full);
					}
				} else if self.checker.should_include(&full)
					&& keep(&dirent, &name_filter, options.entry_type, include_hidden)
				{
					collected.push(dirent);
				}
			}
		}
		collected.sort_by(|a, b| a.path().cmp(&b.path()));

		let after = options.base.cursor.clone().unwrap_or_default();
		let filtered: Vec<Dirent> = collected
			.into_iter()
			.filter(|d| after.is_empty() || d.path().as_str() > after.as_str())
			.collect();
		let limited: Vec<Dirent> = match options.base.limit {
			Some(limit) => filtered.into_iter().take(limit).collect(),
			None => filtered,
		};
		let cursor = match (options.base.limit, limited.last()) {
			(Some(limit), Some(last)) if limited.len() == limit => Some(last.path()),
			_ => None,
		};
		Ok(ReaddirPage { entries: limited, cursor })
	}

	fn visible(&self, dirent: &Dirent) -> bool {
		let full = dirent.path();
		if dirent.is_directory() {
			self.checker.should_traverse_directory(&full)
		} else {
			self.checker.should_include(&full)
		}
	}
}

fn keep(
	dirent: &Dirent, name_filter: &Option<crate::pattern::CompiledPattern>,
	entry_type: Option<EntryKind>, include_hidden: bool,
) -> bool {
	if !include_hidden && dirent.name.starts_with('.') {
		return false;
	}
	if let Some(kind) = entry_type {
		if dirent.kind != kind {
			return false;
		}
	}
	if let Some(filter) = name_filter {
		let name_segments = vec![dirent.name.clone()];
		if !filter.matches(&name_segments, dirent.is_directory()) {
			return false;
		}
	}
	true
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::fs::options::{MkdirOptions, WriteOptions};

	async fn fixture() -> Filesystem {
		let fs = Filesystem::in_memory().await.unwrap();
		fs.mkdir("/src/test/fixtures", MkdirOptions { recursive: true, mode: None })
			.await
			.unwrap();
		fs.write("/src/index.ts", "index", WriteOptions::default()).await.unwrap();
		fs.write("/src/test/helper.ts", "helper", WriteOptions::default()).await.unwrap();
		fs.write("/src/test/fixtures/data.json", "{}", WriteOptions::default())
			.await
			.unwrap();
		fs.write("/src/.hidden", "secret", WriteOptions::default()).await.unwrap();
		fs
	}

	fn view(fs: Filesystem, patterns: &[&str], excludes: &[&str]) -> SparseView {
		SparseView::new(
			fs,
			IncludeCheckerOptions {
				patterns: patterns.iter().map(|s| s.to_string()).collect(),
				exclude_patterns: excludes.iter().map(|s| s.to_string()).collect(),
				cone: false,
				cache_size: None,
			},
		)
		.unwrap()
	}

	#[tokio::test]
	async fn test_excluded_paths_are_enoent() {
		let fs = fixture().await;
		let sparse = view(fs, &["**"], &["**/test/**", "!**/test/fixtures/**"]);

		let err = sparse
			.read("/src/test/helper.ts", ReadOptions::default())
			.await
			.unwrap_err();
		assert_eq!(err.code(), Some(crate::error::ErrorCode::Enoent));

		// the negation re-includes fixtures
		assert_eq!(
			sparse
				.read_to_string("/src/test/fixtures/data.json", ReadOptions::default())
				.await
				.unwrap(),
			"{}"
		);
		assert!(sparse.exists("/src/index.ts").await.unwrap());
		assert!(!sparse.exists("/src/test/helper.ts").await.unwrap());
	}

	#[tokio::test]
	async fn test_readdir_filters_post_hoc() {
		let fs = fixture().await;
		let sparse = view(fs, &["**"], &["**/test/**"]);

		let names = sparse.list("/src").await.unwrap();
		assert!(names.contains(&"index.ts".to_string()));
		// the test directory is excluded wholesale (no re-inclusion below)
		assert!(!names.contains(&"test".to_string()));
	}

	#[tokio::test]
	async fn test_readdir_name_filter_and_type() {
		let fs = fixture().await;
		let sparse = view(fs, &["**"], &[]);

		let page = sparse
			.readdir(
				"/src",
				SparseReaddirOptions {
					filter: Some("*.ts".to_string()),
					..Default::default()
				},
			)
			.await
			.unwrap();
		let names: Vec<&str> = page.entries.iter().map(|d| d.name.as_str()).collect();
		assert_eq!(names, vec!["index.ts"]);

		let dirs_only = sparse
			.readdir(
				"/src",
				SparseReaddirOptions {
					entry_type: Some(EntryKind::Directory),
					..Default::default()
				},
			)
			.await
			.unwrap();
		let names: Vec<&str> = dirs_only.entries.iter().map(|d| d.name.as_str()).collect();
		assert_eq!(names, vec!["test"]);
	}

	#[tokio::test]
	async fn test_include_hidden_default_and_off() {
		let fs = fixture().await;
		let sparse = view(fs, &["**"], &[]);

		let all = sparse.list("/src").await.unwrap();
		assert!(all.contains(&".hidden".to_string()));

		let no_hidden = sparse
			.readdir(
				"/src",
				SparseReaddirOptions {
					include_hidden: Some(false),
					..Default::default()
				},
			)
			.await
			.unwrap();
		assert!(no_hidden.entries.iter().all(|d| !d.name.starts_with('.')));
	}

	#[tokio::test]
	async fn test_recursive_walk_prunes_excluded_subtrees() {
		let fs = fixture().await;
		let sparse = view(fs, &["**"], &["**/test/**"]);

		let page = sparse
			.readdir(
				"/",
				SparseReaddirOptions {
					base: ReaddirOptions { recursive: true, ..Default::default() },
					..Default::default()
				},
			)
			.await
			.unwrap();
		let paths: Vec<String> = page.entries.iter().map(|d| d.path()).collect();
		assert!(paths.contains(&"/src/index.ts".to_string()));
		assert!(!paths.iter().any(|p| p.contains("/test/")));
	}

	#[tokio::test]
	async fn test_sparse_view_never_mutates() {
		let fs = fixture().await;
		let before = fs.stats().await.unwrap();
		let sparse = view(fs.clone(), &["**"], &["**/test/**"]);
		let _ = sparse.list("/src").await.unwrap();
		let _ = sparse.exists("/src/test/helper.ts").await.unwrap();
		let after = fs.stats().await.unwrap();
		assert_eq!(before.file_count, after.file_count);
		assert_eq!(before.total_size, after.total_size);
	}
}
