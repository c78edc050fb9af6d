//! POSIX path manipulation over `/`-separated strings
//!
//! The filesystem stores canonical absolute paths as plain strings, so these
//! helpers operate on `&str` instead of `std::path::Path`. Semantics follow
//! POSIX: runs of `/` collapse, `.` and `..` resolve segment by segment, and
//! absolute paths never ascend above root. None of these functions touch the
//! metadata store.

/// Whether the path is anchored at root.
pub fn is_absolute(path: &str) -> bool {
	path.starts_with('/')
}

/// Collapse `//`, `.` and `..` segments. Empty input normalizes to `"."`;
/// relative paths keep their leading `..` stack; a trailing slash survives
/// normalization (except on root itself).
pub fn normalize(path: &str) -> String {
	if path.is_empty() {
		return ".".to_string();
	}

	let absolute = path.starts_with('/');
	let trailing = path.len() > 1 && path.ends_with('/');
	let mut stack: Vec<&str> = Vec::new();

	for segment in path.split('/') {
		match segment {
			"" | "." => {}
			".." => {
				if stack.last().is_some_and(|s| *s != "..") {
					stack.pop();
				} else if !absolute {
					stack.push("..");
				}
				// absolute paths never ascend above root
			}
			other => stack.push(other),
		}
	}

	let mut out = stack.join("/");
	if out.is_empty() {
		return if absolute { "/".to_string() } else { ".".to_string() };
	}
	if absolute {
		out.insert(0, '/');
	}
	if trailing {
		out.push('/');
	}
	out
}

/// Join segments with single slashes, dropping empty parts, then normalize.
/// `join(&[])` is `"."`.
pub fn join(parts: &[&str]) -> String {
	let joined: Vec<&str> = parts.iter().copied().filter(|p| !p.is_empty()).collect();
	if joined.is_empty() {
		return ".".to_string();
	}
	normalize(&joined.join("/"))
}

/// Resolve segments into an absolute path rooted at `/`. Each absolute
/// segment resets the accumulator; the result never carries a trailing
/// slash (except root itself).
pub fn resolve(parts: &[&str]) -> String {
	let mut acc = String::new();
	for part in parts {
		if part.is_empty() {
			continue;
		}
		if is_absolute(part) {
			acc = (*part).to_string();
		} else {
			if !acc.is_empty() {
				acc.push('/');
			}
			acc.push_str(part);
		}
	}
	if !is_absolute(&acc) {
		acc.insert(0, '/');
	}
	let mut out = normalize(&acc);
	if out.len() > 1 && out.ends_with('/') {
		out.pop();
	}
	out
}

/// Parent directory of the path. `/` and direct children of root map to
/// `/`; bare filenames and the empty string map to `"."`.
pub fn dirname(path: &str) -> String {
	if path.is_empty() {
		return ".".to_string();
	}
	let trimmed = path.trim_end_matches('/');
	if trimmed.is_empty() {
		return "/".to_string();
	}
	match trimmed.rfind('/') {
		None => ".".to_string(),
		Some(0) => "/".to_string(),
		Some(idx) => trimmed[..idx].trim_end_matches('/').to_string(),
	}
}

/// Final path component; `basename("/")` is `""`. When `ext` is given and the
/// base is strictly longer than it, a literal suffix match strips it.
pub fn basename(path: &str, ext: Option<&str>) -> String {
	let trimmed = path.trim_end_matches('/');
	if trimmed.is_empty() {
		return String::new();
	}
	let base = match trimmed.rfind('/') {
		None => trimmed,
		Some(idx) => &trimmed[idx + 1..],
	};
	if let Some(ext) = ext {
		if base.len() > ext.len() && base.ends_with(ext) {
			return base[..base.len() - ext.len()].to_string();
		}
	}
	base.to_string()
}

/// The `.suffix` of the final component. Dotfiles whose only dot leads the
/// name have no extension; a trailing dot yields `"."`.
pub fn extname(path: &str) -> String {
	let base = basename(path, None);
	if base == ".." {
		return String::new();
	}
	match base.rfind('.') {
		None | Some(0) => String::new(),
		Some(idx) => base[idx..].to_string(),
	}
}

/// Decomposition of a path into root/dir/base/name/ext.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedPath {
	pub root: String,
	pub dir: String,
	pub base: String,
	pub name: String,
	pub ext: String,
}

/// Split a path into its [`ParsedPath`] parts. `format(parse(p)) == p` for
/// any normalized `p`.
pub fn parse(path: &str) -> ParsedPath {
	if path.is_empty() {
		return ParsedPath::default();
	}
	let root = if is_absolute(path) { "/" } else { "" };
	let base = basename(path, None);
	let ext = extname(path);
	let name = base[..base.len() - ext.len()].to_string();

	let trimmed = path.trim_end_matches('/');
	let dir = if trimmed.is_empty() {
		root.to_string()
	} else {
		match trimmed.rfind('/') {
			None => String::new(),
			Some(0) => "/".to_string(),
			Some(idx) => trimmed[..idx].to_string(),
		}
	};

	ParsedPath { root: root.to_string(), dir, base, name, ext }
}

/// Reassemble a [`ParsedPath`]. `base` wins over `name` + `ext` when both
/// are present; an empty object yields `""`.
pub fn format(parsed: &ParsedPath) -> String {
	let base = if parsed.base.is_empty() {
		format!("{}{}", parsed.name, parsed.ext)
	} else {
		parsed.base.clone()
	};
	let dir = if parsed.dir.is_empty() { parsed.root.clone() } else { parsed.dir.clone() };
	if dir.is_empty() {
		return base;
	}
	if dir == parsed.root {
		format!("{dir}{base}")
	} else {
		format!("{dir}/{base}")
	}
}

/// Shortest relative walk from `from` to `to` using `..` ascents. Both
/// inputs are resolved first; identical paths yield `""`.
pub fn relative(from: &str, to: &str) -> String {
	let from = resolve(&[from]);
	let to = resolve(&[to]);
	if from == to {
		return String::new();
	}

	let from_segments: Vec<&str> = from.split('/').filter(|s| !s.is_empty()).collect();
	let to_segments: Vec<&str> = to.split('/').filter(|s| !s.is_empty()).collect();
	let common = from_segments
		.iter()
		.zip(to_segments.iter())
		.take_while(|(a, b)| a == b)
		.count();

	let mut parts: Vec<&str> = Vec::new();
	for _ in common..from_segments.len() {
		parts.push("..");
	}
	parts.extend(&to_segments[common..]);
	parts.join("/")
}

/// Split a normalized path into its non-empty segments.
pub fn segments(path: &str) -> Vec<String> {
	path.split('/').filter(|s| !s.is_empty()).map(String::from).collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_normalize_basics() {
		assert_eq!(normalize(""), ".");
		assert_eq!(normalize("/"), "/");
		assert_eq!(normalize("/a//b///c"), "/a/b/c");
		assert_eq!(normalize("/a/./b/."), "/a/b");
		assert_eq!(normalize("/a/b/../c"), "/a/c");
		assert_eq!(normalize("a/b/.."), "a");
	}

	#[test]
	fn test_normalize_never_ascends_above_root() {
		assert_eq!(normalize("/.."), "/");
		assert_eq!(normalize("/../../a"), "/a");
	}

	#[test]
	fn test_normalize_preserves_relative_parent_stack() {
		assert_eq!(normalize("../a"), "../a");
		assert_eq!(normalize("../../a/b"), "../../a/b");
		assert_eq!(normalize("a/../../b"), "../b");
	}

	#[test]
	fn test_normalize_idempotent() {
		for p in ["/a/b/../c", "../x/./y", "", "/", "a//b/", "/a/"] {
			assert_eq!(normalize(&normalize(p)), normalize(p), "input {p:?}");
		}
	}

	#[test]
	fn test_join() {
		assert_eq!(join(&[]), ".");
		assert_eq!(join(&["", ""]), ".");
		assert_eq!(join(&["/a", "b", "c"]), "/a/b/c");
		assert_eq!(join(&["a", "", "b"]), "a/b");
		assert_eq!(join(&["a", "../b"]), "b");
		assert!(!join(&["a", "b"]).contains('\\'));
	}

	#[test]
	fn test_resolve() {
		assert_eq!(resolve(&[]), "/");
		assert_eq!(resolve(&["a", "b"]), "/a/b");
		assert_eq!(resolve(&["/x", "/y", "z"]), "/y/z");
		assert_eq!(resolve(&["/a/b", "../c"]), "/a/c");
		assert!(is_absolute(&resolve(&["relative", "bits"])));
	}

	#[test]
	fn test_dirname() {
		assert_eq!(dirname("/"), "/");
		assert_eq!(dirname("/a"), "/");
		assert_eq!(dirname("/a/b"), "/a");
		assert_eq!(dirname("/a/b/"), "/a");
		assert_eq!(dirname("a"), ".");
		assert_eq!(dirname(""), ".");
	}

	#[test]
	fn test_basename() {
		assert_eq!(basename("/", None), "");
		assert_eq!(basename("/a/b.txt", None), "b.txt");
		assert_eq!(basename("/a/b/", None), "b");
		assert_eq!(basename("/a/b.txt", Some(".txt")), "b");
		// a base equal to the extension is not stripped
		assert_eq!(basename("/a/.txt", Some(".txt")), ".txt");
		assert_eq!(basename("/a/b.txt", Some(".md")), "b.txt");
	}

	#[test]
	fn test_extname() {
		assert_eq!(extname("file.txt"), ".txt");
		assert_eq!(extname("archive.tar.gz"), ".gz");
		assert_eq!(extname(".bashrc"), "");
		assert_eq!(extname("trailing."), ".");
		assert_eq!(extname("noext"), "");
		assert_eq!(extname(".."), "");
	}

	#[test]
	fn test_parse_format_roundtrip() {
		for p in ["/a/b.txt", "/a", "a", "a/b", "/", ".", "a.txt", "/a/b/.hidden"] {
			let normalized = normalize(p);
			assert_eq!(format(&parse(&normalized)), normalized, "input {p:?}");
		}
	}

	#[test]
	fn test_parse_fields() {
		let parsed = parse("/home/user/file.txt");
		assert_eq!(parsed.root, "/");
		assert_eq!(parsed.dir, "/home/user");
		assert_eq!(parsed.base, "file.txt");
		assert_eq!(parsed.name, "file");
		assert_eq!(parsed.ext, ".txt");
	}

	#[test]
	fn test_format_prefers_base() {
		let parsed = ParsedPath {
			root: "/".to_string(),
			dir: "/a".to_string(),
			base: "real.txt".to_string(),
			name: "ignored".to_string(),
			ext: ".md".to_string(),
		};
		assert_eq!(format(&parsed), "/a/real.txt");
		assert_eq!(format(&ParsedPath::default()), "");
	}

	#[test]
	fn test_relative() {
		assert_eq!(relative("/a/b", "/a/b"), "");
		assert_eq!(relative("/a/b", "/a/b/c"), "c");
		assert_eq!(relative("/a/b", "/a/c"), "../c");
		assert_eq!(relative("/a/b/c", "/x"), "../../../x");
	}
}
