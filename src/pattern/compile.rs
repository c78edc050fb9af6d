//! Compilation of parsed patterns into segment matchers
//!
//! A pattern compiles to a list of per-segment matchers; `**` is kept as a
//! structural element so the matcher can walk path segments directly. Segment
//! regexes are cached in a bounded per-checker cache keyed by their glob
//! source, so repeated pattern bodies compile once.

use std::sync::Arc;

use moka::sync::Cache;
use regex::Regex;

use crate::error::{FsError, Result};
use crate::pattern::parse::ParsedPattern;

/// Bounded cache of compiled segment regexes. One instance per checker;
/// rebuilding the checker rebuilds the cache (no cross-tenant sharing).
pub struct MatcherCache {
	cache: Cache<String, Arc<Regex>>,
}

impl MatcherCache {
	pub fn new(capacity: u64) -> Self {
		Self { cache: Cache::builder().max_capacity(capacity).build() }
	}

	fn compile(&self, glob_segment: &str) -> Result<Arc<Regex>> {
		if let Some(hit) = self.cache.get(glob_segment) {
			return Ok(hit);
		}
		let source = format!("^{}$", translate_fragment(glob_segment)?);
		let regex = Regex::new(&source).map_err(|e| {
			FsError::invalid_pattern(glob_segment, format!("segment does not compile: {e}"))
		})?;
		let regex = Arc::new(regex);
		self.cache.insert(glob_segment.to_string(), regex.clone());
		Ok(regex)
	}
}

/// Matcher for a single path segment.
#[derive(Debug, Clone)]
pub struct SegmentMatcher {
	regex: Arc<Regex>,
	/// Standard dotfile rule: a segment pattern opening with a wildcard
	/// never matches a name that starts with `.`.
	deny_leading_dot: bool,
}

impl SegmentMatcher {
	pub fn matches(&self, segment: &str) -> bool {
		if self.deny_leading_dot && segment.starts_with('.') {
			return false;
		}
		self.regex.is_match(segment)
	}
}

/// One element of a compiled path pattern.
#[derive(Debug, Clone)]
pub enum CompiledSegment {
	/// `**`: zero or more whole segments (at least one when trailing).
	DoubleStar,
	One(SegmentMatcher),
}

/// How a compiled pattern applies to a path.
#[derive(Debug, Clone)]
enum MatchStyle {
	/// Single-segment pattern without `/` or `**`: matches any segment.
	Basename(SegmentMatcher),
	/// Anchored pattern matched against the full segment list.
	Path(Vec<CompiledSegment>),
}

/// A parsed pattern together with its compiled matcher.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
	pub parsed: ParsedPattern,
	style: MatchStyle,
}

impl CompiledPattern {
	pub fn compile(parsed: ParsedPattern, cache: &MatcherCache) -> Result<Self> {
		let style = if parsed.is_basename_style() {
			MatchStyle::Basename(segment_matcher(&parsed.segments[0], cache)?)
		} else {
			let mut compiled = Vec::with_capacity(parsed.segments.len());
			for segment in &parsed.segments {
				if segment == "**" {
					compiled.push(CompiledSegment::DoubleStar);
				} else {
					compiled.push(CompiledSegment::One(segment_matcher(segment, cache)?));
				}
			}
			MatchStyle::Path(compiled)
		};
		Ok(Self { parsed, style })
	}

	/// Evaluate the pattern against a path given as segments. `is_dir`
	/// resolves directory-only patterns when the path itself names a
	/// directory.
	pub fn matches(&self, path_segments: &[String], is_dir: bool) -> bool {
		match &self.style {
			MatchStyle::Basename(matcher) => {
				let last = path_segments.len().saturating_sub(1);
				path_segments.iter().enumerate().any(|(idx, segment)| {
					if !matcher.matches(segment) {
						return false;
					}
					if !self.parsed.directory_only {
						return true;
					}
					// a directory-only match on the final segment needs the
					// path to actually be a directory
					idx < last || is_dir
				})
			}
			MatchStyle::Path(pattern) => {
				if !self.parsed.directory_only {
					return match_segments(pattern, path_segments);
				}
				for prefix_len in 1..=path_segments.len() {
					if match_segments(pattern, &path_segments[..prefix_len]) {
						return prefix_len < path_segments.len() || is_dir;
					}
				}
				false
			}
		}
	}

	/// Whether some path strictly below `dir_segments` could match. Used for
	/// traversal pruning; over-approximation is fine, under-approximation is
	/// not.
	pub fn could_match_under(&self, dir_segments: &[String]) -> bool {
		match &self.style {
			MatchStyle::Basename(_) => true,
			MatchStyle::Path(pattern) => prefix_compatible(
				pattern,
				dir_segments,
				self.parsed.directory_only,
			),
		}
	}

	/// Whether this pattern excludes everything beneath `dir_segments`:
	/// a directory pattern matching the dir, a basename hit on any of its
	/// segments, or a trailing-`**` pattern whose prefix names the dir.
	pub fn excludes_subtree(&self, dir_segments: &[String]) -> bool {
		if self.parsed.directory_only {
			return self.matches(dir_segments, true);
		}
		match &self.style {
			MatchStyle::Basename(matcher) => {
				dir_segments.iter().any(|segment| matcher.matches(segment))
			}
			MatchStyle::Path(pattern) => match pattern.last() {
				Some(CompiledSegment::DoubleStar) if pattern.len() > 1 => {
					match_segments(&pattern[..pattern.len() - 1], dir_segments)
				}
				_ => false,
			},
		}
	}

	/// Literal single-segment patterns are indexable for O(1) directory
	/// pruning (the `node_modules` case).
	pub fn literal_basename(&self) -> Option<&str> {
		if self.parsed.is_basename_style() && !self.parsed.has_wildcards() {
			Some(&self.parsed.normalized)
		} else {
			None
		}
	}
}

fn segment_matcher(glob_segment: &str, cache: &MatcherCache) -> Result<SegmentMatcher> {
	let regex = cache.compile(glob_segment)?;
	let deny_leading_dot = matches!(glob_segment.chars().next(), Some('*' | '?' | '['));
	Ok(SegmentMatcher { regex, deny_leading_dot })
}

fn match_segments(pattern: &[CompiledSegment], segments: &[String]) -> bool {
	match pattern.first() {
		None => segments.is_empty(),
		Some(CompiledSegment::DoubleStar) => {
			if pattern.len() == 1 {
				// trailing ** names the contents, not the prefix itself
				return !segments.is_empty();
			}
			(0..=segments.len()).any(|skip| match_segments(&pattern[1..], &segments[skip..]))
		}
		Some(CompiledSegment::One(matcher)) => {
			!segments.is_empty()
				&& matcher.matches(&segments[0])
				&& match_segments(&pattern[1..], &segments[1..])
		}
	}
}

fn prefix_compatible(
	pattern: &[CompiledSegment], dir_segments: &[String], directory_only: bool,
) -> bool {
	match pattern.first() {
		// pattern exhausted at or above the directory: only a directory
		// pattern keeps matching below it
		None => directory_only,
		Some(_) if dir_segments.is_empty() => true,
		Some(CompiledSegment::DoubleStar) => true,
		Some(CompiledSegment::One(matcher)) => {
			matcher.matches(&dir_segments[0])
				&& prefix_compatible(&pattern[1..], &dir_segments[1..], directory_only)
		}
	}
}

/// Translate one glob fragment (no `/`) into regex source. Character classes
/// pass through with `!` mapped to `^`; brace alternations become
/// non-capturing groups, recursively; unbalanced `[` or `{` stay literal.
fn translate_fragment(fragment: &str) -> Result<String> {
	let chars: Vec<char> = fragment.chars().collect();
	translate_chars(&chars)
}

fn translate_chars(chars: &[char]) -> Result<String> {
	let mut out = String::new();
	let mut i = 0;
	while i < chars.len() {
		match chars[i] {
			'*' => {
				out.push_str("[^/]*");
				i += 1;
			}
			'?' => {
				out.push_str("[^/]");
				i += 1;
			}
			'\\' if i + 1 < chars.len() => {
				push_literal(&mut out, chars[i + 1]);
				i += 2;
			}
			'[' => match scan_class(chars, i) {
				Some((class_source, next)) => {
					out.push_str(&class_source);
					i = next;
				}
				None => {
					out.push_str("\\[");
					i += 1;
				}
			},
			'{' => match scan_brace(chars, i) {
				Some((alternatives, next)) => {
					let mut translated = Vec::with_capacity(alternatives.len());
					for alt in &alternatives {
						translated.push(translate_chars(alt)?);
					}
					out.push_str("(?:");
					out.push_str(&translated.join("|"));
					out.push(')');
					i = next;
				}
				None => {
					out.push_str("\\{");
					i += 1;
				}
			},
			c => {
				push_literal(&mut out, c);
				i += 1;
			}
		}
	}
	Ok(out)
}

fn push_literal(out: &mut String, c: char) {
	let mut buf = [0u8; 4];
	out.push_str(&regex::escape(c.encode_utf8(&mut buf)));
}

/// Scan a `[...]` class starting at `start`. Returns the regex class source
/// and the index just past the closing `]`, or `None` when unclosed.
fn scan_class(chars: &[char], start: usize) -> Option<(String, usize)> {
	let mut i = start + 1;
	let mut negated = false;
	if i < chars.len() && (chars[i] == '!' || chars[i] == '^') {
		negated = true;
		i += 1;
	}
	let mut body = String::new();
	// a leading ] is a literal member
	if i < chars.len() && chars[i] == ']' {
		body.push_str("\\]");
		i += 1;
	}
	while i < chars.len() && chars[i] != ']' {
		match chars[i] {
			'\\' | '^' | ']' | '[' => {
				body.push('\\');
				body.push(chars[i]);
			}
			c => body.push(c),
		}
		i += 1;
	}
	if i >= chars.len() || body.is_empty() {
		return None;
	}
	let source = if negated { format!("[^/{body}]") } else { format!("[{body}]") };
	Some((source, i + 1))
}

/// Scan a balanced `{a,b,...}` alternation starting at `start`. Commas at
/// nesting depth one separate alternatives; nested braces stay intact for
/// recursive translation.
fn scan_brace(chars: &[char], start: usize) -> Option<(Vec<Vec<char>>, usize)> {
	let mut depth = 0usize;
	let mut alternatives: Vec<Vec<char>> = vec![Vec::new()];
	let mut i = start;
	while i < chars.len() {
		match chars[i] {
			'{' => {
				depth += 1;
				if depth > 1 {
					alternatives.last_mut().unwrap().push('{');
				}
			}
			'}' => {
				depth -= 1;
				if depth == 0 {
					return Some((alternatives, i + 1));
				}
				alternatives.last_mut().unwrap().push('}');
			}
			',' if depth == 1 => alternatives.push(Vec::new()),
			c => alternatives.last_mut().unwrap().push(c),
		}
		i += 1;
	}
	None
}

#[cfg(test)]
mod tests {
	use super::*;

	fn compile(pattern: &str) -> CompiledPattern {
		let cache = MatcherCache::new(100);
		CompiledPattern::compile(ParsedPattern::parse(pattern).unwrap(), &cache).unwrap()
	}

	fn segs(path: &str) -> Vec<String> {
		path.split('/').filter(|s| !s.is_empty()).map(String::from).collect()
	}

	#[test]
	fn test_star_within_segment() {
		let p = compile("*.txt");
		assert!(p.matches(&segs("notes.txt"), false));
		assert!(p.matches(&segs("deep/dir/notes.txt"), false));
		assert!(!p.matches(&segs("notes.md"), false));
	}

	#[test]
	fn test_star_does_not_match_dotfiles() {
		let p = compile("*.txt");
		assert!(!p.matches(&segs(".txt"), false));
		let q = compile("*");
		assert!(!q.matches(&segs(".hidden"), false));
		// an explicit leading dot matches fine
		let r = compile(".env*");
		assert!(r.matches(&segs(".env.local"), false));
	}

	#[test]
	fn test_question_mark() {
		let p = compile("file.?s");
		assert!(p.matches(&segs("file.rs"), false));
		assert!(p.matches(&segs("file.js"), false));
		assert!(!p.matches(&segs("file.tsx"), false));
	}

	#[test]
	fn test_double_star_spans_segments() {
		let p = compile("**/*.ext");
		assert!(p.matches(&segs("a.ext"), false));
		assert!(p.matches(&segs("a/b/c.ext"), false));
		let deep = "a/".repeat(16) + "leaf.ext";
		assert!(p.matches(&segs(&deep), false));
	}

	#[test]
	fn test_double_star_middle_and_trailing() {
		let p = compile("a/**/b");
		assert!(p.matches(&segs("a/b"), false));
		assert!(p.matches(&segs("a/x/y/b"), false));
		assert!(!p.matches(&segs("a"), false));

		let q = compile("a/**");
		assert!(q.matches(&segs("a/x"), false));
		assert!(q.matches(&segs("a/x/y"), false));
		assert!(!q.matches(&segs("a"), false));
	}

	#[test]
	fn test_character_classes() {
		let p = compile("file[0-9].rs");
		assert!(p.matches(&segs("file3.rs"), false));
		assert!(!p.matches(&segs("fileA.rs"), false));

		let n = compile("file[!0-9].rs");
		assert!(n.matches(&segs("fileA.rs"), false));
		assert!(!n.matches(&segs("file3.rs"), false));

		let dash = compile("[-ab]x");
		assert!(dash.matches(&segs("-x"), false));
		assert!(dash.matches(&segs("ax"), false));
	}

	#[test]
	fn test_brace_alternation() {
		let p = compile("*.{rs,toml}");
		assert!(p.matches(&segs("main.rs"), false));
		assert!(p.matches(&segs("Cargo.toml"), false));
		assert!(!p.matches(&segs("readme.md"), false));

		let nested = compile("img.{png,jp{g,eg}}");
		assert!(nested.matches(&segs("img.png"), false));
		assert!(nested.matches(&segs("img.jpg"), false));
		assert!(nested.matches(&segs("img.jpeg"), false));
		assert!(!nested.matches(&segs("img.gif"), false));
	}

	#[test]
	fn test_basename_matches_any_segment() {
		let p = compile("node_modules");
		assert!(p.matches(&segs("node_modules"), true));
		assert!(p.matches(&segs("a/node_modules/b/index.js"), false));
		assert!(!p.matches(&segs("a/b/index.js"), false));
	}

	#[test]
	fn test_directory_only() {
		let p = compile("build/");
		assert!(p.matches(&segs("build/out.o"), false));
		assert!(p.matches(&segs("build"), true));
		assert!(!p.matches(&segs("build"), false));

		let rooted = compile("/target/");
		assert!(rooted.matches(&segs("target/debug/app"), false));
		assert!(!rooted.matches(&segs("nested/target/debug/app"), false));
	}

	#[test]
	fn test_rooted_exact() {
		let p = compile("/src/lib.rs");
		assert!(p.matches(&segs("src/lib.rs"), false));
		assert!(!p.matches(&segs("other/src/lib.rs"), false));
	}

	#[test]
	fn test_case_sensitive() {
		let p = compile("README");
		assert!(p.matches(&segs("README"), false));
		assert!(!p.matches(&segs("readme"), false));
	}

	#[test]
	fn test_could_match_under() {
		let p = compile("packages/core/src/**");
		assert!(p.could_match_under(&segs("packages")));
		assert!(p.could_match_under(&segs("packages/core")));
		assert!(p.could_match_under(&segs("packages/core/src")));
		assert!(!p.could_match_under(&segs("packages/other")));

		let q = compile("**/*.rs");
		assert!(q.could_match_under(&segs("any/depth/at/all")));

		// an exact file pattern cannot match below itself
		let r = compile("a/b");
		assert!(r.could_match_under(&segs("a")));
		assert!(!r.could_match_under(&segs("a/b")));

		// a directory pattern keeps matching below itself
		let d = compile("a/b/");
		assert!(d.could_match_under(&segs("a/b")));
		assert!(d.could_match_under(&segs("a/b/c")));
	}

	#[test]
	fn test_excludes_subtree() {
		let p = compile("**/test/**");
		assert!(p.excludes_subtree(&segs("src/test")));
		assert!(!p.excludes_subtree(&segs("src/other")));

		let b = compile("node_modules");
		assert!(b.excludes_subtree(&segs("a/node_modules")));
		assert!(!b.excludes_subtree(&segs("a/src")));

		let d = compile("build/");
		assert!(d.excludes_subtree(&segs("build")));
		assert!(d.excludes_subtree(&segs("build/nested")));
	}

	#[test]
	fn test_literal_basename_index() {
		assert_eq!(compile("node_modules").literal_basename(), Some("node_modules"));
		assert_eq!(compile("*.log").literal_basename(), None);
		assert_eq!(compile("a/b").literal_basename(), None);
	}

	#[test]
	fn test_unbalanced_brackets_are_literal() {
		let p = compile("a[b");
		assert!(p.matches(&segs("a[b"), false));
		let q = compile("a{b");
		assert!(q.matches(&segs("a{b"), false));
	}
}
