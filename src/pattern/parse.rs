//! Parsing of gitignore-style patterns
//!
//! Parsing validates and decomposes a pattern; compilation into a matcher
//! lives in [`super::compile`]. Invalid patterns fail here, at construction,
//! so runtime matching never fails.

use crate::error::{FsError, Result};

/// A parsed (not yet compiled) pattern.
///
/// Flags follow gitignore: a leading unescaped `!` negates (consecutive `!`s
/// toggle), a leading `/` anchors to the root, a trailing `/` restricts the
/// pattern to directories. A pattern with an inner `/` or a `**` matches
/// whole paths; otherwise it matches basenames at any depth. Non-directory
/// path patterns match exactly; subtree containment takes a trailing `/` or
/// an explicit `/**`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPattern {
	/// The pattern text as written, before any stripping.
	pub original: String,
	pub negated: bool,
	pub rooted: bool,
	pub directory_only: bool,
	/// Pattern body after `!`/`/` stripping, segments joined by `/`.
	pub normalized: String,
	pub segments: Vec<String>,
}

impl ParsedPattern {
	pub fn parse(input: &str) -> Result<Self> {
		let trimmed = input.trim();
		if trimmed.is_empty() {
			return Err(FsError::invalid_pattern(input, "empty or whitespace-only pattern"));
		}

		let mut rest = trimmed;
		let mut negated = false;
		while let Some(stripped) = rest.strip_prefix('!') {
			negated = !negated;
			rest = stripped;
		}

		// \! and \# are literal escapes at the head of the pattern
		if rest.starts_with("\\!") || rest.starts_with("\\#") {
			rest = &rest[1..];
		}

		if rest.contains("***") {
			return Err(FsError::invalid_pattern(input, "more than two consecutive stars"));
		}

		let mut directory_only = false;
		if rest.len() > 1 && rest.ends_with('/') {
			directory_only = true;
			rest = rest.trim_end_matches('/');
		}

		let mut rooted = false;
		if let Some(stripped) = rest.strip_prefix('/') {
			rooted = true;
			rest = stripped;
		}

		let segments: Vec<String> =
			rest.split('/').filter(|s| !s.is_empty()).map(String::from).collect();
		if segments.is_empty() {
			return Err(FsError::invalid_pattern(input, "pattern has no content"));
		}

		Ok(Self {
			original: input.to_string(),
			negated,
			rooted,
			directory_only,
			normalized: segments.join("/"),
			segments,
		})
	}

	/// Basename patterns (no slash, no `**`) match any path segment rather
	/// than the whole path.
	pub fn is_basename_style(&self) -> bool {
		!self.rooted && self.segments.len() == 1 && self.segments[0] != "**"
	}

	/// Whether the normalized body contains glob metacharacters.
	pub fn has_wildcards(&self) -> bool {
		self.normalized.chars().any(|c| matches!(c, '*' | '?' | '[' | '{'))
	}
}

/// Parse a multi-line pattern source: blank lines and `#` comments are
/// skipped (`\#` escapes a literal hash).
pub fn parse_lines(text: &str) -> Result<Vec<ParsedPattern>> {
	let mut patterns = Vec::new();
	for line in text.lines() {
		let line = line.trim();
		if line.is_empty() || line.starts_with('#') {
			continue;
		}
		patterns.push(ParsedPattern::parse(line)?);
	}
	Ok(patterns)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_parse_plain() {
		let p = ParsedPattern::parse("src/lib.rs").unwrap();
		assert!(!p.negated);
		assert!(!p.rooted);
		assert!(!p.directory_only);
		assert_eq!(p.segments, vec!["src", "lib.rs"]);
		assert!(!p.is_basename_style());
	}

	#[test]
	fn test_parse_negation_toggles() {
		assert!(ParsedPattern::parse("!build").unwrap().negated);
		assert!(!ParsedPattern::parse("!!build").unwrap().negated);
		assert!(ParsedPattern::parse("!!!build").unwrap().negated);
	}

	#[test]
	fn test_parse_escapes() {
		let p = ParsedPattern::parse("\\!important").unwrap();
		assert!(!p.negated);
		assert_eq!(p.normalized, "!important");

		let p = ParsedPattern::parse("\\#notes.md").unwrap();
		assert_eq!(p.normalized, "#notes.md");
	}

	#[test]
	fn test_parse_rooted_and_directory_only() {
		let p = ParsedPattern::parse("/src/").unwrap();
		assert!(p.rooted);
		assert!(p.directory_only);
		assert_eq!(p.normalized, "src");
	}

	#[test]
	fn test_parse_rejects_empty_and_triple_star() {
		assert!(ParsedPattern::parse("").is_err());
		assert!(ParsedPattern::parse("   ").is_err());
		assert!(ParsedPattern::parse("/").is_err());
		assert!(ParsedPattern::parse("!").is_err());
		assert!(ParsedPattern::parse("a***b").is_err());
		assert!(ParsedPattern::parse("***").is_err());
	}

	#[test]
	fn test_basename_style() {
		assert!(ParsedPattern::parse("node_modules").unwrap().is_basename_style());
		assert!(ParsedPattern::parse("*.log").unwrap().is_basename_style());
		assert!(!ParsedPattern::parse("/node_modules").unwrap().is_basename_style());
		assert!(!ParsedPattern::parse("a/b").unwrap().is_basename_style());
		assert!(!ParsedPattern::parse("**").unwrap().is_basename_style());
	}

	#[test]
	fn test_parse_lines_skips_blanks_and_comments() {
		let text = "\n# a comment\n*.log\n\n!keep.log\n\\#literal\n";
		let patterns = parse_lines(text).unwrap();
		assert_eq!(patterns.len(), 3);
		assert_eq!(patterns[0].normalized, "*.log");
		assert!(patterns[1].negated);
		assert_eq!(patterns[2].normalized, "#literal");
	}
}
