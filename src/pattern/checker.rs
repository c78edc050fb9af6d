//! Include/exclude evaluation with cached decisions
//!
//! A checker is built once from its pattern lists and is immutable after
//! construction; changing patterns means building a new checker, which is
//! what keeps the decision caches trivially consistent.

use std::collections::HashSet;

use moka::sync::Cache;

use crate::error::Result;
use crate::path;
use crate::pattern::compile::{CompiledPattern, MatcherCache};
use crate::pattern::parse::ParsedPattern;

/// Default capacity of the per-checker decision caches.
pub const DEFAULT_DECISION_CACHE_SIZE: u64 = 10_000;

/// Default capacity of the per-checker compiled-matcher cache.
pub const DEFAULT_MATCHER_CACHE_SIZE: u64 = 1_000;

/// An ordered, immutable list of compiled patterns evaluated with
/// last-match-wins semantics.
#[derive(Debug, Clone)]
pub struct PatternSet {
	patterns: Vec<CompiledPattern>,
}

impl PatternSet {
	pub fn compile(sources: &[String], cache: &MatcherCache) -> Result<Self> {
		let mut patterns = Vec::with_capacity(sources.len());
		for source in sources {
			let parsed = ParsedPattern::parse(source)?;
			patterns.push(CompiledPattern::compile(parsed, cache)?);
		}
		Ok(Self { patterns })
	}

	pub fn is_empty(&self) -> bool {
		self.patterns.is_empty()
	}

	pub fn patterns(&self) -> &[CompiledPattern] {
		&self.patterns
	}

	/// Replay the set in declaration order: a match sets the tentative
	/// decision to its polarity; the final tentative decision wins. `None`
	/// when nothing matched.
	pub fn evaluate(&self, segments: &[String], is_dir: bool) -> Option<bool> {
		let mut decision = None;
		for pattern in &self.patterns {
			if pattern.matches(segments, is_dir) {
				decision = Some(!pattern.parsed.negated);
			}
		}
		decision
	}
}

/// Options for building an [`IncludeChecker`].
#[derive(Debug, Clone, Default)]
pub struct IncludeCheckerOptions {
	pub patterns: Vec<String>,
	pub exclude_patterns: Vec<String>,
	/// Restrict `patterns` to directory prefixes with ancestor-inclusion
	/// semantics.
	pub cone: bool,
	/// Capacity of the two decision caches (default 10,000).
	pub cache_size: Option<u64>,
}

impl IncludeCheckerOptions {
	pub fn with_patterns<I, S>(patterns: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self { patterns: patterns.into_iter().map(Into::into).collect(), ..Self::default() }
	}
}

/// Cone-mode pattern set: plain directory prefixes, no wildcards.
#[derive(Debug, Clone)]
struct ConeSet {
	dirs: Vec<Vec<String>>,
}

impl ConeSet {
	fn parse(patterns: &[String]) -> Result<Self> {
		let mut dirs = Vec::with_capacity(patterns.len());
		for pattern in patterns {
			let trimmed = pattern.trim();
			if trimmed.is_empty() {
				return Err(crate::error::FsError::invalid_pattern(
					pattern.as_str(),
					"empty cone pattern",
				));
			}
			if trimmed.chars().any(|c| matches!(c, '*' | '?' | '[' | ']' | '{' | '}' | '!')) {
				return Err(crate::error::FsError::invalid_pattern(
					pattern.as_str(),
					"wildcards are not allowed in cone mode",
				));
			}
			let segments = path::segments(trimmed);
			if segments.is_empty() {
				return Err(crate::error::FsError::invalid_pattern(
					pattern.as_str(),
					"cone pattern has no content",
				));
			}
			dirs.push(segments);
		}
		Ok(Self { dirs })
	}

	/// Top-level files, files under a cone, and immediate children of any
	/// ancestor of a cone are in; everything else is out.
	fn includes(&self, segments: &[String]) -> bool {
		if segments.len() <= 1 {
			return true;
		}
		let parent = &segments[..segments.len() - 1];
		self.dirs.iter().any(|dir| {
			starts_with(segments, dir) || (dir.len() > parent.len() && starts_with(dir, parent))
		})
	}

	fn traversable(&self, segments: &[String]) -> bool {
		self.dirs
			.iter()
			.any(|dir| starts_with(segments, dir) || starts_with(dir, segments))
	}
}

fn starts_with(haystack: &[String], prefix: &[String]) -> bool {
	haystack.len() >= prefix.len() && haystack[..prefix.len()] == *prefix
}

/// A configured pattern-matching object carrying caches.
///
/// `should_include` is "matches the include set AND not matched-out by the
/// exclude set under negation-aware evaluation". An empty include list
/// includes everything.
pub struct IncludeChecker {
	includes: PatternSet,
	excludes: PatternSet,
	cone: Option<ConeSet>,
	exclude_has_negation: bool,
	/// Literal basenames from non-negated excludes, for O(1) pruning.
	excluded_basenames: HashSet<String>,
	include_cache: Cache<String, bool>,
	traverse_cache: Cache<String, bool>,
}

impl IncludeChecker {
	pub fn new(options: IncludeCheckerOptions) -> Result<Self> {
		let matcher_cache = MatcherCache::new(DEFAULT_MATCHER_CACHE_SIZE);

		let (includes, cone) = if options.cone {
			(PatternSet { patterns: Vec::new() }, Some(ConeSet::parse(&options.patterns)?))
		} else {
			(PatternSet::compile(&options.patterns, &matcher_cache)?, None)
		};
		let excludes = PatternSet::compile(&options.exclude_patterns, &matcher_cache)?;

		let exclude_has_negation = excludes.patterns.iter().any(|p| p.parsed.negated);
		let excluded_basenames = excludes
			.patterns
			.iter()
			.filter(|p| !p.parsed.negated)
			.filter_map(|p| p.literal_basename().map(str::to_string))
			.collect();

		let cache_size = options.cache_size.unwrap_or(DEFAULT_DECISION_CACHE_SIZE);
		Ok(Self {
			includes,
			excludes,
			cone,
			exclude_has_negation,
			excluded_basenames,
			include_cache: Cache::builder().max_capacity(cache_size).build(),
			traverse_cache: Cache::builder().max_capacity(cache_size).build(),
		})
	}

	/// Whether a (file) path is visible under this checker.
	pub fn should_include(&self, raw_path: &str) -> bool {
		let key = normalize_rel(raw_path);
		if let Some(hit) = self.include_cache.get(&key) {
			return hit;
		}
		let segments = path::segments(&key);
		let decision = self.decide_include(&segments);
		self.include_cache.insert(key, decision);
		decision
	}

	/// Whether a traversal could find anything visible at or beneath `dir`.
	pub fn should_traverse_directory(&self, raw_dir: &str) -> bool {
		let key = normalize_rel(raw_dir);
		if key.is_empty() {
			return true;
		}
		if let Some(hit) = self.traverse_cache.get(&key) {
			return hit;
		}
		let segments = path::segments(&key);
		let decision = self.decide_traverse(&segments);
		self.traverse_cache.insert(key, decision);
		decision
	}

	fn decide_include(&self, segments: &[String]) -> bool {
		if segments.is_empty() {
			return true;
		}
		let included = match &self.cone {
			Some(cone) => cone.includes(segments),
			None => {
				self.includes.is_empty()
					|| self.includes.evaluate(segments, false).unwrap_or(false)
			}
		};
		if !included {
			return false;
		}
		self.excludes.evaluate(segments, false) != Some(true)
	}

	fn decide_traverse(&self, segments: &[String]) -> bool {
		// O(1) basename prune: sound only when no negation could re-include
		if !self.exclude_has_negation {
			if let Some(last) = segments.last() {
				if self.excluded_basenames.contains(last.as_str()) {
					return false;
				}
			}
		}

		let include_side = match &self.cone {
			Some(cone) => cone.traversable(segments),
			None => {
				self.includes.is_empty()
					|| self.includes.patterns.iter().any(|p| {
						!p.parsed.negated
							&& (p.could_match_under(segments) || p.matches(segments, true))
					})
			}
		};
		if !include_side {
			return false;
		}

		// last-match-wins over "the dir or its whole subtree is excluded"
		let mut excluded = false;
		for pattern in &self.excludes.patterns {
			if pattern.matches(segments, true)
				|| (!pattern.parsed.negated && pattern.excludes_subtree(segments))
			{
				excluded = !pattern.parsed.negated;
			}
		}
		if excluded {
			// fully excluded unless a negation further down can re-include
			return self
				.excludes
				.patterns
				.iter()
				.any(|p| p.parsed.negated && p.could_match_under(segments));
		}
		true
	}
}

impl std::fmt::Debug for IncludeChecker {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("IncludeChecker")
			.field("includes", &self.includes.patterns.len())
			.field("excludes", &self.excludes.patterns.len())
			.field("cone", &self.cone.is_some())
			.finish()
	}
}

fn normalize_rel(raw: &str) -> String {
	let normalized = path::normalize(raw);
	normalized.trim_matches('/').to_string()
}
