//! Glob and sparse-pattern engine
//!
//! Parses gitignore-compatible patterns, compiles them into segment
//! matchers, and evaluates them with bounded per-checker caches. Supports
//! negation, rooted and directory-only patterns, brace alternation within a
//! segment, `**` spanning, cone mode, and directory-pruning traversal hints.

pub mod checker;
pub mod compile;
pub mod parse;

pub use checker::{
	IncludeChecker, IncludeCheckerOptions, PatternSet, DEFAULT_DECISION_CACHE_SIZE,
};
pub use compile::{CompiledPattern, MatcherCache};
pub use parse::{parse_lines, ParsedPattern};
