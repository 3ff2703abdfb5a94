//! A static-analysis core for triaging VBA macros: normalizes a macro
//! stream's source, parses it into an AST, and symbolically emulates it to
//! surface the actions a real run would have taken (process launches,
//! downloads, registry writes, file drops) without ever running untrusted
//! code.
//!
//! [`Engine`] is the facade every collaborator drives. It ties together:
//! - [`normalizer`] — the five-pass source rewrite (spec component A)
//! - [`parser`] — the grammar and memoized recursive-descent matcher (component B)
//! - [`ast`] — the node set both of the above produce and consume (component C)
//! - [`value`] and [`env`] — the symbolic runtime domain (component D)
//! - [`interpreter`] — the tree-walking emulator and builtin library (component E)

pub mod ast;
pub mod config;
pub mod context;
pub mod env;
pub mod error;
pub mod interpreter;
pub mod normalizer;
pub mod parser;
pub mod value;

use ast::Module;
use config::Config;
use context::{AnalysisContext, DocumentContext, MacroStream};
use error::{EngineError, ParseFailure};
use interpreter::actions::Action;
use interpreter::Emulator;
use parser::VbaParser;

/// Everything [`Engine::analyze_document`] produces (spec §6 "Outputs")
pub struct DocumentAnalysis {
    pub actions: Vec<Action>,
    pub expressions: Vec<(String, String)>,
    pub parse_failures: Vec<ParseFailure>,
}

/// The facade a collaborator (container extractor, CLI, reporting layer)
/// drives. Owns nothing but its configuration — every analysis run takes its
/// document fresh, so nothing leaks between documents (spec §5 "Shared resources").
pub struct Engine {
    config: Config,
}

impl Engine {
    pub fn new(config: Config) -> Self {
        Engine { config }
    }

    /// Normalizes and parses a single stream's source in isolation, without
    /// emulating it. Useful for tooling that only wants the AST, or for a
    /// caller that parses streams itself before handing modules elsewhere.
    pub fn analyze_module(&self, stream_name: &str, source: &str) -> Result<Module, EngineError> {
        let normalized = normalizer::normalize(source, self.config.strip_useless);
        let mut parser = VbaParser::new(self.config.packrat_cache_size);
        parser.parse_module(stream_name, stream_name, &normalized)
    }

    /// Normalizes, parses, and emulates every stream belonging to `document`,
    /// returning the accumulated action log, the constant-expression scan,
    /// and any per-stream parse failures. A stream that fails to parse is
    /// dropped from emulation; the rest proceed (spec §7).
    pub fn analyze_document(&self, document: DocumentContext) -> DocumentAnalysis {
        let parsed = self.parse_streams(&document);
        let mut modules = Vec::with_capacity(parsed.len());
        let mut parse_failures = Vec::new();
        for result in parsed {
            match result {
                Ok(module) => modules.push(module),
                Err(e) => parse_failures.push(failure_from_error(e)),
            }
        }

        let expressions = interpreter::constfold::scan_expressions(&modules);

        let mut analysis = AnalysisContext::new(self.config.clone(), document);
        for failure in &parse_failures {
            analysis.record_parse_failure(failure.clone());
        }
        let emulator = Emulator::new(&modules, &mut analysis);
        let actions = emulator.run().into_entries();

        DocumentAnalysis { actions, expressions, parse_failures }
    }

    /// Expression-scan mode (spec §6): parses every stream but never builds
    /// an emulator, returning only the side-effect-free constant expressions
    /// found along the way
    pub fn scan_expressions(&self, document: &DocumentContext) -> Vec<(String, String)> {
        let modules: Vec<Module> = self
            .parse_streams(document)
            .into_iter()
            .filter_map(Result::ok)
            .collect();
        interpreter::constfold::scan_expressions(&modules)
    }

    fn parse_streams(&self, document: &DocumentContext) -> Vec<Result<Module, EngineError>> {
        if self.config.parallel_parse && document.streams.len() > 1 {
            self.parse_streams_parallel(document)
        } else {
            document.streams.iter().map(|s| self.parse_one(s)).collect()
        }
    }

    fn parse_one(&self, stream: &MacroStream) -> Result<Module, EngineError> {
        let normalized = normalizer::normalize(&stream.source_text, self.config.strip_useless);
        let mut parser = VbaParser::new(self.config.packrat_cache_size);
        parser.parse_module(&stream.stream_path, &stream.vba_filename, &normalized)
    }

    /// Parses every stream in a worker sized to the machine's CPU count —
    /// each worker's [`VbaParser`] owns its own memoization cache, never
    /// shared across threads (spec §5)
    fn parse_streams_parallel(&self, document: &DocumentContext) -> Vec<Result<Module, EngineError>> {
        let stream_count = document.streams.len();
        let worker_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(stream_count.max(1));
        let mut buckets: Vec<Vec<usize>> = vec![Vec::new(); worker_count];
        for i in 0..stream_count {
            buckets[i % worker_count].push(i);
        }
        let mut out: Vec<Option<Result<Module, EngineError>>> = (0..stream_count).map(|_| None).collect();
        std::thread::scope(|scope| {
            let handles: Vec<_> = buckets
                .iter()
                .map(|bucket| {
                    scope.spawn(move || {
                        bucket
                            .iter()
                            .map(|&i| (i, self.parse_one(&document.streams[i])))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            for handle in handles {
                for (i, result) in handle.join().expect("parser worker panicked") {
                    out[i] = Some(result);
                }
            }
        });
        out.into_iter().map(|o| o.expect("every index assigned exactly once")).collect()
    }
}

fn failure_from_error(e: EngineError) -> ParseFailure {
    match e {
        EngineError::Parse { stream, line, column, message } => ParseFailure { stream, line, column, message },
        other => ParseFailure { stream: String::new(), line: 0, column: 0, message: other.to_string() },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use context::MacroStream;

    fn stream(path: &str, source: &str) -> MacroStream {
        MacroStream {
            subfilename: "doc.bin".to_string(),
            stream_path: path.to_string(),
            vba_filename: path.to_string(),
            source_text: source.to_string(),
        }
    }

    #[test]
    fn analyze_module_normalizes_before_parsing() {
        let engine = Engine::new(Config::default());
        let module = engine
            .analyze_module("M", "Attribute VB_Name = \"M\"\nSub AutoOpen()\nEnd Sub\n")
            .expect("should parse after attribute line is stripped");
        assert!(module.find_procedure("AutoOpen").is_some());
    }

    #[test]
    fn analyze_document_runs_entry_points_and_reports_parse_failures() {
        let engine = Engine::new(Config::default());
        let mut document = DocumentContext::new();
        document.streams.push(stream("Good", "Sub AutoOpen()\nShell \"whoami\"\nEnd Sub\n"));
        document.streams.push(stream("Bad", "Sub (((\n"));
        let result = engine.analyze_document(document);
        assert_eq!(result.parse_failures.len(), 1);
        assert_eq!(result.parse_failures[0].stream, "Bad");
        assert!(result
            .actions
            .iter()
            .any(|a| a.kind == interpreter::actions::ActionKind::ExecuteCommand));
    }

    #[test]
    fn scan_expressions_finds_literal_arithmetic_without_emulating() {
        let engine = Engine::new(Config::default());
        let mut document = DocumentContext::new();
        document.streams.push(stream("M", "Sub Foo()\nx = 2 * 3\nEnd Sub\n"));
        let found = engine.scan_expressions(&document);
        assert!(found.iter().any(|(_, v)| v == "6"));
    }

    #[test]
    fn parallel_parse_matches_sequential_for_multiple_streams() {
        let mut config = Config::default();
        config.parallel_parse = true;
        let engine = Engine::new(config);
        let mut document = DocumentContext::new();
        for i in 0..5 {
            document
                .streams
                .push(stream(&format!("M{i}"), &format!("Sub S{i}()\nx = {i}\nEnd Sub\n")));
        }
        let result = engine.analyze_document(document);
        assert!(result.parse_failures.is_empty());
    }
}
