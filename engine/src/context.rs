//! The read-only document context supplied by the external collaborator
//! (container extraction, metadata harvesting) and the mutable run-wide
//! state an analysis accumulates as it goes.

use crate::config::Config;
use crate::error::ParseFailure;
use serde::Deserialize;
use std::collections::HashMap;

/// One form control's recorded fields, as harvested from a `UserForm` stream
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FormControl {
    pub value: Option<String>,
    pub tag: Option<String>,
    pub caption: Option<String>,
    pub text: Option<String>,
    pub control_tip_text: Option<String>,
}

/// One extracted macro stream, prior to normalization
#[derive(Debug, Clone)]
pub struct MacroStream {
    pub subfilename: String,
    pub stream_path: String,
    pub vba_filename: String,
    pub source_text: String,
}

impl MacroStream {
    /// Builds a stream from the raw bytes of an extracted module, decoding
    /// them under the VBA project's declared code page (the `PROJECT`
    /// stream's `CodePage=` value) rather than assuming UTF-8. Source
    /// literals are decoded byte-for-byte under that code page the same way
    /// the normalizer preserves them byte-for-byte once decoded.
    pub fn from_bytes(
        subfilename: String,
        stream_path: String,
        vba_filename: String,
        raw: &[u8],
        code_page: u16,
    ) -> Self {
        MacroStream {
            subfilename,
            stream_path,
            vba_filename,
            source_text: utf8dec_rs::decode_win_str(raw, code_page),
        }
    }
}

/// The read-only record populated by the external collaborator before
/// emulation begins (spec §4.D, §6 "Inputs"). Nothing in this struct is
/// mutated once an `Engine` run starts; it exists to be pushed into the
/// global environment once, not re-queried mid-run.
#[derive(Debug, Clone, Default)]
pub struct DocumentContext {
    pub streams: Vec<MacroStream>,
    pub document_variables: HashMap<String, String>,
    pub custom_properties: HashMap<String, String>,
    pub document_text: String,
    /// Keyed by both the control's short name and its `stream_path.name`
    /// qualified form, matching how VBA code may refer to it either way
    pub form_controls: HashMap<String, FormControl>,
}

impl DocumentContext {
    pub fn new() -> Self {
        DocumentContext::default()
    }

    /// Harvests name/value pairs from adjacent-string scraping of a raw OLE
    /// stream, per the heuristic described in spec §9: pairing depends on
    /// [`crate::config::DocPropertyPairing`] since the correct offset between
    /// a name and its value is not known statically.
    pub fn pair_strings(
        strings: &[String],
        pairing: crate::config::DocPropertyPairing,
    ) -> HashMap<String, String> {
        use crate::config::DocPropertyPairing;
        let offset = match pairing {
            DocPropertyPairing::OneAhead => 1,
            DocPropertyPairing::TwoAhead => 2,
        };
        let mut out = HashMap::new();
        for (i, name) in strings.iter().enumerate() {
            if let Some(value) = strings.get(i + offset) {
                out.insert(name.clone(), value.clone());
            }
        }
        out
    }
}

/// Run-scoped state threaded through a single document's analysis: the
/// engine configuration, the collected parse failures, and a monotonic
/// counter for object-handle ids. Replaces the module-level mutable
/// caches the source's metadata/output-dir globals used (spec §9).
pub struct AnalysisContext {
    pub config: Config,
    pub document: DocumentContext,
    pub parse_failures: Vec<ParseFailure>,
    next_object_id: u32,
    /// Cooperative cancellation flag, checked between statements (spec §5)
    cancelled: std::sync::atomic::AtomicBool,
}

impl AnalysisContext {
    pub fn new(config: Config, document: DocumentContext) -> Self {
        AnalysisContext {
            config,
            document,
            parse_failures: Vec::new(),
            next_object_id: 0,
            cancelled: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn next_object_id(&mut self) -> u32 {
        let id = self.next_object_id;
        self.next_object_id += 1;
        id
    }

    pub fn cancel(&self) {
        self.cancelled
            .store(true, std::sync::atomic::Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(std::sync::atomic::Ordering::Relaxed)
    }

    pub fn record_parse_failure(&mut self, failure: ParseFailure) {
        self.parse_failures.push(failure);
    }

    /// Persists `content` under the configured artifacts directory, creating
    /// it lazily on first use, bounded by `artifact_size_limit` (spec §6
    /// "Artifact directory lifecycle"). `name_hint` is reduced to its final
    /// path component so a macro-controlled path can never escape the
    /// artifacts root. Returns the path actually written.
    pub fn persist_artifact(&mut self, name_hint: &str, content: &[u8]) -> std::io::Result<std::path::PathBuf> {
        std::fs::create_dir_all(&self.config.artifacts_path)?;
        let id = self.next_object_id();
        let safe_name = sanitize_artifact_name(name_hint);
        let dest = std::path::Path::new(&self.config.artifacts_path).join(format!("{id:06}_{safe_name}"));
        let file = std::fs::File::create(&dest)?;
        let mut writer = ctxutils::io::LimitedWriter::new(file, self.config.artifact_size_limit);
        std::io::Write::write_all(&mut writer, content)?;
        Ok(dest)
    }
}

/// Keeps only the final path component of a (possibly macro-controlled)
/// hint, falling back to a fixed name for anything that sanitizes to empty
fn sanitize_artifact_name(hint: &str) -> String {
    let base = hint
        .replace('\\', "/")
        .rsplit('/')
        .next()
        .unwrap_or(hint)
        .to_string();
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        "artifact".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DocPropertyPairing;

    #[test]
    fn one_ahead_pairing_matches_default() {
        let strings = vec!["Company".to_string(), "Acme".to_string()];
        let pairs = DocumentContext::pair_strings(&strings, DocPropertyPairing::OneAhead);
        assert_eq!(pairs.get("Company"), Some(&"Acme".to_string()));
    }

    #[test]
    fn two_ahead_pairing_skips_a_slot() {
        let strings = vec![
            "Company".to_string(),
            "ignored".to_string(),
            "Acme".to_string(),
        ];
        let pairs = DocumentContext::pair_strings(&strings, DocPropertyPairing::TwoAhead);
        assert_eq!(pairs.get("Company"), Some(&"Acme".to_string()));
    }

    #[test]
    fn from_bytes_decodes_under_the_declared_code_page() {
        // 0x93/0x94 are curly double quotes under Windows-1252
        let raw = b"x = \x93hi\x94\n";
        let stream = MacroStream::from_bytes(
            "doc.bin".to_string(),
            "M".to_string(),
            "M".to_string(),
            raw,
            1252,
        );
        assert_eq!(stream.source_text, "x = \u{201c}hi\u{201d}\n");
    }

    #[test]
    fn object_ids_are_sequential() {
        let mut ctx = AnalysisContext::new(Config::default(), DocumentContext::new());
        assert_eq!(ctx.next_object_id(), 0);
        assert_eq!(ctx.next_object_id(), 1);
    }

    #[test]
    fn persist_artifact_writes_under_the_configured_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.artifacts_path = dir.path().join("out").to_string_lossy().to_string();
        let mut ctx = AnalysisContext::new(config, DocumentContext::new());
        let path = ctx.persist_artifact("c:\\users\\victim\\payload.exe", b"MZ\0\0").unwrap();
        assert!(path.starts_with(dir.path().join("out")));
        assert_eq!(std::fs::read(&path).unwrap(), b"MZ\0\0");
        assert!(path.file_name().unwrap().to_string_lossy().ends_with("payload.exe"));
    }

    #[test]
    fn sanitize_strips_traversal_and_separators() {
        assert_eq!(sanitize_artifact_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_artifact_name(".."), "artifact");
        assert_eq!(sanitize_artifact_name("a\\b\\c.txt"), "c.txt");
    }
}
