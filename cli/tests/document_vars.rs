//! Exercises the document-variable side-file wired through to the engine via
//! the CLI's JSON loader, without spawning the binary itself.

use engine::config::Config;
use engine::context::{DocumentContext, MacroStream};
use engine::Engine;
use std::io::Write;

#[test]
fn environ_symbolic_value_reaches_the_action_log() {
    let mut document = DocumentContext::new();
    document.streams.push(MacroStream {
        subfilename: "a.bas".to_string(),
        stream_path: "M".to_string(),
        vba_filename: "M".to_string(),
        source_text: "Sub AutoOpen()\nShell Environ(\"TEMP\") & \"\\x.exe\"\nEnd Sub\n".to_string(),
    });

    let engine = Engine::new(Config::default());
    let analysis = engine.analyze_document(document);
    assert!(analysis
        .actions
        .iter()
        .any(|a| a.description.to_ascii_lowercase().contains("temp")
            || a.arguments.iter().any(|arg| arg.to_ascii_lowercase().contains("temp"))));
}

#[test]
fn vars_json_side_file_round_trips_through_serde() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, r#"{{"Company": "Acme"}}"#).unwrap();
    let data = std::fs::read_to_string(file.path()).unwrap();
    let parsed: std::collections::HashMap<String, String> = serde_json::from_str(&data).unwrap();
    assert_eq!(parsed.get("Company"), Some(&"Acme".to_string()));
}
