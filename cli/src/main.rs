use clap::Parser;
use engine::config::Config;
use engine::context::{DocumentContext, FormControl, MacroStream};
use engine::Engine;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing_subscriber::prelude::*;

/// Normalizes, parses and emulates VBA macro module sources, printing the
/// resulting action log and constant-expression scan
#[derive(Parser, Debug)]
#[command(name = "vba-emu")]
struct Args {
    /// VBA module source files to analyze (already extracted from their container)
    #[arg(value_name = "MODULE", required = true)]
    modules: Vec<String>,

    /// Parse the given sources without emulating them, printing only the
    /// constant-expression scan
    #[arg(long = "scan-expressions")]
    scan_only: bool,

    /// Load engine configuration from this file
    #[arg(long = "config", value_name = "ENGINE_TOML")]
    config_path: Option<String>,

    /// Document variables, as a JSON object of strings
    #[arg(long = "vars", value_name = "VARS_JSON")]
    vars_path: Option<String>,

    /// Custom document properties, same format as --vars
    #[arg(long = "props", value_name = "PROPS_JSON")]
    props_path: Option<String>,

    /// Form controls, a JSON object of FormControl records
    #[arg(long = "controls", value_name = "CTRL_JSON")]
    controls_path: Option<String>,

    /// The document's visible text content
    #[arg(long = "text", value_name = "DOCTEXT_TXT")]
    text_path: Option<String>,

    /// Decode module sources as this Windows code page (default: UTF-8)
    #[arg(long = "codepage", value_name = "N")]
    code_page: Option<u16>,

    /// Print the action log as JSON instead of text
    #[arg(long = "json")]
    as_json: bool,
}

fn read_json_map(path: &str) -> HashMap<String, String> {
    let data = fs::read_to_string(path).unwrap_or_else(|e| {
        eprintln!("Failed to read {}: {}", path, e);
        std::process::exit(1);
    });
    serde_json::from_str(&data).unwrap_or_else(|e| {
        eprintln!("Failed to parse {} as a JSON object of strings: {}", path, e);
        std::process::exit(1);
    })
}

fn read_controls(path: &str) -> HashMap<String, FormControl> {
    let data = fs::read_to_string(path).unwrap_or_else(|e| {
        eprintln!("Failed to read {}: {}", path, e);
        std::process::exit(1);
    });
    serde_json::from_str(&data).unwrap_or_else(|e| {
        eprintln!("Failed to parse {} as a JSON object of form controls: {}", path, e);
        std::process::exit(1);
    })
}

fn load_document(args: &Args) -> DocumentContext {
    let mut document = DocumentContext::new();
    for path in &args.modules {
        let raw = fs::read(path).unwrap_or_else(|e| {
            eprintln!("Failed to read {}: {}", path, e);
            std::process::exit(1);
        });
        let stem = Path::new(path)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(path)
            .to_string();
        let stream = match args.code_page {
            Some(cp) => MacroStream::from_bytes(path.clone(), stem.clone(), stem, &raw, cp),
            None => MacroStream {
                subfilename: path.clone(),
                stream_path: stem.clone(),
                vba_filename: stem,
                source_text: String::from_utf8_lossy(&raw).into_owned(),
            },
        };
        document.streams.push(stream);
    }
    if let Some(p) = &args.vars_path {
        document.document_variables = read_json_map(p);
    }
    if let Some(p) = &args.props_path {
        document.custom_properties = read_json_map(p);
    }
    if let Some(p) = &args.controls_path {
        document.form_controls = read_controls(p);
    }
    if let Some(p) = &args.text_path {
        document.document_text = fs::read_to_string(p).unwrap_or_else(|e| {
            eprintln!("Failed to read {}: {}", p, e);
            std::process::exit(1);
        });
    }
    document
}

fn load_config(args: &Args) -> Config {
    let path = args.config_path.as_deref().unwrap_or("engine.toml");
    figment::Figment::new()
        .merge(figment::providers::Toml::file(path))
        .merge(figment::providers::Env::prefixed("ENGINE__").split("__"))
        .extract()
        .unwrap_or_else(|e| {
            eprintln!("Failed to load configuration from {}: {}", path, e);
            std::process::exit(1);
        })
}

fn print_expressions(expressions: &[(String, String)], as_json: bool) {
    if as_json {
        let rows: Vec<_> = expressions
            .iter()
            .map(|(e, v)| serde_json::json!({"expression": e, "value": v}))
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows).unwrap());
        return;
    }
    for (expr, value) in expressions {
        println!("{expr} => {value}");
    }
}

fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config = load_config(&args);
    let engine = Engine::new(config);
    let document = load_document(&args);

    if args.scan_only {
        let expressions = engine.scan_expressions(&document);
        print_expressions(&expressions, args.as_json);
        return;
    }

    let analysis = engine.analyze_document(document);

    if args.as_json {
        let actions: Vec<_> = analysis
            .actions
            .iter()
            .map(|a| {
                serde_json::json!({
                    "kind": a.kind.to_string(),
                    "arguments": a.arguments,
                    "description": a.description,
                })
            })
            .collect();
        let failures: Vec<_> = analysis
            .parse_failures
            .iter()
            .map(|f| {
                serde_json::json!({
                    "stream": f.stream,
                    "line": f.line,
                    "column": f.column,
                    "message": f.message,
                })
            })
            .collect();
        let out = serde_json::json!({
            "actions": actions,
            "expressions": analysis.expressions,
            "parse_failures": failures,
        });
        println!("{}", serde_json::to_string_pretty(&out).unwrap());
        return;
    }

    if !analysis.parse_failures.is_empty() {
        eprintln!("-- parse failures --");
        for f in &analysis.parse_failures {
            eprintln!("{}:{}:{}: {}", f.stream, f.line, f.column, f.message);
        }
    }
    println!("-- actions --");
    for action in &analysis.actions {
        println!("[{}] {} ({})", action.kind, action.description, action.arguments.join(", "));
    }
    println!("-- expressions --");
    print_expressions(&analysis.expressions, false);
}
