//! End-to-end "normalize -> parse -> interpret -> assert on the action log"
//! tests, one per concrete scenario this design commits to.

use engine::config::Config;
use engine::context::{DocumentContext, MacroStream};
use engine::interpreter::actions::ActionKind;
use engine::normalizer;
use engine::Engine;

fn document(source: &str) -> DocumentContext {
    let mut document = DocumentContext::new();
    document.streams.push(MacroStream {
        subfilename: "doc.bin".to_string(),
        stream_path: "M".to_string(),
        vba_filename: "M".to_string(),
        source_text: source.to_string(),
    });
    document
}

fn engine_with(config: Config) -> Engine {
    Engine::new(config)
}

#[test]
fn continuation_collapse_joins_the_split_string_concatenation() {
    let normalized = normalizer::normalize("x = \"a\" & _\n\"b\"\n", false);
    assert_eq!(normalized.trim(), "x = \"a\" &  \"b\"");

    let engine = engine_with(Config::default());
    let analysis = engine.scan_expressions(&document("Sub AutoOpen()\nx = \"a\" & _\n\"b\"\nEnd Sub\n"));
    assert!(analysis.iter().any(|(_, v)| v == "ab"));
}

#[test]
fn conditional_compilation_keeps_only_the_widest_arm() {
    let source = "Sub AutoOpen()\n#If A Then\nShell \"short-arm\"\n#Else\nShell \"long-arm-1\"\nShell \"long-arm-2\"\nShell \"long-arm-3\"\nShell \"long-arm-4\"\nShell \"long-arm-5\"\n#End If\nEnd Sub\n";
    let engine = engine_with(Config::default());
    let analysis = engine.analyze_document(document(source));
    let commands: Vec<&str> = analysis
        .actions
        .iter()
        .filter(|a| a.kind == ActionKind::ExecuteCommand)
        .map(|a| a.arguments[0].as_str())
        .collect();
    assert_eq!(commands, vec!["long-arm-1", "long-arm-2", "long-arm-3", "long-arm-4", "long-arm-5"]);
}

#[test]
fn environ_reference_stays_a_symbolic_placeholder() {
    let source = "Sub AutoOpen()\nShell Environ(\"USERPROFILE\") & \"\\a.exe\"\nEnd Sub\n";
    let engine = engine_with(Config::default());
    let analysis = engine.analyze_document(document(source));
    let entry = analysis
        .actions
        .iter()
        .find(|a| a.kind == ActionKind::ExecuteCommand)
        .expect("shell call should be logged");
    assert_eq!(entry.arguments[0], "%USERPROFILE%\\a.exe");
}

#[test]
fn shell_call_is_recorded_as_an_execute_command_action() {
    let source = "Sub AutoOpen()\nShell \"cmd /c whoami\"\nEnd Sub\n";
    let engine = engine_with(Config::default());
    let analysis = engine.analyze_document(document(source));
    let entry = analysis
        .actions
        .iter()
        .find(|a| a.kind == ActionKind::ExecuteCommand)
        .expect("shell call should be logged");
    assert_eq!(entry.arguments, vec!["cmd /c whoami".to_string()]);
}

#[test]
fn stripping_useless_code_still_keeps_a_dotted_createobject_call() {
    let source =
        "Sub AutoOpen()\nSet s = CreateObject(\"WScript.Shell\")\ns.Run \"notepad\"\nEnd Sub\n";
    let mut config = Config::default();
    config.strip_useless = true;
    let engine = engine_with(config);
    let analysis = engine.analyze_document(document(source));
    assert!(analysis
        .actions
        .iter()
        .any(|a| a.kind == ActionKind::ExecuteCommand && a.arguments.iter().any(|arg| arg == "notepad")));
}

#[test]
fn on_error_resume_next_swallows_the_division_by_zero_and_keeps_running() {
    let source = "Sub AutoOpen()\nOn Error Resume Next\nx = 1 / 0\ny = 2\nShell \"y=\" & y\nEnd Sub\n";
    let engine = engine_with(Config::default());
    let analysis = engine.analyze_document(document(source));
    assert!(analysis.actions.iter().all(|a| a.kind != ActionKind::RuntimeLimit));
    let entry = analysis
        .actions
        .iter()
        .find(|a| a.kind == ActionKind::ExecuteCommand)
        .expect("shell call after the swallowed error should still run");
    assert_eq!(entry.arguments[0], "y=2");
}

#[test]
fn an_unmatched_end_if_is_repaired_so_the_function_still_parses() {
    let source = "Function AutoOpen()\nShell \"cmd\"\nEnd If\n";
    let engine = engine_with(Config::default());
    let analysis = engine.analyze_document(document(source));
    assert!(analysis.parse_failures.is_empty(), "repair should let the function parse");
    assert!(analysis.actions.iter().any(|a| a.kind == ActionKind::ExecuteCommand));
}

#[test]
fn a_zero_step_for_loop_is_truncated_at_the_configured_cap() {
    let mut config = Config::default();
    config.loop_iteration_limit = 50;
    let source = "Sub AutoOpen()\nFor i = 1 To 1 Step 0\nNext i\nEnd Sub\n";
    let engine = engine_with(config);
    let analysis = engine.analyze_document(document(source));
    assert!(analysis.actions.iter().any(|a| a.kind == ActionKind::RuntimeLimit));
}
