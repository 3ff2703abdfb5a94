//! Object stubs: `CreateObject`/`GetObject` handles and the case-folded
//! method dispatch tables for the handful of ProgIDs macros actually
//! instantiate (spec §4.E, §7)

use crate::context::AnalysisContext;
use crate::interpreter::actions::{ActionKind, ActionLog};
use crate::value::{ObjectHandle, Value};

/// `CreateObject(progid)` / `GetObject(...)`: allocates an opaque handle
/// identified only by its case-folded ProgID. Methods are dispatched later by
/// [`call_method`], not bound to the handle itself, so `Set o = CreateObject(...)`
/// followed by a call through a renamed variable still resolves correctly.
pub fn create_object(progid: &str, analysis: &mut AnalysisContext) -> Value {
    Value::Object(ObjectHandle {
        id: analysis.next_object_id(),
        progid: progid.to_ascii_lowercase(),
    })
}

/// Dispatches a method call on a modeled object handle. Returns `None` if the
/// `(progid, method)` pair has no model — the interpreter then treats the
/// call as an unmodeled builtin rather than guessing at a return value.
pub fn call_method(
    handle: &ObjectHandle,
    method: &str,
    args: &[Value],
    actions: &mut ActionLog,
    analysis: &mut AnalysisContext,
) -> Option<Value> {
    let method = method.to_ascii_lowercase();
    match handle.progid.as_str() {
        "wscript.shell" => wscript_shell(&method, args, actions),
        "scripting.filesystemobject" => filesystem_object(&method, args, actions, analysis),
        "msxml2.xmlhttp" | "msxml2.serverxmlhttp" | "microsoft.xmlhttp" => xml_http(&method, args, actions),
        "adodb.stream" => adodb_stream(&method, args, actions, analysis),
        "shell.application" => shell_application(&method, args, actions),
        "word.application" | "excel.application" => office_application(handle, &method, args, actions),
        _ => None,
    }
}

fn arg_text(args: &[Value], i: usize) -> String {
    args.get(i).map(|v| v.to_vba_string()).unwrap_or_default()
}

fn wscript_shell(method: &str, args: &[Value], actions: &mut ActionLog) -> Option<Value> {
    match method {
        "run" | "exec" => {
            let command = arg_text(args, 0);
            actions.push(ActionKind::ExecuteCommand, vec![command.clone()], command);
            Some(Value::Int(0))
        }
        "regwrite" => {
            let key = arg_text(args, 0);
            let value = arg_text(args, 1);
            actions.push(
                ActionKind::RegistryWrite,
                vec![key.clone(), value.clone()],
                format!("RegWrite {key}, {value}"),
            );
            Some(Value::Empty)
        }
        "expandenvironmentstrings" => Some(Value::string(arg_text(args, 0))),
        _ => None,
    }
}

fn filesystem_object(method: &str, args: &[Value], actions: &mut ActionLog, analysis: &mut AnalysisContext) -> Option<Value> {
    match method {
        "createtextfile" | "opentextfile" => {
            let path = arg_text(args, 0);
            let description = match analysis.persist_artifact(&path, &[]) {
                Ok(dest) => format!("CreateTextFile {path} (reserved at {})", dest.display()),
                Err(e) => {
                    tracing::warn!("failed to reserve artifact for {}: {}", path, e);
                    format!("CreateTextFile {path}")
                }
            };
            actions.push(ActionKind::CreatedFile, vec![path.clone()], description);
            Some(Value::unresolved(format!("<TextStream:{path}>")))
        }
        "copyfile" | "movefile" => {
            let src = arg_text(args, 0);
            let dst = arg_text(args, 1);
            actions.push(
                ActionKind::FileWrite,
                vec![src.clone(), dst.clone()],
                format!("{method} {src} -> {dst}"),
            );
            Some(Value::Empty)
        }
        "fileexists" => Some(Value::Bool(false)),
        _ => None,
    }
}

fn xml_http(method: &str, args: &[Value], actions: &mut ActionLog) -> Option<Value> {
    match method {
        "open" => {
            let url = arg_text(args, 1);
            actions.push(ActionKind::NetworkDownload, vec![url.clone()], format!("XMLHTTP.Open {url}"));
            Some(Value::Empty)
        }
        "send" => Some(Value::Empty),
        "responsetext" | "responsebody" => Some(Value::unresolved("<http response>")),
        _ => None,
    }
}

fn adodb_stream(method: &str, args: &[Value], actions: &mut ActionLog, analysis: &mut AnalysisContext) -> Option<Value> {
    match method {
        "savetofile" => {
            let path = arg_text(args, 0);
            let description = match analysis.persist_artifact(&path, &[]) {
                Ok(dest) => format!("ADODB.Stream.SaveToFile {path} (reserved at {})", dest.display()),
                Err(e) => {
                    tracing::warn!("failed to reserve artifact for {}: {}", path, e);
                    format!("ADODB.Stream.SaveToFile {path}")
                }
            };
            actions.push(ActionKind::FileWrite, vec![path.clone()], description);
            Some(Value::Empty)
        }
        "open" | "write" | "close" => Some(Value::Empty),
        _ => None,
    }
}

fn shell_application(method: &str, args: &[Value], actions: &mut ActionLog) -> Option<Value> {
    match method {
        "shellexecute" => {
            let command = arg_text(args, 0);
            actions.push(ActionKind::ProcessCreate, vec![command.clone()], format!("ShellExecute {command}"));
            Some(Value::Empty)
        }
        _ => None,
    }
}

fn office_application(handle: &ObjectHandle, method: &str, args: &[Value], actions: &mut ActionLog) -> Option<Value> {
    match method {
        "run" => {
            let macro_name = arg_text(args, 0);
            actions.push(
                ActionKind::ObjectMethod,
                vec![handle.progid.clone(), macro_name.clone()],
                format!("{}.Run {}", handle.progid, macro_name),
            );
            Some(Value::Empty)
        }
        "quit" => Some(Value::Empty),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::context::{AnalysisContext, DocumentContext};

    fn handle(progid: &str) -> ObjectHandle {
        ObjectHandle { id: 1, progid: progid.to_string() }
    }

    #[test]
    fn create_object_folds_progid_case() {
        let mut ctx = AnalysisContext::new(Config::default(), DocumentContext::default());
        let v = create_object("WScript.Shell", &mut ctx);
        match v {
            Value::Object(h) => assert_eq!(h.progid, "wscript.shell"),
            other => panic!("expected object handle, got {other:?}"),
        }
    }

    #[test]
    fn wscript_shell_run_logs_execute_command() {
        let mut log = ActionLog::new();
        let mut ctx = AnalysisContext::new(Config::default(), DocumentContext::default());
        let h = handle("wscript.shell");
        let out = call_method(&h, "Run", &[Value::string("calc.exe")], &mut log, &mut ctx);
        assert!(out.is_some());
        assert_eq!(log.entries()[0].kind, ActionKind::ExecuteCommand);
    }

    #[test]
    fn unmodeled_method_returns_none() {
        let mut log = ActionLog::new();
        let mut ctx = AnalysisContext::new(Config::default(), DocumentContext::default());
        let h = handle("some.unknown.object");
        assert!(call_method(&h, "DoStuff", &[], &mut log, &mut ctx).is_none());
    }

    #[test]
    fn create_text_file_reserves_an_artifact_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.artifacts_path = dir.path().to_string_lossy().to_string();
        let mut ctx = AnalysisContext::new(config, DocumentContext::default());
        let mut log = ActionLog::new();
        let h = handle("scripting.filesystemobject");
        call_method(&h, "CreateTextFile", &[Value::string("c:\\x\\drop.txt")], &mut log, &mut ctx);
        let written: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(written.len(), 1);
        assert!(written[0].as_ref().unwrap().file_name().to_string_lossy().ends_with("drop.txt"));
    }
}
