//! The modeled builtin library (spec §4.E), split into the same four
//! categories the design calls out: numeric/string, object stubs,
//! environment, and I/O & exec.

pub mod core;
pub mod environment;
pub mod io;
pub mod objects;

use crate::context::AnalysisContext;
use crate::interpreter::actions::ActionLog;
use crate::value::Value;

/// Tries every free-function (non-object-method) category in turn. `None`
/// means the name has no model and the caller should fall back to treating
/// the call as `BuiltinUnmodeled`.
pub fn call(name: &str, args: &[Value], actions: &mut ActionLog, analysis: &mut AnalysisContext) -> Option<Value> {
    let folded = name.to_ascii_lowercase();
    match folded.as_str() {
        "environ" => return Some(environment::environ(&arg_text(args, 0))),
        "shell" => return Some(io::shell(&arg_text(args, 0), actions)),
        "winexec" => return Some(io::win_exec(&arg_text(args, 0), actions)),
        "createprocessa" | "createprocessw" => return Some(io::create_process(&arg_text(args, 1), actions)),
        "urldownloadtofile" | "urldownloadtofilea" | "urldownloadtofilew" => {
            return Some(io::url_download_to_file(&arg_text(args, 1), &arg_text(args, 2), actions))
        }
        "createobject" | "getobject" => return Some(objects::create_object(&arg_text(args, 0), analysis)),
        _ => {}
    }
    core::dispatch(&folded, args)
}

fn arg_text(args: &[Value], i: usize) -> String {
    args.get(i).map(|v| v.to_vba_string()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::context::DocumentContext;

    #[test]
    fn environ_is_routed_to_the_environment_category() {
        let mut log = ActionLog::new();
        let mut ctx = AnalysisContext::new(Config::default(), DocumentContext::new());
        let v = call("Environ", &[Value::string("TEMP")], &mut log, &mut ctx).unwrap();
        assert_eq!(v.to_vba_string(), "%TEMP%");
    }

    #[test]
    fn shell_is_routed_to_io_and_logged() {
        let mut log = ActionLog::new();
        let mut ctx = AnalysisContext::new(Config::default(), DocumentContext::new());
        call("Shell", &[Value::string("cmd.exe")], &mut log, &mut ctx).unwrap();
        assert_eq!(log.entries().len(), 1);
    }

    #[test]
    fn unknown_name_falls_through_to_none() {
        let mut log = ActionLog::new();
        let mut ctx = AnalysisContext::new(Config::default(), DocumentContext::new());
        assert!(call("TotallyMadeUp", &[], &mut log, &mut ctx).is_none());
    }
}
