//! The action log: an ordered, never-reordered record of side-effecting
//! operations a modeled builtin would have performed (spec §3, §4.E)

use std::fmt;

/// The kind tag attached to a recorded action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    ExecutedFunction,
    ExecuteCommand,
    CreatedFile,
    FileWrite,
    ObjectMethod,
    ProcessCreate,
    NetworkDownload,
    RegistryWrite,
    RuntimeLimit,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActionKind::ExecutedFunction => "Executed Function",
            ActionKind::ExecuteCommand => "Execute Command",
            ActionKind::CreatedFile => "Created File",
            ActionKind::FileWrite => "File Write",
            ActionKind::ObjectMethod => "Object.Method",
            ActionKind::ProcessCreate => "Process Create",
            ActionKind::NetworkDownload => "Network Download",
            ActionKind::RegistryWrite => "Registry Write",
            ActionKind::RuntimeLimit => "Runtime Limit",
        };
        write!(f, "{s}")
    }
}

/// One recorded action: `(kind, arguments, source-expression-text)`
#[derive(Debug, Clone)]
pub struct Action {
    pub kind: ActionKind,
    pub arguments: Vec<String>,
    pub description: String,
}

/// An append-only, never-reordered sequence of actions. Adjacent duplicates
/// can be folded on request (spec §3) but nothing is ever re-sorted.
#[derive(Debug, Clone, Default)]
pub struct ActionLog {
    entries: Vec<Action>,
}

impl ActionLog {
    pub fn new() -> Self {
        ActionLog::default()
    }

    pub fn push(&mut self, kind: ActionKind, arguments: Vec<String>, description: impl Into<String>) {
        self.entries.push(Action {
            kind,
            arguments,
            description: description.into(),
        });
    }

    pub fn entries(&self) -> &[Action] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<Action> {
        self.entries
    }

    /// Collapses runs of adjacent, field-for-field identical entries into one
    pub fn dedup_adjacent(&mut self) {
        self.entries.dedup_by(|a, b| {
            a.kind == b.kind && a.arguments == b.arguments && a.description == b.description
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adjacent_duplicates_collapse() {
        let mut log = ActionLog::new();
        log.push(ActionKind::ExecuteCommand, vec!["whoami".into()], "Shell \"whoami\"");
        log.push(ActionKind::ExecuteCommand, vec!["whoami".into()], "Shell \"whoami\"");
        log.dedup_adjacent();
        assert_eq!(log.entries().len(), 1);
    }

    #[test]
    fn non_adjacent_duplicates_survive() {
        let mut log = ActionLog::new();
        log.push(ActionKind::ExecuteCommand, vec!["a".into()], "Shell \"a\"");
        log.push(ActionKind::ExecuteCommand, vec!["b".into()], "Shell \"b\"");
        log.push(ActionKind::ExecuteCommand, vec!["a".into()], "Shell \"a\"");
        log.dedup_adjacent();
        assert_eq!(log.entries().len(), 3);
    }
}
