//! Useless-code stripping (spec §4.A pass 4), enabled by the `strip_useless`
//! config flag. Operates on already-collapsed, attribute-filtered,
//! conditional-compilation-resolved text, one line at a time — this is a
//! line-level heuristic, not a data-flow analysis, and is allowed to be
//! conservative: when in doubt, keep the line.

const INTERESTING_BUILTINS: &[&str] = &[
    "createprocessa",
    "createprocessw",
    "shell",
    "run",
    "createobject",
    "open",
    "getobject",
    "create",
    "environ",
    "createtextfile",
    "eval",
    "winexec",
    "urldownloadtofile",
    "setexpandedstringvalue",
    "print",
];

const DISCARDABLE_MATH_FNS: &[&str] = &["cos", "log", "exp", "sin", "tan"];

pub fn strip_useless_code(source: &str) -> String {
    let lines: Vec<&str> = source.lines().collect();
    let assigns = build_assigns_map(&lines);
    let change_callbacks = find_change_callback_names(&lines);

    let referenced: std::collections::HashSet<&String> = assigns
        .keys()
        .filter(|name| is_referenced(name.as_str(), &assigns, &lines, &change_callbacks))
        .collect();

    let mut out = Vec::with_capacity(lines.len());
    for (i, line) in lines.iter().enumerate() {
        let assigned_here: Vec<&String> = assigns
            .iter()
            .filter(|(_, ls)| ls.contains(&i))
            .map(|(n, _)| n)
            .collect();
        if !assigned_here.is_empty() && assigned_here.iter().all(|n| !referenced.contains(n)) {
            out.push(format!("' {line}"));
            continue;
        }
        if is_discardable_math_call(line) || is_strippable_dim(line) {
            out.push(format!("' {line}"));
            continue;
        }
        out.push(line.to_string());
    }
    out.into_iter().map(|l| format!("{l}\n")).collect()
}

/// Builds `name -> {line numbers}` for every top-level assignment this pass
/// is allowed to consider
fn build_assigns_map(lines: &[&str]) -> std::collections::HashMap<String, Vec<usize>> {
    let mut map: std::collections::HashMap<String, Vec<usize>> = std::collections::HashMap::new();
    let mut with_depth = 0i64;
    for (i, line) in lines.iter().enumerate() {
        let trimmed = line.trim_start();
        let lower = trimmed.to_ascii_lowercase();
        if lower.starts_with("with ") {
            with_depth += 1;
            continue;
        }
        if lower.starts_with("end with") {
            with_depth = (with_depth - 1).max(0);
            continue;
        }
        if with_depth > 0 {
            continue;
        }
        if is_boolean_context_prefix(&lower) {
            continue;
        }
        if is_header_or_declaration_line(&lower) {
            continue;
        }
        if let Some(name) = line_assigned_names(line) {
            if names_an_interesting_builtin(&lower) {
                continue;
            }
            if let Some(rhs) = assignment_rhs(line) {
                if rhs.contains('.') || rhs.to_ascii_lowercase().contains("createobject") {
                    continue;
                }
            }
            map.entry(name).or_default().push(i);
        }
    }
    map
}

/// The plain (non-qualified) name a line assigns, if the line is a
/// recognizable `IDENT = ...` or `IDENT(...) = ...` top-level assignment
/// outside a quoted string
fn line_assigned_names(line: &str) -> Option<String> {
    let trimmed = line.trim_start();
    if trimmed.starts_with('\'') {
        return None;
    }
    let eq_pos = find_top_level_assign_eq(trimmed)?;
    let lhs = trimmed[..eq_pos].trim_end();
    if lhs.contains('.') {
        return None; // With-member or qualified target; not considered here
    }
    let name_end = lhs.find(['(', ' ']).unwrap_or(lhs.len());
    let name = &lhs[..name_end];
    if name.is_empty() || !name.chars().next().unwrap().is_alphabetic() {
        return None;
    }
    Some(name.to_string())
}

/// Finds the `=` that would separate an assignment's target from its value,
/// skipping quoted strings and rejecting comparison operators (`==`, `<=`,
/// `>=`, `<>`) and `Let`/`Set` keyword prefixes (handled the same as a bare
/// assignment since both still assign `name`)
fn find_top_level_assign_eq(line: &str) -> Option<usize> {
    let bytes = line.as_bytes();
    let mut in_string = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'"' => in_string = !in_string,
            b'=' if !in_string => {
                let prev = if i > 0 { bytes[i - 1] } else { 0 };
                let next = if i + 1 < bytes.len() { bytes[i + 1] } else { 0 };
                if prev != b'<' && prev != b'>' && prev != b'=' && next != b'=' {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

fn assignment_rhs(line: &str) -> Option<&str> {
    let eq_pos = find_top_level_assign_eq(line.trim_start())?;
    Some(line.trim_start()[eq_pos + 1..].trim())
}

fn is_boolean_context_prefix(lower: &str) -> bool {
    lower.starts_with("if ")
        || lower.starts_with("elseif ")
        || lower.starts_with("for ")
        || lower.starts_with("do ")
        || lower.starts_with("do\t")
        || lower == "do"
        || lower.starts_with("while ")
}

fn is_header_or_declaration_line(lower: &str) -> bool {
    lower.starts_with("sub ")
        || lower.starts_with("function ")
        || lower.starts_with("private sub ")
        || lower.starts_with("public sub ")
        || lower.starts_with("private function ")
        || lower.starts_with("public function ")
        || lower.starts_with("declare ")
        || lower.starts_with("dim ")
        || lower.starts_with("const ")
}

fn names_an_interesting_builtin(lower: &str) -> bool {
    INTERESTING_BUILTINS.iter().any(|b| lower.contains(b))
}

/// A name is referenced iff it appears on any line other than its own
/// assignment lines, it substring-matches a discovered `..._Change` event
/// callback, or it contains `.` (cross-stream reachability unknown — never
/// considered for this pass's names, which are always unqualified, but kept
/// here for symmetry with the spec's wording)
fn is_referenced(
    name: &str,
    assigns: &std::collections::HashMap<String, Vec<usize>>,
    lines: &[&str],
    change_callbacks: &[String],
) -> bool {
    if name.contains('.') {
        return true;
    }
    if change_callbacks.iter().any(|cb| cb.contains(name) || name.contains(cb.as_str())) {
        return true;
    }
    let own_lines: &[usize] = assigns.get(name).map(Vec::as_slice).unwrap_or(&[]);
    let folded = name.to_ascii_lowercase();
    lines.iter().enumerate().any(|(i, line)| {
        if own_lines.contains(&i) {
            return false;
        }
        word_boundary_contains(&line.to_ascii_lowercase(), &folded)
    })
}

fn word_boundary_contains(haystack: &str, needle: &str) -> bool {
    let bytes = haystack.as_bytes();
    let needle_bytes = needle.as_bytes();
    if needle_bytes.is_empty() {
        return false;
    }
    haystack.match_indices(needle).any(|(pos, _)| {
        let before_ok = pos == 0 || !is_ident_byte(bytes[pos - 1]);
        let after = pos + needle_bytes.len();
        let after_ok = after >= bytes.len() || !is_ident_byte(bytes[after]);
        before_ok && after_ok
    })
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// `Sub NAME_Change()` event-callback names, used as an extra reachability
/// signal per spec §4.A.4
fn find_change_callback_names(lines: &[&str]) -> Vec<String> {
    lines
        .iter()
        .filter_map(|l| {
            let lower = l.trim_start().to_ascii_lowercase();
            let lower = lower.strip_prefix("private sub ").or_else(|| lower.strip_prefix("public sub ")).unwrap_or(&lower);
            let lower = lower.strip_prefix("sub ").unwrap_or(lower);
            let name_end = lower.find('(')?;
            let name = &lower[..name_end];
            if name.ends_with("_change") {
                Some(name.to_string())
            } else {
                None
            }
        })
        .collect()
}

fn is_discardable_math_call(line: &str) -> bool {
    let trimmed = line.trim();
    let lower = trimmed.to_ascii_lowercase();
    DISCARDABLE_MATH_FNS.iter().any(|f| {
        lower.starts_with(&format!("{f}(")) && lower.trim_end().ends_with(')') && !lower.contains('=')
    })
}

/// A `Dim` statement is strippable iff it names no `Byte`/`Integer`/`Long`
/// type, has no initializer, declares exactly one name, and is not a
/// continuation target (continuations are already collapsed by the time
/// this pass runs, so a genuine multi-name `Dim a, b` is the only remaining
/// compound-declaration case to guard against)
fn is_strippable_dim(line: &str) -> bool {
    let trimmed = line.trim_start();
    let lower = trimmed.to_ascii_lowercase();
    let Some(rest) = lower.strip_prefix("dim ") else {
        return false;
    };
    if rest.contains(',') || rest.contains('=') {
        return false;
    }
    !rest.contains(" as byte") && !rest.contains(" as integer") && !rest.contains(" as long")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreferenced_assignment_is_commented_out() {
        let src = "Sub Foo()\nx = 1\nEnd Sub\n";
        let out = strip_useless_code(src);
        assert!(out.lines().any(|l| l.trim() == "' x = 1"));
    }

    #[test]
    fn referenced_assignment_survives() {
        let src = "Sub Foo()\nx = 1\ny = x + 1\nEnd Sub\n";
        let out = strip_useless_code(src);
        assert!(out.contains("x = 1\n"));
    }

    #[test]
    fn assignment_naming_an_interesting_builtin_survives() {
        let src = "Sub Foo()\ncmd = Shell(\"whoami\")\nEnd Sub\n";
        let out = strip_useless_code(src);
        assert!(out.contains("cmd = Shell(\"whoami\")"));
    }

    #[test]
    fn assignment_with_dotted_rhs_is_never_considered() {
        let src = "Sub Foo()\nx = obj.Value\nEnd Sub\n";
        let out = strip_useless_code(src);
        assert!(out.contains("x = obj.Value"));
    }

    #[test]
    fn discarded_cos_call_is_stripped() {
        let src = "Sub Foo()\nCos(1)\nEnd Sub\n";
        let out = strip_useless_code(src);
        assert!(out.lines().any(|l| l.trim() == "' Cos(1)"));
    }

    #[test]
    fn typed_dim_is_kept() {
        let src = "Sub Foo()\nDim x As Long\nEnd Sub\n";
        let out = strip_useless_code(src);
        assert!(out.contains("Dim x As Long"));
    }

    #[test]
    fn untyped_single_dim_is_stripped() {
        let src = "Sub Foo()\nDim x\nEnd Sub\n";
        let out = strip_useless_code(src);
        assert!(out.lines().any(|l| l.trim() == "' Dim x"));
    }

    #[test]
    fn change_callback_name_match_keeps_the_assignment() {
        let src = "Sub foo_Change()\nEnd Sub\nSub Bar()\nfoo = 1\nEnd Sub\n";
        let out = strip_useless_code(src);
        assert!(out.contains("foo = 1"));
    }
}
