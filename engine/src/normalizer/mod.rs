//! The source normalizer (spec component A)
//!
//! Takes one macro stream's raw text and produces a semantically equivalent
//! (for emulation purposes) text the grammar can accept. Five whitespace-
//! preserving line transforms run in a fixed order; none of them validate
//! VBA syntax, they just reshape lines the grammar would otherwise choke on
//! or that the interpreter has no use for.

mod strip;

use strip::strip_useless_code;

/// Line-continuation collapse, `Attribute` filtering, conditional-compilation
/// arm selection, optional useless-code stripping, and the three mechanical
/// repairs, applied in that order.
pub fn normalize(source: &str, strip_useless: bool) -> String {
    let text = collapse_continuations(source);
    let text = strip_attribute_lines(&text);
    let text = collapse_conditional_compilation(&text);
    let text = if strip_useless {
        strip_useless_code(&text)
    } else {
        text
    };
    repair(&text)
}

/// Joins any physical line ending in a whitespace-preceded `_` onto the next
/// line, preserving quoted strings verbatim so a trailing underscore inside
/// a string literal is never mistaken for a continuation marker.
fn collapse_continuations(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut pending = String::new();
    let mut continuing = false;
    for raw_line in source.split('\n') {
        let line = raw_line.strip_suffix('\r').unwrap_or(raw_line);
        let line = if continuing { line.trim_start() } else { line };
        pending.push_str(line);
        if ends_with_continuation(&pending) {
            let cut = pending.trim_end().len();
            pending.truncate(cut);
            pending.pop(); // the underscore itself
            pending.push(' ');
            continuing = true;
        } else {
            out.push_str(&pending);
            out.push('\n');
            pending.clear();
            continuing = false;
        }
    }
    if !pending.is_empty() {
        out.push_str(&pending);
        out.push('\n');
    }
    out
}

/// True iff `line`, outside of any quoted string, ends with whitespace then `_`
fn ends_with_continuation(line: &str) -> bool {
    let trimmed = line.trim_end();
    let Some(without_underscore) = trimmed.strip_suffix('_') else {
        return false;
    };
    if !without_underscore.ends_with(' ') && !without_underscore.ends_with('\t') {
        return false;
    }
    !in_quotes_at_end(trimmed)
}

/// Walks the line tracking `"`-delimited string state (VBA doubles a quote
/// to escape it inside a literal) and reports whether the line ends mid-string
fn in_quotes_at_end(line: &str) -> bool {
    let mut in_string = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '"' {
            if in_string && chars.peek() == Some(&'"') {
                chars.next();
                continue;
            }
            in_string = !in_string;
        }
    }
    in_string
}

/// Deletes top-of-module `Attribute ...` lines, the host-written preamble
/// with no runtime effect
fn strip_attribute_lines(source: &str) -> String {
    source
        .lines()
        .filter(|l| !l.trim_start().to_ascii_lowercase().starts_with("attribute "))
        .map(|l| format!("{l}\n"))
        .collect()
}

/// One `#If`/`#ElseIf`/`#Else` arm: its condition text (unused beyond
/// bookkeeping — the emulator never evaluates it) and body lines
struct CondArm {
    lines: Vec<String>,
}

/// Picks exactly one arm of every `#If ... #End If` block — the one with the
/// most source lines, earliest arm breaking ties — and discards the rest, so
/// the parser never has to reason about compile-time constants. Nesting is
/// not supported: a nested `#If` is treated as plain body text of whichever
/// arm contains it (spec §9).
fn collapse_conditional_compilation(source: &str) -> String {
    let lines: Vec<&str> = source.lines().collect();
    let mut out = String::new();
    let mut i = 0;
    while i < lines.len() {
        let trimmed = lines[i].trim_start();
        if is_cond_directive(trimmed, "#if") {
            let (consumed, chosen) = read_conditional_block(&lines[i..]);
            for l in chosen {
                out.push_str(&l);
                out.push('\n');
            }
            i += consumed;
        } else {
            out.push_str(lines[i]);
            out.push('\n');
            i += 1;
        }
    }
    out
}

fn is_cond_directive(trimmed: &str, keyword: &str) -> bool {
    trimmed.to_ascii_lowercase().starts_with(keyword)
}

/// Reads one `#If` block starting at `lines[0]`, returning the number of
/// source lines it spans and the body of the widest arm
fn read_conditional_block(lines: &[&str]) -> (usize, Vec<String>) {
    let mut arms: Vec<CondArm> = vec![CondArm { lines: Vec::new() }];
    let mut depth = 0usize;
    let mut i = 0;
    while i < lines.len() {
        let trimmed = lines[i].trim_start();
        let lower = trimmed.to_ascii_lowercase();
        if i == 0 {
            // the opening "#If ... Then" line itself, not body content
            i += 1;
            continue;
        }
        if depth == 0 && lower.starts_with("#end if") {
            i += 1;
            break;
        }
        if depth == 0 && (lower.starts_with("#elseif") || lower.starts_with("#else")) {
            arms.push(CondArm { lines: Vec::new() });
            i += 1;
            continue;
        }
        if lower.starts_with("#if") {
            depth += 1;
        } else if lower.starts_with("#end if") {
            depth -= 1;
        }
        arms.last_mut().unwrap().lines.push(lines[i].to_string());
        i += 1;
    }
    let winner = arms
        .iter()
        .enumerate()
        .max_by_key(|(idx, arm)| (arm.lines.len(), std::cmp::Reverse(*idx)))
        .map(|(_, arm)| arm.lines.clone())
        .unwrap_or_default();
    (i, winner)
}

/// The three mechanical repairs applied last: splitting a shared `End
/// Function` line, rewriting the `Application.Run "name, args"` idiom, and
/// closing an unmatched `End If` as `End Function`
fn repair(source: &str) -> String {
    let source = split_shared_end_function(source);
    let source = rewrite_application_run(&source);
    close_unmatched_end_if(&source)
}

fn split_shared_end_function(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    for line in source.lines() {
        let trimmed = line.trim_end();
        if let Some(idx) = trimmed.to_ascii_lowercase().find("end function") {
            let before = trimmed[..idx].trim_end();
            if !before.is_empty() && idx > 0 {
                out.push_str(before);
                out.push('\n');
                out.push_str(&trimmed[idx..]);
                out.push('\n');
                continue;
            }
        }
        out.push_str(line);
        out.push('\n');
    }
    out
}

/// `Application.Run "name, arg1 arg2"` (exactly two double-quotes) becomes
/// `WScript.Shell name, arg1 arg2` — a quoting idiom the grammar handles poorly
fn rewrite_application_run(source: &str) -> String {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    let re = RE.get_or_init(|| {
        regex::Regex::new(r#"(?i)Application\.Run\s+"([^"]*)""#).unwrap()
    });
    let mut out = String::with_capacity(source.len());
    for line in source.lines() {
        if line.matches('"').count() == 2 {
            if let Some(caps) = re.captures(line) {
                let inner = &caps[1];
                let rewritten = line.replacen(&caps[0], &format!("WScript.Shell {inner}"), 1);
                out.push_str(&rewritten);
                out.push('\n');
                continue;
            }
        }
        out.push_str(line);
        out.push('\n');
    }
    out
}

/// Rewrites an `End If` that has no matching `#If`/`If` still open as `End
/// Function` — a defensive rule for malformed macros that otherwise abort
/// the whole stream's parse
fn close_unmatched_end_if(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut open = 0i64;
    for line in source.lines() {
        let lower = line.trim_start().to_ascii_lowercase();
        let is_end_if = lower.starts_with("end if");
        let opens_if = (lower.starts_with("if ") || lower == "if") && lower.trim_end().ends_with("then");
        if is_end_if {
            if open > 0 {
                open -= 1;
                out.push_str(line);
            } else {
                out.push_str("End Function");
            }
        } else {
            if opens_if {
                open += 1;
            }
            out.push_str(line);
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn continuation_lines_collapse_into_one() {
        let src = "x = 1 + _\n    2\n";
        let out = collapse_continuations(src);
        assert_eq!(out.trim(), "x = 1 +  2");
    }

    #[test]
    fn trailing_underscore_inside_a_string_is_not_a_continuation() {
        let src = "x = \"a_\"\ny = 1\n";
        let out = collapse_continuations(src);
        assert_eq!(out.lines().count(), 2);
    }

    #[test]
    fn attribute_lines_are_removed() {
        let src = "Attribute VB_Name = \"Module1\"\nSub Foo()\nEnd Sub\n";
        let out = strip_attribute_lines(src);
        assert!(!out.to_ascii_lowercase().contains("attribute"));
    }

    #[test]
    fn conditional_compilation_keeps_the_largest_arm() {
        let src = "#If Win64 Then\nx = 1\n#Else\ny = 2\ny = 3\ny = 4\n#End If\n";
        let out = collapse_conditional_compilation(src);
        assert!(out.contains("y = 2"));
        assert!(!out.contains("x = 1"));
    }

    #[test]
    fn conditional_compilation_breaks_ties_on_the_earliest_arm() {
        let src = "#If A Then\nx = 1\n#Else\ny = 2\n#End If\n";
        let out = collapse_conditional_compilation(src);
        assert!(out.contains("x = 1"));
        assert!(!out.contains("y = 2"));
    }

    #[test]
    fn application_run_with_two_quotes_rewrites_to_wscript_shell() {
        let src = "Application.Run \"cmd, /c whoami\"\n";
        let out = rewrite_application_run(src);
        assert_eq!(out.trim(), "WScript.Shell cmd, /c whoami");
    }

    #[test]
    fn shared_end_function_line_is_split() {
        let src = "x = 1: End Function\n";
        let out = split_shared_end_function(src);
        assert_eq!(out.lines().collect::<Vec<_>>(), vec!["x = 1:", "End Function"]);
    }

    #[test]
    fn unmatched_end_if_becomes_end_function() {
        let src = "Sub Foo()\nEnd If\n";
        let out = close_unmatched_end_if(src);
        assert!(out.contains("End Function"));
        assert!(!out.to_ascii_lowercase().contains("end if"));
    }

    #[test]
    fn matched_end_if_is_left_alone() {
        let src = "If x Then\nEnd If\n";
        let out = close_unmatched_end_if(src);
        assert!(out.to_ascii_lowercase().contains("end if"));
    }

    #[test]
    fn full_pipeline_runs_without_strip() {
        let src = "Attribute VB_Name = \"M\"\nSub AutoOpen()\nShell \"whoami\"\nEnd Sub\n";
        let out = normalize(src, false);
        assert!(!out.to_ascii_lowercase().contains("attribute"));
        assert!(out.contains("Shell \"whoami\""));
    }
}
