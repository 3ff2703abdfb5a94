//! Numeric and string builtins (spec §4.E): pure functions over [`Value`],
//! no action-log side effects.

use crate::value::{parse_vba_number, Value, VbaArray};
use std::cell::RefCell;
use std::rc::Rc;

/// Tries to evaluate `name(args)`. Returns `None` if the name isn't one of
/// the functions modeled here — the caller then tries other categories
/// before falling back to `BuiltinUnmodeled`.
pub fn dispatch(folded_name: &str, args: &[Value]) -> Option<Value> {
    let arg = |i: usize| args.get(i).cloned().unwrap_or(Value::Empty);
    let text = |i: usize| arg(i).to_vba_string();
    let num = |i: usize| arg(i).to_vba_number().unwrap_or(0.0);

    let result = match folded_name {
        "len" => Value::Int(text(0).chars().count() as i64),
        "lenb" => Value::Int(text(0).chars().count() as i64 * 2),
        "mid" => {
            let chars: Vec<char> = text(0).chars().collect();
            let start = (num(1) as usize).saturating_sub(1).min(chars.len());
            let take = args.get(2).map(|_| num(2).max(0.0) as usize).unwrap_or(chars.len());
            let end = (start + take).min(chars.len());
            Value::string(chars[start..end].iter().collect::<String>())
        }
        "left" => Value::string(text(0).chars().take(num(1).max(0.0) as usize).collect::<String>()),
        "right" => {
            let chars: Vec<char> = text(0).chars().collect();
            let count = (num(1).max(0.0) as usize).min(chars.len());
            let start = chars.len() - count;
            Value::string(chars[start..].iter().collect::<String>())
        }
        "replace" => {
            let find = text(1);
            if find.is_empty() {
                Value::string(text(0))
            } else {
                Value::string(text(0).replace(find.as_str(), &text(2)))
            }
        }
        "split" => {
            let delim = if args.len() > 1 { text(1) } else { " ".to_string() };
            let parts: Vec<Value> = if delim.is_empty() {
                vec![Value::string(text(0))]
            } else {
                text(0).split(delim.as_str()).map(Value::string).collect()
            };
            array_value(parts)
        }
        "join" => {
            let delim = if args.len() > 1 { text(1) } else { " ".to_string() };
            match arg(0) {
                Value::Array(cell) => {
                    let joined = cell
                        .borrow()
                        .data
                        .iter()
                        .map(|v| v.to_vba_string())
                        .collect::<Vec<_>>()
                        .join(&delim);
                    Value::string(joined)
                }
                _ => Value::string(String::new()),
            }
        }
        "instr" => {
            let (start, haystack, needle) = if args.len() >= 3 {
                (num(0).max(1.0) as usize, text(1), text(2))
            } else {
                (1usize, text(0), text(1))
            };
            let chars: Vec<char> = haystack.chars().collect();
            let start0 = (start - 1).min(chars.len());
            let tail: String = chars[start0..].iter().collect();
            match (needle.is_empty(), tail.find(needle.as_str())) {
                (true, _) => Value::Int(start as i64),
                (false, Some(byte_idx)) => Value::Int((start0 + tail[..byte_idx].chars().count() + 1) as i64),
                (false, None) => Value::Int(0),
            }
        }
        "instrrev" => {
            let haystack = text(0);
            let needle = text(1);
            match haystack.rfind(needle.as_str()) {
                Some(byte_idx) => Value::Int((haystack[..byte_idx].chars().count() + 1) as i64),
                None => Value::Int(0),
            }
        }
        "ucase" => Value::string(text(0).to_uppercase()),
        "lcase" => Value::string(text(0).to_lowercase()),
        "strreverse" => Value::string(text(0).chars().rev().collect::<String>()),
        "chr" | "chrw" => Value::string(char::from_u32(num(0) as u32).map(String::from).unwrap_or_default()),
        "asc" | "ascw" => Value::Int(text(0).chars().next().map(|c| c as i64).unwrap_or(0)),
        "hex" => Value::string(format!("{:X}", num(0) as i64)),
        "oct" => Value::string(format!("{:o}", num(0) as i64)),
        "cstr" => Value::string(text(0)),
        "clng" => Value::Int(arg(0).coerce_to_long() as i64),
        "cint" => Value::Int(arg(0).coerce_to_integer() as i64),
        "cbyte" => Value::Int(arg(0).coerce_to_byte() as i64),
        "cdbl" | "csng" => Value::Double(num(0)),
        "cbool" => Value::Bool(arg(0).to_vba_bool()),
        "cvar" => arg(0),
        "cdate" => Value::Date(num(0)),
        "val" => Value::Double(parse_vba_number(&text(0)).unwrap_or(0.0)),
        "trim" => Value::string(text(0).trim().to_string()),
        "ltrim" => Value::string(text(0).trim_start().to_string()),
        "rtrim" => Value::string(text(0).trim_end().to_string()),
        "space" => Value::string(" ".repeat(num(0).max(0.0) as usize)),
        "string" => {
            let count = num(0).max(0.0) as usize;
            let ch = text(1).chars().next().unwrap_or(' ');
            Value::string(ch.to_string().repeat(count))
        }
        "isnumeric" => Value::Bool(arg(0).is_numeric()),
        "isempty" => Value::Bool(matches!(arg(0), Value::Empty)),
        "isnull" => Value::Bool(matches!(arg(0), Value::Null)),
        "isobject" => Value::Bool(matches!(arg(0), Value::Object(_))),
        "isarray" => Value::Bool(matches!(arg(0), Value::Array(_))),
        "abs" => Value::Double(num(0).abs()),
        "int" => Value::Int(num(0).floor() as i64),
        "fix" => Value::Int(num(0).trunc() as i64),
        "sgn" => Value::Int(num(0).signum() as i64),
        // Deterministic stand-ins: the engine never needs true randomness or
        // wall-clock time, only a value of the right shape to keep emulation
        // moving; the call itself is still worth nothing to action-log.
        "rnd" => Value::Double(0.5),
        "timer" => Value::Double(0.0),
        "now" | "date" | "time" => Value::unresolved(format!("{folded_name}()")),
        "year" | "month" | "day" | "hour" | "minute" | "second" => {
            Value::unresolved(format!("{folded_name}({})", text(0)))
        }
        "dateadd" => Value::unresolved(format!("DateAdd({}, {}, {})", text(0), text(1), text(2))),
        "datediff" => Value::unresolved(format!("DateDiff({}, {}, {})", text(0), text(1), text(2))),
        "format" => Value::string(text(0)),
        "array" => array_value(args.to_vec()),
        "ubound" => match arg(0) {
            Value::Array(cell) => {
                let dim = args.get(1).map(|_| (num(1) as usize).saturating_sub(1)).unwrap_or(0);
                Value::Int(cell.borrow().ubound(dim).unwrap_or(-1))
            }
            _ => Value::Int(-1),
        },
        "lbound" => match arg(0) {
            Value::Array(cell) => {
                let dim = args.get(1).map(|_| (num(1) as usize).saturating_sub(1)).unwrap_or(0);
                Value::Int(cell.borrow().lbound(dim).unwrap_or(0))
            }
            _ => Value::Int(0),
        },
        "typename" => Value::string(arg(0).type_name()),
        "vartype" => Value::Int(arg(0).var_type() as i64),
        _ => return None,
    };
    Some(result)
}

fn array_value(items: Vec<Value>) -> Value {
    let upper = items.len() as i64 - 1;
    Value::Array(Rc::new(RefCell::new(VbaArray {
        bounds: vec![(0, upper)],
        data: items,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mid_extracts_substring() {
        let args = vec![Value::string("hello world"), Value::Int(1), Value::Int(5)];
        assert_eq!(dispatch("mid", &args).unwrap().to_vba_string(), "hello");
    }

    #[test]
    fn instr_is_one_based() {
        let args = vec![Value::string("hello"), Value::string("llo")];
        assert_eq!(dispatch("instr", &args).unwrap().to_vba_string(), "3");
    }

    #[test]
    fn split_builds_an_array() {
        let args = vec![Value::string("a,b,c"), Value::string(",")];
        match dispatch("split", &args).unwrap() {
            Value::Array(cell) => assert_eq!(cell.borrow().data.len(), 3),
            other => panic!("expected array, got {other:?}"),
        }
    }

    #[test]
    fn environ_untouched_by_core_dispatch() {
        assert!(dispatch("environ", &[Value::string("USERPROFILE")]).is_none());
    }
}
