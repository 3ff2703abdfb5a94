//! `Environ`: preserves obfuscation clues rather than resolving a real value

use crate::value::Value;

/// `Environ(name)` returns the literal `"%name%"`, matching VBA's textual
/// environment-variable placeholder. A macro that builds a path from
/// `Environ("USERPROFILE")` stays legible in the action log instead of
/// collapsing to whatever this analysis host happens to have set.
pub fn environ(name: &str) -> Value {
    Value::string(format!("%{name}%"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_the_name_in_percent_signs() {
        assert_eq!(environ("TEMP").to_vba_string(), "%TEMP%");
    }
}
