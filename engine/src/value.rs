//! The symbolic value domain `V` (spec §3) and its coercion rules (spec §4.D)

use std::fmt;
use std::rc::Rc;
use std::cell::RefCell;

/// A VBA runtime error code, as would be read back from `Err.Number`
pub type ErrorCode = u32;

/// An opaque handle to a modeled host object (`CreateObject`/`GetObject` result)
#[derive(Debug, Clone)]
pub struct ObjectHandle {
    /// Sequential id, unique within one `Emulator` run
    pub id: u32,
    /// The case-folded ProgID (or class name) this handle was created from
    pub progid: String,
}

/// The tagged value union every VBA expression evaluates to
///
/// `Unresolved` is a first-class citizen, not a failure mode: arithmetic or
/// concatenation involving it produces another `Unresolved` carrying the
/// printed form of the expression, so obfuscated macros that read
/// uninitialized globals still leave evidence in the action log.
#[derive(Debug, Clone)]
pub enum Value {
    Int(i64),
    Double(f64),
    Bool(bool),
    /// Code-page aware string: decoded text plus the code page it was
    /// decoded under (so re-encoding, if ever needed, is lossless)
    Str(Rc<str>),
    ByteArray(Rc<Vec<u8>>),
    /// Days since the VBA epoch (1899-12-30), matching VBA's date-as-double
    /// representation but kept as an integral day count plus a fractional
    /// time-of-day component for clarity
    Date(f64),
    Null,
    Empty,
    Missing,
    Error(ErrorCode),
    Object(ObjectHandle),
    /// A reference to a live environment cell, used for `ByRef` parameters
    Ref(Rc<RefCell<Value>>),
    /// An array of values sharing reference semantics on assignment
    Array(Rc<RefCell<VbaArray>>),
    /// A symbolic unknown: `name` is the printed form of the unresolved
    /// expression (an identifier, or a larger expression that contains one)
    Unresolved(Rc<str>),
}

/// A VBA array: dimension bounds plus backing storage, kept flat
#[derive(Debug, Clone, Default)]
pub struct VbaArray {
    /// (lower, upper) bound pairs, one per dimension
    pub bounds: Vec<(i64, i64)>,
    pub data: Vec<Value>,
}

impl VbaArray {
    pub fn new(bounds: Vec<(i64, i64)>) -> Self {
        let len = bounds
            .iter()
            .map(|(lo, hi)| (hi - lo + 1).max(0) as usize)
            .product::<usize>();
        VbaArray {
            bounds,
            data: vec![Value::Empty; len],
        }
    }

    /// `ReDim Preserve`: rebuild storage for `new_bounds`, keeping values at
    /// overlapping indices and zero-filling (`Empty`) the rest. Only
    /// single-dimension resizing is modeled, matching the common macro case;
    /// multi-dimensional resizes fall back to a plain re-allocation.
    pub fn redim_preserve(&mut self, new_bounds: Vec<(i64, i64)>) {
        use ctxutils::cmp::RangeIntersection;
        if self.bounds.len() == 1 && new_bounds.len() == 1 {
            let (old_lo, old_hi) = self.bounds[0];
            let (new_lo, new_hi) = new_bounds[0];
            let old_range = old_lo..(old_hi + 1);
            let new_range = new_lo..(new_hi + 1);
            let mut new_data = vec![Value::Empty; (new_hi - new_lo + 1).max(0) as usize];
            if old_range.overlaps_with(&new_range) {
                let lo = old_lo.max(new_lo);
                let hi = old_hi.min(new_hi);
                for i in lo..=hi {
                    let old_idx = (i - old_lo) as usize;
                    let new_idx = (i - new_lo) as usize;
                    if let Some(v) = self.data.get(old_idx) {
                        new_data[new_idx] = v.clone();
                    }
                }
            }
            self.data = new_data;
            self.bounds = new_bounds;
        } else {
            *self = VbaArray::new(new_bounds);
        }
    }

    pub fn lbound(&self, dim: usize) -> Option<i64> {
        self.bounds.get(dim).map(|(lo, _)| *lo)
    }

    pub fn ubound(&self, dim: usize) -> Option<i64> {
        self.bounds.get(dim).map(|(_, hi)| *hi)
    }
}

impl Value {
    pub fn string(s: impl Into<Rc<str>>) -> Self {
        Value::Str(s.into())
    }

    pub fn unresolved(expr_text: impl Into<Rc<str>>) -> Self {
        Value::Unresolved(expr_text.into())
    }

    /// VBA's `TypeName()` builtin
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "Long",
            Value::Double(_) => "Double",
            Value::Bool(_) => "Boolean",
            Value::Str(_) => "String",
            Value::ByteArray(_) => "Byte()",
            Value::Date(_) => "Date",
            Value::Null => "Null",
            Value::Empty => "Empty",
            Value::Missing => "Error",
            Value::Error(_) => "Error",
            Value::Object(_) => "Object",
            Value::Ref(_) => "Variant",
            Value::Array(_) => "Variant()",
            Value::Unresolved(_) => "Variant",
        }
    }

    /// VBA's `VarType()` builtin - numeric type tag
    pub fn var_type(&self) -> i32 {
        match self {
            Value::Empty => 0,
            Value::Null => 1,
            Value::Int(_) => 3,
            Value::Double(_) => 5,
            Value::Date(_) => 7,
            Value::Str(_) => 8,
            Value::Error(_) | Value::Missing => 10,
            Value::Bool(_) => 11,
            Value::Object(_) => 9,
            Value::Array(_) => 8204, // vbArray | vbVariant
            Value::ByteArray(_) => 8209,
            Value::Ref(inner) => inner.borrow().var_type(),
            Value::Unresolved(_) => 12, // vbVariant
        }
    }

    pub fn is_numeric(&self) -> bool {
        match self {
            Value::Int(_) | Value::Double(_) | Value::Bool(_) | Value::Date(_) => true,
            Value::Str(s) => parse_vba_number(s).is_some(),
            Value::Ref(inner) => inner.borrow().is_numeric(),
            _ => false,
        }
    }

    /// Dereferences through `Ref` cells; all other variants are returned by value
    pub fn deref(&self) -> Value {
        match self {
            Value::Ref(cell) => cell.borrow().clone(),
            other => other.clone(),
        }
    }

    /// `Number -> String` (spec §4.D): integers render without a decimal
    /// point, doubles use the shortest round-trippable form
    pub fn to_vba_string(&self) -> String {
        match self.deref() {
            Value::Int(i) => i.to_string(),
            Value::Double(d) => format_double(d),
            Value::Bool(b) => (if b { "True" } else { "False" }).to_string(),
            Value::Str(s) => s.to_string(),
            Value::Date(d) => format_double(d),
            Value::Null => String::new(),
            Value::Empty => String::new(),
            Value::Missing => String::new(),
            Value::Error(code) => format!("Error {code}"),
            Value::Object(h) => format!("<object:{}>", h.progid),
            Value::Unresolved(expr) => expr.to_string(),
            Value::ByteArray(b) => String::from_utf8_lossy(&b).into_owned(),
            Value::Array(_) => "Array".to_string(),
            Value::Ref(_) => unreachable!("deref() resolved Ref already"),
        }
    }

    /// `String -> Number` (spec §4.D)
    pub fn to_vba_number(&self) -> Option<f64> {
        match self.deref() {
            Value::Int(i) => Some(i as f64),
            Value::Double(d) => Some(d),
            Value::Bool(b) => Some(if b { -1.0 } else { 0.0 }),
            Value::Date(d) => Some(d),
            Value::Str(s) => parse_vba_number(&s),
            Value::Null => None,
            Value::Empty => Some(0.0),
            _ => None,
        }
    }

    /// Boolean-context coercion: `True == -1`, `False == 0`, any other
    /// non-zero numeric is truthy
    pub fn to_vba_bool(&self) -> bool {
        match self.deref() {
            Value::Bool(b) => b,
            other => other.to_vba_number().map(|n| n != 0.0).unwrap_or(false),
        }
    }

    /// Byte/Integer/Long assignment truncation, two's-complement wraparound
    pub fn coerce_to_byte(&self) -> u8 {
        (self.to_vba_number().unwrap_or(0.0) as i64).rem_euclid(256) as u8
    }
    pub fn coerce_to_integer(&self) -> i16 {
        (self.to_vba_number().unwrap_or(0.0) as i64).rem_euclid(1 << 16) as i16
    }
    pub fn coerce_to_long(&self) -> i32 {
        (self.to_vba_number().unwrap_or(0.0) as i64).rem_euclid(1i64 << 32) as i32
    }
}

/// Parses a VBA numeric literal/string: `&H`/`&O` prefixes, leading spaces
/// tolerated, trailing non-digits truncate the parse, empty string is `0`
/// with a soft warning (logged by the caller, not here)
pub fn parse_vba_number(s: &str) -> Option<f64> {
    let trimmed = s.trim_start();
    if trimmed.is_empty() {
        return Some(0.0);
    }
    let lower = trimmed.to_ascii_lowercase();
    if let Some(hex) = lower.strip_prefix("&h") {
        let digits: String = hex.chars().take_while(|c| c.is_ascii_hexdigit()).collect();
        return i64::from_str_radix(&digits, 16).ok().map(|v| v as f64);
    }
    if let Some(oct) = lower.strip_prefix("&o") {
        let digits: String = oct.chars().take_while(|c| ('0'..='7').contains(c)).collect();
        return i64::from_str_radix(&digits, 8).ok().map(|v| v as f64);
    }
    // Truncate at the first character that can't extend a valid numeric prefix
    let mut end = 0;
    let bytes = trimmed.as_bytes();
    let mut seen_dot = false;
    let mut seen_digit = false;
    let mut i = 0;
    if i < bytes.len() && (bytes[i] == b'+' || bytes[i] == b'-') {
        i += 1;
    }
    while i < bytes.len() {
        let c = bytes[i] as char;
        if c.is_ascii_digit() {
            seen_digit = true;
            i += 1;
            end = i;
        } else if c == '.' && !seen_dot {
            seen_dot = true;
            i += 1;
        } else {
            break;
        }
    }
    if !seen_digit {
        return None;
    }
    trimmed[..end].parse::<f64>().ok()
}

fn format_double(d: f64) -> String {
    if d.fract() == 0.0 && d.abs() < 1e15 {
        format!("{}", d as i64)
    } else {
        let mut s = format!("{d}");
        if !s.contains('.') && !s.contains('e') && !s.contains("inf") && !s.contains("NaN") {
            s.push_str(".0");
        }
        s
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_vba_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_literal_parses() {
        assert_eq!(parse_vba_number("&H1F"), Some(31.0));
    }

    #[test]
    fn empty_string_is_zero() {
        assert_eq!(parse_vba_number(""), Some(0.0));
    }

    #[test]
    fn trailing_garbage_truncates() {
        assert_eq!(parse_vba_number("42abc"), Some(42.0));
    }

    #[test]
    fn bool_is_minus_one() {
        assert_eq!(Value::Bool(true).to_vba_number(), Some(-1.0));
    }

    #[test]
    fn redim_preserve_keeps_overlap() {
        let mut arr = VbaArray::new(vec![(0, 4)]);
        for (i, v) in arr.data.iter_mut().enumerate() {
            *v = Value::Int(i as i64);
        }
        arr.redim_preserve(vec![(0, 2)]);
        assert_eq!(arr.data.len(), 3);
        match arr.data[1] {
            Value::Int(n) => assert_eq!(n, 1),
            _ => panic!("expected preserved Int"),
        }
    }

    #[test]
    fn unresolved_roundtrips_through_to_string() {
        let v = Value::unresolved("%USERPROFILE%\\a.exe");
        assert_eq!(v.to_vba_string(), "%USERPROFILE%\\a.exe");
    }
}
