//! Expression-scan mode (spec §6): walks every expression reachable from a
//! document's modules without ever constructing an [`super::Emulator`], and
//! records only the ones built entirely out of literals and operators. No
//! identifier, call, member access, or array literal is ever resolved here —
//! that's what keeps this pass side-effect-free and environment-independent.

use crate::ast::{CaseArm, Declaration, Expr, Module, Stmt, StmtKind, UnaryOp};
use crate::value::Value;

/// Returns `(printed-expression, evaluated-value)` pairs for every
/// side-effect-free constant expression found in `modules`
pub fn scan_expressions(modules: &[Module]) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for module in modules {
        for decl in &module.declarations {
            walk_declaration(decl, &mut out);
        }
    }
    out
}

fn walk_declaration(decl: &Declaration, out: &mut Vec<(String, String)>) {
    match decl {
        Declaration::Sub(p)
        | Declaration::Function(p)
        | Declaration::PropertyGet(p)
        | Declaration::PropertyLet(p)
        | Declaration::PropertySet(p) => {
            for stmt in &p.body {
                walk_stmt(stmt, out);
            }
        }
        Declaration::Const(bindings) => {
            for (_, expr) in bindings {
                try_record(expr, out);
            }
        }
        Declaration::Dim(specs) => {
            for spec in specs {
                if let Some(init) = &spec.initializer {
                    try_record(init, out);
                }
            }
        }
        _ => {}
    }
}

fn walk_stmt(stmt: &Stmt, out: &mut Vec<(String, String)>) {
    match &stmt.kind {
        StmtKind::Let { value, .. } | StmtKind::Set { value, .. } => try_record(value, out),
        StmtKind::ExprStmt(e) => try_record(e, out),
        StmtKind::Dim(specs) => {
            for spec in specs {
                if let Some(init) = &spec.initializer {
                    try_record(init, out);
                }
            }
        }
        StmtKind::If { branches, else_branch } => {
            for (cond, body) in branches {
                try_record(cond, out);
                walk_block(body, out);
            }
            if let Some(body) = else_branch {
                walk_block(body, out);
            }
        }
        StmtKind::SelectCase { selector, cases, else_branch } => {
            try_record(selector, out);
            for (arms, body) in cases {
                for arm in arms {
                    match arm {
                        CaseArm::Value(e) => try_record(e, out),
                        CaseArm::Range(lo, hi) => {
                            try_record(lo, out);
                            try_record(hi, out);
                        }
                        CaseArm::Is(_, e) => try_record(e, out),
                    }
                }
                walk_block(body, out);
            }
            if let Some(body) = else_branch {
                walk_block(body, out);
            }
        }
        StmtKind::ForLoop { start, end, step, body, .. } => {
            try_record(start, out);
            try_record(end, out);
            if let Some(s) = step {
                try_record(s, out);
            }
            walk_block(body, out);
        }
        StmtKind::ForEach { collection, body, .. } => {
            try_record(collection, out);
            walk_block(body, out);
        }
        StmtKind::While { condition, body } => {
            try_record(condition, out);
            walk_block(body, out);
        }
        StmtKind::DoLoop { pre_condition, post_condition, body } => {
            if let Some((_, c)) = pre_condition {
                try_record(c, out);
            }
            if let Some((_, c)) = post_condition {
                try_record(c, out);
            }
            walk_block(body, out);
        }
        StmtKind::With { target, body } => {
            try_record(target, out);
            walk_block(body, out);
        }
        StmtKind::Call { args, .. } => {
            for a in args {
                try_record(a, out);
            }
        }
        _ => {}
    }
}

fn walk_block(block: &[Stmt], out: &mut Vec<(String, String)>) {
    for stmt in block {
        walk_stmt(stmt, out);
    }
}

fn try_record(expr: &Expr, out: &mut Vec<(String, String)>) {
    if let Some(v) = fold_constant(expr) {
        out.push((expr.to_string(), v.to_vba_string()));
    }
}

/// Evaluates `expr` iff every leaf is a literal
fn fold_constant(expr: &Expr) -> Option<Value> {
    match expr {
        Expr::IntLit(i) => Some(Value::Int(*i)),
        Expr::DoubleLit(d) => Some(Value::Double(*d)),
        Expr::BoolLit(b) => Some(Value::Bool(*b)),
        Expr::StringLit(s) => Some(Value::string(s.clone())),
        Expr::NullLit => Some(Value::Null),
        Expr::EmptyLit => Some(Value::Empty),
        Expr::Unary(op, inner) => {
            let v = fold_constant(inner)?;
            Some(match op {
                UnaryOp::Neg => Value::Double(-v.to_vba_number()?),
                UnaryOp::Not => match v {
                    Value::Bool(b) => Value::Bool(!b),
                    other => Value::Int(!(other.to_vba_number()? as i64)),
                },
            })
        }
        Expr::Binary(op, l, r) => {
            let lv = fold_constant(l)?;
            let rv = fold_constant(r)?;
            Some(super::eval_binary(*op, lv, rv))
        }
        Expr::Concat(l, r) => {
            let lv = fold_constant(l)?;
            let rv = fold_constant(r)?;
            Some(Value::string(format!("{}{}", lv.to_vba_string(), rv.to_vba_string())))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::VbaParser;

    fn scan(source: &str) -> Vec<(String, String)> {
        let mut parser = VbaParser::new(1024);
        let module = parser.parse_module("M", "M", source).unwrap();
        scan_expressions(std::slice::from_ref(&module))
    }

    #[test]
    fn literal_arithmetic_is_recorded() {
        let found = scan("Sub Foo()\nx = 1 + 2\nEnd Sub\n");
        assert!(found.iter().any(|(_, v)| v == "3"));
    }

    #[test]
    fn identifier_involving_expression_is_skipped() {
        let found = scan("Sub Foo()\nx = y + 2\nEnd Sub\n");
        assert!(found.is_empty());
    }

    #[test]
    fn string_concatenation_of_literals_is_recorded() {
        let found = scan("Sub Foo()\nx = \"a\" & \"b\"\nEnd Sub\n");
        assert!(found.iter().any(|(_, v)| v == "ab"));
    }
}
