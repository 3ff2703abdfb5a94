//! Turns a successful `pest` parse into the AST node set (component C)
//!
//! Each `build_*` function consumes one `Pair` for the rule it's named
//! after. Precedence-climbing rules (`imp_expr`, `compare_expr`, ...) fold
//! left-associatively, matching the grammar's left-recursive-via-repetition
//! shape. Operators that the grammar expresses as bare string literals
//! (`+`, `-`, `*`, `/`, and the `Like`/`Is` relational keywords) are wrapped
//! in a named rule (`add_op`, `mul_op`, `rel_op`) purely so this pass can
//! recover which alternative matched — `pest` only emits pairs for named
//! rules, never for inline literals.

use super::Rule;
use crate::ast::*;
use pest::iterators::Pair;

pub fn build_module(name: &str, pair: Pair<Rule>) -> Module {
    let mut module = Module {
        name: name.to_string(),
        declarations: Vec::new(),
    };
    for item in pair.into_inner() {
        match item.as_rule() {
            Rule::option_stmt => {
                let opt = item
                    .into_inner()
                    .next()
                    .map(|p| p.as_str().to_string())
                    .unwrap_or_default();
                module.declarations.push(Declaration::Option(opt));
            }
            Rule::declare_stmt => module.declarations.push(Declaration::Declare(build_declare(item))),
            Rule::type_decl => module.declarations.push(Declaration::Type(build_type_decl(item))),
            Rule::enum_decl => module.declarations.push(Declaration::Enum(build_enum_decl(item))),
            Rule::const_decl => module.declarations.push(Declaration::Const(build_const_decl(item))),
            Rule::dim_decl => module.declarations.push(Declaration::Dim(build_dim_decl(item))),
            Rule::sub_decl => module.declarations.push(Declaration::Sub(build_procedure(item))),
            Rule::function_decl => module.declarations.push(Declaration::Function(build_procedure(item))),
            Rule::property_decl => module.declarations.push(build_property(item)),
            Rule::EOI => {}
            other => {
                tracing::debug!("unhandled module item rule {:?}", other);
            }
        }
    }
    module
}

fn build_declare(pair: Pair<Rule>) -> DeclareDecl {
    let mut name = String::new();
    let mut lib = String::new();
    let mut alias = None;
    let mut params = Vec::new();
    let mut seen_string = 0;
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::ident => name = p.as_str().to_string(),
            Rule::string_lit => {
                let s = unescape_vba_string(p.as_str());
                if seen_string == 0 {
                    lib = s;
                } else {
                    alias = Some(s);
                }
                seen_string += 1;
            }
            Rule::param_list => params = build_param_list(p),
            _ => {}
        }
    }
    DeclareDecl { name, lib, alias, params }
}

fn build_type_decl(pair: Pair<Rule>) -> TypeDecl {
    let mut name = String::new();
    let mut fields = Vec::new();
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::ident => {
                if name.is_empty() {
                    name = p.as_str().to_string();
                }
            }
            Rule::type_field => fields.push(build_type_field(p)),
            _ => {}
        }
    }
    TypeDecl { name, fields }
}

fn build_type_field(pair: Pair<Rule>) -> (String, Option<String>) {
    let mut name = String::new();
    let mut ty = None;
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::ident => name = p.as_str().to_string(),
            Rule::type_name => ty = Some(p.as_str().to_string()),
            _ => {}
        }
    }
    (name, ty)
}

fn build_enum_decl(pair: Pair<Rule>) -> EnumDecl {
    let mut name = String::new();
    let mut members = Vec::new();
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::ident => {
                if name.is_empty() {
                    name = p.as_str().to_string();
                }
            }
            Rule::enum_member => members.push(build_enum_member(p)),
            _ => {}
        }
    }
    EnumDecl { name, members }
}

fn build_enum_member(pair: Pair<Rule>) -> (String, Option<Expr>) {
    let mut name = String::new();
    let mut value = None;
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::ident => name = p.as_str().to_string(),
            Rule::expr => value = Some(build_expr(p)),
            _ => {}
        }
    }
    (name, value)
}

fn build_const_decl(pair: Pair<Rule>) -> Vec<(String, Expr)> {
    pair.into_inner()
        .filter(|p| p.as_rule() == Rule::const_binding)
        .map(build_const_binding)
        .collect()
}

fn build_const_binding(pair: Pair<Rule>) -> (String, Expr) {
    let mut name = String::new();
    let mut value = Expr::EmptyLit;
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::ident => name = p.as_str().to_string(),
            Rule::expr => value = build_expr(p),
            _ => {}
        }
    }
    (name, value)
}

fn const_bindings_to_dimspecs(consts: Vec<(String, Expr)>) -> Vec<DimSpec> {
    consts
        .into_iter()
        .map(|(name, value)| DimSpec {
            name,
            declared_type: None,
            array_bounds: Vec::new(),
            initializer: Some(value),
        })
        .collect()
}

fn build_dim_decl(pair: Pair<Rule>) -> Vec<DimSpec> {
    pair.into_inner()
        .filter(|p| p.as_rule() == Rule::dim_spec)
        .map(build_dim_spec)
        .collect()
}

fn build_dim_spec(pair: Pair<Rule>) -> DimSpec {
    let mut name = String::new();
    let mut array_bounds = Vec::new();
    let mut declared_type = None;
    let mut initializer = None;
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::ident => name = p.as_str().to_string(),
            Rule::array_bounds => array_bounds = build_array_bounds(p),
            Rule::type_name => declared_type = Some(p.as_str().to_string()),
            Rule::expr => initializer = Some(build_expr(p)),
            _ => {}
        }
    }
    DimSpec {
        name,
        declared_type,
        array_bounds,
        initializer,
    }
}

fn build_array_bounds(pair: Pair<Rule>) -> Vec<(Expr, Expr)> {
    pair.into_inner()
        .filter(|p| p.as_rule() == Rule::dim_bound)
        .map(build_dim_bound)
        .collect()
}

/// A bare `N` bound defaults its lower bound to `0` (the `Option Base 0`
/// default this emulator always assumes, since `Option Base 1` toggling is
/// not itself an observable action).
fn build_dim_bound(pair: Pair<Rule>) -> (Expr, Expr) {
    let exprs: Vec<Expr> = pair
        .into_inner()
        .filter(|p| p.as_rule() == Rule::expr)
        .map(build_expr)
        .collect();
    match exprs.len() {
        2 => (exprs[0].clone(), exprs[1].clone()),
        1 => (Expr::IntLit(0), exprs[0].clone()),
        _ => (Expr::IntLit(0), Expr::IntLit(0)),
    }
}

fn build_param_list(pair: Pair<Rule>) -> Vec<Param> {
    pair.into_inner()
        .filter(|p| p.as_rule() == Rule::param)
        .map(build_param)
        .collect()
}

fn build_param(pair: Pair<Rule>) -> Param {
    let mut name = String::new();
    let mut declared_type = None;
    let mut by_ref = true;
    let mut default = None;
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::by_ref_kind => by_ref = !p.as_str().eq_ignore_ascii_case("byval"),
            Rule::ident => name = p.as_str().to_string(),
            Rule::type_name => declared_type = Some(p.as_str().to_string()),
            Rule::expr => default = Some(build_expr(p)),
            _ => {}
        }
    }
    Param {
        name,
        declared_type,
        by_ref,
        default,
    }
}

fn build_procedure(pair: Pair<Rule>) -> Procedure {
    let mut is_private = false;
    let mut name = String::new();
    let mut params = Vec::new();
    let mut body = Vec::new();
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::visibility => is_private = p.as_str().eq_ignore_ascii_case("private"),
            Rule::ident => {
                if name.is_empty() {
                    name = p.as_str().to_string();
                }
            }
            Rule::param_list => params = build_param_list(p),
            Rule::block => body = build_block(p),
            _ => {}
        }
    }
    Procedure {
        name,
        params,
        body,
        is_private,
    }
}

fn build_property(pair: Pair<Rule>) -> Declaration {
    let mut is_private = false;
    let mut name = String::new();
    let mut params = Vec::new();
    let mut body = Vec::new();
    let mut kind_text = String::new();
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::visibility => is_private = p.as_str().eq_ignore_ascii_case("private"),
            Rule::property_kind => kind_text = p.as_str().to_ascii_lowercase(),
            Rule::ident => {
                if name.is_empty() {
                    name = p.as_str().to_string();
                }
            }
            Rule::param_list => params = build_param_list(p),
            Rule::block => body = build_block(p),
            _ => {}
        }
    }
    let proc = Procedure {
        name,
        params,
        body,
        is_private,
    };
    match kind_text.as_str() {
        "let" => Declaration::PropertyLet(proc),
        "set" => Declaration::PropertySet(proc),
        _ => Declaration::PropertyGet(proc),
    }
}

fn build_block(pair: Pair<Rule>) -> Vec<Stmt> {
    pair.into_inner()
        .filter(|p| p.as_rule() == Rule::stmt)
        .map(build_stmt)
        .collect()
}

fn build_stmt(pair: Pair<Rule>) -> Stmt {
    let mut label = None;
    let mut kind = StmtKind::Nop;
    for p in pair.into_inner() {
        if p.as_rule() == Rule::label {
            label = Some(p.as_str().trim_end_matches(':').to_string());
        } else {
            kind = dispatch_stmt_kind(p);
        }
    }
    Stmt { label, kind }
}

fn dispatch_stmt_kind(p: Pair<Rule>) -> StmtKind {
    match p.as_rule() {
        Rule::if_stmt => build_if(p),
        Rule::select_case_stmt => build_select_case(p),
        Rule::for_each_stmt => build_for_each(p),
        Rule::for_stmt => build_for(p),
        Rule::while_stmt => build_while(p),
        Rule::do_loop_stmt => build_do_loop(p),
        Rule::with_stmt => build_with(p),
        Rule::on_error_stmt => build_on_error(p),
        Rule::goto_stmt => build_goto(p),
        Rule::exit_stmt => build_exit(p),
        Rule::raise_stmt => build_raise(p),
        Rule::resume_stmt => build_resume(p),
        Rule::open_stmt => build_open(p),
        Rule::close_stmt => build_close(p),
        Rule::print_stmt => build_print(p),
        Rule::write_stmt => build_write(p),
        Rule::line_input_stmt => build_line_input(p),
        Rule::redim_stmt => build_redim(p),
        Rule::erase_stmt => build_erase(p),
        Rule::dim_decl => StmtKind::Dim(build_dim_decl(p)),
        Rule::const_decl => StmtKind::Dim(const_bindings_to_dimspecs(build_const_decl(p))),
        Rule::set_stmt => build_set(p),
        Rule::let_stmt => build_let(p),
        Rule::call_stmt => build_call(p),
        Rule::expr_stmt => build_expr_stmt(p),
        other => {
            tracing::debug!("unhandled statement rule {:?}", other);
            StmtKind::Nop
        }
    }
}

fn build_if(pair: Pair<Rule>) -> StmtKind {
    let mut inner = pair.into_inner();
    let condition = build_expr(inner.next().expect("if_stmt condition"));
    let rest: Vec<Pair<Rule>> = inner.collect();
    match rest.first() {
        Some(first) if first.as_rule() == Rule::block => {
            let mut branches = vec![(condition, build_block(first.clone()))];
            let mut else_branch = None;
            for p in rest.into_iter().skip(1) {
                match p.as_rule() {
                    Rule::elseif_clause => {
                        let mut ei = p.into_inner();
                        let c = build_expr(ei.next().expect("elseif condition"));
                        let b = build_block(ei.next().expect("elseif body"));
                        branches.push((c, b));
                    }
                    Rule::else_clause => {
                        let mut ei = p.into_inner();
                        else_branch = Some(build_block(ei.next().expect("else body")));
                    }
                    _ => {}
                }
            }
            StmtKind::If { branches, else_branch }
        }
        Some(first) => {
            let then_stmt = Stmt {
                label: None,
                kind: dispatch_stmt_kind(first.clone()),
            };
            let else_branch = rest.get(1).map(|p| {
                vec![Stmt {
                    label: None,
                    kind: dispatch_stmt_kind(p.clone()),
                }]
            });
            StmtKind::If {
                branches: vec![(condition, vec![then_stmt])],
                else_branch,
            }
        }
        None => StmtKind::If {
            branches: vec![(condition, Vec::new())],
            else_branch: None,
        },
    }
}

fn build_select_case(pair: Pair<Rule>) -> StmtKind {
    let mut inner = pair.into_inner();
    let selector = build_expr(inner.next().expect("select case selector"));
    let mut cases = Vec::new();
    let mut else_branch = None;
    for p in inner {
        match p.as_rule() {
            Rule::case_clause => cases.push(build_case_clause(p)),
            Rule::block => else_branch = Some(build_block(p)),
            _ => {}
        }
    }
    StmtKind::SelectCase {
        selector,
        cases,
        else_branch,
    }
}

fn build_case_clause(pair: Pair<Rule>) -> (Vec<CaseArm>, Vec<Stmt>) {
    let mut arms = Vec::new();
    let mut body = Vec::new();
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::case_arm => arms.push(build_case_arm(p)),
            Rule::block => body = build_block(p),
            _ => {}
        }
    }
    (arms, body)
}

fn build_case_arm(pair: Pair<Rule>) -> CaseArm {
    let inner = match pair.into_inner().next() {
        Some(i) => i,
        None => return CaseArm::Value(Expr::EmptyLit),
    };
    match inner.as_rule() {
        Rule::case_is => {
            let mut ii = inner.into_inner();
            let op = build_compare_op(ii.next().expect("case Is operator"));
            let e = build_expr(ii.next().expect("case Is operand"));
            CaseArm::Is(op, e)
        }
        Rule::case_range => {
            let mut ii = inner.into_inner();
            let lo = build_expr(ii.next().expect("case range lo"));
            let hi = build_expr(ii.next().expect("case range hi"));
            CaseArm::Range(lo, hi)
        }
        Rule::expr => CaseArm::Value(build_expr(inner)),
        _ => CaseArm::Value(Expr::EmptyLit),
    }
}

fn build_compare_op(pair: Pair<Rule>) -> CompareOp {
    match pair.as_str() {
        "<>" => CompareOp::Ne,
        "<=" => CompareOp::Le,
        ">=" => CompareOp::Ge,
        "<" => CompareOp::Lt,
        ">" => CompareOp::Gt,
        _ => CompareOp::Eq,
    }
}

fn build_for(pair: Pair<Rule>) -> StmtKind {
    let mut counter = String::new();
    let mut exprs = Vec::new();
    let mut body = Vec::new();
    let mut seen_ident = false;
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::ident => {
                if !seen_ident {
                    counter = p.as_str().to_string();
                    seen_ident = true;
                }
            }
            Rule::expr => exprs.push(build_expr(p)),
            Rule::block => body = build_block(p),
            _ => {}
        }
    }
    StmtKind::ForLoop {
        counter,
        start: exprs.first().cloned().unwrap_or(Expr::IntLit(0)),
        end: exprs.get(1).cloned().unwrap_or(Expr::IntLit(0)),
        step: exprs.get(2).cloned(),
        body,
    }
}

fn build_for_each(pair: Pair<Rule>) -> StmtKind {
    let mut item = String::new();
    let mut collection = Expr::EmptyLit;
    let mut body = Vec::new();
    let mut seen_ident = false;
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::ident => {
                if !seen_ident {
                    item = p.as_str().to_string();
                    seen_ident = true;
                }
            }
            Rule::expr => collection = build_expr(p),
            Rule::block => body = build_block(p),
            _ => {}
        }
    }
    StmtKind::ForEach { item, collection, body }
}

fn build_while(pair: Pair<Rule>) -> StmtKind {
    let mut inner = pair.into_inner();
    let condition = build_expr(inner.next().expect("while condition"));
    let body = inner.find(|p| p.as_rule() == Rule::block).map(build_block).unwrap_or_default();
    StmtKind::While { condition, body }
}

fn build_do_loop(pair: Pair<Rule>) -> StmtKind {
    let mut pre_condition = None;
    let mut post_condition = None;
    let mut body = Vec::new();
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::do_lead_condition => pre_condition = Some(build_loop_condition(p)),
            Rule::do_trail_condition => post_condition = Some(build_loop_condition(p)),
            Rule::block => body = build_block(p),
            _ => {}
        }
    }
    StmtKind::DoLoop {
        pre_condition,
        post_condition,
        body,
    }
}

/// `true` means `While` (loop continues while the expression is truthy),
/// `false` means `Until` (loop continues while it's falsy)
fn build_loop_condition(pair: Pair<Rule>) -> (bool, Expr) {
    let mut is_while = true;
    let mut expr = Expr::EmptyLit;
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::loop_kind => is_while = p.as_str().eq_ignore_ascii_case("while"),
            Rule::expr => expr = build_expr(p),
            _ => {}
        }
    }
    (is_while, expr)
}

fn build_with(pair: Pair<Rule>) -> StmtKind {
    let mut inner = pair.into_inner();
    let target = build_expr(inner.next().expect("with target"));
    let body = inner.find(|p| p.as_rule() == Rule::block).map(build_block).unwrap_or_default();
    StmtKind::With { target, body }
}

fn build_on_error(pair: Pair<Rule>) -> StmtKind {
    let text = pair.as_str().to_ascii_lowercase();
    if let Some(id) = pair.into_inner().find(|p| p.as_rule() == Rule::ident) {
        StmtKind::OnErrorGotoLabel(id.as_str().to_string())
    } else if text.contains("resume") {
        StmtKind::OnErrorResumeNext
    } else {
        StmtKind::OnErrorGotoZero
    }
}

fn build_goto(pair: Pair<Rule>) -> StmtKind {
    StmtKind::Goto(
        pair.into_inner()
            .next()
            .map(|p| p.as_str().to_string())
            .unwrap_or_default(),
    )
}

fn build_exit(pair: Pair<Rule>) -> StmtKind {
    let text = pair.as_str().to_ascii_lowercase();
    let kind = if text.contains("sub") {
        ExitKind::Sub
    } else if text.contains("function") {
        ExitKind::Function
    } else if text.contains("property") {
        ExitKind::Property
    } else if text.contains("do") {
        ExitKind::Do
    } else {
        ExitKind::For
    };
    StmtKind::Exit(kind)
}

fn build_raise(pair: Pair<Rule>) -> StmtKind {
    let exprs: Vec<Expr> = pair.into_inner().filter(|p| p.as_rule() == Rule::expr).map(build_expr).collect();
    StmtKind::Raise {
        number: exprs.first().cloned().unwrap_or(Expr::IntLit(0)),
        description: exprs.get(1).cloned(),
    }
}

fn build_resume(pair: Pair<Rule>) -> StmtKind {
    let text = pair.as_str().to_ascii_lowercase();
    if let Some(id) = pair.into_inner().find(|p| p.as_rule() == Rule::ident) {
        StmtKind::Resume(ResumeKind::Label(id.as_str().to_string()))
    } else if text.contains("next") {
        StmtKind::Resume(ResumeKind::Next)
    } else {
        StmtKind::Resume(ResumeKind::Bare)
    }
}

fn build_open(pair: Pair<Rule>) -> StmtKind {
    let mut exprs = Vec::new();
    let mut mode = OpenMode::Input;
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::expr => exprs.push(build_expr(p)),
            Rule::open_mode => mode = build_open_mode(p),
            _ => {}
        }
    }
    StmtKind::Open {
        path: exprs.first().cloned().unwrap_or(Expr::StringLit(String::new())),
        mode,
        file_number: exprs.get(1).cloned().unwrap_or(Expr::IntLit(1)),
    }
}

fn build_open_mode(pair: Pair<Rule>) -> OpenMode {
    match pair.as_str().to_ascii_lowercase().as_str() {
        "output" => OpenMode::Output,
        "append" => OpenMode::Append,
        "binary" => OpenMode::Binary,
        "random" => OpenMode::Random,
        _ => OpenMode::Input,
    }
}

fn build_close(pair: Pair<Rule>) -> StmtKind {
    StmtKind::Close(pair.into_inner().filter(|p| p.as_rule() == Rule::expr).map(build_expr).collect())
}

fn build_print(pair: Pair<Rule>) -> StmtKind {
    let mut file_number = None;
    let mut args = Vec::new();
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::expr => file_number = Some(build_expr(p)),
            Rule::print_args => args = build_print_args(p),
            _ => {}
        }
    }
    StmtKind::Print { file_number, args }
}

fn build_print_args(pair: Pair<Rule>) -> Vec<Expr> {
    pair.into_inner().filter(|p| p.as_rule() == Rule::expr).map(build_expr).collect()
}

fn build_write(pair: Pair<Rule>) -> StmtKind {
    let mut file_number = Expr::IntLit(1);
    let mut args = Vec::new();
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::expr => file_number = build_expr(p),
            Rule::print_args => args = build_print_args(p),
            _ => {}
        }
    }
    StmtKind::Write { file_number, args }
}

fn build_line_input(pair: Pair<Rule>) -> StmtKind {
    let exprs: Vec<Expr> = pair.into_inner().filter(|p| p.as_rule() == Rule::expr).map(build_expr).collect();
    StmtKind::LineInput {
        file_number: exprs.first().cloned().unwrap_or(Expr::IntLit(1)),
        target: exprs.get(1).cloned().unwrap_or(Expr::Ident(String::new())),
    }
}

fn build_redim(pair: Pair<Rule>) -> StmtKind {
    let mut preserve = false;
    let mut specs = Vec::new();
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::preserve_kw => preserve = true,
            Rule::dim_spec => specs.push(build_dim_spec(p)),
            _ => {}
        }
    }
    StmtKind::ReDim { preserve, specs }
}

fn build_erase(pair: Pair<Rule>) -> StmtKind {
    StmtKind::Erase(pair.into_inner().filter(|p| p.as_rule() == Rule::expr).map(build_expr).collect())
}

fn build_lvalue(pair: Pair<Rule>) -> Expr {
    match pair.into_inner().next() {
        Some(inner) => build_postfix(inner),
        None => Expr::EmptyLit,
    }
}

fn build_let(pair: Pair<Rule>) -> StmtKind {
    let mut target = Expr::EmptyLit;
    let mut value = Expr::EmptyLit;
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::lvalue => target = build_lvalue(p),
            Rule::expr => value = build_expr(p),
            _ => {}
        }
    }
    StmtKind::Let { target, value }
}

fn build_set(pair: Pair<Rule>) -> StmtKind {
    let mut target = Expr::EmptyLit;
    let mut value = Expr::EmptyLit;
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::lvalue => target = build_lvalue(p),
            Rule::expr => value = build_expr(p),
            _ => {}
        }
    }
    StmtKind::Set { target, value }
}

fn build_call(pair: Pair<Rule>) -> StmtKind {
    let target_pair = pair.into_inner().next().expect("Call requires a target");
    match build_postfix(target_pair) {
        Expr::IndexOrCall(callee, args) => StmtKind::Call { target: *callee, args },
        other => StmtKind::Call { target: other, args: Vec::new() },
    }
}

fn build_expr_stmt(pair: Pair<Rule>) -> StmtKind {
    let mut callee = Expr::EmptyLit;
    let mut args = Vec::new();
    let mut has_bare_args = false;
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::postfix_expr => callee = build_postfix(p),
            Rule::call_args => {
                args = build_call_args(p);
                has_bare_args = true;
            }
            _ => {}
        }
    }
    if has_bare_args {
        StmtKind::Call { target: callee, args }
    } else if let Expr::IndexOrCall(inner_callee, inner_args) = callee {
        StmtKind::Call {
            target: *inner_callee,
            args: inner_args,
        }
    } else {
        StmtKind::ExprStmt(callee)
    }
}

fn build_call_args(pair: Pair<Rule>) -> Vec<Expr> {
    pair.into_inner().filter(|p| p.as_rule() == Rule::expr).map(build_expr).collect()
}

// ---- expressions ----

pub fn build_expr(pair: Pair<Rule>) -> Expr {
    let inner = pair.into_inner().next().expect("expr has an imp_expr child");
    build_imp(inner)
}

fn build_single_op_chain(pair: Pair<Rule>, op: BinaryOp, next: fn(Pair<Rule>) -> Expr) -> Expr {
    let mut iter = pair.into_inner();
    let mut acc = next(iter.next().expect("operator chain requires an operand"));
    for p in iter {
        acc = Expr::Binary(op, Box::new(acc), Box::new(next(p)));
    }
    acc
}

fn build_imp(pair: Pair<Rule>) -> Expr {
    build_single_op_chain(pair, BinaryOp::Imp, build_eqv)
}
fn build_eqv(pair: Pair<Rule>) -> Expr {
    build_single_op_chain(pair, BinaryOp::Eqv, build_xor)
}
fn build_xor(pair: Pair<Rule>) -> Expr {
    build_single_op_chain(pair, BinaryOp::Xor, build_or)
}
fn build_or(pair: Pair<Rule>) -> Expr {
    build_single_op_chain(pair, BinaryOp::Or, build_and)
}
fn build_and(pair: Pair<Rule>) -> Expr {
    build_single_op_chain(pair, BinaryOp::And, build_not)
}

fn build_not(pair: Pair<Rule>) -> Expr {
    let inner = pair.into_inner().next().expect("not_expr child");
    match inner.as_rule() {
        Rule::not_expr => Expr::Unary(UnaryOp::Not, Box::new(build_not(inner))),
        Rule::compare_expr => build_compare(inner),
        _ => unreachable!("not_expr only wraps not_expr or compare_expr"),
    }
}

fn build_compare(pair: Pair<Rule>) -> Expr {
    let mut iter = pair.into_inner();
    let mut acc = build_concat(iter.next().expect("compare_expr operand"));
    let mut pending_op = None;
    for p in iter {
        match p.as_rule() {
            Rule::rel_op => pending_op = Some(p),
            Rule::concat_expr => {
                let rhs = build_concat(p);
                let op_pair = pending_op.take().expect("rel_op precedes its right operand");
                acc = apply_rel_op(acc, op_pair, rhs);
            }
            _ => {}
        }
    }
    acc
}

fn apply_rel_op(lhs: Expr, op_pair: Pair<Rule>, rhs: Expr) -> Expr {
    let text = op_pair.as_str().to_ascii_lowercase();
    if text == "like" {
        return Expr::Like(Box::new(lhs), Box::new(rhs));
    }
    if text == "is" {
        return Expr::Binary(BinaryOp::Is, Box::new(lhs), Box::new(rhs));
    }
    let cmp_pair = op_pair.into_inner().next().expect("compare_op inside rel_op");
    let cmp = build_compare_op(cmp_pair);
    Expr::Binary(BinaryOp::Compare(cmp), Box::new(lhs), Box::new(rhs))
}

fn build_concat(pair: Pair<Rule>) -> Expr {
    let mut iter = pair.into_inner();
    let mut acc = build_additive(iter.next().expect("concat_expr operand"));
    for p in iter {
        acc = Expr::Concat(Box::new(acc), Box::new(build_additive(p)));
    }
    acc
}

fn build_additive(pair: Pair<Rule>) -> Expr {
    let mut iter = pair.into_inner();
    let mut acc = build_multiplicative(iter.next().expect("additive_expr operand"));
    let mut pending_op = None;
    for p in iter {
        match p.as_rule() {
            Rule::add_op => pending_op = Some(p.as_str().to_string()),
            Rule::multiplicative_expr => {
                let rhs = build_multiplicative(p);
                let op = if pending_op.take().as_deref() == Some("+") {
                    BinaryOp::Add
                } else {
                    BinaryOp::Sub
                };
                acc = Expr::Binary(op, Box::new(acc), Box::new(rhs));
            }
            _ => {}
        }
    }
    acc
}

fn build_multiplicative(pair: Pair<Rule>) -> Expr {
    let mut iter = pair.into_inner();
    let mut acc = build_intdiv(iter.next().expect("multiplicative_expr operand"));
    let mut pending_op = None;
    for p in iter {
        match p.as_rule() {
            Rule::mul_op => pending_op = Some(p.as_str().to_string()),
            Rule::intdiv_expr => {
                let rhs = build_intdiv(p);
                let op = if pending_op.take().as_deref() == Some("*") {
                    BinaryOp::Mul
                } else {
                    BinaryOp::Div
                };
                acc = Expr::Binary(op, Box::new(acc), Box::new(rhs));
            }
            _ => {}
        }
    }
    acc
}

fn build_intdiv(pair: Pair<Rule>) -> Expr {
    build_single_op_chain(pair, BinaryOp::IDiv, build_mod)
}

fn build_mod(pair: Pair<Rule>) -> Expr {
    build_single_op_chain(pair, BinaryOp::Mod, build_unary)
}

fn build_unary(pair: Pair<Rule>) -> Expr {
    let inner = pair.into_inner().next().expect("unary_expr child");
    match inner.as_rule() {
        Rule::unary_expr => Expr::Unary(UnaryOp::Neg, Box::new(build_unary(inner))),
        Rule::power_expr => build_power(inner),
        _ => unreachable!("unary_expr only wraps unary_expr or power_expr"),
    }
}

fn build_power(pair: Pair<Rule>) -> Expr {
    let mut iter = pair.into_inner();
    let base = build_postfix(iter.next().expect("power_expr base"));
    match iter.next() {
        Some(exp_pair) => Expr::Binary(BinaryOp::Pow, Box::new(base), Box::new(build_unary(exp_pair))),
        None => base,
    }
}

fn build_postfix(pair: Pair<Rule>) -> Expr {
    let mut iter = pair.into_inner();
    let mut acc = build_primary(iter.next().expect("postfix_expr requires a primary"));
    for p in iter {
        match p.as_rule() {
            Rule::member_op => {
                let name = p
                    .into_inner()
                    .next()
                    .map(|id| id.as_str().to_string())
                    .unwrap_or_default();
                acc = Expr::Member(Box::new(acc), name);
            }
            Rule::index_op => {
                let args: Vec<Expr> = p.into_inner().filter(|e| e.as_rule() == Rule::expr).map(build_expr).collect();
                acc = Expr::IndexOrCall(Box::new(acc), args);
            }
            _ => {}
        }
    }
    acc
}

fn build_primary(pair: Pair<Rule>) -> Expr {
    match pair.as_rule() {
        Rule::array_lit => Expr::Array(pair.into_inner().filter(|p| p.as_rule() == Rule::expr).map(build_expr).collect()),
        Rule::date_lit => Expr::DateLit(strip_delims(pair.as_str())),
        Rule::number_lit => build_number_lit(pair),
        Rule::string_lit => Expr::StringLit(unescape_vba_string(pair.as_str())),
        Rule::with_member => Expr::WithMember(pair.as_str().trim_start_matches('.').to_string()),
        Rule::expr => build_expr(pair),
        Rule::ident => build_ident_literal(pair.as_str()),
        other => {
            tracing::debug!("unhandled primary rule {:?}", other);
            Expr::EmptyLit
        }
    }
}

fn build_ident_literal(text: &str) -> Expr {
    let folded = text.to_ascii_lowercase();
    let bare = folded.trim_end_matches(|c| "$%&!#@".contains(c));
    match bare {
        "true" => Expr::BoolLit(true),
        "false" => Expr::BoolLit(false),
        "null" => Expr::NullLit,
        "empty" | "nothing" => Expr::EmptyLit,
        _ => Expr::Ident(text.to_string()),
    }
}

fn build_number_lit(pair: Pair<Rule>) -> Expr {
    let text = pair.as_str();
    let trimmed = text.trim_end_matches(|c| "$%&!#@".contains(c));
    let lower = trimmed.to_ascii_lowercase();
    if let Some(hex) = lower.strip_prefix("&h") {
        if let Ok(v) = i64::from_str_radix(hex, 16) {
            return Expr::IntLit(v);
        }
    }
    if let Some(oct) = lower.strip_prefix("&o") {
        if let Ok(v) = i64::from_str_radix(oct, 8) {
            return Expr::IntLit(v);
        }
    }
    if trimmed.contains('.') || lower.contains('e') {
        if let Ok(v) = trimmed.parse::<f64>() {
            return Expr::DoubleLit(v);
        }
    }
    match trimmed.parse::<i64>() {
        Ok(v) => Expr::IntLit(v),
        Err(_) => trimmed.parse::<f64>().map(Expr::DoubleLit).unwrap_or(Expr::IntLit(0)),
    }
}

fn unescape_vba_string(text: &str) -> String {
    let inner = &text[1..text.len() - 1];
    inner.replace("\"\"", "\"")
}

fn strip_delims(text: &str) -> String {
    text.trim_matches('#').to_string()
}

#[cfg(test)]
mod tests {
    use super::super::VbaParser;

    #[test]
    fn binary_precedence_nests_correctly() {
        let mut parser = VbaParser::new(64);
        let module = parser
            .parse_module("M", "M", "Sub S()\nx = 1 + 2 * 3\nEnd Sub\n")
            .unwrap();
        let proc = module.find_procedure("S").unwrap();
        assert_eq!(proc.body.len(), 1);
    }
}
