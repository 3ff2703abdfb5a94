//! The AST node set (spec §3, §4.C)
//!
//! Nodes are tagged variants produced straight from parse results, with no
//! further validation — type checking and name resolution are deferred to
//! evaluation. Each node keeps a stable printable form so the interpreter can
//! build the `Unresolved` symbolic string (spec §9) and action-log
//! descriptions without re-deriving source text.

use std::fmt;

/// A parsed module: an ordered list of top-level declarations
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub name: String,
    pub declarations: Vec<Declaration>,
}

impl Module {
    pub fn procedures(&self) -> impl Iterator<Item = &Procedure> {
        self.declarations.iter().filter_map(|d| match d {
            Declaration::Sub(p) | Declaration::Function(p) => Some(p),
            _ => None,
        })
    }

    pub fn find_procedure(&self, name: &str) -> Option<&Procedure> {
        let name = name.to_ascii_lowercase();
        self.procedures()
            .find(|p| p.name.to_ascii_lowercase() == name)
    }
}

#[derive(Debug, Clone)]
pub enum Declaration {
    Sub(Procedure),
    Function(Procedure),
    PropertyGet(Procedure),
    PropertyLet(Procedure),
    PropertySet(Procedure),
    /// Module-scope `Dim`
    Dim(Vec<DimSpec>),
    Const(Vec<(String, Expr)>),
    Type(TypeDecl),
    Enum(EnumDecl),
    Declare(DeclareDecl),
    Option(String),
}

#[derive(Debug, Clone)]
pub struct DimSpec {
    pub name: String,
    pub declared_type: Option<String>,
    pub array_bounds: Vec<(Expr, Expr)>,
    pub initializer: Option<Expr>,
}

#[derive(Debug, Clone)]
pub struct TypeDecl {
    pub name: String,
    pub fields: Vec<(String, Option<String>)>,
}

#[derive(Debug, Clone)]
pub struct EnumDecl {
    pub name: String,
    pub members: Vec<(String, Option<Expr>)>,
}

#[derive(Debug, Clone)]
pub struct DeclareDecl {
    pub name: String,
    pub lib: String,
    pub alias: Option<String>,
    pub params: Vec<Param>,
}

/// A `Sub`/`Function`/`Property` body: parameters plus a statement sequence
#[derive(Debug, Clone)]
pub struct Procedure {
    pub name: String,
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
    pub is_private: bool,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub declared_type: Option<String>,
    pub by_ref: bool,
    pub default: Option<Expr>,
}

/// A labeled or unlabeled statement
#[derive(Debug, Clone)]
pub struct Stmt {
    pub label: Option<String>,
    pub kind: StmtKind,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    Let { target: Expr, value: Expr },
    Set { target: Expr, value: Expr },
    Dim(Vec<DimSpec>),
    ReDim { preserve: bool, specs: Vec<DimSpec> },
    Erase(Vec<Expr>),
    Call { target: Expr, args: Vec<Expr> },
    If {
        branches: Vec<(Expr, Vec<Stmt>)>,
        else_branch: Option<Vec<Stmt>>,
    },
    SelectCase {
        selector: Expr,
        cases: Vec<(Vec<CaseArm>, Vec<Stmt>)>,
        else_branch: Option<Vec<Stmt>>,
    },
    ForLoop {
        counter: String,
        start: Expr,
        end: Expr,
        step: Option<Expr>,
        body: Vec<Stmt>,
    },
    ForEach {
        item: String,
        collection: Expr,
        body: Vec<Stmt>,
    },
    While {
        condition: Expr,
        body: Vec<Stmt>,
    },
    DoLoop {
        /// `None` for `Do ... Loop` with no test, pre-test otherwise
        pre_condition: Option<(bool, Expr)>,
        post_condition: Option<(bool, Expr)>,
        body: Vec<Stmt>,
    },
    With {
        target: Expr,
        body: Vec<Stmt>,
    },
    OnErrorResumeNext,
    OnErrorGotoZero,
    OnErrorGotoLabel(String),
    Goto(String),
    Exit(ExitKind),
    Raise { number: Expr, description: Option<Expr> },
    Resume(ResumeKind),
    Open {
        path: Expr,
        mode: OpenMode,
        file_number: Expr,
    },
    Close(Vec<Expr>),
    Print { file_number: Option<Expr>, args: Vec<Expr> },
    Write { file_number: Expr, args: Vec<Expr> },
    LineInput { file_number: Expr, target: Expr },
    ExprStmt(Expr),
    Nop,
}

#[derive(Debug, Clone)]
pub enum CaseArm {
    Value(Expr),
    Range(Expr, Expr),
    Is(CompareOp, Expr),
}

#[derive(Debug, Clone, Copy)]
pub enum ExitKind {
    Sub,
    Function,
    Property,
    Do,
    For,
}

#[derive(Debug, Clone)]
pub enum ResumeKind {
    Bare,
    Next,
    Label(String),
}

#[derive(Debug, Clone, Copy)]
pub enum OpenMode {
    Input,
    Output,
    Append,
    Binary,
    Random,
}

/// Expressions. `Index`/`Call` are grammatically indistinguishable (spec §3)
/// and are disambiguated only at evaluation time, once the callee's nature
/// (array vs. procedure) is known.
#[derive(Debug, Clone)]
pub enum Expr {
    IntLit(i64),
    DoubleLit(f64),
    BoolLit(bool),
    StringLit(String),
    DateLit(String),
    NullLit,
    EmptyLit,
    Ident(String),
    /// `a.b`
    Member(Box<Expr>, String),
    /// `a(i, j)` - call or index, resolved at evaluation time
    IndexOrCall(Box<Expr>, Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Concat(Box<Expr>, Box<Expr>),
    Like(Box<Expr>, Box<Expr>),
    Array(Vec<Expr>),
    /// Leading `.member` inside a `With` block
    WithMember(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    IDiv,
    Mod,
    Pow,
    Compare(CompareOp),
    And,
    Or,
    Xor,
    Eqv,
    Imp,
    Is,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl fmt::Display for Expr {
    /// Stable printed form — the same text used to build an `Unresolved`
    /// symbolic string and to label actions in the action log
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::IntLit(i) => write!(f, "{i}"),
            Expr::DoubleLit(d) => write!(f, "{d}"),
            Expr::BoolLit(b) => write!(f, "{}", if *b { "True" } else { "False" }),
            Expr::StringLit(s) => write!(f, "\"{s}\""),
            Expr::DateLit(s) => write!(f, "#{s}#"),
            Expr::NullLit => write!(f, "Null"),
            Expr::EmptyLit => write!(f, "Empty"),
            Expr::Ident(name) => write!(f, "{name}"),
            Expr::Member(base, name) => write!(f, "{base}.{name}"),
            Expr::IndexOrCall(callee, args) => {
                write!(f, "{callee}(")?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{a}")?;
                }
                write!(f, ")")
            }
            Expr::Unary(op, e) => match op {
                UnaryOp::Neg => write!(f, "-{e}"),
                UnaryOp::Not => write!(f, "Not {e}"),
            },
            Expr::Binary(op, l, r) => write!(f, "{l} {} {r}", op_text(*op)),
            Expr::Concat(l, r) => write!(f, "{l} & {r}"),
            Expr::Like(l, r) => write!(f, "{l} Like {r}"),
            Expr::Array(items) => {
                write!(f, "Array(")?;
                for (i, a) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{a}")?;
                }
                write!(f, ")")
            }
            Expr::WithMember(name) => write!(f, ".{name}"),
        }
    }
}

pub(crate) fn op_text(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::IDiv => "\\",
        BinaryOp::Mod => "Mod",
        BinaryOp::Pow => "^",
        BinaryOp::And => "And",
        BinaryOp::Or => "Or",
        BinaryOp::Xor => "Xor",
        BinaryOp::Eqv => "Eqv",
        BinaryOp::Imp => "Imp",
        BinaryOp::Is => "Is",
        BinaryOp::Compare(CompareOp::Eq) => "=",
        BinaryOp::Compare(CompareOp::Ne) => "<>",
        BinaryOp::Compare(CompareOp::Lt) => "<",
        BinaryOp::Compare(CompareOp::Le) => "<=",
        BinaryOp::Compare(CompareOp::Gt) => ">",
        BinaryOp::Compare(CompareOp::Ge) => ">=",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn printed_form_round_trips_readably() {
        let e = Expr::Concat(
            Box::new(Expr::Ident("Environ".into())),
            Box::new(Expr::StringLit("\\a.exe".into())),
        );
        assert_eq!(format!("{e}"), "Environ & \"\\a.exe\"");
    }

    #[test]
    fn find_procedure_is_case_insensitive() {
        let module = Module {
            name: "Module1".into(),
            declarations: vec![Declaration::Sub(Procedure {
                name: "AutoOpen".into(),
                params: vec![],
                body: vec![],
                is_private: false,
            })],
        };
        assert!(module.find_procedure("autoopen").is_some());
    }
}
