//! Expression and statement trees produced by the decoder.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A node paired with the address it is attributed to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anchored<T> {
    pub offset: u32,
    pub node: T,
}

impl<T> Anchored<T> {
    pub fn new(offset: u32, node: T) -> Self {
        Self { offset, node }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    And,
    Or,
    Add,
    Sub,
    Eq,
    Ne,
    Le,
    Ge,
    Lt,
    Gt,
    Assign,
}

impl BinaryOp {
    pub const ALL: [BinaryOp; 11] = [
        BinaryOp::And,
        BinaryOp::Or,
        BinaryOp::Add,
        BinaryOp::Sub,
        BinaryOp::Eq,
        BinaryOp::Ne,
        BinaryOp::Le,
        BinaryOp::Ge,
        BinaryOp::Lt,
        BinaryOp::Gt,
        BinaryOp::Assign,
    ];

    pub fn from_opcode(op: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.opcode() == op)
    }

    pub fn opcode(self) -> u8 {
        match self {
            BinaryOp::And => 0x0F,
            BinaryOp::Or => 0x12,
            BinaryOp::Add => 0x15,
            BinaryOp::Sub => 0x16,
            BinaryOp::Eq => 0x1A,
            BinaryOp::Ne => 0x1B,
            BinaryOp::Le => 0x1C,
            BinaryOp::Ge => 0x1D,
            BinaryOp::Lt => 0x1E,
            BinaryOp::Gt => 0x1F,
            BinaryOp::Assign => 0x20,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Le => "<=",
            BinaryOp::Ge => ">=",
            BinaryOp::Lt => "<",
            BinaryOp::Gt => ">",
            BinaryOp::Assign => "=",
        }
    }

    /// The meaning was inferred from observed scripts only. `and`/`or` may
    /// be swapped, as may `<=`/`>=` and `<`/`>`.
    pub fn is_best_guess(self) -> bool {
        matches!(
            self,
            BinaryOp::And | BinaryOp::Or | BinaryOp::Le | BinaryOp::Ge | BinaryOp::Lt | BinaryOp::Gt
        )
    }

    fn parenthesized(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or | BinaryOp::Add | BinaryOp::Sub)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum Expr {
    /// Whole part of a fixed-point literal.
    Int(i32),
    Str(String),
    FunctionName {
        namespace: Option<String>,
        name: String,
    },
    /// Argument list. Empty while it is still an open marker on the stack.
    Args(Vec<Expr>),
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
    },
    Negate(Box<Expr>),
    Not(Box<Expr>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

impl Expr {
    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn display(&self, mark_guesses: bool) -> ExprDisplay<'_> {
        ExprDisplay { expr: self, mark_guesses }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.display(false), f)
    }
}

pub struct ExprDisplay<'a> {
    expr: &'a Expr,
    mark_guesses: bool,
}

impl ExprDisplay<'_> {
    fn sub<'b>(&self, e: &'b Expr) -> ExprDisplay<'b> {
        e.display(self.mark_guesses)
    }

    fn args(&self, f: &mut fmt::Formatter<'_>, args: &[Expr]) -> fmt::Result {
        f.write_str("(")?;
        for (i, a) in args.iter().enumerate() {
            if i != 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", self.sub(a))?;
        }
        f.write_str(")")
    }
}

impl fmt::Display for ExprDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.expr {
            Expr::Int(v) => write!(f, "{v}"),
            Expr::Str(s) => write!(f, "\"{}\"", escape(s)),
            Expr::FunctionName { namespace: Some(ns), name } => write!(f, "{ns}.{name}"),
            Expr::FunctionName { namespace: None, name } => write!(f, "{name}"),
            Expr::Args(args) => self.args(f, args),
            Expr::Call { func, args } => {
                write!(f, "{}", self.sub(func))?;
                self.args(f, args)
            }
            Expr::Negate(e) => write!(f, "-({})", self.sub(e)),
            Expr::Not(e) => write!(f, "not {}", self.sub(e)),
            Expr::Binary { op, lhs, rhs } => {
                let mark = if self.mark_guesses && op.is_best_guess() { "?" } else { "" };
                let (open, close) = if op.parenthesized() { ("(", ")") } else { ("", "") };
                write!(f, "{open}{} {}{mark} {}{close}", self.sub(lhs), op.symbol(), self.sub(rhs))
            }
        }
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BranchPolarity {
    IfTrue,
    IfFalse,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum Stmt {
    ScopeOpen,
    ScopeClose,
    Expr(Expr),
    Speaker(String),
    Text(String),
    BundleStart(u8),
    BundleEnd(u8),
    Return,
    Page(u16),
    SceneGoto(String),
    Label(String),
    Branch {
        target: u32,
    },
    CondBranch {
        cond: Expr,
        target: u32,
        polarity: BranchPolarity,
    },
    EndOfFile,
}

impl Stmt {
    pub fn branch_target(&self) -> Option<u32> {
        match self {
            Stmt::Branch { target } | Stmt::CondBranch { target, .. } => Some(*target),
            _ => None,
        }
    }

    pub fn is_conditional_branch(&self) -> bool {
        matches!(self, Stmt::CondBranch { .. })
    }

    pub fn display(&self, mark_guesses: bool) -> StmtDisplay<'_> {
        StmtDisplay { stmt: self, mark_guesses }
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.display(false), f)
    }
}

pub struct StmtDisplay<'a> {
    stmt: &'a Stmt,
    mark_guesses: bool,
}

impl fmt::Display for StmtDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let g = self.mark_guesses;
        match self.stmt {
            Stmt::ScopeOpen => f.write_str("{"),
            Stmt::ScopeClose => f.write_str("}"),
            Stmt::Expr(e) => write!(f, "{};", e.display(g)),
            Stmt::Speaker(s) => write!(f, "[{s}]"),
            Stmt::Text(s) => write!(f, ":: \"{}\";", escape(s)),
            Stmt::BundleStart(v) => write!(f, "bundleStart 0x{v:x}"),
            Stmt::BundleEnd(v) => write!(f, "bundleEnd 0x{v:x}"),
            Stmt::Return => f.write_str("return;"),
            Stmt::Page(n) => write!(f, "page {n:04}"),
            Stmt::SceneGoto(s) => write!(f, "goto \"{}\"", escape(s)),
            Stmt::Label(s) => write!(f, "{s}:"),
            Stmt::Branch { target } => write!(f, "branch 0x{target:X};"),
            Stmt::CondBranch {
                cond,
                target,
                polarity: BranchPolarity::IfTrue,
            } => write!(f, "if ({}) branch 0x{target:X};", cond.display(g)),
            Stmt::CondBranch {
                cond,
                target,
                polarity: BranchPolarity::IfFalse,
            } => write!(f, "unless ({}) branch 0x{target:X};", cond.display(g)),
            Stmt::EndOfFile => f.write_str("/* EOF */"),
        }
    }
}
