use std::fmt::Display;

use ordered_float::OrderedFloat;

use crate::scanner::Pos;

#[derive(Debug, PartialEq, Eq)]
pub struct Program(pub Vec<Stmt>);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Stmt {
    // Its possible defining this pos across all statements is wasteful of space
    pub pos: Pos,
    pub inner: StmtInner,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StmtInner {
    /// `x = e.` binds a value; `f a b = e.` binds a closure with parameters
    Assign {
        name: String,
        params: Vec<String>,
        expr: Expr,
    },
    Expr(Expr),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Expr {
    pub pos: Pos,
    pub inner: ExprInner,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExprInner {
    Literal(Literal),
    /// A double-quoted template, split into text and slot segments at parse time
    Interp(Vec<Segment>),
    Array(Vec<Expr>),
    Dict(Vec<(String, Expr)>),
    Identifier(String),
    /// Greedy prefix application `f x y z`
    Apply {
        callee: Box<Expr>,
        arguments: Vec<Expr>,
    },
    /// `left |> call`, the piped value becoming the call's first argument
    Pipeline {
        left: Box<Expr>,
        call: Box<Expr>,
    },
    If {
        test: Box<Expr>,
        if_true: Box<Expr>,
        if_false: Box<Expr>,
    },
    /// `base|k|1|(expr)` nested access
    Path {
        base: Box<Expr>,
        segments: Vec<PathSeg>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PathSeg {
    /// Bare identifier component, always a literal key
    Key(String),
    /// Literal numeric component, a 1-based index or a numeric dict key
    Index(i64),
    /// Parenthesised component evaluated at runtime
    Expr(Box<Expr>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    /// `{name}` or `{name|k|2}`; raw keeps the braces so unbound slots
    /// render untouched
    Slot {
        name: String,
        path: Vec<PathSeg>,
        raw: String,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Literal {
    Int(i64),
    Float(OrderedFloat<f64>),
    Str(String),
    Boolean(bool),
    Null,
}

impl Display for Stmt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            StmtInner::Assign { name, params, expr } => {
                write!(f, "(= {}", name)?;
                for param in params {
                    write!(f, " {}", param)?;
                }
                write!(f, " {})", expr)
            }
            StmtInner::Expr(expr) => write!(f, "{}", expr),
        }
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            ExprInner::Literal(lit) => write!(f, "{}", lit),
            ExprInner::Interp(segments) => {
                f.write_str("(interp")?;
                for segment in segments {
                    match segment {
                        Segment::Text(text) => write!(f, " '{}'", text)?,
                        Segment::Slot { raw, .. } => write!(f, " {}", raw)?,
                    }
                }
                f.write_str(")")
            }
            ExprInner::Array(elements) => {
                f.write_str("(array")?;
                for element in elements {
                    write!(f, " {}", element)?;
                }
                f.write_str(")")
            }
            ExprInner::Dict(pairs) => {
                f.write_str("(dict")?;
                for (key, value) in pairs {
                    write!(f, " {}: {}", key, value)?;
                }
                f.write_str(")")
            }
            ExprInner::Identifier(name) => write!(f, "(ident {})", name),
            ExprInner::Apply { callee, arguments } => {
                write!(f, "(call {}", callee)?;
                for arg in arguments {
                    write!(f, " {}", arg)?;
                }
                f.write_str(")")
            }
            ExprInner::Pipeline { left, call } => write!(f, "(|> {} {})", left, call),
            ExprInner::If {
                test,
                if_true,
                if_false,
            } => write!(f, "(if {} then {} else {})", test, if_true, if_false),
            ExprInner::Path { base, segments } => {
                write!(f, "(path {}", base)?;
                for segment in segments {
                    write!(f, " {}", segment)?;
                }
                f.write_str(")")
            }
        }
    }
}

impl Display for PathSeg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathSeg::Key(key) => f.write_str(key),
            PathSeg::Index(index) => write!(f, "{}", index),
            PathSeg::Expr(expr) => write!(f, "{}", expr),
        }
    }
}

impl Display for Literal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Literal::Int(int) => write!(f, "{}", int),
            Literal::Float(OrderedFloat(dbl)) => write!(f, "{}", dbl),
            Literal::Str(s) => write!(f, "'{}'", s),
            Literal::Boolean(b) => write!(f, "{}", b),
            Literal::Null => f.write_str("null"),
        }
    }
}
