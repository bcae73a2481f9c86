use std::rc::Rc;

/// Source position, 0-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pos {
    pub line: u32,
    pub column: u32,
}

#[derive(Debug)]
pub struct Program {
    pub body: Vec<Stmt>,
    /// Static import specifiers, in source order and without repeats.
    pub imports: Vec<String>,
}

#[derive(Debug)]
pub struct Stmt {
    pub pos: Pos,
    pub kind: StmtKind,
}

#[derive(Debug)]
pub enum StmtKind {
    Import {
        specifier: String,
        binding: ImportBinding,
    },
    Let {
        name: String,
        init: Option<Expr>,
        exported: bool,
    },
    Function {
        decl: Rc<FunctionDecl>,
        exported: bool,
    },
    Return(Option<Expr>),
    Throw(Expr),
    Debugger,
    If {
        test: Expr,
        then: Vec<Stmt>,
        otherwise: Vec<Stmt>,
    },
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImportBinding {
    Bare,
    Namespace(String),
    Named(Vec<String>),
}

#[derive(Debug)]
pub struct FunctionDecl {
    pub name: Option<String>,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
    pub pos: Pos,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    StrictEq,
    StrictNe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug)]
pub enum Expr {
    Number(f64),
    Str(String),
    Bool(bool),
    Null,
    Undefined,
    This,
    Ident(String),
    Member(Box<Expr>, String),
    Call { callee: Box<Expr>, args: Vec<Expr> },
    New { callee: Box<Expr>, args: Vec<Expr> },
    Assign { target: Box<Expr>, value: Box<Expr> },
    Binary { op: BinaryOp, left: Box<Expr>, right: Box<Expr> },
    Unary { op: UnaryOp, operand: Box<Expr> },
    Function(Rc<FunctionDecl>),
    Object(Vec<(String, Expr)>),
    Array(Vec<Expr>),
    DynamicImport(Box<Expr>),
}

impl Expr {
    /// A short name for error messages, like `foo.bar`.
    pub fn describe(&self) -> String {
        match self {
            Expr::Ident(name) => name.clone(),
            Expr::Member(object, name) => format!("{}.{}", object.describe(), name),
            Expr::This => "this".to_string(),
            Expr::Call { callee, .. } => format!("{}(...)", callee.describe()),
            _ => "expression".to_string(),
        }
    }
}
