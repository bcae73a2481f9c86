use std::fmt;
use std::rc::Rc;

use pest::error::{Error, ErrorVariant, LineColLocation};
use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;

use super::ast::*;

#[derive(Parser)]
#[grammar = "engine/sandbox/script_grammar.pest"] // relative to src
pub struct ScriptParser;

/// What a source text is being parsed as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Goal {
    Script,
    Module,
}

/// A parse failure with a 0-based position.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntaxError {
    pub message: String,
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}:{})", self.message, self.line + 1, self.column + 1)
    }
}

impl From<Error<Rule>> for SyntaxError {
    fn from(e: Error<Rule>) -> Self {
        let (line, column) = match e.line_col {
            LineColLocation::Pos((l, c)) => (l, c),
            LineColLocation::Span((l, c), _) => (l, c),
        };
        let message = match e.variant {
            ErrorVariant::ParsingError { .. } => "unexpected token".to_string(),
            ErrorVariant::CustomError { message } => message,
        };
        SyntaxError {
            message,
            line: line.saturating_sub(1) as u32,
            column: column.saturating_sub(1) as u32,
        }
    }
}

pub fn parse_program(source: &str, goal: Goal) -> Result<Program, SyntaxError> {
    let program = ScriptParser::parse(Rule::program, source)?
        .next()
        .ok_or_else(|| empty_input_error())?;
    let mut body = vec![];
    for pair in program.into_inner() {
        match pair.as_rule() {
            Rule::statement => body.push(build_statement(pair, Some(goal))?),
            Rule::EOI => { /* Do nothing */ }
            _ => return Err(unexpected(&pair)),
        }
    }
    let mut imports: Vec<String> = vec![];
    for stmt in &body {
        if let StmtKind::Import { specifier, .. } = &stmt.kind {
            if !imports.contains(specifier) {
                imports.push(specifier.clone());
            }
        }
    }
    Ok(Program { body, imports })
}

pub fn parse_expression(source: &str) -> Result<Expr, SyntaxError> {
    let input = ScriptParser::parse(Rule::expression_input, source)?
        .next()
        .ok_or_else(|| empty_input_error())?;
    let expression = significant(input)
        .find(|p| p.as_rule() == Rule::expression)
        .ok_or_else(|| empty_input_error())?;
    build_expression(expression)
}

fn empty_input_error() -> SyntaxError {
    SyntaxError {
        message: "unexpected end of input".to_string(),
        line: 0,
        column: 0,
    }
}

fn unexpected(pair: &Pair<Rule>) -> SyntaxError {
    error_at(pair, format!("unexpected {:?}", pair.as_rule()))
}

fn error_at(pair: &Pair<Rule>, message: String) -> SyntaxError {
    let pos = position(pair);
    SyntaxError {
        message,
        line: pos.line,
        column: pos.column,
    }
}

fn position(pair: &Pair<Rule>) -> Pos {
    let (line, column) = pair.as_span().start_pos().line_col();
    Pos {
        line: line.saturating_sub(1) as u32,
        column: column.saturating_sub(1) as u32,
    }
}

fn is_keyword(rule: Rule) -> bool {
    matches!(
        rule,
        Rule::kw_import
            | Rule::kw_export
            | Rule::kw_from
            | Rule::kw_as
            | Rule::kw_function
            | Rule::kw_let
            | Rule::kw_const
            | Rule::kw_var
            | Rule::kw_return
            | Rule::kw_throw
            | Rule::kw_debugger
            | Rule::kw_if
            | Rule::kw_else
            | Rule::kw_new
            | Rule::EOI
    )
}

/// Children of a pair, minus keyword tokens.
fn significant(pair: Pair<Rule>) -> impl Iterator<Item = Pair<Rule>> {
    pair.into_inner().filter(|p| !is_keyword(p.as_rule()))
}

fn first_child(pair: Pair<Rule>) -> Result<Pair<Rule>, SyntaxError> {
    let err = unexpected(&pair);
    significant(pair).next().ok_or(err)
}

/// `top` is the goal for top-level statements and `None` inside blocks.
fn build_statement(pair: Pair<Rule>, top: Option<Goal>) -> Result<Stmt, SyntaxError> {
    let pos = position(&pair);
    let inner = first_child(pair)?;
    let kind = match inner.as_rule() {
        Rule::import_stmt => {
            check_module_item(&inner, top, "import")?;
            build_import(inner)?
        }
        Rule::export_stmt => {
            check_module_item(&inner, top, "export")?;
            let decl = first_child(inner)?;
            match decl.as_rule() {
                Rule::function_decl => StmtKind::Function {
                    decl: Rc::new(build_function(decl)?),
                    exported: true,
                },
                Rule::let_stmt => build_let(decl, true)?,
                _ => return Err(unexpected(&decl)),
            }
        }
        Rule::function_decl => StmtKind::Function {
            decl: Rc::new(build_function(inner)?),
            exported: false,
        },
        Rule::let_stmt => build_let(inner, false)?,
        Rule::return_stmt => match significant(inner).next() {
            Some(e) => StmtKind::Return(Some(build_expression(e)?)),
            None => StmtKind::Return(None),
        },
        Rule::throw_stmt => StmtKind::Throw(build_expression(first_child(inner)?)?),
        Rule::debugger_stmt => StmtKind::Debugger,
        Rule::if_stmt => build_if(inner)?,
        Rule::expr_stmt => StmtKind::Expr(build_expression(first_child(inner)?)?),
        _ => return Err(unexpected(&inner)),
    };
    Ok(Stmt { pos, kind })
}

fn check_module_item(pair: &Pair<Rule>, top: Option<Goal>, what: &str) -> Result<(), SyntaxError> {
    match top {
        Some(Goal::Module) => Ok(()),
        Some(Goal::Script) => Err(error_at(
            pair,
            format!("'{}' is only valid inside a module", what),
        )),
        None => Err(error_at(
            pair,
            format!("'{}' is only valid at the top level of a module", what),
        )),
    }
}

fn build_import(pair: Pair<Rule>) -> Result<StmtKind, SyntaxError> {
    let mut binding = ImportBinding::Bare;
    let mut specifier = None;
    for p in significant(pair) {
        match p.as_rule() {
            Rule::import_clause => {
                let clause = first_child(p)?;
                binding = match clause.as_rule() {
                    Rule::namespace_import => {
                        ImportBinding::Namespace(first_child(clause)?.as_str().to_string())
                    }
                    Rule::named_imports => ImportBinding::Named(
                        significant(clause).map(|n| n.as_str().to_string()).collect(),
                    ),
                    _ => return Err(unexpected(&clause)),
                };
            }
            Rule::lit_string => specifier = Some(build_string(p)?),
            _ => return Err(unexpected(&p)),
        }
    }
    match specifier {
        Some(specifier) => Ok(StmtKind::Import { specifier, binding }),
        None => Err(empty_input_error()),
    }
}

fn build_let(pair: Pair<Rule>, exported: bool) -> Result<StmtKind, SyntaxError> {
    let mut it = significant(pair);
    let name = match it.next() {
        Some(p) => p.as_str().to_string(),
        None => return Err(empty_input_error()),
    };
    let init = match it.next() {
        Some(e) => Some(build_expression(e)?),
        None => None,
    };
    Ok(StmtKind::Let {
        name,
        init,
        exported,
    })
}

fn build_if(pair: Pair<Rule>) -> Result<StmtKind, SyntaxError> {
    let mut it = significant(pair);
    let test = match it.next() {
        Some(e) => build_expression(e)?,
        None => return Err(empty_input_error()),
    };
    let then = match it.next() {
        Some(b) => build_block(b)?,
        None => return Err(empty_input_error()),
    };
    let otherwise = match it.next() {
        Some(p) if p.as_rule() == Rule::if_stmt => {
            let pos = position(&p);
            vec![Stmt {
                pos,
                kind: build_if(p)?,
            }]
        }
        Some(b) => build_block(b)?,
        None => vec![],
    };
    Ok(StmtKind::If {
        test,
        then,
        otherwise,
    })
}

fn build_block(pair: Pair<Rule>) -> Result<Vec<Stmt>, SyntaxError> {
    significant(pair)
        .map(|s| build_statement(s, None))
        .collect()
}

fn build_function(pair: Pair<Rule>) -> Result<FunctionDecl, SyntaxError> {
    let pos = position(&pair);
    let mut name = None;
    let mut params = vec![];
    let mut body = vec![];
    for p in significant(pair) {
        match p.as_rule() {
            Rule::ident => name = Some(p.as_str().to_string()),
            Rule::params => params = significant(p).map(|i| i.as_str().to_string()).collect(),
            Rule::block => body = build_block(p)?,
            _ => return Err(unexpected(&p)),
        }
    }
    Ok(FunctionDecl {
        name,
        params,
        body,
        pos,
    })
}

fn build_arguments(pair: Pair<Rule>) -> Result<Vec<Expr>, SyntaxError> {
    significant(pair).map(build_expression).collect()
}

fn build_expression(pair: Pair<Rule>) -> Result<Expr, SyntaxError> {
    match pair.as_rule() {
        Rule::expression => build_expression(first_child(pair)?),
        Rule::assignment => {
            let err = error_at(&pair, "invalid assignment target".to_string());
            let mut it = significant(pair);
            let target = match it.next() {
                Some(t) => build_expression(t)?,
                None => return Err(err),
            };
            let value = match it.next() {
                Some(v) => build_expression(v)?,
                None => return Err(err),
            };
            match target {
                Expr::Ident(_) | Expr::Member(..) => Ok(Expr::Assign {
                    target: Box::new(target),
                    value: Box::new(value),
                }),
                _ => Err(err),
            }
        }
        Rule::equality | Rule::additive | Rule::multiplicative => build_binary(pair),
        Rule::unary => {
            let mut ops = vec![];
            let mut operand = None;
            for p in significant(pair) {
                match p.as_rule() {
                    Rule::unary_op => ops.push(if p.as_str() == "-" {
                        UnaryOp::Neg
                    } else {
                        UnaryOp::Not
                    }),
                    _ => operand = Some(build_expression(p)?),
                }
            }
            let mut expr = operand.ok_or_else(empty_input_error)?;
            for op in ops.into_iter().rev() {
                expr = Expr::Unary {
                    op,
                    operand: Box::new(expr),
                };
            }
            Ok(expr)
        }
        Rule::postfix | Rule::new_target => {
            let mut it = significant(pair);
            let mut expr = match it.next() {
                Some(p) => build_expression(p)?,
                None => return Err(empty_input_error()),
            };
            for p in it {
                expr = match p.as_rule() {
                    Rule::call_args => Expr::Call {
                        callee: Box::new(expr),
                        args: build_arguments(p)?,
                    },
                    Rule::member => {
                        Expr::Member(Box::new(expr), first_child(p)?.as_str().to_string())
                    }
                    _ => return Err(unexpected(&p)),
                };
            }
            Ok(expr)
        }
        Rule::new_expr => {
            let mut it = significant(pair);
            let callee = match it.next() {
                Some(p) => build_expression(p)?,
                None => return Err(empty_input_error()),
            };
            let args = match it.next() {
                Some(p) => build_arguments(p)?,
                None => vec![],
            };
            Ok(Expr::New {
                callee: Box::new(callee),
                args,
            })
        }
        Rule::dynamic_import => Ok(Expr::DynamicImport(Box::new(build_expression(
            first_child(pair)?,
        )?))),
        Rule::function_expr => Ok(Expr::Function(Rc::new(build_function(pair)?))),
        Rule::object_lit => {
            let mut props = vec![];
            for p in significant(pair) {
                let mut it = significant(p);
                let (key, value) = match (it.next(), it.next()) {
                    (Some(k), Some(v)) => (k, v),
                    _ => return Err(empty_input_error()),
                };
                let key = if key.as_rule() == Rule::lit_string {
                    build_string(key)?
                } else {
                    key.as_str().to_string()
                };
                props.push((key, build_expression(value)?));
            }
            Ok(Expr::Object(props))
        }
        Rule::array_lit => Ok(Expr::Array(build_arguments(pair)?)),
        Rule::lit_number => pair
            .as_str()
            .parse::<f64>()
            .map(Expr::Number)
            .map_err(|e| error_at(&pair, e.to_string())),
        Rule::lit_string => Ok(Expr::Str(build_string(pair)?)),
        Rule::lit_bool => Ok(Expr::Bool(pair.as_str() == "true")),
        Rule::lit_null => Ok(Expr::Null),
        Rule::lit_undefined => Ok(Expr::Undefined),
        Rule::this_expr => Ok(Expr::This),
        Rule::ident => Ok(Expr::Ident(pair.as_str().to_string())),
        _ => Err(unexpected(&pair)),
    }
}

fn build_binary(pair: Pair<Rule>) -> Result<Expr, SyntaxError> {
    let mut it = significant(pair);
    let mut left = match it.next() {
        Some(p) => build_expression(p)?,
        None => return Err(empty_input_error()),
    };
    while let Some(op_pair) = it.next() {
        let op = match op_pair.as_str() {
            "+" => BinaryOp::Add,
            "-" => BinaryOp::Sub,
            "*" => BinaryOp::Mul,
            "/" => BinaryOp::Div,
            "===" => BinaryOp::StrictEq,
            "!==" => BinaryOp::StrictNe,
            _ => return Err(unexpected(&op_pair)),
        };
        let right = match it.next() {
            Some(p) => build_expression(p)?,
            None => return Err(unexpected(&op_pair)),
        };
        left = Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        };
    }
    Ok(left)
}

fn build_string(pair: Pair<Rule>) -> Result<String, SyntaxError> {
    let raw = match pair.into_inner().next() {
        Some(chars) => chars.as_str().to_string(),
        None => String::new(),
    };
    Ok(unescape(&raw))
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(std::char::from_u32) {
                    Some(ch) => out.push(ch),
                    None => out.push_str(&hex),
                }
            }
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}
