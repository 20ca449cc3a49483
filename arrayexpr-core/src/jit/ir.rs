//! Intermediate Representation for JIT Compilation
//!
//! Defines the kernel source produced by code generation and the expression
//! tree the compiler parses it back into.

use serde::{Deserialize, Serialize};

use super::KernelError;
use crate::array::{DType, Scalar};
use crate::graph::{BinaryOperator, UnaryOperator};

/// A named, typed kernel parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelParam {
    pub name: String,
    pub dtype: DType,
}

/// Fused kernel source: parameters in call order, and a prefix-call body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelSource {
    pub params: Vec<KernelParam>,
    pub body: String,
}

impl KernelSource {
    /// Parse kernel source from a JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn param_names(&self) -> Vec<&str> {
        self.params.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn param_types(&self) -> Vec<DType> {
        self.params.iter().map(|p| p.dtype).collect()
    }

    /// Get the number of inputs
    pub fn num_inputs(&self) -> usize {
        self.params.len()
    }

    /// Parameter types as a signature string, e.g. `(int64, float64)`.
    pub fn signature(&self) -> String {
        let types: Vec<&str> = self.params.iter().map(|p| p.dtype.name()).collect();
        format!("({})", types.join(", "))
    }

    /// Parse the body into an expression tree.
    pub fn parse(&self) -> Result<Expr, KernelError> {
        let mut parser = Parser {
            text: &self.body,
            pos: 0,
            params: &self.params,
        };
        let expr = parser.expr()?;
        parser.skip_whitespace();
        if parser.pos != self.body.len() {
            return Err(parser.error("trailing input"));
        }
        Ok(expr)
    }
}

/// Parsed kernel body.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Reference to the parameter at this position
    Param(usize),
    /// Literal constant
    Const(Scalar),
    Unary(UnaryOperator, Box<Expr>),
    Binary(BinaryOperator, Box<Expr>, Box<Expr>),
}

impl Expr {
    /// Static result type, following the array promotion rules.
    ///
    /// Combinations the array kernels reject at run time are rejected here:
    /// `neg` of booleans, and integer `pow` unless the exponent is a
    /// non-negative constant.
    pub fn dtype(&self, params: &[KernelParam]) -> Result<DType, KernelError> {
        match self {
            Expr::Param(index) => params
                .get(*index)
                .map(|p| p.dtype)
                .ok_or_else(|| KernelError::UnknownVariable(format!("#{index}"))),
            Expr::Const(value) => Ok(value.dtype()),
            Expr::Unary(op, operand) => {
                let t = operand.dtype(params)?;
                match op {
                    UnaryOperator::Abs => Ok(t),
                    UnaryOperator::Neg if t == DType::Bool => Err(KernelError::UnsupportedType {
                        op: op.name(),
                        dtype: t,
                    }),
                    UnaryOperator::Neg => Ok(t),
                    UnaryOperator::Log => Ok(DType::Float64),
                }
            }
            Expr::Binary(op, lhs, rhs) => {
                let (l, r) = (lhs.dtype(params)?, rhs.dtype(params)?);
                match op {
                    BinaryOperator::Add
                    | BinaryOperator::Sub
                    | BinaryOperator::Mul => Ok(l.arithmetic(r)),
                    BinaryOperator::Pow => {
                        let t = l.arithmetic(r);
                        let exact = match **rhs {
                            Expr::Const(Scalar::Int(exponent)) => exponent >= 0,
                            _ => r == DType::Bool,
                        };
                        if t == DType::Int64 && !exact {
                            return Err(KernelError::UnsupportedType {
                                op: op.name(),
                                dtype: t,
                            });
                        }
                        Ok(t)
                    }
                    BinaryOperator::Div => Ok(DType::Float64),
                    BinaryOperator::Le => Ok(DType::Bool),
                    BinaryOperator::GetItem => Err(KernelError::UnsupportedOp(op.name())),
                }
            }
        }
    }
}

/// Recursive-descent parser for `name(arg, ...)` expressions.
struct Parser<'a> {
    text: &'a str,
    pos: usize,
    params: &'a [KernelParam],
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn bump(&mut self, c: char) {
        self.pos += c.len_utf8();
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek().filter(|c| c.is_whitespace()) {
            self.bump(c);
        }
    }

    fn error(&self, message: impl Into<String>) -> KernelError {
        KernelError::Parse {
            offset: self.pos,
            message: message.into(),
        }
    }

    fn expr(&mut self) -> Result<Expr, KernelError> {
        self.skip_whitespace();
        match self.peek() {
            None => Err(self.error("unexpected end of input")),
            Some(c) if c.is_ascii_digit() || c == '-' || c == '+' || c == '.' => self.number(),
            Some(c) if c.is_alphabetic() || c == '_' => {
                let name = self.ident();
                self.skip_whitespace();
                if self.peek() == Some('(') {
                    self.call(name)
                } else {
                    self.atom(name)
                }
            }
            Some(c) => Err(self.error(format!("unexpected character `{c}`"))),
        }
    }

    fn ident(&mut self) -> &'a str {
        let start = self.pos;
        while let Some(c) = self.peek().filter(|c| c.is_alphanumeric() || *c == '_') {
            self.bump(c);
        }
        &self.text[start..self.pos]
    }

    fn number(&mut self) -> Result<Expr, KernelError> {
        let start = self.pos;
        let mut prev = None;
        while let Some(c) = self.peek() {
            let signed = (c == '-' || c == '+')
                && (self.pos == start || matches!(prev, Some('e' | 'E')));
            if !(c.is_ascii_alphanumeric() || c == '.' || signed) {
                break;
            }
            self.bump(c);
            prev = Some(c);
        }
        let literal = &self.text[start..self.pos];
        parse_literal(literal)
            .map(Expr::Const)
            .ok_or_else(|| KernelError::Parse {
                offset: start,
                message: format!("invalid number `{literal}`"),
            })
    }

    /// A bare identifier: a parameter or a named constant.
    fn atom(&self, name: &str) -> Result<Expr, KernelError> {
        match name {
            "true" => return Ok(Expr::Const(Scalar::Bool(true))),
            "false" => return Ok(Expr::Const(Scalar::Bool(false))),
            "inf" | "NaN" => {
                if let Some(value) = parse_literal(name) {
                    return Ok(Expr::Const(value));
                }
            }
            _ => {}
        }
        self.params
            .iter()
            .position(|p| p.name == name)
            .map(Expr::Param)
            .ok_or_else(|| KernelError::UnknownVariable(name.to_string()))
    }

    fn call(&mut self, name: &str) -> Result<Expr, KernelError> {
        self.bump('(');
        let mut args = Vec::new();
        self.skip_whitespace();
        if self.peek() == Some(')') {
            self.bump(')');
        } else {
            loop {
                args.push(self.expr()?);
                self.skip_whitespace();
                match self.peek() {
                    Some(',') => self.bump(','),
                    Some(')') => {
                        self.bump(')');
                        break;
                    }
                    _ => return Err(self.error("expected `,` or `)`")),
                }
            }
        }

        let unary = UnaryOperator::from_name(name);
        let binary = BinaryOperator::from_name(name);
        let expected = match (unary, binary) {
            (Some(_), _) => 1,
            (_, Some(_)) => 2,
            (None, None) => return Err(KernelError::UnknownOp(name.to_string())),
        };
        if args.len() != expected {
            return Err(KernelError::Arity {
                op: name.to_string(),
                expected,
                got: args.len(),
            });
        }

        let mut args = args.into_iter().map(Box::new);
        match (unary, binary, args.next(), args.next()) {
            (Some(op), _, Some(operand), None) => Ok(Expr::Unary(op, operand)),
            (_, Some(op), Some(lhs), Some(rhs)) => Ok(Expr::Binary(op, lhs, rhs)),
            _ => Err(KernelError::UnknownOp(name.to_string())),
        }
    }
}

/// Integer literals stay integers; anything else `f64` accepts is a float.
fn parse_literal(literal: &str) -> Option<Scalar> {
    if let Ok(value) = literal.parse::<i64>() {
        return Some(Scalar::Int(value));
    }
    literal.parse::<f64>().ok().map(Scalar::Float)
}
