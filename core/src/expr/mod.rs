//! Symbolic expressions over sketch parameters.
//!
//! Provides:
//! - Expression trees built from constants, params, arithmetic and a few functions
//! - Numeric evaluation under a param substitution
//! - Closed-form partial derivatives, used for the solver's Jacobian
//! - A text parser for user-entered equations (`@line.16 - 2 * @line.19`)

pub mod evaluator;
pub mod parser;
pub mod vector;


pub use evaluator::{EvalError, ParamValues};
pub use parser::{parse_expression, ParseError};
pub use vector::ExprVector;

use crate::handle::HParam;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::ops;

/// Expression tree node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Constant(f64),
    Param(HParam),
    Binary {
        op: BinaryOperator,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Neg(Box<Expr>),
    Function {
        func: Function,
        arg: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOperator {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Function {
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Sqrt,
    Square,
    Abs,
    Exp,
    Ln,
}

impl Function {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "sin" => Self::Sin,
            "cos" => Self::Cos,
            "tan" => Self::Tan,
            "asin" => Self::Asin,
            "acos" => Self::Acos,
            "atan" => Self::Atan,
            "sqrt" => Self::Sqrt,
            "sq" | "square" => Self::Square,
            "abs" => Self::Abs,
            "exp" => Self::Exp,
            "ln" => Self::Ln,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Sin => "sin",
            Self::Cos => "cos",
            Self::Tan => "tan",
            Self::Asin => "asin",
            Self::Acos => "acos",
            Self::Atan => "atan",
            Self::Sqrt => "sqrt",
            Self::Square => "square",
            Self::Abs => "abs",
            Self::Exp => "exp",
            Self::Ln => "ln",
        }
    }

    pub fn apply(self, x: f64) -> f64 {
        match self {
            Self::Sin => x.sin(),
            Self::Cos => x.cos(),
            Self::Tan => x.tan(),
            Self::Asin => x.asin(),
            Self::Acos => x.acos(),
            Self::Atan => x.atan(),
            Self::Sqrt => x.sqrt(),
            Self::Square => x * x,
            Self::Abs => x.abs(),
            Self::Exp => x.exp(),
            Self::Ln => x.ln(),
        }
    }
}

// The constructors below fold constants and drop additive/multiplicative
// identities, which keeps derivative trees from growing without bound.
impl Expr {
    pub fn constant(v: f64) -> Self {
        Expr::Constant(v)
    }

    pub fn param(h: HParam) -> Self {
        Expr::Param(h)
    }

    pub fn as_constant(&self) -> Option<f64> {
        match self {
            Expr::Constant(v) => Some(*v),
            _ => None,
        }
    }

    fn is_constant(&self, v: f64) -> bool {
        self.as_constant() == Some(v)
    }

    pub fn binary(op: BinaryOperator, left: Expr, right: Expr) -> Self {
        if let (Some(a), Some(b)) = (left.as_constant(), right.as_constant()) {
            let folded = match op {
                BinaryOperator::Add => a + b,
                BinaryOperator::Sub => a - b,
                BinaryOperator::Mul => a * b,
                BinaryOperator::Div => a / b,
                BinaryOperator::Pow => a.powf(b),
            };
            if folded.is_finite() {
                return Expr::Constant(folded);
            }
        }
        match op {
            BinaryOperator::Add if left.is_constant(0.0) => return right,
            BinaryOperator::Add | BinaryOperator::Sub if right.is_constant(0.0) => return left,
            BinaryOperator::Sub if left.is_constant(0.0) => return -right,
            BinaryOperator::Mul if left.is_constant(0.0) || right.is_constant(0.0) => {
                return Expr::Constant(0.0)
            }
            BinaryOperator::Mul if left.is_constant(1.0) => return right,
            BinaryOperator::Mul | BinaryOperator::Div if right.is_constant(1.0) => return left,
            BinaryOperator::Div if left.is_constant(0.0) => return Expr::Constant(0.0),
            BinaryOperator::Pow if right.is_constant(1.0) => return left,
            BinaryOperator::Pow if right.is_constant(0.0) => return Expr::Constant(1.0),
            _ => {}
        }
        Expr::Binary { op, left: Box::new(left), right: Box::new(right) }
    }

    pub fn function(func: Function, arg: Expr) -> Self {
        if let Some(v) = arg.as_constant() {
            let folded = func.apply(v);
            if folded.is_finite() {
                return Expr::Constant(folded);
            }
        }
        Expr::Function { func, arg: Box::new(arg) }
    }

    pub fn pow(self, exponent: Expr) -> Self {
        Self::binary(BinaryOperator::Pow, self, exponent)
    }

    pub fn sqrt(self) -> Self {
        Self::function(Function::Sqrt, self)
    }

    pub fn square(self) -> Self {
        Self::function(Function::Square, self)
    }

    pub fn sin(self) -> Self {
        Self::function(Function::Sin, self)
    }

    pub fn cos(self) -> Self {
        Self::function(Function::Cos, self)
    }

    pub fn abs(self) -> Self {
        Self::function(Function::Abs, self)
    }

    /// Every param this expression reads.
    pub fn params(&self) -> BTreeSet<HParam> {
        let mut out = BTreeSet::new();
        self.collect_params(&mut out);
        out
    }

    pub fn collect_params(&self, out: &mut BTreeSet<HParam>) {
        match self {
            Expr::Constant(_) => {}
            Expr::Param(h) => {
                out.insert(*h);
            }
            Expr::Binary { left, right, .. } => {
                left.collect_params(out);
                right.collect_params(out);
            }
            Expr::Neg(operand) => operand.collect_params(out),
            Expr::Function { arg, .. } => arg.collect_params(out),
        }
    }

    pub fn depends_on(&self, h: HParam) -> bool {
        match self {
            Expr::Constant(_) => false,
            Expr::Param(p) => *p == h,
            Expr::Binary { left, right, .. } => left.depends_on(h) || right.depends_on(h),
            Expr::Neg(operand) => operand.depends_on(h),
            Expr::Function { arg, .. } => arg.depends_on(h),
        }
    }

    /// Number of nodes, for logging.
    pub fn node_count(&self) -> usize {
        match self {
            Expr::Constant(_) | Expr::Param(_) => 1,
            Expr::Binary { left, right, .. } => 1 + left.node_count() + right.node_count(),
            Expr::Neg(operand) => 1 + operand.node_count(),
            Expr::Function { arg, .. } => 1 + arg.node_count(),
        }
    }
}

impl From<f64> for Expr {
    fn from(v: f64) -> Self {
        Expr::Constant(v)
    }
}

impl From<HParam> for Expr {
    fn from(h: HParam) -> Self {
        Expr::Param(h)
    }
}

impl ops::Add for Expr {
    type Output = Expr;

    fn add(self, rhs: Expr) -> Expr {
        Expr::binary(BinaryOperator::Add, self, rhs)
    }
}

impl ops::Sub for Expr {
    type Output = Expr;

    fn sub(self, rhs: Expr) -> Expr {
        Expr::binary(BinaryOperator::Sub, self, rhs)
    }
}

impl ops::Mul for Expr {
    type Output = Expr;

    fn mul(self, rhs: Expr) -> Expr {
        Expr::binary(BinaryOperator::Mul, self, rhs)
    }
}

impl ops::Div for Expr {
    type Output = Expr;

    fn div(self, rhs: Expr) -> Expr {
        Expr::binary(BinaryOperator::Div, self, rhs)
    }
}

impl ops::Neg for Expr {
    type Output = Expr;

    fn neg(self) -> Expr {
        match self {
            Expr::Constant(v) => Expr::Constant(-v),
            Expr::Neg(inner) => *inner,
            other => Expr::Neg(Box::new(other)),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Constant(v) => write!(f, "{}", v),
            Expr::Param(h) => write!(f, "{}", h),
            Expr::Binary { op, left, right } => {
                let sym = match op {
                    BinaryOperator::Add => "+",
                    BinaryOperator::Sub => "-",
                    BinaryOperator::Mul => "*",
                    BinaryOperator::Div => "/",
                    BinaryOperator::Pow => "^",
                };
                write!(f, "({} {} {})", left, sym, right)
            }
            Expr::Neg(operand) => write!(f, "-{}", operand),
            Expr::Function { func, arg } => write!(f, "{}({})", func.name(), arg),
        }
    }
}
