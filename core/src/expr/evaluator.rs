//! Numeric evaluation and symbolic differentiation.

use super::{BinaryOperator, Expr, Function};
use crate::handle::HParam;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Serialize)]
pub enum EvalError {
    #[error("no value bound for parameter {0}")]
    UnboundParam(HParam),
}

/// A source of parameter values for evaluation.
pub trait ParamValues {
    fn param_value(&self, h: HParam) -> Option<f64>;
}

impl ParamValues for HashMap<HParam, f64> {
    fn param_value(&self, h: HParam) -> Option<f64> {
        self.get(&h).copied()
    }
}

impl ParamValues for BTreeMap<HParam, f64> {
    fn param_value(&self, h: HParam) -> Option<f64> {
        self.get(&h).copied()
    }
}

impl Expr {
    /// Evaluates the expression. Domain problems (division by zero, square
    /// root of a negative) surface as non-finite results, not errors.
    pub fn eval<V: ParamValues + ?Sized>(&self, values: &V) -> Result<f64, EvalError> {
        match self {
            Expr::Constant(v) => Ok(*v),
            Expr::Param(h) => values.param_value(*h).ok_or(EvalError::UnboundParam(*h)),
            Expr::Binary { op, left, right } => {
                let l = left.eval(values)?;
                let r = right.eval(values)?;
                Ok(match op {
                    BinaryOperator::Add => l + r,
                    BinaryOperator::Sub => l - r,
                    BinaryOperator::Mul => l * r,
                    BinaryOperator::Div => l / r,
                    BinaryOperator::Pow => l.powf(r),
                })
            }
            Expr::Neg(operand) => Ok(-operand.eval(values)?),
            Expr::Function { func, arg } => Ok(func.apply(arg.eval(values)?)),
        }
    }

    /// Closed-form partial derivative with respect to `wrt`.
    pub fn partial(&self, wrt: HParam) -> Expr {
        match self {
            Expr::Constant(_) => Expr::Constant(0.0),
            Expr::Param(h) => Expr::Constant(if *h == wrt { 1.0 } else { 0.0 }),
            Expr::Neg(operand) => -operand.partial(wrt),
            Expr::Binary { op, left, right } => {
                let l = || (**left).clone();
                let r = || (**right).clone();
                match op {
                    BinaryOperator::Add => left.partial(wrt) + right.partial(wrt),
                    BinaryOperator::Sub => left.partial(wrt) - right.partial(wrt),
                    BinaryOperator::Mul => l() * right.partial(wrt) + left.partial(wrt) * r(),
                    BinaryOperator::Div => {
                        // (l'r - lr') / r^2
                        (left.partial(wrt) * r() - l() * right.partial(wrt)) / r().square()
                    }
                    BinaryOperator::Pow => {
                        if !right.depends_on(wrt) {
                            // c * u^(c-1) * u'
                            r() * l().pow(r() - Expr::Constant(1.0)) * left.partial(wrt)
                        } else {
                            // u^v * (v' ln u + v u' / u)
                            let ln_u = Expr::function(Function::Ln, l());
                            self.clone()
                                * (right.partial(wrt) * ln_u + r() * left.partial(wrt) / l())
                        }
                    }
                }
            }
            Expr::Function { func, arg } => {
                let du = arg.partial(wrt);
                if du.as_constant() == Some(0.0) {
                    return Expr::Constant(0.0);
                }
                let u = || (**arg).clone();
                let one = || Expr::Constant(1.0);
                let outer = match func {
                    Function::Sin => u().cos(),
                    Function::Cos => -u().sin(),
                    Function::Tan => one() / u().cos().square(),
                    Function::Asin => one() / (one() - u().square()).sqrt(),
                    Function::Acos => -(one() / (one() - u().square()).sqrt()),
                    Function::Atan => one() / (one() + u().square()),
                    Function::Sqrt => one() / (Expr::Constant(2.0) * u().sqrt()),
                    Function::Square => Expr::Constant(2.0) * u(),
                    Function::Abs => u() / u().abs(),
                    Function::Exp => self.clone(),
                    Function::Ln => one() / u(),
                };
                outer * du
            }
        }
    }
}
