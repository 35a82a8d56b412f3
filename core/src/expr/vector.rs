use super::{EvalError, Expr, ParamValues};
use nalgebra::Vector3;

/// Three expressions treated as a vector, for building geometric equations.
#[derive(Debug, Clone, PartialEq)]
pub struct ExprVector {
    pub x: Expr,
    pub y: Expr,
    pub z: Expr,
}

impl ExprVector {
    pub fn new(x: Expr, y: Expr, z: Expr) -> Self {
        Self { x, y, z }
    }

    pub fn from_constants(v: Vector3<f64>) -> Self {
        Self::new(Expr::Constant(v.x), Expr::Constant(v.y), Expr::Constant(v.z))
    }

    pub fn plus(&self, b: &ExprVector) -> ExprVector {
        ExprVector::new(
            self.x.clone() + b.x.clone(),
            self.y.clone() + b.y.clone(),
            self.z.clone() + b.z.clone(),
        )
    }

    pub fn minus(&self, b: &ExprVector) -> ExprVector {
        ExprVector::new(
            self.x.clone() - b.x.clone(),
            self.y.clone() - b.y.clone(),
            self.z.clone() - b.z.clone(),
        )
    }

    pub fn scaled_by(&self, s: &Expr) -> ExprVector {
        ExprVector::new(
            self.x.clone() * s.clone(),
            self.y.clone() * s.clone(),
            self.z.clone() * s.clone(),
        )
    }

    pub fn dot(&self, b: &ExprVector) -> Expr {
        self.x.clone() * b.x.clone() + self.y.clone() * b.y.clone() + self.z.clone() * b.z.clone()
    }

    pub fn cross(&self, b: &ExprVector) -> ExprVector {
        ExprVector::new(
            self.y.clone() * b.z.clone() - self.z.clone() * b.y.clone(),
            self.z.clone() * b.x.clone() - self.x.clone() * b.z.clone(),
            self.x.clone() * b.y.clone() - self.y.clone() * b.x.clone(),
        )
    }

    pub fn magnitude_squared(&self) -> Expr {
        self.x.clone().square() + self.y.clone().square() + self.z.clone().square()
    }

    pub fn magnitude(&self) -> Expr {
        self.magnitude_squared().sqrt()
    }

    pub fn eval<V: ParamValues + ?Sized>(&self, values: &V) -> Result<Vector3<f64>, EvalError> {
        Ok(Vector3::new(self.x.eval(values)?, self.y.eval(values)?, self.z.eval(values)?))
    }
}
