//! Numeric core: Gauss-Newton with minimum-norm steps, and the rank
//! diagnostics used to classify a system after it stops.

use super::solver::SolverConfig;
use super::store::Store;
use super::types::Equation;
use crate::expr::{EvalError, Expr, ParamValues};
use crate::handle::{HEquation, HParam};
use nalgebra::{DMatrix, DVector};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, trace};

/// A square-or-not system of residual expressions over a chosen set of unknowns,
/// with its symbolic Jacobian.
pub(crate) struct System {
    pub equations: Vec<HEquation>,
    residuals: Vec<Expr>,
    pub unknowns: Vec<HParam>,
    jacobian: Vec<Vec<Expr>>,
    index: HashMap<HParam, usize>,
}

/// Param values with the unknowns overridden by the current iterate.
struct Assignment<'a> {
    store: &'a Store,
    index: &'a HashMap<HParam, usize>,
    x: &'a DVector<f64>,
}

impl ParamValues for Assignment<'_> {
    fn param_value(&self, h: HParam) -> Option<f64> {
        match self.index.get(&h) {
            Some(&i) => Some(self.x[i]),
            None => self.store.param_value(h),
        }
    }
}

impl System {
    pub fn new<'a>(equations: impl IntoIterator<Item = &'a Equation>, unknowns: Vec<HParam>) -> Self {
        let (handles, residuals): (Vec<_>, Vec<_>) =
            equations.into_iter().map(|eq| (eq.h, eq.e.clone())).unzip();
        let jacobian = residuals
            .iter()
            .map(|r| unknowns.iter().map(|&u| r.partial(u)).collect())
            .collect();
        let index = unknowns.iter().enumerate().map(|(i, &h)| (h, i)).collect();
        Self {
            equations: handles,
            residuals,
            unknowns,
            jacobian,
            index,
        }
    }

    pub fn rows(&self) -> usize {
        self.residuals.len()
    }

    pub fn cols(&self) -> usize {
        self.unknowns.len()
    }

    pub fn start(&self, store: &Store) -> DVector<f64> {
        DVector::from_iterator(
            self.cols(),
            self.unknowns
                .iter()
                .map(|&h| store.param_value(h).unwrap_or(0.0)),
        )
    }

    pub fn residuals_at(&self, store: &Store, x: &DVector<f64>) -> Result<DVector<f64>, EvalError> {
        let values = Assignment {
            store,
            index: &self.index,
            x,
        };
        let f = self
            .residuals
            .iter()
            .map(|r| r.eval(&values))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(DVector::from_vec(f))
    }

    pub fn jacobian_at(&self, store: &Store, x: &DVector<f64>) -> Result<DMatrix<f64>, EvalError> {
        let values = Assignment {
            store,
            index: &self.index,
            x,
        };
        let mut j = DMatrix::zeros(self.rows(), self.cols());
        for (r, row) in self.jacobian.iter().enumerate() {
            for (c, d) in row.iter().enumerate() {
                j[(r, c)] = d.eval(&values)?;
            }
        }
        Ok(j)
    }
}

#[derive(Debug)]
pub(crate) enum Outcome {
    Converged {
        x: DVector<f64>,
        iterations: usize,
        residual: f64,
    },
    /// Steps vanished while the residual did not: a least-squares minimum.
    Stationary {
        x: DVector<f64>,
        iterations: usize,
        residual: f64,
    },
    IterationLimit {
        iterations: usize,
        residual: f64,
    },
    /// Residual or Jacobian stayed non-finite after every allowed nudge.
    Degenerate { iterations: usize },
    Aborted { iterations: usize },
}

impl Outcome {
    pub fn is_converged(&self) -> bool {
        matches!(self, Outcome::Converged { .. })
    }
}

fn all_finite(f: &DVector<f64>, j: &DMatrix<f64>) -> bool {
    f.iter().chain(j.iter()).all(|v| v.is_finite())
}

/// Minimum-norm solution of `J dx = -f`. Singular values below `eps` are dropped.
fn min_norm_step(j: &DMatrix<f64>, f: &DVector<f64>, eps: f64) -> Option<DVector<f64>> {
    if j.nrows() == 0 || j.ncols() == 0 {
        return Some(DVector::zeros(j.ncols()));
    }
    let svd = j.clone().svd(true, true);
    svd.solve(&(-f), eps).ok()
}

pub(crate) fn solve(
    system: &System,
    store: &Store,
    x0: DVector<f64>,
    config: &SolverConfig,
    abort: Option<&AtomicBool>,
) -> Result<Outcome, EvalError> {
    let mut x = x0;
    let mut nudges = 0;
    let mut residual = f64::INFINITY;

    for iteration in 0..config.max_iterations {
        if abort.is_some_and(|a| a.load(Ordering::Relaxed)) {
            debug!(iteration, "solve aborted");
            return Ok(Outcome::Aborted {
                iterations: iteration,
            });
        }

        let f = system.residuals_at(store, &x)?;
        let j = system.jacobian_at(store, &x)?;
        let step = if all_finite(&f, &j) {
            min_norm_step(&j, &f, config.rank_tolerance).filter(|s| s.iter().all(|v| v.is_finite()))
        } else {
            None
        };

        let Some(step) = step else {
            if nudges >= config.max_nudges {
                return Ok(Outcome::Degenerate {
                    iterations: iteration,
                });
            }
            nudges += 1;
            for (i, v) in x.iter_mut().enumerate() {
                *v += config.degenerate_nudge * (i + 1) as f64;
            }
            debug!(iteration, nudges, "non-finite derivatives, nudging start point");
            continue;
        };

        residual = f.norm();
        let step_norm = step.norm();
        trace!(iteration, residual, step_norm, "newton step");

        if step_norm < config.step_tolerance {
            return Ok(if residual < config.residual_tolerance {
                Outcome::Converged {
                    x,
                    iterations: iteration,
                    residual,
                }
            } else {
                Outcome::Stationary {
                    x,
                    iterations: iteration,
                    residual,
                }
            });
        }
        x += step;
    }

    let f = system.residuals_at(store, &x)?;
    let last = f.norm();
    if last.is_finite() {
        residual = last;
    }
    if residual < config.residual_tolerance {
        return Ok(Outcome::Converged {
            x,
            iterations: config.max_iterations,
            residual,
        });
    }
    Ok(Outcome::IterationLimit {
        iterations: config.max_iterations,
        residual,
    })
}

pub(crate) fn rank(j: &DMatrix<f64>, eps: f64) -> usize {
    if j.nrows() == 0 || j.ncols() == 0 {
        return 0;
    }
    j.clone().svd(false, false).rank(eps)
}

/// Rows that add nothing to the rank of the rows before them.
pub(crate) fn dependent_rows(j: &DMatrix<f64>, eps: f64) -> Vec<usize> {
    let mut basis: Vec<usize> = Vec::new();
    let mut dependent = Vec::new();
    let mut current = 0;
    for r in 0..j.nrows() {
        basis.push(r);
        let k = rank(&j.select_rows(basis.iter()), eps);
        if k > current {
            current = k;
        } else {
            basis.pop();
            dependent.push(r);
        }
    }
    dependent
}

/// Columns (unknowns) that add nothing to the rank of the columns before them.
pub(crate) fn free_columns(j: &DMatrix<f64>, eps: f64) -> Vec<usize> {
    dependent_rows(&j.transpose(), eps)
}
