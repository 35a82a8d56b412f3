use super::newton::{self, Outcome, System};
use super::Sketch;
use crate::expr::EvalError;
use crate::handle::{HConstraint, HEquation, HGroup, HParam};
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::AtomicBool;
use thiserror::Error;
use tracing::{info, warn};

/// Tuning knobs for the Newton solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Newton iterations before giving up on a group
    pub max_iterations: usize,
    /// Residual norm below which a group counts as satisfied
    pub residual_tolerance: f64,
    /// Step norm below which iteration stops
    pub step_tolerance: f64,
    /// Singular values below this are treated as zero
    pub rank_tolerance: f64,
    /// Scale of the deterministic perturbation applied at degenerate starts
    pub degenerate_nudge: f64,
    pub max_nudges: usize,
    /// Largest candidate set the conflict search will minimize
    pub conflict_search_limit: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            residual_tolerance: 1e-10,
            step_tolerance: 1e-10,
            rank_tolerance: 1e-8,
            degenerate_nudge: 1e-3,
            max_nudges: 3,
            conflict_search_limit: 16,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolveStatus {
    FullyConstrained,
    UnderConstrained,
}

/// Result of a successful group solve
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolveResult {
    pub group: HGroup,
    pub status: SolveStatus,
    /// Number of iterations performed
    pub iterations: usize,
    /// Final residual norm
    pub residual: f64,
    pub unknown_count: usize,
    pub equation_count: usize,
    /// Unknowns minus the rank of the Jacobian at the solution
    pub dof: usize,
    /// Unknowns the equations leave free to move
    pub free_params: Vec<HParam>,
    /// Equations already implied by the ones before them
    pub redundant_equations: Vec<HEquation>,
    /// Human-readable status message
    pub status_message: String,
}

impl SolveResult {
    pub fn is_fully_constrained(&self) -> bool {
        self.status == SolveStatus::FullyConstrained
    }

    pub fn is_under_constrained(&self) -> bool {
        self.status == SolveStatus::UnderConstrained
    }

    /// Constraints owning at least one redundant equation.
    pub fn redundant_constraints(&self) -> Vec<HConstraint> {
        let set: BTreeSet<HConstraint> = self
            .redundant_equations
            .iter()
            .map(|e| e.constraint())
            .collect();
        set.into_iter().collect()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Serialize)]
pub enum SolveError {
    #[error("group {0} does not exist")]
    UnknownGroup(HGroup),
    #[error("group {group} reads params of group {depends_on}, which is not solved")]
    DependencyNotSolved { group: HGroup, depends_on: HGroup },
    #[error("could not solve group {group}: no convergence after {iterations} iterations (residual {residual:.3e})")]
    DidNotConverge {
        group: HGroup,
        iterations: usize,
        residual: f64,
    },
    #[error("group {group} is over-constrained and inconsistent (residual {residual:.3e}), conflicting constraints: {conflicting:?}")]
    Inconsistent {
        group: HGroup,
        residual: f64,
        conflicting: Vec<HConstraint>,
    },
    #[error("solve of group {group} was aborted")]
    Aborted { group: HGroup },
    #[error(transparent)]
    Eval(#[from] EvalError),
}

/// One entry of a multi-group solve.
#[derive(Debug, Clone, Serialize)]
pub struct GroupSolve {
    pub group: HGroup,
    pub result: Result<SolveResult, SolveError>,
}

impl Sketch {
    pub fn solve_group(&mut self, hg: HGroup) -> Result<SolveResult, SolveError> {
        self.solve_group_with_abort(hg, None)
    }

    /// Solves one group. `abort` is polled between iterations; an aborted or
    /// failed solve leaves every param value untouched and the group unsolved.
    pub fn solve_group_with_abort(
        &mut self,
        hg: HGroup,
        abort: Option<&AtomicBool>,
    ) -> Result<SolveResult, SolveError> {
        let result = self.run_solve(hg, abort);
        if let Some(g) = self.groups.get_mut(hg) {
            g.solved = result.is_ok();
        }
        match &result {
            Ok(r) => info!(group = %hg, iterations = r.iterations, dof = r.dof, "{}", r.status_message),
            Err(e) => warn!(group = %hg, "{}", e),
        }
        result
    }

    /// Re-solves, in order, every group whose solve order is at least `order`.
    pub fn solve_from(&mut self, order: u32) -> Vec<GroupSolve> {
        let pending: Vec<HGroup> = self
            .groups_in_order()
            .into_iter()
            .filter(|h| self.groups.get(*h).is_some_and(|g| g.solve_order >= order))
            .collect();
        for h in &pending {
            if let Some(g) = self.groups.get_mut(*h) {
                g.solved = false;
            }
        }
        pending
            .into_iter()
            .map(|group| GroupSolve {
                group,
                result: self.solve_group(group),
            })
            .collect()
    }

    pub fn solve_all(&mut self) -> Vec<GroupSolve> {
        self.solve_from(0)
    }

    fn group_system(&self, hg: HGroup, only: Option<&BTreeSet<HConstraint>>) -> System {
        let equations = self.equations.iter().filter(|eq| {
            let hc = eq.h.constraint();
            self.constraint_group(hc) == Some(hg) && only.map_or(true, |set| set.contains(&hc))
        });
        let unknowns = self
            .store
            .params
            .iter()
            .filter(|p| !p.known && self.param_group(p.h) == Some(hg))
            .map(|p| p.h)
            .collect();
        System::new(equations, unknowns)
    }

    fn run_solve(&mut self, hg: HGroup, abort: Option<&AtomicBool>) -> Result<SolveResult, SolveError> {
        if !self.groups.contains(hg) {
            return Err(SolveError::UnknownGroup(hg));
        }
        for eq in self.equations.iter() {
            if self.constraint_group(eq.h.constraint()) != Some(hg) {
                continue;
            }
            for p in eq.e.params() {
                match self.param_group(p) {
                    Some(og) if og != hg => {
                        if !self.groups.get(og).is_some_and(|g| g.solved) {
                            return Err(SolveError::DependencyNotSolved {
                                group: hg,
                                depends_on: og,
                            });
                        }
                    }
                    _ => {}
                }
            }
        }

        let system = self.group_system(hg, None);
        let x0 = system.start(&self.store);
        let config = self.config.clone();

        match newton::solve(&system, &self.store, x0.clone(), &config, abort)? {
            Outcome::Converged {
                x,
                iterations,
                residual,
            } => {
                let j = system.jacobian_at(&self.store, &x)?;
                let eps = config.rank_tolerance;
                let rank = newton::rank(&j, eps);
                let dof = system.cols() - rank;
                let free_params = if dof > 0 {
                    newton::free_columns(&j, eps)
                        .into_iter()
                        .map(|c| system.unknowns[c])
                        .collect()
                } else {
                    Vec::new()
                };
                let redundant_equations: Vec<HEquation> = newton::dependent_rows(&j, eps)
                    .into_iter()
                    .map(|r| system.equations[r])
                    .collect();

                for (h, v) in system.unknowns.iter().zip(x.iter()) {
                    if let Some(p) = self.store.params.get_mut(*h) {
                        p.val = *v;
                    }
                }

                let status = if dof == 0 {
                    SolveStatus::FullyConstrained
                } else {
                    SolveStatus::UnderConstrained
                };
                let status_message = match status {
                    SolveStatus::FullyConstrained => "Fully constrained".to_string(),
                    SolveStatus::UnderConstrained => format!("Under-constrained ({} DOF remaining)", dof),
                };
                Ok(SolveResult {
                    group: hg,
                    status,
                    iterations,
                    residual,
                    unknown_count: system.cols(),
                    equation_count: system.rows(),
                    dof,
                    free_params,
                    redundant_equations,
                    status_message,
                })
            }
            Outcome::Stationary { x, residual, .. } => Err(SolveError::Inconsistent {
                group: hg,
                residual,
                conflicting: self.find_conflicts(hg, &system, &x, &x0)?,
            }),
            Outcome::IterationLimit {
                iterations,
                residual,
            } => Err(SolveError::DidNotConverge {
                group: hg,
                iterations,
                residual,
            }),
            Outcome::Degenerate { iterations } => Err(SolveError::DidNotConverge {
                group: hg,
                iterations,
                residual: f64::NAN,
            }),
            Outcome::Aborted { .. } => Err(SolveError::Aborted { group: hg }),
        }
    }

    /// Narrows an inconsistent group down to a small set of constraints that
    /// cannot hold together. Candidates are the equations that are dependent
    /// or unsatisfied at the least-squares point, plus those sharing unknowns
    /// with them; a deletion filter then drops every candidate whose removal
    /// keeps the rest inconsistent.
    fn find_conflicts(
        &self,
        hg: HGroup,
        system: &System,
        x: &DVector<f64>,
        x0: &DVector<f64>,
    ) -> Result<Vec<HConstraint>, SolveError> {
        let eps = self.config.rank_tolerance;
        let f = system.residuals_at(&self.store, x)?;
        let j = system.jacobian_at(&self.store, x)?;

        let mut rows: BTreeSet<usize> = newton::dependent_rows(&j, eps).into_iter().collect();
        rows.extend((0..f.len()).filter(|&i| f[i].abs() > self.config.residual_tolerance));
        let jr = &j;
        let cols: BTreeSet<usize> = rows
            .iter()
            .flat_map(|&r| (0..jr.ncols()).filter(move |&c| jr[(r, c)].abs() > eps))
            .collect();
        for r in 0..j.nrows() {
            if cols.iter().any(|&c| j[(r, c)].abs() > eps) {
                rows.insert(r);
            }
        }

        let mut kept: BTreeSet<HConstraint> = rows
            .iter()
            .map(|&r| system.equations[r].constraint())
            .collect();
        if kept.len() > self.config.conflict_search_limit {
            return Ok(kept.into_iter().collect());
        }
        if !self.is_inconsistent(hg, &kept, x0) {
            kept = system.equations.iter().map(|e| e.constraint()).collect();
            if kept.len() > self.config.conflict_search_limit {
                return Ok(kept.into_iter().collect());
            }
        }

        for hc in kept.clone() {
            let mut trial = kept.clone();
            trial.remove(&hc);
            if self.is_inconsistent(hg, &trial, x0) {
                kept = trial;
            }
        }
        Ok(kept.into_iter().collect())
    }

    fn is_inconsistent(&self, hg: HGroup, constraints: &BTreeSet<HConstraint>, x0: &DVector<f64>) -> bool {
        if constraints.is_empty() {
            return false;
        }
        let system = self.group_system(hg, Some(constraints));
        !matches!(
            newton::solve(&system, &self.store, x0.clone(), &self.config, None),
            Ok(outcome) if outcome.is_converged()
        )
    }
}
