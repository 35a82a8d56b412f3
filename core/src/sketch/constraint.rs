use super::error::SketchError;
use super::newton::{self, Outcome, System};
use super::solver::SolverConfig;
use super::store::Store;
use super::types::{Entity, EntityKind, Equation, Group, Request};
use crate::expr::{Expr, ExprVector};
use crate::handle::{HConstraint, HEntity, HGroup, HParam, HRequest, IdList, Keyed};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

/// What a horizontal or vertical constraint acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AxisTarget {
    Line(HEntity),
    Points(HEntity, HEntity),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConstraintKind {
    /// A free-form expression that must evaluate to zero.
    UserEquation { expr: Expr },
    PointsCoincident { pt_a: HEntity, pt_b: HEntity },
    PtPtDistance {
        pt_a: HEntity,
        pt_b: HEntity,
        distance: Expr,
    },
    /// Signed when the point and line share a csys, unsigned otherwise.
    PtLineDistance {
        pt: HEntity,
        line: HEntity,
        distance: Expr,
    },
    PtInPlane { pt: HEntity, plane: HEntity },
    EqualLengthLines { line_a: HEntity, line_b: HEntity },
    /// Level along the csys u axis.
    Horizontal { target: AxisTarget },
    /// Level along the csys v axis.
    Vertical { target: AxisTarget },
    Parallel { line_a: HEntity, line_b: HEntity },
    Perpendicular { line_a: HEntity, line_b: HEntity },
}

impl ConstraintKind {
    pub fn name(&self) -> &'static str {
        match self {
            ConstraintKind::UserEquation { .. } => "user equation",
            ConstraintKind::PointsCoincident { .. } => "points coincident",
            ConstraintKind::PtPtDistance { .. } => "point-point distance",
            ConstraintKind::PtLineDistance { .. } => "point-line distance",
            ConstraintKind::PtInPlane { .. } => "point in plane",
            ConstraintKind::EqualLengthLines { .. } => "equal length",
            ConstraintKind::Horizontal { .. } => "horizontal",
            ConstraintKind::Vertical { .. } => "vertical",
            ConstraintKind::Parallel { .. } => "parallel",
            ConstraintKind::Perpendicular { .. } => "perpendicular",
        }
    }

    /// Every entity the constraint reads.
    pub fn entities(&self) -> Vec<HEntity> {
        match self {
            ConstraintKind::UserEquation { .. } => Vec::new(),
            ConstraintKind::PointsCoincident { pt_a, pt_b }
            | ConstraintKind::PtPtDistance { pt_a, pt_b, .. } => vec![*pt_a, *pt_b],
            ConstraintKind::PtLineDistance { pt, line, .. } => vec![*pt, *line],
            ConstraintKind::PtInPlane { pt, plane } => vec![*pt, *plane],
            ConstraintKind::EqualLengthLines { line_a, line_b }
            | ConstraintKind::Parallel { line_a, line_b }
            | ConstraintKind::Perpendicular { line_a, line_b } => vec![*line_a, *line_b],
            ConstraintKind::Horizontal { target } | ConstraintKind::Vertical { target } => match target {
                AxisTarget::Line(l) => vec![*l],
                AxisTarget::Points(a, b) => vec![*a, *b],
            },
        }
    }

    /// Expressions embedded in the constraint: the user equation or the dimension.
    pub fn exprs(&self) -> Vec<&Expr> {
        match self {
            ConstraintKind::UserEquation { expr } => vec![expr],
            _ => self.dimension().into_iter().collect(),
        }
    }

    pub fn dimension(&self) -> Option<&Expr> {
        match self {
            ConstraintKind::PtPtDistance { distance, .. }
            | ConstraintKind::PtLineDistance { distance, .. } => Some(distance),
            _ => None,
        }
    }

    pub fn dimension_mut(&mut self) -> Option<&mut Expr> {
        match self {
            ConstraintKind::PtPtDistance { distance, .. }
            | ConstraintKind::PtLineDistance { distance, .. } => Some(distance),
            _ => None,
        }
    }

    fn params(&self) -> BTreeSet<HParam> {
        let mut out = BTreeSet::new();
        for e in self.exprs() {
            e.collect_params(&mut out);
        }
        out
    }
}

/// Where a dimension label is drawn, relative to its anchor.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ConstraintDisplay {
    pub offset: [f64; 3],
}

/// The revision of a request at the moment a constraint started referring to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestBinding {
    pub request: HRequest,
    pub revision: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub h: HConstraint,
    #[serde(skip)]
    pub tag: i32,
    pub group: HGroup,
    pub kind: ConstraintKind,
    #[serde(default)]
    pub disp: ConstraintDisplay,
    #[serde(default)]
    pub bindings: Vec<RequestBinding>,
}

impl Keyed for Constraint {
    type Handle = HConstraint;

    fn handle(&self) -> HConstraint {
        self.h
    }
}

impl Constraint {
    /// Builds a constraint bound to the current revisions of everything it reads.
    pub fn new(
        h: HConstraint,
        group: HGroup,
        kind: ConstraintKind,
        store: &Store,
    ) -> Result<Self, SketchError> {
        let mut bindings: Vec<RequestBinding> = Vec::new();
        let mut bind = |request: HRequest, revision: u32| {
            if !bindings.iter().any(|b| b.request == request) {
                bindings.push(RequestBinding { request, revision });
            }
        };
        for entity in kind.entities() {
            let e = store
                .entities
                .get(entity)
                .ok_or(SketchError::BrokenReference { constraint: h, entity })?;
            bind(entity.request(), e.revision);
        }
        for param in kind.params() {
            let p = store
                .params
                .get(param)
                .ok_or(SketchError::BrokenParamReference { constraint: h, param })?;
            bind(param.request(), p.revision);
        }
        Ok(Self {
            h,
            tag: 0,
            group,
            kind,
            disp: ConstraintDisplay::default(),
            bindings,
        })
    }

    fn bound_revision(&self, request: HRequest) -> Option<u32> {
        self.bindings
            .iter()
            .find(|b| b.request == request)
            .map(|b| b.revision)
    }

    fn check_order(
        &self,
        request: HRequest,
        groups: &IdList<Group>,
        requests: &IdList<Request>,
    ) -> Result<(), SketchError> {
        let order = |g: HGroup| groups.get(g).map(|g| g.solve_order);
        let other = match requests.get(request) {
            Some(r) => r.group,
            None => return Ok(()),
        };
        if order(other) > order(self.group) {
            return Err(SketchError::ForwardReference {
                constraint: self.h,
                group: self.group,
                request,
                other,
            });
        }
        Ok(())
    }

    /// Checks that every reference still resolves to what it resolved to when
    /// the constraint was authored, and that nothing is read from a later group.
    pub fn validate(
        &self,
        store: &Store,
        groups: &IdList<Group>,
        requests: &IdList<Request>,
    ) -> Result<(), SketchError> {
        for entity in self.kind.entities() {
            let e = store.entities.get(entity).ok_or(SketchError::BrokenReference {
                constraint: self.h,
                entity,
            })?;
            if let Some(authored) = self.bound_revision(entity.request()) {
                if authored != e.revision {
                    return Err(SketchError::StaleReference {
                        constraint: self.h,
                        entity,
                        authored,
                        current: e.revision,
                    });
                }
            }
            self.check_order(entity.request(), groups, requests)?;
        }
        for param in self.kind.params() {
            let p = store.params.get(param).ok_or(SketchError::BrokenParamReference {
                constraint: self.h,
                param,
            })?;
            if let Some(authored) = self.bound_revision(param.request()) {
                if authored != p.revision {
                    return Err(SketchError::StaleParamReference {
                        constraint: self.h,
                        param,
                        authored,
                        current: p.revision,
                    });
                }
            }
            self.check_order(param.request(), groups, requests)?;
        }
        Ok(())
    }

    /// The quantity a dimension constraint pins, as an expression.
    pub fn measured_expr(&self, store: &Store) -> Result<Option<Expr>, SketchError> {
        Ok(match &self.kind {
            ConstraintKind::PtPtDistance { pt_a, pt_b, .. } => Some(
                store
                    .point_get_exprs(*pt_a)?
                    .minus(&store.point_get_exprs(*pt_b)?)
                    .magnitude(),
            ),
            ConstraintKind::PtLineDistance { pt, line, .. } => Some(point_line_distance(store, *pt, *line)?),
            _ => None,
        })
    }

    /// Lowers the constraint into equations over params.
    pub fn generate_equations(&self, store: &Store) -> Result<Vec<Equation>, SketchError> {
        let exprs: Vec<Expr> = match &self.kind {
            ConstraintKind::UserEquation { expr } => vec![expr.clone()],

            ConstraintKind::PointsCoincident { pt_a, pt_b } => coincidence_rows(store, *pt_a, *pt_b)?,

            ConstraintKind::PtPtDistance {
                pt_a,
                pt_b,
                distance,
            } => {
                if distance.as_constant() == Some(0.0) {
                    // Neither |d| nor |d|^2 has a full-rank Jacobian at d = 0.
                    coincidence_rows(store, *pt_a, *pt_b)?
                } else {
                    let d = store
                        .point_get_exprs(*pt_a)?
                        .minus(&store.point_get_exprs(*pt_b)?);
                    vec![d.magnitude() - distance.clone()]
                }
            }

            ConstraintKind::PtLineDistance { pt, line, distance } => {
                vec![point_line_distance(store, *pt, *line)? - distance.clone()]
            }

            ConstraintKind::PtInPlane { pt, plane } => {
                let (n, d) = store.plane_get_exprs(*plane)?;
                vec![store.point_get_exprs(*pt)?.dot(&n) - d]
            }

            ConstraintKind::EqualLengthLines { line_a, line_b } => {
                vec![line_length(store, *line_a)? - line_length(store, *line_b)?]
            }

            ConstraintKind::Horizontal { target } => vec![axis_offset(store, *target, true)?],
            ConstraintKind::Vertical { target } => vec![axis_offset(store, *target, false)?],

            ConstraintKind::Parallel { line_a, line_b } => {
                let ((au, av), (bu, bv)) = planar_directions(store, *line_a, *line_b)?;
                vec![au * bv - av * bu]
            }
            ConstraintKind::Perpendicular { line_a, line_b } => {
                let ((au, av), (bu, bv)) = planar_directions(store, *line_a, *line_b)?;
                vec![au * bu + av * bv]
            }
        };

        exprs
            .into_iter()
            .enumerate()
            .map(|(i, e)| {
                Ok(Equation {
                    h: self.h.equation(i as u32)?,
                    e,
                })
            })
            .collect()
    }

    /// Makes the constraint hold at the current geometry. Dimensions take the
    /// measured value; everything else nudges the movable params with a
    /// local Newton solve over this constraint's equations alone, failing with
    /// `CannotSatisfy` when that solve does not converge.
    pub fn modify_to_satisfy(
        &mut self,
        store: &mut Store,
        config: &SolverConfig,
        movable: impl Fn(HParam) -> bool,
    ) -> Result<(), SketchError> {
        if let Some(measured) = self.measured_expr(store)? {
            let value = measured.eval(&*store)?;
            if let Some(d) = self.kind.dimension_mut() {
                *d = Expr::Constant(value);
            }
            return Ok(());
        }

        let equations = self.generate_equations(store)?;
        let mut involved = BTreeSet::new();
        for eq in &equations {
            eq.e.collect_params(&mut involved);
        }
        let unknowns: Vec<HParam> = involved
            .into_iter()
            .filter(|&p| movable(p) && store.params.get(p).is_some_and(|p| !p.known))
            .collect();
        let system = System::new(equations.iter(), unknowns);
        let x0 = system.start(store);
        match newton::solve(&system, store, x0, config, None)? {
            Outcome::Converged { x, .. } => {
                for (h, v) in system.unknowns.iter().zip(x.iter()) {
                    if let Some(p) = store.params.get_mut(*h) {
                        p.val = *v;
                    }
                }
            }
            other => {
                debug!(constraint = %self.h, ?other, "could not move geometry onto new constraint");
                let residual = match other {
                    Outcome::Stationary { residual, .. } | Outcome::IterationLimit { residual, .. } => residual,
                    _ => f64::NAN,
                };
                return Err(SketchError::CannotSatisfy {
                    constraint: self.h,
                    residual,
                });
            }
        }
        Ok(())
    }
}

/// One row per shared axis: the csys coordinates when both points live in the
/// same csys, world coordinates otherwise.
fn coincidence_rows(store: &Store, pt_a: HEntity, pt_b: HEntity) -> Result<Vec<Expr>, SketchError> {
    let a = store.point(pt_a)?;
    let b = store.point(pt_b)?;
    match (store.point_get_uv_exprs(pt_a)?, store.point_get_uv_exprs(pt_b)?) {
        (Some((au, av)), Some((bu, bv))) if a.csys == b.csys => Ok(vec![au - bu, av - bv]),
        _ => {
            let d = store.point_get_exprs(pt_a)?.minus(&store.point_get_exprs(pt_b)?);
            Ok(vec![d.x, d.y, d.z])
        }
    }
}

fn same_plane(points: &[&Entity]) -> bool {
    points.iter().all(|p| p.kind == EntityKind::PointIn2d)
        && points.windows(2).all(|w| w[0].csys == w[1].csys)
}

fn line_length(store: &Store, line: HEntity) -> Result<Expr, SketchError> {
    let (a, b) = store.line_endpoints(line)?;
    Ok(store.point_get_exprs(b)?.minus(&store.point_get_exprs(a)?).magnitude())
}

fn point_line_distance(store: &Store, pt: HEntity, line: HEntity) -> Result<Expr, SketchError> {
    let (ha, hb) = store.line_endpoints(line)?;
    let entities = [store.point(pt)?, store.point(ha)?, store.point(hb)?];
    if same_plane(&entities) {
        let uv = |e: &Entity| (e.params[0].expr(), e.params[1].expr());
        let (pu, pv) = uv(entities[0]);
        let (au, av) = uv(entities[1]);
        let (bu, bv) = uv(entities[2]);
        let du = bu - au.clone();
        let dv = bv - av.clone();
        let cross = du.clone() * (pv - av) - dv.clone() * (pu - au);
        return Ok(cross / (du.square() + dv.square()).sqrt());
    }
    let a = store.point_get_exprs(ha)?;
    let b = store.point_get_exprs(hb)?;
    let p = store.point_get_exprs(pt)?;
    let dir = b.minus(&a);
    Ok(dir.cross(&p.minus(&a)).magnitude() / dir.magnitude())
}

/// Offset between two points along the csys axis normal to the requested direction.
fn axis_offset(store: &Store, target: AxisTarget, horizontal: bool) -> Result<Expr, SketchError> {
    let (ha, hb) = match target {
        AxisTarget::Line(l) => store.line_endpoints(l)?,
        AxisTarget::Points(a, b) => (a, b),
    };
    let a = store.point(ha)?;
    let b = store.point(hb)?;
    let slot = if horizontal { 1 } else { 0 };
    if same_plane(&[a, b]) {
        return Ok(a.params[slot].expr() - b.params[slot].expr());
    }
    let csys = a.csys.or(b.csys).ok_or(SketchError::MissingCsys { entity: ha })?;
    let (u, v) = store.csys_basis_exprs(csys)?;
    let axis = if horizontal { v } else { u };
    Ok(store.point_get_exprs(ha)?.minus(&store.point_get_exprs(hb)?).dot(&axis))
}

/// Directions of two lines in the (u, v) frame of the csys they are drawn in.
fn planar_directions(
    store: &Store,
    line_a: HEntity,
    line_b: HEntity,
) -> Result<((Expr, Expr), (Expr, Expr)), SketchError> {
    let (a0, a1) = store.line_endpoints(line_a)?;
    let (b0, b1) = store.line_endpoints(line_b)?;
    let points = [store.point(a0)?, store.point(a1)?, store.point(b0)?, store.point(b1)?];

    if same_plane(&points) {
        let d = |p: &Entity, q: &Entity| {
            (
                q.params[0].expr() - p.params[0].expr(),
                q.params[1].expr() - p.params[1].expr(),
            )
        };
        return Ok((d(points[0], points[1]), d(points[2], points[3])));
    }

    let csys = points
        .iter()
        .find_map(|p| p.csys)
        .ok_or(SketchError::MissingCsys { entity: line_a })?;
    let (u, v) = store.csys_basis_exprs(csys)?;
    let project = |d: ExprVector| (d.dot(&u), d.dot(&v));
    let da = store.point_get_exprs(a1)?.minus(&store.point_get_exprs(a0)?);
    let db = store.point_get_exprs(b1)?.minus(&store.point_get_exprs(b0)?);
    Ok((project(da), project(db)))
}
