//! Parametric sketch: groups of requests generate entities and params,
//! constraints lower to equations, and the solver moves params until the
//! equations hold.

pub mod command;
pub mod constraint;
pub mod error;
pub mod generate;
mod newton;
pub mod solver;
pub mod store;
pub mod types;

#[cfg(test)]
mod tests_distance_pl;
#[cfg(test)]
mod tests_dimensions_hv;
#[cfg(test)]
mod tests_infrastructure;

pub use command::{Command, Created, EditReport};
pub use constraint::{AxisTarget, Constraint, ConstraintDisplay, ConstraintKind};
pub use error::SketchError;
pub use solver::{GroupSolve, SolveError, SolveResult, SolveStatus, SolverConfig};
pub use store::Store;
pub use types::{Entity, EntityKind, Equation, Group, Param, ParamSlot, Request, RequestKind};

use crate::expr::{parse_expression, Expr};
use crate::handle::{HConstraint, HEntity, HGroup, HParam, HRequest, IdList};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, error, warn};

#[derive(Debug, Clone)]
pub struct Sketch {
    groups: IdList<Group>,
    requests: IdList<Request>,
    constraints: IdList<Constraint>,
    store: Store,
    equations: IdList<Equation>,
    config: SolverConfig,
    next_group: u32,
    next_request: u32,
    next_constraint: u32,
}

/// On-disk form: authored items and param values. Entities and equations
/// are derived and regenerated on load.
#[derive(Serialize, Deserialize)]
struct SketchFile {
    groups: IdList<Group>,
    requests: IdList<Request>,
    constraints: IdList<Constraint>,
    params: IdList<Param>,
    #[serde(default)]
    config: SolverConfig,
    next_group: u32,
    next_request: u32,
    next_constraint: u32,
}

impl Default for Sketch {
    fn default() -> Self {
        Self::new()
    }
}

impl Sketch {
    /// An empty sketch holding only the reference group: the XY, YZ and ZX
    /// planes and the origin.
    pub fn new() -> Self {
        let mut sketch = Self {
            groups: IdList::new(),
            requests: IdList::new(),
            constraints: IdList::new(),
            store: Store::default(),
            equations: IdList::new(),
            config: SolverConfig::default(),
            next_group: HGroup::REFERENCES.index() + 1,
            next_request: HRequest::FIRST_USER_INDEX,
            next_constraint: 1,
        };
        if let Err(h) = sketch.groups.add(Group {
            h: HGroup::REFERENCES,
            tag: 0,
            solve_order: 0,
            solved: false,
            name: "#references".to_string(),
        }) {
            error!(group = %h, "reference group already present");
        }
        for (h, name) in [
            (HRequest::REFERENCE_XY, "#XY"),
            (HRequest::REFERENCE_YZ, "#YZ"),
            (HRequest::REFERENCE_ZX, "#ZX"),
        ] {
            let added = sketch.requests.add(Request {
                h,
                tag: 0,
                kind: RequestKind::Csys2d,
                csys: None,
                group: HGroup::REFERENCES,
                name: name.to_string(),
                construction: false,
                remap: Vec::new(),
                revision: 0,
            });
            if let Err(h) = added {
                error!(request = %h, "reference request already present");
            }
        }
        if let Err(e) = sketch.regenerate() {
            error!("reference geometry failed to generate: {}", e);
        }
        if let Err(e) = sketch.solve_group(HGroup::REFERENCES) {
            error!("reference geometry failed to solve: {}", e);
        }
        sketch
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: SolverConfig) {
        self.config = config;
        self.invalidate_from(0);
    }

    // ---- lookups ----

    pub fn groups(&self) -> &IdList<Group> {
        &self.groups
    }

    pub fn requests(&self) -> &IdList<Request> {
        &self.requests
    }

    pub fn constraints(&self) -> &IdList<Constraint> {
        &self.constraints
    }

    pub fn equations(&self) -> &IdList<Equation> {
        &self.equations
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn group(&self, h: HGroup) -> Result<&Group, SketchError> {
        self.groups.get(h).ok_or(SketchError::UnknownGroup(h))
    }

    pub fn request(&self, h: HRequest) -> Result<&Request, SketchError> {
        self.requests.get(h).ok_or(SketchError::UnknownRequest(h))
    }

    pub fn constraint(&self, h: HConstraint) -> Result<&Constraint, SketchError> {
        self.constraints.get(h).ok_or(SketchError::UnknownConstraint(h))
    }

    pub fn entity(&self, h: HEntity) -> Result<&Entity, SketchError> {
        self.store.entity(h)
    }

    pub fn param(&self, h: HParam) -> Result<&Param, SketchError> {
        self.store.param(h)
    }

    pub fn point_coords(&self, h: HEntity) -> Result<Vector3<f64>, SketchError> {
        self.store.point_get_coords(h)
    }

    /// The entity with its slots replaced by current values, for rendering.
    pub fn solved_entity(&self, h: HEntity) -> Result<Entity, SketchError> {
        self.store.solved_entity(h)
    }

    /// Entities that make up output geometry: no construction lines, no references.
    pub fn real_geometry(&self) -> impl Iterator<Item = &Entity> + '_ {
        self.store
            .entities
            .iter()
            .filter(|e| !e.construction && !e.is_from_references())
    }

    pub fn equations_for(&self, h: HConstraint) -> impl Iterator<Item = &Equation> + '_ {
        self.equations.iter().filter(move |eq| eq.h.constraint() == h)
    }

    /// Point entities of a request, in handle order.
    pub fn request_points(&self, h: HRequest) -> Vec<HEntity> {
        self.store
            .entities
            .iter()
            .filter(|e| e.h.request() == h && e.is_point())
            .map(|e| e.h)
            .collect()
    }

    pub fn groups_in_order(&self) -> Vec<HGroup> {
        let mut order: Vec<(u32, HGroup)> = self.groups.iter().map(|g| (g.solve_order, g.h)).collect();
        order.sort();
        order.into_iter().map(|(_, h)| h).collect()
    }

    pub fn param_group(&self, h: HParam) -> Option<HGroup> {
        self.requests.get(h.request()).map(|r| r.group)
    }

    pub fn constraint_group(&self, h: HConstraint) -> Option<HGroup> {
        self.constraints.get(h).map(|c| c.group)
    }

    pub(crate) fn group_order(&self, h: HGroup) -> Result<u32, SketchError> {
        Ok(self.group(h)?.solve_order)
    }

    // ---- edits ----

    /// Runs an edit and regenerates. Any error restores the sketch to its
    /// state before the edit.
    fn transaction<T>(&mut self, edit: impl FnOnce(&mut Self) -> Result<T, SketchError>) -> Result<T, SketchError> {
        let snapshot = self.clone();
        let result = edit(self).and_then(|value| self.regenerate().map(|()| value));
        if let Err(e) = &result {
            warn!("edit rejected: {}", e);
            *self = snapshot;
        }
        result
    }

    /// Marks groups from `order` on as needing a solve. The reference group
    /// holds only constants and stays solved.
    fn invalidate_from(&mut self, order: u32) {
        for g in self.groups.iter_mut() {
            if g.solve_order >= order && g.h != HGroup::REFERENCES {
                g.solved = false;
            }
        }
    }

    fn editable_group(&self, h: HGroup) -> Result<u32, SketchError> {
        if h == HGroup::REFERENCES {
            return Err(SketchError::ReferencesAreReadOnly);
        }
        self.group_order(h)
    }

    fn editable_request(&self, h: HRequest) -> Result<u32, SketchError> {
        if h.is_from_references() {
            return Err(SketchError::ReferencesAreReadOnly);
        }
        let group = self.request(h)?.group;
        self.group_order(group)
    }

    /// Appends a group after every existing one.
    pub fn add_group(&mut self, name: &str) -> Result<HGroup, SketchError> {
        self.transaction(|s| {
            let h = HGroup::from_index(s.next_group)?;
            let solve_order = s.groups.iter().map(|g| g.solve_order + 1).max().unwrap_or(0);
            s.groups
                .add(Group {
                    h,
                    tag: 0,
                    solve_order,
                    solved: false,
                    name: name.to_string(),
                })
                .map_err(|h| SketchError::Duplicate(format!("group {}", h)))?;
            s.next_group += 1;
            Ok(h)
        })
    }

    pub fn add_request(
        &mut self,
        group: HGroup,
        kind: RequestKind,
        csys: Option<HEntity>,
        construction: bool,
    ) -> Result<HRequest, SketchError> {
        self.transaction(|s| {
            let order = s.editable_group(group)?;
            let h = HRequest::from_index(s.next_request)?;
            let name = format!("{}{:03}", kind.name_prefix(), h.index());
            s.requests
                .add(Request {
                    h,
                    tag: 0,
                    kind,
                    csys,
                    group,
                    name,
                    construction,
                    remap: Vec::new(),
                    revision: 0,
                })
                .map_err(|h| SketchError::Duplicate(format!("request {}", h)))?;
            s.next_request += 1;
            s.invalidate_from(order);
            Ok(h)
        })
    }

    fn insert_constraint(&mut self, group: HGroup, kind: ConstraintKind) -> Result<HConstraint, SketchError> {
        let order = self.editable_group(group)?;
        let h = HConstraint::from_index(self.next_constraint)?;
        let constraint = Constraint::new(h, group, kind, &self.store)?;
        constraint.validate(&self.store, &self.groups, &self.requests)?;
        debug!(constraint = %h, kind = constraint.kind.name(), group = %group, "adding constraint");
        self.constraints
            .add(constraint)
            .map_err(|h| SketchError::Duplicate(format!("constraint {}", h)))?;
        self.next_constraint += 1;
        self.invalidate_from(order);
        Ok(h)
    }

    pub fn add_constraint(&mut self, group: HGroup, kind: ConstraintKind) -> Result<HConstraint, SketchError> {
        self.transaction(|s| s.insert_constraint(group, kind))
    }

    /// Adds a constraint and first moves it onto the current geometry:
    /// a dimension takes the measured value, anything else nudges the
    /// group's own params until it holds.
    pub fn add_constraint_satisfied(
        &mut self,
        group: HGroup,
        kind: ConstraintKind,
    ) -> Result<HConstraint, SketchError> {
        self.transaction(|s| {
            let h = s.insert_constraint(group, kind)?;
            let mut c = s.constraint(h)?.clone();
            let movable: BTreeSet<HParam> = s
                .store
                .params
                .iter()
                .filter(|p| s.param_group(p.h) == Some(group))
                .map(|p| p.h)
                .collect();
            c.modify_to_satisfy(&mut s.store, &s.config, |p| movable.contains(&p))?;
            if let Some(slot) = s.constraints.get_mut(h) {
                *slot = c;
            }
            Ok(h)
        })
    }

    /// Parses an equation whose `@request.index` references name params,
    /// e.g. `@line004.16 - @line004.19`.
    pub fn parse_user_equation(&self, text: &str) -> Result<Expr, SketchError> {
        let expr = parse_expression(text, |name| {
            let (request, index) = name.rsplit_once('.')?;
            let index: u32 = index.parse().ok()?;
            let r = self.requests.iter().find(|r| r.name == request)?;
            let h = r.h.param(index).ok()?;
            self.store.params.contains(h).then_some(h)
        })?;
        Ok(expr)
    }

    pub fn add_user_equation(&mut self, group: HGroup, text: &str) -> Result<HConstraint, SketchError> {
        let expr = self.parse_user_equation(text)?;
        self.add_constraint(group, ConstraintKind::UserEquation { expr })
    }

    pub fn set_param(&mut self, h: HParam, value: f64) -> Result<(), SketchError> {
        let order = self.editable_request(h.request())?;
        let p = self.store.params.get_mut(h).ok_or(SketchError::UnknownParam(h))?;
        p.val = value;
        self.invalidate_from(order);
        Ok(())
    }

    /// A known param is held constant by the solver. Csys orientations are
    /// always known.
    pub fn pin_param(&mut self, h: HParam, known: bool) -> Result<(), SketchError> {
        let order = self.editable_request(h.request())?;
        let orientation = self.request(h.request())?.kind == RequestKind::Csys2d && h.index() < 4;
        if orientation && !known {
            return Err(SketchError::OrientationIsPinned(h));
        }
        let p = self.store.params.get_mut(h).ok_or(SketchError::UnknownParam(h))?;
        p.known = known;
        self.invalidate_from(order);
        Ok(())
    }

    pub fn point_force_to(&mut self, h: HEntity, target: Vector3<f64>) -> Result<(), SketchError> {
        let order = self.editable_request(h.request())?;
        self.store.point_force_to(h, target)?;
        self.invalidate_from(order);
        Ok(())
    }

    pub fn set_constraint_value(&mut self, h: HConstraint, value: f64) -> Result<(), SketchError> {
        self.transaction(|s| {
            let group = s.constraint(h)?.group;
            let order = s.group_order(group)?;
            let c = s.constraints.get_mut(h).ok_or(SketchError::UnknownConstraint(h))?;
            let d = c.kind.dimension_mut().ok_or(SketchError::NotADimension(h))?;
            *d = Expr::Constant(value);
            s.invalidate_from(order);
            Ok(())
        })
    }

    pub fn set_constraint_offset(&mut self, h: HConstraint, offset: [f64; 3]) -> Result<(), SketchError> {
        let c = self.constraints.get_mut(h).ok_or(SketchError::UnknownConstraint(h))?;
        c.disp.offset = offset;
        Ok(())
    }

    /// Changes what a request draws. A change of kind invalidates every
    /// handle the request generated; constraints still pointing at them make
    /// the edit fail. Changing only the copy count of a repeat keeps the
    /// surviving copies' handles.
    pub fn change_request_kind(&mut self, h: HRequest, kind: RequestKind) -> Result<(), SketchError> {
        self.transaction(|s| {
            let order = s.editable_request(h)?;
            let r = s.requests.get_mut(h).ok_or(SketchError::UnknownRequest(h))?;
            if !r.kind.same_layout(&kind) {
                r.revision += 1;
                r.remap.clear();
            }
            r.kind = kind;
            s.invalidate_from(order);
            Ok(())
        })
    }

    pub fn delete_constraint(&mut self, h: HConstraint) -> Result<(), SketchError> {
        self.transaction(|s| {
            let group = s.constraint(h)?.group;
            let order = s.group_order(group)?;
            s.constraints.remove(h);
            s.invalidate_from(order);
            Ok(())
        })
    }

    /// Deletes a request together with everything that depends on it.
    pub fn delete_request(&mut self, h: HRequest) -> Result<(), SketchError> {
        self.transaction(|s| {
            let order = s.editable_request(h)?;
            if let Some(r) = s.requests.get_mut(h) {
                r.tag = 1;
            }
            s.delete_tagged();
            s.invalidate_from(order);
            Ok(())
        })
    }

    /// Deletes a group, its requests and constraints, and every constraint
    /// or request elsewhere that depends on them.
    pub fn delete_group(&mut self, h: HGroup) -> Result<(), SketchError> {
        self.transaction(|s| {
            let order = s.editable_group(h)?;
            if let Some(g) = s.groups.get_mut(h) {
                g.tag = 1;
            }
            s.delete_tagged();
            s.invalidate_from(order);
            Ok(())
        })
    }

    /// Removes tagged groups and requests and cascades to their dependents.
    fn delete_tagged(&mut self) {
        let dead_groups: BTreeSet<HGroup> = self.groups.iter().filter(|g| g.tag != 0).map(|g| g.h).collect();
        for r in self.requests.iter_mut() {
            if dead_groups.contains(&r.group) {
                r.tag = 1;
            }
        }

        loop {
            let dead: BTreeSet<HRequest> = self.requests.iter().filter(|r| r.tag != 0).map(|r| r.h).collect();
            let mut changed = false;
            for r in self.requests.iter_mut().filter(|r| r.tag == 0) {
                let copies_dead = matches!(r.kind, RequestKind::LinearRepeat { source, .. } if dead.contains(&source));
                let csys_dead = r.csys.is_some_and(|c| dead.contains(&c.request()));
                if copies_dead || csys_dead {
                    r.tag = 1;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        let dead: BTreeSet<HRequest> = self.requests.iter().filter(|r| r.tag != 0).map(|r| r.h).collect();
        for c in self.constraints.iter_mut() {
            let reads_dead = c.kind.entities().iter().any(|e| dead.contains(&e.request()))
                || c.kind
                    .exprs()
                    .iter()
                    .any(|e| e.params().iter().any(|p| dead.contains(&p.request())));
            if dead_groups.contains(&c.group) || reads_dead {
                c.tag = 1;
            }
        }

        debug!(
            groups = dead_groups.len(),
            requests = dead.len(),
            constraints = self.constraints.iter().filter(|c| c.tag != 0).count(),
            "cascading delete"
        );
        self.constraints.retain(|c| c.tag == 0);
        self.requests.retain(|r| r.tag == 0);
        self.groups.retain(|g| g.tag == 0);
    }

    /// Rebuilds every entity, param and equation from the authored requests
    /// and constraints, group by group in solve order.
    pub(crate) fn regenerate(&mut self) -> Result<(), SketchError> {
        let order = self.groups_in_order();
        let mut store = Store::default();
        for &hg in &order {
            let handles: Vec<HRequest> = self
                .requests
                .iter()
                .filter(|r| r.group == hg)
                .map(|r| r.h)
                .collect();
            for hr in handles {
                let r = self.requests.get_mut(hr).ok_or(SketchError::UnknownRequest(hr))?;
                r.generate(&mut store, &self.store.params)?;
            }
        }

        let mut equations = IdList::new();
        for &hg in &order {
            for c in self.constraints.iter().filter(|c| c.group == hg) {
                c.validate(&store, &self.groups, &self.requests)?;
                for eq in c.generate_equations(&store)? {
                    equations
                        .add(eq)
                        .map_err(|h| SketchError::Duplicate(format!("equation {}", h)))?;
                }
            }
        }

        debug!(
            entities = store.entities.len(),
            params = store.params.len(),
            equations = equations.len(),
            "regenerated sketch"
        );
        self.store = store;
        self.equations = equations;
        Ok(())
    }

    // ---- persistence ----

    pub fn to_json(&self) -> Result<String, SketchError> {
        let file = SketchFile {
            groups: self.groups.clone(),
            requests: self.requests.clone(),
            constraints: self.constraints.clone(),
            params: self.store.params.clone(),
            config: self.config.clone(),
            next_group: self.next_group,
            next_request: self.next_request,
            next_constraint: self.next_constraint,
        };
        Ok(serde_json::to_string_pretty(&file)?)
    }

    /// Loads a saved sketch, regenerates it and re-solves every group.
    pub fn from_json(json: &str) -> Result<(Self, Vec<GroupSolve>), SketchError> {
        let file: SketchFile = serde_json::from_str(json)?;
        let mut sketch = Self {
            groups: file.groups,
            requests: file.requests,
            constraints: file.constraints,
            store: Store {
                entities: IdList::new(),
                params: file.params,
            },
            equations: IdList::new(),
            config: file.config,
            next_group: file.next_group,
            next_request: file.next_request,
            next_constraint: file.next_constraint,
        };
        sketch.regenerate()?;
        let solves = sketch.solve_all();
        Ok((sketch, solves))
    }
}
