use super::constraint::ConstraintKind;
use super::error::SketchError;
use super::solver::{GroupSolve, SolverConfig};
use super::types::RequestKind;
use super::Sketch;
use crate::handle::{HConstraint, HEntity, HGroup, HParam, HRequest};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use tracing::info;

/// One user edit, as sent by a front end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    AddGroup {
        name: String,
    },
    AddRequest {
        group: HGroup,
        kind: RequestKind,
        #[serde(default)]
        csys: Option<HEntity>,
        #[serde(default)]
        construction: bool,
        /// Initial world positions for the request's points, in handle order.
        /// Empty keeps the generated defaults; otherwise one per point.
        #[serde(default)]
        points: Vec<[f64; 3]>,
    },
    AddConstraint {
        group: HGroup,
        kind: ConstraintKind,
        #[serde(default)]
        modify_to_satisfy: bool,
    },
    AddUserEquation {
        group: HGroup,
        text: String,
    },
    SetParam {
        param: HParam,
        value: f64,
    },
    PinParam {
        param: HParam,
        known: bool,
    },
    MovePoint {
        point: HEntity,
        to: [f64; 3],
    },
    SetConstraintValue {
        constraint: HConstraint,
        value: f64,
    },
    ChangeRequestKind {
        request: HRequest,
        kind: RequestKind,
    },
    DeleteRequest {
        request: HRequest,
    },
    DeleteConstraint {
        constraint: HConstraint,
    },
    DeleteGroup {
        group: HGroup,
    },
    SetSolverConfig {
        config: SolverConfig,
    },
    Solve,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Created {
    Group(HGroup),
    Request(HRequest),
    Constraint(HConstraint),
}

/// What an applied command produced, and the re-solve it triggered.
#[derive(Debug, Clone, Serialize)]
pub struct EditReport {
    pub created: Option<Created>,
    pub solves: Vec<GroupSolve>,
}

impl Sketch {
    /// Applies one command, then re-solves every group from the first one the
    /// command could have affected.
    pub fn apply(&mut self, command: Command) -> Result<EditReport, SketchError> {
        info!(?command, "applying command");
        let (created, order) = match command {
            Command::AddGroup { name } => {
                let h = self.add_group(&name)?;
                (Some(Created::Group(h)), self.group_order(h)?)
            }
            Command::AddRequest {
                group,
                kind,
                csys,
                construction,
                points,
            } => {
                let h = self.transaction(|s| {
                    let h = s.add_request(group, kind, csys, construction)?;
                    let targets = s.request_points(h);
                    if !points.is_empty() && points.len() != targets.len() {
                        return Err(SketchError::PointCountMismatch {
                            request: h,
                            expected: targets.len(),
                            given: points.len(),
                        });
                    }
                    for (pt, p) in targets.into_iter().zip(points) {
                        s.point_force_to(pt, Vector3::from(p))?;
                    }
                    Ok(h)
                })?;
                (Some(Created::Request(h)), self.group_order(group)?)
            }
            Command::AddConstraint {
                group,
                kind,
                modify_to_satisfy,
            } => {
                let h = if modify_to_satisfy {
                    self.add_constraint_satisfied(group, kind)?
                } else {
                    self.add_constraint(group, kind)?
                };
                (Some(Created::Constraint(h)), self.group_order(group)?)
            }
            Command::AddUserEquation { group, text } => {
                let h = self.add_user_equation(group, &text)?;
                (Some(Created::Constraint(h)), self.group_order(group)?)
            }
            Command::SetParam { param, value } => {
                self.set_param(param, value)?;
                (None, self.request_order(param.request())?)
            }
            Command::PinParam { param, known } => {
                self.pin_param(param, known)?;
                (None, self.request_order(param.request())?)
            }
            Command::MovePoint { point, to } => {
                self.point_force_to(point, Vector3::from(to))?;
                (None, self.request_order(point.request())?)
            }
            Command::SetConstraintValue { constraint, value } => {
                self.set_constraint_value(constraint, value)?;
                (None, self.constraint_order(constraint)?)
            }
            Command::ChangeRequestKind { request, kind } => {
                self.change_request_kind(request, kind)?;
                (None, self.request_order(request)?)
            }
            Command::DeleteRequest { request } => {
                let order = self.request_order(request)?;
                self.delete_request(request)?;
                (None, order)
            }
            Command::DeleteConstraint { constraint } => {
                let order = self.constraint_order(constraint)?;
                self.delete_constraint(constraint)?;
                (None, order)
            }
            Command::DeleteGroup { group } => {
                let order = self.group_order(group)?;
                self.delete_group(group)?;
                (None, order)
            }
            Command::SetSolverConfig { config } => {
                self.set_config(config);
                (None, 0)
            }
            Command::Solve => (None, 0),
        };

        Ok(EditReport {
            created,
            solves: self.solve_from(order),
        })
    }

    fn request_order(&self, h: HRequest) -> Result<u32, SketchError> {
        self.group_order(self.request(h)?.group)
    }

    fn constraint_order(&self, h: HConstraint) -> Result<u32, SketchError> {
        self.group_order(self.constraint(h)?.group)
    }
}
