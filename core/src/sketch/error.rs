use crate::expr::{EvalError, ParseError};
use crate::handle::{HConstraint, HEntity, HGroup, HParam, HRequest, HandleError};
use thiserror::Error;

/// Everything that can reject an edit. A rejected edit leaves the sketch
/// exactly as it was before the edit started.
#[derive(Debug, Error)]
pub enum SketchError {
    #[error(transparent)]
    Capacity(#[from] HandleError),

    #[error("group {0} does not exist")]
    UnknownGroup(HGroup),
    #[error("request {0} does not exist")]
    UnknownRequest(HRequest),
    #[error("constraint {0} does not exist")]
    UnknownConstraint(HConstraint),
    #[error("entity {0} does not exist")]
    UnknownEntity(HEntity),
    #[error("param {0} does not exist")]
    UnknownParam(HParam),

    #[error("the reference group and its requests cannot be edited")]
    ReferencesAreReadOnly,

    #[error("entity {entity} is a {found}, expected a {expected}")]
    WrongEntityKind {
        entity: HEntity,
        expected: &'static str,
        found: &'static str,
    },
    #[error("entity {entity} has no coordinate system to measure in")]
    MissingCsys { entity: HEntity },

    #[error("constraint {constraint} refers to entity {entity}, which is no longer generated")]
    BrokenReference {
        constraint: HConstraint,
        entity: HEntity,
    },
    #[error("constraint {constraint} refers to param {param}, which is no longer generated")]
    BrokenParamReference {
        constraint: HConstraint,
        param: HParam,
    },
    #[error(
        "constraint {constraint} refers to entity {entity} from revision {authored} of its request, \
         which is now at revision {current}"
    )]
    StaleReference {
        constraint: HConstraint,
        entity: HEntity,
        authored: u32,
        current: u32,
    },
    #[error(
        "constraint {constraint} refers to param {param} from revision {authored} of its request, \
         which is now at revision {current}"
    )]
    StaleParamReference {
        constraint: HConstraint,
        param: HParam,
        authored: u32,
        current: u32,
    },
    #[error("constraint {constraint} in group {group} reads {request} from later group {other}")]
    ForwardReference {
        constraint: HConstraint,
        group: HGroup,
        request: HRequest,
        other: HGroup,
    },
    #[error("request {request} copies request {copied}, which is not generated before it")]
    MissingSource { request: HRequest, copied: HRequest },
    #[error("request {request} cannot copy {entity}: only points and line segments repeat")]
    UnsupportedCopy { request: HRequest, entity: HEntity },
    #[error("request {request} uses {csys} as its coordinate system, which is not generated")]
    MissingRequestCsys { request: HRequest, csys: HEntity },

    #[error("param {0} orients a coordinate system and cannot be unpinned")]
    OrientationIsPinned(HParam),

    #[error("request {request} has {expected} points but {given} positions were given")]
    PointCountMismatch {
        request: HRequest,
        expected: usize,
        given: usize,
    },

    #[error("constraint {0} has no dimension value")]
    NotADimension(HConstraint),

    #[error("constraint {constraint} cannot be made to hold by moving its group's params (residual {residual:e})")]
    CannotSatisfy { constraint: HConstraint, residual: f64 },

    #[error("entity {0} is not a point")]
    NotAPoint(HEntity),

    #[error("{0} is already present")]
    Duplicate(String),

    #[error("invalid equation: {0}")]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Eval(#[from] EvalError),
    #[error("invalid sketch file: {0}")]
    Persistence(#[from] serde_json::Error),
}
