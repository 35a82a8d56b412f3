use crate::expr::Expr;
use crate::handle::{HEntity, HEquation, HGroup, HParam, HRequest, HandleError, Keyed};
use serde::{Deserialize, Serialize};

/// An ordered batch of requests and constraints, generated and solved together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub h: HGroup,
    /// Scratch mark used while cascading deletes.
    #[serde(skip)]
    pub tag: i32,
    /// Position among groups. A group may read the solved params of groups
    /// with a lower solve order, never the other way round.
    pub solve_order: u32,
    /// Solutions are never persisted; a loaded sketch is re-solved.
    #[serde(skip)]
    pub solved: bool,
    pub name: String,
}

impl Keyed for Group {
    type Handle = HGroup;

    fn handle(&self) -> HGroup {
        self.h
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequestKind {
    /// A 2D coordinate system: an orientation quaternion and an origin point.
    Csys2d,
    DatumPoint,
    LineSegment,
    /// Linear step-and-repeat: `copies` translated copies of every entity the
    /// source request generates, copy `n` offset by `n` times the translation.
    LinearRepeat { source: HRequest, copies: u32 },
}

impl RequestKind {
    pub fn name_prefix(&self) -> &'static str {
        match self {
            RequestKind::Csys2d => "csys",
            RequestKind::DatumPoint => "point",
            RequestKind::LineSegment => "line",
            RequestKind::LinearRepeat { .. } => "repeat",
        }
    }

    /// True when going from `self` to `other` keeps the param and slot layout,
    /// so existing handles may keep their values.
    pub fn same_layout(&self, other: &RequestKind) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

/// One remap table row: copy `copy_number` of `input` is `request.entity(id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMap {
    pub id: u32,
    pub input: HEntity,
    pub copy_number: u32,
}

/// A user-issued drawing operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub h: HRequest,
    #[serde(skip)]
    pub tag: i32,
    pub kind: RequestKind,
    /// Points are expressed in this coordinate system, or in world space when `None`.
    pub csys: Option<HEntity>,
    pub group: HGroup,
    pub name: String,
    /// Construction geometry is solved like anything else but is not real output geometry.
    #[serde(default)]
    pub construction: bool,
    #[serde(default)]
    pub remap: Vec<EntityMap>,
    /// Bumped whenever the request is regenerated from scratch.
    #[serde(default)]
    pub revision: u32,
}

impl Keyed for Request {
    type Handle = HRequest;

    fn handle(&self) -> HRequest {
        self.h
    }
}

impl Request {
    /// Maps a (source entity, copy number) pair to a concrete entity handle
    /// owned by this request, allocating one the first time the pair is seen.
    pub fn remap(&mut self, input: HEntity, copy_number: u32) -> Result<HEntity, HandleError> {
        if let Some(m) = self
            .remap
            .iter()
            .find(|m| m.input == input && m.copy_number == copy_number)
        {
            return self.h.entity(m.id);
        }
        let id = self.remap.len() as u32;
        let h = self.h.entity(id)?;
        self.remap.push(EntityMap { id, input, copy_number });
        Ok(h)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Slots: quaternion (w, x, y, z). Assoc: origin point.
    Csys2d,
    /// Slots: x, y, z.
    PointIn3d,
    /// Slots: u, v in the entity's csys.
    PointIn2d,
    /// Slots: translation x, y, z. Assoc: source point. Position is
    /// source + times * translation.
    PointTranslated { times: u32 },
    /// Assoc: the two endpoints.
    LineSegment,
}

impl EntityKind {
    pub const fn param_count(self) -> usize {
        match self {
            EntityKind::Csys2d => 4,
            EntityKind::PointIn3d => 3,
            EntityKind::PointIn2d => 2,
            EntityKind::PointTranslated { .. } => 3,
            EntityKind::LineSegment => 0,
        }
    }

    pub const fn assoc_count(self) -> usize {
        match self {
            EntityKind::Csys2d => 1,
            EntityKind::PointIn3d | EntityKind::PointIn2d => 0,
            EntityKind::PointTranslated { .. } => 1,
            EntityKind::LineSegment => 2,
        }
    }

    pub fn is_point(self) -> bool {
        matches!(
            self,
            EntityKind::PointIn3d | EntityKind::PointIn2d | EntityKind::PointTranslated { .. }
        )
    }

    pub fn describe(self) -> &'static str {
        match self {
            EntityKind::Csys2d => "2D coordinate system",
            EntityKind::PointIn3d => "3D point",
            EntityKind::PointIn2d => "2D point",
            EntityKind::PointTranslated { .. } => "translated point",
            EntityKind::LineSegment => "line segment",
        }
    }
}

/// An entity slot holds either a reference to a solver parameter or a literal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamSlot {
    Param(HParam),
    Value(f64),
}

impl ParamSlot {
    pub fn expr(self) -> Expr {
        match self {
            ParamSlot::Param(h) => Expr::Param(h),
            ParamSlot::Value(v) => Expr::Constant(v),
        }
    }
}

/// A generated geometric primitive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub h: HEntity,
    pub kind: EntityKind,
    pub params: Vec<ParamSlot>,
    pub assoc: Vec<HEntity>,
    pub csys: Option<HEntity>,
    pub group: HGroup,
    pub construction: bool,
    pub revision: u32,
}

impl Keyed for Entity {
    type Handle = HEntity;

    fn handle(&self) -> HEntity {
        self.h
    }
}

impl Entity {
    pub(crate) fn new(
        h: HEntity,
        kind: EntityKind,
        params: Vec<ParamSlot>,
        assoc: Vec<HEntity>,
        request: &Request,
    ) -> Self {
        debug_assert_eq!(params.len(), kind.param_count(), "slot count for {:?}", kind);
        debug_assert_eq!(assoc.len(), kind.assoc_count(), "assoc count for {:?}", kind);
        let csys = match kind {
            EntityKind::PointIn2d => request.csys,
            _ => None,
        };
        Self {
            h,
            kind,
            params,
            assoc,
            csys,
            group: request.group,
            construction: request.construction,
            revision: request.revision,
        }
    }

    /// False once the slots have been replaced by literal values.
    pub fn is_symbolic(&self) -> bool {
        self.params.iter().all(|s| matches!(s, ParamSlot::Param(_)))
    }

    pub fn is_point(&self) -> bool {
        self.kind.is_point()
    }

    pub fn is_point_in_3d(&self) -> bool {
        matches!(self.kind, EntityKind::PointIn3d)
    }

    pub fn is_from_references(&self) -> bool {
        self.h.request().is_from_references()
    }
}

/// A scalar unknown, or a pinned constant when `known` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub h: HParam,
    pub val: f64,
    #[serde(default)]
    pub known: bool,
    #[serde(default)]
    pub revision: u32,
}

impl Keyed for Param {
    type Handle = HParam;

    fn handle(&self) -> HParam {
        self.h
    }
}

/// One scalar expression that must evaluate to zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Equation {
    pub h: HEquation,
    pub e: Expr,
}

impl Keyed for Equation {
    type Handle = HEquation;

    fn handle(&self) -> HEquation {
        self.h
    }
}
