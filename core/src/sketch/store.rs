use super::error::SketchError;
use super::types::{Entity, EntityKind, Param, ParamSlot};
use crate::expr::{Expr, ExprVector, ParamValues};
use crate::handle::{HEntity, HParam, IdList};
use nalgebra::Vector3;

/// Generated entities and params, plus the geometric queries that turn an
/// entity's slots into symbolic or numeric coordinates.
#[derive(Debug, Clone, Default)]
pub struct Store {
    pub entities: IdList<Entity>,
    pub params: IdList<Param>,
}

impl ParamValues for Store {
    fn param_value(&self, h: HParam) -> Option<f64> {
        self.params.get(h).map(|p| p.val)
    }
}

impl Store {
    pub fn entity(&self, h: HEntity) -> Result<&Entity, SketchError> {
        self.entities.get(h).ok_or(SketchError::UnknownEntity(h))
    }

    pub fn param(&self, h: HParam) -> Result<&Param, SketchError> {
        self.params.get(h).ok_or(SketchError::UnknownParam(h))
    }

    pub fn slot_value(&self, slot: ParamSlot) -> Result<f64, SketchError> {
        match slot {
            ParamSlot::Param(h) => Ok(self.param(h)?.val),
            ParamSlot::Value(v) => Ok(v),
        }
    }

    fn expect_kind(
        &self,
        h: HEntity,
        expected: &'static str,
        accept: impl Fn(EntityKind) -> bool,
    ) -> Result<&Entity, SketchError> {
        let e = self.entity(h)?;
        if accept(e.kind) {
            Ok(e)
        } else {
            Err(SketchError::WrongEntityKind {
                entity: h,
                expected,
                found: e.kind.describe(),
            })
        }
    }

    pub fn point(&self, h: HEntity) -> Result<&Entity, SketchError> {
        self.expect_kind(h, "point", EntityKind::is_point)
    }

    pub fn line(&self, h: HEntity) -> Result<&Entity, SketchError> {
        self.expect_kind(h, "line segment", |k| k == EntityKind::LineSegment)
    }

    pub fn csys(&self, h: HEntity) -> Result<&Entity, SketchError> {
        self.expect_kind(h, "2D coordinate system", |k| k == EntityKind::Csys2d)
    }

    /// World-space position of a point as expressions in the params.
    pub fn point_get_exprs(&self, h: HEntity) -> Result<ExprVector, SketchError> {
        let e = self.point(h)?;
        let s = |i: usize| e.params[i].expr();
        match e.kind {
            EntityKind::PointIn3d => Ok(ExprVector::new(s(0), s(1), s(2))),
            EntityKind::PointIn2d => {
                let csys = e.csys.ok_or(SketchError::MissingCsys { entity: h })?;
                let (u, v) = self.csys_basis_exprs(csys)?;
                let origin = self.csys_origin_exprs(csys)?;
                Ok(origin.plus(&u.scaled_by(&s(0))).plus(&v.scaled_by(&s(1))))
            }
            EntityKind::PointTranslated { times } => {
                let source = self.point_get_exprs(e.assoc[0])?;
                let step = ExprVector::new(s(0), s(1), s(2));
                Ok(source.plus(&step.scaled_by(&Expr::Constant(f64::from(times)))))
            }
            _ => unreachable!("point() only accepts point kinds"),
        }
    }

    pub fn point_get_coords(&self, h: HEntity) -> Result<Vector3<f64>, SketchError> {
        Ok(self.point_get_exprs(h)?.eval(self)?)
    }

    /// In-plane coordinates of a 2D point, straight from its slots.
    pub fn point_get_uv_exprs(&self, h: HEntity) -> Result<Option<(Expr, Expr)>, SketchError> {
        let e = self.point(h)?;
        Ok(match e.kind {
            EntityKind::PointIn2d => Some((e.params[0].expr(), e.params[1].expr())),
            _ => None,
        })
    }

    /// The u and v axes of a csys, from its unit quaternion (w, x, y, z).
    pub fn csys_basis_exprs(&self, h: HEntity) -> Result<(ExprVector, ExprVector), SketchError> {
        let e = self.csys(h)?;
        let a = e.params[0].expr();
        let b = e.params[1].expr();
        let c = e.params[2].expr();
        let d = e.params[3].expr();
        let two = || Expr::Constant(2.0);

        let u = ExprVector::new(
            a.clone().square() + b.clone().square() - c.clone().square() - d.clone().square(),
            two() * (a.clone() * d.clone() + b.clone() * c.clone()),
            two() * (b.clone() * d.clone() - a.clone() * c.clone()),
        );
        let v = ExprVector::new(
            two() * (b.clone() * c.clone() - a.clone() * d.clone()),
            a.clone().square() - b.clone().square() + c.clone().square() - d.clone().square(),
            two() * (a * b + c * d),
        );
        Ok((u, v))
    }

    pub fn csys_basis_vectors(&self, h: HEntity) -> Result<(Vector3<f64>, Vector3<f64>), SketchError> {
        let (u, v) = self.csys_basis_exprs(h)?;
        Ok((u.eval(self)?, v.eval(self)?))
    }

    pub fn csys_origin_exprs(&self, h: HEntity) -> Result<ExprVector, SketchError> {
        let e = self.csys(h)?;
        self.point_get_exprs(e.assoc[0])
    }

    /// Plane of a csys as (normal, distance), satisfied by points p with `p . n = d`.
    pub fn plane_get_exprs(&self, h: HEntity) -> Result<(ExprVector, Expr), SketchError> {
        let (u, v) = self.csys_basis_exprs(h)?;
        let n = u.cross(&v);
        let d = n.dot(&self.csys_origin_exprs(h)?);
        Ok((n, d))
    }

    /// The two endpoints of a line segment.
    pub fn line_endpoints(&self, h: HEntity) -> Result<(HEntity, HEntity), SketchError> {
        let e = self.line(h)?;
        Ok((e.assoc[0], e.assoc[1]))
    }

    /// Copy of an entity whose slots are literal values at the current solution.
    pub fn solved_entity(&self, h: HEntity) -> Result<Entity, SketchError> {
        let mut e = self.entity(h)?.clone();
        for slot in e.params.iter_mut() {
            *slot = ParamSlot::Value(self.slot_value(*slot)?);
        }
        Ok(e)
    }

    /// Moves a point to a world-space location by rewriting its params.
    /// 2D points are projected into their plane.
    pub fn point_force_to(&mut self, h: HEntity, target: Vector3<f64>) -> Result<(), SketchError> {
        let e = self.point(h)?.clone();
        let values: Vec<f64> = match e.kind {
            EntityKind::PointIn3d => vec![target.x, target.y, target.z],
            EntityKind::PointIn2d => {
                let csys = e.csys.ok_or(SketchError::MissingCsys { entity: h })?;
                let (u, v) = self.csys_basis_vectors(csys)?;
                let origin = self.csys_origin_exprs(csys)?.eval(self)?;
                let rel = target - origin;
                vec![rel.dot(&u), rel.dot(&v)]
            }
            EntityKind::PointTranslated { times } => {
                // Only the translation moves; the source point stays put.
                let source = self.point_get_coords(e.assoc[0])?;
                if times == 0 {
                    return Ok(());
                }
                let step = (target - source) / f64::from(times);
                vec![step.x, step.y, step.z]
            }
            _ => unreachable!("point() only accepts point kinds"),
        };
        for (slot, value) in e.params.iter().zip(values) {
            if let ParamSlot::Param(ph) = slot {
                if let Some(p) = self.params.get_mut(*ph) {
                    if !p.known {
                        p.val = value;
                    }
                }
            }
        }
        Ok(())
    }
}
