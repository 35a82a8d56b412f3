use super::error::SketchError;
use super::store::Store;
use super::types::{Entity, EntityKind, Param, ParamSlot, Request, RequestKind};
use crate::handle::{HEntity, HParam, HRequest, IdList};
use tracing::debug;

/// Orientation quaternions (w, x, y, z) of the three reference planes.
pub const REFERENCE_QUATERNIONS: [(HRequest, [f64; 4]); 3] = [
    (HRequest::REFERENCE_XY, [1.0, 0.0, 0.0, 0.0]),
    (HRequest::REFERENCE_YZ, [0.5, 0.5, 0.5, 0.5]),
    (HRequest::REFERENCE_ZX, [0.5, -0.5, -0.5, -0.5]),
];

const IDENTITY_QUATERNION: [f64; 4] = [1.0, 0.0, 0.0, 0.0];

/// First param index of point `i` within a request.
fn point_param_base(i: u32) -> u32 {
    16 + 3 * i
}

impl Request {
    /// Writes the request's entities and params into `out`. Param values are
    /// carried over from `previous` when the param already existed at the same
    /// revision, so re-running generation is a no-op on values.
    pub fn generate(&mut self, out: &mut Store, previous: &IdList<Param>) -> Result<(), SketchError> {
        if let Some(csys) = self.csys {
            if !matches!(out.entities.get(csys), Some(e) if e.kind == EntityKind::Csys2d) {
                return Err(SketchError::MissingRequestCsys {
                    request: self.h,
                    csys,
                });
            }
        }

        match self.kind.clone() {
            RequestKind::Csys2d => {
                let origin = self.add_point(out, previous, 1, 0)?;
                let quaternion = REFERENCE_QUATERNIONS
                    .iter()
                    .find(|(h, _)| *h == self.h)
                    .map(|(_, q)| *q)
                    .unwrap_or(IDENTITY_QUATERNION);
                let mut slots = Vec::with_capacity(4);
                for (i, q) in quaternion.iter().enumerate() {
                    // Orientation stays pinned so the basis stays orthonormal.
                    let h = self.add_param(out, previous, self.h.param(i as u32)?, *q, true)?;
                    slots.push(ParamSlot::Param(h));
                }
                let e = Entity::new(self.h.entity(0)?, EntityKind::Csys2d, slots, vec![origin], self);
                self.add_entity(out, e)?;
            }
            RequestKind::DatumPoint => {
                self.add_point(out, previous, 0, 0)?;
            }
            RequestKind::LineSegment => {
                let a = self.add_point(out, previous, 1, 0)?;
                let b = self.add_point(out, previous, 2, 1)?;
                let e = Entity::new(
                    self.h.entity(0)?,
                    EntityKind::LineSegment,
                    Vec::new(),
                    vec![a, b],
                    self,
                );
                self.add_entity(out, e)?;
            }
            RequestKind::LinearRepeat { source, copies } => {
                self.generate_repeat(out, previous, source, copies)?;
            }
        }
        Ok(())
    }

    fn generate_repeat(
        &mut self,
        out: &mut Store,
        previous: &IdList<Param>,
        source: HRequest,
        copies: u32,
    ) -> Result<(), SketchError> {
        let originals: Vec<Entity> = out
            .entities
            .iter()
            .filter(|e| e.h.request() == source)
            .cloned()
            .collect();
        if source == self.h || source.is_from_references() || originals.is_empty() {
            return Err(SketchError::MissingSource {
                request: self.h,
                copied: source,
            });
        }

        let mut translation = Vec::with_capacity(3);
        for i in 0..3 {
            let h = self.add_param(out, previous, self.h.param(i)?, 0.0, false)?;
            translation.push(ParamSlot::Param(h));
        }

        for copy in 1..=copies {
            for original in &originals {
                let h = self.remap(original.h, copy)?;
                let e = if original.is_point() {
                    Entity::new(
                        h,
                        EntityKind::PointTranslated { times: copy },
                        translation.clone(),
                        vec![original.h],
                        self,
                    )
                } else if original.kind == EntityKind::LineSegment {
                    let a = self.remap(original.assoc[0], copy)?;
                    let b = self.remap(original.assoc[1], copy)?;
                    Entity::new(h, EntityKind::LineSegment, Vec::new(), vec![a, b], self)
                } else {
                    return Err(SketchError::UnsupportedCopy {
                        request: self.h,
                        entity: original.h,
                    });
                };
                self.add_entity(out, e)?;
            }
        }
        Ok(())
    }

    /// Adds point `point` of this request as entity `index`.
    fn add_point(
        &self,
        out: &mut Store,
        previous: &IdList<Param>,
        index: u32,
        point: u32,
    ) -> Result<HEntity, SketchError> {
        let (kind, count) = match self.csys {
            Some(_) => (EntityKind::PointIn2d, 2),
            None => (EntityKind::PointIn3d, 3),
        };
        let reference = self.h.is_from_references();
        let mut slots = Vec::with_capacity(count);
        for k in 0..count as u32 {
            let h = self.h.param(point_param_base(point) + k)?;
            slots.push(ParamSlot::Param(self.add_param(out, previous, h, 0.0, reference)?));
        }
        let h = self.h.entity(index)?;
        self.add_entity(out, Entity::new(h, kind, slots, Vec::new(), self))?;
        Ok(h)
    }

    fn add_param(
        &self,
        out: &mut Store,
        previous: &IdList<Param>,
        h: HParam,
        default: f64,
        known: bool,
    ) -> Result<HParam, SketchError> {
        let carried = previous
            .get(h)
            .filter(|p| p.revision == self.revision && !self.h.is_from_references());
        let param = match carried {
            Some(p) => Param {
                h,
                val: p.val,
                known: p.known || known,
                revision: self.revision,
            },
            None => Param {
                h,
                val: default,
                known,
                revision: self.revision,
            },
        };
        out.params
            .add(param)
            .map_err(|h| SketchError::Duplicate(format!("param {}", h)))?;
        Ok(h)
    }

    fn add_entity(&self, out: &mut Store, e: Entity) -> Result<(), SketchError> {
        debug!(entity = %e.h, kind = e.kind.describe(), request = %self.h, "generated entity");
        out.entities
            .add(e)
            .map_err(|h| SketchError::Duplicate(format!("entity {}", h)))
    }
}
