use crate::expr::Expr;
use crate::handle::{HEntity, HGroup, HRequest};
use crate::sketch::{ConstraintKind, RequestKind, Sketch};
use nalgebra::Vector3;

/// A line from `a` to `b` with every endpoint param pinned.
fn fixed_line(sketch: &mut Sketch, g: HGroup, csys: Option<HEntity>, a: Vector3<f64>, b: Vector3<f64>) -> HRequest {
    let r = sketch.add_request(g, RequestKind::LineSegment, csys, false).unwrap();
    sketch.point_force_to(r.entity(1).unwrap(), a).unwrap();
    sketch.point_force_to(r.entity(2).unwrap(), b).unwrap();
    for e in [r.entity(1).unwrap(), r.entity(2).unwrap()] {
        for slot in sketch.entity(e).unwrap().params.clone() {
            if let crate::sketch::ParamSlot::Param(h) = slot {
                sketch.pin_param(h, true).unwrap();
            }
        }
    }
    r
}

fn distance_to_x_axis(p: Vector3<f64>) -> f64 {
    (p.y * p.y + p.z * p.z).sqrt()
}

#[test]
fn test_point_line_distance_in_plane() {
    let mut sketch = Sketch::new();
    let g = sketch.add_group("sketch").unwrap();
    let xy = Some(HEntity::REFERENCE_XY_CSYS);
    let line = fixed_line(&mut sketch, g, xy, Vector3::zeros(), Vector3::new(10.0, 0.0, 0.0));
    let pr = sketch.add_request(g, RequestKind::DatumPoint, xy, false).unwrap();
    let pt = pr.entity(0).unwrap();
    sketch.point_force_to(pt, Vector3::new(3.0, 4.0, 0.0)).unwrap();

    sketch
        .add_constraint(
            g,
            ConstraintKind::PtLineDistance {
                pt,
                line: line.entity(0).unwrap(),
                distance: Expr::Constant(2.0),
            },
        )
        .unwrap();
    let result = sketch.solve_group(g).unwrap();
    assert_eq!(result.unknown_count, 2);
    assert_eq!(result.dof, 1);

    // Only the perpendicular coordinate moves.
    let p = sketch.point_coords(pt).unwrap();
    assert!((p - Vector3::new(3.0, 2.0, 0.0)).norm() < 1e-9);
}

#[test]
fn test_point_line_distance_is_signed_in_plane() {
    let mut sketch = Sketch::new();
    let g = sketch.add_group("sketch").unwrap();
    let xy = Some(HEntity::REFERENCE_XY_CSYS);
    let line = fixed_line(&mut sketch, g, xy, Vector3::zeros(), Vector3::new(10.0, 0.0, 0.0));
    let pr = sketch.add_request(g, RequestKind::DatumPoint, xy, false).unwrap();
    let pt = pr.entity(0).unwrap();
    sketch.point_force_to(pt, Vector3::new(3.0, 4.0, 0.0)).unwrap();

    sketch
        .add_constraint(
            g,
            ConstraintKind::PtLineDistance {
                pt,
                line: line.entity(0).unwrap(),
                distance: Expr::Constant(-1.0),
            },
        )
        .unwrap();
    sketch.solve_group(g).unwrap();
    assert!((sketch.point_coords(pt).unwrap().y + 1.0).abs() < 1e-9);
}

#[test]
fn test_point_line_distance_in_space() {
    let mut sketch = Sketch::new();
    let g = sketch.add_group("space").unwrap();
    let line = fixed_line(&mut sketch, g, None, Vector3::zeros(), Vector3::new(10.0, 0.0, 0.0));
    let pr = sketch.add_request(g, RequestKind::DatumPoint, None, false).unwrap();
    let pt = pr.entity(0).unwrap();
    sketch.point_force_to(pt, Vector3::new(4.0, 3.0, 4.0)).unwrap();

    sketch
        .add_constraint(
            g,
            ConstraintKind::PtLineDistance {
                pt,
                line: line.entity(0).unwrap(),
                distance: Expr::Constant(2.0),
            },
        )
        .unwrap();
    sketch.solve_group(g).unwrap();

    let p = sketch.point_coords(pt).unwrap();
    assert!((distance_to_x_axis(p) - 2.0).abs() < 1e-9);
    assert!((p.x - 4.0).abs() < 1e-9);
}

#[test]
fn test_point_line_distance_takes_measured_value() {
    let mut sketch = Sketch::new();
    let g = sketch.add_group("sketch").unwrap();
    let xy = Some(HEntity::REFERENCE_XY_CSYS);
    let line = fixed_line(&mut sketch, g, xy, Vector3::zeros(), Vector3::new(10.0, 0.0, 0.0));
    let pr = sketch.add_request(g, RequestKind::DatumPoint, xy, false).unwrap();
    let pt = pr.entity(0).unwrap();
    sketch.point_force_to(pt, Vector3::new(3.0, 4.0, 0.0)).unwrap();

    let c = sketch
        .add_constraint_satisfied(
            g,
            ConstraintKind::PtLineDistance {
                pt,
                line: line.entity(0).unwrap(),
                distance: Expr::Constant(0.0),
            },
        )
        .unwrap();
    let d = sketch.constraint(c).unwrap().kind.dimension().unwrap().as_constant().unwrap();
    assert!((d - 4.0).abs() < 1e-12);

    let result = sketch.solve_group(g).unwrap();
    assert_eq!(result.iterations, 0);
    assert!((sketch.point_coords(pt).unwrap() - Vector3::new(3.0, 4.0, 0.0)).norm() < 1e-12);

    // Editing the dimension drives the geometry.
    sketch.set_constraint_value(c, 1.5).unwrap();
    sketch.solve_group(g).unwrap();
    assert!((sketch.point_coords(pt).unwrap().y - 1.5).abs() < 1e-9);
}

#[test]
fn test_point_in_plane() {
    let mut sketch = Sketch::new();
    let g = sketch.add_group("space").unwrap();
    let r = sketch.add_request(g, RequestKind::DatumPoint, None, false).unwrap();
    let pt = r.entity(0).unwrap();
    sketch.point_force_to(pt, Vector3::new(1.0, 2.0, 3.0)).unwrap();

    sketch
        .add_constraint(
            g,
            ConstraintKind::PtInPlane {
                pt,
                plane: HEntity::REFERENCE_XY_CSYS,
            },
        )
        .unwrap();
    sketch
        .add_constraint(
            g,
            ConstraintKind::PtInPlane {
                pt,
                plane: HEntity::REFERENCE_YZ_CSYS,
            },
        )
        .unwrap();
    let result = sketch.solve_group(g).unwrap();
    assert_eq!(result.dof, 1);

    let p = sketch.point_coords(pt).unwrap();
    assert!((p - Vector3::new(0.0, 2.0, 0.0)).norm() < 1e-9);
}

#[test]
fn test_plane_must_be_a_csys() {
    let mut sketch = Sketch::new();
    let g = sketch.add_group("space").unwrap();
    let r = sketch.add_request(g, RequestKind::DatumPoint, None, false).unwrap();
    let pt = r.entity(0).unwrap();

    let err = sketch
        .add_constraint(g, ConstraintKind::PtInPlane { pt, plane: pt })
        .unwrap_err();
    assert!(matches!(err, crate::sketch::SketchError::WrongEntityKind { .. }));
}
