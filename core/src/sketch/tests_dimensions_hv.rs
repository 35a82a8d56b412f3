use crate::handle::{HEntity, HGroup, HRequest};
use crate::sketch::{AxisTarget, ConstraintKind, RequestKind, Sketch, SketchError};
use nalgebra::Vector3;

fn line(sketch: &mut Sketch, g: HGroup, csys: Option<HEntity>, a: [f64; 3], b: [f64; 3]) -> HRequest {
    let r = sketch.add_request(g, RequestKind::LineSegment, csys, false).unwrap();
    sketch.point_force_to(r.entity(1).unwrap(), Vector3::from(a)).unwrap();
    sketch.point_force_to(r.entity(2).unwrap(), Vector3::from(b)).unwrap();
    r
}

fn ends(sketch: &Sketch, r: HRequest) -> (Vector3<f64>, Vector3<f64>) {
    (
        sketch.point_coords(r.entity(1).unwrap()).unwrap(),
        sketch.point_coords(r.entity(2).unwrap()).unwrap(),
    )
}

fn pin_all(sketch: &mut Sketch, r: HRequest) {
    for i in [16, 17, 19, 20] {
        sketch.pin_param(r.param(i).unwrap(), true).unwrap();
    }
}

const XY: Option<HEntity> = Some(HEntity::REFERENCE_XY_CSYS);

#[test]
fn test_vertical_line() {
    let mut sketch = Sketch::new();
    let g = sketch.add_group("sketch").unwrap();
    let l = line(&mut sketch, g, XY, [0.0, 0.0, 0.0], [4.0, 10.0, 0.0]);
    sketch
        .add_constraint(
            g,
            ConstraintKind::Vertical {
                target: AxisTarget::Line(l.entity(0).unwrap()),
            },
        )
        .unwrap();
    sketch.solve_group(g).unwrap();

    let (a, b) = ends(&sketch, l);
    assert!((a.x - 2.0).abs() < 1e-9 && (b.x - 2.0).abs() < 1e-9);
    assert!((b.y - 10.0).abs() < 1e-9);
}

#[test]
fn test_horizontal_between_points_of_different_lines() {
    let mut sketch = Sketch::new();
    let g = sketch.add_group("sketch").unwrap();
    let l1 = line(&mut sketch, g, XY, [0.0, 0.0, 0.0], [5.0, 1.0, 0.0]);
    let l2 = line(&mut sketch, g, XY, [8.0, 4.0, 0.0], [9.0, 9.0, 0.0]);
    sketch
        .add_constraint(
            g,
            ConstraintKind::Horizontal {
                target: AxisTarget::Points(l1.entity(2).unwrap(), l2.entity(1).unwrap()),
            },
        )
        .unwrap();
    sketch.solve_group(g).unwrap();

    let (_, a) = ends(&sketch, l1);
    let (b, _) = ends(&sketch, l2);
    assert!((a.y - b.y).abs() < 1e-9);
    assert!((a.y - 2.5).abs() < 1e-9);
}

#[test]
fn test_horizontal_needs_a_workplane() {
    let mut sketch = Sketch::new();
    let g = sketch.add_group("space").unwrap();
    let l = line(&mut sketch, g, None, [0.0, 0.0, 0.0], [1.0, 1.0, 1.0]);

    let err = sketch
        .add_constraint(
            g,
            ConstraintKind::Horizontal {
                target: AxisTarget::Line(l.entity(0).unwrap()),
            },
        )
        .unwrap_err();
    assert!(matches!(err, SketchError::MissingCsys { .. }));
    assert!(sketch.constraints().is_empty());
    assert!(sketch.equations().is_empty());
}

#[test]
fn test_horizontal_between_free_point_and_plane_point() {
    let mut sketch = Sketch::new();
    let g = sketch.add_group("mixed").unwrap();
    let free = sketch.add_request(g, RequestKind::DatumPoint, None, false).unwrap();
    let on_plane = sketch.add_request(g, RequestKind::DatumPoint, XY, false).unwrap();
    let p = free.entity(0).unwrap();
    let q = on_plane.entity(0).unwrap();
    sketch.point_force_to(p, Vector3::new(1.0, 6.0, 3.0)).unwrap();
    sketch.point_force_to(q, Vector3::new(4.0, 2.0, 0.0)).unwrap();

    sketch
        .add_constraint(
            g,
            ConstraintKind::Horizontal {
                target: AxisTarget::Points(p, q),
            },
        )
        .unwrap();
    sketch.solve_group(g).unwrap();

    let (pp, qq) = (sketch.point_coords(p).unwrap(), sketch.point_coords(q).unwrap());
    assert!((pp.y - qq.y).abs() < 1e-9);
    assert!((pp.z - 3.0).abs() < 1e-9);
}

#[test]
fn test_parallel_lines() {
    let mut sketch = Sketch::new();
    let g = sketch.add_group("sketch").unwrap();
    let a = line(&mut sketch, g, XY, [0.0, 0.0, 0.0], [10.0, 0.0, 0.0]);
    pin_all(&mut sketch, a);
    let b = line(&mut sketch, g, XY, [0.0, 5.0, 0.0], [10.0, 8.0, 0.0]);
    sketch
        .add_constraint(
            g,
            ConstraintKind::Parallel {
                line_a: a.entity(0).unwrap(),
                line_b: b.entity(0).unwrap(),
            },
        )
        .unwrap();
    sketch.solve_group(g).unwrap();

    let (b0, b1) = ends(&sketch, b);
    assert!((b1.y - b0.y).abs() < 1e-9);
}

#[test]
fn test_perpendicular_lines() {
    let mut sketch = Sketch::new();
    let g = sketch.add_group("sketch").unwrap();
    let a = line(&mut sketch, g, XY, [0.0, 0.0, 0.0], [10.0, 0.0, 0.0]);
    pin_all(&mut sketch, a);
    let b = line(&mut sketch, g, XY, [2.0, 1.0, 0.0], [4.0, 9.0, 0.0]);
    sketch
        .add_constraint(
            g,
            ConstraintKind::Perpendicular {
                line_a: a.entity(0).unwrap(),
                line_b: b.entity(0).unwrap(),
            },
        )
        .unwrap();
    sketch.solve_group(g).unwrap();

    let (b0, b1) = ends(&sketch, b);
    assert!((b1 - b0).dot(&Vector3::x()).abs() < 1e-9);
}

#[test]
fn test_perpendicular_across_planes_uses_first_workplane() {
    let mut sketch = Sketch::new();
    let g = sketch.add_group("mixed").unwrap();
    let a = line(&mut sketch, g, XY, [0.0, 0.0, 0.0], [10.0, 0.0, 0.0]);
    pin_all(&mut sketch, a);
    let b = line(&mut sketch, g, None, [2.0, 1.0, 5.0], [4.0, 9.0, 5.0]);
    sketch
        .add_constraint(
            g,
            ConstraintKind::Perpendicular {
                line_a: a.entity(0).unwrap(),
                line_b: b.entity(0).unwrap(),
            },
        )
        .unwrap();
    sketch.solve_group(g).unwrap();

    let (b0, b1) = ends(&sketch, b);
    assert!((b1.x - b0.x).abs() < 1e-9);
}

#[test]
fn test_equal_length_lines() {
    let mut sketch = Sketch::new();
    let g = sketch.add_group("sketch").unwrap();
    let a = line(&mut sketch, g, XY, [0.0, 0.0, 0.0], [10.0, 0.0, 0.0]);
    pin_all(&mut sketch, a);
    let b = line(&mut sketch, g, XY, [0.0, 5.0, 0.0], [3.0, 9.0, 0.0]);
    sketch
        .add_constraint(
            g,
            ConstraintKind::EqualLengthLines {
                line_a: a.entity(0).unwrap(),
                line_b: b.entity(0).unwrap(),
            },
        )
        .unwrap();
    let result = sketch.solve_group(g).unwrap();
    assert_eq!(result.dof, 3);

    let (b0, b1) = ends(&sketch, b);
    assert!(((b1 - b0).norm() - 10.0).abs() < 1e-9);
}

#[test]
fn test_satisfied_horizontal_moves_geometry_first() {
    let mut sketch = Sketch::new();
    let g = sketch.add_group("sketch").unwrap();
    let l = line(&mut sketch, g, XY, [0.0, 0.0, 0.0], [10.0, 5.0, 0.0]);
    sketch
        .add_constraint_satisfied(
            g,
            ConstraintKind::Horizontal {
                target: AxisTarget::Line(l.entity(0).unwrap()),
            },
        )
        .unwrap();

    let (a, b) = ends(&sketch, l);
    assert!((a.y - b.y).abs() < 1e-9);
}
