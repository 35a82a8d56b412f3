use crate::handle::{HEntity, HGroup, HRequest};
use crate::sketch::{
    AxisTarget, Command, ConstraintKind, Created, RequestKind, Sketch, SketchError, SolveStatus,
};
use nalgebra::Vector3;
use serde_json::json;

fn group_of(report: &crate::sketch::EditReport) -> HGroup {
    match report.created {
        Some(Created::Group(h)) => h,
        other => panic!("expected a group, got {:?}", other),
    }
}

fn request_of(report: &crate::sketch::EditReport) -> HRequest {
    match report.created {
        Some(Created::Request(h)) => h,
        other => panic!("expected a request, got {:?}", other),
    }
}

#[test]
fn test_commands_drive_a_sketch() {
    let mut sketch = Sketch::new();
    let report = sketch
        .apply(Command::AddGroup {
            name: "sketch".to_string(),
        })
        .unwrap();
    let g = group_of(&report);
    assert_eq!(report.solves.len(), 1);

    let report = sketch
        .apply(Command::AddRequest {
            group: g,
            kind: RequestKind::LineSegment,
            csys: Some(HEntity::REFERENCE_XY_CSYS),
            construction: false,
            points: vec![[0.0, 0.0, 0.0], [10.0, 5.0, 0.0]],
        })
        .unwrap();
    let l = request_of(&report);
    assert!(sketch.group(g).unwrap().solved);

    let report = sketch
        .apply(Command::AddConstraint {
            group: g,
            kind: ConstraintKind::Horizontal {
                target: AxisTarget::Line(l.entity(0).unwrap()),
            },
            modify_to_satisfy: false,
        })
        .unwrap();
    assert!(matches!(report.created, Some(Created::Constraint(_))));
    assert_eq!(report.solves.len(), 1);
    let result = report.solves[0].result.as_ref().unwrap();
    assert_eq!(result.status, SolveStatus::UnderConstrained);

    let a = sketch.point_coords(l.entity(1).unwrap()).unwrap();
    let b = sketch.point_coords(l.entity(2).unwrap()).unwrap();
    assert!((a.y - 2.5).abs() < 1e-9 && (b.y - 2.5).abs() < 1e-9);

    // Dragging a point re-solves the group around the new position.
    let report = sketch
        .apply(Command::MovePoint {
            point: l.entity(2).unwrap(),
            to: [10.0, 7.5, 0.0],
        })
        .unwrap();
    assert!(report.solves[0].result.is_ok());
    let a = sketch.point_coords(l.entity(1).unwrap()).unwrap();
    let b = sketch.point_coords(l.entity(2).unwrap()).unwrap();
    assert!((a.y - b.y).abs() < 1e-9);
    assert!((a.y - 5.0).abs() < 1e-9);
}

#[test]
fn test_failed_command_reports_error() {
    let mut sketch = Sketch::new();
    let err = sketch
        .apply(Command::DeleteGroup {
            group: HGroup::REFERENCES,
        })
        .unwrap_err();
    assert!(matches!(err, SketchError::ReferencesAreReadOnly));

    let err = sketch
        .apply(Command::SetParam {
            param: HRequest(40).param(16).unwrap(),
            value: 1.0,
        })
        .unwrap_err();
    assert!(matches!(err, SketchError::UnknownRequest(_)));
}

#[test]
fn test_command_from_json() {
    let g = HGroup(2);
    let text = json!({
        "command": "add_request",
        "group": serde_json::to_value(g).unwrap(),
        "kind": { "type": "line_segment" },
        "csys": serde_json::to_value(HEntity::REFERENCE_XY_CSYS).unwrap(),
        "points": [[0.0, 0.0, 0.0], [1.0, 2.0, 0.0]],
    });
    let command: Command = serde_json::from_value(text).unwrap();
    assert_eq!(
        command,
        Command::AddRequest {
            group: g,
            kind: RequestKind::LineSegment,
            csys: Some(HEntity::REFERENCE_XY_CSYS),
            construction: false,
            points: vec![[0.0, 0.0, 0.0], [1.0, 2.0, 0.0]],
        }
    );

    let solve: Command = serde_json::from_value(json!({ "command": "solve" })).unwrap();
    assert_eq!(solve, Command::Solve);

    // Partial solver settings fall back to the defaults.
    let config: Command = serde_json::from_value(json!({
        "command": "set_solver_config",
        "config": { "max_iterations": 5 },
    }))
    .unwrap();
    match config {
        Command::SetSolverConfig { config } => {
            assert_eq!(config.max_iterations, 5);
            assert_eq!(config.conflict_search_limit, 16);
        }
        other => panic!("unexpected command {:?}", other),
    }
}

#[test]
fn test_save_and_load() {
    let mut sketch = Sketch::new();
    let g = sketch.add_group("sketch").unwrap();
    let l = sketch
        .add_request(g, RequestKind::LineSegment, Some(HEntity::REFERENCE_XY_CSYS), false)
        .unwrap();
    sketch.point_force_to(l.entity(1).unwrap(), Vector3::new(1.0, 1.0, 0.0)).unwrap();
    sketch.point_force_to(l.entity(2).unwrap(), Vector3::new(6.0, 3.0, 0.0)).unwrap();
    let rep = sketch
        .add_request(g, RequestKind::LinearRepeat { source: l, copies: 2 }, None, false)
        .unwrap();
    sketch
        .add_constraint(
            g,
            ConstraintKind::Horizontal {
                target: AxisTarget::Line(l.entity(0).unwrap()),
            },
        )
        .unwrap();
    sketch.add_user_equation(g, "@line004.16 - 1").unwrap();
    sketch.solve_all();

    let json = sketch.to_json().unwrap();
    let (loaded, solves) = Sketch::from_json(&json).unwrap();
    assert_eq!(solves.len(), 2);
    assert!(solves.iter().all(|s| s.result.is_ok()));
    assert!(loaded.groups().iter().all(|g| g.solved));

    assert_eq!(loaded.requests().len(), sketch.requests().len());
    assert_eq!(loaded.constraints().len(), 2);
    assert_eq!(loaded.equations().len(), sketch.equations().len());
    assert_eq!(
        loaded.request(rep).unwrap().remap,
        sketch.request(rep).unwrap().remap
    );
    for e in sketch.request_points(l) {
        let before = sketch.point_coords(e).unwrap();
        let after = loaded.point_coords(e).unwrap();
        assert!((before - after).norm() < 1e-9);
    }

    // Handles keep counting from where the saved sketch left off.
    let mut loaded = loaded;
    let next = loaded.add_group("more").unwrap();
    assert_eq!(next, HGroup(3));
}

#[test]
fn test_load_rejects_garbage() {
    assert!(matches!(
        Sketch::from_json("{ \"groups\": 3 }"),
        Err(SketchError::Persistence(_))
    ));
}

#[test]
fn test_add_request_checks_point_count() {
    let mut sketch = Sketch::new();
    let g = sketch.add_group("sketch").unwrap();
    let before = sketch.to_json().unwrap();

    let err = sketch
        .apply(Command::AddRequest {
            group: g,
            kind: RequestKind::LineSegment,
            csys: Some(HEntity::REFERENCE_XY_CSYS),
            construction: false,
            points: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [2.0, 0.0, 0.0]],
        })
        .unwrap_err();
    assert!(matches!(
        err,
        SketchError::PointCountMismatch {
            expected: 2,
            given: 3,
            ..
        }
    ));
    assert_eq!(sketch.to_json().unwrap(), before);

    // No positions keeps the generated defaults.
    let report = sketch
        .apply(Command::AddRequest {
            group: g,
            kind: RequestKind::DatumPoint,
            csys: Some(HEntity::REFERENCE_XY_CSYS),
            construction: false,
            points: Vec::new(),
        })
        .unwrap();
    let r = request_of(&report);
    assert_eq!(r, HRequest(4));
    assert_eq!(sketch.point_coords(r.entity(0).unwrap()).unwrap(), Vector3::zeros());
}
