//! Text protocol spoken over the WebSocket.
//!
//! Client messages are `COMMAND:{json}`, `GET_SKETCH`, `SAVE` and
//! `LOAD:{file}`. Replies carry a `KIND:` prefix followed by JSON.

use serde::Serialize;
use serde_json::json;
use sketch_core::handle::HGroup;
use sketch_core::sketch::{Command, Constraint, Entity, GroupSolve, Sketch};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{info, warn};
use uuid::Uuid;

/// Format a kernel error as a JSON message for the frontend
pub fn format_error(code: &str, message: &str, severity: &str) -> String {
    format!(
        "ERROR_UPDATE:{}",
        json!({
            "code": code,
            "message": message,
            "severity": severity
        })
    )
}

#[derive(Debug, Serialize)]
struct GroupView {
    h: HGroup,
    name: String,
    solve_order: u32,
    solved: bool,
}

/// Everything a frontend needs to draw the sketch.
#[derive(Debug, Serialize)]
struct SketchView {
    groups: Vec<GroupView>,
    /// Real geometry with every slot replaced by its solved value
    entities: Vec<Entity>,
    constraints: Vec<Constraint>,
}

fn read(sketch: &RwLock<Sketch>) -> RwLockReadGuard<'_, Sketch> {
    sketch.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write(sketch: &RwLock<Sketch>) -> RwLockWriteGuard<'_, Sketch> {
    sketch.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn sketch_update(sketch: &Sketch) -> String {
    let view = SketchView {
        groups: sketch
            .groups_in_order()
            .into_iter()
            .filter_map(|h| sketch.group(h).ok())
            .map(|g| GroupView {
                h: g.h,
                name: g.name.clone(),
                solve_order: g.solve_order,
                solved: g.solved,
            })
            .collect(),
        entities: sketch
            .real_geometry()
            .filter_map(|e| sketch.solved_entity(e.h).ok())
            .collect(),
        constraints: sketch.constraints().iter().cloned().collect(),
    };
    match serde_json::to_string(&view) {
        Ok(json) => format!("SKETCH_UPDATE:{}", json),
        Err(e) => format_error("SERIALIZE_FAILED", &e.to_string(), "error"),
    }
}

/// One warning per group that failed to solve.
fn solve_warnings(solves: &[GroupSolve]) -> impl Iterator<Item = String> + '_ {
    solves.iter().filter_map(|s| match &s.result {
        Ok(_) => None,
        Err(e) => Some(format_error("SOLVE_FAILED", &e.to_string(), "warning")),
    })
}

/// A connected client and the sketch it edits.
pub struct Session {
    pub id: Uuid,
}

impl Session {
    pub fn new() -> Self {
        Self { id: Uuid::new_v4() }
    }

    /// Sent once on connect.
    pub fn greeting(&self, sketch: &RwLock<Sketch>) -> String {
        sketch_update(&read(sketch))
    }

    /// Handles one text message and returns the replies in send order.
    pub fn handle(&self, sketch: &RwLock<Sketch>, text: &str) -> Vec<String> {
        if let Some(json_str) = text.strip_prefix("COMMAND:") {
            let command: Command = match serde_json::from_str(json_str) {
                Ok(c) => c,
                Err(e) => {
                    warn!(session = %self.id, "bad command: {}", e);
                    return vec![format_error("BAD_COMMAND", &e.to_string(), "error")];
                }
            };
            let mut sketch = write(sketch);
            match sketch.apply(command) {
                Ok(report) => {
                    let mut out: Vec<String> = solve_warnings(&report.solves).collect();
                    match serde_json::to_string(&report) {
                        Ok(json) => out.insert(0, format!("EDIT_REPORT:{}", json)),
                        Err(e) => out.push(format_error("SERIALIZE_FAILED", &e.to_string(), "error")),
                    }
                    out.push(sketch_update(&sketch));
                    out
                }
                Err(e) => {
                    warn!(session = %self.id, "edit rejected: {}", e);
                    vec![format_error("EDIT_REJECTED", &e.to_string(), "error")]
                }
            }
        } else if text == "GET_SKETCH" {
            vec![sketch_update(&read(sketch))]
        } else if text == "SAVE" {
            match read(sketch).to_json() {
                Ok(json) => vec![format!("FILE:{}", json)],
                Err(e) => vec![format_error("SAVE_FAILED", &e.to_string(), "error")],
            }
        } else if let Some(file) = text.strip_prefix("LOAD:") {
            match Sketch::from_json(file) {
                Ok((loaded, solves)) => {
                    info!(session = %self.id, groups = loaded.groups().len(), "loaded sketch");
                    let mut out: Vec<String> = solve_warnings(&solves).collect();
                    let mut sketch = write(sketch);
                    *sketch = loaded;
                    out.push(sketch_update(&sketch));
                    out
                }
                Err(e) => vec![format_error("LOAD_FAILED", &e.to_string(), "error")],
            }
        } else {
            warn!(session = %self.id, "unknown message: {}", text);
            vec![format_error("UNKNOWN_MESSAGE", text, "warning")]
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
