//! Typed canvas commands, as produced by an AI interpreter or a script.
//!
//! Commands are JSON objects tagged by `op`:
//!
//! ```json
//! [
//!   {"op": "createShape", "shapeType": "rect",
//!    "start": {"x": 10, "y": 10}, "end": {"x": 200, "y": 120}},
//!   {"op": "updateShape", "id": "s1", "changes": {"x": 40, "rotation": 15}},
//!   {"op": "bringToFront", "id": "s1"}
//! ]
//! ```

use gridcanvas_geometry::{Point, ResizeHandle, ShapeType};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::canvas::Canvas;
use crate::error::Result;
use crate::shape::{Shape, ShapeId, ShapeUpdate};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum CanvasCommand {
    AddShape {
        shape: Shape,
    },
    #[serde(rename_all = "camelCase")]
    CreateShape {
        shape_type: ShapeType,
        start: Point,
        end: Point,
    },
    UpdateShape {
        id: ShapeId,
        changes: ShapeUpdate,
    },
    RemoveShape {
        id: ShapeId,
    },
    BatchUpdate {
        updates: Vec<BatchEntry>,
    },
    MoveShape {
        id: ShapeId,
        dx: f64,
        dy: f64,
    },
    ResizeShape {
        id: ShapeId,
        handle: ResizeHandle,
        dx: f64,
        dy: f64,
    },
    RotateShape {
        id: ShapeId,
        rotation: f64,
    },
    LockShape {
        id: ShapeId,
    },
    UnlockShape {
        id: ShapeId,
    },
    BringToFront {
        id: ShapeId,
    },
    SendToBack {
        id: ShapeId,
    },
    BringForward {
        id: ShapeId,
    },
    SendBackward {
        id: ShapeId,
    },
}

/// One entry of a `batchUpdate` command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchEntry {
    pub id: ShapeId,
    pub changes: ShapeUpdate,
}

/// Outcome of a command list
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandReport {
    pub applied: usize,
    /// Commands dropped because of a lock conflict or a missing shape
    pub skipped: usize,
}

/// Decode a JSON array of commands
pub fn parse_commands(json: &str) -> Result<Vec<CanvasCommand>> {
    Ok(serde_json::from_str(json)?)
}

impl Canvas {
    pub fn apply_command(&mut self, command: CanvasCommand) -> Result<()> {
        match command {
            CanvasCommand::AddShape { shape } => self.add_shape(shape)?,
            CanvasCommand::CreateShape { shape_type, start, end } => {
                self.create_shape(shape_type, start, end)?;
            }
            CanvasCommand::UpdateShape { id, changes } => {
                self.update_shape(&id, changes)?;
            }
            CanvasCommand::RemoveShape { id } => {
                self.remove_shape(&id)?;
            }
            CanvasCommand::BatchUpdate { updates } => {
                self.batch_update(updates.into_iter().map(|e| (e.id, e.changes)).collect())?;
            }
            CanvasCommand::MoveShape { id, dx, dy } => {
                self.move_shape(&id, dx, dy)?;
            }
            CanvasCommand::ResizeShape { id, handle, dx, dy } => {
                self.resize_shape(&id, handle, dx, dy)?;
            }
            CanvasCommand::RotateShape { id, rotation } => {
                self.rotate_shape(&id, rotation)?;
            }
            CanvasCommand::LockShape { id } => {
                self.lock_shape(&id);
            }
            CanvasCommand::UnlockShape { id } => {
                self.unlock_shape(&id);
            }
            CanvasCommand::BringToFront { id } => {
                self.bring_to_front(&id)?;
            }
            CanvasCommand::SendToBack { id } => {
                self.send_to_back(&id)?;
            }
            CanvasCommand::BringForward { id } => {
                self.bring_forward(&id)?;
            }
            CanvasCommand::SendBackward { id } => {
                self.send_backward(&id)?;
            }
        }
        Ok(())
    }

    /// Apply commands in order. Lock conflicts and missing shapes are
    /// skipped; any other error stops the run.
    pub fn apply_commands(&mut self, commands: Vec<CanvasCommand>) -> Result<CommandReport> {
        let mut report = CommandReport::default();
        for command in commands {
            match self.apply_command(command) {
                Ok(()) => report.applied += 1,
                Err(e) if e.is_recoverable() => {
                    debug!(error = %e, "command skipped");
                    report.skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(report)
    }
}
