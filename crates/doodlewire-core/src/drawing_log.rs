//! The authoritative, append-only record of everything drawn on the canvas.

use serde::{Deserialize, Serialize};

use crate::identity::{Identity, UserColor, UserId};
use crate::protocol::DrawCommand;

/// One straight-line piece of a freehand stroke, attributed to its author.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrokeSegment {
    pub from_x: f64,
    pub from_y: f64,
    pub to_x: f64,
    pub to_y: f64,
    /// Rendering color requested by the client.
    pub color: String,
    /// Stroke width in canvas units.
    pub size: f64,
    pub user_id: UserId,
    pub user_color: UserColor,
    /// Server receipt time in milliseconds since the Unix epoch.
    pub timestamp: u64,
}

impl StrokeSegment {
    /// Attribute a client draw command to `author`.
    pub fn stamp(command: DrawCommand, author: &Identity, timestamp: u64) -> Self {
        Self {
            from_x: command.from_x,
            from_y: command.from_y,
            to_x: command.to_x,
            to_y: command.to_y,
            color: command.color,
            size: command.size,
            user_id: author.id.clone(),
            user_color: author.color.clone(),
            timestamp,
        }
    }
}

/// Ordered sequence of stroke segments. Replaying it from the start
/// reproduces the current canvas.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DrawingLog {
    segments: Vec<StrokeSegment>,
}

impl DrawingLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a segment and return it as stored.
    ///
    /// Timestamps never go backwards: a segment stamped earlier than the
    /// current tail takes the tail's timestamp.
    pub fn append(&mut self, mut segment: StrokeSegment) -> &StrokeSegment {
        if let Some(last) = self.segments.last() {
            segment.timestamp = segment.timestamp.max(last.timestamp);
        }
        self.segments.push(segment);
        &self.segments[self.segments.len() - 1]
    }

    /// Copy of the whole log in append order.
    pub fn snapshot(&self) -> Vec<StrokeSegment> {
        self.segments.clone()
    }

    /// Drop every segment.
    pub fn clear(&mut self) {
        self.segments.clear();
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}
