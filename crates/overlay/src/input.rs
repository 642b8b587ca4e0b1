//! Raw pointer events delivered by the host shell

use pdf_markup_core::ScreenPoint;
use serde::{Deserialize, Serialize};

/// Identity of one physical input point (finger, pen tip, mouse button)
pub type PointId = u64;

/// Device class of a pointer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointerKind {
    Touch,
    Stylus,
    Mouse,
}

impl std::str::FromStr for PointerKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "touch" | "finger" => Ok(PointerKind::Touch),
            "stylus" | "pen" | "pencil" => Ok(PointerKind::Stylus),
            "mouse" => Ok(PointerKind::Mouse),
            other => Err(format!("unknown pointer kind '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputPhase {
    Began,
    Moved,
    Ended,
    /// The system interrupted the sequence
    Cancelled,
}

/// One pointer event, in screen space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputEvent {
    pub point_id: PointId,
    pub kind: PointerKind,
    pub phase: InputPhase,
    pub screen_pos: ScreenPoint,
    /// Normalized 0..=1; zero when the device reports no pressure
    pub pressure: f32,
    pub timestamp: u64,
}

impl InputEvent {
    pub fn new(point_id: PointId, kind: PointerKind, phase: InputPhase, screen_pos: ScreenPoint) -> Self {
        Self { point_id, kind, phase, screen_pos, pressure: 0.0, timestamp: 0 }
    }

    pub fn with_pressure(mut self, pressure: f32) -> Self {
        self.pressure = pressure;
        self
    }

    pub fn at(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }
}
