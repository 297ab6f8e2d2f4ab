//! Typed payloads carried inside match packets.

use serde::{Deserialize, Serialize};

/// A three-component vector, used for positions and rotations.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    /// X component.
    pub x: f64,
    /// Y component.
    pub y: f64,
    /// Z component.
    pub z: f64,
}

impl Vec3 {
    /// Create a vector from its components.
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Outbound per-participant state, sent over the match channel.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StateUpdate {
    /// World position.
    pub position: Vec3,
    /// Orientation.
    pub rotation: Vec3,
    /// Animation tags active this update.
    #[serde(default)]
    pub animations: Vec<String>,
}

impl StateUpdate {
    /// Create an update with no animations.
    pub fn new(position: Vec3, rotation: Vec3) -> Self {
        Self {
            position,
            rotation,
            animations: Vec::new(),
        }
    }

    /// Append an animation tag.
    pub fn add_animation(&mut self, animation: impl Into<String>) {
        self.animations.push(animation.into());
    }
}

/// Inbound per-participant state record from a state-update fan-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantState {
    /// World position.
    pub position: Vec3,
    /// Orientation.
    pub rotation: Vec3,
    /// Animation tags active for this participant.
    #[serde(default)]
    pub animations: Vec<String>,
    /// The participant this record belongs to.
    #[serde(rename = "clientId")]
    pub client_id: String,
}
