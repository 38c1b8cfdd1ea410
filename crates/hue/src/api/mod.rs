mod entertainment;
mod stream_key;

pub use entertainment::{
    EntertainmentStreamState, GradientOrientation, GradientOrientationAxis,
    GradientOrientationCable, GradientOrientationPose, Position, gradient_positions,
};
pub use stream_key::HueStreamKey;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reference to a resource on a v2 (CLIP) api
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLink {
    pub rid: Uuid,
    pub rtype: RType,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RType {
    Light,
    Entertainment,
    EntertainmentConfiguration,
}

impl ResourceLink {
    #[must_use]
    pub const fn light(rid: Uuid) -> Self {
        Self {
            rid,
            rtype: RType::Light,
        }
    }
}
