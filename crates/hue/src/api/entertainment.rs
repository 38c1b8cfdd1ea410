use serde::{Deserialize, Serialize};

/// 3d position inside an entertainment area, every axis in [-1, 1]
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    #[must_use]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Streaming sub-state of an entertainment group
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct EntertainmentStreamState {
    pub active: bool,
    pub owner: Option<String>,
    pub proxymode: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GradientOrientationPose {
    #[default]
    Flat,
    Standing,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GradientOrientationAxis {
    #[default]
    Horizontal,
    Vertical,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GradientOrientationCable {
    #[default]
    Left,
    Right,
}

/// Physical mounting of a gradient strip, used to derive per-segment
/// positions for the seven addressable segments.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
pub struct GradientOrientation {
    #[serde(default)]
    pub pose: GradientOrientationPose,
    #[serde(default)]
    pub axis: GradientOrientationAxis,
    #[serde(default)]
    pub cable: GradientOrientationCable,
}

/// Derive the seven per-segment positions for a gradient strip.
///
/// Base layout is five points along the top edge plus two side anchors;
/// the cable side mirrors left/right, a vertical axis swaps the axes,
/// and a standing pose lifts the strip off the z plane.
#[must_use]
pub fn gradient_positions(orientation: GradientOrientation) -> [Position; 7] {
    const BASE: [(f64, f64); 7] = [
        (-0.8, 0.5),
        (-0.4, 0.5),
        (0.0, 0.5),
        (0.4, 0.5),
        (0.8, 0.5),
        (0.8, 0.0),
        (-0.8, 0.0),
    ];

    BASE.map(|(mut x, mut y)| {
        if orientation.cable == GradientOrientationCable::Right {
            x = -x;
        }
        if orientation.axis == GradientOrientationAxis::Vertical {
            (x, y) = (y, x);
        }
        let z = if orientation.pose == GradientOrientationPose::Standing {
            0.3
        } else {
            0.0
        };
        Position::new(x, y, z)
    })
}

#[cfg(test)]
mod tests {
    use crate::api::entertainment::{
        GradientOrientation, GradientOrientationAxis, GradientOrientationCable,
        GradientOrientationPose, gradient_positions,
    };

    #[test]
    fn default_orientation_is_flat_on_z() {
        let pos = gradient_positions(GradientOrientation::default());

        assert_eq!(pos.len(), 7);
        assert!(pos.iter().all(|p| p.z == 0.0));
        assert_eq!(pos[0].x, -0.8);
        assert_eq!(pos[4].x, 0.8);
    }

    #[test]
    fn cable_right_mirrors_x() {
        let default = gradient_positions(GradientOrientation::default());
        let mirrored = gradient_positions(GradientOrientation {
            cable: GradientOrientationCable::Right,
            ..GradientOrientation::default()
        });

        for (a, b) in default.iter().zip(&mirrored) {
            assert_eq!(a.x, -b.x);
            assert_eq!(a.y, b.y);
        }
    }

    #[test]
    fn vertical_axis_swaps_axes() {
        let default = gradient_positions(GradientOrientation::default());
        let vertical = gradient_positions(GradientOrientation {
            axis: GradientOrientationAxis::Vertical,
            ..GradientOrientation::default()
        });

        for (a, b) in default.iter().zip(&vertical) {
            assert_eq!(a.x, b.y);
            assert_eq!(a.y, b.x);
        }
    }

    #[test]
    fn standing_pose_raises_z() {
        let standing = gradient_positions(GradientOrientation {
            pose: GradientOrientationPose::Standing,
            ..GradientOrientation::default()
        });

        assert!(standing.iter().all(|p| p.z == 0.3));
    }
}
