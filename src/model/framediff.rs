use std::collections::HashMap;

use hue::xy::XY;

/// What an emitter should do for a light this frame.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FrameDecision {
    /// Within tolerance of the last applied frame; skip the send
    Noop,
    /// Only brightness moved
    Brightness,
    /// Chromaticity moved
    Color,
}

#[derive(Copy, Clone, Debug)]
pub struct Tolerances {
    pub cie: f64,
    pub bri: u8,
}

#[derive(Copy, Clone, Debug)]
pub struct LastFrame {
    pub xy: XY,
    pub bri: u8,
}

impl Default for LastFrame {
    fn default() -> Self {
        Self {
            xy: XY::new(0.0, 0.0),
            bri: 0,
        }
    }
}

/// Pure decision function: depends only on the previous applied frame
/// and the tolerances.
#[must_use]
pub fn diff(prev: LastFrame, xy: XY, bri: u8, tol: Tolerances) -> FrameDecision {
    if (xy.x - prev.xy.x).abs() > tol.cie || (xy.y - prev.xy.y).abs() > tol.cie {
        return FrameDecision::Color;
    }

    if bri.abs_diff(prev.bri) > tol.bri {
        return FrameDecision::Brightness;
    }

    FrameDecision::Noop
}

/// Per-light suppression cells for one streaming session.
///
/// Consulted by the emitters that pay per send (yeelight, mqtt, rest
/// fallback); udp-native emitters always transmit.
pub struct FrameDiffGate {
    cells: HashMap<u32, LastFrame>,
    tol: Tolerances,
}

impl FrameDiffGate {
    #[must_use]
    pub fn new(tol: Tolerances) -> Self {
        Self {
            cells: HashMap::new(),
            tol,
        }
    }

    pub fn decide(&mut self, light_id: u32, xy: XY, bri: u8) -> FrameDecision {
        let cell = self.cells.entry(light_id).or_default();
        let decision = diff(*cell, xy, bri, self.tol);

        match decision {
            FrameDecision::Color => {
                // a color send carries brightness implicitly, so the
                // whole cell settles; repeating the frame is a noop
                cell.xy = xy;
                cell.bri = bri;
            }
            FrameDecision::Brightness => cell.bri = bri,
            FrameDecision::Noop => {}
        }

        decision
    }
}

#[cfg(test)]
mod tests {
    use hue::xy::XY;

    use crate::model::framediff::{FrameDecision, FrameDiffGate, Tolerances};

    const TOL: Tolerances = Tolerances { cie: 0.008, bri: 6 };

    #[test]
    fn first_frame_is_a_color_change() {
        let mut gate = FrameDiffGate::new(TOL);
        assert_eq!(
            gate.decide(1, XY::new(0.3, 0.3), 200),
            FrameDecision::Color
        );
    }

    #[test]
    fn identical_second_frame_is_noop() {
        let mut gate = FrameDiffGate::new(TOL);
        gate.decide(1, XY::new(0.3, 0.3), 200);
        assert_eq!(gate.decide(1, XY::new(0.3, 0.3), 200), FrameDecision::Noop);
    }

    #[test]
    fn movement_within_tolerance_is_noop() {
        let mut gate = FrameDiffGate::new(TOL);
        gate.decide(1, XY::new(0.3, 0.3), 200);
        assert_eq!(
            gate.decide(1, XY::new(0.304, 0.297), 203),
            FrameDecision::Noop
        );
    }

    #[test]
    fn brightness_only_change() {
        let mut gate = FrameDiffGate::new(TOL);
        gate.decide(1, XY::new(0.3, 0.3), 200);
        assert_eq!(
            gate.decide(1, XY::new(0.3, 0.3), 100),
            FrameDecision::Brightness
        );
    }

    #[test]
    fn lights_have_independent_cells() {
        let mut gate = FrameDiffGate::new(TOL);
        gate.decide(1, XY::new(0.3, 0.3), 200);
        assert_eq!(
            gate.decide(2, XY::new(0.3, 0.3), 200),
            FrameDecision::Color
        );
    }
}
