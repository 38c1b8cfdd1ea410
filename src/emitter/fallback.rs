use std::sync::Arc;

use crate::model::framediff::{FrameDecision, FrameDiffGate};
use crate::resource::{BackendRequest, FallbackUpdate, Light};

/// Lights per frame served by the rest fallback; everything else waits
/// for its turn in the rotation.
const LIGHTS_PER_FRAME: usize = 2;

/// Transition time (in 100ms units) that masks the reduced update rate
const TRANSITION_TIME: u8 = 2;

/// Round-robin scheduler for lights without a udp-friendly protocol.
/// Each frame, up to two of them get a rest update with only the
/// changed field.
pub struct FallbackRoundRobin {
    lights: Vec<Arc<Light>>,
    cursor: usize,
}

impl FallbackRoundRobin {
    #[must_use]
    pub const fn new(lights: Vec<Arc<Light>>) -> Self {
        Self { lights, cursor: 0 }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lights.is_empty()
    }

    /// Produce this frame's rest requests, advancing the rotation.
    pub fn requests(&mut self, gate: &mut FrameDiffGate) -> Vec<BackendRequest> {
        let mut out = Vec::new();

        for _ in 0..LIGHTS_PER_FRAME.min(self.lights.len()) {
            let light = &self.lights[self.cursor];
            self.cursor = (self.cursor + 1) % self.lights.len();

            let state = light.state();
            let update = match gate.decide(light.id_v1, state.xy, state.bri) {
                FrameDecision::Noop => continue,
                FrameDecision::Brightness => FallbackUpdate {
                    bri: Some(state.bri),
                    xy: None,
                    transitiontime: TRANSITION_TIME,
                },
                FrameDecision::Color => FallbackUpdate {
                    bri: None,
                    xy: Some(state.xy),
                    transitiontime: TRANSITION_TIME,
                },
            };

            out.push(BackendRequest::LightSet {
                light: light.id_v1,
                update,
            });
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use hue::xy::XY;

    use crate::emitter::fallback::FallbackRoundRobin;
    use crate::model::framediff::{FrameDiffGate, Tolerances};
    use crate::resource::{BackendRequest, DeviceProtocol, Light};

    fn light(id: u32) -> Arc<Light> {
        let light = Light::new(id, format!("l{id}"), "LCT015", DeviceProtocol::Other, json!({}));
        light.update_state(|state| {
            state.on = true;
            state.bri = 200;
            state.xy = XY::new(0.4, 0.4);
        });
        Arc::new(light)
    }

    fn gate() -> FrameDiffGate {
        FrameDiffGate::new(Tolerances { cie: 0.008, bri: 6 })
    }

    #[test]
    fn serves_at_most_two_lights_per_frame() {
        let mut rr = FallbackRoundRobin::new(vec![light(1), light(2), light(3)]);
        let mut gate = gate();

        let first = rr.requests(&mut gate);
        assert_eq!(first.len(), 2);

        let ids: Vec<u32> = first
            .iter()
            .map(|req| match req {
                BackendRequest::LightSet { light, .. } => *light,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(ids, vec![1, 2]);

        // rotation wraps to the third light
        let second = rr.requests(&mut gate);
        assert!(matches!(
            second[0],
            BackendRequest::LightSet { light: 3, .. }
        ));
    }

    #[test]
    fn suppressed_lights_produce_no_request() {
        let mut rr = FallbackRoundRobin::new(vec![light(1)]);
        let mut gate = gate();

        assert_eq!(rr.requests(&mut gate).len(), 1);
        // the state hasn't moved since; the gate suppresses the rest
        assert!(rr.requests(&mut gate).is_empty());
        assert!(rr.requests(&mut gate).is_empty());
    }
}
