use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;

use itertools::Itertools;

use crate::resource::WledConfig;

/// DNRGB protocol byte, followed by the no-timeout marker and a
/// starting led index of zero.
const DNRGB_HEADER: [u8; 4] = [0x04, 0xFF, 0x00, 0x00];

/// Fraction of the freshly painted frame in the smoothed output
const SMOOTHING_MIX: f64 = 0.8;

pub const DEFAULT_UDP_PORT: u16 = 21324;

#[derive(Debug, Clone)]
pub struct WledLightEntry {
    pub segment_start: u16,
    pub segment_stop: u16,
    pub is_gradient: bool,
    pub base_color: [u8; 3],
    pub gradient_points: Vec<(u8, [u8; 3])>,
}

/// Per-host accumulator; one wled controller can carry segments from
/// several lights.
#[derive(Debug, Clone)]
pub struct WledAccumulator {
    pub udp_port: u16,
    pub total_leds: u16,
    entries: BTreeMap<u32, WledLightEntry>,
}

impl WledAccumulator {
    #[must_use]
    pub const fn new(udp_port: u16) -> Self {
        Self {
            udp_port,
            total_leds: 0,
            entries: BTreeMap::new(),
        }
    }

    /// Merge one frame record into this host's accumulator. Gradient
    /// records accumulate per-segment points; whole-light records set
    /// the base color.
    pub fn add_record(
        &mut self,
        light_id: u32,
        cfg: &WledConfig,
        is_gradient: bool,
        segment_index: u8,
        rgb: [u8; 3],
    ) {
        let entry = self.entries.entry(light_id).or_insert_with(|| WledLightEntry {
            segment_start: cfg.segment_start,
            segment_stop: cfg.segment_stop,
            is_gradient,
            base_color: rgb,
            gradient_points: Vec::new(),
        });

        if is_gradient {
            entry.gradient_points.push((segment_index, rgb));
        } else {
            entry.base_color = rgb;
        }

        self.total_leds = self.total_leds.max(cfg.segment_stop);
    }

    /// Paint the full pixel strip for this frame.
    #[must_use]
    pub fn paint(&self) -> Vec<[u8; 3]> {
        let total = usize::from(self.total_leds);
        let mut pixels = vec![[0u8; 3]; total];

        for entry in self.entries.values() {
            let start = usize::from(entry.segment_start);
            let stop = usize::from(entry.segment_stop).min(total);
            if stop <= start {
                continue;
            }

            if entry.is_gradient && entry.gradient_points.len() >= 2 {
                let points: Vec<_> = entry
                    .gradient_points
                    .iter()
                    .sorted_by_key(|(id, _)| *id)
                    .map(|(_, rgb)| *rgb)
                    .collect();

                let len = stop - start;
                for (offset, pixel) in pixels[start..stop].iter_mut().enumerate() {
                    #[allow(clippy::cast_precision_loss)]
                    let t = offset as f64 / (len - 1).max(1) as f64;
                    *pixel = sample_gradient(&points, t);
                }
            } else if let Some((_, rgb)) = entry.gradient_points.first() {
                pixels[start..stop].fill(*rgb);
            } else {
                pixels[start..stop].fill(entry.base_color);
            }
        }

        pixels
    }
}

/// Linear interpolation between the bracketing gradient points at
/// normalized position `t` in [0, 1].
fn sample_gradient(points: &[[u8; 3]], t: f64) -> [u8; 3] {
    #[allow(clippy::cast_precision_loss)]
    let scaled = t * (points.len() - 1) as f64;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let lower = (scaled.floor() as usize).min(points.len() - 1);
    let upper = (lower + 1).min(points.len() - 1);

    if lower == upper {
        return points[lower];
    }

    #[allow(clippy::cast_precision_loss)]
    let f = scaled - lower as f64;
    let a = points[lower];
    let b = points[upper];

    let mut out = [0u8; 3];
    for c in 0..3 {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        {
            out[c] = f64::from(a[c])
                .mul_add(1.0 - f, f64::from(b[c]) * f)
                .clamp(0.0, 255.0) as u8;
        }
    }
    out
}

/// Session state for the wled emitter: the previous pixel buffer per
/// host, for temporal smoothing against frame-to-frame flicker.
pub struct WledEmitter {
    prev: HashMap<Ipv4Addr, Vec<[u8; 3]>>,
    smoothing: bool,
}

impl WledEmitter {
    #[must_use]
    pub fn new(smoothing: bool) -> Self {
        Self {
            prev: HashMap::new(),
            smoothing,
        }
    }

    /// Build the DNRGB datagram for one host, applying temporal
    /// smoothing against the previous frame. The unsmoothed frame is
    /// persisted, so a steady input converges to exactly itself.
    #[must_use]
    pub fn build_datagram(&mut self, host: Ipv4Addr, acc: &WledAccumulator) -> Vec<u8> {
        let pixels = acc.paint();

        let mut out = Vec::with_capacity(4 + pixels.len() * 3);
        out.extend_from_slice(&DNRGB_HEADER);

        let prev = self.prev.get(&host);
        for (idx, pixel) in pixels.iter().enumerate() {
            let smoothed = match prev.and_then(|p| p.get(idx)) {
                Some(old) if self.smoothing => smooth(*pixel, *old),
                _ => *pixel,
            };
            out.extend_from_slice(&smoothed);
        }

        self.prev.insert(host, pixels);
        out
    }
}

fn smooth(new: [u8; 3], old: [u8; 3]) -> [u8; 3] {
    let mut out = [0u8; 3];
    for c in 0..3 {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        {
            out[c] = f64::from(new[c])
                .mul_add(SMOOTHING_MIX, f64::from(old[c]) * (1.0 - SMOOTHING_MIX))
                .clamp(0.0, 255.0) as u8;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use crate::emitter::wled::{WledAccumulator, WledEmitter};
    use crate::resource::WledConfig;

    const HOST: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 4);

    fn wled_cfg(start: u16, stop: u16) -> WledConfig {
        WledConfig {
            ip: HOST,
            udp_port: 21324,
            segment_start: start,
            segment_stop: stop,
            points_capable: 7,
        }
    }

    #[test]
    fn solid_color_fills_the_segment() {
        let mut acc = WledAccumulator::new(21324);
        acc.add_record(1, &wled_cfg(0, 5), false, 0, [200, 100, 50]);

        let mut emitter = WledEmitter::new(true);
        let datagram = emitter.build_datagram(HOST, &acc);

        assert_eq!(&datagram[..4], &[0x04, 0xFF, 0x00, 0x00]);
        assert_eq!(datagram.len(), 4 + 5 * 3);
        for led in 0..5 {
            assert_eq!(&datagram[4 + led * 3..4 + led * 3 + 3], &[200, 100, 50]);
        }
    }

    #[test]
    fn seven_point_gradient_interpolates_across_leds() {
        let rainbow: [[u8; 3]; 7] = [
            [255, 0, 0],
            [255, 165, 0],
            [255, 255, 0],
            [0, 255, 0],
            [0, 0, 255],
            [75, 0, 130],
            [238, 130, 238],
        ];

        let mut acc = WledAccumulator::new(21324);
        for (seg, color) in rainbow.iter().enumerate() {
            acc.add_record(1, &wled_cfg(0, 14), true, u8::try_from(seg).unwrap(), *color);
        }

        let pixels = acc.paint();
        assert_eq!(pixels.len(), 14);

        // endpoints match the first and last gradient points
        assert_eq!(pixels[0], [255, 0, 0]);
        assert_eq!(pixels[13], [238, 130, 238]);

        // led 7 sits between green and blue
        let mid = pixels[7];
        assert_eq!(mid[0], 0);
        assert!(mid[1] > 0 && mid[1] < 255);
        assert!(mid[2] > 0 && mid[2] < 255);
    }

    #[test]
    fn steady_state_is_flicker_free() {
        let mut acc = WledAccumulator::new(21324);
        acc.add_record(1, &wled_cfg(0, 3), false, 0, [10, 128, 254]);

        let mut emitter = WledEmitter::new(true);
        let first = emitter.build_datagram(HOST, &acc);
        let second = emitter.build_datagram(HOST, &acc);

        assert_eq!(first, second);
    }

    #[test]
    fn smoothing_mixes_with_previous_frame() {
        let mut emitter = WledEmitter::new(true);

        let mut white = WledAccumulator::new(21324);
        white.add_record(1, &wled_cfg(0, 1), false, 0, [0, 0, 0]);
        emitter.build_datagram(HOST, &white);

        let mut red = WledAccumulator::new(21324);
        red.add_record(1, &wled_cfg(0, 1), false, 0, [255, 0, 0]);
        let datagram = emitter.build_datagram(HOST, &red);

        // 0.8 * 255 + 0.2 * 0
        assert_eq!(datagram[4], 204);
    }

    #[test]
    fn single_gradient_point_paints_like_solid() {
        let mut acc = WledAccumulator::new(21324);
        acc.add_record(1, &wled_cfg(2, 5), true, 3, [9, 8, 7]);

        let pixels = acc.paint();
        assert_eq!(pixels[0], [0, 0, 0]);
        assert_eq!(pixels[2], [9, 8, 7]);
        assert_eq!(pixels[4], [9, 8, 7]);
    }
}
