use std::collections::HashMap;
use std::net::Ipv4Addr;

use itertools::Itertools;
use packed_struct::prelude::*;

use hue::colortemp;

use crate::model::throttle::Throttle;
use crate::resource::{LifxConfigEntry, LifxDeviceClass};

pub const UDP_PORT: u16 = 56700;

/// Kelvin sent alongside rgb-derived colors; devices ignore it unless
/// saturation drops to zero.
const NEUTRAL_KELVIN: u32 = 3500;

/// protocol=1024 plus the addressable bit; tagged is set only for
/// frames without a target mac.
const PROTOCOL_ADDRESSABLE: u16 = 0x1400;
const PROTOCOL_TAGGED: u16 = 0x3400;

/// Arbitrary nonzero source id identifying this sender to devices
const SOURCE_ID: u32 = 0x5052_4D41;

const MSG_SET_POWER: u16 = 21;
const MSG_SET_COLOR: u16 = 102;
const MSG_SET_EXTENDED_COLOR_ZONES: u16 = 510;
const MSG_SET_TILE_STATE64: u16 = 715;

/// Maximum zone count in one SetExtendedColorZones message
const EXTENDED_ZONE_COUNT: usize = 82;

const TILE_WIDTH: usize = 8;
const TILE_PIXELS: usize = 64;

#[derive(PackedStruct, Clone, Debug, Default)]
#[packed_struct(size = "36", endian = "lsb")]
pub struct LifxHeader {
    pub size: u16,
    pub protocol: u16,
    pub source: u32,
    pub target: [u8; 8],
    pub reserved1: [u8; 6],
    pub flags: u8,
    pub sequence: u8,
    pub reserved2: u64,
    pub pkt_type: u16,
    pub reserved3: u16,
}

impl LifxHeader {
    pub const SIZE: usize = size_of::<<Self as PackedStruct>::ByteArray>();

    fn for_packet(target: Option<[u8; 8]>, pkt_type: u16, payload_len: usize) -> Self {
        Self {
            size: u16::try_from(Self::SIZE + payload_len).unwrap_or(u16::MAX),
            protocol: if target.is_some() {
                PROTOCOL_ADDRESSABLE
            } else {
                PROTOCOL_TAGGED
            },
            source: SOURCE_ID,
            target: target.unwrap_or_default(),
            pkt_type,
            ..Self::default()
        }
    }
}

/// LIFX color tuple; all channels span the full u16 range, kelvin is
/// clamped to the device-accepted window.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Hsbk {
    pub hue: u16,
    pub saturation: u16,
    pub brightness: u16,
    pub kelvin: u16,
}

impl Hsbk {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    #[must_use]
    pub fn from_rgb([r, g, b]: [u8; 3]) -> Self {
        let rf = f64::from(r) / 255.0;
        let gf = f64::from(g) / 255.0;
        let bf = f64::from(b) / 255.0;

        let max = rf.max(gf).max(bf);
        let min = rf.min(gf).min(bf);
        let delta = max - min;

        let hue_deg = if delta <= f64::EPSILON {
            0.0
        } else if (max - rf).abs() <= f64::EPSILON {
            60.0 * (((gf - bf) / delta).rem_euclid(6.0))
        } else if (max - gf).abs() <= f64::EPSILON {
            60.0 * ((bf - rf) / delta + 2.0)
        } else {
            60.0 * ((rf - gf) / delta + 4.0)
        };

        let saturation = if max <= f64::EPSILON { 0.0 } else { delta / max };

        Self {
            hue: ((hue_deg / 360.0) * 65535.0).round() as u16,
            saturation: (saturation * 65535.0).round() as u16,
            brightness: (max * 65535.0).round().max(1.0) as u16,
            kelvin: colortemp::clamp_kelvin(NEUTRAL_KELVIN),
        }
    }

    fn write_to(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.hue.to_le_bytes());
        out.extend_from_slice(&self.saturation.to_le_bytes());
        out.extend_from_slice(&self.brightness.to_le_bytes());
        out.extend_from_slice(&self.kelvin.to_le_bytes());
    }
}

fn packet(target: Option<[u8; 8]>, pkt_type: u16, payload: &[u8]) -> Vec<u8> {
    let header = LifxHeader::for_packet(target, pkt_type, payload.len());
    let mut out = header.pack().map_or_else(|_| Vec::new(), |h| h.to_vec());
    out.extend_from_slice(payload);
    out
}

#[must_use]
pub fn set_power(target: Option<[u8; 8]>, on: bool) -> Vec<u8> {
    let level: u16 = if on { u16::MAX } else { 0 };
    packet(target, MSG_SET_POWER, &level.to_le_bytes())
}

#[must_use]
pub fn set_color(target: Option<[u8; 8]>, color: Hsbk) -> Vec<u8> {
    let mut payload = Vec::with_capacity(13);
    payload.push(0);
    color.write_to(&mut payload);
    payload.extend_from_slice(&0u32.to_le_bytes());
    packet(target, MSG_SET_COLOR, &payload)
}

#[must_use]
pub fn set_extended_color_zones(target: Option<[u8; 8]>, colors: &[Hsbk]) -> Vec<u8> {
    let count = colors.len().min(EXTENDED_ZONE_COUNT);

    let mut payload = Vec::with_capacity(8 + EXTENDED_ZONE_COUNT * 8);
    payload.extend_from_slice(&0u32.to_le_bytes());
    payload.push(1); // apply immediately
    payload.extend_from_slice(&0u16.to_le_bytes());
    payload.push(u8::try_from(count).unwrap_or(u8::MAX));

    for zone in 0..EXTENDED_ZONE_COUNT {
        let color = colors.get(zone).copied().unwrap_or(Hsbk {
            hue: 0,
            saturation: 0,
            brightness: 0,
            kelvin: colortemp::KELVIN_MIN,
        });
        color.write_to(&mut payload);
    }

    packet(target, MSG_SET_EXTENDED_COLOR_ZONES, &payload)
}

/// One 8x8 tile, painted column-wise from up to eight colors so a
/// gradient runs across the tile.
#[must_use]
pub fn set_tile_state(target: Option<[u8; 8]>, columns: &[Hsbk]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(10 + TILE_PIXELS * 8);
    payload.push(0); // tile_index
    payload.push(1); // length
    payload.push(0); // reserved
    payload.push(0); // x
    payload.push(0); // y
    payload.push(u8::try_from(TILE_WIDTH).unwrap_or(8));
    payload.extend_from_slice(&0u32.to_le_bytes());

    for pixel in 0..TILE_PIXELS {
        let column = pixel % TILE_WIDTH;
        let color = columns.get(column).copied().unwrap_or(Hsbk {
            hue: 0,
            saturation: 0,
            brightness: 0,
            kelvin: colortemp::KELVIN_MIN,
        });
        color.write_to(&mut payload);
    }

    packet(target, MSG_SET_TILE_STATE64, &payload)
}

/// Resample sorted gradient points into `count` zone colors by
/// piecewise linear interpolation. Endpoints always equal the first
/// and last gradient point.
#[must_use]
pub fn zone_colors(points: &[(u8, [u8; 3])], count: usize) -> Vec<[u8; 3]> {
    if count == 0 || points.is_empty() {
        return Vec::new();
    }

    let sorted: Vec<_> = points
        .iter()
        .sorted_by_key(|(id, _)| *id)
        .map(|(_, rgb)| *rgb)
        .collect();

    if sorted.len() == 1 {
        return vec![sorted[0]; count];
    }

    (0..count)
        .map(|i| {
            #[allow(clippy::cast_precision_loss)]
            let position = i as f64 / (count - 1).max(1) as f64;
            #[allow(clippy::cast_precision_loss)]
            let scaled = position * (sorted.len() - 1) as f64;
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let lower = (scaled.floor() as usize).min(sorted.len() - 1);
            let upper = (lower + 1).min(sorted.len() - 1);
            #[allow(clippy::cast_precision_loss)]
            let t = scaled - lower as f64;

            let a = sorted[lower];
            let b = sorted[upper];
            let mut out = [0u8; 3];
            for c in 0..3 {
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                {
                    out[c] = f64::from(a[c])
                        .mul_add(1.0 - t, f64::from(b[c]) * t)
                        .clamp(0.0, 255.0) as u8;
                }
            }
            out
        })
        .collect()
}

/// Per-frame accumulator for one lifx device
#[derive(Debug, Clone)]
pub struct LifxAccumulator {
    pub ip: Ipv4Addr,
    pub target: Option<[u8; 8]>,
    pub class: LifxDeviceClass,
    pub points_capable: u8,
    pub gradient_points: Vec<(u8, [u8; 3])>,
    pub color: Option<[u8; 3]>,
}

impl LifxAccumulator {
    #[must_use]
    pub fn new(cfg: &LifxConfigEntry) -> Self {
        Self {
            ip: cfg.ip,
            target: cfg.mac.as_deref().and_then(parse_target),
            class: cfg.class,
            points_capable: cfg.points_capable,
            gradient_points: Vec::new(),
            color: None,
        }
    }

    pub fn add_record(&mut self, is_gradient: bool, segment_index: u8, rgb: [u8; 3]) {
        if is_gradient {
            self.gradient_points.push((segment_index, rgb));
        } else {
            self.color = Some(rgb);
        }
    }
}

fn parse_target(mac: &str) -> Option<[u8; 8]> {
    let mut target = [0u8; 8];
    let mut count = 0;

    for (slot, part) in target.iter_mut().zip(mac.split(':')) {
        *slot = u8::from_str_radix(part, 16).ok()?;
        count += 1;
    }

    (count == 6).then_some(target)
}

/// Session state: per-device rate limiters
pub struct LifxEmitter {
    throttles: HashMap<Ipv4Addr, Throttle>,
    max_fps: u32,
}

impl LifxEmitter {
    #[must_use]
    pub fn new(max_fps: u32) -> Self {
        Self {
            throttles: HashMap::new(),
            max_fps,
        }
    }

    /// Build this device's packets for the frame, or `None` when the
    /// device is rate limited.
    pub fn build_packets(&mut self, acc: &LifxAccumulator) -> Option<Vec<Vec<u8>>> {
        let max_fps = self.max_fps;
        let throttle = self
            .throttles
            .entry(acc.ip)
            .or_insert_with(|| Throttle::from_fps(max_fps));

        if !throttle.tick() {
            return None;
        }

        if acc.points_capable >= 2 && !acc.gradient_points.is_empty() {
            let zones = zone_colors(&acc.gradient_points, usize::from(acc.points_capable));
            let colors: Vec<_> = zones.into_iter().map(Hsbk::from_rgb).collect();

            let pkt = match acc.class {
                LifxDeviceClass::Matrix => {
                    let columns = zone_colors(&acc.gradient_points, TILE_WIDTH);
                    let columns: Vec<_> = columns.into_iter().map(Hsbk::from_rgb).collect();
                    set_tile_state(acc.target, &columns)
                }
                _ => set_extended_color_zones(acc.target, &colors),
            };

            return Some(vec![pkt]);
        }

        let rgb = acc.color?;
        if rgb == [0, 0, 0] {
            return Some(vec![set_power(acc.target, false)]);
        }

        Some(vec![
            set_power(acc.target, true),
            set_color(acc.target, Hsbk::from_rgb(rgb)),
        ])
    }
}

#[cfg(test)]
mod tests {
    use crate::emitter::lifx::{
        EXTENDED_ZONE_COUNT, Hsbk, LifxHeader, MSG_SET_COLOR, set_color,
        set_extended_color_zones, zone_colors,
    };

    #[test]
    fn hsbk_from_primaries() {
        let red = Hsbk::from_rgb([255, 0, 0]);
        assert_eq!(red.hue, 0);
        assert_eq!(red.saturation, 65535);
        assert_eq!(red.brightness, 65535);
        assert_eq!(red.kelvin, 3500);

        let green = Hsbk::from_rgb([0, 255, 0]);
        assert_eq!(green.hue, 21845);

        let blue = Hsbk::from_rgb([0, 0, 255]);
        assert_eq!(blue.hue, 43690);
    }

    #[test]
    fn hsbk_white_is_unsaturated() {
        let white = Hsbk::from_rgb([255, 255, 255]);
        assert_eq!(white.saturation, 0);
        assert_eq!(white.brightness, 65535);
    }

    #[test]
    fn set_color_packet_layout() {
        let target = Some([1, 2, 3, 4, 5, 6, 0, 0]);
        let pkt = set_color(target, Hsbk::from_rgb([255, 0, 0]));

        assert_eq!(pkt.len(), LifxHeader::SIZE + 13);
        // size, little endian
        assert_eq!(u16::from_le_bytes([pkt[0], pkt[1]]), 49);
        // addressable, not tagged
        assert_eq!(u16::from_le_bytes([pkt[2], pkt[3]]), 0x1400);
        // target mac
        assert_eq!(&pkt[8..14], &[1, 2, 3, 4, 5, 6]);
        // packet type
        assert_eq!(u16::from_le_bytes([pkt[32], pkt[33]]), MSG_SET_COLOR);
        // hue of pure red is zero
        assert_eq!(u16::from_le_bytes([pkt[37], pkt[38]]), 0);
        // full saturation
        assert_eq!(u16::from_le_bytes([pkt[39], pkt[40]]), 65535);
    }

    #[test]
    fn extended_zones_carry_a_fixed_color_block() {
        let colors = vec![Hsbk::from_rgb([255, 0, 0]); 16];
        let pkt = set_extended_color_zones(None, &colors);

        assert_eq!(pkt.len(), LifxHeader::SIZE + 8 + EXTENDED_ZONE_COUNT * 8);
        // colors_count
        assert_eq!(pkt[LifxHeader::SIZE + 7], 16);
    }

    #[test]
    fn zone_interpolation_hits_the_endpoints() {
        let points = vec![(0u8, [255, 0, 0]), (1, [0, 255, 0]), (2, [0, 0, 255])];
        let zones = zone_colors(&points, 16);

        assert_eq!(zones.len(), 16);
        assert_eq!(zones[0], [255, 0, 0]);
        assert_eq!(zones[15], [0, 0, 255]);
        // middle zone blends the middle point
        assert!(zones[8][1] > 128);
    }

    #[test]
    fn single_point_repeats() {
        let zones = zone_colors(&[(3, [7, 8, 9])], 4);
        assert_eq!(zones, vec![[7, 8, 9]; 4]);
    }
}
