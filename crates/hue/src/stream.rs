use std::collections::BTreeMap;

use packed_struct::prelude::*;
use packed_struct::types::bits::ByteArray;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{HueError, HueResult};
use crate::xy::XY;

#[derive(PrimitiveEnum_u8, Clone, Debug, Copy, PartialEq, Eq)]
pub enum HueStreamColorMode {
    Rgb = 0x00,
    Xy = 0x01,
}

#[derive(PrimitiveEnum_u8, Clone, Debug, Copy, PartialEq, Eq)]
pub enum HueStreamVersion {
    V1 = 0x01,
    V2 = 0x02,
}

/// Addressing mode of a v1 record: a whole device, or one gradient segment
#[derive(PrimitiveEnum_u8, Clone, Debug, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HueStreamDeviceType {
    Light = 0x00,
    GradientSegment = 0x01,
}

#[derive(PackedStruct, Clone, Debug)]
#[packed_struct(size = "16", endian = "msb")]
pub struct HueStreamHeader {
    magic: [u8; 9],
    #[packed_field(ty = "enum", size_bytes = "1")]
    version: HueStreamVersion,
    x0: u8,
    seqnr: u8,
    x1: u16,
    #[packed_field(size_bytes = "1", ty = "enum")]
    color_mode: HueStreamColorMode,
    x2: u8,
}

impl HueStreamHeader {
    pub const MAGIC: &[u8] = b"HueStream";
    pub const SIZE: usize = size_of::<<Self as PackedStruct>::ByteArray>();

    /// Offset of the protocol version byte within a frame
    pub const VERSION_OFFSET: usize = 9;

    pub fn parse(data: &[u8]) -> HueResult<Self> {
        if data.len() < Self::SIZE {
            return Err(HueError::HueStreamBadHeader);
        }

        let hdr = Self::unpack_from_slice(&data[..Self::SIZE])?;

        if hdr.magic != Self::MAGIC {
            return Err(HueError::HueStreamBadHeader);
        }

        Ok(hdr)
    }
}

/// Byte range holding the ascii area uuid in a v2 frame
pub const V2_UUID_RANGE: std::ops::Range<usize> = 16..52;

/// Full v2 header size (common header plus ascii uuid)
pub const V2_HEADER_SIZE: usize = 52;

pub const V1_RECORD_SIZE: usize = 9;
pub const V2_RECORD_SIZE: usize = 7;

#[derive(Clone, Debug)]
pub enum HueStreamPacket {
    V1(HueStreamPacketV1),
    V2(HueStreamPacketV2),
}

#[derive(Clone, Debug)]
pub struct HueStreamPacketV1 {
    pub lights: HueStreamLightsV1,
}

#[derive(Clone, Debug)]
pub struct HueStreamPacketV2 {
    pub area: Uuid,
    pub lights: HueStreamLightsV2,
}

impl HueStreamPacket {
    pub fn parse(data: &[u8]) -> HueResult<Self> {
        let hdr = HueStreamHeader::parse(data)?;
        let body = &data[HueStreamHeader::SIZE..];
        match hdr.version {
            HueStreamVersion::V1 => {
                let lights = HueStreamLightsV1::parse(hdr.color_mode, body)?;
                Ok(Self::V1(HueStreamPacketV1 { lights }))
            }
            HueStreamVersion::V2 => {
                if body.len() < V2_UUID_RANGE.len() {
                    return Err(HueError::HueStreamBadHeader);
                }
                let (area_bytes, body) = body.split_at(V2_UUID_RANGE.len());
                let area = Uuid::try_parse_ascii(area_bytes)?;
                let lights = HueStreamLightsV2::parse(hdr.color_mode, body)?;
                Ok(Self::V2(HueStreamPacketV2 { area, lights }))
            }
        }
    }

    #[must_use]
    pub const fn color_mode(&self) -> HueStreamColorMode {
        match self {
            Self::V1(v1) => v1.color_mode(),
            Self::V2(v2) => v2.color_mode(),
        }
    }
}

impl HueStreamPacketV1 {
    #[must_use]
    pub const fn color_mode(&self) -> HueStreamColorMode {
        match self.lights {
            HueStreamLightsV1::Rgb(_) => HueStreamColorMode::Rgb,
            HueStreamLightsV1::Xy(_) => HueStreamColorMode::Xy,
        }
    }
}

impl HueStreamPacketV2 {
    #[must_use]
    pub const fn color_mode(&self) -> HueStreamColorMode {
        match self.lights {
            HueStreamLightsV2::Rgb(_) => HueStreamColorMode::Rgb,
            HueStreamLightsV2::Xy(_) => HueStreamColorMode::Xy,
        }
    }
}

#[derive(PackedStruct, Clone, Debug, Copy, Serialize, Deserialize)]
#[packed_struct(size = "9", endian = "msb")]
pub struct Rgb16V1 {
    #[packed_field(ty = "enum", size_bytes = "1")]
    pub device_type: HueStreamDeviceType,
    pub light_id: u16,
    #[packed_field(size_bytes = "6")]
    pub rgb: Rgb16,
}

#[derive(PackedStruct, Clone, Debug, Copy, Serialize, Deserialize)]
#[packed_struct(size = "9", endian = "msb")]
pub struct Xy16V1 {
    #[packed_field(ty = "enum", size_bytes = "1")]
    pub device_type: HueStreamDeviceType,
    pub light_id: u16,
    #[packed_field(size_bytes = "6")]
    pub xy: Xy16,
}

#[derive(PackedStruct, Clone, Debug, Copy, Serialize, Deserialize)]
#[packed_struct(size = "7", endian = "msb")]
pub struct Rgb16V2 {
    pub channel: u8,
    #[packed_field(size_bytes = "6")]
    pub rgb: Rgb16,
}

#[derive(PackedStruct, Clone, Debug, Copy, Serialize, Deserialize)]
#[packed_struct(size = "7", endian = "msb")]
pub struct Xy16V2 {
    pub channel: u8,
    #[packed_field(size_bytes = "6")]
    pub xy: Xy16,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum HueStreamLightsV1 {
    Rgb(Vec<Rgb16V1>),
    Xy(Vec<Xy16V1>),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum HueStreamLightsV2 {
    Rgb(Vec<Rgb16V2>),
    Xy(Vec<Xy16V2>),
}

fn parse_list<T: PackedStruct>(data: &[u8]) -> HueResult<Vec<T>> {
    let size = T::ByteArray::len();
    if data.len() % size != 0 {
        return Err(HueError::HueStreamTruncated(data.len() % size));
    }

    let res = data
        .chunks_exact(size)
        .map(T::unpack_from_slice)
        .collect::<Result<_, _>>()?;

    Ok(res)
}

impl HueStreamLightsV1 {
    pub fn parse(color_mode: HueStreamColorMode, data: &[u8]) -> HueResult<Self> {
        match color_mode {
            HueStreamColorMode::Rgb => Ok(Self::Rgb(parse_list(data)?)),
            HueStreamColorMode::Xy => Ok(Self::Xy(parse_list(data)?)),
        }
    }
}

impl HueStreamLightsV2 {
    pub fn parse(color_mode: HueStreamColorMode, data: &[u8]) -> HueResult<Self> {
        match color_mode {
            HueStreamColorMode::Rgb => Ok(Self::Rgb(parse_list(data)?)),
            HueStreamColorMode::Xy => Ok(Self::Xy(parse_list(data)?)),
        }
    }
}

#[derive(PackedStruct, Clone, Debug, Copy, Serialize, Deserialize)]
#[packed_struct(size = "6", endian = "msb")]
pub struct Rgb16 {
    pub r: u16,
    pub g: u16,
    pub b: u16,
}

impl Rgb16 {
    /// Downsample to 8-bit rgb by taking the high byte of each channel
    #[allow(clippy::cast_possible_truncation)]
    #[must_use]
    pub const fn to_rgb8(&self) -> [u8; 3] {
        [(self.r >> 8) as u8, (self.g >> 8) as u8, (self.b >> 8) as u8]
    }

    #[must_use]
    pub fn to_xy(&self) -> (XY, f64) {
        let [r, g, b] = self.to_rgb8();
        XY::from_rgb(r, g, b)
    }
}

#[derive(PackedStruct, Clone, Debug, Copy, Serialize, Deserialize)]
#[packed_struct(size = "6", endian = "msb")]
pub struct Xy16 {
    pub x: u16,
    pub y: u16,
    pub b: u16,
}

impl Xy16 {
    #[allow(clippy::cast_possible_truncation)]
    #[must_use]
    pub const fn brightness(&self) -> u8 {
        (self.b >> 8) as u8
    }

    #[must_use]
    pub fn to_xy(&self) -> (XY, u8) {
        (
            XY::new(
                f64::from(self.x) / f64::from(0xFFFF),
                f64::from(self.y) / f64::from(0xFFFF),
            ),
            self.brightness(),
        )
    }
}

/// Return true if `frame` is a v2 frame long enough to carry an area uuid
#[must_use]
pub fn is_v2_frame(frame: &[u8]) -> bool {
    frame.len() >= V2_HEADER_SIZE
        && frame.starts_with(HueStreamHeader::MAGIC)
        && frame[HueStreamHeader::VERSION_OFFSET] == HueStreamVersion::V2 as u8
}

/// Build a copy of `frame` with the area uuid replaced by `area`.
///
/// Returns `None` when the frame is not v2, is too short, or already
/// carries the requested uuid. The input buffer is never modified; the
/// splitter sends the original bytes down the mirror path.
#[must_use]
pub fn rewrite_area_uuid(frame: &[u8], area: Uuid) -> Option<Vec<u8>> {
    if !is_v2_frame(frame) {
        return None;
    }

    let mut ascii = [0u8; V2_UUID_RANGE.end - V2_UUID_RANGE.start];
    area.hyphenated().encode_lower(&mut ascii);

    if frame[V2_UUID_RANGE] == ascii {
        return None;
    }

    let mut out = frame.to_vec();
    out[V2_UUID_RANGE].copy_from_slice(&ascii);
    Some(out)
}

/// Build a v2 frame containing only the channels present in `map`, with
/// each surviving record's channel index rewritten through the map.
///
/// Record order is preserved, so relative channel ordering on the
/// upstream bridge matches the local group. Returns `None` for frames
/// that are not v2.
#[must_use]
pub fn remap_channels(frame: &[u8], map: &BTreeMap<u8, u8>) -> Option<Vec<u8>> {
    if !is_v2_frame(frame) {
        return None;
    }

    let (header, records) = frame.split_at(V2_HEADER_SIZE);

    let mut out = Vec::with_capacity(frame.len());
    out.extend_from_slice(header);

    for rec in records.chunks_exact(V2_RECORD_SIZE) {
        if let Some(mapped) = map.get(&rec[0]) {
            out.push(*mapped);
            out.extend_from_slice(&rec[1..]);
        }
    }

    Some(out)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use uuid::Uuid;

    use crate::compare;
    use crate::stream::{
        HueStreamColorMode, HueStreamDeviceType, HueStreamLightsV1, HueStreamLightsV2,
        HueStreamPacket, Rgb16, V2_HEADER_SIZE, V2_RECORD_SIZE, Xy16, remap_channels,
        rewrite_area_uuid,
    };

    fn v1_frame(color_mode: u8, records: &[&[u8]]) -> Vec<u8> {
        let mut frame = b"HueStream".to_vec();
        frame.extend_from_slice(&[0x01, 0x00, 0x07, 0x00, 0x00, color_mode, 0x00]);
        for rec in records {
            frame.extend_from_slice(rec);
        }
        frame
    }

    fn v2_frame(area: &str, records: &[&[u8]]) -> Vec<u8> {
        let mut frame = b"HueStream".to_vec();
        frame.extend_from_slice(&[0x02, 0x00, 0x07, 0x00, 0x00, 0x01, 0x00]);
        frame.extend_from_slice(area.as_bytes());
        for rec in records {
            frame.extend_from_slice(rec);
        }
        frame
    }

    #[test]
    fn parse_v1_rgb() {
        let frame = v1_frame(
            0x00,
            &[
                &[0x00, 0x00, 0x01, 0xFF, 0x00, 0x80, 0x00, 0x00, 0x00],
                &[0x01, 0x00, 0x02, 0x00, 0x00, 0xFF, 0xFF, 0x00, 0x00],
            ],
        );

        let HueStreamPacket::V1(pkt) = HueStreamPacket::parse(&frame).unwrap() else {
            panic!("expected v1 packet");
        };

        assert_eq!(pkt.color_mode(), HueStreamColorMode::Rgb);
        let HueStreamLightsV1::Rgb(recs) = pkt.lights else {
            panic!("expected rgb records");
        };

        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].device_type, HueStreamDeviceType::Light);
        assert_eq!(recs[0].light_id, 1);
        assert_eq!(recs[0].rgb.to_rgb8(), [0xFF, 0x80, 0x00]);
        assert_eq!(recs[1].device_type, HueStreamDeviceType::GradientSegment);
        assert_eq!(recs[1].light_id, 2);
    }

    #[test]
    fn parse_v2_xy() {
        let area = "01234567-89ab-cdef-0123-456789abcdef";
        let frame = v2_frame(
            area,
            &[&[0x00, 0x80, 0x00, 0xFF, 0xFF, 0xC8, 0x00]],
        );

        let HueStreamPacket::V2(pkt) = HueStreamPacket::parse(&frame).unwrap() else {
            panic!("expected v2 packet");
        };

        assert_eq!(pkt.area, Uuid::parse_str(area).unwrap());
        let HueStreamLightsV2::Xy(recs) = pkt.lights else {
            panic!("expected xy records");
        };

        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].channel, 0);
        let (xy, bri) = recs[0].xy.to_xy();
        compare!(xy.x, 0x8000 as f64 / 0xFFFF as f64);
        compare!(xy.y, 1.0);
        assert_eq!(bri, 0xC8);
    }

    #[test]
    fn parse_rejects_bad_magic() {
        let mut frame = v1_frame(0x00, &[]);
        frame[0] = b'X';
        assert!(HueStreamPacket::parse(&frame).is_err());
    }

    #[test]
    fn parse_rejects_truncated_records() {
        let frame = v1_frame(0x00, &[&[0x00, 0x00, 0x01, 0xFF]]);
        assert!(HueStreamPacket::parse(&frame).is_err());
    }

    #[test]
    fn uuid_rewrite_only_touches_uuid_bytes() {
        let old = "aaaaaaaa-aaaa-aaaa-aaaa-aaaaaaaaaaaa";
        let new = Uuid::parse_str("bbbbbbbb-bbbb-bbbb-bbbb-bbbbbbbbbbbb").unwrap();
        let frame = v2_frame(
            old,
            &[&[0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66]],
        );

        let out = rewrite_area_uuid(&frame, new).unwrap();

        assert_eq!(out.len(), frame.len());
        assert_eq!(out[..16], frame[..16]);
        assert_eq!(&out[16..52], new.hyphenated().to_string().as_bytes());
        assert_eq!(out[52..], frame[52..]);
    }

    #[test]
    fn uuid_rewrite_skips_matching_and_v1_frames() {
        let area = Uuid::parse_str("01234567-89ab-cdef-0123-456789abcdef").unwrap();
        let matching = v2_frame(&area.hyphenated().to_string(), &[]);
        assert!(rewrite_area_uuid(&matching, area).is_none());

        let v1 = v1_frame(0x00, &[]);
        assert!(rewrite_area_uuid(&v1, area).is_none());
    }

    #[test]
    fn channel_remap_drops_and_renumbers() {
        let area = "01234567-89ab-cdef-0123-456789abcdef";
        let frame = v2_frame(
            area,
            &[
                &[0x00, 0x10, 0x00, 0x20, 0x00, 0x30, 0x00],
                &[0x01, 0x11, 0x00, 0x21, 0x00, 0x31, 0x00],
                &[0x02, 0x12, 0x00, 0x22, 0x00, 0x32, 0x00],
                &[0x03, 0x13, 0x00, 0x23, 0x00, 0x33, 0x00],
            ],
        );

        // channel 1 is not a hue light; drop it and compact the rest
        let map = BTreeMap::from([(0, 0), (2, 1), (3, 2)]);
        let out = remap_channels(&frame, &map).unwrap();

        assert_eq!(out.len(), V2_HEADER_SIZE + 3 * V2_RECORD_SIZE);
        assert_eq!(out[..V2_HEADER_SIZE], frame[..V2_HEADER_SIZE]);

        let records: Vec<_> = out[V2_HEADER_SIZE..].chunks_exact(V2_RECORD_SIZE).collect();
        assert_eq!(records[0][0], 0);
        assert_eq!(records[1][0], 1);
        assert_eq!(records[2][0], 2);

        // payloads travel with their records
        assert_eq!(records[1][1], 0x12);
        assert_eq!(records[2][1], 0x13);
    }

    #[test]
    fn rgb16_to_xy() {
        let rgb16 = Rgb16 {
            r: 0xFFFF,
            g: 0xFFFF,
            b: 0xFFFF,
        };

        let (_, bri) = rgb16.to_xy();
        compare!(bri, 255.0);
    }

    #[test]
    fn xy16_brightness_takes_high_byte() {
        let xy16 = Xy16 {
            x: 0x8000,
            y: 0xFFFF,
            b: 0xC8FF,
        };

        assert_eq!(xy16.brightness(), 0xC8);
    }
}
