/// Emitter for diy bulbs speaking the native udp protocol: a single
/// datagram of 4-byte `[segment, r, g, b]` records on port 2100.
pub const UDP_PORT: u16 = 2100;

#[derive(Debug, Default, Clone)]
pub struct NativeAccumulator {
    segments: Vec<(u8, [u8; 3])>,
}

impl NativeAccumulator {
    /// Record a color for one segment. The last record for a segment
    /// within a frame wins, but keeps its original position so record
    /// order is stable across frames.
    pub fn set(&mut self, segment: u8, rgb: [u8; 3]) {
        if let Some(entry) = self.segments.iter_mut().find(|(idx, _)| *idx == segment) {
            entry.1 = rgb;
        } else {
            self.segments.push((segment, rgb));
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    #[must_use]
    pub fn datagram(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.segments.len() * 4);
        for (idx, [r, g, b]) in &self.segments {
            out.extend_from_slice(&[*idx, *r, *g, *b]);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use crate::emitter::native::NativeAccumulator;

    #[test]
    fn records_are_four_bytes_in_insertion_order() {
        let mut acc = NativeAccumulator::default();
        acc.set(2, [10, 20, 30]);
        acc.set(0, [1, 2, 3]);

        assert_eq!(acc.datagram(), vec![2, 10, 20, 30, 0, 1, 2, 3]);
    }

    #[test]
    fn later_record_overwrites_in_place() {
        let mut acc = NativeAccumulator::default();
        acc.set(1, [10, 20, 30]);
        acc.set(3, [0, 0, 0]);
        acc.set(1, [99, 98, 97]);

        assert_eq!(acc.datagram(), vec![1, 99, 98, 97, 3, 0, 0, 0]);
    }
}
