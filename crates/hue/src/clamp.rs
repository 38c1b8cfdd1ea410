pub trait Clamp {
    fn unit_to_u8_clamped(self) -> u8;
    fn unit_to_bri_clamped(self) -> u8;
    fn unit_from_u8(value: u8) -> Self;
}

impl Clamp for f64 {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn unit_to_u8_clamped(self) -> u8 {
        (self * 255.0).clamp(0.0, 255.0) as u8
    }

    /// Hue brightness is 1..=254, never zero while a light is on.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn unit_to_bri_clamped(self) -> u8 {
        self.mul_add(253.0, 1.0).clamp(1.0, 254.0) as u8
    }

    fn unit_from_u8(value: u8) -> Self {
        Self::from(value) / 255.0
    }
}

#[cfg(test)]
mod tests {
    use crate::clamp::Clamp;

    #[test]
    fn unit_to_u8() {
        assert_eq!(0.0_f64.unit_to_u8_clamped(), 0);
        assert_eq!(1.0_f64.unit_to_u8_clamped(), 255);
        assert_eq!(2.0_f64.unit_to_u8_clamped(), 255);
        assert_eq!((-1.0_f64).unit_to_u8_clamped(), 0);
    }

    #[test]
    fn bri_never_zero() {
        assert_eq!(0.0_f64.unit_to_bri_clamped(), 1);
        assert_eq!(1.0_f64.unit_to_bri_clamped(), 254);
        assert_eq!((-0.5_f64).unit_to_bri_clamped(), 1);
    }

    #[test]
    fn u8_roundtrip() {
        for v in [0u8, 1, 127, 254, 255] {
            assert_eq!(f64::unit_from_u8(v).unit_to_u8_clamped(), v);
        }
    }
}
