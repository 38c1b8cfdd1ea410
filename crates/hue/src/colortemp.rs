/// Kelvin range accepted by LIFX HSBK colors
pub const KELVIN_MIN: u16 = 1500;
pub const KELVIN_MAX: u16 = 9000;

/// Mirek range reported by Hue color-temperature lights
pub const MIREK_MIN: u16 = 153;
pub const MIREK_MAX: u16 = 500;

#[must_use]
pub fn clamp_kelvin(kelvin: u32) -> u16 {
    u16::try_from(kelvin.clamp(u32::from(KELVIN_MIN), u32::from(KELVIN_MAX)))
        .unwrap_or(KELVIN_MAX)
}

#[must_use]
pub fn kelvin_to_mirek(kelvin: u32) -> u16 {
    let mirek = 1_000_000 / u32::from(clamp_kelvin(kelvin)).max(1);
    u16::try_from(mirek.clamp(u32::from(MIREK_MIN), u32::from(MIREK_MAX))).unwrap_or(MIREK_MAX)
}

#[must_use]
pub fn mirek_to_kelvin(mirek: u16) -> u16 {
    let mirek = mirek.clamp(MIREK_MIN, MIREK_MAX);
    clamp_kelvin(1_000_000 / u32::from(mirek))
}

#[cfg(test)]
mod tests {
    use crate::colortemp::{kelvin_to_mirek, mirek_to_kelvin};

    #[test]
    fn kelvin_clamps_to_lifx_range() {
        assert_eq!(mirek_to_kelvin(500), 2000);
        assert_eq!(mirek_to_kelvin(1000), 2000);
        // 153 mirek is 6535 K, comfortably inside the LIFX range
        assert_eq!(mirek_to_kelvin(153), 6535);
        assert_eq!(mirek_to_kelvin(0), 6535);
    }

    #[test]
    fn mirek_clamps_to_hue_range() {
        assert_eq!(kelvin_to_mirek(2000), 500);
        assert_eq!(kelvin_to_mirek(100), 500);
        assert_eq!(kelvin_to_mirek(9000), 153);
        assert_eq!(kelvin_to_mirek(100_000), 153);
    }

    #[test]
    fn middle_of_range_roundtrips() {
        assert_eq!(mirek_to_kelvin(kelvin_to_mirek(4000)), 4000);
    }
}
