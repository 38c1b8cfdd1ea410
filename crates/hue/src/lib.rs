pub mod api;
pub mod clamp;
pub mod colorspace;
pub mod colortemp;
pub mod error;
pub mod stream;
pub mod xy;

use uuid::Uuid;

pub const WIDE_GAMUT_MAX_X: f64 = 0.7347;
pub const WIDE_GAMUT_MAX_Y: f64 = 0.8264;

/// Derive the stable v2 uuid for an entertainment group on a given bridge.
///
/// Both sides of a stream split must agree on this identity, so it is
/// derived from the bridge address and the group id, not generated.
#[must_use]
pub fn entertainment_area_uuid(bridge_ip: &str, group_id: u32) -> Uuid {
    let url = format!("hue://{bridge_ip}/groups/{group_id}");
    Uuid::new_v5(&Uuid::NAMESPACE_URL, url.as_bytes())
}

#[macro_export]
macro_rules! compare_float {
    ($expr:expr, $value:expr, $tolerance:expr) => {
        let a = $expr;
        let b = $value;
        eprintln!("{a} vs {b:.4}");
        assert!((a - b).abs() < $tolerance);
    };
}

#[macro_export]
macro_rules! compare {
    ($expr:expr, $value:expr) => {
        $crate::compare_float!($expr, $value, 1e-4);
    };
}

#[macro_export]
macro_rules! compare_xy {
    ($expr:expr, $value:expr) => {
        let a = $expr;
        let b = $value;
        $crate::compare!(a.x, b.x);
        $crate::compare!(a.y, b.y);
    };
}

#[cfg(test)]
mod tests {
    use crate::entertainment_area_uuid;

    #[test]
    fn area_uuid_is_stable() {
        let a = entertainment_area_uuid("192.168.1.2", 200);
        let b = entertainment_area_uuid("192.168.1.2", 200);
        let c = entertainment_area_uuid("192.168.1.3", 200);

        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
