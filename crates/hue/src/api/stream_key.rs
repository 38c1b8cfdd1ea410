use serde::{Deserialize, Serialize};

use crate::error::{HueError, HueResult};

/// The 128-bit pre-shared key used to authenticate an entertainment
/// session. Exposed to api clients as a 32-character hex string
/// (`clientkey`), and fed to the DTLS layer as raw bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HueStreamKey {
    key: [u8; Self::BYTE_SIZE],
}

impl HueStreamKey {
    const BYTE_SIZE: usize = 16;
    const HEX_SIZE: usize = Self::BYTE_SIZE * 2;

    #[must_use]
    pub const fn new(key: [u8; Self::BYTE_SIZE]) -> Self {
        Self { key }
    }

    /// Number of raw key bytes, as reported to the DTLS psk callback
    pub const SIZE: usize = Self::BYTE_SIZE;

    pub fn write_to_slice(&self, out: &mut [u8]) -> HueResult<()> {
        if out.len() < Self::BYTE_SIZE {
            return Err(HueError::InvalidStreamKey);
        }
        out[..Self::BYTE_SIZE].copy_from_slice(&self.key);
        Ok(())
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.key)
    }
}

impl AsRef<[u8]> for HueStreamKey {
    fn as_ref(&self) -> &[u8] {
        &self.key
    }
}

impl TryFrom<&str> for HueStreamKey {
    type Error = HueError;

    fn try_from(value: &str) -> HueResult<Self> {
        if value.len() != Self::HEX_SIZE {
            return Err(HueError::InvalidStreamKey);
        }
        let mut key = [0u8; Self::BYTE_SIZE];
        hex::decode_to_slice(value, &mut key).map_err(|_| HueError::InvalidStreamKey)?;
        Ok(Self { key })
    }
}

impl Serialize for HueStreamKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for HueStreamKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::try_from(text.as_str()).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use crate::api::HueStreamKey;

    #[test]
    fn parses_32_hex_chars() {
        let key = HueStreamKey::try_from("000102030405060708090a0b0c0d0e0f").unwrap();
        assert_eq!(key.as_ref()[0], 0x00);
        assert_eq!(key.as_ref()[15], 0x0F);
        assert_eq!(key.to_hex(), "000102030405060708090A0B0C0D0E0F");
    }

    #[test]
    fn rejects_wrong_length_and_non_hex() {
        assert!(HueStreamKey::try_from("abcd").is_err());
        assert!(HueStreamKey::try_from("zz0102030405060708090a0b0c0d0e0f").is_err());
    }

    #[test]
    fn writes_raw_psk() {
        let key = HueStreamKey::try_from("ffeeddccbbaa99887766554433221100").unwrap();
        let mut psk = [0u8; 32];
        key.write_to_slice(&mut psk).unwrap();
        assert_eq!(psk[0], 0xFF);
        assert_eq!(psk[15], 0x00);
        assert_eq!(psk[16], 0x00);
    }
}
