use std::net::Ipv4Addr;

use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, ConfigError};
use serde::{Deserialize, Serialize};
use url::Url;

use hue::api::HueStreamKey;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub name: String,
    /// Advertised host address; handed to yeelight devices for the
    /// music-mode callback and used to derive upstream group uuids.
    pub ipaddress: Ipv4Addr,
    pub entm_port: u16,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Local endpoint carrying decrypted frames while the splitter owns
    /// the dtls termination.
    pub mirror_host: Ipv4Addr,
    pub mirror_port: u16,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct YeelightConfig {
    #[serde(default)]
    pub music: YeelightMusicConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct YeelightMusicConfig {
    pub max_fps: u32,
    pub smooth_ms: u32,
    pub port: u16,
    /// Override the advertised callback address when the bridge address
    /// is not routable from the device's point of view.
    pub host_ip: Option<Ipv4Addr>,
    /// Fail the session when a device cannot enter music mode, instead
    /// of silently falling back to plain tcp commands.
    pub require: bool,
    pub cie_tolerance: Option<f64>,
    pub bri_tolerance: Option<u8>,
}

impl Default for YeelightMusicConfig {
    fn default() -> Self {
        Self {
            max_fps: 60,
            smooth_ms: 20,
            port: 59000,
            host_ip: None,
            require: false,
            cie_tolerance: None,
            bri_tolerance: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LifxConfig {
    pub max_fps: u32,
}

impl Default for LifxConfig {
    fn default() -> Self {
        Self { max_fps: 120 }
    }
}

impl LifxConfig {
    const MIN_FPS: u32 = 30;

    #[must_use]
    pub const fn effective_fps(&self) -> u32 {
        if self.max_fps < Self::MIN_FPS {
            Self::MIN_FPS
        } else {
            self.max_fps
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HomeAssistantConfig {
    pub url: Url,
    pub token: String,
}

/// Credentials for an upstream (real) hue bridge used by the stream
/// splitter.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpstreamHueConfig {
    pub ip: Ipv4Addr,
    pub hue_user: String,
    /// Falls back to `hue_user` when the bridge never disclosed a
    /// separate client key.
    pub hue_client_key: Option<HueStreamKey>,
}

/// Operator overrides for the detected resource profile.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct ProfileOverrides {
    pub max_workers: Option<usize>,
    pub target_fps: Option<u32>,
    pub cie_tolerance: Option<f64>,
    pub bri_tolerance: Option<u8>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PrismaConfig {
    pub uuid_map_file: Utf8PathBuf,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    pub bridge: BridgeConfig,
    pub streaming: StreamingConfig,
    #[serde(default)]
    pub yeelight: YeelightConfig,
    #[serde(default)]
    pub lifx: LifxConfig,
    pub mqtt: Option<MqttConfig>,
    pub homeassistant: Option<HomeAssistantConfig>,
    pub hue: Option<UpstreamHueConfig>,
    #[serde(default)]
    pub profile: ProfileOverrides,
    pub prisma: PrismaConfig,
}

pub fn parse(filename: &Utf8Path) -> Result<AppConfig, ConfigError> {
    let settings = Config::builder()
        .set_default("bridge.name", "Prisma")?
        .set_default("bridge.entm_port", 2100)?
        .set_default("streaming.mirror_host", "127.0.0.1")?
        .set_default("streaming.mirror_port", 2101)?
        .set_default("prisma.uuid_map_file", "uuid_map.json")?
        .add_source(config::File::with_name(filename.as_str()))
        .build()?;

    settings.try_deserialize()
}

#[cfg(test)]
mod tests {
    use crate::config::LifxConfig;

    #[test]
    fn lifx_fps_has_a_floor() {
        assert_eq!(LifxConfig { max_fps: 10 }.effective_fps(), 30);
        assert_eq!(LifxConfig { max_fps: 120 }.effective_fps(), 120);
    }
}
