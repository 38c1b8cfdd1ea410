use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast::{Receiver, Sender};
use uuid::Uuid;

use hue::api::{EntertainmentStreamState, GradientOrientation, HueStreamKey, Position};
use hue::xy::XY;

use crate::error::{ApiError, ApiResult};

/// Models that expose multiple addressable gradient segments
pub const GRADIENT_MODELS: &[&str] = &[
    "LCX001",
    "LCX002",
    "LCX003",
    "915005987201",
    "LCX004",
    "LCX006",
];

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceProtocol {
    Native,
    Esphome,
    Wled,
    Yeelight,
    Lifx,
    Mqtt,
    /// Lights that live on an upstream (real) hue bridge; the stream
    /// splitter forwards to these, emitters skip them.
    Hue,
    HomeassistantWs,
    /// Anything without a udp-friendly path; served by the rest
    /// fallback at a reduced rate.
    #[serde(other)]
    Other,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifxDeviceClass {
    Color,
    Multizone,
    Matrix,
}

/// Typed per-protocol device configuration.
///
/// The registry stores the raw map as delivered by the api layer; the
/// channel resolver validates it into one of these at session start.
#[derive(Clone, Debug, PartialEq)]
pub enum DeviceConfig {
    Native(NativeConfig),
    Esphome(EsphomeConfig),
    Wled(WledConfig),
    Yeelight(YeelightDeviceConfig),
    Lifx(LifxConfigEntry),
    Mqtt(MqttDeviceConfig),
    Hue(HueDeviceConfig),
    Homeassistant(HassDeviceConfig),
    Other,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct NativeConfig {
    pub ip: Ipv4Addr,
    #[serde(default = "default_light_nr")]
    pub light_nr: u8,
}

const fn default_light_nr() -> u8 {
    1
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct EsphomeConfig {
    pub ip: Ipv4Addr,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct WledConfig {
    pub ip: Ipv4Addr,
    #[serde(default = "default_wled_port")]
    pub udp_port: u16,
    #[serde(default)]
    pub segment_start: u16,
    pub segment_stop: u16,
    #[serde(default)]
    pub points_capable: u8,
}

const fn default_wled_port() -> u16 {
    21324
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct YeelightDeviceConfig {
    pub ip: Ipv4Addr,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct LifxConfigEntry {
    pub ip: Ipv4Addr,
    /// Device mac, used as the unicast frame target
    pub mac: Option<String>,
    pub class: LifxDeviceClass,
    #[serde(default)]
    pub points_capable: u8,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct MqttDeviceConfig {
    pub command_topic: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct HueDeviceConfig {
    pub ip: Ipv4Addr,
    /// The light's id on the upstream bridge
    pub hue_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct HassDeviceConfig {
    pub entity_id: String,
}

impl DeviceConfig {
    /// Validate the opaque config map against the light's protocol tag.
    pub fn from_value(light: &Light) -> ApiResult<Self> {
        fn typed<T: serde::de::DeserializeOwned>(light: &Light) -> ApiResult<T> {
            serde_json::from_value(light.protocol_cfg.clone())
                .map_err(|_| ApiError::InvalidProtocolConfig(light.id_v1, light.protocol_name()))
        }

        match light.protocol {
            DeviceProtocol::Native => Ok(Self::Native(typed(light)?)),
            DeviceProtocol::Esphome => Ok(Self::Esphome(typed(light)?)),
            DeviceProtocol::Wled => Ok(Self::Wled(typed(light)?)),
            DeviceProtocol::Yeelight => Ok(Self::Yeelight(typed(light)?)),
            DeviceProtocol::Lifx => Ok(Self::Lifx(typed(light)?)),
            DeviceProtocol::Mqtt => Ok(Self::Mqtt(typed(light)?)),
            DeviceProtocol::Hue => Ok(Self::Hue(typed(light)?)),
            DeviceProtocol::HomeassistantWs => Ok(Self::Homeassistant(typed(light)?)),
            DeviceProtocol::Other => Ok(Self::Other),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorMode {
    Xy,
    Ct,
    Hs,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LightMode {
    Homeautomation,
    Streaming,
}

#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
pub struct LightState {
    pub on: bool,
    pub bri: u8,
    pub xy: XY,
    pub colormode: ColorMode,
    pub mode: LightMode,
}

impl Default for LightState {
    fn default() -> Self {
        Self {
            on: false,
            bri: 254,
            xy: XY::D65_WHITE_POINT,
            colormode: ColorMode::Xy,
            mode: LightMode::Homeautomation,
        }
    }
}

#[derive(Debug)]
pub struct Light {
    pub id_v1: u32,
    pub id_v2: Uuid,
    pub uniqueid: String,
    pub name: String,
    pub modelid: String,
    pub protocol: DeviceProtocol,
    /// Opaque per-device map; validated by the resolver at session start
    pub protocol_cfg: Value,
    pub orientation: Option<GradientOrientation>,
    state: Mutex<LightState>,
}

impl Light {
    #[must_use]
    pub fn new(
        id_v1: u32,
        name: impl Into<String>,
        modelid: impl Into<String>,
        protocol: DeviceProtocol,
        protocol_cfg: Value,
    ) -> Self {
        let name = name.into();
        let uniqueid = format!("00:17:88:01:00:{id_v1:02x}:{id_v1:02x}:{id_v1:02x}-0b");
        Self {
            id_v1,
            id_v2: Uuid::new_v4(),
            uniqueid,
            name,
            modelid: modelid.into(),
            protocol,
            protocol_cfg,
            orientation: None,
            state: Mutex::new(LightState::default()),
        }
    }

    #[must_use]
    pub const fn protocol_name(&self) -> &'static str {
        match self.protocol {
            DeviceProtocol::Native => "native",
            DeviceProtocol::Esphome => "esphome",
            DeviceProtocol::Wled => "wled",
            DeviceProtocol::Yeelight => "yeelight",
            DeviceProtocol::Lifx => "lifx",
            DeviceProtocol::Mqtt => "mqtt",
            DeviceProtocol::Hue => "hue",
            DeviceProtocol::HomeassistantWs => "homeassistant_ws",
            DeviceProtocol::Other => "other",
        }
    }

    #[must_use]
    pub fn is_gradient(&self) -> bool {
        GRADIENT_MODELS.contains(&self.modelid.as_str())
    }

    #[must_use]
    pub fn state(&self) -> LightState {
        *self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn update_state(&self, f: impl FnOnce(&mut LightState)) {
        let mut guard = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&mut guard);
    }
}

#[derive(Debug, Clone)]
pub struct EntertainmentGroup {
    pub id_v1: u32,
    pub id_v2: Uuid,
    pub name: String,
    /// Channel order: one entry per channel, lights repeated once per
    /// gradient segment. Stable for the lifetime of a session.
    pub channels: Vec<u32>,
    pub stream: EntertainmentStreamState,
    pub locations: BTreeMap<u32, Position>,
    /// Upstream linkage, filled in by the splitter's group sync
    pub upstream_group_id: Option<u32>,
    pub upstream_uuid: Option<Uuid>,
}

impl EntertainmentGroup {
    #[must_use]
    pub fn new(id_v1: u32, name: impl Into<String>, channels: Vec<u32>) -> Self {
        Self {
            id_v1,
            id_v2: Uuid::new_v4(),
            name: name.into(),
            channels,
            stream: EntertainmentStreamState::default(),
            locations: BTreeMap::new(),
            upstream_group_id: None,
            upstream_uuid: None,
        }
    }

    /// Distinct member lights, in channel order
    #[must_use]
    pub fn member_lights(&self) -> Vec<u32> {
        let mut seen = Vec::new();
        for id in &self.channels {
            if !seen.contains(id) {
                seen.push(*id);
            }
        }
        seen
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiUser {
    pub username: String,
    pub name: String,
    pub client_key: HueStreamKey,
    pub last_use_date: DateTime<Utc>,
}

impl ApiUser {
    const STREAMING_HINTS: &[&str] = &["sync", "tv", "box", "entertain"];

    /// Entertainment sources (sync boxes, tv apps) register with
    /// recognizable names; those keys are the ones a client will
    /// actually be streaming with.
    #[must_use]
    pub fn looks_like_streaming_client(&self) -> bool {
        let name = self.name.to_lowercase();
        Self::STREAMING_HINTS.iter().any(|hint| name.contains(hint))
    }
}

/// Request sent to the external rest collaborator (and consumed by the
/// entertainment supervisor for session control).
#[derive(Debug, Clone)]
pub enum BackendRequest {
    EntertainmentStart(u32),
    EntertainmentStop(u32),
    LightSet {
        light: u32,
        update: FallbackUpdate,
    },
}

/// State delta for the non-udp fallback path. Only the changed field is
/// present, with a short transition to mask the reduced update rate.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct FallbackUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bri: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xy: Option<XY>,
    pub transitiontime: u8,
}

#[derive(Debug)]
pub struct Resources {
    lights: BTreeMap<u32, Arc<Light>>,
    groups: BTreeMap<u32, EntertainmentGroup>,
    users: BTreeMap<String, ApiUser>,
    backend_updates: Sender<Arc<BackendRequest>>,
}

impl Resources {
    const BACKEND_BUFFER_SIZE: usize = 32;

    #[allow(clippy::new_without_default)]
    #[must_use]
    pub fn new() -> Self {
        Self {
            lights: BTreeMap::new(),
            groups: BTreeMap::new(),
            users: BTreeMap::new(),
            backend_updates: Sender::new(Self::BACKEND_BUFFER_SIZE),
        }
    }

    pub fn add_light(&mut self, light: Light) {
        self.lights.insert(light.id_v1, Arc::new(light));
    }

    pub fn add_group(&mut self, group: EntertainmentGroup) {
        self.groups.insert(group.id_v1, group);
    }

    pub fn add_user(&mut self, user: ApiUser) {
        self.users.insert(user.username.clone(), user);
    }

    pub fn light(&self, id: u32) -> ApiResult<Arc<Light>> {
        self.lights.get(&id).cloned().ok_or(ApiError::LightNotFound(id))
    }

    pub fn group(&self, id: u32) -> ApiResult<&EntertainmentGroup> {
        self.groups.get(&id).ok_or(ApiError::GroupNotFound(id))
    }

    pub fn group_mut(&mut self, id: u32) -> ApiResult<&mut EntertainmentGroup> {
        self.groups.get_mut(&id).ok_or(ApiError::GroupNotFound(id))
    }

    pub fn user(&self, username: &str) -> Option<&ApiUser> {
        self.users.get(username)
    }

    /// Pick the psk identity for a streaming session: users that look
    /// like entertainment sources rank first, most recently used wins.
    /// The session owner is only a last resort, for registries without
    /// a single usable client.
    pub fn streaming_user(&self, owner: Option<&str>) -> ApiResult<&ApiUser> {
        self.users
            .values()
            .max_by_key(|user| (user.looks_like_streaming_client(), user.last_use_date))
            .or_else(|| owner.and_then(|name| self.users.get(name)))
            .ok_or(ApiError::NoStreamingUser)
    }

    #[must_use]
    pub fn backend_event_stream(&self) -> Receiver<Arc<BackendRequest>> {
        self.backend_updates.subscribe()
    }

    pub fn backend_request(&self, req: BackendRequest) {
        if self.backend_updates.send(Arc::new(req)).is_err() {
            log::debug!("No backend listeners for request");
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use hue::api::HueStreamKey;

    use crate::resource::{
        ApiUser, DeviceConfig, DeviceProtocol, EntertainmentGroup, Light, Resources,
    };

    fn user(username: &str, name: &str, day: u32) -> ApiUser {
        ApiUser {
            username: username.to_string(),
            name: name.to_string(),
            client_key: HueStreamKey::new(*b"0123456789abcdef"),
            last_use_date: Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn streaming_user_prefers_sync_clients() {
        let mut res = Resources::new();
        res.add_user(user("aaa", "phone_app#pixel", 20));
        res.add_user(user("bbb", "hue_sync_box", 1));

        let best = res.streaming_user(Some("aaa")).unwrap();
        assert_eq!(best.username, "bbb");
    }

    #[test]
    fn streaming_user_breaks_ties_by_recency() {
        let mut res = Resources::new();
        res.add_user(user("aaa", "Sync on livingroom tv", 3));
        res.add_user(user("bbb", "desktop sync", 7));

        let best = res.streaming_user(None).unwrap();
        assert_eq!(best.username, "bbb");
    }

    #[test]
    fn streaming_user_ignores_owner_when_ranking() {
        let mut res = Resources::new();
        res.add_user(user("aaa", "phone_app#pixel", 1));
        res.add_user(user("bbb", "phone_app#iphone", 9));

        // recency decides even when the owner is another valid user
        let best = res.streaming_user(Some("aaa")).unwrap();
        assert_eq!(best.username, "bbb");
    }

    #[test]
    fn streaming_user_requires_a_user() {
        let res = Resources::new();
        assert!(res.streaming_user(Some("aaa")).is_err());
    }

    #[test]
    fn typed_config_validates_against_protocol() {
        let light = Light::new(
            4,
            "strip",
            "LCX002",
            DeviceProtocol::Wled,
            json!({"ip": "10.0.0.4", "segment_stop": 14, "points_capable": 7}),
        );

        let DeviceConfig::Wled(cfg) = DeviceConfig::from_value(&light).unwrap() else {
            panic!("expected wled config");
        };

        assert_eq!(cfg.segment_start, 0);
        assert_eq!(cfg.segment_stop, 14);
        assert_eq!(cfg.udp_port, 21324);
        assert!(light.is_gradient());
    }

    #[test]
    fn typed_config_rejects_garbage() {
        let light = Light::new(
            5,
            "strip",
            "LCX002",
            DeviceProtocol::Wled,
            json!({"nope": true}),
        );

        assert!(DeviceConfig::from_value(&light).is_err());
    }

    #[test]
    fn member_lights_dedups_in_channel_order() {
        let group = EntertainmentGroup::new(200, "tv", vec![7, 7, 7, 3, 7, 3]);
        assert_eq!(group.member_lights(), vec![7, 3]);
    }
}
