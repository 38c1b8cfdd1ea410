pub mod uuid_map;

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use hue::api::{HueStreamKey, Position, ResourceLink, gradient_positions};

use crate::config::UpstreamHueConfig;
use crate::error::{ApiError, ApiResult};
use crate::resource::{EntertainmentGroup, HueDeviceConfig, Light};
use crate::upstream::uuid_map::UuidMapper;

const HTTP_TIMEOUT: Duration = Duration::from_secs(3);

/// v1 group record as returned by `GET /api/{user}/groups`
#[derive(Debug, Clone, Deserialize)]
pub struct V1Group {
    pub name: String,
    #[serde(rename = "type")]
    pub group_type: String,
    pub lights: Vec<String>,
}

/// v2 entertainment configuration summary from the CLIP api
#[derive(Debug, Clone, Deserialize)]
pub struct EntConfigSummary {
    pub id: Uuid,
    pub metadata: EntConfigMetadata,
    #[serde(default)]
    pub light_services: Vec<ResourceLink>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EntConfigMetadata {
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct ClipResponse<T> {
    data: Vec<T>,
}

#[derive(Debug, Serialize)]
pub struct ServiceLocationsPatch {
    pub service_locations: Vec<ServiceLocationPatch>,
}

#[derive(Debug, Serialize)]
pub struct ServiceLocationPatch {
    pub service: ResourceLink,
    pub positions: Vec<Position>,
}

/// Client for the upstream (real) hue bridge consumed by the stream
/// splitter: v1 group bookkeeping, stream activation, and CLIP v2
/// entertainment configuration lookups.
pub struct UpstreamBridge {
    ip: Ipv4Addr,
    user: String,
    key: HueStreamKey,
    http: reqwest::Client,
    https: reqwest::Client,
}

impl UpstreamBridge {
    pub fn new(cfg: &UpstreamHueConfig) -> ApiResult<Self> {
        let http = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;

        // the bridge's https endpoint uses a self-signed certificate
        let https = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .danger_accept_invalid_certs(true)
            .build()?;

        let key = cfg.hue_client_key.map_or_else(
            || HueStreamKey::try_from(cfg.hue_user.as_str()),
            Ok,
        );

        Ok(Self {
            ip: cfg.ip,
            user: cfg.hue_user.clone(),
            key: key.map_err(|_| {
                ApiError::UpstreamRejected("no usable client key for upstream bridge".to_string())
            })?,
            http,
            https,
        })
    }

    #[must_use]
    pub const fn ip(&self) -> Ipv4Addr {
        self.ip
    }

    #[must_use]
    pub fn identity(&self) -> (String, HueStreamKey) {
        (self.user.clone(), self.key)
    }

    fn v1_url(&self, path: &str) -> String {
        format!("http://{}/api/{}/{path}", self.ip, self.user)
    }

    pub async fn get_groups(&self) -> ApiResult<BTreeMap<String, V1Group>> {
        let res = self.http.get(self.v1_url("groups")).send().await?;
        Ok(res.json().await?)
    }

    pub async fn create_entertainment_group(
        &self,
        name: &str,
        lights: &[String],
    ) -> ApiResult<u32> {
        let body = json!({
            "name": name,
            "type": "Entertainment",
            "class": "TV",
            "lights": lights,
        });

        let res: Value = self
            .http
            .post(self.v1_url("groups"))
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        res.as_array()
            .and_then(|items| items.first())
            .and_then(|item| item.pointer("/success/id"))
            .and_then(Value::as_str)
            .and_then(|id| id.parse().ok())
            .ok_or_else(|| ApiError::UpstreamRejected(format!("group create failed: {res}")))
    }

    pub async fn set_group_locations(
        &self,
        group_id: u32,
        locations: &BTreeMap<String, [f64; 3]>,
    ) -> ApiResult<()> {
        if locations.is_empty() {
            return Ok(());
        }

        let body = json!({"locations": locations});
        self.http
            .put(self.v1_url(&format!("groups/{group_id}")))
            .json(&body)
            .send()
            .await?;
        Ok(())
    }

    /// Toggle streaming on the upstream group. An ambiguous activation
    /// response is treated as success; a dead stream will surface as
    /// client errors and downgrade the splitter later.
    pub async fn set_stream_active(&self, group_id: u32, active: bool) -> ApiResult<()> {
        let body = if active {
            json!({
                "stream": {
                    "active": true,
                    "owner": self.user,
                    "proxymode": "auto",
                    "proxynode": "/bridge",
                }
            })
        } else {
            json!({"stream": {"active": false}})
        };

        let res = self
            .http
            .put(self.v1_url(&format!("groups/{group_id}")))
            .json(&body)
            .send()
            .await?;

        if !res.status().is_success() {
            return Err(ApiError::UpstreamRejected(format!(
                "stream.active={active} returned {}",
                res.status()
            )));
        }

        let reply: Value = res.json().await.unwrap_or(Value::Null);
        log::debug!("upstream stream.active={active} reply: {reply}");
        Ok(())
    }

    pub async fn entertainment_configurations(&self) -> ApiResult<Vec<EntConfigSummary>> {
        let url = format!(
            "https://{}/clip/v2/resource/entertainment_configuration",
            self.ip
        );

        let res: ClipResponse<EntConfigSummary> = self
            .https
            .get(url)
            .header("hue-application-key", &self.user)
            .send()
            .await?
            .json()
            .await?;

        Ok(res.data)
    }

    pub async fn patch_positions(
        &self,
        config_id: Uuid,
        patch: &ServiceLocationsPatch,
    ) -> ApiResult<()> {
        if patch.service_locations.is_empty() {
            return Ok(());
        }

        let url = format!(
            "https://{}/clip/v2/resource/entertainment_configuration/{config_id}",
            self.ip
        );

        let res = self
            .https
            .patch(url)
            .header("hue-application-key", &self.user)
            .json(patch)
            .send()
            .await?;

        if !res.status().is_success() {
            log::warn!("positions patch failed with {}", res.status());
        }
        Ok(())
    }

    /// Bring the upstream bridge's entertainment group in line with the
    /// local one, returning `(group id, entertainment uuid)`.
    ///
    /// The uuid cache is authoritative on read but every mapping is
    /// re-verified against the bridge's v2 configuration list, so stale
    /// entries self-heal.
    pub async fn sync_group(
        &self,
        group: &EntertainmentGroup,
        hue_lights: &[(Arc<Light>, HueDeviceConfig)],
        mapper: &UuidMapper,
    ) -> ApiResult<(u32, Uuid)> {
        let configs = self.entertainment_configurations().await?;

        if let Some(mapping) = mapper.get(&group.name) {
            if let Some(group_id) = mapping.bridge_group_id {
                if configs.iter().any(|c| c.id == mapping.bridge_uuid) {
                    log::debug!(
                        "upstream group {:?} already mapped to {}",
                        group.name,
                        mapping.bridge_uuid
                    );
                    return Ok((group_id, mapping.bridge_uuid));
                }
                log::info!("cached upstream uuid for {:?} is stale, resyncing", group.name);
            }
        }

        let upstream_ids: Vec<String> =
            hue_lights.iter().map(|(_, cfg)| cfg.hue_id.clone()).collect();

        let group_id = self.find_or_create_group(&group.name, &upstream_ids).await?;

        let locations: BTreeMap<String, [f64; 3]> = hue_lights
            .iter()
            .filter_map(|(light, cfg)| {
                group
                    .locations
                    .get(&light.id_v1)
                    .map(|pos| (cfg.hue_id.clone(), [pos.x, pos.y, pos.z]))
            })
            .collect();
        self.set_group_locations(group_id, &locations).await?;

        let uuid = configs
            .iter()
            .find(|c| c.metadata.name == group.name)
            .map_or_else(
                || hue::entertainment_area_uuid(&self.ip.to_string(), group_id),
                |c| c.id,
            );

        self.push_positions(uuid, &configs, group, hue_lights).await;

        mapper.add_mapping(&group.name, group.id_v2, uuid, Some(group_id))?;

        Ok((group_id, uuid))
    }

    async fn find_or_create_group(
        &self,
        name: &str,
        upstream_ids: &[String],
    ) -> ApiResult<u32> {
        let groups = self.get_groups().await?;

        for (id, grp) in &groups {
            if grp.name == name
                && grp.group_type == "Entertainment"
                && upstream_ids.iter().all(|lid| grp.lights.contains(lid))
            {
                if let Ok(id) = id.parse() {
                    log::debug!("found matching upstream entertainment group {id}");
                    return Ok(id);
                }
            }
        }

        log::info!("creating upstream entertainment group {name:?}");
        self.create_entertainment_group(name, upstream_ids).await
    }

    /// Best-effort positions patch; gradient strips contribute seven
    /// derived per-segment positions.
    async fn push_positions(
        &self,
        config_id: Uuid,
        configs: &[EntConfigSummary],
        group: &EntertainmentGroup,
        hue_lights: &[(Arc<Light>, HueDeviceConfig)],
    ) {
        let Some(config) = configs.iter().find(|c| c.id == config_id) else {
            return;
        };

        let service_locations: Vec<ServiceLocationPatch> = config
            .light_services
            .iter()
            .zip(hue_lights)
            .map(|(service, (light, _))| {
                let positions = if light.is_gradient() {
                    gradient_positions(light.orientation.unwrap_or_default()).to_vec()
                } else {
                    vec![group.locations.get(&light.id_v1).copied().unwrap_or_default()]
                };

                ServiceLocationPatch {
                    service: *service,
                    positions,
                }
            })
            .collect();

        let patch = ServiceLocationsPatch { service_locations };
        if let Err(err) = self.patch_positions(config_id, &patch).await {
            log::debug!("positions patch skipped: {err}");
        }
    }
}
