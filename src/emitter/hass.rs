use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::{SinkExt, StreamExt};
use itertools::Itertools;
use serde_json::json;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use hue::xy::XY;

use crate::config::HomeAssistantConfig;
use crate::error::{ApiError, ApiResult};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One light's target state for this frame
#[derive(Debug, Clone)]
pub struct HassUpdate {
    pub entity_id: String,
    pub on: bool,
    pub bri: u8,
    pub xy: XY,
}

/// Batched light updates over the home assistant websocket api.
///
/// Sync sources usually paint whole zones one color, so the batch
/// groups entities by identical target state and issues one
/// `call_service` per group.
pub struct HassEmitter {
    ws: Arc<tokio::sync::Mutex<WsStream>>,
    next_id: Arc<AtomicU64>,
}

impl HassEmitter {
    pub async fn connect(cfg: &HomeAssistantConfig) -> ApiResult<Self> {
        let (mut ws, _) = connect_async(cfg.url.as_str()).await?;

        // server greets with auth_required; answer with the token
        let _greeting = ws.next().await;
        ws.send(Message::text(
            json!({"type": "auth", "access_token": cfg.token}).to_string(),
        ))
        .await?;

        match ws.next().await {
            Some(Ok(msg)) if msg.to_text().is_ok_and(|t| t.contains("auth_ok")) => {}
            other => {
                log::error!("home assistant auth failed: {other:?}");
                return Err(ApiError::service_error("home assistant auth failed"));
            }
        }

        Ok(Self {
            ws: Arc::new(tokio::sync::Mutex::new(ws)),
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    #[must_use]
    pub fn shared(&self) -> (Arc<tokio::sync::Mutex<WsStream>>, Arc<AtomicU64>) {
        (self.ws.clone(), self.next_id.clone())
    }
}

/// Send the frame's updates; websocket errors cost this frame only.
///
/// Message ids must never repeat on one connection, so exactly one id
/// per group is reserved from the shared counter.
#[allow(clippy::cast_possible_truncation)]
pub async fn send_batch(
    ws: Arc<tokio::sync::Mutex<WsStream>>,
    ids: Arc<AtomicU64>,
    updates: Vec<HassUpdate>,
) {
    let mut socket = ws.lock().await;

    let groups = updates
        .into_iter()
        .into_group_map_by(|upd| (upd.on, upd.bri, quantize(upd.xy)));

    let base_id = ids.fetch_add(groups.len() as u64, Ordering::Relaxed);

    for (idx, ((on, bri, _), members)) in groups.into_iter().enumerate() {
        let entity_ids: Vec<_> = members.iter().map(|m| m.entity_id.clone()).collect();
        let xy = members[0].xy;

        let call = if on {
            json!({
                "id": base_id + idx as u64,
                "type": "call_service",
                "domain": "light",
                "service": "turn_on",
                "service_data": {
                    "entity_id": entity_ids,
                    "brightness": bri,
                    "xy_color": [xy.x, xy.y],
                    "transition": 0.2,
                },
            })
        } else {
            json!({
                "id": base_id + idx as u64,
                "type": "call_service",
                "domain": "light",
                "service": "turn_off",
                "service_data": {"entity_id": entity_ids},
            })
        };

        if let Err(err) = socket.send(Message::text(call.to_string())).await {
            log::debug!("home assistant send failed: {err}");
            return;
        }
    }
}

/// Group key resolution; full f64 equality would defeat the batching
#[allow(clippy::cast_possible_truncation)]
fn quantize(xy: XY) -> (i32, i32) {
    ((xy.x * 1000.0) as i32, (xy.y * 1000.0) as i32)
}

#[cfg(test)]
mod tests {
    use hue::xy::XY;

    use crate::emitter::hass::quantize;

    #[test]
    fn quantize_groups_close_colors() {
        assert_eq!(quantize(XY::new(0.3001, 0.3)), quantize(XY::new(0.3004, 0.3)));
        assert_ne!(quantize(XY::new(0.31, 0.3)), quantize(XY::new(0.33, 0.3)));
    }
}
