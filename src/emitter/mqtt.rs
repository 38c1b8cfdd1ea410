use std::time::Duration;

use rumqttc::{AsyncClient, MqttOptions, QoS};
use serde_json::json;

use hue::xy::XY;

use crate::config::MqttConfig;

/// One publish, built during bucketing with the gate decision already
/// applied.
#[derive(Debug, Clone)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: String,
}

#[must_use]
pub fn brightness_payload(bri: u8) -> String {
    json!({"brightness": bri, "transition": 0.2}).to_string()
}

#[must_use]
pub fn color_payload(xy: XY) -> String {
    json!({"color": {"x": xy.x, "y": xy.y}, "transition": 0.15}).to_string()
}

pub struct MqttEmitter {
    client: AsyncClient,
    eventloop: tokio::task::JoinHandle<()>,
}

impl MqttEmitter {
    pub fn new(cfg: &MqttConfig) -> Self {
        let mut options = MqttOptions::new("prisma-entertainment", &cfg.host, cfg.port);
        options.set_keep_alive(Duration::from_secs(30));

        if let (Some(user), Some(pass)) = (&cfg.username, &cfg.password) {
            options.set_credentials(user, pass);
        }

        let (client, mut eventloop) = AsyncClient::new(options, 16);

        let eventloop = tokio::spawn(async move {
            loop {
                if let Err(err) = eventloop.poll().await {
                    log::debug!("mqtt event loop error: {err}");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        });

        Self { client, eventloop }
    }

    #[must_use]
    pub fn client(&self) -> AsyncClient {
        self.client.clone()
    }
}

impl Drop for MqttEmitter {
    fn drop(&mut self) {
        self.eventloop.abort();
    }
}

/// Publish the frame's batch; a broker hiccup costs one frame, not the
/// session.
pub async fn publish_batch(client: AsyncClient, messages: Vec<MqttMessage>) {
    for msg in messages {
        if let Err(err) = client
            .publish(msg.topic, QoS::AtMostOnce, false, msg.payload)
            .await
        {
            log::debug!("mqtt publish failed: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use hue::xy::XY;

    use crate::emitter::mqtt::{brightness_payload, color_payload};

    #[test]
    fn brightness_payload_shape() {
        let parsed: serde_json::Value =
            serde_json::from_str(&brightness_payload(200)).unwrap();
        assert_eq!(parsed["brightness"], 200);
        assert!((parsed["transition"].as_f64().unwrap() - 0.2).abs() < 1e-9);
    }

    #[test]
    fn color_payload_shape() {
        let parsed: serde_json::Value =
            serde_json::from_str(&color_payload(XY::new(0.31, 0.32))).unwrap();
        assert!((parsed["color"]["x"].as_f64().unwrap() - 0.31).abs() < 1e-9);
        assert!((parsed["color"]["y"].as_f64().unwrap() - 0.32).abs() < 1e-9);
        assert!((parsed["transition"].as_f64().unwrap() - 0.15).abs() < 1e-9);
    }
}
