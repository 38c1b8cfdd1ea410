pub mod esphome;
pub mod fallback;
pub mod hass;
pub mod lifx;
pub mod mqtt;
pub mod native;
pub mod wled;
pub mod yeelight;

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use futures::StreamExt;
use futures::future::BoxFuture;
use futures::stream;

use crate::config::AppConfig;
use crate::model::pool::{SocketPool, send_datagram};
use crate::model::profile::ProfileSettings;

/// Per-frame work, bucketed by emitter class and destination host.
/// Built by the supervisor while parsing, consumed by `dispatch`.
#[derive(Default)]
pub struct FrameBuckets {
    pub native: HashMap<Ipv4Addr, native::NativeAccumulator>,
    pub esphome: HashMap<Ipv4Addr, esphome::EsphomeAccumulator>,
    pub wled: HashMap<Ipv4Addr, wled::WledAccumulator>,
    pub yeelight: Vec<yeelight::YeelightSample>,
    pub lifx: HashMap<Ipv4Addr, lifx::LifxAccumulator>,
    pub mqtt: Vec<mqtt::MqttMessage>,
    pub hass: Vec<hass::HassUpdate>,
}

/// The session's emitters: per-protocol state plus the socket pool.
///
/// At most one worker touches a given host per frame, so per-host
/// state needs no further synchronization beyond the per-connection
/// mutexes.
pub struct Emitters {
    pool: SocketPool,
    wled: wled::WledEmitter,
    yeelight: yeelight::YeelightEmitter,
    lifx: lifx::LifxEmitter,
    mqtt: Option<mqtt::MqttEmitter>,
    hass: Option<hass::HassEmitter>,
    max_workers: usize,
}

impl Emitters {
    pub async fn start(conf: &AppConfig, settings: &ProfileSettings) -> Self {
        let hass = match &conf.homeassistant {
            Some(cfg) => match hass::HassEmitter::connect(cfg).await {
                Ok(emitter) => Some(emitter),
                Err(err) => {
                    log::warn!("home assistant unavailable for this session: {err}");
                    None
                }
            },
            None => None,
        };

        Self {
            pool: SocketPool::new(settings.udp_send_buffer),
            wled: wled::WledEmitter::new(settings.enable_smoothing),
            yeelight: yeelight::YeelightEmitter::new(
                conf.yeelight.music.clone(),
                conf.bridge.ipaddress,
            ),
            lifx: lifx::LifxEmitter::new(conf.lifx.effective_fps()),
            mqtt: conf.mqtt.as_ref().map(mqtt::MqttEmitter::new),
            hass,
            max_workers: settings.max_workers.clamp(1, 8),
        }
    }

    /// Fan one frame out to every involved host through the bounded
    /// worker pool. Individual send failures are logged and the
    /// emitter is skipped for the rest of the frame.
    pub async fn dispatch(&mut self, buckets: FrameBuckets) {
        let mut jobs: Vec<BoxFuture<'static, ()>> = Vec::new();

        for (host, acc) in buckets.native {
            if acc.is_empty() {
                continue;
            }
            let Ok(socket) = self.pool.get(IpAddr::V4(host)).await else {
                continue;
            };
            jobs.push(Box::pin(async move {
                let addr = SocketAddr::new(IpAddr::V4(host), native::UDP_PORT);
                send_datagram(&socket, addr, &acc.datagram());
            }));
        }

        for (host, acc) in buckets.esphome {
            let Ok(socket) = self.pool.get(IpAddr::V4(host)).await else {
                continue;
            };
            jobs.push(Box::pin(async move {
                let addr = SocketAddr::new(IpAddr::V4(host), esphome::UDP_PORT);
                send_datagram(&socket, addr, &acc.datagram());
            }));
        }

        for (host, acc) in buckets.wled {
            let Ok(socket) = self.pool.get(IpAddr::V4(host)).await else {
                continue;
            };
            // previous-pixel state is single-writer; build serially,
            // ship concurrently
            let datagram = self.wled.build_datagram(host, &acc);
            let port = acc.udp_port;
            jobs.push(Box::pin(async move {
                send_datagram(&socket, SocketAddr::new(IpAddr::V4(host), port), &datagram);
            }));
        }

        for sample in buckets.yeelight {
            if let Some(job) = self.yeelight.prepare(sample) {
                jobs.push(job);
            }
        }

        for (host, acc) in buckets.lifx {
            let Some(packets) = self.lifx.build_packets(&acc) else {
                continue;
            };
            let Ok(socket) = self.pool.get(IpAddr::V4(host)).await else {
                continue;
            };
            jobs.push(Box::pin(async move {
                let addr = SocketAddr::new(IpAddr::V4(host), lifx::UDP_PORT);
                for packet in packets {
                    send_datagram(&socket, addr, &packet);
                }
            }));
        }

        if !buckets.mqtt.is_empty() {
            if let Some(emitter) = &self.mqtt {
                let client = emitter.client();
                let messages = buckets.mqtt;
                jobs.push(Box::pin(mqtt::publish_batch(client, messages)));
            }
        }

        if !buckets.hass.is_empty() {
            if let Some(emitter) = &self.hass {
                let (ws, ids) = emitter.shared();
                let updates = buckets.hass;
                jobs.push(Box::pin(hass::send_batch(ws, ids, updates)));
            }
        }

        stream::iter(jobs)
            .for_each_concurrent(self.max_workers, |job| job)
            .await;
    }

    /// Deterministic teardown of every per-session resource
    pub fn close(&mut self) {
        self.pool.close_all();
        self.yeelight.shutdown();
    }

    #[must_use]
    pub fn open_sockets(&self) -> usize {
        self.pool.len()
    }
}
