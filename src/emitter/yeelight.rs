use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::config::YeelightMusicConfig;
use crate::error::{ApiError, ApiResult};
use crate::model::framediff::FrameDecision;
use crate::model::throttle::Throttle;

/// Yeelight json-rpc control port
pub const CONTROL_PORT: u16 = 55443;

const SOCKET_TIMEOUT: Duration = Duration::from_secs(5);
const MUSIC_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(12);
const MUSIC_RETRY_INTERVAL: Duration = Duration::from_millis(250);

/// One light's share of a frame, gate decision already applied
#[derive(Debug, Clone, Copy)]
pub struct YeelightSample {
    pub host: Ipv4Addr,
    pub decision: FrameDecision,
    pub rgb: [u8; 3],
    pub bri: u8,
}

/// Connection state machine per device.
///
/// Music mode reverses the tcp direction: we ask the device to connect
/// back to our shared listener, which removes the device-side command
/// rate limit.
#[derive(Debug)]
pub enum YeelightConnection {
    /// Music handshake still in flight
    Pending,
    /// Device-initiated music connection, unlimited command rate
    Music(TcpStream),
    /// Music mode failed and `require` was off; plain outbound
    /// commands, reconnected on demand. Never retried for the session.
    Fallback(Option<TcpStream>),
}

type ConnectionMap = Arc<Mutex<HashMap<Ipv4Addr, Arc<tokio::sync::Mutex<YeelightConnection>>>>>;

pub struct YeelightEmitter {
    cfg: YeelightMusicConfig,
    advertised_ip: Ipv4Addr,
    conns: ConnectionMap,
    throttles: HashMap<Ipv4Addr, Throttle>,
    attempted: HashSet<Ipv4Addr>,
    listener: Option<JoinHandle<()>>,
}

impl YeelightEmitter {
    #[must_use]
    pub fn new(cfg: YeelightMusicConfig, advertised_ip: Ipv4Addr) -> Self {
        Self {
            cfg,
            advertised_ip,
            conns: Arc::new(Mutex::new(HashMap::new())),
            throttles: HashMap::new(),
            attempted: HashSet::new(),
            listener: None,
        }
    }

    /// Prepare one send job for the worker pool, or `None` when the
    /// sample is suppressed (noop decision, rate limit, handshake
    /// still pending).
    pub fn prepare(&mut self, sample: YeelightSample) -> Option<BoxFuture<'static, ()>> {
        if sample.decision == FrameDecision::Noop {
            return None;
        }

        if !self.attempted.contains(&sample.host) {
            self.attempted.insert(sample.host);
            self.start_music_handshake(sample.host);
            return None;
        }

        let conn = self.lock_map().get(&sample.host).cloned()?;

        let max_fps = self.cfg.max_fps.max(10);
        let throttle = self
            .throttles
            .entry(sample.host)
            .or_insert_with(|| Throttle::from_fps(max_fps));
        if !throttle.tick() {
            return None;
        }

        let line = command_line(sample, self.cfg.smooth_ms);
        let host = sample.host;

        Some(Box::pin(async move {
            let mut guard = conn.lock().await;
            if let Err(err) = send_line(&mut guard, host, &line).await {
                log::debug!("yeelight {host}: send failed: {err}");
            }
        }))
    }

    fn lock_map(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<Ipv4Addr, Arc<tokio::sync::Mutex<YeelightConnection>>>>
    {
        self.conns
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Spawn the music-mode handshake in the background; frames keep
    /// flowing to other devices while the device dials back in.
    fn start_music_handshake(&mut self, host: Ipv4Addr) {
        self.ensure_music_server();

        self.lock_map()
            .insert(host, Arc::new(tokio::sync::Mutex::new(YeelightConnection::Pending)));

        let conns = self.conns.clone();
        let advertised = self.cfg.host_ip.unwrap_or(self.advertised_ip);
        let port = self.cfg.port;
        let require = self.cfg.require;

        tokio::spawn(async move {
            let deadline = tokio::time::Instant::now() + MUSIC_HANDSHAKE_TIMEOUT;

            loop {
                let existing = lock_shared(&conns).get(&host).cloned();
                if let Some(conn) = existing {
                    if matches!(&*conn.lock().await, YeelightConnection::Music(_)) {
                        log::info!("yeelight {host} is now in music mode");
                        return;
                    }
                }

                if tokio::time::Instant::now() >= deadline {
                    break;
                }

                // (re-)issue set_music over a short-lived control
                // connection; the device may have missed the first one
                if let Err(err) = request_music(host, advertised, port).await {
                    log::debug!("yeelight {host}: set_music failed: {err}");
                }

                tokio::time::sleep(MUSIC_RETRY_INTERVAL).await;
            }

            if require {
                log::error!("yeelight {host} refused music mode within 12s");
            } else {
                log::info!("yeelight {host} couldn't enter music mode, falling back");
            }

            let existing = lock_shared(&conns).get(&host).cloned();
            if let Some(conn) = existing {
                let mut guard = conn.lock().await;
                if matches!(&*guard, YeelightConnection::Pending) {
                    *guard = YeelightConnection::Fallback(None);
                }
            }
        });
    }

    /// One shared listener accepts every device's inbound music
    /// connection; peers are matched to devices by source address.
    fn ensure_music_server(&mut self) {
        if self.listener.is_some() {
            return;
        }

        let conns = self.conns.clone();
        let port = self.cfg.port;

        self.listener = Some(tokio::spawn(async move {
            let listener = match TcpListener::bind(("0.0.0.0", port)).await {
                Ok(listener) => listener,
                Err(err) => {
                    log::error!("yeelight music server bind failed on {port}: {err}");
                    return;
                }
            };
            log::debug!("yeelight music server listening on {port}");

            loop {
                let Ok((stream, peer)) = listener.accept().await else {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    continue;
                };

                let std::net::IpAddr::V4(ip) = peer.ip() else {
                    continue;
                };

                let Some(conn) = lock_shared(&conns).get(&ip).cloned() else {
                    // not one of ours
                    continue;
                };

                *conn.lock().await = YeelightConnection::Music(stream);
                log::debug!("yeelight music connection accepted from {ip}");
            }
        }));
    }

    /// Close all connections and the shared listener
    pub fn shutdown(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
        self.lock_map().clear();
        self.attempted.clear();
        self.throttles.clear();
    }
}

impl Drop for YeelightEmitter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn lock_shared(
    conns: &ConnectionMap,
) -> std::sync::MutexGuard<'_, HashMap<Ipv4Addr, Arc<tokio::sync::Mutex<YeelightConnection>>>> {
    conns
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

async fn request_music(host: Ipv4Addr, advertised: Ipv4Addr, port: u16) -> ApiResult<()> {
    let mut stream = timeout(
        SOCKET_TIMEOUT,
        TcpStream::connect((host, CONTROL_PORT)),
    )
    .await
    .map_err(|_| ApiError::DeviceTimeout)??;

    let line = json_command("set_music", &json!([1, advertised.to_string(), port]));
    stream.write_all(line.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}

async fn send_line(
    conn: &mut YeelightConnection,
    host: Ipv4Addr,
    line: &str,
) -> ApiResult<()> {
    match conn {
        YeelightConnection::Pending => Ok(()),
        YeelightConnection::Music(stream) => {
            let res = timeout(SOCKET_TIMEOUT, stream.write_all(line.as_bytes())).await;
            match res {
                Ok(Ok(())) => Ok(()),
                other => {
                    // music link is gone; fall back to plain tcp, the
                    // accept loop may still replace this later
                    *conn = YeelightConnection::Fallback(None);
                    other.map_err(|_| ApiError::DeviceTimeout)??;
                    Ok(())
                }
            }
        }
        YeelightConnection::Fallback(slot) => {
            if slot.is_none() {
                let stream = timeout(
                    SOCKET_TIMEOUT,
                    TcpStream::connect((host, CONTROL_PORT)),
                )
                .await
                .map_err(|_| ApiError::DeviceTimeout)??;
                *slot = Some(stream);
            }

            if let Some(stream) = slot {
                let res = timeout(SOCKET_TIMEOUT, stream.write_all(line.as_bytes())).await;
                if !matches!(res, Ok(Ok(()))) {
                    *slot = None;
                    res.map_err(|_| ApiError::DeviceTimeout)??;
                }
            }
            Ok(())
        }
    }
}

fn json_command(method: &str, params: &serde_json::Value) -> String {
    format!(
        "{}\r\n",
        json!({"id": 1, "method": method, "params": params})
    )
}

#[must_use]
pub fn command_line(sample: YeelightSample, smooth_ms: u32) -> String {
    match sample.decision {
        FrameDecision::Brightness => {
            let percent = (u32::from(sample.bri) * 100 / 255).max(1);
            json_command("set_bright", &json!([percent, "smooth", smooth_ms]))
        }
        _ => {
            let [r, g, b] = sample.rgb;
            let rgb_int =
                u32::from(r) * 65536 + u32::from(g) * 256 + u32::from(b);
            json_command("set_rgb", &json!([rgb_int, "smooth", smooth_ms]))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use crate::emitter::yeelight::{YeelightSample, command_line};
    use crate::model::framediff::FrameDecision;

    fn sample(decision: FrameDecision) -> YeelightSample {
        YeelightSample {
            host: Ipv4Addr::new(10, 0, 0, 9),
            decision,
            rgb: [255, 0, 16],
            bri: 128,
        }
    }

    #[test]
    fn color_command_packs_rgb_int() {
        let line = command_line(sample(FrameDecision::Color), 20);
        let parsed: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();

        assert_eq!(parsed["method"], "set_rgb");
        assert_eq!(parsed["params"][0], 255 * 65536 + 16);
        assert_eq!(parsed["params"][1], "smooth");
        assert_eq!(parsed["params"][2], 20);
        assert!(line.ends_with("\r\n"));
    }

    #[test]
    fn brightness_command_uses_percent() {
        let line = command_line(sample(FrameDecision::Brightness), 50);
        let parsed: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();

        assert_eq!(parsed["method"], "set_bright");
        assert_eq!(parsed["params"][0], 128 * 100 / 255);
    }
}
