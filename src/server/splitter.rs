use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio_openssl::SslStream;
use udp_stream::UdpStream;
use uuid::Uuid;

use hue::stream::{remap_channels, rewrite_area_uuid};

use crate::error::ApiResult;
use crate::server::dtls::{self, DtlsServer};
use crate::upstream::UpstreamBridge;

/// DTLS mtu towards the upstream bridge; low enough that rewritten
/// frames never fragment on the path.
const UPSTREAM_MTU: u32 = 1200;

const UPSTREAM_ENTM_PORT: u16 = 2100;

/// Lifecycle of the splitter proper. The upstream group sync and
/// client launches happen before construction, in the supervisor; the
/// splitter owns the server, the pump, and the drain.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SplitterState {
    Idle,
    LaunchServer,
    Streaming,
    Drain,
}

impl fmt::Display for SplitterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::LaunchServer => "launch-server",
            Self::Streaming => "streaming",
            Self::Drain => "drain",
        };
        write!(f, "{name}")
    }
}

/// One upstream bridge receiving re-encrypted frames.
///
/// A dead target stays in the list so teardown can still issue its
/// stream deactivation, exactly once.
pub struct SplitterTarget {
    pub bridge: Arc<UpstreamBridge>,
    pub group_id: u32,
    pub uuid: Uuid,
    pub channel_map: BTreeMap<u8, u8>,
    stream: Option<SslStream<UdpStream>>,
    deactivated: bool,
}

impl SplitterTarget {
    /// Activate streaming on the upstream group, then open the DTLS
    /// client. The bridge only accepts the handshake while its stream
    /// is marked active.
    pub async fn launch(
        bridge: Arc<UpstreamBridge>,
        group_id: u32,
        uuid: Uuid,
        channel_map: BTreeMap<u8, u8>,
    ) -> ApiResult<Self> {
        bridge.set_stream_active(group_id, true).await?;

        let (identity, key) = bridge.identity();
        let addr = SocketAddr::new(bridge.ip().into(), UPSTREAM_ENTM_PORT);
        let stream = dtls::connect_client(addr, identity, key, UPSTREAM_MTU).await?;

        log::info!("dtls tunnel established to upstream bridge {}", bridge.ip());

        Ok(Self {
            bridge,
            group_id,
            uuid,
            channel_map,
            stream: Some(stream),
            deactivated: false,
        })
    }

    const fn is_alive(&self) -> bool {
        self.stream.is_some()
    }

    /// Transform and forward one frame. The source buffer is shared
    /// with the mirror path, so every transformation builds a fresh
    /// buffer.
    async fn forward(&mut self, frame: &[u8]) {
        let Some(stream) = self.stream.as_mut() else {
            return;
        };

        let rewritten = rewrite_area_uuid(frame, self.uuid);
        let source = rewritten.as_deref().unwrap_or(frame);

        let remapped = if self.channel_map.is_empty() {
            None
        } else {
            remap_channels(source, &self.channel_map)
        };
        let outgoing = remapped.as_deref().unwrap_or(source);

        if let Err(err) = stream.write_all(outgoing).await {
            log::error!(
                "upstream bridge {} dropped from splitter: {err}",
                self.bridge.ip()
            );
            self.stream.take();
        }
    }

    /// Deactivate streaming on the upstream group. Issued from every
    /// teardown path, but only ever once per session.
    pub async fn deactivate(&mut self) {
        if self.deactivated {
            return;
        }
        self.deactivated = true;
        self.stream.take();

        if let Err(err) = self.bridge.set_stream_active(self.group_id, false).await {
            log::debug!("upstream stream deactivation failed: {err}");
        }
    }
}

/// Owns the DTLS termination while a session splits its stream: every
/// decrypted frame goes to the local mirror port for the pipeline, and
/// re-encrypted to each upstream bridge after uuid rewrite and channel
/// remap.
pub struct StreamSplitter {
    server: DtlsServer,
    targets: Vec<SplitterTarget>,
    mirror: UdpSocket,
    mirror_addr: SocketAddr,
    state: SplitterState,
}

impl StreamSplitter {
    pub async fn launch(
        server_addr: SocketAddr,
        identity: String,
        key: hue::api::HueStreamKey,
        mirror_addr: SocketAddr,
    ) -> ApiResult<Self> {
        let mut splitter = Self {
            server: DtlsServer::new(server_addr, identity, key)?,
            targets: Vec::new(),
            mirror: UdpSocket::bind("127.0.0.1:0").await?,
            mirror_addr,
            state: SplitterState::Idle,
        };

        splitter.set_state(SplitterState::LaunchServer);
        splitter.server.bind().await?;

        Ok(splitter)
    }

    pub fn add_target(&mut self, target: SplitterTarget) {
        self.targets.push(target);
    }

    fn set_state(&mut self, state: SplitterState) {
        log::debug!("splitter: {} -> {}", self.state, state);
        self.state = state;
    }

    /// Accept the entertainment source and pump frames until the
    /// sender stops, errors out, or the session is cancelled. Target
    /// deaths never stop the local mirror; with all targets gone the
    /// splitter degrades to a plain decryption relay.
    pub async fn run(&mut self, mut active: watch::Receiver<bool>) -> ApiResult<()> {
        let mut session = tokio::select! {
            res = self.server.accept() => res?,
            _ = active.changed() => return Ok(()),
        };
        self.set_state(SplitterState::Streaming);

        let mut buf = [0u8; 1024];
        let mut degraded = false;

        loop {
            let n = tokio::select! {
                res = dtls::read_frame(&mut session, &mut buf) => match res {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(err) => {
                        self.set_state(SplitterState::Drain);
                        return Err(err);
                    }
                },
                res = active.changed() => {
                    if res.is_err() || !*active.borrow() {
                        break;
                    }
                    continue;
                }
            };

            let frame = &buf[..n];

            if let Err(err) = self.mirror.send_to(frame, self.mirror_addr).await {
                log::debug!("mirror send failed: {err}");
            }

            for target in &mut self.targets {
                target.forward(frame).await;
            }

            if !degraded && !self.targets.is_empty() && self.targets.iter().all(|t| !t.is_alive())
            {
                degraded = true;
                log::warn!("all upstream targets dead, continuing local-only");
            }
        }

        self.set_state(SplitterState::Drain);
        Ok(())
    }

    /// Flush and release everything. Idempotent; always issues each
    /// target's upstream deactivation exactly once, error path or not.
    pub async fn drain(&mut self) {
        self.set_state(SplitterState::Drain);

        for target in &mut self.targets {
            target.deactivate().await;
        }

        self.server.close();
        self.set_state(SplitterState::Idle);
    }
}

impl Drop for StreamSplitter {
    fn drop(&mut self) {
        if self.targets.iter().any(|t| !t.deactivated) {
            log::debug!("splitter dropped with active upstream targets");
        }
    }
}
