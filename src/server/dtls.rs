use std::io::ErrorKind;
use std::net::SocketAddr;
use std::os::fd::AsFd;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use nix::sys::socket;
use nix::sys::socket::sockopt::RcvBuf;
use openssl::ssl::{Ssl, SslContext, SslMethod};
use tokio::io::AsyncReadExt;
use tokio::net::UdpSocket;
use tokio::time::{sleep, timeout};
use tokio_openssl::SslStream;
use udp_stream::{UdpListenBuilder, UdpListener, UdpStream};

use hue::api::HueStreamKey;

use crate::error::{ApiError, ApiResult};

/// The only cipher a hue entertainment source will offer
const CIPHER: &str = "PSK-AES128-GCM-SHA256";

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Both the first frame and mid-stream idle share the same deadline
const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

const BIND_RETRY_DELAY: Duration = Duration::from_millis(250);

/// A very small receive buffer, since late frames are better dropped
/// than queued
const RECV_BUFFER: usize = 512;

/// PSK-authenticated DTLS 1.2 listener accepting a single
/// entertainment source.
pub struct DtlsServer {
    addr: SocketAddr,
    ctx: SslContext,
    udp: Option<Arc<UdpListener>>,
}

impl DtlsServer {
    pub fn new(addr: SocketAddr, identity: String, key: HueStreamKey) -> ApiResult<Self> {
        let mut bldr = SslContext::builder(SslMethod::dtls_server())?;

        bldr.set_psk_server_callback(move |_sslref, client_id, psk| {
            let client = String::from_utf8_lossy(client_id.unwrap_or_default());
            if client != identity {
                log::warn!("dtls client identity {client:?} does not match {identity:?}");
            }

            if key.write_to_slice(psk).is_err() {
                return Ok(0);
            }
            Ok(HueStreamKey::SIZE)
        });
        bldr.set_cipher_list(CIPHER)?;

        Ok(Self {
            addr,
            ctx: bldr.build(),
            udp: None,
        })
    }

    /// Bind the entertainment port. A lingering socket from a previous
    /// session gets one retry after a short delay before the bind is
    /// reported as failed.
    pub async fn bind(&mut self) -> ApiResult<()> {
        self.udp.take();

        let socket = match UdpSocket::bind(self.addr).await {
            Ok(socket) => socket,
            Err(err) if err.kind() == ErrorKind::AddrInUse => {
                log::warn!("port {} busy, retrying once", self.addr.port());
                sleep(BIND_RETRY_DELAY).await;
                UdpSocket::bind(self.addr)
                    .await
                    .map_err(|_| ApiError::EntPortBusy(self.addr.port()))?
            }
            Err(err) => return Err(err.into()),
        };

        socket::setsockopt(&socket.as_fd(), RcvBuf, &RECV_BUFFER)?;

        let listener = UdpListenBuilder::new(socket)
            .with_buffer_size(RECV_BUFFER)
            .listen()
            .await?;
        self.udp = Some(Arc::new(listener));
        Ok(())
    }

    /// Wait for the single client and complete the DTLS handshake. An
    /// immediate peer close during the handshake is reported as a psk
    /// rejection.
    pub async fn accept(&self) -> ApiResult<SslStream<UdpStream>> {
        let Some(udp) = self.udp.clone() else {
            return Err(ApiError::service_error("dtls listener not bound"));
        };

        let (socket, peer) = udp.accept().await?;
        log::debug!("entertainment client connecting from {peer}");

        let ssl = Ssl::new(&self.ctx)?;
        let mut stream = SslStream::new(ssl, socket)?;

        match timeout(HANDSHAKE_TIMEOUT, Pin::new(&mut stream).accept()).await {
            Ok(Ok(())) => Ok(stream),
            Ok(Err(_)) => Err(ApiError::EntStreamPskRejected),
            Err(_) => Err(ApiError::EntStreamTimeout),
        }
    }

    pub fn close(&mut self) {
        self.udp.take();
    }
}

/// Read one decrypted frame; each DTLS record is one HueStream frame,
/// so no reassembly is needed.
pub async fn read_frame(sess: &mut SslStream<UdpStream>, buf: &mut [u8]) -> ApiResult<usize> {
    match timeout(FRAME_TIMEOUT, sess.read(buf)).await {
        Ok(Err(err)) if err.kind() == ErrorKind::UnexpectedEof => {
            log::debug!("entertainment stream stopped by sender");
            Ok(0)
        }
        Ok(Err(err)) => {
            log::error!("error while reading entertainment frame: {err:?}");
            Err(ApiError::EntStreamDesync)
        }
        Err(_) => Err(ApiError::EntStreamTimeout),
        Ok(Ok(n)) => {
            log::trace!("read {n} bytes of entertainment data");
            Ok(n)
        }
    }
}

/// Open a DTLS client session towards an upstream bridge, with the mtu
/// pinned low enough to dodge path fragmentation.
pub async fn connect_client(
    addr: SocketAddr,
    identity: String,
    key: HueStreamKey,
    mtu: u32,
) -> ApiResult<SslStream<UdpStream>> {
    let mut bldr = SslContext::builder(SslMethod::dtls_client())?;

    bldr.set_psk_client_callback(move |_sslref, _hint, identity_out, psk| {
        let id = identity.as_bytes();
        if id.len() + 1 > identity_out.len() {
            return Ok(0);
        }
        identity_out[..id.len()].copy_from_slice(id);
        identity_out[id.len()] = 0;

        if key.write_to_slice(psk).is_err() {
            return Ok(0);
        }
        Ok(HueStreamKey::SIZE)
    });
    bldr.set_cipher_list(CIPHER)?;
    let ctx = bldr.build();

    let socket = UdpStream::connect(addr).await?;
    let mut ssl = Ssl::new(&ctx)?;
    ssl.set_mtu(mtu)?;

    let mut stream = SslStream::new(ssl, socket)?;
    timeout(HANDSHAKE_TIMEOUT, Pin::new(&mut stream).connect())
        .await
        .map_err(|_| ApiError::EntStreamTimeout)??;

    Ok(stream)
}
