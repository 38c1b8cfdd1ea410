use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::{IpAddr, SocketAddr};
use std::os::fd::AsFd;
use std::sync::Arc;

use nix::sys::socket;
use nix::sys::socket::sockopt::SndBuf;
use tokio::net::UdpSocket;

use crate::error::ApiResult;

/// Session-scoped pool of outbound udp sockets, one per destination
/// host. Sockets are created on first use and live until teardown, so
/// the hot path never pays socket setup.
pub struct SocketPool {
    sockets: HashMap<IpAddr, Arc<UdpSocket>>,
    send_buffer: usize,
}

impl SocketPool {
    #[must_use]
    pub fn new(send_buffer: usize) -> Self {
        Self {
            sockets: HashMap::new(),
            send_buffer,
        }
    }

    pub async fn get(&mut self, host: IpAddr) -> ApiResult<Arc<UdpSocket>> {
        if let Some(sock) = self.sockets.get(&host) {
            return Ok(sock.clone());
        }

        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket::setsockopt(&socket.as_fd(), SndBuf, &self.send_buffer)?;

        let socket = Arc::new(socket);
        self.sockets.insert(host, socket.clone());
        Ok(socket)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sockets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sockets.is_empty()
    }

    pub fn close_all(&mut self) {
        self.sockets.clear();
    }
}

/// Fire one datagram without blocking. A full send buffer or transient
/// error is logged and forgotten; the socket stays pooled and the next
/// frame retries.
pub fn send_datagram(socket: &UdpSocket, addr: SocketAddr, payload: &[u8]) {
    match socket.try_send_to(payload, addr) {
        Ok(_) => {}
        Err(err) if err.kind() == ErrorKind::WouldBlock => {
            log::trace!("udp send buffer full for {addr}, dropping frame");
        }
        Err(err) => {
            log::debug!("udp send to {addr} failed: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use crate::model::pool::SocketPool;

    #[tokio::test]
    async fn sockets_are_reused_per_host() {
        let mut pool = SocketPool::new(8192);
        let host = IpAddr::V4(Ipv4Addr::LOCALHOST);

        let a = pool.get(host).await.unwrap();
        let b = pool.get(host).await.unwrap();

        assert!(std::sync::Arc::ptr_eq(&a, &b));
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn close_all_empties_the_pool() {
        let mut pool = SocketPool::new(8192);
        pool.get(IpAddr::V4(Ipv4Addr::LOCALHOST)).await.unwrap();
        pool.get(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 2)))
            .await
            .unwrap();

        assert_eq!(pool.len(), 2);
        pool.close_all();
        assert!(pool.is_empty());
    }
}
