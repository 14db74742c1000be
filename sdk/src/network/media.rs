use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{lookup_host, UdpSocket};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use voicegate_protocol::{
    decode_discovery_response, encode_discovery_request, encode_keepalive, ExternalAddress,
    DISCOVERY_PACKET_LEN,
};

use crate::error::SdkError;

/// Resolve `host:port` and connect a fresh UDP socket to it.
pub(crate) async fn connect(host: &str, port: u16) -> Result<UdpSocket, SdkError> {
    let target = format!("{}:{}", host, port);
    let addr = lookup_host(&target)
        .await
        .map_err(|e| SdkError::ConnectionFailed(format!("resolve {} failed: {}", target, e)))?
        .next()
        .ok_or_else(|| SdkError::ConnectionFailed(format!("no address for {}", target)))?;

    let bind_addr: SocketAddr = if addr.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };

    let socket = UdpSocket::bind(bind_addr)
        .await
        .map_err(|e| SdkError::ConnectionFailed(format!("UDP bind failed: {}", e)))?;
    socket
        .connect(addr)
        .await
        .map_err(|e| SdkError::ConnectionFailed(format!("UDP connect failed: {}", e)))?;

    debug!("[Media] UDP connected to {}", addr);
    Ok(socket)
}

/// Learn our external address by sending a discovery probe for `ssrc`.
///
/// Gives up after `timeout` or when `cancel` fires.
pub(crate) async fn discover_ip(
    socket: &UdpSocket,
    ssrc: u32,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<ExternalAddress, SdkError> {
    socket
        .send(&encode_discovery_request(ssrc))
        .await
        .map_err(|e| SdkError::ConnectionFailed(format!("discovery send failed: {}", e)))?;

    let mut buf = [0u8; DISCOVERY_PACKET_LEN];
    let len = tokio::select! {
        biased;

        () = cancel.cancelled() => return Err(SdkError::Disconnected),
        result = tokio::time::timeout(timeout, socket.recv(&mut buf)) => result
            .map_err(|_| SdkError::ConnectionFailed("IP discovery timed out".to_string()))?
            .map_err(|e| SdkError::ConnectionFailed(format!("discovery receive failed: {}", e)))?,
    };

    if len < DISCOVERY_PACKET_LEN {
        warn!("[Media] Short discovery response: {} bytes", len);
    }

    Ok(decode_discovery_response(&buf[..len])?)
}

/// Send a keepalive datagram every `interval` until a send fails or `cancel` fires.
/// The first one goes out immediately; the counter starts at zero.
pub(crate) fn spawn_keepalive(socket: Arc<UdpSocket>, interval: Duration, cancel: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        let mut counter: u64 = 0;

        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if let Err(e) = socket.send(&encode_keepalive(counter)).await {
                warn!("[Media] Keepalive send failed: {}", e);
                break;
            }
            counter = counter.wrapping_add(1);
        }

        debug!("[Media] Keepalive stopped");
    });
}
