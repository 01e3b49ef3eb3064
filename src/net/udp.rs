//! UDP broadcast datagrams

use std::net::{Ipv4Addr, SocketAddrV4};

use tokio::net::UdpSocket;
use tracing::debug;

/// Send one datagram to `address:port` from an ephemeral socket with
/// broadcast enabled. The socket is closed when this returns.
pub async fn send_datagram(address: Ipv4Addr, port: u16, payload: &[u8]) -> std::io::Result<usize> {
    let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)).await?;
    socket.set_broadcast(true)?;
    let sent = socket.send_to(payload, SocketAddrV4::new(address, port)).await?;
    debug!("UDP datagram of {} bytes sent to {}:{}", sent, address, port);
    Ok(sent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_datagram_to_loopback() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = receiver.local_addr().unwrap().port();

        let sent = send_datagram(Ipv4Addr::LOCALHOST, port, b"hello").await.unwrap();
        assert_eq!(sent, 5);

        let mut buf = [0u8; 64];
        let (len, _) = receiver.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"hello");
    }
}
