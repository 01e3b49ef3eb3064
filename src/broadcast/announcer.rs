//! Server address announcer
//!
//! Periodically broadcasts `WEBSOCKET_SERVER:ws://<ip>:<port><path>` so
//! clients on the local network can discover the mock server.

use std::net::Ipv4Addr;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::net::{local_ipv4, send_datagram};
use crate::server::WEBSOCKET_SERVER_PREFIX;

/// Discovery datagram payload for a server reachable at `ip`
pub fn announcement(ip: Ipv4Addr, ws_port: u16, ws_path: &str) -> String {
    format!("{}ws://{}:{}{}", WEBSOCKET_SERVER_PREFIX, ip, ws_port, ws_path)
}

/// Background discovery broadcaster
pub struct Announcer {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Announcer {
    /// Spawn the announcer loop
    pub fn spawn(
        target: Ipv4Addr,
        udp_port: u16,
        interval: Duration,
        ws_port: u16,
        ws_path: String,
    ) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        info!(
            "Announcing server address on UDP port {} every {:?}",
            udp_port, interval
        );

        let task = tokio::spawn(async move {
            loop {
                // Re-resolved each round so a changed address is picked up
                let message = announcement(local_ipv4(), ws_port, &ws_path);
                match send_datagram(target, udp_port, message.as_bytes()).await {
                    Ok(_) => debug!("Broadcasted: {}", message),
                    Err(e) => warn!("Failed to broadcast server address: {}", e),
                }

                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        });

        Self { cancel, task }
    }

    /// Stop announcing and wait for the loop to exit
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!("Announcer task ended abnormally: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UdpSocket;

    #[test]
    fn test_announcement_format() {
        assert_eq!(
            announcement(Ipv4Addr::new(192, 168, 0, 5), 8081, "/ws"),
            "WEBSOCKET_SERVER:ws://192.168.0.5:8081/ws"
        );
    }

    #[tokio::test]
    async fn test_announcer_sends_until_shutdown() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = receiver.local_addr().unwrap().port();

        let announcer = Announcer::spawn(
            Ipv4Addr::LOCALHOST,
            port,
            Duration::from_millis(20),
            8081,
            "/ws".to_string(),
        );

        let mut buf = [0u8; 256];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), receiver.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let text = std::str::from_utf8(&buf[..len]).unwrap();
        assert!(text.starts_with("WEBSOCKET_SERVER:ws://"));
        assert!(text.ends_with(":8081/ws"));

        announcer.shutdown().await;
    }
}
