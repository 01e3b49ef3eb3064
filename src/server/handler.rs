//! WebSocket connection handler
//!
//! Runs the relay logic for one session: lifecycle announcements on
//! connect and disconnect, and dispatch of every inbound text frame.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::context::RelayContext;
use super::protocol::{
    client_count_frame, server_ip_frame, ApiRequest, ApiResponse, BroadcastControlRequest,
    BroadcastControlResponse, ControlAction, InboundFrame, EVENT_CLIENT_CONNECTED,
    EVENT_CLIENT_DISCONNECTED,
};
use crate::net::local_ipv4;
use crate::session::SessionHandle;

/// Handles a single WebSocket connection
pub struct ConnectionHandler {
    session: SessionHandle,
    ctx: Arc<RelayContext>,
}

impl ConnectionHandler {
    /// Create a handler for `session`
    pub fn new(session: SessionHandle, ctx: Arc<RelayContext>) -> Self {
        Self { session, ctx }
    }

    /// The session this handler serves
    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    /// Register the session and announce the new participant count
    pub async fn on_connect(&self) {
        info!("Client connected: {}", self.session);
        self.ctx.registry.add(self.session.clone()).await;

        let count = self.ctx.registry.len().await;
        self.reply(client_count_frame(count));
        self.notify_others(EVENT_CLIENT_CONNECTED).await;
    }

    /// Deregister the session, drop its pending requests and announce the departure
    pub async fn on_disconnect(&self) {
        info!("Client disconnected: {}", self.session);
        self.ctx.registry.remove(&self.session).await;
        self.ctx.pending.purge(&self.session);
        self.notify_others(EVENT_CLIENT_DISCONNECTED).await;
    }

    /// Classify and handle one inbound text frame
    pub async fn handle_text(&self, text: &str) {
        debug!("Received from {}: {}", self.session, text);

        match InboundFrame::classify(text) {
            InboundFrame::BroadcastControl(request) => self.handle_broadcast_control(request).await,
            InboundFrame::MalformedControl {
                action,
                request_id,
                reason,
            } => {
                warn!("Malformed broadcast {} request: {}", action.as_str(), reason);
                self.send_control_response(BroadcastControlResponse::failure(
                    action,
                    format!("Invalid broadcast request: {}", reason),
                    request_id,
                ));
            }
            InboundFrame::ApiRequest(request) => self.handle_api_request(request).await,
            InboundFrame::ApiResponse(response) => self.handle_api_response(response),
            InboundFrame::GetServerIp => self.handle_get_server_ip().await,
            InboundFrame::Relay(text) => self.relay(&text).await,
        }
    }

    async fn handle_broadcast_control(&self, request: BroadcastControlRequest) {
        let Some(action) = request.kind() else {
            return;
        };
        info!("Received broadcast control request: {}", action.as_str());

        let response = match action {
            ControlAction::Start => {
                match self
                    .ctx
                    .broadcast_settings(request.interval, request.message, request.port)
                {
                    Ok(settings) => {
                        let message = format!(
                            "Broadcast started with interval: {}ms, port: {}",
                            settings.interval.as_millis(),
                            settings.port
                        );
                        self.ctx.broadcaster.start(settings).await;
                        BroadcastControlResponse::ok(action, message, request.request_id)
                    }
                    Err(e) => {
                        warn!("Rejected broadcast start: {}", e);
                        BroadcastControlResponse::failure(
                            action,
                            format!("Broadcast not started: {}", e),
                            request.request_id,
                        )
                    }
                }
            }
            ControlAction::Stop => {
                self.ctx.broadcaster.stop().await;
                BroadcastControlResponse::ok(action, "Broadcast stopped", request.request_id)
            }
            ControlAction::Status => {
                let status = self.ctx.broadcaster.status().await;
                BroadcastControlResponse::ok(action, "Broadcast status retrieved", request.request_id)
                    .with_status(status)
            }
        };

        self.send_control_response(response);
    }

    fn send_control_response(&self, response: BroadcastControlResponse) {
        match response.to_json() {
            Ok(json) => self.reply(json),
            Err(e) => warn!("Failed to encode broadcast control response: {}", e),
        }
    }

    async fn handle_api_request(&self, request: ApiRequest) {
        info!(
            "Received API request: {} (requestId: {:?})",
            request.action, request.request_id
        );
        self.ctx
            .pending
            .track(request.request_id.as_deref(), &self.session);
        debug!("{} requests awaiting a response", self.ctx.pending.len());

        let frame = match request.to_relay_frame() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Failed to encode API request for relay: {}", e);
                return;
            }
        };
        let delivered = self.ctx.registry.broadcast(&frame, Some(&self.session)).await;
        debug!("Forwarded API request to {} peers", delivered);

        if delivered == 0 && self.ctx.auto_reply {
            if let Some(request_id) = request.request_id.as_deref() {
                self.ctx.pending.resolve(request_id);
            }
            let source = if self.ctx.actions.contains(&request.action) {
                "registered handler"
            } else {
                "synthetic response"
            };
            info!("No peers for {}, answering with {}", request.action, source);
            let response = self.ctx.actions.handle(&request);
            match response.to_json() {
                Ok(json) => self.reply(json),
                Err(e) => warn!("Failed to encode local API response: {}", e),
            }
        }
    }

    fn handle_api_response(&self, response: ApiResponse) {
        info!(
            "Received API response: {} (requestId: {:?})",
            response.action, response.request_id
        );
        let Some(request_id) = response.request_id.as_deref() else {
            warn!("API response without requestId, dropping");
            return;
        };
        let Some(owner) = self.ctx.pending.resolve(request_id) else {
            warn!("No requesting client found for requestId: {}", request_id);
            return;
        };

        let json = match response.to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to encode API response: {}", e);
                return;
            }
        };
        match owner.send_text(json) {
            Ok(()) => info!("Sent response {} to requesting client {}", request_id, owner),
            Err(e) => warn!("Failed to send response {} to {}: {}", request_id, owner, e),
        }
    }

    async fn handle_get_server_ip(&self) {
        self.ctx.registry.mark_dashboard(&self.session).await;
        let ip = local_ipv4();
        self.reply(server_ip_frame(ip));
        debug!("Sent server IP {} to {}", ip, self.session);
    }

    async fn relay(&self, text: &str) {
        let delivered = self.ctx.registry.broadcast(text, Some(&self.session)).await;
        let peers = self.ctx.registry.len().await.saturating_sub(1);
        debug!("Relay completed: {}/{} clients received the message", delivered, peers);
    }

    /// Send `event` and the current count to every other session
    async fn notify_others(&self, event: &str) {
        let peers = self.ctx.registry.snapshot().await;
        let count = client_count_frame(peers.len());
        for peer in peers.iter().filter(|p| **p != self.session) {
            let result = peer
                .send_text(event)
                .and_then(|_| peer.send_text(count.as_str()));
            if let Err(e) = result {
                warn!("Failed to notify {}: {}", peer, e);
            }
        }
    }

    fn reply(&self, text: impl Into<String>) {
        if let Err(e) = self.session.send_text(text) {
            warn!("Failed to reply to {}: {}", self.session, e);
        }
    }
}
