//! Echo application: every received frame is sent back to its sender.
//!
//! Handlers run inside the drain pass and only queue replies; [`flush`] sends
//! them after [`NetServer::update`](tidegate_net::NetServer::update) returns.

use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, unbounded};
use tidegate_config::Config;
use tidegate_net::{
    ClientId, Gateway, GatewayConfig, Handlers, MessageHeader, NetEvent, ServerConfig,
    SocketConfig,
};

/// A frame waiting to be echoed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Connection to answer.
    pub client: ClientId,
    /// Message type to answer with.
    pub msg_id: u16,
    /// Player id from the request header.
    pub player_id: ClientId,
    /// Body to send back.
    pub payload: Vec<u8>,
}

/// Map the file/CLI config onto the gateway's runtime settings.
pub fn server_config(config: &Config) -> ServerConfig {
    ServerConfig {
        bind_addr: config.server.bind_addr.clone(),
        thread_count: config.server.thread_count,
        gateway: GatewayConfig {
            server_id: config.server.server_id,
            max_clients: config.server.max_clients,
            client_id_namespace: config.server.client_id_namespace,
            max_frame_body: config.net.max_frame_body,
            max_recv_buffer: config.net.max_recv_buffer,
        },
        socket: SocketConfig {
            tcp_nodelay: config.net.tcp_nodelay,
            keepalive_enabled: config.net.keepalive_enabled,
            keepalive_idle: Duration::from_secs(config.net.keepalive_idle_secs),
            ..Default::default()
        },
    }
}

fn handlers(replies: Sender<Reply>) -> Handlers {
    Handlers::new(
        move |header: &MessageHeader, msg_id: u16, payload: &[u8], client: ClientId| {
            let _ = replies.send(Reply {
                client,
                msg_id,
                player_id: header.player_id,
                payload: payload.to_vec(),
            });
        },
        |event: NetEvent, client: ClientId, server_id: i32| match event {
            NetEvent::Connected => tracing::info!("Client {client} joined server {server_id}"),
            NetEvent::Disconnected => tracing::info!("Client {client} left server {server_id}"),
        },
    )
}

/// Build the server config, the echo handlers and the queue of pending replies.
pub fn build(config: &Config) -> (ServerConfig, Handlers, Receiver<Reply>) {
    let (tx, rx) = unbounded();
    (server_config(config), handlers(tx), rx)
}

/// Send every queued reply. Returns how many were delivered.
pub fn flush(outbox: &Receiver<Reply>, gateway: &Gateway) -> usize {
    let mut delivered = 0;
    for reply in outbox.try_iter() {
        match gateway.send_with_header(reply.msg_id, &reply.payload, reply.client, reply.player_id) {
            Ok(()) => delivered += 1,
            Err(e) => tracing::debug!("Dropping echo to {}: {e}", reply.client),
        }
    }
    delivered
}
