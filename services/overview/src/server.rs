//! HTTP and WebSocket front end.
//!
//! REST callers read whatever snapshot is currently cached for a topic.
//! WebSocket clients drive the dispatcher with subscribe/unsubscribe
//! commands and receive push frames; disconnecting a client removes it
//! from every topic it joined.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};
use warp::http::StatusCode;
use warp::ws::Message;
use warp::Filter;

use codec::PushEvent;
use config::{DispatchConfig, ServerConfig};
use types::{ChainId, TopicKey, ViewKind};

use crate::dispatch::{BroadcastDispatcher, SubscriberId};
use crate::error::{OverviewError, Result};

/// One inbound WebSocket command.
#[derive(Debug, Deserialize)]
struct ClientCommand {
    op: String,
    topic: String,
}

pub struct OverviewServer {
    server: ServerConfig,
    max_connections: usize,
    dispatcher: Arc<BroadcastDispatcher>,
    connections: Arc<AtomicUsize>,
    shutdown: broadcast::Sender<()>,
}

impl OverviewServer {
    pub fn new(
        server: ServerConfig,
        dispatch: &DispatchConfig,
        dispatcher: Arc<BroadcastDispatcher>,
        shutdown: broadcast::Sender<()>,
    ) -> Self {
        Self {
            server,
            max_connections: dispatch.max_connections,
            dispatcher,
            connections: Arc::new(AtomicUsize::new(0)),
            shutdown,
        }
    }

    /// Serve until the shutdown signal fires.
    pub async fn run(&self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.server.bind_address, self.server.port)
            .parse()
            .map_err(|e| OverviewError::Configuration {
                message: format!("Invalid bind address: {}", e),
            })?;

        let routes = routes(
            self.dispatcher.clone(),
            self.connections.clone(),
            self.max_connections,
        );
        let mut shutdown_rx = self.shutdown.subscribe();
        let signal = async move {
            let _ = shutdown_rx.recv().await;
        };

        info!("Starting overview server on {}", addr);
        if self.server.enable_cors {
            let (bound, server) = warp::serve(routes.with(warp::cors().allow_any_origin()))
                .try_bind_with_graceful_shutdown(addr, signal)
                .map_err(|e| OverviewError::Server {
                    message: format!("Failed to bind {}: {}", addr, e),
                })?;
            info!("Overview server listening on {}", bound);
            server.await;
        } else {
            let (bound, server) = warp::serve(routes)
                .try_bind_with_graceful_shutdown(addr, signal)
                .map_err(|e| OverviewError::Server {
                    message: format!("Failed to bind {}: {}", addr, e),
                })?;
            info!("Overview server listening on {}", bound);
            server.await;
        }

        info!("Overview server stopped");
        Ok(())
    }
}

fn routes(
    dispatcher: Arc<BroadcastDispatcher>,
    connections: Arc<AtomicUsize>,
    max_connections: usize,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let health = warp::path("health")
        .map(|| warp::reply::with_status("OK", StatusCode::OK));

    let status = warp::path("status")
        .and(with_dispatcher(dispatcher.clone()))
        .and(with_connections(connections.clone()))
        .and_then(status_handler);

    // The literal merged route must come before the parameterized one.
    let merged_overview = warp::path!("api" / "overview" / "merged")
        .and(warp::get())
        .and(with_dispatcher(dispatcher.clone()))
        .and_then(|dispatcher| topic_snapshot(TopicKey::merged(), dispatcher));

    let chain_overview = warp::path!("api" / "overview" / String)
        .and(warp::get())
        .and(with_dispatcher(dispatcher.clone()))
        .and_then(|chain: String, dispatcher| {
            topic_snapshot(
                TopicKey::chain(ChainId::new(chain), ViewKind::Overview),
                dispatcher,
            )
        });

    let block_feed = warp::path!("api" / "blocks" / String)
        .and(warp::get())
        .and(with_dispatcher(dispatcher.clone()))
        .and_then(|chain: String, dispatcher| {
            topic_snapshot(
                TopicKey::chain(ChainId::new(chain), ViewKind::Blocks),
                dispatcher,
            )
        });

    let tx_feed = warp::path!("api" / "transactions" / String)
        .and(warp::get())
        .and(with_dispatcher(dispatcher.clone()))
        .and_then(|chain: String, dispatcher| {
            topic_snapshot(
                TopicKey::chain(ChainId::new(chain), ViewKind::Transactions),
                dispatcher,
            )
        });

    let ws_route = warp::path("ws")
        .and(warp::ws())
        .and(with_dispatcher(dispatcher))
        .and(with_connections(connections))
        .map(move |ws: warp::ws::Ws, dispatcher, connections| {
            ws.on_upgrade(move |socket| {
                handle_client_connection(dispatcher, connections, max_connections, socket)
            })
        });

    health
        .or(status)
        .or(merged_overview)
        .or(chain_overview)
        .or(block_feed)
        .or(tx_feed)
        .or(ws_route)
}

fn with_dispatcher(
    dispatcher: Arc<BroadcastDispatcher>,
) -> impl Filter<Extract = (Arc<BroadcastDispatcher>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || dispatcher.clone())
}

fn with_connections(
    connections: Arc<AtomicUsize>,
) -> impl Filter<Extract = (Arc<AtomicUsize>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || connections.clone())
}

async fn status_handler(
    dispatcher: Arc<BroadcastDispatcher>,
    connections: Arc<AtomicUsize>,
) -> std::result::Result<impl warp::Reply, warp::Rejection> {
    let stats = dispatcher.stats();
    Ok(warp::reply::json(&serde_json::json!({
        "status": "running",
        "service": "chainpulse-overview",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": connections.load(Ordering::Relaxed),
        "topics": dispatcher.list_topics().len(),
        "subscribers": dispatcher.total_subscribers(),
        "loop_starts": stats.loop_starts.load(Ordering::Relaxed),
        "deliveries": stats.deliveries.load(Ordering::Relaxed),
    })))
}

async fn topic_snapshot(
    topic: TopicKey,
    dispatcher: Arc<BroadcastDispatcher>,
) -> std::result::Result<impl warp::Reply, warp::Rejection> {
    match dispatcher.display(&topic).await {
        Ok(snapshot) => Ok(warp::reply::with_status(
            warp::reply::json(&snapshot),
            StatusCode::OK,
        )),
        Err(e) => Ok(warp::reply::with_status(
            warp::reply::json(&serde_json::json!({ "error": e.to_string() })),
            StatusCode::NOT_FOUND,
        )),
    }
}

async fn handle_client_connection(
    dispatcher: Arc<BroadcastDispatcher>,
    connections: Arc<AtomicUsize>,
    max_connections: usize,
    ws: warp::ws::WebSocket,
) {
    let (mut ws_sender, mut ws_receiver) = ws.split();

    if connections.fetch_add(1, Ordering::SeqCst) >= max_connections {
        connections.fetch_sub(1, Ordering::SeqCst);
        warn!("Connection limit {} reached; rejecting client", max_connections);
        let frame = PushEvent::error("connection limit reached");
        if let Ok(text) = serde_json::to_string(&frame) {
            let _ = ws_sender.send(Message::text(text)).await;
        }
        let _ = ws_sender.close().await;
        return;
    }

    let client_id: SubscriberId = SubscriberId::new_v4();
    let (tx, mut rx) = mpsc::unbounded_channel::<PushEvent>();
    info!(client = %client_id, "New WebSocket connection established");

    loop {
        tokio::select! {
            // Outgoing push frames from the dispatcher.
            frame = rx.recv() => {
                match frame {
                    Some(frame) => {
                        let text = match serde_json::to_string(&frame) {
                            Ok(text) => text,
                            Err(e) => {
                                warn!(client = %client_id, error = %e, "Failed to serialize push frame");
                                continue;
                            }
                        };
                        if let Err(e) = ws_sender.send(Message::text(text)).await {
                            warn!(client = %client_id, error = %e, "Failed to send frame");
                            break;
                        }
                    }
                    None => break,
                }
            }

            // Inbound subscribe/unsubscribe commands.
            ws_msg = ws_receiver.next() => {
                match ws_msg {
                    Some(Ok(msg)) => {
                        if msg.is_text() {
                            let text = msg.to_str().unwrap_or("");
                            if let Some(reply) =
                                handle_command(&dispatcher, client_id, &tx, text).await
                            {
                                let _ = tx.send(reply);
                            }
                        } else if msg.is_close() {
                            info!(client = %client_id, "Client disconnected");
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(client = %client_id, error = %e, "WebSocket error");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    dispatcher.unsubscribe_all(&client_id);
    connections.fetch_sub(1, Ordering::SeqCst);
    info!(client = %client_id, "WebSocket connection closed");
}

/// Apply one client command, returning an error frame to echo back if it
/// could not be applied.
async fn handle_command(
    dispatcher: &Arc<BroadcastDispatcher>,
    client_id: SubscriberId,
    tx: &mpsc::UnboundedSender<PushEvent>,
    text: &str,
) -> Option<PushEvent> {
    let command: ClientCommand = match serde_json::from_str(text) {
        Ok(command) => command,
        Err(_) => return Some(PushEvent::error("malformed command")),
    };
    let topic: TopicKey = match command.topic.parse() {
        Ok(topic) => topic,
        Err(e) => return Some(PushEvent::error(e.to_string())),
    };

    match command.op.as_str() {
        "subscribe" => match dispatcher.subscribe(&topic, client_id, tx.clone()).await {
            Ok(()) => None,
            Err(e) => Some(PushEvent::error(e.to_string())),
        },
        "unsubscribe" => {
            dispatcher.unsubscribe(&topic, &client_id);
            None
        }
        other => Some(PushEvent::error(format!("unknown op {:?}", other))),
    }
}
