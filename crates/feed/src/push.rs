//! WebSocket push channel with bounded reconnect backoff.
//!
//! Delivers individual feed events to the store as the backend produces
//! them. Connection state is published on a watch channel for the
//! supervisor; after the retry budget is exhausted the channel parks
//! permanently and delivery is left entirely to the poller.

use crate::store::FeedStore;
use common::error::{Error, Result};
use common::ControlCommand;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::interval;
use tokio_tungstenite::{
    client_async_tls_with_config,
    tungstenite::protocol::{frame::coding::CloseCode, CloseFrame, Message},
    Connector,
};
use tracing::{debug, error, info, warn};
use url::Url;

/// Connection lifecycle of the push channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never asked to connect.
    Idle,
    /// Handshake in progress (initial connect or a scheduled retry).
    Connecting,
    /// Connected; frames are flowing.
    Open,
    /// Disconnected. `permanent` means the retry budget is exhausted and
    /// no further attempt will be made.
    Closed { reason: String, permanent: bool },
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }

    pub fn is_permanently_closed(&self) -> bool {
        matches!(self, ConnectionState::Closed { permanent: true, .. })
    }
}

/// Configuration for the push channel.
#[derive(Debug, Clone)]
pub struct PushChannelConfig {
    /// Interval between client ping frames.
    pub ping_interval: Duration,
    /// Base delay for the first reconnect attempt.
    pub base_backoff: Duration,
    /// Ceiling for the exponential backoff.
    pub max_backoff: Duration,
    /// Reconnect attempts before parking permanently.
    pub max_attempts: u32,
    /// Timeout for each TCP connect attempt.
    pub connect_timeout: Duration,
}

impl Default for PushChannelConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            base_backoff: Duration::from_millis(1000),
            max_backoff: Duration::from_millis(30_000),
            max_attempts: 5,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl PushChannelConfig {
    /// Delay before retry number `attempt` (0-based):
    /// `min(base * 2^attempt, max)`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

/// WebSocket push channel feeding the shared store.
pub struct PushChannel {
    url: String,
    store: FeedStore,
    config: PushChannelConfig,
    command_rx: mpsc::Receiver<ControlCommand>,
    state_tx: watch::Sender<ConnectionState>,
}

impl PushChannel {
    /// Create a new push channel. Returns the channel and a watch
    /// receiver the supervisor uses to observe connection state.
    pub fn new(
        url: impl Into<String>,
        store: FeedStore,
        config: PushChannelConfig,
        command_rx: mpsc::Receiver<ControlCommand>,
    ) -> (Self, watch::Receiver<ConnectionState>) {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        (
            Self {
                url: url.into(),
                store,
                config,
                command_rx,
                state_tx,
            },
            state_rx,
        )
    }

    fn set_state(&self, state: ConnectionState) {
        let _ = self.state_tx.send(state);
    }

    /// Route one inbound payload through the codec into the store.
    /// Decode errors are logged and swallowed, never fatal.
    fn handle_frame(store: &FeedStore, raw: &str) {
        match codec::decode(raw) {
            Ok(event) => {
                store.apply_push(event);
            }
            Err(e) => {
                debug!("Discarding undecodable frame: {}", e);
                counter!("feed_decode_errors_total", "transport" => "push").increment(1);
            }
        }
    }

    /// Run the push channel until shutdown or until the retry budget is
    /// exhausted. Never returns an error: total push failure downgrades
    /// delivery to polling-only instead of surfacing a hard failure.
    pub async fn run(mut self) {
        let mut attempt: u32 = 0;

        loop {
            self.set_state(ConnectionState::Connecting);

            let result = self.connect_and_run_loop(&mut attempt).await;
            gauge!("feed_connection_open").set(0.0);

            match result {
                Ok(()) => {
                    info!("Push channel closed gracefully");
                    self.set_state(ConnectionState::Closed {
                        reason: "shutdown".to_string(),
                        permanent: true,
                    });
                    return;
                }
                Err(e) => {
                    counter!("feed_push_reconnects_total").increment(1);

                    if attempt >= self.config.max_attempts {
                        warn!(
                            "Push channel parked after {} failed attempts: {}; \
                             delivery continues via polling",
                            attempt, e
                        );
                        self.set_state(ConnectionState::Closed {
                            reason: e.to_string(),
                            permanent: true,
                        });
                        return;
                    }

                    let delay = self.config.backoff_delay(attempt);
                    attempt += 1;
                    warn!("Push channel disconnected: {}, reconnecting in {:?}", e, delay);
                    self.set_state(ConnectionState::Closed {
                        reason: e.to_string(),
                        permanent: false,
                    });

                    // The backoff sleep races the control channel so a
                    // teardown mid-backoff can never fire a stale retry.
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        cmd = self.command_rx.recv() => {
                            if matches!(cmd, Some(ControlCommand::Shutdown) | None) {
                                info!("Push channel shutdown during backoff");
                                self.set_state(ConnectionState::Closed {
                                    reason: "shutdown".to_string(),
                                    permanent: true,
                                });
                                return;
                            }
                        }
                    }
                }
            }
        }
    }

    async fn connect_and_run_loop(&mut self, attempt: &mut u32) -> Result<()> {
        info!("Connecting to push endpoint: {}", self.url);

        let url = Url::parse(&self.url)?;
        let host = url
            .host_str()
            .ok_or_else(|| Error::Generic("No host in URL".to_string()))?;
        let default_port = if url.scheme() == "wss" { 443 } else { 80 };
        let port = url.port().unwrap_or(default_port);
        let addr_str = format!("{}:{}", host, port);

        // Resolve DNS and prefer IPv4 to avoid IPv6 timeout issues
        let addrs: Vec<SocketAddr> = addr_str
            .to_socket_addrs()
            .map_err(|e| Error::Generic(format!("DNS resolution failed: {}", e)))?
            .collect();

        let mut sorted_addrs: Vec<SocketAddr> =
            addrs.iter().filter(|a| a.is_ipv4()).copied().collect();
        sorted_addrs.extend(addrs.iter().filter(|a| a.is_ipv6()).copied());

        debug!("Resolved addresses (IPv4 first): {:?}", sorted_addrs);

        let mut tcp_stream = None;
        for addr in &sorted_addrs {
            match tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(addr)).await
            {
                Ok(Ok(stream)) => {
                    debug!("TCP connected to {}", addr);
                    tcp_stream = Some(stream);
                    break;
                }
                Ok(Err(e)) => {
                    debug!("TCP connect to {} failed: {}", addr, e);
                }
                Err(_) => {
                    debug!("TCP connect to {} timed out", addr);
                }
            }
        }

        let tcp_stream = tcp_stream
            .ok_or_else(|| Error::Generic("All connection attempts failed".to_string()))?;

        let mut root_store = rustls::RootCertStore::empty();
        let certs = rustls_native_certs::load_native_certs();
        for cert in certs.certs {
            let _ = root_store.add(cert);
        }

        let connector = Connector::Rustls(Arc::new(
            rustls::ClientConfig::builder_with_provider(Arc::new(
                rustls::crypto::ring::default_provider(),
            ))
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::Generic(format!("TLS config error: {}", e)))?
            .with_root_certificates(root_store)
            .with_no_client_auth(),
        ));

        let (ws_stream, response) =
            client_async_tls_with_config(self.url.as_str(), tcp_stream, None, Some(connector))
                .await?;

        debug!("WebSocket handshake complete, status: {:?}", response.status());
        let (mut write, mut read) = ws_stream.split();

        // Reaching Open resets the retry budget.
        *attempt = 0;
        self.set_state(ConnectionState::Open);
        gauge!("feed_connection_open").set(1.0);
        info!("Push channel connected");

        let mut ping_interval = interval(self.config.ping_interval);
        ping_interval.reset(); // Don't fire immediately

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            Self::handle_frame(&self.store, &text);
                        }
                        Some(Ok(Message::Binary(data))) => {
                            match std::str::from_utf8(&data) {
                                Ok(text) => Self::handle_frame(&self.store, text),
                                Err(_) => {
                                    debug!("Discarding non-UTF8 binary frame");
                                    counter!("feed_decode_errors_total", "transport" => "push")
                                        .increment(1);
                                }
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            debug!("Received ping, sending pong");
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            debug!("Received pong");
                        }
                        Some(Ok(Message::Close(frame))) => {
                            info!("Received close frame: {:?}", frame);
                            return Err(Error::ConnectionClosed);
                        }
                        Some(Ok(Message::Frame(_))) => {
                            // Raw frame, ignore
                        }
                        Some(Err(e)) => {
                            error!("WebSocket error: {:?}", e);
                            return Err(Error::WebSocket(e));
                        }
                        None => {
                            info!("WebSocket stream ended");
                            return Err(Error::ConnectionClosed);
                        }
                    }
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(ControlCommand::Shutdown) => {
                            info!("Push channel received shutdown command");
                            let close_frame = CloseFrame {
                                code: CloseCode::Normal,
                                reason: "Shutdown".into(),
                            };
                            let _ = write.send(Message::Close(Some(close_frame))).await;
                            return Ok(());
                        }
                        None => {
                            // Command channel closed, treat as shutdown
                            info!("Push channel command channel closed");
                            return Ok(());
                        }
                    }
                }

                _ = ping_interval.tick() => {
                    debug!("Sending ping");
                    write.send(Message::Ping(vec![])).await?;
                }
            }
        }
    }
}
