//! Byte sources feeding the DLMS task.
//!
//! Every source only forwards raw chunks into one channel; the single
//! consumer on the other end owns buffer and decoder.

use log::{debug, error, info, warn};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::Sender;

use crate::mqtt::{SubscribeData, Transmission};

const READ_CHUNK_SIZE: usize = 1024;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connect(#[from] std::io::Error),
    #[error("Connection attempt timed out")]
    Timeout,
    #[error("Consumer of the byte stream is gone")]
    Closed,
}

/// Reads a raw byte stream from a TCP endpoint, e.g. a serial-to-network
/// bridge, and reconnects when the connection drops.
pub struct TcpSource {
    host: String,
    port: u16,
    reconnect: Duration,
    sender: Sender<Vec<u8>>,
}

impl TcpSource {
    pub fn new(host: &str, port: u16, reconnect_secs: u64, sender: Sender<Vec<u8>>) -> Self {
        TcpSource {
            host: host.to_string(),
            port,
            reconnect: Duration::from_secs(reconnect_secs),
            sender,
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    async fn connect(&self) -> Result<TcpStream, TransportError> {
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(self.address()))
            .await
            .map_err(|_| TransportError::Timeout)??;
        Ok(stream)
    }

    /// Forwards everything read from `stream` until EOF
    pub async fn pump<S: AsyncRead + Unpin>(&self, stream: &mut S) -> Result<usize, TransportError> {
        let mut total = 0;
        let mut buf = [0u8; READ_CHUNK_SIZE];
        loop {
            let n = stream.read(&mut buf).await?;
            if n == 0 {
                return Ok(total);
            }
            total += n;
            debug!("TCP read {} bytes: {}", n, hex::encode(&buf[..n]));
            self.sender.send(buf[..n].to_vec()).await.map_err(|_| TransportError::Closed)?;
        }
    }

    pub async fn start_thread(&mut self) {
        info!("Starting TCP input from {}", self.address());

        loop {
            match self.connect().await {
                Ok(mut stream) => {
                    info!("Connected to {}", self.address());
                    match self.pump(&mut stream).await {
                        Ok(total) => warn!("{} closed the connection after {} bytes", self.address(), total),
                        Err(TransportError::Closed) => break,
                        Err(e) => warn!("Reading from {} failed: {}", self.address(), e),
                    }
                }
                Err(e) => error!("Cannot connect to {}: {}", self.address(), e),
            }

            if self.sender.is_closed() {
                break;
            }
            tokio::time::sleep(self.reconnect).await;
        }

        info!("TCP input from {} stopped", self.address());
    }
}

/// Hex encoded frames published on an MQTT topic
pub struct MqttHexInput {
    mqtt: Sender<Transmission>,
    topic: String,
    sender: Sender<Vec<u8>>,
}

impl MqttHexInput {
    pub fn new(mqtt: Sender<Transmission>, topic: &str, sender: Sender<Vec<u8>>) -> Self {
        MqttHexInput { mqtt, topic: topic.to_string(), sender }
    }

    pub async fn start_thread(&mut self) {
        info!("Starting MQTT input on {}", self.topic);

        let (sender, mut receiver) = tokio::sync::mpsc::channel(10);
        let register = Transmission::Subscribe(SubscribeData {
            topic: self.topic.clone(),
            sender,
        });

        if self.mqtt.send(register).await.is_err() {
            error!("MQTT thread is gone, cannot subscribe to {}", self.topic);
            return;
        }

        while let Some(payload_hex) = receiver.recv().await {
            let Some(payload) = decode_hex_payload(&payload_hex) else {
                error!("Non hex string received: {}", payload_hex);
                continue;
            };

            if self.sender.send(payload).await.is_err() {
                break;
            }
        }

        info!("MQTT input on {} stopped", self.topic);
    }
}

/// Accepts plain or whitespace separated hex ("7ea0..." or "7E A0 ...")
pub fn decode_hex_payload(payload: &str) -> Option<Vec<u8>> {
    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return None;
    }
    hex::decode(compact).ok()
}
