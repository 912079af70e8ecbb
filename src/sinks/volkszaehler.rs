//! HTTP push of power readings to a Volkszaehler middleware.
//!
//! Only consumed and supplied active power are forwarded, each to its own
//! channel UUID. The decode task only queues request URLs; a separate task
//! performs the requests so a slow middleware never stalls decoding.

use chrono::{Local, NaiveDateTime};
use log::{debug, error, info, warn};
use reqwest::Client;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::{Receiver, Sender};

use super::{DataSink, SinkError};
use crate::config::VolkszaehlerConfig;
use crate::models::{MeterDataPoint, MeterDataPointType};

const QUEUE_SIZE: usize = 100;

/// Builds `<url>/<uuid>.json?operation=add&ts=<ms>&value=<v>` requests
#[derive(Debug, Clone, PartialEq)]
pub struct VolkszaehlerChannels {
    url: String,
    consumed_uuid: String,
    supplied_uuid: String,
    value_divisor: f64,
}

impl VolkszaehlerChannels {
    pub fn new(config: &VolkszaehlerConfig) -> Self {
        VolkszaehlerChannels {
            url: config.url.trim_end_matches('/').to_string(),
            consumed_uuid: config.consumed_uuid.clone(),
            supplied_uuid: config.supplied_uuid.clone(),
            value_divisor: config.value_divisor,
        }
    }

    /// `None` for data points without a Volkszaehler channel
    pub fn url_for(&self, point: &MeterDataPoint) -> Option<String> {
        let uuid = match point.data_point_type {
            MeterDataPointType::ActivePowerP => &self.consumed_uuid,
            MeterDataPointType::ActivePowerN => &self.supplied_uuid,
            _ => return None,
        };
        Some(format!(
            "{}/{}.json?operation=add&ts={}&value={:.3}",
            self.url,
            uuid,
            timestamp_millis(point.timestamp),
            point.value / self.value_divisor
        ))
    }
}

/// Meter timestamps are local wall-clock time
fn timestamp_millis(ts: NaiveDateTime) -> i64 {
    match ts.and_local_timezone(Local).earliest() {
        Some(local) => local.timestamp_millis(),
        /* skipped by a DST change */
        None => ts.and_utc().timestamp_millis(),
    }
}

pub struct VolkszaehlerSink {
    channels: VolkszaehlerChannels,
    sender: Sender<String>,
}

impl DataSink for VolkszaehlerSink {
    fn send(&self, point: &MeterDataPoint) -> Result<(), SinkError> {
        let Some(url) = self.channels.url_for(point) else {
            return Ok(());
        };
        self.sender.try_send(url).map_err(|e| match e {
            TrySendError::Full(_) => SinkError::QueueFull,
            TrySendError::Closed(_) => SinkError::Closed,
        })
    }

    fn name(&self) -> &'static str {
        "volkszaehler"
    }
}

/// Performs the queued requests
pub struct VolkszaehlerManager {
    client: Client,
    receiver: Receiver<String>,
}

impl VolkszaehlerManager {
    pub fn new(config: &VolkszaehlerConfig) -> Result<(Self, VolkszaehlerSink), SinkError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SinkError::Http(e.to_string()))?;

        let (sender, receiver) = tokio::sync::mpsc::channel(QUEUE_SIZE);
        let sink = VolkszaehlerSink { channels: VolkszaehlerChannels::new(config), sender };
        Ok((VolkszaehlerManager { client, receiver }, sink))
    }

    pub async fn start_thread(&mut self) {
        info!("Setting up Volkszaehler sink");

        while let Some(url) = self.receiver.recv().await {
            debug!("Send to: {}", url);
            match self.client.get(&url).send().await {
                Ok(response) if response.status().is_success() => {}
                Ok(response) => warn!("Volkszaehler answered {} for {}", response.status(), url),
                Err(e) => error!("Failed to send to {}: {}", url, e),
            }
        }

        info!("Volkszaehler sink stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn config(url: &str) -> VolkszaehlerConfig {
        VolkszaehlerConfig {
            url: url.to_string(),
            consumed_uuid: "33753cb0-60d0-11eb-84c2-33d111946db0".to_string(),
            supplied_uuid: "6f539360-60d0-11eb-97c8-e7dff8db1d3c".to_string(),
            value_divisor: 1000.0,
            timeout_secs: 5,
        }
    }

    fn point(data_point_type: MeterDataPointType, value: f64) -> MeterDataPoint {
        let ts = NaiveDate::from_ymd_opt(2022, 3, 1).unwrap().and_hms_opt(12, 0, 0).unwrap();
        MeterDataPoint::new(data_point_type, value, "e450", ts)
    }

    fn expected_millis() -> i64 {
        let ts = NaiveDate::from_ymd_opt(2022, 3, 1).unwrap().and_hms_opt(12, 0, 0).unwrap();
        ts.and_local_timezone(Local).unwrap().timestamp_millis()
    }

    #[test]
    fn test_url_mapping() {
        let channels = VolkszaehlerChannels::new(&config("http://127.0.0.1/api/data/"));

        assert_eq!(
            channels.url_for(&point(MeterDataPointType::ActivePowerP, 1234.0)).unwrap(),
            format!(
                "http://127.0.0.1/api/data/33753cb0-60d0-11eb-84c2-33d111946db0.json?operation=add&ts={}&value=1.234",
                expected_millis()
            )
        );
        assert_eq!(
            channels.url_for(&point(MeterDataPointType::ActivePowerN, 500.0)).unwrap(),
            format!(
                "http://127.0.0.1/api/data/6f539360-60d0-11eb-97c8-e7dff8db1d3c.json?operation=add&ts={}&value=0.500",
                expected_millis()
            )
        );
        assert_eq!(channels.url_for(&point(MeterDataPointType::ActiveEnergyPTotal, 1.0)), None);
    }

    #[tokio::test]
    async fn test_sink_only_queues_power() {
        let (_manager, sink) = VolkszaehlerManager::new(&config("http://127.0.0.1/api/data")).unwrap();
        assert!(sink.send(&point(MeterDataPointType::ReactivePowerP, 1.0)).is_ok());
        assert_eq!(sink.sender.capacity(), QUEUE_SIZE);
        assert!(sink.send(&point(MeterDataPointType::ActivePowerP, 1.0)).is_ok());
        assert_eq!(sink.sender.capacity(), QUEUE_SIZE - 1);
    }

    #[tokio::test]
    async fn test_sink_reports_closed_queue() {
        let (manager, sink) = VolkszaehlerManager::new(&config("http://127.0.0.1/api/data")).unwrap();
        drop(manager);
        assert_eq!(sink.send(&point(MeterDataPointType::ActivePowerN, 1.0)), Err(SinkError::Closed));
    }

    #[tokio::test]
    async fn test_manager_performs_request() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (line_tx, mut line_rx) = tokio::sync::mpsc::channel(1);
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 512];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            socket.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n").await.unwrap();
            let request = String::from_utf8_lossy(&request).to_string();
            let first_line = request.lines().next().unwrap_or_default().to_string();
            line_tx.send(first_line).await.unwrap();
        });

        let (mut manager, sink) = VolkszaehlerManager::new(&config(&format!("http://127.0.0.1:{}/api/data", port))).unwrap();
        sink.send(&point(MeterDataPointType::ActivePowerP, 2000.0)).unwrap();
        drop(sink);
        manager.start_thread().await;

        let first_line = line_rx.recv().await.unwrap();
        assert_eq!(
            first_line,
            format!(
                "GET /api/data/33753cb0-60d0-11eb-84c2-33d111946db0.json?operation=add&ts={}&value=2.000 HTTP/1.1",
                expected_millis()
            )
        );
    }
}
