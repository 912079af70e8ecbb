use std::collections::HashMap;
use lazy_static::lazy_static;
use tokio::sync::RwLock;
use crate::config::MqttConfig;
use log::{debug, error, info, warn};
use tokio::sync::mpsc::{Receiver, Sender};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;

pub struct PublishData {
    pub topic: String,
    pub payload: String,
    pub qos: u8,
    pub retain: bool,
}

pub struct SubscribeData {
    pub topic: String,
    pub sender: tokio::sync::mpsc::Sender<String>
}

pub enum Transmission {
    Subscribe(SubscribeData),
    Publish(PublishData)
}

pub struct MqttManager {
    rx: Receiver<Transmission>,
    exit_thread: bool,
    client: AsyncClient,
    base_topic: String,
}

pub struct Callbacks {
    calls: HashMap<String, Vec<tokio::sync::mpsc::Sender<String>>>,
}

impl Callbacks {
    pub fn new() -> Self {
        Callbacks { calls: HashMap::new() }
    }

    pub fn insert(&mut self, topic: String, callback: tokio::sync::mpsc::Sender<String>) {
        debug!("Adding callback for topic {topic}");
        self.calls.entry(topic).or_default().push(callback);
    }

    pub async fn send(&self, topic: &str, payload: String) {
        let Some(callbacks) = self.calls.get(topic) else {
            debug!("Send for unknown topic {topic}");
            return;
        };

        for call in callbacks {
            if call.send(payload.clone()).await.is_err() {
                warn!("Callback for {topic} is gone, message dropped");
            }
        }
    }

    pub fn get_topics(&self) -> Vec<String> {
        self.calls.keys().cloned().collect()
    }
}

impl Default for Callbacks {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static! {
    pub static ref CALLBACKS: RwLock<Callbacks> = RwLock::new(Callbacks::new());
}

pub fn to_qos(qos: u8) -> QoS {
    match qos {
        1 => QoS::AtLeastOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtMostOnce,
    }
}

impl MqttManager {
    pub fn new(config: &MqttConfig) -> (Self, Sender<Transmission>) {
        let (mtx, mrx) = tokio::sync::mpsc::channel(100);

        info!("MQTT connection to {}:{} starting up", config.host, config.port);
        let mut mqttoptions = MqttOptions::new(config.client_name.clone(), config.host.clone(), config.port);
        mqttoptions.set_keep_alive(Duration::from_secs(5));
        if !config.user.is_empty() {
            mqttoptions.set_credentials(config.user.clone(), config.pass.clone());
        }

        let (client, mut eventloop) = AsyncClient::new(mqttoptions, 10);

        // Spawn a new task to handle the incoming messages
        let reconnect_c = client.clone();
        tokio::spawn(async move {
            info!("MQTT Eventloop started");
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(p))) => {
                        let payload = match String::from_utf8(p.payload.to_vec()) {
                            Ok(payload) => payload,
                            Err(_) => {
                                warn!("Non UTF-8 payload on {} ignored", p.topic);
                                continue;
                            }
                        };
                        debug!("Received MQTT message on {}: {payload:?}", p.topic);

                        let callbacks = CALLBACKS.read().await;
                        callbacks.send(&p.topic, payload).await;
                    },
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("Connected, resubscribing everything");

                        /* We are connected, resubscribe to everything */
                        let topics = CALLBACKS.read().await.get_topics();
                        for topic in topics {
                            let client_clone = reconnect_c.clone();
                            tokio::spawn(async move {
                                if let Err(e) = client_clone.subscribe(topic.clone(), QoS::AtLeastOnce).await {
                                    error!("Resubscribing {topic} failed: {e}");
                                }
                            });
                        }
                    },
                    Ok(_) => {},
                    Err(e) => {
                        error!("Error in MQTT {:?}, reconnecting ", e);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        (MqttManager {
            client,
            rx: mrx,
            exit_thread: false,
            base_topic: config.base_topic.trim_end_matches('/').to_string(),
        }, mtx)
    }

    pub async fn start_thread(&mut self) {
        while !self.exit_thread {
            let Some(transmission) = self.rx.recv().await else {
                debug!("Reading returned none, we exit now");
                self.exit_thread = true;
                continue;
            };

            match transmission {
                Transmission::Subscribe(subscribe_data) => {
                    let topic = format!("{}/{}", self.base_topic, subscribe_data.topic);
                    match self.client.subscribe(topic.clone(), QoS::AtLeastOnce).await {
                        Ok(_) => {
                            CALLBACKS.write().await.insert(topic.clone(), subscribe_data.sender);
                            info!("Registered Callback {topic}");
                        }
                        Err(e) => error!("Subscribing {topic} failed: {e}"),
                    }
                },
                Transmission::Publish(publish_data) => {
                    match self.client.publish(
                        publish_data.topic,
                        to_qos(publish_data.qos),
                        publish_data.retain,
                        publish_data.payload
                    ).await {
                        Err(e) => { error!("Error publishing: {}", e); },
                        Ok(_) => { debug!("Published successfully"); }
                    }
                },
            };
        }

        info!("MQTT thread exit");
    }
}
