//! RPC Client (spec §4.8): one broker connection per daemon instance.
//!
//! Wraps `rumqttc`'s synchronous client/connection pair the way
//! `maviola/src/sync/io/transport/serial/serial.rs` wraps `serialport`: a
//! thin owner type that spawns exactly one driver thread and exposes a
//! narrow, blocking API to the rest of the crate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rumqttc::{Client, Connection, Event, MqttOptions, Packet, QoS};

use crate::config::RpcConfig;
use crate::error::{Error, Result};

const START_TIMEOUT: Duration = Duration::from_secs(3);

fn to_qos(qos: u8) -> QoS {
    match qos {
        0 => QoS::AtMostOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtLeastOnce,
    }
}

/// Owns the broker connection and its driver/heartbeat threads.
pub struct RpcClient {
    config: RpcConfig,
    client: Mutex<Client>,
    connected: Arc<AtomicBool>,
    driver: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
    stop: Arc<crate::util::Closer>,
}

impl RpcClient {
    /// Connects to the broker and starts the connection driver thread.
    /// `on_request` is invoked, from the driver thread, for every message
    /// that arrives on `direct_messaging/<clientId>/requests`; all other
    /// topics are dropped silently (spec §4.8 subscription contract).
    ///
    /// Blocks up to 3s for the initial `ConnAck`; returns
    /// [`Error::Broker`] if the connection is not confirmed within that
    /// window, matching `start()`'s documented failure semantics.
    pub fn start(config: RpcConfig, on_request: impl Fn(String) + Send + 'static) -> Result<Arc<Self>> {
        let mut options = MqttOptions::new(config.client_id.clone(), config.broker_host.clone(), config.broker_port);
        options.set_keep_alive(Duration::from_secs(config.keepalive.max(5)));
        options.set_connection_timeout(config.connect_timeout);

        if config.use_tls {
            log::warn!("useTls requested but no certificate material is configured; connecting in plaintext");
        }

        let (client, connection) = Client::new(options, 64);

        let request_topic = config.request_topic();
        client
            .subscribe(&request_topic, to_qos(config.qos))
            .map_err(|e| Error::Broker(format!("failed to subscribe to {request_topic}: {e}")))?;

        let connected = Arc::new(AtomicBool::new(false));
        let stop = Arc::new(crate::util::Closer::new());

        let driver = spawn_driver(connection, connected.clone(), stop.clone(), request_topic, on_request);

        let deadline = Instant::now() + START_TIMEOUT;
        while Instant::now() < deadline {
            if connected.load(Ordering::SeqCst) {
                let heartbeat = spawn_heartbeat(&client, &config, connected.clone(), stop.clone());
                return Ok(Arc::new(Self {
                    config,
                    client: Mutex::new(client),
                    connected,
                    driver: Some(driver),
                    heartbeat,
                    stop,
                }));
            }
            thread::sleep(Duration::from_millis(20));
        }

        stop.close();
        let _ = driver.join();
        Err(Error::Broker(format!("broker connection to {}:{} not established within 3s", config.broker_host, config.broker_port)))
    }

    /// Whether the broker connection is currently up.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Publishes `payload` to `topic` at the client's configured QoS.
    pub fn publish(&self, topic: &str, payload: &[u8]) -> Result<()> {
        let client = self.client.lock().expect("rpc client mutex poisoned");
        client
            .publish(topic, to_qos(self.config.qos), false, payload)
            .map_err(|e| Error::Broker(format!("publish to {topic} failed: {e}")))
    }

    /// The reply topic for this client's requests.
    pub fn response_topic(&self) -> String {
        self.config.response_topic()
    }

    /// Disconnects and joins the driver/heartbeat threads.
    pub fn stop(&self) {
        self.stop.close();
        {
            let client = self.client.lock().expect("rpc client mutex poisoned");
            let _ = client.disconnect();
        }
    }
}

fn spawn_driver(
    mut connection: Connection,
    connected: Arc<AtomicBool>,
    stop: Arc<crate::util::Closer>,
    request_topic: String,
    on_request: impl Fn(String) + Send + 'static,
) -> JoinHandle<()> {
    thread::Builder::new()
        .name("rpc-io".to_string())
        .spawn(move || {
            for event in connection.iter() {
                if stop.is_closed() {
                    break;
                }
                match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        connected.store(true, Ordering::SeqCst);
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        connected.store(false, Ordering::SeqCst);
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        if publish.topic != request_topic {
                            continue;
                        }
                        match String::from_utf8(publish.payload.to_vec()) {
                            Ok(text) => on_request(text),
                            Err(e) => log::warn!("dropped non-UTF8 request payload: {e}"),
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        connected.store(false, Ordering::SeqCst);
                        log::warn!("broker connection error: {e}");
                    }
                }
            }
        })
        .expect("failed to spawn rpc-io thread")
}

fn spawn_heartbeat(
    client: &Client,
    config: &RpcConfig,
    connected: Arc<AtomicBool>,
    stop: Arc<crate::util::Closer>,
) -> Option<JoinHandle<()>> {
    if !config.heartbeat.enabled {
        return None;
    }

    let client = client.clone();
    let topic = config.heartbeat.topic.clone();
    let payload = config.heartbeat.payload.clone();
    let interval = Duration::from_secs(config.heartbeat.interval_seconds.max(1));
    let qos = to_qos(config.qos);

    Some(
        thread::Builder::new()
            .name("rpc-heartbeat".to_string())
            .spawn(move || {
                while !stop.is_closed() {
                    thread::sleep(interval);
                    if stop.is_closed() {
                        break;
                    }
                    if !connected.load(Ordering::SeqCst) {
                        continue;
                    }
                    if let Err(e) = client.publish(&topic, qos, false, payload.as_bytes()) {
                        log::warn!("heartbeat publish to {topic} failed: {e}");
                    }
                }
            })
            .expect("failed to spawn rpc-heartbeat thread"),
    )
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.stop.close();
        if let Some(handle) = self.driver.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.heartbeat.take() {
            let _ = handle.join();
        }
    }
}
