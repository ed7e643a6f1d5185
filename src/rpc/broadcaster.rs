//! Periodic Broadcaster (spec §4.10).
//!
//! A single thread that, once a second while the RPC client is connected,
//! publishes a snapshot of every verified primary device to the shared
//! notification topic. Shaped after the other single-purpose worker
//! threads in this crate (`watcher.rs`, `verifier.rs`): a `Closer`-gated
//! loop owning exactly one `JoinHandle`.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde_json::json;

use crate::model::{now_iso8601, DeviceState};
use crate::rpc::client::RpcClient;
use crate::tracker::PhysicalTracker;
use crate::util::Closer;

const TICK: Duration = Duration::from_secs(1);
const NOTIFICATIONS_TOPIC: &str = "ur-shared-bus/ur-mavlink-stack/notifications";

pub struct PeriodicBroadcaster {
    stop: Arc<Closer>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicBroadcaster {
    pub fn start(client: Arc<RpcClient>, tracker: Arc<PhysicalTracker>, source: String) -> Self {
        let stop = Arc::new(Closer::new());
        let stop_for_thread = stop.clone();

        let handle = thread::Builder::new()
            .name("periodic-broadcaster".to_string())
            .spawn(move || run(&client, &tracker, &source, &stop_for_thread))
            .expect("failed to spawn periodic-broadcaster thread");

        Self { stop, handle: Some(handle) }
    }

    pub fn stop(mut self) {
        self.stop.close();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run(client: &RpcClient, tracker: &PhysicalTracker, source: &str, stop: &Closer) {
    while !stop.is_closed() {
        thread::sleep(TICK);
        if stop.is_closed() {
            break;
        }

        if !client.is_connected() {
            continue;
        }

        let payload: Vec<_> = tracker
            .all_physical()
            .into_iter()
            .filter(|device| device.snapshot.state == DeviceState::Verified)
            .map(|device| serde_json::to_value(device.snapshot.to_record_json()).unwrap_or(serde_json::Value::Null))
            .collect();

        let device_count = payload.len();
        let envelope = json!({
            "eventType": "DEVICE_LIST_UPDATE",
            "source": source,
            "timestamp": now_iso8601(),
            "payload": payload,
            "deviceCount": device_count,
            "targetTopic": NOTIFICATIONS_TOPIC,
        });

        let Ok(text) = serde_json::to_string(&envelope) else {
            log::error!("failed to serialize DEVICE_LIST_UPDATE envelope");
            continue;
        };

        if let Err(e) = client.publish(NOTIFICATIONS_TOPIC, text.as_bytes()) {
            log::warn!("failed to publish DEVICE_LIST_UPDATE: {e}");
        }
    }
}
