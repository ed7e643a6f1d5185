//! Runtime: wires the Hot-plug Watcher, Discovery Supervisor, RPC Client,
//! Request Dispatcher, and Periodic Broadcaster into one running daemon,
//! and encodes the shutdown order from spec §9 ("Shutdown race"): the
//! watcher stops first and its queued events drain, then the supervisor
//! (and any in-flight verifiers), then the RPC stack.

use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::json;

use crate::config::{PackageConfig, RpcConfig};
use crate::rpc::{PeriodicBroadcaster, RpcClient, RpcDispatcher};
use crate::store::DeviceStateStore;
use crate::supervisor::{DiscoverySupervisor, SupervisorEvent};
use crate::tracker::PhysicalTracker;
use crate::util::Closer;
use crate::watcher::HotplugWatcher;

const FANOUT_TOPICS: &[&str] = &["direct_messaging/ur-mavrouter/requests", "direct_messaging/ur-mavcollector/requests"];
const FANOUT_POLL: Duration = Duration::from_millis(200);

/// The fully wired daemon. Construct with [`Runtime::start`], then call
/// [`Runtime::run_until`] or drive the provided shutdown signal externally.
pub struct Runtime {
    watcher: Option<HotplugWatcher>,
    supervisor: Arc<DiscoverySupervisor>,
    dispatcher: Arc<RpcDispatcher>,
    broadcaster: Option<PeriodicBroadcaster>,
    rpc_client: Arc<RpcClient>,
    fanout_stop: Arc<Closer>,
    fanout_thread: Option<std::thread::JoinHandle<()>>,
}

impl Runtime {
    /// Starts every component. On any unrecoverable failure (e.g. the
    /// broker connection not coming up within the configured window) the
    /// already-started components are torn down and the error propagated,
    /// so callers never leak partially-started daemons.
    pub fn start(package_config: PackageConfig, rpc_config: RpcConfig) -> crate::error::Result<Self> {
        let store = Arc::new(DeviceStateStore::new());
        let tracker = Arc::new(PhysicalTracker::new());
        let (events_tx, events_rx) = mpsc::channel::<SupervisorEvent>();

        let supervisor = DiscoverySupervisor::new(Arc::new(package_config.clone()), store.clone(), tracker.clone(), events_tx);

        let dispatcher_slot: Arc<std::sync::Mutex<Option<Arc<RpcDispatcher>>>> = Arc::new(std::sync::Mutex::new(None));
        let dispatcher_slot_for_client = dispatcher_slot.clone();

        let rpc_client = RpcClient::start(rpc_config.clone(), move |payload| {
            if let Some(dispatcher) = dispatcher_slot_for_client.lock().expect("dispatcher slot poisoned").as_ref() {
                dispatcher.handle_request(payload);
            }
        })?;

        let dispatcher = RpcDispatcher::new(store.clone(), tracker.clone(), supervisor.clone(), rpc_client.clone());
        *dispatcher_slot.lock().expect("dispatcher slot poisoned") = Some(dispatcher.clone());

        let fanout_stop = Arc::new(Closer::new());
        let fanout_thread = spawn_fanout(events_rx, rpc_client.clone(), fanout_stop.clone());

        let broadcaster = PeriodicBroadcaster::start(rpc_client.clone(), tracker.clone(), rpc_config.client_id.clone());

        let supervisor_for_watcher = supervisor.clone();
        let watcher = HotplugWatcher::start(package_config.device_path_filters.clone(), move |event| {
            supervisor_for_watcher.handle_hotplug(event);
        });

        Ok(Self {
            watcher: Some(watcher),
            supervisor,
            dispatcher,
            broadcaster: Some(broadcaster),
            rpc_client,
            fanout_stop,
            fanout_thread: Some(fanout_thread),
        })
    }

    /// Orderly shutdown, per spec §9: watcher first (stop accepting new
    /// hot-plug events and let queued ones drain through the supervisor),
    /// then the supervisor's verifiers, then the RPC stack.
    ///
    /// The fan-out thread is stopped via an explicit `Closer` rather than
    /// relying on its channel closing: the supervisor and dispatcher below
    /// both hold an `Arc` back to the event sender's owner, so the channel
    /// would not actually disconnect until after this method returns,
    /// deadlocking a join on the fan-out thread.
    pub fn shutdown(mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.stop();
        }

        self.supervisor.shutdown();

        if let Some(broadcaster) = self.broadcaster.take() {
            broadcaster.stop();
        }

        self.dispatcher.shutdown();
        self.rpc_client.stop();

        self.fanout_stop.close();
        if let Some(handle) = self.fanout_thread.take() {
            let _ = handle.join();
        }
    }
}

fn spawn_fanout(events_rx: mpsc::Receiver<SupervisorEvent>, client: Arc<RpcClient>, stop: Arc<Closer>) -> std::thread::JoinHandle<()> {
    std::thread::Builder::new()
        .name("event-fanout".to_string())
        .spawn(move || loop {
            match events_rx.recv_timeout(FANOUT_POLL) {
                Ok(SupervisorEvent::DeviceAdded(record)) => {
                    publish_fanout(&client, "mavlink_added", serde_json::to_value(record.to_record_json()).unwrap_or_default());
                }
                Ok(SupervisorEvent::DeviceRemoved { device_path, timestamp }) => {
                    publish_fanout(&client, "device_removed", json!({ "devicePath": device_path, "timestamp": timestamp }));
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    if stop.is_closed() {
                        break;
                    }
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        })
        .expect("failed to spawn event-fanout thread")
}

fn publish_fanout(client: &RpcClient, method: &str, params: serde_json::Value) {
    let id = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis()).unwrap_or(0);
    let envelope = json!({ "method": method, "params": params, "id": id });
    let Ok(text) = serde_json::to_string(&envelope) else {
        log::error!("failed to serialize {method} fan-out envelope");
        return;
    };
    for topic in FANOUT_TOPICS {
        if let Err(e) = client.publish(topic, text.as_bytes()) {
            log::warn!("failed to publish {method} to {topic}: {e}");
        }
    }
}
