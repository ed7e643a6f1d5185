//! Hot-plug Watcher (spec §4.6).
//!
//! Owns a subscription to kernel `tty` subsystem events. On start, every
//! currently-attached matching device is delivered as a synthetic `add`;
//! then the watcher polls the kernel event stream, yielding to a stop flag
//! within one poll interval. The `mio`-driven poll loop over a udev monitor
//! socket is grounded on `other_examples/.../metalos-lib-udev_utils`, which
//! uses the same `mio::Poll`/`Events`/`Token` shape to multiplex a udev
//! monitor socket with a stop signal.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::util::Closer;

const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// A hot-plug event delivered to the Discovery Supervisor.
#[derive(Clone, Debug)]
pub enum HotplugEvent {
    Add(String),
    Remove(String),
}

/// Runs the hot-plug watcher thread until stopped.
pub struct HotplugWatcher {
    stop: Arc<Closer>,
    handle: Option<JoinHandle<()>>,
}

impl HotplugWatcher {
    /// Starts the watcher: synthetic enumeration followed by a live event
    /// loop, both filtered to `path_prefixes` (spec §4.6).
    pub fn start(path_prefixes: Vec<String>, on_event: impl Fn(HotplugEvent) + Send + 'static) -> Self {
        let stop = Arc::new(Closer::new());
        let stop_for_thread = stop.clone();

        let handle = thread::Builder::new()
            .name("device_monitor".to_string())
            .spawn(move || {
                for path in enumerate_existing(&path_prefixes) {
                    on_event(HotplugEvent::Add(path));
                }
                run_event_loop(&path_prefixes, &stop_for_thread, &on_event);
            })
            .expect("failed to spawn hot-plug watcher thread");

        Self { stop, handle: Some(handle) }
    }

    /// Requests the watcher to stop and waits for its thread to exit.
    pub fn stop(mut self) {
        self.stop.close();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn matches_prefix(path: &str, prefixes: &[String]) -> bool {
    prefixes.iter().any(|prefix| path.starts_with(prefix.as_str()))
}

#[cfg(target_os = "linux")]
fn enumerate_existing(path_prefixes: &[String]) -> Vec<String> {
    let mut paths = Vec::new();

    let mut enumerator = match udev::Enumerator::new() {
        Ok(e) => e,
        Err(e) => {
            log::error!("failed to create udev enumerator: {e}");
            return paths;
        }
    };

    if let Err(e) = enumerator.match_subsystem("tty") {
        log::error!("failed to filter udev enumerator by subsystem: {e}");
        return paths;
    }

    let devices = match enumerator.scan_devices() {
        Ok(devices) => devices,
        Err(e) => {
            log::error!("failed to scan existing tty devices: {e}");
            return paths;
        }
    };

    for device in devices {
        if let Some(node) = device.devnode().and_then(|p| p.to_str()) {
            if matches_prefix(node, path_prefixes) {
                paths.push(node.to_string());
            }
        }
    }

    paths
}

#[cfg(target_os = "linux")]
fn run_event_loop(path_prefixes: &[String], stop: &Closer, on_event: &(impl Fn(HotplugEvent) + Send + 'static)) {
    use mio::{Events, Interest, Poll, Token};

    let socket = match udev::MonitorBuilder::new().and_then(|b| b.match_subsystem("tty")).and_then(|b| b.listen()) {
        Ok(socket) => socket,
        Err(e) => {
            log::error!("failed to open udev monitor socket: {e}");
            return;
        }
    };

    let mut poll = match Poll::new() {
        Ok(poll) => poll,
        Err(e) => {
            log::error!("failed to create mio poll: {e}");
            return;
        }
    };

    let mut socket = socket;
    const MONITOR_TOKEN: Token = Token(0);
    if let Err(e) = poll.registry().register(&mut socket, MONITOR_TOKEN, Interest::READABLE) {
        log::error!("failed to register udev monitor with poll: {e}");
        return;
    }

    let mut events = Events::with_capacity(8);

    while !stop.is_closed() {
        if let Err(e) = poll.poll(&mut events, Some(POLL_INTERVAL)) {
            if e.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            log::error!("udev monitor poll error: {e}");
            continue;
        }

        for event in socket.iter() {
            let action = event.event_type();
            let Some(node) = event.devnode().and_then(|p| p.to_str()) else {
                continue;
            };
            if !matches_prefix(node, path_prefixes) {
                continue;
            }

            match action {
                udev::EventType::Add => on_event(HotplugEvent::Add(node.to_string())),
                udev::EventType::Remove => on_event(HotplugEvent::Remove(node.to_string())),
                _ => {}
            }
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn enumerate_existing(_path_prefixes: &[String]) -> Vec<String> {
    Vec::new()
}

#[cfg(not(target_os = "linux"))]
fn run_event_loop(_path_prefixes: &[String], stop: &Closer, _on_event: &(impl Fn(HotplugEvent) + Send + 'static)) {
    while !stop.is_closed() {
        thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_matching_respects_configured_list() {
        let prefixes = vec!["/dev/ttyUSB".to_string(), "/dev/ttyACM".to_string()];
        assert!(matches_prefix("/dev/ttyUSB0", &prefixes));
        assert!(matches_prefix("/dev/ttyACM1", &prefixes));
        assert!(!matches_prefix("/dev/ttyS0", &prefixes));
    }
}
