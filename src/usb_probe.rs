//! USB Metadata Probe (spec §4.2).
//!
//! Walks the kernel device tree from a `/dev/tty*` node up to the enclosing
//! USB device node and reads its identifying attributes. Device attributes
//! populate asynchronously on hot-plug, so a negative or partial result is
//! retried a bounded number of times before being accepted as final.
//!
//! Grounded on the udev-walk pattern in
//! `other_examples/.../metalos-lib-udev_utils` (subsystem-scoped device
//! lookup, parent traversal); uses the `udev` crate rather than hand-rolled
//! sysfs parsing, the idiomatic Rust binding for this (also used by
//! `other_examples/manifests/DoraCN-usb-resolver`). All `udev::Device`
//! values are scoped to the probing function and dropped on every return
//! path (including retry abandonment), releasing their kernel handles.

use std::thread;
use std::time::Duration;

use crate::model::{identify_board, UsbMetadata};

const MAX_ATTEMPTS: u32 = 3;
const RETRY_SPACING: Duration = Duration::from_millis(200);

/// Probes `path` for USB metadata, retrying per spec §4.2.
pub fn probe(path: &str) -> UsbMetadata {
    let mut last = UsbMetadata::default();

    for attempt in 1..=MAX_ATTEMPTS {
        let observed = probe_once(path);

        if observed.is_complete() {
            return finish(observed);
        }

        last = observed;

        if attempt < MAX_ATTEMPTS {
            log::debug!("USB metadata for {path} incomplete on attempt {attempt}, retrying");
            thread::sleep(RETRY_SPACING);
        }
    }

    log::warn!("USB metadata for {path} incomplete after {MAX_ATTEMPTS} attempts, using partial result");
    finish(last)
}

fn finish(mut usb: UsbMetadata) -> UsbMetadata {
    usb.synthesize_physical_id();
    let (class, name, autopilot) = identify_board(&usb.vendor_id, &usb.product_id, &usb.manufacturer, &usb.device_name);
    usb.board_class = class;
    if usb.device_name.is_empty() {
        usb.device_name = name.clone();
    }
    usb.board_name = name;
    usb.autopilot_type = autopilot;
    usb
}

#[cfg(target_os = "linux")]
fn probe_once(path: &str) -> UsbMetadata {
    let mut usb = UsbMetadata::default();

    let Some(sysname) = path.rsplit('/').next() else {
        return usb;
    };

    let device = match udev::Device::from_subsystem_sysname("tty".to_string(), sysname.to_string()) {
        Ok(device) => device,
        Err(e) => {
            log::debug!("udev lookup for {path} failed: {e}");
            return usb;
        }
    };

    let Some(usb_device) = device.parent_with_subsystem_devtype("usb", "usb_device").ok().flatten() else {
        log::debug!("{path} has no enclosing usb_device node");
        return usb;
    };

    usb.device_name = attr(&usb_device, "product");
    usb.manufacturer = attr(&usb_device, "manufacturer");
    usb.serial_number = attr(&usb_device, "serial");
    usb.vendor_id = attr(&usb_device, "idVendor").to_lowercase();
    usb.product_id = attr(&usb_device, "idProduct").to_lowercase();
    usb.bus_number = attr(&usb_device, "busnum");
    usb.device_address = attr(&usb_device, "devnum");

    usb
}

#[cfg(target_os = "linux")]
fn attr(device: &udev::Device, name: &str) -> String {
    device
        .attribute_value(name)
        .and_then(|v| v.to_str())
        .unwrap_or_default()
        .trim()
        .to_string()
}

#[cfg(not(target_os = "linux"))]
fn probe_once(_path: &str) -> UsbMetadata {
    UsbMetadata::default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_derives_board_and_physical_id() {
        let mut usb = UsbMetadata {
            device_name: "PX4 FMU V2".into(),
            manufacturer: "3D Robotics".into(),
            serial_number: "ABC".into(),
            vendor_id: "26AC".into(),
            product_id: "0011".into(),
            bus_number: "001".into(),
            device_address: "7".into(),
            ..Default::default()
        };
        usb.vendor_id = usb.vendor_id.to_lowercase();
        usb.product_id = usb.product_id.to_lowercase();

        let finished = finish(usb);
        assert_eq!(finished.physical_device_id, "001:26ac:0011:ABC");
        assert_eq!(finished.board_name, "PX4 FMU V2");
        assert_eq!(finished.autopilot_type, "PX4");
    }

    #[test]
    fn finish_on_empty_input_yields_generic_autopilot() {
        let finished = finish(UsbMetadata::default());
        assert_eq!(finished.autopilot_type, "Generic");
        assert!(finished.physical_device_id.is_empty());
    }
}
