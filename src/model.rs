//! Data model shared by every component (spec §3).

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a device path (spec §3).
///
/// Monotonic in normal flow: `Unknown -> Verifying -> (Verified | NonMavlink)`,
/// with `Verified -> Removed` on unplug. Once `Verified` or `NonMavlink` has
/// been observed for a (path, plug-cycle), a transition back to `Verifying`
/// is forbidden — a fresh plug cycle creates a fresh record instead of
/// resurrecting the old one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceState {
    Unknown,
    Verifying,
    Verified,
    NonMavlink,
    Removed,
}

impl DeviceState {
    /// Whether this state is terminal for a given plug cycle (spec §3).
    pub fn is_terminal(self) -> bool {
        matches!(self, DeviceState::Verified | DeviceState::NonMavlink)
    }

    /// Encodes the variant as a `u8` for storage in an `AtomicU8` (spec §5:
    /// state is independently observable, updated atomically with respect
    /// to the store's readers).
    pub fn as_u8(self) -> u8 {
        match self {
            DeviceState::Unknown => 0,
            DeviceState::Verifying => 1,
            DeviceState::Verified => 2,
            DeviceState::NonMavlink => 3,
            DeviceState::Removed => 4,
        }
    }

    /// Inverse of [`DeviceState::as_u8`].
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => DeviceState::Verifying,
            2 => DeviceState::Verified,
            3 => DeviceState::NonMavlink,
            4 => DeviceState::Removed,
            _ => DeviceState::Unknown,
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceState::Unknown => "Unknown",
            DeviceState::Verifying => "Verifying",
            DeviceState::Verified => "Verified",
            DeviceState::NonMavlink => "NonMavlink",
            DeviceState::Removed => "Removed",
        };
        f.write_str(s)
    }
}

/// USB metadata captured for a device path (spec §3, §4.2).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UsbMetadata {
    pub device_name: String,
    pub manufacturer: String,
    pub serial_number: String,
    /// Lowercase 4-digit hex, no `0x` prefix.
    pub vendor_id: String,
    /// Lowercase 4-digit hex, no `0x` prefix.
    pub product_id: String,
    pub bus_number: String,
    pub device_address: String,
    /// `busNumber:vendorId:productId:serialNumber` when fully known, empty otherwise.
    pub physical_device_id: String,
    pub board_class: String,
    pub board_name: String,
    pub autopilot_type: String,
}

impl UsbMetadata {
    /// Whether all six required attributes from the kernel device tree are
    /// present (spec §4.2: "a result is accepted only when all six
    /// attributes are non-empty").
    pub fn is_complete(&self) -> bool {
        !self.manufacturer.is_empty()
            && !self.serial_number.is_empty()
            && !self.vendor_id.is_empty()
            && !self.product_id.is_empty()
            && !self.device_name.is_empty()
            && !self.bus_number.is_empty()
    }

    /// Synthesizes `physicalDeviceId` from `busNumber, idVendor, idProduct,
    /// serial` when all four are present (spec §4.2).
    pub fn synthesize_physical_id(&mut self) {
        if !self.bus_number.is_empty()
            && !self.vendor_id.is_empty()
            && !self.product_id.is_empty()
            && !self.serial_number.is_empty()
        {
            self.physical_device_id = format!(
                "{}:{}:{}:{}",
                self.bus_number, self.vendor_id, self.product_id, self.serial_number
            );
        }
    }
}

/// Discriminated MAVLink frame information (spec §3, §4.1).
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct MavlinkFrameInfo {
    pub sysid: u8,
    pub compid: u8,
    pub msgid: u8,
    /// `1` or `2`: the wire version of the *first* successfully parsed frame.
    pub mavlink_version: u8,
}

/// Full per-path record (spec §3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub path: String,
    pub state: DeviceState,
    pub baudrate: u32,
    pub frame: Option<MavlinkFrameInfo>,
    pub messages: BTreeSet<u8>,
    pub usb: UsbMetadata,
    /// UTC ISO-8601 `Z` timestamp of the last update.
    pub timestamp: String,
}

impl DeviceRecord {
    /// A freshly added record: `state = Unknown`, everything else empty.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            state: DeviceState::Unknown,
            baudrate: 0,
            frame: None,
            messages: BTreeSet::new(),
            usb: UsbMetadata::default(),
            timestamp: now_iso8601(),
        }
    }

    /// Projects this record into the canonical device-record JSON shape
    /// from spec §6 (the wire format used by RPC replies, fan-out events
    /// and the runtime device file).
    pub fn to_record_json(&self) -> RecordJson {
        RecordJson {
            autopilot_type: self.usb.autopilot_type.clone(),
            baudrate: self.baudrate,
            board_class: self.usb.board_class.clone(),
            board_name: self.usb.board_name.clone(),
            component_id: self.frame.map(|f| f.compid).unwrap_or(0),
            device_name: self.usb.device_name.clone(),
            device_path: self.path.clone(),
            manufacturer: self.usb.manufacturer.clone(),
            mavlink_version: self.frame.map(|f| f.mavlink_version).unwrap_or(0),
            product_id: self.usb.product_id.clone(),
            serial_number: self.usb.serial_number.clone(),
            system_id: self.frame.map(|f| f.sysid).unwrap_or(0),
            timestamp: self.timestamp.clone(),
            vendor_id: self.usb.vendor_id.clone(),
        }
    }
}

/// Canonical device record JSON (spec §6): all keys required, canonical
/// order irrelevant. Hex ids are carried through as the lowercase 4-digit
/// strings already stored on [`UsbMetadata`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordJson {
    pub autopilot_type: String,
    pub baudrate: u32,
    pub board_class: String,
    pub board_name: String,
    pub component_id: u8,
    pub device_name: String,
    pub device_path: String,
    pub manufacturer: String,
    pub mavlink_version: u8,
    pub product_id: String,
    pub serial_number: String,
    pub system_id: u8,
    pub timestamp: String,
    pub vendor_id: String,
}

/// A physical hardware unit, potentially exposed through several OS paths
/// (spec §3, §4.3).
#[derive(Clone, Debug)]
pub struct PhysicalDevice {
    pub physical_id: String,
    pub primary_path: String,
    /// Insertion-ordered set of known paths for this physical unit.
    pub paths: Vec<String>,
    /// Value copy of the primary path's record at registration time. Not a
    /// live view (spec §3 Ownership).
    pub snapshot: DeviceRecord,
}

/// UTC ISO-8601 `Z` timestamp, e.g. `2026-07-29T00:00:00Z`.
pub fn now_iso8601() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Board identification table (spec §4.2, Glossary), grounded on
/// `identifyFlightController` in `DeviceVerifier.cpp`: vendor id selects a
/// family (`boardClass`, `autopilotType`), product id narrows to a specific
/// `boardName` within that family. An unrecognized vendor id falls back to
/// a manufacturer substring match; if that also fails, `autopilotType =
/// "Generic"` and `boardName = deviceName`.
pub fn identify_board(vendor_id: &str, product_id: &str, manufacturer: &str, device_name: &str) -> (String, String, String) {
    let vid = vendor_id.to_lowercase();
    let pid = product_id.to_lowercase();

    // PX4 FMU (3D Robotics / PX4).
    if vid == "26ac" {
        let name = match pid.as_str() {
            "0010" => "PX4 FMU V1",
            "0011" => "PX4 FMU V2",
            "0012" => "PX4 FMU V4",
            "0013" => "PX4 FMU V4 PRO",
            "0030" => "PX4 MindPX V2",
            "0032" => "PX4 FMU V5",
            "0033" => "PX4 FMU V5X",
            "0035" => "PX4 FMU V6X",
            "0036" => "PX4 FMU V6U",
            "0038" => "PX4 FMU V6C",
            "001d" => "PX4 FMU V6X-RT",
            _ => "PX4 FMU (Unknown Model)",
        };
        return ("Pixhawk".to_string(), name.to_string(), "PX4".to_string());
    }

    // ArduPilot ChibiOS.
    if vid == "1209" && (pid == "5740" || pid == "5741") {
        return ("Pixhawk".to_string(), "ArduPilot ChibiOS".to_string(), "ArduPilot".to_string());
    }

    // CubePilot.
    if vid == "2dae" {
        let name = match pid.as_str() {
            "1011" => "Cube Black",
            "1001" => "Cube Black (Bootloader)",
            "1016" => "Cube Orange",
            "1017" => "Cube Orange 2",
            "1058" => "Cube Orange Plus",
            "1012" => "Cube Yellow",
            "1002" => "Cube Yellow (Bootloader)",
            "1015" => "Cube Purple",
            "1005" => "Cube Purple (Bootloader)",
            _ => "CubePilot (Unknown Model)",
        };
        return ("Pixhawk".to_string(), name.to_string(), "PX4".to_string());
    }

    // Holybro.
    if vid == "3162" {
        let name = match pid.as_str() {
            "0047" => "Pixhawk 4",
            "0049" => "Pixhawk 4 Mini",
            "004b" => "Durandal",
            _ => "Holybro (Unknown Model)",
        };
        return ("Pixhawk".to_string(), name.to_string(), "PX4".to_string());
    }

    // CUAV.
    if vid == "3163" {
        let name = match pid.as_str() {
            "004c" => "CUAV Nora/X7 Pro",
            _ => "CUAV (Unknown Model)",
        };
        return ("Pixhawk".to_string(), name.to_string(), "PX4".to_string());
    }

    // U-blox GPS.
    if vid == "1546" {
        let name = match pid.as_str() {
            "01a5" => "U-blox 5",
            "01a6" => "U-blox 6",
            "01a7" => "U-blox 7",
            "01a8" => "U-blox 8",
            "01a9" => "U-blox 9",
            _ => "U-blox GPS",
        };
        return ("RTK GPS".to_string(), name.to_string(), "GPS".to_string());
    }

    // Unrecognized vendor id: fall back to a manufacturer substring match.
    let manufacturer_lower = manufacturer.to_lowercase();
    let (board_class, autopilot_type) = if manufacturer_lower.contains("3d robotics") || manufacturer_lower.contains("3dr") {
        ("Pixhawk", "PX4")
    } else if manufacturer_lower.contains("ardupilot") {
        ("Pixhawk", "ArduPilot")
    } else if manufacturer_lower.contains("mro") {
        ("Pixhawk", "Generic")
    } else if manufacturer_lower.contains("holybro") {
        ("Pixhawk", "PX4")
    } else {
        ("", "Generic")
    };

    (board_class.to_string(), device_name.to_string(), autopilot_type.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_board_is_identified() {
        let (class, name, autopilot) = identify_board("26ac", "0011", "3D Robotics", "PX4 FMU");
        assert_eq!(class, "Pixhawk");
        assert_eq!(name, "PX4 FMU V2");
        assert_eq!(autopilot, "PX4");
    }

    #[test]
    fn ublox_gps_is_rtk_gps_class() {
        let (class, name, autopilot) = identify_board("1546", "01a8", "u-blox", "GPS receiver");
        assert_eq!(class, "RTK GPS");
        assert_eq!(name, "U-blox 8");
        assert_eq!(autopilot, "GPS");
    }

    #[test]
    fn unknown_vendor_falls_back_to_manufacturer_substring() {
        let (_, _, autopilot) = identify_board("dead", "beef", "ArduPilot Dev Team", "Custom");
        assert_eq!(autopilot, "ArduPilot");
    }

    #[test]
    fn fully_unknown_is_generic() {
        let (_, name, autopilot) = identify_board("dead", "beef", "", "ttyUSB0");
        assert_eq!(autopilot, "Generic");
        assert_eq!(name, "ttyUSB0");
    }

    #[test]
    fn physical_id_synthesizes_only_when_complete() {
        let mut usb = UsbMetadata {
            bus_number: "001".into(),
            vendor_id: "26ac".into(),
            ..Default::default()
        };
        usb.synthesize_physical_id();
        assert!(usb.physical_device_id.is_empty());

        usb.product_id = "0011".into();
        usb.serial_number = "ABC".into();
        usb.synthesize_physical_id();
        assert_eq!(usb.physical_device_id, "001:26ac:0011:ABC");
    }

    #[test]
    fn record_json_round_trips_every_field() {
        let mut record = DeviceRecord::new("/dev/ttyACM0");
        record.baudrate = 115200;
        record.frame = Some(MavlinkFrameInfo { sysid: 42, compid: 1, msgid: 0, mavlink_version: 2 });
        record.usb.vendor_id = "26ac".into();
        record.usb.product_id = "0011".into();
        record.usb.manufacturer = "3D Robotics".into();
        record.usb.serial_number = "ABC".into();
        record.usb.board_class = "FMU".into();
        record.usb.board_name = "PX4 FMU V2".into();
        record.usb.autopilot_type = "PX4".into();
        record.usb.device_name = "PX4 FMU V2".into();

        let json = record.to_record_json();
        let text = serde_json::to_string(&json).unwrap();
        let back: RecordJson = serde_json::from_str(&text).unwrap();

        assert_eq!(back.device_path, "/dev/ttyACM0");
        assert_eq!(back.baudrate, 115200);
        assert_eq!(back.system_id, 42);
        assert_eq!(back.component_id, 1);
        assert_eq!(back.mavlink_version, 2);
        assert_eq!(back.vendor_id, "26ac");
        assert_eq!(back.product_id, "0011");
        assert_eq!(back.board_name, "PX4 FMU V2");
        assert_eq!(back.autopilot_type, "PX4");
    }
}
