use serde::{Deserialize, Serialize};

/// One MMC partition as reported by the device's sysfs interface.
///
/// Sizes are reported by the kernel in 512-byte sectors. A partition whose
/// sector attribute failed to parse keeps `size_sectors: None` rather than
/// failing the whole listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartitionRecord {
    pub device_node: String,
    pub label: String,
    pub size_sectors: Option<u64>,
}

impl PartitionRecord {
    /// Exact byte size. Computed in 128-bit arithmetic so sector counts past
    /// 2^32 never truncate.
    pub fn size_bytes(&self) -> Option<u128> {
        self.size_sectors.map(|sectors| u128::from(sectors) * 512)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DumpOutcome {
    Pending,
    Done,
    Failed,
    InvalidName,
}

impl std::fmt::Display for DumpOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DumpOutcome::Pending => "Pending",
            DumpOutcome::Done => "Done",
            DumpOutcome::Failed => "Failed",
            DumpOutcome::InvalidName => "InvalidName",
        };
        write!(f, "{label}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DumpResult {
    pub partition_label: String,
    pub destination_path: String,
    pub outcome: DumpOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceSummary {
    pub serial: String,
    pub state: String,
    pub model: Option<String>,
    pub product: Option<String>,
    pub device: Option<String>,
    pub transport_id: Option<String>,
}

/// Flat device summary assembled from well-known system properties, each
/// resolved through an ordered fallback list of alternate keys.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceOverview {
    pub serial: Option<String>,
    pub model: Option<String>,
    pub manufacturer: Option<String>,
    pub android_version: Option<String>,
    pub sdk: Option<String>,
    pub security_patch: Option<String>,
    pub build_id: Option<String>,
    pub fingerprint: Option<String>,
    pub bootloader: Option<String>,
    pub baseband: Option<String>,
    pub custom_rom: Option<String>,
    pub treble_enabled: Option<String>,
    pub adb_root: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AdbInfo {
    pub available: bool,
    pub version_output: String,
    pub command_path: String,
    pub error: Option<String>,
}
