use std::collections::HashMap;

use tracing::{debug, warn};

use crate::app::models::{DeviceSummary, PartitionRecord};

/// Parse the `node|name|sectors` lines emitted by the sysfs listing script.
///
/// Lines with fewer than three fields are dropped. A sector count that does
/// not parse keeps the partition with an unknown size; only the remote exit
/// code can fail the listing as a whole. Output is sorted by label,
/// case-insensitively.
pub fn parse_partition_list(output: &str) -> Vec<PartitionRecord> {
    let mut records: Vec<PartitionRecord> = output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let trimmed = line.trim();
            let fields: Vec<&str> = trimmed.split('|').collect();
            if fields.len() < 3 {
                debug!(line = %trimmed, "skipping malformed partition line");
                return None;
            }
            let device_node = fields[0].trim().to_string();
            if device_node.is_empty() {
                debug!(line = %trimmed, "skipping partition line without device node");
                return None;
            }
            let name = fields[1].trim();
            let label = if name.is_empty() {
                "unknown".to_string()
            } else {
                name.to_string()
            };
            let size_sectors = match fields[2].trim().parse::<u64>() {
                Ok(sectors) => Some(sectors),
                Err(_) => {
                    warn!(
                        partition = %label,
                        raw = %fields[2].trim(),
                        "unreadable sector count, keeping partition with unknown size"
                    );
                    None
                }
            };
            Some(PartitionRecord {
                device_node,
                label,
                size_sectors,
            })
        })
        .collect();
    records.sort_by_key(|record| record.label.to_lowercase());
    records
}

pub fn parse_getprop_map(output: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in output.lines() {
        let trimmed = line.trim();
        if !trimmed.starts_with('[') {
            continue;
        }
        let Some((key_part, value_part)) = trimmed.split_once("]: [") else {
            continue;
        };
        let key = key_part.trim_start_matches('[').trim();
        let value = value_part.trim_end_matches(']').trim();
        if !key.is_empty() {
            map.insert(key.to_string(), value.to_string());
        }
    }
    map
}

pub fn parse_adb_devices(output: &str) -> Vec<DeviceSummary> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter(|line| !line.trim_start().starts_with('*'))
        .filter(|line| !line.to_lowercase().contains("list of devices"))
        .filter_map(|line| {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.len() < 2 {
                return None;
            }
            let serial = tokens[0].to_string();
            let state = tokens[1].to_string();
            let mut model = None;
            let mut product = None;
            let mut device = None;
            let mut transport_id = None;
            for token in tokens.iter().skip(2) {
                if let Some(value) = token.strip_prefix("model:") {
                    model = Some(value.to_string());
                } else if let Some(value) = token.strip_prefix("product:") {
                    product = Some(value.to_string());
                } else if let Some(value) = token.strip_prefix("device:") {
                    device = Some(value.to_string());
                } else if let Some(value) = token.strip_prefix("transport_id:") {
                    transport_id = Some(value.to_string());
                }
            }
            Some(DeviceSummary {
                serial,
                state,
                model,
                product,
                device,
                transport_id,
            })
        })
        .collect()
}
