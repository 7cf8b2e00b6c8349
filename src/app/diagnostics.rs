use chrono::Utc;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use tracing::warn;
use zip::write::FileOptions;

use crate::app::adb::bridge::AdbBridge;
use crate::app::error::AppError;
use crate::app::models::{DeviceOverview, DeviceSummary, PartitionRecord};
use crate::app::output::{ensure_output_dir, resolve_output_dir};
use crate::app::partitions::list_partitions;
use crate::app::properties::{build_device_overview, fetch_properties};

#[derive(Debug, Serialize)]
struct DiagnosticsManifest {
    app_version: &'static str,
    os: &'static str,
    arch: &'static str,
    timestamp_utc: String,
    trace_id: String,
    adb_program: String,
    serial: Option<String>,
}

#[derive(Debug, Serialize)]
struct DevicesSection {
    parsed: Vec<DeviceSummary>,
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct OverviewSection {
    overview: Option<DeviceOverview>,
    property_count: usize,
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct PartitionsSection {
    parsed: Vec<PartitionRecord>,
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct DiagnosticsPayload {
    manifest: DiagnosticsManifest,
    devices: DevicesSection,
    overview: OverviewSection,
    partitions: PartitionsSection,
}

fn sanitize_trace_component(trace_id: &str) -> String {
    trace_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect()
}

/// Collect everything the tool can see about the device into one zip. Each
/// section degrades to an error string instead of failing the bundle, so a
/// bundle can be produced even with no device attached.
pub fn export_diagnostics_bundle(
    bridge: &AdbBridge,
    output_dir: Option<String>,
    trace_id: &str,
) -> Result<PathBuf, AppError> {
    let resolved_dir = match output_dir
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
    {
        Some(dir) => resolve_output_dir(&dir, ""),
        None => std::env::temp_dir().join("blockdump_diagnostics"),
    };
    ensure_output_dir(&resolved_dir, trace_id)?;

    let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
    let safe_trace = sanitize_trace_component(trace_id);
    let trace_short = safe_trace.chars().take(8).collect::<String>();
    let bundle_path = resolved_dir.join(format!("diagnostics_{timestamp}_{trace_short}.zip"));

    let manifest = DiagnosticsManifest {
        app_version: env!("CARGO_PKG_VERSION"),
        os: std::env::consts::OS,
        arch: std::env::consts::ARCH,
        timestamp_utc: Utc::now().to_rfc3339(),
        trace_id: trace_id.to_string(),
        adb_program: bridge.program().to_string(),
        serial: bridge.serial().map(str::to_string),
    };

    let devices = match bridge.list_devices(trace_id) {
        Ok(parsed) => DevicesSection {
            parsed,
            error: None,
        },
        Err(err) => {
            warn!(trace_id = %trace_id, error = %err, "diagnostics: device listing failed");
            DevicesSection {
                parsed: Vec::new(),
                error: Some(err.error),
            }
        }
    };

    let overview = match fetch_properties(bridge, trace_id) {
        Ok(map) => OverviewSection {
            overview: Some(build_device_overview(bridge.serial(), &map)),
            property_count: map.len(),
            error: None,
        },
        Err(err) => {
            warn!(trace_id = %trace_id, error = %err, "diagnostics: property fetch failed");
            OverviewSection {
                overview: None,
                property_count: 0,
                error: Some(err.error),
            }
        }
    };

    let partitions = match list_partitions(bridge, trace_id) {
        Ok(parsed) => PartitionsSection {
            parsed,
            error: None,
        },
        Err(err) => {
            warn!(trace_id = %trace_id, error = %err, "diagnostics: partition listing failed");
            PartitionsSection {
                parsed: Vec::new(),
                error: Some(err.error),
            }
        }
    };

    let payload = DiagnosticsPayload {
        manifest,
        devices,
        overview,
        partitions,
    };

    let json = serde_json::to_vec_pretty(&payload).map_err(|err| {
        AppError::system(format!("Failed to serialize diagnostics payload: {err}"), trace_id)
    })?;

    let file = fs::File::create(&bundle_path)
        .map_err(|err| AppError::system(format!("Failed to create bundle: {err}"), trace_id))?;
    let mut zip = zip::ZipWriter::new(file);
    zip.start_file("diagnostics.json", FileOptions::<()>::default())
        .map_err(|err| AppError::system(format!("Failed to write bundle: {err}"), trace_id))?;
    zip.write_all(&json)
        .map_err(|err| AppError::system(format!("Failed to write bundle: {err}"), trace_id))?;
    zip.finish()
        .map_err(|err| AppError::system(format!("Failed to finalize bundle: {err}"), trace_id))?;

    Ok(bundle_path)
}
