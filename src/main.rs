use std::collections::BTreeMap;
use std::path::Path;
use std::process::ExitCode;

use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use blockdump::app::adb::bridge::AdbBridge;
use blockdump::app::config::{load_config, AppConfig};
use blockdump::app::diagnostics::export_diagnostics_bundle;
use blockdump::app::error::AppError;
use blockdump::app::logging::init_logging;
use blockdump::app::models::{DumpOutcome, DumpResult};
use blockdump::app::output::resolve_output_dir;
use blockdump::app::partitions::{dump_partitions, format_size, list_partitions};
use blockdump::app::properties::{
    build_device_overview, categorize_properties, fetch_properties, known_categories,
    load_properties_file,
};

#[derive(Debug, Serialize)]
struct ListedPartition {
    label: String,
    device_node: String,
    size_sectors: Option<u64>,
    size: String,
}

#[derive(Debug, Serialize)]
struct DumpSummary {
    destination: String,
    results: Vec<DumpResult>,
    failed: usize,
}

fn main() -> ExitCode {
    init_logging();

    let mut serial: Option<String> = None;
    let mut adb: Option<String> = None;
    let mut json = false;
    let mut command: Option<String> = None;
    let mut rest: Vec<String> = Vec::new();

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--serial" => match it.next().filter(|value| !value.trim().is_empty()) {
                Some(value) => serial = Some(value.trim().to_string()),
                None => return usage_error("--serial requires a value"),
            },
            "--adb" => match it.next().filter(|value| !value.trim().is_empty()) {
                Some(value) => adb = Some(value.trim().to_string()),
                None => return usage_error("--adb requires a value"),
            },
            "--json" => json = true,
            "--help" | "-h" => {
                print_help();
                return ExitCode::SUCCESS;
            }
            _ => {
                if command.is_none() && !arg.starts_with('-') {
                    command = Some(arg);
                } else {
                    rest.push(arg);
                }
            }
        }
    }

    let Some(command) = command else {
        print_help();
        return ExitCode::FAILURE;
    };

    let trace_id = Uuid::new_v4().to_string();
    let config = match load_config() {
        Ok(config) => config,
        Err(err) => {
            warn!(trace_id = %trace_id, error = %err, "failed to load config, using defaults");
            AppConfig::default()
        }
    };
    let bridge = AdbBridge::from_config(&config, adb.as_deref(), serial.as_deref());

    let outcome = match command.as_str() {
        "list" => cmd_list(&bridge, json, &trace_id),
        "dump" => cmd_dump(&bridge, &config, &rest, json, &trace_id),
        "props" => cmd_props(&bridge, &rest, json, &trace_id),
        "overview" => cmd_overview(&bridge, &rest, json, &trace_id),
        "devices" => cmd_devices(&bridge, json, &trace_id),
        "check" => cmd_check(&bridge, json, &trace_id),
        "diagnostics" => cmd_diagnostics(&bridge, &rest, &trace_id),
        _ => {
            print_help();
            return ExitCode::FAILURE;
        }
    };

    match outcome {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn usage_error(message: &str) -> ExitCode {
    eprintln!("error: {message}");
    print_help();
    ExitCode::FAILURE
}

fn print_help() {
    eprintln!("blockdump: ADB partition dump and device property inspector");
    eprintln!();
    eprintln!("Usage: blockdump [--serial <serial>] [--adb <path>] [--json] <command> [args]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  list                        list MMC partitions with sizes");
    eprintln!("  dump <label>... | --all     copy raw partition contents to <label>.img [--out <dir>]");
    eprintln!("  props [--category <name>] [--file <path>]");
    eprintln!("                              grouped system properties");
    eprintln!("  overview [--file <path>]    device summary from well-known properties");
    eprintln!("  devices                     list devices known to adb");
    eprintln!("  check                       check adb availability");
    eprintln!("  diagnostics [--out <dir>]   export a diagnostics bundle (zip)");
    eprintln!();
    eprintln!("The target device may also be set via ANDROID_SERIAL.");
}

fn to_json(value: &impl Serialize, trace_id: &str) -> Result<String, AppError> {
    serde_json::to_string_pretty(value)
        .map_err(|err| AppError::system(format!("Failed to serialize output: {err}"), trace_id))
}

fn cmd_list(bridge: &AdbBridge, json: bool, trace_id: &str) -> Result<ExitCode, AppError> {
    let records = list_partitions(bridge, trace_id)?;
    if json {
        let listed: Vec<ListedPartition> = records
            .into_iter()
            .map(|record| ListedPartition {
                size: format_size(record.size_bytes()),
                label: record.label,
                device_node: record.device_node,
                size_sectors: record.size_sectors,
            })
            .collect();
        println!("{}", to_json(&listed, trace_id)?);
        return Ok(ExitCode::SUCCESS);
    }

    if records.is_empty() {
        println!("No partitions found.");
        return Ok(ExitCode::SUCCESS);
    }
    println!("{:<24} {:<14} SIZE", "PARTITION", "NODE");
    for record in &records {
        println!(
            "{:<24} {:<14} {}",
            record.label,
            record.device_node,
            format_size(record.size_bytes())
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_dump(
    bridge: &AdbBridge,
    config: &AppConfig,
    rest: &[String],
    json: bool,
    trace_id: &str,
) -> Result<ExitCode, AppError> {
    let mut labels: Vec<String> = Vec::new();
    let mut all = false;
    let mut out: Option<String> = None;

    let mut it = rest.iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--all" => all = true,
            "--out" => {
                out = it.next().cloned();
                if out.as_deref().map(str::trim).unwrap_or("").is_empty() {
                    return Err(AppError::validation("--out requires a value", trace_id));
                }
            }
            value if !value.starts_with('-') => labels.push(value.to_string()),
            other => {
                return Err(AppError::validation(
                    format!("unknown dump option: {other}"),
                    trace_id,
                ))
            }
        }
    }

    if all {
        labels = list_partitions(bridge, trace_id)?
            .into_iter()
            .map(|record| record.label)
            .collect();
    }
    if labels.is_empty() {
        return Err(AppError::validation("No partitions selected", trace_id));
    }

    let destination = resolve_output_dir(out.as_deref().unwrap_or(""), &config.dump.output_path);
    let results = dump_partitions(bridge, &labels, &destination, trace_id)?;
    let failed = results
        .iter()
        .filter(|result| result.outcome != DumpOutcome::Done)
        .count();

    if json {
        let summary = DumpSummary {
            destination: destination.to_string_lossy().to_string(),
            results,
            failed,
        };
        println!("{}", to_json(&summary, trace_id)?);
    } else {
        for result in &results {
            println!("{:<24} {}", result.partition_label, result.outcome);
        }
        if failed == 0 {
            println!("Dump completed to {}", destination.display());
        } else {
            println!(
                "Dump finished with {failed} failure(s); images in {}",
                destination.display()
            );
        }
    }
    Ok(if failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn properties_source(
    bridge: &AdbBridge,
    file: Option<&str>,
    trace_id: &str,
) -> Result<std::collections::HashMap<String, String>, AppError> {
    match file {
        Some(path) => load_properties_file(Path::new(path), trace_id),
        None => fetch_properties(bridge, trace_id),
    }
}

fn cmd_props(
    bridge: &AdbBridge,
    rest: &[String],
    json: bool,
    trace_id: &str,
) -> Result<ExitCode, AppError> {
    let mut category: Option<String> = None;
    let mut file: Option<String> = None;

    let mut it = rest.iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--category" => {
                category = it.next().cloned();
                if category.is_none() {
                    return Err(AppError::validation("--category requires a value", trace_id));
                }
            }
            "--file" => {
                file = it.next().cloned();
                if file.is_none() {
                    return Err(AppError::validation("--file requires a value", trace_id));
                }
            }
            other => {
                return Err(AppError::validation(
                    format!("unknown props option: {other}"),
                    trace_id,
                ))
            }
        }
    }

    let wanted = match category.as_deref() {
        Some(name) => Some(
            known_categories()
                .into_iter()
                .find(|known| known.eq_ignore_ascii_case(name))
                .ok_or_else(|| {
                    AppError::validation(
                        format!(
                            "unknown category {name}; expected one of: {}",
                            known_categories().join(", ")
                        ),
                        trace_id,
                    )
                })?,
        ),
        None => None,
    };

    let map = properties_source(bridge, file.as_deref(), trace_id)?;
    let grouped = categorize_properties(&map);

    if json {
        let mut filtered: BTreeMap<&str, BTreeMap<&str, &str>> = BTreeMap::new();
        for (&name, entries) in &grouped {
            if wanted.map_or(true, |wanted| name == wanted) {
                filtered.insert(name, entries.iter().copied().collect());
            }
        }
        println!("{}", to_json(&filtered, trace_id)?);
        return Ok(ExitCode::SUCCESS);
    }

    for (&name, entries) in &grouped {
        if !wanted.map_or(true, |wanted| name == wanted) {
            continue;
        }
        println!("[{name}]");
        for (key, value) in entries {
            println!("  {key} = {value}");
        }
        println!();
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_overview(
    bridge: &AdbBridge,
    rest: &[String],
    json: bool,
    trace_id: &str,
) -> Result<ExitCode, AppError> {
    let mut file: Option<String> = None;
    let mut it = rest.iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--file" => {
                file = it.next().cloned();
                if file.is_none() {
                    return Err(AppError::validation("--file requires a value", trace_id));
                }
            }
            other => {
                return Err(AppError::validation(
                    format!("unknown overview option: {other}"),
                    trace_id,
                ))
            }
        }
    }

    let map = properties_source(bridge, file.as_deref(), trace_id)?;
    let overview = build_device_overview(bridge.serial(), &map);

    if json {
        println!("{}", to_json(&overview, trace_id)?);
        return Ok(ExitCode::SUCCESS);
    }

    let dash = || "-".to_string();
    let android = match (&overview.android_version, &overview.sdk) {
        (Some(version), Some(sdk)) => format!("{version} (SDK {sdk})"),
        (Some(version), None) => version.clone(),
        (None, Some(sdk)) => format!("SDK {sdk}"),
        (None, None) => dash(),
    };
    println!("Serial:         {}", overview.serial.clone().unwrap_or_else(dash));
    println!("Model:          {}", overview.model.clone().unwrap_or_else(dash));
    println!("Manufacturer:   {}", overview.manufacturer.clone().unwrap_or_else(dash));
    println!("Android:        {android}");
    println!("Security patch: {}", overview.security_patch.clone().unwrap_or_else(dash));
    println!("Build ID:       {}", overview.build_id.clone().unwrap_or_else(dash));
    println!("Fingerprint:    {}", overview.fingerprint.clone().unwrap_or_else(dash));
    println!("Bootloader:     {}", overview.bootloader.clone().unwrap_or_else(dash));
    println!("Baseband:       {}", overview.baseband.clone().unwrap_or_else(dash));
    println!("Custom ROM:     {}", overview.custom_rom.clone().unwrap_or_else(dash));
    println!("Treble:         {}", overview.treble_enabled.clone().unwrap_or_else(dash));
    println!("ADB root:       {}", overview.adb_root.clone().unwrap_or_else(dash));
    Ok(ExitCode::SUCCESS)
}

fn cmd_devices(bridge: &AdbBridge, json: bool, trace_id: &str) -> Result<ExitCode, AppError> {
    let devices = bridge.list_devices(trace_id)?;
    if json {
        println!("{}", to_json(&devices, trace_id)?);
        return Ok(ExitCode::SUCCESS);
    }
    if devices.is_empty() {
        println!("No devices attached.");
        return Ok(ExitCode::SUCCESS);
    }
    println!("{:<20} {:<14} MODEL", "SERIAL", "STATE");
    for device in &devices {
        println!(
            "{:<20} {:<14} {}",
            device.serial,
            device.state,
            device.model.as_deref().unwrap_or("-")
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_check(bridge: &AdbBridge, json: bool, trace_id: &str) -> Result<ExitCode, AppError> {
    let info = bridge.check_adb(trace_id);
    if json {
        println!("{}", to_json(&info, trace_id)?);
    } else if info.available {
        println!("adb available via {}", info.command_path);
        println!("{}", info.version_output);
    } else {
        println!(
            "adb not available via {}: {}",
            info.command_path,
            info.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(if info.available {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn cmd_diagnostics(
    bridge: &AdbBridge,
    rest: &[String],
    trace_id: &str,
) -> Result<ExitCode, AppError> {
    let mut out: Option<String> = None;
    let mut it = rest.iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--out" => {
                out = it.next().cloned();
                if out.is_none() {
                    return Err(AppError::validation("--out requires a value", trace_id));
                }
            }
            other => {
                return Err(AppError::validation(
                    format!("unknown diagnostics option: {other}"),
                    trace_id,
                ))
            }
        }
    }

    let bundle = export_diagnostics_bundle(bridge, out, trace_id)?;
    println!("{}", bundle.display());
    Ok(ExitCode::SUCCESS)
}
