use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use tracing::{info, warn};

use crate::app::adb::bridge::AdbBridge;
use crate::app::adb::parse::parse_partition_list;
use crate::app::error::AppError;
use crate::app::models::{DumpOutcome, DumpResult, PartitionRecord};
use crate::app::output::ensure_output_dir;

/// Remote enumeration of MMC partitions via sysfs. One line per partition:
/// `node|name|sectors`, sectors in 512-byte units.
pub const PARTITION_LIST_SCRIPT: &str = r#"for part in /sys/block/mmcblk0/mmcblk0p*; do
    name=$(grep ^PARTNAME= "$part/uevent" 2>/dev/null | cut -d= -f2)
    size=$(cat "$part/size" 2>/dev/null)
    if [ -n "$size" ]; then
        echo "$(basename "$part")|${name:-unknown}|$size"
    fi
done"#;

pub fn list_partitions(
    bridge: &AdbBridge,
    trace_id: &str,
) -> Result<Vec<PartitionRecord>, AppError> {
    let output = bridge.run_shell(PARTITION_LIST_SCRIPT, trace_id)?;
    let records = parse_partition_list(&output.stdout);
    info!(trace_id = %trace_id, count = records.len(), "listed partitions");
    Ok(records)
}

/// Labels are interpolated into the dd source path, so only a strict
/// allow-list of characters is accepted. Anything else never reaches
/// command construction.
pub fn is_safe_partition_label(label: &str) -> bool {
    static SAFE_LABEL: OnceLock<Regex> = OnceLock::new();
    let pattern = SAFE_LABEL.get_or_init(|| Regex::new("^[A-Za-z0-9_-]+$").expect("static pattern"));
    pattern.is_match(label)
}

/// Copy one partition's raw block contents to `<dest_dir>/<label>.img`.
///
/// The bytes stream into a temporary file first and are persisted under the
/// final name only after the exit-code and non-zero-size checks pass, so a
/// failed dump never leaves a plausible-looking image behind.
pub fn dump_partition(
    bridge: &AdbBridge,
    label: &str,
    dest_dir: &Path,
    trace_id: &str,
) -> DumpResult {
    let destination = dest_dir.join(format!("{label}.img"));
    let mut result = DumpResult {
        partition_label: label.to_string(),
        destination_path: destination.to_string_lossy().to_string(),
        outcome: DumpOutcome::Pending,
    };

    if !is_safe_partition_label(label) {
        warn!(trace_id = %trace_id, partition = %label, "refusing partition label with unsafe characters");
        result.outcome = DumpOutcome::InvalidName;
        return result;
    }

    let staging = match tempfile::Builder::new()
        .prefix(&format!("{label}."))
        .suffix(".img.part")
        .tempfile_in(dest_dir)
    {
        Ok(staging) => staging,
        Err(err) => {
            warn!(trace_id = %trace_id, partition = %label, error = %err, "failed to open staging file");
            result.outcome = DumpOutcome::Failed;
            return result;
        }
    };
    let sink = match staging.as_file().try_clone() {
        Ok(sink) => sink,
        Err(err) => {
            warn!(trace_id = %trace_id, partition = %label, error = %err, "failed to clone staging handle");
            result.outcome = DumpOutcome::Failed;
            return result;
        }
    };

    let source = format!("if=/dev/block/by-name/{label}");
    let args = ["exec-out", "dd", source.as_str(), "bs=4096", "status=none"];
    info!(trace_id = %trace_id, partition = %label, "dumping partition");
    let streamed = match bridge.run_to_file(&args, sink, trace_id) {
        Ok(streamed) => streamed,
        Err(err) => {
            warn!(trace_id = %trace_id, partition = %label, error = %err, "dump command failed to run");
            result.outcome = DumpOutcome::Failed;
            return result;
        }
    };
    if streamed.exit_code != Some(0) {
        warn!(
            trace_id = %trace_id,
            partition = %label,
            exit_code = ?streamed.exit_code,
            stderr = %streamed.stderr.trim(),
            "dump command exited non-zero"
        );
        result.outcome = DumpOutcome::Failed;
        return result;
    }

    let bytes_written = staging
        .as_file()
        .metadata()
        .map(|meta| meta.len())
        .unwrap_or(0);
    if bytes_written == 0 {
        warn!(trace_id = %trace_id, partition = %label, "dump produced no data");
        result.outcome = DumpOutcome::Failed;
        return result;
    }

    match staging.persist(&destination) {
        Ok(_) => {
            info!(trace_id = %trace_id, partition = %label, bytes = bytes_written, "partition dumped");
            result.outcome = DumpOutcome::Done;
        }
        Err(err) => {
            warn!(trace_id = %trace_id, partition = %label, error = %err.error, "failed to persist image");
            result.outcome = DumpOutcome::Failed;
        }
    }
    result
}

/// Dump a batch of partitions, strictly one at a time. A destination that
/// cannot be created aborts before any partition is attempted; per-partition
/// failures are recorded and the batch continues.
pub fn dump_partitions(
    bridge: &AdbBridge,
    labels: &[String],
    dest_dir: &Path,
    trace_id: &str,
) -> Result<Vec<DumpResult>, AppError> {
    ensure_output_dir(dest_dir, trace_id)?;
    let mut results = Vec::with_capacity(labels.len());
    for label in labels {
        results.push(dump_partition(bridge, label, dest_dir, trace_id));
    }
    Ok(results)
}

/// Human-readable size with the exact byte count, e.g.
/// `64.00 MB (67,108,864 bytes)`. Unknown sizes render as `Unknown`.
pub fn format_size(size_bytes: Option<u128>) -> String {
    const KB: u128 = 1024;
    const MB: u128 = KB * 1024;
    const GB: u128 = MB * 1024;

    let Some(bytes) = size_bytes else {
        return "Unknown".to_string();
    };
    let exact = group_thousands(bytes);
    if bytes >= GB {
        format!("{:.2} GB ({exact} bytes)", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB ({exact} bytes)", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB ({exact} bytes)", bytes as f64 / KB as f64)
    } else {
        format!("{exact} bytes")
    }
}

fn group_thousands(value: u128) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, digit) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            out.push(',');
        }
        out.push(digit);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::adb::bridge::AdbBridge;
    use std::time::Duration;

    #[test]
    fn accepts_safe_labels() {
        for label in ["boot_a", "system-b", "vbmeta", "PART_01"] {
            assert!(is_safe_partition_label(label), "{label} should be safe");
        }
    }

    #[test]
    fn rejects_unsafe_labels() {
        for label in ["bad;name", "../boot", "a b", "", "boot$a", "name|x"] {
            assert!(!is_safe_partition_label(label), "{label} should be rejected");
        }
    }

    #[test]
    fn formats_sizes_like_the_listing() {
        assert_eq!(format_size(Some(67108864)), "64.00 MB (67,108,864 bytes)");
        assert_eq!(format_size(Some(512)), "512 bytes");
        assert_eq!(format_size(Some(4096)), "4.00 KB (4,096 bytes)");
        assert_eq!(format_size(None), "Unknown");
    }

    #[test]
    fn groups_thousands() {
        assert_eq!(group_thousands(0), "0");
        assert_eq!(group_thousands(1000), "1,000");
        assert_eq!(group_thousands(67108864), "67,108,864");
    }

    #[cfg(unix)]
    fn fake_adb(dir: &std::path::Path, body: &str) -> AdbBridge {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-adb");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write fake adb");
        let mut perms = std::fs::metadata(&path).expect("meta").permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).expect("chmod");
        AdbBridge::new(
            path.to_string_lossy().to_string(),
            None,
            Duration::from_secs(10),
        )
    }

    #[cfg(unix)]
    #[test]
    fn lists_partitions_sorted_and_tolerant() {
        let dir = tempfile::TempDir::new().expect("tmp");
        let bridge = fake_adb(
            dir.path(),
            "echo 'mmcblk0p2|system_a|2048'; echo 'mmcblk0p1|Boot_a|1024'; echo 'mmcblk0p3|misc|oops'",
        );

        let records = list_partitions(&bridge, "test-trace").expect("listing");
        let labels: Vec<&str> = records.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, vec!["Boot_a", "misc", "system_a"]);
        assert_eq!(records[1].size_sectors, None);
    }

    #[cfg(unix)]
    #[test]
    fn listing_fails_on_nonzero_bridge_exit() {
        let dir = tempfile::TempDir::new().expect("tmp");
        let bridge = fake_adb(dir.path(), "echo 'error: no devices' >&2; exit 1");

        let err = list_partitions(&bridge, "test-trace").expect_err("expected bridge failure");
        assert_eq!(err.code, "ERR_BRIDGE");
    }

    #[cfg(unix)]
    #[test]
    fn dumps_partition_to_image_file() {
        let dir = tempfile::TempDir::new().expect("tmp");
        let out = dir.path().join("out");
        std::fs::create_dir_all(&out).expect("out dir");
        let bridge = fake_adb(dir.path(), "printf 'imagedata'");

        let result = dump_partition(&bridge, "boot_a", &out, "test-trace");
        assert_eq!(result.outcome, DumpOutcome::Done);
        let written = std::fs::read(out.join("boot_a.img")).expect("image");
        assert_eq!(written, b"imagedata");
    }

    #[cfg(unix)]
    #[test]
    fn empty_output_is_failed_even_on_zero_exit() {
        let dir = tempfile::TempDir::new().expect("tmp");
        let out = dir.path().join("out");
        std::fs::create_dir_all(&out).expect("out dir");
        let bridge = fake_adb(dir.path(), "exit 0");

        let result = dump_partition(&bridge, "boot_a", &out, "test-trace");
        assert_eq!(result.outcome, DumpOutcome::Failed);
        assert!(!out.join("boot_a.img").exists());
    }

    #[cfg(unix)]
    #[test]
    fn nonzero_exit_is_failed_and_leaves_no_image() {
        let dir = tempfile::TempDir::new().expect("tmp");
        let out = dir.path().join("out");
        std::fs::create_dir_all(&out).expect("out dir");
        let bridge = fake_adb(dir.path(), "printf 'partial'; exit 1");

        let result = dump_partition(&bridge, "boot_a", &out, "test-trace");
        assert_eq!(result.outcome, DumpOutcome::Failed);
        assert!(!out.join("boot_a.img").exists());
    }

    #[cfg(unix)]
    #[test]
    fn unsafe_label_never_reaches_the_bridge() {
        let dir = tempfile::TempDir::new().expect("tmp");
        let out = dir.path().join("out");
        std::fs::create_dir_all(&out).expect("out dir");
        // The fake adb records every invocation; an unsafe label must not
        // produce one.
        let marker = dir.path().join("invoked");
        let bridge = fake_adb(
            dir.path(),
            &format!("touch '{}'; printf 'imagedata'", marker.display()),
        );

        let result = dump_partition(&bridge, "bad;name", &out, "test-trace");
        assert_eq!(result.outcome, DumpOutcome::InvalidName);
        assert!(!marker.exists());
    }

    #[cfg(unix)]
    #[test]
    fn batch_continues_past_failures() {
        let dir = tempfile::TempDir::new().expect("tmp");
        let out = dir.path().join("out");
        let bridge = fake_adb(dir.path(), "printf 'imagedata'");

        let labels = vec!["boot_a".to_string(), "bad;name".to_string(), "dtbo".to_string()];
        let results = dump_partitions(&bridge, &labels, &out, "test-trace").expect("batch");
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].outcome, DumpOutcome::Done);
        assert_eq!(results[1].outcome, DumpOutcome::InvalidName);
        assert_eq!(results[2].outcome, DumpOutcome::Done);
    }

    #[cfg(unix)]
    #[test]
    fn unusable_destination_aborts_the_batch() {
        let dir = tempfile::TempDir::new().expect("tmp");
        let occupied = dir.path().join("occupied");
        std::fs::write(&occupied, b"x").expect("write");
        let bridge = fake_adb(dir.path(), "printf 'imagedata'");

        let labels = vec!["boot_a".to_string()];
        let err = dump_partitions(&bridge, &labels, &occupied.join("sub"), "test-trace")
            .expect_err("expected directory failure");
        assert_eq!(err.code, "ERR_SYSTEM");
    }
}
