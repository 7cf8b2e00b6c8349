use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use tracing::info;

use crate::app::adb::bridge::AdbBridge;
use crate::app::adb::parse::parse_getprop_map;
use crate::app::error::AppError;
use crate::app::models::DeviceOverview;

pub fn fetch_properties(
    bridge: &AdbBridge,
    trace_id: &str,
) -> Result<HashMap<String, String>, AppError> {
    let output = bridge.run_shell("getprop", trace_id)?;
    let map = parse_getprop_map(&output.stdout);
    info!(trace_id = %trace_id, count = map.len(), "fetched device properties");
    Ok(map)
}

/// Static fallback source: the same `[key]: [value]` format read from a
/// local file, for rendering without a reachable device.
pub fn load_properties_file(
    path: &Path,
    trace_id: &str,
) -> Result<HashMap<String, String>, AppError> {
    let raw = std::fs::read_to_string(path).map_err(|err| {
        AppError::system(
            format!("Failed to read properties file {}: {err}", path.display()),
            trace_id,
        )
    })?;
    Ok(parse_getprop_map(&raw))
}

struct CategoryRule {
    name: &'static str,
    prefixes: &'static [&'static str],
    contains: &'static [&'static str],
}

/// Ordered dispatch table; the first matching rule wins, so e.g.
/// `ro.vendor.build.fingerprint` lands in Build (matched on `.build.`)
/// before the Vendor rule is consulted.
const CATEGORY_RULES: &[CategoryRule] = &[
    CategoryRule { name: "Build", prefixes: &["ro.build."], contains: &[".build."] },
    CategoryRule { name: "Product", prefixes: &["ro.product."], contains: &[".product."] },
    CategoryRule { name: "Vendor", prefixes: &["ro.vendor.", "persist.vendor.", "vendor."], contains: &[] },
    CategoryRule { name: "Boot", prefixes: &["ro.boot.", "ro.bootimage.", "ro.bootloader", "ro.bootmode"], contains: &[] },
    CategoryRule { name: "Runtime", prefixes: &["dalvik.", "ro.dalvik.", "ro.zygote", "persist.sys.dalvik."], contains: &[] },
    CategoryRule { name: "Radio", prefixes: &["ro.telephony.", "telephony.", "ril.", "ro.ril.", "gsm.", "persist.radio."], contains: &[] },
    CategoryRule { name: "Network", prefixes: &["net.", "wifi.", "dhcp.", "ro.wifi."], contains: &["wifi"] },
    CategoryRule { name: "Usb", prefixes: &["sys.usb.", "persist.sys.usb."], contains: &["usb"] },
    CategoryRule { name: "Bluetooth", prefixes: &["bluetooth.", "persist.bluetooth.", "ro.bt."], contains: &["bluetooth"] },
    CategoryRule { name: "Audio", prefixes: &["audio.", "ro.audio.", "persist.audio."], contains: &["audio"] },
    CategoryRule { name: "Graphics", prefixes: &["ro.opengles.", "ro.sf.", "debug.sf.", "persist.sys.sf.", "ro.hardware.egl", "ro.hardware.vulkan"], contains: &["gralloc", "hwui"] },
    CategoryRule { name: "Nfc", prefixes: &["ro.nfc."], contains: &["nfc"] },
    CategoryRule { name: "Storage", prefixes: &["ro.crypto.", "vold.", "persist.sys.storage"], contains: &["storage", "sdcard", "emmc"] },
    CategoryRule { name: "Services", prefixes: &["init.svc."], contains: &[] },
    CategoryRule { name: "Security", prefixes: &["ro.secure", "ro.adb.secure", "selinux."], contains: &["selinux", "verity", "secure"] },
    CategoryRule { name: "Debug", prefixes: &["debug.", "log.", "persist.log."], contains: &["debug", "logging"] },
    CategoryRule { name: "System", prefixes: &["ro."], contains: &[] },
];

pub const OTHER_CATEGORY: &str = "Other";

/// Total and deterministic: the same key always maps to the same category.
pub fn category_for_key(key: &str) -> &'static str {
    for rule in CATEGORY_RULES {
        if rule.prefixes.iter().any(|prefix| key.starts_with(prefix))
            || rule.contains.iter().any(|needle| key.contains(needle))
        {
            return rule.name;
        }
    }
    OTHER_CATEGORY
}

pub fn known_categories() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = CATEGORY_RULES.iter().map(|rule| rule.name).collect();
    names.push(OTHER_CATEGORY);
    names
}

/// Group a property map per category, keys sorted inside each bucket for
/// stable display.
pub fn categorize_properties(
    map: &HashMap<String, String>,
) -> BTreeMap<&'static str, Vec<(&str, &str)>> {
    let mut grouped: BTreeMap<&'static str, Vec<(&str, &str)>> = BTreeMap::new();
    for (key, value) in map {
        grouped
            .entry(category_for_key(key))
            .or_default()
            .push((key.as_str(), value.as_str()));
    }
    for entries in grouped.values_mut() {
        entries.sort_by(|left, right| left.0.cmp(right.0));
    }
    grouped
}

/// First value that is present, non-empty and not literally `unknown`.
fn lookup(map: &HashMap<String, String>, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(value) = map.get(*key) {
            let trimmed = value.trim();
            if !trimmed.is_empty() && !trimmed.eq_ignore_ascii_case("unknown") {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

pub fn build_device_overview(
    serial: Option<&str>,
    map: &HashMap<String, String>,
) -> DeviceOverview {
    DeviceOverview {
        serial: serial
            .map(|value| value.to_string())
            .or_else(|| lookup(map, &["ro.serialno", "ro.boot.serialno"])),
        model: lookup(
            map,
            &["ro.product.model", "ro.product.system.model", "ro.product.vendor.model"],
        ),
        manufacturer: lookup(
            map,
            &[
                "ro.product.manufacturer",
                "ro.product.vendor.manufacturer",
                "ro.product.brand",
            ],
        ),
        android_version: lookup(
            map,
            &["ro.build.version.release", "ro.build.version.release_or_codename"],
        ),
        sdk: lookup(map, &["ro.build.version.sdk"]),
        security_patch: lookup(
            map,
            &["ro.build.version.security_patch", "ro.vendor.build.security_patch"],
        ),
        build_id: lookup(map, &["ro.build.id", "ro.build.display.id"]),
        fingerprint: lookup(
            map,
            &[
                "ro.build.fingerprint",
                "ro.system.build.fingerprint",
                "ro.vendor.build.fingerprint",
            ],
        ),
        bootloader: lookup(map, &["ro.bootloader", "ro.boot.bootloader"]),
        baseband: lookup(
            map,
            &["gsm.version.baseband", "ro.baseband", "ro.boot.baseband"],
        ),
        custom_rom: lookup(
            map,
            &[
                "ro.modversion",
                "ro.lineage.version",
                "ro.lineage.display.version",
                "ro.cm.version",
            ],
        ),
        treble_enabled: lookup(map, &["ro.treble.enabled"]),
        adb_root: lookup(map, &["service.adb.root", "ro.debuggable"]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_of(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn categorizes_well_known_keys() {
        assert_eq!(category_for_key("ro.product.model"), "Product");
        assert_eq!(category_for_key("ro.build.fingerprint"), "Build");
        assert_eq!(category_for_key("ro.vendor.build.fingerprint"), "Build");
        assert_eq!(category_for_key("persist.vendor.camera.mode"), "Vendor");
        assert_eq!(category_for_key("ro.boot.serialno"), "Boot");
        assert_eq!(category_for_key("dalvik.vm.heapsize"), "Runtime");
        assert_eq!(category_for_key("gsm.version.baseband"), "Radio");
        assert_eq!(category_for_key("wifi.interface"), "Network");
        assert_eq!(category_for_key("sys.usb.state"), "Usb");
        assert_eq!(category_for_key("bluetooth.device.class_of_device"), "Bluetooth");
        assert_eq!(category_for_key("audio.offload.disable"), "Audio");
        assert_eq!(category_for_key("ro.sf.lcd_density"), "Graphics");
        assert_eq!(category_for_key("ro.nfc.port"), "Nfc");
        assert_eq!(category_for_key("vold.has_adoptable"), "Storage");
        assert_eq!(category_for_key("init.svc.zygote"), "Services");
        assert_eq!(category_for_key("ro.secure"), "Security");
        assert_eq!(category_for_key("debug.atrace.tags.enableflags"), "Debug");
        assert_eq!(category_for_key("ro.hardware"), "System");
        assert_eq!(category_for_key("persist.something.odd"), "Other");
    }

    #[test]
    fn categorization_is_deterministic() {
        let keys = [
            "ro.product.model",
            "ro.boot.serialno",
            "init.svc.adbd",
            "totally.unknown.key",
        ];
        for key in keys {
            assert_eq!(category_for_key(key), category_for_key(key));
        }
    }

    #[test]
    fn groups_properties_with_sorted_keys() {
        let map = map_of(&[
            ("ro.product.model", "Pixel 7"),
            ("ro.product.brand", "google"),
            ("init.svc.adbd", "running"),
        ]);
        let grouped = categorize_properties(&map);
        let product = grouped.get("Product").expect("product bucket");
        assert_eq!(
            product.iter().map(|(key, _)| *key).collect::<Vec<_>>(),
            vec!["ro.product.brand", "ro.product.model"]
        );
        assert_eq!(grouped.get("Services").map(|v| v.len()), Some(1));
    }

    #[test]
    fn overview_surfaces_model_from_primary_key() {
        let map = map_of(&[("ro.product.model", "Pixel 7")]);
        let overview = build_device_overview(None, &map);
        assert_eq!(overview.model.as_deref(), Some("Pixel 7"));
    }

    #[test]
    fn overview_falls_back_across_alternate_keys() {
        let map = map_of(&[
            ("ro.product.model", "unknown"),
            ("ro.product.system.model", "Pixel 7 Pro"),
            ("ro.build.fingerprint", ""),
            ("ro.system.build.fingerprint", "google/panther/panther:13/id/keys"),
        ]);
        let overview = build_device_overview(None, &map);
        assert_eq!(overview.model.as_deref(), Some("Pixel 7 Pro"));
        assert_eq!(
            overview.fingerprint.as_deref(),
            Some("google/panther/panther:13/id/keys")
        );
    }

    #[test]
    fn overview_prefers_explicit_serial() {
        let map = map_of(&[("ro.serialno", "FROM_PROPS")]);
        let overview = build_device_overview(Some("FROM_BRIDGE"), &map);
        assert_eq!(overview.serial.as_deref(), Some("FROM_BRIDGE"));
        let overview = build_device_overview(None, &map);
        assert_eq!(overview.serial.as_deref(), Some("FROM_PROPS"));
    }

    #[test]
    fn loads_properties_from_static_file() {
        let dir = tempfile::TempDir::new().expect("tmp");
        let path = dir.path().join("props.txt");
        std::fs::write(&path, "[ro.product.model]: [Pixel 7]\nnoise\n").expect("write");
        let map = load_properties_file(&path, "test-trace").expect("load");
        assert_eq!(map.get("ro.product.model").map(String::as_str), Some("Pixel 7"));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn missing_properties_file_is_a_system_error() {
        let err = load_properties_file(Path::new("/no/such/file"), "test-trace")
            .expect_err("expected failure");
        assert_eq!(err.code, "ERR_SYSTEM");
    }
}
