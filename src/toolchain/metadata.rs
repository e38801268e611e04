//! `build_info.json`: the toolchain's project metadata plus resolved tool paths.
//!
//! Symbol and size tooling downstream needs `objdump`, `nm` and friends for each
//! board's cross toolchain. Those live next to the C compiler with the same
//! prefix, so they are resolved from `cc_path` and stored under `aliases`.

use crate::error::{Result, SweepError};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

pub const BUILD_INFO_FILE: &str = "build_info.json";

const TOOLS: [&str; 14] = [
    "gcc", "g++", "ar", "objcopy", "objdump", "size", "nm", "ld", "as", "ranlib", "strip",
    "c++filt", "readelf", "addr2line",
];

/// Outcome of writing metadata; a raw write still counts as written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataWrite {
    Parsed(PathBuf),
    Raw(PathBuf),
}

/// Add an `aliases` object to every environment entry that names a `cc_path`.
pub fn insert_tool_aliases(meta: &mut Map<String, Value>) {
    for env in meta.values_mut() {
        let Some(env) = env.as_object_mut() else {
            continue;
        };
        let cc_path = env
            .get("cc_path")
            .and_then(Value::as_str)
            .map(PathBuf::from);

        let mut aliases = Map::new();
        if let Some(cc) = cc_path.filter(|p| p.exists()) {
            for tool in TOOLS {
                let value = tool_path(&cc, tool)
                    .filter(|p| p.exists())
                    .map(|p| Value::String(p.to_string_lossy().to_string()))
                    .unwrap_or(Value::Null);
                aliases.insert(tool.to_string(), value);
            }
        }
        env.insert("aliases".to_string(), Value::Object(aliases));
    }
}

/// `…/bin/arm-none-eabi-gcc` + `nm` → `…/bin/arm-none-eabi-nm`.
fn tool_path(cc: &Path, tool: &str) -> Option<PathBuf> {
    let parent = cc.parent()?;
    let base = cc.file_stem()?.to_string_lossy();
    let prefix = match base.find("gcc") {
        Some(i) => &base[..i],
        None => base.find("cc").map_or(base.as_ref(), |i| &base[..i]),
    };
    let suffix = cc
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    Some(parent.join(format!("{prefix}{tool}{suffix}")))
}

/// Write `build_info.json` into `build_dir`. Invalid JSON is saved verbatim.
pub fn write_build_info(build_dir: &Path, raw: &str) -> Result<MetadataWrite> {
    let path = build_dir.join(BUILD_INFO_FILE);
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(mut meta)) => {
            insert_tool_aliases(&mut meta);
            let body = to_pretty(&Value::Object(meta)).map_err(|e| SweepError::cache(&path, e))?;
            fs::write(&path, body).map_err(|e| SweepError::io(&path, e))?;
            Ok(MetadataWrite::Parsed(path))
        }
        Ok(_) | Err(_) => {
            tracing::warn!("metadata is not a JSON object, saving raw output to {}", path.display());
            fs::write(&path, raw).map_err(|e| SweepError::io(&path, e))?;
            Ok(MetadataWrite::Raw(path))
        }
    }
}

/// Four-space indent; keys come out sorted since `Map` is ordered.
fn to_pretty(value: &Value) -> serde_json::Result<String> {
    use serde::Serialize;
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut ser)?;
    Ok(String::from_utf8_lossy(&buf).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_tool_path_keeps_prefix_and_suffix() {
        let cc = Path::new("/opt/tc/bin/xtensa-esp32-elf-gcc");
        assert_eq!(
            tool_path(cc, "objdump"),
            Some(PathBuf::from("/opt/tc/bin/xtensa-esp32-elf-objdump"))
        );
        let exe = Path::new("C:/tc/bin/avr-gcc.exe");
        assert_eq!(
            tool_path(exe, "nm"),
            Some(PathBuf::from("C:/tc/bin/avr-nm.exe"))
        );
    }

    #[test]
    fn test_aliases_resolve_existing_tools_only() {
        let dir = tempdir().unwrap();
        let cc = dir.path().join("arm-none-eabi-gcc");
        fs::write(&cc, "").unwrap();
        fs::write(dir.path().join("arm-none-eabi-nm"), "").unwrap();

        let mut meta: Map<String, Value> = serde_json::from_value(serde_json::json!({
            "teensy41": { "cc_path": cc.to_string_lossy() },
            "native": { "cc_path": null }
        }))
        .unwrap();
        insert_tool_aliases(&mut meta);

        let aliases = &meta["teensy41"]["aliases"];
        assert!(aliases["nm"].as_str().unwrap().ends_with("arm-none-eabi-nm"));
        assert!(aliases["objdump"].is_null());
        assert!(aliases["gcc"].is_string());
        assert_eq!(meta["native"]["aliases"], serde_json::json!({}));
    }

    #[test]
    fn test_write_build_info_sorted_and_raw_fallback() {
        let dir = tempdir().unwrap();
        let written = write_build_info(dir.path(), r#"{"uno": {"zeta": 1, "alpha": 2}}"#).unwrap();
        assert!(matches!(written, MetadataWrite::Parsed(_)));
        let body = fs::read_to_string(dir.path().join(BUILD_INFO_FILE)).unwrap();
        assert!(body.find("alpha").unwrap() < body.find("zeta").unwrap());
        assert!(body.contains("    \"uno\""));

        let raw = write_build_info(dir.path(), "Error: not json").unwrap();
        assert!(matches!(raw, MetadataWrite::Raw(_)));
        let body = fs::read_to_string(dir.path().join(BUILD_INFO_FILE)).unwrap();
        assert_eq!(body, "Error: not json");
    }
}
