//! Plugin install manifests (`pact-plugin.json`).

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{PactError, Result};

/// Manifest file name inside a plugin install directory.
pub const MANIFEST_FILE: &str = "pact-plugin.json";

/// Runtime options declared by a plugin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginOptions {
    /// Whether the plugin accepts concurrent calls
    #[serde(default)]
    pub concurrent_calls: bool,
}

/// Parsed `pact-plugin.json`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginManifest {
    /// Plugin name
    pub name: String,
    /// Plugin version
    pub version: String,
    /// Plugin interface version
    pub plugin_interface_version: u32,
    /// Executable, relative to the install directory
    pub entry_point: String,
    /// Executable arguments
    #[serde(default)]
    pub args: Vec<String>,
    /// Runtime options
    #[serde(default)]
    pub plugin_config: PluginOptions,
}

/// A manifest together with the directory it was read from.
#[derive(Debug, Clone)]
pub struct InstalledPlugin {
    /// Install directory
    pub dir: PathBuf,
    /// Manifest contents
    pub manifest: PluginManifest,
}

impl InstalledPlugin {
    /// Absolute path of the entry point.
    #[must_use]
    pub fn executable(&self) -> PathBuf {
        self.dir.join(&self.manifest.entry_point)
    }
}

/// Locate `<plugin_dir>/<name>-<version>/pact-plugin.json`.
///
/// An empty `version` selects the highest installed version.
///
/// # Errors
///
/// Returns [`PactError::PluginUnavailable`] when no install is found or the
/// manifest cannot be read.
pub fn find_plugin(plugin_dir: &Path, name: &str, version: &str) -> Result<InstalledPlugin> {
    let dir = if version.is_empty() {
        latest_install(plugin_dir, name)?
    } else {
        plugin_dir.join(format!("{name}-{version}"))
    };

    let path = dir.join(MANIFEST_FILE);
    let document = std::fs::read_to_string(&path).map_err(|e| {
        PactError::plugin_unavailable(name, format!("cannot read {}: {e}", path.display()))
    })?;
    let manifest: PluginManifest = serde_json::from_str(&document).map_err(|e| {
        PactError::plugin_unavailable(name, format!("invalid manifest {}: {e}", path.display()))
    })?;
    Ok(InstalledPlugin { dir, manifest })
}

fn latest_install(plugin_dir: &Path, name: &str) -> Result<PathBuf> {
    let prefix = format!("{name}-");
    let entries = std::fs::read_dir(plugin_dir).map_err(|e| {
        PactError::plugin_unavailable(name, format!("{}: {e}", plugin_dir.display()))
    })?;

    entries
        .filter_map(std::result::Result::ok)
        .filter_map(|entry| {
            let file_name = entry.file_name().into_string().ok()?;
            let version = file_name.strip_prefix(&prefix)?.to_string();
            Some((version, entry.path()))
        })
        .max_by(|(a, _), (b, _)| compare_versions(a, b))
        .map(|(_, path)| path)
        .ok_or_else(|| PactError::plugin_unavailable(name, "no installed version found"))
}

/// Compare dotted versions numerically, falling back to text order.
fn compare_versions(a: &str, b: &str) -> Ordering {
    let parse = |v: &str| v.split('.').map(|p| p.parse::<u64>().ok()).collect::<Option<Vec<_>>>();
    match (parse(a), parse(b)) {
        (Some(a), Some(b)) => a.cmp(&b),
        _ => a.cmp(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn install(root: &Path, dir: &str, manifest: &str) {
        let dir = root.join(dir);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(MANIFEST_FILE), manifest).unwrap();
    }

    const PROTOBUF: &str = r#"{
        "name": "protobuf",
        "version": "0.3.0",
        "pluginInterfaceVersion": 1,
        "entryPoint": "pact-protobuf-plugin",
        "pluginConfig": {"concurrentCalls": true}
    }"#;

    #[test]
    fn test_find_exact_version() {
        let root = tempfile::tempdir().unwrap();
        install(root.path(), "protobuf-0.3.0", PROTOBUF);

        let plugin = find_plugin(root.path(), "protobuf", "0.3.0").unwrap();
        assert_eq!(plugin.manifest.plugin_interface_version, 1);
        assert!(plugin.manifest.plugin_config.concurrent_calls);
        assert!(plugin.manifest.args.is_empty());
        assert!(plugin.executable().ends_with("protobuf-0.3.0/pact-protobuf-plugin"));
    }

    #[test]
    fn test_find_latest_version() {
        let root = tempfile::tempdir().unwrap();
        install(root.path(), "protobuf-0.3.0", PROTOBUF);
        install(root.path(), "protobuf-0.10.1", &PROTOBUF.replace("0.3.0", "0.10.1"));
        install(root.path(), "csv-0.20.0", &PROTOBUF.replace("protobuf", "csv"));

        let plugin = find_plugin(root.path(), "protobuf", "").unwrap();
        assert_eq!(plugin.manifest.version, "0.10.1");
    }

    #[test]
    fn test_missing_plugin() {
        let root = tempfile::tempdir().unwrap();
        let err = find_plugin(root.path(), "protobuf", "9.9.9").unwrap_err();
        assert!(matches!(err, PactError::PluginUnavailable { .. }));
    }

    #[test]
    fn test_compare_versions() {
        assert_eq!(compare_versions("0.10.0", "0.9.9"), Ordering::Greater);
        assert_eq!(compare_versions("1.0.0", "1.0.0"), Ordering::Equal);
    }
}
