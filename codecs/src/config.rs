use serde::Deserialize;
use std::{env, path::PathBuf};

pub const PLUGIN_DIR_VAR: &str = "AVMUX_PLUGIN_DIR";
pub const CODEC_CACHE_VAR: &str = "AVMUX_CODEC_CACHE";

const CACHE_FILE_NAME: &str = ".avmux_codecs";

/// Where the registry looks for codec modules and keeps its cache.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct RegistryConfig {
    /// Without a plugin directory only statically registered codecs are available.
    pub plugin_dir: Option<PathBuf>,
    /// Without a cache file every module is loaded on each scan.
    pub cache_file: Option<PathBuf>,
    pub module_extension: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            plugin_dir: None,
            cache_file: env::var_os("HOME").map(|home| PathBuf::from(home).join(CACHE_FILE_NAME)),
            module_extension: env::consts::DLL_EXTENSION.to_string(),
        }
    }
}

impl RegistryConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(dir) = env::var_os(PLUGIN_DIR_VAR).filter(|v| !v.is_empty()) {
            config.plugin_dir = Some(dir.into());
        }
        if let Some(file) = env::var_os(CODEC_CACHE_VAR).filter(|v| !v.is_empty()) {
            config.cache_file = Some(file.into());
        }
        config
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_registry_config_json() {
        let config: RegistryConfig = serde_json::from_str(r#"{"plugin_dir": "/usr/lib/avmux"}"#).unwrap();
        assert_eq!(Some(PathBuf::from("/usr/lib/avmux")), config.plugin_dir);
        assert_eq!(env::consts::DLL_EXTENSION, config.module_extension);
    }
}
