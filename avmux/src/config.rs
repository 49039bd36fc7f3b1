use serde::Deserialize;

pub const DEFAULT_PRESAVE_SIZE: usize = 1 << 20;
pub const DEFAULT_RIFF_SEGMENT_SIZE: u64 = 1 << 30;

/// Tunables for opening and creating files. Every field has a default, so a partial
/// configuration deserializes cleanly.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// The size of the read-ahead window. 0 reads straight from the stream.
    pub preload_size: usize,
    /// The size of the write accumulator. 0 writes straight to the stream.
    pub presave_size: usize,
    /// AVI files start a new RIFF segment once the current one reaches this size.
    pub riff_segment_size: u64,
    /// Always index QuickTime chunks with 64-bit offsets.
    pub force_64bit_offsets: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            preload_size: 0,
            presave_size: DEFAULT_PRESAVE_SIZE,
            riff_segment_size: DEFAULT_RIFF_SEGMENT_SIZE,
            force_64bit_offsets: false,
        }
    }
}

impl Config {
    /// The defaults, with buffer sizes overridden by `AVMUX_PRELOAD` and `AVMUX_PRESAVE`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(size) = env_size("AVMUX_PRELOAD") {
            config.preload_size = size;
        }
        if let Some(size) = env_size("AVMUX_PRESAVE") {
            config.presave_size = size;
        }
        config
    }
}

fn env_size(name: &str) -> Option<usize> {
    let value = std::env::var(name).ok()?;
    match value.trim().parse() {
        Ok(size) => Some(size),
        Err(_) => {
            log::warn!("ignoring {}={:?}: not a byte count", name, value);
            None
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_partial_config() {
        let config: Config = serde_json::from_str(r#"{"preload_size": 65536}"#).unwrap();
        assert_eq!(65536, config.preload_size);
        assert_eq!(DEFAULT_PRESAVE_SIZE, config.presave_size);
        assert_eq!(DEFAULT_RIFF_SEGMENT_SIZE, config.riff_segment_size);
        assert!(!config.force_64bit_offsets);
    }
}
