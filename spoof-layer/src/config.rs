use std::ffi::OsString;
use std::path::PathBuf;

/// Names the JSON device description applied when an instance is created.
pub const DESCRIPTION_PATH_VAR: &str = "VK_SPOOF_JSON_FILE";

/// `EnvFilter` directives for the layer's log output.
pub const LOG_FILTER_VAR: &str = "VK_SPOOF_LOG";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayerConfig {
    pub description_path: Option<PathBuf>,
}

impl LayerConfig {
    pub fn from_env() -> LayerConfig {
        Self::from_lookup(|key| std::env::var_os(key))
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<OsString>) -> LayerConfig {
        let description_path = lookup(DESCRIPTION_PATH_VAR)
            .filter(|path| !path.is_empty())
            .map(PathBuf::from);

        LayerConfig { description_path }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_description_path() {
        let config = LayerConfig::from_lookup(|key| {
            (key == DESCRIPTION_PATH_VAR).then(|| OsString::from("/tmp/device.json"))
        });
        assert_eq!(config.description_path, Some(PathBuf::from("/tmp/device.json")));
    }

    #[test]
    fn empty_or_unset_path_disables_overlay() {
        assert_eq!(LayerConfig::from_lookup(|_| None), LayerConfig::default());
        assert_eq!(
            LayerConfig::from_lookup(|_| Some(OsString::new())).description_path,
            None
        );
    }
}
