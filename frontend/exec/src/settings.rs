use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::Context;
use cv::TuningParameters;
use driving::DrivingConfig;
use serde::{Deserialize, Serialize};
use serial::LinkConfig;
use tracing::{info, warn};

/// The settings document, one section per subsystem
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct Settings {
    pub tuning: TuningParameters,
    pub driving: DrivingConfig,
    pub link: LinkConfig,
}

impl Settings {
    /// Reads and validates the document. A missing file means defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                warn!(path = %path.display(), "No settings file, using defaults");
                return Ok(Settings::default());
            }
            Err(err) => {
                return Err(err).with_context(|| format!("Could not read {}", path.display()));
            }
        };

        let settings: Settings =
            serde_json::from_str(&text).with_context(|| format!("Could not parse {}", path.display()))?;
        settings.tuning.validate().context("Invalid tuning")?;
        settings.driving.validate().context("Invalid driving config")?;
        settings.link.validate().context("Invalid link config")?;

        info!(path = %path.display(), "Loaded settings");
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::env;

    fn scratch(name: &str, contents: &str) -> std::path::PathBuf {
        let mut rng = StdRng::seed_from_u64(name.len() as u64);
        let path = env::temp_dir().join(format!("rowbot-{}-{}.json", name, rng.gen::<u32>()));
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn missing_file_is_default() {
        let settings = Settings::load(Path::new("/nonexistent/rowbot/settings.json")).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn sections_are_optional() {
        let path = scratch("partial", r#"{ "tuning": { "closeKernel": 5 }, "link": { "queueDepth": 4 } }"#);
        let settings = Settings::load(&path).unwrap();
        fs::remove_file(&path).unwrap();

        assert_eq!(settings.tuning.close_kernel, 5);
        assert_eq!(settings.link.queue_depth, 4);
        assert_eq!(settings.driving, DrivingConfig::default());
    }

    #[test]
    fn invalid_tuning_is_rejected() {
        let path = scratch("inverted", r#"{ "tuning": { "hLowerPercentile": 80, "hUpperPercentile": 20 } }"#);
        let result = Settings::load(&path);
        fs::remove_file(&path).unwrap();

        assert!(result.is_err());
    }

    #[test]
    fn zero_backoff_is_rejected() {
        let path = scratch("zero-backoff", r#"{ "link": { "backoffMinMs": 0 } }"#);
        let result = Settings::load(&path);
        fs::remove_file(&path).unwrap();

        let err = result.unwrap_err();
        assert!(format!("{:#}", err).contains("backoffMinMs"), "{:#}", err);
    }
}
