use std::fs;
use std::io;
use std::path::PathBuf;

use directories::ProjectDirs;
use serde_json::Error as SerdeError;
use tracing::{info, warn};

use crate::domain::PricingRules;

const APP_QUALIFIER: &str = "com";
const APP_ORG: &str = "CarValueEstimator";
const APP_NAME: &str = "CarValueEstimator";

fn rules_file() -> Option<PathBuf> {
    ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .map(|dirs| dirs.config_dir().join("pricing_rules.json"))
}

/// Load the admin-edited rules snapshot, falling back to the seeded defaults.
///
/// The fallback is logged, never silent: running on defaults changes every
/// displayed price and an admin needs to know.
pub fn load_pricing_rules() -> PricingRules {
    let Some(path) = rules_file() else {
        warn!("no config directory available; using seeded pricing rules");
        return PricingRules::seeded();
    };

    match fs::read_to_string(&path) {
        Ok(data) => match serde_json::from_str(&data) {
            Ok(rules) => rules,
            Err(error) => {
                warn!(
                    path = %path.display(),
                    %error,
                    "pricing rules file is unreadable; using seeded defaults"
                );
                PricingRules::seeded()
            }
        },
        Err(error) if error.kind() == io::ErrorKind::NotFound => {
            info!(path = %path.display(), "no pricing rules saved yet; using seeded defaults");
            PricingRules::seeded()
        }
        Err(error) => {
            warn!(
                path = %path.display(),
                %error,
                "failed to read pricing rules; using seeded defaults"
            );
            PricingRules::seeded()
        }
    }
}

pub fn save_pricing_rules(rules: &PricingRules) -> Result<(), PersistSaveError> {
    let path = rules_file().ok_or(PersistSaveError::StorageUnavailable)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(rules)?;
    fs::write(path, json)?;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum PersistSaveError {
    #[error("storage directory unavailable")]
    StorageUnavailable,
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serde(#[from] SerdeError),
}
