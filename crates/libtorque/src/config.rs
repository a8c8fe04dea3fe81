use std::{
    collections::BTreeMap,
    env, fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use tracing::debug;

use crate::error::{Result, TorqueError};

/// Host used when no other source names one.
pub const DEFAULT_HOST: &str = "qtorque.io";
/// Profile read from the config file when none is selected.
pub const DEFAULT_PROFILE: &str = "default";
/// Environment variable holding the access token.
pub const ENV_TOKEN: &str = "TORQUE_TOKEN";
/// Environment variable holding the space name.
pub const ENV_SPACE: &str = "TORQUE_SPACE";
/// Environment variable holding the service host.
pub const ENV_HOST: &str = "TORQUE_HOSTNAME";
/// Environment variable selecting the config profile.
pub const ENV_PROFILE: &str = "TORQUE_PROFILE";

/// Values given explicitly on the command line. They win over every other source.
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    /// Profile to read from the config file.
    pub profile: Option<String>,
    /// Access token.
    pub token: Option<String>,
    /// Space name.
    pub space: Option<String>,
    /// Service host.
    pub host: Option<String>,
    /// Config file location, replacing the default.
    pub config_path: Option<PathBuf>,
}

/// One `[profiles.<name>]` table of the config file.
#[derive(Debug, Clone, Default, Deserialize)]
struct Profile {
    /// Access token.
    token: Option<String>,
    /// Space name.
    space: Option<String>,
    /// Service host.
    host: Option<String>,
}

/// Layout of the config file.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    /// Named connection profiles.
    #[serde(default)]
    profiles: BTreeMap<String, Profile>,
}

/// Connection settings for the remote service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Bearer token.
    pub token: String,
    /// Space the blueprints live in.
    pub space: String,
    /// Service host name.
    pub host: String,
}

impl Settings {
    /// Resolve settings from flags, the process environment and the config file.
    pub fn resolve(overrides: &SettingsOverrides) -> Result<Self> {
        Self::resolve_with(overrides, |key| env::var(key).ok())
    }

    /// Resolve settings using `lookup` in place of the process environment.
    pub fn resolve_with(
        overrides: &SettingsOverrides,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let profile_name = overrides
            .profile
            .clone()
            .or_else(|| lookup(ENV_PROFILE))
            .unwrap_or_else(|| DEFAULT_PROFILE.to_string());
        let explicit_profile = overrides.profile.is_some() || lookup(ENV_PROFILE).is_some();

        let config_path = match &overrides.config_path {
            Some(path) => Some(path.clone()),
            None => default_config_path(&lookup),
        };
        let profile = match &config_path {
            Some(path) => load_profile(
                path,
                &profile_name,
                overrides.config_path.is_some(),
                explicit_profile,
            )?,
            None => Profile::default(),
        };

        let token = overrides
            .token
            .clone()
            .or_else(|| lookup(ENV_TOKEN))
            .or(profile.token)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                TorqueError::Config(format!(
                    "no access token; pass --token, set {ENV_TOKEN} or add it to profile '{profile_name}'"
                ))
            })?;
        let space = overrides
            .space
            .clone()
            .or_else(|| lookup(ENV_SPACE))
            .or(profile.space)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                TorqueError::Config(format!(
                    "no space; pass --space, set {ENV_SPACE} or add it to profile '{profile_name}'"
                ))
            })?;
        let host = overrides
            .host
            .clone()
            .or_else(|| lookup(ENV_HOST))
            .or(profile.host)
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_HOST.to_string());

        debug!(profile = %profile_name, space = %space, host = %host, "resolved settings");
        Ok(Self { token, space, host })
    }
}

/// `~/.torque/config.toml`, when a home directory is known.
fn default_config_path(lookup: &impl Fn(&str) -> Option<String>) -> Option<PathBuf> {
    lookup("HOME").map(|home| Path::new(&home).join(".torque").join("config.toml"))
}

/// Read one profile from the config file at `path`.
///
/// A missing file is only an error when its location was given explicitly, and
/// a missing profile only when it was selected explicitly.
fn load_profile(
    path: &Path,
    name: &str,
    explicit_path: bool,
    explicit_profile: bool,
) -> Result<Profile> {
    if !path.exists() {
        if explicit_path {
            return Err(TorqueError::Config(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        return Ok(Profile::default());
    }

    let contents = fs::read_to_string(path)?;
    let mut config: ConfigFile = toml::from_str(&contents)
        .map_err(|e| TorqueError::Config(format!("invalid config file {}: {e}", path.display())))?;

    match config.profiles.remove(name) {
        Some(profile) => Ok(profile),
        None if explicit_profile => Err(TorqueError::Config(format!(
            "profile '{name}' not found in {}",
            path.display()
        ))),
        None => Ok(Profile::default()),
    }
}
