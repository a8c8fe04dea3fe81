use std::{collections::BTreeMap, env, path::PathBuf};

use chrono::{DateTime, Local};
use libtorque::TorqueError;

/// Expand a leading `~` in a filesystem path using the `HOME` environment variable.
pub fn expand_tilde(path: &str) -> PathBuf {
    if path.starts_with("~")
        && let Ok(home) = env::var("HOME")
    {
        return PathBuf::from(path.replacen("~", &home, 1));
    }
    PathBuf::from(path)
}

/// Replace characters that are awkward in sandbox names with `-`.
pub fn clean_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// Default sandbox name: `<blueprint>-<branch>-<yymmdd-HH.MM.SS>`.
pub fn generate_sandbox_name(blueprint: &str, branch: &str, now: DateTime<Local>) -> String {
    let stamp = now.format("%y%m%d-%H.%M.%S");
    clean_name(&format!("{blueprint}-{branch}-{stamp}"))
}

/// Parse a comma-separated list of `key=value` pairs.
///
/// Whitespace around keys and values is trimmed and empty entries are skipped.
pub fn parse_key_values(raw: Option<&str>) -> Result<BTreeMap<String, String>, TorqueError> {
    let mut pairs = BTreeMap::new();
    let Some(raw) = raw else {
        return Ok(pairs);
    };

    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let Some((key, value)) = entry.split_once('=') else {
            return Err(TorqueError::InvalidArgument(format!(
                "'{entry}' is not a key=value pair"
            )));
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(TorqueError::InvalidArgument(format!(
                "'{entry}' is missing a key"
            )));
        }
        pairs.insert(key.to_string(), value.trim().to_string());
    }
    Ok(pairs)
}
