use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use serde_yaml::Value;
use tracing::debug;

use crate::{
    error::{Result, TorqueError},
    git,
    vcs::Vcs,
};

/// Directory, relative to the repository root, holding blueprint definitions.
pub const BLUEPRINTS_DIR: &str = "blueprints";
/// File extensions recognized as blueprint definitions.
const BLUEPRINT_EXTENSIONS: &[&str] = &["yaml", "yml"];

/// A local git checkout of a blueprint repository.
#[derive(Debug, Clone)]
pub struct BlueprintRepo {
    /// Root of the working tree.
    root: PathBuf,
    /// Blueprint definition files by blueprint name.
    blueprints: BTreeMap<String, PathBuf>,
}

impl BlueprintRepo {
    /// Locate the blueprint repository containing `start_dir`.
    pub fn discover(start_dir: &Path) -> Result<Self> {
        let root = git::find_root(start_dir)
            .ok_or_else(|| TorqueError::BlueprintRepo("not a git folder".to_string()))?;

        let remotes = git::list_remotes(&root).map_err(|e| TorqueError::GitError(format!("{e:#}")))?;
        if remotes.is_empty() {
            return Err(TorqueError::BlueprintRepo(
                "local repository not connected to the remote space repository".to_string(),
            ));
        }

        let blueprints_dir = root.join(BLUEPRINTS_DIR);
        if !blueprints_dir.is_dir() {
            return Err(TorqueError::BlueprintRepo(format!(
                "repository doesn't have a '{BLUEPRINTS_DIR}' dir"
            )));
        }

        let mut blueprints = BTreeMap::new();
        for entry in fs::read_dir(&blueprints_dir)? {
            let path = entry?.path();
            let is_blueprint = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| BLUEPRINT_EXTENSIONS.contains(&ext));
            if !is_blueprint || !path.is_file() {
                continue;
            }
            if let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) {
                blueprints.insert(name.to_string(), path.clone());
            }
        }

        debug!(root = %root.display(), count = blueprints.len(), "indexed blueprints");
        Ok(Self { root, blueprints })
    }

    /// Root of the working tree.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Names of every blueprint in the repository.
    pub fn blueprint_names(&self) -> impl Iterator<Item = &str> {
        self.blueprints.keys().map(String::as_str)
    }

    /// Whether the repository defines `name`.
    pub fn has_blueprint(&self, name: &str) -> bool {
        self.blueprints.contains_key(name)
    }

    /// Fail unless the repository defines `name`.
    pub fn require_blueprint(&self, name: &str) -> Result<&Path> {
        self.blueprints.get(name).map(PathBuf::as_path).ok_or_else(|| {
            TorqueError::BlueprintRepo(format!(
                "blueprint git repo does not contain blueprint {name}"
            ))
        })
    }

    /// Parsed YAML of blueprint `name`.
    fn load(&self, name: &str) -> Result<Value> {
        let path = self.require_blueprint(name)?;
        let contents = fs::read_to_string(path)?;
        serde_yaml::from_str(&contents).map_err(|e| {
            TorqueError::BlueprintRepo(format!("invalid blueprint {}: {e}", path.display()))
        })
    }

    /// Default artifact paths declared by blueprint `name`.
    pub fn default_artifacts(&self, name: &str) -> Result<BTreeMap<String, String>> {
        let yaml = self.load(name)?;
        Ok(entries(&yaml, "artifacts")
            .filter_map(|(key, value)| scalar(value).map(|path| (key, path)))
            .collect())
    }

    /// Default input values declared by blueprint `name`, in either the
    /// `name: value` or `name: {default_value: value}` form.
    pub fn default_inputs(&self, name: &str) -> Result<BTreeMap<String, String>> {
        let yaml = self.load(name)?;
        Ok(entries(&yaml, "inputs")
            .filter_map(|(key, value)| {
                let value = match value {
                    Value::Mapping(spec) => spec.get("default_value")?,
                    other => other,
                };
                scalar(value).map(|value| (key, value))
            })
            .collect())
    }
}

/// Flatten a YAML list of single-entry maps under `section` into key/value pairs.
fn entries<'a>(yaml: &'a Value, section: &str) -> impl Iterator<Item = (String, &'a Value)> {
    yaml.get(section)
        .and_then(Value::as_sequence)
        .into_iter()
        .flatten()
        .filter_map(Value::as_mapping)
        .flatten()
        .filter_map(|(key, value)| key.as_str().map(|key| (key.to_string(), value)))
}

/// String form of a scalar YAML value; `None` for nulls and collections.
fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Fill missing `artifacts` and `inputs` from the blueprint's declared defaults.
///
/// Defaults are only trusted when the current branch is synced with its remote,
/// since the remote builds from its own copy. Failures are logged and ignored.
/// Returns whether defaults were applied.
pub fn apply_synced_defaults(
    vcs: &dyn Vcs,
    repo: &BlueprintRepo,
    blueprint: &str,
    artifacts: &mut BTreeMap<String, String>,
    inputs: &mut BTreeMap<String, String>,
) -> bool {
    debug!(blueprint, "obtaining default artifacts and inputs from the local blueprint repo");
    match fill_defaults(vcs, repo, blueprint, artifacts, inputs) {
        Ok(applied) => applied,
        Err(e) => {
            debug!("unable to obtain default values: {e:#}");
            false
        }
    }
}

/// Fallible body of [`apply_synced_defaults`].
fn fill_defaults(
    vcs: &dyn Vcs,
    repo: &BlueprintRepo,
    blueprint: &str,
    artifacts: &mut BTreeMap<String, String>,
    inputs: &mut BTreeMap<String, String>,
) -> anyhow::Result<bool> {
    let Some(branch) = vcs.current_branch()? else {
        debug!("skipping default values on a detached HEAD");
        return Ok(false);
    };
    if !vcs.is_synced_with_remote(&branch)? {
        debug!(branch = %branch, "skipping default values since the local branch is not synced with remote");
        return Ok(false);
    }

    for (name, path) in repo.default_artifacts(blueprint)? {
        if !artifacts.contains_key(&name) {
            debug!("artifact `{name}` set to default path `{path}`");
            artifacts.insert(name, path);
        }
    }
    for (name, value) in repo.default_inputs(blueprint)? {
        if !inputs.contains_key(&name) {
            debug!("input `{name}` set to default value `{value}`");
            inputs.insert(name, value);
        }
    }
    Ok(true)
}
