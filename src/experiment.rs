//! Experiment config primitives
//!
//! Experiments are described by nested JSON objects. A builder produces a list
//! of them, a driver tags each with its id and result directory, and a worker
//! process picks its own config through `__CONFIG_BUILDER__`,
//! `__CONFIG_IDX__` and `__CONFIG_DST_DIR__`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use anyhow::{anyhow, bail, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

pub const ENV_BUILDER: &str = "__CONFIG_BUILDER__";
pub const ENV_IDX: &str = "__CONFIG_IDX__";
pub const ENV_DST_DIR: &str = "__CONFIG_DST_DIR__";

const META: &str = "meta";

/// `path::to::builder(args)`
static BUILDER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\S+::[^\s(]+)\((.*)\)$").expect("Invalid BUILDER_RE regex")
});

/// Nested key/value configuration of one experiment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExperimentConfig(Map<String, Value>);

impl ExperimentConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => bail!("config must be a JSON object, got {}", other),
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn get(&self, path: &[&str]) -> Option<&Value> {
        let (last, parents) = path.split_last()?;
        let mut node = &self.0;
        for key in parents {
            node = node.get(*key)?.as_object()?;
        }
        node.get(*last)
    }

    /// Set `path`, creating intermediate sections as needed
    pub fn set(&mut self, path: &[&str], value: impl Into<Value>) -> Result<()> {
        let (last, parents) = path
            .split_last()
            .ok_or_else(|| anyhow!("empty config path"))?;
        let mut node = &mut self.0;
        for key in parents {
            let child = node
                .entry(key.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            node = child
                .as_object_mut()
                .ok_or_else(|| anyhow!("'{}' in {:?} is not a section", key, path))?;
        }
        node.insert(last.to_string(), value.into());
        Ok(())
    }

    /// `meta.id`, if assigned
    pub fn id(&self) -> Option<u64> {
        self.get(&[META, "id"]).and_then(Value::as_u64)
    }

    /// Leaf values keyed by dotted path, e.g. `meta.id`
    pub fn flatten(&self) -> BTreeMap<String, Value> {
        fn walk(prefix: &str, map: &Map<String, Value>, out: &mut BTreeMap<String, Value>) {
            for (key, value) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                match value {
                    Value::Object(child) if !child.is_empty() => walk(&path, child, out),
                    leaf => {
                        out.insert(path, leaf.clone());
                    }
                }
            }
        }
        let mut out = BTreeMap::new();
        walk("", &self.0, &mut out);
        out
    }
}

impl fmt::Display for ExperimentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(&self.0) {
            Ok(s) => f.write_str(&s),
            Err(_) => f.write_str("{}"),
        }
    }
}

/// Copies of `configs` with `meta.result_dir` set
pub fn add_result_dir(dst_dir: &str, configs: &[ExperimentConfig]) -> Result<Vec<ExperimentConfig>> {
    configs
        .iter()
        .map(|config| {
            let mut config = config.clone();
            config.set(&[META, "result_dir"], dst_dir)?;
            Ok(config)
        })
        .collect()
}

/// Copy of `config` with `meta.experiment_result_dir` set
pub fn set_experiment_result_dir(dst_dir: &str, config: &ExperimentConfig) -> Result<ExperimentConfig> {
    let mut config = config.clone();
    config.set(&[META, "experiment_result_dir"], dst_dir)?;
    Ok(config)
}

/// Copies of `configs` with `meta.id` set to their position
pub fn add_config_idx(configs: &[ExperimentConfig]) -> Result<Vec<ExperimentConfig>> {
    configs
        .iter()
        .enumerate()
        .map(|(i, config)| {
            let mut config = config.clone();
            config.set(&[META, "id"], i as u64)?;
            Ok(config)
        })
        .collect()
}

/// Configs ordered by `meta.id`; configs without an id keep their order and come last
pub fn sort_by_id(configs: &[ExperimentConfig]) -> Vec<ExperimentConfig> {
    let mut sorted = configs.to_vec();
    sorted.sort_by_key(|c| c.id().map_or((1, 0), |id| (0, id)));
    sorted
}

/// The `idx`-th config in `meta.id` order
pub fn select_by_index(configs: &[ExperimentConfig], idx: usize) -> Result<ExperimentConfig> {
    if idx >= configs.len() {
        bail!("config index {} out of range (0..{})", idx, configs.len());
    }
    Ok(sort_by_id(configs).swap_remove(idx))
}

pub fn assert_no_duplicates(configs: &[ExperimentConfig]) -> Result<()> {
    let mut seen = HashSet::new();
    for (i, config) in configs.iter().enumerate() {
        if !seen.insert(config.to_string()) {
            bail!("There are duplicate configs in passed list (first repeat at #{})", i);
        }
    }
    Ok(())
}

/// Leaves shared by every config, as a config
pub fn config_intersection(configs: &[ExperimentConfig]) -> Result<ExperimentConfig> {
    let flat: Vec<_> = configs.iter().map(ExperimentConfig::flatten).collect();
    let mut common = ExperimentConfig::new();
    let Some((first, rest)) = flat.split_first() else {
        return Ok(common);
    };
    for (path, value) in first {
        if rest.iter().all(|other| other.get(path) == Some(value)) {
            let parts: Vec<&str> = path.split('.').collect();
            common.set(&parts, value.clone())?;
        }
    }
    Ok(common)
}

/// Leaves that vary across configs, with each config's value (`null` if missing).
///
/// `meta.id` and `meta.experiment_result_dir` always vary and are left out.
pub fn config_difference(configs: &[ExperimentConfig]) -> BTreeMap<String, Vec<Value>> {
    const ALWAYS_VARYING: [&str; 2] = ["meta.id", "meta.experiment_result_dir"];
    let flat: Vec<_> = configs.iter().map(ExperimentConfig::flatten).collect();
    let paths: HashSet<&String> = flat.iter().flat_map(|f| f.keys()).collect();

    let mut difference = BTreeMap::new();
    for path in paths {
        if ALWAYS_VARYING.contains(&path.as_str()) {
            continue;
        }
        let values: Vec<Value> = flat
            .iter()
            .map(|f| f.get(path).cloned().unwrap_or(Value::Null))
            .collect();
        if values.iter().any(|v| v != &values[0]) || flat.iter().any(|f| !f.contains_key(path)) {
            difference.insert(path.clone(), values);
        }
    }
    difference
}

type BuilderFn = Box<dyn Fn(&str) -> Result<Vec<ExperimentConfig>> + Send + Sync>;

/// Named config builders, invoked as `path::to::builder(args)`
#[derive(Default)]
pub struct BuilderRegistry {
    builders: HashMap<String, BuilderFn>,
}

impl fmt::Debug for BuilderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.builders.keys().collect();
        names.sort();
        f.debug_struct("BuilderRegistry").field("builders", &names).finish()
    }
}

impl BuilderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `builder` under `path` (e.g. `nlp::configs::build_grid`).
    /// It receives the text between the parentheses.
    pub fn register<F>(&mut self, path: impl Into<String>, builder: F) -> &mut Self
    where
        F: Fn(&str) -> Result<Vec<ExperimentConfig>> + Send + Sync + 'static,
    {
        self.builders.insert(path.into(), Box::new(builder));
        self
    }

    /// Run the builder named by `reference`
    pub fn build(&self, reference: &str) -> Result<Vec<ExperimentConfig>> {
        let caps = BUILDER_RE
            .captures(reference.trim())
            .ok_or_else(|| anyhow!("config_builder='{}' is not of the form path::builder(args)", reference))?;
        let path = &caps[1];
        let args = caps[2].trim();
        debug!("builder={} args={}", path, args);

        let builder = self
            .builders
            .get(path)
            .ok_or_else(|| anyhow!("unknown config builder '{}'", path))?;
        builder(args).with_context(|| format!("config builder '{}' failed", path))
    }
}

/// Pick this process's config from the environment.
///
/// Returns `None` when no variable is set and fails when only some are.
pub fn config_from_env(registry: &BuilderRegistry) -> Result<Option<ExperimentConfig>> {
    config_from_lookup(registry, |name| std::env::var(name).ok())
}

pub fn config_from_lookup<F>(registry: &BuilderRegistry, lookup: F) -> Result<Option<ExperimentConfig>>
where
    F: Fn(&str) -> Option<String>,
{
    let (builder, idx, dst_dir) = (lookup(ENV_BUILDER), lookup(ENV_IDX), lookup(ENV_DST_DIR));
    if builder.is_none() && idx.is_none() && dst_dir.is_none() {
        return Ok(None);
    }
    warn!("Found some config vars in environment");
    let (Some(builder), Some(idx), Some(dst_dir)) = (builder, idx, dst_dir) else {
        bail!(
            "Some config vars '{}, {}, {}' were defined, but not all",
            ENV_BUILDER,
            ENV_IDX,
            ENV_DST_DIR
        );
    };

    info!("{}={}", ENV_BUILDER, builder);
    let configs = registry.build(&builder)?;
    info!("{}={}", ENV_DST_DIR, dst_dir);
    let configs = add_result_dir(&dst_dir, &configs)?;
    info!("{}={}", ENV_IDX, idx);
    let idx: usize = idx
        .trim()
        .parse()
        .with_context(|| format!("{} must be a non-negative integer, got '{}'", ENV_IDX, idx))?;
    if idx >= configs.len() {
        bail!("{}={} but the builder produced {} configs", ENV_IDX, idx, configs.len());
    }
    let config = set_experiment_result_dir(&dst_dir, &configs[idx])?;
    Ok(Some(config))
}
