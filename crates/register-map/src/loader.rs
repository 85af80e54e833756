use crate::types::{RegisterDefinition, RegisterMap};
use anyhow::Context;
use serde::Deserialize;
use serde_yaml::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Register maps keyed by inverter config model.
#[derive(Debug, Default, Clone)]
pub struct RegisterMapRegistry {
    pub maps: HashMap<String, Arc<RegisterMap>>,
}

impl RegisterMapRegistry {
    pub fn insert(&mut self, model: impl Into<String>, map: RegisterMap) {
        self.maps.insert(model.into(), Arc::new(map));
    }

    pub fn get(&self, model: &str) -> Option<Arc<RegisterMap>> {
        self.maps.get(model).cloned()
    }

    pub fn models(&self) -> Vec<&str> {
        let mut out: Vec<&str> = self.maps.keys().map(String::as_str).collect();
        out.sort_unstable();
        out
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct RegisterMapFile {
    registers: Vec<RegisterDefinition>,
}

/// Derive the config model from a schema file name: `modbus-<model>.json` → `<model>`.
pub fn model_from_path(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    Some(stem.strip_prefix("modbus-").unwrap_or(stem).to_string())
}

pub fn load_register_map_file(path: impl AsRef<Path>) -> anyhow::Result<RegisterMap> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading register map: {}", path.display()))?;
    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yml") | Some("yaml")
    );
    let file: RegisterMapFile = if is_yaml {
        let val: Value = serde_yaml::from_str(&raw)
            .with_context(|| format!("parsing yaml: {}", path.display()))?;
        serde_yaml::from_value(val)
            .with_context(|| format!("decoding register map: {}", path.display()))?
    } else {
        serde_json::from_str(&raw)
            .with_context(|| format!("decoding register map: {}", path.display()))?
    };
    let map = RegisterMap::new(file.registers);
    for name in map.duplicate_names() {
        warn!(
            "{}: duplicate register name {:?}; later registers overwrite earlier ones",
            path.display(),
            name
        );
    }
    debug!(
        "loaded {} registers ({} words) from {}",
        map.len(),
        map.total_words(),
        path.display()
    );
    Ok(map)
}

pub fn load_register_maps_dir(dir: impl AsRef<Path>) -> anyhow::Result<RegisterMapRegistry> {
    let dir = dir.as_ref();
    let mut reg = RegisterMapRegistry::default();
    let mut entries: Vec<PathBuf> = Vec::new();
    for entry in
        fs::read_dir(dir).with_context(|| format!("reading maps dir: {}", dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();
        if let Some(ext) = path.extension() {
            if ext == "json" || ext == "yml" || ext == "yaml" {
                entries.push(path);
            }
        }
    }
    entries.sort();
    for p in entries {
        let model = model_from_path(&p)
            .with_context(|| format!("unusable file name: {}", p.display()))?;
        let map = load_register_map_file(&p)?;
        reg.insert(model, map);
    }
    Ok(reg)
}
