use std::{
    fs,
    path::{Path, PathBuf},
};

use config::{Config, Environment, File, FileFormat};
use eyre::{Context, Result};

use crate::{
    config::{models::ServerConfig, validation::ApiDefinitionValidator},
    core::{
        definition::{ApiDefinition, PrivateDefinition, PrivateTable},
        registry::ApiRegistry,
    },
};

/// Prefix of environment variables overriding file settings
/// (`APIHUB_LISTEN_ADDR`, `APIHUB_LOG__LEVEL`, ...).
pub const ENV_PREFIX: &str = "APIHUB";

/// Load the server configuration from an optional file layered with
/// `APIHUB_*` environment variables. Supports YAML, JSON and TOML.
pub fn load_config(config_path: Option<&str>) -> Result<ServerConfig> {
    let mut builder = Config::builder();

    if let Some(config_path) = config_path {
        let path = Path::new(config_path);
        let format = match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => FileFormat::Yaml,
            Some("json") => FileFormat::Json,
            _ => FileFormat::Toml,
        };
        builder = builder.add_source(File::new(config_path, format));
    }

    let settings = builder
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .with_context(|| format!("Failed to build config from {config_path:?}"))?;

    settings
        .try_deserialize::<ServerConfig>()
        .with_context(|| format!("Failed to deserialize config from {config_path:?}"))
}

/// Read every API definition and private store the configuration points at.
///
/// Definitions failing validation are still registered; their problems are
/// logged as warnings.
pub fn load_registry(config: &ServerConfig) -> Result<ApiRegistry> {
    let mut registry = ApiRegistry::new();

    for definition in load_definitions(Path::new(&config.api_def_path))? {
        if let Err(e) = ApiDefinitionValidator::validate(&definition) {
            tracing::warn!("API definition '{}' is invalid: {}", definition.id, e);
        }
        registry.insert_api(definition);
    }

    for (scope, table) in load_privates(Path::new(&config.private_def_path))? {
        registry.insert_privates(scope, table);
    }

    tracing::info!(
        "Loaded {} API definitions and {} private stores",
        registry.len(),
        registry.private_store_count()
    );
    Ok(registry)
}

/// Parse `*.json` definitions in `dir`. Files in a first-level subdirectory
/// are registered under `<subdirectory>/<id>`.
pub fn load_definitions(dir: &Path) -> Result<Vec<ApiDefinition>> {
    let mut definitions = Vec::new();
    for entry in json_entries(dir)? {
        match entry {
            DirEntry::File(path) => definitions.push(read_definition(&path, None)?),
            DirEntry::Bucket(bucket, bucket_dir) => {
                for nested in json_entries(&bucket_dir)? {
                    if let DirEntry::File(path) = nested {
                        definitions.push(read_definition(&path, Some(&bucket))?);
                    }
                }
            }
        }
    }
    Ok(definitions)
}

/// Parse `*.json` private stores in `dir`, keyed by file stem.
pub fn load_privates(dir: &Path) -> Result<Vec<(String, PrivateTable)>> {
    let mut stores = Vec::new();
    for entry in json_entries(dir)? {
        if let DirEntry::File(path) = entry {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let private: PrivateDefinition = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse private store {}", path.display()))?;
            stores.push((file_stem(&path), private.into_table()));
        }
    }
    Ok(stores)
}

enum DirEntry {
    File(PathBuf),
    Bucket(String, PathBuf),
}

fn json_entries(dir: &Path) -> Result<Vec<DirEntry>> {
    if !dir.is_dir() {
        tracing::warn!("Definition directory {} does not exist", dir.display());
        return Ok(Vec::new());
    }

    let mut entries = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to list {}", dir.display()))? {
        let path = entry
            .with_context(|| format!("Failed to list {}", dir.display()))?
            .path();
        if path.is_dir() {
            if let Some(bucket) = path.file_name().and_then(|name| name.to_str()) {
                entries.push(DirEntry::Bucket(bucket.to_string(), path.clone()));
            }
        } else if path.extension().is_some_and(|ext| ext == "json") {
            entries.push(DirEntry::File(path));
        }
    }
    entries.sort_by(|a, b| entry_path(a).cmp(entry_path(b)));
    Ok(entries)
}

fn entry_path(entry: &DirEntry) -> &Path {
    match entry {
        DirEntry::File(path) | DirEntry::Bucket(_, path) => path,
    }
}

fn read_definition(path: &Path, bucket: Option<&str>) -> Result<ApiDefinition> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let mut definition: ApiDefinition = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse API definition {}", path.display()))?;

    if definition.id.is_empty() {
        definition.id = file_stem(path);
    }
    if let Some(bucket) = bucket {
        definition.id = format!("{bucket}/{}", definition.id);
    }
    tracing::debug!("Read API definition '{}' from {}", definition.id, path.display());
    Ok(definition)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}
