//! Persisted API registrations (`{"apis": {name: {...}}}`).

use crate::error::RegistryError;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use url::Url;

/// A named OpenAPI document source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiRegistration {
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Sent with every fetch of `url` (e.g. `Authorization`).
    #[serde(default)]
    pub headers: IndexMap<String, String>,
}

impl ApiRegistration {
    /// # Errors
    ///
    /// Returns [`RegistryError::Invalid`] when the name is blank or `url` is not an absolute
    /// `http`/`https` URL.
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        description: Option<String>,
        headers: IndexMap<String, String>,
    ) -> Result<Self, RegistryError> {
        let reg = Self {
            name: name.into().trim().to_string(),
            url: url.into().trim().to_string(),
            description: description.filter(|d| !d.trim().is_empty()),
            headers,
        };
        reg.validate()?;
        Ok(reg)
    }

    fn validate(&self) -> Result<(), RegistryError> {
        if self.name.is_empty() {
            return Err(RegistryError::Invalid("name must not be empty".to_string()));
        }
        if is_direct_url(&self.name) {
            return Err(RegistryError::Invalid(format!(
                "name '{}' must not be a URL",
                self.name
            )));
        }
        let url = Url::parse(&self.url)
            .map_err(|e| RegistryError::Invalid(format!("invalid url '{}': {e}", self.url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(RegistryError::Invalid(format!(
                "url scheme '{}' is not supported (expected http or https)",
                url.scheme()
            )));
        }
        Ok(())
    }
}

/// Whether an API identifier should be fetched directly instead of looked up by name.
#[must_use]
pub fn is_direct_url(api: &str) -> bool {
    api.starts_with("http://") || api.starts_with("https://")
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    apis: IndexMap<String, ApiRegistration>,
}

/// File-backed registration store.
///
/// The whole file is rewritten on every change (temp file + rename); the in-memory map is only
/// updated once the write succeeded.
#[derive(Debug)]
pub struct RegistrationStore {
    path: PathBuf,
    apis: Mutex<IndexMap<String, ApiRegistration>>,
}

impl RegistrationStore {
    /// Load the store at `path`. A missing file is an empty store.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Read`] or [`RegistryError::Parse`] if the file exists but cannot
    /// be loaded.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        let path = path.into();
        let apis = load(&path)?;
        tracing::info!(path = %path.display(), apis = apis.len(), "Loaded API registrations");
        Ok(Self {
            path,
            apis: Mutex::new(apis),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<ApiRegistration> {
        self.apis.lock().get(name).cloned()
    }

    /// Registrations in insertion order.
    #[must_use]
    pub fn list(&self) -> Vec<ApiRegistration> {
        self.apis.lock().values().cloned().collect()
    }

    /// Insert or replace a registration, returning the one it replaced.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Invalid`] for an invalid registration and
    /// [`RegistryError::Write`] if persisting fails (the store is left unchanged).
    pub fn put(&self, reg: ApiRegistration) -> Result<Option<ApiRegistration>, RegistryError> {
        reg.validate()?;
        let mut apis = self.apis.lock();
        let mut next = apis.clone();
        let previous = next.insert(reg.name.clone(), reg.clone());
        save(&self.path, &next)?;
        *apis = next;
        tracing::info!(api = %reg.name, replaced = previous.is_some(), "Saved API registration");
        Ok(previous)
    }

    /// Remove a registration, returning it if it existed.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Write`] if persisting fails (the store is left unchanged).
    pub fn delete(&self, name: &str) -> Result<Option<ApiRegistration>, RegistryError> {
        let mut apis = self.apis.lock();
        if !apis.contains_key(name) {
            return Ok(None);
        }
        let mut next = apis.clone();
        let removed = next.shift_remove(name);
        save(&self.path, &next)?;
        *apis = next;
        tracing::info!(api = %name, "Removed API registration");
        Ok(removed)
    }
}

fn load(path: &Path) -> Result<IndexMap<String, ApiRegistration>, RegistryError> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(IndexMap::new()),
        Err(source) => {
            return Err(RegistryError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    let file: RegistryFile =
        serde_json::from_slice(&bytes).map_err(|source| RegistryError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

    // The map key is authoritative for the name.
    Ok(file
        .apis
        .into_iter()
        .map(|(name, mut reg)| {
            reg.name.clone_from(&name);
            (name, reg)
        })
        .collect())
}

fn save(path: &Path, apis: &IndexMap<String, ApiRegistration>) -> Result<(), RegistryError> {
    let write_err = |source: std::io::Error| RegistryError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(write_err)?;
    }
    let file = RegistryFile { apis: apis.clone() };
    let bytes = serde_json::to_vec_pretty(&file)
        .map_err(|e| write_err(std::io::Error::other(e)))?;
    let tmp = temp_path(path);
    std::fs::write(&tmp, bytes).map_err(write_err)?;
    std::fs::rename(&tmp, path).map_err(write_err)
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from("api_configs.json"));
    name.push(".tmp");
    path.with_file_name(name)
}
