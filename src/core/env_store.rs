// src/core/env_store.rs

//! Persisted environment carried from one stage invocation to the next.
//!
//! The file is a flat JSON object of strings. It holds the whole working
//! environment of the last successful stage plus the completion markers.
//! A single writer is assumed: concurrent runners sharing one file are not
//! supported and no locking is done.

use crate::models::EnvMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

/// Failures reading or writing the persisted environment.
#[derive(Error, Debug)]
pub enum EnvStoreError {
    /// The file exists but could not be read.
    #[error("Failed to read environment file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// The file is not a JSON object.
    #[error("Environment file '{path}' is malformed: {source}")]
    Malformed {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    /// Writing, replacing or deleting the file failed.
    #[error("Failed to write environment file '{path}': {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// The environment could not be encoded.
    #[error("Failed to serialize environment: {0}")]
    Serialize(#[from] serde_json::Error),
}

type StoreResult<T> = Result<T, EnvStoreError>;

/// Load/save/clear access to the persisted environment file.
#[derive(Debug, Clone)]
pub struct EnvStore {
    path: PathBuf,
}

impl EnvStore {
    /// A store backed by `path`. Nothing is read until asked.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns only what is persisted. A missing file reads as an empty map.
    /// Non-string JSON values are coerced to their textual form.
    pub fn read(&self) -> StoreResult<EnvMap> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(EnvMap::new()),
            Err(e) => {
                return Err(EnvStoreError::Read {
                    path: self.path.display().to_string(),
                    source: e,
                });
            }
        };

        let raw: BTreeMap<String, serde_json::Value> =
            serde_json::from_str(&content).map_err(|e| EnvStoreError::Malformed {
                path: self.path.display().to_string(),
                source: e,
            })?;

        Ok(raw
            .into_iter()
            .map(|(key, value)| match value {
                serde_json::Value::String(s) => (key, s),
                other => (key, other.to_string()),
            })
            .collect())
    }

    /// Returns `base` (normally the host process environment) overlaid with the persisted map.
    pub fn load(&self, base: &EnvMap) -> StoreResult<EnvMap> {
        let mut env = base.clone();
        env.extend(self.read()?);
        Ok(env)
    }

    /// Writes `env` as indented JSON, replacing the file atomically.
    pub fn save(&self, env: &EnvMap) -> StoreResult<()> {
        let mut buffer = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
        env.serialize(&mut serializer)?;

        let write_error = |source: std::io::Error| EnvStoreError::Write {
            path: self.path.display().to_string(),
            source,
        };

        let parent = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut temp = NamedTempFile::new_in(&parent).map_err(write_error)?;
        temp.write_all(&buffer).map_err(write_error)?;
        temp.persist(&self.path)
            .map_err(|e| write_error(e.error))?;

        log::debug!(
            "Saved {} environment variables to '{}'",
            env.len(),
            self.path.display()
        );
        Ok(())
    }

    /// Deletes the file. Does nothing if it does not exist.
    pub fn clear(&self) -> StoreResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                log::debug!("Removed environment file '{}'", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(EnvStoreError::Write {
                path: self.path.display().to_string(),
                source: e,
            }),
        }
    }

    /// Loads the working environment for the duration of one stage.
    ///
    /// The returned scope persists the environment only through [`EnvScope::commit`].
    /// Dropping it on any other path (an error, an early return) discards the changes.
    pub fn acquire(&self, base: &EnvMap) -> StoreResult<EnvScope<'_>> {
        Ok(EnvScope {
            store: self,
            state: ScopeState::Pristine(self.load(base)?),
            committed: false,
        })
    }
}

/// Holds the loaded environment and, once mutated, the snapshot it started from.
#[derive(Debug)]
enum ScopeState {
    /// No mutable access has been handed out yet.
    Pristine(EnvMap),
    /// Mutable access was requested; `original` is the state at acquisition.
    Dirty { original: EnvMap, current: EnvMap },
}

/// The working environment of one stage execution.
#[derive(Debug)]
pub struct EnvScope<'a> {
    store: &'a EnvStore,
    state: ScopeState,
    committed: bool,
}

impl EnvScope<'_> {
    /// Whether the environment differs from what was loaded.
    pub fn needs_saving(&self) -> bool {
        match &self.state {
            ScopeState::Pristine(_) => false,
            ScopeState::Dirty { original, current } => original != current,
        }
    }

    /// Persists the environment (if it changed) and releases the scope.
    pub fn commit(mut self) -> StoreResult<()> {
        self.committed = true;
        if self.needs_saving() {
            self.store.save(&self)
        } else {
            log::debug!("Environment unchanged, nothing to save.");
            Ok(())
        }
    }
}

impl Deref for EnvScope<'_> {
    type Target = EnvMap;

    fn deref(&self) -> &Self::Target {
        match &self.state {
            ScopeState::Pristine(env) => env,
            ScopeState::Dirty { current, .. } => current,
        }
    }
}

impl DerefMut for EnvScope<'_> {
    fn deref_mut(&mut self) -> &mut EnvMap {
        // First mutable access keeps a copy of the loaded state.
        if let ScopeState::Pristine(env) = &mut self.state {
            let current = std::mem::take(env);
            self.state = ScopeState::Dirty {
                original: current.clone(),
                current,
            };
        }

        match &mut self.state {
            ScopeState::Dirty { current, .. } => current,
            ScopeState::Pristine(env) => env,
        }
    }
}

impl Drop for EnvScope<'_> {
    fn drop(&mut self) {
        if !self.committed && self.needs_saving() {
            log::debug!(
                "Discarding uncommitted environment changes for '{}'",
                self.store.path.display()
            );
        }
    }
}
