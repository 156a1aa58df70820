//! Schema versioning for persisted values.
//!
//! Persisted objects carry their schema version under [`VERSION_KEY`]. On
//! load, a [`Migrator`] turns whatever was found in storage into a value at
//! the current version.

use crate::error::{Result, StoreError};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info};

/// Field holding the schema version of a persisted object.
pub const VERSION_KEY: &str = "_version";

/// Schema version of `value`, if it is an object carrying one.
pub fn version_of(value: &Value) -> Option<u64> {
    value.get(VERSION_KEY).and_then(Value::as_u64)
}

/// Resolves a persisted value against the current default.
pub trait Migrator {
    /// Produce the value to start from. `persisted` is what storage held,
    /// `default` is the encoded default state at the current version.
    fn run(&self, persisted: Option<Value>, default: &Value) -> Result<Value>;
}

/// Discards anything not at the current version.
#[derive(Clone, Copy, Debug, Default)]
pub struct NonMigrationManager;

impl Migrator for NonMigrationManager {
    fn run(&self, persisted: Option<Value>, default: &Value) -> Result<Value> {
        match persisted {
            Some(value) if version_of(&value) == version_of(default) => Ok(value),
            Some(value) => {
                info!(
                    found = ?version_of(&value),
                    current = ?version_of(default),
                    "persisted version mismatch, resetting to default"
                );
                Ok(default.clone())
            }
            None => Ok(default.clone()),
        }
    }
}

/// One migration step.
pub type MigrationFn = Box<dyn Fn(Value) -> Result<Value>>;

/// Upgrades persisted values through a chain of registered steps.
///
/// Each step is keyed by the version it upgrades *from* and must return a
/// value with a higher version. Steps run in sequence until the current
/// version is reached.
#[derive(Default)]
pub struct MigrationManager {
    migrations: BTreeMap<u64, MigrationFn>,
    unversioned: Option<MigrationFn>,
}

impl MigrationManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the step upgrading values at `source_version`.
    pub fn register_migration<F>(&mut self, source_version: u64, migration: F) -> &mut Self
    where
        F: Fn(Value) -> Result<Value> + 'static,
    {
        self.migrations.insert(source_version, Box::new(migration));
        self
    }

    /// Register the step for values persisted without a version.
    pub fn register_unversioned_migration<F>(&mut self, migration: F) -> &mut Self
    where
        F: Fn(Value) -> Result<Value> + 'static,
    {
        self.unversioned = Some(Box::new(migration));
        self
    }

    fn step(&self, version: Option<u64>) -> Option<&MigrationFn> {
        match version {
            Some(version) => self.migrations.get(&version),
            None => self.unversioned.as_ref(),
        }
    }
}

impl Migrator for MigrationManager {
    fn run(&self, persisted: Option<Value>, default: &Value) -> Result<Value> {
        let mut value = match persisted {
            Some(value) => value,
            None => return Ok(default.clone()),
        };

        let target = version_of(default)
            .ok_or_else(|| StoreError::Migration("default state has no version".into()))?;
        let mut version = version_of(&value);

        if let Some(found) = version {
            if found > target {
                return Err(StoreError::Migration(format!(
                    "persisted version {} is newer than current version {}",
                    found, target
                )));
            }
        }

        while version != Some(target) {
            let migration = self.step(version).ok_or_else(|| {
                StoreError::Migration(match version {
                    Some(v) => format!("no migration from version {}", v),
                    None => "no migration for unversioned state".to_string(),
                })
            })?;

            value = migration(value)?;
            let next = version_of(&value).ok_or_else(|| {
                StoreError::Migration(format!(
                    "migration from {:?} produced a value without a version",
                    version
                ))
            })?;

            if version.map_or(false, |v| next <= v) {
                return Err(StoreError::Migration(format!(
                    "migration from version {:?} did not advance (got {})",
                    version, next
                )));
            }
            if next > target {
                return Err(StoreError::Migration(format!(
                    "migration produced version {} past current version {}",
                    next, target
                )));
            }

            debug!(from = ?version, to = next, "migrated persisted state");
            version = Some(next);
        }

        Ok(value)
    }
}

impl fmt::Debug for MigrationManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationManager")
            .field("versions", &self.migrations.keys().collect::<Vec<_>>())
            .field("unversioned", &self.unversioned.is_some())
            .finish()
    }
}
