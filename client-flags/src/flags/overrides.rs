use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::registry::Flag;
use crate::config::BuildMode;
use crate::metrics::consts::DEV_OVERRIDE_REJECTED_COUNTER;
use crate::metrics::inc;

/// Developer-forced flag values. In-memory only, gone on restart.
///
/// Outside development builds every mutation is a logged no-op and lookups always miss, so a
/// stray call in production cannot change behaviour.
#[derive(Debug)]
pub struct OverrideLayer {
    mode: BuildMode,
    overrides: RwLock<HashMap<Flag, bool>>,
}

impl OverrideLayer {
    pub fn new(mode: BuildMode) -> Self {
        Self {
            mode,
            overrides: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, flag: Flag) -> Option<bool> {
        if !self.mode.is_development() {
            return None;
        }
        self.read().get(&flag).copied()
    }

    /// `None` clears the override for `flag`.
    pub fn set_override(&self, flag: Flag, value: Option<bool>) {
        if !self.allowed("set_override") {
            return;
        }
        match value {
            Some(value) => {
                tracing::debug!(flag = flag.name(), value, "dev override set");
                self.write().insert(flag, value);
            }
            None => self.clear_override(flag),
        }
    }

    pub fn clear_override(&self, flag: Flag) {
        if !self.allowed("clear_override") {
            return;
        }
        self.write().remove(&flag);
    }

    pub fn clear_all_overrides(&self) {
        if !self.allowed("clear_all_overrides") {
            return;
        }
        self.write().clear();
    }

    pub fn active(&self) -> HashMap<Flag, bool> {
        if !self.mode.is_development() {
            return HashMap::new();
        }
        self.read().clone()
    }

    fn allowed(&self, operation: &'static str) -> bool {
        if self.mode.is_development() {
            return true;
        }
        tracing::warn!(operation, "dev overrides are disabled outside development builds");
        inc(
            DEV_OVERRIDE_REJECTED_COUNTER,
            &[("operation".to_string(), operation.to_string())],
            1,
        );
        false
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<Flag, bool>> {
        match self.overrides.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Flag, bool>> {
        match self.overrides.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
