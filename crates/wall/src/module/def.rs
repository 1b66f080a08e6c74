use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::net::ModuleSpec;

pub const EMPTY_MODULE: &str = "_empty";

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum LibraryError {
    #[error("module {0:?} defined twice")]
    Duplicate(String),
    #[error("unknown module {0:?}")]
    Unknown(String),
}

/// A named, configured module. `server` and `client` pick the implementation
/// of each half; either may be absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleDef {
    pub name: String,
    #[serde(default)]
    pub server: Option<String>,
    #[serde(default)]
    pub client: Option<String>,
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub credit: Value,
}

impl ModuleDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            server: None,
            client: None,
            config: Value::Null,
            credit: Value::Null,
        }
    }

    /// The module shown while fading to black: no halves at all.
    pub fn empty() -> Self {
        Self::new(EMPTY_MODULE)
    }

    pub fn is_empty(&self) -> bool {
        self.name == EMPTY_MODULE
    }

    pub fn with_server(mut self, kind: impl Into<String>) -> Self {
        self.server = Some(kind.into());
        self
    }

    pub fn with_client(mut self, kind: impl Into<String>) -> Self {
        self.client = Some(kind.into());
        self
    }

    /// Replaces the config when an override is given.
    pub fn with_config(mut self, config: Option<Value>) -> Self {
        if let Some(config) = config {
            self.config = config;
        }
        self
    }

    pub fn spec(&self) -> ModuleSpec {
        ModuleSpec {
            name: self.name.clone(),
            client: self.client.clone(),
            config: self.config.clone(),
            credit: self.credit.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ModuleLibrary {
    defs: BTreeMap<String, ModuleDef>,
}

impl ModuleLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_defs(defs: impl IntoIterator<Item = ModuleDef>) -> Result<Self, LibraryError> {
        let mut library = Self::new();
        for def in defs {
            if library.defs.contains_key(&def.name) {
                return Err(LibraryError::Duplicate(def.name));
            }
            library.insert(def);
        }
        Ok(library)
    }

    pub fn insert(&mut self, def: ModuleDef) -> Option<ModuleDef> {
        self.defs.insert(def.name.clone(), def)
    }

    pub fn get(&self, name: &str) -> Result<&ModuleDef, LibraryError> {
        self.defs
            .get(name)
            .ok_or_else(|| LibraryError::Unknown(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.defs.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}
