//! Register catalog
//!
//! The catalog is an explicit value describing every entity class, its
//! views, and the registers that list its members. It is built once at
//! startup (from the built-in gazetteer definition or a JSON file),
//! validated, and then passed by reference to every component.

pub mod gazetteer;

use crate::error::{CatalogError, ConfigError};
use crate::negotiate::{ViewSet, ALTERNATES_VIEW};
use crate::source::is_sql_identifier;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Default listing page size for registers
pub const DEFAULT_PAGE_SIZE: usize = 1000;

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

/// A class of entity published by the service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityClass {
    /// Short name, used for shard file names (`address`)
    pub name: String,

    /// Ontology class URI
    pub class_uri: String,

    pub label: String,

    /// Table holding the records
    pub table: String,

    /// Primary key column
    pub id_column: String,

    /// Column used as the listing label (identifier when absent)
    #[serde(default)]
    pub label_column: Option<String>,

    /// Views offered for members of this class
    pub views: ViewSet,

    /// Records per shard file before rotating
    pub shard_threshold: usize,
}

/// A harvestable collection of identifiers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterDescriptor {
    /// Short name, selectable on the command line
    pub name: String,

    pub label: String,

    /// Register URI; member URIs are `base_uri + identifier`
    pub base_uri: String,

    /// Class URI of the register's members
    pub entity_class_uri: String,

    /// Listing page size used by the harvester
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Advisory member count
    #[serde(default)]
    pub total_count: Option<u64>,
}

impl RegisterDescriptor {
    /// URI of a member of this register
    pub fn instance_uri(&self, id: &str) -> String {
        if self.base_uri.ends_with('/') || self.base_uri.ends_with('#') {
            format!("{}{}", self.base_uri, id)
        } else {
            format!("{}/{}", self.base_uri, id)
        }
    }

    /// Copy with an advisory member count
    pub fn with_total_count(mut self, count: u64) -> Self {
        self.total_count = Some(count);
        self
    }
}

/// Every class and register the service exposes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterCatalog {
    /// URI of the register of registers
    pub uri: String,

    pub label: String,

    /// Views shared by all registers (listing first)
    pub register_views: ViewSet,

    pub classes: Vec<EntityClass>,

    pub registers: Vec<RegisterDescriptor>,
}

impl RegisterCatalog {
    /// Load and validate a catalog from a JSON file
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidCatalog {
            path: path.to_path_buf(),
            reason,
        };
        let bytes = std::fs::read(path).map_err(|e| invalid(e.to_string()))?;
        let catalog: Self = serde_json::from_slice(&bytes).map_err(|e| invalid(e.to_string()))?;
        catalog.validate().map_err(|e| invalid(e.to_string()))?;
        Ok(catalog)
    }

    /// Look up a class by its URI
    pub fn class(&self, class_uri: &str) -> Option<&EntityClass> {
        self.classes.iter().find(|c| c.class_uri == class_uri)
    }

    /// Class of a register's members
    pub fn class_for(&self, register: &RegisterDescriptor) -> Option<&EntityClass> {
        self.class(&register.entity_class_uri)
    }

    /// Look up a register by name
    pub fn register(&self, name: &str) -> Option<&RegisterDescriptor> {
        self.registers.iter().find(|r| r.name == name)
    }

    /// Register names, comma separated
    pub fn register_names(&self) -> String {
        self.registers
            .iter()
            .map(|r| r.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Check internal consistency
    pub fn validate(&self) -> Result<(), CatalogError> {
        let mut seen = HashSet::new();
        for class in &self.classes {
            if !seen.insert(class.class_uri.as_str()) || !seen.insert(class.name.as_str()) {
                return Err(CatalogError::DuplicateClass(class.name.clone()));
            }
            validate_class(class)?;
        }
        validate_views(&self.label, &self.register_views)?;

        let mut names = HashSet::new();
        for register in &self.registers {
            if !names.insert(register.name.as_str()) {
                return Err(CatalogError::DuplicateRegister(register.name.clone()));
            }
            if self.class_for(register).is_none() {
                return Err(CatalogError::UnknownClass {
                    register: register.name.clone(),
                    class: register.entity_class_uri.clone(),
                });
            }
        }
        Ok(())
    }
}

fn validate_class(class: &EntityClass) -> Result<(), CatalogError> {
    let columns = [Some(&class.table), Some(&class.id_column), class.label_column.as_ref()];
    for name in columns.into_iter().flatten() {
        if !is_sql_identifier(name) {
            return Err(CatalogError::InvalidIdentifier {
                class: class.name.clone(),
                name: name.clone(),
            });
        }
    }
    if class.shard_threshold == 0 {
        return Err(CatalogError::ZeroThreshold(class.name.clone()));
    }
    validate_views(&class.name, &class.views)
}

fn validate_views(owner: &str, views: &ViewSet) -> Result<(), CatalogError> {
    if !views.views.iter().any(|v| v.token == views.default_view) {
        return Err(CatalogError::MissingDefaultView {
            class: owner.to_string(),
            view: views.default_view.clone(),
        });
    }
    for view in &views.views {
        if view.token == ALTERNATES_VIEW {
            return Err(CatalogError::ReservedView {
                class: owner.to_string(),
                view: view.token.clone(),
            });
        }
        if view.supported(&view.default_format).is_none() {
            return Err(CatalogError::InvalidDefaultFormat {
                class: owner.to_string(),
                view: view.token.clone(),
                format: view.default_format.clone(),
            });
        }
    }
    Ok(())
}
