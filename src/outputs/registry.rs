/// Declared output properties of a task
///
/// Declaration order is kept so diagnostics and archives list properties the
/// way the task author wrote them.
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

use crate::error::{OutputsError, Result};

/// A named group of output locations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyOutput {
    pub name: String,
    pub locations: BTreeSet<PathBuf>,
    pub cacheable: bool,
}

#[derive(Debug, Clone, Default)]
pub struct OutputRegistry {
    properties: Vec<PropertyOutput>,
    index: HashMap<String, usize>,
}

impl OutputRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a new output property.
    ///
    /// Fails with `DuplicateProperty` if `name` is already declared; the
    /// registry is left unchanged in that case.
    pub fn declare<I, P>(&mut self, name: &str, locations: I, cacheable: bool) -> Result<()>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        if self.index.contains_key(name) {
            return Err(OutputsError::DuplicateProperty {
                name: name.to_string(),
            });
        }

        self.index.insert(name.to_string(), self.properties.len());
        self.properties.push(PropertyOutput {
            name: name.to_string(),
            locations: locations.into_iter().map(Into::into).collect(),
            cacheable,
        });
        Ok(())
    }

    /// All properties in declaration order.
    pub fn all(&self) -> &[PropertyOutput] {
        &self.properties
    }

    pub fn get(&self, name: &str) -> Result<&PropertyOutput> {
        self.index
            .get(name)
            .map(|&i| &self.properties[i])
            .ok_or_else(|| OutputsError::PropertyNotFound {
                name: name.to_string(),
            })
    }

    pub fn declares_output(&self) -> bool {
        !self.properties.is_empty()
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}
