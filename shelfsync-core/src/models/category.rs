use serde::{Deserialize, Serialize};
use std::fmt;

use super::entity::Entity;
use super::entity_type::EntityType;

/// A product category.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Category {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl Category {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl Entity for Category {
    const ENTITY_TYPE: EntityType = EntityType::Category;

    fn display_name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.name)?;
        writeln!(f, "{}", "=".repeat(self.name.len()))?;
        if let Some(description) = &self.description {
            writeln!(f, "{}", description)?;
        }
        Ok(())
    }
}
