use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Entity families kept in sync with the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Category,
    Product,
}

impl EntityType {
    pub const ALL: [EntityType; 2] = [EntityType::Category, EntityType::Product];

    /// Tag stored in the `entity_type` columns.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Category => "category",
            EntityType::Product => "product",
        }
    }

    /// Collection name used in the server's REST paths.
    pub fn collection(&self) -> &'static str {
        match self {
            EntityType::Category => "categories",
            EntityType::Product => "products",
        }
    }

    /// Whether records of this type carry binary attachments.
    pub fn has_assets(&self) -> bool {
        matches!(self, EntityType::Product)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "category" | "categories" => Ok(EntityType::Category),
            "product" | "products" => Ok(EntityType::Product),
            _ => Err(format!(
                "Invalid entity type '{}'. Valid options: category, product",
                s
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_type_display() {
        assert_eq!(format!("{}", EntityType::Category), "category");
        assert_eq!(format!("{}", EntityType::Product), "product");
    }

    #[test]
    fn test_entity_type_from_str() {
        assert_eq!(
            EntityType::from_str("category").unwrap(),
            EntityType::Category
        );
        assert_eq!(
            EntityType::from_str("Products").unwrap(),
            EntityType::Product
        );
        assert!(EntityType::from_str("supplier").is_err());
        assert!(EntityType::from_str("").is_err());
    }

    #[test]
    fn test_collection_names() {
        assert_eq!(EntityType::Category.collection(), "categories");
        assert_eq!(EntityType::Product.collection(), "products");
    }

    #[test]
    fn test_only_products_carry_assets() {
        assert!(!EntityType::Category.has_assets());
        assert!(EntityType::Product.has_assets());
    }
}
