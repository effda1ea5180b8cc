use serde::{Deserialize, Serialize};
use std::fmt;

use super::entity::Entity;
use super::entity_type::EntityType;

/// A stocked product. Images are tracked separately as assets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub quantity: i64,
    /// Server id of the owning category
    #[serde(default)]
    pub category_id: Option<String>,
}

impl Product {
    pub fn new(name: impl Into<String>, price: f64) -> Self {
        Self {
            name: name.into(),
            description: None,
            sku: None,
            price,
            quantity: 0,
            category_id: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_sku(mut self, sku: impl Into<String>) -> Self {
        self.sku = Some(sku.into());
        self
    }

    pub fn with_quantity(mut self, quantity: i64) -> Self {
        self.quantity = quantity;
        self
    }

    pub fn with_category(mut self, category_id: impl Into<String>) -> Self {
        self.category_id = Some(category_id.into());
        self
    }
}

impl Entity for Product {
    const ENTITY_TYPE: EntityType = EntityType::Product;

    fn display_name(&self) -> &str {
        &self.name
    }

    // JSON has no NaN or infinity; serde_json writes them as null
    fn validate(&self) -> Result<(), String> {
        if !self.price.is_finite() {
            return Err(format!("price must be a finite number, got {}", self.price));
        }
        Ok(())
    }
}

impl fmt::Display for Product {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.name)?;
        writeln!(f, "{}", "=".repeat(self.name.len()))?;
        writeln!(f, "Price: {:.2}", self.price)?;
        writeln!(f, "Quantity: {}", self.quantity)?;
        if let Some(sku) = &self.sku {
            writeln!(f, "SKU: {}", sku)?;
        }
        if let Some(category_id) = &self.category_id {
            writeln!(f, "Category: {}", category_id)?;
        }
        if let Some(description) = &self.description {
            writeln!(f, "\n{}", description)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_product_builder() {
        let product = Product::new("Hammer", 12.5)
            .with_sku("HM-01")
            .with_quantity(4)
            .with_category("srv-cat-1");

        assert_eq!(product.name, "Hammer");
        assert_eq!(product.sku.as_deref(), Some("HM-01"));
        assert_eq!(product.quantity, 4);
        assert_eq!(product.category_id.as_deref(), Some("srv-cat-1"));
    }

    #[test]
    fn test_product_missing_optional_fields_deserialize() {
        let product: Product = serde_json::from_str(r#"{"name":"Saw"}"#).unwrap();
        assert_eq!(product.name, "Saw");
        assert_eq!(product.price, 0.0);
        assert!(product.description.is_none());
    }

    #[test]
    fn test_product_validate_rejects_non_finite_price() {
        assert!(Product::new("Hammer", 12.5).validate().is_ok());
        assert!(Product::new("Ghost", f64::NAN).validate().is_err());
        assert!(Product::new("Ghost", f64::INFINITY).validate().is_err());
    }

    #[test]
    fn test_product_display() {
        let output = format!("{}", Product::new("Drill", 89.0).with_quantity(2));
        assert!(output.contains("Drill"));
        assert!(output.contains("Price: 89.00"));
        assert!(output.contains("Quantity: 2"));
    }
}
