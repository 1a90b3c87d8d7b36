//! # Typed Entities
//!
//! The record store is schema-less, but the POS application works with a
//! handful of well-known shapes. An [`Entity`] binds a Rust struct to a table
//! so callers can read and write it without picking values out of JSON maps.
//!
//! ```text
//!   InventoryItem ──to_fields()──► Fields ──► Record { table: "inventory" }
//!   InventoryItem ◄──from_record()── Record
//! ```

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::tables;
use crate::types::{Fields, Record};
use crate::validation::{validate_name, validate_non_negative, ValidationResult};

// =============================================================================
// Entity Trait
// =============================================================================

/// A struct stored as a record in a fixed table.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Table the entity lives in.
    const TABLE: &'static str;

    /// Type name used in error messages.
    const NAME: &'static str;

    /// Business rules checked before every write.
    fn validate(&self) -> ValidationResult<()> {
        Ok(())
    }

    /// Serializes the entity into a record field map.
    fn to_fields(&self) -> CoreResult<Fields> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => Ok(map),
            Ok(_) => Err(CoreError::InvalidPayload(format!(
                "{} did not serialize to an object",
                Self::NAME
            ))),
            Err(e) => Err(CoreError::InvalidPayload(e.to_string())),
        }
    }

    /// Decodes a stored record back into the entity.
    fn from_record(record: &Record) -> CoreResult<TypedRecord<Self>>
    where
        Self: Sized,
    {
        let entity = serde_json::from_value(serde_json::Value::Object(record.fields.clone()))
            .map_err(|e| CoreError::EntityDecode {
                table: record.table.clone(),
                id: record.id,
                entity: Self::NAME,
                reason: e.to_string(),
            })?;

        Ok(TypedRecord {
            id: record.id,
            entity,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }
}

/// An entity together with its store-assigned metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypedRecord<T> {
    pub id: i64,
    #[serde(flatten)]
    pub entity: T,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Inventory
// =============================================================================

/// A stocked product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct InventoryItem {
    pub name: String,

    /// Units on hand.
    pub stock: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,

    /// Unit price in the smallest currency unit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_cents: Option<i64>,
}

impl Entity for InventoryItem {
    const TABLE: &'static str = tables::INVENTORY;
    const NAME: &'static str = "InventoryItem";

    fn validate(&self) -> ValidationResult<()> {
        validate_name(&self.name)?;
        validate_non_negative("stock", self.stock)?;
        if let Some(price) = self.price_cents {
            validate_non_negative("priceCents", price)?;
        }
        Ok(())
    }
}

// =============================================================================
// Sales
// =============================================================================

/// A completed sale as the POS records it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct SaleRecord {
    /// Id of the sold inventory record.
    pub item_id: i64,
    pub quantity: i64,
    pub total_cents: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<i64>,
}

impl Entity for SaleRecord {
    const TABLE: &'static str = tables::SALES;
    const NAME: &'static str = "SaleRecord";

    fn validate(&self) -> ValidationResult<()> {
        validate_non_negative("quantity", self.quantity)?;
        validate_non_negative("totalCents", self.total_cents)
    }
}

// =============================================================================
// Customers / Suppliers
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Entity for Customer {
    const TABLE: &'static str = tables::CUSTOMERS;
    const NAME: &'static str = "Customer";

    fn validate(&self) -> ValidationResult<()> {
        validate_name(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Supplier {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
}

impl Entity for Supplier {
    const TABLE: &'static str = tables::SUPPLIERS;
    const NAME: &'static str = "Supplier";

    fn validate(&self) -> ValidationResult<()> {
        validate_name(&self.name)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(fields: serde_json::Value) -> Record {
        let now = Utc::now();
        Record {
            table: "inventory".to_string(),
            id: 3,
            fields: crate::validation::into_fields(fields).unwrap(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_inventory_item_to_fields() {
        let item = InventoryItem {
            name: "Brake Pad".to_string(),
            stock: 5,
            sku: None,
            price_cents: Some(1299),
        };
        let fields = item.to_fields().unwrap();
        assert_eq!(fields.get("name"), Some(&json!("Brake Pad")));
        assert_eq!(fields.get("priceCents"), Some(&json!(1299)));
        assert!(!fields.contains_key("sku"));
    }

    #[test]
    fn test_from_record() {
        let typed =
            InventoryItem::from_record(&record(json!({ "name": "Oil Filter", "stock": 12 })))
                .unwrap();
        assert_eq!(typed.id, 3);
        assert_eq!(typed.entity.name, "Oil Filter");
        assert_eq!(typed.entity.stock, 12);
    }

    #[test]
    fn test_from_record_reports_shape_mismatch() {
        let err = InventoryItem::from_record(&record(json!({ "stock": "many" }))).unwrap_err();
        assert!(matches!(
            err,
            CoreError::EntityDecode { id: 3, entity: "InventoryItem", .. }
        ));
    }

    #[test]
    fn test_entity_validation() {
        let item = InventoryItem {
            name: "Brake Pad".to_string(),
            stock: -1,
            sku: None,
            price_cents: None,
        };
        assert!(item.validate().is_err());

        let customer = Customer {
            name: String::new(),
            phone: None,
            email: None,
        };
        assert!(customer.validate().is_err());
    }

    #[test]
    fn test_tables() {
        assert_eq!(InventoryItem::TABLE, "inventory");
        assert_eq!(SaleRecord::TABLE, "sales");
        assert_eq!(Customer::TABLE, "customers");
        assert_eq!(Supplier::TABLE, "suppliers");
    }
}
