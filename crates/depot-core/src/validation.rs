//! # Validation Module
//!
//! Input checks applied before a mutation reaches the record store.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Typed entities (Entity::validate)                            │
//! │  └── Business rules: name required, stock >= 0, ...                    │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE                                                   │
//! │  ├── Table name shape                                                   │
//! │  ├── Record id range                                                    │
//! │  └── Payload must be a JSON object                                      │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── PRIMARY KEY (table_name, id)                                      │
//! │  └── Task status decoded on read (bad rows are dead-lettered)          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use depot_core::validation::{validate_table_name, into_fields};
//! use serde_json::json;
//!
//! validate_table_name("inventory").unwrap();
//! let fields = into_fields(json!({ "name": "Brake Pad", "stock": 5 })).unwrap();
//! assert_eq!(fields.len(), 2);
//! ```

use crate::error::ValidationError;
use crate::types::Fields;
use crate::MAX_TABLE_NAME_LEN;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Table / Id Validators
// =============================================================================

/// Validates a table name.
///
/// ## Rules
/// - Must not be empty
/// - At most [`MAX_TABLE_NAME_LEN`] characters
/// - Lowercase ASCII letters, digits and `_`, starting with a letter
///
/// ## Example
/// ```rust
/// use depot_core::validation::validate_table_name;
///
/// assert!(validate_table_name("sale_items").is_ok());
/// assert!(validate_table_name("Sales").is_err());
/// assert!(validate_table_name("9lives").is_err());
/// ```
pub fn validate_table_name(table: &str) -> ValidationResult<()> {
    if table.is_empty() {
        return Err(ValidationError::Required {
            field: "table".to_string(),
        });
    }

    if table.len() > MAX_TABLE_NAME_LEN {
        return Err(ValidationError::TooLong {
            field: "table".to_string(),
            max: MAX_TABLE_NAME_LEN,
        });
    }

    let mut chars = table.chars();
    let starts_with_letter = chars.next().is_some_and(|c| c.is_ascii_lowercase());
    if !starts_with_letter {
        return Err(ValidationError::InvalidFormat {
            field: "table".to_string(),
            reason: "must start with a lowercase letter".to_string(),
        });
    }

    if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_') {
        return Err(ValidationError::InvalidFormat {
            field: "table".to_string(),
            reason: "must contain only lowercase letters, digits, and underscores".to_string(),
        });
    }

    Ok(())
}

/// Validates a record id passed in by a caller.
///
/// Ids start at 1; anything lower can never exist.
pub fn validate_record_id(id: i64) -> ValidationResult<()> {
    if id < 1 {
        return Err(ValidationError::OutOfRange {
            field: "id".to_string(),
            min: 1,
            max: i64::MAX,
        });
    }
    Ok(())
}

// =============================================================================
// Payload Validators
// =============================================================================

/// Converts an arbitrary JSON value into a record field map.
///
/// Records are always JSON objects; scalars and arrays are rejected.
pub fn into_fields(value: serde_json::Value) -> ValidationResult<Fields> {
    match value {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(ValidationError::InvalidFormat {
            field: "fields".to_string(),
            reason: format!("must be a JSON object, got {}", json_kind(&other)),
        }),
    }
}

/// Checks that no field key is blank.
pub fn validate_fields(fields: &Fields) -> ValidationResult<()> {
    if fields.keys().any(|k| k.trim().is_empty()) {
        return Err(ValidationError::InvalidFormat {
            field: "fields".to_string(),
            reason: "field names must not be blank".to_string(),
        });
    }
    Ok(())
}

/// Validates an entity's display name (inventory item, customer, supplier).
pub fn validate_name(name: &str) -> ValidationResult<()> {
    let name = name.trim();

    if name.is_empty() {
        return Err(ValidationError::Required {
            field: "name".to_string(),
        });
    }

    if name.len() > 200 {
        return Err(ValidationError::TooLong {
            field: "name".to_string(),
            max: 200,
        });
    }

    Ok(())
}

/// Validates a non-negative quantity such as stock on hand.
pub fn validate_non_negative(field: &str, value: i64) -> ValidationResult<()> {
    if value < 0 {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            min: 0,
            max: i64::MAX,
        });
    }
    Ok(())
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate_table_name() {
        assert!(validate_table_name("inventory").is_ok());
        assert!(validate_table_name("sale_items2").is_ok());

        assert!(matches!(
            validate_table_name(""),
            Err(ValidationError::Required { .. })
        ));
        assert!(matches!(
            validate_table_name(&"a".repeat(65)),
            Err(ValidationError::TooLong { max: 64, .. })
        ));
        assert!(validate_table_name(&"a".repeat(64)).is_ok());
        assert!(validate_table_name("_hidden").is_err());
        assert!(validate_table_name("Inventory").is_err());
        assert!(validate_table_name("inv-items").is_err());
        assert!(validate_table_name("inv items").is_err());
    }

    #[test]
    fn test_validate_record_id() {
        assert!(validate_record_id(1).is_ok());
        assert!(validate_record_id(0).is_err());
        assert!(validate_record_id(-3).is_err());
    }

    #[test]
    fn test_into_fields_requires_object() {
        assert!(into_fields(json!({})).is_ok());

        let err = into_fields(json!([1, 2])).unwrap_err();
        assert_eq!(
            err.to_string(),
            "fields has invalid format: must be a JSON object, got an array"
        );
        assert!(into_fields(json!(null)).is_err());
    }

    #[test]
    fn test_validate_fields_rejects_blank_keys() {
        let fields = into_fields(json!({ " ": 1 })).unwrap();
        assert!(validate_fields(&fields).is_err());

        let fields = into_fields(json!({ "stock": 1 })).unwrap();
        assert!(validate_fields(&fields).is_ok());
    }

    #[test]
    fn test_validate_name_and_quantity() {
        assert!(validate_name("Brake Pad").is_ok());
        assert!(validate_name("   ").is_err());
        assert!(validate_non_negative("stock", 0).is_ok());
        assert!(validate_non_negative("stock", -1).is_err());
    }
}
