//! Staging table schema.
//!
//! Column layout of the append target. The table is provisioned elsewhere;
//! this module only describes it and checks rows against it before append.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldType {
    String,
    Float,
    Timestamp,
    Record,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldMode {
    Required,
    Nullable,
    Repeated,
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldSchema {
    pub name: &'static str,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub mode: FieldMode,
    #[serde(skip_serializing_if = "is_leaf")]
    pub fields: &'static [FieldSchema],
}

fn is_leaf(fields: &&'static [FieldSchema]) -> bool {
    fields.is_empty()
}

const AMOUNT_FIELDS: &[FieldSchema] = &[
    FieldSchema { name: "importe", field_type: FieldType::Float, mode: FieldMode::Nullable, fields: &[] },
    FieldSchema { name: "timestamp", field_type: FieldType::Timestamp, mode: FieldMode::Nullable, fields: &[] },
];

const STAGE_FIELDS: &[FieldSchema] = &[
    FieldSchema { name: "estado", field_type: FieldType::String, mode: FieldMode::Nullable, fields: &[] },
    FieldSchema { name: "timestamp", field_type: FieldType::Timestamp, mode: FieldMode::Nullable, fields: &[] },
];

/// Columns of the staging table.
pub const STAGING_TABLE: &[FieldSchema] = &[
    FieldSchema { name: "Ref", field_type: FieldType::String, mode: FieldMode::Required, fields: &[] },
    FieldSchema { name: "Cuantia", field_type: FieldType::Record, mode: FieldMode::Repeated, fields: AMOUNT_FIELDS },
    FieldSchema { name: "Estado", field_type: FieldType::Record, mode: FieldMode::Repeated, fields: STAGE_FIELDS },
    FieldSchema {
        name: "ingestion_timestamp",
        field_type: FieldType::Timestamp,
        mode: FieldMode::Required,
        fields: &[],
    },
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("row is not an object")]
    NotAnObject,

    #[error("required field `{0}` is missing or null")]
    MissingRequired(String),

    #[error("repeated field `{0}` is not an array")]
    NotRepeated(String),

    #[error("field `{field}` is not of type {expected:?}")]
    WrongType { field: String, expected: FieldType },

    #[error("unknown field `{0}`")]
    UnknownField(String),
}

/// Checks a serialized row against [`STAGING_TABLE`].
pub fn validate_row(row: &Value) -> Result<(), SchemaError> {
    validate_record(row, STAGING_TABLE, "")
}

fn validate_record(value: &Value, fields: &[FieldSchema], path: &str) -> Result<(), SchemaError> {
    let object = value.as_object().ok_or(SchemaError::NotAnObject)?;

    if let Some(unknown) = object.keys().find(|key| !fields.iter().any(|field| field.name == key.as_str())) {
        return Err(SchemaError::UnknownField(qualified(path, unknown)));
    }

    for field in fields {
        let name = qualified(path, field.name);
        match (field.mode, object.get(field.name)) {
            (FieldMode::Required, None | Some(Value::Null)) => return Err(SchemaError::MissingRequired(name)),
            (FieldMode::Nullable, None | Some(Value::Null)) | (FieldMode::Repeated, None) => {}
            (FieldMode::Repeated, Some(Value::Array(items))) => {
                for item in items {
                    check_type(field, item, &name)?;
                }
            }
            (FieldMode::Repeated, Some(_)) => return Err(SchemaError::NotRepeated(name)),
            (_, Some(item)) => check_type(field, item, &name)?,
        }
    }
    Ok(())
}

fn check_type(field: &FieldSchema, value: &Value, name: &str) -> Result<(), SchemaError> {
    let ok = match field.field_type {
        FieldType::String | FieldType::Timestamp => value.is_string(),
        FieldType::Float => value.is_number(),
        FieldType::Record => return validate_record(value, field.fields, name),
    };
    if ok {
        Ok(())
    } else {
        Err(SchemaError::WrongType {
            field: name.to_string(),
            expected: field.field_type,
        })
    }
}

fn qualified(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", path, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalized_row_is_valid() {
        let row = json!({
            "Ref": "abc",
            "Cuantia": [{"importe": 10.0, "timestamp": "2024-01-01T00:00:00Z"}],
            "Estado": [],
            "ingestion_timestamp": "2024-01-02T00:00:00Z"
        });
        assert_eq!(validate_row(&row), Ok(()));
    }

    #[test]
    fn test_required_fields() {
        let row = json!({"Cuantia": [], "Estado": [], "ingestion_timestamp": "2024-01-02T00:00:00Z"});
        assert_eq!(validate_row(&row), Err(SchemaError::MissingRequired("Ref".into())));

        let row = json!({"Ref": "abc"});
        assert_eq!(
            validate_row(&row),
            Err(SchemaError::MissingRequired("ingestion_timestamp".into()))
        );
    }

    #[test]
    fn test_nested_types() {
        let row = json!({
            "Ref": "abc",
            "Cuantia": [{"importe": "10", "timestamp": null}],
            "ingestion_timestamp": "2024-01-02T00:00:00Z"
        });
        assert_eq!(
            validate_row(&row),
            Err(SchemaError::WrongType { field: "Cuantia.importe".into(), expected: FieldType::Float })
        );

        let row = json!({"Ref": "abc", "Estado": {"estado": "Vista"}, "ingestion_timestamp": "x"});
        assert_eq!(validate_row(&row), Err(SchemaError::NotRepeated("Estado".into())));
    }

    #[test]
    fn test_unknown_columns_rejected() {
        let row = json!({"Ref": "abc", "ingestion_timestamp": "x", "Procedimiento": "Verbal"});
        assert_eq!(validate_row(&row), Err(SchemaError::UnknownField("Procedimiento".into())));
    }

    #[test]
    fn test_schema_serializes_like_table_definition() {
        let json = serde_json::to_value(STAGING_TABLE).unwrap();
        assert_eq!(json[1]["name"], "Cuantia");
        assert_eq!(json[1]["type"], "RECORD");
        assert_eq!(json[1]["mode"], "REPEATED");
        assert_eq!(json[1]["fields"][0]["type"], "FLOAT");
        assert!(json[0].get("fields").is_none());
    }
}
