//! Field coercion
//!
//! Converts one raw text cell into a [`Scalar`] according to its [`FieldSpec`].
//! Failures on optional fields degrade to `Null`; failures on required fields
//! are errors.

use crate::error::TransformError;
use crate::ingest::models::Scalar;
use crate::ingest::registry::{FieldSpec, FieldType};

/// Coerce a raw cell for the given field
///
/// `raw` is `None` when the column is missing from the source. Empty and
/// whitespace-only cells are treated the same as a missing column. `row` is the
/// 1-based data row, used only for error reporting.
pub fn coerce(spec: &FieldSpec, raw: Option<&str>, row: usize) -> Result<Scalar, TransformError> {
    let value = match raw.map(str::trim) {
        Some(v) if !v.is_empty() => v,
        _ if spec.required => {
            return Err(TransformError::MissingRequired {
                field: spec.name.clone(),
                row,
            })
        }
        _ => return Ok(Scalar::Null),
    };

    let coerced = match spec.field_type {
        FieldType::String => Some(Scalar::Text(value.to_string())),
        FieldType::Number => parse_number(value),
        FieldType::Enum => spec
            .values
            .as_deref()
            .unwrap_or_default()
            .iter()
            .find(|member| member.as_str() == value)
            .map(|member| Scalar::Text(member.clone())),
    };

    match coerced {
        Some(scalar) => Ok(scalar),
        None if spec.required => Err(TransformError::InvalidRequired {
            field: spec.name.clone(),
            row,
            value: value.to_string(),
        }),
        None => Ok(Scalar::Null),
    }
}

/// Integers first, then finite floats; `NaN` and infinities are not numbers
fn parse_number(value: &str) -> Option<Scalar> {
    if let Ok(i) = value.parse::<i64>() {
        return Some(Scalar::Integer(i));
    }
    value
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .map(Scalar::Float)
}
