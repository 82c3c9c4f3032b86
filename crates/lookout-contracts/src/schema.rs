use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::image::CanonicalImage;

/// Request/response contract for one analysis operation.
///
/// Outputs coming back from the model are untyped JSON; [`validate`] is the only
/// way to turn them into `Self::Output`.
pub trait AnalysisSchema {
    /// Stable operation name, used in error prefixes and event payloads.
    const OPERATION: &'static str;
    /// The single required field of the output object.
    const OUTPUT_FIELD: &'static str;
    /// Human wording for the output list, used by placeholder results.
    const SUBJECT: &'static str;
    /// Wire names of the image fields of `Self::Input`, in presentation order.
    const INPUT_FIELDS: &'static [&'static str];

    type Input: Serialize;
    type Output: Serialize + Clone + PartialEq;

    fn output_from_items(items: Vec<String>) -> Self::Output;
    fn output_items(output: &Self::Output) -> &[String];

    /// JSON schema handed to the capability as its structured-output contract.
    fn output_json_schema() -> Value {
        let mut properties = Map::new();
        properties.insert(
            Self::OUTPUT_FIELD.to_string(),
            json!({
                "type": "ARRAY",
                "items": { "type": "STRING" },
            }),
        );
        json!({
            "type": "OBJECT",
            "properties": properties,
            "required": [Self::OUTPUT_FIELD],
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SingleImageInput {
    pub image: CanonicalImage,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DifferentialInput {
    pub reference_image: CanonicalImage,
    pub comparison_image: CanonicalImage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectsOutput {
    pub objects: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingObjectsOutput {
    pub missing_objects: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SingleImageSchema;

#[derive(Debug, Clone, Copy, Default)]
pub struct DifferentialSchema;

impl AnalysisSchema for SingleImageSchema {
    const OPERATION: &'static str = "analyze_single_image";
    const OUTPUT_FIELD: &'static str = "objects";
    const SUBJECT: &'static str = "objects";
    const INPUT_FIELDS: &'static [&'static str] = &["image"];

    type Input = SingleImageInput;
    type Output = ObjectsOutput;

    fn output_from_items(items: Vec<String>) -> Self::Output {
        ObjectsOutput { objects: items }
    }

    fn output_items(output: &Self::Output) -> &[String] {
        &output.objects
    }
}

impl AnalysisSchema for DifferentialSchema {
    const OPERATION: &'static str = "compare_images";
    const OUTPUT_FIELD: &'static str = "missingObjects";
    const SUBJECT: &'static str = "missing objects";
    const INPUT_FIELDS: &'static [&'static str] = &["referenceImage", "comparisonImage"];

    type Input = DifferentialInput;
    type Output = MissingObjectsOutput;

    fn output_from_items(items: Vec<String>) -> Self::Output {
        MissingObjectsOutput {
            missing_objects: items,
        }
    }

    fn output_items(output: &Self::Output) -> &[String] {
        &output.missing_objects
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{operation} output violates its schema: {reason}")]
pub struct SchemaViolation {
    pub operation: &'static str,
    pub reason: ViolationReason,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ViolationReason {
    #[error("expected a JSON object, got {0}")]
    NotAnObject(&'static str),
    #[error("required field '{0}' is missing")]
    MissingField(&'static str),
    #[error("field '{field}' must be a sequence, got {found}")]
    NotASequence {
        field: &'static str,
        found: &'static str,
    },
    #[error("field '{field}' element {index} must be a string, got {found}")]
    NonStringElement {
        field: &'static str,
        index: usize,
        found: &'static str,
    },
}

/// Structural check of a model output against `S`.
///
/// Only shape is checked: the output must be an object whose required field is
/// a sequence of strings. Unknown extra fields are ignored. Element content is
/// passed through untouched, duplicates included.
pub fn validate<S: AnalysisSchema>(candidate: &Value) -> Result<S::Output, SchemaViolation> {
    let violation = |reason| SchemaViolation {
        operation: S::OPERATION,
        reason,
    };
    let object = candidate
        .as_object()
        .ok_or_else(|| violation(ViolationReason::NotAnObject(json_kind(candidate))))?;
    let field = object
        .get(S::OUTPUT_FIELD)
        .ok_or_else(|| violation(ViolationReason::MissingField(S::OUTPUT_FIELD)))?;
    let rows = field.as_array().ok_or_else(|| {
        violation(ViolationReason::NotASequence {
            field: S::OUTPUT_FIELD,
            found: json_kind(field),
        })
    })?;

    let mut items = Vec::with_capacity(rows.len());
    for (index, row) in rows.iter().enumerate() {
        let Some(text) = row.as_str() else {
            return Err(violation(ViolationReason::NonStringElement {
                field: S::OUTPUT_FIELD,
                index,
                found: json_kind(row),
            }));
        };
        items.push(text.to_string());
    }
    Ok(S::output_from_items(items))
}

pub fn input_payload<S: AnalysisSchema>(input: &S::Input) -> Map<String, Value> {
    serde_json::to_value(input)
        .ok()
        .and_then(|value| value.as_object().cloned())
        .unwrap_or_default()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{
        input_payload, validate, AnalysisSchema, DifferentialInput, DifferentialSchema,
        SingleImageSchema, ViolationReason,
    };
    use crate::image::CanonicalImage;

    #[test]
    fn valid_single_output_round_trips_unchanged() -> anyhow::Result<()> {
        let candidate = json!({ "objects": ["Cat", "Laptop", "Coffee Mug", "Cat"] });
        let output = validate::<SingleImageSchema>(&candidate)?;
        assert_eq!(output.objects, vec!["Cat", "Laptop", "Coffee Mug", "Cat"]);
        assert_eq!(serde_json::to_value(&output)?, candidate);
        Ok(())
    }

    #[test]
    fn valid_differential_output_round_trips_unchanged() -> anyhow::Result<()> {
        let candidate = json!({ "missingObjects": [] });
        let output = validate::<DifferentialSchema>(&candidate)?;
        assert!(output.missing_objects.is_empty());
        assert_eq!(serde_json::to_value(&output)?, candidate);
        Ok(())
    }

    #[test]
    fn extra_fields_are_ignored() -> anyhow::Result<()> {
        let candidate = json!({ "objects": ["Lamp"], "confidence": 0.4 });
        let output = validate::<SingleImageSchema>(&candidate)?;
        assert_eq!(output.objects, vec!["Lamp"]);
        Ok(())
    }

    #[test]
    fn missing_field_is_a_violation() {
        let err = validate::<SingleImageSchema>(&json!({ "items": ["Lamp"] })).unwrap_err();
        assert_eq!(err.operation, "analyze_single_image");
        assert_eq!(err.reason, ViolationReason::MissingField("objects"));

        let err = validate::<DifferentialSchema>(&json!({ "objects": [] })).unwrap_err();
        assert_eq!(err.reason, ViolationReason::MissingField("missingObjects"));
    }

    #[test]
    fn wrong_shapes_are_violations() {
        let err = validate::<SingleImageSchema>(&json!(["Lamp"])).unwrap_err();
        assert_eq!(err.reason, ViolationReason::NotAnObject("array"));

        let err = validate::<SingleImageSchema>(&Value::Null).unwrap_err();
        assert_eq!(err.reason, ViolationReason::NotAnObject("null"));

        let err = validate::<SingleImageSchema>(&json!({ "objects": "Lamp" })).unwrap_err();
        assert_eq!(
            err.reason,
            ViolationReason::NotASequence {
                field: "objects",
                found: "string"
            }
        );

        let err = validate::<SingleImageSchema>(&json!({ "objects": ["Lamp", 3] })).unwrap_err();
        assert_eq!(
            err.reason,
            ViolationReason::NonStringElement {
                field: "objects",
                index: 1,
                found: "number"
            }
        );
        assert!(err.to_string().contains("element 1 must be a string"));
    }

    #[test]
    fn differential_input_uses_camel_case_wire_names() -> anyhow::Result<()> {
        let input = DifferentialInput {
            reference_image: CanonicalImage::parse("data:image/png;base64,AAAA")?,
            comparison_image: CanonicalImage::parse("data:image/jpeg;base64,BBBB")?,
        };
        let payload = input_payload::<DifferentialSchema>(&input);
        assert_eq!(payload["referenceImage"], json!("data:image/png;base64,AAAA"));
        assert_eq!(payload["comparisonImage"], json!("data:image/jpeg;base64,BBBB"));
        for field in DifferentialSchema::INPUT_FIELDS {
            assert!(payload.contains_key(*field));
        }
        Ok(())
    }

    #[test]
    fn output_json_schema_requires_the_output_field() {
        let schema = DifferentialSchema::output_json_schema();
        assert_eq!(schema["required"], json!(["missingObjects"]));
        assert_eq!(
            schema["properties"]["missingObjects"]["items"]["type"],
            json!("STRING")
        );
    }
}
