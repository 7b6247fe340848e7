//! Schema model and loaders.
//!
//! A [`Schema`] is an ordered list of named [`Field`]s, each either a scalar,
//! a nested record with its own sub-schema, or an array (normally of records).
//! Schemas are read once per process and never mutated afterwards.
//!
//! Two on-disk forms are accepted:
//!
//! - **Avro JSON** (`.avsc`, `.avro`, `.json`): the record/array/union subset
//!   used by streaming-insert producers. `["null", T]` unions mark a field as
//!   nullable, logical types collapse to their base primitive, and named-type
//!   references resolve against records defined earlier in the same file.
//! - **Native YAML** (`.yml`, `.yaml`): the serde form of [`Schema`] itself.

use std::{
    collections::{HashMap, HashSet},
    fmt,
    fs,
    path::Path,
};

use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ReconcileError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    String,
    Int,
    Long,
    Float,
    Double,
    Boolean,
    Bytes,
    Any,
}

impl ScalarType {
    fn from_primitive(name: &str) -> Option<Self> {
        let ty = match name {
            "string" | "enum" => ScalarType::String,
            "int" => ScalarType::Int,
            "long" => ScalarType::Long,
            "float" => ScalarType::Float,
            "double" => ScalarType::Double,
            "boolean" => ScalarType::Boolean,
            "bytes" | "fixed" => ScalarType::Bytes,
            "map" | "any" => ScalarType::Any,
            _ => return None,
        };
        Some(ty)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScalarType::String => "string",
            ScalarType::Int => "int",
            ScalarType::Long => "long",
            ScalarType::Float => "float",
            ScalarType::Double => "double",
            ScalarType::Boolean => "boolean",
            ScalarType::Bytes => "bytes",
            ScalarType::Any => "any",
        }
    }

    pub fn is_integral(&self) -> bool {
        matches!(self, ScalarType::Int | ScalarType::Long)
    }

    pub fn is_floating(&self) -> bool {
        matches!(self, ScalarType::Float | ScalarType::Double)
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Scalar(ScalarType),
    Record(Schema),
    Array(Box<FieldKind>),
}

impl FieldKind {
    /// Sub-schema of a record field, or of the elements of an array-of-record field.
    pub fn record_schema(&self) -> Option<&Schema> {
        match self {
            FieldKind::Record(schema) => Some(schema),
            FieldKind::Array(element) => element.record_schema(),
            FieldKind::Scalar(_) => None,
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(self, FieldKind::Array(_))
    }

    pub fn describe(&self) -> String {
        match self {
            FieldKind::Scalar(ty) => ty.to_string(),
            FieldKind::Record(schema) => format!("record<{}>", schema.name),
            FieldKind::Array(element) => format!("array<{}>", element.describe()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "FieldSpec", into = "FieldSpec")]
pub struct Field {
    pub name: String,
    pub kind: FieldKind,
    pub nullable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub name: String,
    pub fields: Vec<Field>,
}

impl Schema {
    pub fn new(name: impl Into<String>, fields: Vec<Field>) -> Self {
        Schema {
            name: name.into(),
            fields,
        }
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Resolves a dotted path such as `customer.name` or `items.quantity`
    /// (array elements are transparent) to the kind declared at that path.
    pub fn resolve<'a, I>(&self, segments: I) -> Option<&FieldKind>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut current = self;
        let mut resolved: Option<&FieldKind> = None;
        for segment in segments {
            if resolved.is_some() {
                current = resolved?.record_schema()?;
            }
            resolved = Some(&current.field(segment)?.kind);
        }
        resolved
    }

    /// Parses an Avro JSON schema document.
    pub fn from_avro_str(text: &str) -> std::result::Result<Self, String> {
        let root: Value =
            serde_json::from_str(text).map_err(|err| format!("invalid schema JSON: {err}"))?;
        let mut resolver = AvroResolver::default();
        match resolver.kind(&root, "<root>")? {
            (FieldKind::Record(schema), _) => Ok(schema),
            (other, _) => Err(format!(
                "top-level schema must be a record, found {}",
                other.describe()
            )),
        }
    }

    pub fn from_yaml_str(text: &str) -> std::result::Result<Self, String> {
        serde_yaml::from_str(text).map_err(|err| format!("invalid schema YAML: {err}"))
    }

    pub fn to_yaml_string(&self) -> std::result::Result<String, String> {
        serde_yaml::to_string(self).map_err(|err| err.to_string())
    }
}

/// Loads a schema, choosing the parser from the file extension.
pub fn load_schema(path: &Path) -> Result<Schema> {
    let text = fs::read_to_string(path).map_err(|err| ReconcileError::SchemaLoad {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;
    let is_yaml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("yml") || ext.eq_ignore_ascii_case("yaml"));
    let parsed = if is_yaml {
        Schema::from_yaml_str(&text)
    } else {
        Schema::from_avro_str(&text)
    };
    let schema = parsed.map_err(|message| ReconcileError::SchemaLoad {
        path: path.to_path_buf(),
        message,
    })?;
    debug!(
        "Loaded schema '{}' with {} top-level field(s) from {:?}",
        schema.name,
        schema.fields.len(),
        path
    );
    Ok(schema)
}

#[derive(Default)]
struct AvroResolver {
    named: HashMap<String, FieldKind>,
    in_progress: HashSet<String>,
}

impl AvroResolver {
    /// Returns the kind plus whether the declaration admitted `null`.
    fn kind(&mut self, node: &Value, context: &str) -> std::result::Result<(FieldKind, bool), String> {
        match node {
            Value::String(name) => self.named_or_primitive(name, context).map(|k| (k, false)),
            Value::Array(branches) => self.union(branches, context),
            Value::Object(map) => {
                let ty = map
                    .get("type")
                    .ok_or_else(|| format!("'{context}' is missing a 'type'"))?;
                match ty.as_str() {
                    Some("record") => self.record(map, context).map(|k| (k, false)),
                    Some("array") => {
                        let items = map
                            .get("items")
                            .ok_or_else(|| format!("array '{context}' is missing 'items'"))?;
                        let (element, _) = self.kind(items, context)?;
                        Ok((FieldKind::Array(Box::new(element)), false))
                    }
                    Some("enum") | Some("fixed") => {
                        let kind = FieldKind::Scalar(
                            ScalarType::from_primitive(ty.as_str().unwrap_or_default())
                                .unwrap_or(ScalarType::String),
                        );
                        if let Some(name) = map.get("name").and_then(Value::as_str) {
                            self.named.insert(name.to_string(), kind.clone());
                        }
                        Ok((kind, false))
                    }
                    // primitives wrapped in an object, usually to carry a logicalType
                    _ => self.kind(ty, context),
                }
            }
            other => Err(format!("unsupported type declaration for '{context}': {other}")),
        }
    }

    fn named_or_primitive(&self, name: &str, context: &str) -> std::result::Result<FieldKind, String> {
        if name == "null" {
            return Ok(FieldKind::Scalar(ScalarType::Any));
        }
        if let Some(ty) = ScalarType::from_primitive(name) {
            return Ok(FieldKind::Scalar(ty));
        }
        if self.in_progress.contains(name) {
            return Err(format!(
                "'{context}' references '{name}' recursively; self-referential schemas are not supported"
            ));
        }
        self.named
            .get(name)
            .cloned()
            .ok_or_else(|| format!("'{context}' references unknown type '{name}'"))
    }

    fn union(&mut self, branches: &[Value], context: &str) -> std::result::Result<(FieldKind, bool), String> {
        let nullable = branches.iter().any(|b| b.as_str() == Some("null"));
        let mut concrete = branches
            .iter()
            .filter(|b| b.as_str() != Some("null"))
            .map(|b| self.kind(b, context).map(|(kind, _)| kind))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let kind = if concrete.len() == 1 {
            concrete.remove(0)
        } else {
            FieldKind::Scalar(ScalarType::Any)
        };
        Ok((kind, nullable))
    }

    fn record(
        &mut self,
        map: &serde_json::Map<String, Value>,
        context: &str,
    ) -> std::result::Result<FieldKind, String> {
        let name = map
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| format!("record '{context}' is missing a 'name'"))?
            .to_string();
        if !self.in_progress.insert(name.clone()) {
            return Err(format!("record '{name}' is defined recursively"));
        }
        let declared = map
            .get("fields")
            .and_then(Value::as_array)
            .ok_or_else(|| format!("record '{name}' is missing 'fields'"))?;
        let mut fields = Vec::with_capacity(declared.len());
        let mut seen = HashSet::new();
        for field in declared {
            let field_name = field
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| format!("a field of record '{name}' is missing a 'name'"))?;
            if !seen.insert(field_name.to_string()) {
                return Err(format!("record '{name}' declares '{field_name}' twice"));
            }
            let ty = field
                .get("type")
                .ok_or_else(|| format!("field '{name}.{field_name}' is missing a 'type'"))?;
            let (kind, nullable) = self.kind(ty, &format!("{name}.{field_name}"))?;
            fields.push(Field {
                name: field_name.to_string(),
                kind,
                nullable,
            });
        }
        self.in_progress.remove(&name);
        let kind = FieldKind::Record(Schema::new(name.clone(), fields));
        self.named.insert(name, kind.clone());
        Ok(kind)
    }
}

/// Serde form of a type declaration in the native YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TypeSpec {
    #[serde(rename = "type")]
    ty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fields: Option<Vec<Field>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    items: Option<Box<TypeSpec>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FieldSpec {
    name: String,
    #[serde(flatten)]
    spec: TypeSpec,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    nullable: bool,
}

impl TypeSpec {
    fn into_kind(self, context: &str) -> std::result::Result<FieldKind, String> {
        match self.ty.as_str() {
            "record" => {
                let fields = self
                    .fields
                    .ok_or_else(|| format!("record '{context}' is missing 'fields'"))?;
                Ok(FieldKind::Record(Schema::new(
                    self.name.unwrap_or_else(|| context.to_string()),
                    fields,
                )))
            }
            "array" => {
                let items = self
                    .items
                    .ok_or_else(|| format!("array '{context}' is missing 'items'"))?;
                Ok(FieldKind::Array(Box::new(items.into_kind(context)?)))
            }
            other => ScalarType::from_primitive(other)
                .map(FieldKind::Scalar)
                .ok_or_else(|| format!("unknown type '{other}' for '{context}'")),
        }
    }

    fn from_kind(kind: FieldKind) -> Self {
        match kind {
            FieldKind::Scalar(ty) => TypeSpec {
                ty: ty.as_str().to_string(),
                name: None,
                fields: None,
                items: None,
            },
            FieldKind::Record(schema) => TypeSpec {
                ty: "record".to_string(),
                name: Some(schema.name),
                fields: Some(schema.fields),
                items: None,
            },
            FieldKind::Array(element) => TypeSpec {
                ty: "array".to_string(),
                name: None,
                fields: None,
                items: Some(Box::new(TypeSpec::from_kind(*element))),
            },
        }
    }
}

impl TryFrom<FieldSpec> for Field {
    type Error = String;

    fn try_from(spec: FieldSpec) -> std::result::Result<Self, Self::Error> {
        let kind = spec.spec.into_kind(&spec.name)?;
        Ok(Field {
            name: spec.name,
            kind,
            nullable: spec.nullable,
        })
    }
}

impl From<Field> for FieldSpec {
    fn from(field: Field) -> Self {
        FieldSpec {
            name: field.name,
            spec: TypeSpec::from_kind(field.kind),
            nullable: field.nullable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORDER_AVRO: &str = r#"{
        "type": "record",
        "name": "Order",
        "fields": [
            {"name": "orderId", "type": "string"},
            {"name": "customer", "type": {
                "type": "record", "name": "Customer",
                "fields": [
                    {"name": "customerId", "type": "string"},
                    {"name": "email", "type": ["null", "string"]}
                ]
            }},
            {"name": "items", "type": {"type": "array", "items": {
                "type": "record", "name": "Item",
                "fields": [
                    {"name": "productId", "type": "string"},
                    {"name": "quantity", "type": "long"}
                ]
            }}},
            {"name": "billingContact", "type": ["null", "Customer"]},
            {"name": "orderDate", "type": {"type": "long", "logicalType": "timestamp-millis"}},
            {"name": "totalAmount", "type": "double"}
        ]
    }"#;

    #[test]
    fn avro_record_with_nested_groups_parses_in_order() {
        let schema = Schema::from_avro_str(ORDER_AVRO).expect("parse avro");
        assert_eq!(schema.name, "Order");
        assert_eq!(
            schema.field_names().collect::<Vec<_>>(),
            vec![
                "orderId",
                "customer",
                "items",
                "billingContact",
                "orderDate",
                "totalAmount"
            ]
        );
        let items = &schema.field("items").unwrap().kind;
        assert!(items.is_array());
        assert_eq!(items.record_schema().unwrap().name, "Item");

        let email = schema
            .field("customer")
            .and_then(|f| f.kind.record_schema())
            .and_then(|s| s.field("email"))
            .unwrap();
        assert!(email.nullable);
        assert_eq!(email.kind, FieldKind::Scalar(ScalarType::String));

        let billing = schema.field("billingContact").unwrap();
        assert!(billing.nullable);
        assert_eq!(billing.kind.record_schema().unwrap().name, "Customer");
        assert_eq!(
            schema.field("orderDate").unwrap().kind,
            FieldKind::Scalar(ScalarType::Long)
        );
    }

    #[test]
    fn resolve_walks_through_records_and_arrays() {
        let schema = Schema::from_avro_str(ORDER_AVRO).unwrap();
        assert_eq!(
            schema.resolve(["items", "quantity"]),
            Some(&FieldKind::Scalar(ScalarType::Long))
        );
        assert_eq!(
            schema.resolve(["customer", "customerId"]),
            Some(&FieldKind::Scalar(ScalarType::String))
        );
        assert!(schema.resolve(["customer", "missing"]).is_none());
        assert!(schema.resolve(["orderId", "deeper"]).is_none());
    }

    #[test]
    fn recursive_schema_is_rejected() {
        let text = r#"{"type": "record", "name": "Node", "fields": [
            {"name": "next", "type": ["null", "Node"]}
        ]}"#;
        let err = Schema::from_avro_str(text).unwrap_err();
        assert!(err.contains("recursively"), "{err}");
    }

    #[test]
    fn unknown_named_type_is_rejected() {
        let text = r#"{"type": "record", "name": "A", "fields": [
            {"name": "b", "type": "Missing"}
        ]}"#;
        let err = Schema::from_avro_str(text).unwrap_err();
        assert!(err.contains("unknown type 'Missing'"), "{err}");
    }

    #[test]
    fn yaml_form_round_trips_through_serde() {
        let schema = Schema::from_avro_str(ORDER_AVRO).unwrap();
        let yaml = schema.to_yaml_string().expect("to yaml");
        let reparsed = Schema::from_yaml_str(&yaml).expect("from yaml");
        assert_eq!(reparsed, schema);
    }

    #[test]
    fn load_schema_reports_missing_file() {
        let err = load_schema(Path::new("does_not_exist.avsc")).unwrap_err();
        assert!(matches!(err, ReconcileError::SchemaLoad { .. }));
        assert!(err.to_string().contains("does_not_exist.avsc"));
    }
}
