//! Schema - Define type schemas for resources
//!
//! Providers define schemas for each resource type, so attributes are
//! checked once at the boundary before handlers build typed configuration.

use std::collections::HashMap;
use std::fmt;

use crate::resource::{Resource, Value};

/// Attribute type
#[derive(Debug, Clone)]
pub enum AttributeType {
    String,
    Int,
    Bool,
    /// Enum (list of allowed values)
    Enum(Vec<String>),
    /// String with an additional check (e.g., ARM ID, base64)
    Custom {
        name: String,
        validate: fn(&str) -> Result<(), String>,
    },
    List(Box<AttributeType>),
    Map(Box<AttributeType>),
    /// Nested block with its own attribute schemas
    Block(HashMap<String, AttributeSchema>),
}

impl AttributeType {
    /// Check if a value conforms to this type
    pub fn validate(&self, value: &Value) -> Result<(), TypeError> {
        match (self, value) {
            (AttributeType::String, Value::String(_)) => Ok(()),
            (AttributeType::Int, Value::Int(_)) => Ok(()),
            (AttributeType::Bool, Value::Bool(_)) => Ok(()),

            (AttributeType::Enum(variants), Value::String(s)) => {
                if variants.iter().any(|v| v == s) {
                    Ok(())
                } else {
                    Err(TypeError::InvalidEnumVariant {
                        value: s.clone(),
                        expected: variants.clone(),
                    })
                }
            }

            (AttributeType::Custom { validate, .. }, Value::String(s)) => {
                validate(s).map_err(|message| TypeError::ValidationFailed { message })
            }

            (AttributeType::List(inner), Value::List(items)) => {
                for (i, item) in items.iter().enumerate() {
                    inner.validate(item).map_err(|e| TypeError::ListItemError {
                        index: i,
                        inner: Box::new(e),
                    })?;
                }
                Ok(())
            }

            (AttributeType::Map(inner), Value::Map(map)) => {
                for (k, v) in map {
                    inner.validate(v).map_err(|e| TypeError::MapValueError {
                        key: k.clone(),
                        inner: Box::new(e),
                    })?;
                }
                Ok(())
            }

            (AttributeType::Block(fields), Value::Map(map)) => {
                for (k, v) in map {
                    let field = fields
                        .get(k)
                        .ok_or_else(|| TypeError::UnknownAttribute { name: k.clone() })?;
                    field
                        .attr_type
                        .validate(v)
                        .map_err(|e| TypeError::MapValueError {
                            key: k.clone(),
                            inner: Box::new(e),
                        })?;
                }
                Ok(())
            }

            _ => Err(TypeError::TypeMismatch {
                expected: self.type_name(),
                got: value.type_name().to_string(),
            }),
        }
    }

    fn type_name(&self) -> String {
        match self {
            AttributeType::String => "String".to_string(),
            AttributeType::Int => "Int".to_string(),
            AttributeType::Bool => "Bool".to_string(),
            AttributeType::Enum(variants) => format!("Enum({})", variants.join(" | ")),
            AttributeType::Custom { name, .. } => name.clone(),
            AttributeType::List(inner) => format!("List<{}>", inner.type_name()),
            AttributeType::Map(inner) => format!("Map<{}>", inner.type_name()),
            AttributeType::Block(_) => "Block".to_string(),
        }
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_name())
    }
}

/// Type error
#[derive(Debug, Clone, PartialEq)]
pub enum TypeError {
    TypeMismatch { expected: String, got: String },
    InvalidEnumVariant { value: String, expected: Vec<String> },
    ValidationFailed { message: String },
    ListItemError { index: usize, inner: Box<TypeError> },
    MapValueError { key: String, inner: Box<TypeError> },
    UnknownAttribute { name: String },
    MissingRequired { name: String },
    ComputedAttribute { name: String },
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeError::TypeMismatch { expected, got } => {
                write!(f, "Type mismatch: expected {}, got {}", expected, got)
            }
            TypeError::InvalidEnumVariant { value, expected } => {
                write!(
                    f,
                    "Invalid value '{}', expected one of: {}",
                    value,
                    expected.join(", ")
                )
            }
            TypeError::ValidationFailed { message } => write!(f, "{}", message),
            TypeError::ListItemError { index, inner } => write!(f, "[{}]: {}", index, inner),
            TypeError::MapValueError { key, inner } => write!(f, "{}: {}", key, inner),
            TypeError::UnknownAttribute { name } => write!(f, "Unknown attribute '{}'", name),
            TypeError::MissingRequired { name } => {
                write!(f, "Missing required attribute '{}'", name)
            }
            TypeError::ComputedAttribute { name } => {
                write!(f, "Attribute '{}' is computed and cannot be set", name)
            }
        }
    }
}

impl std::error::Error for TypeError {}

/// Attribute schema
#[derive(Debug, Clone)]
pub struct AttributeSchema {
    pub name: String,
    pub attr_type: AttributeType,
    pub required: bool,
    /// Set by the provider from the remote object, never by the user
    pub computed: bool,
    /// Changing this attribute requires replacing the remote object
    pub force_new: bool,
    /// Sent to the remote API but never returned by it
    pub write_only: bool,
    pub description: Option<String>,
}

impl AttributeSchema {
    pub fn new(name: impl Into<String>, attr_type: AttributeType) -> Self {
        Self {
            name: name.into(),
            attr_type,
            required: false,
            computed: false,
            force_new: false,
            write_only: false,
            description: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn computed(mut self) -> Self {
        self.computed = true;
        self
    }

    pub fn force_new(mut self) -> Self {
        self.force_new = true;
        self
    }

    pub fn write_only(mut self) -> Self {
        self.write_only = true;
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }
}

/// Resource schema
#[derive(Debug, Clone, Default)]
pub struct ResourceSchema {
    pub resource_type: String,
    pub attributes: HashMap<String, AttributeSchema>,
    pub description: Option<String>,
}

impl ResourceSchema {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            attributes: HashMap::new(),
            description: None,
        }
    }

    pub fn attribute(mut self, schema: AttributeSchema) -> Self {
        self.attributes.insert(schema.name.clone(), schema);
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    /// Validate resource attributes, collecting every error
    pub fn validate(&self, attributes: &HashMap<String, Value>) -> Result<(), Vec<TypeError>> {
        let mut errors = Vec::new();

        for (name, schema) in &self.attributes {
            if schema.required && !attributes.contains_key(name) {
                errors.push(TypeError::MissingRequired { name: name.clone() });
            }
        }

        for (name, value) in attributes {
            match self.attributes.get(name) {
                Some(schema) if schema.computed && !schema.required => {
                    errors.push(TypeError::ComputedAttribute { name: name.clone() });
                }
                Some(schema) => {
                    if let Err(e) = schema.attr_type.validate(value) {
                        errors.push(TypeError::MapValueError {
                            key: name.clone(),
                            inner: Box::new(e),
                        });
                    }
                }
                None => errors.push(TypeError::UnknownAttribute { name: name.clone() }),
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validate a resource, joining every error into one message
    pub fn validate_resource(&self, resource: &Resource) -> Result<(), String> {
        self.validate(&resource.attributes).map_err(|errors| {
            let mut messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            messages.sort();
            format!("{}: {}", resource.id, messages.join("; "))
        })
    }

    /// Names of attributes that force replacement when changed
    pub fn force_new_attributes(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .attributes
            .values()
            .filter(|a| a.force_new)
            .map(|a| a.name.as_str())
            .collect();
        names.sort();
        names
    }

    /// Copy write-only attributes from `from` into `into` where `into` lacks them
    ///
    /// A read can never observe these values, so the last value sent is kept.
    pub fn carry_write_only(&self, from: &HashMap<String, Value>, into: &mut HashMap<String, Value>) {
        for attr in self.attributes.values().filter(|a| a.write_only) {
            if let Some(value) = from.get(&attr.name)
                && !into.contains_key(&attr.name)
            {
                into.insert(attr.name.clone(), value.clone());
            }
        }
    }
}
