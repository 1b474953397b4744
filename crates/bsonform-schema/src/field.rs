//! Field descriptors

use std::fmt;
use std::sync::Arc;

use bson::Bson;
use bsonform_common::ValidationError;

use crate::spec::TypeSpec;

/// Explicit default for a field
///
/// A factory is invoked every time a default is needed, so each document gets
/// a fresh value (a new ObjectId, the current time, ...).
#[derive(Clone)]
pub enum DefaultValue {
    /// A fixed value, cloned on use
    Value(Bson),
    /// A function producing the value
    Factory(Arc<dyn Fn() -> Bson + Send + Sync>),
}

impl DefaultValue {
    /// Produce the default value
    pub fn make(&self) -> Bson {
        match self {
            DefaultValue::Value(value) => value.clone(),
            DefaultValue::Factory(factory) => factory(),
        }
    }
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultValue::Value(value) => f.debug_tuple("Value").field(value).finish(),
            DefaultValue::Factory(_) => f.write_str("Factory(..)"),
        }
    }
}

/// Metadata describing one document property
#[derive(Debug, Clone)]
pub struct Field {
    name: String,
    spec: TypeSpec,
    default: Option<DefaultValue>,
    required: bool,
    write_once: bool,
    read_only: bool,
}

impl Field {
    /// Create a field with no default, not required, writable
    pub fn new(name: impl Into<String>, spec: TypeSpec) -> Self {
        Self {
            name: name.into(),
            spec,
            default: None,
            required: false,
            write_once: false,
            read_only: false,
        }
    }

    /// Require the field to be present before a save
    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    /// Allow the field to be assigned only while it has no value
    pub fn write_once(mut self, write_once: bool) -> Self {
        self.write_once = write_once;
        self
    }

    /// Reject every typed assignment
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Set a fixed default value
    pub fn default(mut self, value: impl Into<Bson>) -> Self {
        self.default = Some(DefaultValue::Value(value.into()));
        self
    }

    /// Set a default factory
    pub fn default_with<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Bson + Send + Sync + 'static,
    {
        self.default = Some(DefaultValue::Factory(Arc::new(factory)));
        self
    }

    pub(crate) fn with_default(mut self, default: Option<DefaultValue>) -> Self {
        self.default = default;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn spec(&self) -> &TypeSpec {
        &self.spec
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn is_write_once(&self) -> bool {
        self.write_once
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// True when the field declares an explicit default
    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }

    pub fn explicit_default(&self) -> Option<&DefaultValue> {
        self.default.as_ref()
    }

    /// Produce a default value: the explicit default, else the type's implicit one
    pub fn make(&self) -> Bson {
        match &self.default {
            Some(default) => default.make(),
            None => self.spec.default_value(),
        }
    }

    /// Ensure the default this field produces passes its own validation
    pub fn check(&self) -> Result<(), ValidationError> {
        self.spec.validate(&self.name, &self.make())
    }

    /// Validate a typed assignment of `value` given the field's `current` stored value
    pub fn validate_assignment(
        &self,
        value: &Bson,
        current: Option<&Bson>,
    ) -> Result<(), ValidationError> {
        if self.read_only {
            return Err(ValidationError::read_only(
                &self.name,
                format!("field '{}' is read-only", self.name),
            ));
        }
        if self.write_once && current.is_some_and(|v| !matches!(v, Bson::Null)) {
            return Err(ValidationError::read_only(
                &self.name,
                format!("field '{}' is write-once and already set", self.name),
            ));
        }
        self.spec.validate(&self.name, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::oid::ObjectId;
    use bsonform_common::ErrorType;

    #[test]
    fn test_make_uses_type_default() {
        let field = Field::new("age", TypeSpec::Int);
        assert!(!field.has_default());
        assert_eq!(field.make(), Bson::Int64(0));
    }

    #[test]
    fn test_make_uses_explicit_default() {
        let field = Field::new("name", TypeSpec::Str).default("anon");
        assert_eq!(field.make(), Bson::String("anon".into()));
    }

    #[test]
    fn test_factory_called_each_time() {
        let field = Field::new("ref", TypeSpec::ObjectId).default_with(|| ObjectId::new().into());
        assert_ne!(field.make(), field.make());
        assert!(field.check().is_ok());
    }

    #[test]
    fn test_check_rejects_bad_default() {
        let field = Field::new("age", TypeSpec::Int).default("old");
        let err = field.check().unwrap_err();
        assert_eq!(err.path.as_deref(), Some("age"));
        assert_eq!(err.error_type, ErrorType::TypeError);
    }

    #[test]
    fn test_read_only_rejects_assignment() {
        let field = Field::new("_id", TypeSpec::ObjectId).read_only(true);
        let err = field
            .validate_assignment(&Bson::ObjectId(ObjectId::new()), None)
            .unwrap_err();
        assert_eq!(err.error_type, ErrorType::ReadOnly);
    }

    #[test]
    fn test_write_once() {
        let field = Field::new("slug", TypeSpec::Str).write_once(true);
        let value = Bson::String("first".into());
        assert!(field.validate_assignment(&value, None).is_ok());
        assert!(field.validate_assignment(&value, Some(&Bson::Null)).is_ok());
        let err = field.validate_assignment(&value, Some(&value)).unwrap_err();
        assert!(err.message.contains("write-once"));
    }
}
