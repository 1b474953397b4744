//! Live documents
//!
//! A [`Document`] is a mutable record bound to a [`Model`]. Attributes are
//! kept under canonical field names in their stored (collapsed) form; the
//! short keys of the schema's field map only appear in what is sent to the
//! database.
//!
//! Plain assignments mark fields dirty and are written with `$set` on the
//! next save. Atomic operations (`inc`, `push`, `pull`, `add_to_set`) are
//! queued and sent alongside; they do not change the local copy, which is
//! refreshed from the database after the save.

use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use bson::{doc, oid::ObjectId, Bson, Document as BsonDocument};
use bsonform_common::{OdmError, Result, ValidationError};
use bsonform_schema::{DocumentSchema, Field, TypeSpec, ID_FIELD};
use serde::de::DeserializeOwned;

use crate::hooks::DocumentHooks;
use crate::model::Model;
use crate::operations::PendingOperations;

/// A schema-bound MongoDB document
#[derive(Clone)]
pub struct Document {
    model: Model,
    attributes: BsonDocument,
    dirty: BTreeSet<String>,
    ops: PendingOperations,
    identity: BsonDocument,
}

impl Document {
    /// Create an empty document; explicit defaults are populated and marked dirty
    pub fn new(model: &Model) -> Self {
        let mut document = Self::blank(model);
        document.apply_missing_defaults();
        document.identity = document.hooks().identity(&document);
        document
    }

    /// Build a document from its stored form (short keys)
    ///
    /// Undeclared keys are ignored and stored values are taken as they are.
    /// The `on_load` hook is not called here; see [`Model::load`].
    pub(crate) fn from_stored(model: &Model, raw: &BsonDocument) -> Self {
        let mut document = Self::blank(model);
        document.load_stored(raw);
        document
    }

    /// Build a document from canonical keys and user-visible values, validating each field
    pub(crate) fn from_canonical(model: &Model, data: BsonDocument) -> Result<Self> {
        let mut document = Self::blank(model);
        for (key, value) in data {
            if matches!(value, Bson::Null) {
                continue;
            }
            if key == ID_FIELD {
                document.assign_id(value)?;
            } else {
                document.set_field(&key, value)?;
            }
        }
        document.apply_missing_defaults();
        document.identity = document.hooks().identity(&document);
        Ok(document)
    }

    fn blank(model: &Model) -> Self {
        Self {
            model: model.clone(),
            attributes: BsonDocument::new(),
            dirty: BTreeSet::new(),
            ops: PendingOperations::new(),
            identity: BsonDocument::new(),
        }
    }

    /// Replace all attributes with the contents of a stored document
    fn load_stored(&mut self, raw: &BsonDocument) {
        let schema = Arc::clone(self.model.schema());
        self.attributes.clear();
        self.dirty.clear();
        self.ops.clear();
        for field in schema.fields() {
            if let Some(value) = raw.get(schema.long_to_short(field.name())) {
                if !matches!(value, Bson::Null) {
                    self.attributes.insert(field.name(), value.clone());
                }
            }
        }
        self.apply_missing_defaults();
        self.identity = self.hooks().identity(self);
    }

    fn apply_missing_defaults(&mut self) {
        let schema = Arc::clone(self.model.schema());
        for field in schema.fields().iter().filter(|f| f.has_default()) {
            if self.attributes.contains_key(field.name()) {
                continue;
            }
            let value = field.make();
            if matches!(value, Bson::Null) {
                continue;
            }
            self.attributes
                .insert(field.name(), field.spec().collapse(&value));
            self.dirty.insert(field.name().to_string());
        }
    }

    fn assign_id(&mut self, value: Bson) -> Result<()> {
        TypeSpec::ObjectId.validate(ID_FIELD, &value)?;
        self.attributes.insert(ID_FIELD, value);
        Ok(())
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn schema(&self) -> &Arc<DocumentSchema> {
        self.model.schema()
    }

    fn hooks(&self) -> Arc<dyn DocumentHooks> {
        Arc::clone(self.model.hooks())
    }

    pub(crate) fn declared_field(&self, name: &str) -> Result<Field> {
        self.schema().field(name).cloned().ok_or_else(|| {
            OdmError::Field(format!(
                "'{}' is not a field of {}",
                name,
                self.schema().name()
            ))
        })
    }

    /// Fail unless `field` may be changed given its current value
    pub(crate) fn check_writable(&self, field: &Field) -> Result<()> {
        if field.is_read_only() {
            return Err(ValidationError::read_only(
                field.name(),
                format!("field '{}' is read-only", field.name()),
            )
            .into());
        }
        if field.is_write_once() && self.attributes.contains_key(field.name()) {
            return Err(ValidationError::read_only(
                field.name(),
                format!("field '{}' is write-once and already set", field.name()),
            )
            .into());
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Attribute access
    // ------------------------------------------------------------------

    /// Raw stored value of `key`
    pub fn get(&self, key: &str) -> Option<&Bson> {
        self.attributes.get(key)
    }

    /// User-visible value of a declared field, or its default when unset
    pub fn get_field(&self, name: &str) -> Result<Bson> {
        let field = self.declared_field(name)?;
        Ok(match self.attributes.get(name) {
            Some(value) => field.spec().expand(value),
            None => field.make(),
        })
    }

    /// Deserialize a field into any serde type
    pub fn get_as<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        Ok(bson::from_bson(self.get_field(name)?)?)
    }

    /// Typed assignment
    ///
    /// The value is validated against the field; `Null` removes the field.
    pub fn set_field(&mut self, name: &str, value: impl Into<Bson>) -> Result<()> {
        let value = value.into();
        let field = self.declared_field(name)?;
        field.validate_assignment(&value, self.attributes.get(name))?;
        if matches!(value, Bson::Null) {
            self.unset(name);
            return Ok(());
        }
        self.attributes
            .insert(name, field.spec().collapse(&value));
        self.mark_dirty(name);
        Ok(())
    }

    /// Raw assignment without any checks; `Null` removes the field
    pub fn set(&mut self, key: &str, value: impl Into<Bson>) {
        let value = value.into();
        if matches!(value, Bson::Null) {
            self.unset(key);
            return;
        }
        self.attributes.insert(key, value);
        self.mark_dirty(key);
    }

    /// Remove an attribute and queue `$unset` for it
    pub fn unset(&mut self, key: &str) {
        self.attributes.remove(key);
        self.dirty.remove(key);
        self.ops.unset(key);
    }

    /// Schedule `key` to be written with `$set` on the next save
    pub fn mark_dirty(&mut self, key: &str) {
        self.ops.cancel_unset(key);
        self.dirty.insert(key.to_string());
    }

    pub fn is_dirty(&self, key: &str) -> bool {
        self.dirty.contains(key)
    }

    /// Fields marked dirty, sorted
    pub fn dirty_fields(&self) -> impl Iterator<Item = &str> {
        self.dirty.iter().map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.attributes.contains_key(key)
    }

    /// A document is new until it has an `_id`
    pub fn is_new(&self) -> bool {
        self.id().is_none()
    }

    pub fn id(&self) -> Option<ObjectId> {
        match self.attributes.get(ID_FIELD) {
            Some(Bson::ObjectId(id)) => Some(*id),
            _ => None,
        }
    }

    /// Filter locating this document, captured at creation or load
    pub fn identity(&self) -> &BsonDocument {
        &self.identity
    }

    /// Forget dirty flags and queued operations
    pub fn clear_ops(&mut self) {
        self.dirty.clear();
        self.ops.clear();
    }

    /// Attributes under canonical names, in stored form
    pub fn attributes(&self) -> &BsonDocument {
        &self.attributes
    }

    /// The document as it is stored (short keys)
    pub fn to_bson(&self) -> BsonDocument {
        let schema = self.schema();
        self.attributes
            .iter()
            .map(|(key, value)| (schema.long_to_short(key).to_string(), value.clone()))
            .collect()
    }

    /// The document under canonical names with user-visible values
    pub fn to_canonical(&self) -> BsonDocument {
        let schema = self.schema();
        self.attributes
            .iter()
            .map(|(key, value)| {
                let value = match schema.field(key) {
                    Some(field) => field.spec().expand(value),
                    None => value.clone(),
                };
                (key.clone(), value)
            })
            .collect()
    }

    /// Relaxed extended JSON under canonical names
    pub fn to_json(&self) -> Result<String> {
        let value = Bson::Document(self.to_canonical()).into_relaxed_extjson();
        Ok(serde_json::to_string(&value)?)
    }

    /// Deserialize the whole document into a serde type
    pub fn to_struct<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(bson::from_document(self.to_canonical())?)
    }

    // ------------------------------------------------------------------
    // Atomic operations
    // ------------------------------------------------------------------

    /// Queue `$inc` on a numeric field
    pub fn inc(&mut self, key: &str, by: impl Into<Bson>) -> Result<()> {
        let by = by.into();
        let field = self.declared_field(key)?;
        self.check_writable(&field)?;
        let delta = match (field.spec(), &by) {
            (TypeSpec::Int, Bson::Int32(n)) => Bson::Int64(i64::from(*n)),
            (TypeSpec::Int, Bson::Int64(n)) => Bson::Int64(*n),
            (TypeSpec::Float, Bson::Int32(n)) => Bson::Double(f64::from(*n)),
            (TypeSpec::Float, Bson::Int64(n)) => Bson::Double(*n as f64),
            (TypeSpec::Float | TypeSpec::Any, Bson::Double(n)) => Bson::Double(*n),
            (TypeSpec::Any, Bson::Int32(n)) => Bson::Int64(i64::from(*n)),
            (TypeSpec::Any, Bson::Int64(n)) => Bson::Int64(*n),
            (spec, _) if !(spec.is_numeric() || *spec == TypeSpec::Any) => {
                return Err(OdmError::Field(format!(
                    "cannot increment '{}' of type '{}'",
                    key,
                    spec.type_name()
                )))
            }
            (spec, value) => {
                return Err(ValidationError::type_error(
                    key,
                    format!(
                        "cannot increment '{}' by {} value",
                        spec.type_name(),
                        bsonform_schema::bson_type_name(value)
                    ),
                )
                .into())
            }
        };
        self.ops.inc(key, delta)
    }

    /// Queue `$inc` by the negated magnitude of `by`
    pub fn dec(&mut self, key: &str, by: impl Into<Bson>) -> Result<()> {
        let negated = match by.into() {
            Bson::Int32(n) => Bson::Int64(-i64::from(n).abs()),
            Bson::Int64(n) => Bson::Int64(n.checked_abs().map_or(i64::MIN, |v| -v)),
            Bson::Double(n) => Bson::Double(-n.abs()),
            other => other,
        };
        self.inc(key, negated)
    }

    /// Queue `$push`; an array argument appends each element
    pub fn push(&mut self, key: &str, value: impl Into<Bson>) -> Result<()> {
        let values = self.container_values(key, value.into(), "push", false)?;
        self.ops.push(key, values);
        Ok(())
    }

    /// Queue `$pullAll`; an array argument removes each element
    pub fn pull(&mut self, key: &str, value: impl Into<Bson>) -> Result<()> {
        let values = self.container_values(key, value.into(), "pull", true)?;
        self.ops.pull_all(key, values);
        Ok(())
    }

    /// Queue `$addToSet`; an array argument adds each element
    pub fn add_to_set(&mut self, key: &str, value: impl Into<Bson>) -> Result<()> {
        let values = self.container_values(key, value.into(), "add_to_set", true)?;
        self.ops.add_to_set(key, values);
        Ok(())
    }

    /// Validate and collapse the elements given to a container operation
    fn container_values(
        &self,
        key: &str,
        value: Bson,
        op: &str,
        sets_allowed: bool,
    ) -> Result<Vec<Bson>> {
        let field = self.declared_field(key)?;
        self.check_writable(&field)?;
        let element = match field.spec() {
            TypeSpec::Any => TypeSpec::Any,
            TypeSpec::List(element) => (**element).clone(),
            TypeSpec::Set(element) if sets_allowed => (**element).clone(),
            other => {
                return Err(OdmError::Field(format!(
                    "cannot {} on '{}' of type '{}'",
                    op,
                    key,
                    other.type_name()
                )))
            }
        };
        let values = match value {
            Bson::Array(items) => items,
            single => vec![single],
        };
        values
            .into_iter()
            .map(|item| -> Result<Bson> {
                element.validate(key, &item)?;
                Ok(element.collapse(&item))
            })
            .collect()
    }

    /// The update document the next save will send
    pub fn operations(&self) -> Result<BsonDocument> {
        let schema = self.schema();
        let mut set = BsonDocument::new();
        for key in &self.dirty {
            if let Some(value) = self.attributes.get(key) {
                set.insert(schema.long_to_short(key), value.clone());
            }
        }
        self.ops
            .to_update(set, |key| schema.long_to_short(key).to_string())
    }

    pub fn pending(&self) -> &PendingOperations {
        &self.ops
    }

    // ------------------------------------------------------------------
    // Container mutation, used by the tracking handles
    // ------------------------------------------------------------------

    /// Run `f` over the array stored in `name`, then store it back and mark it dirty
    ///
    /// Nothing is stored when `f` fails.
    pub(crate) fn modify_array<R>(
        &mut self,
        name: &str,
        f: impl FnOnce(&mut Vec<Bson>) -> Result<R>,
    ) -> Result<R> {
        let mut items = match self.attributes.get(name) {
            Some(Bson::Array(items)) => items.clone(),
            Some(other) => {
                return Err(OdmError::Field(format!(
                    "'{}' holds {} instead of an array",
                    name,
                    bsonform_schema::bson_type_name(other)
                )))
            }
            None => {
                let field = self.declared_field(name)?;
                match field.spec().collapse(&field.make()) {
                    Bson::Array(items) => items,
                    _ => Vec::new(),
                }
            }
        };
        let result = f(&mut items)?;
        self.attributes.insert(name, items);
        self.mark_dirty(name);
        Ok(result)
    }

    /// Run `f` over the embedded document stored in `name`, then store it back and mark it dirty
    pub(crate) fn modify_map<R>(
        &mut self,
        name: &str,
        f: impl FnOnce(&mut BsonDocument) -> Result<R>,
    ) -> Result<R> {
        let mut map = match self.attributes.get(name) {
            Some(Bson::Document(map)) => map.clone(),
            Some(other) => {
                return Err(OdmError::Field(format!(
                    "'{}' holds {} instead of a document",
                    name,
                    bsonform_schema::bson_type_name(other)
                )))
            }
            None => BsonDocument::new(),
        };
        let result = f(&mut map)?;
        self.attributes.insert(name, map);
        self.mark_dirty(name);
        Ok(result)
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Check required fields, then the model's `validate` hook
    pub fn validate(&self) -> Result<()> {
        let missing: Vec<String> = self
            .schema()
            .required()
            .iter()
            .filter(|name| !self.attributes.contains_key(name.as_str()))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(ValidationError::missing(&missing).into());
        }
        self.hooks().validate(self)
    }

    /// Write pending changes and refresh from the stored result
    pub async fn save(&mut self) -> Result<()> {
        let hooks = self.hooks();
        hooks.pre_save(self)?;
        let inserting = self.is_new();
        if inserting {
            hooks.pre_insert(self)?;
        } else {
            hooks.pre_update(self)?;
        }
        self.validate()?;

        let mut update = self.operations()?;
        if update.is_empty() {
            if inserting {
                let id = self
                    .identity
                    .get(ID_FIELD)
                    .cloned()
                    .unwrap_or_else(|| Bson::ObjectId(ObjectId::new()));
                update.insert("$setOnInsert", doc! { "_id": id });
            } else {
                tracing::debug!(
                    schema = %self.schema().name(),
                    id = ?self.id(),
                    "Nothing to save"
                );
                hooks.post_update(self)?;
                self.clear_ops();
                return hooks.post_save(self);
            }
        }

        let collection = self.model.collection()?;
        tracing::debug!(
            schema = %self.schema().name(),
            collection = collection.name(),
            inserting,
            "Saving document"
        );
        let stored = collection
            .find_one_and_update(self.model.map_query(&self.identity), update, true)
            .await?
            .ok_or_else(|| {
                OdmError::Database(format!(
                    "saving {} returned no document",
                    self.schema().name()
                ))
            })?;
        self.load_stored(&stored);

        if inserting {
            hooks.post_insert(self)?;
        } else {
            hooks.post_update(self)?;
        }
        self.clear_ops();
        hooks.post_save(self)
    }

    /// Delete this document; returns whether a stored document was removed
    pub async fn delete(&self) -> Result<bool> {
        let id = self.id().ok_or_else(|| {
            OdmError::Query(format!(
                "cannot delete {} without an _id",
                self.schema().name()
            ))
        })?;
        let collection = self.model.collection()?;
        tracing::debug!(collection = collection.name(), %id, "Deleting document");
        collection.delete_one(doc! { "_id": id }).await
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.schema().name(), self.attributes)
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Documents are equal when they are stored under the same `_id` by the same schema
impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool {
        match (self.id(), other.id()) {
            (Some(a), Some(b)) => a == b && self.schema().name() == other.schema().name(),
            _ => false,
        }
    }
}

impl Hash for Document {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.schema().name().hash(state);
        self.id().hash(state);
    }
}
