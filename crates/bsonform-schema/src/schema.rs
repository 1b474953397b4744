//! Document schemas
//!
//! A [`DocumentSchema`] is the merged, validated description of a document
//! type: its fields, the short keys they are stored under, which fields are
//! required or write-once, and where documents of this type live.
//!
//! Schemas extend other schemas. A child inherits every field, default and
//! short name of its parents; declaring any of them a second time is an
//! error (only `_id` may be redeclared). `required` and `write_once` are
//! unions over the whole hierarchy.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use bson::{Bson, Document as BsonDocument};
use bsonform_common::{OdmError, Result};

use crate::field::{DefaultValue, Field};
use crate::json_schema;
use crate::names::{ValidatedCollectionName, ValidatedFieldName};
use crate::spec::TypeSpec;

/// Name of the primary key field every schema declares
pub const ID_FIELD: &str = "_id";

/// A field type as given to [`SchemaBuilder::field`]: either built or still textual
#[derive(Debug, Clone)]
pub enum SpecDecl {
    Spec(TypeSpec),
    Text(String),
}

impl From<TypeSpec> for SpecDecl {
    fn from(spec: TypeSpec) -> Self {
        SpecDecl::Spec(spec)
    }
}

impl From<&str> for SpecDecl {
    fn from(text: &str) -> Self {
        SpecDecl::Text(text.to_string())
    }
}

impl From<String> for SpecDecl {
    fn from(text: String) -> Self {
        SpecDecl::Text(text)
    }
}

/// Merged description of a document type
#[derive(Debug)]
pub struct DocumentSchema {
    name: String,
    fields: Vec<Field>,
    index: HashMap<String, usize>,
    field_map: HashMap<String, String>,
    inverse_field_map: HashMap<String, String>,
    required: BTreeSet<String>,
    write_once: BTreeSet<String>,
    database: Option<String>,
    collection: String,
    connection: Option<String>,
    parents: Vec<String>,
}

impl DocumentSchema {
    /// Start declaring a schema called `name`
    pub fn builder(name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fields in declaration order, `_id` first, then inherited fields, then own fields
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.index.get(name).map(|&i| &self.fields[i])
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn is_required(&self, name: &str) -> bool {
        self.required.contains(name)
    }

    /// Canonical names of required fields, sorted
    pub fn required(&self) -> &BTreeSet<String> {
        &self.required
    }

    /// Canonical names of write-once fields, sorted
    pub fn write_once(&self) -> &BTreeSet<String> {
        &self.write_once
    }

    /// Canonical names of fields with explicit defaults
    pub fn default_names(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|f| f.has_default())
            .map(|f| f.name())
    }

    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Name of the registered connection documents are stored through
    pub fn connection(&self) -> Option<&str> {
        self.connection.as_deref()
    }

    /// Names of the schemas this one extends
    pub fn parents(&self) -> &[String] {
        &self.parents
    }

    /// Canonical → stored key map
    pub fn field_map(&self) -> &HashMap<String, String> {
        &self.field_map
    }

    /// Return the stored key for `long_key`, or `long_key` itself if it has no short form
    pub fn long_to_short<'a>(&'a self, long_key: &'a str) -> &'a str {
        self.field_map
            .get(long_key)
            .map(String::as_str)
            .unwrap_or(long_key)
    }

    /// Return the canonical name for `short_key`, or `short_key` itself
    pub fn short_to_long<'a>(&'a self, short_key: &'a str) -> &'a str {
        self.inverse_field_map
            .get(short_key)
            .map(String::as_str)
            .unwrap_or(short_key)
    }

    /// User-visible values of all explicit defaults, keyed by canonical name
    pub fn default_values(&self) -> BsonDocument {
        let mut out = BsonDocument::new();
        for field in self.fields.iter().filter(|f| f.has_default()) {
            let value = field.make();
            if !matches!(value, Bson::Null) {
                out.insert(field.name(), value);
            }
        }
        out
    }

    /// MongoDB `$jsonSchema` validator for collections holding this type
    pub fn to_json_schema(&self) -> BsonDocument {
        json_schema::collection_validator(self)
    }

    /// Stored form of all explicit defaults, keyed by short name
    pub fn defaults_document(&self) -> BsonDocument {
        self.collapse_document(&BsonDocument::new())
    }

    /// Convert a canonical-keyed document into its stored form
    ///
    /// Undeclared keys and null values are dropped; declared fields that are
    /// absent receive their explicit defaults.
    pub fn collapse_document(&self, doc: &BsonDocument) -> BsonDocument {
        let mut out = BsonDocument::new();
        for field in &self.fields {
            let value = match doc.get(field.name()) {
                Some(Bson::Null) => continue,
                Some(value) => value.clone(),
                None if field.has_default() => field.make(),
                None => continue,
            };
            if matches!(value, Bson::Null) {
                continue;
            }
            out.insert(
                self.long_to_short(field.name()).to_string(),
                field.spec().collapse(&value),
            );
        }
        out
    }

    /// Convert a stored document back into canonical keys and user-visible values
    pub fn expand_document(&self, doc: &BsonDocument) -> BsonDocument {
        let mut out = BsonDocument::new();
        for field in &self.fields {
            let short = self.long_to_short(field.name());
            let value = match doc.get(short) {
                Some(value) => field.spec().expand(value),
                None if field.has_default() => field.make(),
                None => continue,
            };
            if !matches!(value, Bson::Null) {
                out.insert(field.name(), value);
            }
        }
        out
    }
}

/// Builder for [`DocumentSchema`]; all checks run in [`SchemaBuilder::build`]
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    name: String,
    parents: Vec<Arc<DocumentSchema>>,
    nested: HashMap<String, Arc<DocumentSchema>>,
    structure: Vec<(String, SpecDecl)>,
    required: Vec<String>,
    write_once: Vec<String>,
    defaults: Vec<(String, DefaultValue)>,
    field_map: Vec<(String, String)>,
    database: Option<String>,
    collection: Option<String>,
    connection: Option<String>,
}

impl SchemaBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parents: Vec::new(),
            nested: HashMap::new(),
            structure: Vec::new(),
            required: Vec::new(),
            write_once: Vec::new(),
            defaults: Vec::new(),
            field_map: Vec::new(),
            database: None,
            collection: None,
            connection: None,
        }
    }

    /// Inherit everything declared by `parent`
    pub fn extends(mut self, parent: &Arc<DocumentSchema>) -> Self {
        self.parents.push(Arc::clone(parent));
        self
    }

    /// Make `schema` resolvable by name inside textual field types
    pub fn nested(mut self, schema: &Arc<DocumentSchema>) -> Self {
        self.nested
            .insert(schema.name().to_string(), Arc::clone(schema));
        self
    }

    /// Declare a field
    pub fn field(mut self, name: impl Into<String>, spec: impl Into<SpecDecl>) -> Self {
        self.structure.push((name.into(), spec.into()));
        self
    }

    /// Mark a field as required before save
    pub fn required(mut self, name: impl Into<String>) -> Self {
        self.required.push(name.into());
        self
    }

    /// Mark a field as assignable only while unset
    pub fn write_once(mut self, name: impl Into<String>) -> Self {
        self.write_once.push(name.into());
        self
    }

    /// Give a field a fixed default
    pub fn default(mut self, name: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.defaults
            .push((name.into(), DefaultValue::Value(value.into())));
        self
    }

    /// Give a field a default factory
    pub fn default_with<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Bson + Send + Sync + 'static,
    {
        self.defaults
            .push((name.into(), DefaultValue::Factory(Arc::new(factory))));
        self
    }

    /// Store the field `name` under the key `short`
    pub fn short_name(mut self, name: impl Into<String>, short: impl Into<String>) -> Self {
        self.field_map.push((name.into(), short.into()));
        self
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Override the collection name (default: the lower-cased schema name)
    pub fn collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    pub fn connection(mut self, connection: impl Into<String>) -> Self {
        self.connection = Some(connection.into());
        self
    }

    /// Merge with the parents, check every declaration and produce the schema
    pub fn build(self) -> Result<Arc<DocumentSchema>> {
        let SchemaBuilder {
            name,
            parents,
            nested,
            structure,
            required,
            write_once,
            defaults,
            field_map,
            database,
            collection,
            connection,
        } = self;

        let resolve = |type_name: &str| nested.get(type_name).cloned();

        // Own declarations
        let mut own: Vec<(String, TypeSpec)> = Vec::with_capacity(structure.len());
        for (field_name, decl) in structure {
            ValidatedFieldName::new(&field_name)?;
            if own.iter().any(|(n, _)| *n == field_name) {
                return Err(OdmError::Schema(format!(
                    "field '{}' is declared twice in '{}'",
                    field_name, name
                )));
            }
            let spec = match decl {
                SpecDecl::Spec(spec) => spec,
                SpecDecl::Text(text) => TypeSpec::parse_with(&text, resolve)?,
            };
            own.push((field_name, spec));
        }

        let mut own_defaults: HashMap<String, DefaultValue> = HashMap::new();
        for (field_name, default) in defaults {
            if own_defaults.insert(field_name.clone(), default).is_some() {
                return Err(OdmError::Schema(format!(
                    "default for '{}' is declared twice in '{}'",
                    field_name, name
                )));
            }
        }

        let mut own_map: HashMap<String, String> = HashMap::new();
        for (long, short) in field_map {
            ValidatedFieldName::new(&short)?;
            if long == ID_FIELD {
                return Err(OdmError::Schema(format!(
                    "'{}' cannot be stored under another name",
                    ID_FIELD
                )));
            }
            if own_map.insert(long.clone(), short).is_some() {
                return Err(OdmError::Schema(format!(
                    "short name for '{}' is declared twice in '{}'",
                    long, name
                )));
            }
        }

        // Merge parents into the child, complaining about duplicates
        let mut structure: Vec<(String, TypeSpec)> = Vec::new();
        let mut merged_defaults = own_defaults;
        let mut merged_map = own_map;
        let mut merged_required: BTreeSet<String> = required.into_iter().collect();
        let mut merged_write_once: BTreeSet<String> = write_once.into_iter().collect();

        for parent in &parents {
            for field in parent.fields() {
                if field.name() == ID_FIELD {
                    continue;
                }
                if own.iter().any(|(n, _)| n == field.name())
                    || structure.iter().any(|(n, _)| n == field.name())
                {
                    return Err(duplicate(field.name(), "structure", parent));
                }
                structure.push((field.name().to_string(), field.spec().clone()));
                if let Some(default) = field.explicit_default() {
                    if merged_defaults.contains_key(field.name()) {
                        return Err(duplicate(field.name(), "default_values", parent));
                    }
                    merged_defaults.insert(field.name().to_string(), default.clone());
                }
            }
            for (long, short) in parent.field_map() {
                if merged_map.contains_key(long) {
                    return Err(duplicate(long, "field_map", parent));
                }
                merged_map.insert(long.clone(), short.clone());
            }
            merged_required.extend(parent.required().iter().cloned());
            merged_write_once.extend(parent.write_once().iter().cloned());
        }

        // _id comes first; a child may redeclare it
        let id_spec = own
            .iter()
            .position(|(n, _)| n == ID_FIELD)
            .map(|i| own.remove(i).1)
            .unwrap_or(TypeSpec::ObjectId);
        let mut ordered = Vec::with_capacity(1 + structure.len() + own.len());
        ordered.push((ID_FIELD.to_string(), id_spec));
        ordered.extend(structure);
        ordered.extend(own);

        let declared = |field_name: &str| ordered.iter().any(|(n, _)| n == field_name);
        for (table, names) in [
            ("required", merged_required.iter().collect::<Vec<_>>()),
            ("write_once", merged_write_once.iter().collect()),
            ("default_values", merged_defaults.keys().collect()),
            ("field_map", merged_map.keys().collect()),
        ] {
            if let Some(unknown) = names.into_iter().find(|n| !declared(n.as_str())) {
                return Err(OdmError::Schema(format!(
                    "{} entry '{}' of '{}' names an undeclared field",
                    table, unknown, name
                )));
            }
        }

        let mut inverse_field_map = HashMap::with_capacity(merged_map.len());
        for (long, short) in &merged_map {
            if let Some(other) = inverse_field_map.insert(short.clone(), long.clone()) {
                return Err(OdmError::Schema(format!(
                    "fields '{}' and '{}' share the short name '{}'",
                    other, long, short
                )));
            }
            if short != long && declared(short.as_str()) && !merged_map.contains_key(short.as_str()) {
                return Err(OdmError::Schema(format!(
                    "short name '{}' of '{}' collides with a declared field",
                    short, long
                )));
            }
        }

        let mut fields = Vec::with_capacity(ordered.len());
        let mut index = HashMap::with_capacity(ordered.len());
        for (field_name, spec) in ordered {
            let field = Field::new(field_name.clone(), spec)
                .required(merged_required.contains(&field_name))
                .write_once(merged_write_once.contains(&field_name))
                .read_only(field_name == ID_FIELD)
                .with_default(merged_defaults.remove(&field_name));
            field.check()?;
            index.insert(field_name, fields.len());
            fields.push(field);
        }

        let collection = match collection {
            Some(collection) => collection,
            None => name.to_lowercase(),
        };
        let collection = ValidatedCollectionName::new(&collection)?.into_string();

        let database = database.or_else(|| parents.iter().find_map(|p| p.database.clone()));
        let connection =
            connection.or_else(|| parents.iter().find_map(|p| p.connection.clone()));

        tracing::debug!(
            schema = %name,
            collection = %collection,
            fields = fields.len(),
            parents = parents.len(),
            "Built document schema"
        );

        Ok(Arc::new(DocumentSchema {
            parents: parents.iter().map(|p| p.name.clone()).collect(),
            name,
            fields,
            index,
            field_map: merged_map,
            inverse_field_map,
            required: merged_required,
            write_once: merged_write_once,
            database,
            collection,
            connection,
        }))
    }
}

fn duplicate(key: &str, table: &str, parent: &DocumentSchema) -> OdmError {
    OdmError::Schema(format!(
        "duplicate '{}' of {} appears in base '{}'",
        key,
        table,
        parent.name()
    ))
}
