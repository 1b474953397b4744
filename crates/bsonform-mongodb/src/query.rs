//! Queries over a model's collection

use bson::{Bson, Document as BsonDocument};
use bsonform_common::Result;
use bsonform_schema::{DocumentSchema, TypeSpec};
use futures::TryStreamExt;

use crate::backend::FindOptions;
use crate::cursor::DocumentCursor;
use crate::document::Document;
use crate::model::Model;

/// Where a path segment points while mapping a dotted key
#[derive(Clone, Copy)]
enum Target<'a> {
    Schema(&'a DocumentSchema),
    Spec(&'a TypeSpec),
    Opaque,
}

impl<'a> Target<'a> {
    /// Step through embedded-document specs into their schema
    fn resolve(self) -> Self {
        match self {
            Target::Spec(TypeSpec::Document(schema)) => Target::Schema(schema),
            other => other,
        }
    }

    fn schema(self) -> Option<&'a DocumentSchema> {
        match self.resolve() {
            Target::Schema(schema) => Some(schema),
            Target::Spec(TypeSpec::List(element) | TypeSpec::Set(element)) => {
                match element.as_ref() {
                    TypeSpec::Document(schema) => Some(schema),
                    _ => None,
                }
            }
            _ => None,
        }
    }
}

fn field_target<'a>(schema: &'a DocumentSchema, name: &str) -> Target<'a> {
    schema
        .field(name)
        .map_or(Target::Opaque, |field| Target::Spec(field.spec()))
}

/// Map a dotted path of canonical names into stored keys
///
/// Returns the mapped path and the schema its value follows, if any.
fn map_path<'a>(schema: &'a DocumentSchema, path: &str) -> (String, Option<&'a DocumentSchema>) {
    let mut segments = Vec::new();
    let mut target = Target::Schema(schema);

    for segment in path.split('.') {
        let is_index = segment.parse::<usize>().is_ok();
        target = match target.resolve() {
            Target::Schema(current) => {
                segments.push(current.long_to_short(segment).to_string());
                field_target(current, segment)
            }
            Target::Spec(TypeSpec::List(element) | TypeSpec::Set(element)) if is_index => {
                segments.push(segment.to_string());
                Target::Spec(element)
            }
            // `items.name` reaches into every element of an array of documents
            Target::Spec(TypeSpec::List(element) | TypeSpec::Set(element)) => {
                match element.as_ref() {
                    TypeSpec::Document(nested) => {
                        segments.push(nested.long_to_short(segment).to_string());
                        field_target(nested, segment)
                    }
                    _ => {
                        segments.push(segment.to_string());
                        Target::Opaque
                    }
                }
            }
            Target::Spec(TypeSpec::FixedList(items)) => {
                segments.push(segment.to_string());
                segment
                    .parse::<usize>()
                    .ok()
                    .and_then(|index| items.get(index))
                    .map_or(Target::Opaque, Target::Spec)
            }
            _ => {
                segments.push(segment.to_string());
                Target::Opaque
            }
        };
    }

    (segments.join("."), target.schema())
}

fn map_value(schema: Option<&DocumentSchema>, value: &Bson) -> Bson {
    match (schema, value) {
        (Some(schema), Bson::Document(doc)) => Bson::Document(map_query(schema, doc)),
        (Some(_), Bson::Array(items)) => {
            Bson::Array(items.iter().map(|item| map_value(schema, item)).collect())
        }
        _ => value.clone(),
    }
}

/// Rewrite the canonical field names in a filter, sort, projection or update
/// document into the stored keys of `schema`
///
/// Operator keys (`$and`, `$set`, ...) are kept and their bodies mapped in
/// the same schema. Paths into embedded documents are mapped through the
/// nested schemas.
pub fn map_query(schema: &DocumentSchema, query: &BsonDocument) -> BsonDocument {
    let mut mapped = BsonDocument::new();
    for (key, value) in query {
        if key.starts_with('$') {
            mapped.insert(key.clone(), map_value(Some(schema), value));
        } else {
            let (path, nested) = map_path(schema, key);
            mapped.insert(path, map_value(nested, value));
        }
    }
    mapped
}

/// Find builder for one model
///
/// Keys in the filter, sort and projection are canonical names; they are
/// mapped to stored keys when the query runs.
#[derive(Debug, Clone)]
pub struct Query {
    model: Model,
    filter: BsonDocument,
    options: FindOptions,
}

impl Query {
    pub fn new(model: Model, filter: BsonDocument) -> Self {
        Self {
            model,
            filter,
            options: FindOptions::default(),
        }
    }

    /// Set the sort order
    pub fn sort(mut self, sort: BsonDocument) -> Self {
        self.options.sort = Some(sort);
        self
    }

    /// Set the number of documents to skip
    pub fn skip(mut self, skip: u64) -> Self {
        self.options.skip = Some(skip);
        self
    }

    /// Set the maximum number of documents to return
    pub fn limit(mut self, limit: i64) -> Self {
        self.options.limit = Some(limit);
        self
    }

    /// Only fetch the given fields (`{name: 1}`)
    pub fn projection(mut self, projection: BsonDocument) -> Self {
        self.options.projection = Some(projection);
        self
    }

    pub fn get_filter(&self) -> &BsonDocument {
        &self.filter
    }

    pub fn get_options(&self) -> &FindOptions {
        &self.options
    }

    /// Filter and options as they are sent to the backend
    pub fn mapped(&self) -> (BsonDocument, FindOptions) {
        let schema = self.model.schema();
        let options = FindOptions {
            sort: self.options.sort.as_ref().map(|s| map_query(schema, s)),
            skip: self.options.skip,
            limit: self.options.limit,
            projection: self.options.projection.as_ref().map(|p| map_query(schema, p)),
        };
        (map_query(schema, &self.filter), options)
    }

    /// Run the query and stream the matching documents
    pub async fn cursor(self) -> Result<DocumentCursor> {
        let (filter, options) = self.mapped();
        let collection = self.model.collection()?;
        tracing::debug!(
            collection = collection.name(),
            filter = %filter,
            "Finding documents"
        );
        let stream = collection.find(filter, options).await?;
        Ok(DocumentCursor::new(self.model, stream))
    }

    /// Run the query and collect every matching document
    pub async fn to_vec(self) -> Result<Vec<Document>> {
        self.cursor().await?.try_collect().await
    }

    /// Run the query for its first document
    pub async fn first(self) -> Result<Option<Document>> {
        let mut cursor = self.limit(1).cursor().await?;
        cursor.try_next().await
    }
}
