//! In-memory backend
//!
//! A thread-safe, process-local implementation of the backend traits. It
//! understands the subset of MongoDB's filter and update language that
//! documents and models produce, which makes it suitable for tests and local
//! development without a server.
//!
//! Supported filters: equality on top-level or dotted paths (an array field
//! matches when any element is equal), `$eq $ne $gt $gte $lt $lte $in $nin
//! $exists`, and `$and`/`$or`.
//!
//! Supported updates: `$set $unset $inc $push $pullAll $addToSet
//! $setOnInsert`, with `$each` for `$push` and `$addToSet`.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bson::{oid::ObjectId, Bson, Document as BsonDocument};
use bsonform_common::{OdmError, Result};
use futures::StreamExt;
use parking_lot::RwLock;

use crate::backend::{CollectionBackend, DatabaseBackend, FindOptions, RawDocumentStream};

type CollectionKey = (String, String);

/// In-process database server
///
/// Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    collections: Arc<RwLock<HashMap<CollectionKey, Arc<MemoryCollection>>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn get_or_create(&self, database: &str, collection: &str) -> Arc<MemoryCollection> {
        let key = (database.to_string(), collection.to_string());
        if let Some(existing) = self.collections.read().get(&key) {
            return Arc::clone(existing);
        }
        let mut collections = self.collections.write();
        Arc::clone(
            collections
                .entry(key)
                .or_insert_with(|| Arc::new(MemoryCollection::new(collection))),
        )
    }

    /// Snapshot of every document stored in a collection, in insertion order
    pub fn documents(&self, database: &str, collection: &str) -> Vec<BsonDocument> {
        self.get_or_create(database, collection).documents.read().clone()
    }

    /// Index key documents created on a collection
    pub fn indexes(&self, database: &str, collection: &str) -> Vec<BsonDocument> {
        self.get_or_create(database, collection).indexes.read().clone()
    }

    /// Names of the collections that currently hold documents in `database`
    pub fn collection_names(&self, database: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .collections
            .read()
            .iter()
            .filter(|((db, _), coll)| db == database && !coll.documents.read().is_empty())
            .map(|((_, name), _)| name.clone())
            .collect();
        names.sort();
        names
    }
}

impl DatabaseBackend for MemoryBackend {
    fn collection(&self, database: &str, collection: &str) -> Arc<dyn CollectionBackend> {
        self.get_or_create(database, collection)
    }
}

/// One in-memory collection
#[derive(Debug)]
pub struct MemoryCollection {
    name: String,
    documents: RwLock<Vec<BsonDocument>>,
    indexes: RwLock<Vec<BsonDocument>>,
}

impl MemoryCollection {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            documents: RwLock::new(Vec::new()),
            indexes: RwLock::new(Vec::new()),
        }
    }
}

#[async_trait]
impl CollectionBackend for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn find_one_and_update(
        &self,
        filter: BsonDocument,
        update: BsonDocument,
        upsert: bool,
    ) -> Result<Option<BsonDocument>> {
        let mut documents = self.documents.write();

        for stored in documents.iter_mut() {
            if matches_filter(stored, &filter)? {
                let mut updated = stored.clone();
                apply_update(&mut updated, &update, false)?;
                *stored = updated.clone();
                return Ok(Some(updated));
            }
        }

        if !upsert {
            return Ok(None);
        }

        let mut created = upsert_seed(&filter);
        apply_update(&mut created, &update, true)?;
        if !created.contains_key("_id") {
            let mut with_id = BsonDocument::new();
            with_id.insert("_id", ObjectId::new());
            for (key, value) in created {
                with_id.insert(key, value);
            }
            created = with_id;
        }
        tracing::debug!(collection = %self.name, id = ?created.get("_id"), "Upserted document");
        documents.push(created.clone());
        Ok(Some(created))
    }

    async fn find(&self, filter: BsonDocument, options: FindOptions) -> Result<RawDocumentStream> {
        let mut found = Vec::new();
        for stored in self.documents.read().iter() {
            if matches_filter(stored, &filter)? {
                found.push(stored.clone());
            }
        }

        if let Some(sort) = &options.sort {
            found.sort_by(|a, b| compare_for_sort(a, b, sort));
        }

        let skip = options.skip.unwrap_or(0) as usize;
        let found = found.into_iter().skip(skip);
        let found: Vec<BsonDocument> = match options.limit {
            Some(limit) if limit != 0 => found.take(limit.unsigned_abs() as usize).collect(),
            _ => found.collect(),
        };

        let found = match &options.projection {
            Some(projection) => found.iter().map(|d| project(d, projection)).collect(),
            None => found,
        };

        Ok(futures::stream::iter(found.into_iter().map(Ok)).boxed())
    }

    async fn update_many(&self, filter: BsonDocument, update: BsonDocument) -> Result<u64> {
        let mut modified = 0;
        for stored in self.documents.write().iter_mut() {
            if matches_filter(stored, &filter)? {
                let mut updated = stored.clone();
                apply_update(&mut updated, &update, false)?;
                if updated != *stored {
                    *stored = updated;
                    modified += 1;
                }
            }
        }
        Ok(modified)
    }

    async fn delete_one(&self, filter: BsonDocument) -> Result<bool> {
        let mut documents = self.documents.write();
        let mut position = None;
        for (index, stored) in documents.iter().enumerate() {
            if matches_filter(stored, &filter)? {
                position = Some(index);
                break;
            }
        }
        match position {
            Some(index) => {
                documents.remove(index);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn ensure_index(&self, keys: BsonDocument) -> Result<()> {
        let mut indexes = self.indexes.write();
        if !indexes.contains(&keys) {
            indexes.push(keys);
        }
        Ok(())
    }
}

// ============================================================================
// Paths
// ============================================================================

fn get_path<'a>(doc: &'a BsonDocument, path: &str) -> Option<&'a Bson> {
    match path.split_once('.') {
        None => doc.get(path),
        Some((head, rest)) => get_in_value(doc.get(head)?, rest),
    }
}

fn get_in_value<'a>(value: &'a Bson, path: &str) -> Option<&'a Bson> {
    match value {
        Bson::Document(doc) => get_path(doc, path),
        Bson::Array(items) => {
            let (head, rest) = match path.split_once('.') {
                Some((head, rest)) => (head, Some(rest)),
                None => (path, None),
            };
            let item = items.get(head.parse::<usize>().ok()?)?;
            match rest {
                Some(rest) => get_in_value(item, rest),
                None => Some(item),
            }
        }
        _ => None,
    }
}

fn set_path(doc: &mut BsonDocument, path: &str, value: Bson) -> Result<()> {
    match path.split_once('.') {
        None => {
            doc.insert(path, value);
            Ok(())
        }
        Some((head, rest)) => {
            if !doc.contains_key(head) {
                doc.insert(head, BsonDocument::new());
            }
            match doc.get_mut(head) {
                Some(child) => set_in_value(child, rest, value),
                None => Err(OdmError::Internal(format!("lost path segment '{}'", head))),
            }
        }
    }
}

fn set_in_value(target: &mut Bson, path: &str, value: Bson) -> Result<()> {
    match target {
        Bson::Document(doc) => set_path(doc, path, value),
        Bson::Array(items) => {
            let (head, rest) = match path.split_once('.') {
                Some((head, rest)) => (head, Some(rest)),
                None => (path, None),
            };
            let slot = head
                .parse::<usize>()
                .ok()
                .and_then(|index| items.get_mut(index))
                .ok_or_else(|| {
                    OdmError::Query(format!("cannot address array element '{}'", head))
                })?;
            match rest {
                Some(rest) => set_in_value(slot, rest, value),
                None => {
                    *slot = value;
                    Ok(())
                }
            }
        }
        _ => Err(OdmError::Query(format!(
            "cannot create field '{}' inside a scalar value",
            path
        ))),
    }
}

fn remove_path(doc: &mut BsonDocument, path: &str) {
    match path.split_once('.') {
        None => {
            doc.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Bson::Document(child)) = doc.get_mut(head) {
                remove_path(child, rest);
            }
        }
    }
}

// ============================================================================
// Comparison
// ============================================================================

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(f64::from(*n)),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(n) => Some(*n),
        _ => None,
    }
}

fn values_equal(a: &Bson, b: &Bson) -> bool {
    match (as_f64(a), as_f64(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Order two values of the same kind; `None` when they are not comparable
fn compare_values(a: &Bson, b: &Bson) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (as_f64(a), as_f64(b)) {
        return x.partial_cmp(&y);
    }
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => Some(x.cmp(y)),
        (Bson::DateTime(x), Bson::DateTime(y)) => Some(x.cmp(y)),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => Some(x.cmp(y)),
        (Bson::Boolean(x), Bson::Boolean(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Rank of a value in MongoDB's cross-type sort order
fn type_rank(value: Option<&Bson>) -> u8 {
    match value {
        None | Some(Bson::Null) => 1,
        Some(Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_)) => 2,
        Some(Bson::String(_) | Bson::Symbol(_)) => 3,
        Some(Bson::Document(_)) => 4,
        Some(Bson::Array(_)) => 5,
        Some(Bson::Binary(_)) => 6,
        Some(Bson::ObjectId(_)) => 7,
        Some(Bson::Boolean(_)) => 8,
        Some(Bson::DateTime(_)) => 9,
        Some(Bson::Timestamp(_)) => 10,
        Some(_) => 11,
    }
}

fn compare_for_sort(a: &BsonDocument, b: &BsonDocument, sort: &BsonDocument) -> Ordering {
    for (key, direction) in sort {
        let left = get_path(a, key);
        let right = get_path(b, key);
        let ordering = type_rank(left).cmp(&type_rank(right)).then_with(|| {
            match (left, right) {
                (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
                _ => Ordering::Equal,
            }
        });
        let ordering = if as_f64(direction).is_some_and(|d| d < 0.0) {
            ordering.reverse()
        } else {
            ordering
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(b) => *b,
        Bson::Null => false,
        other => as_f64(other).map_or(true, |n| n != 0.0),
    }
}

// ============================================================================
// Filters
// ============================================================================

fn is_operator_document(value: &Bson) -> bool {
    match value {
        Bson::Document(doc) => !doc.is_empty() && doc.keys().all(|k| k.starts_with('$')),
        _ => false,
    }
}

fn matches_filter(doc: &BsonDocument, filter: &BsonDocument) -> Result<bool> {
    for (key, condition) in filter {
        let matched = match key.as_str() {
            "$and" => {
                let mut all = true;
                for sub in sub_filters(key, condition)? {
                    if !matches_filter(doc, sub)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => {
                let mut any = false;
                for sub in sub_filters(key, condition)? {
                    if matches_filter(doc, sub)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            op if op.starts_with('$') => {
                return Err(OdmError::Query(format!(
                    "unsupported top-level operator '{}'",
                    op
                )))
            }
            path => matches_condition(get_path(doc, path), condition)?,
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn sub_filters<'a>(operator: &str, value: &'a Bson) -> Result<Vec<&'a BsonDocument>> {
    let items = match value {
        Bson::Array(items) => items,
        _ => {
            return Err(OdmError::Query(format!(
                "'{}' expects an array of filters",
                operator
            )))
        }
    };
    items
        .iter()
        .map(|item| match item {
            Bson::Document(doc) => Ok(doc),
            _ => Err(OdmError::Query(format!(
                "'{}' expects an array of filters",
                operator
            ))),
        })
        .collect()
}

fn equals(actual: Option<&Bson>, expected: &Bson) -> bool {
    match actual {
        None => matches!(expected, Bson::Null),
        Some(value @ Bson::Array(items)) => {
            values_equal(value, expected) || items.iter().any(|item| values_equal(item, expected))
        }
        Some(value) => values_equal(value, expected),
    }
}

fn compares(actual: Option<&Bson>, expected: &Bson, accept: fn(Ordering) -> bool) -> bool {
    let check = |value: &Bson| compare_values(value, expected).is_some_and(accept);
    match actual {
        None => false,
        Some(Bson::Array(items)) => items.iter().any(check),
        Some(value) => check(value),
    }
}

fn matches_condition(actual: Option<&Bson>, condition: &Bson) -> Result<bool> {
    let operators = match condition {
        Bson::Document(ops) if is_operator_document(condition) => ops,
        _ => return Ok(equals(actual, condition)),
    };

    for (op, operand) in operators {
        let matched = match op.as_str() {
            "$eq" => equals(actual, operand),
            "$ne" => !equals(actual, operand),
            "$gt" => compares(actual, operand, |o| o == Ordering::Greater),
            "$gte" => compares(actual, operand, |o| o != Ordering::Less),
            "$lt" => compares(actual, operand, |o| o == Ordering::Less),
            "$lte" => compares(actual, operand, |o| o != Ordering::Greater),
            "$in" | "$nin" => {
                let candidates = match operand {
                    Bson::Array(items) => items,
                    _ => return Err(OdmError::Query(format!("'{}' expects an array", op))),
                };
                let found = candidates.iter().any(|c| equals(actual, c));
                if op == "$in" {
                    found
                } else {
                    !found
                }
            }
            "$exists" => truthy(operand) == actual.is_some(),
            other => {
                return Err(OdmError::Query(format!(
                    "unsupported query operator '{}'",
                    other
                )))
            }
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Equality fields of a filter, used as the starting point of an upsert
fn upsert_seed(filter: &BsonDocument) -> BsonDocument {
    let mut seed = BsonDocument::new();
    for (key, condition) in filter {
        if key.starts_with('$') {
            continue;
        }
        let value = match condition {
            Bson::Document(ops) if is_operator_document(condition) => match ops.get("$eq") {
                Some(value) => value.clone(),
                None => continue,
            },
            value => value.clone(),
        };
        // Seeding only fails on conflicting paths, which the update would reject anyway
        let _ = set_path(&mut seed, key, value);
    }
    seed
}

// ============================================================================
// Updates
// ============================================================================

fn operator_body<'a>(op: &str, value: &'a Bson) -> Result<&'a BsonDocument> {
    match value {
        Bson::Document(doc) => Ok(doc),
        _ => Err(OdmError::Query(format!("'{}' expects a document", op))),
    }
}

/// Values for `$push`/`$addToSet`: `{$each: [...]}` or a single value
fn each_values(value: &Bson) -> Vec<Bson> {
    match value {
        Bson::Document(doc) => match doc.get("$each") {
            Some(Bson::Array(items)) => items.clone(),
            _ => vec![value.clone()],
        },
        other => vec![other.clone()],
    }
}

fn existing_array(doc: &BsonDocument, key: &str, op: &str) -> Result<Vec<Bson>> {
    match get_path(doc, key) {
        None | Some(Bson::Null) => Ok(Vec::new()),
        Some(Bson::Array(items)) => Ok(items.clone()),
        Some(other) => Err(OdmError::Query(format!(
            "cannot apply '{}' to non-array field '{}' of type {}",
            op,
            key,
            bsonform_schema::bson_type_name(other)
        ))),
    }
}

fn add_numbers(current: &Bson, delta: &Bson) -> Option<Bson> {
    match (current, delta) {
        (Bson::Int32(a), Bson::Int32(b)) => Some(
            a.checked_add(*b)
                .map(Bson::Int32)
                .unwrap_or_else(|| Bson::Int64(i64::from(*a) + i64::from(*b))),
        ),
        (Bson::Int32(a), Bson::Int64(b)) => Some(Bson::Int64(i64::from(*a).wrapping_add(*b))),
        (Bson::Int64(a), Bson::Int32(b)) => Some(Bson::Int64(a.wrapping_add(i64::from(*b)))),
        (Bson::Int64(a), Bson::Int64(b)) => Some(Bson::Int64(a.wrapping_add(*b))),
        _ => Some(Bson::Double(as_f64(current)? + as_f64(delta)?)),
    }
}

fn apply_update(doc: &mut BsonDocument, update: &BsonDocument, inserting: bool) -> Result<()> {
    if update.keys().any(|k| !k.starts_with('$')) {
        return Err(OdmError::Query(
            "update document must contain only update operators".to_string(),
        ));
    }

    for (op, body) in update {
        let body = operator_body(op, body)?;
        match op.as_str() {
            "$set" => {
                for (key, value) in body {
                    set_path(doc, key, value.clone())?;
                }
            }
            "$setOnInsert" => {
                if inserting {
                    for (key, value) in body {
                        set_path(doc, key, value.clone())?;
                    }
                }
            }
            "$unset" => {
                for key in body.keys() {
                    remove_path(doc, key);
                }
            }
            "$inc" => {
                for (key, delta) in body {
                    if as_f64(delta).is_none() {
                        return Err(OdmError::Query(format!(
                            "cannot increment '{}' by a non-numeric value",
                            key
                        )));
                    }
                    let current = get_path(doc, key).cloned().unwrap_or(Bson::Int32(0));
                    let next = add_numbers(&current, delta).ok_or_else(|| {
                        OdmError::Query(format!(
                            "cannot increment non-numeric field '{}' of type {}",
                            key,
                            bsonform_schema::bson_type_name(&current)
                        ))
                    })?;
                    set_path(doc, key, next)?;
                }
            }
            "$push" => {
                for (key, value) in body {
                    let mut items = existing_array(doc, key, op)?;
                    items.extend(each_values(value));
                    set_path(doc, key, Bson::Array(items))?;
                }
            }
            "$addToSet" => {
                for (key, value) in body {
                    let mut items = existing_array(doc, key, op)?;
                    for item in each_values(value) {
                        if !items.iter().any(|existing| values_equal(existing, &item)) {
                            items.push(item);
                        }
                    }
                    set_path(doc, key, Bson::Array(items))?;
                }
            }
            "$pullAll" => {
                for (key, value) in body {
                    let removals = match value {
                        Bson::Array(items) => items,
                        _ => return Err(OdmError::Query("'$pullAll' expects arrays".to_string())),
                    };
                    if get_path(doc, key).is_none() {
                        continue;
                    }
                    let mut items = existing_array(doc, key, op)?;
                    items.retain(|item| !removals.iter().any(|r| values_equal(item, r)));
                    set_path(doc, key, Bson::Array(items))?;
                }
            }
            other => {
                return Err(OdmError::Query(format!(
                    "unsupported update operator '{}'",
                    other
                )))
            }
        }
    }
    Ok(())
}

// ============================================================================
// Projection
// ============================================================================

fn project(doc: &BsonDocument, projection: &BsonDocument) -> BsonDocument {
    let including = projection
        .iter()
        .any(|(key, flag)| key != "_id" && truthy(flag));

    if including {
        let mut out = BsonDocument::new();
        let keep_id = projection.get("_id").map_or(true, truthy);
        if keep_id {
            if let Some(id) = doc.get("_id") {
                out.insert("_id", id.clone());
            }
        }
        for (key, flag) in projection {
            if key == "_id" || !truthy(flag) {
                continue;
            }
            if let Some(value) = get_path(doc, key) {
                // Keeps nested paths nested, like the server does
                let _ = set_path(&mut out, key, value.clone());
            }
        }
        out
    } else {
        let mut out = doc.clone();
        for (key, flag) in projection {
            if !truthy(flag) {
                remove_path(&mut out, key);
            }
        }
        out
    }
}
