//! Change-tracked container fields
//!
//! Lists, sets and free-form maps stored in a document are edited in place
//! through short-lived handles that borrow the document. Each mutation is
//! validated against the field's element type, stored in collapsed form and
//! marks the field dirty, so the whole container is written with `$set` on
//! the next save.
//!
//! ```ignore
//! doc.list_mut("events")?.push(3)?;
//! doc.set_mut("tags")?.insert("rust")?;
//! doc.map_mut("extra")?.insert("color", "red")?;
//! ```

use bson::{Bson, Document as BsonDocument};
use bsonform_common::{OdmError, Result};
use bsonform_schema::{bson_type_name, Field, TypeSpec, ValidatedFieldName};

use crate::document::Document;

impl Document {
    /// Edit a list or fixed-list field in place
    pub fn list_mut(&mut self, name: &str) -> Result<TrackedList<'_>> {
        let field = self.declared_field(name)?;
        match field.spec() {
            TypeSpec::List(_) | TypeSpec::FixedList(_) => {
                let fallback = match field.spec().collapse(&field.make()) {
                    Bson::Array(items) => items,
                    _ => Vec::new(),
                };
                Ok(TrackedList {
                    doc: self,
                    field,
                    fallback,
                })
            }
            other => Err(kind_mismatch(name, other, "a list")),
        }
    }

    /// Edit a set field in place
    pub fn set_mut(&mut self, name: &str) -> Result<TrackedSet<'_>> {
        let field = self.declared_field(name)?;
        match field.spec() {
            TypeSpec::Set(element) => {
                let element = (**element).clone();
                Ok(TrackedSet {
                    doc: self,
                    field,
                    element,
                })
            }
            other => Err(kind_mismatch(name, other, "a set")),
        }
    }

    /// Edit an `any` field holding an embedded document in place
    pub fn map_mut(&mut self, name: &str) -> Result<TrackedMap<'_>> {
        let field = self.declared_field(name)?;
        if *field.spec() != TypeSpec::Any {
            return Err(kind_mismatch(name, field.spec(), "a map"));
        }
        if let Some(other) = self.get(name).filter(|v| !matches!(v, Bson::Document(_))) {
            return Err(OdmError::Field(format!(
                "'{}' holds {} instead of a document",
                name,
                bson_type_name(other)
            )));
        }
        Ok(TrackedMap { doc: self, field })
    }
}

fn kind_mismatch(name: &str, spec: &TypeSpec, wanted: &str) -> OdmError {
    OdmError::Field(format!(
        "'{}' of type '{}' is not {}",
        name,
        spec.type_name(),
        wanted
    ))
}

fn out_of_range(name: &str, index: usize, len: usize) -> OdmError {
    OdmError::Field(format!(
        "index {} is out of range for '{}' (length {})",
        index, name, len
    ))
}

/// Handle over a list (`[T]`) or fixed-list (`[A, B]`) field
///
/// Fixed lists keep their length, so only [`TrackedList::replace`] is
/// accepted on them.
pub struct TrackedList<'a> {
    doc: &'a mut Document,
    field: Field,
    /// What the field reads as while it is unset
    fallback: Vec<Bson>,
}

impl<'a> TrackedList<'a> {
    fn stored(&self) -> &[Bson] {
        match self.doc.get(self.field.name()) {
            Some(Bson::Array(items)) => items,
            _ => &self.fallback,
        }
    }

    fn element_at(&self, index: usize) -> Option<&TypeSpec> {
        match self.field.spec() {
            TypeSpec::List(element) => Some(element),
            TypeSpec::FixedList(items) => items.get(index),
            _ => None,
        }
    }

    fn is_fixed(&self) -> bool {
        matches!(self.field.spec(), TypeSpec::FixedList(_))
    }

    /// Validate and collapse `value` for position `index`
    fn prepare(&self, index: usize, value: Bson) -> Result<Bson> {
        let path = format!("{}.{}", self.field.name(), index);
        let element = self
            .element_at(index)
            .ok_or_else(|| out_of_range(self.field.name(), index, self.len()))?;
        element.validate(&path, &value)?;
        Ok(element.collapse(&value))
    }

    fn check_growable(&self, op: &str) -> Result<()> {
        self.doc.check_writable(&self.field)?;
        if self.is_fixed() {
            return Err(OdmError::Field(format!(
                "cannot {} on fixed-length '{}'",
                op,
                self.field.name()
            )));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.stored().len()
    }

    pub fn is_empty(&self) -> bool {
        self.stored().is_empty()
    }

    /// User-visible element at `index`
    pub fn get(&self, index: usize) -> Option<Bson> {
        let item = self.stored().get(index)?;
        Some(match self.element_at(index) {
            Some(element) => element.expand(item),
            None => item.clone(),
        })
    }

    pub fn to_vec(&self) -> Vec<Bson> {
        (0..self.len()).filter_map(|i| self.get(i)).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = Bson> + '_ {
        (0..self.len()).filter_map(move |i| self.get(i))
    }

    pub fn contains(&self, value: impl Into<Bson>) -> bool {
        let value = value.into();
        self.stored().iter().enumerate().any(|(i, item)| {
            self.element_at(i)
                .is_some_and(|element| element.collapse(&value) == *item)
        })
    }

    pub fn push(&mut self, value: impl Into<Bson>) -> Result<()> {
        self.check_growable("push")?;
        let item = self.prepare(self.len(), value.into())?;
        self.doc.modify_array(self.field.name(), |items| {
            items.push(item);
            Ok(())
        })
    }

    /// Append every value; nothing is changed if one of them is invalid
    pub fn extend<I, V>(&mut self, values: I) -> Result<()>
    where
        I: IntoIterator<Item = V>,
        V: Into<Bson>,
    {
        self.check_growable("extend")?;
        let start = self.len();
        let prepared = values
            .into_iter()
            .enumerate()
            .map(|(offset, value)| self.prepare(start + offset, value.into()))
            .collect::<Result<Vec<_>>>()?;
        self.doc.modify_array(self.field.name(), |items| {
            items.extend(prepared);
            Ok(())
        })
    }

    pub fn insert(&mut self, index: usize, value: impl Into<Bson>) -> Result<()> {
        self.check_growable("insert")?;
        let len = self.len();
        if index > len {
            return Err(out_of_range(self.field.name(), index, len));
        }
        let item = self.prepare(index, value.into())?;
        self.doc.modify_array(self.field.name(), |items| {
            items.insert(index, item);
            Ok(())
        })
    }

    /// Overwrite the element at `index`, returning the previous one
    pub fn replace(&mut self, index: usize, value: impl Into<Bson>) -> Result<Bson> {
        self.doc.check_writable(&self.field)?;
        let previous = self
            .get(index)
            .ok_or_else(|| out_of_range(self.field.name(), index, self.len()))?;
        let item = self.prepare(index, value.into())?;
        self.doc.modify_array(self.field.name(), |items| {
            items[index] = item;
            Ok(())
        })?;
        Ok(previous)
    }

    /// Remove and return the element at `index`
    pub fn remove(&mut self, index: usize) -> Result<Bson> {
        self.check_growable("remove")?;
        let removed = self
            .get(index)
            .ok_or_else(|| out_of_range(self.field.name(), index, self.len()))?;
        self.doc.modify_array(self.field.name(), |items| {
            items.remove(index);
            Ok(())
        })?;
        Ok(removed)
    }

    pub fn pop(&mut self) -> Result<Option<Bson>> {
        self.check_growable("pop")?;
        match self.len() {
            0 => Ok(None),
            len => self.remove(len - 1).map(Some),
        }
    }

    pub fn clear(&mut self) -> Result<()> {
        self.check_growable("clear")?;
        self.doc.modify_array(self.field.name(), |items| {
            items.clear();
            Ok(())
        })
    }

    pub fn reverse(&mut self) -> Result<()> {
        self.check_growable("reverse")?;
        self.doc.modify_array(self.field.name(), |items| {
            items.reverse();
            Ok(())
        })
    }

    /// Keep only the elements for which `keep` returns true
    pub fn retain<F>(&mut self, mut keep: F) -> Result<()>
    where
        F: FnMut(&Bson) -> bool,
    {
        self.check_growable("retain")?;
        let kept: Vec<bool> = self.iter().map(|value| keep(&value)).collect();
        self.doc.modify_array(self.field.name(), |items| {
            let mut flags = kept.into_iter();
            items.retain(|_| flags.next().unwrap_or(true));
            Ok(())
        })
    }
}

/// Handle over a set (`{T}`) field; elements are kept unique in insertion order
pub struct TrackedSet<'a> {
    doc: &'a mut Document,
    field: Field,
    element: TypeSpec,
}

impl<'a> TrackedSet<'a> {
    fn element(&self) -> &TypeSpec {
        &self.element
    }

    fn stored(&self) -> &[Bson] {
        match self.doc.get(self.field.name()) {
            Some(Bson::Array(items)) => items,
            _ => &[],
        }
    }

    fn prepare(&self, value: Bson) -> Result<Bson> {
        self.element().validate(self.field.name(), &value)?;
        Ok(self.element().collapse(&value))
    }

    pub fn len(&self) -> usize {
        self.stored().len()
    }

    pub fn is_empty(&self) -> bool {
        self.stored().is_empty()
    }

    pub fn to_vec(&self) -> Vec<Bson> {
        self.iter().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = Bson> + '_ {
        self.stored().iter().map(|item| self.element().expand(item))
    }

    pub fn contains(&self, value: impl Into<Bson>) -> bool {
        let value = self.element().collapse(&value.into());
        self.stored().contains(&value)
    }

    /// Add `value`; returns false if it was already present
    pub fn insert(&mut self, value: impl Into<Bson>) -> Result<bool> {
        self.doc.check_writable(&self.field)?;
        let item = self.prepare(value.into())?;
        if self.stored().contains(&item) {
            return Ok(false);
        }
        self.doc.modify_array(self.field.name(), |items| {
            items.push(item);
            Ok(true)
        })
    }

    /// Add every value; returns how many were new
    pub fn extend<I, V>(&mut self, values: I) -> Result<usize>
    where
        I: IntoIterator<Item = V>,
        V: Into<Bson>,
    {
        self.doc.check_writable(&self.field)?;
        let prepared = values
            .into_iter()
            .map(|value| self.prepare(value.into()))
            .collect::<Result<Vec<_>>>()?;
        self.doc.modify_array(self.field.name(), |items| {
            let before = items.len();
            for item in prepared {
                if !items.contains(&item) {
                    items.push(item);
                }
            }
            Ok(items.len() - before)
        })
    }

    /// Remove `value`; returns false if it was not present
    pub fn remove(&mut self, value: impl Into<Bson>) -> Result<bool> {
        self.doc.check_writable(&self.field)?;
        let item = self.prepare(value.into())?;
        let Some(position) = self.stored().iter().position(|v| *v == item) else {
            return Ok(false);
        };
        self.doc.modify_array(self.field.name(), |items| {
            items.remove(position);
            Ok(true)
        })
    }

    pub fn clear(&mut self) -> Result<()> {
        self.doc.check_writable(&self.field)?;
        self.doc.modify_array(self.field.name(), |items| {
            items.clear();
            Ok(())
        })
    }
}

/// Handle over an `any` field used as a free-form map
///
/// Keys must be valid field names; values are stored as given.
pub struct TrackedMap<'a> {
    doc: &'a mut Document,
    field: Field,
}

impl<'a> TrackedMap<'a> {
    fn stored(&self) -> Option<&BsonDocument> {
        match self.doc.get(self.field.name()) {
            Some(Bson::Document(map)) => Some(map),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.stored().map_or(0, BsonDocument::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: &str) -> Option<&Bson> {
        self.stored()?.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.stored().is_some_and(|map| map.contains_key(key))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Bson)> {
        self.stored().into_iter().flat_map(|map| map.iter())
    }

    pub fn to_document(&self) -> BsonDocument {
        self.stored().cloned().unwrap_or_default()
    }

    /// Set `key`, returning the previous value
    pub fn insert(&mut self, key: &str, value: impl Into<Bson>) -> Result<Option<Bson>> {
        self.doc.check_writable(&self.field)?;
        let key = ValidatedFieldName::new(key)?.into_string();
        let value = value.into();
        self.doc
            .modify_map(self.field.name(), |map| Ok(map.insert(key, value)))
    }

    /// Remove `key`, returning its value; a missing key changes nothing
    pub fn remove(&mut self, key: &str) -> Result<Option<Bson>> {
        self.doc.check_writable(&self.field)?;
        if !self.contains_key(key) {
            return Ok(None);
        }
        self.doc
            .modify_map(self.field.name(), |map| Ok(map.remove(key)))
    }

    pub fn clear(&mut self) -> Result<()> {
        self.doc.check_writable(&self.field)?;
        self.doc.modify_map(self.field.name(), |map| {
            map.clear();
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Model;
    use bson::{doc, oid::ObjectId};
    use bsonform_schema::DocumentSchema;

    fn model() -> Model {
        let schema = DocumentSchema::builder("Bag")
            .field("events", "[int]")
            .field("tags", "{str}")
            .field("pair", "[int, str]")
            .field("extra", "any")
            .field("name", "str")
            .field("frozen", "[int]")
            .write_once("frozen")
            .build()
            .unwrap();
        Model::new(schema)
    }

    fn loaded() -> Document {
        model().load(doc! { "_id": ObjectId::new() })
    }

    #[test]
    fn test_list_mutations_mark_dirty() {
        let mut doc = loaded();
        doc.clear_ops();
        {
            let mut events = doc.list_mut("events").unwrap();
            events.push(1).unwrap();
            events.extend(vec![2, 3]).unwrap();
            events.insert(0, 0).unwrap();
            assert_eq!(events.remove(1).unwrap(), Bson::Int64(1));
            assert_eq!(events.pop().unwrap(), Some(Bson::Int64(3)));
            events.reverse().unwrap();
            assert_eq!(events.to_vec(), vec![Bson::Int64(2), Bson::Int64(0)]);
            assert!(events.contains(2));
        }
        assert!(doc.is_dirty("events"));
        assert_eq!(
            doc.operations().unwrap(),
            doc! { "$set": { "events": [2_i64, 0_i64] } }
        );
    }

    #[test]
    fn test_list_rejects_bad_values_without_changes() {
        let mut doc = loaded();
        doc.clear_ops();
        let mut events = doc.list_mut("events").unwrap();
        assert!(events.push("x").unwrap_err().is_validation());
        assert!(events.extend(vec![Bson::Int64(1), Bson::String("x".into())]).is_err());
        assert!(events.insert(3, 1).is_err());
        assert!(matches!(events.remove(0).unwrap_err(), OdmError::Field(_)));
        assert!(events.is_empty());
        assert!(!doc.is_dirty("events"));
    }

    #[test]
    fn test_retain() {
        let mut doc = loaded();
        let mut events = doc.list_mut("events").unwrap();
        events.extend(1..=6).unwrap();
        events.retain(|v| v.as_i64().is_some_and(|n| n % 2 == 0)).unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events.get(0), Some(Bson::Int64(2)));
    }

    #[test]
    fn test_fixed_list_only_replaces() {
        let mut doc = loaded();
        let mut pair = doc.list_mut("pair").unwrap();
        assert_eq!(pair.len(), 2);
        assert!(matches!(pair.push(1).unwrap_err(), OdmError::Field(_)));
        assert!(pair.clear().is_err());
        assert_eq!(pair.replace(1, "b").unwrap(), Bson::String(String::new()));
        assert!(pair.replace(0, "a").unwrap_err().is_validation());
        assert!(pair.replace(2, 1).is_err());
        assert_eq!(pair.get(1), Some(Bson::String("b".into())));
        assert!(doc.is_dirty("pair"));
    }

    #[test]
    fn test_set_handle() {
        let mut doc = loaded();
        let mut tags = doc.set_mut("tags").unwrap();
        assert!(tags.insert("a").unwrap());
        assert!(!tags.insert("a").unwrap());
        assert_eq!(tags.extend(vec!["a", "b", "c"]).unwrap(), 2);
        assert!(tags.remove("b").unwrap());
        assert!(!tags.remove("zzz").unwrap());
        assert!(tags.insert(5).is_err());
        assert_eq!(tags.to_vec(), vec![Bson::from("a"), Bson::from("c")]);
        tags.clear().unwrap();
        assert!(tags.is_empty());
    }

    #[test]
    fn test_map_handle() {
        let mut doc = loaded();
        doc.clear_ops();
        {
            let mut extra = doc.map_mut("extra").unwrap();
            assert_eq!(extra.insert("color", "red").unwrap(), None);
            assert_eq!(
                extra.insert("color", "blue").unwrap(),
                Some(Bson::from("red"))
            );
            assert!(extra.insert("$bad", 1).is_err());
            assert_eq!(extra.remove("nope").unwrap(), None);
            assert_eq!(extra.len(), 1);
            assert_eq!(extra.get("color"), Some(&Bson::from("blue")));
        }
        assert_eq!(
            doc.operations().unwrap(),
            doc! { "$set": { "extra": { "color": "blue" } } }
        );

        doc.set("extra", 5);
        assert!(matches!(doc.map_mut("extra"), Err(OdmError::Field(_))));
    }

    #[test]
    fn test_handles_check_field_kinds() {
        let mut doc = loaded();
        assert!(matches!(doc.list_mut("tags"), Err(OdmError::Field(_))));
        assert!(matches!(doc.set_mut("events"), Err(OdmError::Field(_))));
        assert!(matches!(doc.map_mut("name"), Err(OdmError::Field(_))));
        assert!(matches!(doc.list_mut("nope"), Err(OdmError::Field(_))));
    }

    #[test]
    fn test_write_once_list_locked_after_first_write() {
        let mut doc = loaded();
        doc.list_mut("frozen").unwrap().push(1).unwrap();
        assert!(doc.list_mut("frozen").unwrap().push(2).unwrap_err().is_validation());
    }
}
