//! Pending atomic update operations
//!
//! Atomic operations are not applied to the local copy of a document. They
//! are queued here and sent with the next save, after which the document is
//! refreshed from the server's answer.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use bson::{doc, Bson, Document as BsonDocument};
use bsonform_common::{OdmError, Result};

/// Operations queued on a document, keyed by canonical field name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingOperations {
    unset: BTreeSet<String>,
    inc: BTreeMap<String, Bson>,
    push: BTreeMap<String, Vec<Bson>>,
    pull_all: BTreeMap<String, Vec<Bson>>,
    add_to_set: BTreeMap<String, Vec<Bson>>,
}

impl PendingOperations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.unset.is_empty()
            && self.inc.is_empty()
            && self.push.is_empty()
            && self.pull_all.is_empty()
            && self.add_to_set.is_empty()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn unset(&mut self, key: &str) {
        self.unset.insert(key.to_string());
    }

    /// Drop a queued `$unset`; returns true if one was queued
    pub fn cancel_unset(&mut self, key: &str) -> bool {
        self.unset.remove(key)
    }

    pub fn is_unset(&self, key: &str) -> bool {
        self.unset.contains(key)
    }

    /// Add `delta` to the queued increment for `key`
    pub fn inc(&mut self, key: &str, delta: Bson) -> Result<()> {
        let total = match self.inc.get(key) {
            Some(previous) => add_deltas(previous, &delta)?,
            None => delta,
        };
        self.inc.insert(key.to_string(), total);
        Ok(())
    }

    pub fn push(&mut self, key: &str, values: Vec<Bson>) {
        self.push.entry(key.to_string()).or_default().extend(values);
    }

    pub fn pull_all(&mut self, key: &str, values: Vec<Bson>) {
        self.pull_all
            .entry(key.to_string())
            .or_default()
            .extend(values);
    }

    pub fn add_to_set(&mut self, key: &str, values: Vec<Bson>) {
        let queued = self.add_to_set.entry(key.to_string()).or_default();
        for value in values {
            if !queued.contains(&value) {
                queued.push(value);
            }
        }
    }

    /// Build the update document
    ///
    /// `set` holds the `$set` body (already under stored keys); `map_key`
    /// converts canonical names into stored keys. A key touched by two
    /// operators is rejected.
    pub fn to_update<F>(&self, set: BsonDocument, map_key: F) -> Result<BsonDocument>
    where
        F: Fn(&str) -> String,
    {
        let mut owners: HashMap<String, &'static str> = HashMap::new();
        let mut claim = |key: String, op: &'static str| -> Result<String> {
            if let Some(previous) = owners.insert(key.clone(), op) {
                return Err(OdmError::Query(format!(
                    "field '{}' is modified by both {} and {}",
                    key, previous, op
                )));
            }
            Ok(key)
        };

        let mut update = BsonDocument::new();

        if !set.is_empty() {
            for key in set.keys() {
                claim(key.clone(), "$set")?;
            }
            update.insert("$set", set);
        }

        if !self.unset.is_empty() {
            let mut body = BsonDocument::new();
            for key in &self.unset {
                body.insert(claim(map_key(key), "$unset")?, "");
            }
            update.insert("$unset", body);
        }

        if !self.inc.is_empty() {
            let mut body = BsonDocument::new();
            for (key, delta) in &self.inc {
                body.insert(claim(map_key(key), "$inc")?, delta.clone());
            }
            update.insert("$inc", body);
        }

        if !self.push.is_empty() {
            let mut body = BsonDocument::new();
            for (key, values) in &self.push {
                body.insert(claim(map_key(key), "$push")?, doc! { "$each": values.clone() });
            }
            update.insert("$push", body);
        }

        if !self.pull_all.is_empty() {
            let mut body = BsonDocument::new();
            for (key, values) in &self.pull_all {
                body.insert(claim(map_key(key), "$pullAll")?, values.clone());
            }
            update.insert("$pullAll", body);
        }

        if !self.add_to_set.is_empty() {
            let mut body = BsonDocument::new();
            for (key, values) in &self.add_to_set {
                body.insert(
                    claim(map_key(key), "$addToSet")?,
                    doc! { "$each": values.clone() },
                );
            }
            update.insert("$addToSet", body);
        }

        Ok(update)
    }
}

/// Sum two increments: integers stay integers, anything else becomes a double
fn add_deltas(a: &Bson, b: &Bson) -> Result<Bson> {
    let as_int = |v: &Bson| match v {
        Bson::Int32(n) => Some(i64::from(*n)),
        Bson::Int64(n) => Some(*n),
        _ => None,
    };
    let as_float = |v: &Bson| match v {
        Bson::Double(n) => Some(*n),
        other => as_int(other).map(|n| n as f64),
    };

    if let (Some(x), Some(y)) = (as_int(a), as_int(b)) {
        if let Some(sum) = x.checked_add(y) {
            return Ok(Bson::Int64(sum));
        }
    }
    match (as_float(a), as_float(b)) {
        (Some(x), Some(y)) => Ok(Bson::Double(x + y)),
        _ => Err(OdmError::Query(format!(
            "cannot add increments {} and {}",
            a, b
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn same(key: &str) -> String {
        key.to_string()
    }

    #[test]
    fn test_empty_operations() {
        let ops = PendingOperations::new();
        assert!(ops.is_empty());
        assert!(ops.to_update(BsonDocument::new(), same).unwrap().is_empty());
    }

    #[test]
    fn test_increments_are_summed() {
        let mut ops = PendingOperations::new();
        ops.inc("n", Bson::Int64(2)).unwrap();
        ops.inc("n", Bson::Int64(-5)).unwrap();
        ops.inc("ratio", Bson::Int64(1)).unwrap();
        ops.inc("ratio", Bson::Double(0.5)).unwrap();

        let update = ops.to_update(BsonDocument::new(), same).unwrap();
        assert_eq!(update, doc! { "$inc": { "n": -3_i64, "ratio": 1.5 } });
    }

    #[test]
    fn test_all_operators() {
        let mut ops = PendingOperations::new();
        ops.unset("gone");
        ops.push("events", vec![Bson::Int64(1), Bson::Int64(2)]);
        ops.pull_all("tags", vec![Bson::String("old".into())]);
        ops.add_to_set("labels", vec![Bson::String("a".into())]);
        ops.add_to_set("labels", vec![Bson::String("a".into()), Bson::String("b".into())]);

        let update = ops
            .to_update(doc! { "n": "ann" }, |k| format!("s_{}", k))
            .unwrap();
        assert_eq!(
            update,
            doc! {
                "$set": { "n": "ann" },
                "$unset": { "s_gone": "" },
                "$push": { "s_events": { "$each": [1_i64, 2_i64] } },
                "$pullAll": { "s_tags": ["old"] },
                "$addToSet": { "s_labels": { "$each": ["a", "b"] } },
            }
        );
    }

    #[test]
    fn test_conflicting_operators_rejected() {
        let mut ops = PendingOperations::new();
        ops.inc("n", Bson::Int64(1)).unwrap();
        let err = ops.to_update(doc! { "n": 3_i64 }, same).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Query error: field 'n' is modified by both $set and $inc"
        );

        let mut ops = PendingOperations::new();
        ops.push("tags", vec![Bson::Int64(1)]);
        ops.pull_all("tags", vec![Bson::Int64(2)]);
        assert!(ops.to_update(BsonDocument::new(), same).is_err());
    }

    #[test]
    fn test_cancel_unset() {
        let mut ops = PendingOperations::new();
        ops.unset("a");
        assert!(ops.is_unset("a"));
        assert!(ops.cancel_unset("a"));
        assert!(!ops.cancel_unset("a"));
        assert!(ops.is_empty());
    }

    #[test]
    fn test_non_numeric_increment_rejected() {
        let mut ops = PendingOperations::new();
        ops.inc("n", Bson::Int64(1)).unwrap();
        assert!(ops.inc("n", Bson::String("x".into())).is_err());
    }
}
