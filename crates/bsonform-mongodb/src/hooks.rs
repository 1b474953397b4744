//! Lifecycle hooks
//!
//! A [`Model`](crate::model::Model) carries one [`DocumentHooks`]
//! implementation that is called around loads and saves. Every method has a
//! no-op default, so implementors only override what they need.
//!
//! Save order: `pre_save`, `pre_insert` or `pre_update`, validation, the
//! database round trip, `post_insert` or `post_update`, then `post_save`.
//! Changes made to the document by `pre_*` hooks are persisted.

use bson::{doc, oid::ObjectId, Document as BsonDocument};
use bsonform_common::Result;

use crate::document::Document;

pub trait DocumentHooks: Send + Sync {
    /// Called after a document has been built from stored data
    fn on_load(&self, _doc: &mut Document) {}

    fn pre_save(&self, _doc: &mut Document) -> Result<()> {
        Ok(())
    }

    fn pre_insert(&self, _doc: &mut Document) -> Result<()> {
        Ok(())
    }

    fn pre_update(&self, _doc: &mut Document) -> Result<()> {
        Ok(())
    }

    fn post_save(&self, _doc: &mut Document) -> Result<()> {
        Ok(())
    }

    fn post_insert(&self, _doc: &mut Document) -> Result<()> {
        Ok(())
    }

    fn post_update(&self, _doc: &mut Document) -> Result<()> {
        Ok(())
    }

    /// Extra checks run after required fields are verified
    fn validate(&self, _doc: &Document) -> Result<()> {
        Ok(())
    }

    /// Filter that locates this document when it is saved
    ///
    /// Captured when the document is created or loaded, so changing a key
    /// field afterwards still updates the original record. Keys are
    /// canonical field names.
    fn identity(&self, doc: &Document) -> BsonDocument {
        doc! { "_id": doc.id().unwrap_or_else(ObjectId::new) }
    }
}

/// Hooks that do nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl DocumentHooks for NoHooks {}
