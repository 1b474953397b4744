//! Streaming query results

use std::pin::Pin;
use std::task::{Context, Poll};

use bsonform_common::Result;
use futures::{Stream, StreamExt};

use crate::backend::RawDocumentStream;
use crate::document::Document;
use crate::model::Model;

/// Stream of documents produced by [`Query::cursor`](crate::query::Query::cursor)
///
/// Every stored document goes through [`Model::load`], so `on_load` hooks run
/// as items are pulled.
pub struct DocumentCursor {
    model: Model,
    inner: RawDocumentStream,
}

impl DocumentCursor {
    pub fn new(model: Model, inner: RawDocumentStream) -> Self {
        Self { model, inner }
    }

    pub fn model(&self) -> &Model {
        &self.model
    }
}

impl Stream for DocumentCursor {
    type Item = Result<Document>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        this.inner
            .poll_next_unpin(cx)
            .map(|item| item.map(|raw| raw.map(|raw| this.model.load(raw))))
    }
}

impl std::fmt::Debug for DocumentCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentCursor")
            .field("model", &self.model.name())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use bsonform_schema::DocumentSchema;
    use futures::{stream, TryStreamExt};

    #[tokio::test]
    async fn test_items_are_loaded() {
        let schema = DocumentSchema::builder("Item")
            .field("label", "str")
            .short_name("label", "l")
            .build()
            .unwrap();
        let raw: RawDocumentStream =
            stream::iter(vec![Ok(doc! { "l": "a" }), Ok(doc! { "l": "b" })]).boxed();

        let docs: Vec<Document> = DocumentCursor::new(Model::new(schema), raw)
            .try_collect()
            .await
            .unwrap();
        let labels: Vec<String> = docs
            .iter()
            .map(|d| d.get_as::<String>("label").unwrap())
            .collect();
        assert_eq!(labels, vec!["a", "b"]);
    }
}
