//! Named auto-increment sequences
//!
//! Counters live as `{name, seq}` documents in a collection of their own and
//! are advanced with a single atomic `$inc`, so concurrent callers never see
//! the same value.

use std::sync::Arc;

use bson::{doc, Bson};
use bsonform_common::{OdmError, Result};

use crate::connection::ConnectionManager;

#[derive(Debug, Clone)]
pub struct SequenceGenerator {
    manager: Arc<ConnectionManager>,
}

impl SequenceGenerator {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self { manager }
    }

    /// Advance `seq_name` by one and return the new value
    ///
    /// The first call for a name returns 1.
    pub async fn next_index(
        &self,
        seq_name: &str,
        database: &str,
        collection: &str,
        connection: Option<&str>,
    ) -> Result<i64> {
        let backend = self
            .manager
            .get_connection(connection, true)
            .ok_or_else(|| {
                OdmError::Connection(format!(
                    "no connection registered for sequence '{}'",
                    seq_name
                ))
            })?;
        let counters = backend.collection(database, collection);
        counters.ensure_index(doc! { "name": 1 }).await?;

        let counter = counters
            .find_one_and_update(
                doc! { "name": seq_name },
                doc! { "$inc": { "seq": 1_i64 } },
                true,
            )
            .await?
            .ok_or_else(|| {
                OdmError::Database(format!("sequence '{}' was not created", seq_name))
            })?;

        let value = match counter.get("seq") {
            Some(Bson::Int64(n)) => *n,
            Some(Bson::Int32(n)) => i64::from(*n),
            other => {
                return Err(OdmError::Database(format!(
                    "sequence '{}' holds a non-integer value: {:?}",
                    seq_name, other
                )))
            }
        };
        tracing::debug!(sequence = seq_name, value, "Advanced sequence");
        Ok(value)
    }
}

impl Default for SequenceGenerator {
    /// Generator over the global connection manager
    fn default() -> Self {
        Self::new(ConnectionManager::global())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;

    #[tokio::test]
    async fn test_sequences_count_independently() {
        let memory = MemoryBackend::new();
        let manager = Arc::new(ConnectionManager::new());
        manager.add_connection(Arc::new(memory.clone()), None);
        let sequences = SequenceGenerator::new(manager);

        for expected in 1..=3 {
            let n = sequences
                .next_index("orders", "app", "counters", None)
                .await
                .unwrap();
            assert_eq!(n, expected);
        }
        assert_eq!(
            sequences
                .next_index("invoices", "app", "counters", None)
                .await
                .unwrap(),
            1
        );
        assert_eq!(memory.documents("app", "counters").len(), 2);
        assert_eq!(memory.indexes("app", "counters"), vec![doc! { "name": 1 }]);
    }

    #[tokio::test]
    async fn test_missing_connection() {
        let sequences = SequenceGenerator::new(Arc::new(ConnectionManager::new()));
        let err = sequences
            .next_index("orders", "app", "counters", Some("nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, OdmError::Connection(_)));
    }
}
