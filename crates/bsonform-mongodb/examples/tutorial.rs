//! bsonform tutorial
//!
//! Declares a small blog schema, saves a few posts and queries them back.
//! Runs against an in-memory backend unless `BSONFORM_MONGODB_URI` is set.
//!
//! ```text
//! cargo run -p bsonform-mongodb --example tutorial
//! BSONFORM_MONGODB_URI=mongodb://localhost:27017 cargo run -p bsonform-mongodb --example tutorial
//! ```

use std::sync::Arc;

use bson::{doc, Bson};
use bsonform_mongodb::settings::ENV_URI;
use bsonform_mongodb::{
    ConnectionManager, ConnectionSettings, Document, DocumentHooks, DocumentSchema, MemoryBackend,
    Model, Result, SequenceGenerator,
};
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Keeps `updated` current on every save
struct Timestamps;

impl DocumentHooks for Timestamps {
    fn pre_save(&self, doc: &mut Document) -> Result<()> {
        doc.set_field("updated", bson::DateTime::from_chrono(Utc::now()))
    }
}

fn now() -> Bson {
    Bson::DateTime(bson::DateTime::from_chrono(Utc::now()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::DEBUG)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let manager = ConnectionManager::global();
    if std::env::var(ENV_URI).is_ok() {
        let settings = ConnectionSettings::from_env();
        let connection = settings.register(&manager).await?;
        info!("Connected: ping = {}", connection.ping().await?);
    } else {
        info!("{} not set, using the in-memory backend", ENV_URI);
        manager.add_connection(Arc::new(MemoryBackend::new()), None);
    }

    let author = DocumentSchema::builder("Author")
        .field("name", "str")
        .field("email", "str")
        .short_name("email", "e")
        .required("name")
        .build()?;

    let post = DocumentSchema::builder("Post")
        .nested(&author)
        .database("tutorial")
        .field("number", "int")
        .field("title", "str")
        .field("author", "Author")
        .field("tags", "{str}")
        .field("views", "int")
        .field("created", "datetime")
        .field("updated", "datetime")
        .required("title")
        .write_once("number")
        .default("views", 0)
        .default_with("created", now)
        .short_name("title", "t")
        .short_name("author", "a")
        .build()?;

    info!(
        "Post validator: {}",
        serde_json::to_string_pretty(&post.to_json_schema())?
    );

    let posts = Model::new(post).with_hooks(Timestamps);
    let sequences = SequenceGenerator::default();

    for (title, name, tags) in [
        ("Ownership", "ferris", vec!["rust", "memory"]),
        ("Lifetimes", "ferris", vec!["rust"]),
        ("Aggregation", "leaf", vec!["mongodb"]),
    ] {
        let mut doc = posts.new_document();
        let number = sequences
            .next_index("post_number", "tutorial", "counters", None)
            .await?;
        doc.set_field("number", number)?;
        doc.set_field("title", title)?;
        doc.set_field("author", doc! { "name": name, "email": format!("{}@example.com", name) })?;
        doc.set_mut("tags")?.extend(tags)?;
        doc.save().await?;
        info!("Saved {}", doc);
    }

    let mut rust_posts = posts
        .find(doc! { "tags": "rust", "author.name": "ferris" })
        .sort(doc! { "number": -1 })
        .cursor()
        .await?;
    while let Some(mut doc) = rust_posts.try_next().await? {
        doc.inc("views", 1)?;
        doc.save().await?;
        let created: DateTime<Utc> = match doc.get_field("created")? {
            Bson::DateTime(at) => at.to_chrono(),
            _ => Utc::now(),
        };
        info!(
            "#{} {} ({} views, created {})",
            doc.get_as::<i64>("number")?,
            doc.get_as::<String>("title")?,
            doc.get_as::<i64>("views")?,
            created.format("%Y-%m-%d %H:%M:%S")
        );
    }

    let touched = posts
        .update(doc! { "author.name": "leaf" }, doc! { "$addToSet": { "tags": "database" } })
        .await?;
    info!("Tagged {} post(s) by leaf", touched);

    if let Some(first) = posts.find_one(doc! { "number": 1 }).await? {
        info!("As JSON: {}", first.to_json()?);
        first.delete().await?;
    }

    Ok(())
}
