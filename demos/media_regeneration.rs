//! Example regenerating media metadata over a mixed media library

use std::sync::Arc;

use prometheus::Registry;
use regenerator::batch::{RawRunOptions, RunCoordinator, RunRequest};
use regenerator::category::{list_content_types, MEDIA_COLLECTION};
use regenerator::config::EngineConfig;
use regenerator::metrics::{gather_text, RegenMetrics};
use regenerator::store::{ContentTypeKind, ContentTypeSchema, MemoryRecordStore};
use regenerator::telemetry::init_tracing;
use serde_json::json;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = EngineConfig::from_env()?;
    init_tracing(config.log_format);

    println!("🚀 Regenerator - Media Regeneration Example\n");

    let store = Arc::new(MemoryRecordStore::new());
    let mimes = ["image/jpeg", "image/png", "video/mp4", "audio/mpeg", "application/pdf"];
    for id in 1..=40u64 {
        let mime = mimes[(id as usize) % mimes.len()];
        let mut record = json!({ "name": format!("upload-{}", id), "mime": mime });
        if id % 7 == 0 {
            record["blurhash"] = json!("LEHV6nWB2yk8pyo0adR*.7kCMdnj");
        }
        store.insert(MEDIA_COLLECTION, id, record);
    }
    // A couple of uploads whose files went missing
    store.fail_updates_for(MEDIA_COLLECTION, 12);
    store.fail_updates_for(MEDIA_COLLECTION, 31);

    store.add_content_type(ContentTypeSchema {
        uid: "api::article.article".to_string(),
        singular_name: Some("article".to_string()),
        plural_name: Some("articles".to_string()),
        kind: ContentTypeKind::CollectionType,
    });
    for id in 1..=5u64 {
        store.insert("api::article.article", id, json!({ "title": format!("Post {}", id) }));
    }

    let registry = Registry::new();
    let metrics = RegenMetrics::new(&registry)?;
    let coordinator = RunCoordinator::from_config(store.clone(), &config)
        .with_metrics(metrics)
        .with_progress_callback(|progress| {
            println!(
                "  {} chunk {}/{}: {} ok, {} failed so far",
                progress.category,
                progress.chunk_index + 1,
                progress.chunk_count,
                progress.succeeded,
                progress.failed
            );
        });

    println!("📷 Media run (skipping uploads that already have a blurhash)");
    let media = RunRequest::media(["images", "videos", "gifs", "files"]).with_options(RawRunOptions {
        chunk_size: 4,
        sleep_duration: 100,
        skip_field: Some("blurhash".to_string()),
        ..Default::default()
    });
    let report = coordinator.run(media).await?;
    println!("\n{}\n", report.to_json()?);

    println!("📝 Content types available:");
    for summary in list_content_types(store.as_ref()).await? {
        println!(
            "  {} ({})",
            summary.name.as_deref().unwrap_or("unnamed"),
            summary.uid
        );
    }

    let content = RunRequest::content(["api::article.article"]).with_options(RawRunOptions {
        chunk_size: 2,
        sleep_duration: 50,
        ..Default::default()
    });
    let report = coordinator.run(content).await?;
    println!("\n✅ {}", report.message);

    println!("\n📊 Metrics:\n{}", gather_text(&registry)?);
    Ok(())
}
