//! Index -> search -> delete round trips.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;

use mailvane_kv::{Kv, LockManager, MemoryKv};
use mailvane_protocol::payload::Language;
use mailvane_search::indexer::{chunk_content, chunk_id};
use mailvane_search::{IndexStore, IndexedDocument, Indexer, QueryEngine, SearchOptions};

struct Setup {
    kv: Arc<dyn Kv>,
    indexer: Indexer,
    engine: QueryEngine,
}

fn setup() -> Setup {
    let kv: Arc<dyn Kv> = Arc::new(MemoryKv::new());
    let store = IndexStore::new(Arc::clone(&kv));
    let locks = LockManager::new(Arc::clone(&kv));
    Setup {
        kv,
        indexer: Indexer::new(store.clone(), locks),
        engine: QueryEngine::new(store),
    }
}

fn email_doc(id: &str, content: &str, metadata: HashMap<String, serde_json::Value>) -> IndexedDocument {
    IndexedDocument {
        id: id.to_string(),
        doc_type: "email".to_string(),
        content: content.to_string(),
        metadata,
        vector: None,
    }
}

#[tokio::test]
async fn index_then_search_with_expected_score() {
    let s = setup();
    let content = "Hello world hello";
    let mut metadata = HashMap::new();
    metadata.insert("category".to_string(), json!("business"));
    s.indexer
        .index_document(email_doc("d1", content, metadata), Language::En)
        .await
        .unwrap();

    // Posting written with the write-time TF score.
    let score = s
        .kv
        .zscore("posting:hello", "email:d1")
        .await
        .unwrap()
        .unwrap();
    let expected = 3.0f64.ln() / (content.chars().count() as f64).sqrt();
    assert!((score - expected).abs() < 1e-9);

    // Search returns the document with that score.
    let results = s
        .engine
        .search("hello", &SearchOptions::default())
        .await
        .unwrap();
    assert_eq!(results.total, 1);
    assert_eq!(results.hits[0].doc_id, "d1");
    assert!((results.hits[0].score - expected).abs() < 1e-9);

    // A mismatched metadata filter hides it.
    let mut options = SearchOptions::default();
    options
        .filters
        .insert("category".to_string(), json!("marketing"));
    let filtered = s.engine.search("hello", &options).await.unwrap();
    assert_eq!(filtered.total, 0);
}

#[tokio::test]
async fn delete_removes_every_trace() {
    let s = setup();
    s.indexer
        .index_document(email_doc("d1", "hello searchable text", HashMap::new()), Language::En)
        .await
        .unwrap();
    assert!(s.indexer.delete_document("email", "d1").await.unwrap());

    assert_eq!(s.kv.zscore("posting:hello", "email:d1").await.unwrap(), None);
    assert_eq!(s.kv.hget("doc:email", "d1").await.unwrap(), None);
    assert_eq!(s.kv.hget("meta:email", "d1").await.unwrap(), None);

    let results = s
        .engine
        .search("hello", &SearchOptions::default())
        .await
        .unwrap();
    assert_eq!(results.total, 0);
}

#[tokio::test]
async fn chunked_documents_are_searchable_per_chunk() {
    let s = setup();
    let content = format!("{} {}", "alpha".repeat(1), "filler words ".repeat(120));
    let chunk_size = 300;
    let chunks = chunk_content(&content, chunk_size);
    assert!(chunks.len() > 1);

    for (position, chunk) in chunks.iter().enumerate() {
        let doc = s.indexer.chunk_document(
            "long1",
            position,
            chunk.clone(),
            &HashMap::new(),
            Language::En,
        );
        assert_eq!(doc.id, chunk_id("long1", position));
        assert!(doc.vector.is_some());
        s.indexer.index_document(doc, Language::En).await.unwrap();
    }

    let results = s
        .engine
        .search("alpha", &SearchOptions::default())
        .await
        .unwrap();
    assert_eq!(results.total, 1);
    assert_eq!(results.hits[0].doc_type, "document_chunk");
    assert_eq!(results.hits[0].doc_id, "long1_chunk_0");

    // Chunk metadata carries the parent pointer.
    let meta = results.hits[0].document.metadata.clone();
    assert_eq!(meta["parent_id"], json!("long1"));
    assert_eq!(meta["position"], json!(0));
}

#[tokio::test]
async fn language_specific_stop_words_apply() {
    let s = setup();
    s.indexer
        .index_document(
            email_doc("d1", "nicht alles ist verloren", HashMap::new()),
            Language::De,
        )
        .await
        .unwrap();

    // "nicht" is a German stop word, never indexed.
    assert_eq!(s.kv.zcard("posting:nicht").await.unwrap(), 0);
    assert!(s.kv.zcard("posting:verloren").await.unwrap() > 0);
}
