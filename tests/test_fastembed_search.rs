//! Integration Test: hybrid search with the local ONNX embedding model
//!
//! Downloads all-MiniLM-L6-v2 on first run, so these tests are ignored by default.

use conflux::config::Config;
use conflux::retrieval::{SearchRequest, SearchType};
use conflux::service::SearchService;
use conflux::storage::Chunk;
use tempfile::TempDir;

#[tokio::test]
#[ignore] // Requires model download
async fn test_semantic_match_without_shared_terms() {
    println!("\n=== Integration Test: fastembed hybrid search ===\n");

    let temp = TempDir::new().unwrap();
    let mut config = Config::default();
    config.storage.data_dir = temp.path().to_path_buf();

    let service = SearchService::open(&config)
        .await
        .expect("Failed to initialize service with fastembed");
    println!("✓ Service initialized with {}", config.embedding.model);

    let chunks = vec![
        Chunk::new("c1", "cars", "The automobile would not start on a cold morning", "text")
            .with_metadata("filename", "cars.txt"),
        Chunk::new("c2", "baking", "Knead the dough and let it rise for an hour", "text")
            .with_metadata("filename", "baking.txt"),
        Chunk::new("c3", "space", "The probe entered orbit around Jupiter", "text")
            .with_metadata("filename", "space.txt"),
    ];
    service.index_add(&chunks).await.unwrap();
    println!("✓ Indexed {} chunks", chunks.len());

    let response = service
        .search(&SearchRequest::new("my car engine failed in winter", 3))
        .await
        .unwrap();
    println!("✓ Top result: {}", response.results[0].chunk_id);
    assert_eq!(response.results[0].chunk_id, "c1");

    let hybrid = service
        .hybrid_search(&SearchRequest::new("bread dough", 3))
        .await
        .unwrap();
    assert_eq!(hybrid.search_type, SearchType::Hybrid);
    assert_eq!(hybrid.results[0].chunk_id, "c2");

    println!("\n=== fastembed hybrid search passed ===\n");
}
