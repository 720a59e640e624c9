//! Semantic search tests for Zava MCP.
//!
//! Tests tenant-scoped product search including:
//! - Seattle and the global admin searching for "garden hose"
//! - Deterministic ordering with exact distance ties
//! - Keyword fallback when the embedder fails
//! - Products outside the tenant's stores never surface

use super::common::*;
use std::sync::Arc;
use zava_core::{SearchConfig, TenantIdentity};
use zava_search::{ProductSearch, SearchMode};

fn product_ids(outcome: &zava_search::SearchOutcome) -> Vec<i64> {
    outcome.results.iter().map(|r| r.product_id).collect()
}

fn vector_only(provider: &zava_pg::SessionProvider) -> ProductSearch {
    ProductSearch::new(
        provider.clone(),
        Arc::new(KeywordAxisEmbedder),
        SearchConfig {
            hybrid: false,
            ..Default::default()
        },
    )
}

// =============================================================================
// GARDEN HOSE
// =============================================================================

pub async fn test_seattle_garden_hose(ctx: &TestContext) {
    println!("  🧪 test_seattle_garden_hose");

    let provider = ctx.provider().await;
    let search = ctx.search(&provider, Arc::new(KeywordAxisEmbedder));

    let outcome = search.search(seattle(), "garden hose", None).await.unwrap();
    assert_eq!(outcome.mode, SearchMode::Hybrid);
    assert!(!outcome.degraded);
    assert!(!outcome.results.is_empty());

    // Both hoses outrank everything else
    let mut top_two: Vec<i64> = product_ids(&outcome).into_iter().take(2).collect();
    top_two.sort_unstable();
    assert_eq!(top_two, vec![1, 5]);

    // Every stock figure belongs to Seattle
    for result in &outcome.results {
        assert!(result.stores.iter().all(|s| s.store_id == 1), "{:?}", result);
        assert_eq!(result.total_stock, result.stores.iter().map(|s| s.stock_level).sum::<i64>());
    }
    let hose = outcome.results.iter().find(|r| r.product_id == 1).unwrap();
    assert_eq!(hose.total_stock, 12);

    // Paint is not stocked in Seattle
    assert!(!product_ids(&outcome).contains(&4));

    // Scores never increase down the list
    let scores: Vec<f64> = outcome.results.iter().filter_map(|r| r.score).collect();
    assert_eq!(scores.len(), outcome.results.len());
    assert!(scores.windows(2).all(|w| w[0] >= w[1]));

    provider.close().await;
    println!("     ✓ Seattle finds garden hoses with Seattle stock only");
}

pub async fn test_global_admin_garden_hose(ctx: &TestContext) {
    println!("  🧪 test_global_admin_garden_hose");

    let provider = ctx.provider().await;
    let search = ctx.search(&provider, Arc::new(KeywordAxisEmbedder));

    let outcome = search.search(TenantIdentity::GlobalAdmin, "garden hose", None).await.unwrap();
    assert_eq!(outcome.mode, SearchMode::Hybrid);

    let mut top_two: Vec<i64> = product_ids(&outcome).into_iter().take(2).collect();
    top_two.sort_unstable();
    assert_eq!(top_two, vec![1, 5]);

    // The 50ft hose is stocked in Seattle and Bellevue
    let hose = outcome.results.iter().find(|r| r.product_id == 1).unwrap();
    let stores: Vec<i64> = hose.stores.iter().map(|s| s.store_id).collect();
    assert_eq!(stores, vec![1, 2]);
    assert_eq!(hose.total_stock, 19);

    let mut seen: Vec<i64> = outcome
        .results
        .iter()
        .flat_map(|r| r.stores.iter().map(|s| s.store_id))
        .collect();
    seen.sort_unstable();
    seen.dedup();
    assert!(seen.len() > 1, "global results came from stores {:?}", seen);

    provider.close().await;
    println!("     ✓ Global admin sees garden hose stock across stores");
}

// =============================================================================
// DETERMINISTIC RANKING
// =============================================================================

pub async fn test_ties_ordered_by_name(ctx: &TestContext) {
    println!("  🧪 test_ties_ordered_by_name");

    let provider = ctx.provider().await;
    let search = vector_only(&provider);

    let first = search.search(seattle(), "garden hose", None).await.unwrap();
    assert_eq!(first.mode, SearchMode::Vector);
    // Products 5 and 1 share an embedding; the name breaks the tie
    assert_eq!(first.results[0].product_name, "Garden Hose 25ft");
    assert_eq!(first.results[1].product_name, "Garden Hose 50ft");
    assert_eq!(first.results[0].score, first.results[1].score);
    assert_eq!(first.results[2].product_name, "Hose Nozzle Sprayer");

    for _ in 0..3 {
        let again = search.search(seattle(), "garden hose", None).await.unwrap();
        assert_eq!(product_ids(&again), product_ids(&first));
        assert_eq!(
            again.results.iter().map(|r| r.score).collect::<Vec<_>>(),
            first.results.iter().map(|r| r.score).collect::<Vec<_>>()
        );
    }

    let limited = search.search(seattle(), "garden hose", Some(2)).await.unwrap();
    assert_eq!(product_ids(&limited), vec![5, 1]);

    provider.close().await;
    println!("     ✓ Equal distances are ordered by product name");
}

pub async fn test_global_admin_search_spans_stores(ctx: &TestContext) {
    println!("  🧪 test_global_admin_search_spans_stores");

    let provider = ctx.provider().await;
    let search = vector_only(&provider);

    let outcome = search.search(TenantIdentity::GlobalAdmin, "interior paint", None).await.unwrap();
    let paint = &outcome.results[0];
    assert_eq!(paint.product_id, 4);
    assert_eq!(paint.stores.iter().map(|s| s.store_id).collect::<Vec<_>>(), vec![2, 3]);
    assert_eq!(paint.total_stock, 35);

    // The hand saw has an embedding but is stocked nowhere
    let outcome = search.search(TenantIdentity::GlobalAdmin, "hand tool saw", None).await.unwrap();
    assert!(!product_ids(&outcome).contains(&6));
    assert_eq!(outcome.results[0].product_id, 3);

    provider.close().await;
    println!("     ✓ Global admin search covers every store");
}

// =============================================================================
// EMBEDDING FAILURE
// =============================================================================

pub async fn test_embedding_failure_falls_back(ctx: &TestContext) {
    println!("  🧪 test_embedding_failure_falls_back");

    let provider = ctx.provider().await;
    let search = ctx.search(&provider, Arc::new(FailingEmbedder));

    let outcome = search.search(seattle(), "garden hose", None).await.unwrap();
    assert_eq!(outcome.mode, SearchMode::Keyword);
    assert!(outcome.degraded);
    assert!(outcome.fallback_reason.as_deref().unwrap_or_default().contains("503"));

    let ids = product_ids(&outcome);
    assert!(ids.contains(&1) && ids.contains(&5) && ids.contains(&2));
    assert!(!ids.contains(&3));
    assert!(outcome.results.iter().all(|r| r.stores.iter().all(|s| s.store_id == 1)));

    // Punctuation-only input is still a valid, empty keyword search
    let outcome = search.search(seattle(), "?!", None).await.unwrap();
    assert!(outcome.results.is_empty());

    provider.close().await;
    println!("     ✓ Keyword search answers when embeddings are unavailable");
}

pub async fn test_empty_query_rejected(ctx: &TestContext) {
    println!("  🧪 test_empty_query_rejected");

    let provider = ctx.provider().await;
    let search = ctx.search(&provider, Arc::new(KeywordAxisEmbedder));
    let err = search.search(seattle(), "   ", None).await.unwrap_err();
    assert!(matches!(err, zava_search::SearchError::InvalidQuery(_)));

    provider.close().await;
    println!("     ✓ Blank queries are rejected before any session is leased");
}

pub async fn run_all_tests(ctx: &TestContext) {
    println!("\n📦 Search Tests");
    test_seattle_garden_hose(ctx).await;
    test_global_admin_garden_hose(ctx).await;
    test_ties_ordered_by_name(ctx).await;
    test_global_admin_search_spans_stores(ctx).await;
    test_embedding_failure_falls_back(ctx).await;
    test_empty_query_rejected(ctx).await;
}
