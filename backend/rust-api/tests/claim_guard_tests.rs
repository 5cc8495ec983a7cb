//! Claim-ticket semantics under concurrency, using the in-memory store.

use std::sync::Arc;

use coursepilot_api::services::claims::{
    modules_claim_key, questions_claim_key, video_claim_key, ClaimStore, MemoryClaimStore,
};

/// Many completion signals racing for the same course admit exactly one
/// synthesis dispatch.
#[tokio::test]
async fn concurrent_signals_admit_one_dispatch() {
    let store: Arc<dyn ClaimStore> = Arc::new(MemoryClaimStore::new());
    let key = modules_claim_key("course-race");

    let mut handles = Vec::new();
    for _ in 0..32 {
        let store = store.clone();
        let key = key.clone();
        handles.push(tokio::spawn(async move { store.try_claim(&key).await }));
    }

    let mut admitted = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap() {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 1);
}

/// Claims are scoped per unit of work: different stages and different
/// modules of the same course never contend.
#[tokio::test]
async fn claims_are_scoped_per_unit_of_work() {
    let store = MemoryClaimStore::new();

    assert!(store.try_claim(&modules_claim_key("c1")).await.unwrap());
    assert!(store.try_claim(&questions_claim_key("c1", 0)).await.unwrap());
    assert!(store.try_claim(&questions_claim_key("c1", 1)).await.unwrap());
    assert!(store.try_claim(&video_claim_key("c1", 0)).await.unwrap());
    assert!(store.try_claim(&modules_claim_key("c2")).await.unwrap());

    // The same unit stays held.
    assert!(!store.try_claim(&modules_claim_key("c1")).await.unwrap());
    assert!(!store.try_claim(&video_claim_key("c1", 0)).await.unwrap());
}

/// Release then reclaim models the retry flow: a failed job frees its
/// ticket, the retry takes a fresh one.
#[tokio::test]
async fn release_enables_retry_claim() {
    let store = MemoryClaimStore::new();
    let key = video_claim_key("c1", 3);

    assert!(store.try_claim(&key).await.unwrap());
    assert!(!store.try_claim(&key).await.unwrap());

    store.release(&key).await.unwrap();
    assert!(store.try_claim(&key).await.unwrap());
}
