use std::time::Duration;

use crate::error::StoreError;
use crate::store::{CompareOutcome, LockStore};
use crate::token::LockToken;

const TTL: Duration = Duration::from_secs(10);

/// Run the full lock store conformance test suite.
///
/// Call this from your backend's test module with a fresh store instance.
///
/// # Errors
///
/// Returns an error if the store fails a call. Behavioural violations panic.
pub async fn run_store_conformance_tests(store: &dyn LockStore) -> Result<(), StoreError> {
    test_try_set_absent(store).await?;
    test_try_set_contention(store).await?;
    test_compare_delete(store).await?;
    test_compare_delete_wrong_token(store).await?;
    test_compare_extend(store).await?;
    test_compare_extend_wrong_token(store).await?;
    test_expiry(store).await?;
    Ok(())
}

async fn test_try_set_absent(store: &dyn LockStore) -> Result<(), StoreError> {
    let token = LockToken::generate();
    let set = store.try_set("conformance-absent", &token, TTL).await?;
    assert!(set, "try_set on an absent key should take effect");
    Ok(())
}

async fn test_try_set_contention(store: &dyn LockStore) -> Result<(), StoreError> {
    let first = LockToken::generate();
    let second = LockToken::generate();
    assert!(store.try_set("conformance-contention", &first, TTL).await?);
    let set = store.try_set("conformance-contention", &second, TTL).await?;
    assert!(!set, "try_set on a held key should not take effect");

    let same = store.try_set("conformance-contention", &first, TTL).await?;
    assert!(!same, "try_set is not reentrant, even for the holder");
    Ok(())
}

async fn test_compare_delete(store: &dyn LockStore) -> Result<(), StoreError> {
    let token = LockToken::generate();
    assert!(store.try_set("conformance-delete", &token, TTL).await?);

    let outcome = store.compare_delete("conformance-delete", &token).await?;
    assert_eq!(outcome, CompareOutcome::Matched);

    let outcome = store.compare_delete("conformance-delete", &token).await?;
    assert_eq!(
        outcome,
        CompareOutcome::Missing,
        "second delete should find nothing"
    );

    let next = LockToken::generate();
    assert!(
        store.try_set("conformance-delete", &next, TTL).await?,
        "key should be free after delete"
    );
    Ok(())
}

async fn test_compare_delete_wrong_token(store: &dyn LockStore) -> Result<(), StoreError> {
    let holder = LockToken::generate();
    let intruder = LockToken::generate();
    assert!(store.try_set("conformance-delete-wrong", &holder, TTL).await?);

    let outcome = store
        .compare_delete("conformance-delete-wrong", &intruder)
        .await?;
    assert_eq!(outcome, CompareOutcome::Mismatch);

    let still_held = !store
        .try_set("conformance-delete-wrong", &intruder, TTL)
        .await?;
    assert!(still_held, "delete with the wrong token must not free the key");
    Ok(())
}

async fn test_compare_extend(store: &dyn LockStore) -> Result<(), StoreError> {
    let token = LockToken::generate();
    let missing = store
        .compare_extend("conformance-extend", &token, TTL)
        .await?;
    assert_eq!(missing, CompareOutcome::Missing);

    assert!(
        store
            .try_set("conformance-extend", &token, Duration::from_secs(5))
            .await?
    );
    let outcome = store
        .compare_extend("conformance-extend", &token, TTL)
        .await?;
    assert_eq!(outcome, CompareOutcome::Matched);
    Ok(())
}

async fn test_compare_extend_wrong_token(store: &dyn LockStore) -> Result<(), StoreError> {
    let holder = LockToken::generate();
    let intruder = LockToken::generate();
    assert!(store.try_set("conformance-extend-wrong", &holder, TTL).await?);

    let outcome = store
        .compare_extend("conformance-extend-wrong", &intruder, TTL)
        .await?;
    assert_eq!(outcome, CompareOutcome::Mismatch);
    Ok(())
}

async fn test_expiry(store: &dyn LockStore) -> Result<(), StoreError> {
    let first = LockToken::generate();
    let second = LockToken::generate();
    assert!(
        store
            .try_set("conformance-expiry", &first, Duration::from_millis(50))
            .await?
    );

    tokio::time::sleep(Duration::from_millis(150)).await;

    let outcome = store
        .compare_extend("conformance-expiry", &first, TTL)
        .await?;
    assert_eq!(
        outcome,
        CompareOutcome::Missing,
        "an expired key cannot be extended"
    );
    assert!(
        store
            .try_set("conformance-expiry", &second, TTL)
            .await?,
        "an expired key should be free"
    );
    Ok(())
}
