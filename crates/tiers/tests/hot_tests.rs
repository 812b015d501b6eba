//! Reference-counting semantics of the hot storage.

mod common;

use bytes::Bytes;
use common::mocks::MemoryHotClient;
use permafrost_core::{Cid, UserId};
use permafrost_metadata::{PinRepo, SqliteStore};
use permafrost_tiers::{HotStorage, TierError};
use std::sync::Arc;
use time::OffsetDateTime;

async fn setup() -> (HotStorage, Arc<MemoryHotClient>, Arc<SqliteStore>) {
    let client = MemoryHotClient::new();
    let repo = Arc::new(SqliteStore::in_memory().await.unwrap());
    let hot = HotStorage::new(client.clone(), repo.clone()).await.unwrap();
    (hot, client, repo)
}

fn user(id: &str) -> UserId {
    UserId::new(id)
}

fn now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

#[tokio::test]
async fn pin_is_idempotent() {
    let (hot, client, _) = setup().await;
    let cid = client.seed_network(Bytes::from_static(b"blob-1"));

    let size_a = hot.pin(&user("u1"), &cid).await.unwrap();
    let size_b = hot.pin(&user("u1"), &cid).await.unwrap();
    assert_eq!(size_a, size_b);

    let pinned = hot.pinned_cids().await;
    assert_eq!(pinned.len(), 1);
    assert_eq!(pinned[0].pins.len(), 1);
    assert!(!pinned[0].pins[0].staged);
}

#[tokio::test]
async fn stage_pin_unpin_reverts_entirely() {
    let (hot, client, _) = setup().await;
    let cid = hot
        .stage(&user("u1"), Bytes::from_static(b"blob-2"))
        .await
        .unwrap();
    hot.pin(&user("u1"), &cid).await.unwrap();
    hot.unpin(&user("u1"), &cid).await.unwrap();

    assert!(!hot.is_pinned(&user("u1"), &cid).await.unwrap());
    assert!(!client.physically_pinned(&cid));
    assert!(hot.pinned_cids().await.is_empty());
}

#[tokio::test]
async fn physical_pin_survives_until_last_user_unpins() {
    let (hot, client, _) = setup().await;
    let cid = client.seed_network(Bytes::from_static(b"blob-3"));

    hot.pin(&user("u1"), &cid).await.unwrap();
    hot.pin(&user("u2"), &cid).await.unwrap();

    hot.unpin(&user("u1"), &cid).await.unwrap();
    assert!(client.physically_pinned(&cid));
    assert!(!hot.is_pinned(&user("u1"), &cid).await.unwrap());
    assert!(hot.is_pinned(&user("u2"), &cid).await.unwrap());

    hot.unpin(&user("u2"), &cid).await.unwrap();
    assert!(!client.physically_pinned(&cid));
}

#[tokio::test]
async fn unpin_without_entry_fails() {
    let (hot, client, _) = setup().await;
    let cid = client.seed_network(Bytes::from_static(b"blob-4"));
    hot.pin(&user("u1"), &cid).await.unwrap();

    match hot.unpin(&user("u2"), &cid).await {
        Err(TierError::UnpinnedCid) => {}
        other => panic!("expected UnpinnedCid, got {other:?}"),
    }
    match hot.unpin(&user("u1"), &Cid::new("missing")).await {
        Err(TierError::UnpinnedCid) => {}
        other => panic!("expected UnpinnedCid, got {other:?}"),
    }
}

#[tokio::test]
async fn replace_moves_the_users_pin() {
    let (hot, client, _) = setup().await;
    let old = client.seed_network(Bytes::from_static(b"old"));
    let new = client.seed_network(Bytes::from_static(b"new"));
    hot.pin(&user("u1"), &old).await.unwrap();

    hot.replace(&user("u1"), &old, &new).await.unwrap();
    assert!(!hot.is_pinned(&user("u1"), &old).await.unwrap());
    assert!(hot.is_pinned(&user("u1"), &new).await.unwrap());
    assert!(!client.physically_pinned(&old));
    assert!(client.physically_pinned(&new));
}

#[tokio::test]
async fn replace_from_unpinned_source_fails() {
    let (hot, client, _) = setup().await;
    let new = client.seed_network(Bytes::from_static(b"new"));

    match hot.replace(&user("u1"), &Cid::new("missing"), &new).await {
        Err(TierError::ReplaceFromNotPinned) => {}
        other => panic!("expected ReplaceFromNotPinned, got {other:?}"),
    }
}

#[tokio::test]
async fn replace_keeps_other_users_old_pin() {
    let (hot, client, _) = setup().await;
    let old = client.seed_network(Bytes::from_static(b"old"));
    let new = client.seed_network(Bytes::from_static(b"new"));
    hot.pin(&user("u1"), &old).await.unwrap();
    hot.pin(&user("u2"), &old).await.unwrap();

    hot.replace(&user("u1"), &old, &new).await.unwrap();
    // u2 still holds the old cid, so it stays physically pinned.
    assert!(client.physically_pinned(&old));
    assert!(hot.is_pinned(&user("u2"), &old).await.unwrap());
}

#[tokio::test]
async fn staging_over_a_strong_pin_keeps_it_strong() {
    let (hot, client, _) = setup().await;
    let data = Bytes::from_static(b"blob-5");
    let cid = client.seed_network(data.clone());
    hot.pin(&user("u1"), &cid).await.unwrap();

    let staged_cid = hot.stage(&user("u1"), data).await.unwrap();
    assert_eq!(staged_cid, cid);

    let pinned = hot.pinned_cids().await;
    assert_eq!(pinned.len(), 1);
    assert!(!pinned[0].pins[0].staged, "strong pin must win over a stage");
}

#[tokio::test]
async fn gc_staged_collects_only_all_staged_old_cids() {
    let (hot, client, _) = setup().await;
    let staged = hot
        .stage(&user("u1"), Bytes::from_static(b"staged-only"))
        .await
        .unwrap();
    let strong = client.seed_network(Bytes::from_static(b"strong"));
    hot.pin(&user("u2"), &strong).await.unwrap();

    let removed = hot.gc_staged(&[], now() + 1).await.unwrap();
    assert_eq!(removed, vec![staged.clone()]);
    assert!(!client.physically_pinned(&staged));
    assert!(client.physically_pinned(&strong));

    // Idempotent: a second pass finds nothing.
    assert!(hot.gc_staged(&[], now() + 1).await.unwrap().is_empty());
}

#[tokio::test]
async fn gc_staged_honors_exclude_and_age() {
    let (hot, _, _) = setup().await;
    let excluded = hot
        .stage(&user("u1"), Bytes::from_static(b"excluded"))
        .await
        .unwrap();
    let young = hot
        .stage(&user("u1"), Bytes::from_static(b"young"))
        .await
        .unwrap();

    // Cutoff in the past: nothing is old enough.
    assert!(hot.gc_staged(&[], now() - 3_600).await.unwrap().is_empty());

    // Excluded cid survives even past the cutoff.
    let removed = hot
        .gc_staged(std::slice::from_ref(&excluded), now() + 1)
        .await
        .unwrap();
    assert_eq!(removed, vec![young]);
    assert!(hot.is_pinned(&user("u1"), &excluded).await.unwrap());
}

#[tokio::test]
async fn stage_cid_pulls_from_network() {
    let (hot, client, _) = setup().await;
    let data = Bytes::from_static(b"remote");
    let cid = client.seed_network(data.clone());

    hot.stage_cid(&user("u1"), &cid).await.unwrap();
    assert!(hot.is_pinned(&user("u1"), &cid).await.unwrap());
    assert_eq!(hot.get(&cid).await.unwrap(), data);

    match hot.stage_cid(&user("u1"), &Cid::new("not-in-network")).await {
        Err(TierError::Hot(_)) => {}
        other => panic!("expected hot client error, got {other:?}"),
    }
}

#[tokio::test]
async fn references_reload_after_restart() {
    let client = MemoryHotClient::new();
    let repo = Arc::new(SqliteStore::in_memory().await.unwrap());
    let cid;
    {
        let hot = HotStorage::new(client.clone(), repo.clone()).await.unwrap();
        cid = client.seed_network(Bytes::from_static(b"durable"));
        hot.pin(&user("u1"), &cid).await.unwrap();
    }

    // Rebuild over the same repo: counts come back.
    let hot = HotStorage::new(client.clone(), repo.clone()).await.unwrap();
    assert!(hot.is_pinned(&user("u1"), &cid).await.unwrap());
    assert_eq!(repo.all_pins().await.unwrap().len(), 1);
}
