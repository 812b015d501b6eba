//! End-to-end reconciliation scenarios over mock tiers.

mod common;

use bytes::Bytes;
use common::mocks::StoreMode;
use common::{Harness, hot_cold_config, hot_only_config, test_config, user};
use permafrost_core::{
    Cid, DealRecordsFilter, DealState, DealUpdate, FilStorage, JobStatus, StorageInfo,
};
use permafrost_metadata::{StartedDealsRepo, StorageInfoRepo};
use permafrost_scheduler::{PushOptions, SchedulerError};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(10);

fn push_opts(config: permafrost_core::StorageConfig) -> PushOptions {
    PushOptions {
        config: Some(config),
        override_config: false,
    }
}

fn override_opts(config: permafrost_core::StorageConfig) -> PushOptions {
    PushOptions {
        config: Some(config),
        override_config: true,
    }
}

#[tokio::test]
async fn s1_default_push_single_replica() {
    let h = Harness::start().await;
    let cid = h.hot_client.seed_network(Bytes::from_static(b"blob-s1"));

    let job_id = h
        .coordinator
        .push_config(&user("u1"), &cid, push_opts(hot_cold_config()))
        .await
        .unwrap();
    let job = h.await_terminal(&job_id, WAIT).await;
    assert_eq!(job.status, JobStatus::Success, "cause: {}", job.error_cause);
    assert!(job.deal_errors.is_empty());

    // Hot tier has the cid pinned.
    assert!(h.hot_client.physically_pinned(&cid));

    // Storage info reflects one active proposal.
    let info = h.coordinator.get_storage_info(&user("u1"), &cid).await.unwrap();
    assert!(info.hot.enabled);
    assert!(info.cold.enabled);
    assert_eq!(info.cold.filecoin.proposals.len(), 1);
    assert_eq!(info.job_id, job_id);

    // Exactly one final storage-deal record for the cid, not pending.
    let records = h
        .coordinator
        .list_storage_records(&DealRecordsFilter {
            include_pending: false,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].root_cid, cid);
    assert!(!records[0].pending);
    assert!(records[0].err_msg.is_empty());

    // No pending leftovers.
    let pending = h
        .coordinator
        .list_storage_records(&DealRecordsFilter {
            include_final: false,
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(pending.is_empty());
}

#[tokio::test]
async fn s2_cold_disabled_replace() {
    let h = Harness::start().await;
    let c1 = h.hot_client.seed_network(Bytes::from_static(b"blob-s2-a"));
    let c2 = h.hot_client.seed_network(Bytes::from_static(b"blob-s2-b"));

    let job1 = h
        .coordinator
        .push_config(&user("u1"), &c1, push_opts(hot_only_config()))
        .await
        .unwrap();
    let job = h.await_terminal(&job1, WAIT).await;
    assert_eq!(job.status, JobStatus::Success, "cause: {}", job.error_cause);

    let job2 = h
        .coordinator
        .push_replace(&user("u1"), &c2, &c1)
        .await
        .unwrap();
    let job = h.await_terminal(&job2, WAIT).await;
    assert_eq!(job.status, JobStatus::Success, "cause: {}", job.error_cause);

    // The old cid's config is gone; the new cid inherited it.
    match h.coordinator.get_storage_config(&user("u1"), &c1).await {
        Err(SchedulerError::NotFound(_)) => {}
        other => panic!("expected NotFound, got {other:?}"),
    }
    let cfg = h.coordinator.get_storage_config(&user("u1"), &c2).await.unwrap();
    assert_eq!(cfg, hot_only_config());

    // The pin moved.
    assert!(!h.hot_client.physically_pinned(&c1));
    assert!(h.hot_client.physically_pinned(&c2));
}

#[tokio::test]
async fn s3_rep_factor_decrease_does_not_retract() {
    let h = Harness::start().await;
    let cid = h.hot_client.seed_network(Bytes::from_static(b"blob-s3"));

    let cfg2 = hot_cold_config().with_rep_factor(2);
    let job1 = h
        .coordinator
        .push_config(&user("u1"), &cid, push_opts(cfg2))
        .await
        .unwrap();
    let job = h.await_terminal(&job1, WAIT).await;
    assert_eq!(job.status, JobStatus::Success, "cause: {}", job.error_cause);
    let info = h.coordinator.get_storage_info(&user("u1"), &cid).await.unwrap();
    assert_eq!(info.cold.filecoin.proposals.len(), 2);

    // Lowering the rep factor can't retract deals already on-chain.
    let cfg1 = hot_cold_config().with_rep_factor(1);
    let job2 = h
        .coordinator
        .push_config(&user("u1"), &cid, override_opts(cfg1.clone()))
        .await
        .unwrap();
    let job = h.await_terminal(&job2, WAIT).await;
    assert_eq!(job.status, JobStatus::Success, "cause: {}", job.error_cause);

    let info = h.coordinator.get_storage_info(&user("u1"), &cid).await.unwrap();
    assert_eq!(info.cold.filecoin.proposals.len(), 2);
    let stored = h.coordinator.get_storage_config(&user("u1"), &cid).await.unwrap();
    assert_eq!(stored.cold.filecoin.rep_factor, 1);
}

#[tokio::test]
async fn s4_unfreeze_restores_hot_copy() {
    let h = Harness::start().await;
    let data = Bytes::from_static(b"blob-s4");
    let cid = h.hot_client.seed_network(data.clone());

    // Cold-only with unfreeze allowed.
    let mut cfg = hot_cold_config();
    cfg.hot.enabled = false;
    cfg.hot.allow_unfreeze = true;
    cfg.hot.unfreeze_max_price = 100;
    let job1 = h
        .coordinator
        .push_config(&user("u1"), &cid, push_opts(cfg))
        .await
        .unwrap();
    let job = h.await_terminal(&job1, WAIT).await;
    assert_eq!(job.status, JobStatus::Success, "cause: {}", job.error_cause);

    // The data disappears from the hot tier entirely: the staged
    // reference is dropped and the node loses the blocks.
    h.hot.unpin(&user("u1"), &cid).await.unwrap();
    h.hot_client.evict(&cid);
    h.cold.set_fetch_data(data.clone());

    // Re-enabling hot must go through the cold-tier retrieval.
    let mut cfg = hot_cold_config();
    cfg.hot.allow_unfreeze = true;
    cfg.hot.unfreeze_max_price = 100;
    let job2 = h
        .coordinator
        .push_config(&user("u1"), &cid, override_opts(cfg))
        .await
        .unwrap();
    let job = h.await_terminal(&job2, WAIT).await;
    assert_eq!(job.status, JobStatus::Success, "cause: {}", job.error_cause);

    // Original bytes are readable again.
    let read = h.coordinator.get(&user("u1"), &cid).await.unwrap();
    assert_eq!(read, data);

    // A retrieval-deal record was journaled for the unfreeze.
    let retrievals = h
        .coordinator
        .list_retrieval_records(&DealRecordsFilter::default())
        .await
        .unwrap();
    assert_eq!(retrievals.len(), 1);
    assert_eq!(retrievals[0].deal_info.root_cid, cid);
}

#[tokio::test]
async fn s5_cancel_executing_job() {
    let h = Harness::start().await;
    let cid = h.hot_client.seed_network(Bytes::from_static(b"blob-s5"));

    // Deals stay sealing so the job parks in the deal-watch suspension
    // point.
    h.cold.set_mode(StoreMode::Seal);
    let job_id = h
        .coordinator
        .push_config(&user("u1"), &cid, push_opts(hot_cold_config()))
        .await
        .unwrap();
    h.await_status(&job_id, JobStatus::Executing, WAIT).await;

    // Give the engine a beat to reach the deal wait, then cancel.
    tokio::time::sleep(Duration::from_millis(50)).await;
    h.coordinator.cancel_job(&job_id).await.unwrap();

    let job = h.await_terminal(&job_id, Duration::from_secs(2)).await;
    assert_eq!(job.status, JobStatus::Canceled);

    // No storage info was recorded for the canceled run.
    match h.coordinator.get_storage_info(&user("u1"), &cid).await {
        Err(SchedulerError::NotFound(_)) => {}
        other => panic!("expected NotFound, got {other:?}"),
    }
}

#[tokio::test]
async fn s5_cancel_queued_job_is_immediate() {
    let h = Harness::start().await;
    let cid = h.hot_client.seed_network(Bytes::from_static(b"blob-s5q"));

    h.cold.set_mode(StoreMode::Seal);
    let running = h
        .coordinator
        .push_config(&user("u1"), &cid, push_opts(hot_cold_config()))
        .await
        .unwrap();
    h.await_status(&running, JobStatus::Executing, WAIT).await;

    // Queued behind the executing job for the same pair.
    let queued = h
        .coordinator
        .push_config(&user("u1"), &cid, override_opts(hot_cold_config()))
        .await
        .unwrap();
    h.coordinator.cancel_job(&queued).await.unwrap();
    let job = h.scheduler.get_job(&queued).await.unwrap();
    assert_eq!(job.status, JobStatus::Canceled);

    // Clean up the parked job too.
    h.coordinator.cancel_job(&running).await.unwrap();
    h.await_terminal(&running, Duration::from_secs(2)).await;
}

#[tokio::test]
async fn s6_restart_resumes_started_deals() {
    // Seed a datastore as if the process died mid-execution: an
    // Executing job with its action and a started-deals trail.
    let dir = tempfile::tempdir().unwrap();
    let cid;
    let job_id;
    let proposal = Cid::new("prop-detached");
    {
        use permafrost_metadata::{ActionRepo, JobRepo};

        let sqlite = permafrost_metadata::SqliteStore::new(dir.path().join("meta.db"))
            .await
            .unwrap();
        cid = common::mocks::cid_of(b"blob-s6");
        let mut job = permafrost_core::Job::queued(user("u1"), cid.clone());
        job.status = JobStatus::Executing;
        job_id = job.id.clone();
        sqlite.put_job(&job).await.unwrap();
        sqlite
            .put_storage_action(
                &job.id,
                &permafrost_core::StorageAction {
                    user_id: user("u1"),
                    cid: cid.clone(),
                    config: hot_cold_config(),
                    replaced_cid: None,
                },
            )
            .await
            .unwrap();
        sqlite
            .put_started_deals(&user("u1"), &cid, std::slice::from_ref(&proposal))
            .await
            .unwrap();
    }

    let h = Harness::restart(dir, test_config()).await;
    // Make the data and the detached deal resolvable.
    h.hot_client.seed_network(Bytes::from_static(b"blob-s6"));
    h.cold.seed_deal(DealUpdate {
        proposal_cid: proposal.clone(),
        state: DealState::Active,
        miner: "t01000".to_string(),
        piece_cid: Cid::new("piece-s6"),
        size: 1 << 20,
        price_per_epoch: 42,
        start_epoch: 1_000,
        duration: permafrost_core::MIN_DEAL_DURATION,
        deal_id: 99,
        activation_epoch: 1_001,
        message: String::new(),
    });

    let job = h.await_terminal(&job_id, WAIT).await;
    assert_eq!(job.status, JobStatus::Success, "cause: {}", job.error_cause);

    // The resumed proposal landed in storage info and the trail cleared.
    let info = h.coordinator.get_storage_info(&user("u1"), &cid).await.unwrap();
    assert!(info
        .cold
        .filecoin
        .proposals
        .iter()
        .any(|p| p.proposal_cid == proposal));
    assert!(h
        .store
        .get_started_deals(&user("u1"), &cid)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn partial_deal_failure_still_succeeds() {
    let h = Harness::start().await;
    let cid = h.hot_client.seed_network(Bytes::from_static(b"blob-partial"));
    // Two replicas; the second miner fails terminally.
    h.cold.fail_miner("t01001");

    let job_id = h
        .coordinator
        .push_config(
            &user("u1"),
            &cid,
            push_opts(hot_cold_config().with_rep_factor(2)),
        )
        .await
        .unwrap();
    let job = h.await_terminal(&job_id, WAIT).await;
    assert_eq!(job.status, JobStatus::Success, "cause: {}", job.error_cause);
    assert_eq!(job.deal_errors.len(), 1);
    assert_eq!(job.deal_errors[0].miner, "t01001");

    let info = h.coordinator.get_storage_info(&user("u1"), &cid).await.unwrap();
    assert_eq!(info.cold.filecoin.proposals.len(), 1);

    // The failed proposal moved to a final failed record.
    let failed = h
        .coordinator
        .list_storage_records(&DealRecordsFilter {
            include_failed: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(failed.len(), 1);
    assert!(!failed[0].err_msg.is_empty());
}

#[tokio::test]
async fn all_proposals_rejected_fails_job() {
    let h = Harness::start().await;
    let cid = h.hot_client.seed_network(Bytes::from_static(b"blob-rejected"));
    h.cold.set_mode(StoreMode::RejectAll);

    let job_id = h
        .coordinator
        .push_config(&user("u1"), &cid, push_opts(hot_cold_config()))
        .await
        .unwrap();
    let job = h.await_terminal(&job_id, WAIT).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_cause.contains("all proposals were rejected"));
    assert!(!job.deal_errors.is_empty());
}

#[tokio::test]
async fn all_started_deals_failing_fails_job() {
    let h = Harness::start().await;
    let cid = h.hot_client.seed_network(Bytes::from_static(b"blob-allfail"));
    h.cold.fail_miner("t01000");

    let job_id = h
        .coordinator
        .push_config(&user("u1"), &cid, push_opts(hot_cold_config()))
        .await
        .unwrap();
    let job = h.await_terminal(&job_id, WAIT).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_cause.contains("all started deals failed"));
}

#[tokio::test]
async fn hot_pin_failure_without_unfreeze_fails_job() {
    let h = Harness::start().await;
    // Never seeded: the pin can't succeed, and there are no deals to
    // unfreeze from.
    let cid = Cid::new("mock-unreachable");

    let job_id = h
        .coordinator
        .push_config(&user("u1"), &cid, push_opts(hot_only_config()))
        .await
        .unwrap();
    let job = h.await_terminal(&job_id, WAIT).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_cause.contains("pinning cid in hot storage"));

    // A failed job never touches storage info.
    match h.coordinator.get_storage_info(&user("u1"), &cid).await {
        Err(SchedulerError::NotFound(_)) => {}
        other => panic!("expected NotFound, got {other:?}"),
    }
}

#[tokio::test]
async fn watcher_notification_completes_sealing_deal() {
    let h = Harness::start().await;
    let cid = h.hot_client.seed_network(Bytes::from_static(b"blob-watch"));
    h.cold.set_mode(StoreMode::Seal);

    let job_id = h
        .coordinator
        .push_config(&user("u1"), &cid, push_opts(hot_cold_config()))
        .await
        .unwrap();
    h.await_status(&job_id, JobStatus::Executing, WAIT).await;

    // Wait for the proposal to exist, then activate it; the watcher
    // notification makes the engine re-query well before its poll tick.
    let deadline = tokio::time::Instant::now() + WAIT;
    let proposal = loop {
        if let Some(p) = h.cold.proposals().into_iter().find(|p| {
            p.as_str().contains(cid.as_str())
        }) {
            break p;
        }
        assert!(tokio::time::Instant::now() < deadline, "no proposal started");
        tokio::time::sleep(Duration::from_millis(10)).await;
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    h.cold.activate(&proposal).await;

    let job = h.await_terminal(&job_id, WAIT).await;
    assert_eq!(job.status, JobStatus::Success, "cause: {}", job.error_cause);
}

#[tokio::test]
async fn deal_wait_times_out_as_failure() {
    let mut cfg = test_config();
    cfg.deal_finality_timeout_secs = 1;
    let h = Harness::start_with(cfg).await;
    let cid = h.hot_client.seed_network(Bytes::from_static(b"blob-timeout"));
    h.cold.set_mode(StoreMode::Seal);

    let job_id = h
        .coordinator
        .push_config(&user("u1"), &cid, push_opts(hot_cold_config()))
        .await
        .unwrap();
    let job = h.await_terminal(&job_id, WAIT).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job
        .deal_errors
        .iter()
        .any(|e| e.message == "watching timeout"));
}

#[tokio::test]
async fn renewal_re_proposes_to_same_miner() {
    let h = Harness::start().await;
    let data = Bytes::from_static(b"blob-renew");
    let cid = h.hot_client.seed_network(data);

    // Existing info: one deal from t0AAA expiring within the threshold.
    let old_proposal = Cid::new("prop-old");
    h.cold.seed_deal(DealUpdate {
        proposal_cid: old_proposal.clone(),
        state: DealState::Active,
        miner: "t0AAA".to_string(),
        piece_cid: Cid::new("piece-renew"),
        size: 1 << 20,
        price_per_epoch: 42,
        start_epoch: 90,
        duration: 1_000,
        deal_id: 7,
        activation_epoch: 100,
        message: String::new(),
    });
    let mut info = StorageInfo::new(user("u1"), cid.clone());
    info.cold.enabled = true;
    info.cold.filecoin.data_cid = cid.clone();
    info.cold.filecoin.proposals = vec![FilStorage {
        proposal_cid: old_proposal.clone(),
        piece_cid: Cid::new("piece-renew"),
        deal_id: 7,
        miner: "t0AAA".to_string(),
        duration: 1_000,
        start_epoch: 90,
        activation_epoch: 100,
        epoch_price: 42,
        renewed: false,
    }];
    h.store.put_storage_info(&info).await.unwrap();

    // Expiry is 1_100; with a threshold of 200 the deal is renewable
    // from epoch 900 on.
    h.cold.set_epoch(950);
    let cfg = hot_cold_config().with_renew(true, 200);
    let job_id = h
        .coordinator
        .push_config(&user("u1"), &cid, push_opts(cfg))
        .await
        .unwrap();
    let job = h.await_terminal(&job_id, WAIT).await;
    assert_eq!(job.status, JobStatus::Success, "cause: {}", job.error_cause);

    let info = h.coordinator.get_storage_info(&user("u1"), &cid).await.unwrap();
    assert_eq!(info.cold.filecoin.proposals.len(), 2);
    let old = info
        .cold
        .filecoin
        .proposals
        .iter()
        .find(|p| p.proposal_cid == old_proposal)
        .expect("old proposal kept");
    assert!(old.renewed);
    let new = info
        .cold
        .filecoin
        .proposals
        .iter()
        .find(|p| p.proposal_cid != old_proposal)
        .expect("new proposal added");
    assert_eq!(new.miner, "t0AAA", "renewal must go to the original miner");
    assert!(!new.renewed);
}

#[tokio::test]
async fn young_deals_skip_renewal() {
    let h = Harness::start().await;
    let cid = h.hot_client.seed_network(Bytes::from_static(b"blob-young"));

    let old_proposal = Cid::new("prop-young");
    h.cold.seed_deal(DealUpdate {
        proposal_cid: old_proposal.clone(),
        state: DealState::Active,
        miner: "t0AAA".to_string(),
        piece_cid: Cid::new("piece-young"),
        size: 1 << 20,
        price_per_epoch: 42,
        start_epoch: 90,
        duration: 100_000,
        deal_id: 8,
        activation_epoch: 100,
        message: String::new(),
    });
    let mut info = StorageInfo::new(user("u1"), cid.clone());
    info.cold.enabled = true;
    info.cold.filecoin.data_cid = cid.clone();
    info.cold.filecoin.proposals = vec![FilStorage {
        proposal_cid: old_proposal.clone(),
        piece_cid: Cid::new("piece-young"),
        deal_id: 8,
        miner: "t0AAA".to_string(),
        duration: 100_000,
        start_epoch: 90,
        activation_epoch: 100,
        epoch_price: 42,
        renewed: false,
    }];
    h.store.put_storage_info(&info).await.unwrap();

    h.cold.set_epoch(950);
    let cfg = hot_cold_config().with_renew(true, 200);
    let job_id = h
        .coordinator
        .push_config(&user("u1"), &cid, push_opts(cfg))
        .await
        .unwrap();
    let job = h.await_terminal(&job_id, WAIT).await;
    assert_eq!(job.status, JobStatus::Success, "cause: {}", job.error_cause);

    // Nothing to renew and nothing missing: no new deals at all.
    let info = h.coordinator.get_storage_info(&user("u1"), &cid).await.unwrap();
    assert_eq!(info.cold.filecoin.proposals.len(), 1);
    assert!(!info.cold.filecoin.proposals[0].renewed);
}

#[tokio::test]
async fn dropped_on_chain_deals_are_repaired() {
    let h = Harness::start().await;
    let cid = h.hot_client.seed_network(Bytes::from_static(b"blob-repair"));

    // Stored info references a proposal the chain no longer knows.
    let mut info = StorageInfo::new(user("u1"), cid.clone());
    info.cold.enabled = true;
    info.cold.filecoin.data_cid = cid.clone();
    info.cold.filecoin.proposals = vec![FilStorage {
        proposal_cid: Cid::new("prop-vanished"),
        piece_cid: Cid::new("piece-repair"),
        deal_id: 9,
        miner: "t0BBB".to_string(),
        duration: 1_000,
        start_epoch: 90,
        activation_epoch: 100,
        epoch_price: 42,
        renewed: false,
    }];
    h.store.put_storage_info(&info).await.unwrap();

    let job_id = h
        .coordinator
        .push_config(&user("u1"), &cid, push_opts(hot_cold_config()))
        .await
        .unwrap();
    let job = h.await_terminal(&job_id, WAIT).await;
    assert_eq!(job.status, JobStatus::Success, "cause: {}", job.error_cause);

    // The vanished proposal was dropped and replaced by a fresh deal.
    let info = h.coordinator.get_storage_info(&user("u1"), &cid).await.unwrap();
    assert_eq!(info.cold.filecoin.proposals.len(), 1);
    assert_ne!(info.cold.filecoin.proposals[0].proposal_cid, Cid::new("prop-vanished"));
}
