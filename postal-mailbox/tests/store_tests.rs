//! Concurrency and fault behaviour of the bundled mailbox stores

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{sync::Arc, time::Duration};

use postal_mailbox::{
    MailId, MailRecord, MailStatus, MailboxStore, MailboxTransaction, MemoryMailboxStore,
    Recipients, TestMailboxStore, TransitionFields,
};
use pretty_assertions::assert_eq;

fn record() -> MailRecord {
    MailRecord::new(
        MailId::generate(),
        Recipients::new("payments", Some("captured".into()), None).unwrap(),
        br#"{"amount":10}"#.as_slice(),
        "PaymentCaptured",
        0,
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[cfg_attr(miri, ignore = "Miri does not support multi-threaded runtimes")]
async fn exactly_one_claimant_wins() {
    let store = Arc::new(MemoryMailboxStore::new());
    let mail = record();
    store.create(mail.clone()).await.unwrap();

    let mut handles = Vec::new();
    for worker in 0..16 {
        let store = Arc::clone(&store);
        let mail_id = mail.mail_id.clone();
        handles.push(tokio::spawn(async move {
            store
                .transition_status(
                    &mail_id,
                    MailStatus::Pending,
                    MailStatus::Sending,
                    TransitionFields::at(worker),
                )
                .await
                .unwrap()
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }

    assert_eq!(winners, 1);
    assert_eq!(
        store.get(&mail.mail_id).await.unwrap().unwrap().status,
        MailStatus::Sending
    );
}

#[tokio::test]
async fn outage_is_surfaced() {
    let store = TestMailboxStore::new();
    let mail = record();
    store.create(mail.clone()).await.unwrap();

    store.set_unavailable(true);
    let err = store
        .find_due_for_status(MailStatus::Pending, 0)
        .await
        .unwrap_err();
    assert!(err.is_transient());
    assert!(store.create(record()).await.is_err());

    store.set_unavailable(false);
    assert!(
        store
            .find_due_for_status(MailStatus::Pending, 0)
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn claims_are_counted_and_awaitable() {
    let store = TestMailboxStore::new();
    let mail = record();
    store.create(mail.clone()).await.unwrap();

    let waiter = {
        let store = store.clone();
        tokio::spawn(async move {
            store
                .wait_for_count(MailStatus::Sending, 1, Duration::from_secs(5))
                .await
        })
    };

    tokio::task::yield_now().await;
    store
        .transition_status(
            &mail.mail_id,
            MailStatus::Pending,
            MailStatus::Sending,
            TransitionFields::at(1),
        )
        .await
        .unwrap();

    waiter.await.unwrap().unwrap();
    assert_eq!(store.claim_count(&mail.mail_id), 1);
    assert_eq!(store.count(MailStatus::Sending), 1);
}

#[tokio::test]
async fn wait_times_out() {
    let store = TestMailboxStore::new();
    let result = store
        .wait_for_count(MailStatus::Sent, 1, Duration::from_millis(20))
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn committed_transaction_is_visible_to_dispatch_queries() {
    let store = TestMailboxStore::new();
    let first = record();
    let second = record();

    let mut tx = store.begin().await.unwrap();
    tx.create(first.clone()).await.unwrap();
    tx.create(second.clone()).await.unwrap();
    assert!(store.is_empty());
    tx.commit().await.unwrap();

    assert_eq!(store.len(), 2);
    let due = store
        .find_due_for_status(MailStatus::Pending, 0)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(due.id, Some(1));
    assert_eq!(due.mail_id, first.mail_id);
}
