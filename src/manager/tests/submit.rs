use super::{ScriptedFetcher, days_request, drain_events, manager_in, store_in};
use crate::error::Error;
use crate::types::{
    Event, NewRequest, Priority, RequestId, RequestParams, Status, StatusFilter, SubmitResult,
};
use chrono::{TimeDelta, Utc};
use tempfile::tempdir;

#[tokio::test]
async fn submit_records_and_enqueues() {
    let dir = tempdir().unwrap();
    let manager = manager_in(dir.path(), ScriptedFetcher::new()).await;
    let mut rx = manager.subscribe();

    let outcome = manager
        .submit(days_request("crawl-1", 1, 3).with_priority(5))
        .await
        .unwrap();

    assert_eq!(outcome.id, RequestId::from("crawl-1"));
    assert_eq!(outcome.result, SubmitResult::Queued);

    let request = manager.get_request(&outcome.id).await.unwrap();
    assert_eq!(request.status, Status::Queued);
    assert_eq!(request.priority, Priority(5));
    assert!(request.progress.is_none());
    assert_eq!(manager.queue_snapshot().await, vec![outcome.id.clone()]);

    let events = drain_events(&mut rx);
    assert!(matches!(
        events.as_slice(),
        [Event::Queued { id, priority }] if id.as_str() == "crawl-1" && *priority == Priority(5)
    ));
}

#[tokio::test]
async fn submit_persists_before_returning() {
    let dir = tempdir().unwrap();
    let manager = manager_in(dir.path(), ScriptedFetcher::new()).await;

    manager.submit(days_request("durable", 1, 2)).await.unwrap();

    let snapshot = store_in(dir.path()).load().await.unwrap().unwrap();
    assert_eq!(snapshot.requests.len(), 1);
    assert_eq!(snapshot.requests[0].id.as_str(), "durable");
    assert_eq!(snapshot.requests[0].status, Status::Queued);
}

#[tokio::test]
async fn resubmitting_an_id_leaves_the_record_untouched() {
    let dir = tempdir().unwrap();
    let manager = manager_in(dir.path(), ScriptedFetcher::new()).await;
    manager.submit(days_request("same", 1, 2)).await.unwrap();
    let before = manager.get_request(&RequestId::from("same")).await.unwrap();

    let again = manager
        .submit(days_request("same", 5, 9).with_priority(1))
        .await
        .unwrap();

    assert_eq!(
        again.result,
        SubmitResult::AlreadyExists {
            status: Status::Queued
        }
    );
    let after = manager.get_request(&RequestId::from("same")).await.unwrap();
    assert_eq!(before, after);
    assert_eq!(manager.queue_snapshot().await.len(), 1);
}

#[tokio::test]
async fn identical_requests_without_id_collapse_in_one_batch() {
    let dir = tempdir().unwrap();
    let manager = manager_in(dir.path(), ScriptedFetcher::new()).await;
    let request = NewRequest::new("scripted", "search", RequestParams::query("rust"));

    let outcomes = manager
        .submit_batch(vec![request.clone(), request])
        .await
        .unwrap();

    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].id, outcomes[1].id);
    assert_eq!(outcomes[0].result, SubmitResult::Queued);
    assert_eq!(
        outcomes[1].result,
        SubmitResult::AlreadyExists {
            status: Status::Queued
        }
    );
    assert_eq!(manager.list_requests(&StatusFilter::All).await.len(), 1);
}

#[tokio::test]
async fn unknown_adapter_and_empty_id_are_rejected() {
    let dir = tempdir().unwrap();
    let manager = manager_in(dir.path(), ScriptedFetcher::new()).await;

    let outcomes = manager
        .submit_batch(vec![
            NewRequest::new("nowhere", "search", RequestParams::query("x")).with_id("lost"),
            days_request("", 1, 2),
            days_request("kept", 1, 2),
        ])
        .await
        .unwrap();

    assert!(matches!(
        &outcomes[0].result,
        SubmitResult::Rejected { reason } if reason.contains("nowhere")
    ));
    assert!(matches!(outcomes[1].result, SubmitResult::Rejected { .. }));
    assert_eq!(outcomes[2].result, SubmitResult::Queued);

    let ids: Vec<_> = manager
        .list_requests(&StatusFilter::All)
        .await
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(ids, vec![RequestId::from("kept")]);
}

#[tokio::test]
async fn missing_range_defaults_to_lookback_ending_now() {
    let dir = tempdir().unwrap();
    let manager = manager_in(dir.path(), ScriptedFetcher::new()).await;
    let before = Utc::now();

    manager
        .submit(NewRequest::new("scripted", "search", RequestParams::query("q")).with_id("open"))
        .await
        .unwrap();

    let request = manager.get_request(&RequestId::from("open")).await.unwrap();
    assert!(request.range.until >= before);
    assert!(request.range.until <= Utc::now());
    assert_eq!(request.range.span(), TimeDelta::days(90));
}

#[tokio::test]
async fn submit_after_shutdown_is_refused() {
    let dir = tempdir().unwrap();
    let manager = manager_in(dir.path(), ScriptedFetcher::new()).await;
    manager.shutdown().await.unwrap();

    let err = manager.submit(days_request("late", 1, 2)).await.unwrap_err();

    assert!(matches!(err, Error::ShuttingDown));
    assert!(manager.list_requests(&StatusFilter::All).await.is_empty());
}

#[tokio::test]
async fn submission_keeps_cancellation_written_by_another_manager() {
    let dir = tempdir().unwrap();
    let manager = manager_in(dir.path(), ScriptedFetcher::new()).await;
    manager.submit(days_request("q1", 1, 2)).await.unwrap();

    let other = manager_in(dir.path(), ScriptedFetcher::new()).await;
    other
        .clear_requests(crate::types::ClearTarget::Ids(vec![RequestId::from("q1")]))
        .await
        .unwrap();

    manager.submit(days_request("q2", 1, 2)).await.unwrap();

    let stored = store_in(dir.path()).load().await.unwrap().unwrap();
    let q1 = stored.requests.iter().find(|r| r.id.as_str() == "q1").unwrap();
    assert_eq!(q1.status, Status::Cancelled);
    let local = manager.get_request(&RequestId::from("q1")).await.unwrap();
    assert_eq!(local.status, Status::Cancelled);
    assert_eq!(manager.queue_snapshot().await, vec![RequestId::from("q2")]);
}
