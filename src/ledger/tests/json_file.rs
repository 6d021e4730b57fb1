use super::{at, sample_request};
use crate::error::Error;
use crate::ledger::{JsonFileStore, LedgerSnapshot, LedgerStore, QueueSnapshot};
use crate::types::{RequestId, Status};
use tempfile::tempdir;

fn store_in(dir: &std::path::Path) -> JsonFileStore {
    JsonFileStore::new(dir.join("ledger.json"), dir.join("queue.json"))
}

#[tokio::test]
async fn missing_files_load_as_none() {
    let dir = tempdir().unwrap();
    let store = store_in(dir.path());

    assert!(store.load().await.unwrap().is_none());
    assert!(store.load_queue().await.unwrap().is_none());
}

#[tokio::test]
async fn save_then_load_returns_same_requests() {
    let dir = tempdir().unwrap();
    let store = store_in(dir.path());
    let snapshot = LedgerSnapshot::new(
        vec![
            sample_request("a", 0, 1, Status::Queued),
            sample_request("b", 1, 100, Status::Completed),
        ],
        at(2),
    );

    store.save(&snapshot).await.unwrap();
    let loaded = store.load().await.unwrap().unwrap();

    assert_eq!(loaded, snapshot);
}

#[tokio::test]
async fn writes_leave_no_temp_files() {
    let dir = tempdir().unwrap();
    let store = store_in(dir.path());

    store
        .save(&LedgerSnapshot::new(
            vec![sample_request("a", 0, 1, Status::Queued)],
            at(1),
        ))
        .await
        .unwrap();
    store
        .save_queue(&QueueSnapshot {
            pending: vec![RequestId::from("a")],
        })
        .await
        .unwrap();

    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "tmp"))
        .collect();
    assert!(leftovers.is_empty(), "temp files should not remain");
}

#[tokio::test]
async fn creates_missing_state_directory() {
    let dir = tempdir().unwrap();
    let nested = dir.path().join("nested").join("state");
    let store = store_in(&nested);

    store
        .save(&LedgerSnapshot::new(Vec::new(), at(1)))
        .await
        .unwrap();

    assert!(nested.join("ledger.json").exists());
}

#[tokio::test]
async fn garbage_file_is_corrupt_state() {
    let dir = tempdir().unwrap();
    let store = store_in(dir.path());
    std::fs::write(dir.path().join("ledger.json"), b"{ not json").unwrap();

    match store.load().await {
        Err(Error::CorruptState { location, .. }) => {
            assert!(location.ends_with("ledger.json"), "got {location}");
        }
        other => panic!("expected CorruptState, got {other:?}"),
    }
}

#[tokio::test]
async fn quarantine_moves_the_file_aside() {
    let dir = tempdir().unwrap();
    let store = store_in(dir.path());
    std::fs::write(dir.path().join("ledger.json"), b"garbage").unwrap();

    let moved_to = store.quarantine(at(5)).await.unwrap().unwrap();

    assert!(!dir.path().join("ledger.json").exists());
    assert!(moved_to.contains("ledger.json.corrupt-20240105"));
    assert_eq!(std::fs::read(&moved_to).unwrap(), b"garbage");
    assert!(store.load().await.unwrap().is_none());
}

#[tokio::test]
async fn quarantine_without_a_file_is_a_no_op() {
    let dir = tempdir().unwrap();
    let store = store_in(dir.path());

    assert!(store.quarantine(at(5)).await.unwrap().is_none());
}

#[test]
fn temp_files_are_unique_per_write() {
    let target = std::path::Path::new("/state/ledger.json");

    let first = crate::ledger::json_file::temp_path_for(target);
    let second = crate::ledger::json_file::temp_path_for(target);

    assert_ne!(first, second);
    assert_eq!(first.parent(), target.parent());
    let name = first.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with(&format!("ledger.json.{}.", std::process::id())));
    assert!(name.ends_with(".tmp"));
}

#[tokio::test]
async fn concurrent_writers_always_leave_a_complete_ledger() {
    let dir = tempdir().unwrap();
    let writers: Vec<_> = (0..8u64)
        .map(|n| {
            let store = store_in(dir.path());
            tokio::spawn(async move {
                let requests: Vec<_> = (0..20)
                    .map(|i| sample_request(&format!("w{n}-{i}"), i, 1, Status::Queued))
                    .collect();
                for _ in 0..5 {
                    store.save(&LedgerSnapshot::new(requests.clone(), at(1))).await.unwrap();
                    store.load().await.unwrap().unwrap();
                }
            })
        })
        .collect();
    for writer in writers {
        writer.await.unwrap();
    }

    let loaded = store_in(dir.path()).load().await.unwrap().unwrap();
    assert_eq!(loaded.requests.len(), 20);
    let leftovers = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "tmp"))
        .count();
    assert_eq!(leftovers, 0);
}
