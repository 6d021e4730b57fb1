//! Shared helpers for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use socialsweep::{
    Config, Event, Fetch, FetchOutcome, FetchRequest, Item, ItemSink, RequestId, RequestParams,
    Result, Window, NewRequest,
};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::broadcast;

/// Sink that keeps every stored window in memory
#[derive(Default)]
pub struct CollectingSink {
    stored: Mutex<Vec<(RequestId, Window, Vec<Item>)>>,
}

impl CollectingSink {
    /// Windows stored so far, in order
    pub fn windows(&self) -> Vec<Window> {
        self.stored.lock().unwrap().iter().map(|(_, w, _)| *w).collect()
    }

    /// All stored items, in order
    pub fn items(&self) -> Vec<Item> {
        self.stored
            .lock()
            .unwrap()
            .iter()
            .flat_map(|(_, _, items)| items.clone())
            .collect()
    }
}

#[async_trait]
impl ItemSink for CollectingSink {
    async fn store(&self, request_id: &RequestId, window: &Window, items: &[Item]) -> Result<()> {
        self.stored
            .lock()
            .unwrap()
            .push((request_id.clone(), *window, items.to_vec()));
        Ok(())
    }
}

/// Adapter returning one item per window, tagged with the window start
pub struct EchoFetcher;

#[async_trait]
impl Fetch for EchoFetcher {
    async fn fetch(&self, request: &FetchRequest) -> FetchOutcome {
        FetchOutcome::success(vec![json!({
            "request": request.request_id.as_str(),
            "since": request.window.start,
        })])
    }
}

/// Midnight UTC on the given day of January 2024
pub fn jan(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
}

/// Config with state and items under `dir` and no courtesy pause
pub fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.persistence.state_dir = dir.join("state");
    config.persistence.database_path = dir.join("ledger.db");
    config.persistence.data_dir = dir.join("data");
    config.retry.success_wait = Duration::ZERO;
    config
}

/// Request for `query` over `[jan(from), jan(to))`
pub fn january_request(adapter: &str, id: &str, query: &str, from: u32, to: u32) -> NewRequest {
    let mut params = RequestParams::query(query);
    params.since = Some(jan(from));
    params.until = Some(jan(to));
    NewRequest::new(adapter, "search", params).with_id(id)
}

/// Collect events until `done` matches one, or the timeout passes
pub async fn collect_events_until(
    rx: &mut broadcast::Receiver<Event>,
    timeout: Duration,
    done: impl Fn(&Event) -> bool,
) -> Vec<Event> {
    let mut events = Vec::new();
    let _ = tokio::time::timeout(timeout, async {
        while let Ok(event) = rx.recv().await {
            let finished = done(&event);
            events.push(event);
            if finished {
                break;
            }
        }
    })
    .await;
    events
}
