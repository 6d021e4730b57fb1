use super::RequestManager;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::fetch::{Fetch, FetchOutcome, FetchRegistry, FetchRequest, Item, ItemSink, NullSink};
use crate::ledger::{JsonFileStore, LedgerStore};
use crate::types::{ErrorClass, Event, NewRequest, RequestId, RequestParams, Window};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

mod submit;

type Hook = Box<dyn FnOnce() + Send>;

/// Fetch adapter that replays a script of outcomes
///
/// Once the script runs out every call succeeds with one item. A hook can be
/// armed to run during a given call (1-based).
#[derive(Default)]
pub(super) struct ScriptedFetcher {
    script: Mutex<VecDeque<FetchOutcome>>,
    calls: Mutex<Vec<FetchRequest>>,
    hook: Mutex<Option<(usize, Hook)>>,
}

impl ScriptedFetcher {
    pub(super) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(super) fn push(&self, outcome: FetchOutcome) {
        self.script.lock().unwrap().push_back(outcome);
    }

    pub(super) fn fail_times(&self, class: ErrorClass, times: usize) {
        for _ in 0..times {
            self.push(FetchOutcome::failure(class, "scripted failure", Some(429)));
        }
    }

    pub(super) fn on_call(&self, call: usize, hook: impl FnOnce() + Send + 'static) {
        *self.hook.lock().unwrap() = Some((call, Box::new(hook)));
    }

    pub(super) fn calls(&self) -> Vec<FetchRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub(super) fn called_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for call in self.calls() {
            let id = call.request_id.as_str().to_string();
            if ids.last() != Some(&id) {
                ids.push(id);
            }
        }
        ids
    }
}

#[async_trait]
impl Fetch for ScriptedFetcher {
    async fn fetch(&self, request: &FetchRequest) -> FetchOutcome {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(request.clone());
            calls.len()
        };

        let hook = {
            let mut slot = self.hook.lock().unwrap();
            match slot.take() {
                Some((at, hook)) if at == call => Some(hook),
                other => {
                    *slot = other;
                    None
                }
            }
        };
        if let Some(hook) = hook {
            hook();
        }

        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                FetchOutcome::success(vec![json!({ "window_start": request.window.start })])
            })
    }
}

/// Sink that rejects every window
pub(super) struct FailingSink;

#[async_trait]
impl ItemSink for FailingSink {
    async fn store(&self, _id: &RequestId, _window: &Window, _items: &[Item]) -> Result<()> {
        Err(Error::Other("disk full".to_string()))
    }
}

pub(super) fn day(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, day, 0, 0, 0).unwrap()
}

pub(super) fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.persistence.state_dir = dir.to_path_buf();
    config.retry.success_wait = Duration::ZERO;
    config
}

pub(super) fn store_in(dir: &Path) -> Arc<dyn LedgerStore> {
    Arc::new(JsonFileStore::new(
        dir.join("ledger.json"),
        dir.join("queue.json"),
    ))
}

pub(super) async fn manager_with(
    config: Config,
    fetcher: Arc<ScriptedFetcher>,
    sink: Arc<dyn ItemSink>,
) -> RequestManager {
    let store = store_in(&config.persistence.state_dir);
    let registry = FetchRegistry::new().with("scripted", fetcher);
    RequestManager::with_components(config, registry, store, sink)
        .await
        .unwrap()
}

pub(super) async fn manager_in(dir: &Path, fetcher: Arc<ScriptedFetcher>) -> RequestManager {
    manager_with(test_config(dir), fetcher, Arc::new(NullSink)).await
}

/// Request over `[day(from), day(to))` with an explicit id
pub(super) fn days_request(id: &str, from: u32, to: u32) -> NewRequest {
    let mut params = RequestParams::query(format!("#{id}"));
    params.since = Some(day(from));
    params.until = Some(day(to));
    NewRequest::new("scripted", "search", params).with_id(id)
}

pub(super) fn drain_events(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
