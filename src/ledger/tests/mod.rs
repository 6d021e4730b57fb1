use crate::types::{DateRange, Priority, Request, RequestId, RequestParams, Status};
use chrono::{DateTime, TimeZone, Utc};

mod json_file;

pub(super) fn at(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
}

pub(super) fn sample_request(id: &str, seq: u64, priority: i64, status: Status) -> Request {
    Request {
        id: RequestId::from(id),
        source_adapter: "http".to_string(),
        endpoint: "search".to_string(),
        params: RequestParams::query(format!("#{id}")),
        priority: Priority(priority),
        status,
        range: DateRange {
            since: at(1),
            until: at(3),
        },
        progress: None,
        error: None,
        submitted_at: at(1),
        started_at: None,
        finished_at: if status.is_terminal() { Some(at(2)) } else { None },
        seq,
    }
}
