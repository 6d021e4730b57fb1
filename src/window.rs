//! Date-range windowing
//!
//! One logical query covers a `[since, until)` range. The [`Windower`] splits
//! that range into consecutive sub-windows of fixed granularity (the last one
//! may be shorter) and, given a stored checkpoint, yields only the windows that
//! are still pending.

use chrono::{DateTime, TimeDelta, Utc};

use crate::config::WindowConfig;
use crate::error::{Error, Result};
use crate::types::{DateRange, Progress, RequestParams, Window};

/// Splits request ranges into sub-windows
#[derive(Clone, Debug)]
pub struct Windower {
    lookback: TimeDelta,
    granularity: TimeDelta,
}

impl Windower {
    /// Build a windower; rejects a zero granularity
    pub fn new(config: &WindowConfig) -> Result<Self> {
        let granularity = TimeDelta::from_std(config.granularity)
            .map_err(|e| Error::config("window.granularity", e.to_string()))?;
        if granularity <= TimeDelta::zero() {
            return Err(Error::config("window.granularity", "must be greater than zero"));
        }
        let lookback = TimeDelta::from_std(config.default_lookback)
            .map_err(|e| Error::config("window.default_lookback", e.to_string()))?;
        Ok(Self {
            lookback,
            granularity,
        })
    }

    /// Sub-window length
    pub fn granularity(&self) -> TimeDelta {
        self.granularity
    }

    /// Fix the range a request covers
    ///
    /// Missing bounds are filled in relative to `now`: no `until` means now,
    /// no `since` means `until - default_lookback`.
    pub fn resolve_range(&self, params: &RequestParams, now: DateTime<Utc>) -> DateRange {
        let until = params.until.unwrap_or(now);
        let since = params.since.unwrap_or_else(|| {
            until
                .checked_sub_signed(self.lookback)
                .unwrap_or(DateTime::<Utc>::MIN_UTC)
        });
        DateRange { since, until }
    }

    /// Every sub-window of `range`, in order
    ///
    /// An empty or inverted range yields nothing.
    pub fn windows(&self, range: &DateRange) -> Vec<Window> {
        let mut windows = Vec::new();
        let mut start = range.since;
        while start < range.until {
            let end = start
                .checked_add_signed(self.granularity)
                .map_or(range.until, |end| end.min(range.until));
            windows.push(Window::new(start, end));
            start = end;
        }
        windows
    }

    /// Sub-windows still pending according to `progress`
    ///
    /// With no checkpoint the whole sequence is returned. A checkpoint with no
    /// current window means every window is done.
    pub fn resume_from(&self, range: &DateRange, progress: Option<&Progress>) -> Vec<Window> {
        let all = self.windows(range);
        match progress {
            None => all,
            Some(Progress {
                current_window: None,
                ..
            }) => Vec::new(),
            Some(Progress {
                current_window: Some(current),
                ..
            }) => all
                .into_iter()
                .filter(|window| window.start >= current.start)
                .collect(),
        }
    }
}
