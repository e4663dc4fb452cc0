use async_trait::async_trait;
use chrono::NaiveDateTime;
use tracing::{debug, info, warn};

use crate::error::{RefreshError, SourceError};
use crate::record::Record;
use crate::shared::{Meta, SharedStore};
use crate::store::DuplicatePolicy;
use crate::week::WeekId;

/// The authoritative dataset the store is reconciled against.
///
/// The source needs a row limit up front, so a refresh asks for the number of
/// entries of a week first and then fetches that many.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Number of entries tagged with `week`.
    async fn count(&self, week: &WeekId) -> Result<u64, SourceError>;

    /// Up to `rows` entries tagged with `week`.
    async fn fetch(&self, week: &WeekId, rows: u64) -> Result<Vec<Record>, SourceError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    /// The clock is not past the last check; nothing was done.
    ClockSkew,
    /// Still in the week of the last check; nothing was queried.
    SameWeek { week: WeekId },
    Refreshed {
        week: WeekId,
        reported: u64,
        appended: usize,
        skipped: usize,
        meta: Meta,
    },
}

impl RefreshOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RefreshOutcome::ClockSkew => "clock_skew",
            RefreshOutcome::SameWeek { .. } => "same_week",
            RefreshOutcome::Refreshed { .. } => "refreshed",
        }
    }
}

/// Weekly reconciliation of the store with a [`DataSource`].
///
/// Only the week containing "now" is ever fetched: a week during which no
/// cycle ran is not caught up. [`refresh_week`] is the manual way to load it.
#[derive(Debug, Clone)]
pub struct RefreshJob {
    last_check: NaiveDateTime,
    policy: DuplicatePolicy,
}

impl RefreshJob {
    pub fn new(last_check: NaiveDateTime, policy: DuplicatePolicy) -> Self {
        Self { last_check, policy }
    }

    /// A job whose last check is the first instant of `week`.
    pub fn starting_at(week: WeekId, policy: DuplicatePolicy) -> Self {
        Self::new(week.start(), policy)
    }

    pub fn last_check(&self) -> NaiveDateTime {
        self.last_check
    }

    /// Run one cycle at `now`.
    ///
    /// When `now` lies in a later week than the last check, the current week
    /// is fetched, appended and the store persisted. The last check moves to
    /// `now` whether or not that succeeded, so a failed cycle is retried only
    /// if the next one still sees a week change.
    pub async fn run_once(
        &mut self,
        now: NaiveDateTime,
        source: &dyn DataSource,
        store: &SharedStore,
    ) -> Result<RefreshOutcome, RefreshError> {
        if now <= self.last_check {
            warn!(
                now = %now,
                last_check = %self.last_check,
                "refresh skipped: clock is not past the last check"
            );
            return Ok(RefreshOutcome::ClockSkew);
        }

        let last_week = WeekId::of(self.last_check);
        let current_week = WeekId::of(now);

        let result = if last_week == current_week {
            debug!(week = %current_week, "refresh: no week change");
            Ok(RefreshOutcome::SameWeek { week: current_week })
        } else {
            info!(from = %last_week, to = %current_week, "refresh: week changed");
            refresh_week(current_week, source, store, self.policy).await
        };

        self.last_check = now;
        result
    }
}

/// Fetch every entry of `week`, append them to `store` and persist it.
///
/// Nothing is appended unless both queries succeed, and the append is undone
/// when the file cannot be written.
pub async fn refresh_week(
    week: WeekId,
    source: &dyn DataSource,
    store: &SharedStore,
    policy: DuplicatePolicy,
) -> Result<RefreshOutcome, RefreshError> {
    let reported = source.count(&week).await?;
    let fetched = source.fetch(&week, reported).await?;
    debug!(week = %week, reported, fetched = fetched.len(), "refresh: entries fetched");

    let (report, meta) = store.append_and_persist(fetched, policy).await?;

    info!(
        week = %week,
        appended = report.appended,
        skipped = report.skipped,
        records = meta.records_count,
        "refresh: store updated"
    );
    Ok(RefreshOutcome::Refreshed {
        week,
        reported,
        appended: report.appended,
        skipped: report.skipped,
        meta,
    })
}
