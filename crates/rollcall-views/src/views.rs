//! The dashboard's live views.
//!
//! Each view keeps only its latest snapshot. Rendering is up to the caller.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;
use rollcall_core::{ApiError, EventKind, LiveEvent};
use rollcall_live::{LiveTopic, Topic};
use tracing::info;

use crate::api::{
    AttendanceApi, DailyAttendance, DashboardStats, Employee, EmployeeFilter, LogQuery, ScanLog,
    DEFAULT_LOG_LIMIT,
};
use crate::notify::{notice_for, Notice};
use crate::subscription::LiveView;

/// Data a view last applied, with the parameters it was fetched for.
#[derive(Clone, Debug)]
pub struct Snapshot<P, D> {
    pub params: P,
    pub data: D,
    pub fetched_at: DateTime<Utc>,
}

impl<P: Clone, D> Snapshot<P, D> {
    fn new(params: &P, data: D) -> Self {
        Self {
            params: params.clone(),
            data,
            fetched_at: Utc::now(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Attendance board
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BoardTab {
    #[default]
    Daily,
    Logs,
    Missed,
}

impl BoardTab {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Logs => "logs",
            Self::Missed => "missed",
        }
    }
}

impl fmt::Display for BoardTab {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BoardTab {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "daily" => Ok(Self::Daily),
            "logs" => Ok(Self::Logs),
            "missed" | "missed-checkout" => Ok(Self::Missed),
            other => Err(format!("unknown tab {other:?} (expected daily, logs or missed)")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BoardParams {
    pub tab: BoardTab,
    pub date: NaiveDate,
    pub log_limit: u32,
}

impl BoardParams {
    pub fn new(tab: BoardTab, date: NaiveDate) -> Self {
        Self {
            tab,
            date,
            log_limit: DEFAULT_LOG_LIMIT,
        }
    }

    pub fn today(tab: BoardTab) -> Self {
        Self::new(tab, chrono::Local::now().date_naive())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum BoardData {
    Daily(Vec<DailyAttendance>),
    Logs(Vec<ScanLog>),
    Missed(Vec<DailyAttendance>),
}

impl BoardData {
    pub fn len(&self) -> usize {
        match self {
            Self::Daily(rows) | Self::Missed(rows) => rows.len(),
            Self::Logs(logs) => logs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Daily attendance, raw scan logs and missed checkouts for one date.
#[derive(Default)]
pub struct AttendanceBoard {
    latest: RwLock<Option<Snapshot<BoardParams, BoardData>>>,
}

impl AttendanceBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Option<Snapshot<BoardParams, BoardData>> {
        self.latest.read().clone()
    }
}

#[async_trait]
impl LiveView for AttendanceBoard {
    type Params = BoardParams;
    type Data = BoardData;

    fn name(&self) -> &'static str {
        "attendance"
    }

    fn topics(&self, params: &BoardParams) -> Vec<LiveTopic> {
        match params.tab {
            BoardTab::Logs => vec![Topic::Kind(EventKind::AttendanceScan)],
            BoardTab::Daily | BoardTab::Missed => vec![
                Topic::Kind(EventKind::AttendanceScan),
                Topic::Kind(EventKind::ManualCheckout),
            ],
        }
    }

    async fn fetch(
        &self,
        api: &dyn AttendanceApi,
        params: &BoardParams,
    ) -> Result<BoardData, ApiError> {
        Ok(match params.tab {
            BoardTab::Daily => BoardData::Daily(api.daily_attendance(params.date).await?),
            BoardTab::Logs => {
                let query = LogQuery {
                    limit: params.log_limit,
                    employee_id: None,
                };
                BoardData::Logs(api.scan_logs(&query).await?)
            }
            BoardTab::Missed => BoardData::Missed(api.missed_checkouts(params.date).await?),
        })
    }

    fn apply(&self, params: &BoardParams, data: BoardData) {
        info!(
            view = self.name(),
            tab = %params.tab,
            date = %params.date,
            rows = data.len(),
            "attendance board updated"
        );
        *self.latest.write() = Some(Snapshot::new(params, data));
    }

    fn notice(&self, event: &LiveEvent) -> Option<Notice> {
        notice_for(event)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Roster
// ─────────────────────────────────────────────────────────────────────────────

/// Employee list under a status/search/department filter.
#[derive(Default)]
pub struct RosterView {
    latest: RwLock<Option<Snapshot<EmployeeFilter, Vec<Employee>>>>,
}

impl RosterView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Option<Snapshot<EmployeeFilter, Vec<Employee>>> {
        self.latest.read().clone()
    }
}

#[async_trait]
impl LiveView for RosterView {
    type Params = EmployeeFilter;
    type Data = Vec<Employee>;

    fn name(&self) -> &'static str {
        "employees"
    }

    fn topics(&self, _params: &EmployeeFilter) -> Vec<LiveTopic> {
        vec![
            Topic::Kind(EventKind::EmployeeAdded),
            Topic::Kind(EventKind::EmployeeDeleted),
        ]
    }

    async fn fetch(
        &self,
        api: &dyn AttendanceApi,
        params: &EmployeeFilter,
    ) -> Result<Vec<Employee>, ApiError> {
        api.employees(params).await
    }

    fn apply(&self, params: &EmployeeFilter, data: Vec<Employee>) {
        info!(view = self.name(), employees = data.len(), "roster updated");
        *self.latest.write() = Some(Snapshot::new(params, data));
    }

    fn notice(&self, event: &LiveEvent) -> Option<Notice> {
        notice_for(event)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Dashboard summary
// ─────────────────────────────────────────────────────────────────────────────

/// Headline numbers. Refreshes on every event, known or not.
#[derive(Default)]
pub struct DashboardView {
    latest: RwLock<Option<Snapshot<(), DashboardStats>>>,
}

impl DashboardView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Option<Snapshot<(), DashboardStats>> {
        self.latest.read().clone()
    }
}

#[async_trait]
impl LiveView for DashboardView {
    type Params = ();
    type Data = DashboardStats;

    fn name(&self) -> &'static str {
        "dashboard"
    }

    fn topics(&self, _params: &()) -> Vec<LiveTopic> {
        vec![Topic::Any]
    }

    async fn fetch(&self, api: &dyn AttendanceApi, _params: &()) -> Result<DashboardStats, ApiError> {
        api.dashboard_stats().await
    }

    fn apply(&self, _params: &(), data: DashboardStats) {
        info!(
            view = self.name(),
            present = data.present_today,
            absent = data.absent_today,
            missed_checkout = data.missed_checkout,
            "dashboard updated"
        );
        *self.latest.write() = Some(Snapshot::new(&(), data));
    }
}
