//! REST collaborator: the requests views issue and the records they get back.
//!
//! Every response is wrapped in [`ApiEnvelope`]. SQLite-backed flags arrive
//! as `0`/`1` and are read into `bool`.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use rollcall_core::ApiError;
use serde::{Deserialize, Deserializer, Serialize};

pub const DEFAULT_LOG_LIMIT: u32 = 100;

/// `{"success": bool, "data": ..., "message"?: ..., "count"?: ...}`
#[derive(Clone, Debug, Deserialize)]
pub struct ApiEnvelope<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub count: Option<u64>,
}

impl<T> ApiEnvelope<T> {
    /// The payload of a successful response.
    pub fn into_data(self) -> Result<T, ApiError> {
        if !self.success {
            return Err(rejected(self.message));
        }
        self.data
            .ok_or_else(|| ApiError::Decode("response has no data".into()))
    }

    /// For endpoints that answer with a message only.
    pub fn into_ack(self) -> Result<Option<String>, ApiError> {
        if self.success {
            Ok(self.message)
        } else {
            Err(rejected(self.message))
        }
    }
}

fn rejected(message: Option<String>) -> ApiError {
    ApiError::Rejected(message.unwrap_or_else(|| "request failed".into()))
}

fn int_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }
    Ok(match Option::<Flag>::deserialize(deserializer)? {
        Some(Flag::Bool(b)) => b,
        Some(Flag::Int(n)) => n != 0,
        None => false,
    })
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Employee {
    #[serde(default)]
    pub id: Option<i64>,
    pub employee_id: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub position: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub date_joined: Option<NaiveDate>,
    #[serde(default, deserialize_with = "int_bool")]
    pub biometric_enrolled: bool,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl Employee {
    pub fn is_active(&self) -> bool {
        self.status.as_deref().map_or(true, |s| s == "active")
    }
}

/// One row per employee per day.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DailyAttendance {
    #[serde(default)]
    pub id: Option<i64>,
    pub employee_id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub date: NaiveDate,
    #[serde(default)]
    pub check_in: Option<NaiveTime>,
    #[serde(default)]
    pub check_out: Option<NaiveTime>,
    /// `H:MM:SS` as computed by the server.
    #[serde(default)]
    pub total_hours: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    /// Checkout was recorded by hand rather than scanned.
    #[serde(default, deserialize_with = "int_bool")]
    pub is_auto_checkout: bool,
}

impl DailyAttendance {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.employee_id)
    }

    pub fn missing_checkout(&self) -> bool {
        self.check_in.is_some() && self.check_out.is_none()
    }
}

/// Raw device scan.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScanLog {
    pub id: i64,
    pub employee_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub verify_mode: Option<String>,
    pub scan_time: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DashboardStats {
    pub total_employees: u64,
    pub present_today: u64,
    pub absent_today: i64,
    pub missed_checkout: u64,
    #[serde(default)]
    pub recent_scans: Vec<ScanLog>,
    #[serde(default)]
    pub todays_attendance: Vec<DailyAttendance>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SystemHealth {
    pub backend: String,
    pub database: String,
    pub device: String,
    #[serde(default)]
    pub mock_mode: bool,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl SystemHealth {
    pub fn device_connected(&self) -> bool {
        self.device == "connected"
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct NewEmployee {
    pub employee_id: String,
    pub name: String,
    pub position: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
}

impl NewEmployee {
    /// Same checks the server applies, so obvious mistakes fail locally.
    pub fn validate(&self) -> Result<(), ApiError> {
        for (field, value) in [
            ("employee_id", &self.employee_id),
            ("name", &self.name),
            ("position", &self.position),
        ] {
            if value.trim().is_empty() {
                return Err(ApiError::InvalidRequest(format!(
                    "Missing required field: {field}"
                )));
            }
        }
        let id_ok = self
            .employee_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !id_ok {
            return Err(ApiError::InvalidRequest("Invalid employee ID format".into()));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct RegisteredEmployee {
    pub employee_id: String,
    pub name: String,
    #[serde(default)]
    pub device_synced: bool,
}

/// Server fills in "now" for missing time and date.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ManualCheckout {
    pub employee_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_time: Option<NaiveTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
}

impl ManualCheckout {
    pub fn now(employee_id: impl Into<String>) -> Self {
        Self {
            employee_id: employee_id.into(),
            checkout_time: None,
            date: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogQuery {
    pub limit: u32,
    pub employee_id: Option<String>,
}

impl Default for LogQuery {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LOG_LIMIT,
            employee_id: None,
        }
    }
}

impl LogQuery {
    pub fn to_query(&self) -> Vec<(&'static str, String)> {
        let mut query = vec![("limit", self.limit.to_string())];
        if let Some(id) = self.employee_id.as_deref().filter(|s| !s.is_empty()) {
            query.push(("employee_id", id.to_string()));
        }
        query
    }
}

/// Roster filter. `status` defaults to `active` on the server.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EmployeeFilter {
    pub status: Option<String>,
    pub search: Option<String>,
    pub department: Option<String>,
}

impl EmployeeFilter {
    pub fn to_query(&self) -> Vec<(&'static str, String)> {
        [
            ("status", &self.status),
            ("search", &self.search),
            ("department", &self.department),
        ]
        .into_iter()
        .filter_map(|(key, value)| {
            value
                .as_deref()
                .filter(|v| !v.is_empty())
                .map(|v| (key, v.to_string()))
        })
        .collect()
    }
}

#[async_trait]
pub trait AttendanceApi: Send + Sync + 'static {
    async fn daily_attendance(&self, date: NaiveDate) -> Result<Vec<DailyAttendance>, ApiError>;

    /// Newest first.
    async fn scan_logs(&self, query: &LogQuery) -> Result<Vec<ScanLog>, ApiError>;

    async fn missed_checkouts(&self, date: NaiveDate) -> Result<Vec<DailyAttendance>, ApiError>;

    async fn dashboard_stats(&self) -> Result<DashboardStats, ApiError>;

    async fn employees(&self, filter: &EmployeeFilter) -> Result<Vec<Employee>, ApiError>;

    async fn register_employee(
        &self,
        employee: &NewEmployee,
    ) -> Result<RegisteredEmployee, ApiError>;

    /// Marks the employee inactive and removes them from the device.
    async fn deactivate_employee(&self, employee_id: &str) -> Result<(), ApiError>;

    async fn manual_checkout(&self, checkout: &ManualCheckout) -> Result<(), ApiError>;

    async fn health(&self) -> Result<SystemHealth, ApiError>;
}
