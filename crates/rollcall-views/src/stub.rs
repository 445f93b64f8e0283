//! In-memory [`AttendanceApi`] for tests.
//!
//! Reads come from a mutable [`StubData`]; writes mutate it the way the
//! server would. Failures and latency can be scripted per call, and every
//! call is recorded so tests can assert on what a view asked for.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::Mutex;
use rollcall_core::ApiError;

use crate::api::{
    AttendanceApi, DailyAttendance, DashboardStats, Employee, EmployeeFilter, LogQuery,
    ManualCheckout, NewEmployee, RegisteredEmployee, ScanLog, SystemHealth,
};

#[derive(Clone, Debug, Default)]
pub struct StubData {
    pub attendance: BTreeMap<NaiveDate, Vec<DailyAttendance>>,
    /// Newest first.
    pub logs: Vec<ScanLog>,
    pub employees: Vec<Employee>,
    pub stats: Option<DashboardStats>,
    pub health: Option<SystemHealth>,
}

#[derive(Default)]
pub struct StubApi {
    data: Mutex<StubData>,
    failures: Mutex<VecDeque<ApiError>>,
    latencies: Mutex<VecDeque<Duration>>,
    calls: Mutex<Vec<String>>,
}

impl StubApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data(data: StubData) -> Self {
        Self {
            data: Mutex::new(data),
            ..Self::default()
        }
    }

    /// Mutate the backing data, e.g. to simulate a scan landing server-side.
    pub fn update(&self, f: impl FnOnce(&mut StubData)) {
        f(&mut self.data.lock());
    }

    /// The next call fails with `error`.
    pub fn fail_next(&self, error: ApiError) {
        self.failures.lock().push_back(error);
    }

    /// The next call waits `latency` before answering.
    pub fn delay_next(&self, latency: Duration) {
        self.latencies.lock().push_back(latency);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    /// Record the call, apply scripted latency, then any scripted failure.
    async fn enter(&self, call: String) -> Result<(), ApiError> {
        self.calls.lock().push(call);
        let latency = self.latencies.lock().pop_front();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        match self.failures.lock().pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

fn computed_stats(data: &StubData) -> DashboardStats {
    let today = chrono::Local::now().date_naive();
    let rows = data.attendance.get(&today).cloned().unwrap_or_default();
    let active = data.employees.iter().filter(|e| e.is_active()).count() as u64;
    let present = rows.iter().filter(|r| r.check_in.is_some()).count() as u64;
    DashboardStats {
        total_employees: active,
        present_today: present,
        absent_today: active as i64 - present as i64,
        missed_checkout: rows.iter().filter(|r| r.missing_checkout()).count() as u64,
        recent_scans: data.logs.iter().take(10).cloned().collect(),
        todays_attendance: rows,
    }
}

#[async_trait]
impl AttendanceApi for StubApi {
    async fn daily_attendance(&self, date: NaiveDate) -> Result<Vec<DailyAttendance>, ApiError> {
        self.enter(format!("daily_attendance {date}")).await?;
        Ok(self.data.lock().attendance.get(&date).cloned().unwrap_or_default())
    }

    async fn scan_logs(&self, query: &LogQuery) -> Result<Vec<ScanLog>, ApiError> {
        self.enter(format!("scan_logs {}", query.limit)).await?;
        let data = self.data.lock();
        Ok(data
            .logs
            .iter()
            .filter(|log| {
                query
                    .employee_id
                    .as_deref()
                    .map_or(true, |id| log.employee_id == id)
            })
            .take(query.limit as usize)
            .cloned()
            .collect())
    }

    async fn missed_checkouts(&self, date: NaiveDate) -> Result<Vec<DailyAttendance>, ApiError> {
        self.enter(format!("missed_checkouts {date}")).await?;
        let data = self.data.lock();
        Ok(data
            .attendance
            .get(&date)
            .map(|rows| rows.iter().filter(|r| r.missing_checkout()).cloned().collect())
            .unwrap_or_default())
    }

    async fn dashboard_stats(&self) -> Result<DashboardStats, ApiError> {
        self.enter("dashboard_stats".into()).await?;
        let data = self.data.lock();
        Ok(data.stats.clone().unwrap_or_else(|| computed_stats(&data)))
    }

    async fn employees(&self, filter: &EmployeeFilter) -> Result<Vec<Employee>, ApiError> {
        self.enter("employees".into()).await?;
        let status = filter.status.as_deref().unwrap_or("active");
        let search = filter.search.as_deref().map(str::to_lowercase);
        let data = self.data.lock();
        Ok(data
            .employees
            .iter()
            .filter(|e| status == "all" || e.status.as_deref().unwrap_or("active") == status)
            .filter(|e| {
                search.as_deref().map_or(true, |s| {
                    e.name.to_lowercase().contains(s) || e.employee_id.to_lowercase().contains(s)
                })
            })
            .filter(|e| {
                filter
                    .department
                    .as_deref()
                    .map_or(true, |d| e.department.as_deref() == Some(d))
            })
            .cloned()
            .collect())
    }

    async fn register_employee(
        &self,
        employee: &NewEmployee,
    ) -> Result<RegisteredEmployee, ApiError> {
        employee.validate()?;
        self.enter(format!("register_employee {}", employee.employee_id))
            .await?;
        let mut data = self.data.lock();
        if data
            .employees
            .iter()
            .any(|e| e.employee_id == employee.employee_id)
        {
            return Err(ApiError::Rejected(format!(
                "Employee ID '{}' already exists",
                employee.employee_id
            )));
        }
        let row_id = data.employees.len() as i64 + 1;
        data.employees.push(Employee {
            id: Some(row_id),
            employee_id: employee.employee_id.clone(),
            name: employee.name.clone(),
            email: employee.email.clone(),
            phone: employee.phone.clone(),
            department: employee.department.clone(),
            position: Some(employee.position.clone()),
            status: Some("active".into()),
            date_joined: None,
            biometric_enrolled: false,
            created_at: None,
        });
        Ok(RegisteredEmployee {
            employee_id: employee.employee_id.clone(),
            name: employee.name.clone(),
            device_synced: false,
        })
    }

    async fn deactivate_employee(&self, employee_id: &str) -> Result<(), ApiError> {
        self.enter(format!("deactivate_employee {employee_id}")).await?;
        let mut data = self.data.lock();
        let employee = data
            .employees
            .iter_mut()
            .find(|e| e.employee_id == employee_id)
            .ok_or_else(|| ApiError::Status {
                status: 404,
                message: "Employee not found".into(),
            })?;
        employee.status = Some("inactive".into());
        Ok(())
    }

    async fn manual_checkout(&self, checkout: &ManualCheckout) -> Result<(), ApiError> {
        self.enter(format!("manual_checkout {}", checkout.employee_id))
            .await?;
        let date = checkout
            .date
            .unwrap_or_else(|| chrono::Local::now().date_naive());
        let time = checkout
            .checkout_time
            .unwrap_or_else(|| chrono::Local::now().time());
        let mut data = self.data.lock();
        let row = data
            .attendance
            .get_mut(&date)
            .and_then(|rows| {
                rows.iter_mut()
                    .find(|r| r.employee_id == checkout.employee_id && r.check_in.is_some())
            })
            .ok_or_else(|| ApiError::Status {
                status: 404,
                message: "No check-in found for this employee on this date".into(),
            })?;
        row.check_out = Some(time);
        row.is_auto_checkout = true;
        Ok(())
    }

    async fn health(&self) -> Result<SystemHealth, ApiError> {
        self.enter("health".into()).await?;
        Ok(self.data.lock().health.clone().unwrap_or_else(|| SystemHealth {
            backend: "ok".into(),
            database: "ok".into(),
            device: "disconnected".into(),
            mock_mode: true,
            timestamp: None,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::NaiveTime;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
    }

    fn row(id: &str, check_in: Option<&str>, check_out: Option<&str>) -> DailyAttendance {
        let time = |s: &str| NaiveTime::parse_from_str(s, "%H:%M:%S").unwrap();
        DailyAttendance {
            id: None,
            employee_id: id.into(),
            name: None,
            date: day(),
            check_in: check_in.map(time),
            check_out: check_out.map(time),
            total_hours: None,
            status: None,
            is_auto_checkout: false,
        }
    }

    #[tokio::test]
    async fn missed_checkouts_filters_open_rows() {
        let api = StubApi::new();
        api.update(|d| {
            let _ = d.attendance.insert(
                day(),
                vec![row("E1", Some("08:00:00"), None), row("E2", Some("08:10:00"), Some("17:00:00"))],
            );
        });
        let missed = api.missed_checkouts(day()).await.unwrap();
        assert_eq!(missed.len(), 1);
        assert_eq!(missed[0].employee_id, "E1");
    }

    #[tokio::test]
    async fn manual_checkout_closes_the_row() {
        let api = StubApi::new();
        api.update(|d| {
            let _ = d.attendance.insert(day(), vec![row("E1", Some("08:00:00"), None)]);
        });
        let checkout = ManualCheckout {
            employee_id: "E1".into(),
            checkout_time: NaiveTime::from_hms_opt(17, 30, 0),
            date: Some(day()),
        };
        api.manual_checkout(&checkout).await.unwrap();
        let rows = api.daily_attendance(day()).await.unwrap();
        assert_eq!(rows[0].check_out, NaiveTime::from_hms_opt(17, 30, 0));
        assert!(rows[0].is_auto_checkout);
    }

    #[tokio::test]
    async fn manual_checkout_without_check_in_is_404() {
        let api = StubApi::new();
        let err = api.manual_checkout(&ManualCheckout::now("E404")).await.unwrap_err();
        assert_matches!(err, ApiError::Status { status: 404, .. });
    }

    #[tokio::test]
    async fn register_then_deactivate() {
        let api = StubApi::new();
        let new = NewEmployee {
            employee_id: "E1".into(),
            name: "Jane Doe".into(),
            position: "Engineer".into(),
            ..Default::default()
        };
        let _ = api.register_employee(&new).await.unwrap();
        assert_matches!(api.register_employee(&new).await, Err(ApiError::Rejected(_)));

        api.deactivate_employee("E1").await.unwrap();
        assert!(api.employees(&EmployeeFilter::default()).await.unwrap().is_empty());
        let all = EmployeeFilter {
            status: Some("all".into()),
            ..Default::default()
        };
        assert_eq!(api.employees(&all).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn scripted_failure_applies_once() {
        let api = StubApi::new();
        api.fail_next(ApiError::Network("refused".into()));
        assert!(api.health().await.is_err());
        assert!(api.health().await.is_ok());
        assert_eq!(api.call_count("health"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn scripted_latency() {
        let api = StubApi::new();
        api.delay_next(Duration::from_secs(2));
        let started = tokio::time::Instant::now();
        let _ = api.dashboard_stats().await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(2));
    }
}
