//! [`AttendanceApi`] over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use metrics::counter;
use reqwest::{Method, RequestBuilder, Url};
use rollcall_core::ApiError;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::api::{
    ApiEnvelope, AttendanceApi, DailyAttendance, DashboardStats, Employee, EmployeeFilter,
    LogQuery, ManualCheckout, NewEmployee, RegisteredEmployee, ScanLog, SystemHealth,
};

#[derive(Clone, Debug)]
pub struct HttpAttendanceApi {
    client: reqwest::Client,
    base: Url,
}

impl HttpAttendanceApi {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::InvalidRequest(format!("http client: {e}")))?;
        Self::with_client(client, base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: &str) -> Result<Self, ApiError> {
        let base = Url::parse(base_url)
            .map_err(|e| ApiError::InvalidRequest(format!("invalid base URL {base_url:?}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(ApiError::InvalidRequest(format!(
                "invalid base URL {base_url:?}"
            )));
        }
        Ok(Self { client, base })
    }

    pub fn from_settings(server: &rollcall_settings::ServerSettings) -> Result<Self, ApiError> {
        Self::new(&server.base_url, server.request_timeout())
    }

    /// Base URL with `segments` appended, each percent-encoded.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            let _ = path.pop_if_empty().extend(segments);
        }
        url
    }

    fn request(&self, method: Method, segments: &[&str]) -> RequestBuilder {
        self.client.request(method, self.url(segments))
    }

    async fn call<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        request: RequestBuilder,
    ) -> Result<ApiEnvelope<T>, ApiError> {
        let result = self.call_inner(request).await;
        if let Err(e) = &result {
            counter!("rollcall_api_errors_total", "endpoint" => endpoint, "kind" => e.error_kind())
                .increment(1);
            warn!(endpoint, error = %e, "api request failed");
        }
        result
    }

    async fn call_inner<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<ApiEnvelope<T>, ApiError> {
        let response = request
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        debug!(status = status.as_u16(), bytes = body.len(), "api response");

        if !status.is_success() {
            let message = serde_json::from_slice::<ApiEnvelope<serde_json::Value>>(&body)
                .ok()
                .and_then(|env| env.message)
                .unwrap_or_else(|| {
                    status
                        .canonical_reason()
                        .unwrap_or("request failed")
                        .to_string()
                });
            return Err(ApiError::Status {
                status: status.as_u16(),
                message,
            });
        }

        serde_json::from_slice(&body).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

#[async_trait]
impl AttendanceApi for HttpAttendanceApi {
    async fn daily_attendance(&self, date: NaiveDate) -> Result<Vec<DailyAttendance>, ApiError> {
        let req = self
            .request(Method::GET, &["api", "attendance", "daily"])
            .query(&[("date", date.to_string())]);
        self.call("attendance_daily", req).await?.into_data()
    }

    async fn scan_logs(&self, query: &LogQuery) -> Result<Vec<ScanLog>, ApiError> {
        let req = self
            .request(Method::GET, &["api", "attendance", "logs"])
            .query(&query.to_query());
        self.call("attendance_logs", req).await?.into_data()
    }

    async fn missed_checkouts(&self, date: NaiveDate) -> Result<Vec<DailyAttendance>, ApiError> {
        let req = self
            .request(Method::GET, &["api", "attendance", "missed-checkout"])
            .query(&[("date", date.to_string())]);
        self.call("attendance_missed", req).await?.into_data()
    }

    async fn dashboard_stats(&self) -> Result<DashboardStats, ApiError> {
        let req = self.request(Method::GET, &["api", "dashboard", "stats"]);
        self.call("dashboard_stats", req).await?.into_data()
    }

    async fn employees(&self, filter: &EmployeeFilter) -> Result<Vec<Employee>, ApiError> {
        let req = self
            .request(Method::GET, &["api", "employees"])
            .query(&filter.to_query());
        self.call("employees", req).await?.into_data()
    }

    async fn register_employee(
        &self,
        employee: &NewEmployee,
    ) -> Result<RegisteredEmployee, ApiError> {
        employee.validate()?;
        let req = self
            .request(Method::POST, &["api", "employees", "register"])
            .json(employee);
        self.call("employees_register", req).await?.into_data()
    }

    async fn deactivate_employee(&self, employee_id: &str) -> Result<(), ApiError> {
        if employee_id.trim().is_empty() {
            return Err(ApiError::InvalidRequest("Employee ID required".into()));
        }
        let req = self.request(Method::DELETE, &["api", "employees", employee_id]);
        self.call::<serde_json::Value>("employees_delete", req)
            .await?
            .into_ack()
            .map(|_| ())
    }

    async fn manual_checkout(&self, checkout: &ManualCheckout) -> Result<(), ApiError> {
        if checkout.employee_id.trim().is_empty() {
            return Err(ApiError::InvalidRequest("Employee ID required".into()));
        }
        let req = self
            .request(Method::POST, &["api", "attendance", "manual-checkout"])
            .json(checkout);
        self.call::<serde_json::Value>("manual_checkout", req)
            .await?
            .into_ack()
            .map(|_| ())
    }

    async fn health(&self) -> Result<SystemHealth, ApiError> {
        let req = self.request(Method::GET, &["api", "system", "health"]);
        self.call("system_health", req).await?.into_data()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn api(server: &MockServer) -> HttpAttendanceApi {
        HttpAttendanceApi::new(&server.uri(), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn daily_attendance_sends_date() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/attendance/daily"))
            .and(query_param("date", "2026-10-16"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "count": 1,
                "date": "2026-10-16",
                "data": [{
                    "employee_id": "E001",
                    "name": "Jane Doe",
                    "date": "2026-10-16",
                    "check_in": "08:59:12",
                    "check_out": null,
                    "is_auto_checkout": 0
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let rows = api(&server)
            .await
            .daily_attendance(NaiveDate::from_ymd_opt(2026, 10, 16).unwrap())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].missing_checkout());
    }

    #[tokio::test]
    async fn scan_logs_default_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/attendance/logs"))
            .and(query_param("limit", "100"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "count": 1,
                "data": [{"id": 9, "employee_id": "E1", "verify_mode": "Face", "scan_time": "2026-10-16 08:59:12"}]
            })))
            .mount(&server)
            .await;

        let logs = api(&server).await.scan_logs(&LogQuery::default()).await.unwrap();
        assert_eq!(logs[0].verify_mode.as_deref(), Some("Face"));
    }

    #[tokio::test]
    async fn employees_filter_in_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/employees"))
            .and(query_param("search", "ada"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "count": 1,
                "data": [{"employee_id": "E3", "name": "Ada", "status": "active", "biometric_enrolled": 1}]
            })))
            .mount(&server)
            .await;

        let filter = EmployeeFilter {
            search: Some("ada".into()),
            ..Default::default()
        };
        let employees = api(&server).await.employees(&filter).await.unwrap();
        assert_eq!(employees[0].name, "Ada");
        assert!(employees[0].biometric_enrolled);
    }

    #[tokio::test]
    async fn register_posts_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/employees/register"))
            .and(body_json(json!({"employee_id": "E4", "name": "Lin", "position": "Ops"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "success": true,
                "message": "Employee registered successfully",
                "data": {"employee_id": "E4", "name": "Lin", "device_synced": true}
            })))
            .mount(&server)
            .await;

        let created = api(&server)
            .await
            .register_employee(&NewEmployee {
                employee_id: "E4".into(),
                name: "Lin".into(),
                position: "Ops".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(created.device_synced);
    }

    #[tokio::test]
    async fn register_validates_before_sending() {
        let server = MockServer::start().await;
        let err = api(&server)
            .await
            .register_employee(&NewEmployee::default())
            .await
            .unwrap_err();
        assert_matches!(err, ApiError::InvalidRequest(_));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn error_status_uses_server_message() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/employees/E404"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "success": false,
                "message": "Employee not found"
            })))
            .mount(&server)
            .await;

        let err = api(&server).await.deactivate_employee("E404").await.unwrap_err();
        assert_matches!(err, ApiError::Status { status: 404, ref message } if message == "Employee not found");
        assert_eq!(err.user_message(), "Employee not found");
    }

    #[tokio::test]
    async fn error_status_without_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502).set_body_string("<html>bad gateway</html>"))
            .mount(&server)
            .await;

        let err = api(&server).await.dashboard_stats().await.unwrap_err();
        assert_matches!(err, ApiError::Status { status: 502, ref message } if message == "Bad Gateway");
    }

    #[tokio::test]
    async fn employee_id_is_path_encoded() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/employees/E%2F1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "message": "Employee deactivated successfully"
            })))
            .expect(1)
            .mount(&server)
            .await;

        api(&server).await.deactivate_employee("E/1").await.unwrap();
    }

    #[tokio::test]
    async fn manual_checkout_posts_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/attendance/manual-checkout"))
            .and(body_json(json!({"employee_id": "E1", "checkout_time": "18:00:00"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "message": "Manual checkout recorded"
            })))
            .expect(1)
            .mount(&server)
            .await;

        api(&server)
            .await
            .manual_checkout(&ManualCheckout {
                employee_id: "E1".into(),
                checkout_time: chrono::NaiveTime::from_hms_opt(18, 0, 0),
                date: None,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn success_false_with_ok_status_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/system/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": false,
                "message": "Processed with error"
            })))
            .mount(&server)
            .await;

        let err = api(&server).await.health().await.unwrap_err();
        assert_matches!(err, ApiError::Rejected(_));
    }

    #[tokio::test]
    async fn garbage_body_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = api(&server).await.health().await.unwrap_err();
        assert_matches!(err, ApiError::Decode(_));
        assert_eq!(err.user_message(), "Unexpected response from server");
    }

    #[tokio::test]
    async fn health_parses() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/system/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": {
                    "backend": "running",
                    "database": "connected",
                    "device": "disconnected",
                    "mock_mode": true,
                    "timestamp": "2026-10-16T09:00:00"
                }
            })))
            .mount(&server)
            .await;

        let health = api(&server).await.health().await.unwrap();
        assert!(!health.device_connected());
        assert!(health.mock_mode);
    }

    #[test]
    fn base_url_with_path_prefix() {
        let api = HttpAttendanceApi::new("http://10.0.0.5:8080/backend/", Duration::from_secs(1))
            .unwrap();
        assert_eq!(
            api.url(&["api", "employees"]).as_str(),
            "http://10.0.0.5:8080/backend/api/employees"
        );
    }

    #[test]
    fn rejects_bad_base_url() {
        assert_matches!(
            HttpAttendanceApi::new("localhost", Duration::from_secs(1)),
            Err(ApiError::InvalidRequest(_))
        );
    }
}
