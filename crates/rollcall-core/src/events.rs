use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Event kinds the dashboard reacts to.
///
/// Anything else on the wire is still a valid [`LiveEvent`], it just has no
/// kind and only reaches wildcard subscribers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    AttendanceScan,
    ManualCheckout,
    EmployeeAdded,
    EmployeeDeleted,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::AttendanceScan,
        EventKind::ManualCheckout,
        EventKind::EmployeeAdded,
        EventKind::EmployeeDeleted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AttendanceScan => "attendance_scan",
            Self::ManualCheckout => "manual_checkout",
            Self::EmployeeAdded => "employee_added",
            Self::EmployeeDeleted => "employee_deleted",
        }
    }

    pub fn from_wire(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One decoded stream frame: `{"type": ..., "data": {...}}`.
///
/// Immutable after construction. The payload stays opaque JSON; the typed
/// accessors below decode it on demand.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LiveEvent {
    #[serde(rename = "type")]
    event_type: String,
    data: Value,
}

impl LiveEvent {
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
        }
    }

    /// Event with an empty object payload.
    pub fn bare(event_type: impl Into<String>) -> Self {
        Self::new(event_type, Value::Object(Map::new()))
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn kind(&self) -> Option<EventKind> {
        EventKind::from_wire(&self.event_type)
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    /// Decode the payload into any caller-defined shape.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.data)
    }

    pub fn scan(&self) -> Option<ScanPayload> {
        self.typed(EventKind::AttendanceScan)
    }

    pub fn manual_checkout(&self) -> Option<ManualCheckoutPayload> {
        self.typed(EventKind::ManualCheckout)
    }

    /// Payload of `employee_added` / `employee_deleted`.
    pub fn employee(&self) -> Option<EmployeePayload> {
        match self.kind() {
            Some(EventKind::EmployeeAdded | EventKind::EmployeeDeleted) => self.payload().ok(),
            _ => None,
        }
    }

    fn typed<T: DeserializeOwned>(&self, kind: EventKind) -> Option<T> {
        if self.kind() == Some(kind) {
            self.payload().ok()
        } else {
            None
        }
    }

    /// Short human-readable summary, e.g. "Jane Doe checked in at 08:59:12".
    /// `None` for unknown kinds or payloads that don't decode.
    pub fn describe(&self) -> Option<String> {
        match self.kind()? {
            EventKind::AttendanceScan => {
                let scan = self.scan()?;
                let who = scan.display_name();
                let verb = match scan.action {
                    ScanAction::CheckIn => "checked in",
                    ScanAction::CheckOut => "checked out",
                };
                Some(match &scan.time {
                    Some(time) => format!("{who} {verb} at {time}"),
                    None => format!("{who} {verb}"),
                })
            }
            EventKind::ManualCheckout => {
                let checkout = self.manual_checkout()?;
                Some(match &checkout.checkout_time {
                    Some(time) => format!(
                        "Manual checkout recorded for {} at {time}",
                        checkout.employee_id
                    ),
                    None => format!("Manual checkout recorded for {}", checkout.employee_id),
                })
            }
            EventKind::EmployeeAdded => {
                let employee = self.employee()?;
                Some(format!("{} registered", employee.display_name()))
            }
            EventKind::EmployeeDeleted => {
                let employee = self.employee()?;
                Some(format!("{} removed", employee.display_name()))
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanAction {
    CheckIn,
    CheckOut,
}

/// Payload of `attendance_scan`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScanPayload {
    pub employee_id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub action: ScanAction,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub verify_mode: Option<VerifyMode>,
}

impl ScanPayload {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.employee_id)
    }
}

/// How the device verified the person. Devices report a numeric
/// sub-event code; the server may already have mapped it to a label.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VerifyMode {
    Code(i64),
    Label(String),
}

impl VerifyMode {
    pub fn label(&self) -> String {
        match self {
            Self::Code(code) => verify_mode_label(*code),
            Self::Label(label) => label.clone(),
        }
    }
}

/// Map a device sub-event code to a verification label.
pub fn verify_mode_label(code: i64) -> String {
    match code {
        38 => "Fingerprint".into(),
        75 | 76 => "Face".into(),
        1 | 25 => "Card".into(),
        other => format!("Code-{other}"),
    }
}

/// Payload of `manual_checkout`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualCheckoutPayload {
    pub employee_id: String,
    #[serde(default)]
    pub checkout_time: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
}

/// Payload of `employee_added` and `employee_deleted`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmployeePayload {
    pub employee_id: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl EmployeePayload {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.employee_id)
    }
}
