use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::RequestId;

/// Urgency of an assistance request. The `create_request` action only admits
/// low/medium/high; `critical` is accepted when reading back stored rows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

/// Hospital departments a request can be routed to. Fixed list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Department {
    Emergency,
    IntensiveCare,
    Pediatrics,
    Maternity,
    Oncology,
    Cardiology,
    Neurology,
    Orthopedics,
    Psychiatry,
    Rehabilitation,
    Geriatrics,
    Surgery,
    Outpatient,
}

impl Department {
    pub const ALL: [Department; 13] = [
        Self::Emergency,
        Self::IntensiveCare,
        Self::Pediatrics,
        Self::Maternity,
        Self::Oncology,
        Self::Cardiology,
        Self::Neurology,
        Self::Orthopedics,
        Self::Psychiatry,
        Self::Rehabilitation,
        Self::Geriatrics,
        Self::Surgery,
        Self::Outpatient,
    ];

    /// Human-readable name, as used in the action schema and stored rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Emergency => "Emergency",
            Self::IntensiveCare => "Intensive Care",
            Self::Pediatrics => "Pediatrics",
            Self::Maternity => "Maternity",
            Self::Oncology => "Oncology",
            Self::Cardiology => "Cardiology",
            Self::Neurology => "Neurology",
            Self::Orthopedics => "Orthopedics",
            Self::Psychiatry => "Psychiatry",
            Self::Rehabilitation => "Rehabilitation",
            Self::Geriatrics => "Geriatrics",
            Self::Surgery => "Surgery",
            Self::Outpatient => "Outpatient",
        }
    }
}

impl std::fmt::Display for Department {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Department {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|d| d.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown department: {s}"))
    }
}

/// Lifecycle state of an assistance request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown status: {other}")),
        }
    }
}

/// A persisted patient assistance request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AssistanceRequest {
    pub id: RequestId,
    pub priority: Priority,
    pub description: String,
    pub department: Department,
    pub status: RequestStatus,
    pub patient: String,
    pub room: String,
    pub created_at: DateTime<Utc>,
}

/// Query shape for `get_patient_requests`: patient is always required,
/// status narrows the result when present.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestFilter {
    pub patient: String,
    pub status: Option<RequestStatus>,
}

impl RequestFilter {
    pub fn for_patient(patient: impl Into<String>) -> Self {
        Self { patient: patient.into(), status: None }
    }

    pub fn with_status(mut self, status: RequestStatus) -> Self {
        self.status = Some(status);
        self
    }
}
