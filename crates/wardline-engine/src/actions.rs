use serde_json::{json, Value};
use tracing::info;

use wardline_core::calls::FunctionCall;
use wardline_core::errors::RelayError;
use wardline_core::requests::{Department, Priority, RequestFilter, RequestStatus};
use wardline_store::requests::{NewRequest, RequestRepo};

/// Per-session context carried into action execution. Fills arguments the
/// model omitted; missing values fall back to "Unknown".
#[derive(Clone, Debug, Default)]
pub struct ActionContext {
    pub patient: Option<String>,
    pub room: Option<String>,
}

/// Static schema for one action: what it is called, what the model must
/// supply, and what it may supply. Adding an action is a data change.
pub struct ActionSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub required: &'static [&'static str],
    pub optional: &'static [&'static str],
    parameters: fn() -> Value,
}

const CREATE_REQUEST: &str = "create_request";
const GET_PATIENT_REQUESTS: &str = "get_patient_requests";

const SPECS: &[ActionSpec] = &[
    ActionSpec {
        name: CREATE_REQUEST,
        description: "Create an assistance request for the current patient",
        required: &["priority", "description", "department"],
        optional: &[],
        parameters: create_request_parameters,
    },
    ActionSpec {
        name: GET_PATIENT_REQUESTS,
        description: "List existing assistance requests for a patient",
        required: &["patientId"],
        optional: &["status"],
        parameters: get_patient_requests_parameters,
    },
];

fn create_request_parameters() -> Value {
    let departments: Vec<&str> = Department::ALL.iter().map(|d| d.as_str()).collect();
    json!({
        "type": "object",
        "properties": {
            "priority": {
                "type": "string",
                "enum": ["low", "medium", "high"],
                "description": "Urgency of the request"
            },
            "description": {
                "type": "string",
                "description": "What the patient needs"
            },
            "department": {
                "type": "string",
                "enum": departments,
                "description": "Department responsible for the request"
            }
        },
        "required": ["priority", "description", "department"]
    })
}

fn get_patient_requests_parameters() -> Value {
    json!({
        "type": "object",
        "properties": {
            "patientId": {
                "type": "string",
                "description": "Identifier of the patient"
            },
            "status": {
                "type": "string",
                "enum": ["pending", "in_progress", "completed", "cancelled"],
                "description": "Only return requests in this state"
            }
        },
        "required": ["patientId"]
    })
}

/// Validates and executes the domain actions a model may call.
pub struct ActionRegistry {
    repo: RequestRepo,
}

impl ActionRegistry {
    pub fn new(repo: RequestRepo) -> Self {
        Self { repo }
    }

    /// Tool definitions sent alongside every generation call.
    pub fn definitions(&self) -> Vec<Value> {
        SPECS
            .iter()
            .map(|spec| {
                json!({
                    "type": "function",
                    "function": {
                        "name": spec.name,
                        "description": spec.description,
                        "parameters": (spec.parameters)(),
                    }
                })
            })
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        SPECS.iter().any(|s| s.name == name)
    }

    /// Check a call against its schema. Names every problem key at once
    /// rather than failing on the first, keeping absent keys apart from
    /// keys that were supplied with an unusable value.
    pub fn validate(&self, call: &FunctionCall) -> Result<(), RelayError> {
        let spec = SPECS
            .iter()
            .find(|s| s.name == call.name)
            .ok_or_else(|| RelayError::UnknownAction(call.name.clone()))?;

        let missing: Vec<String> = spec
            .required
            .iter()
            .filter(|key| call.arg_str(key).map(str::trim).unwrap_or("").is_empty())
            .map(|key| key.to_string())
            .collect();

        let mut invalid: Vec<String> = Vec::new();
        let supplied = |key: &str| call.arg_str(key).map(str::trim).filter(|v| !v.is_empty());

        if call.name == CREATE_REQUEST {
            if let Some(raw) = supplied("priority") {
                match raw.parse::<Priority>() {
                    Ok(Priority::Low | Priority::Medium | Priority::High) => {}
                    _ => invalid.push("priority".to_string()),
                }
            }
            if let Some(raw) = supplied("department") {
                if raw.parse::<Department>().is_err() {
                    invalid.push("department".to_string());
                }
            }
        }
        if call.name == GET_PATIENT_REQUESTS {
            if let Some(raw) = supplied("status") {
                if raw.parse::<RequestStatus>().is_err() {
                    invalid.push("status".to_string());
                }
            }
        }

        if missing.is_empty() && invalid.is_empty() {
            Ok(())
        } else {
            Err(RelayError::InvalidArguments { action: call.name.clone(), missing, invalid })
        }
    }

    /// Execute a validated call and render its result as reply text.
    pub fn execute(&self, call: &FunctionCall, ctx: &ActionContext) -> Result<String, RelayError> {
        self.validate(call)?;

        match call.name.as_str() {
            CREATE_REQUEST => self.create_request(call, ctx),
            GET_PATIENT_REQUESTS => self.get_patient_requests(call),
            other => Err(RelayError::UnknownAction(other.to_string())),
        }
    }

    fn create_request(&self, call: &FunctionCall, ctx: &ActionContext) -> Result<String, RelayError> {
        // Validated above, so these parses cannot fail.
        let priority: Priority = call
            .arg_str("priority")
            .unwrap_or("medium")
            .parse()
            .map_err(|_| RelayError::InvalidArguments {
                action: CREATE_REQUEST.to_string(),
                missing: vec![],
                invalid: vec!["priority".to_string()],
            })?;
        let department: Department = call
            .arg_str("department")
            .unwrap_or("")
            .parse()
            .map_err(|_| RelayError::InvalidArguments {
                action: CREATE_REQUEST.to_string(),
                missing: vec![],
                invalid: vec!["department".to_string()],
            })?;
        let description = call.arg_str("description").unwrap_or("").to_string();

        let patient = ctx.patient.clone().unwrap_or_else(|| "Unknown".to_string());
        let room = ctx.room.clone().unwrap_or_else(|| "Unknown".to_string());

        // Status always starts as pending, whatever the model asked for.
        let created = self.repo.insert(NewRequest {
            priority,
            description,
            department,
            patient,
            room,
        })?;

        info!(
            request_id = %created.id,
            priority = %created.priority,
            department = %created.department,
            "assistance request created"
        );

        Ok(format!(
            "Created a {} priority request for {}: {}",
            created.priority, created.department, created.description
        ))
    }

    fn get_patient_requests(&self, call: &FunctionCall) -> Result<String, RelayError> {
        let patient = call.arg_str("patientId").unwrap_or("").trim().to_string();
        if patient.is_empty() {
            return Err(RelayError::InvalidArguments {
                action: GET_PATIENT_REQUESTS.to_string(),
                missing: vec!["patientId".to_string()],
                invalid: vec![],
            });
        }

        let mut filter = RequestFilter::for_patient(patient);
        if let Some(raw) = call.arg_str("status") {
            if let Ok(status) = raw.parse::<RequestStatus>() {
                filter = filter.with_status(status);
            }
        }

        let found = self.repo.find(&filter)?;
        if found.is_empty() {
            return Ok("No requests found.".to_string());
        }

        Ok(found
            .iter()
            .map(|r| format!("{}: {}", r.priority, r.description))
            .collect::<Vec<_>>()
            .join("\n"))
    }
}
