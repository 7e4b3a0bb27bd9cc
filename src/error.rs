use crate::store::StoreError;

pub const NETWORK_MESSAGE: &str =
    "Unable to reach the school server. Please check your connection.";
pub const PARTIAL_WRITE_MESSAGE: &str = "Exam Created but Marks Failed";
pub const UNEXPECTED_MESSAGE: &str = "Something went wrong. Please try again.";

/// Failure classes surfaced to the UI shell. Each maps to a stable wire code.
#[derive(Debug, thiserror::Error)]
pub enum PortalError {
    #[error("{}", NETWORK_MESSAGE)]
    Network { attempts: u32, last: String },
    #[error("no matching {entity} record")]
    NotFound { entity: &'static str, key: String },
    #[error("{}: {reason}", PARTIAL_WRITE_MESSAGE)]
    PartialWrite { exam_id: String, reason: String },
    #[error("{message}")]
    Rejected {
        code: &'static str,
        message: String,
        details: Option<serde_json::Value>,
    },
    #[error("{}", UNEXPECTED_MESSAGE)]
    Unexpected(anyhow::Error),
}

impl PortalError {
    pub fn rejected(code: &'static str, message: impl Into<String>) -> Self {
        PortalError::Rejected {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            PortalError::Network { .. } => "network_unavailable",
            PortalError::NotFound { .. } => "not_found",
            PortalError::PartialWrite { .. } => "partial_write",
            PortalError::Rejected { code, .. } => code,
            PortalError::Unexpected(_) => "unexpected",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            PortalError::Network { attempts, last } => Some(serde_json::json!({
                "attempts": attempts,
                "lastError": last,
            })),
            PortalError::NotFound { entity, key } => Some(serde_json::json!({
                "entity": entity,
                "key": key,
            })),
            PortalError::PartialWrite { exam_id, reason } => Some(serde_json::json!({
                "examId": exam_id,
                "reason": reason,
            })),
            PortalError::Rejected { details, .. } => details.clone(),
            PortalError::Unexpected(e) => Some(serde_json::json!({ "cause": format!("{e:#}") })),
        }
    }
}

impl From<StoreError> for PortalError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { entity, key } => PortalError::NotFound { entity, key },
            StoreError::Unavailable(msg) => PortalError::Network {
                attempts: 1,
                last: msg,
            },
            StoreError::Constraint(msg) => PortalError::Rejected {
                code: "constraint_violation",
                message: msg,
                details: None,
            },
            StoreError::Query(e) => PortalError::Unexpected(anyhow::Error::new(e)),
        }
    }
}

impl From<anyhow::Error> for PortalError {
    fn from(e: anyhow::Error) -> Self {
        PortalError::Unexpected(e)
    }
}
