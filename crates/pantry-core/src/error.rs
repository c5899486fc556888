//! Failure taxonomy of the request pipeline.
//!
//! Every variant carries internal detail for logs through `Display`. What the caller sees is
//! `public_message()`, a fixed string per kind.

/// Why a credential was not accepted. Only ever logged; callers see one outcome for all three.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialFault {
    #[error("no bearer credential")]
    Missing,
    #[error("credential rejected: {0}")]
    Invalid(String),
    #[error("identity oracle unavailable: {0}")]
    OracleUnavailable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("unauthenticated ({0})")]
    Unauthenticated(CredentialFault),
    #[error("no active entitlement for principal {uid}")]
    EntitlementDenied { uid: String },
    #[error("no valid {field} provided")]
    InvalidInput { field: &'static str },
    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },
    #[error("configuration defect: {0}")]
    Configuration(String),
    #[error("{service} failed: {detail}")]
    Dependency {
        service: &'static str,
        detail: String,
    },
    #[error("completion is not valid JSON: {0}")]
    UpstreamFormat(String),
}

impl GatewayError {
    pub fn dependency(service: &'static str, detail: impl Into<String>) -> Self {
        GatewayError::Dependency {
            service,
            detail: detail.into(),
        }
    }

    /// HTTP status the gateway answers with for this failure.
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::Unauthenticated(_) | GatewayError::EntitlementDenied { .. } => 403,
            GatewayError::InvalidInput { .. } => 400,
            GatewayError::PayloadTooLarge { .. } => 413,
            GatewayError::Configuration(_)
            | GatewayError::Dependency { .. }
            | GatewayError::UpstreamFormat(_) => 500,
        }
    }

    /// Redacted body text. Stable per kind; never includes upstream or verifier detail.
    pub fn public_message(&self) -> &'static str {
        match self {
            GatewayError::Unauthenticated(_) => "Unauthorized",
            GatewayError::EntitlementDenied { .. } => "An active subscription is required",
            GatewayError::InvalidInput { field } => match *field {
                "ingredients" => "No valid ingredients provided",
                "title" => "No valid title provided",
                "category" => "No valid category provided",
                "image" => "No valid image provided",
                _ => "Invalid request",
            },
            GatewayError::PayloadTooLarge { .. } => "Image is too large",
            GatewayError::Configuration(_) => "Service is misconfigured",
            GatewayError::Dependency { .. } => "Upstream service unavailable",
            GatewayError::UpstreamFormat(_) => "Upstream returned an invalid response",
        }
    }

    pub fn is_server_error(&self) -> bool {
        self.status_code() >= 500
    }
}

impl From<CredentialFault> for GatewayError {
    fn from(fault: CredentialFault) -> Self {
        GatewayError::Unauthenticated(fault)
    }
}
