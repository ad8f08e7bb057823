//! Error taxonomy shared by adapters, provider clients, the plugin pipeline, and the
//! dispatcher. A single enum keeps HTTP-status mapping centralised in one place.

use std::error::Error;
use std::fmt;

/// Classifies a failure anywhere in the request pipeline so the dispatcher can map
/// it to a status code and a stable wire error code without re-deriving intent from
/// a string.
#[derive(Debug, Clone)]
pub enum GatewayError {
    /// The inbound request body didn't match the adapter's expected shape.
    InputInvalid(String),
    /// No credentials were presented where the pipeline requires them.
    Unauthorized(String),
    /// Credentials were presented but don't grant access to the requested resource.
    Forbidden(String),
    /// An external auth service the pipeline depends on could not be reached.
    AuthServiceUnavailable(String),
    /// The requested model isn't present in the registry.
    ModelNotConfigured(String),
    /// The upstream vendor returned an error response.
    UpstreamError { status: Option<u16>, message: String },
    /// The upstream vendor did not respond within the configured deadline.
    UpstreamTimeout(String),
    /// A plugin aborted the pipeline outside of the auth-specific cases above.
    PluginError(String),
    /// A plugin terminated the request with an explicit status code of its own
    /// choosing (e.g. a content filter reporting 400) that doesn't match any of
    /// the fixed-status variants above.
    PluginRejected { status: u16, message: String },
    /// Anything else — a bug, an I/O failure, a serialisation error.
    Internal(String),
}

impl GatewayError {
    /// HTTP status code the dispatcher should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::InputInvalid(_) => 400,
            GatewayError::Unauthorized(_) => 401,
            GatewayError::Forbidden(_) => 403,
            GatewayError::ModelNotConfigured(_) => 404,
            GatewayError::AuthServiceUnavailable(_) => 503,
            GatewayError::UpstreamTimeout(_) => 504,
            GatewayError::UpstreamError { status, .. } => status.unwrap_or(502),
            GatewayError::PluginError(_) => 500,
            GatewayError::PluginRejected { status, .. } => *status,
            GatewayError::Internal(_) => 500,
        }
    }

    /// Stable machine-readable code, independent of the HTTP status, for the JSON
    /// error body.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::InputInvalid(_) => "input_invalid",
            GatewayError::Unauthorized(_) => "unauthorized",
            GatewayError::Forbidden(_) => "forbidden",
            GatewayError::AuthServiceUnavailable(_) => "auth_service_unavailable",
            GatewayError::ModelNotConfigured(_) => "model_not_configured",
            GatewayError::UpstreamError { .. } => "upstream_error",
            GatewayError::UpstreamTimeout(_) => "upstream_timeout",
            GatewayError::PluginError(_) => "plugin_error",
            GatewayError::PluginRejected { .. } => "plugin_rejected",
            GatewayError::Internal(_) => "internal_error",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            GatewayError::InputInvalid(m)
            | GatewayError::Unauthorized(m)
            | GatewayError::Forbidden(m)
            | GatewayError::AuthServiceUnavailable(m)
            | GatewayError::ModelNotConfigured(m)
            | GatewayError::UpstreamTimeout(m)
            | GatewayError::PluginError(m)
            | GatewayError::Internal(m) => m,
            GatewayError::UpstreamError { message, .. } => message,
            GatewayError::PluginRejected { message, .. } => message,
        }
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code(), self.message())
    }
}

impl Error for GatewayError {}

impl From<Box<dyn Error + Send + Sync>> for GatewayError {
    fn from(err: Box<dyn Error + Send + Sync>) -> Self {
        GatewayError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::InputInvalid(err.to_string())
    }
}
