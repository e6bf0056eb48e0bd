use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use uuid::Uuid;

use crate::channels::twilio_sms::TwilioError;
use crate::contacts::dnd::DndError;
use crate::contacts::import::ImportError;
use crate::conversations::compose::ComposeError;
use crate::conversations::service::ConversationError;
use crate::conversations::thread::ThreadError;
use crate::core::auth::AuthError;
use crate::crm::CrmError;
use crate::llm::AgentError;
use crate::pipelines::board::BoardError;

/// Error returned by every route handler.
///
/// Validation problems become 400, missing entities 404 and everything that
/// went wrong upstream 500. The body always carries `success: false`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Send failed: {reason}")]
    SendFailed { client_id: Uuid, reason: String },
    #[error("Upstream error: {0}")]
    Upstream(String),
    #[error("Request cancelled")]
    Cancelled,
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn missing(field: &str) -> Self {
        Self::Validation(format!("Missing required field: {field}"))
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::SendFailed { .. }
            | Self::Upstream(_)
            | Self::Cancelled
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    success: bool,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_id: Option<Uuid>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let client_id = match &self {
            Self::SendFailed { client_id, .. } => Some(*client_id),
            _ => None,
        };
        let body = ErrorBody {
            success: false,
            error: self.to_string(),
            client_id,
        };
        (status, Json(body)).into_response()
    }
}

/// `{"success": true, ...payload}`
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(flatten)]
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data,
        })
    }
}

pub type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

impl From<CrmError> for ApiError {
    fn from(err: CrmError) -> Self {
        match err {
            CrmError::NotFound(what) => Self::NotFound(what),
            CrmError::InvalidInput(msg) => Self::Validation(msg),
            other => Self::Upstream(other.to_string()),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingToken => Self::Validation(err.to_string()),
            AuthError::InvalidToken | AuthError::NoBusiness(_) => {
                Self::Unauthorized(err.to_string())
            }
            AuthError::Network(_) | AuthError::Parse(_) => Self::Upstream(err.to_string()),
        }
    }
}

impl From<TwilioError> for ApiError {
    fn from(err: TwilioError) -> Self {
        match err {
            TwilioError::MissingField(_) | TwilioError::InvalidSignature => {
                Self::Validation(err.to_string())
            }
            other => Self::Upstream(other.to_string()),
        }
    }
}

impl From<AgentError> for ApiError {
    fn from(err: AgentError) -> Self {
        Self::Upstream(err.to_string())
    }
}

impl From<ThreadError> for ApiError {
    fn from(err: ThreadError) -> Self {
        match err {
            ThreadError::UnknownMessage(id) => Self::NotFound(format!("message {id}")),
            ThreadError::NotRetryable(_) => Self::Validation(err.to_string()),
        }
    }
}

impl From<ComposeError> for ApiError {
    fn from(err: ComposeError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<DndError> for ApiError {
    fn from(err: DndError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<ImportError> for ApiError {
    fn from(err: ImportError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<BoardError> for ApiError {
    fn from(err: BoardError) -> Self {
        match err {
            BoardError::UnknownOpportunity(id) => Self::NotFound(format!("opportunity {id}")),
            BoardError::UnknownStage(_) => Self::Validation(err.to_string()),
        }
    }
}

impl From<ConversationError> for ApiError {
    fn from(err: ConversationError) -> Self {
        match err {
            ConversationError::Crm(e) => e.into(),
            ConversationError::Transport(e) => e.into(),
            ConversationError::Thread(e) => e.into(),
            ConversationError::Compose(e) => e.into(),
            ConversationError::SendFailed { client_id, reason } => {
                Self::SendFailed { client_id, reason }
            }
            ConversationError::Cancelled => Self::Cancelled,
        }
    }
}
