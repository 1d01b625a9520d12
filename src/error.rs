use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error, Clone)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    #[error("message bus unavailable: {0}")]
    BusUnavailable(String),

    #[error("bad request: {0}")]
    BadRequest(String),
}

impl AppError {
    /// Returns HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::BadRequest(_) => 400,
            AppError::BusUnavailable(_) => 503,
            AppError::Config(_) | AppError::StartServer(_) => 500,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "validation_error",
            AppError::BusUnavailable(_) => "unavailable_error",
            _ => "server_error",
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(AppError::status_code(self))
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(ResponseError::status_code(self)).json(serde_json::json!({
            "error": self.error_type(),
            "message": self.to_string(),
            "status": AppError::status_code(self),
        }))
    }
}

impl From<crate::bus::BusError> for AppError {
    fn from(e: crate::bus::BusError) -> Self {
        AppError::BusUnavailable(e.to_string())
    }
}
