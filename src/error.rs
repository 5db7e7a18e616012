use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sea_orm::DbErr),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Auth error: {0}")]
    AuthError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// 所有候选交易号都没有匹配到购买记录
    #[error("Purchase not found for identifiers {0:?}")]
    PurchaseNotFound(Vec<String>),

    /// 号码空间被占满或随机重抽次数超限
    #[error("Ticket generation exhausted: requested {requested}, excluded {excluded}")]
    GenerationExhausted { requested: usize, excluded: usize },

    /// 唯一约束拒绝了部分号码
    #[error("Ticket conflict on purchase {purchase_id}: {rejected} numbers rejected")]
    TicketConflict { purchase_id: i64, rejected: usize },

    /// 已确认支付但号码未完整落库
    #[error("Payment confirmed but tickets not recorded for {transaction_id}: {reason}")]
    TicketsNotRecorded {
        transaction_id: String,
        reason: String,
    },

    #[error("Spin grant failed: {0}")]
    GrantFailure(String),

    #[error("Notification failed: {0}")]
    NotificationFailure(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("External API error: {0}")]
    ExternalApiError(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Internal server error: {0}")]
    InternalError(String),

    #[error("JWT error: {0}")]
    JwtError(#[from] jsonwebtoken::errors::Error),

    #[error("HTTP request error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    SerdeJsonError(#[from] serde_json::Error),
}

impl AppError {
    /// 稳定的错误码，用于响应体
    pub fn code(&self) -> &'static str {
        match self {
            AppError::ValidationError(_) => "VALIDATION_ERROR",
            AppError::AuthError(_) | AppError::JwtError(_) => "AUTH_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::PurchaseNotFound(_) => "PURCHASE_NOT_FOUND",
            AppError::GenerationExhausted { .. } => "GENERATION_EXHAUSTED",
            AppError::TicketConflict { .. } => "TICKET_CONFLICT",
            AppError::TicketsNotRecorded { .. } => "TICKETS_NOT_RECORDED",
            AppError::Timeout(_) => "TIMEOUT",
            AppError::ExternalApiError(_) | AppError::ReqwestError(_) => "EXTERNAL_API_ERROR",
            AppError::DatabaseError(_) => "DATABASE_ERROR",
            _ => "INTERNAL_ERROR",
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;
        match self {
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::AuthError(_) | AppError::JwtError(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) | AppError::PurchaseNotFound(_) => StatusCode::NOT_FOUND,
            AppError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::ExternalApiError(_) | AppError::ReqwestError(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status_code = self.status_code();
        let message = match self {
            AppError::ValidationError(msg) => {
                log::warn!("Validation error: {msg}");
                msg.clone()
            }
            AppError::AuthError(msg) => {
                log::warn!("Authentication error: {msg}");
                msg.clone()
            }
            AppError::JwtError(err) => {
                log::warn!("JWT error: {err}");
                "Invalid access token".to_string()
            }
            AppError::NotFound(msg) => msg.clone(),
            AppError::PurchaseNotFound(ids) => {
                log::warn!("Purchase not found for identifiers {ids:?}");
                "Purchase not found".to_string()
            }
            AppError::TicketsNotRecorded { .. } => {
                // 告警已在对账服务中以 alert target 输出，这里只给出可读信息
                "Payment confirmed but tickets could not be recorded".to_string()
            }
            AppError::GenerationExhausted { .. } => {
                log::error!("{self}");
                "Ticket numbers could not be generated".to_string()
            }
            AppError::Timeout(msg) => {
                log::error!("Timeout: {msg}");
                "Upstream request timed out".to_string()
            }
            AppError::ExternalApiError(msg) => {
                log::error!("External API error: {msg}");
                msg.clone()
            }
            AppError::DatabaseError(err) => {
                log::error!("Database error: {err}");
                "Database error".to_string()
            }
            _ => {
                log::error!("Internal error: {self}");
                "Internal server error".to_string()
            }
        };

        HttpResponse::build(status_code).json(json!({
            "success": false,
            "error": {
                "code": self.code(),
                "message": message
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;
    use actix_web::http::StatusCode;

    #[test]
    fn test_propagated_variants_map_to_non_200() {
        assert_eq!(
            AppError::PurchaseNotFound(vec!["123".into()]).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::GenerationExhausted {
                requested: 5,
                excluded: 0
            }
            .status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AppError::TicketsNotRecorded {
                transaction_id: "tx".into(),
                reason: "db down".into()
            }
            .status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AppError::AuthError("bad".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[actix_web::test]
    async fn test_error_body_has_code_and_message() {
        let resp = AppError::TicketsNotRecorded {
            transaction_id: "tx-1".into(),
            reason: "insert failed".into(),
        }
        .error_response();
        let body = to_bytes(resp.into_body()).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["error"]["code"], "TICKETS_NOT_RECORDED");
        assert!(value["error"]["message"].as_str().unwrap().contains("tickets"));
    }
}
