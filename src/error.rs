use serde::Serialize;
use serde_json::json;

/// Failure surfaced to the IPC client as `{ code, message, details }`.
#[derive(Debug, Clone, Serialize)]
pub struct AppError {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl AppError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn query(e: impl std::fmt::Display) -> Self {
        Self::new("db_query_failed", e.to_string())
    }

    pub fn insert(table: &str, e: impl std::fmt::Display) -> Self {
        Self::new("db_insert_failed", e.to_string()).with_details(json!({ "table": table }))
    }

    pub fn update(table: &str, e: impl std::fmt::Display) -> Self {
        Self::new("db_update_failed", e.to_string()).with_details(json!({ "table": table }))
    }

    pub fn delete(table: &str, e: impl std::fmt::Display) -> Self {
        Self::new("db_delete_failed", e.to_string()).with_details(json!({ "table": table }))
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {}

impl From<rusqlite::Error> for AppError {
    fn from(e: rusqlite::Error) -> Self {
        Self::query(e)
    }
}

pub type AppResult<T> = Result<T, AppError>;
