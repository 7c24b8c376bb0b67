use serde::Deserialize;
use utoipa::IntoParams;

use crate::error::{AppError, AppResult};

#[derive(Debug, Deserialize, IntoParams)]
pub struct LimitParams {
    #[param(default = 20, minimum = 1, maximum = 100)]
    pub limit: Option<i64>,
}

impl LimitParams {
    pub fn limit(&self) -> u64 {
        self.limit.unwrap_or(20).clamp(1, 100) as u64
    }
}

/// Reject blank or over-long required fields
pub fn validate_required(value: &str, field: &str, max_len: usize) -> AppResult<()> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation(format!("{} is required", field)));
    }
    if trimmed.len() > max_len {
        return Err(AppError::Validation(format!(
            "{} must be at most {} characters",
            field, max_len
        )));
    }
    Ok(())
}
