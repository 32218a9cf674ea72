use crate::{errors::ApiError, services::Paged, ApiResponse};
use axum::{http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use validator::Validate;

pub type HandlerResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

pub fn ok<T: Serialize>(data: T) -> HandlerResult<T> {
    Ok(Json(ApiResponse::success(data)))
}

pub fn created<T: Serialize>(data: T) -> Result<(StatusCode, Json<ApiResponse<T>>), ApiError> {
    Ok((StatusCode::CREATED, Json(ApiResponse::success(data))))
}

/// Rejects the input with per-field details before it reaches a service
pub fn validate_input<T: Validate>(input: &T) -> Result<(), ApiError> {
    input.validate().map_err(ApiError::Validation)
}

/// Pagination query parameters for list operations
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PaginationParams {
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

impl PaginationParams {
    /// Page number and size, defaulted and capped by configuration
    pub fn resolve(&self, default_size: u64, max_size: u64) -> (u64, u64) {
        let page = self.page.unwrap_or(1).max(1);
        let per_page = self
            .per_page
            .unwrap_or(default_size)
            .clamp(1, max_size.max(1));
        (page, per_page)
    }
}

/// Standard pagination response metadata
#[derive(Debug, Serialize)]
pub struct PaginationMeta {
    pub page: u64,
    pub per_page: u64,
    pub total: u64,
    pub total_pages: u64,
}

impl PaginationMeta {
    pub fn new(page: u64, per_page: u64, total: u64) -> Self {
        let total_pages = if total == 0 {
            0
        } else {
            total.div_ceil(per_page.max(1))
        };
        Self {
            page,
            per_page,
            total,
            total_pages,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub pagination: PaginationMeta,
}

impl<T> From<Paged<T>> for PaginatedResponse<T> {
    fn from(paged: Paged<T>) -> Self {
        Self {
            pagination: PaginationMeta::new(paged.page, paged.per_page, paged.total),
            items: paged.items,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_is_defaulted_and_capped() {
        let params = PaginationParams::default();
        assert_eq!(params.resolve(20, 100), (1, 20));

        let params = PaginationParams {
            page: Some(0),
            per_page: Some(5000),
        };
        assert_eq!(params.resolve(20, 100), (1, 100));
    }

    #[test]
    fn total_pages_rounds_up() {
        assert_eq!(PaginationMeta::new(1, 20, 0).total_pages, 0);
        assert_eq!(PaginationMeta::new(1, 20, 20).total_pages, 1);
        assert_eq!(PaginationMeta::new(1, 20, 21).total_pages, 2);
    }
}
