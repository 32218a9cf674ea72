use axum::{
    extract::{Path, State},
    routing::get,
    Router,
};

use super::common::{ok, HandlerResult};
use crate::{
    auth::CurrentAdmin,
    services::reports::{Dashboard, SalesReport},
    AppState,
};

pub fn report_routes() -> Router<AppState> {
    Router::new()
        .route("/admin/dashboard", get(dashboard))
        .route("/admin/salesreport/period/:period", get(sales_by_period))
        .route("/admin/salesreport/date/:start/:end", get(sales_by_date))
        .route(
            "/admin/salesreport/payment/:start/:end/:payment",
            get(sales_by_payment),
        )
}

pub async fn dashboard(
    State(state): State<AppState>,
    CurrentAdmin(_): CurrentAdmin,
) -> HandlerResult<Dashboard> {
    ok(state.services.reports.dashboard().await?)
}

// GET /admin/salesreport/period/:period
pub async fn sales_by_period(
    State(state): State<AppState>,
    CurrentAdmin(_): CurrentAdmin,
    Path(period): Path<String>,
) -> HandlerResult<SalesReport> {
    ok(state.services.reports.sales_by_period(&period).await?)
}

// GET /admin/salesreport/date/:start/:end
pub async fn sales_by_date(
    State(state): State<AppState>,
    CurrentAdmin(_): CurrentAdmin,
    Path((start, end)): Path<(String, String)>,
) -> HandlerResult<SalesReport> {
    ok(state.services.reports.sales_by_date(&start, &end).await?)
}

// GET /admin/salesreport/payment/:start/:end/:payment
pub async fn sales_by_payment(
    State(state): State<AppState>,
    CurrentAdmin(_): CurrentAdmin,
    Path((start, end, payment)): Path<(String, String, String)>,
) -> HandlerResult<SalesReport> {
    ok(state
        .services
        .reports
        .sales_by_payment(&start, &end, &payment)
        .await?)
}
