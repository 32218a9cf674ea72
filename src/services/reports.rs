use crate::{
    entities::{
        inventory,
        order::{self, OrderStatus, PaymentMethod},
        product, user,
    },
    errors::ServiceError,
};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::{Alias, Expr, Func, SimpleExpr},
    ColumnTrait, Condition, DatabaseConnection, EntityTrait, FromQueryResult, PaginatorTrait,
    QueryFilter, QuerySelect,
};
use serde::{Serialize, Serializer};
use std::{str::FromStr, sync::Arc};
use tracing::instrument;

/// Date format used in report paths, e.g. `1-3-2024`
pub const REPORT_DATE_FORMAT: &str = "%d-%m-%Y";

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ReportPeriod {
    Day,
    Week,
    Month,
    Year,
}

impl ReportPeriod {
    fn days(self) -> i64 {
        match self {
            ReportPeriod::Day => 1,
            ReportPeriod::Week => 7,
            ReportPeriod::Month => 30,
            ReportPeriod::Year => 365,
        }
    }

    /// The period as an inclusive date range ending on `today`
    pub fn range_ending(self, today: NaiveDate) -> DateRange {
        DateRange {
            start: today - Duration::days(self.days() - 1),
            end: today,
        }
    }
}

fn serialize_report_date<S: Serializer>(date: &NaiveDate, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&date.format(REPORT_DATE_FORMAT).to_string())
}

/// Inclusive range of calendar days (UTC)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
    #[serde(serialize_with = "serialize_report_date")]
    pub start: NaiveDate,
    #[serde(serialize_with = "serialize_report_date")]
    pub end: NaiveDate,
}

impl DateRange {
    pub fn parse(start: &str, end: &str) -> Result<Self, ServiceError> {
        let range = Self {
            start: parse_report_date(start)?,
            end: parse_report_date(end)?,
        };
        if range.start > range.end {
            return Err(ServiceError::ValidationError(format!(
                "start date {} is after end date {}",
                start, end
            )));
        }
        Ok(range)
    }

    /// `[start 00:00, end + 1 day 00:00)` in UTC
    fn bounds(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        let midnight = |day: NaiveDate| Utc.from_utc_datetime(&day.and_time(NaiveTime::default()));
        (midnight(self.start), midnight(self.end + Duration::days(1)))
    }
}

pub fn parse_report_date(value: &str) -> Result<NaiveDate, ServiceError> {
    NaiveDate::parse_from_str(value.trim(), REPORT_DATE_FORMAT).map_err(|_| {
        ServiceError::ValidationError(format!(
            "invalid date {:?}, expected day-month-year such as 1-3-2024",
            value
        ))
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct SalesReport {
    #[serde(flatten)]
    pub range: DateRange,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<PaymentMethod>,
    pub total_sales: i64,
    pub total_orders: i64,
    pub average_order_value: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub total_users: u64,
    pub new_users_24h: u64,
    pub total_products: u64,
    pub stockless_products: u64,
    pub total_orders: u64,
    pub pending_orders: u64,
    pub return_orders: u64,
    pub average_order_value: Decimal,
    pub revenue: i64,
}

#[derive(Debug, FromQueryResult)]
struct SalesTotals {
    total_sales: i64,
    total_orders: i64,
}

impl SalesTotals {
    fn average(&self) -> Decimal {
        if self.total_orders == 0 {
            return Decimal::ZERO;
        }
        (Decimal::from(self.total_sales) / Decimal::from(self.total_orders)).round_dp(2)
    }
}

/// Sales figures and the admin dashboard. Only confirmed orders count as sales.
#[derive(Clone)]
pub struct ReportService {
    db: Arc<DatabaseConnection>,
}

impl ReportService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub async fn sales_by_period(&self, period: &str) -> Result<SalesReport, ServiceError> {
        let period = ReportPeriod::from_str(&period.to_lowercase()).map_err(|_| {
            ServiceError::ValidationError(format!(
                "unknown period {:?}, expected day, week, month or year",
                period
            ))
        })?;
        let range = period.range_ending(Utc::now().date_naive());
        self.sales_report(range, None).await
    }

    #[instrument(skip(self))]
    pub async fn sales_by_date(&self, start: &str, end: &str) -> Result<SalesReport, ServiceError> {
        self.sales_report(DateRange::parse(start, end)?, None).await
    }

    #[instrument(skip(self))]
    pub async fn sales_by_payment(
        &self,
        start: &str,
        end: &str,
        method: &str,
    ) -> Result<SalesReport, ServiceError> {
        let range = DateRange::parse(start, end)?;
        let method = PaymentMethod::from_str(&method.to_lowercase()).map_err(|_| {
            ServiceError::ValidationError(format!("unknown payment method {:?}", method))
        })?;
        self.sales_report(range, Some(method)).await
    }

    pub async fn sales_report(
        &self,
        range: DateRange,
        payment_method: Option<PaymentMethod>,
    ) -> Result<SalesReport, ServiceError> {
        let (from, until) = range.bounds();
        let mut filter = Condition::all()
            .add(order::Column::CreatedAt.gte(from))
            .add(order::Column::CreatedAt.lt(until));
        if let Some(method) = payment_method {
            filter = filter.add(order::Column::PaymentMethod.eq(method));
        }

        let totals = self.confirmed_totals(filter).await?;
        Ok(SalesReport {
            range,
            payment_method,
            total_sales: totals.total_sales,
            total_orders: totals.total_orders,
            average_order_value: totals.average(),
        })
    }

    #[instrument(skip(self))]
    pub async fn dashboard(&self) -> Result<Dashboard, ServiceError> {
        let db = &*self.db;
        let since = Utc::now() - Duration::hours(24);

        let total_users = user::Entity::find().count(db).await?;
        let new_users_24h = user::Entity::find()
            .filter(user::Column::CreatedAt.gte(since))
            .count(db)
            .await?;
        let total_products = product::Entity::find()
            .filter(product::Column::Removed.eq(false))
            .count(db)
            .await?;
        let stockless_products = inventory::Entity::find()
            .filter(inventory::Column::Quantity.lte(0))
            .count(db)
            .await?;
        let total_orders = order::Entity::find().count(db).await?;
        let pending_orders = order::Entity::find()
            .filter(order::Column::Status.eq(OrderStatus::Pending))
            .count(db)
            .await?;
        let return_orders = order::Entity::find()
            .filter(order::Column::Status.eq(OrderStatus::Return))
            .count(db)
            .await?;
        let confirmed = self.confirmed_totals(Condition::all()).await?;

        Ok(Dashboard {
            total_users,
            new_users_24h,
            total_products,
            stockless_products,
            total_orders,
            pending_orders,
            return_orders,
            average_order_value: confirmed.average(),
            revenue: confirmed.total_sales,
        })
    }

    async fn confirmed_totals(&self, filter: Condition) -> Result<SalesTotals, ServiceError> {
        let sum: SimpleExpr = Func::coalesce([
            Expr::col(order::Column::Total).sum(),
            Expr::val(0i64).into(),
        ])
        .into();

        let totals = order::Entity::find()
            .select_only()
            .column_as(sum.cast_as(Alias::new("BIGINT")), "total_sales")
            .column_as(Expr::col(order::Column::Id).count(), "total_orders")
            .filter(order::Column::Status.eq(OrderStatus::Confirmed))
            .filter(filter)
            .into_model::<SalesTotals>()
            .one(&*self.db)
            .await?;

        Ok(totals.unwrap_or(SalesTotals {
            total_sales: 0,
            total_orders: 0,
        }))
    }
}
