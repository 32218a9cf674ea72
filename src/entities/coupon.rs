use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "coupons")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub code: String,
    pub discount_type: CouponType,
    /// Divisor for percentage coupons, currency amount for flat ones
    pub amount: i64,
    pub usage_limit: i32,
    pub used_count: i32,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Model {
    pub fn is_exhausted(&self) -> bool {
        self.used_count >= self.usage_limit
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.valid_from <= now && now <= self.valid_until
    }

    /// Discount this coupon grants on a cart total.
    ///
    /// Percentage coupons divide the total by `amount` with integer
    /// truncation. Flat coupons never exceed the total.
    pub fn discount_for(&self, total: i64) -> i64 {
        match self.discount_type {
            CouponType::Percentage if self.amount > 0 => total / self.amount,
            CouponType::Percentage => 0,
            CouponType::Flat => self.amount.min(total),
        }
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::used_coupon::Entity")]
    Redemptions,
}

impl Related<super::used_coupon::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Redemptions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
    strum::Display,
    strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CouponType {
    #[sea_orm(string_value = "percentage")]
    Percentage,
    #[sea_orm(string_value = "flat")]
    Flat,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    fn coupon(discount_type: CouponType, amount: i64) -> Model {
        let now = Utc::now();
        Model {
            id: Uuid::new_v4(),
            code: "SAVE10".into(),
            discount_type,
            amount,
            usage_limit: 1,
            used_count: 0,
            valid_from: now - Duration::days(1),
            valid_until: now + Duration::days(1),
            created_at: now,
        }
    }

    #[test]
    fn percentage_divides_total() {
        assert_eq!(coupon(CouponType::Percentage, 10).discount_for(1000), 100);
        assert_eq!(coupon(CouponType::Percentage, 3).discount_for(1000), 333);
    }

    #[test]
    fn flat_is_capped_at_total() {
        assert_eq!(coupon(CouponType::Flat, 250).discount_for(1000), 250);
        assert_eq!(coupon(CouponType::Flat, 2500).discount_for(1000), 1000);
    }

    #[test]
    fn window_and_limit() {
        let mut c = coupon(CouponType::Flat, 10);
        assert!(c.is_active_at(Utc::now()));
        assert!(!c.is_active_at(Utc::now() + Duration::days(2)));
        assert!(!c.is_exhausted());
        c.used_count = 1;
        assert!(c.is_exhausted());
    }

    #[test]
    fn coupon_type_parses_lowercase() {
        assert_eq!("flat".parse::<CouponType>().ok(), Some(CouponType::Flat));
        assert_eq!(CouponType::Percentage.to_string(), "percentage");
    }

    proptest! {
        #[test]
        fn discount_never_exceeds_total(total in 0i64..10_000_000, amount in 1i64..10_000) {
            for kind in [CouponType::Percentage, CouponType::Flat] {
                let d = coupon(kind, amount).discount_for(total);
                prop_assert!(d >= 0 && d <= total);
            }
        }
    }
}
