//! SeaORM entities for the storefront schema.
//!
//! Tables are created by [`crate::migrator`]. Money columns are whole
//! currency units stored as `BIGINT`; status columns are short strings
//! backed by `DeriveActiveEnum` enums.

pub mod admin;
pub mod cart;
pub mod cart_item;
pub mod category;
pub mod coupon;
pub mod inventory;
pub mod invoice;
pub mod offer;
pub mod order;
pub mod order_item;
pub mod payment_correlation;
pub mod product;
pub mod used_coupon;
pub mod user;
pub mod user_address;
pub mod wishlist;
