pub mod admin;
pub mod cart;
pub mod catalog;
pub mod common;
pub mod orders;
pub mod payment_webhooks;
pub mod reports;
pub mod users;

use crate::{
    events::EventSender,
    services::{
        accounts::AccountService,
        cart::CartService,
        catalog::CatalogService,
        inventory::InventoryService,
        orders::OrderService,
        payments::{PaymentGateways, PaymentService, PaymentSettings},
        promotions::PromotionService,
        reports::ReportService,
        wishlist::WishlistService,
    },
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;

pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub accounts: Arc<AccountService>,
    pub catalog: Arc<CatalogService>,
    pub inventory: Arc<InventoryService>,
    pub cart: Arc<CartService>,
    pub promotions: Arc<PromotionService>,
    pub wishlist: Arc<WishlistService>,
    pub orders: Arc<OrderService>,
    pub payments: Arc<PaymentService>,
    pub reports: Arc<ReportService>,
}

impl AppServices {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        gateways: PaymentGateways,
        settings: PaymentSettings,
    ) -> Self {
        Self {
            accounts: Arc::new(AccountService::new(db.clone(), event_sender.clone())),
            catalog: Arc::new(CatalogService::new(db.clone(), event_sender.clone())),
            inventory: Arc::new(InventoryService::new(db.clone(), event_sender.clone())),
            cart: Arc::new(CartService::new(db.clone(), event_sender.clone())),
            promotions: Arc::new(PromotionService::new(db.clone(), event_sender.clone())),
            wishlist: Arc::new(WishlistService::new(db.clone())),
            orders: Arc::new(OrderService::new(
                db.clone(),
                event_sender.clone(),
                gateways,
                settings.clone(),
            )),
            payments: Arc::new(PaymentService::new(db.clone(), event_sender, settings)),
            reports: Arc::new(ReportService::new(db)),
        }
    }
}
