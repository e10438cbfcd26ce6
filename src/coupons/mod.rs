// Coupons module: templates, campaigns, issuance and the redemption engine

pub mod conditions;
pub mod discount;
pub mod handlers;
pub mod models;
pub mod redemption;
pub mod repository;
pub mod service;

pub use discount::DiscountCalculator;
pub use handlers::*;
pub use models::*;
pub use redemption::RedemptionService;
pub use repository::*;
pub use service::CouponService;
