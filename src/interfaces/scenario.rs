use crate::application::orders::CreateOrderRequest;
use crate::application::payments::FirstPaymentProof;
use crate::application::scheduler::RunSummary;
use crate::application::services::EngineServices;
use crate::domain::UserId;
use crate::domain::money::Amount;
use crate::domain::order::{OrderReferral, PaymentMethod};
use crate::domain::ports::Product;
use crate::domain::streak::Milestone;
use crate::domain::user::{AutopaySettingsUpdate, User};
use crate::domain::wallet::{LedgerContext, WalletTransactionCategory};
use crate::error::{EngineError, Result};
use crate::infrastructure::clock::FixedClock;
use crate::infrastructure::in_memory::StaticCatalog;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Deserialize, Clone)]
pub struct ReferralLink {
    pub user_id: UserId,
    pub referrer_id: UserId,
    #[serde(default)]
    pub commission_percentage: Option<Decimal>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StreakSeed {
    #[serde(default = "enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub milestones: Vec<Milestone>,
}

fn enabled() -> bool {
    true
}

fn default_days() -> u32 {
    7
}

#[derive(Debug, Deserialize, Clone)]
pub struct UserSeed {
    pub id: UserId,
    pub name: String,
    #[serde(default)]
    pub autopay: Option<AutopaySettingsUpdate>,
    #[serde(default)]
    pub top_up: Option<Decimal>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OrderSeed {
    pub user_id: UserId,
    pub request: CreateOrderRequest,
    /// Confirms a GATEWAY order as if the gateway had collected day one.
    #[serde(default)]
    pub gateway_reference: Option<String>,
}

/// Money arriving on a given simulation day (1 = start date).
#[derive(Debug, Deserialize, Clone)]
pub struct ScheduledTopUp {
    pub day: u32,
    pub user_id: UserId,
    pub amount: Decimal,
}

/// A self-contained world for `seed` and `simulate`: products, referral
/// links, users with their money, orders, and top-ups spread over the run.
#[derive(Debug, Deserialize, Clone)]
pub struct Scenario {
    pub start_date: NaiveDate,
    #[serde(default = "default_days")]
    pub days: u32,
    #[serde(default)]
    pub products: Vec<Product>,
    #[serde(default)]
    pub referrals: Vec<ReferralLink>,
    #[serde(default)]
    pub streak: Option<StreakSeed>,
    #[serde(default)]
    pub users: Vec<UserSeed>,
    #[serde(default)]
    pub orders: Vec<OrderSeed>,
    #[serde(default)]
    pub top_ups: Vec<ScheduledTopUp>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
pub struct SeedReport {
    pub users: u32,
    pub orders_placed: Vec<Uuid>,
    pub order_failures: Vec<String>,
}

impl Scenario {
    pub fn from_path(path: &Path) -> Result<Self> {
        Self::from_json(&fs::read_to_string(path)?)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let scenario: Scenario = serde_json::from_str(raw)?;
        if scenario.days == 0 {
            return Err(EngineError::ValidationError(
                "scenario days must be at least 1".to_string(),
            ));
        }
        Ok(scenario)
    }

    pub fn catalog(&self) -> StaticCatalog {
        let catalog = self
            .products
            .iter()
            .cloned()
            .fold(StaticCatalog::new(), StaticCatalog::with_product);
        self.referrals.iter().fold(catalog, |catalog, link| {
            catalog.with_referral(
                link.user_id.clone(),
                OrderReferral {
                    referrer_id: link.referrer_id.clone(),
                    commission_percentage: link.commission_percentage,
                },
            )
        })
    }

    /// Creates users, wallets, the streak table and the orders. Existing users
    /// and configuration are left as they are; order failures are reported,
    /// not fatal.
    pub async fn seed(&self, services: &EngineServices) -> Result<SeedReport> {
        let mut report = SeedReport::default();

        if let Some(streak) = &self.streak {
            match services.streaks.get_config().await {
                Ok(_) => info!("Streak configuration already present"),
                Err(EngineError::NotFound(_)) => {
                    services
                        .streaks
                        .create_config(streak.enabled, streak.milestones.clone())
                        .await?;
                }
                Err(e) => return Err(e),
            }
        }

        for seed in &self.users {
            if services.storage.get_user(&seed.id).await?.is_none() {
                services
                    .storage
                    .save_user(User::new(seed.id.clone(), seed.name.clone(), services.clock.now()))
                    .await?;
            }
            if let Some(update) = &seed.autopay {
                services
                    .orders
                    .update_autopay_settings(&seed.id, update.clone())
                    .await?;
            }
            if let Some(amount) = seed.top_up {
                services
                    .wallets
                    .add_money(
                        &seed.id,
                        Amount::new(amount)?,
                        LedgerContext::new(WalletTransactionCategory::TopUp, "Opening balance"),
                    )
                    .await?;
            }
            report.users += 1;
        }

        for seed in &self.orders {
            match self.place(services, seed).await {
                Ok(order_id) => report.orders_placed.push(order_id),
                Err(e) => {
                    warn!(user_id = %seed.user_id, error = %e, "Scenario order rejected");
                    report.order_failures.push(format!("{}: {e}", seed.user_id));
                }
            }
        }
        info!(
            users = report.users,
            orders = report.orders_placed.len(),
            failures = report.order_failures.len(),
            "Scenario seeded"
        );
        Ok(report)
    }

    async fn place(&self, services: &EngineServices, seed: &OrderSeed) -> Result<Uuid> {
        let order = services
            .payments
            .place_order(&seed.user_id, seed.request.clone())
            .await?;
        if order.payment_method == PaymentMethod::Gateway
            && let Some(reference) = &seed.gateway_reference
        {
            services
                .payments
                .confirm_first_payment(
                    order.id,
                    FirstPaymentProof::Gateway {
                        reference: reference.clone(),
                    },
                )
                .await?;
        }
        Ok(order.id)
    }

    /// Plays `days` business days: scheduled top-ups land first, then every
    /// active slot runs in time order, then the clock moves to the next day.
    pub async fn simulate(
        &self,
        services: &EngineServices,
        clock: &FixedClock,
        days: u32,
    ) -> Result<Vec<RunSummary>> {
        let mut slots: Vec<_> = services
            .scheduler
            .slots()
            .iter()
            .filter(|s| s.active)
            .cloned()
            .collect();
        slots.sort_by_key(|s| s.at);

        let mut summaries = Vec::new();
        for day in 1..=days {
            for top_up in self.top_ups.iter().filter(|t| t.day == day) {
                services
                    .wallets
                    .add_money(
                        &top_up.user_id,
                        Amount::new(top_up.amount)?,
                        LedgerContext::new(
                            WalletTransactionCategory::TopUp,
                            format!("Day {day} top-up"),
                        ),
                    )
                    .await?;
            }
            for slot in &slots {
                summaries.push(services.scheduler.trigger_slot(&slot.slot_id).await?);
            }
            clock.advance_days(1);
        }
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO: &str = r#"{
        "start_date": "2026-01-05",
        "products": [{"id": "tv", "name": "TV", "price": "500"}],
        "referrals": [{"user_id": "u1", "referrer_id": "r1", "commission_percentage": "10"}],
        "users": [{"id": "u1", "name": "Asha", "top_up": "300", "autopay": {"enabled": true}}],
        "orders": [{
            "user_id": "u1",
            "request": {
                "product_id": "tv",
                "total_days": 5,
                "payment_method": "WALLET",
                "delivery_address": {
                    "name": "Asha", "phone": "9876543210", "line1": "1 Main St",
                    "city": "Pune", "state": "MH", "pincode": "411001"
                }
            }
        }],
        "top_ups": [{"day": 2, "user_id": "u1", "amount": "100"}]
    }"#;

    #[test]
    fn test_parse_applies_defaults() {
        let scenario = Scenario::from_json(SCENARIO).unwrap();
        assert_eq!(scenario.days, 7);
        assert!(scenario.streak.is_none());
        assert_eq!(scenario.orders[0].request.daily_amount, None);
        assert_eq!(scenario.top_ups[0].day, 2);
    }

    #[tokio::test]
    async fn test_catalog_resolves_products_and_referrals() {
        use crate::domain::ports::{ProductCatalog, ReferralResolver};

        let catalog = Scenario::from_json(SCENARIO).unwrap().catalog();
        assert!(catalog.get_product("tv").await.unwrap().is_some());
        let referral = catalog.resolve("u1").await.unwrap().unwrap();
        assert_eq!(referral.referrer_id, "r1");
    }

    #[test]
    fn test_zero_days_rejected() {
        let raw = r#"{"start_date": "2026-01-05", "days": 0}"#;
        assert!(matches!(Scenario::from_json(raw), Err(EngineError::ValidationError(_))));
    }
}
