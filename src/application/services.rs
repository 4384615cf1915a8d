use super::insights::InsightsService;
use super::orders::OrderManager;
use super::payments::PaymentEngine;
use super::scheduler::AutopayScheduler;
use super::streaks::StreakService;
use super::wallet::WalletLedger;
use crate::config::EngineConfig;
use crate::domain::ports::{
    ClockRef, NotifierRef, ProductCatalogRef, ReferralResolverRef, StorageRef,
};
use crate::error::Result;
use std::sync::Arc;

/// Every engine service, built once over the same storage and clock.
#[derive(Clone)]
pub struct EngineServices {
    pub storage: StorageRef,
    pub clock: ClockRef,
    pub wallets: Arc<WalletLedger>,
    pub orders: Arc<OrderManager>,
    pub payments: Arc<PaymentEngine>,
    pub streaks: Arc<StreakService>,
    pub insights: Arc<InsightsService>,
    pub scheduler: Arc<AutopayScheduler>,
}

impl EngineServices {
    pub fn new(
        config: &EngineConfig,
        storage: StorageRef,
        catalog: ProductCatalogRef,
        referrals: ReferralResolverRef,
        notifier: NotifierRef,
        clock: ClockRef,
    ) -> Result<Self> {
        config.validate()?;
        let wallets = Arc::new(WalletLedger::new(
            storage.clone(),
            clock.clone(),
            config.commission.withdrawable_percentage,
        ));
        let orders = Arc::new(OrderManager::new(
            storage.clone(),
            catalog,
            referrals,
            clock.clone(),
        ));
        let payments = Arc::new(PaymentEngine::new(
            storage.clone(),
            orders.clone(),
            wallets.clone(),
            clock.clone(),
            config.commission.default_percentage,
        ));
        let streaks = Arc::new(StreakService::new(
            storage.clone(),
            wallets.clone(),
            notifier.clone(),
            clock.clone(),
            orders.user_locks(),
        ));
        let insights = Arc::new(InsightsService::new(
            storage.clone(),
            orders.clone(),
            wallets.clone(),
            streaks.clone(),
            clock.clone(),
            config.forecast.clone(),
            config.history_page_limit,
        ));
        let scheduler = Arc::new(AutopayScheduler::new(
            storage.clone(),
            orders.clone(),
            payments.clone(),
            wallets.clone(),
            streaks.clone(),
            notifier,
            clock.clone(),
            config.offset()?,
            config.slots.clone(),
        ));
        Ok(Self {
            storage,
            clock,
            wallets,
            orders,
            payments,
            streaks,
            insights,
            scheduler,
        })
    }
}
