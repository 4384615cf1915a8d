mod common;

use autopay_engine::domain::order::{
    AutopayConfig, InstallmentOrder, NewOrder, OrderStatus, PaymentMethod, ScheduleStatus,
};
use autopay_engine::error::EngineError;
use chrono::{Days, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use uuid::Uuid;

fn random_order(rng: &mut StdRng) -> InstallmentOrder {
    let price = Decimal::new(rng.gen_range(25_000..500_000), 2);
    let max_days = (price / Decimal::from(50)).floor().to_u32().unwrap();
    let total_days = rng.gen_range(5..=max_days.min(60));
    InstallmentOrder::new(
        NewOrder {
            user_id: "u1".to_string(),
            product_id: "p".to_string(),
            product_name: "Product".to_string(),
            variant_id: None,
            price,
            total_days,
            daily_amount: None,
            payment_method: PaymentMethod::Wallet,
            delivery_address: common::address(),
            coupon_code: None,
            referral: None,
            product_commission_percentage: None,
            autopay: AutopayConfig::default(),
        },
        common::start_date(),
        Utc::now(),
    )
    .unwrap()
}

#[test]
fn test_schedule_always_sums_to_price() {
    let mut rng = StdRng::seed_from_u64(42);
    for _ in 0..500 {
        let order = random_order(&mut rng);
        let total: Decimal = order.payment_schedule.iter().map(|i| i.amount).sum();
        assert_eq!(total, order.product_price, "order {:?}", order.id);
        assert_eq!(order.payment_schedule.len() as u32, order.total_days);

        let (last, rest) = order.payment_schedule.split_last().unwrap();
        assert!(rest.iter().all(|i| i.amount == order.daily_payment_amount));
        assert!(last.amount > Decimal::ZERO);
        assert!(last.amount <= order.daily_payment_amount);
        assert!(order.daily_payment_amount.scale() <= 2);

        for (n, item) in order.payment_schedule.iter().enumerate() {
            assert_eq!(item.installment_number, n as u32 + 1);
            assert_eq!(
                item.due_date,
                common::start_date().checked_add_days(Days::new(n as u64)).unwrap()
            );
        }
    }
}

#[test]
fn test_remaining_tracks_paid_installments() {
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..100 {
        let mut order = random_order(&mut rng);
        order.activate(Utc::now()).unwrap();

        let mut paid = Decimal::ZERO;
        for n in 1..=order.total_days {
            let day = common::start_date()
                .checked_add_days(Days::new(u64::from(n - 1)))
                .unwrap();
            paid += order.record_installment(n, Uuid::new_v4(), day, Utc::now()).unwrap();

            assert_eq!(order.paid_installments, n);
            assert_eq!(order.total_paid_amount, paid);
            assert_eq!(order.remaining_amount, order.product_price - paid);
            assert!(order.paid_on(day));
            let expected = if n == order.total_days {
                OrderStatus::Completed
            } else {
                OrderStatus::Active
            };
            assert_eq!(order.status, expected);
        }

        assert!(order.remaining_amount.is_zero());
        assert!(order.completed_at.is_some());
        assert!(order.payment_schedule.iter().all(|i| i.status == ScheduleStatus::Paid));
        assert!(!order.can_accept_payment());
    }
}

#[test]
fn test_an_installment_is_paid_once() {
    let mut rng = StdRng::seed_from_u64(3);
    let mut order = random_order(&mut rng);
    order.activate(Utc::now()).unwrap();
    order
        .record_installment(1, Uuid::new_v4(), common::start_date(), Utc::now())
        .unwrap();
    let before = order.clone();

    let err = order
        .record_installment(1, Uuid::new_v4(), common::start_date(), Utc::now())
        .unwrap_err();
    assert!(matches!(err, EngineError::DuplicatePayment { installment: 1, .. }));
    assert_eq!(order, before);
}

#[test]
fn test_cancel_voids_pending_items_only() {
    let mut rng = StdRng::seed_from_u64(11);
    let mut order = random_order(&mut rng);
    order.activate(Utc::now()).unwrap();
    order
        .record_installment(1, Uuid::new_v4(), common::start_date(), Utc::now())
        .unwrap();
    order.cancel("changed my mind", Utc::now()).unwrap();

    assert_eq!(order.status, OrderStatus::Cancelled);
    assert_eq!(order.payment_schedule[0].status, ScheduleStatus::Paid);
    assert!(order.payment_schedule[1..].iter().all(|i| i.status == ScheduleStatus::Skipped));
    assert!(matches!(
        order.cancel("again", Utc::now()),
        Err(EngineError::InvalidOrderState { .. })
    ));
}
