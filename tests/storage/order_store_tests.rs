//! OrderStore interface tests.
//!
//! These tests verify the contract of the OrderStore trait.
//! Each storage implementation should run these tests.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use loyalty_accrual::models::Verdict;
use loyalty_accrual::storage::{ApplyOutcome, AttemptOutcome, OrderStore, StorageError};
use loyalty_accrual::{OrderNumber, OrderStatus};

/// Append the Luhn check digit to `prefix`.
pub fn luhn_number(prefix: i64) -> OrderNumber {
    (0..10)
        .find_map(|check| OrderNumber::new(prefix * 10 + check).ok())
        .expect("one check digit always fits")
}

/// Order number no other test uses.
pub fn fresh_number() -> OrderNumber {
    let prefix = (Uuid::new_v4().as_u128() % 100_000_000_000_000) as i64 + 1;
    luhn_number(prefix)
}

pub fn fresh_user() -> String {
    format!("user-{}", Uuid::new_v4())
}

async fn pending_contains<S: OrderStore>(store: &S, number: OrderNumber) -> bool {
    store
        .list_pending(100_000)
        .await
        .expect("list_pending should succeed")
        .iter()
        .any(|o| o.number == number)
}

// =============================================================================
// Submission and lookup
// =============================================================================

pub async fn test_submit_and_get<S: OrderStore>(store: &S) {
    let user = fresh_user();
    let number = fresh_number();

    let order = store
        .submit_order(&user, number)
        .await
        .expect("submit should succeed");
    assert_eq!(order.status, OrderStatus::New);

    let stored = store
        .get_order(number)
        .await
        .expect("get should succeed")
        .expect("order should exist");
    assert_eq!(stored.user_id, user);
    assert_eq!(stored.status, OrderStatus::New);
    assert_eq!(stored.accrual, Decimal::ZERO);
    assert_eq!(stored.attempts, 0);
    assert!(pending_contains(store, number).await);
}

pub async fn test_get_missing_order<S: OrderStore>(store: &S) {
    let found = store.get_order(fresh_number()).await.expect("get should succeed");
    assert!(found.is_none());
}

pub async fn test_submit_duplicate<S: OrderStore>(store: &S) {
    let user = fresh_user();
    let number = fresh_number();
    store.submit_order(&user, number).await.unwrap();

    assert!(matches!(
        store.submit_order(&user, number).await,
        Err(StorageError::AlreadySubmitted(_))
    ));
    assert!(matches!(
        store.submit_order(&fresh_user(), number).await,
        Err(StorageError::OwnedByAnotherUser(_))
    ));
}

pub async fn test_orders_for_user_newest_first<S: OrderStore>(store: &S) {
    let user = fresh_user();
    let first = fresh_number();
    let second = fresh_number();
    store.submit_order(&user, first).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    store.submit_order(&user, second).await.unwrap();
    store.submit_order(&fresh_user(), fresh_number()).await.unwrap();

    let orders = store.orders_for_user(&user).await.unwrap();
    let numbers: Vec<OrderNumber> = orders.iter().map(|o| o.number).collect();
    assert_eq!(numbers, vec![second, first]);
}

// =============================================================================
// Verdicts
// =============================================================================

pub async fn test_apply_processed_credits_once<S: OrderStore>(store: &S) {
    let user = fresh_user();
    let number = fresh_number();
    store.submit_order(&user, number).await.unwrap();

    let verdict = Verdict::processed(number, dec!(500));
    assert_eq!(
        store.apply_verdict(&verdict).await.unwrap(),
        ApplyOutcome::Applied
    );
    assert_eq!(
        store.apply_verdict(&verdict).await.unwrap(),
        ApplyOutcome::AlreadyFinal
    );

    let order = store.get_order(number).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Processed);
    assert_eq!(order.accrual, dec!(500));
    assert_eq!(store.balance(&user).await.unwrap().current, dec!(500));
    assert!(!pending_contains(store, number).await);
}

pub async fn test_concurrent_apply_credits_once<S: OrderStore>(store: &S) {
    let user = fresh_user();
    let number = fresh_number();
    store.submit_order(&user, number).await.unwrap();

    let verdict = Verdict::processed(number, dec!(12.34));
    let (a, b) = tokio::join!(store.apply_verdict(&verdict), store.apply_verdict(&verdict));
    let applied = [a.unwrap(), b.unwrap()]
        .iter()
        .filter(|o| **o == ApplyOutcome::Applied)
        .count();

    assert_eq!(applied, 1);
    assert_eq!(store.balance(&user).await.unwrap().current, dec!(12.34));
}

pub async fn test_apply_invalid_no_credit<S: OrderStore>(store: &S) {
    let user = fresh_user();
    let number = fresh_number();
    store.submit_order(&user, number).await.unwrap();

    store.apply_verdict(&Verdict::invalid(number)).await.unwrap();

    let order = store.get_order(number).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Invalid);
    assert_eq!(store.balance(&user).await.unwrap().current, Decimal::ZERO);
    assert!(!pending_contains(store, number).await);
}

pub async fn test_apply_non_final_stays_pending<S: OrderStore>(store: &S) {
    let user = fresh_user();
    let number = fresh_number();
    store.submit_order(&user, number).await.unwrap();

    store
        .apply_verdict(&Verdict::processing(number))
        .await
        .unwrap();

    let order = store.get_order(number).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Processing);
    assert!(pending_contains(store, number).await);
}

pub async fn test_apply_unknown_order<S: OrderStore>(store: &S) {
    let result = store.apply_verdict(&Verdict::invalid(fresh_number())).await;
    assert!(matches!(result, Err(StorageError::OrderNotFound(_))));
}

pub async fn test_balance_accumulates<S: OrderStore>(store: &S) {
    let user = fresh_user();
    let first = fresh_number();
    let second = fresh_number();
    store.submit_order(&user, first).await.unwrap();
    store.submit_order(&user, second).await.unwrap();

    store
        .apply_verdict(&Verdict::processed(first, dec!(100.25)))
        .await
        .unwrap();
    store
        .apply_verdict(&Verdict::processed(second, dec!(0.75)))
        .await
        .unwrap();

    assert_eq!(store.balance(&user).await.unwrap().current, dec!(101));
    assert_eq!(store.balance(&fresh_user()).await.unwrap().current, Decimal::ZERO);
}

// =============================================================================
// Attempts
// =============================================================================

pub async fn test_record_attempt_dead_letters<S: OrderStore>(store: &S) {
    let number = fresh_number();
    store.submit_order(&fresh_user(), number).await.unwrap();

    assert_eq!(
        store.record_attempt(number, Some(2)).await.unwrap(),
        AttemptOutcome::Counted { attempts: 1 }
    );
    assert_eq!(
        store.record_attempt(number, Some(2)).await.unwrap(),
        AttemptOutcome::DeadLettered { attempts: 2 }
    );
    assert_eq!(
        store.record_attempt(number, Some(2)).await.unwrap(),
        AttemptOutcome::AlreadyFinal
    );

    let order = store.get_order(number).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::DeadLetter);
    assert_eq!(order.attempts, 2);
    assert!(!pending_contains(store, number).await);
}

pub async fn test_record_attempt_unlimited<S: OrderStore>(store: &S) {
    let number = fresh_number();
    store.submit_order(&fresh_user(), number).await.unwrap();

    for expected in 1..=4 {
        assert_eq!(
            store.record_attempt(number, None).await.unwrap(),
            AttemptOutcome::Counted { attempts: expected }
        );
    }
    assert!(pending_contains(store, number).await);
}

pub async fn test_dead_lettered_ignores_verdict<S: OrderStore>(store: &S) {
    let user = fresh_user();
    let number = fresh_number();
    store.submit_order(&user, number).await.unwrap();
    store.record_attempt(number, Some(1)).await.unwrap();

    assert_eq!(
        store
            .apply_verdict(&Verdict::processed(number, dec!(5)))
            .await
            .unwrap(),
        ApplyOutcome::AlreadyFinal
    );
    assert_eq!(store.balance(&user).await.unwrap().current, Decimal::ZERO);
}

// =============================================================================
// Withdrawals
// =============================================================================

pub async fn test_withdraw<S: OrderStore>(store: &S) {
    let user = fresh_user();
    let order = fresh_number();
    store.submit_order(&user, order).await.unwrap();
    store
        .apply_verdict(&Verdict::processed(order, dec!(700)))
        .await
        .unwrap();

    let spent_on = fresh_number();
    let balance = store.withdraw(&user, spent_on, dec!(251.5)).await.unwrap();
    assert_eq!(balance.current, dec!(448.5));
    assert_eq!(balance.withdrawn, dec!(251.5));
    assert_eq!(store.balance(&user).await.unwrap(), balance);

    let history = store.withdrawals_for_user(&user).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].order, spent_on);
    assert_eq!(history[0].sum, dec!(251.5));
}

pub async fn test_withdraw_rejections<S: OrderStore>(store: &S) {
    let user = fresh_user();
    let order = fresh_number();
    store.submit_order(&user, order).await.unwrap();
    store
        .apply_verdict(&Verdict::processed(order, dec!(10)))
        .await
        .unwrap();

    assert!(matches!(
        store.withdraw(&user, fresh_number(), dec!(10.01)).await,
        Err(StorageError::InsufficientFunds { .. })
    ));
    assert!(matches!(
        store.withdraw(&user, fresh_number(), dec!(0)).await,
        Err(StorageError::InvalidAmount(_))
    ));

    let spent_on = fresh_number();
    store.withdraw(&user, spent_on, dec!(4)).await.unwrap();
    assert!(matches!(
        store.withdraw(&user, spent_on, dec!(1)).await,
        Err(StorageError::DuplicateWithdrawal(_))
    ));

    let balance = store.balance(&user).await.unwrap();
    assert_eq!(balance.current, dec!(6));
    assert_eq!(balance.withdrawn, dec!(4));
    assert_eq!(store.withdrawals_for_user(&user).await.unwrap().len(), 1);
}

// =============================================================================
// Test runner macro
// =============================================================================

/// Run all OrderStore interface tests against a store implementation.
#[macro_export]
macro_rules! run_order_store_tests {
    ($store:expr) => {
        use $crate::storage::order_store_tests::*;

        test_submit_and_get($store).await;
        println!("  test_submit_and_get: PASSED");

        test_get_missing_order($store).await;
        println!("  test_get_missing_order: PASSED");

        test_submit_duplicate($store).await;
        println!("  test_submit_duplicate: PASSED");

        test_orders_for_user_newest_first($store).await;
        println!("  test_orders_for_user_newest_first: PASSED");

        test_apply_processed_credits_once($store).await;
        println!("  test_apply_processed_credits_once: PASSED");

        test_concurrent_apply_credits_once($store).await;
        println!("  test_concurrent_apply_credits_once: PASSED");

        test_apply_invalid_no_credit($store).await;
        println!("  test_apply_invalid_no_credit: PASSED");

        test_apply_non_final_stays_pending($store).await;
        println!("  test_apply_non_final_stays_pending: PASSED");

        test_apply_unknown_order($store).await;
        println!("  test_apply_unknown_order: PASSED");

        test_balance_accumulates($store).await;
        println!("  test_balance_accumulates: PASSED");

        test_record_attempt_dead_letters($store).await;
        println!("  test_record_attempt_dead_letters: PASSED");

        test_record_attempt_unlimited($store).await;
        println!("  test_record_attempt_unlimited: PASSED");

        test_dead_lettered_ignores_verdict($store).await;
        println!("  test_dead_lettered_ignores_verdict: PASSED");

        test_withdraw($store).await;
        println!("  test_withdraw: PASSED");

        test_withdraw_rejections($store).await;
        println!("  test_withdraw_rejections: PASSED");
    };
}
