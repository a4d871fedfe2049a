mod common;

use anyhow::Result;
use common::{Scenario, parse_date, parse_datetime, stored_balance, test_store};
use shadow_ledger::{CancellationToken, LedgerError, NewOperation, OperationChanges};

#[tokio::test]
async fn test_create_operations_keep_balance_in_sync() -> Result<()> {
    let (store, _temp) = test_store().await?;
    let cancel = CancellationToken::new();

    let scenario = Scenario::create(&store).await?;

    assert_eq!(store.get_account_balance(scenario.account_id, &cancel).await?, 7000);
    assert_eq!(stored_balance(&store, scenario.account_id).await?, 7000);
    assert!(store.find_balance_drift(&cancel).await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_balance_is_zero_without_operations() -> Result<()> {
    let (store, _temp) = test_store().await?;
    let cancel = CancellationToken::new();

    let account_id = Scenario::open_account(&store).await?;
    assert_eq!(store.get_account_balance(account_id, &cancel).await?, 0);

    // Unknown accounts have no operations either
    assert_eq!(store.get_account_balance(account_id + 100, &cancel).await?, 0);

    Ok(())
}

#[tokio::test]
async fn test_list_operations_since_day() -> Result<()> {
    let (store, _temp) = test_store().await?;
    let cancel = CancellationToken::new();

    let scenario = Scenario::create(&store).await?;

    let ops = store
        .list_operations(scenario.account_id, parse_date("2024-01-02"), &cancel)
        .await?;
    assert_eq!(ops.len(), 2);
    assert_eq!(ops[0].id, scenario.credit_id);
    assert_eq!(ops[0].amount, 10000);
    assert_eq!(ops[0].moment, parse_date("2024-01-02"));
    assert_eq!(ops[1].id, scenario.debit_id);
    assert_eq!(ops[1].amount, -3000);
    assert_eq!(ops[1].comment.as_deref(), Some("groceries"));

    let later = store
        .list_operations(scenario.account_id, parse_date("2024-01-03"), &cancel)
        .await?;
    assert_eq!(later.len(), 1);
    assert_eq!(later[0].id, scenario.debit_id);

    let none = store
        .list_operations(scenario.account_id, parse_date("2024-01-04"), &cancel)
        .await?;
    assert!(none.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_list_operations_ignores_time_of_day() -> Result<()> {
    let (store, _temp) = test_store().await?;
    let cancel = CancellationToken::new();

    let account_id = Scenario::open_account(&store).await?;
    let early = store
        .create_operation(
            NewOperation::new(account_id, 500, parse_datetime("2024-03-05", 0, 0, 1)),
            &cancel,
        )
        .await?;
    let late = store
        .create_operation(
            NewOperation::new(account_id, 700, parse_datetime("2024-03-05", 23, 59, 59)),
            &cancel,
        )
        .await?;
    store
        .create_operation(
            NewOperation::new(account_id, 900, parse_datetime("2024-03-04", 23, 59, 59)),
            &cancel,
        )
        .await?;

    // `since` late in the day still includes everything on that day
    let ops = store
        .list_operations(account_id, parse_datetime("2024-03-05", 18, 0, 0), &cancel)
        .await?;
    let ids: Vec<_> = ops.iter().map(|op| op.id).collect();
    assert_eq!(ids, vec![early, late]);

    Ok(())
}

#[tokio::test]
async fn test_list_operations_orders_by_moment_then_id() -> Result<()> {
    let (store, _temp) = test_store().await?;
    let cancel = CancellationToken::new();

    let account_id = Scenario::open_account(&store).await?;
    let third = store
        .create_operation(NewOperation::new(account_id, 3, parse_date("2024-02-03")), &cancel)
        .await?;
    let first = store
        .create_operation(NewOperation::new(account_id, 1, parse_date("2024-02-01")), &cancel)
        .await?;
    let second_a = store
        .create_operation(NewOperation::new(account_id, 2, parse_date("2024-02-02")), &cancel)
        .await?;
    let second_b = store
        .create_operation(NewOperation::new(account_id, 2, parse_date("2024-02-02")), &cancel)
        .await?;

    let ops = store
        .list_operations(account_id, parse_date("2024-01-01"), &cancel)
        .await?;
    let ids: Vec<_> = ops.iter().map(|op| op.id).collect();
    assert_eq!(ids, vec![first, second_a, second_b, third]);

    Ok(())
}

#[tokio::test]
async fn test_list_operations_only_returns_the_account() -> Result<()> {
    let (store, _temp) = test_store().await?;
    let cancel = CancellationToken::new();

    let scenario = Scenario::create(&store).await?;
    let other = Scenario::create(&store).await?;

    let ops = store
        .list_operations(scenario.account_id, parse_date("2024-01-01"), &cancel)
        .await?;
    assert_eq!(ops.len(), 2);
    assert!(ops.iter().all(|op| op.account_id == scenario.account_id));
    assert_eq!(stored_balance(&store, other.account_id).await?, 7000);

    Ok(())
}

#[tokio::test]
async fn test_update_operation_recomputes_balance() -> Result<()> {
    let (store, _temp) = test_store().await?;
    let cancel = CancellationToken::new();

    let scenario = Scenario::create(&store).await?;
    let debit = store
        .get_operation(scenario.debit_id, &cancel)
        .await?
        .expect("debit exists");

    let changes = OperationChanges::from(&debit).with_amount(-5000);
    store
        .update_operation(scenario.account_id, scenario.debit_id, changes, &cancel)
        .await?;

    assert_eq!(store.get_account_balance(scenario.account_id, &cancel).await?, 5000);
    assert_eq!(stored_balance(&store, scenario.account_id).await?, 5000);

    let updated = store.get_operation(scenario.debit_id, &cancel).await?.unwrap();
    assert_eq!(updated.amount, -5000);
    assert_eq!(updated.comment.as_deref(), Some("groceries"));

    Ok(())
}

#[tokio::test]
async fn test_update_operation_rewrites_all_fields() -> Result<()> {
    let (store, _temp) = test_store().await?;
    let cancel = CancellationToken::new();

    let scenario = Scenario::create(&store).await?;
    let changes = OperationChanges {
        operation_type_id: 4,
        amount: -1234,
        category_id: 9,
        comment: None,
        moment: parse_datetime("2024-01-05", 12, 30, 0),
    };
    store
        .update_operation(scenario.account_id, scenario.debit_id, changes, &cancel)
        .await?;

    let updated = store.get_operation(scenario.debit_id, &cancel).await?.unwrap();
    assert_eq!(updated.operation_type_id, 4);
    assert_eq!(updated.category_id, 9);
    assert_eq!(updated.amount, -1234);
    assert_eq!(updated.comment, None);
    assert_eq!(updated.moment, parse_datetime("2024-01-05", 12, 30, 0));
    assert_eq!(stored_balance(&store, scenario.account_id).await?, 10000 - 1234);

    Ok(())
}

#[tokio::test]
async fn test_update_missing_operation_is_not_found() -> Result<()> {
    let (store, _temp) = test_store().await?;
    let cancel = CancellationToken::new();

    let scenario = Scenario::create(&store).await?;
    let debit = store.get_operation(scenario.debit_id, &cancel).await?.unwrap();

    let result = store
        .update_operation(
            scenario.account_id,
            9999,
            OperationChanges::from(&debit),
            &cancel,
        )
        .await;
    assert!(matches!(result, Err(LedgerError::OperationNotFound(9999))));

    Ok(())
}

#[tokio::test]
async fn test_update_operation_of_another_account_changes_nothing() -> Result<()> {
    let (store, _temp) = test_store().await?;
    let cancel = CancellationToken::new();

    let scenario = Scenario::create(&store).await?;
    let other = Scenario::create(&store).await?;
    let debit = store.get_operation(scenario.debit_id, &cancel).await?.unwrap();

    let result = store
        .update_operation(
            other.account_id,
            scenario.debit_id,
            OperationChanges::from(&debit).with_amount(-9000),
            &cancel,
        )
        .await;
    assert!(matches!(result, Err(LedgerError::OperationNotFound(_))));

    let unchanged = store.get_operation(scenario.debit_id, &cancel).await?.unwrap();
    assert_eq!(unchanged.amount, -3000);
    assert_eq!(stored_balance(&store, scenario.account_id).await?, 7000);
    assert_eq!(stored_balance(&store, other.account_id).await?, 7000);

    Ok(())
}

#[tokio::test]
async fn test_delete_operation_recomputes_balance() -> Result<()> {
    let (store, _temp) = test_store().await?;
    let cancel = CancellationToken::new();

    let scenario = Scenario::create(&store).await?;

    assert!(store.delete_operation(scenario.credit_id, &cancel).await?);
    assert_eq!(stored_balance(&store, scenario.account_id).await?, -3000);
    assert!(store.get_operation(scenario.credit_id, &cancel).await?.is_none());

    assert!(store.delete_operation(scenario.debit_id, &cancel).await?);
    assert_eq!(stored_balance(&store, scenario.account_id).await?, 0);

    Ok(())
}

#[tokio::test]
async fn test_delete_operation_twice_is_a_no_op() -> Result<()> {
    let (store, _temp) = test_store().await?;
    let cancel = CancellationToken::new();

    let scenario = Scenario::create(&store).await?;

    assert!(store.delete_operation(scenario.debit_id, &cancel).await?);
    let after_first = store
        .list_operations(scenario.account_id, parse_date("2024-01-01"), &cancel)
        .await?;

    assert!(!store.delete_operation(scenario.debit_id, &cancel).await?);
    let after_second = store
        .list_operations(scenario.account_id, parse_date("2024-01-01"), &cancel)
        .await?;

    assert_eq!(after_first, after_second);
    assert_eq!(stored_balance(&store, scenario.account_id).await?, 10000);

    Ok(())
}

#[tokio::test]
async fn test_create_operation_for_missing_account_fails() -> Result<()> {
    let (store, _temp) = test_store().await?;
    let cancel = CancellationToken::new();

    let result = store
        .create_operation(NewOperation::new(42, 100, parse_date("2024-01-02")), &cancel)
        .await;
    assert!(matches!(result, Err(LedgerError::AccountNotFound(42))));
    assert!(store.get_operation(1, &cancel).await?.is_none());

    Ok(())
}

#[tokio::test]
async fn test_mixed_mutations_preserve_invariant() -> Result<()> {
    let (store, _temp) = test_store().await?;
    let cancel = CancellationToken::new();

    let account_id = common::Scenario::open_account(&store).await?;
    let mut expected = Vec::new();

    for (day, amount) in [(2, 2500), (3, -700), (4, 10000), (5, -4321), (6, 1)] {
        let date = parse_date(&format!("2024-04-{day:02}"));
        let id = store
            .create_operation(NewOperation::new(account_id, amount, date), &cancel)
            .await?;
        expected.push((id, amount));
    }

    // Double the third, drop the second
    let (third_id, third_amount) = expected[2];
    let third = store.get_operation(third_id, &cancel).await?.unwrap();
    store
        .update_operation(
            account_id,
            third_id,
            OperationChanges::from(&third).with_amount(third_amount * 2),
            &cancel,
        )
        .await?;
    expected[2].1 = third_amount * 2;

    let (second_id, _) = expected.remove(1);
    store.delete_operation(second_id, &cancel).await?;

    let sum: i64 = expected.iter().map(|(_, amount)| amount).sum();
    assert_eq!(store.get_account_balance(account_id, &cancel).await?, sum);
    assert_eq!(stored_balance(&store, account_id).await?, sum);
    assert!(store.find_balance_drift(&cancel).await?.is_empty());

    Ok(())
}
