use dcb_core::testing::InMemoryEventStore;
use dcb_core::{CommandExecutor, Cursor, EventStore, ExecutionResult, ExecutorConfig, ExecutorError, IdempotencyReason};
use wallet_demo::domain::{
    read_balance, Deposit, DepositHandler, Error, OpenWallet, OpenWalletHandler, Transfer, TransferHandler, Withdraw,
    WithdrawHandler,
};

#[tokio::test]
async fn s1_open_and_deposit_yields_the_expected_balance() {
    let store = InMemoryEventStore::new();

    let mut open = CommandExecutor::new(store.clone(), ExecutorConfig::default());
    open.register(OpenWalletHandler).unwrap();
    open.execute(OpenWallet {
        wallet_id: "w1".to_string(),
        owner: "Alice".to_string(),
        initial_balance: 1000,
    })
    .await
    .unwrap();

    let mut deposit = CommandExecutor::new(store.clone(), ExecutorConfig::default());
    deposit.register(DepositHandler).unwrap();
    deposit
        .execute(Deposit {
            deposit_id: "d1".to_string(),
            wallet_id: "w1".to_string(),
            amount: 500,
        })
        .await
        .unwrap();

    let events: Vec<_> = {
        use futures::TryStreamExt;
        store.stream(&dcb_core::Query::all(), Cursor::ZERO).try_collect().await.unwrap()
    };
    assert_eq!(events.len(), 2);

    let balance = read_balance(&store, "w1").await.unwrap();
    assert_eq!(balance.balance, 1500);
}

#[tokio::test]
async fn s2_duplicate_open_is_reported_as_idempotent() {
    let store = InMemoryEventStore::new();
    let mut open = CommandExecutor::new(store.clone(), ExecutorConfig::default());
    open.register(OpenWalletHandler).unwrap();

    let command = || OpenWallet {
        wallet_id: "w1".to_string(),
        owner: "Alice".to_string(),
        initial_balance: 1000,
    };

    let first = open.execute(command()).await.unwrap();
    assert_eq!(first, ExecutionResult::Created { event_count: 1 });

    let second = open.execute(command()).await.unwrap();
    assert_eq!(second, ExecutionResult::Idempotent(IdempotencyReason::DuplicateOperation));

    let events: Vec<_> = {
        use futures::TryStreamExt;
        store.stream(&dcb_core::Query::all(), Cursor::ZERO).try_collect().await.unwrap()
    };
    assert_eq!(events.len(), 1);
}

#[tokio::test]
async fn s3_only_one_of_two_concurrent_withdrawals_commits() {
    let store = InMemoryEventStore::new();
    let mut open = CommandExecutor::new(store.clone(), ExecutorConfig::default());
    open.register(OpenWalletHandler).unwrap();
    open.execute(OpenWallet {
        wallet_id: "w1".to_string(),
        owner: "Alice".to_string(),
        initial_balance: 100,
    })
    .await
    .unwrap();

    let mut first = CommandExecutor::new(store.clone(), ExecutorConfig::default());
    first.register(WithdrawHandler).unwrap();
    let mut second = CommandExecutor::new(store.clone(), ExecutorConfig::default());
    second.register(WithdrawHandler).unwrap();

    let a = first.execute(Withdraw {
        withdrawal_id: "a".to_string(),
        wallet_id: "w1".to_string(),
        amount: 80,
    });
    let b = second.execute(Withdraw {
        withdrawal_id: "b".to_string(),
        wallet_id: "w1".to_string(),
        amount: 80,
    });
    let (a, b) = tokio::join!(a, b);

    let outcomes = [a, b];
    let commits = outcomes.iter().filter(|r| matches!(r, Ok(ExecutionResult::Created { .. }))).count();
    let conflicts = outcomes
        .iter()
        .filter(|r| matches!(r, Err(ExecutorError::ConcurrencyConflict { .. })))
        .count();
    assert_eq!(commits, 1);
    assert_eq!(conflicts, 1);

    let balance = read_balance(&store, "w1").await.unwrap();
    assert_eq!(balance.balance, 20);
}

#[tokio::test]
async fn s4_transfer_conserves_total_balance() {
    let store = InMemoryEventStore::new();
    let mut open = CommandExecutor::new(store.clone(), ExecutorConfig::default());
    open.register(OpenWalletHandler).unwrap();
    open.execute(OpenWallet {
        wallet_id: "w1".to_string(),
        owner: "Alice".to_string(),
        initial_balance: 1000,
    })
    .await
    .unwrap();
    open.execute(OpenWallet {
        wallet_id: "w2".to_string(),
        owner: "Bob".to_string(),
        initial_balance: 500,
    })
    .await
    .unwrap();

    let mut transfer = CommandExecutor::new(store.clone(), ExecutorConfig::default());
    transfer.register(TransferHandler).unwrap();
    transfer
        .execute(Transfer {
            transfer_id: "tr1".to_string(),
            from_wallet: "w1".to_string(),
            to_wallet: "w2".to_string(),
            amount: 300,
        })
        .await
        .unwrap();

    let w1 = read_balance(&store, "w1").await.unwrap();
    let w2 = read_balance(&store, "w2").await.unwrap();
    assert_eq!(w1.balance, 700);
    assert_eq!(w2.balance, 800);
    assert_eq!(w1.balance + w2.balance, 1500);
}

#[tokio::test]
async fn withdraw_rejects_a_wallet_that_does_not_exist() {
    let store = InMemoryEventStore::new();
    let mut withdraw = CommandExecutor::new(store.clone(), ExecutorConfig::default());
    withdraw.register(WithdrawHandler).unwrap();

    let err = withdraw
        .execute(Withdraw {
            withdrawal_id: "a".to_string(),
            wallet_id: "ghost".to_string(),
            amount: 10,
        })
        .await
        .unwrap_err();

    match err {
        ExecutorError::Domain(domain_err) => {
            assert_eq!(domain_err.downcast_ref::<Error>(), Some(&Error::WalletNotFound));
        }
        other => panic!("expected a domain error, got {other:?}"),
    }
}
