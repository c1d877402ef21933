use std::env;
use std::sync::Arc;
use std::time::Duration;

use dcb_core::{ClockProvider, CommandExecutor, ExecutorConfig, PeriodType, ProcessorConfig, ProcessorRuntime, SystemClock};
use dcb_postgres::{Migrator, PgEventStore, PgLeaderElector, PgProgressStore};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

use wallet_demo::domain::{self, Deposit, DepositHandler, OpenWallet, OpenWalletHandler, Transfer, TransferHandler, Withdraw, WithdrawHandler};
use wallet_demo::statement::{statement_fetcher, StatementProjector};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();
    dotenvy::dotenv().ok();

    let database_url = env::var("DATABASE_URL").unwrap_or_else(|_| "postgres://localhost/wallet_demo".to_string());
    let pool = PgPoolOptions::new().max_connections(10).connect(&database_url).await?;

    Migrator::new(&pool).run().await?;

    let event_store = PgEventStore::new(pool.clone());

    let mut open_executor = CommandExecutor::new(event_store.clone(), ExecutorConfig::default());
    open_executor.register(OpenWalletHandler)?;
    let mut deposit_executor = CommandExecutor::new(event_store.clone(), ExecutorConfig::default());
    deposit_executor.register(DepositHandler)?;
    let mut withdraw_executor = CommandExecutor::new(event_store.clone(), ExecutorConfig::default());
    withdraw_executor.register(WithdrawHandler)?;
    let mut transfer_executor = CommandExecutor::new(event_store.clone(), ExecutorConfig::default());
    transfer_executor.register(TransferHandler)?;

    let progress_store = PgProgressStore::new(pool.clone());
    let leader = PgLeaderElector::new(pool.clone());
    let clock: Arc<dyn ClockProvider> = Arc::new(SystemClock);
    let runtime = ProcessorRuntime::new(progress_store, leader, "wallet-demo-instance", clock);

    runtime
        .register(
            ProcessorConfig::new("wallet-statements", Duration::from_secs(1), 100),
            statement_fetcher(event_store.clone()),
            StatementProjector::new(event_store.clone(), PeriodType::Monthly),
        )
        .await;

    let result = open_executor
        .execute(OpenWallet {
            wallet_id: "w1".to_string(),
            owner: "Alice".to_string(),
            initial_balance: 1000,
        })
        .await?;
    tracing::info!(?result, "opened wallet w1");

    deposit_executor
        .execute(Deposit {
            deposit_id: "d1".to_string(),
            wallet_id: "w1".to_string(),
            amount: 500,
        })
        .await?;

    withdraw_executor
        .execute(Withdraw {
            withdrawal_id: "wd1".to_string(),
            wallet_id: "w1".to_string(),
            amount: 200,
        })
        .await?;

    open_executor
        .execute(OpenWallet {
            wallet_id: "w2".to_string(),
            owner: "Bob".to_string(),
            initial_balance: 100,
        })
        .await?;

    transfer_executor
        .execute(Transfer {
            transfer_id: "tr1".to_string(),
            from_wallet: "w1".to_string(),
            to_wallet: "w2".to_string(),
            amount: 300,
        })
        .await?;

    let balance = domain::read_balance(&event_store, "w1").await?;
    tracing::info!(balance = balance.balance, "w1 balance after scenario");

    tokio::signal::ctrl_c().await?;
    runtime.stop().await;
    Ok(())
}
