//! Wallet events, commands and handlers: the wallet scenarios built on the
//! tag-based event store rather than a domain-identifier schema.
use async_trait::async_trait;
use dcb_core::{
    tag_query, AppendCondition, Command, CommandHandler, CommandResult, Cursor, DomainError,
    Event, EventStore, EventStoreTransaction, PersistedEvent, Query, Tag,
};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[allow(clippy::enum_variant_names)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, dcb_core::Event)]
pub enum WalletEvent {
    WalletOpened {
        #[tag]
        wallet_id: String,
        owner: String,
        initial_balance: i64,
    },
    Deposited {
        #[tag]
        wallet_id: String,
        deposit_id: String,
        amount: i64,
    },
    Withdrawn {
        #[tag]
        wallet_id: String,
        withdrawal_id: String,
        amount: i64,
    },
    MoneyTransferred {
        #[tag]
        from_wallet: String,
        #[tag]
        to_wallet: String,
        transfer_id: String,
        amount: i64,
        from_balance: i64,
        to_balance: i64,
    },
}

fn decode(event: &PersistedEvent) -> Result<WalletEvent, serde_json::Error> {
    serde_json::from_slice(&event.payload)
}

/// Every event that can change `wallet_id`'s balance: its own
/// `WalletOpened`/`Deposited`/`Withdrawn` events (tagged `wallet_id`) plus
/// any `MoneyTransferred` naming it as either side (tagged `from_wallet`/
/// `to_wallet` instead, since a transfer touches two wallets at once).
fn wallet_query(wallet_id: &str) -> Query {
    Query::new([
        tag_query(Tag::new("wallet_id", wallet_id).expect("wallet id is never empty")).with_types([
            "WalletOpened",
            "Deposited",
            "Withdrawn",
        ]),
        tag_query(Tag::new("from_wallet", wallet_id).expect("wallet id is never empty")).with_types(["MoneyTransferred"]),
        tag_query(Tag::new("to_wallet", wallet_id).expect("wallet id is never empty")).with_types(["MoneyTransferred"]),
    ])
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("invalid amount")]
    InvalidAmount,
    #[error("insufficient balance")]
    InsufficientBalance,
    #[error("wallet not found")]
    WalletNotFound,
}

/// The balance a single wallet has accumulated, as read from its own tagged
/// events plus the `MoneyTransferred` events naming it on either side.
#[derive(Debug, Default, Clone, Serialize)]
pub struct WalletState {
    pub opened: bool,
    pub balance: i64,
}

impl WalletState {
    fn apply(&mut self, wallet_id: &str, event: &WalletEvent) {
        match event {
            WalletEvent::WalletOpened { initial_balance, .. } => {
                self.opened = true;
                self.balance = *initial_balance;
            }
            WalletEvent::Deposited { amount, .. } => self.balance += amount,
            WalletEvent::Withdrawn { amount, .. } => self.balance -= amount,
            WalletEvent::MoneyTransferred {
                from_wallet,
                from_balance,
                to_balance,
                ..
            } => {
                self.balance = if from_wallet == wallet_id { *from_balance } else { *to_balance };
            }
        }
    }
}

/// Reads every event tagged with `wallet_id`, folds it into a `WalletState`,
/// and returns the cursor it was read up to — the boundary a handler's
/// append condition must be checked against.
async fn project_wallet<Tx>(tx: &Tx, wallet_id: &str) -> Result<(WalletState, Cursor), Tx::Error>
where
    Tx: EventStoreTransaction,
{
    let query = wallet_query(wallet_id);
    let mut stream = tx.stream(&query, Cursor::ZERO);
    let mut state = WalletState::default();
    let mut cursor = Cursor::ZERO;
    while let Some(persisted) = stream.try_next().await? {
        cursor = persisted.position;
        if let Ok(event) = decode(&persisted) {
            state.apply(wallet_id, &event);
        }
    }
    Ok((state, cursor))
}

pub struct OpenWallet {
    pub wallet_id: String,
    pub owner: String,
    pub initial_balance: i64,
}

impl Command for OpenWallet {
    fn command_type(&self) -> &'static str {
        "open_wallet"
    }

    fn payload(&self) -> Vec<u8> {
        serde_json::to_vec(&(&self.wallet_id, &self.owner, self.initial_balance))
            .expect("json serialization should not fail")
    }
}

pub struct OpenWalletHandler;

#[async_trait]
impl<ES: EventStore> CommandHandler<OpenWallet, ES> for OpenWalletHandler {
    fn command_type(&self) -> &'static str {
        "open_wallet"
    }

    fn propagate_on_duplicate(&self) -> bool {
        true
    }

    async fn handle(&self, _store: &ES::Transaction, command: &OpenWallet) -> Result<CommandResult, DomainError> {
        if command.initial_balance < 0 {
            return Err(Box::new(Error::InvalidAmount));
        }

        let wallet_tag = Tag::new("wallet_id", &command.wallet_id).expect("wallet id is never empty");
        let event = WalletEvent::WalletOpened {
            wallet_id: command.wallet_id.clone(),
            owner: command.owner.clone(),
            initial_balance: command.initial_balance,
        };
        let idempotency = Query::new([tag_query(wallet_tag).with_types(["WalletOpened"])]);
        Ok(CommandResult::created(
            vec![event.to_new_event(serde_json::to_vec(&event).expect("json serialization should not fail"))],
            AppendCondition::idempotency(idempotency),
        ))
    }
}

pub struct Deposit {
    pub deposit_id: String,
    pub wallet_id: String,
    pub amount: i64,
}

impl Command for Deposit {
    fn command_type(&self) -> &'static str {
        "deposit"
    }

    fn payload(&self) -> Vec<u8> {
        serde_json::to_vec(&(&self.deposit_id, &self.wallet_id, self.amount)).expect("json serialization should not fail")
    }
}

pub struct DepositHandler;

#[async_trait]
impl<ES: EventStore> CommandHandler<Deposit, ES> for DepositHandler {
    fn command_type(&self) -> &'static str {
        "deposit"
    }

    async fn handle(&self, store: &ES::Transaction, command: &Deposit) -> Result<CommandResult, DomainError> {
        if command.amount <= 0 {
            return Err(Box::new(Error::InvalidAmount));
        }

        let (state, _cursor) = project_wallet(store, &command.wallet_id).await.map_err(|e| Box::new(e) as DomainError)?;
        if !state.opened {
            return Err(Box::new(Error::WalletNotFound));
        }

        let event = WalletEvent::Deposited {
            wallet_id: command.wallet_id.clone(),
            deposit_id: command.deposit_id.clone(),
            amount: command.amount,
        };
        // Deposits commute and never violate a balance invariant, so this
        // handler reads current state for validation only and appends
        // without a consistency boundary.
        Ok(CommandResult::created(
            vec![event.to_new_event(serde_json::to_vec(&event).expect("json serialization should not fail"))],
            AppendCondition::none(),
        ))
    }
}

pub struct Withdraw {
    pub withdrawal_id: String,
    pub wallet_id: String,
    pub amount: i64,
}

impl Command for Withdraw {
    fn command_type(&self) -> &'static str {
        "withdraw"
    }

    fn payload(&self) -> Vec<u8> {
        serde_json::to_vec(&(&self.withdrawal_id, &self.wallet_id, self.amount)).expect("json serialization should not fail")
    }
}

pub struct WithdrawHandler;

#[async_trait]
impl<ES: EventStore> CommandHandler<Withdraw, ES> for WithdrawHandler {
    fn command_type(&self) -> &'static str {
        "withdraw"
    }

    async fn handle(&self, store: &ES::Transaction, command: &Withdraw) -> Result<CommandResult, DomainError> {
        if command.amount <= 0 {
            return Err(Box::new(Error::InvalidAmount));
        }

        let (state, cursor) = project_wallet(store, &command.wallet_id).await.map_err(|e| Box::new(e) as DomainError)?;
        if !state.opened {
            return Err(Box::new(Error::WalletNotFound));
        }
        if state.balance < command.amount {
            return Err(Box::new(Error::InsufficientBalance));
        }

        let event = WalletEvent::Withdrawn {
            wallet_id: command.wallet_id.clone(),
            withdrawal_id: command.withdrawal_id.clone(),
            amount: command.amount,
        };
        Ok(CommandResult::created(
            vec![event.to_new_event(serde_json::to_vec(&event).expect("json serialization should not fail"))],
            AppendCondition::cursor(wallet_query(&command.wallet_id), cursor),
        ))
    }
}

pub struct Transfer {
    pub transfer_id: String,
    pub from_wallet: String,
    pub to_wallet: String,
    pub amount: i64,
}

impl Command for Transfer {
    fn command_type(&self) -> &'static str {
        "transfer"
    }

    fn payload(&self) -> Vec<u8> {
        serde_json::to_vec(&(&self.transfer_id, &self.from_wallet, &self.to_wallet, self.amount))
            .expect("json serialization should not fail")
    }
}

pub struct TransferHandler;

#[async_trait]
impl<ES: EventStore> CommandHandler<Transfer, ES> for TransferHandler {
    fn command_type(&self) -> &'static str {
        "transfer"
    }

    async fn handle(&self, store: &ES::Transaction, command: &Transfer) -> Result<CommandResult, DomainError> {
        if command.amount <= 0 {
            return Err(Box::new(Error::InvalidAmount));
        }

        let (from_state, from_cursor) =
            project_wallet(store, &command.from_wallet).await.map_err(|e| Box::new(e) as DomainError)?;
        let (to_state, to_cursor) =
            project_wallet(store, &command.to_wallet).await.map_err(|e| Box::new(e) as DomainError)?;

        if !from_state.opened || !to_state.opened {
            return Err(Box::new(Error::WalletNotFound));
        }
        if from_state.balance < command.amount {
            return Err(Box::new(Error::InsufficientBalance));
        }

        let from_balance = from_state.balance - command.amount;
        let to_balance = to_state.balance + command.amount;

        let event = WalletEvent::MoneyTransferred {
            from_wallet: command.from_wallet.clone(),
            to_wallet: command.to_wallet.clone(),
            transfer_id: command.transfer_id.clone(),
            amount: command.amount,
            from_balance,
            to_balance,
        };

        let boundary = wallet_query(&command.from_wallet).or(wallet_query(&command.to_wallet));
        // The cursor check rejects anything after `cursor`, so it must be the
        // *lower* of the two reads: using the higher one would hide a write on
        // the other wallet that landed between the two reads.
        let cursor = from_cursor.min(to_cursor);

        Ok(CommandResult::created(
            vec![event.to_new_event(serde_json::to_vec(&event).expect("json serialization should not fail"))],
            AppendCondition::cursor(boundary, cursor),
        ))
    }
}

/// Reads a wallet's current balance directly from the store, outside any
/// command's transaction — used by read-side callers (the demo binary,
/// status queries) rather than by handlers themselves.
pub async fn read_balance<ES: EventStore>(store: &ES, wallet_id: &str) -> Result<WalletState, ES::Error> {
    let query = wallet_query(wallet_id);
    let mut stream = store.stream(&query, Cursor::ZERO);
    let mut state = WalletState::default();
    while let Some(persisted) = stream.try_next().await? {
        if let Ok(event) = decode(&persisted) {
            state.apply(wallet_id, &event);
        }
    }
    Ok(state)
}
