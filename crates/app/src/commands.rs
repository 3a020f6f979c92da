//! Command line definition and dispatch.

use std::error::Error;

use clap::{Args, Parser, Subcommand};
use engine::{
    CancelToken, Currency, Engine, LedgerStore, OpenAccount, Page, TransferRequest,
    store::DEFAULT_PAGE_LIMIT,
};
use serde_json::Value;

#[derive(Parser, Debug)]
#[command(name = "simplebank")]
#[command(about = "Accounts and money transfers on a double-entry ledger")]
pub struct Cli {
    /// Settings file (defaults to an optional `settings.toml`).
    #[arg(long)]
    pub config: Option<String>,

    /// Database connection string (also read from `DATABASE_URL`); overrides
    /// the configured database.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Account(Account),
    /// Move money between two accounts of the same currency.
    Transfer(TransferArgs),
    /// Transfers sent by `--from` or received by `--to`.
    Transfers(TransfersArgs),
    /// Ledger entries of one account.
    Entries(EntriesArgs),
}

#[derive(Args, Debug)]
pub struct Account {
    #[command(subcommand)]
    pub command: AccountCommand,
}

#[derive(Subcommand, Debug)]
pub enum AccountCommand {
    Open(OpenArgs),
    Get { id: i64 },
    List(ListArgs),
    Delete { id: i64 },
    /// Compare the balance with the sum of the account's entries.
    Verify { id: i64 },
}

#[derive(Args, Debug)]
pub struct OpenArgs {
    #[arg(long)]
    pub owner: String,
    #[arg(long, default_value = "USD")]
    pub currency: Currency,
    /// Opening deposit in minor units.
    #[arg(long, default_value_t = 0)]
    pub deposit: i64,
}

#[derive(Args, Debug, Clone, Copy)]
pub struct PageArgs {
    #[arg(long, default_value_t = DEFAULT_PAGE_LIMIT)]
    pub limit: u64,
    #[arg(long, default_value_t = 0)]
    pub offset: u64,
}

impl From<PageArgs> for Page {
    fn from(args: PageArgs) -> Self {
        Page::new(args.limit, args.offset)
    }
}

#[derive(Args, Debug)]
pub struct ListArgs {
    #[arg(long)]
    pub owner: Option<String>,
    #[command(flatten)]
    pub page: PageArgs,
}

#[derive(Args, Debug)]
pub struct TransferArgs {
    #[arg(long)]
    pub from: i64,
    #[arg(long)]
    pub to: i64,
    /// Amount in minor units.
    #[arg(long)]
    pub amount: i64,
    #[arg(long, default_value = "USD")]
    pub currency: Currency,
}

#[derive(Args, Debug)]
pub struct TransfersArgs {
    #[arg(long)]
    pub from: i64,
    #[arg(long)]
    pub to: i64,
    #[command(flatten)]
    pub page: PageArgs,
}

#[derive(Args, Debug)]
pub struct EntriesArgs {
    pub account_id: i64,
    #[command(flatten)]
    pub page: PageArgs,
}

/// Run `command` and return its result as JSON.
pub async fn run<S: LedgerStore>(
    engine: &Engine<S>,
    cancel: &CancelToken,
    command: Command,
) -> Result<Value, Box<dyn Error + Send + Sync>> {
    let value = match command {
        Command::Account(Account { command }) => match command {
            AccountCommand::Open(args) => {
                let cmd = OpenAccount::new(args.owner, args.currency).opening_deposit(args.deposit);
                serde_json::to_value(engine.open_account(cancel, cmd).await?)?
            }
            AccountCommand::Get { id } => serde_json::to_value(engine.account(cancel, id).await?)?,
            AccountCommand::List(args) => serde_json::to_value(
                engine
                    .accounts(cancel, args.owner.as_deref(), args.page.into())
                    .await?,
            )?,
            AccountCommand::Delete { id } => {
                engine.delete_account(cancel, id).await?;
                serde_json::json!({ "deleted": id })
            }
            AccountCommand::Verify { id } => {
                serde_json::to_value(engine.verify_account(cancel, id).await?)?
            }
        },
        Command::Transfer(args) => {
            let request = TransferRequest::new(args.from, args.to, args.amount, args.currency);
            serde_json::to_value(engine.transfer(cancel, request).await?)?
        }
        Command::Transfers(args) => serde_json::to_value(
            engine
                .transfers(cancel, args.from, args.to, args.page.into())
                .await?,
        )?,
        Command::Entries(args) => serde_json::to_value(
            engine
                .entries(cancel, args.account_id, args.page.into())
                .await?,
        )?,
    };
    Ok(value)
}
