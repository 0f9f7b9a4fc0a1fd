//! `tgb`: send local backups to Telegram chats and get them back.

mod commands;

use std::{path::PathBuf, sync::Arc};

use clap::{Args, Parser, Subcommand};

use tgb_core::{config::Config, relay::BackupRelay, store::JsonStore};
use tgb_telegram::BotApiTransport;

#[derive(Parser, Debug)]
#[command(name = "tgb", version, about = "Telegram backup relay")]
struct Cli {
    /// Registry/record store (overrides TELEGRAM_BACKUP_STORE).
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a backup file to every configured destination.
    Send {
        path: PathBuf,
        /// Part size in MB (clamped to 1..=49).
        #[arg(long)]
        chunk_size_mb: Option<u64>,
    },
    /// Rebuild a stored backup locally.
    Retrieve {
        id: u64,
        /// Output file; defaults to the backup's name in the current directory.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Delete a backup record and its Telegram messages.
    Delete { id: u64 },
    /// List backup records, newest first.
    List,
    /// Manage registered bots.
    Bots(BotsArgs),
    /// Manage destination chats.
    Chats(ChatsArgs),
}

#[derive(Args, Debug)]
struct BotsArgs {
    #[command(subcommand)]
    command: BotsCommand,
}

#[derive(Subcommand, Debug)]
enum BotsCommand {
    /// Register a bot token (validated with getMe unless --no-probe).
    Add {
        token: String,
        #[arg(long)]
        inactive: bool,
        #[arg(long)]
        no_probe: bool,
    },
    List,
    Enable { id: i64 },
    Disable { id: i64 },
}

#[derive(Args, Debug)]
struct ChatsArgs {
    #[command(subcommand)]
    command: ChatsCommand,
}

#[derive(Subcommand, Debug)]
enum ChatsCommand {
    /// Register a chat and link it to a bot.
    Add {
        bot_id: i64,
        chat_id: String,
        #[arg(long)]
        name: Option<String>,
    },
    /// Link every chat found in the bot's pending updates.
    Discover { bot_id: i64 },
    Enable { chat_id: String },
    Disable { chat_id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tgb_core::logging::init("tgb")?;

    let cli = Cli::parse();
    let mut cfg = Config::load()?;
    if let Some(store) = cli.store {
        cfg.store_path = store;
    }
    let cfg = Arc::new(cfg);

    let store = Arc::new(JsonStore::open(&cfg.store_path).await?);
    let transport = Arc::new(BotApiTransport::new(&cfg)?);
    let relay = BackupRelay::with_store(cfg.clone(), transport, store.clone());

    match cli.command {
        Command::Send {
            path,
            chunk_size_mb,
        } => commands::send(&relay, &path, chunk_size_mb).await,
        Command::Retrieve { id, output } => commands::retrieve(&relay, id, output).await,
        Command::Delete { id } => commands::delete(&relay, id).await,
        Command::List => commands::list(&relay).await,
        Command::Bots(args) => match args.command {
            BotsCommand::Add {
                token,
                inactive,
                no_probe,
            } => commands::bots_add(&cfg, &store, token, !inactive, !no_probe).await,
            BotsCommand::List => commands::bots_list(&store).await,
            BotsCommand::Enable { id } => commands::bots_set_active(&store, id, true).await,
            BotsCommand::Disable { id } => commands::bots_set_active(&store, id, false).await,
        },
        Command::Chats(args) => match args.command {
            ChatsCommand::Add {
                bot_id,
                chat_id,
                name,
            } => commands::chats_add(&store, bot_id, chat_id, name).await,
            ChatsCommand::Discover { bot_id } => {
                commands::chats_discover(&cfg, &store, bot_id).await
            }
            ChatsCommand::Enable { chat_id } => {
                commands::chats_set_active(&store, chat_id, true).await
            }
            ChatsCommand::Disable { chat_id } => {
                commands::chats_set_active(&store, chat_id, false).await
            }
        },
    }
}
