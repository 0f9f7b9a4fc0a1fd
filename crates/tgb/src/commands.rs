use std::path::{Path, PathBuf};

use anyhow::{bail, Context};

use tgb_core::{
    config::{clamp_chunk_size_mb, Config},
    domain::{BackupRecord, BackupStatus, BotId, BotToken, ChatId, ChatProfile, RecordId},
    relay::BackupRelay,
    store::JsonStore,
    utils::format_bytes,
};
use tgb_telegram::probe::{discover_chats, probe_bot};

const MB: u64 = 1024 * 1024;

pub async fn send(relay: &BackupRelay, path: &Path, chunk_size_mb: Option<u64>) -> anyhow::Result<()> {
    let jobs = relay.start_jobs();
    let handle = match chunk_size_mb {
        Some(mb) => jobs.enqueue_with_limit(path, clamp_chunk_size_mb(mb) * MB).await?,
        None => jobs.enqueue(path).await?,
    };
    let res = handle.wait().await;
    jobs.shutdown().await;
    let outcome = res?;

    for r in &outcome.records {
        println!("{}", describe(r));
    }
    if !outcome.succeeded() {
        bail!(
            "backup {} was not delivered to any destination",
            path.display()
        );
    }
    Ok(())
}

pub async fn retrieve(relay: &BackupRelay, id: u64, output: Option<PathBuf>) -> anyhow::Result<()> {
    let id = RecordId(id);
    let record = relay
        .find(id)
        .await?
        .with_context(|| format!("backup {id} does not exist"))?;
    let dest = output.unwrap_or_else(|| PathBuf::from(&record.name));

    let n = relay.retrieve_to_path(id, &dest).await?;
    println!("restored {} ({}) to {}", record.name, format_bytes(n), dest.display());
    Ok(())
}

pub async fn delete(relay: &BackupRelay, id: u64) -> anyhow::Result<()> {
    let report = relay.delete(RecordId(id)).await?;
    println!("deleted backup {id} ({} message(s) removed)", report.deleted);
    if let Some(reason) = &report.remote_skipped {
        println!("  remote messages kept: {reason}");
    }
    for (msg, err) in &report.failures {
        println!("  message {msg}: {err}");
    }
    Ok(())
}

pub async fn list(relay: &BackupRelay) -> anyhow::Result<()> {
    let records = relay.list().await?;
    if records.is_empty() {
        println!("no backups");
    }
    for r in &records {
        println!("{}", describe(r));
    }
    Ok(())
}

fn describe(r: &BackupRecord) -> String {
    let when = r.sent_at.unwrap_or(r.created_at).format("%Y-%m-%d %H:%M");
    let mut line = format!(
        "#{:<5} {:<7} {when}  {} ({}) bot {} -> {}",
        r.id,
        r.status.to_string(),
        r.name,
        format_bytes(r.size_bytes),
        r.source_id,
        r.destination_id,
    );
    match r.status {
        BackupStatus::Sent if r.is_chunked() => {
            line.push_str(&format!(" [{} parts]", r.part_count()))
        }
        BackupStatus::Failed => {
            if let Some(e) = &r.error_detail {
                line.push_str(&format!(": {e}"));
            }
        }
        _ => {}
    }
    line
}

pub async fn bots_add(
    cfg: &Config,
    store: &JsonStore,
    token: String,
    active: bool,
    probe: bool,
) -> anyhow::Result<()> {
    let token = BotToken::new(token.trim());
    let (username, name) = if probe {
        let me = probe_bot(&token, Some(&cfg.api_base_url))
            .await
            .context("token rejected by getMe")?;
        (me.username, Some(me.name))
    } else {
        (None, None)
    };

    let bot = store.add_bot(token, username, name, active).await?;
    println!(
        "registered bot {} ({})",
        bot.id,
        bot.username.as_deref().unwrap_or("unknown username")
    );
    Ok(())
}

pub async fn bots_list(store: &JsonStore) -> anyhow::Result<()> {
    for b in store.list_bots().await? {
        println!(
            "{:<4} {:<8} @{} {}",
            b.id,
            if b.is_active { "active" } else { "inactive" },
            b.username.as_deref().unwrap_or("?"),
            b.name.as_deref().unwrap_or_default()
        );
    }
    Ok(())
}

pub async fn bots_set_active(store: &JsonStore, id: i64, active: bool) -> anyhow::Result<()> {
    store.set_bot_active(BotId(id), active).await?;
    println!("bot {id} {}", if active { "enabled" } else { "disabled" });
    Ok(())
}

pub async fn chats_add(
    store: &JsonStore,
    bot_id: i64,
    chat_id: String,
    name: Option<String>,
) -> anyhow::Result<()> {
    let chat = ChatProfile {
        name,
        ..ChatProfile::new(ChatId(chat_id))
    };
    let chat = store.upsert_chat(chat).await?;
    let linked = store.attach_chat(BotId(bot_id), &chat.id).await?;
    if linked {
        println!("chat {} linked to bot {bot_id}", chat.id);
    } else {
        println!("chat {} was already linked to bot {bot_id}", chat.id);
    }
    Ok(())
}

pub async fn chats_discover(cfg: &Config, store: &JsonStore, bot_id: i64) -> anyhow::Result<()> {
    let bot = store
        .list_bots()
        .await?
        .into_iter()
        .find(|b| b.id == BotId(bot_id))
        .with_context(|| format!("bot {bot_id} is not registered"))?;

    let chats = discover_chats(&bot.token, Some(&cfg.api_base_url)).await?;
    if chats.is_empty() {
        println!("no chats found; send the bot a message first");
    }
    for chat in chats {
        let chat = store.upsert_chat(chat).await?;
        store.attach_chat(bot.id, &chat.id).await?;
        println!(
            "{} ({}) {}",
            chat.id,
            chat.chat_type,
            chat.name.as_deref().unwrap_or_default()
        );
    }
    Ok(())
}

pub async fn chats_set_active(store: &JsonStore, chat_id: String, active: bool) -> anyhow::Result<()> {
    store.set_chat_active(&ChatId(chat_id.clone()), active).await?;
    println!("chat {chat_id} {}", if active { "enabled" } else { "disabled" });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn record(status: BackupStatus) -> BackupRecord {
        BackupRecord {
            id: RecordId(3),
            source_id: BotId(1),
            name: "site.zip".into(),
            local_path: PathBuf::from("/b/site.zip"),
            remote_file_handles: vec![],
            remote_message_handles: vec![],
            destination_id: ChatId("-100".into()),
            size_bytes: 2048,
            status,
            error_detail: Some("sendDocument: chat not found".into()),
            sent_at: None,
            sha256: None,
            created_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 0).unwrap(),
        }
    }

    #[test]
    fn failed_record_line_shows_error() {
        let line = describe(&record(BackupStatus::Failed));
        assert!(line.starts_with("#3"));
        assert!(line.contains("2026-03-01 12:30"));
        assert!(line.contains("site.zip (2 KB) bot 1 -> -100"));
        assert!(line.ends_with(": sendDocument: chat not found"));
    }
}
