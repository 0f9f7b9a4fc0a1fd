use std::sync::Arc;

use crate::{
    config::Config,
    domain::{BotId, BotToken, SendTarget},
    store::BotDirectory,
    Result,
};

/// Decides where each backup copy goes.
///
/// Recomputed from the registry on every call, so bot/chat edits take effect
/// on the next send without any invalidation step.
#[derive(Clone)]
pub struct DestinationResolver {
    cfg: Arc<Config>,
    directory: Arc<dyn BotDirectory>,
}

impl DestinationResolver {
    pub fn new(cfg: Arc<Config>, directory: Arc<dyn BotDirectory>) -> Self {
        Self { cfg, directory }
    }

    /// Every (bot, chat) pair a backup should be delivered to.
    ///
    /// - each active bot goes to each of its active chats;
    /// - an active bot without chats falls back to the configured chat, or is skipped;
    /// - with no active bots, the configured token + chat are used, if both are set.
    ///
    /// An empty result means nothing is configured.
    pub async fn resolve(&self) -> Result<Vec<SendTarget>> {
        let bots = self.directory.active_bots().await?;

        if bots.is_empty() {
            let fallback = match (&self.cfg.default_bot_token, &self.cfg.default_chat_id) {
                (Some(token), Some(chat)) => vec![SendTarget {
                    source_id: BotId::CONFIG_DEFAULT,
                    credential: token.clone(),
                    destination_id: chat.clone(),
                }],
                _ => Vec::new(),
            };
            return Ok(fallback);
        }

        let mut targets = Vec::new();
        for bot in bots {
            let chats = self.directory.active_chats(bot.id).await?;

            if chats.is_empty() {
                match &self.cfg.default_chat_id {
                    Some(chat) => targets.push(SendTarget {
                        source_id: bot.id,
                        credential: bot.token.clone(),
                        destination_id: chat.clone(),
                    }),
                    None => {
                        tracing::warn!(bot = %bot.id, "bot has no active chats and no default chat is configured; skipping");
                    }
                }
                continue;
            }

            targets.extend(chats.into_iter().map(|chat| SendTarget {
                source_id: bot.id,
                credential: bot.token.clone(),
                destination_id: chat.id,
            }));
        }

        Ok(targets)
    }

    /// Token for the bot that sent a record, if it can still be found.
    ///
    /// Inactive bots still resolve: their earlier uploads remain retrievable.
    pub async fn credential_for(&self, source: BotId) -> Result<Option<BotToken>> {
        if source == BotId::CONFIG_DEFAULT {
            return Ok(self.cfg.default_bot_token.clone());
        }
        Ok(self.directory.find_bot(source).await?.map(|b| b.token))
    }
}
