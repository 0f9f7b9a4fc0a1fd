//! Registry helpers: ask Telegram who a bot is and which chats it has seen.

use std::collections::HashSet;

use teloxide::{prelude::*, types::Chat, RequestError};

use tgb_core::{
    domain::{BotToken, ChatId, ChatProfile},
    errors::Error,
    Result,
};

use crate::redact;

/// What `getMe` says about a bot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BotIdentity {
    pub username: Option<String>,
    pub name: String,
}

fn bot(token: &BotToken, api_url: Option<&str>) -> Result<Bot> {
    let bot = Bot::new(token.expose());
    match api_url {
        Some(url) => {
            let url = reqwest::Url::parse(url)
                .map_err(|e| Error::Config(format!("invalid api url {url:?}: {e}")))?;
            Ok(bot.set_api_url(url))
        }
        None => Ok(bot),
    }
}

fn map_err(e: RequestError, token: &BotToken) -> Error {
    match e {
        RequestError::Api(api) => Error::rejected(api.to_string()),
        RequestError::RetryAfter(d) => Error::RemoteRejected {
            description: "Too Many Requests".to_string(),
            retry_after: Some(d),
        },
        RequestError::Network(e) => Error::Unreachable(redact(&e.to_string(), token)),
        other => Error::rejected(redact(&other.to_string(), token)),
    }
}

/// Validate `token` with `getMe`.
pub async fn probe_bot(token: &BotToken, api_url: Option<&str>) -> Result<BotIdentity> {
    let me = bot(token, api_url)?
        .get_me()
        .await
        .map_err(|e| map_err(e, token))?;
    Ok(BotIdentity {
        username: me.user.username.clone(),
        name: me.user.first_name.clone(),
    })
}

/// Chats seen in the bot's pending updates, first sighting first.
///
/// Does not acknowledge the updates.
pub async fn discover_chats(token: &BotToken, api_url: Option<&str>) -> Result<Vec<ChatProfile>> {
    let updates = bot(token, api_url)?
        .get_updates()
        .await
        .map_err(|e| map_err(e, token))?;

    let mut seen = HashSet::new();
    let chats: Vec<ChatProfile> = updates
        .iter()
        .filter_map(|u| u.chat())
        .filter(|c| seen.insert(c.id.0))
        .map(chat_profile)
        .collect();
    tracing::debug!(updates = updates.len(), chats = chats.len(), "discovered chats");
    Ok(chats)
}

fn chat_profile(chat: &Chat) -> ChatProfile {
    let chat_type = if chat.is_private() {
        "private"
    } else if chat.is_group() {
        "group"
    } else if chat.is_supergroup() {
        "supergroup"
    } else {
        "channel"
    };
    let name = chat
        .title()
        .or_else(|| chat.first_name())
        .map(str::to_string);
    ChatProfile {
        id: ChatId(chat.id.0.to_string()),
        chat_type: chat_type.to_string(),
        name,
        username: chat.username().map(str::to_string),
        is_active: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{json, MockBotApi};

    #[tokio::test]
    async fn probe_reads_identity() {
        let server = MockBotApi::start().await;
        let url = server.base_url.clone();
        let captured = server.serve(vec![json(
            200,
            r#"{"ok":true,"result":{"id":42,"is_bot":true,"first_name":"Backups","username":"site_backup_bot","can_join_groups":true,"can_read_all_group_messages":false,"supports_inline_queries":false}}"#,
        )]);

        let me = probe_bot(&BotToken::new("42:abc"), Some(&url)).await.unwrap();
        assert_eq!(
            me,
            BotIdentity {
                username: Some("site_backup_bot".into()),
                name: "Backups".into(),
            }
        );
        let reqs = captured.await.unwrap();
        assert!(reqs[0]
            .request_line()
            .to_ascii_lowercase()
            .contains("/bot42:abc/getme"));
    }

    #[tokio::test]
    async fn probe_reports_bad_token() {
        let server = MockBotApi::start().await;
        let url = server.base_url.clone();
        let _srv = server.serve(vec![json(
            401,
            r#"{"ok":false,"error_code":401,"description":"Unauthorized"}"#,
        )]);

        let err = probe_bot(&BotToken::new("42:bad"), Some(&url))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RemoteRejected { .. }));
    }

    #[tokio::test]
    async fn invalid_api_url_is_config_error() {
        let err = probe_bot(&BotToken::new("1:x"), Some("not a url"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
