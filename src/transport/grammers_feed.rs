use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use grammers_client::client::updates::UpdateStream;
use grammers_client::{Client, SignInError, Update, UpdatesConfiguration};
use grammers_mtsender::{SenderPool, SenderPoolHandle};
use grammers_session::storages::SqliteSession;
use tokio::task::JoinHandle;

use super::{SourceEvent, SourceFeed};

/// `SourceFeed` adapter over a live `grammers_client::Client` user
/// session, persisted to an on-disk `SqliteSession` so a restart resumes
/// the same authorized session instead of prompting for login again.
///
/// Grounded on `Klok-e-telegram-llm-rewriter/src/telegram.rs`'s
/// `TelegramBot::connect_and_authorize` (session file open, sender-pool
/// spawn, sign-in flow) and `shutdown` (update-state sync, pool quit,
/// await pool task); this adapter keeps the same "open session, stream
/// updates" shape but translates grammers' `Update` variants into
/// `SourceEvent` instead of handling them inline, since here the
/// ingestion side is a trait implementation consumed by `Dispatcher`
/// rather than the whole application.
pub struct GrammersSourceFeed {
    updates: UpdateStream,
    pool_handle: SenderPoolHandle,
    pool_task: Option<JoinHandle<()>>,
}

impl GrammersSourceFeed {
    /// Opens (creating if absent) the session file at `session_file`,
    /// spawns the sender pool backing the `Client`, and performs
    /// interactive sign-in if the session isn't authorized yet —
    /// mirroring the teacher's `connect_and_authorize`.
    pub async fn connect(api_id: i32, api_hash: &str, phone_number: &str, session_file: &Path) -> Result<Self> {
        let session = Arc::new(SqliteSession::open(session_file).with_context(|| {
            format!("failed to open session db: {}", session_file.display())
        })?);

        let pool = SenderPool::new(Arc::clone(&session), api_id);
        let client = Client::new(&pool);
        let SenderPool {
            runner,
            updates,
            handle,
        } = pool;
        let pool_task = tokio::spawn(runner.run());

        if !client
            .is_authorized()
            .await
            .context("failed to check Telegram authorization")?
        {
            sign_in_interactively(&client, api_hash, phone_number).await?;
        }

        let updates = client.stream_updates(
            updates,
            UpdatesConfiguration {
                catch_up: false,
                ..Default::default()
            },
        );

        Ok(Self {
            updates,
            pool_handle: handle,
            pool_task: Some(pool_task),
        })
    }

    /// Syncs update state to the session file, signals the sender pool
    /// to quit, and awaits its task — mirroring the teacher's
    /// `TelegramBot::shutdown`, invoked by `Dispatcher`'s cancellation
    /// path (spec.md §5: "tears down the upstream client").
    pub async fn shutdown(&mut self) -> Result<()> {
        self.updates.sync_update_state();
        self.pool_handle.quit();
        if let Some(pool_task) = self.pool_task.take() {
            pool_task.await.context("failed waiting for Telegram sender pool task")?;
        }
        Ok(())
    }
}

#[async_trait]
impl SourceFeed for GrammersSourceFeed {
    async fn next_event(&mut self) -> Result<SourceEvent> {
        loop {
            let update = self.updates.next().await.context("failed to fetch Telegram update")?;

            if let Some(event) = translate_update(update) {
                return Ok(event);
            }
            // Updates this crate doesn't route on (typing indicators,
            // read receipts, chat membership changes, ...) are skipped;
            // loop to the next update.
        }
    }
}

async fn sign_in_interactively(client: &Client, api_hash: &str, phone_number: &str) -> Result<()> {
    let login_token = client
        .request_login_code(phone_number, api_hash)
        .await
        .context("failed to request login code from Telegram")?;
    // The login-code prompt itself is left to the embedding application;
    // this crate's scope stops at "a feed of already-authorized source
    // events" (see SPEC_FULL.md Non-goals).
    let code = std::env::var("TELEGRAM_LOGIN_CODE")
        .context("TELEGRAM_LOGIN_CODE must be set to complete interactive sign-in")?;

    match client.sign_in(&login_token, code.trim()).await {
        Ok(_) => Ok(()),
        Err(SignInError::PasswordRequired(password_token)) => {
            let password = std::env::var("TELEGRAM_2FA_PASSWORD")
                .context("TELEGRAM_2FA_PASSWORD must be set; this account has 2FA enabled")?;
            client
                .check_password(password_token, password.trim())
                .await
                .context("failed to validate Telegram 2FA password")?;
            Ok(())
        }
        Err(SignInError::SignUpRequired { .. }) => {
            anyhow::bail!("this Telegram account must be registered in an official client first")
        }
        Err(err) => Err(err).context("Telegram sign-in failed"),
    }
}

/// Translates a grammers `Update` into a `SourceEvent`.
///
/// Entity and media extraction (the source message's formatting runs and
/// attached photo/video/document) are left at their empty/`None`
/// defaults here: grammers' raw entity list and media attribute structs
/// need their own translation into [`crate::model::Entity`] and
/// [`crate::media::RawMediaDescriptor`] (see spec.md §4.5/§4.6), which
/// is deployment-specific wiring work out of this crate's scope (see the
/// known-gap note in DESIGN.md). The classification rules themselves
/// (`crate::media::classify_media_type`) and `ContentTransformer` both
/// operate correctly on a feed that does supply a populated descriptor.
fn translate_update(update: Update) -> Option<SourceEvent> {
    match update {
        Update::NewMessage(message) => {
            let reply_to_msg_id = message.reply_to_message_id().map(|id| id as i64);
            Some(SourceEvent::NewMessage {
                chat_id: message.chat_id(),
                message_id: message.id(),
                text: message.text().to_string(),
                entities: Vec::new(),
                media_type: None,
                is_reply: reply_to_msg_id.is_some(),
                reply_to_msg_id,
            })
        }
        Update::MessageEdited(message) => Some(SourceEvent::MessageEdited {
            chat_id: message.chat_id(),
            message_id: message.id(),
            text: message.text().to_string(),
            entities: Vec::new(),
            media_type: None,
        }),
        Update::MessageDeleted(deletion) => Some(SourceEvent::MessagesDeleted {
            chat_id: deletion.chat_id(),
            message_ids: deletion.message_ids().to_vec(),
        }),
        _ => None,
    }
}
