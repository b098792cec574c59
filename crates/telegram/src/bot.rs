use std::{sync::Arc, time::Duration};

use {
    antares_framework::{Dispatcher, Transport},
    teloxide::{
        ApiError, RequestError,
        prelude::*,
        types::AllowedUpdate,
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{convert, error::Result, transport::TelegramTransport};

const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Connect to Telegram and start delivering updates to `dispatcher`.
///
/// Spawns a background task that polls until the returned
/// `CancellationToken` is cancelled, or until another instance starts
/// polling with the same token.
pub async fn start_polling(
    transport: Arc<TelegramTransport>,
    dispatcher: Dispatcher,
) -> Result<CancellationToken> {
    let bot = transport.bot().clone();

    // Verify credentials and learn our username for `/cmd@bot` matching.
    let me = bot.get_me().await?;
    if let Some(username) = me.username.clone() {
        transport.handler_table().set_bot_username(username);
    }

    // Long polling does not work while a webhook is set.
    bot.delete_webhook().send().await?;

    info!(username = ?me.username, "telegram bot connected (webhook cleared)");

    let cancel = CancellationToken::new();
    let poll_cancel = cancel.clone();
    let timeout = transport.poll_timeout_secs();
    tokio::spawn(async move {
        info!("starting telegram polling loop");
        let mut offset: i32 = 0;

        loop {
            let request = bot
                .get_updates()
                .offset(offset)
                .timeout(timeout)
                .allowed_updates(vec![
                    AllowedUpdate::Message,
                    AllowedUpdate::ChannelPost,
                    AllowedUpdate::CallbackQuery,
                ])
                .send();

            let result = tokio::select! {
                () = poll_cancel.cancelled() => break,
                result = request => result,
            };

            match result {
                Ok(updates) => {
                    debug!(count = updates.len(), "got telegram updates");
                    for update in updates {
                        offset = update.id.as_offset();
                        let Some(update) = convert::from_update(&update) else {
                            debug!(kind = ?update.kind, "ignoring unsupported update");
                            continue;
                        };
                        if !dispatcher.dispatch(update).await {
                            debug!("no handler for telegram update");
                        }
                    }
                },
                Err(RequestError::Api(ApiError::TerminatedByOtherGetUpdates)) => {
                    warn!("telegram polling stopped: another instance is running with this token");
                    poll_cancel.cancel();
                    break;
                },
                Err(e) => {
                    warn!(error = %e, "telegram getUpdates failed");
                    tokio::select! {
                        () = poll_cancel.cancelled() => break,
                        () = tokio::time::sleep(RETRY_DELAY) => {},
                    }
                },
            }
        }
        info!("telegram polling stopped");
    });

    Ok(cancel)
}
