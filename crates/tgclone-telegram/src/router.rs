use std::{sync::Arc, time::Duration};

use teloxide::{dispatching::Dispatcher, dptree, prelude::*, types::ParseMode};

use tgclone_core::{
    config::Config, formatting::format_progress_html, progress::RunStatus,
    supervisor::Supervisor,
};

use crate::handlers;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub supervisor: Supervisor,
}

pub async fn run_polling(bot: Bot, cfg: Arc<Config>, supervisor: Supervisor) -> anyhow::Result<()> {
    if let Ok(me) = bot.get_me().await {
        tracing::info!(username = %me.username(), "tgclone control bot started");
    }
    tracing::info!(
        source = ?cfg.source_channel_id.map(|c| c.0),
        target = ?cfg.target_channel_id.map(|c| c.0),
        state_dir = %cfg.state_dir.display(),
        allowed_users = cfg.telegram_allowed_users.len(),
        "configuration loaded"
    );

    // A run that died with the previous process is reported to the first operator.
    if supervisor.query_progress().status == RunStatus::Error {
        if let Some(&user_id) = cfg.telegram_allowed_users.first() {
            let bot = bot.clone();
            let snapshot = supervisor.query_progress();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(2)).await;
                let html = format!(
                    "{}\n\nUse /resume to continue from the last checkpoint.",
                    format_progress_html(&snapshot)
                );
                if let Err(e) = bot
                    .send_message(teloxide::types::ChatId(user_id), html)
                    .parse_mode(ParseMode::Html)
                    .await
                {
                    tracing::warn!(error = %e, "startup notification failed");
                }
            });
        }
    }

    let state = Arc::new(AppState { cfg, supervisor });

    let handler = dptree::entry().branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .build()
        .dispatch()
        .await;

    Ok(())
}
