use std::sync::Arc;

use teloxide::{prelude::*, types::ParseMode};

use tgclone_core::{
    domain::ChatId,
    errors::Error,
    formatting::{escape_html, format_progress_html, format_range},
    ports::ProgressNotifier,
    source::IdRange,
};

use crate::{router::AppState, TelegramNotifier};

fn parse_command(text: &str) -> (String, String) {
    // Telegram may send `/cmd@botname arg1 ...`
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

/// `/range <start> <end>` arguments. Both bounds inclusive.
fn parse_range(arg: &str) -> std::result::Result<IdRange, String> {
    let nums: Vec<&str> = arg.split_whitespace().collect();
    let [start, end] = nums.as_slice() else {
        return Err("Usage: /range &lt;start_id&gt; &lt;end_id&gt;".to_string());
    };
    let parse = |s: &str| {
        s.parse::<i32>()
            .ok()
            .filter(|v| *v > 0)
            .ok_or_else(|| format!("Invalid message id: <code>{}</code>", escape_html(s)))
    };
    let (start, end) = (parse(*start)?, parse(*end)?);
    if start > end {
        return Err("Start id must not be greater than end id.".to_string());
    }
    Ok(IdRange::between(start, end))
}

fn start_error_html(e: &Error) -> String {
    match e {
        Error::Config(detail) => format!(
            "⚠️ <b>Configuration error</b>\n{}",
            escape_html(detail)
        ),
        Error::AlreadyRunning { .. } => {
            "⏳ A clone is already running for this target. Use /status or /stop.".to_string()
        }
        Error::NothingToResume(_) => {
            "ℹ️ Nothing to resume. Start with /clone or /range.".to_string()
        }
        other => format!("❌ Could not start clone: {}", escape_html(&other.to_string())),
    }
}

const HELP_HTML: &str = "📦 <b>Channel Clone Bot</b>\n\n\
<b>📋 Commands:</b>\n\
/clone - Clone the full source history\n\
/range &lt;start&gt; &lt;end&gt; - Clone an id range (inclusive)\n\
/resume - Resume the last run from its checkpoint\n\
/stop - Pause the active run\n\
/status - Show run progress\n\
/help - Show this message\n\n\
<i>Without CLONE_SOURCE_HEAD_ID set, each run posts and deletes a silent \
marker message in the source channel to find its newest id.</i>";

async fn reply_html(bot: &Bot, chat_id: i64, html: impl Into<String>) {
    if let Err(e) = bot
        .send_message(teloxide::types::ChatId(chat_id), html.into())
        .parse_mode(ParseMode::Html)
        .await
    {
        tracing::warn!(chat_id, error = %e, "reply failed");
    }
}

pub async fn handle_command(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };
    let chat_id = msg.chat.id.0;
    let (cmd, arg) = parse_command(text);
    let notifier: Arc<dyn ProgressNotifier> =
        Arc::new(TelegramNotifier::new(bot.clone(), ChatId(chat_id)));

    tracing::info!(command = %cmd, chat_id, "control command");

    match cmd.as_str() {
        "start" | "help" => {
            reply_html(&bot, chat_id, HELP_HTML).await;
        }

        "clone" | "range" => {
            let range = if cmd == "clone" {
                IdRange::full()
            } else {
                match parse_range(&arg) {
                    Ok(r) => r,
                    Err(html) => {
                        reply_html(&bot, chat_id, html).await;
                        return Ok(());
                    }
                }
            };
            match state.supervisor.start_run(range, notifier).await {
                Ok(()) => {
                    let body = format!("🚀 Clone started: {}", escape_html(&format_range(&range)));
                    reply_html(&bot, chat_id, body).await;
                }
                Err(e) => reply_html(&bot, chat_id, start_error_html(&e)).await,
            }
        }

        "resume" => match state.supervisor.resume(notifier).await {
            Ok(range) => {
                let body = format!("▶️ Resuming clone: {}", escape_html(&format_range(&range)));
                reply_html(&bot, chat_id, body).await;
            }
            Err(e) => reply_html(&bot, chat_id, start_error_html(&e)).await,
        },

        "stop" => {
            let body = if state.supervisor.request_stop().await {
                "🛑 Stop requested. The run pauses after the current message."
            } else {
                "No clone is running."
            };
            reply_html(&bot, chat_id, body).await;
        }

        "status" => {
            let snapshot = state.supervisor.query_progress();
            reply_html(&bot, chat_id, format_progress_html(&snapshot)).await;
        }

        _ => {
            reply_html(&bot, chat_id, "Unknown command. Send /help.").await;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands_with_bot_suffix() {
        assert_eq!(
            parse_command("/Range@clone_bot 10 20"),
            ("range".to_string(), "10 20".to_string())
        );
        assert_eq!(parse_command("/clone"), ("clone".to_string(), String::new()));
    }

    #[test]
    fn range_arguments_are_validated() {
        assert_eq!(parse_range("100 105"), Ok(IdRange::between(100, 105)));
        assert_eq!(parse_range(" 7   7 "), Ok(IdRange::between(7, 7)));
        assert!(parse_range("10").unwrap_err().starts_with("Usage"));
        assert!(parse_range("a 5").unwrap_err().contains("<code>a</code>"));
        assert!(parse_range("0 5").is_err());
        assert!(parse_range("9 3").unwrap_err().contains("greater"));
        assert!(parse_range("1 2 3").is_err());
    }

    #[test]
    fn start_errors_are_explained() {
        let html = start_error_html(&Error::Config("source channel is not configured".into()));
        assert!(html.contains("Configuration error"));
        assert!(html.contains("source channel"));

        let html = start_error_html(&Error::AlreadyRunning {
            target: -1002,
            lock_path: "run.lock".into(),
        });
        assert!(html.contains("already running"));

        assert!(start_error_html(&Error::NothingToResume(-1002)).contains("Nothing to resume"));
    }

    #[test]
    fn help_explains_how_to_avoid_the_head_marker() {
        assert!(HELP_HTML.contains("CLONE_SOURCE_HEAD_ID"));
        assert!(HELP_HTML.contains("silent"));
    }
}
