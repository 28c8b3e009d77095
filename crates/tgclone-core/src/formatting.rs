//! Telegram HTML rendering for operator-facing messages.

use crate::{
    progress::{ProgressSnapshot, RunStatus},
    source::IdRange,
};

/// Escape HTML special characters for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn status_icon(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Idle => "💤",
        RunStatus::Collecting => "🔎",
        RunStatus::Active => "⏳",
        RunStatus::Paused => "⏸",
        RunStatus::Completed => "✅",
        RunStatus::Error => "❌",
    }
}

/// Progress card sent to the operator chat and returned by `/status`.
pub fn format_progress_html(snap: &ProgressSnapshot) -> String {
    let mut lines = vec![format!(
        "{} <b>Clone {}</b>",
        status_icon(snap.status),
        snap.status.as_str()
    )];

    if snap.status != RunStatus::Idle {
        lines.push(format!(
            "Progress: <b>{}/{}</b> ({:.1}%)",
            snap.processed,
            snap.total,
            snap.percent()
        ));
        lines.push(format!(
            "Delivered: {} | Failed: {}",
            snap.delivered, snap.failed
        ));
        if !snap.current_item.is_empty() {
            lines.push(format!("Current: {}", escape_html(&snap.current_item)));
        }
    }
    if snap.partial {
        lines.push("⚠️ History enumeration was incomplete".to_string());
    }
    if let Some(detail) = &snap.detail {
        lines.push(format!("<i>{}</i>", escape_html(detail)));
    }
    if !snap.timestamp.is_empty() {
        lines.push(format!("<code>{}</code>", escape_html(&snap.timestamp)));
    }
    lines.join("\n")
}

pub fn format_range(range: &IdRange) -> String {
    if range.is_full() {
        "full history".to_string()
    } else {
        format!("messages {range}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_html_escapes_specials() {
        assert_eq!(escape_html("<a & \"b\">"), "&lt;a &amp; &quot;b&quot;&gt;");
    }

    #[test]
    fn progress_card_shows_counts_and_escapes_detail() {
        let snap = ProgressSnapshot {
            status: RunStatus::Active,
            processed: 3,
            total: 12,
            delivered: 2,
            failed: 1,
            current_item: "message 14".to_string(),
            detail: Some("a < b".to_string()),
            ..ProgressSnapshot::default()
        };
        let html = format_progress_html(&snap);
        assert!(html.contains("Clone active"));
        assert!(html.contains("<b>3/12</b> (25.0%)"));
        assert!(html.contains("Delivered: 2 | Failed: 1"));
        assert!(html.contains("a &lt; b"));
    }

    #[test]
    fn idle_card_is_short() {
        let html = format_progress_html(&ProgressSnapshot::default());
        assert!(html.contains("Clone idle"));
        assert!(!html.contains("Progress"));
    }

    #[test]
    fn range_labels() {
        assert_eq!(format_range(&IdRange::full()), "full history");
        assert_eq!(format_range(&IdRange::between(5, 9)), "messages 5..=9");
    }
}
