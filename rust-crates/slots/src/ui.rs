use chrono::Local;
use slots_client::notify::{
    LogKind,
    Notification,
    Tone,
};
use tokio::sync::mpsc;

fn tone_marker(tone: Tone) -> &'static str {
    match tone {
        Tone::Neutral => "·",
        Tone::Good => "✓",
        Tone::Warn => "!",
        Tone::Bad => "✗",
    }
}

fn log_marker(kind: LogKind) -> &'static str {
    match kind {
        LogKind::Info => "",
        LogKind::Ok => "ok ",
        LogKind::Err => "err ",
    }
}

/// Terminal lines for one notification, stamped with `time`.
pub fn render(notification: &Notification, time: &str) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(status) = &notification.status {
        lines.push(format!("{} {}", tone_marker(status.tone), status.text));
    }
    if let Some(log) = &notification.log {
        lines.push(format!("[{time}] {}{}", log_marker(log.kind), log.text));
    }
    if let Some(result) = &notification.result {
        let [a, b, c] = result.reels;
        lines.push(format!("  | {a} | {b} | {c} |  {}", result.category));
    }
    lines
}

/// Prints notifications until every sender is gone.
pub async fn present(mut rx: mpsc::UnboundedReceiver<Notification>) {
    while let Some(notification) = rx.recv().await {
        let time = Local::now().format("%H:%M:%S").to_string();
        for line in render(&notification, &time) {
            println!("{line}");
        }
    }
}
