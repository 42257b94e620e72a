//! Outbound notifications. Advisory only: nothing on the protocol path waits
//! on a consumer.

use crate::outcome::SpinResult;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    Neutral,
    Good,
    Warn,
    Bad,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    Info,
    Ok,
    Err,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Status {
    pub text: String,
    pub tone: Tone,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LogLine {
    pub text: String,
    pub kind: LogKind,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub status: Option<Status>,
    pub log: Option<LogLine>,
    pub result: Option<SpinResult>,
}

impl Notification {
    pub fn status(text: impl Into<String>, tone: Tone) -> Self {
        Self {
            status: Some(Status {
                text: text.into(),
                tone,
            }),
            ..Self::default()
        }
    }

    pub fn log(text: impl Into<String>, kind: LogKind) -> Self {
        Self::default().with_log(text, kind)
    }

    pub fn with_log(mut self, text: impl Into<String>, kind: LogKind) -> Self {
        self.log = Some(LogLine {
            text: text.into(),
            kind,
        });
        self
    }

    pub fn with_result(mut self, result: SpinResult) -> Self {
        self.result = Some(result);
        self
    }
}

pub trait Notifier: Send + Sync + 'static {
    fn notify(&self, notification: Notification);
}

impl Notifier for mpsc::UnboundedSender<Notification> {
    fn notify(&self, notification: Notification) {
        // A closed presenter is not the orchestrator's problem.
        let _ = self.send(notification);
    }
}

impl<N: Notifier> Notifier for Arc<N> {
    fn notify(&self, notification: Notification) {
        (**self).notify(notification)
    }
}
