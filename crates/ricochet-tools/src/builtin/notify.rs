// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::tool::{Tool, ToolCall, ToolOutput};

/// A user-facing notification emitted by the model.  The host decides how
/// to surface it (terminal bell, desktop notification, chat message).
#[derive(Debug, Clone)]
pub struct Notification {
    pub message: String,
    /// "info" | "warning" | "success"
    pub level: String,
}

pub struct NotifyUserTool {
    tx: mpsc::Sender<Notification>,
}

impl NotifyUserTool {
    pub fn new(tx: mpsc::Sender<Notification>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl Tool for NotifyUserTool {
    fn name(&self) -> &str {
        "notify_user"
    }

    fn description(&self) -> &str {
        "Send a short out-of-band notification to the user, e.g. when a long \
         task finishes or needs attention. Not a substitute for the normal \
         response text."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "message": { "type": "string" },
                "level": { "type": "string", "enum": ["info", "warning", "success"] }
            },
            "required": ["message"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let message = match call.args.get("message").and_then(|v| v.as_str()) {
            Some(m) => m.to_string(),
            None => return ToolOutput::err(&call.id, "missing 'message'"),
        };
        let level = call
            .args
            .get("level")
            .and_then(|v| v.as_str())
            .unwrap_or("info")
            .to_string();
        let _ = self.tx.send(Notification { message, level }).await;
        ToolOutput::ok(&call.id, "notification sent")
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn notification_is_delivered() {
        let (tx, mut rx) = mpsc::channel(4);
        let t = NotifyUserTool::new(tx);
        let out = t
            .execute(&ToolCall {
                id: "n1".into(),
                name: "notify_user".into(),
                args: json!({"message": "build done", "level": "success"}),
            })
            .await;
        assert!(!out.is_error);
        let n = rx.try_recv().unwrap();
        assert_eq!(n.message, "build done");
        assert_eq!(n.level, "success");
    }

    #[tokio::test]
    async fn default_level_is_info() {
        let (tx, mut rx) = mpsc::channel(4);
        let t = NotifyUserTool::new(tx);
        t.execute(&ToolCall {
            id: "n2".into(),
            name: "notify_user".into(),
            args: json!({"message": "hi"}),
        })
        .await;
        assert_eq!(rx.try_recv().unwrap().level, "info");
    }

    #[tokio::test]
    async fn missing_message_is_error() {
        let (tx, _rx) = mpsc::channel(4);
        let t = NotifyUserTool::new(tx);
        let out = t
            .execute(&ToolCall {
                id: "n3".into(),
                name: "notify_user".into(),
                args: json!({}),
            })
            .await;
        assert!(out.is_error);
    }
}
