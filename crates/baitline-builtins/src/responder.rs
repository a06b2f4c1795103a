use async_trait::async_trait;
use baitline_core::{BaitlineResult, ChannelMetadata, ConversationMessage, Reply, Responder, Session};

/// Prior messages after which the persona bows out.
pub const DEFAULT_PATIENCE: usize = 15;

/// Rule-based persona: a worried, slightly confused account holder.
#[derive(Debug, Clone)]
pub struct ScriptedResponder {
    patience: usize,
}

impl Default for ScriptedResponder {
    fn default() -> Self {
        Self {
            patience: DEFAULT_PATIENCE,
        }
    }
}

impl ScriptedResponder {
    pub fn new(patience: usize) -> Self {
        Self { patience }
    }

    /// Pick a reply for `text` given how many messages came before it.
    pub fn reply_for(&self, text: &str, prior_messages: usize) -> Reply {
        let lower = text.to_lowercase();
        let has = |words: &[&str]| words.iter().any(|w| lower.contains(w));

        let (line, go_on) = if prior_messages == 0 {
            ("What? Why would my account be blocked? What's happening?", true)
        } else if prior_messages > self.patience {
            (
                "I'm getting confused. Let me call my bank directly to verify this.",
                false,
            )
        } else if has(&["link", "click"]) {
            (
                "I'm not sure about clicking links. Can you explain what this is for?",
                true,
            )
        } else if has(&["account", "bank"]) {
            (
                "Which account? I have multiple accounts. Can you give me more details?",
                true,
            )
        } else if has(&["upi"]) {
            (
                "I'm not very familiar with UPI. Can you guide me through the process?",
                true,
            )
        } else if has(&["otp", "pin"]) {
            ("Why do you need that? Is this really from my bank?", true)
        } else {
            (
                "I'm worried about this. Can you explain more clearly what I need to do?",
                true,
            )
        };

        Reply {
            text: line.to_string(),
            should_continue: go_on,
        }
    }
}

#[async_trait]
impl Responder for ScriptedResponder {
    async fn respond(
        &self,
        message: &ConversationMessage,
        history: &[ConversationMessage],
        _session: &Session,
        _metadata: &ChannelMetadata,
    ) -> BaitlineResult<Reply> {
        Ok(self.reply_for(&message.text, history.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opening_line_on_first_message() {
        let r = ScriptedResponder::default().reply_for("click this link", 0);
        assert!(r.text.starts_with("What? Why would my account be blocked"));
        assert!(r.should_continue);
    }

    #[test]
    fn keyword_driven_replies() {
        let p = ScriptedResponder::default();
        assert!(p.reply_for("Click the link below", 2).text.contains("clicking links"));
        assert!(p.reply_for("Your bank needs this", 2).text.starts_with("Which account?"));
        assert!(p.reply_for("Send via UPI", 2).text.contains("UPI"));
        assert!(p.reply_for("Tell me the OTP", 2).text.contains("really from my bank"));
        assert!(p.reply_for("Do it now", 2).text.starts_with("I'm worried"));
    }

    #[test]
    fn bows_out_when_patience_runs_out() {
        let r = ScriptedResponder::default().reply_for("Share the OTP", 16);
        assert!(!r.should_continue);

        let r = ScriptedResponder::new(3).reply_for("anything", 4);
        assert!(!r.should_continue);
    }

    #[test]
    fn every_continuing_reply_asks_a_question() {
        let p = ScriptedResponder::default();
        for text in ["link", "bank", "upi", "otp", "hmm"] {
            let r = p.reply_for(text, 3);
            assert!(r.should_continue);
            assert!(r.text.contains('?'), "{text}: {}", r.text);
        }
    }
}
