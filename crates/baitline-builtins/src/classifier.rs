use async_trait::async_trait;
use baitline_core::{BaitlineResult, ChannelMetadata, Classification, Classifier, ConversationMessage};
use tracing::debug;

/// Minimum keyword weight for a message to count as a scam.
pub const SCAM_THRESHOLD: f64 = 0.6;

/// Phrase → weight. English, Hinglish and Gujarati-English.
const KEYWORDS: &[(&str, f64)] = &[
    ("share otp", 0.95),
    ("share pin", 0.95),
    ("share cvv", 0.95),
    ("share password", 0.95),
    ("otp share karo", 0.95),
    ("otp bhejo", 0.95),
    ("otp do", 0.95),
    ("otp mokalo", 0.95),
    ("account blocked", 0.9),
    ("account suspended", 0.9),
    ("account compromised", 0.9),
    ("account block", 0.9),
    ("card block", 0.9),
    ("verify immediately", 0.85),
    ("aapka account", 0.75),
    ("tumhara account", 0.75),
    ("tamaru account", 0.75),
    ("tamaro card", 0.75),
    ("urgent", 0.7),
    ("won prize", 0.7),
    ("link pe click", 0.7),
    ("link par click", 0.7),
    ("click karo", 0.7),
    ("prize mila", 0.7),
    ("prize mali", 0.7),
    ("jeet gaye", 0.7),
    ("jiti gaya", 0.7),
    ("upi id", 0.65),
    ("suspend", 0.65),
    ("blocked", 0.65),
    ("kyc pending", 0.65),
    ("band ho jayega", 0.65),
    ("band thai jashe", 0.65),
    ("click here", 0.6),
    ("bank account", 0.6),
    ("congratulations", 0.6),
    ("expire", 0.6),
    ("immediately", 0.6),
    ("update karo", 0.6),
    ("expire ho", 0.6),
    ("expire thai", 0.6),
    ("refund", 0.55),
    ("verify", 0.55),
];

/// Indicator fragment → scam type, checked in order.
const FAMILIES: &[(&[&str], &str)] = &[
    (&["otp", "pin", "cvv", "password"], "credential_theft"),
    (&["upi"], "upi_fraud"),
    (&["prize", "won", "congratulations", "jeet", "jiti"], "lottery_scam"),
    (&["click", "link"], "phishing"),
    (&["account", "card", "kyc", "bank", "blocked", "suspend"], "bank_fraud"),
];

/// Weighted phrase matcher. Only looks at the current message.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify `text` without the async wrapper.
    pub fn classify_text(&self, text: &str) -> Classification {
        let lower = text.to_lowercase();
        let mut confidence: f64 = 0.0;
        let mut indicators = Vec::new();

        for (phrase, weight) in KEYWORDS {
            if lower.contains(phrase) {
                indicators.push(phrase.replace(' ', "_"));
                confidence = confidence.max(*weight);
            }
        }

        let is_scam = confidence >= SCAM_THRESHOLD;
        let scam_type = if is_scam {
            infer_scam_type(&indicators)
        } else {
            None
        };

        Classification {
            is_scam,
            confidence,
            indicators,
            scam_type,
        }
    }
}

fn infer_scam_type(indicators: &[String]) -> Option<String> {
    FAMILIES
        .iter()
        .find(|(fragments, _)| {
            indicators
                .iter()
                .any(|i| fragments.iter().any(|f| i.contains(f)))
        })
        .map(|(_, name)| (*name).to_string())
}

#[async_trait]
impl Classifier for KeywordClassifier {
    async fn classify(
        &self,
        message: &ConversationMessage,
        _history: &[ConversationMessage],
        _metadata: &ChannelMetadata,
    ) -> BaitlineResult<Classification> {
        let result = self.classify_text(&message.text);
        debug!(
            is_scam = result.is_scam,
            confidence = result.confidence,
            indicators = result.indicators.len(),
            "Keyword classification"
        );
        Ok(result)
    }
}
