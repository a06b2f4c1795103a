use async_trait::async_trait;
use baitline_core::{
    BaitlineResult, ConversationMessage, Extractor, IntelCategory, Intelligence, Sender,
    DEFAULT_PER_CATEGORY_CAP,
};
use regex::Regex;
use std::ops::Range;
use std::sync::OnceLock;
use tracing::debug;

/// Handles of the common UPI payment providers.
const UPI_PROVIDERS: &[&str] = &[
    "paytm", "ybl", "okicici", "oksbi", "okhdfcbank", "okaxis", "upi", "apl", "axl", "ibl",
    "waicici",
];

/// Domains never reported as phishing.
const LEGIT_DOMAINS: &[&str] = &[
    "google.com",
    "microsoft.com",
    "apple.com",
    "gov.in",
    "facebook.com",
    "twitter.com",
];

struct Patterns {
    bank_grouped: Regex,
    digit_run: Regex,
    iban: Regex,
    handle: Regex,
    url: Regex,
    bare_domain: Regex,
    phone: Regex,
    email: Regex,
    keyword: Regex,
}

/// Compiled once. `None` if any pattern fails to compile.
fn patterns() -> Option<&'static Patterns> {
    static PATTERNS: OnceLock<Option<Patterns>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            Some(Patterns {
                bank_grouped: Regex::new(r"\b\d{4}[-\s]\d{4}[-\s]\d{4}[-\s]\d{4}\b").ok()?,
                digit_run: Regex::new(r"\b\d{9,18}\b").ok()?,
                iban: Regex::new(r"\b[A-Z]{2}\d{2}[A-Z0-9]{10,30}\b").ok()?,
                handle: Regex::new(r"[\w.\-]+@[\w.\-]+").ok()?,
                url: Regex::new(r"(?i)\b(?:https?://|www\.)\S+|\b(?:bit\.ly|tinyurl\.com)/\S+").ok()?,
                bare_domain: Regex::new(r"(?i)\b[\w-]+\.(?:com|net|org|in|xyz|tk|ml|ga|cf|gq)\b\S*")
                    .ok()?,
                phone: Regex::new(r"(?:\+\d{1,3}[\s.-]?)?\(?\d{2,5}\)?[\s.-]?\d{3,5}[\s.-]?\d{3,5}")
                    .ok()?,
                email: Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").ok()?,
                keyword: Regex::new(
                    r"(?i)\b(?:urgent|immediately|expire|suspend|block|verify|confirm|activate|update|secure|alert|warning|limited time|act now|last chance)\b",
                )
                .ok()?,
            })
        })
        .as_ref()
}

fn digits(s: &str) -> String {
    s.chars().filter(char::is_ascii_digit).collect()
}

/// Ten digits starting 6-9: an Indian mobile number, not an account.
fn looks_like_mobile(d: &str) -> bool {
    d.len() == 10 && d.starts_with(['6', '7', '8', '9'])
}

fn is_upi_handle(handle: &str) -> bool {
    let Some((local, domain)) = handle.split_once('@') else {
        return false;
    };
    let domain = domain.to_lowercase();
    UPI_PROVIDERS.contains(&domain.as_str())
        || (local.len() == 10 && local.chars().all(|c| c.is_ascii_digit()) && !domain.contains('.'))
}

fn trim_link(link: &str) -> &str {
    link.trim_end_matches(['.', ',', ';', ':', '!', '?', ')', '"', '\''])
}

fn overlaps(spans: &[Range<usize>], r: &Range<usize>) -> bool {
    spans.iter().any(|s| s.start < r.end && r.start < s.end)
}

/// Regex-driven extractor over the counterparty's messages.
///
/// Always returns a superset of the `current` intelligence it is given.
#[derive(Debug, Clone)]
pub struct RegexExtractor {
    cap: usize,
}

impl Default for RegexExtractor {
    fn default() -> Self {
        Self {
            cap: DEFAULT_PER_CATEGORY_CAP,
        }
    }
}

impl RegexExtractor {
    pub fn new(cap: usize) -> Self {
        Self { cap }
    }

    /// Record everything found in one message.
    pub fn scan(&self, text: &str, into: &mut Intelligence) {
        let Some(p) = patterns() else {
            return;
        };
        let cap = self.cap;

        // Bank accounts: grouped 16-digit numbers, long digit runs, IBANs.
        let mut account_spans: Vec<Range<usize>> = Vec::new();
        for m in p.bank_grouped.find_iter(text) {
            into.insert(IntelCategory::BankAccounts, m.as_str(), cap);
            account_spans.push(m.range());
        }
        for m in p.digit_run.find_iter(text) {
            if !looks_like_mobile(m.as_str()) {
                into.insert(IntelCategory::BankAccounts, m.as_str(), cap);
                account_spans.push(m.range());
            }
        }
        for m in p.iban.find_iter(text) {
            into.insert(IntelCategory::BankAccounts, m.as_str(), cap);
            account_spans.push(m.range());
        }

        // UPI handles and e-mail addresses share the `x@y` shape.
        for m in p.handle.find_iter(text) {
            let handle = m.as_str().trim_end_matches('.');
            if is_upi_handle(handle) {
                into.insert(IntelCategory::UpiIds, handle, cap);
            }
        }
        for m in p.email.find_iter(text) {
            if !is_upi_handle(m.as_str()) {
                into.insert(IntelCategory::EmailAddresses, m.as_str(), cap);
            }
        }

        // Links, skipping bare domains that are part of a URL or an e-mail.
        let mut link_spans: Vec<Range<usize>> = p.email.find_iter(text).map(|m| m.range()).collect();
        for m in p.url.find_iter(text) {
            link_spans.push(m.range());
            self.insert_link(trim_link(m.as_str()), into);
        }
        for m in p.bare_domain.find_iter(text) {
            if !overlaps(&link_spans, &m.range()) {
                self.insert_link(trim_link(m.as_str()), into);
            }
        }

        // Phone numbers: 7-15 digits that were not already taken as accounts.
        for m in p.phone.find_iter(text) {
            let d = digits(m.as_str());
            if (7..=15).contains(&d.len()) && !overlaps(&account_spans, &m.range()) {
                into.insert(IntelCategory::PhoneNumbers, m.as_str().trim(), cap);
            }
        }

        for m in p.keyword.find_iter(text) {
            into.insert(IntelCategory::SuspiciousKeywords, &m.as_str().to_lowercase(), cap);
        }
    }

    fn insert_link(&self, link: &str, into: &mut Intelligence) {
        let lower = link.to_lowercase();
        if !LEGIT_DOMAINS.iter().any(|d| lower.contains(d)) {
            into.insert(IntelCategory::PhishingLinks, link, self.cap);
        }
    }

    /// Scan every counterparty message on top of `current`.
    pub fn extract_from(
        &self,
        history: &[ConversationMessage],
        current: &Intelligence,
    ) -> Intelligence {
        let mut intel = current.clone();
        for message in history.iter().filter(|m| m.sender == Sender::Scammer) {
            self.scan(&message.text, &mut intel);
        }
        intel
    }
}

#[async_trait]
impl Extractor for RegexExtractor {
    async fn extract(
        &self,
        history: &[ConversationMessage],
        current: &Intelligence,
    ) -> BaitlineResult<Intelligence> {
        let intel = self.extract_from(history, current);
        debug!(items = intel.item_count(), "Regex extraction");
        Ok(intel)
    }
}
