use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Maximum number of distinct items kept per category unless configured otherwise.
pub const DEFAULT_PER_CATEGORY_CAP: usize = 20;

/// A kind of extractable intelligence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IntelCategory {
    /// Bank account numbers and IBANs.
    BankAccounts,
    /// UPI payment handles.
    UpiIds,
    /// Links the counterparty tried to get clicked.
    PhishingLinks,
    /// Phone numbers.
    PhoneNumbers,
    /// E-mail addresses that are not UPI handles.
    EmailAddresses,
    /// Pressure/urgency vocabulary.
    SuspiciousKeywords,
}

impl IntelCategory {
    /// Every category, in report order.
    pub const ALL: [IntelCategory; 6] = [
        IntelCategory::BankAccounts,
        IntelCategory::UpiIds,
        IntelCategory::PhishingLinks,
        IntelCategory::PhoneNumbers,
        IntelCategory::EmailAddresses,
        IntelCategory::SuspiciousKeywords,
    ];

    /// Wire name of the category.
    pub fn as_str(&self) -> &'static str {
        match self {
            IntelCategory::BankAccounts => "bankAccounts",
            IntelCategory::UpiIds => "upiIds",
            IntelCategory::PhishingLinks => "phishingLinks",
            IntelCategory::PhoneNumbers => "phoneNumbers",
            IntelCategory::EmailAddresses => "emailAddresses",
            IntelCategory::SuspiciousKeywords => "suspiciousKeywords",
        }
    }
}

impl fmt::Display for IntelCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type IntelMap = BTreeMap<IntelCategory, BTreeSet<String>>;

/// Intelligence gathered over a conversation.
///
/// Each category is a deduplicated set. The structure only ever grows:
/// merging is a union, and a category that reached its cap drops new items
/// rather than displacing old ones. Every category is always present, so the
/// serialized form carries empty arrays for categories with no findings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "IntelMap", into = "IntelMap")]
pub struct Intelligence {
    items: IntelMap,
}

impl Intelligence {
    /// An empty record with every category present.
    pub fn new() -> Self {
        Self {
            items: IntelCategory::ALL
                .iter()
                .map(|c| (*c, BTreeSet::new()))
                .collect(),
        }
    }

    /// Items recorded for one category.
    pub fn get(&self, category: IntelCategory) -> impl Iterator<Item = &str> {
        self.items
            .get(&category)
            .into_iter()
            .flat_map(|set| set.iter().map(String::as_str))
    }

    /// Number of items in one category.
    pub fn count(&self, category: IntelCategory) -> usize {
        self.items.get(&category).map_or(0, BTreeSet::len)
    }

    /// Whether a category holds `value`.
    pub fn contains(&self, category: IntelCategory, value: &str) -> bool {
        self.items
            .get(&category)
            .is_some_and(|set| set.contains(value))
    }

    /// Record one item. Returns `true` if it was new and fit under `cap`.
    pub fn insert(&mut self, category: IntelCategory, value: &str, cap: usize) -> bool {
        let value = value.trim();
        if value.is_empty() {
            return false;
        }
        let set = self.items.entry(category).or_default();
        if set.contains(value) || set.len() >= cap {
            return false;
        }
        set.insert(value.to_string())
    }

    /// Union `other` into `self`, respecting `cap`. Returns how many items were added.
    pub fn merge(&mut self, other: &Intelligence, cap: usize) -> usize {
        let mut added = 0;
        for (category, values) in &other.items {
            for value in values {
                if self.insert(*category, value, cap) {
                    added += 1;
                }
            }
        }
        added
    }

    /// Union with another capped copy of the same session's intelligence.
    ///
    /// Each category grows to at most the larger of the two sides' sizes, so
    /// the result stays within whatever cap both were built under and items
    /// already in `self` are never displaced.
    pub fn absorb(&mut self, other: &Intelligence) -> usize {
        let mut added = 0;
        for (category, values) in &other.items {
            let bound = self.count(*category).max(values.len());
            for value in values {
                if self.insert(*category, value, bound) {
                    added += 1;
                }
            }
        }
        added
    }

    /// Total number of items across all categories.
    pub fn item_count(&self) -> usize {
        self.items.values().map(BTreeSet::len).sum()
    }

    /// `true` when nothing has been extracted.
    pub fn is_empty(&self) -> bool {
        self.item_count() == 0
    }

    /// Iterate `(category, items)` pairs in report order.
    pub fn iter(&self) -> impl Iterator<Item = (IntelCategory, &BTreeSet<String>)> {
        self.items.iter().map(|(c, v)| (*c, v))
    }
}

impl Default for Intelligence {
    fn default() -> Self {
        Self::new()
    }
}

impl From<IntelMap> for Intelligence {
    fn from(mut items: IntelMap) -> Self {
        for category in IntelCategory::ALL {
            items.entry(category).or_default();
        }
        Self { items }
    }
}

impl From<Intelligence> for IntelMap {
    fn from(intel: Intelligence) -> Self {
        intel.items
    }
}
