//! Financial entity extraction.
//!
//! Pulls currency amounts, percentages, years, plain numbers and a fixed
//! vocabulary of financial terms out of free text. Extraction order matters:
//! currency, percentages and years are claimed first, and the catch-all
//! number pattern skips any token one of them already captured.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Financial vocabulary matched case-insensitively by [`EntityExtractor`].
pub const FINANCIAL_TERMS: &[&str] = &[
    "increase",
    "decrease",
    "change",
    "growth",
    "decline",
    "net sales",
    "revenue",
    "sales",
    "margin",
    "profit",
    "loss",
    "total",
    "cost",
    "expense",
    "income",
    "earnings",
];

/// Entities found in one piece of text.
///
/// Every list is duplicate-free and keeps first-seen order. A token classified
/// as currency, percentage or year never also appears in `numbers`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinancialEntitySet {
    #[serde(default)]
    pub numbers: Vec<String>,
    #[serde(default)]
    pub currency: Vec<String>,
    #[serde(default)]
    pub percentages: Vec<String>,
    #[serde(default)]
    pub financial_terms: Vec<String>,
    #[serde(default)]
    pub years: Vec<String>,
}

impl FinancialEntitySet {
    pub fn is_empty(&self) -> bool {
        self.numbers.is_empty()
            && self.currency.is_empty()
            && self.percentages.is_empty()
            && self.financial_terms.is_empty()
            && self.years.is_empty()
    }

    /// Total number of entities across all keys.
    pub fn len(&self) -> usize {
        self.numbers.len()
            + self.currency.len()
            + self.percentages.len()
            + self.financial_terms.len()
            + self.years.len()
    }

    /// Append every list of `other` onto the matching list of `self`.
    ///
    /// This is plain concatenation per key; keyword scoring compares sets, so
    /// repeated values do not inflate scores.
    pub fn extend(&mut self, other: FinancialEntitySet) {
        self.numbers.extend(other.numbers);
        self.currency.extend(other.currency);
        self.percentages.extend(other.percentages);
        self.financial_terms.extend(other.financial_terms);
        self.years.extend(other.years);
    }
}

/// Regex-based financial entity extractor.
pub struct EntityExtractor {
    currency: Regex,
    percentage: Regex,
    year: Regex,
    number: Regex,
    term: Regex,
}

impl EntityExtractor {
    pub fn new() -> Self {
        let terms = FINANCIAL_TERMS
            .iter()
            .map(|t| regex::escape(t))
            .collect::<Vec<_>>()
            .join("|");

        Self {
            currency: Regex::new(r"\$\s*\d+(?:,\d{3})*(?:\.\d+)?")
                .expect("currency pattern is valid"),
            percentage: Regex::new(r"-?\d+(?:\.\d+)?%").expect("percentage pattern is valid"),
            year: Regex::new(r"\b(?:19|20)\d{2}\b").expect("year pattern is valid"),
            number: Regex::new(r"-?\d+(?:,\d{3})*(?:\.\d+)?").expect("number pattern is valid"),
            term: Regex::new(&format!(r"\b(?:{terms})\b")).expect("term pattern is valid"),
        }
    }

    /// Extract all entity classes from `text`.
    pub fn extract(&self, text: &str) -> FinancialEntitySet {
        let mut entities = FinancialEntitySet::default();

        for m in self.currency.find_iter(text) {
            let cleaned: String = m
                .as_str()
                .chars()
                .filter(|c| *c != '$' && *c != ',' && !c.is_whitespace())
                .collect();
            push_unique(&mut entities.currency, cleaned);
        }

        for m in self.percentage.find_iter(text) {
            push_unique(&mut entities.percentages, m.as_str().replace('%', ""));
        }

        for m in self.year.find_iter(text) {
            push_unique(&mut entities.years, m.as_str().to_string());
        }

        for m in self.number.find_iter(text) {
            let cleaned = m.as_str().replace(',', "");
            let claimed = entities.currency.contains(&cleaned)
                || entities.years.contains(&cleaned)
                || entities.percentages.contains(&cleaned);
            if !claimed {
                push_unique(&mut entities.numbers, cleaned);
            }
        }

        let lowered = text.to_lowercase();
        for m in self.term.find_iter(&lowered) {
            push_unique(&mut entities.financial_terms, m.as_str().to_string());
        }

        entities
    }
}

impl Default for EntityExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Push `value` unless it is already present, preserving first-seen order.
pub(crate) fn push_unique(list: &mut Vec<String>, value: String) {
    if !list.contains(&value) {
        list.push(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_extract_currency_strips_symbols() {
        let e = EntityExtractor::new().extract("Revenue was $1,234.50 and then $ 99");
        assert_eq!(e.currency, vec!["1234.50", "99"]);
        assert!(e.numbers.is_empty());
    }

    #[test]
    fn test_extract_percentages_including_negative() {
        let e = EntityExtractor::new().extract("margin moved from 12.5% to -3%");
        assert_eq!(e.percentages, vec!["12.5", "-3"]);
        assert!(e.numbers.is_empty());
    }

    #[test]
    fn test_extract_years_full_token() {
        let e = EntityExtractor::new().extract("compare 2019 with 2023, not 1850 or 21000");
        assert_eq!(e.years, vec!["2019", "2023"]);
        assert_eq!(e.numbers, vec!["1850", "21000"]);
    }

    #[test]
    fn test_numbers_exclude_claimed_tokens() {
        let e = EntityExtractor::new()
            .extract("In 2022 sales were $5,000 (up 15%) across 1,200 stores and 7 regions");
        assert_eq!(e.currency, vec!["5000"]);
        assert_eq!(e.percentages, vec!["15"]);
        assert_eq!(e.years, vec!["2022"]);
        assert_eq!(e.numbers, vec!["1200", "7"]);
    }

    #[test]
    fn test_invariant_no_overlap_with_numbers() {
        let e = EntityExtractor::new().extract("$100 100 100% 2001 2001 -4.5% 4.5");
        for n in &e.numbers {
            assert!(!e.currency.contains(n));
            assert!(!e.percentages.contains(n));
            assert!(!e.years.contains(n));
        }
        assert_eq!(e.numbers, vec!["4.5"]);
    }

    #[test]
    fn test_lists_are_deduplicated_in_order() {
        let e = EntityExtractor::new().extract("42 and 17 and 42 again, 17%, 17%");
        assert_eq!(e.numbers, vec!["42"]);
        assert_eq!(e.percentages, vec!["17"]);
    }

    #[test]
    fn test_financial_terms_case_insensitive() {
        let e = EntityExtractor::new()
            .extract("Net Sales GROWTH offset the cost increase; growth continued");
        assert_eq!(e.financial_terms, vec!["net sales", "growth", "cost", "increase"]);
    }

    #[test]
    fn test_terms_require_word_boundaries() {
        let e = EntityExtractor::new().extract("totally costly incomes");
        assert!(e.financial_terms.is_empty());
    }

    #[test]
    fn test_empty_text() {
        let e = EntityExtractor::new().extract("");
        assert!(e.is_empty());
        assert_eq!(e.len(), 0);
    }

    #[test]
    fn test_extend_concatenates_per_key() {
        let ex = EntityExtractor::new();
        let mut a = ex.extract("revenue 15%");
        a.extend(ex.extract("revenue 15% 2022"));
        assert_eq!(a.percentages, vec!["15", "15"]);
        assert_eq!(a.financial_terms, vec!["revenue", "revenue"]);
        assert_eq!(a.years, vec!["2022"]);
    }

    #[test]
    fn test_entity_set_deserialize_missing_keys() {
        let e: FinancialEntitySet = serde_json::from_str(r#"{"numbers": ["5"]}"#).unwrap();
        assert_eq!(e.numbers, vec!["5"]);
        assert!(e.years.is_empty());
    }
}
