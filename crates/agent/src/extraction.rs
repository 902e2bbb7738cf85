use std::collections::BTreeMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;

use intake_core::config::AppConfig;
use intake_core::fields::{AVAILABILITY, BUDGET_RANGE, LOCATION, TIMELINE, URGENCY};
use intake_core::registry::FieldRegistry;

/// Turns free text into candidate field values. Candidates are raw strings; the engine's
/// field registry decides whether they are accepted.
#[async_trait]
pub trait FieldExtractor: Send + Sync {
    fn name(&self) -> &'static str;
    async fn extract(&self, text: &str, awaiting: &[String]) -> Result<BTreeMap<String, String>>;
}

const SAME_DAY: [&str; 5] = ["today", "tomorrow", "within 24", "within_24h", "24h"];
const ONE_WEEK: [&str; 4] = ["next week", "this week", "within 1 week", "within a week"];
const TWO_WEEKS: [&str; 3] = ["two weeks", "2 weeks", "within 2 weeks"];
const FLEXIBLE_WORDS: [&str; 4] = ["not urgent", "no rush", "flexible", "whenever"];
const URGENT_WORDS: [&str; 5] = ["urgent", "asap", "emergency", "immediately", "right now"];

/// Conservative regex prefill. Never guesses when a phrase is ambiguous.
#[derive(Clone, Debug)]
pub struct RuleExtractor {
    dollar_amount: Regex,
    have_budget: Regex,
    budget_after: Regex,
    budget_before: Regex,
    free_budget: Regex,
    day_count: Regex,
    known_locations: Vec<(Regex, String)>,
    registry: FieldRegistry,
}

impl RuleExtractor {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let known_locations = config
            .extraction
            .known_locations
            .iter()
            .filter(|location| !location.trim().is_empty())
            .map(|location| {
                let pattern = format!(r"(?i)\b{}\b", regex::escape(location.trim()));
                Regex::new(&pattern)
                    .with_context(|| format!("invalid known location `{location}`"))
                    .map(|regex| (regex, location.trim().to_string()))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            dollar_amount: Regex::new(r"\$\s*(\d{1,6}(?:\.\d{1,2})?)")?,
            have_budget: Regex::new(r"\bi have\s+(\d{2,6})\s+budget\b")?,
            budget_after: Regex::new(r"\bbudget\b\D{0,20}(\d{2,6})")?,
            budget_before: Regex::new(r"\b(\d{2,6})\b\D{0,20}\bbudget\b")?,
            free_budget: Regex::new(
                r"\b(?:free only|only free|for free|free of charge)\b|\bbudget\b\D{0,20}\b(?:free|zero|nothing)\b",
            )?,
            day_count: Regex::new(r"\b(\d+)\s*(?:days?|d)\b")?,
            known_locations,
            registry: FieldRegistry::from_config(config)?,
        })
    }

    pub fn extract_now(&self, text: &str, awaiting: &[String]) -> BTreeMap<String, String> {
        let trimmed = text.trim();
        let lowered = trimmed.to_lowercase();
        let mut out = BTreeMap::new();

        if let Some(timeline) = self.timeline(&lowered) {
            out.insert(TIMELINE.to_string(), timeline.to_string());
        }

        if let Some(budget) = self.budget(trimmed, &lowered) {
            out.insert(BUDGET_RANGE.to_string(), budget);
        }

        if let Some((_, location)) =
            self.known_locations.iter().find(|(pattern, _)| pattern.is_match(trimmed))
        {
            out.insert(LOCATION.to_string(), location.clone());
        }

        if FLEXIBLE_WORDS.iter().any(|word| lowered.contains(word)) {
            out.insert(URGENCY.to_string(), "flexible".to_string());
        } else if URGENT_WORDS.iter().any(|word| lowered.contains(word)) {
            out.insert(URGENCY.to_string(), "urgent".to_string());
        }

        if let Some(availability) = availability(&lowered) {
            out.insert(AVAILABILITY.to_string(), availability.to_string());
        }

        if out.is_empty() && !trimmed.is_empty() {
            if let Some(field) = self.answered_field(trimmed, awaiting) {
                out.insert(field.to_string(), trimmed.to_string());
            }
        }

        out
    }

    /// First awaited field that accepts the answer. Falls back to the first awaited field so
    /// an unusable answer is still rejected and re-prompted.
    fn answered_field<'a>(&self, answer: &str, awaiting: &'a [String]) -> Option<&'a str> {
        awaiting
            .iter()
            .find(|field| self.registry.validate(field, answer).is_ok())
            .or_else(|| awaiting.first())
            .map(String::as_str)
    }

    fn timeline(&self, lowered: &str) -> Option<&'static str> {
        if SAME_DAY.iter().any(|phrase| lowered.contains(phrase)) {
            return Some("within_24h");
        }
        if ONE_WEEK.iter().any(|phrase| lowered.contains(phrase)) {
            return Some("within_1_week");
        }
        if TWO_WEEKS.iter().any(|phrase| lowered.contains(phrase)) {
            return Some("within_2_weeks");
        }

        let days: u32 = self.day_count.captures(lowered)?.get(1)?.as_str().parse().ok()?;
        match days {
            0..=1 => Some("within_24h"),
            2..=7 => Some("within_1_week"),
            8..=14 => Some("within_2_weeks"),
            _ => None,
        }
    }

    fn budget(&self, text: &str, lowered: &str) -> Option<String> {
        let captured = self
            .dollar_amount
            .captures(text)
            .or_else(|| self.have_budget.captures(lowered))
            .or_else(|| self.budget_after.captures(lowered))
            .or_else(|| self.budget_before.captures(lowered));
        if let Some(amount) = captured.and_then(|captured| captured.get(1)) {
            return Some(amount.as_str().to_string());
        }

        self.free_budget.is_match(lowered).then(|| "free only".to_string())
    }
}

fn availability(lowered: &str) -> Option<&'static str> {
    if lowered.contains("any time") || lowered.contains("anytime") {
        Some("anytime")
    } else if lowered.contains("weekend") {
        Some("weekends")
    } else if lowered.contains("weekday") {
        Some("weekdays")
    } else {
        None
    }
}

#[async_trait]
impl FieldExtractor for RuleExtractor {
    fn name(&self) -> &'static str {
        "rule"
    }

    async fn extract(&self, text: &str, awaiting: &[String]) -> Result<BTreeMap<String, String>> {
        Ok(self.extract_now(text, awaiting))
    }
}

#[cfg(test)]
mod tests {
    use intake_core::config::AppConfig;

    use super::{FieldExtractor, RuleExtractor};

    fn extractor() -> RuleExtractor {
        let mut config = AppConfig::default();
        config.extraction.known_locations = vec!["Toronto".to_string(), "New York".to_string()];
        RuleExtractor::from_config(&config).expect("extractor")
    }

    #[test]
    fn prefills_timeline_budget_urgency_and_location() {
        let out = extractor().extract_now("Burst pipe in toronto, urgent! Budget around 400, need it today", &[]);
        assert_eq!(out.get("timeline").map(String::as_str), Some("within_24h"));
        assert_eq!(out.get("budget_range").map(String::as_str), Some("400"));
        assert_eq!(out.get("urgency").map(String::as_str), Some("urgent"));
        assert_eq!(out.get("location").map(String::as_str), Some("Toronto"));
    }

    #[test]
    fn negated_urgency_reads_as_flexible() {
        let out = extractor().extract_now("it's not urgent, whenever works", &[]);
        assert_eq!(out.get("urgency").map(String::as_str), Some("flexible"));
    }

    #[test]
    fn day_counts_are_bucketed() {
        let extractor = extractor();
        let bucket = |text: &str| extractor.extract_now(text, &[]).get("timeline").cloned();
        assert_eq!(bucket("in 1 day"), Some("within_24h".to_string()));
        assert_eq!(bucket("within 6 days"), Some("within_1_week".to_string()));
        assert_eq!(bucket("in 10 days please"), Some("within_2_weeks".to_string()));
        assert_eq!(bucket("in 30 days"), None);
    }

    #[test]
    fn budget_patterns_and_free() {
        let extractor = extractor();
        let budget = |text: &str| extractor.extract_now(text, &[]).get("budget_range").cloned();
        assert_eq!(budget("I can pay $ 120"), Some("120".to_string()));
        assert_eq!(budget("i have 300 budget"), Some("300".to_string()));
        assert_eq!(budget("250 is my budget"), Some("250".to_string()));
        assert_eq!(budget("we were hoping to get it done for free"), Some("free only".to_string()));
        assert_eq!(budget("budget: free"), Some("free only".to_string()));
        assert_eq!(budget("room 12 on floor 3"), None);
    }

    #[test]
    fn free_outside_budget_phrasing_is_not_a_budget() {
        let extractor = extractor();
        let budget = |text: &str| extractor.extract_now(text, &[]).get("budget_range").cloned();
        assert_eq!(budget("I'm free on weekends"), None);
        assert_eq!(budget("can I get a free estimate"), None);
        assert_eq!(budget("call the toll free line"), None);

        let out = extractor.extract_now("my budget is 300, I'm free on weekends", &[]);
        assert_eq!(out.get("budget_range").map(String::as_str), Some("300"));
        assert_eq!(out.get("availability").map(String::as_str), Some("weekends"));
    }

    #[test]
    fn bare_answer_goes_to_first_awaited_field_that_accepts_it() {
        let awaiting =
            vec!["urgency".to_string(), "timeline".to_string(), "location".to_string()];
        let out = extractor().extract_now("Hamilton", &awaiting);
        assert_eq!(out.len(), 1);
        assert_eq!(out.get("location").map(String::as_str), Some("Hamilton"));

        let nothing = extractor().extract_now("   ", &awaiting);
        assert!(nothing.is_empty());
    }

    #[test]
    fn unusable_bare_answer_stays_with_first_awaited_field() {
        let awaiting = vec!["urgency".to_string(), "timeline".to_string()];
        let out = extractor().extract_now("someday", &awaiting);
        assert_eq!(out.get("urgency").map(String::as_str), Some("someday"));
    }

    #[test]
    fn location_match_needs_word_boundaries() {
        let out = extractor().extract_now("new yorker magazine delivery", &[]);
        assert!(out.get("location").is_none());
        let out = extractor().extract_now("office in new york", &[]);
        assert_eq!(out.get("location").map(String::as_str), Some("New York"));
    }

    #[tokio::test]
    async fn async_extract_matches_sync_rules() {
        let extractor = extractor();
        let sync = extractor.extract_now("weekends only, next week", &[]);
        let async_result = extractor.extract("weekends only, next week", &[]).await.expect("extract");
        assert_eq!(sync, async_result);
        assert_eq!(async_result.get("availability").map(String::as_str), Some("weekends"));
        assert_eq!(extractor.name(), "rule");
    }
}
