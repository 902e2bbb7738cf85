use serde::{Deserialize, Serialize};

use crate::config::{AppConfig, ClassifierConfig, KeywordSet};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentCategory {
    ServiceRequest,
    GeneralQuestion,
    Unknown,
}

impl IntentCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ServiceRequest => "service_request",
            Self::GeneralQuestion => "general_question",
            Self::Unknown => "unknown",
        }
    }
}

/// Which rule produced a classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationRule {
    InformationalMarker,
    ServiceKeyword,
    Uninformative,
    NoMatch,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub intent: IntentCategory,
    pub rule: ClassificationRule,
    pub matched_term: Option<String>,
}

#[derive(Clone, Debug)]
pub struct IntentClassifier {
    keywords: ClassifierConfig,
    default_language: String,
}

impl IntentClassifier {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            keywords: config.classifier.clone(),
            default_language: config.engine.default_language.clone(),
        }
    }

    pub fn classify(&self, utterance: &str, locale: &str) -> IntentCategory {
        self.evaluate(utterance, locale).intent
    }

    pub fn evaluate(&self, utterance: &str, locale: &str) -> Classification {
        let Some(keywords) = self.keywords_for(locale) else {
            return Classification {
                intent: IntentCategory::Unknown,
                rule: ClassificationRule::NoMatch,
                matched_term: None,
            };
        };

        let lowered = utterance.trim().to_lowercase();
        let tokens = tokenize(&lowered);
        let padded = format!(" {} ", tokens.join(" "));

        let marker = keywords
            .informational_markers
            .iter()
            .find(|marker| term_matches(marker, &lowered, &padded));
        let service =
            keywords.service_keywords.iter().find(|keyword| term_matches(keyword, &lowered, &padded));

        if let (Some(marker), None) = (marker, service) {
            return Classification {
                intent: IntentCategory::GeneralQuestion,
                rule: ClassificationRule::InformationalMarker,
                matched_term: Some(marker.clone()),
            };
        }

        if let Some(keyword) = service {
            return Classification {
                intent: IntentCategory::ServiceRequest,
                rule: ClassificationRule::ServiceKeyword,
                matched_term: Some(keyword.clone()),
            };
        }

        let greeting_words: Vec<String> = keywords
            .greetings
            .iter()
            .flat_map(|greeting| tokenize(&greeting.to_lowercase()))
            .collect();
        let informative = tokens.iter().filter(|token| !greeting_words.contains(token)).count();
        if informative < keywords.min_informative_tokens {
            return Classification {
                intent: IntentCategory::Unknown,
                rule: ClassificationRule::Uninformative,
                matched_term: None,
            };
        }

        Classification { intent: IntentCategory::Unknown, rule: ClassificationRule::NoMatch, matched_term: None }
    }

    fn keywords_for(&self, locale: &str) -> Option<&KeywordSet> {
        self.keywords.keywords_for(locale, &self.default_language)
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|ch: char| !ch.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Word-start phrase match. Terms without alphanumerics (`?`) match the raw text.
fn term_matches(term: &str, lowered: &str, padded: &str) -> bool {
    let term_tokens = tokenize(&term.to_lowercase());
    if term_tokens.is_empty() {
        let raw = term.trim();
        return !raw.is_empty() && lowered.contains(raw);
    }
    padded.contains(&format!(" {}", term_tokens.join(" ")))
}
