//! Query Router
//!
//! Classifies raw query text into one or more intents. Each intent carries
//! the keyword evidence that triggered it. Classification never fails:
//! text that matches nothing falls back to `statistics_request` and is
//! flagged ambiguous.

use crate::conductor::context::ConversationState;
use crate::conductor::extract::{Evidence, FactExtractor, QueryFacts};
use crate::conductor::types::Intent;
use crate::config::RouterConfig;
use regex::Regex;
use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// One detected intent and why
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetectedIntent {
    pub intent: Intent,
    pub evidence: Vec<Evidence>,
}

impl DetectedIntent {
    fn first_offset(&self) -> usize {
        self.evidence.iter().map(|e| e.start).min().unwrap_or(0)
    }
}

/// Router output for one query
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Classification {
    pub raw_text: String,
    /// Never empty; ordered by first evidence offset
    pub intents: Vec<DetectedIntent>,
    pub facts: QueryFacts,
    /// Nothing matched and the fallback intent was used
    pub ambiguous: bool,
}

impl Classification {
    pub fn is_compound(&self) -> bool {
        self.intents.len() > 1
    }

    /// The single intent, or `Compound` when several were detected
    pub fn primary(&self) -> Intent {
        match self.intents.as_slice() {
            [single] => single.intent,
            _ => Intent::Compound,
        }
    }

    pub fn intent_list(&self) -> Vec<Intent> {
        self.intents.iter().map(|d| d.intent).collect()
    }

    pub fn has(&self, intent: Intent) -> bool {
        self.intents.iter().any(|d| d.intent == intent)
    }

    pub fn evidence_for(&self, intent: Intent) -> &[Evidence] {
        self.intents
            .iter()
            .find(|d| d.intent == intent)
            .map(|d| d.evidence.as_slice())
            .unwrap_or(&[])
    }
}

/// Keyword tables, one pattern per intent
pub struct QueryRouter {
    extractor: FactExtractor,
    keywords: Vec<(Intent, Regex)>,
}

fn keyword_pattern(words: &[&str]) -> Result<Regex, EngineError> {
    let alternation = words.join("|");
    Regex::new(&format!(r"\b(?:{})\b", alternation))
        .map_err(|e| EngineError::Config(format!("Invalid router keyword table: {}", e)))
}

impl QueryRouter {
    pub fn new(config: &RouterConfig) -> Result<Self, EngineError> {
        let keywords = vec![
            (
                Intent::StructuredFilter,
                keyword_pattern(&[
                    "find",
                    "search",
                    "show me",
                    "list",
                    "properties",
                    "property",
                    "houses",
                    "homes",
                    "apartments",
                    "flats",
                    "villas",
                    "listings",
                ])?,
            ),
            (
                Intent::SemanticSearch,
                keyword_pattern(&[
                    "similar",
                    "like this",
                    "comparable",
                    "alternatives",
                    "featuring",
                    r"with a \w+ view",
                    "with a view",
                    "near",
                    "close to",
                    "modern",
                    "spacious",
                    "cozy",
                    "quiet",
                    "garden",
                    "pool",
                    "luxurious",
                    "furnished",
                ])?,
            ),
            (
                Intent::RenovationEstimate,
                keyword_pattern(&[r"renovat\w*", "remodel\\w*", "refurbish\\w*", "estimate"])?,
            ),
            (
                Intent::ReportRequest,
                keyword_pattern(&["report", "pdf", "export", "document", "write-up", "writeup"])?,
            ),
            (
                Intent::StatisticsRequest,
                keyword_pattern(&[
                    "statistics",
                    "stats",
                    "how many",
                    "average price",
                    "avg price",
                    "distribution",
                    "overview",
                    "total",
                    "market summary",
                ])?,
            ),
        ];

        Ok(Self {
            extractor: FactExtractor::new(&config.known_locations)?,
            keywords,
        })
    }

    /// Classify a query against an immutable conversation snapshot
    pub fn classify(&self, raw_text: &str, state: &ConversationState) -> Classification {
        let lower = raw_text.to_ascii_lowercase();
        let mut facts = self.extractor.extract(raw_text);

        let mut intents: Vec<DetectedIntent> = Vec::new();
        for (intent, pattern) in &self.keywords {
            let mut evidence: Vec<Evidence> = pattern
                .find_iter(&lower)
                .map(|m| Evidence {
                    keyword: raw_text.get(m.start()..m.end()).unwrap_or_default().to_string(),
                    start: m.start(),
                    end: m.end(),
                })
                .collect();

            if *intent == Intent::StructuredFilter {
                evidence.extend(facts.filter_evidence.iter().cloned());
                evidence.sort_by_key(|e| e.start);
                evidence.dedup_by(|a, b| a.start == b.start && a.end == b.end);
            }

            if !evidence.is_empty() {
                intents.push(DetectedIntent {
                    intent: *intent,
                    evidence,
                });
            }
        }

        // A named seed property drives the similarity search; the words around
        // it ("homes", "property") are not a structured filter on their own
        if facts.seed_property_id.is_some() {
            if !facts.has_filter_facts() {
                intents.retain(|d| d.intent != Intent::StructuredFilter);
            }
            if !intents.iter().any(|d| d.intent == Intent::SemanticSearch) {
                if let Some(evidence) = seed_evidence(raw_text, &lower) {
                    intents.push(DetectedIntent {
                        intent: Intent::SemanticSearch,
                        evidence: vec![evidence],
                    });
                }
            }
        }

        // Tier words describe a renovation only when one was asked for
        if !intents.iter().any(|d| d.intent == Intent::RenovationEstimate) {
            facts.tier = None;
            facts.compare_tiers = false;
        }

        // A bare reference to an earlier search reruns it as a filter
        if intents.is_empty() && facts.referential && state.has_prior_search() {
            let evidence = referential_evidence(raw_text, &lower);
            intents.push(DetectedIntent {
                intent: Intent::StructuredFilter,
                evidence,
            });
        }

        let ambiguous = intents.is_empty();
        if ambiguous {
            warn!(
                "{}",
                EngineError::ClassificationAmbiguous(raw_text.to_string())
            );
            intents.push(DetectedIntent {
                intent: Intent::StatisticsRequest,
                evidence: vec![Evidence {
                    keyword: "fallback".to_string(),
                    start: 0,
                    end: 0,
                }],
            });
        }

        intents.sort_by_key(DetectedIntent::first_offset);

        debug!(
            "Classified '{}' as [{}]{}",
            raw_text,
            intents
                .iter()
                .map(|d| d.intent.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            if ambiguous { " (fallback)" } else { "" }
        );

        Classification {
            raw_text: raw_text.to_string(),
            intents,
            facts,
            ambiguous,
        }
    }
}

fn seed_evidence(raw: &str, lower: &str) -> Option<Evidence> {
    ["like", "similar", "comparable", "alternatives"]
        .iter()
        .filter_map(|word| lower.find(word).map(|start| (start, start + word.len())))
        .min()
        .map(|(start, end)| Evidence {
            keyword: raw.get(start..end).unwrap_or_default().to_string(),
            start,
            end,
        })
}

fn referential_evidence(raw: &str, lower: &str) -> Vec<Evidence> {
    ["those", "these", "them", "last", "previous", "same"]
        .iter()
        .filter_map(|word| lower.find(word).map(|start| (start, start + word.len())))
        .min()
        .map(|(start, end)| {
            vec![Evidence {
                keyword: raw.get(start..end).unwrap_or_default().to_string(),
                start,
                end,
            }]
        })
        .unwrap_or_default()
}
