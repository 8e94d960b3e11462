//! Query Fact Extraction
//!
//! Pulls filter facts (locations, price and size bounds, bedrooms, property
//! type, status), renovation tier, report type and the referential flag out of
//! raw query text. Every filter fact keeps the byte span it came from so the
//! router can cite it as evidence and the planner can strip it from the
//! semantic fragment.
//!
//! Comparator language decides bound strictness: "under"/"over" give an
//! exclusive bound on that side, "up to"/"at least" and "between" are
//! inclusive.

use regex::Regex;
use sdk::errors::EngineError;
use sdk::types::{FilterDescriptor, NumericRange, RenovationTier, ReportType};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const CURRENCY: &str = r"(?:rs\.?\s*|inr\s*|₹\s*|\$\s*)?";
const AMOUNT: &str = r"(\d[\d,]*(?:\.\d+)?)(?:\s*(k|lakhs?|lacs?|crores?|cr|millions?|mn|m))?\b";
const SIZE_UNIT: &str = r"(?:sq\.?\s*ft\.?|sqft|square\s+f(?:ee|oo)t|sq\.?\s*feet)";
const BED_UNIT: &str = r"(?:bhk|bed(?:room)?s?|br)\b";

/// Piece of query text that triggered a decision
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Evidence {
    pub keyword: String,
    /// Byte offsets into the raw text
    pub start: usize,
    pub end: usize,
}

impl Evidence {
    fn new(raw: &str, start: usize, end: usize) -> Self {
        Self {
            keyword: raw.get(start..end).unwrap_or_default().trim().to_string(),
            start,
            end,
        }
    }

    fn overlaps(&self, start: usize, end: usize) -> bool {
        self.start < end && start < self.end
    }
}

/// Location mention
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocationFact {
    pub name: String,
    pub evidence: Evidence,
}

/// Facts extracted from one query
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueryFacts {
    /// Distinct locations in text order
    pub locations: Vec<LocationFact>,
    pub price: Option<NumericRange>,
    pub bedrooms: Option<NumericRange>,
    /// Size given as a plain figure ("1500 sq ft")
    pub square_feet: Option<f64>,
    /// Size given with comparator language ("over 2000 sq ft")
    pub square_feet_range: Option<NumericRange>,
    pub property_type: Option<String>,
    pub status: Option<String>,
    pub tier: Option<RenovationTier>,
    /// Estimate every tier side by side ("compare renovation tiers")
    #[serde(default)]
    pub compare_tiers: bool,
    pub report_type: Option<ReportType>,
    /// Property named as the anchor of a similarity search ("similar to property h2")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed_property_id: Option<String>,
    /// Query points back at an earlier result ("those properties")
    pub referential: bool,
    /// Spans of every filter fact above
    pub filter_evidence: Vec<Evidence>,
}

impl QueryFacts {
    pub fn has_filter_facts(&self) -> bool {
        !self.filter_evidence.is_empty()
    }

    /// Filter for all extracted constraints, optionally pinned to one location
    pub fn filter(&self, location: Option<&str>) -> FilterDescriptor {
        FilterDescriptor {
            location: location
                .map(String::from)
                .or_else(|| self.locations.first().map(|l| l.name.clone())),
            price: self.price,
            bedrooms: self.bedrooms,
            square_feet: self.square_feet_range,
            property_type: self.property_type.clone(),
            status: self.status.clone(),
            property_ids: None,
            limit: None,
        }
    }
}

/// Compiled extraction patterns
pub struct FactExtractor {
    known_locations: Option<Regex>,
    canonical_names: HashMap<String, String>,
    generic_location: Regex,
    comparator: Regex,
    between: Regex,
    bedrooms: Regex,
    square_feet: Regex,
    property_type: Regex,
    status: Regex,
    tier: Regex,
    tier_comparison: Regex,
    report_type: Regex,
    referential: Regex,
    seed_property: Regex,
}

fn compile(pattern: &str) -> Result<Regex, EngineError> {
    Regex::new(pattern).map_err(|e| EngineError::Config(format!("Invalid pattern: {}", e)))
}

impl FactExtractor {
    pub fn new(known_locations: &[String]) -> Result<Self, EngineError> {
        let names: Vec<&String> = known_locations
            .iter()
            .filter(|n| !n.trim().is_empty())
            .collect();

        let known = if names.is_empty() {
            None
        } else {
            let alternation = names
                .iter()
                .map(|n| regex::escape(&n.trim().to_ascii_lowercase()))
                .collect::<Vec<_>>()
                .join("|");
            Some(compile(&format!(r"\b(?:{})\b", alternation))?)
        };
        let canonical_names = names
            .iter()
            .map(|n| (n.trim().to_ascii_lowercase(), n.trim().to_string()))
            .collect();

        Ok(Self {
            known_locations: known,
            canonical_names,
            generic_location: compile(r"\bin\s+([A-Z][a-zA-Z]+(?:\s+[A-Z][a-zA-Z]+)*)")?,
            comparator: compile(&format!(
                r"\b(under|below|less than|cheaper than|within|over|above|more than|greater than|up to|upto|at most|maximum|max|at least|minimum|min|from|starting at)\s+{CURRENCY}{AMOUNT}(\s*{SIZE_UNIT}|\s*{BED_UNIT})?"
            ))?,
            between: compile(&format!(
                r"\b(?:between|from)\s+{CURRENCY}{AMOUNT}\s*(?:and|to|-)\s*{CURRENCY}{AMOUNT}(\s*{SIZE_UNIT}|\s*{BED_UNIT})?"
            ))?,
            bedrooms: compile(
                r"\b(\d+)\s*(\+)?\s*(?:bhk|bed(?:room)?s?|br)\b(\s*(?:or|and)\s+(?:more|above))?",
            )?,
            square_feet: compile(&format!(r"\b(\d[\d,]*(?:\.\d+)?)\s*{SIZE_UNIT}"))?,
            property_type: compile(
                r"\b(townhouses?|penthouses?|apartments?|flats?|villas?|houses?|plots?|studios?|condos?)\b",
            )?,
            status: compile(r"\b(for sale|available|active|sold|pending)\b")?,
            tier: compile(
                r"\b(basic|budget|moderate|standard|mid[- ]range|high[- ]?end|premium|luxury)\b",
            )?,
            tier_comparison: compile(
                r"\b(?:(?:all|every|each|across(?:\s+all)?(?:\s+the)?|compare|comparing)\s+(?:renovation\s+)?(?:tiers?|types|levels|options)|tier comparison|side[- ]by[- ]side)\b",
            )?,
            report_type: compile(
                r"\b(compar\w*|versus|vs|detailed|in[- ]depth|full|summary|summari[sz]e|brief)\b",
            )?,
            referential: compile(
                r"\b(those|these|them|same properties|(?:the\s+)?(?:last|previous|earlier)\s+(?:search|results?|properties|listings))\b",
            )?,
            // Ids must carry a digit so "similar to property in Pune" is not a seed
            seed_property: compile(
                r"(?i)\b(?:similar\s+to|like|comparable\s+to|alternatives\s+to)\s+(?:the\s+)?(?:property|listing)\s+(?:id\s+)?#?([a-z0-9_-]*\d[a-z0-9_-]*)\b",
            )?,
        })
    }

    /// Extract every fact from `raw`
    pub fn extract(&self, raw: &str) -> QueryFacts {
        // ASCII lowering keeps byte offsets aligned with `raw`
        let lower = raw.to_ascii_lowercase();
        let mut facts = QueryFacts::default();

        self.extract_locations(raw, &lower, &mut facts);
        let bound_spans = self.extract_bounds(raw, &lower, &mut facts);
        self.extract_bedrooms(raw, &lower, &bound_spans, &mut facts);
        self.extract_square_feet(&lower, &bound_spans, &mut facts);

        if let Some(m) = self.property_type.captures(&lower).and_then(|c| c.get(1)) {
            facts.property_type = Some(canonical_property_type(m.as_str()).to_string());
            facts
                .filter_evidence
                .push(Evidence::new(raw, m.start(), m.end()));
        }

        if let Some(m) = self.status.captures(&lower).and_then(|c| c.get(1)) {
            let status = match m.as_str() {
                "sold" => "Sold",
                "pending" => "Pending",
                _ => "Active",
            };
            facts.status = Some(status.to_string());
            facts
                .filter_evidence
                .push(Evidence::new(raw, m.start(), m.end()));
        }

        facts.tier = self
            .tier
            .captures(&lower)
            .and_then(|c| c.get(1))
            .map(|m| canonical_tier(m.as_str()));

        facts.compare_tiers = self.tier_comparison.is_match(&lower);

        facts.report_type = self
            .report_type
            .captures(&lower)
            .and_then(|c| c.get(1))
            .map(|m| canonical_report_type(m.as_str()));

        facts.referential = self.referential.is_match(&lower);
        facts.seed_property_id = self
            .seed_property
            .captures(raw)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string());
        facts.filter_evidence.sort_by_key(|e| e.start);

        facts
    }

    fn extract_locations(&self, raw: &str, lower: &str, facts: &mut QueryFacts) {
        if let Some(known) = &self.known_locations {
            for m in known.find_iter(lower) {
                let name = self
                    .canonical_names
                    .get(m.as_str())
                    .cloned()
                    .unwrap_or_else(|| title_case(m.as_str()));
                push_location(facts, name, Evidence::new(raw, m.start(), m.end()));
            }
        }

        if facts.locations.is_empty() {
            for caps in self.generic_location.captures_iter(raw) {
                let Some(m) = caps.get(1) else { continue };
                let name = m.as_str().trim();
                if is_stop_word(name) {
                    continue;
                }
                push_location(facts, name.to_string(), Evidence::new(raw, m.start(), m.end()));
            }
        }

        for location in &facts.locations {
            facts.filter_evidence.push(location.evidence.clone());
        }
    }

    /// Comparator and range bounds; returns the consumed spans
    fn extract_bounds(&self, raw: &str, lower: &str, facts: &mut QueryFacts) -> Vec<Evidence> {
        let mut consumed: Vec<Evidence> = Vec::new();

        for caps in self.between.captures_iter(lower) {
            let (Some(whole), Some(lo)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let Some(hi) = caps.get(3) else { continue };
            let hi_unit = caps.get(4).map(|u| u.as_str());
            let lo_unit = caps.get(2).map(|u| u.as_str()).or(hi_unit);
            let (Some(lo), Some(hi)) = (parse_amount(lo.as_str(), lo_unit), parse_amount(hi.as_str(), hi_unit))
            else {
                continue;
            };
            let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
            let range = NumericRange::between(lo, hi);
            let suffix = caps.get(5).map(|s| s.as_str());
            assign_bound(facts, suffix, range);

            let evidence = Evidence::new(raw, whole.start(), whole.end());
            consumed.push(evidence.clone());
            facts.filter_evidence.push(evidence);
        }

        for caps in self.comparator.captures_iter(lower) {
            let (Some(whole), Some(op), Some(number)) = (caps.get(0), caps.get(1), caps.get(2))
            else {
                continue;
            };
            if consumed.iter().any(|e| e.overlaps(whole.start(), whole.end())) {
                continue;
            }
            let suffix = caps.get(4).map(|s| s.as_str());
            let unit = caps.get(3).map(|u| u.as_str());
            // Sizes and bedroom counts never carry currency multipliers
            let value = if suffix.is_some() {
                parse_amount(number.as_str(), None)
            } else {
                parse_amount(number.as_str(), unit)
            };
            let Some(value) = value else { continue };

            let range = match op.as_str() {
                "under" | "below" | "less than" | "cheaper than" => NumericRange::below(value),
                "over" | "above" | "more than" | "greater than" => NumericRange::above(value),
                "up to" | "upto" | "at most" | "maximum" | "max" | "within" => {
                    NumericRange::at_most(value)
                }
                _ => NumericRange::at_least(value),
            };
            assign_bound(facts, suffix, range);

            let evidence = Evidence::new(raw, whole.start(), whole.end());
            consumed.push(evidence.clone());
            facts.filter_evidence.push(evidence);
        }

        consumed
    }

    fn extract_bedrooms(
        &self,
        raw: &str,
        lower: &str,
        consumed: &[Evidence],
        facts: &mut QueryFacts,
    ) {
        for caps in self.bedrooms.captures_iter(lower) {
            let (Some(whole), Some(count)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            if consumed.iter().any(|e| e.overlaps(whole.start(), whole.end())) {
                continue;
            }
            let Ok(count) = count.as_str().parse::<u32>() else {
                continue;
            };
            let open_ended = caps.get(2).is_some() || caps.get(3).is_some();
            let range = if open_ended {
                NumericRange::at_least(f64::from(count))
            } else {
                NumericRange::exactly(f64::from(count))
            };
            facts.bedrooms = Some(match facts.bedrooms {
                Some(existing) => existing.intersect(range),
                None => range,
            });
            facts
                .filter_evidence
                .push(Evidence::new(raw, whole.start(), whole.end()));
            break;
        }
    }

    fn extract_square_feet(&self, lower: &str, consumed: &[Evidence], facts: &mut QueryFacts) {
        for caps in self.square_feet.captures_iter(lower) {
            let (Some(whole), Some(number)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            if consumed.iter().any(|e| e.overlaps(whole.start(), whole.end())) {
                continue;
            }
            if let Some(value) = parse_amount(number.as_str(), None).filter(|v| *v > 0.0) {
                facts.square_feet = Some(value);
                break;
            }
        }
    }
}

fn push_location(facts: &mut QueryFacts, name: String, evidence: Evidence) {
    if facts
        .locations
        .iter()
        .any(|l| l.name.eq_ignore_ascii_case(&name))
    {
        return;
    }
    facts.locations.push(LocationFact { name, evidence });
}

/// Route a bound to price, size or bedrooms depending on the unit after it
fn assign_bound(facts: &mut QueryFacts, suffix: Option<&str>, range: NumericRange) {
    let slot = match suffix.map(|s| s.trim_start()) {
        Some(s) if s.starts_with("sq") || s.starts_with("square") => &mut facts.square_feet_range,
        Some(_) => &mut facts.bedrooms,
        None => &mut facts.price,
    };
    *slot = Some(match *slot {
        Some(existing) => existing.intersect(range),
        None => range,
    });
}

/// Parse "25,000,000" or "1.2" with an optional Indian or western multiplier
pub fn parse_amount(number: &str, unit: Option<&str>) -> Option<f64> {
    let value: f64 = number.replace(',', "").parse().ok()?;
    let multiplier = match unit.map(|u| u.trim()) {
        None | Some("") => 1.0,
        Some("k") => 1e3,
        Some(u) if u.starts_with("lakh") || u.starts_with("lac") => 1e5,
        Some(u) if u.starts_with("crore") || u == "cr" => 1e7,
        Some(u) if u.starts_with("million") || u == "mn" || u == "m" => 1e6,
        Some(_) => 1.0,
    };
    Some(value * multiplier)
}

fn canonical_property_type(word: &str) -> &'static str {
    let singular = word.trim_end_matches('s');
    match singular {
        "apartment" | "flat" => "Apartment",
        "villa" => "Villa",
        "house" => "House",
        "townhouse" => "Townhouse",
        "penthouse" => "Penthouse",
        "plot" => "Plot",
        "studio" => "Studio",
        _ => "Condo",
    }
}

fn canonical_tier(word: &str) -> RenovationTier {
    match word {
        "basic" | "budget" => RenovationTier::Basic,
        "luxury" => RenovationTier::Luxury,
        "premium" => RenovationTier::HighEnd,
        w if w.starts_with("high") => RenovationTier::HighEnd,
        _ => RenovationTier::Moderate,
    }
}

fn canonical_report_type(word: &str) -> ReportType {
    if word.starts_with("compar") || word == "versus" || word == "vs" {
        ReportType::Comparison
    } else if word == "detailed" || word == "full" || word.starts_with("in") {
        ReportType::Detailed
    } else {
        ReportType::Summary
    }
}

fn is_stop_word(name: &str) -> bool {
    const STOP: [&str; 10] = [
        "The", "A", "An", "My", "Our", "This", "That", "Those", "These", "PDF",
    ];
    let first = name.split_whitespace().next().unwrap_or_default();
    STOP.contains(&first)
}

fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(c) => c.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
