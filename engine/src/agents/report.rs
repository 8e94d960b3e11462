//! Report Agent
//!
//! Assembles a `ReportDescriptor` from the outputs of earlier tasks (or the
//! conversation's last results). Rendering to a document format is left to a
//! `ReportRenderer` collaborator; this agent only decides the sections.
//!
//! - `summary`: overview narrative, key figures, price histogram and top
//!   locations
//! - `detailed`: summary sections plus a property table and the estimate
//! - `comparison`: one row per location, an average price bar chart and the
//!   compared properties
//!
//! A tier comparison among the sources adds a renovation tiers table to
//! detailed and comparison reports.

use crate::agents::statistics::summarize;
use crate::agents::{call_collaborator, Agent, CallPolicy};
use crate::conductor::planner::params;
use crate::conductor::types::AgentTarget;
use async_trait::async_trait;
use sdk::collaborators::RelationalStore;
use sdk::errors::EngineError;
use sdk::types::{
    AgentInput, AgentOutput, CostCategory, PropertyRecord, PropertyStatistics, RenovationEstimate,
    ReportDescriptor, ReportSection, ReportType, SearchResult, SectionKind, TierComparison,
};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::debug;

const TOP_LOCATIONS: usize = 10;
const COMPARED_PROPERTIES: usize = 10;

/// Decoded report inputs
#[derive(Debug, Default)]
struct Sources {
    searches: Vec<SearchResult>,
    estimates: Vec<RenovationEstimate>,
    tier_comparisons: Vec<TierComparison>,
    statistics: Vec<PropertyStatistics>,
}

impl Sources {
    fn decode(input: &AgentInput) -> Result<Self, EngineError> {
        let mut sources = Sources::default();
        for (_, value) in input.with_prefix(params::SOURCE_PREFIX) {
            match serde_json::from_value::<AgentOutput>(value.clone())? {
                AgentOutput::Search(s) => sources.searches.push(s),
                AgentOutput::Estimate(e) => sources.estimates.push(e),
                AgentOutput::TierComparison(c) => sources.tier_comparisons.push(c),
                AgentOutput::Statistics(s) => sources.statistics.push(s),
                // Reports are never fed into reports
                AgentOutput::Report(_) => {}
            }
        }
        Ok(sources)
    }

    fn is_empty(&self) -> bool {
        self.searches.is_empty()
            && self.estimates.is_empty()
            && self.tier_comparisons.is_empty()
            && self.statistics.is_empty()
    }

    /// Property ids across all searches, first occurrence wins
    fn property_ids(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.searches
            .iter()
            .flat_map(|s| s.results())
            .filter(|r| seen.insert(r.property_id.clone()))
            .map(|r| r.property_id.clone())
            .collect()
    }
}

pub struct ReportAgent {
    store: Arc<dyn RelationalStore>,
    policy: CallPolicy,
}

impl ReportAgent {
    pub fn new(store: Arc<dyn RelationalStore>, policy: CallPolicy) -> Self {
        Self { store, policy }
    }
}

#[async_trait]
impl Agent for ReportAgent {
    fn target(&self) -> AgentTarget {
        AgentTarget::Report
    }

    async fn run(&self, input: AgentInput) -> Result<AgentOutput, EngineError> {
        let sources = Sources::decode(&input)?;
        if sources.is_empty() {
            return Err(EngineError::missing("sources"));
        }

        let report_type = input
            .param_str_opt(params::REPORT_TYPE)
            .and_then(|t| ReportType::parse(&t))
            .unwrap_or_default();
        let locations: Vec<String> = input
            .params
            .get(params::LOCATIONS)
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .unwrap_or_default();

        let ids = sources.property_ids();
        let records = if ids.is_empty() {
            Vec::new()
        } else {
            let store = &self.store;
            call_collaborator(store.name(), self.policy, || store.fetch(&ids)).await?
        };

        let report = build_report(report_type, &locations, &records, &sources);
        debug!(
            "Built {} report '{}' with {} sections over {} properties",
            report_type.as_str(),
            report.title,
            report.sections.len(),
            records.len()
        );

        Ok(AgentOutput::Report(report))
    }
}

fn build_report(
    report_type: ReportType,
    locations: &[String],
    records: &[PropertyRecord],
    sources: &Sources,
) -> ReportDescriptor {
    let base = match report_type {
        ReportType::Summary => "Property Summary Report",
        ReportType::Detailed => "Detailed Property Report",
        ReportType::Comparison => "Property Comparison Report",
    };
    let title = if locations.is_empty() {
        base.to_string()
    } else {
        format!("{}: {}", base, locations.join(", "))
    };

    // Figures from fetched records; a statistics output stands in when
    // nothing was searched
    let stats = match sources.statistics.first() {
        Some(s) if records.is_empty() => s.clone(),
        _ => summarize(records),
    };

    let mut sections = Vec::new();
    match report_type {
        ReportType::Summary | ReportType::Detailed => {
            sections.push(overview(&stats, sources.estimates.first()));
            sections.push(key_figures(&stats));
            sections.push(price_histogram(&stats));
            if !records.is_empty() {
                sections.push(top_locations(records));
            }
            if report_type == ReportType::Detailed {
                if !records.is_empty() {
                    sections.push(property_table("Properties", records));
                }
                if let Some(estimate) = sources.estimates.first() {
                    sections.push(estimate_table(estimate));
                }
                if let Some(comparison) = sources.tier_comparisons.first() {
                    sections.push(tier_table(comparison));
                }
            }
        }
        ReportType::Comparison => {
            let groups = group_by_location(locations, records);
            sections.push(comparison_table(&groups));
            sections.push(comparison_chart(&groups));
            if !records.is_empty() {
                let compared: Vec<PropertyRecord> =
                    records.iter().take(COMPARED_PROPERTIES).cloned().collect();
                sections.push(property_table("Compared Properties", &compared));
            }
            if let Some(estimate) = sources.estimates.first() {
                sections.push(estimate_table(estimate));
            }
            if let Some(comparison) = sources.tier_comparisons.first() {
                sections.push(tier_table(comparison));
            }
        }
    }

    ReportDescriptor {
        report_type,
        title,
        sections,
    }
}

/// Indian-style amount: crores and lakhs above their thresholds
pub fn format_amount(value: f64) -> String {
    if value >= 1e7 {
        format!("₹{:.2} Cr", value / 1e7)
    } else if value >= 1e5 {
        format!("₹{:.2} L", value / 1e5)
    } else {
        format!("₹{:.0}", value)
    }
}

/// Neighbourhood of a "Neighbourhood, City" style location (its leading
/// segment), or the whole string when there is no comma
fn area_of(location: &str) -> &str {
    location.split(',').next().unwrap_or(location).trim()
}

fn section(title: &str, kind: SectionKind, payload: Value) -> ReportSection {
    ReportSection {
        section_title: title.to_string(),
        section_kind: kind,
        payload,
    }
}

fn overview(stats: &PropertyStatistics, estimate: Option<&RenovationEstimate>) -> ReportSection {
    let mut text = if stats.total_properties == 0 {
        "No properties matched the request.".to_string()
    } else {
        format!(
            "{} properties across {} locations. Prices range from {} to {}, averaging {}.",
            stats.total_properties,
            stats.locations.len(),
            format_amount(stats.min_price),
            format_amount(stats.max_price),
            format_amount(stats.average_price)
        )
    };

    if let Some(e) = estimate {
        text.push_str(&format!(
            " A {} renovation of {:.0} sq ft is estimated at {}.",
            e.tier.as_str().replace('_', " "),
            e.basis_square_feet,
            format_amount(e.computed_total)
        ));
    }

    section("Overview", SectionKind::Narrative, json!({ "text": text }))
}

fn key_figures(stats: &PropertyStatistics) -> ReportSection {
    section(
        "Key Figures",
        SectionKind::Table,
        json!({
            "columns": ["Metric", "Value"],
            "rows": [
                ["Total Properties", stats.total_properties],
                ["Average Price", stats.average_price],
                ["Min Price", stats.min_price],
                ["Max Price", stats.max_price],
            ],
        }),
    )
}

fn price_histogram(stats: &PropertyStatistics) -> ReportSection {
    section(
        "Price Distribution",
        SectionKind::ChartSpec,
        json!({
            "chart": "histogram",
            "x": "price_range",
            "y": "count",
            "data": stats.price_distribution,
        }),
    )
}

fn top_locations(records: &[PropertyRecord]) -> ReportSection {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for record in records {
        let area = area_of(&record.location);
        if !area.is_empty() {
            *counts.entry(area).or_default() += 1;
        }
    }

    let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ranked.truncate(TOP_LOCATIONS);

    let data: Vec<Value> = ranked
        .iter()
        .map(|(area, count)| json!({ "location": area, "count": count }))
        .collect();

    section(
        "Top Locations",
        SectionKind::ChartSpec,
        json!({ "chart": "bar", "x": "location", "y": "count", "data": data }),
    )
}

fn property_table(title: &str, records: &[PropertyRecord]) -> ReportSection {
    let rows: Vec<Value> = records
        .iter()
        .map(|r| {
            json!([
                r.property_id,
                r.location,
                r.price,
                r.bedrooms,
                r.square_feet,
                r.status.as_deref().unwrap_or("N/A"),
            ])
        })
        .collect();

    section(
        title,
        SectionKind::Table,
        json!({
            "columns": ["Property ID", "Location", "Price", "Bedrooms", "Square Feet", "Status"],
            "rows": rows,
        }),
    )
}

fn estimate_table(estimate: &RenovationEstimate) -> ReportSection {
    let share = |c: CostCategory| estimate.breakdown.get(&c).copied().unwrap_or(0.0);
    section(
        "Renovation Estimate",
        SectionKind::Table,
        json!({
            "columns": ["Item", "Value"],
            "rows": [
                ["Tier", estimate.tier.as_str()],
                ["Square Feet", estimate.basis_square_feet],
                ["Rate per Sq Ft", estimate.unit_cost_rate],
                ["Materials", share(CostCategory::Materials)],
                ["Labor", share(CostCategory::Labor)],
                ["Permits", share(CostCategory::Permits)],
                ["Total", estimate.computed_total],
            ],
        }),
    )
}

fn tier_table(comparison: &TierComparison) -> ReportSection {
    let rows: Vec<Value> = comparison
        .estimates
        .iter()
        .map(|e| {
            let share = |c: CostCategory| e.breakdown.get(&c).copied().unwrap_or(0.0);
            json!([
                e.tier.as_str(),
                e.unit_cost_rate,
                share(CostCategory::Materials),
                share(CostCategory::Labor),
                share(CostCategory::Permits),
                e.computed_total,
            ])
        })
        .collect();

    section(
        "Renovation Tiers",
        SectionKind::Table,
        json!({
            "columns": ["Tier", "Rate per Sq Ft", "Materials", "Labor", "Permits", "Total"],
            "basis_square_feet": comparison.basis_square_feet,
            "rows": rows,
        }),
    )
}

/// Records per requested location, or per neighbourhood when none were named.
/// Keeps the requested order so the table reads like the question.
fn group_by_location<'a>(
    locations: &[String],
    records: &'a [PropertyRecord],
) -> Vec<(String, Vec<&'a PropertyRecord>)> {
    if locations.is_empty() {
        let mut groups: BTreeMap<String, Vec<&PropertyRecord>> = BTreeMap::new();
        for record in records {
            groups
                .entry(area_of(&record.location).to_string())
                .or_default()
                .push(record);
        }
        return groups.into_iter().collect();
    }

    locations
        .iter()
        .map(|location| {
            let needle = location.to_lowercase();
            let matched = records
                .iter()
                .filter(|r| r.location.to_lowercase().contains(&needle))
                .collect();
            (location.clone(), matched)
        })
        .collect()
}

fn comparison_table(groups: &[(String, Vec<&PropertyRecord>)]) -> ReportSection {
    let rows: Vec<Value> = groups
        .iter()
        .map(|(location, records)| {
            let owned: Vec<PropertyRecord> = records.iter().map(|r| (*r).clone()).collect();
            let stats = summarize(&owned);
            json!([
                location,
                stats.total_properties,
                stats.average_price,
                stats.min_price,
                stats.max_price,
            ])
        })
        .collect();

    section(
        "Location Comparison",
        SectionKind::Table,
        json!({
            "columns": ["Location", "Properties", "Average Price", "Min Price", "Max Price"],
            "rows": rows,
        }),
    )
}

fn comparison_chart(groups: &[(String, Vec<&PropertyRecord>)]) -> ReportSection {
    let data: Vec<Value> = groups
        .iter()
        .map(|(location, records)| {
            let priced: Vec<f64> = records.iter().map(|r| r.price).filter(|p| *p > 0.0).collect();
            let average = if priced.is_empty() {
                0.0
            } else {
                priced.iter().sum::<f64>() / priced.len() as f64
            };
            json!({ "location": location, "average_price": average })
        })
        .collect();

    section(
        "Average Price by Location",
        SectionKind::ChartSpec,
        json!({ "chart": "bar", "x": "location", "y": "average_price", "data": data }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::renovation::estimate;
    use crate::catalog::JsonCatalog;
    use sdk::types::{PropertyRef, RenovationTier, ResultSource};

    fn record(id: &str, location: &str, price: f64) -> PropertyRecord {
        PropertyRecord {
            property_id: id.to_string(),
            location: location.to_string(),
            price,
            square_feet: Some(1000.0),
            status: Some("Active".to_string()),
            ..Default::default()
        }
    }

    fn agent() -> ReportAgent {
        let catalog = JsonCatalog::from_records(vec![
            record("m1", "Bandra, Mumbai", 30_000_000.0),
            record("m2", "Powai, Mumbai", 20_000_000.0),
            record("p1", "Baner, Pune", 8_000_000.0),
        ]);
        ReportAgent::new(Arc::new(catalog), CallPolicy::default())
    }

    fn search_source(ids: &[&str]) -> Value {
        let refs = ids.iter().map(|id| PropertyRef::new(*id)).collect();
        serde_json::to_value(AgentOutput::Search(SearchResult::ranked(
            refs,
            ids.len(),
            ResultSource::Structured,
        )))
        .unwrap()
    }

    fn titles(report: &ReportDescriptor) -> Vec<&str> {
        report
            .sections
            .iter()
            .map(|s| s.section_title.as_str())
            .collect()
    }

    #[tokio::test]
    async fn test_summary_sections() {
        let input = AgentInput::new()
            .with_param("source.t1", search_source(&["m1", "p1"]))
            .with_param(params::REPORT_TYPE, json!("summary"));

        let output = agent().run(input).await.unwrap();
        let report = output.as_report().unwrap();
        assert_eq!(report.report_type, ReportType::Summary);
        assert_eq!(
            titles(report),
            vec!["Overview", "Key Figures", "Price Distribution", "Top Locations"]
        );
        assert_eq!(report.sections[0].section_kind, SectionKind::Narrative);
        assert_eq!(report.sections[1].payload["rows"][0][1], json!(2));
    }

    #[tokio::test]
    async fn test_detailed_includes_properties_and_estimate() {
        let est = estimate(1000.0, RenovationTier::Basic, 25.0);
        let input = AgentInput::new()
            .with_param("source.t1", search_source(&["p1"]))
            .with_param(
                "source.t2",
                serde_json::to_value(AgentOutput::Estimate(est)).unwrap(),
            )
            .with_param(params::REPORT_TYPE, json!("detailed"));

        let output = agent().run(input).await.unwrap();
        let report = output.as_report().unwrap();
        let t = titles(report);
        assert!(t.contains(&"Properties"));
        assert!(t.contains(&"Renovation Estimate"));
        assert!(report.sections[0].payload["text"]
            .as_str()
            .unwrap()
            .contains("basic renovation"));
    }

    #[tokio::test]
    async fn test_comparison_groups_by_requested_location() {
        let input = AgentInput::new()
            .with_param("source.t1", search_source(&["m1", "m2"]))
            .with_param("source.t2", search_source(&["p1"]))
            .with_param(params::REPORT_TYPE, json!("comparison"))
            .with_param(params::LOCATIONS, json!(["Mumbai", "Pune"]));

        let output = agent().run(input).await.unwrap();
        let report = output.as_report().unwrap();
        assert_eq!(report.title, "Property Comparison Report: Mumbai, Pune");

        let rows = &report.sections[0].payload["rows"];
        assert_eq!(rows[0][0], json!("Mumbai"));
        assert_eq!(rows[0][1], json!(2));
        assert_eq!(rows[0][2], json!(25_000_000.0));
        assert_eq!(rows[1][1], json!(1));
        assert_eq!(report.sections[1].section_kind, SectionKind::ChartSpec);
    }

    #[tokio::test]
    async fn test_first_estimate_follows_plan_order() {
        let basic = estimate(1000.0, RenovationTier::Basic, 25.0);
        let luxury = estimate(1000.0, RenovationTier::Luxury, 250.0);
        let input = AgentInput::new()
            .with_param(
                params::source_key(2, "t2"),
                serde_json::to_value(AgentOutput::Estimate(basic)).unwrap(),
            )
            .with_param(
                params::source_key(10, "t10"),
                serde_json::to_value(AgentOutput::Estimate(luxury)).unwrap(),
            )
            .with_param(params::REPORT_TYPE, json!("summary"));

        let output = agent().run(input).await.unwrap();
        let text = output.as_report().unwrap().sections[0].payload["text"]
            .as_str()
            .unwrap()
            .to_string();
        assert!(text.contains("basic renovation"), "{}", text);
    }

    #[tokio::test]
    async fn test_tier_comparison_adds_tiers_table() {
        let comparison = TierComparison {
            basis_square_feet: 1000.0,
            property_id: None,
            estimates: vec![
                estimate(1000.0, RenovationTier::Basic, 25.0),
                estimate(1000.0, RenovationTier::Luxury, 250.0),
            ],
        };
        let input = AgentInput::new()
            .with_param(
                "source.001.t1",
                serde_json::to_value(AgentOutput::TierComparison(comparison)).unwrap(),
            )
            .with_param(params::REPORT_TYPE, json!("detailed"));

        let output = agent().run(input).await.unwrap();
        let report = output.as_report().unwrap();
        let tiers = report
            .sections
            .iter()
            .find(|s| s.section_title == "Renovation Tiers")
            .unwrap();
        assert_eq!(tiers.payload["rows"][0][0], json!("basic"));
        assert_eq!(tiers.payload["rows"][1][5], json!(250_000.0));
    }

    #[test]
    fn test_area_of() {
        assert_eq!(area_of("Bandra West, Mumbai"), "Bandra West");
        assert_eq!(area_of("Pune"), "Pune");
    }

    #[tokio::test]
    async fn test_no_sources_is_insufficient() {
        let err = agent().run(AgentInput::new()).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::AgentInputInsufficient { ref field } if field == "sources"
        ));
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(25_000_000.0), "₹2.50 Cr");
        assert_eq!(format_amount(750_000.0), "₹7.50 L");
        assert_eq!(format_amount(9_500.0), "₹9500");
    }
}
