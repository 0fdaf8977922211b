use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_ECDC_URL, DEFAULT_MISSING_VALUES};
use crate::domain::{Metric, Pathogen, Source};

/// A source column and the header spellings it may appear under.
///
/// Parsed rows are keyed by `name`, whichever alias matched.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl ColumnSpec {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            aliases: Vec::new(),
        }
    }

    pub fn with_aliases(name: &str, aliases: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Header spellings in priority order.
    pub fn spellings(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.aliases.iter().map(String::as_str))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ColumnMap {
    pub week: ColumnSpec,
    pub country: ColumnSpec,
    pub pathogen: ColumnSpec,
    pub metric: ColumnSpec,
    pub value: ColumnSpec,
}

impl ColumnMap {
    pub fn required(&self) -> [&ColumnSpec; 5] {
        [&self.week, &self.country, &self.pathogen, &self.metric, &self.value]
    }
}

/// Maps source vocabulary onto one canonical name. Matching is
/// case-insensitive; `exact` spellings across all rules win over `contains`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct VocabRule {
    pub canonical: String,
    #[serde(default)]
    pub exact: Vec<String>,
    #[serde(default)]
    pub contains: Vec<String>,
}

impl VocabRule {
    fn new(canonical: &str, exact: &[&str], contains: &[&str]) -> Self {
        Self {
            canonical: canonical.to_string(),
            exact: exact.iter().map(|s| s.to_string()).collect(),
            contains: contains.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// One geographic code in scope, plus the source's spellings of it.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CountryScope {
    pub code: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// Keep only rows whose `column` holds one of `values` (case-insensitive).
///
/// A filter that is not `required` applies only when the source has the
/// column; otherwise its absence is a schema error like any mapped column.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RowFilter {
    pub column: String,
    pub values: Vec<String>,
    #[serde(default = "required_by_default")]
    pub required: bool,
}

impl RowFilter {
    pub fn required(column: &str, values: &[&str]) -> Self {
        Self {
            column: column.to_string(),
            values: values.iter().map(|v| v.to_string()).collect(),
            required: true,
        }
    }

    pub fn when_present(column: &str, values: &[&str]) -> Self {
        Self {
            required: false,
            ..Self::required(column, values)
        }
    }
}

/// Everything feed-specific the generic parser and normalizer need.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FeedDescriptor {
    pub source: Source,
    pub url: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    pub columns: ColumnMap,
    pub countries: Vec<CountryScope>,
    pub pathogens: Vec<VocabRule>,
    pub metrics: Vec<VocabRule>,
    #[serde(default = "default_missing_values")]
    pub missing_values: Vec<String>,
    #[serde(default)]
    pub filters: Vec<RowFilter>,
}

fn enabled_by_default() -> bool {
    true
}

fn required_by_default() -> bool {
    true
}

fn default_missing_values() -> Vec<String> {
    DEFAULT_MISSING_VALUES.iter().map(|s| s.to_string()).collect()
}

impl FeedDescriptor {
    /// ECDC ERVISS sentinel tests/detections/positivity, scoped to Italy.
    pub fn ecdc_erviss() -> Self {
        Self {
            source: Source::Ecdc,
            url: DEFAULT_ECDC_URL.to_string(),
            enabled: true,
            columns: ColumnMap {
                week: ColumnSpec::with_aliases(
                    "yearweek",
                    &["year_week", "iso_week", "week", "date"],
                ),
                country: ColumnSpec::with_aliases(
                    "countryname",
                    &["country_name", "country", "countrycode"],
                ),
                pathogen: ColumnSpec::with_aliases("pathogen", &["virus", "organism"]),
                metric: ColumnSpec::with_aliases("indicator", &["metric", "measure"]),
                value: ColumnSpec::with_aliases("value", &["val", "number"]),
            },
            countries: vec![CountryScope {
                code: "IT".to_string(),
                aliases: vec!["ITA".to_string(), "Italy".to_string()],
            }],
            pathogens: vec![
                VocabRule::new(Pathogen::Influenza.as_str(), &[], &["influenza"]),
                VocabRule::new(Pathogen::Rsv.as_str(), &[], &["rsv", "respiratory syncytial"]),
                VocabRule::new(Pathogen::SarsCov2.as_str(), &[], &["covid", "sars", "cov-2"]),
            ],
            metrics: vec![
                VocabRule::new(
                    Metric::PositivityRate.as_str(),
                    &["positivity"],
                    &["positivity", "percent"],
                ),
                VocabRule::new(
                    Metric::Cases.as_str(),
                    &["detections"],
                    &["detection", "case", "positive"],
                ),
                VocabRule::new(Metric::Tests.as_str(), &["tests"], &["test", "specimen"]),
            ],
            missing_values: default_missing_values(),
            // Age-band breakdowns share a key with the all-ages row.
            filters: vec![RowFilter::when_present("age", &["total"])],
        }
    }

    /// Canonical code for a raw country cell, or `None` when out of scope.
    pub fn map_country(&self, raw: &str) -> Option<&str> {
        let raw = raw.trim();
        self.countries
            .iter()
            .find(|c| {
                c.code.eq_ignore_ascii_case(raw) || c.aliases.iter().any(|a| a.eq_ignore_ascii_case(raw))
            })
            .map(|c| c.code.as_str())
    }

    pub fn in_scope_codes(&self) -> impl Iterator<Item = &str> {
        self.countries.iter().map(|c| c.code.as_str())
    }

    pub fn map_pathogen(&self, raw: &str) -> Option<&str> {
        map_vocab(&self.pathogens, raw)
    }

    pub fn map_metric(&self, raw: &str) -> Option<&str> {
        map_vocab(&self.metrics, raw)
    }

    pub fn is_missing_value(&self, raw: &str) -> bool {
        let raw = raw.trim();
        self.missing_values.iter().any(|m| m.eq_ignore_ascii_case(raw))
    }

    /// Columns the parser must resolve: the five mapped fields plus any
    /// required filter columns.
    pub fn required_columns(&self) -> Vec<ColumnSpec> {
        let mut cols: Vec<ColumnSpec> = self.columns.required().into_iter().cloned().collect();
        for f in self.filters.iter().filter(|f| f.required) {
            if !cols.iter().any(|c| c.name.eq_ignore_ascii_case(&f.column)) {
                cols.push(ColumnSpec::new(&f.column));
            }
        }
        cols
    }

    /// Filter columns the parser reads only when the source has them.
    pub fn optional_columns(&self) -> Vec<ColumnSpec> {
        let required = self.required_columns();
        self.filters
            .iter()
            .filter(|f| !f.required)
            .filter(|f| !required.iter().any(|c| c.name.eq_ignore_ascii_case(&f.column)))
            .map(|f| ColumnSpec::new(&f.column))
            .collect()
    }
}

fn map_vocab<'a>(rules: &'a [VocabRule], raw: &str) -> Option<&'a str> {
    let needle = raw.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }
    rules
        .iter()
        .find(|r| r.exact.iter().any(|e| e.to_lowercase() == needle))
        .or_else(|| {
            rules
                .iter()
                .find(|r| r.contains.iter().any(|c| needle.contains(&c.to_lowercase())))
        })
        .map(|r| r.canonical.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_country_spellings() {
        let feed = FeedDescriptor::ecdc_erviss();
        assert_eq!(feed.map_country("Italy"), Some("IT"));
        assert_eq!(feed.map_country(" ita "), Some("IT"));
        assert_eq!(feed.map_country("it"), Some("IT"));
        assert_eq!(feed.map_country("France"), None);
    }

    #[test]
    fn maps_pathogen_vocabulary() {
        let feed = FeedDescriptor::ecdc_erviss();
        assert_eq!(feed.map_pathogen("Influenza A"), Some("influenza"));
        assert_eq!(feed.map_pathogen("RSV"), Some("RSV"));
        assert_eq!(feed.map_pathogen("Respiratory syncytial virus"), Some("RSV"));
        assert_eq!(feed.map_pathogen("SARS-CoV-2"), Some("SARS-CoV-2"));
        assert_eq!(feed.map_pathogen("COVID-19"), Some("SARS-CoV-2"));
        assert_eq!(feed.map_pathogen("Metapneumovirus"), None);
    }

    #[test]
    fn exact_metric_spellings_beat_substrings() {
        let feed = FeedDescriptor::ecdc_erviss();
        assert_eq!(feed.map_metric("positivity"), Some("positivity_rate"));
        assert_eq!(feed.map_metric("detections"), Some("cases"));
        assert_eq!(feed.map_metric("Tests"), Some("tests"));
        assert_eq!(feed.map_metric("percent positive"), Some("positivity_rate"));
        assert_eq!(feed.map_metric("specimens tested"), Some("tests"));
        assert_eq!(feed.map_metric("hospital admissions"), None);
        assert_eq!(feed.map_metric(""), None);
    }

    #[test]
    fn recognizes_missing_tokens() {
        let feed = FeedDescriptor::ecdc_erviss();
        for token in ["", "NA", "n/a", "null", "None", "  "] {
            assert!(feed.is_missing_value(token), "{token:?}");
        }
        assert!(!feed.is_missing_value("0"));
    }

    #[test]
    fn required_filter_columns_become_required() {
        let mut feed = FeedDescriptor::ecdc_erviss();
        feed.filters = vec![RowFilter::required("survtype", &["primary care sentinel"])];
        let names: Vec<String> = feed.required_columns().into_iter().map(|c| c.name).collect();
        assert_eq!(
            names,
            ["yearweek", "countryname", "pathogen", "indicator", "value", "survtype"]
        );
        assert!(feed.optional_columns().is_empty());
    }

    #[test]
    fn builtin_age_filter_is_optional() {
        let feed = FeedDescriptor::ecdc_erviss();
        assert_eq!(feed.required_columns().len(), 5);
        let optional: Vec<String> = feed.optional_columns().into_iter().map(|c| c.name).collect();
        assert_eq!(optional, ["age"]);
    }

    #[test]
    fn deserializes_from_toml() {
        let feed: FeedDescriptor = toml::from_str(
            r#"
            source = "ECDC"
            url = "https://example.org/feed.csv"

            [columns]
            week = { name = "date" }
            country = { name = "country" }
            pathogen = { name = "pathogen" }
            metric = { name = "metric" }
            value = { name = "value" }

            [[countries]]
            code = "IT"

            [[pathogens]]
            canonical = "influenza"
            contains = ["flu"]

            [[metrics]]
            canonical = "cases"
            exact = ["cases"]
            "#,
        )
        .unwrap();
        assert!(feed.enabled);
        assert_eq!(feed.columns.week.name, "date");
        assert_eq!(feed.map_pathogen("Flu B"), Some("influenza"));
        assert!(feed.is_missing_value("NA"));
    }
}
