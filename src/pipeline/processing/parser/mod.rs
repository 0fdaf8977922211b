use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info, instrument};

use crate::error::SchemaError;
use crate::observability::metrics;
use crate::registry::{ColumnSpec, FeedDescriptor};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// One data row, keyed by the descriptor's primary column names.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedRow {
    /// 1-based line in the source document.
    pub line: u64,
    pub cells: BTreeMap<String, String>,
}

impl ParsedRow {
    /// The raw cell for `column`; absent trailing cells read as empty.
    pub fn get(&self, column: &str) -> &str {
        self.cells.get(column).map(String::as_str).unwrap_or("")
    }
}

/// Which source header each required column was read from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnBinding {
    pub column: String,
    pub header: String,
    #[serde(skip)]
    index: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedFeed {
    pub bindings: Vec<ColumnBinding>,
    pub rows: Vec<ParsedRow>,
}

pub trait Parser {
    fn parse(&self, bytes: &[u8]) -> Result<ParsedFeed, SchemaError>;
}

/// A wrapper that adds metrics to any parser implementation
pub struct MetricsParser<P: Parser> {
    inner: P,
}

impl<P: Parser> MetricsParser<P> {
    pub fn new(inner: P) -> Self {
        Self { inner }
    }
}

impl<P: Parser> Parser for MetricsParser<P> {
    #[instrument(skip_all, fields(bytes = bytes.len()))]
    fn parse(&self, bytes: &[u8]) -> Result<ParsedFeed, SchemaError> {
        let start_time = std::time::Instant::now();
        metrics::parser::bytes_processed(bytes.len());

        match self.inner.parse(bytes) {
            Ok(feed) => {
                metrics::parser::parse_success();
                metrics::parser::rows_extracted(feed.rows.len() as u64);
                metrics::parser::duration(start_time.elapsed().as_secs_f64());
                Ok(feed)
            }
            Err(e) => {
                metrics::parser::parse_error(&e);
                metrics::parser::duration(start_time.elapsed().as_secs_f64());
                Err(e)
            }
        }
    }
}

/// Header-driven CSV parser for one feed descriptor.
///
/// A required column that cannot be found under any of its spellings is a
/// `SchemaError`; the parse never proceeds on a reshaped source. Columns the
/// descriptor does not mention are dropped.
pub struct CsvFeedParser<'a> {
    feed: &'a FeedDescriptor,
}

impl<'a> CsvFeedParser<'a> {
    pub fn new(feed: &'a FeedDescriptor) -> Self {
        Self { feed }
    }

    fn bind(&self, headers: &csv::StringRecord) -> Result<Vec<ColumnBinding>, SchemaError> {
        let normalized: Vec<String> = headers.iter().map(|h| h.trim().to_lowercase()).collect();
        let mut bindings = self
            .feed
            .required_columns()
            .iter()
            .map(|spec| bind_column(spec, &normalized, headers))
            .collect::<Result<Vec<_>, _>>()?;
        bindings.extend(
            self.feed
                .optional_columns()
                .iter()
                .filter_map(|spec| bind_column(spec, &normalized, headers).ok()),
        );
        Ok(bindings)
    }
}

fn bind_column(
    spec: &ColumnSpec,
    normalized: &[String],
    headers: &csv::StringRecord,
) -> Result<ColumnBinding, SchemaError> {
    spec.spellings()
        .find_map(|spelling| {
            let wanted = spelling.trim().to_lowercase();
            normalized.iter().position(|h| *h == wanted)
        })
        .map(|index| ColumnBinding {
            column: spec.name.clone(),
            header: headers.get(index).unwrap_or_default().to_string(),
            index,
        })
        .ok_or_else(|| SchemaError::MissingColumn {
            name: spec.name.clone(),
        })
}

fn malformed(err: &csv::Error, fallback_line: u64) -> SchemaError {
    SchemaError::Malformed {
        line: err.position().map(|p| p.line()).unwrap_or(fallback_line),
        message: err.to_string(),
    }
}

impl Parser for CsvFeedParser<'_> {
    fn parse(&self, bytes: &[u8]) -> Result<ParsedFeed, SchemaError> {
        debug!("CsvFeedParser: start bytes_len={}", bytes.len());
        let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(bytes);

        let headers = reader.headers().map_err(|e| malformed(&e, 1))?.clone();
        if headers.iter().all(|h| h.trim().is_empty()) {
            return Err(SchemaError::EmptyDocument);
        }

        let bindings = self.bind(&headers)?;

        let mut rows = Vec::new();
        for (i, result) in reader.records().enumerate() {
            let fallback_line = i as u64 + 2;
            let record = result.map_err(|e| malformed(&e, fallback_line))?;
            let line = record.position().map(|p| p.line()).unwrap_or(fallback_line);
            let cells = bindings
                .iter()
                .map(|b| (b.column.clone(), record.get(b.index).unwrap_or_default().to_string()))
                .collect();
            rows.push(ParsedRow { line, cells });
        }

        info!(
            "CsvFeedParser: {} rows for source={} columns={:?}",
            rows.len(),
            self.feed.source,
            bindings.iter().map(|b| b.header.as_str()).collect::<Vec<_>>()
        );
        Ok(ParsedFeed { bindings, rows })
    }
}
