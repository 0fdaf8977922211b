use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use tracing::info;

use crate::app::ports::HttpClientPort;
use crate::domain::IsoWeek;
use crate::error::FetchError;

const WEEKS: i64 = 52;

/// Serves a synthetic ERVISS-shaped CSV in place of the network so a mock run
/// exercises every stage after the fetch.
pub struct MockFeed {
    reference: NaiveDate,
}

impl MockFeed {
    /// Data covers the 52 weeks before `reference`.
    pub fn new(reference: NaiveDate) -> Self {
        Self { reference }
    }

    pub fn csv(&self) -> String {
        let mut out = String::from("survtype,countryname,yearweek,pathogen,pathogentype,indicator,age,value\n");
        for weeks_ago in (1..=WEEKS).rev() {
            let week = IsoWeek::from_date(self.reference - Duration::weeks(weeks_ago));
            let flu = 5.0 + (weeks_ago % 10) as f64 * 2.5;
            let rsv = 50.0 + (weeks_ago % 15) as f64 * 10.0;
            out.push_str(&format!(
                "primary care sentinel,Italy,{week},Influenza,,positivity,total,{flu}\n"
            ));
            out.push_str(&format!(
                "primary care sentinel,Italy,{week},RSV,,detections,total,{rsv}\n"
            ));
        }
        out
    }
}

#[async_trait]
impl HttpClientPort for MockFeed {
    async fn get(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        info!("Serving mock feed in place of {}", url);
        Ok(self.csv().into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_two_rows_per_week() {
        let feed = MockFeed::new(NaiveDate::from_ymd_opt(2025, 9, 8).unwrap());
        let csv = feed.csv();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 1 + 2 * WEEKS as usize);
        // 52 weeks before 2025-09-08 is 2024-09-09, ISO 2024-W37
        assert!(lines[1].contains("2024-W37,Influenza,,positivity,total,10"));
        assert!(lines[2].contains("2024-W37,RSV,,detections,total,120"));
        // the last week is the one before the reference date
        assert!(lines[104].contains("2025-W36,RSV"));
    }
}
