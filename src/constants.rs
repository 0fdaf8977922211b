/// Defaults shared by configuration, the fetcher and the publisher.
/// Every value here can be overridden from `surveillance.toml` or the environment.

// Reference feed: ECDC ERVISS sentinel tests, detections and positivity
pub const DEFAULT_ECDC_URL: &str = "https://raw.githubusercontent.com/EU-ECDC/Respiratory_viruses_weekly_data/main/data/sentinelTestsDetectionsPositivity.csv";

// Environment overrides
pub const ECDC_URL_ENV: &str = "ECDC_CSV_URL";
pub const DATA_DIR_ENV: &str = "SURVEILLANCE_DATA_DIR";

// Published artifacts
pub const DEFAULT_CONFIG_PATH: &str = "surveillance.toml";
pub const DEFAULT_DATA_DIR: &str = "data";
pub const DEFAULT_ARTIFACT_NAME: &str = "ecdc_weekly.jsonl";
pub const DEFAULT_STATUS_NAME: &str = "status.json";

// Fetch policy
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (respiratory-virus-dashboard/1.0)";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 2_000;

// Rejection policy
pub const DEFAULT_MAX_REJECTED_RATIO: f64 = 0.2;
pub const DEFAULT_MIN_RECORDS: usize = 1;

/// Cell contents meaning "no observation this week".
pub const DEFAULT_MISSING_VALUES: &[&str] = &["", "NA", "N/A", "null", "None"];

/// Prefix of persisted content fingerprints.
pub const FINGERPRINT_PREFIX: &str = "sha256:";
