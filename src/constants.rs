//! Column and dataset name constants shared across the pipeline stages.
//! Keeping them here avoids magic strings drifting between the cleaner,
//! the metric engine and the alert models.

// Key tuple columns, in output order
pub const DATE_COL: &str = "date";
pub const STATE_COL: &str = "state";
pub const DISTRICT_COL: &str = "district";
pub const PINCODE_COL: &str = "pincode";

pub const KEY_COLUMNS: [&str; 4] = [DATE_COL, STATE_COL, DISTRICT_COL, PINCODE_COL];

// Enrolment measures
pub const AGE_0_5: &str = "age_0_5";
pub const AGE_5_17: &str = "age_5_17";
pub const AGE_18_GREATER: &str = "age_18_greater";

// Demographic-authentication measures
pub const DEMO_AGE_5_17: &str = "demo_age_5_17";
pub const DEMO_AGE_17_PLUS: &str = "demo_age_17_";

// Biometric-authentication measures
pub const BIO_AGE_5_17: &str = "bio_age_5_17";
pub const BIO_AGE_17_PLUS: &str = "bio_age_17_";

pub const ENROLMENT_MEASURES: [&str; 3] = [AGE_0_5, AGE_5_17, AGE_18_GREATER];
pub const DEMOGRAPHIC_MEASURES: [&str; 2] = [DEMO_AGE_5_17, DEMO_AGE_17_PLUS];
pub const BIOMETRIC_MEASURES: [&str; 2] = [BIO_AGE_5_17, BIO_AGE_17_PLUS];

// Derived metric output columns
pub const BCG_COL: &str = "BCG";
pub const BUR_COL: &str = "BUR";
pub const FAFI_COL: &str = "FAFI";
pub const FAFI_RATE_COL: &str = "FAFI_rate";
pub const BIS_COL: &str = "BIS";
pub const RISK_TIER_COL: &str = "risk_tier";

pub const METRIC_COLUMNS: [&str; 6] = [
    BCG_COL,
    BUR_COL,
    FAFI_COL,
    FAFI_RATE_COL,
    BIS_COL,
    RISK_TIER_COL,
];

// Default locations, matching the layout of the published data dumps
pub const DEFAULT_ENROLMENT_DIR: &str = "api_data_aadhar_enrolment";
pub const DEFAULT_DEMOGRAPHIC_DIR: &str = "api_data_aadhar_demographic";
pub const DEFAULT_BIOMETRIC_DIR: &str = "api_data_aadhar_biometric";
pub const DEFAULT_OUTPUT_PATH: &str = "merged_aadhaar_data.csv";
pub const DEFAULT_LOG_DIR: &str = "logs";

/// Output date layout; ISO so that re-reading a written table is unambiguous.
pub const OUTPUT_DATE_FORMAT: &str = "%Y-%m-%d";
