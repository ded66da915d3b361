/// Pipeline-wide constants shared by the stages and the config defaults

/// Gemini REST endpoint root
pub const GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Inference quota: 15 requests per minute, i.e. one call every 4 seconds
pub const ORACLE_REQUESTS_PER_MIN: u64 = 15;

/// Composers scoring strictly above this are offered to arbitration
pub const SIMILARITY_THRESHOLD: f64 = 0.6;

// Constrained-choice labels
pub const LABEL_TRUE: &str = "true";
pub const LABEL_FALSE: &str = "false";
/// Always part of the arbitration domain; means "none of these candidates"
pub const LABEL_NONE: &str = "none";

/// Header the crawlers send with every intake request
pub const INTAKE_API_KEY_HEADER: &str = "API_KEY";
/// Environment variable holding the value expected in that header
pub const INTAKE_API_KEY_ENV: &str = "INTAKE_API_KEY";
