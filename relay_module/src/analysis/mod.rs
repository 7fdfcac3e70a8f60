//! Message analysis: a language model when configured and within limits,
//! otherwise deterministic keyword rules.

pub mod client;
pub mod fallback;
pub mod rate_limit;
pub mod template;
pub mod types;

pub use client::{AnalysisClient, AnalysisConfig, AnalysisError, AnalysisProvider};
pub use fallback::{extract_urls, message_title};
pub use rate_limit::RateLimitStatus;
pub use types::{
    parse_strict_date, AnalysisResult, AnalysisSource, FallbackReason, FieldKind, FieldValue,
    LogicalField,
};
