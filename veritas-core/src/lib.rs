//! Veritas Core - Shared Types
//!
//! Pure data structures shared by every pipeline stage: the normalized
//! dataset, KPI and anomaly records, the insight context handed to the
//! language model, and the finalized report bundle.
//! Behaviour lives in the stage crates; this crate holds no business logic.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

pub mod bundle;
pub mod config;
pub mod dataset;
pub mod error;
pub mod insight;
pub mod llm;
pub mod records;

pub use bundle::*;
pub use config::*;
pub use dataset::*;
pub use error::*;
pub use insight::*;
pub use llm::*;
pub use records::*;

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Report identifier using UUIDv7 so reports sort by creation time.
pub type ReportId = Uuid;

/// SHA-256 content hash used to fingerprint raw sources.
pub type ContentHash = [u8; 32];

/// Generate a new UUIDv7 report identifier.
pub fn new_report_id() -> ReportId {
    Uuid::now_v7()
}

/// Compute SHA-256 hash of content.
pub fn compute_content_hash(content: &[u8]) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update(content);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// Hex-encoded SHA-256 fingerprint of raw source bytes.
pub fn content_fingerprint(content: &[u8]) -> String {
    hex::encode(compute_content_hash(content))
}
