//! Object key generation for uploaded components.
//!
//! Keys follow `{component_type}/{timestamp}_{file_name}`. When a candidate is
//! already taken the generator hands out `{component_type}/{timestamp}-{n}_{file_name}`
//! for increasing `n`, so an existing object is never overwritten.

use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Timestamp layout embedded in object keys (UTC, second precision).
pub const KEY_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// How many candidates (base key included) are tried before giving up.
pub const MAX_KEY_ATTEMPTS: u32 = 16;

const MAX_SEGMENT_LEN: usize = 255;

/// Why a category or file name cannot be used in an object key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field} {reason}")]
pub struct KeySegmentError {
    pub field: &'static str,
    pub reason: &'static str,
}

/// Source of "now" for key timestamps.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Derives object keys from upload context.
#[derive(Clone)]
pub struct ObjectKeyGenerator {
    clock: Clock,
}

impl Default for ObjectKeyGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ObjectKeyGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectKeyGenerator").finish_non_exhaustive()
    }
}

/// A key allocation for one upload: the fixed timestamp plus the sanitized parts.
#[derive(Debug, Clone)]
pub struct KeyPlan {
    pub uploaded_at: DateTime<Utc>,
    component_type: String,
    file_name: String,
    stamp: String,
}

impl ObjectKeyGenerator {
    /// Generator backed by the wall clock.
    pub fn new() -> Self {
        Self {
            clock: Arc::new(Utc::now),
        }
    }

    /// Generator with an injected clock.
    pub fn with_clock(clock: Clock) -> Self {
        Self { clock }
    }

    /// Validate the inputs and freeze the upload timestamp.
    pub fn plan(&self, component_type: &str, file_name: &str) -> Result<KeyPlan, KeySegmentError> {
        ensure_segment_safe("component_type", component_type)?;
        ensure_segment_safe("file name", file_name)?;
        let uploaded_at = (self.clock)();
        Ok(KeyPlan {
            stamp: uploaded_at.format(KEY_TIMESTAMP_FORMAT).to_string(),
            uploaded_at,
            component_type: component_type.to_string(),
            file_name: file_name.to_string(),
        })
    }
}

impl KeyPlan {
    /// Candidate key for the given attempt; attempt 0 is the undecorated key.
    pub fn candidate(&self, attempt: u32) -> String {
        if attempt == 0 {
            format!("{}/{}_{}", self.component_type, self.stamp, self.file_name)
        } else {
            format!(
                "{}/{}-{}_{}",
                self.component_type, self.stamp, attempt, self.file_name
            )
        }
    }

    /// All candidates in the order they should be tried.
    pub fn candidates(&self) -> impl Iterator<Item = String> + '_ {
        (0..MAX_KEY_ATTEMPTS).map(|attempt| self.candidate(attempt))
    }
}

/// Reject segments that would escape their prefix or produce unreadable keys.
pub fn ensure_segment_safe(field: &'static str, value: &str) -> Result<(), KeySegmentError> {
    let fail = |reason| Err(KeySegmentError { field, reason });
    if value.trim().is_empty() {
        return fail("must not be empty");
    }
    if value.len() > MAX_SEGMENT_LEN {
        return fail("is longer than 255 bytes");
    }
    if value == "." || value == ".." {
        return fail("must not be `.` or `..`");
    }
    if value.contains('/') || value.contains('\\') {
        return fail("must not contain path separators");
    }
    if value.chars().any(char::is_control) {
        return fail("must not contain control characters");
    }
    Ok(())
}
