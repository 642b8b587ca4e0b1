//! Error taxonomy for the markup engine

use crate::geometry::{PageId, ScreenPoint};

/// Why an input sequence was refused before a session was created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The active input policy does not accept this pointer kind
    PointerKindExcluded,
    /// Single-point-only policy and another session is already tracking
    SecondaryPoint,
    /// Another session is already drawing on the target page
    PageBusy,
    /// The stroke ended with fewer samples than the policy minimum
    BelowMinimumSamples,
}

/// Errors raised by gesture, overlay, compositing and persistence operations.
///
/// Every variant except `PersistenceFailure` is recovered locally by the
/// operation that raised it: the event is dropped and state is left unchanged.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MarkupError {
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("degenerate transform: {0}")]
    DegenerateTransform(String),

    #[error("no page under screen point ({x:.1}, {y:.1})", x = .0.x, y = .0.y)]
    UnresolvedPage(ScreenPoint),

    #[error("input rejected: {0:?}")]
    InputRejected(RejectReason),

    #[error("persistence failed for {page:?}: {message}")]
    PersistenceFailure { page: Option<PageId>, message: String },
}

impl MarkupError {
    pub fn invalid_state(message: impl Into<String>) -> Self {
        MarkupError::InvalidState(message.into())
    }

    pub fn degenerate(message: impl Into<String>) -> Self {
        MarkupError::DegenerateTransform(message.into())
    }

    pub fn persistence(page: Option<PageId>, message: impl Into<String>) -> Self {
        MarkupError::PersistenceFailure { page, message: message.into() }
    }

    /// Whether the error must be surfaced to the external shell
    pub fn is_persistence_failure(&self) -> bool {
        matches!(self, MarkupError::PersistenceFailure { .. })
    }
}

/// Result type for markup operations
pub type MarkupResult<T> = Result<T, MarkupError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_readable() {
        let err = MarkupError::UnresolvedPage(ScreenPoint::new(12.0, 3.5));
        assert_eq!(err.to_string(), "no page under screen point (12.0, 3.5)");

        let err = MarkupError::persistence(Some(PageId(2)), "disk full");
        assert!(err.to_string().contains("disk full"));
        assert!(err.is_persistence_failure());
        assert!(!MarkupError::invalid_state("x").is_persistence_failure());
    }
}
