use std::sync::Arc;

use thiserror::Error;

use crate::source::SourceError;

/// Errors surfaced by [`super::LookupCoordinator`].
///
/// `Clone` so that every caller sharing a load receives the same error.
#[derive(Error, Debug, Clone)]
pub enum LookupError {
    #[error("unknown country '{0}'")]
    NotFound(String),

    #[error("failed to load data for '{country}': {source}")]
    Load {
        country: String,
        #[source]
        source: Arc<SourceError>,
    },

    #[error("loading '{country}' was interrupted: {reason}")]
    Interrupted { country: String, reason: String },
}

impl LookupError {
    /// Whether the country is not in the known set.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
