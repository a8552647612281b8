//! CLI output: error mapping from runtime errors to stable CLI text.

use crate::error::RuntimeError;

/// Map a runtime error to a one-line message for stderr.
pub fn map_error(e: &RuntimeError) -> String {
    match e {
        RuntimeError::RetriesExhausted { attempts, .. } => {
            format!("{} (gave up after {} attempts)", e.root_cause(), attempts)
        }
        RuntimeError::Initialization(msg) => format!("Could not open the store: {}", msg),
        other => other.to_string(),
    }
}
