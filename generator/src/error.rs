// error.rs — Fatal error taxonomy
//
// Every way a generation run can abort. Matching shortfalls are the only
// demotable class: with `ignore missed callbacks` set they become warnings
// and the category is skipped instead.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmgError {
    /// Malformed category or process specification: missing required key,
    /// ambiguous action usage, unparseable declaration. Always fatal.
    #[error("specification error: {context}: {message}")]
    Spec { context: String, message: String },

    /// A category's callbacks cannot be matched or a replicative signal has
    /// no possible peer. Fatal unless demoted by configuration.
    #[error("matching error: {context}: {message}")]
    Matching { context: String, message: String },

    /// Instance generation would exceed the configured ceiling. Never
    /// silently truncated: a truncated model misses behaviors.
    #[error("{process} tries to generate more instances than it is allowed: {requested} > {limit}")]
    Capacity {
        process: String,
        requested: usize,
        limit: usize,
    },

    /// Programmer-error class: must not occur given valid input. Treated as
    /// an assertion, not user-facing validation.
    #[error("internal error: {0}")]
    Internal(String),

    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl EmgError {
    pub fn spec(context: impl Into<String>, message: impl Into<String>) -> Self {
        EmgError::Spec {
            context: context.into(),
            message: message.into(),
        }
    }

    pub fn matching(context: impl Into<String>, message: impl Into<String>) -> Self {
        EmgError::Matching {
            context: context.into(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        EmgError::Internal(message.into())
    }
}

pub type Result<T> = std::result::Result<T, EmgError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_error_names_identifier() {
        let e = EmgError::spec("usb.probe", "missing required key 'signature'");
        assert_eq!(
            format!("{e}"),
            "specification error: usb.probe: missing required key 'signature'"
        );
    }

    #[test]
    fn capacity_error_reports_counts() {
        let e = EmgError::Capacity {
            process: "usb_scenario".into(),
            requested: 12,
            limit: 8,
        };
        let msg = format!("{e}");
        assert!(msg.contains("usb_scenario"));
        assert!(msg.contains("12 > 8"));
    }
}
