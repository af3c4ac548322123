#![forbid(unsafe_code)]

//! Error taxonomy.
//!
//! Only programming errors are represented here. Request failures are data
//! (see [`RequestError`](crate::state::RequestError)) and never surface as
//! `Err` from the binding layer.

use thiserror::Error;

/// Argument serialization failed.
#[derive(Debug, Error)]
pub enum ArgError {
    #[error("failed to serialize arguments for endpoint `{endpoint}`: {source}")]
    Serialize {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },
    /// Raised by user-supplied serializers.
    #[error("{0}")]
    Custom(String),
}

impl ArgError {
    #[must_use]
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom(message.into())
    }
}

/// Misuse of the binding layer or a misconfigured store.
#[derive(Debug, Error)]
pub enum BindingError {
    /// `refetch` was called while no subscription was live.
    #[error("cannot refetch `{endpoint}`: no active subscription (was the query skipped or disposed?)")]
    NoActiveSubscription { endpoint: String },
    /// The store answered a subscription probe with something other than a
    /// boolean, which means its middleware was never installed.
    #[error("middleware for endpoint `{endpoint}` is not installed on the store")]
    MissingMiddleware { endpoint: String },
    #[error(transparent)]
    Arg(#[from] ArgError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_endpoint() {
        let err = BindingError::NoActiveSubscription {
            endpoint: "getUser".into(),
        };
        assert!(err.to_string().contains("`getUser`"));

        let err = BindingError::MissingMiddleware {
            endpoint: "getPosts".into(),
        };
        assert!(err.to_string().contains("middleware"));
    }

    #[test]
    fn arg_errors_convert_transparently() {
        let err: BindingError = ArgError::custom("bad arg").into();
        assert_eq!(err.to_string(), "bad arg");
    }
}
