//! Result modes: how `execute()` reports its outcome.
//!
//! A factory is parameterized by its mode. [`Plain`] returns `Result`s;
//! [`Wrapped`] never fails and reports the error alongside an empty
//! response slot instead.

use crate::engine::stream::Subscription;
use crate::error::{Error, Result};
use crate::payload::Payload;

/// Maps an execution outcome to what `execute()` returns.
pub trait ResultMode: Send + Sync + 'static {
    type Output;
    type StreamOutput;

    fn complete(outcome: Result<Payload>) -> Self::Output;
    fn complete_stream(outcome: Result<Subscription>) -> Self::StreamOutput;
}

/// Failures are returned as `Err`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Plain;

/// Failures are reported inside the returned value.
#[derive(Debug, Clone, Copy, Default)]
pub struct Wrapped;

impl ResultMode for Plain {
    type Output = Result<Payload>;
    type StreamOutput = Result<Subscription>;

    fn complete(outcome: Result<Payload>) -> Self::Output {
        outcome
    }

    fn complete_stream(outcome: Result<Subscription>) -> Self::StreamOutput {
        outcome
    }
}

impl ResultMode for Wrapped {
    type Output = WrappedResponse<Payload>;
    type StreamOutput = WrappedResponse<Subscription>;

    fn complete(outcome: Result<Payload>) -> Self::Output {
        WrappedResponse::from(outcome)
    }

    fn complete_stream(outcome: Result<Subscription>) -> Self::StreamOutput {
        WrappedResponse::from(outcome)
    }
}

/// Exactly one of `response` and `error` is set.
#[derive(Debug, Clone)]
pub struct WrappedResponse<T> {
    pub response: Option<T>,
    pub error: Option<Error>,
}

impl<T> From<Result<T>> for WrappedResponse<T> {
    fn from(outcome: Result<T>) -> Self {
        match outcome {
            Ok(response) => Self {
                response: Some(response),
                error: None,
            },
            Err(error) => Self {
                response: None,
                error: Some(error),
            },
        }
    }
}

impl<T> WrappedResponse<T> {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn into_result(self) -> Result<T> {
        match (self.response, self.error) {
            (_, Some(error)) => Err(error),
            (Some(response), None) => Ok(response),
            (None, None) => Err(Error::Unsupported("wrapped response holds no value".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RequestError;

    #[test]
    fn wrapped_reports_error_alongside_empty_response() {
        let wrapped = Wrapped::complete(Err(RequestError::aborted("x").into()));
        assert!(wrapped.response.is_none());
        assert_eq!(wrapped.error.as_ref().map(Error::code), Some(-1));
        assert!(!wrapped.is_ok());

        let ok = Wrapped::complete(Ok(Payload::Text("hi".into())));
        assert!(ok.error.is_none());
        assert_eq!(ok.into_result().unwrap(), Payload::Text("hi".into()));
    }
}
