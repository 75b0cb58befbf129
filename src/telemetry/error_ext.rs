//! Error tracing extensions
//!
//! Logs errors with their classification and source chain.

use std::error::Error as StdError;

use crate::types::SonarError;

/// Extension trait for adding tracing context to errors
pub trait ErrorTraceExt {
    /// Log with kind, retryable flag and error chain
    ///
    /// Client errors are logged as warnings, everything else as errors.
    fn trace_error(&self, context: &str) -> &Self;
}

impl ErrorTraceExt for SonarError {
    fn trace_error(&self, context: &str) -> &Self {
        let mut error_chain = Vec::new();
        let mut current_source = self.source();
        while let Some(source) = current_source {
            error_chain.push(source.to_string());
            current_source = source.source();
        }

        let kind = self.kind().as_str();
        if self.is_client_error() {
            tracing::warn!(
                context,
                error = %self,
                kind,
                error_chain = ?error_chain,
                "Rejected"
            );
        } else {
            tracing::error!(
                context,
                error = %self,
                kind,
                is_retryable = self.is_retryable(),
                error_chain_len = error_chain.len(),
                error_chain = ?error_chain,
                "Error occurred with full context"
            );
        }
        self
    }
}

/// Extension trait for Result types
pub trait ResultTraceExt<T, E>: Sized {
    /// Convert the error to `SonarError` and log it under `context`
    fn trace_context(self, context: &str) -> Result<T, SonarError>
    where
        E: StdError + Send + Sync + 'static;
}

impl<T, E> ResultTraceExt<T, E> for Result<T, E>
where
    E: StdError + Send + Sync + 'static,
    SonarError: From<E>,
{
    fn trace_context(self, context: &str) -> Result<T, SonarError> {
        self.map_err(|e| {
            let error = SonarError::from(e);
            error.trace_error(context);
            error
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_trace_ext() {
        let error = SonarError::spawn_failed("agent-1", "no such file");
        let _ = error.trace_error("spawn");
    }

    #[test]
    fn test_result_trace_ext_converts() {
        let result: Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "pipe closed",
        ));
        let err = result.trace_context("write").unwrap_err();
        assert!(matches!(err, SonarError::Io(_)));
    }

    #[test]
    fn test_ok_passes_through() {
        let result: Result<u8, SonarError> = Ok(7);
        assert_eq!(result.trace_context("noop").unwrap(), 7);
    }
}
