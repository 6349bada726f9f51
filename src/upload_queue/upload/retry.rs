//! Retry logic with exponential backoff and error classification.
//!
//! Covers transient transport failures inside one upload. Units that still
//! fail end up in the batch retry set instead.

use std::future::Future;
use std::time::Duration;

use super::transport::TransportError;
use crate::config::UploadConfig;

/// Error classification for determining retry behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    /// Client errors (400-499) and policy rejections - don't retry
    Client,
    /// Server errors (500-599) - temporary issues, retry with backoff
    Server,
    /// Network errors - connection issues, retry with backoff
    Network,
}

/// Retry strategy configuration
#[derive(Debug, Clone)]
pub struct RetryStrategy {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential backoff
    pub base_delay_ms: u64,
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
        }
    }
}

impl RetryStrategy {
    pub fn new(max_retries: u32, base_delay_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay_ms,
        }
    }

    pub fn from_config(config: &UploadConfig) -> Self {
        Self::new(config.network_retries, config.retry_base_delay_ms)
    }

    /// Check if a failed attempt should be retried
    pub fn should_retry(&self, attempt: u32, error_type: ErrorType) -> bool {
        // Never retry client errors
        if error_type == ErrorType::Client {
            return false;
        }

        attempt < self.max_retries
    }

    /// Exponential backoff: base_delay * 2^attempt
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }

    /// Run a transport call, retrying transient failures
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, TransportError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let mut attempt = 0;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    let error_type = classify_error(&e);
                    if !self.should_retry(attempt, error_type) {
                        return Err(e);
                    }

                    let delay = self.calculate_backoff(attempt);
                    tracing::warn!(
                        operation,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transport call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Classify a transport error into an ErrorType
pub fn classify_error(error: &TransportError) -> ErrorType {
    match error {
        TransportError::Network(_) => ErrorType::Network,
        TransportError::Status { code, .. } if *code >= 500 => ErrorType::Server,
        TransportError::InvalidResponse(_) => ErrorType::Server,
        TransportError::Status { .. }
        | TransportError::QuotaExceeded
        | TransportError::FileTooLarge => ErrorType::Client,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn status(code: u16) -> TransportError {
        TransportError::Status {
            code,
            message: String::new(),
        }
    }

    #[test]
    fn test_classify_client_errors() {
        assert_eq!(classify_error(&status(400)), ErrorType::Client);
        assert_eq!(classify_error(&status(401)), ErrorType::Client);
        assert_eq!(classify_error(&status(404)), ErrorType::Client);
        assert_eq!(classify_error(&TransportError::QuotaExceeded), ErrorType::Client);
        assert_eq!(classify_error(&TransportError::FileTooLarge), ErrorType::Client);
    }

    #[test]
    fn test_classify_server_errors() {
        assert_eq!(classify_error(&status(500)), ErrorType::Server);
        assert_eq!(classify_error(&status(503)), ErrorType::Server);
        assert_eq!(
            classify_error(&TransportError::InvalidResponse("bad json".to_string())),
            ErrorType::Server
        );
    }

    #[test]
    fn test_classify_network_errors() {
        assert_eq!(
            classify_error(&TransportError::Network("Connection refused".to_string())),
            ErrorType::Network
        );
    }

    #[test]
    fn test_default_retry_strategy() {
        let strategy = RetryStrategy::default();
        assert_eq!(strategy.max_retries, 3);
        assert_eq!(strategy.base_delay_ms, 1000);
    }

    #[test]
    fn test_should_retry() {
        let strategy = RetryStrategy::new(2, 10);

        assert!(strategy.should_retry(0, ErrorType::Network));
        assert!(strategy.should_retry(1, ErrorType::Server));
        assert!(!strategy.should_retry(2, ErrorType::Network));
        assert!(!strategy.should_retry(0, ErrorType::Client));
    }

    #[test]
    fn test_calculate_backoff() {
        let strategy = RetryStrategy::new(3, 100);

        assert_eq!(strategy.calculate_backoff(0), Duration::from_millis(100));
        assert_eq!(strategy.calculate_backoff(1), Duration::from_millis(200));
        assert_eq!(strategy.calculate_backoff(3), Duration::from_millis(800));
    }

    #[tokio::test]
    async fn test_run_retries_transient_errors() {
        let strategy = RetryStrategy::new(3, 1);
        let calls = AtomicU32::new(0);

        let result = strategy
            .run("upload_object", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(TransportError::Network("reset".to_string()))
                    } else {
                        Ok("key")
                    }
                }
            })
            .await;

        assert_eq!(result, Ok("key"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_run_does_not_retry_client_errors() {
        let strategy = RetryStrategy::new(3, 1);
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = strategy
            .run("create_file", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TransportError::QuotaExceeded) }
            })
            .await;

        assert_eq!(result, Err(TransportError::QuotaExceeded));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_gives_up_after_max_retries() {
        let strategy = RetryStrategy::new(2, 1);
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = strategy
            .run("upload_object", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(status(502)) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
