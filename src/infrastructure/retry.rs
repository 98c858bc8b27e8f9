// 重试与轮询
//
// 提供：
// - 有界次数的网络调用重试（固定间隔或指数退避）
// - 可取消的轮询循环，直到条件满足

use std::{fmt::Debug, future::Future, time::Duration};

use super::cancellation::CancellationToken;
use crate::error::DomainError;

/// 重试配置
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// 最大尝试次数（含第一次）
    pub max_attempts: u32,
    /// 初始退避时间
    pub initial_backoff: Duration,
    /// 退避倍数，1.0 为固定间隔
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff: delay,
            backoff_multiplier: 1.0,
        }
    }

    pub fn exponential(max_attempts: u32, initial_backoff: Duration, multiplier: f64) -> Self {
        Self {
            max_attempts,
            initial_backoff,
            backoff_multiplier: multiplier,
        }
    }

    fn next_backoff(&self, current: Duration) -> Duration {
        current.mul_f64(self.backoff_multiplier.max(1.0))
    }
}

#[derive(Debug, PartialEq)]
pub enum RetryError<E> {
    Cancelled,
    Failed(E),
}

impl From<RetryError<DomainError>> for DomainError {
    fn from(err: RetryError<DomainError>) -> Self {
        match err {
            RetryError::Cancelled => DomainError::Cancelled,
            RetryError::Failed(e) => e,
        }
    }
}

/// 带重试地执行异步操作；所有尝试失败后返回最后一次的错误
pub async fn retry_async<T, E, F, Fut>(
    config: &RetryConfig,
    operation: &str,
    cancel: &CancellationToken,
    mut f: F,
) -> Result<T, RetryError<E>>
where
    E: Debug,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = config.max_attempts.max(1);
    let mut backoff = config.initial_backoff;

    for attempt in 1..=attempts {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }

        match f(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt == attempts => {
                tracing::error!(
                    operation,
                    attempts,
                    error = ?e,
                    "Operation failed after all retries"
                );
                return Err(RetryError::Failed(e));
            }
            Err(e) => {
                tracing::warn!(
                    operation,
                    attempt,
                    max_attempts = attempts,
                    error = ?e,
                    next_retry_in_ms = backoff.as_millis() as u64,
                    "Operation failed, will retry"
                );
                if !cancel.sleep(backoff).await {
                    return Err(RetryError::Cancelled);
                }
                backoff = config.next_backoff(backoff);
            }
        }
    }

    Err(RetryError::Cancelled)
}

/// 按固定间隔重复执行 `step`，直到返回 `Some`、出错或被取消
pub async fn repeat_until<T, E, F, Fut>(
    interval: Duration,
    cancel: &CancellationToken,
    mut step: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }
        if let Some(value) = step().await.map_err(RetryError::Failed)? {
            return Ok(value);
        }
        if !cancel.sleep(interval).await {
            return Err(RetryError::Cancelled);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let config = RetryConfig::fixed(3, Duration::from_millis(1));
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let result: Result<u32, RetryError<&str>> =
            retry_async(&config, "flaky", &cancel, |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err("boom")
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_returns_last_error() {
        let config = RetryConfig::fixed(2, Duration::from_millis(1));
        let cancel = CancellationToken::new();

        let result: Result<(), RetryError<String>> =
            retry_async(&config, "always_fails", &cancel, |attempt| async move {
                Err(format!("attempt {attempt}"))
            })
            .await;

        assert_eq!(result, Err(RetryError::Failed("attempt 2".to_string())));
    }

    #[tokio::test]
    async fn test_retry_stops_when_cancelled() {
        let config = RetryConfig::fixed(5, Duration::from_millis(1));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: Result<(), RetryError<()>> =
            retry_async(&config, "cancelled", &cancel, |_| async { Ok(()) }).await;
        assert_eq!(result, Err(RetryError::Cancelled));
    }

    #[tokio::test]
    async fn test_repeat_until_condition() {
        let cancel = CancellationToken::new();
        let polls = AtomicU32::new(0);

        let result: Result<u32, RetryError<()>> =
            repeat_until(Duration::from_millis(1), &cancel, || {
                let n = polls.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Ok((n >= 4).then_some(n)) }
            })
            .await;

        assert_eq!(result, Ok(4));
    }

    #[test]
    fn test_exponential_backoff() {
        let config = RetryConfig::exponential(5, Duration::from_millis(100), 2.0);
        assert_eq!(
            config.next_backoff(Duration::from_millis(100)),
            Duration::from_millis(200)
        );
        let fixed = RetryConfig::fixed(5, Duration::from_millis(100));
        assert_eq!(
            fixed.next_backoff(Duration::from_millis(100)),
            Duration::from_millis(100)
        );
    }

    #[test]
    fn test_retry_error_into_domain_error() {
        let err: DomainError = RetryError::Cancelled.into();
        assert!(matches!(err, DomainError::Cancelled));
    }
}
