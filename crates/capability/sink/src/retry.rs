//! 投递重试：瞬态错误指数退避加抖动，永久错误立即放弃。

use crate::{Target, TargetError};
use rand::Rng;
use std::time::Duration;
use tracing::warn;

/// 重试策略。
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 200,
            max_delay_ms: 5_000,
        }
    }
}

impl RetryPolicy {
    /// 第 attempt 次重试前的等待时长，指数增长封顶后加满幅抖动。
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay_ms
            .saturating_mul(1u64 << attempt.min(16))
            .min(self.max_delay_ms);
        let jitter = rand::thread_rng().gen_range(0..=exp / 2);
        Duration::from_millis(exp + jitter)
    }
}

/// 带重试投递一条记录。永久错误与重试耗尽原样返回。
pub async fn send_with_retry(
    target: &dyn Target,
    data: &str,
    policy: &RetryPolicy,
) -> Result<usize, TargetError> {
    let mut attempt = 0u32;
    loop {
        match target.to(data).await {
            Ok(n) => return Ok(n),
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                if attempt >= policy.max_retries {
                    return Err(err);
                }
                let delay = policy.delay(attempt);
                warn!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "delivery retry");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StatusCell;
    use async_trait::async_trait;
    use domain::EntityStatus;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio_util::sync::CancellationToken;

    struct FlakyTarget {
        calls: AtomicU32,
        fail_first: u32,
        fatal: bool,
        status: StatusCell,
    }

    impl FlakyTarget {
        fn new(fail_first: u32, fatal: bool) -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail_first,
                fatal,
                status: StatusCell::new(EntityStatus::Up),
            }
        }
    }

    #[async_trait]
    impl Target for FlakyTarget {
        async fn start(&self, _token: CancellationToken) -> Result<(), TargetError> {
            Ok(())
        }

        async fn to(&self, data: &str) -> Result<usize, TargetError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                if self.fatal {
                    return Err(TargetError::Fatal("rejected".into()));
                }
                return Err(TargetError::Transient("timeout".into()));
            }
            Ok(data.len())
        }

        fn status(&self) -> EntityStatus {
            self.status.get()
        }

        async fn ping(&self) -> Result<(), TargetError> {
            Ok(())
        }

        async fn stop(&self) {}
    }

    #[test]
    fn delay_grows_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay_ms: 100,
            max_delay_ms: 1_000,
        };
        let d0 = policy.delay(0).as_millis() as u64;
        assert!((100..=150).contains(&d0));
        let d10 = policy.delay(10).as_millis() as u64;
        assert!((1_000..=1_500).contains(&d10));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_retried_until_success() {
        let target = FlakyTarget::new(2, false);
        let n = send_with_retry(&target, "hello", &RetryPolicy::default())
            .await
            .unwrap();
        assert_eq!(n, 5);
        assert_eq!(target.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_error_not_retried() {
        let target = FlakyTarget::new(9, true);
        let err = send_with_retry(&target, "hello", &RetryPolicy::default())
            .await
            .unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(target.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_exhausted_returns_last_error() {
        let target = FlakyTarget::new(99, false);
        let policy = RetryPolicy {
            max_retries: 2,
            base_delay_ms: 10,
            max_delay_ms: 100,
        };
        let err = send_with_retry(&target, "hello", &policy).await.unwrap_err();
        assert!(!err.is_fatal());
        assert_eq!(target.calls.load(Ordering::SeqCst), 3);
    }
}
