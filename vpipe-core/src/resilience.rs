//! Timeout constants and re-exports of the production-grade retry (`backon`)
//! and circuit breaker (`failsafe`) crates used at the execution-strategy
//! and worker-pool boundaries.

pub mod timeout {
    use std::time::Duration;

    pub const DB_QUERY_TIMEOUT: Duration = Duration::from_secs(30);
    pub const REDIS_OPERATION_TIMEOUT: Duration = Duration::from_secs(5);
    pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
}

pub mod retry {
    //! `should_retry_error` classifies errors as transient or not; the
    //! actual backoff schedule lives in `backoff::worker_backoff`.

    pub fn should_retry_error(err: &(dyn std::error::Error + 'static)) -> bool {
        if let Some(io_err) = err.downcast_ref::<std::io::Error>() {
            return is_transient_io_error(io_err);
        }

        let msg = err.to_string().to_lowercase();
        msg.contains("timed out")
            || msg.contains("timeout")
            || msg.contains("connection reset")
            || msg.contains("connection refused")
            || msg.contains("connection aborted")
            || msg.contains("broken pipe")
    }

    fn is_transient_io_error(err: &std::io::Error) -> bool {
        matches!(
            err.kind(),
            std::io::ErrorKind::TimedOut
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::BrokenPipe
                | std::io::ErrorKind::UnexpectedEof
        )
    }
}

pub mod backoff {
    use backon::ExponentialBuilder;
    use std::time::Duration;

    /// `2^attempts` seconds, capped at `max_seconds`. `attempts` is the
    /// number of attempts already made (0 on first retry).
    #[must_use]
    pub fn worker_delay(attempts: u32, max_seconds: u64) -> Duration {
        let secs = 2u64.saturating_pow(attempts).min(max_seconds);
        Duration::from_secs(secs)
    }

    /// An `ExponentialBuilder` for use with `backon`'s `Retryable` adapter,
    /// mirroring the same `2^n` capped-at-60s policy.
    #[must_use]
    pub fn worker_retry_policy(max_seconds: u64) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(max_seconds))
            .with_factor(2.0)
    }
}

pub mod circuit_breaker {
    use std::time::Duration;

    pub use failsafe::CircuitBreaker;

    pub fn create(
        failure_threshold: u32,
        min_backoff: Duration,
        max_backoff: Duration,
    ) -> failsafe::StateMachine<
        failsafe::failure_policy::ConsecutiveFailures<failsafe::backoff::Exponential>,
        (),
    > {
        let backoff = failsafe::backoff::exponential(min_backoff, max_backoff);
        let policy = failsafe::failure_policy::consecutive_failures(failure_threshold, backoff);
        failsafe::Config::new().failure_policy(policy).build()
    }

    /// 5 consecutive failures, 10-60s backoff — used for the remote
    /// execution strategy's availability probe.
    pub fn create_default() -> failsafe::StateMachine<
        failsafe::failure_policy::ConsecutiveFailures<failsafe::backoff::Exponential>,
        (),
    > {
        create(5, Duration::from_secs(10), Duration::from_secs(60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_delay_doubles_then_caps() {
        assert_eq!(backoff::worker_delay(0, 60).as_secs(), 1);
        assert_eq!(backoff::worker_delay(1, 60).as_secs(), 2);
        assert_eq!(backoff::worker_delay(2, 60).as_secs(), 4);
        assert_eq!(backoff::worker_delay(10, 60).as_secs(), 60);
    }

    #[test]
    fn should_retry_error_matches_timeout_kinds() {
        let timeout_err = std::io::Error::new(std::io::ErrorKind::TimedOut, "timeout");
        assert!(retry::should_retry_error(&timeout_err));

        let not_found = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert!(!retry::should_retry_error(&not_found));
    }

    #[test]
    fn circuit_breaker_opens_after_consecutive_failures() {
        use failsafe::CircuitBreaker as _;
        let cb = circuit_breaker::create(3, std::time::Duration::from_secs(2), std::time::Duration::from_secs(10));
        assert!(cb.is_call_permitted());
        for _ in 0..3 {
            cb.on_error();
        }
        assert!(!cb.is_call_permitted());
    }
}
