use actix_web::{error::BlockingError, web};
use std::time::{Duration, Instant};

use crate::error::Error;

/// The point in time by which a request must have produced its response.
#[derive(Clone, Copy, Debug)]
pub struct Deadline {
    expires_at: Instant,
}

impl Deadline {
    #[must_use]
    pub fn after(timeout: Duration) -> Self {
        Self {
            expires_at: Instant::now() + timeout,
        }
    }

    /// Time left before expiry.
    ///
    /// # Errors
    ///
    /// Returns `DeadlineExceeded` once the deadline has passed.
    pub fn remaining(&self) -> Result<Duration, Error> {
        let now = Instant::now();
        if now >= self.expires_at {
            Err(Error::DeadlineExceeded)
        } else {
            Ok(self.expires_at - now)
        }
    }

    /// Remaining time in whole milliseconds, at least 1, for use as a
    /// server-side statement timeout.
    ///
    /// # Errors
    ///
    /// Returns `DeadlineExceeded` once the deadline has passed.
    pub fn remaining_millis(&self) -> Result<u64, Error> {
        let remaining = self.remaining()?;
        Ok(std::cmp::max(remaining.as_millis() as u64, 1))
    }

    /// Runs blocking storage work on the blocking pool and abandons it when
    /// the deadline expires first.
    ///
    /// # Errors
    ///
    /// Returns `DeadlineExceeded` on expiry, or whatever `f` returns.
    pub async fn run<F, T>(self, f: F) -> Result<T, Error>
    where
        F: FnOnce() -> Result<T, Error> + Send + 'static,
        T: Send + 'static,
    {
        let remaining = self.remaining()?;
        match tokio::time::timeout(remaining, run_blocking(f)).await {
            Ok(result) => result,
            Err(_) => Err(Error::DeadlineExceeded),
        }
    }
}

/// Runs blocking storage work on the blocking pool without a deadline.
///
/// # Errors
///
/// Returns whatever `f` returns, or `Internal` if the pool dropped the task.
pub async fn run_blocking<F, T>(f: F) -> Result<T, Error>
where
    F: FnOnce() -> Result<T, Error> + Send + 'static,
    T: Send + 'static,
{
    web::block(f).await.map_err(|e| match e {
        BlockingError::Error(e) => e,
        BlockingError::Canceled => Error::Internal("blocking task was canceled".to_string()),
    })
}
