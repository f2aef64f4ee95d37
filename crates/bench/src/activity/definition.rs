//! Activity trait definition

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use super::ActivityContext;
use crate::error::BenchError;

/// A unit of benchmark work executed by an [`ActivityHost`](super::ActivityHost)
///
/// Activities:
/// - Receive their input by value on every attempt
/// - May fail and be retried according to the retry policy
/// - Heartbeat progress so a retried attempt can resume
///
/// # Example
///
/// ```ignore
/// struct CountActivity;
///
/// #[async_trait]
/// impl Activity for CountActivity {
///     const TYPE: &'static str = "count";
///     type Input = u32;
///     type Output = u32;
///
///     async fn execute(&self, ctx: &ActivityContext, input: u32) -> Result<u32, BenchError> {
///         ctx.heartbeat(&input)?;
///         Ok(input + 1)
///     }
/// }
/// ```
#[async_trait]
pub trait Activity: Send + Sync + 'static {
    /// Unique type identifier for this activity
    const TYPE: &'static str;

    /// Input type for the activity
    type Input: Serialize + DeserializeOwned + Clone + Send + Sync;

    /// Output type for the activity
    type Output: Serialize + DeserializeOwned + Send;

    /// Execute one attempt
    ///
    /// # Errors
    ///
    /// Return a retryable [`BenchError`] for transient failures and a
    /// non-retryable one (`TimedOut`, `InvalidSpec`, `Cancelled`) otherwise.
    async fn execute(
        &self,
        ctx: &ActivityContext,
        input: Self::Input,
    ) -> Result<Self::Output, BenchError>;
}
