//! Tagged stage outcomes and the "try primary, else fallbacks, else default"
//! combinator every stage is built on.

use std::fmt;

use futures_util::future::{BoxFuture, FutureExt};

use crate::job::StageReport;

/// Where a stage's value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Primary,
    Fallback(&'static str),
    Default,
}

impl Source {
    pub fn is_degraded(&self) -> bool {
        !matches!(self, Source::Primary)
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Primary => f.write_str("primary"),
            Source::Fallback(tier) => write!(f, "fallback:{}", tier),
            Source::Default => f.write_str("default"),
        }
    }
}

/// A short classification of an error that is safe to show to users.
/// Upstream messages and paths stay in the logs.
pub trait FailureKind {
    fn kind(&self) -> &'static str;
}

impl FailureKind for &str {
    fn kind(&self) -> &'static str {
        "failed"
    }
}

impl FailureKind for String {
    fn kind(&self) -> &'static str {
        "failed"
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierFailure {
    pub tier: &'static str,
    pub kind: &'static str,
    /// Full error text, for logs only.
    pub reason: String,
}

impl fmt::Display for TierFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.tier, self.reason)
    }
}

#[derive(Debug, Clone)]
pub struct Outcome<T> {
    pub value: T,
    pub source: Source,
    /// Failures of the tiers tried before `source`, in order.
    pub failures: Vec<TierFailure>,
}

impl<T> Outcome<T> {
    pub fn primary(value: T) -> Self {
        Self {
            value,
            source: Source::Primary,
            failures: Vec::new(),
        }
    }

    pub fn defaulted(value: T, failures: Vec<TierFailure>) -> Self {
        Self {
            value,
            source: Source::Default,
            failures,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        Outcome {
            value: f(self.value),
            source: self.source,
            failures: self.failures,
        }
    }

    pub fn report(&self, stage: &str) -> StageReport {
        StageReport {
            stage: stage.to_string(),
            source: self.source.to_string(),
            failures: self
                .failures
                .iter()
                .map(|failure| format!("{}: {}", failure.tier, failure.kind))
                .collect(),
        }
    }
}

/// One attempt in a cascade. The future is not polled until its turn.
pub struct Tier<'a, T> {
    name: &'static str,
    run: BoxFuture<'a, Result<T, (&'static str, String)>>,
}

impl<'a, T> Tier<'a, T> {
    pub fn new<F, E>(name: &'static str, run: F) -> Self
    where
        F: std::future::Future<Output = Result<T, E>> + Send + 'a,
        E: fmt::Display + FailureKind,
    {
        Self {
            name,
            run: run.map(|r| r.map_err(|e| (e.kind(), e.to_string()))).boxed(),
        }
    }
}

/// Runs `tiers` in order and returns the first success. The first tier is
/// reported as primary, later ones as fallbacks. When every tier fails the
/// value comes from `default`.
pub async fn cascade<'a, T>(
    stage: &str,
    tiers: Vec<Tier<'a, T>>,
    default: impl FnOnce() -> T,
) -> Outcome<T> {
    let mut failures = Vec::new();
    for (index, tier) in tiers.into_iter().enumerate() {
        match tier.run.await {
            Ok(value) => {
                let source = if index == 0 {
                    Source::Primary
                } else {
                    Source::Fallback(tier.name)
                };
                if source.is_degraded() {
                    tracing::info!(stage, tier = tier.name, "Stage recovered via fallback");
                }
                return Outcome {
                    value,
                    source,
                    failures,
                };
            }
            Err((kind, reason)) => {
                tracing::warn!(stage, tier = tier.name, reason = %reason, "Stage tier failed");
                failures.push(TierFailure {
                    tier: tier.name,
                    kind,
                    reason,
                });
            }
        }
    }

    tracing::warn!(stage, "All tiers failed, using default");
    Outcome::defaulted(default(), failures)
}

/// Returns `input` when `result` failed, logging the error.
pub fn recover<T, E: fmt::Display>(step: &str, result: Result<T, E>, input: T) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(step, error = %e, "Image step failed, keeping input");
            input
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_primary_success_short_circuits() {
        let later_runs = AtomicUsize::new(0);
        let outcome = cascade(
            "test",
            vec![
                Tier::new("model", async { Ok::<_, String>(1) }),
                Tier::new("composite", async {
                    later_runs.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(2)
                }),
            ],
            || 0,
        )
        .await;

        assert_eq!(outcome.value, 1);
        assert_eq!(outcome.source, Source::Primary);
        assert!(outcome.failures.is_empty());
        assert_eq!(later_runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_falls_through_in_order() {
        let outcome = cascade(
            "test",
            vec![
                Tier::new("model", async { Err::<i32, _>("timed out") }),
                Tier::new("composite", async { Err::<i32, _>("no fabric") }),
                Tier::new("overlay", async { Ok::<_, &str>(3) }),
            ],
            || 0,
        )
        .await;

        assert_eq!(outcome.value, 3);
        assert_eq!(outcome.source, Source::Fallback("overlay"));
        assert_eq!(
            outcome.failures,
            vec![
                TierFailure {
                    tier: "model",
                    kind: "failed",
                    reason: "timed out".to_string()
                },
                TierFailure {
                    tier: "composite",
                    kind: "failed",
                    reason: "no fabric".to_string()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_default_when_everything_fails() {
        let outcome = cascade(
            "test",
            vec![Tier::new("model", async { Err::<i32, _>("boom") })],
            || 42,
        )
        .await;
        assert_eq!(outcome.value, 42);
        assert_eq!(outcome.source, Source::Default);
        assert_eq!(outcome.failures.len(), 1);

        let report = outcome.report("edges");
        assert_eq!(report.source, "default");
        assert_eq!(report.failures, vec!["model: failed".to_string()]);
    }

    struct UpstreamFailure;

    impl fmt::Display for UpstreamFailure {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("HTTP 500 from https://models.internal/predict: {\"trace\": \"/srv/app\"}")
        }
    }

    impl FailureKind for UpstreamFailure {
        fn kind(&self) -> &'static str {
            "status"
        }
    }

    #[tokio::test]
    async fn test_report_omits_error_text() {
        let outcome = cascade(
            "segmentation",
            vec![Tier::new("model", async { Err::<i32, _>(UpstreamFailure) })],
            || 0,
        )
        .await;

        assert!(outcome.failures[0].reason.contains("HTTP 500"));
        let report = outcome.report("segmentation");
        assert_eq!(report.failures, vec!["model: status".to_string()]);
        assert!(report.failures.iter().all(|f| !f.contains('/')));
    }

    #[tokio::test]
    async fn test_empty_cascade_is_default() {
        let outcome: Outcome<i32> = cascade("test", Vec::new(), || 7).await;
        assert_eq!(outcome.value, 7);
        assert_eq!(outcome.source, Source::Default);
    }

    #[test]
    fn test_recover_keeps_input_on_error() {
        assert_eq!(recover("denoise", Err::<i32, _>("bad"), 5), 5);
        assert_eq!(recover("denoise", Ok::<_, String>(9), 5), 9);
    }

    #[test]
    fn test_source_display() {
        assert_eq!(Source::Primary.to_string(), "primary");
        assert_eq!(Source::Fallback("transform").to_string(), "fallback:transform");
        assert!(Source::Default.is_degraded());
    }
}
