//! Failure bookkeeping for drop sequences that must run to completion.

use log::warn;

use citystage_core::StageError;

/// One member that failed to release during teardown.
#[derive(Debug)]
pub struct TeardownFailure {
    /// Table name, connection label or directory path.
    pub subject: String,
    /// What went wrong.
    pub error: StageError,
}

/// Outcome of [`CacheRegistry::drop_all`](crate::CacheRegistry::drop_all).
///
/// Teardown never stops at the first failure; every failure is logged and
/// kept here in the order it happened.
#[derive(Debug, Default)]
#[must_use = "teardown failures are only reported through the report"]
pub struct TeardownReport {
    failures: Vec<TeardownFailure>,
}

impl TeardownReport {
    /// Whether every member was released cleanly.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Failures in the order they happened.
    #[must_use]
    pub fn failures(&self) -> &[TeardownFailure] {
        &self.failures
    }

    /// Convert into the first failure, if any.
    ///
    /// # Errors
    /// Returns the first recorded [`StageError`].
    pub fn into_result(self) -> Result<(), StageError> {
        self.failures
            .into_iter()
            .next()
            .map_or(Ok(()), |failure| Err(failure.error))
    }

    pub(crate) fn record(&mut self, subject: &str, outcome: Result<(), StageError>) {
        if let Err(error) = outcome {
            warn!("teardown of {subject} failed: {error}");
            self.failures.push(TeardownFailure {
                subject: subject.to_owned(),
                error,
            });
        }
    }
}

/// Keep the first error of a drop sequence, logging later ones.
pub(crate) fn keep_first(
    first: &mut Option<StageError>,
    subject: &str,
    outcome: Result<(), StageError>,
) {
    let Err(error) = outcome else {
        return;
    };
    warn!("failed to release {subject}: {error}");
    if first.is_none() {
        *first = Some(error);
    }
}

/// Turn the first kept error into the sequence's result.
pub(crate) fn finish(first: Option<StageError>) -> Result<(), StageError> {
    first.map_or(Ok(()), Err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn failure(table: &str) -> Result<(), StageError> {
        Err(StageError::storage("drop", table, rusqlite::Error::InvalidQuery))
    }

    #[rstest]
    fn keeps_only_the_first_error() {
        let mut first = None;
        keep_first(&mut first, "a", Ok(()));
        keep_first(&mut first, "b", failure("tmp_b"));
        keep_first(&mut first, "c", failure("tmp_c"));

        let err = finish(first).expect_err("first error kept");
        assert!(matches!(err, StageError::Storage { ref table, .. } if table == "tmp_b"));
    }

    #[rstest]
    fn report_collects_every_failure_in_order() {
        let mut report = TeardownReport::default();
        report.record("tmp_a", Ok(()));
        report.record("tmp_b", failure("tmp_b"));
        report.record("tmp_c", failure("tmp_c"));

        assert!(!report.is_clean());
        let subjects: Vec<_> = report.failures().iter().map(|f| f.subject.as_str()).collect();
        assert_eq!(subjects, vec!["tmp_b", "tmp_c"]);
        assert!(report.into_result().is_err());
    }

    #[rstest]
    fn empty_report_is_clean() {
        let report = TeardownReport::default();
        assert!(report.is_clean());
        assert!(report.into_result().is_ok());
    }
}
