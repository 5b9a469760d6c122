//! Cache warming.

use std::collections::BTreeMap;

use futures::future::join_all;
use querygate_domain::QueryRequest;
use serde::Serialize;
use tracing::{info, warn};

use super::gate::QueryGate;

/// Outcome of a preload run, keyed by operation name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PreloadReport {
    results: BTreeMap<String, bool>,
}

impl PreloadReport {
    /// Records an outcome. An operation preloaded more than once only counts
    /// as successful if every run succeeded.
    fn record(&mut self, operation: String, succeeded: bool) {
        let entry = self.results.entry(operation).or_insert(true);
        *entry &= succeeded;
    }

    /// `None` if the operation was not part of the run.
    pub fn succeeded(&self, operation: &str) -> Option<bool> {
        self.results.get(operation).copied()
    }

    pub fn success_count(&self) -> usize {
        self.results.values().filter(|ok| **ok).count()
    }

    pub fn failure_count(&self) -> usize {
        self.results.len() - self.success_count()
    }

    pub fn all_succeeded(&self) -> bool {
        self.results.values().all(|ok| *ok)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.results.iter().map(|(op, ok)| (op.as_str(), *ok))
    }
}

impl QueryGate {
    /// Runs read requests concurrently to populate the cache.
    ///
    /// A failing request is logged and reported; it never stops the others.
    /// Mutations are not preloaded and are reported as failed.
    pub async fn preload(&self, requests: Vec<QueryRequest>) -> PreloadReport {
        let total = requests.len();
        let outcomes = join_all(requests.into_iter().map(|request| async move {
            let operation = request.operation.clone();
            if request.is_mutation() {
                warn!(%operation, "refusing to preload a mutation");
                return (operation, false);
            }
            match self.execute(request).await {
                Ok(_) => (operation, true),
                Err(err) => {
                    warn!(%operation, error = %err, "preload failed");
                    (operation, false)
                }
            }
        }))
        .await;

        let mut report = PreloadReport::default();
        for (operation, succeeded) in outcomes {
            report.record(operation, succeeded);
        }

        info!(
            total,
            succeeded = report.success_count(),
            failed = report.failure_count(),
            "cache preload finished"
        );
        report
    }
}
