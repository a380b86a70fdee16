use std::time::Duration;

use serde::{Serialize, Serializer};

use crate::policy::PolicyResult;

/// Policy results for a presentation and each credential it embeds.
///
/// No overall verdict is computed; callers decide which failures matter.
#[derive(Debug, Clone, Serialize)]
pub struct PresentationVerificationResponse {
    entries: Vec<PresentationResultEntry>,
    #[serde(rename = "time_ms", serialize_with = "serialize_millis")]
    time: Duration,
    policies_run: usize,
}

impl PresentationVerificationResponse {
    pub(crate) fn new(
        entries: Vec<PresentationResultEntry>,
        time: Duration,
        policies_run: usize,
    ) -> Self {
        Self {
            entries,
            time,
            policies_run,
        }
    }

    /// The presentation entry first, then one per credential in
    /// presentation order.
    pub fn entries(&self) -> &[PresentationResultEntry] {
        &self.entries
    }

    /// Wall-clock time of the whole verification.
    pub fn time(&self) -> Duration {
        self.time
    }

    /// Number of policy runs that completed, successfully or not.
    pub fn policies_run(&self) -> usize {
        self.policies_run
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PresentationResultEntry {
    credential_type: String,
    policy_results: Vec<PolicyResult>,
}

impl PresentationResultEntry {
    pub(crate) fn new(credential_type: String, policy_results: Vec<PolicyResult>) -> Self {
        Self {
            credential_type,
            policy_results,
        }
    }

    pub fn credential_type(&self) -> &str {
        &self.credential_type
    }

    /// Results in completion order.
    pub fn policy_results(&self) -> &[PolicyResult] {
        &self.policy_results
    }

    /// The result of the named policy, if it was run for this entry.
    pub fn result(&self, policy: &str) -> Option<&PolicyResult> {
        self.policy_results
            .iter()
            .find(|result| result.request().name() == policy)
    }
}

fn serialize_millis<S: Serializer>(time: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(time.as_millis()).unwrap_or(u64::MAX))
}
