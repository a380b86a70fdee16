//! Runs verification policies against a presentation and the credentials it
//! embeds.

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Instant,
};

use anyhow::{anyhow, bail, Context, Result};
use serde_json::Value as Json;
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, warn};

use crate::{
    config::{PolicyRequestConfig, ResolvedPolicies, VerifierConfig},
    policy::{
        PolicyContext, PolicyOutcome, PolicyRegistry, PolicyRequest, PolicyResult,
        VerificationPolicy,
    },
};

use presentation::{PolicyInput, Subject};

mod presentation;
pub mod response;

pub use response::{PresentationResultEntry, PresentationVerificationResponse};

#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    #[error("invalid VP token: {0}")]
    InvalidVpToken(String),
}

/// Verifies `vp_token` against the given policies.
///
/// `vp_policies` run against the presentation. `global_vc_policies`, plus the
/// entry of `specific_policies` for the credential's type, run against each
/// embedded credential. Every policy runs in its own task; an error or panic
/// is recorded as a [`PolicyOutcome::Failure`] and does not affect the other
/// runs. Only a VP token that cannot be decoded fails the call.
///
/// Every run, presentation or credential, receives the caller's `context`.
pub async fn verify_presentation(
    vp_token: &str,
    vp_policies: &[PolicyRequest],
    global_vc_policies: &[PolicyRequest],
    specific_policies: &BTreeMap<String, Vec<PolicyRequest>>,
    context: PolicyContext,
) -> Result<PresentationVerificationResponse, VerificationError> {
    let start = Instant::now();
    let (presentation, credentials) = presentation::subjects(vp_token)?;
    debug!(
        presentation_type = %presentation.credential_type,
        credentials = credentials.len(),
        "verifying presentation"
    );

    let policies_run = Arc::new(AtomicUsize::new(0));
    let context = Arc::new(context);

    let mut entries = Vec::with_capacity(credentials.len() + 1);
    entries.push(spawn_entry(
        presentation,
        vp_policies.iter(),
        &context,
        &policies_run,
    ));
    for credential in credentials {
        let specific = specific_policies
            .get(&credential.credential_type)
            .map(Vec::as_slice)
            .unwrap_or_default();
        entries.push(spawn_entry(
            credential,
            global_vc_policies.iter().chain(specific),
            &context,
            &policies_run,
        ));
    }

    let mut results = Vec::with_capacity(entries.len());
    for entry in entries {
        results.push(entry.collect().await);
    }

    let time = start.elapsed();
    let policies_run = policies_run.load(Ordering::SeqCst);
    debug!(policies_run, time_ms = time.as_millis() as u64, "presentation verified");

    Ok(PresentationVerificationResponse::new(
        results,
        time,
        policies_run,
    ))
}

/// An entry whose policies are running.
struct PendingEntry {
    credential_type: String,
    results: Arc<Mutex<Vec<PolicyResult>>>,
    runs: Vec<(PolicyRequest, JoinHandle<()>)>,
    policies_run: Arc<AtomicUsize>,
}

impl PendingEntry {
    async fn collect(self) -> PresentationResultEntry {
        for (request, run) in self.runs {
            if let Err(e) = run.await {
                warn!(
                    credential_type = %self.credential_type,
                    policy = request.name(),
                    "policy run was lost: {e}"
                );
                let outcome = PolicyOutcome::Failure(Arc::new(anyhow!(
                    "policy `{}` was lost: {e}",
                    request.name()
                )));
                self.results
                    .lock()
                    .await
                    .push(PolicyResult::new(request, outcome));
                self.policies_run.fetch_add(1, Ordering::SeqCst);
            }
        }
        let policy_results = std::mem::take(&mut *self.results.lock().await);
        PresentationResultEntry::new(self.credential_type, policy_results)
    }
}

fn spawn_entry<'a>(
    subject: Subject,
    requests: impl Iterator<Item = &'a PolicyRequest>,
    context: &Arc<PolicyContext>,
    policies_run: &Arc<AtomicUsize>,
) -> PendingEntry {
    let results = Arc::new(Mutex::new(Vec::new()));

    let runs = requests
        .map(|request| {
            let request = request.clone();
            let task_request = request.clone();
            let input = subject.input.clone();
            let context = context.clone();
            let results = results.clone();
            let policies_run = policies_run.clone();

            let run = tokio::spawn(async move {
                let request = task_request;
                let outcome = match input {
                    Ok(input) => {
                        // A nested task turns a panicking policy into a join error.
                        let run = tokio::spawn(run_policy(request.clone(), input, context));
                        match run.await {
                            Ok(result) => PolicyOutcome::from(result),
                            Err(e) => PolicyOutcome::Failure(Arc::new(anyhow!(
                                "policy `{}` did not complete: {e}",
                                request.name()
                            ))),
                        }
                    }
                    Err(e) => PolicyOutcome::Failure(e),
                };

                if !outcome.is_success() {
                    debug!(policy = request.name(), "policy failed");
                }
                results.lock().await.push(PolicyResult::new(request, outcome));
                policies_run.fetch_add(1, Ordering::SeqCst);
            });
            (request, run)
        })
        .collect();

    PendingEntry {
        credential_type: subject.credential_type,
        results,
        runs,
        policies_run: policies_run.clone(),
    }
}

async fn run_policy(
    request: PolicyRequest,
    input: Arc<PolicyInput>,
    context: Arc<PolicyContext>,
) -> Result<Json> {
    let args = request.args();
    match request.policy() {
        VerificationPolicy::Jwt(policy) => {
            let Some(jwt) = &input.jwt else {
                bail!("`{}` requires a JWT, but the credential is not JWT secured", policy.name())
            };
            policy.verify(jwt, args, &context).await
        }
        VerificationPolicy::CredentialData(policy) => {
            policy.verify(&input.data, args, &context).await
        }
        VerificationPolicy::CredentialWrapper(policy) => {
            policy.verify(&input.payload, args, &context).await
        }
    }
}

/// Verifies presentations with a fixed set of policies.
#[derive(Debug, Clone)]
pub struct Verifier {
    policies: ResolvedPolicies,
}

impl Verifier {
    pub fn builder() -> VerifierBuilder {
        VerifierBuilder::default()
    }

    pub fn policies(&self) -> &ResolvedPolicies {
        &self.policies
    }

    /// Verify a presentation, see [`verify_presentation`].
    pub async fn verify(
        &self,
        vp_token: &str,
        context: PolicyContext,
    ) -> Result<PresentationVerificationResponse, VerificationError> {
        verify_presentation(
            vp_token,
            &self.policies.vp_policies,
            &self.policies.vc_policies,
            &self.policies.specific_policies,
            context,
        )
        .await
    }
}

/// Builder struct for [Verifier].
#[derive(Debug, Clone, Default)]
pub struct VerifierBuilder {
    registry: Option<PolicyRegistry>,
    config: VerifierConfig,
}

impl VerifierBuilder {
    /// Build the verifier, resolving every requested policy in the registry.
    pub fn build(self) -> Result<Verifier> {
        let Self { registry, config } = self;

        let Some(registry) = registry else {
            bail!("policy registry is required, see `with_registry`")
        };

        let policies = config
            .resolve(&registry)
            .context("failed to resolve verifier policies")?;

        Ok(Verifier { policies })
    }

    /// Set the [PolicyRegistry] that policy names are looked up in.
    pub fn with_registry(mut self, registry: PolicyRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Replace every policy requested so far with those in `config`.
    pub fn with_config(mut self, config: VerifierConfig) -> Self {
        self.config = config;
        self
    }

    /// Run a policy against the presentation.
    pub fn with_vp_policy(mut self, policy: impl Into<String>, args: Option<Json>) -> Self {
        self.config.vp_policies.push(request(policy, args));
        self
    }

    /// Run a policy against every embedded credential.
    pub fn with_vc_policy(mut self, policy: impl Into<String>, args: Option<Json>) -> Self {
        self.config.vc_policies.push(request(policy, args));
        self
    }

    /// Run a policy against embedded credentials of type `credential_type`.
    pub fn with_specific_policy(
        mut self,
        credential_type: impl Into<String>,
        policy: impl Into<String>,
        args: Option<Json>,
    ) -> Self {
        self.config
            .specific_policies
            .entry(credential_type.into())
            .or_default()
            .push(request(policy, args));
        self
    }
}

fn request(policy: impl Into<String>, args: Option<Json>) -> PolicyRequestConfig {
    PolicyRequestConfig::WithArgs {
        policy: policy.into(),
        args,
    }
}
