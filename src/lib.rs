//! This library detects, selects and verifies digital credentials: W3C
//! Verifiable Credentials, [SD-JWT VC]s and ISO mdocs.
//!
//! [SD-JWT VC]: <https://www.rfc-editor.org/rfc/rfc9901>
//!
//! # Format Detection
//!
//! A credential, given as raw text, is classified and parsed by
//! [`detect_and_parse`]:
//!
//! ```ignore
//! use digital_credentials::core::credential::detect_and_parse;
//!
//! let (detection, credential) = detect_and_parse(raw)?;
//! assert!(detection.provides_disclosures());
//! println!("{:?}", credential.credential_data());
//! ```
//!
//! mdocs are only recognized when a [`CredentialParser`] is given an
//! [`MdocDecoder`].
//!
//! [`detect_and_parse`]: crate::core::credential::detect_and_parse
//! [`CredentialParser`]: crate::core::credential::CredentialParser
//! [`MdocDecoder`]: crate::core::credential::mdoc::MdocDecoder
//!
//! # Credential Selection
//!
//! Held credentials are matched against a DCQL query with the
//! [`DcqlMatcher`], and a match is presented revealing only the disclosures
//! the query needs:
//!
//! ```ignore
//! use digital_credentials::core::dcql_matcher::{DcqlMatcher, HeldCredential};
//! use digital_credentials::core::dcql_query::DcqlQuery;
//!
//! let query: DcqlQuery = serde_json::from_str(request)?;
//! let held = vec![HeldCredential::new("pid", credential)];
//!
//! let matches = DcqlMatcher::match_query(&query, &held)?;
//! for found in matches.get("pid_query").into_iter().flatten() {
//!     let presentation = found.present()?;
//! }
//! ```
//!
//! [`DcqlMatcher`]: crate::core::dcql_matcher::DcqlMatcher
//!
//! # Verification
//!
//! A [`Verifier`] runs named policies from a [`PolicyRegistry`] against a
//! presentation and each credential it embeds:
//!
//! ```ignore
//! use digital_credentials::policy::PolicyRegistry;
//! use digital_credentials::verifier::Verifier;
//!
//! let verifier = Verifier::builder()
//!     .with_registry(PolicyRegistry::with_builtin_policies(key_resolver))
//!     .with_vp_policy("signature", None)
//!     .with_vc_policy("expired", None)
//!     .with_specific_policy("OpenBadgeCredential", "allowed-issuer", Some(issuers))
//!     .build()?;
//!
//! let response = verifier.verify(vp_token, context).await?;
//! for entry in response.entries() {
//!     println!("{}: {:?}", entry.credential_type(), entry.policy_results());
//! }
//! ```
//!
//! Policies may also be configured from JSON, see [`VerifierConfig`].
//!
//! [`Verifier`]: crate::verifier::Verifier
//! [`PolicyRegistry`]: crate::policy::PolicyRegistry
//! [`VerifierConfig`]: crate::config::VerifierConfig

pub mod config;
pub mod core;
pub mod policy;
pub mod utils;
pub mod verifier;
