//! Command normalization and the dangerous-command safety gate.
//!
//! Turns a user-supplied command line into either a plain exec vector or an
//! explicit shell invocation, and rejects a fixed set of destructive
//! patterns unless the operator has opted in via consent.

mod normalizer;
mod security;

pub use normalizer::{normalize, NormalizedCommand};
pub use security::{
    consent_given, log_bypass_if_dangerous, validate_raw, validate_redirect_target,
    validate_tokens, CONSENT_ENV_VAR,
};
