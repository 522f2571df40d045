//! Dangerous-pattern detection for the command normalizer.
//!
//! Pattern list and regexes are intentionally simple and data-driven, in
//! the style of the credential detector this crate's ancestor ships: a
//! flat list of (name, matcher) pairs rather than a generic rule engine.

use std::sync::OnceLock;

use regex::Regex;
use tracing::warn;

use crate::error::AppError;

/// Environment variable whose non-empty value bypasses every check in this
/// module, both here and in the PTY process's own root/sudo checks.
pub const CONSENT_ENV_VAR: &str = "MCP_PTY_USER_CONSENT_FOR_DANGEROUS_ACTIONS";

/// Commands that escalate privileges; refusing these is the whole point of
/// the gate.
const PRIVILEGE_ESCALATION_NAMES: &[&str] = &[
    "sudo", "doas", "su", "run0", "pkexec", "dzdo", "pfexec", "sesu", "usermod", "chown",
    "passwd", "visudo", "vipw", "vigr",
];

fn dev_sd_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^/dev/sd[a-z]").expect("static regex"))
}

fn dd_of_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^of=/dev/sd[a-z]").expect("static regex"))
}

fn redirect_device_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r">{1,2}\s*/dev/sd[a-z]").expect("static regex"))
}

/// `true` once per process if `MCP_PTY_USER_CONSENT_FOR_DANGEROUS_ACTIONS`
/// is set to any non-empty value.
pub fn consent_given() -> bool {
    std::env::var(CONSENT_ENV_VAR)
        .map(|v| !v.is_empty())
        .unwrap_or(false)
}

/// Strips a leading path (e.g. `/usr/bin/sudo` -> `sudo`) so the
/// privilege-escalation check matches regardless of how the head command
/// was spelled.
fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn has_rf_combo(args: &[String]) -> bool {
    let mut has_r = false;
    let mut has_f = false;
    for arg in args {
        if let Some(flags) = arg.strip_prefix('-') {
            if flags.starts_with('-') {
                continue; // long option, e.g. --recursive
            }
            if flags.contains('r') || flags.contains('R') {
                has_r = true;
            }
            if flags.contains('f') {
                has_f = true;
            }
        }
    }
    has_r && has_f
}

/// Validates a tokenized command line (head + args) against the fixed
/// pattern list in §4.A. `warn_bypass` controls whether a bypass (consent
/// flag set) is logged here; callers that already logged it pass `false`.
pub fn validate_tokens(head: &str, args: &[String]) -> Result<(), AppError> {
    if consent_given() {
        return Ok(());
    }
    validate_tokens_unchecked(head, args)
}

/// The checks themselves, without the consent short-circuit. Used by the
/// shell-form path, which must still refuse a privilege-escalation head
/// even though the consent check already ran once upstream.
fn validate_tokens_unchecked(head: &str, args: &[String]) -> Result<(), AppError> {
    let base = basename(head);

    if PRIVILEGE_ESCALATION_NAMES.contains(&base) {
        return Err(AppError::Security(format!(
            "refusing to run '{base}': privilege escalation commands are blocked"
        )));
    }

    if base == "mkfs" || base.starts_with("mkfs.") {
        return Err(AppError::Security(format!(
            "refusing to run '{base}': filesystem creation commands are blocked"
        )));
    }

    if base == "rm" && has_rf_combo(args) && args.iter().any(|a| a == "/") {
        return Err(AppError::Security(
            "refusing to run 'rm -rf /': recursive root deletion is blocked".to_string(),
        ));
    }

    if base == "chmod" && args.iter().any(|a| a.contains("777")) {
        return Err(AppError::Security(
            "refusing to run 'chmod' with mode 777: world-writable permissions are blocked"
                .to_string(),
        ));
    }

    if base == "dd" && args.iter().any(|a| dd_of_regex().is_match(a)) {
        return Err(AppError::Security(
            "refusing to run 'dd' writing directly to a block device".to_string(),
        ));
    }

    Ok(())
}

/// Checks a redirection target (the word following `>`, `>>`, `<`, `<<`)
/// against the raw-device pattern.
pub fn validate_redirect_target(target: &str) -> Result<(), AppError> {
    if !consent_given() && dev_sd_regex().is_match(target) {
        return Err(AppError::Security(format!(
            "refusing to redirect into block device '{target}'"
        )));
    }
    Ok(())
}

/// Re-validates a raw shell-form command string. Used both by the
/// tokenizer-failure fallback and as the final shell-form check, since a
/// privilege-escalation head can be buried after shell operators that a
/// plain tokenizer does not fully resolve.
///
/// A shell-form string only reaches this function because it contains a
/// separator/operator a single tokenized command wouldn't (`;`, `&&`,
/// `|`, …), so it also gets the mkfs/rm -rf//chmod 777/dd-of-device/
/// redirect-to-device checks `validate_tokens` applies to each of its
/// pieces, not privilege escalation alone.
pub fn validate_raw(raw: &str) -> Result<(), AppError> {
    if consent_given() {
        return Ok(());
    }
    let first_token = raw.split_whitespace().next().unwrap_or("");
    let base = basename(first_token);
    if PRIVILEGE_ESCALATION_NAMES.contains(&base) {
        return Err(AppError::Security(format!(
            "refusing to run '{base}': privilege escalation commands are blocked"
        )));
    }
    for name in PRIVILEGE_ESCALATION_NAMES {
        // Catches `cmd && sudo ...` and `cmd; sudo ...` style chains: a
        // named head reappearing right after a separator/operator token.
        let pattern = format!(r"(^|[;&|]\s*){}(\s|$)", regex::escape(name));
        if let Ok(re) = Regex::new(&pattern) {
            if re.is_match(raw) {
                return Err(AppError::Security(format!(
                    "refusing to run '{name}': privilege escalation commands are blocked"
                )));
            }
        }
    }

    validate_raw_sub_statements(raw)?;

    if redirect_device_regex().is_match(raw) {
        return Err(AppError::Security(
            "refusing to redirect into block device".to_string(),
        ));
    }

    Ok(())
}

/// Splits a raw shell-form string on the separator characters that
/// force shell form in the first place (`;`, `&`, `|`) and re-runs the
/// token-based pattern checks against each piece as if it were its own
/// Direct command. Naive (quoting inside a piece is not unwound), but
/// enough to catch `cmd; rm -rf /` style chains the way the tokenized
/// path already catches a bare `rm -rf /`.
fn validate_raw_sub_statements(raw: &str) -> Result<(), AppError> {
    for piece in raw.split(['&', '|', ';']) {
        let words: Vec<String> = piece.split_whitespace().map(str::to_string).collect();
        if let Some((head, args)) = words.split_first() {
            validate_tokens_unchecked(head, args)?;
        }
    }
    Ok(())
}

/// Logs the one-time-per-call warning when a dangerous action is allowed
/// through because consent was granted.
pub fn log_bypass_if_dangerous(would_have_failed: bool) {
    if would_have_failed && consent_given() {
        warn!("dangerous command allowed: user consent bypass is active");
    }
}
