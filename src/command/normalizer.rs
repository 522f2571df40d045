//! Parses a raw command string into an exec vector or a shell invocation.

use std::sync::OnceLock;

use regex::Regex;

use super::security::{self, log_bypass_if_dangerous};
use crate::error::AppError;

/// Result of normalizing a command line, per the data model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizedCommand {
    /// A plain exec vector: no shell features were present.
    Direct {
        executable: String,
        args: Vec<String>,
    },
    /// Shell features were present (or detection was inconclusive); `raw`
    /// is the original command text, to be run as `/bin/sh -c <raw>`.
    Shell { raw: String },
}

impl NormalizedCommand {
    /// The text to type into the PTY's running shell to execute this
    /// command. Direct commands are re-joined with shell quoting so that
    /// any literal metacharacters in an argument are inert; shell commands
    /// are wrapped in an explicit nested `/bin/sh -c` invocation so the
    /// outer shell's own parsing of the already-validated raw text never
    /// matters.
    pub fn to_injected_line(&self) -> String {
        match self {
            NormalizedCommand::Direct { executable, args } if executable.is_empty() => {
                let _ = args;
                String::new()
            }
            NormalizedCommand::Direct { executable, args } => {
                let words = std::iter::once(executable.clone()).chain(args.iter().cloned());
                shell_words::join(words)
            }
            NormalizedCommand::Shell { raw } => {
                format!("/bin/sh -c {}", shell_words::quote(raw))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Tok {
    Word(String),
    Op(String),
}

const OPERATORS: &[&str] = &["&&", "||", "|", ";", ">>", "<<", ">", "<"];
const COMPOUND_KEYWORDS: &[&str] = &["if", "for", "while", "case", "{", "("];

fn env_assign_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*=").expect("static regex"))
}

/// Conservative regex fallback from §4.A step 3/6: forces the shell form
/// whenever the tokenizer itself cannot be trusted.
fn shell_metachar_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"&&|\|\||\||;|>|<|<<|>>").expect("static regex"))
}

/// Walks the raw command text tracking quote state, splitting it into
/// words and shell operators. This is the crate's stand-in for a full
/// POSIX-shell AST: good enough to classify shell-required constructs and
/// to drive the security checks, which is all §4.A asks of it.
struct Scanner<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    has_glob: bool,
    has_cmd_subst: bool,
}

impl<'a> Scanner<'a> {
    fn new(raw: &'a str) -> Self {
        Self {
            chars: raw.chars().peekable(),
            has_glob: false,
            has_cmd_subst: false,
        }
    }

    fn tokenize(mut self) -> Result<(Vec<Tok>, bool, bool), String> {
        let mut tokens = Vec::new();
        let mut word = String::new();
        let mut in_word = false;

        macro_rules! flush {
            () => {
                if in_word {
                    tokens.push(Tok::Word(std::mem::take(&mut word)));
                    in_word = false;
                }
            };
        }

        while let Some(&c) = self.chars.peek() {
            match c {
                ' ' | '\t' | '\n' => {
                    flush!();
                    self.chars.next();
                }
                '\'' => {
                    self.chars.next();
                    in_word = true;
                    loop {
                        match self.chars.next() {
                            Some('\'') => break,
                            Some(ch) => word.push(ch),
                            None => return Err("unterminated single quote".to_string()),
                        }
                    }
                }
                '"' => {
                    self.chars.next();
                    in_word = true;
                    loop {
                        match self.chars.next() {
                            Some('"') => break,
                            Some('\\') => {
                                if let Some(next) = self.chars.next() {
                                    word.push(next);
                                } else {
                                    return Err("unterminated escape".to_string());
                                }
                            }
                            Some(ch) => word.push(ch),
                            None => return Err("unterminated double quote".to_string()),
                        }
                    }
                }
                '`' => {
                    self.has_cmd_subst = true;
                    in_word = true;
                    word.push(c);
                    self.chars.next();
                }
                '*' | '?' => {
                    self.has_glob = true;
                    in_word = true;
                    word.push(c);
                    self.chars.next();
                }
                '$' => {
                    self.chars.next();
                    if self.chars.peek() == Some(&'(') {
                        self.has_cmd_subst = true;
                    }
                    in_word = true;
                    word.push('$');
                }
                '&' | '|' | ';' | '<' | '>' => {
                    flush!();
                    let first = c;
                    self.chars.next();
                    let op = if self.chars.peek() == Some(&first) && matches!(first, '&' | '|' | '<' | '>')
                    {
                        self.chars.next();
                        let mut s = String::new();
                        s.push(first);
                        s.push(first);
                        s
                    } else {
                        first.to_string()
                    };
                    tokens.push(Tok::Op(op));
                }
                _ => {
                    in_word = true;
                    word.push(c);
                    self.chars.next();
                }
            }
        }
        flush!();
        Ok((tokens, self.has_glob, self.has_cmd_subst))
    }
}

fn needs_shell(tokens: &[Tok], has_glob_past_head: bool, has_cmd_subst: bool, raw: &str) -> bool {
    if has_cmd_subst {
        return true;
    }
    if tokens
        .iter()
        .any(|t| matches!(t, Tok::Op(op) if OPERATORS.contains(&op.as_str())))
    {
        return true;
    }
    if has_glob_past_head {
        return true;
    }
    if let Some(Tok::Word(first)) = tokens.first() {
        if env_assign_regex().is_match(first) {
            return true;
        }
        if COMPOUND_KEYWORDS.contains(&first.as_str()) {
            return true;
        }
    }
    if shell_metachar_regex().is_match(raw) {
        return true;
    }
    false
}

fn words_only(tokens: &[Tok]) -> Vec<String> {
    tokens
        .iter()
        .filter_map(|t| match t {
            Tok::Word(w) => Some(w.clone()),
            Tok::Op(_) => None,
        })
        .collect()
}

/// Whether a glob character (`*`, `?`) appears anywhere past the head
/// token, per the Scanner's flat glob flag. The scanner doesn't track
/// per-token position, so this re-derives it from the word list: a glob
/// char found while the head word itself is being built doesn't count
/// (`ls*` as a program name is unusual but not a shell feature on its
/// own), matching "glob expansion past a leaf name" in §4.A.
fn glob_past_head(raw_tokens: &[Tok]) -> bool {
    let mut seen_head = false;
    for tok in raw_tokens {
        if let Tok::Word(w) = tok {
            if !seen_head {
                seen_head = true;
                continue;
            }
            if w.contains('*') || w.contains('?') {
                return true;
            }
        }
    }
    false
}

/// Validates a redirection target for every `>`, `>>`, `<`, `<<` operator
/// found in the token stream.
fn validate_redirections(tokens: &[Tok]) -> Result<(), AppError> {
    for window in tokens.windows(2) {
        if let [Tok::Op(op), Tok::Word(target)] = window {
            if matches!(op.as_str(), ">" | ">>" | "<" | "<<") {
                security::validate_redirect_target(target)?;
            }
        }
    }
    Ok(())
}

/// Normalizes a raw command string per §4.A.
pub fn normalize(raw: &str) -> Result<NormalizedCommand, AppError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(NormalizedCommand::Direct {
            executable: String::new(),
            args: Vec::new(),
        });
    }

    match Scanner::new(trimmed).tokenize() {
        Ok((tokens, has_glob, has_cmd_subst)) => {
            let glob_past = has_glob && glob_past_head(&tokens);
            if needs_shell(&tokens, glob_past, has_cmd_subst, trimmed) {
                let failed = security::validate_raw(trimmed).is_err();
                log_bypass_if_dangerous(failed);
                security::validate_raw(trimmed)?;
                Ok(NormalizedCommand::Shell {
                    raw: trimmed.to_string(),
                })
            } else {
                let words = words_only(&tokens);
                let (head, args) = words.split_first().ok_or_else(|| {
                    AppError::Validation("command produced no executable token".to_string())
                })?;
                let failed = security::validate_tokens(head, args).is_err();
                log_bypass_if_dangerous(failed);
                security::validate_tokens(head, args)?;
                validate_redirections(&tokens)?;
                Ok(NormalizedCommand::Direct {
                    executable: head.clone(),
                    args: args.to_vec(),
                })
            }
        }
        Err(_) => {
            // Tokenizer choked (e.g. unbalanced quotes): fall back to the
            // raw-string regex validation and, if clean, treat as shell.
            security::validate_raw(trimmed)?;
            Ok(NormalizedCommand::Shell {
                raw: trimmed.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clear_consent() {
        std::env::remove_var(security::CONSENT_ENV_VAR);
    }

    #[test]
    fn simple_command_is_direct() {
        clear_consent();
        let result = normalize("echo hello world").unwrap();
        assert_eq!(
            result,
            NormalizedCommand::Direct {
                executable: "echo".to_string(),
                args: vec!["hello".to_string(), "world".to_string()],
            }
        );
    }

    #[test]
    fn empty_command_is_empty_direct() {
        clear_consent();
        let result = normalize("   ").unwrap();
        assert_eq!(
            result,
            NormalizedCommand::Direct {
                executable: String::new(),
                args: Vec::new(),
            }
        );
    }

    #[test]
    fn pipeline_forces_shell() {
        clear_consent();
        let result = normalize("ls | grep foo").unwrap();
        assert_eq!(
            result,
            NormalizedCommand::Shell {
                raw: "ls | grep foo".to_string(),
            }
        );
    }

    #[test]
    fn redirection_forces_shell() {
        clear_consent();
        let result = normalize("echo hi > out.txt").unwrap();
        assert!(matches!(result, NormalizedCommand::Shell { .. }));
    }

    #[test]
    fn glob_past_head_forces_shell() {
        clear_consent();
        let result = normalize("ls *.txt").unwrap();
        assert!(matches!(result, NormalizedCommand::Shell { .. }));
    }

    #[test]
    fn env_assignment_prefix_forces_shell() {
        clear_consent();
        let result = normalize("FOO=bar env").unwrap();
        assert!(matches!(result, NormalizedCommand::Shell { .. }));
    }

    #[test]
    fn sudo_is_rejected_without_consent() {
        clear_consent();
        let err = normalize("sudo rm -rf /").unwrap_err();
        assert!(matches!(err, AppError::Security(_)));
    }

    #[test]
    fn sudo_is_allowed_with_consent() {
        std::env::set_var(security::CONSENT_ENV_VAR, "1");
        let result = normalize("sudo rm -rf /");
        clear_consent();
        assert!(result.is_ok());
    }

    #[test]
    fn rm_rf_root_direct_form_is_rejected() {
        clear_consent();
        let err = normalize("rm -rf /").unwrap_err();
        assert!(matches!(err, AppError::Security(_)));
    }

    #[test]
    fn rm_rf_other_path_is_allowed() {
        clear_consent();
        let result = normalize("rm -rf /tmp/scratch").unwrap();
        assert!(matches!(result, NormalizedCommand::Direct { .. }));
    }

    #[test]
    fn chmod_777_is_rejected() {
        clear_consent();
        let err = normalize("chmod 777 /etc/passwd").unwrap_err();
        assert!(matches!(err, AppError::Security(_)));
    }

    #[test]
    fn dd_to_block_device_is_rejected() {
        clear_consent();
        let err = normalize("dd if=/dev/zero of=/dev/sda").unwrap_err();
        assert!(matches!(err, AppError::Security(_)));
    }

    #[test]
    fn mkfs_is_rejected() {
        clear_consent();
        let err = normalize("mkfs.ext4 /dev/sdb1").unwrap_err();
        assert!(matches!(err, AppError::Security(_)));
    }

    #[test]
    fn chained_sudo_in_shell_form_is_rejected() {
        clear_consent();
        let err = normalize("echo hi && sudo reboot").unwrap_err();
        assert!(matches!(err, AppError::Security(_)));
    }

    #[test]
    fn rm_rf_root_chained_in_shell_form_is_rejected() {
        clear_consent();
        let result = normalize("true; rm -rf /");
        assert!(matches!(result, Err(AppError::Security(_))));
    }

    #[test]
    fn chmod_777_chained_in_shell_form_is_rejected() {
        clear_consent();
        let result = normalize("echo hi && chmod 777 /etc/passwd");
        assert!(matches!(result, Err(AppError::Security(_))));
    }

    #[test]
    fn mkfs_chained_in_shell_form_is_rejected() {
        clear_consent();
        let result = normalize("echo hi | mkfs.ext4 /dev/sdb1");
        assert!(matches!(result, Err(AppError::Security(_))));
    }

    #[test]
    fn redirect_to_block_device_in_shell_form_is_rejected() {
        clear_consent();
        let result = normalize("echo hi > /dev/sda");
        assert!(matches!(result, Err(AppError::Security(_))));
    }

    #[test]
    fn direct_injected_line_quotes_args() {
        clear_consent();
        let cmd = normalize("echo hello world").unwrap();
        assert_eq!(cmd.to_injected_line(), "echo hello world");
    }

    #[test]
    fn shell_injected_line_wraps_nested_shell() {
        clear_consent();
        let cmd = normalize("ls | grep foo").unwrap();
        assert_eq!(cmd.to_injected_line(), "/bin/sh -c 'ls | grep foo'");
    }
}
