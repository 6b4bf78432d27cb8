//! Confirmation of destructive runs.

use crate::errors::SiabError;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;

/// Word the operator must type to confirm.
pub const CONFIRMATION_WORD: &str = "yes";

/// Asks the operator a yes/no question.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Confirmer: Send + Sync {
    /// Shows `prompt` and returns the operator's answer.
    async fn ask(&self, prompt: &str) -> std::io::Result<String>;
}

/// Prompts on stderr and reads a line from stdin.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalConfirmer;

#[async_trait]
impl Confirmer for TerminalConfirmer {
    async fn ask(&self, prompt: &str) -> std::io::Result<String> {
        let mut stderr = tokio::io::stderr();
        stderr.write_all(prompt.as_bytes()).await?;
        stderr.flush().await?;

        let mut line = String::new();
        BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;
        Ok(line)
    }
}

/// How a destructive run gets confirmed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfirmationPolicy {
    /// Confirmation given out of band (`--yes`).
    pub assume_yes: bool,
    /// Whether an operator can answer a prompt.
    pub interactive: bool,
}

impl ConfirmationPolicy {
    /// Resolves the policy, prompting through `confirmer` when needed.
    ///
    /// # Errors
    ///
    /// Returns [`SiabError::ConfirmationRequired`] for a non-interactive run
    /// without out-of-band confirmation, and [`SiabError::Aborted`] when the
    /// operator does not type the confirmation word.
    pub async fn confirm(&self, confirmer: &dyn Confirmer, action: &str) -> Result<(), SiabError> {
        if self.assume_yes {
            info!(action, "Confirmed out of band");
            return Ok(());
        }
        if !self.interactive {
            return Err(SiabError::ConfirmationRequired(format!(
                "{action} deletes cluster data; re-run with --yes to confirm non-interactively"
            )));
        }

        let prompt = format!("{action} deletes cluster data. Type '{CONFIRMATION_WORD}' to continue: ");
        let answer = confirmer.ask(&prompt).await?;
        if answer.trim().eq_ignore_ascii_case(CONFIRMATION_WORD) {
            info!(action, "Confirmed by operator");
            Ok(())
        } else {
            Err(SiabError::Aborted)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answering(answer: &'static str) -> MockConfirmer {
        let mut confirmer = MockConfirmer::new();
        confirmer
            .expect_ask()
            .times(1)
            .returning(move |_| Ok(answer.to_string()));
        confirmer
    }

    #[tokio::test]
    async fn test_assume_yes_never_prompts() {
        let mut confirmer = MockConfirmer::new();
        confirmer.expect_ask().never();
        let policy = ConfirmationPolicy {
            assume_yes: true,
            interactive: false,
        };
        policy.confirm(&confirmer, "Uninstall").await.unwrap();
    }

    #[tokio::test]
    async fn test_non_interactive_without_flag_fails_fast() {
        let mut confirmer = MockConfirmer::new();
        confirmer.expect_ask().never();
        let policy = ConfirmationPolicy {
            assume_yes: false,
            interactive: false,
        };
        let err = policy.confirm(&confirmer, "Uninstall").await.unwrap_err();
        assert!(matches!(err, SiabError::ConfirmationRequired(_)));
    }

    #[tokio::test]
    async fn test_interactive_answers() {
        let policy = ConfirmationPolicy {
            assume_yes: false,
            interactive: true,
        };
        policy.confirm(&answering("YES\n"), "Uninstall").await.unwrap();

        let err = policy.confirm(&answering("y\n"), "Uninstall").await.unwrap_err();
        assert!(matches!(err, SiabError::Aborted));
    }
}
