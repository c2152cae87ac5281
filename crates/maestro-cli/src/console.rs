use async_trait::async_trait;
use maestro_core::{
    CheckpointChannel, CheckpointKind, CheckpointRequest, CheckpointResponse, MaestroResult,
    Resumption,
};
use std::time::Duration;
use tracing::info;

/// Answers checkpoints interactively on the terminal.
///
/// The prompt goes to stderr so stdout carries only responses. End of input
/// or a timeout detaches the request instead of failing it.
pub struct StdinChannel {
    timeout: Duration,
}

impl StdinChannel {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for StdinChannel {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

/// Render a checkpoint for display on stderr.
pub fn format_checkpoint_prompt(request: &CheckpointRequest) -> String {
    let mut prompt = String::new();
    if !request.context.is_empty() {
        prompt.push_str("\n\x1b[1;37m── result ──\x1b[0m\n");
        prompt.push_str(&request.context);
        prompt.push('\n');
    }
    let hint = match request.kind {
        CheckpointKind::Input => "",
        CheckpointKind::Satisfaction => " [satisfied / follow-up]",
    };
    prompt.push_str(&format!("\n\x1b[1;36m{}\x1b[0m{hint}\n> ", request.prompt));
    prompt
}

#[async_trait]
impl CheckpointChannel for StdinChannel {
    async fn suspend(&self, request: CheckpointRequest) -> MaestroResult<Resumption> {
        eprint!("{}", format_checkpoint_prompt(&request));

        let read = tokio::time::timeout(
            self.timeout,
            tokio::task::spawn_blocking(|| {
                let mut input = String::new();
                std::io::stdin().read_line(&mut input).map(|n| (n, input))
            }),
        )
        .await;

        match read {
            Ok(Ok(Ok((n, input)))) if n > 0 => {
                let responder = std::env::var("USER")
                    .or_else(|_| std::env::var("USERNAME"))
                    .unwrap_or_else(|_| "cli-user".to_string());
                Ok(Resumption::Resume(CheckpointResponse {
                    text: input.trim().to_string(),
                    responder,
                }))
            }
            Ok(Ok(Ok(_))) => {
                info!(thread_id = %request.thread_id, "Stdin closed, detaching");
                Ok(Resumption::Detach)
            }
            Ok(Ok(Err(e))) => Err(e.into()),
            Ok(Err(e)) => Err(std::io::Error::other(e).into()),
            Err(_) => {
                info!(
                    thread_id = %request.thread_id,
                    timeout_secs = self.timeout.as_secs(),
                    "No answer before timeout, detaching"
                );
                Ok(Resumption::Detach)
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn request(kind: CheckpointKind, context: &str) -> CheckpointRequest {
        CheckpointRequest {
            thread_id: "t-1".into(),
            execution_id: Uuid::nil(),
            kind,
            prompt: "Are you satisfied?".into(),
            context: context.into(),
        }
    }

    #[test]
    fn test_satisfaction_prompt_shows_result() {
        let prompt = format_checkpoint_prompt(&request(CheckpointKind::Satisfaction, "the draft"));
        assert!(prompt.contains("the draft"));
        assert!(prompt.contains("Are you satisfied?"));
        assert!(prompt.contains("follow-up"));
    }

    #[test]
    fn test_input_prompt_without_context() {
        let prompt = format_checkpoint_prompt(&request(CheckpointKind::Input, ""));
        assert!(!prompt.contains("result"));
        assert!(prompt.ends_with("> "));
    }
}
