use async_trait::async_trait;
use renderctl_core::Confirm;
use std::io::{self, BufRead, Write};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Asks on the terminal; anything but "y" or "yes" declines, and so does
/// Ctrl-C while the prompt is open
#[derive(Clone, Debug)]
pub struct StdinConfirm {
    cancel: CancellationToken,
}

impl StdinConfirm {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }
}

#[async_trait]
impl Confirm for StdinConfirm {
    async fn confirm(&self, prompt: &str) -> bool {
        print!("{} [y/N] ", prompt);
        if io::stdout().flush().is_err() {
            return false;
        }

        // plain thread: a reader parked on stdin must not hold up runtime shutdown
        let (tx, rx) = oneshot::channel();
        std::thread::spawn(move || {
            let mut answer = String::new();
            let read = io::stdin().lock().read_line(&mut answer).map(|_| answer);
            let _ = tx.send(read);
        });

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                println!();
                false
            }
            answer = rx => match answer {
                Ok(Ok(answer)) => is_yes(&answer),
                Ok(Err(e)) => {
                    tracing::debug!("Could not read confirmation: {}", e);
                    false
                }
                Err(_) => false,
            },
        }
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_yes() {
        assert!(is_yes("y\n"));
        assert!(is_yes(" YES "));
        assert!(!is_yes(""));
        assert!(!is_yes("n"));
        assert!(!is_yes("yep"));
    }

    #[tokio::test]
    async fn test_cancelled_prompt_declines() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let answered = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            StdinConfirm::new(cancel).confirm("Delete ALL cached devices?"),
        )
        .await
        .unwrap();
        assert!(!answered);
    }
}
