use super::CommandResult;
use crate::error::TransportError;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Spawns `cmd`, optionally feeds `stdin`, and collects its output within
/// `timeout`. Stdin is written while stdout and stderr are drained. The child
/// is killed if the deadline passes.
pub(super) async fn run_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
) -> Result<CommandResult, TransportError> {
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .kill_on_drop(true);

    let mut child = cmd.spawn()?;
    let stdin_pipe = child.stdin.take();

    let feed = async move {
        match (stdin_pipe, stdin) {
            (Some(mut pipe), Some(bytes)) => {
                pipe.write_all(bytes).await?;
                pipe.shutdown().await
            }
            _ => Ok(()),
        }
    };
    let run = async move {
        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        Ok::<_, std::io::Error>((output?, fed.err()))
    };

    match tokio::time::timeout(timeout, run).await {
        Ok(Ok((output, write_error))) => {
            let exit_code = output.status.code().unwrap_or(-1);
            // A child that exits early closes its stdin; only report the
            // broken pipe when the exit status hides it.
            if let Some(e) = write_error
                && exit_code == 0
            {
                return Err(e.into());
            }
            Ok(CommandResult::new(
                exit_code,
                String::from_utf8_lossy(&output.stdout).to_string(),
                String::from_utf8_lossy(&output.stderr).to_string(),
            ))
        }
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(TransportError::Timeout {
            seconds: timeout.as_secs(),
        }),
    }
}
