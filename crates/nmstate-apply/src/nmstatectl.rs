//! nmstatectl integration for staged network configuration

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::{debug, error, warn};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;

use nmstate_core::{CommandError, State};

/// Default bound for show/commit/rollback invocations
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Operations of the external network tool.
///
/// `set` stages a checkpoint that nmstate reverts on its own once
/// `checkpoint_timeout` passes without a `commit`.
#[async_trait]
pub trait NetworkTool: Send + Sync {
    /// Current live state document
    async fn show(&self) -> Result<String, CommandError>;
    /// Stage `desired` without committing
    async fn set(&self, desired: &State, checkpoint_timeout: Duration)
        -> Result<String, CommandError>;
    async fn commit(&self) -> Result<String, CommandError>;
    async fn rollback(&self) -> Result<String, CommandError>;
}

/// nmstatectl invoked as a subprocess
#[derive(Debug, Clone)]
pub struct Nmstatectl {
    /// Program to execute
    program: String,
    /// Arguments placed before the operation (wrappers such as `chroot`)
    base_args: Vec<String>,
    /// Bound for show/commit/rollback
    operation_timeout: Duration,
}

impl Nmstatectl {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            base_args: Vec::new(),
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }

    pub fn with_base_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.base_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_operation_timeout(mut self, operation_timeout: Duration) -> Self {
        self.operation_timeout = operation_timeout;
        self
    }

    async fn run(
        &self,
        args: &[&str],
        input: Option<Vec<u8>>,
        limit: Duration,
    ) -> Result<String, CommandError> {
        let mut full_args: Vec<String> = self.base_args.clone();
        full_args.extend(args.iter().map(|arg| arg.to_string()));
        run_command(&self.program, &full_args, input, limit).await
    }
}

impl Default for Nmstatectl {
    fn default() -> Self {
        Self::new("nmstatectl")
    }
}

#[async_trait]
impl NetworkTool for Nmstatectl {
    async fn show(&self) -> Result<String, CommandError> {
        self.run(&["show"], None, self.operation_timeout).await
    }

    async fn set(
        &self,
        desired: &State,
        checkpoint_timeout: Duration,
    ) -> Result<String, CommandError> {
        let seconds = checkpoint_timeout.as_secs().to_string();
        // The command itself must not outlive the checkpoint it creates
        let limit = checkpoint_timeout.max(self.operation_timeout);
        self.run(
            &["set", "--no-commit", "--timeout", &seconds],
            Some(desired.as_bytes().to_vec()),
            limit,
        )
        .await
    }

    async fn commit(&self) -> Result<String, CommandError> {
        self.run(&["commit"], None, self.operation_timeout).await
    }

    async fn rollback(&self) -> Result<String, CommandError> {
        self.run(&["rollback"], None, self.operation_timeout).await
    }
}

/// Execute a command with a time bound, returning its stdout.
///
/// When `input` is given it is written to the child's stdin by a separate
/// task while the child is awaited, so neither side can block on a full
/// pipe. The child is killed if the bound expires.
pub(crate) async fn run_command(
    program: &str,
    args: &[String],
    input: Option<Vec<u8>>,
    limit: Duration,
) -> Result<String, CommandError> {
    let command_line = if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    };
    let start_time = Instant::now();

    debug!("Executing {}", command_line);

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|source| {
        error!("{} failed to execute: {}", command_line, source);
        CommandError::Spawn {
            command: command_line.clone(),
            source,
        }
    })?;

    let writer = match (input, child.stdin.take()) {
        (Some(data), Some(mut stdin)) => Some(tokio::spawn(async move {
            let result = stdin.write_all(&data).await;
            // Dropping stdin closes the pipe and signals EOF
            drop(stdin);
            result
        })),
        _ => None,
    };

    let output = match timeout(limit, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(source)) => {
            error!("{} failed while waiting: {}", command_line, source);
            return Err(CommandError::Spawn {
                command: command_line,
                source,
            });
        }
        Err(_) => {
            error!("{} timed out after {:?}", command_line, limit);
            return Err(CommandError::Timeout {
                command: command_line,
                timeout: limit,
            });
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let duration_ms = start_time.elapsed().as_millis() as u64;

    if !output.status.success() {
        warn!(
            "{} failed with exit code {:?}: {}",
            command_line,
            output.status.code(),
            stderr
        );
        return Err(CommandError::Failed {
            command: command_line,
            exit_code: output.status.code(),
            stdout,
            stderr,
        });
    }

    if let Some(writer) = writer {
        let written = match writer.await {
            Ok(result) => result,
            Err(join_err) => Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                join_err.to_string(),
            )),
        };
        // The child succeeded but may have seen truncated input
        if let Err(source) = written {
            return Err(CommandError::Stdin {
                command: command_line,
                source,
            });
        }
    }

    debug!("{} completed successfully in {}ms", command_line, duration_ms);
    Ok(stdout)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `sh -c <script>` standing in for nmstatectl; operation arguments
    /// arrive as positional parameters
    fn fake(script: &str) -> Nmstatectl {
        Nmstatectl::new("sh").with_base_args(["-c", script, "nmstatectl"])
    }

    #[tokio::test]
    async fn test_set_passes_document_on_stdin_and_timeout_argument() {
        let tool = fake(r#"echo "args: $*"; cat"#);
        let desired = State::from("interfaces:\n  - name: br1\n");

        let output = tool
            .set(&desired, Duration::from_secs(240))
            .await
            .unwrap();

        assert!(output.starts_with("args: set --no-commit --timeout 240\n"));
        assert!(output.ends_with("interfaces:\n  - name: br1\n"));
    }

    #[tokio::test]
    async fn test_large_document_does_not_deadlock() {
        // Child echoes everything back, filling both pipes at once
        let tool = fake("cat");
        let line = "      - name: eth0\n";
        let desired = State::from(line.repeat(64 * 1024));

        let output = tool.set(&desired, Duration::from_secs(30)).await.unwrap();
        assert_eq!(output.len(), desired.as_bytes().len());
    }

    #[tokio::test]
    async fn test_operations_map_to_subcommands() {
        let tool = fake(r#"echo "$1""#);
        assert_eq!(tool.show().await.unwrap(), "show\n");
        assert_eq!(tool.commit().await.unwrap(), "commit\n");
        assert_eq!(tool.rollback().await.unwrap(), "rollback\n");
    }

    #[tokio::test]
    async fn test_non_zero_exit_captures_output() {
        let tool = fake("echo partial; echo 'no checkpoint' >&2; exit 3");
        match tool.commit().await {
            Err(CommandError::Failed {
                exit_code,
                stdout,
                stderr,
                ..
            }) => {
                assert_eq!(exit_code, Some(3));
                assert_eq!(stdout, "partial\n");
                assert_eq!(stderr, "no checkpoint\n");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_program_is_a_spawn_error() {
        let tool = Nmstatectl::new("/nonexistent/nmstatectl");
        assert!(matches!(
            tool.show().await,
            Err(CommandError::Spawn { .. })
        ));
    }

    #[tokio::test]
    async fn test_hanging_command_times_out() {
        let tool = fake("sleep 5").with_operation_timeout(Duration::from_millis(100));
        assert!(matches!(
            tool.show().await,
            Err(CommandError::Timeout { .. })
        ));
    }
}
