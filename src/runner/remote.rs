use super::{NO_LOG_SENTINEL, script_basename};
use crate::config::ReconcilerConfig;
use crate::error::RunnerError;
use crate::registry::{RemoteAuth, RemoteTarget};
use anyhow::{Context, Result};
use ssh2::Session;
use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

/// Runs bots over one-shot SSH sessions.
///
/// Every operation opens a fresh session and closes it again; there is no
/// pooling or connection-liveness management. Each call is bounded by a timeout so
/// one unreachable host cannot stall a reconciliation cycle indefinitely.
pub struct RemoteRunner {
    remote_log_dir: String,
    timeout: Duration,
}

impl RemoteRunner {
    pub fn new(config: &ReconcilerConfig) -> Self {
        Self {
            remote_log_dir: config.remote_log_dir.clone(),
            timeout: Duration::from_secs(config.remote_timeout_secs.max(1)),
        }
    }

    /// Issues a backgrounded, output-redirected, disowned start command.
    /// Success means the shell accepted the command, not that the process
    /// is confirmed alive.
    pub async fn launch(&self, target: &RemoteTarget, script_path: &str) -> Result<()> {
        let command = launch_command(&self.remote_log_dir, script_path);
        self.exec(target, command)
            .await
            .map_err(|e| session_error(target, e))?;
        Ok(())
    }

    pub async fn terminate(&self, target: &RemoteTarget, name: &str) -> Result<()> {
        self.exec(target, terminate_command(name))
            .await
            .map_err(|e| session_error(target, e))?;
        Ok(())
    }

    /// Pattern-matches the script's base filename in a remote process
    /// listing. Any connection or auth failure reads as "not running".
    pub async fn is_running(&self, target: &RemoteTarget, script_path: &str) -> bool {
        match self.exec(target, liveness_command(script_path)).await {
            Ok(output) => output.lines().any(|line| !line.trim().is_empty()),
            Err(e) => {
                tracing::debug!("remote liveness check on {} failed: {e:#}", target.host);
                false
            }
        }
    }

    /// Last `lines` lines of the remote log file. Connection failure, a
    /// missing file, and an existing-but-empty file all collapse to the
    /// sentinel: `tail` under `2>/dev/null` produces no output in each
    /// case, so they cannot be told apart.
    pub async fn tail_log(&self, target: &RemoteTarget, script_path: &str, lines: usize) -> String {
        let command = tail_command(&self.remote_log_dir, script_path, lines);
        collapse_tail(self.exec(target, command).await)
    }

    async fn exec(&self, target: &RemoteTarget, command: String) -> Result<String> {
        let target = target.clone();
        let timeout = self.timeout;
        let task =
            tokio::task::spawn_blocking(move || exec_blocking(&target, &command, timeout));

        match tokio::time::timeout(timeout, task).await {
            Ok(joined) => joined.context("remote session task panicked")?,
            Err(_) => anyhow::bail!("timed out after {}s", timeout.as_secs()),
        }
    }
}

fn exec_blocking(target: &RemoteTarget, command: &str, timeout: Duration) -> Result<String> {
    let addr = format!("{}:{}", target.host, target.port)
        .to_socket_addrs()
        .with_context(|| format!("failed to resolve {}", target.host))?
        .next()
        .with_context(|| format!("no address for {}", target.host))?;
    let tcp = TcpStream::connect_timeout(&addr, timeout)
        .with_context(|| format!("failed to connect to {addr}"))?;

    let mut session = Session::new().context("failed to create SSH session")?;
    session.set_timeout(u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX));
    session.set_tcp_stream(tcp);
    session.handshake().context("SSH handshake failed")?;

    match &target.auth {
        RemoteAuth::Password(password) => session
            .userauth_password(&target.username, password)
            .context("password authentication failed")?,
        RemoteAuth::KeyFile(key_path) => session
            .userauth_pubkey_file(&target.username, None, Path::new(key_path), None)
            .context("key authentication failed")?,
    }

    let mut channel = session
        .channel_session()
        .context("failed to open channel")?;
    channel.exec(command).context("failed to exec command")?;

    let mut output = String::new();
    channel
        .read_to_string(&mut output)
        .context("failed to read command output")?;
    let _ = channel.wait_close();
    let _ = session.disconnect(None, "done", None);
    Ok(output)
}

fn collapse_tail(result: Result<String>) -> String {
    match result {
        Ok(output) if !output.trim().is_empty() => output.trim_end().to_string(),
        _ => NO_LOG_SENTINEL.to_string(),
    }
}

fn session_error(target: &RemoteTarget, cause: anyhow::Error) -> anyhow::Error {
    RunnerError::Session {
        host: target.host.clone(),
        message: format!("{cause:#}"),
    }
    .into()
}

// Paths are single-quoted; names containing quotes are not supported, same
// as the pattern-matching approximation itself.
fn launch_command(log_dir: &str, script_path: &str) -> String {
    let base = script_basename(script_path);
    format!(
        "mkdir -p '{log_dir}' && nohup sh '{script_path}' >> '{log_dir}/{base}.log' 2>&1 & disown"
    )
}

fn terminate_command(name: &str) -> String {
    format!("pkill -f '{name}' || true")
}

fn liveness_command(script_path: &str) -> String {
    let base = script_basename(script_path);
    format!("ps aux | grep '{base}' | grep -v grep")
}

fn tail_command(log_dir: &str, script_path: &str, lines: usize) -> String {
    let base = script_basename(script_path);
    format!("tail -n {lines} '{log_dir}/{base}.log' 2>/dev/null")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_target() -> RemoteTarget {
        // Port 1 on loopback: connection refused immediately.
        RemoteTarget {
            host: "127.0.0.1".into(),
            port: 1,
            username: "nobody".into(),
            auth: RemoteAuth::Password("secret".into()),
        }
    }

    fn test_runner() -> RemoteRunner {
        RemoteRunner::new(&ReconcilerConfig {
            poll_secs: 60,
            remote_timeout_secs: 2,
            remote_log_dir: "botherd-logs".into(),
        })
    }

    #[test]
    fn launch_command_backgrounds_and_redirects() {
        let cmd = launch_command("botherd-logs", "/home/pi/bots/worker.sh");
        assert!(cmd.contains("mkdir -p 'botherd-logs'"));
        assert!(cmd.contains("nohup sh '/home/pi/bots/worker.sh'"));
        assert!(cmd.contains(">> 'botherd-logs/worker.sh.log' 2>&1 &"));
    }

    #[test]
    fn liveness_command_excludes_its_own_grep() {
        let cmd = liveness_command("/home/pi/bots/worker.sh");
        assert_eq!(cmd, "ps aux | grep 'worker.sh' | grep -v grep");
    }

    #[test]
    fn terminate_command_tolerates_zero_matches() {
        assert_eq!(terminate_command("worker1"), "pkill -f 'worker1' || true");
    }

    #[test]
    fn tail_command_uses_remote_log_path() {
        let cmd = tail_command("botherd-logs", "/home/pi/bots/worker.sh", 20);
        assert_eq!(cmd, "tail -n 20 'botherd-logs/worker.sh.log' 2>/dev/null");
    }

    #[test]
    fn empty_or_missing_tail_output_collapses_to_sentinel() {
        // tail of a missing file and of an empty file both produce no
        // output, as does a failed session.
        assert_eq!(collapse_tail(Ok(String::new())), NO_LOG_SENTINEL);
        assert_eq!(collapse_tail(Ok("\n".to_string())), NO_LOG_SENTINEL);
        assert_eq!(
            collapse_tail(Err(anyhow::anyhow!("connection refused"))),
            NO_LOG_SENTINEL
        );
        assert_eq!(collapse_tail(Ok("last line\n".to_string())), "last line");
    }

    #[tokio::test]
    async fn unreachable_host_reads_as_not_running() {
        let runner = test_runner();
        assert!(
            !runner
                .is_running(&unreachable_target(), "/home/pi/bots/worker.sh")
                .await
        );
    }

    #[tokio::test]
    async fn unreachable_host_tail_returns_sentinel() {
        let runner = test_runner();
        let text = runner
            .tail_log(&unreachable_target(), "/home/pi/bots/worker.sh", 20)
            .await;
        assert_eq!(text, NO_LOG_SENTINEL);
    }

    #[tokio::test]
    async fn unreachable_host_launch_surfaces_error() {
        let runner = test_runner();
        let err = runner
            .launch(&unreachable_target(), "/home/pi/bots/worker.sh")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("127.0.0.1"), "{err}");
    }
}
