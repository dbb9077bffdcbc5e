use super::{NO_LOG_SENTINEL, script_basename};
use crate::error::RunnerError;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// Runs bots as detached children of the control process.
///
/// Liveness is derived from the process table, never from child handles,
/// so bots launched by a previous controller run are still seen.
pub struct LocalRunner {
    logs_dir: PathBuf,
}

impl LocalRunner {
    pub fn new(logs_dir: PathBuf) -> Self {
        Self { logs_dir }
    }

    fn log_path(&self, script_path: &str) -> PathBuf {
        self.logs_dir
            .join(format!("{}.log", script_basename(script_path)))
    }

    /// Spawns the script via `sh`, detached, with stdout and stderr
    /// appended to the per-script log file. Never waits for the child.
    pub async fn launch(&self, script_path: &str) -> Result<()> {
        if !Path::new(script_path).exists() {
            return Err(RunnerError::Launch {
                script: script_path.to_string(),
                message: "no such file".into(),
            }
            .into());
        }

        std::fs::create_dir_all(&self.logs_dir).with_context(|| {
            format!("failed to create log directory: {}", self.logs_dir.display())
        })?;
        let log_path = self.log_path(script_path);
        let log = std::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&log_path)
            .with_context(|| format!("failed to open log file: {}", log_path.display()))?;
        let err_log = log
            .try_clone()
            .context("failed to clone log file handle")?;

        let mut child = Command::new("sh")
            .arg(script_path)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(err_log))
            .spawn()
            .map_err(|e| RunnerError::Launch {
                script: script_path.to_string(),
                message: e.to_string(),
            })?;

        // Reap the child in the background so it never lingers as a zombie.
        tokio::spawn(async move {
            let _ = child.wait().await;
        });

        Ok(())
    }

    /// Kills every process whose command line matches `name`. Zero matches
    /// is still success; only a failure to invoke pkill is an error.
    pub async fn terminate(&self, name: &str) -> Result<()> {
        Command::new("pkill")
            .arg("-f")
            .arg(name)
            .output()
            .await
            .map_err(|e| RunnerError::Terminate {
                name: name.to_string(),
                message: e.to_string(),
            })?;
        Ok(())
    }

    /// Scans the process table for the script's base filename. Enumeration
    /// failure reads as "not running", never as an error.
    pub async fn is_running(&self, script_path: &str) -> bool {
        let listing = Command::new("ps").arg("aux").output().await;
        match listing {
            Ok(output) if output.status.success() => {
                String::from_utf8_lossy(&output.stdout).contains(script_basename(script_path))
            }
            _ => false,
        }
    }

    /// Last `lines` lines of the per-script log file.
    pub async fn tail_log(&self, script_path: &str, lines: usize) -> String {
        let log_path = self.log_path(script_path);
        let Ok(contents) = tokio::fs::read_to_string(&log_path).await else {
            return NO_LOG_SENTINEL.to_string();
        };
        tail_lines(&contents, lines)
    }
}

fn tail_lines(contents: &str, lines: usize) -> String {
    let all: Vec<&str> = contents.lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::time::{Duration, sleep};

    fn test_runner(tmp: &TempDir) -> LocalRunner {
        LocalRunner::new(tmp.path().join("logs"))
    }

    #[tokio::test]
    async fn tail_log_without_file_returns_sentinel() {
        let tmp = TempDir::new().unwrap();
        let runner = test_runner(&tmp);

        let text = runner.tail_log("/opt/bots/ghost.sh", 20).await;
        assert_eq!(text, NO_LOG_SENTINEL);
    }

    #[tokio::test]
    async fn tail_log_returns_last_n_lines() {
        let tmp = TempDir::new().unwrap();
        let runner = test_runner(&tmp);
        std::fs::create_dir_all(tmp.path().join("logs")).unwrap();
        std::fs::write(
            tmp.path().join("logs").join("worker.sh.log"),
            "one\ntwo\nthree\nfour\n",
        )
        .unwrap();

        let text = runner.tail_log("/opt/bots/worker.sh", 2).await;
        assert_eq!(text, "three\nfour");

        let text = runner.tail_log("/opt/bots/worker.sh", 10).await;
        assert_eq!(text, "one\ntwo\nthree\nfour");
    }

    #[tokio::test]
    async fn launch_rejects_missing_script() {
        let tmp = TempDir::new().unwrap();
        let runner = test_runner(&tmp);

        let err = runner
            .launch(tmp.path().join("nope.sh").to_str().unwrap())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no such file"), "{err}");
    }

    #[tokio::test]
    async fn launch_appends_script_output_to_log() {
        let tmp = TempDir::new().unwrap();
        let runner = test_runner(&tmp);
        let script = tmp.path().join("hello.sh");
        std::fs::write(&script, "echo launch-marker\n").unwrap();

        runner.launch(script.to_str().unwrap()).await.unwrap();

        // The child runs detached; give it a moment to finish writing.
        let mut text = String::new();
        for _ in 0..50 {
            sleep(Duration::from_millis(50)).await;
            text = runner.tail_log(script.to_str().unwrap(), 5).await;
            if text.contains("launch-marker") {
                break;
            }
        }
        assert!(text.contains("launch-marker"), "log was: {text}");
    }

    #[tokio::test]
    async fn is_running_false_for_unknown_script() {
        let tmp = TempDir::new().unwrap();
        let runner = test_runner(&tmp);

        assert!(
            !runner
                .is_running("/opt/bots/definitely-not-a-real-process-name.sh")
                .await
        );
    }

    #[tokio::test]
    async fn terminate_with_no_matches_is_ok() {
        let tmp = TempDir::new().unwrap();
        let runner = test_runner(&tmp);

        runner
            .terminate("definitely-not-a-real-process-name")
            .await
            .unwrap();
    }

    #[test]
    fn tail_lines_handles_edge_counts() {
        assert_eq!(tail_lines("", 5), "");
        assert_eq!(tail_lines("a\nb", 0), "");
        assert_eq!(tail_lines("a\nb\nc", 1), "c");
    }
}
