//! Python subprocess sandbox
//!
//! Each execution gets a fresh scratch directory holding the harness, the
//! generated code and a manifest of the permitted data sources. The
//! interpreter runs with a cleared environment, CPU and address-space
//! rlimits, and a wall-clock timeout; it is killed if the future is dropped.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{CodeRunner, ComputedValue, ExecutionError};
use crate::config::AnalystConfig;
use crate::sources::DataSource;

const HARNESS: &str = include_str!("harness.py");

/// Line printed by the harness right before the JSON result
pub const RESULT_MARKER: &str = "__DATALOOM_RESULT__";

/// Limits and interpreter for the sandbox
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub python_bin: String,
    /// Wall-clock limit for one execution
    pub timeout: Duration,
    /// RLIMIT_AS for the interpreter
    pub memory_bytes: u64,
}

impl SandboxConfig {
    pub fn from_analyst(config: &AnalystConfig) -> Self {
        Self {
            python_bin: config.python_bin.clone(),
            timeout: config.execution_timeout(),
            memory_bytes: config.sandbox_memory_bytes,
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self::from_analyst(&AnalystConfig::default())
    }
}

/// One manifest entry as read by the harness
#[derive(Debug, Serialize)]
struct ManifestSource<'a> {
    id: &'a str,
    file_path: &'a str,
    file_format: &'static str,
    tabular_path: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct Manifest<'a> {
    sources: Vec<ManifestSource<'a>>,
}

/// Runs generated code with a local Python interpreter
pub struct PythonSandbox {
    config: SandboxConfig,
}

impl PythonSandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    fn write_workdir(&self, dir: &Path, code: &str, sources: &[DataSource]) -> Result<(), ExecutionError> {
        let manifest = Manifest {
            sources: sources
                .iter()
                .map(|s| ManifestSource {
                    id: &s.id,
                    file_path: &s.file_path,
                    file_format: s.format().as_str(),
                    tabular_path: s.tabular_path(),
                })
                .collect(),
        };
        let manifest = serde_json::to_string(&manifest)
            .map_err(|e| ExecutionError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;

        std::fs::write(dir.join("harness.py"), HARNESS)?;
        std::fs::write(dir.join("manifest.json"), manifest)?;
        std::fs::write(dir.join("solver.py"), code)?;
        Ok(())
    }

    fn command(&self, dir: &Path) -> Command {
        let mut cmd = Command::new(&self.config.python_bin);
        cmd.arg(dir.join("harness.py"))
            .arg(dir)
            .current_dir(dir)
            .env_clear()
            .env("PATH", std::env::var("PATH").unwrap_or_default())
            .env("HOME", dir)
            .env("MPLCONFIGDIR", dir)
            .env("MPLBACKEND", "Agg")
            .env("OPENBLAS_NUM_THREADS", "1")
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let cpu_secs = self.config.timeout.as_secs().max(1) + 1;
        let memory_bytes = self.config.memory_bytes;
        // SAFETY: only async-signal-safe setrlimit calls between fork and exec
        unsafe {
            cmd.pre_exec(move || {
                let cpu = libc::rlimit {
                    rlim_cur: cpu_secs as libc::rlim_t,
                    rlim_max: cpu_secs as libc::rlim_t,
                };
                if libc::setrlimit(libc::RLIMIT_CPU, &cpu) != 0 {
                    return Err(std::io::Error::last_os_error());
                }
                let memory = libc::rlimit {
                    rlim_cur: memory_bytes as libc::rlim_t,
                    rlim_max: memory_bytes as libc::rlim_t,
                };
                if libc::setrlimit(libc::RLIMIT_AS, &memory) != 0 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
        cmd
    }
}

/// Final non-empty stderr line, which for a Python traceback is `Type: message`
fn last_error_line(stderr: &str) -> String {
    stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("process exited with an error")
        .to_string()
}

/// Parse the JSON line following the last result marker
///
/// Generated code may print the marker itself; the harness always writes
/// its own marker last.
fn decode_result(stdout: &str) -> Result<ComputedValue, ExecutionError> {
    let lines: Vec<&str> = stdout.lines().collect();
    let marker = lines
        .iter()
        .rposition(|line| line.trim() == RESULT_MARKER)
        .ok_or_else(|| ExecutionError::Protocol("no result marker in output".to_string()))?;
    let payload = lines
        .get(marker + 1)
        .ok_or_else(|| ExecutionError::Protocol("missing result line".to_string()))?;
    serde_json::from_str(payload).map_err(|e| ExecutionError::Protocol(e.to_string()))
}

#[async_trait]
impl CodeRunner for PythonSandbox {
    async fn run(&self, code: &str, sources: &[DataSource]) -> Result<ComputedValue, ExecutionError> {
        let workdir = tempfile::Builder::new().prefix("dataloom-").tempdir()?;
        self.write_workdir(workdir.path(), code, sources)?;

        let start = Instant::now();
        let child = self
            .command(workdir.path())
            .spawn()
            .map_err(|e| ExecutionError::Spawn(format!("{}: {}", self.config.python_bin, e)))?;

        let output = match tokio::time::timeout(self.config.timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                warn!(timeout_secs = self.config.timeout.as_secs(), "Generated code timed out");
                return Err(ExecutionError::Timeout(self.config.timeout));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!(
            exit_code = output.status.code().unwrap_or(-1),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            stdout_len = stdout.len(),
            "Sandbox process finished"
        );

        if !output.status.success() {
            return Err(ExecutionError::Failed {
                message: last_error_line(&stderr),
                stderr: stderr.into_owned(),
            });
        }

        decode_result(&stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::FieldInfo;

    #[test]
    fn test_last_error_line() {
        let stderr = "Traceback (most recent call last):\n  File \"solver.py\", line 2\nKeyError: 'cpu_usage'\n\n";
        assert_eq!(last_error_line(stderr), "KeyError: 'cpu_usage'");
        assert_eq!(last_error_line(""), "process exited with an error");
    }

    #[test]
    fn test_decode_result_skips_user_prints() {
        let stdout = "debug output\n\n__DATALOOM_RESULT__\n{\"type\": \"number\", \"value\": 0.99}\n";
        assert_eq!(decode_result(stdout).unwrap(), ComputedValue::float(0.99));
        assert!(matches!(decode_result("nothing"), Err(ExecutionError::Protocol(_))));
    }

    #[test]
    fn test_decode_result_uses_last_marker() {
        let stdout = "__DATALOOM_RESULT__\n{\"type\": \"text\", \"value\": \"spoofed\"}\n\n__DATALOOM_RESULT__\n{\"type\": \"number\", \"value\": 3}\n";
        assert_eq!(decode_result(stdout).unwrap(), ComputedValue::number(3));

        let truncated = "__DATALOOM_RESULT__\n{\"type\": \"number\", \"value\": 3}\n__DATALOOM_RESULT__\n";
        assert!(matches!(decode_result(truncated), Err(ExecutionError::Protocol(_))));
    }

    #[test]
    fn test_manifest_written() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = PythonSandbox::new(SandboxConfig::default());
        let sources = vec![DataSource::csv("file-0", "/data/m.csv", vec![FieldInfo::new("cpu", "float64")])];
        sandbox.write_workdir(dir.path(), "def solver():\n    return 1\n", &sources).unwrap();

        let manifest: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("manifest.json")).unwrap()).unwrap();
        assert_eq!(manifest["sources"][0]["id"], "file-0");
        assert_eq!(manifest["sources"][0]["tabular_path"], "/data/m.csv");
        assert!(dir.path().join("harness.py").exists());
    }

    #[tokio::test]
    #[ignore = "requires python3 with pandas and matplotlib"]
    async fn test_python_solver_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let csv = dir.path().join("metrics.csv");
        std::fs::write(&csv, "host,cpu\na,0.5\nb,0.99\n").unwrap();
        let sources = vec![DataSource::csv(
            "file-0",
            csv.to_string_lossy(),
            vec![FieldInfo::new("cpu", "float64")],
        )];

        let sandbox = PythonSandbox::new(SandboxConfig::default());
        let value = sandbox
            .run("def solver():\n    return fetch_df('file-0')['cpu'].max()\n", &sources)
            .await
            .unwrap();
        assert_eq!(value.stringify(), "0.99");

        let err = sandbox
            .run("def solver():\n    return fetch_df('file-0')['cpu_usage'].max()\n", &sources)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "KeyError: 'cpu_usage'");
    }

    #[tokio::test]
    #[ignore = "requires python3 with pandas and matplotlib"]
    async fn test_python_non_finite_cells_become_null() {
        let sandbox = PythonSandbox::new(SandboxConfig::default());
        let value = sandbox
            .run(
                "def solver():\n    return pd.DataFrame({'x': [1.0, float('inf'), float('nan'), -np.inf]})\n",
                &[],
            )
            .await
            .unwrap();

        match value {
            ComputedValue::Table { rows, .. } => {
                let cells: Vec<serde_json::Value> = rows.into_iter().map(|mut r| r.remove(0)).collect();
                assert_eq!(
                    cells,
                    vec![serde_json::json!(1.0), serde_json::Value::Null, serde_json::Value::Null, serde_json::Value::Null]
                );
            }
            other => panic!("expected a table, got {:?}", other),
        }
    }
}
