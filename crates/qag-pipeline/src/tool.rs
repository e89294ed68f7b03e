//! External-tool invocation with captured output.
//!
//! Both the store crawler and the diff utility are closed-source binaries;
//! all we get from them is an exit status and whatever they print. A
//! non-zero exit surfaces that output in the error so the failure is
//! diagnosable from the log alone.

use std::path::Path;
use std::process::Output;

use thiserror::Error;
use tokio::process::Command;
use tracing::info;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("launching {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{tool} exited with {status}. Output: '{output}'")]
    Failed {
        tool: String,
        status: String,
        output: String,
    },
}

/// Runs `tool` with `args`, optionally in `cwd`, and returns its combined
/// stdout+stderr on success.
pub async fn run_tool(
    tool: &Path,
    args: &[&str],
    cwd: Option<&Path>,
) -> Result<String, ToolError> {
    let tool_name = tool.display().to_string();
    info!(tool = %tool_name, ?args, "running external tool");

    let mut command = Command::new(tool);
    command.args(args);
    if let Some(cwd) = cwd {
        command.current_dir(cwd);
    }

    let output = command.output().await.map_err(|source| ToolError::Spawn {
        tool: tool_name.clone(),
        source,
    })?;

    let combined = combined_output(&output);
    if !output.status.success() {
        return Err(ToolError::Failed {
            tool: tool_name,
            status: output.status.to_string(),
            output: combined.trim_end().to_string(),
        });
    }

    info!(tool = %tool_name, "external tool done");
    Ok(combined)
}

fn combined_output(output: &Output) -> String {
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn successful_run_captures_stdout() {
        let output = run_tool(Path::new("/bin/echo"), &["hello", "tool"], None)
            .await
            .unwrap();
        assert_eq!(output.trim(), "hello tool");
    }

    #[tokio::test]
    async fn cwd_is_honored() {
        let dir = tempfile::tempdir().unwrap();
        let output = run_tool(Path::new("/bin/pwd"), &[], Some(dir.path()))
            .await
            .unwrap();
        // Compare canonicalized paths; the temp dir may sit behind a symlink.
        assert_eq!(
            PathBuf::from(output.trim()).canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
    }

    #[tokio::test]
    async fn failure_carries_the_tools_output() {
        let err = run_tool(Path::new("/bin/sh"), &["-c", "echo boom >&2; exit 3"], None)
            .await
            .unwrap_err();
        match err {
            ToolError::Failed { output, status, .. } => {
                assert!(output.contains("boom"), "output: {output:?}");
                assert!(status.contains('3'), "status: {status:?}");
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let err = run_tool(Path::new("/no/such/binary"), &[], None)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Spawn { .. }));
    }
}
