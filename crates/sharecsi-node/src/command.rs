//! Invocation of the host's mount utilities
//!
//! `mount(8)` and `umount(8)` report failure through their exit status and a
//! message on stderr. Both become [`NodeError::MountFailed`] for the path
//! acted on, carrying the helper's own words so the retry classifier can tell
//! an unreachable server from a rejected credential.

use crate::error::{NodeError, Result};
use tokio::process::Command;
use tracing::debug;

/// umount(8) wording for a path that is not a mount point
const NOT_MOUNTED_MARKERS: &[&str] = &["not mounted", "no mount point", "not a mount point"];

/// What a finished unmount did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unmounted {
    Done,
    NotMounted,
}

/// Meaning of a mount(8) exit status, for helpers that exit silently
fn exit_status_meaning(code: i32) -> &'static str {
    match code {
        1 => "incorrect invocation or permissions",
        2 => "system error",
        4 => "internal mount bug",
        8 => "interrupted",
        16 => "problems writing or locking the mount table",
        32 => "mount failure",
        64 => "some mounts succeeded",
        _ => "unexpected exit status",
    }
}

/// Condense helper stderr into one line
fn failure_message(code: Option<i32>, stderr: &str) -> String {
    let lines: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    if !lines.is_empty() {
        return lines.join("; ");
    }
    match code {
        Some(code) => format!("exit status {} ({})", code, exit_status_meaning(code)),
        None => "terminated by signal".to_string(),
    }
}

/// Run a mount utility acting on `target`
///
/// Arguments are logged, so callers must never pass secret material here.
pub async fn run_mount_tool(program: &str, args: &[&str], target: &str) -> Result<()> {
    debug!("Executing: {} {}", program, args.join(" "));

    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| NodeError::mount_failed(target, format!("cannot run {}: {}", program, e)))?;

    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    let message = failure_message(output.status.code(), &stderr);
    debug!("{} on {} failed: {}", program, target, message);
    Err(NodeError::mount_failed(target, message))
}

/// Treat "nothing mounted there" as a finished unmount
fn unmount_outcome(result: Result<()>) -> Result<Unmounted> {
    match result {
        Ok(()) => Ok(Unmounted::Done),
        Err(NodeError::MountFailed { message, .. })
            if NOT_MOUNTED_MARKERS
                .iter()
                .any(|m| message.to_ascii_lowercase().contains(m)) =>
        {
            Ok(Unmounted::NotMounted)
        }
        Err(e) => Err(e),
    }
}

/// Unmount `target` with umount(8)
pub async fn run_umount(target: &str) -> Result<Unmounted> {
    unmount_outcome(run_mount_tool("umount", &[target], target).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sharecsi_cloud::Disposition;

    #[tokio::test]
    async fn test_success_and_stderr_failures() {
        run_mount_tool("sh", &["-c", "echo warn >&2"], "/staging/a")
            .await
            .unwrap();

        let err = run_mount_tool(
            "sh",
            &["-c", "echo 'mount error(112): Host is down' >&2; echo 'Refer to mount.cifs(8)' >&2; exit 32"],
            "/staging/a",
        )
        .await
        .unwrap_err();
        match &err {
            NodeError::MountFailed { target, message } => {
                assert_eq!(target, "/staging/a");
                assert_eq!(message, "mount error(112): Host is down; Refer to mount.cifs(8)");
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(err.disposition(), Disposition::Transient);
    }

    #[tokio::test]
    async fn test_silent_failure_uses_exit_status() {
        let err = run_mount_tool("sh", &["-c", "exit 32"], "/t").await.unwrap_err();
        assert!(err.to_string().contains("exit status 32 (mount failure)"));
        assert_eq!(err.disposition(), Disposition::Terminal);
    }

    #[tokio::test]
    async fn test_missing_helper() {
        let err = run_mount_tool("/nonexistent/mount.helper", &[], "/t")
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::MountFailed { .. }));
        assert!(err.to_string().contains("cannot run /nonexistent/mount.helper"));
    }

    #[tokio::test]
    async fn test_unmount_of_unmounted_path() {
        let not_mounted = run_mount_tool(
            "sh",
            &["-c", "echo 'umount: /t: not mounted.' >&2; exit 32"],
            "/t",
        )
        .await;
        assert_eq!(unmount_outcome(not_mounted).unwrap(), Unmounted::NotMounted);

        let busy = run_mount_tool(
            "sh",
            &["-c", "echo 'umount: /t: target is busy.' >&2; exit 32"],
            "/t",
        )
        .await;
        assert!(unmount_outcome(busy).is_err());

        assert_eq!(unmount_outcome(Ok(())).unwrap(), Unmounted::Done);
    }
}
