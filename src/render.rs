//! Render execution: drives the external rendering toolchain for one job.
//!
//! The toolchain runs as a child process so a CPU-saturated render can never
//! block the control plane, and it is invoked with an explicit CPU quota
//! below one core-equivalent. Progress arrives as machine-readable lines on
//! the child's stdout (`progress <done>/<total>`, `artifact <path>`).

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;

use crate::config::RenderSettings;
use crate::types::{ErrorDetail, FailureReason, MixPlan};

/// Bound on how long we wait for a killed child to be reaped.
const KILL_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub enum RenderOutcome {
    /// Final artifact path as reported by the toolchain.
    Completed(String),
    Failed(ErrorDetail),
    Cancelled,
}

#[derive(Debug, PartialEq)]
enum ProgressEvent {
    /// `progress <done>/<total>` — items are pair merges plus the final encode.
    Progress { done: u64, total: u64 },
    /// `artifact <path>`
    Artifact(String),
}

fn parse_progress_line(line: &str) -> Option<ProgressEvent> {
    let line = line.trim();
    if let Some(rest) = line.strip_prefix("progress ") {
        let (done, total) = rest.split_once('/')?;
        let done: u64 = done.trim().parse().ok()?;
        let total: u64 = total.trim().parse().ok()?;
        if total == 0 {
            return None;
        }
        return Some(ProgressEvent::Progress { done, total });
    }
    if let Some(path) = line.strip_prefix("artifact ") {
        let path = path.trim();
        if path.is_empty() {
            return None;
        }
        return Some(ProgressEvent::Artifact(path.to_string()));
    }
    None
}

/// Run one render to completion, cancellation, failure, or timeout.
///
/// `on_progress` receives a monotone non-decreasing percentage capped at 99;
/// the scheduler reports 100 only on the Completed transition. `cancel`
/// flips to true when the job is cancelled; on return after cancellation the
/// child has been killed and reaped — no orphan remains.
pub async fn run<F>(
    settings: &RenderSettings,
    job_id: &str,
    plan: &MixPlan,
    mut cancel: watch::Receiver<bool>,
    on_progress: F,
) -> RenderOutcome
where
    F: Fn(u8),
{
    let plan_path = settings.output_dir.join(format!("{job_id}.plan.json"));
    let artifact_path = settings.output_dir.join(format!("{job_id}.mix.flac"));

    if let Err(e) = tokio::fs::create_dir_all(&settings.output_dir).await {
        return failure(format!("failed to create output directory: {e}"));
    }
    let plan_json = match serde_json::to_vec_pretty(plan) {
        Ok(bytes) => bytes,
        Err(e) => return failure(format!("failed to encode mix plan: {e}")),
    };
    if let Err(e) = tokio::fs::write(&plan_path, plan_json).await {
        return failure(format!("failed to write mix plan: {e}"));
    }

    let mut command = Command::new(&settings.renderer_cmd);
    command
        .arg("--plan")
        .arg(&plan_path)
        .arg("--output")
        .arg(&artifact_path)
        .arg("--cpu-quota")
        .arg(settings.cpu_quota_pct.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            return failure(format!(
                "failed to start renderer '{}': {e}",
                settings.renderer_cmd
            ));
        }
    };

    let Some(stdout) = child.stdout.take() else {
        terminate(child).await;
        return failure("renderer stdout was not captured".to_string());
    };
    let stderr = child.stderr.take();
    let stderr_task = tokio::spawn(async move {
        let mut buf = String::new();
        if let Some(mut stderr) = stderr {
            let _ = stderr.read_to_string(&mut buf).await;
        }
        buf
    });

    let mut lines = BufReader::new(stdout).lines();
    let deadline = tokio::time::Instant::now() + settings.render_timeout;
    let mut last_percent = 0u8;
    let mut reported_artifact: Option<String> = None;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => match parse_progress_line(&line) {
                        Some(ProgressEvent::Progress { done, total }) => {
                            // Cap in u64 before narrowing so an overshooting
                            // report cannot wrap.
                            let percent = (done * 100 / total).min(99) as u8;
                            // Out-of-order toolchain output must not move
                            // progress backwards.
                            if percent > last_percent {
                                last_percent = percent;
                                on_progress(percent);
                            }
                        }
                        Some(ProgressEvent::Artifact(path)) => {
                            reported_artifact = Some(path);
                        }
                        None => {}
                    },
                    Ok(None) => break,
                    Err(e) => {
                        terminate(child).await;
                        return failure(format!("failed reading renderer output: {e}"));
                    }
                }
            }
            changed = cancel.changed() => {
                let cancelled = changed.is_ok() && *cancel.borrow();
                // A dropped sender means the job was already detached; treat
                // it like a cancel so the child never outlives its job.
                if cancelled || changed.is_err() {
                    terminate(child).await;
                    let _ = stderr_task.await;
                    tracing::info!(job_id, "render cancelled, child terminated");
                    return RenderOutcome::Cancelled;
                }
            }
            _ = tokio::time::sleep_until(deadline) => {
                terminate(child).await;
                let _ = stderr_task.await;
                return RenderOutcome::Failed(ErrorDetail {
                    reason: FailureReason::RenderTimeout,
                    message: format!(
                        "render exceeded wall-clock budget of {}s",
                        settings.render_timeout.as_secs()
                    ),
                });
            }
        }
    }

    // Stdout closed: wait for exit, still bounded by the render budget.
    let status = match tokio::time::timeout_at(deadline, child.wait()).await {
        Ok(Ok(status)) => status,
        Ok(Err(e)) => return failure(format!("failed waiting for renderer: {e}")),
        Err(_) => {
            return RenderOutcome::Failed(ErrorDetail {
                reason: FailureReason::RenderTimeout,
                message: format!(
                    "render exceeded wall-clock budget of {}s",
                    settings.render_timeout.as_secs()
                ),
            });
        }
    };
    let stderr_text = stderr_task.await.unwrap_or_default();

    if *cancel.borrow() {
        return RenderOutcome::Cancelled;
    }
    if !status.success() {
        let diagnostic = if stderr_text.trim().is_empty() {
            format!("renderer exited with {status}")
        } else {
            // Toolchain diagnostic retained verbatim.
            format!("renderer exited with {status}: {}", stderr_text.trim_end())
        };
        return failure(diagnostic);
    }
    match reported_artifact {
        Some(artifact) => RenderOutcome::Completed(artifact),
        None => failure("renderer exited cleanly but reported no artifact".to_string()),
    }
}

fn failure(message: String) -> RenderOutcome {
    RenderOutcome::Failed(ErrorDetail {
        reason: FailureReason::RenderFailure,
        message,
    })
}

async fn terminate(mut child: Child) {
    if child.start_kill().is_ok() {
        let _ = tokio::time::timeout(KILL_GRACE, child.wait()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Instant;

    use crate::types::Track;

    fn test_plan() -> MixPlan {
        MixPlan {
            tracks: vec![Track {
                id: "t1".to_string(),
                title: "Only".to_string(),
                artist: "Artist".to_string(),
                genre: "Techno".to_string(),
                duration_secs: 300.0,
                tag_bpm: Some(128.0),
                analysis_bpm: None,
                tag_key: "8A".to_string(),
                analysis_key: None,
                energy: None,
                spectral_profile: None,
            }],
            transitions: vec![],
            annotations: vec![],
        }
    }

    /// Write an executable fake-renderer script and return settings using it.
    fn settings_with_script(dir: &tempfile::TempDir, body: &str) -> RenderSettings {
        use std::os::unix::fs::PermissionsExt;
        let script_path = dir.path().join("fake-renderer.sh");
        std::fs::write(&script_path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&script_path, std::fs::Permissions::from_mode(0o755)).unwrap();
        RenderSettings {
            renderer_cmd: script_path.to_string_lossy().to_string(),
            output_dir: dir.path().join("out"),
            render_timeout: Duration::from_secs(10),
            ..RenderSettings::default()
        }
    }

    fn no_cancel() -> watch::Receiver<bool> {
        let (tx, rx) = watch::channel(false);
        // Keep the sender alive for the duration of the test process.
        std::mem::forget(tx);
        rx
    }

    #[tokio::test]
    async fn successful_render_reports_artifact_and_progress() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_with_script(
            &dir,
            "echo 'progress 1/2'\necho 'progress 2/2'\necho 'artifact /tmp/final.flac'",
        );
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);

        let outcome = run(&settings, "job1", &test_plan(), no_cancel(), move |p| {
            seen_clone.lock().unwrap().push(p);
        })
        .await;

        match outcome {
            RenderOutcome::Completed(artifact) => assert_eq!(artifact, "/tmp/final.flac"),
            other => panic!("expected Completed, got {other:?}"),
        }
        let seen = seen.lock().unwrap();
        assert!(!seen.is_empty());
        assert!(seen.iter().all(|p| *p <= 99), "running progress caps at 99");
    }

    #[tokio::test]
    async fn progress_never_decreases_on_out_of_order_output() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_with_script(
            &dir,
            "echo 'progress 2/4'\necho 'progress 1/4'\necho 'progress 3/4'\necho 'artifact /tmp/a.flac'",
        );
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);

        let _ = run(&settings, "job1", &test_plan(), no_cancel(), move |p| {
            seen_clone.lock().unwrap().push(p);
        })
        .await;

        let seen = seen.lock().unwrap();
        assert_eq!(*seen, vec![50, 75], "the stale 25% report must be dropped");
    }

    #[tokio::test]
    async fn overshooting_progress_caps_at_99() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_with_script(
            &dir,
            "echo 'progress 300/100'\necho 'artifact /tmp/a.flac'",
        );
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);

        let _ = run(&settings, "job1", &test_plan(), no_cancel(), move |p| {
            seen_clone.lock().unwrap().push(p);
        })
        .await;

        let seen = seen.lock().unwrap();
        assert_eq!(*seen, vec![99], "a 300% report must clamp, not wrap");
    }

    #[tokio::test]
    async fn crash_preserves_stderr_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_with_script(&dir, "echo 'codec exploded' >&2\nexit 3");

        let outcome = run(&settings, "job1", &test_plan(), no_cancel(), |_| {}).await;
        match outcome {
            RenderOutcome::Failed(detail) => {
                assert_eq!(detail.reason, FailureReason::RenderFailure);
                assert!(detail.message.contains("codec exploded"), "{}", detail.message);
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn clean_exit_without_artifact_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_with_script(&dir, "echo 'progress 1/1'");

        let outcome = run(&settings, "job1", &test_plan(), no_cancel(), |_| {}).await;
        match outcome {
            RenderOutcome::Failed(detail) => {
                assert_eq!(detail.reason, FailureReason::RenderFailure);
                assert!(detail.message.contains("no artifact"));
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn timeout_is_distinct_from_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings_with_script(&dir, "sleep 10");
        settings.render_timeout = Duration::from_millis(200);

        let outcome = run(&settings, "job1", &test_plan(), no_cancel(), |_| {}).await;
        match outcome {
            RenderOutcome::Failed(detail) => {
                assert_eq!(detail.reason, FailureReason::RenderTimeout);
            }
            other => panic!("expected timeout failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancel_kills_the_child_promptly() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_with_script(&dir, "sleep 30");
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let started = Instant::now();
        let handle = {
            let settings = settings.clone();
            let plan = test_plan();
            tokio::spawn(async move { run(&settings, "job1", &plan, cancel_rx, |_| {}).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel_tx.send(true).unwrap();

        let outcome = handle.await.unwrap();
        assert!(matches!(outcome, RenderOutcome::Cancelled));
        assert!(
            started.elapsed() < Duration::from_secs(5),
            "cancel should not wait for the 30s sleep"
        );
    }

    #[test]
    fn progress_line_parsing() {
        assert_eq!(
            parse_progress_line("progress 3/9"),
            Some(ProgressEvent::Progress { done: 3, total: 9 })
        );
        assert_eq!(
            parse_progress_line("  artifact /tmp/mix.flac "),
            Some(ProgressEvent::Artifact("/tmp/mix.flac".to_string()))
        );
        assert_eq!(parse_progress_line("progress 3/0"), None);
        assert_eq!(parse_progress_line("progress x/y"), None);
        assert_eq!(parse_progress_line("artifact "), None);
        assert_eq!(parse_progress_line("unrelated chatter"), None);
    }
}
