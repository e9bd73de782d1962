//! Integration tests for the request pipeline.
//!
//! These tests verify:
//! - Default-deny authorization
//! - Sanitization runs before authorization
//! - Argument and path allow-listing
//! - Confirmation denial is audited and nothing runs
//! - Timeouts and cancellation through the gateway
//! - A lost audit event halts the gateway
//! - Exactly one audit event per request under concurrency

mod common;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use command_gateway::confirm::{AllowAll, ApprovalStrategy, RiskLevel, ScriptedApproval};
use command_gateway::error::{AuditError, AuthorizationError, ExecutionError, SanitizationError};
use command_gateway::policy::{Policy, PolicyEntry};
use command_gateway::records::{AUDIT_LOG_FILE, HISTORY_LOG_FILE};
use command_gateway::{CommandRequest, Gateway, GatewayConfig, Outcome, Rejection};

struct Fixture {
    _dir: tempfile::TempDir,
    root: PathBuf,
    logs: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let root = dir.path().canonicalize().expect("failed to canonicalize");
        std::fs::create_dir(root.join("work")).expect("failed to create work dir");
        Self {
            logs: root.join("logs"),
            root,
            _dir: dir,
        }
    }

    fn work(&self) -> PathBuf {
        self.root.join("work")
    }

    fn gateway(&self, policy: Policy, strategy: Arc<dyn ApprovalStrategy>) -> Gateway {
        let config = GatewayConfig::new()
            .with_policy(policy)
            .with_log_dir(&self.logs)
            .with_user("pipeline")
            .with_timeout(Duration::from_secs(10));
        Gateway::new(config, strategy).expect("failed to build gateway")
    }

    fn audit(&self) -> Vec<serde_json::Value> {
        common::json_lines(&self.logs.join(AUDIT_LOG_FILE))
    }

    fn history(&self) -> Vec<serde_json::Value> {
        common::json_lines(&self.logs.join(HISTORY_LOG_FILE))
    }
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn ls_policy(prefix: &Path) -> Policy {
    Policy::builder()
        .allow("ls", PolicyEntry::new(["-l", "-a"], [prefix]))
        .build()
        .expect("failed to build policy")
}

// =============================================================================
// Authorization
// =============================================================================

#[tokio::test]
async fn test_unknown_command_is_denied() {
    let fx = Fixture::new();
    let gateway = fx.gateway(ls_policy(&fx.work()), Arc::new(AllowAll));

    let outcome = gateway
        .execute(CommandRequest::new("cat", Vec::<String>::new(), path_str(&fx.work())))
        .await
        .expect("audit failed");

    assert!(matches!(
        outcome,
        Outcome::Rejected(Rejection::Authorization(
            AuthorizationError::CommandNotAllowed { .. }
        ))
    ));
}

#[tokio::test]
async fn test_ls_argument_and_path_rules() {
    let fx = Fixture::new();
    let outside = fx.root.join("outside");
    std::fs::create_dir(&outside).expect("failed to create outside dir");
    let nested = fx.work().join("nested");
    std::fs::create_dir(&nested).expect("failed to create nested dir");
    let gateway = fx.gateway(ls_policy(&fx.work()), Arc::new(AllowAll));

    let allowed = gateway
        .execute(CommandRequest::new("ls", ["-l"], path_str(&nested)))
        .await
        .expect("audit failed");
    assert!(allowed.is_executed(), "got {allowed:?}");

    let bad_arg = gateway
        .execute(CommandRequest::new("ls", ["-R"], path_str(&fx.work())))
        .await
        .expect("audit failed");
    assert!(matches!(
        bad_arg,
        Outcome::Rejected(Rejection::Authorization(
            AuthorizationError::ArgumentNotAllowed { .. }
        ))
    ));

    let bad_path = gateway
        .execute(CommandRequest::new("ls", ["-l"], path_str(&outside)))
        .await
        .expect("audit failed");
    assert!(matches!(
        bad_path,
        Outcome::Rejected(Rejection::Authorization(
            AuthorizationError::PathNotAllowed { .. }
        ))
    ));

    let events = fx.audit();
    assert_eq!(events.len(), 3);
    assert_eq!(events[0]["status"], "success");
    assert_eq!(events[1]["status"], "failed");
    assert_eq!(events[2]["status"], "failed");
}

#[tokio::test]
async fn test_sibling_with_common_prefix_is_not_allowed() {
    let fx = Fixture::new();
    let sibling = fx.root.join("workshop");
    std::fs::create_dir(&sibling).expect("failed to create sibling");
    let gateway = fx.gateway(ls_policy(&fx.work()), Arc::new(AllowAll));

    assert!(!gateway.check_allowed(&CommandRequest::new("ls", ["-l"], path_str(&sibling))));
}

#[tokio::test]
async fn test_traversal_is_resolved_before_authorization() {
    let fx = Fixture::new();
    let gateway = fx.gateway(ls_policy(&fx.work()), Arc::new(AllowAll));

    let escape = format!("{}/..", fx.work().display());
    assert!(!gateway.check_allowed(&CommandRequest::new("ls", ["-l"], escape)));
}

// =============================================================================
// Sanitization before authorization
// =============================================================================

#[tokio::test]
async fn test_metacharacters_fail_sanitization_not_authorization() {
    let fx = Fixture::new();
    let gateway = fx.gateway(ls_policy(&fx.work()), Arc::new(AllowAll));
    let work = path_str(&fx.work());

    for request in [
        CommandRequest::new("rm;", Vec::<String>::new(), work.clone()),
        CommandRequest::new("ls", ["-l", "$(whoami)"], work.clone()),
        CommandRequest::new("ls", ["-l"], format!("{work}|cat")),
        CommandRequest::new("ls", ["[[", "-l"], work.clone()),
    ] {
        let outcome = gateway.execute(request.clone()).await.expect("audit failed");
        assert!(
            matches!(outcome, Outcome::Rejected(Rejection::Sanitization(_))),
            "{request:?} gave {outcome:?}"
        );
    }

    assert_eq!(fx.audit().len(), 4);
}

#[tokio::test]
async fn test_missing_path_is_a_sanitization_error() {
    let fx = Fixture::new();
    let gateway = fx.gateway(ls_policy(&fx.work()), Arc::new(AllowAll));

    let outcome = gateway
        .execute(CommandRequest::new(
            "ls",
            ["-l"],
            path_str(&fx.work().join("missing")),
        ))
        .await
        .expect("audit failed");
    assert!(matches!(
        outcome,
        Outcome::Rejected(Rejection::Sanitization(
            SanitizationError::InvalidPath { .. }
        ))
    ));
}

// =============================================================================
// Confirmation
// =============================================================================

#[tokio::test]
async fn test_confirmation_denied_runs_nothing() {
    let fx = Fixture::new();
    let policy = Policy::builder()
        .allow("touch", PolicyEntry::new(["created.txt"], [fx.work()]))
        .build()
        .expect("failed to build policy");
    let strategy = Arc::new(ScriptedApproval::new([false]));
    let gateway = fx.gateway(policy, strategy.clone());

    let outcome = gateway
        .execute(CommandRequest::new("touch", ["created.txt"], path_str(&fx.work())))
        .await
        .expect("audit failed");

    assert!(matches!(
        outcome,
        Outcome::Rejected(Rejection::ConfirmationDenied {
            risk_level: RiskLevel::Medium
        })
    ));
    assert!(!fx.work().join("created.txt").exists());

    let seen = strategy.seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].command, "touch");
    assert_eq!(seen[0].path, fx.work());

    let events = fx.audit();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["status"], "failed");
    assert_eq!(fx.history()[0]["risk_level"], "MEDIUM");
}

#[tokio::test]
async fn test_approved_command_runs_in_requested_directory() {
    let fx = Fixture::new();
    let policy = Policy::builder()
        .allow("touch", PolicyEntry::new(["created.txt"], [fx.work()]))
        .build()
        .expect("failed to build policy");
    let gateway = fx.gateway(policy, Arc::new(ScriptedApproval::new([true])));

    let outcome = gateway
        .execute(CommandRequest::new("touch", ["created.txt"], path_str(&fx.work())))
        .await
        .expect("audit failed");

    assert!(outcome.is_executed(), "got {outcome:?}");
    assert!(fx.work().join("created.txt").exists());
}

// =============================================================================
// Execution through the gateway
// =============================================================================

#[tokio::test]
async fn test_timeout_is_reported_and_audited() {
    let fx = Fixture::new();
    let policy = Policy::builder()
        .allow("sleep", PolicyEntry::new(["10"], [fx.work()]))
        .build()
        .expect("failed to build policy");
    let config = GatewayConfig::new()
        .with_policy(policy)
        .with_log_dir(&fx.logs)
        .with_timeout(Duration::from_millis(100))
        .with_grace_period(Duration::from_millis(100));
    let gateway = Gateway::new(config, Arc::new(AllowAll)).expect("failed to build gateway");

    let start = Instant::now();
    let outcome = gateway
        .execute(CommandRequest::new("sleep", ["10"], path_str(&fx.work())))
        .await
        .expect("audit failed");

    assert!(start.elapsed() < Duration::from_secs(2));
    assert!(matches!(
        outcome,
        Outcome::Rejected(Rejection::Execution(ExecutionError::CommandTimeout { .. }))
    ));

    let events = fx.audit();
    assert_eq!(events.len(), 1);
    assert!(events[0]["error"].as_str().unwrap_or_default().contains("timed out"));
    assert!(fx.history()[0]["duration"].as_f64().is_some());
}

#[tokio::test]
async fn test_cancelled_request_is_audited_and_child_killed() {
    let fx = Fixture::new();
    let marker = "47.25";
    let policy = Policy::builder()
        .allow("sleep", PolicyEntry::new([marker], [fx.work()]))
        .build()
        .expect("failed to build policy");
    let gateway = Arc::new(fx.gateway(policy, Arc::new(AllowAll)));

    let task = {
        let gateway = gateway.clone();
        let work = path_str(&fx.work());
        tokio::spawn(async move {
            gateway
                .execute(CommandRequest::new("sleep", [marker], work))
                .await
        })
    };

    let start = Instant::now();
    while common::processes_with_arg(marker) == 0 && start.elapsed() < Duration::from_secs(5) {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(common::processes_with_arg(marker), 1, "child never started");

    task.abort();
    assert!(task.await.expect_err("task should be cancelled").is_cancelled());

    assert!(
        common::wait_until_gone(marker, Duration::from_secs(2)).await,
        "child survived cancellation"
    );

    let events = fx.audit();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["status"], "failed");
    assert_eq!(events[0]["error"], "Command execution cancelled: sleep 47.25");
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_unaudited_cancellation_halts_gateway() {
    let fx = Fixture::new();
    let marker = "48.125";
    let policy = Policy::builder()
        .allow("sleep", PolicyEntry::new([marker], [fx.work()]))
        .build()
        .expect("failed to build policy");
    // Opens for append, but every write fails with ENOSPC.
    let config = GatewayConfig::new()
        .with_policy(policy)
        .with_log_dir(&fx.logs)
        .with_audit_log("/dev/full")
        .with_user("pipeline");
    let gateway = Arc::new(Gateway::new(config, Arc::new(AllowAll)).expect("failed to build gateway"));
    let work = path_str(&fx.work());

    let task = {
        let gateway = gateway.clone();
        let work = work.clone();
        tokio::spawn(async move {
            gateway
                .execute(CommandRequest::new("sleep", [marker], work))
                .await
        })
    };

    let start = Instant::now();
    while common::processes_with_arg(marker) == 0 && start.elapsed() < Duration::from_secs(5) {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(common::processes_with_arg(marker), 1, "child never started");
    assert!(gateway.halted().is_none());

    task.abort();
    let _ = task.await;
    assert!(
        common::wait_until_gone(marker, Duration::from_secs(2)).await,
        "child survived cancellation"
    );

    assert!(gateway.halted().is_some());
    let err = gateway
        .execute(CommandRequest::new("sleep", [marker], work.clone()))
        .await
        .expect_err("halted gateway must refuse requests");
    assert!(matches!(err, AuditError::Halted(_)));
    assert!(matches!(
        gateway.execute_line(&format!("sleep {marker} {work}")).await,
        Err(AuditError::Halted(_))
    ));
    assert_eq!(common::processes_with_arg(marker), 0, "halted gateway ran a command");
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_failed_audit_write_halts_gateway() {
    let fx = Fixture::new();
    let config = GatewayConfig::new()
        .with_policy(ls_policy(&fx.work()))
        .with_log_dir(&fx.logs)
        .with_audit_log("/dev/full");
    let gateway = Gateway::new(config, Arc::new(AllowAll)).expect("failed to build gateway");
    let request = CommandRequest::new("rm", ["-l"], path_str(&fx.work()));

    let err = gateway.execute(request.clone()).await.expect_err("write should fail");
    assert!(matches!(err, AuditError::Write { .. }));
    let err = gateway.execute(request).await.expect_err("should stay halted");
    assert!(matches!(err, AuditError::Halted(_)));
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_each_get_one_audit_event() {
    const N: usize = 12;
    let fx = Fixture::new();
    let tags: Vec<String> = (0..N).map(|i| format!("tag{i}")).collect();
    let policy = Policy::builder()
        .allow("echo", PolicyEntry::new(tags.clone(), [fx.work()]))
        .build()
        .expect("failed to build policy");
    let gateway = Arc::new(fx.gateway(policy, Arc::new(AllowAll)));

    let mut handles = Vec::new();
    for tag in &tags {
        let gateway = gateway.clone();
        let request = CommandRequest::new("echo", [tag.clone()], path_str(&fx.work()));
        let tag = tag.clone();
        handles.push(tokio::spawn(async move {
            let result = gateway
                .execute(request)
                .await
                .expect("audit failed")
                .into_result()
                .expect("request rejected");
            assert_eq!(result.stdout.trim(), tag);
        }));
    }
    for handle in handles {
        handle.await.expect("task panicked");
    }

    let events = fx.audit();
    assert_eq!(events.len(), N);
    let mut seen: Vec<String> = events
        .iter()
        .map(|e| e["arguments"][0].as_str().unwrap_or_default().to_string())
        .collect();
    seen.sort();
    let mut expected = tags.clone();
    expected.sort();
    assert_eq!(seen, expected);

    assert_eq!(gateway.history(100).await.expect("history").len(), N);
}

// =============================================================================
// Probes
// =============================================================================

#[tokio::test]
async fn test_check_allowed_has_no_side_effects() {
    let fx = Fixture::new();
    let gateway = fx.gateway(ls_policy(&fx.work()), Arc::new(AllowAll));
    let work = path_str(&fx.work());

    assert!(gateway.check_allowed(&CommandRequest::new("ls", ["-a"], work.clone())));
    assert!(!gateway.check_allowed(&CommandRequest::new("ls", ["-a;"], work.clone())));
    assert!(!gateway.check_allowed(&CommandRequest::new("rm", ["-a"], work)));

    assert!(fx.audit().is_empty());
    assert!(fx.history().is_empty());
}
