//! Session resolver over a fake `~/.claude/projects` tree.

mod common;

use std::fs;
use std::time::{Duration, SystemTime};

use claude_relay::claude::resolver::{encode_project_path, CONTEXT_MESSAGES};
use claude_relay::claude::SessionResolver;
use common::{user_line, write_session_log};
use tempfile::TempDir;

fn set_mtime(path: &std::path::Path, secs_ago: u64) {
    let file = fs::File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() - Duration::from_secs(secs_ago))
        .unwrap();
}

#[test]
fn no_projects_dir_means_no_session() {
    let resolver = SessionResolver::new("/definitely/not/here");
    let work = TempDir::new().unwrap();
    assert!(resolver.latest_session_id(work.path()).is_none());
    assert!(resolver.previous_context(work.path()).is_empty());
}

#[test]
fn latest_log_by_mtime_ignoring_agent_logs() {
    let projects = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();

    let old = write_session_log(projects.path(), work.path(), "old-session", &[user_line("first")]);
    let new = write_session_log(projects.path(), work.path(), "new-session", &[user_line("second")]);
    let agent = write_session_log(projects.path(), work.path(), "agent-abc", &[user_line("sub")]);
    set_mtime(&old, 300);
    set_mtime(&new, 100);
    set_mtime(&agent, 0);

    let resolver = SessionResolver::new(projects.path());
    assert_eq!(resolver.latest_session_id(work.path()).as_deref(), Some("new-session"));
}

#[test]
fn exact_directory_match_beats_basename_fallback() {
    let projects = TempDir::new().unwrap();
    let root = TempDir::new().unwrap();
    let work = root.path().join("app");
    fs::create_dir_all(&work).unwrap();

    // A different project whose name merely contains "app".
    let decoy = projects.path().join("-elsewhere-app");
    fs::create_dir_all(&decoy).unwrap();
    fs::write(decoy.join("decoy.jsonl"), user_line("decoy")).unwrap();

    let resolver = SessionResolver::new(projects.path());
    // Only the decoy exists: the basename heuristic picks it.
    assert_eq!(resolver.latest_session_id(&work).as_deref(), Some("decoy"));

    write_session_log(projects.path(), &work, "exact", &[user_line("real")]);
    assert_eq!(resolver.latest_session_id(&work).as_deref(), Some("exact"));

    let canonical = fs::canonicalize(&work).unwrap();
    assert_eq!(
        resolver.project_dir(&work),
        Some(projects.path().join(encode_project_path(&canonical)))
    );
}

#[test]
fn previous_context_keeps_last_user_prompts() {
    let projects = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();

    let mut lines: Vec<String> = (1..=7).map(|i| user_line(&format!("prompt number {i}"))).collect();
    lines.push(user_line("<command-name>/compact</command-name>"));
    lines.push(user_line("ok"));
    lines.push("{ not json".to_string());
    lines.push(
        serde_json::json!({"type": "assistant", "message": {"content": [{"type": "text", "text": "reply"}]}})
            .to_string(),
    );
    lines.push(
        serde_json::json!({"type": "user", "message": {"content": [{"type": "text", "text": "block form"}]}})
            .to_string(),
    );
    lines.push(user_line(&"z".repeat(250)));
    write_session_log(projects.path(), work.path(), "s", &lines);

    let context = SessionResolver::new(projects.path()).previous_context(work.path());
    assert_eq!(context.len(), CONTEXT_MESSAGES);
    assert_eq!(context[0], "prompt number 5");
    assert_eq!(context[2], "prompt number 7");
    assert_eq!(context[3], "block form");
    assert!(context[4].starts_with("zzz"));
    assert!(context[4].ends_with("..."));
    assert!(context[4].chars().count() <= 103);
}
