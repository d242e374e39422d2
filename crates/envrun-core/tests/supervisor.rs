//! End-to-end runs of the supervisor against temporary registries.

use envrun_core::{
    Argv0, EnvrunError, LockOptions, NameGenerator, NamePoolPolicy, ProcessRegistry, RunRequest,
    RunSupervisor, StreamOptions, SPAWN_FAILURE_STATUS,
};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

fn supervisor(dir: &Path, lock_options: LockOptions, seed: u64) -> RunSupervisor {
    RunSupervisor::with_parts(
        ProcessRegistry::new(dir, lock_options),
        NameGenerator::seeded(NamePoolPolicy::Persistent, seed),
        Box::new(Argv0),
        "/opt/test-env",
        Duration::from_millis(3000),
    )
}

fn command(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

fn quiet(parts: &[&str]) -> RunRequest {
    RunRequest {
        command: command(parts),
        streams: StreamOptions::sink_all(),
        ..Default::default()
    }
}

#[test]
fn test_run_echo_registers_and_cleans_up() {
    let root = tempfile::tempdir().unwrap();
    let proc_dir = root.path().join("proc");
    let mut supervisor = supervisor(&proc_dir, LockOptions::default(), 1);

    let status = supervisor.run(quiet(&["echo", "hi"])).unwrap();

    assert_eq!(status, 0);
    assert!(proc_dir.is_dir());
    assert!(supervisor.registry().list_all().unwrap().is_empty());
}

#[test]
fn test_record_is_visible_while_child_runs() {
    let root = tempfile::tempdir().unwrap();
    let proc_dir = root.path().join("proc");
    let snapshot = root.path().join("snapshot.json");
    let mut supervisor = supervisor(&proc_dir, LockOptions::default(), 2);

    let requested = command(&[
        "sh",
        "-c",
        r#"cat "$0"/*.json > "$1""#,
        proc_dir.to_str().unwrap(),
        snapshot.to_str().unwrap(),
    ]);
    let status = supervisor
        .run(RunRequest {
            command: requested.clone(),
            streams: StreamOptions::sink_all(),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(status, 0);

    let record: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&snapshot).unwrap()).unwrap();
    let name = record["name"].as_str().unwrap();
    let (adjective, noun) = name.split_once('_').unwrap();
    assert!(!adjective.is_empty());
    assert_eq!(noun, "sh");
    assert_eq!(record["command"], serde_json::json!(requested));
    assert_eq!(record["prefix"], "/opt/test-env");
    assert!(record.get("pid").is_none());

    assert!(supervisor.registry().list_all().unwrap().is_empty());
}

#[test]
fn test_explicit_name_in_use_is_rejected() {
    let root = tempfile::tempdir().unwrap();
    let proc_dir = root.path().join("proc");
    fs::create_dir_all(&proc_dir).unwrap();
    fs::write(
        proc_dir.join("999999.json"),
        r#"{"name":"curious_echo","command":["echo","old"],"prefix":"/opt/test-env"}"#,
    )
    .unwrap();
    let marker = root.path().join("spawned");
    let mut supervisor = supervisor(&proc_dir, LockOptions::default(), 3);

    let err = supervisor
        .run(RunRequest {
            command: command(&["touch", marker.to_str().unwrap()]),
            name: Some("curious_echo".to_string()),
            ..Default::default()
        })
        .unwrap_err();

    assert!(err.is_name_in_use());
    assert!(err.to_string().contains("curious_echo"));
    assert!(err.to_string().contains("999999"));
    assert!(!marker.exists());

    let records = supervisor.registry().list_all().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].pid, "999999");
}

#[test]
fn test_clean_env_with_extra_vars() {
    let root = tempfile::tempdir().unwrap();
    let out = root.path().join("env.txt");
    let mut supervisor = supervisor(&root.path().join("proc"), LockOptions::default(), 4);
    let path = std::env::var("PATH").unwrap();

    let status = supervisor
        .run(RunRequest {
            command: command(&["/bin/sh", "-c", r#"env > "$0""#, out.to_str().unwrap()]),
            clean_env: true,
            env_vars: command(&["FOO=bar", "PATH", "NOPE123"]),
            streams: StreamOptions::sink_all(),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(status, 0);

    let env = fs::read_to_string(&out).unwrap();
    let lines: Vec<&str> = env.lines().collect();
    assert!(lines.contains(&"FOO=bar"));
    assert!(lines.contains(&format!("PATH={}", path).as_str()));
    assert!(!env.contains("NOPE123"));
}

#[test]
fn test_child_exit_status_is_returned() {
    let root = tempfile::tempdir().unwrap();
    let mut supervisor = supervisor(&root.path().join("proc"), LockOptions::default(), 5);

    let status = supervisor.run(quiet(&["sh", "-c", "exit 3"])).unwrap();
    assert_eq!(status, 3);
}

#[test]
fn test_working_directory_override() {
    let root = tempfile::tempdir().unwrap();
    let workdir = root.path().join("work");
    fs::create_dir_all(&workdir).unwrap();
    let mut supervisor = supervisor(&root.path().join("proc"), LockOptions::default(), 6);

    let status = supervisor
        .run(RunRequest {
            command: command(&["sh", "-c", "touch here"]),
            cwd: Some(workdir.clone()),
            streams: StreamOptions::sink_all(),
            ..Default::default()
        })
        .unwrap();

    assert_eq!(status, 0);
    assert!(workdir.join("here").exists());
}

#[test]
fn test_spawn_failure_returns_status_one() {
    let root = tempfile::tempdir().unwrap();
    let mut supervisor = supervisor(&root.path().join("proc"), LockOptions::default(), 7);

    let status = supervisor
        .run(quiet(&["/nonexistent/envrun-test-binary"]))
        .unwrap();

    assert_eq!(status, SPAWN_FAILURE_STATUS);
    assert!(supervisor.registry().list_all().unwrap().is_empty());
}

#[test]
fn test_empty_command_is_rejected() {
    let root = tempfile::tempdir().unwrap();
    let mut supervisor = supervisor(&root.path().join("proc"), LockOptions::default(), 8);

    let err = supervisor.run(RunRequest::default()).unwrap_err();
    assert!(matches!(err, EnvrunError::InvalidInput(_)));
}

#[cfg(unix)]
#[test]
fn test_read_only_registry_runs_untracked() {
    use std::os::unix::fs::PermissionsExt;

    let root = tempfile::tempdir().unwrap();
    let proc_dir = root.path().join("proc");
    fs::create_dir_all(&proc_dir).unwrap();
    fs::set_permissions(&proc_dir, fs::Permissions::from_mode(0o555)).unwrap();

    let mut supervisor = supervisor(&proc_dir, LockOptions::default(), 9);
    let result = supervisor.run(quiet(&["true"]));

    fs::set_permissions(&proc_dir, fs::Permissions::from_mode(0o755)).unwrap();
    assert_eq!(result.unwrap(), 0);
    assert!(supervisor.registry().list_all().unwrap().is_empty());
}

#[test]
fn test_unusable_registry_path_runs_untracked() {
    let root = tempfile::tempdir().unwrap();
    let blocker = root.path().join("blocker");
    fs::write(&blocker, "not a directory").unwrap();
    let proc_dir = blocker.join("proc");

    let mut supervisor = supervisor(&proc_dir, LockOptions::default(), 10);
    assert_eq!(supervisor.run(quiet(&["true"])).unwrap(), 0);

    let registration = supervisor
        .register(4242, &command(&["true"]), Some("plain_true"))
        .unwrap();
    assert_eq!(registration.name, "plain_true");
    assert!(registration.entry.is_none());
    assert!(!proc_dir.exists());
}

#[test]
fn test_concurrent_explicit_names_register_once() {
    let root = tempfile::tempdir().unwrap();
    let proc_dir = root.path().join("proc");
    fs::create_dir_all(&proc_dir).unwrap();

    let workers = 8;
    let barrier = Arc::new(Barrier::new(workers));
    let handles: Vec<_> = (0..workers)
        .map(|i| {
            let proc_dir = proc_dir.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut supervisor = supervisor(&proc_dir, LockOptions::default(), i as u64);
                barrier.wait();
                supervisor.register(10_000 + i as u32, &command(&["server"]), Some("shared"))
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let registered: Vec<_> = results.iter().filter(|r| r.is_ok()).collect();
    assert_eq!(registered.len(), 1);
    assert!(
        results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| e.is_name_in_use())
    );

    let registry = ProcessRegistry::new(&proc_dir, LockOptions::default());
    let records = registry.list_all().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].record.name, "shared");

    drop(results);
    assert!(registry.list_all().unwrap().is_empty());
}

#[test]
fn test_concurrent_generated_names_are_distinct() {
    let root = tempfile::tempdir().unwrap();
    let proc_dir = root.path().join("proc");
    fs::create_dir_all(&proc_dir).unwrap();

    let workers = 8;
    let barrier = Arc::new(Barrier::new(workers));
    let handles: Vec<_> = (0..workers)
        .map(|i| {
            let proc_dir = proc_dir.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                // Same seed everywhere: every worker proposes the same candidates.
                let mut supervisor = supervisor(&proc_dir, LockOptions::default(), 42);
                barrier.wait();
                supervisor.register(20_000 + i as u32, &command(&["/usr/bin/worker"]), None)
            })
        })
        .collect();

    let registrations: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().unwrap().unwrap())
        .collect();

    let names: HashSet<&str> = registrations.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names.len(), workers);
    assert!(names.iter().all(|name| name.ends_with("_worker")));
    assert!(registrations.iter().all(|r| r.entry.is_some()));
}
