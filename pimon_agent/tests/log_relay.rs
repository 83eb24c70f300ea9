//! Subprocess output relay: tagging, exit notices, spawn failures, restarts.
#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use pimon_agent::relay::{AppCommand, LogRelay};
use pimon_agent::{EventBus, EventKind, StreamEvent, Subscription, Topic};
use tokio::time::timeout;

fn sh(script: &str) -> AppCommand {
    AppCommand::new("sh").args(["-c", script])
}

fn system_starting(prefix: &'static str) -> impl Fn(&StreamEvent) -> bool {
    move |e: &StreamEvent| e.kind == EventKind::System && e.data.starts_with(prefix)
}

fn stdout_line(text: &'static str) -> impl Fn(&StreamEvent) -> bool {
    move |e: &StreamEvent| e.kind == EventKind::Data && &*e.data == text
}

async fn collect_until<F>(sub: &mut Subscription, done: F) -> Vec<StreamEvent>
where
    F: Fn(&StreamEvent) -> bool,
{
    let mut seen = Vec::new();
    loop {
        let ev = timeout(Duration::from_secs(5), sub.recv())
            .await
            .unwrap_or_else(|_| panic!("expected event not seen within timeout; saw {seen:?}"))
            .expect("logs topic open");
        let finished = done(&ev);
        seen.push(ev);
        if finished {
            return seen;
        }
    }
}

#[tokio::test]
async fn output_lines_are_tagged_and_exit_is_announced() {
    let bus = Arc::new(EventBus::new());
    let mut sub = bus.subscribe(Topic::Logs);
    let relay = LogRelay::spawn(bus.clone(), Some(sh("echo hello; echo oops 1>&2; exit 3")));

    assert!(relay.restart().await.is_some());
    let events = collect_until(&mut sub, system_starting("process exited")).await;

    assert_eq!(events[0].kind, EventKind::System);
    assert!(events[0].data.starts_with("started sh"));
    assert!(events
        .iter()
        .any(|e| e.kind == EventKind::Data && &*e.data == "hello"));
    assert!(events
        .iter()
        .any(|e| e.kind == EventKind::Stderr && &*e.data == "oops"));
    let last = events.last().unwrap();
    assert_eq!(last.kind, EventKind::System);
    assert_eq!(&*last.data, "process exited, code=3");

    // Exit does not restart the app.
    assert!(!relay.is_running().await);
}

#[tokio::test]
async fn spawn_failure_becomes_a_log_event() {
    let bus = Arc::new(EventBus::new());
    let mut sub = bus.subscribe(Topic::Logs);
    let relay = LogRelay::spawn(
        bus.clone(),
        Some(AppCommand::new("/nonexistent/pimon-test-app")),
    );

    assert_eq!(relay.restart().await, None);
    let events = collect_until(&mut sub, system_starting("failed to start")).await;
    assert_eq!(events.last().unwrap().kind, EventKind::System);
    assert!(!relay.is_running().await);
}

#[tokio::test]
async fn restart_replaces_the_running_app() {
    let bus = Arc::new(EventBus::new());
    let mut sub = bus.subscribe(Topic::Logs);
    let relay = LogRelay::spawn(bus.clone(), Some(sh("echo up; exec sleep 30")));

    let first = relay.restart().await.expect("first pid");
    collect_until(&mut sub, stdout_line("up")).await;
    assert!(relay.is_running().await);

    let second = relay.restart().await.expect("second pid");
    assert_ne!(first, second);
    let events = collect_until(&mut sub, stdout_line("up")).await;
    let exit = events
        .iter()
        .position(|e| e.data.starts_with("process exited"))
        .expect("previous app reported exit");
    let started = events
        .iter()
        .position(|e| e.data.starts_with("started sh"))
        .expect("new app reported start");
    assert!(exit < started);
    assert!(relay.is_running().await);

    relay.stop().await;
    assert!(!relay.is_running().await);
    relay.stop().await;
}

#[tokio::test]
async fn stdout_and_stderr_do_not_block_each_other() {
    let bus = Arc::new(EventBus::with_buffer(4096));
    let mut sub = bus.subscribe(Topic::Logs);
    // Floods stderr past a pipe buffer before writing stdout.
    let script = "i=0; while [ $i -lt 2000 ]; do echo err-$i-xxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx 1>&2; i=$((i+1)); done; echo done";
    let relay = LogRelay::spawn(bus.clone(), Some(sh(script)));
    relay.restart().await;

    let events = collect_until(&mut sub, system_starting("process exited")).await;
    assert!(events.iter().any(|e| e.kind == EventKind::Data && &*e.data == "done"));
    let stderr_lines = events.iter().filter(|e| e.kind == EventKind::Stderr).count();
    assert_eq!(stderr_lines, 2000);
}

#[tokio::test]
async fn restart_without_command_reports_it() {
    let bus = Arc::new(EventBus::new());
    let mut sub = bus.subscribe(Topic::Logs);
    let relay = LogRelay::spawn(bus.clone(), None);
    assert_eq!(relay.restart().await, None);
    collect_until(&mut sub, system_starting("no app command configured")).await;
}
