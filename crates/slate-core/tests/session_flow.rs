use std::collections::BTreeSet;
use std::time::Duration;

use httpmock::MockServer;
use pretty_assertions::assert_eq;
use serde_json::json;
use slate_core::bootstrap::{HttpSeedSource, SeedSource};
use slate_core::commands;
use slate_core::config::Config;
use slate_core::render::Renderer;
use slate_core::session::{AssumeYes, Notice, Outcome, Session, SessionOptions};
use slate_core::storage::{FileStore, SaveStatus};
use slate_core::task::{Priority, Status};
use slate_core::view::{Direction, SortKey, SortSpec, TaskFilter, run_view};
use tempfile::tempdir;

fn open(dir: &std::path::Path) -> Session<FileStore> {
    let store = FileStore::open(dir).expect("open file store");
    Session::open(store, &SessionOptions::default(), None)
}

#[test]
fn file_backed_session_round_trip() {
    let temp = tempdir().expect("tempdir");

    let mut session = open(temp.path());
    for (title, priority) in [
        ("Write report", Priority::High),
        ("Water plants", Priority::None),
        ("Call bank", Priority::High),
    ] {
        let mut draft = session.new_draft(title);
        draft.priority = priority;
        session.create(draft).expect("create");
    }
    assert_eq!(session.last_save(), &SaveStatus::Saved);
    assert!(temp.path().join("tasks.json").exists());

    let reopened = open(temp.path());
    assert_eq!(reopened.tasks().len(), 3);
    assert_eq!(reopened.history().len(), 4);

    let mut view = reopened.view().clone();
    view.set_filter(TaskFilter {
        priority: Some(Priority::High),
        ..TaskFilter::default()
    });
    view.set_sort(Some(SortSpec {
        key: SortKey::Title,
        direction: Direction::Descending,
    }));
    let page = run_view(reopened.tasks(), view.query());
    let titles: Vec<&str> = page.items.iter().map(|t| t.title.as_str()).collect();
    assert_eq!(titles, vec!["Write report", "Call bank"]);
}

#[test]
fn bulk_delete_then_undo_across_invocations() {
    let temp = tempdir().expect("tempdir");
    let mut session = open(temp.path());
    for n in 1..=10 {
        let draft = session.new_draft(format!("task {n}"));
        session.create(draft).expect("create");
    }
    let doomed: BTreeSet<i64> = session.tasks().iter().take(3).map(|t| t.id).collect();

    let outcome = session.bulk_delete(&doomed, &mut AssumeYes);
    assert_eq!(outcome, Outcome::Done(Notice::BulkDeleted(3)));
    drop(session);

    let mut session = open(temp.path());
    assert_eq!(session.tasks().len(), 7);
    assert_eq!(session.undo(), Some(Notice::Undone));
    drop(session);

    let session = open(temp.path());
    assert_eq!(session.tasks().len(), 10);
    assert!(session.history().can_redo());
}

#[test]
fn cli_commands_drive_a_session() {
    let temp = tempdir().expect("tempdir");
    let mut session = open(temp.path());
    let renderer = Renderer::plain();
    let parse = |args: &[&str]| {
        let mut argv = vec!["slate"];
        argv.extend_from_slice(args);
        <slate_core::cli::GlobalCli as clap::Parser>::parse_from(argv).command
    };

    let run = |session: &mut Session<FileStore>, args: &[&str]| {
        let mut out = Vec::new();
        commands::dispatch(session, &renderer, &mut AssumeYes, parse(args), &mut out)
            .expect("command succeeds");
        String::from_utf8(out).expect("utf8")
    };

    run(&mut session, &["field", "add", "points", "number"]);
    run(&mut session, &["add", "Plan sprint", "--priority", "urgent", "--set", "points=5"]);
    run(&mut session, &["add", "Tidy desk", "--status", "completed"]);

    let listed = run(&mut session, &["list", "--sort", "points", "--desc"]);
    let lines: Vec<&str> = listed.lines().collect();
    assert!(lines[0].starts_with("ID"));
    assert!(lines[0].ends_with("points"));
    assert!(lines[2].contains("Plan sprint"));
    assert_eq!(lines.last().copied(), Some("Page 1/1 (2 tasks)"));

    let id = session.tasks()[1].id;
    let edited = run(&mut session, &["edit", &id.to_string(), "--status", "in_progress"]);
    assert_eq!(edited, format!("+ Updated task {id}.\n"));
    assert_eq!(session.tasks()[1].status, Status::InProgress);

    let deleted = run(&mut session, &["delete", &id.to_string()]);
    assert!(deleted.starts_with("- "));
    assert_eq!(session.tasks().len(), 1);

    let exported = run(&mut session, &["export"]);
    let value: serde_json::Value = serde_json::from_str(&exported).expect("json");
    assert_eq!(value[0]["points"], json!(5));
}

#[test]
fn bootstrap_fetches_seed_over_http() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method("GET").path("/tasks.json");
        then.status(200).json_body(json!([
            {"id": 1, "title": "From server", "priority": "high"},
            {"title": "Needs an id", "status": "in_progress"}
        ]));
    });

    let source = HttpSeedSource::new(server.url("/tasks.json"), Duration::from_secs(5));
    let temp = tempdir().expect("tempdir");
    let store = FileStore::open(temp.path()).expect("open file store");
    let session = Session::open(
        store,
        &SessionOptions::default(),
        Some(&source as &dyn SeedSource),
    );

    mock.assert();
    assert_eq!(session.tasks().len(), 2);
    assert_eq!(session.tasks()[0].priority, Priority::High);
    assert_eq!(session.tasks()[1].status, Status::InProgress);
    assert!(session.tasks()[1].id > 1);

    let reopened = open(temp.path());
    assert_eq!(reopened.tasks().len(), 2);
}

#[test]
fn failed_bootstrap_starts_empty() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method("GET").path("/tasks.json");
        then.status(503);
    });

    let source = HttpSeedSource::new(server.url("/tasks.json"), Duration::from_secs(5));
    let temp = tempdir().expect("tempdir");
    let store = FileStore::open(temp.path()).expect("open file store");
    let session = Session::open(
        store,
        &SessionOptions::default(),
        Some(&source as &dyn SeedSource),
    );

    mock.assert();
    assert!(session.tasks().is_empty());
    assert!(!temp.path().join("tasks.json").exists());
}

#[test]
fn config_options_reach_the_session() {
    let mut cfg = Config::defaults();
    cfg.apply_overrides(vec![
        ("rc.page.size".to_string(), "2".to_string()),
        ("history.limit".to_string(), "3".to_string()),
    ]);
    let options = cfg.session_options().expect("options");

    let temp = tempdir().expect("tempdir");
    let store = FileStore::open(temp.path()).expect("open file store");
    let mut session = Session::open(store, &options, None);
    for n in 0..5 {
        let draft = session.new_draft(format!("t{n}"));
        session.create(draft).expect("create");
    }

    assert_eq!(session.view().query().page_size, 2);
    assert_eq!(session.history().len(), 3);
    let page = run_view(session.tasks(), session.view().query());
    assert_eq!(page.total_pages, 3);
}
