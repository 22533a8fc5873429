use std::fs::{self, OpenOptions};
use std::io::Write;
use std::time::{Duration, Instant};

use tempfile::{tempdir, TempDir};

use super::*;
use crate::path::PathFilter;
use crate::properties::ExtraPropertiesKind;
use crate::types::{ExtraProperties, Value};

const WAIT: Duration = Duration::from_secs(10);
const SETTLE: Duration = Duration::from_millis(750);

struct Fixture {
    monitor: ChangeMonitor,
    store: ExtraPropertyStore,
    dir: TempDir,
}

fn fixture_with(kind: ExtraPropertiesKind, exclusion: Option<&str>) -> Fixture {
    let dir = tempdir().expect("tempdir");
    let mapper = PathMapper::new(dir.path().to_path_buf(), "/fs").expect("mapper");
    let store = ExtraPropertyStore::for_kind(kind, mapper.root().to_path_buf());
    let mapper = mapper
        .with_reserved_suffixes(store.reserved_suffixes())
        .with_exclusion(exclusion.map(|pattern| PathFilter::new(pattern).expect("filter")));
    let monitor = ChangeMonitor::new(mapper, store.clone(), DEFAULT_QUEUE_CAPACITY);
    Fixture {
        monitor,
        store,
        dir,
    }
}

fn fixture() -> Fixture {
    fixture_with(ExtraPropertiesKind::Json, None)
}

/// Waits for the first event matching `predicate`; returns every event seen up to it.
fn wait_for(
    subscription: &Subscription,
    predicate: impl Fn(&ChangeEvent) -> bool,
) -> Vec<ChangeEvent> {
    let deadline = Instant::now() + WAIT;
    let mut seen = Vec::new();
    while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
        let Some(event) = subscription.recv_timeout(remaining) else {
            break;
        };
        let matched = predicate(&event);
        seen.push(event);
        if matched {
            return seen;
        }
    }
    panic!("expected event never arrived; saw {seen:#?}");
}

/// Collects events until none arrives for `SETTLE`.
fn collect_quiet(subscription: &Subscription) -> Vec<ChangeEvent> {
    let mut events = Vec::new();
    while let Some(event) = subscription.recv_timeout(SETTLE) {
        events.push(event);
    }
    events
}

fn is(kind: ChangeKind, address: &'static str) -> impl Fn(&ChangeEvent) -> bool {
    move |event| event.kind == kind && event.address == address
}

#[test]
fn creating_a_file_reports_exactly_one_node_added() {
    let fixture = fixture();
    fixture.monitor.start().expect("start");
    let subscription = fixture.monitor.subscribe();

    fs::write(fixture.dir.path().join("new.txt"), "hello").expect("write");

    let mut events = wait_for(&subscription, is(ChangeKind::NodeAdded, "/fs/new.txt"));
    events.extend(collect_quiet(&subscription));
    let added = events
        .iter()
        .filter(|event| is(ChangeKind::NodeAdded, "/fs/new.txt")(event))
        .count();
    assert_eq!(added, 1, "{events:#?}");
}

#[test]
fn new_subdirectory_is_reported_before_its_files() {
    let fixture = fixture();
    fixture.monitor.start().expect("start");
    let subscription = fixture.monitor.subscribe();

    let sub = fixture.dir.path().join("sub");
    fs::create_dir(&sub).expect("mkdir");
    fs::write(sub.join("inner.txt"), "inner").expect("write");

    let events = wait_for(&subscription, is(ChangeKind::NodeAdded, "/fs/sub/inner.txt"));
    let dir_index = events
        .iter()
        .position(|event| is(ChangeKind::NodeAdded, "/fs/sub")(event))
        .expect("directory event");
    assert!(dir_index < events.len() - 1, "{events:#?}");

    // Files created later in the new directory are still seen.
    fs::write(sub.join("later.txt"), "later").expect("write");
    wait_for(&subscription, is(ChangeKind::NodeAdded, "/fs/sub/later.txt"));
}

#[test]
fn removals_are_reported_once() {
    let fixture = fixture();
    fs::write(fixture.dir.path().join("old.txt"), "old").expect("write");
    fs::create_dir(fixture.dir.path().join("olddir")).expect("mkdir");
    fixture.monitor.start().expect("start");
    let subscription = fixture.monitor.subscribe();

    fs::remove_file(fixture.dir.path().join("old.txt")).expect("remove");
    wait_for(&subscription, is(ChangeKind::NodeRemoved, "/fs/old.txt"));

    fs::remove_dir(fixture.dir.path().join("olddir")).expect("rmdir");
    let mut events = wait_for(&subscription, is(ChangeKind::NodeRemoved, "/fs/olddir"));
    events.extend(collect_quiet(&subscription));
    let removed = events
        .iter()
        .filter(|event| is(ChangeKind::NodeRemoved, "/fs/olddir")(event))
        .count();
    assert_eq!(removed, 1, "{events:#?}");
}

#[test]
fn modification_reports_content_properties() {
    let fixture = fixture();
    let path = fixture.dir.path().join("a.txt");
    fs::write(&path, "a").expect("write");
    fixture.monitor.start().expect("start");
    let subscription = fixture.monitor.subscribe();

    let mut file = OpenOptions::new().append(true).open(&path).expect("open");
    file.write_all(b" more").expect("append");
    file.sync_all().expect("sync");
    drop(file);

    wait_for(
        &subscription,
        is(ChangeKind::PropertyChanged, "/fs/a.txt/jcr:content/jcr:data"),
    );
    wait_for(
        &subscription,
        is(ChangeKind::PropertyChanged, "/fs/a.txt/jcr:content/jcr:lastModified"),
    );
}

#[test]
fn sidecar_writes_surface_as_owner_property_changes() {
    let fixture = fixture();
    fs::write(fixture.dir.path().join("a.txt"), "a").expect("write");
    fixture.monitor.start().expect("start");
    let subscription = fixture.monitor.subscribe();

    let mut properties = ExtraProperties::new();
    properties.insert("extraProp".into(), vec![Value::from("extraValue")]);
    fixture.store.set("a.txt", &properties).expect("set");

    let mut events = wait_for(&subscription, is(ChangeKind::PropertyChanged, "/fs/a.txt"));
    events.extend(collect_quiet(&subscription));
    assert!(
        events.iter().all(|event| !event.address.contains(".modeshape")),
        "{events:#?}"
    );
    assert!(
        events.iter().all(|event| event.kind == ChangeKind::PropertyChanged),
        "{events:#?}"
    );
}

#[test]
fn filtered_entries_stay_silent() {
    let fixture = fixture_with(ExtraPropertiesKind::None, Some("*.log"));
    fixture.monitor.start().expect("start");
    let subscription = fixture.monitor.subscribe();

    fs::write(fixture.dir.path().join("x.log"), "log").expect("write");
    fs::write(fixture.dir.path().join("y.txt"), "txt").expect("write");

    let mut events = wait_for(&subscription, is(ChangeKind::NodeAdded, "/fs/y.txt"));
    events.extend(collect_quiet(&subscription));
    assert!(
        events.iter().all(|event| !event.address.contains("x.log")),
        "{events:#?}"
    );
}

#[test]
fn status_tracks_watched_directories_across_restarts() {
    let fixture = fixture();
    fs::create_dir_all(fixture.dir.path().join("a/b")).expect("mkdir");
    assert_eq!(fixture.monitor.state(), MonitorState::Stopped);

    fixture.monitor.start().expect("start");
    let status = fixture.monitor.status();
    assert_eq!(status.state, MonitorState::Watching);
    assert_eq!(status.watched_directories, 3);
    assert_eq!(status.errors, 0);
    fixture.monitor.start().expect("second start is a no-op");

    fixture.monitor.stop();
    let status = fixture.monitor.status();
    assert_eq!(status.state, MonitorState::Stopped);
    assert_eq!(status.watched_directories, 0);
    fixture.monitor.stop();

    fixture.monitor.start().expect("restart");
    let subscription = fixture.monitor.subscribe();
    fs::write(fixture.dir.path().join("a/b/c.txt"), "c").expect("write");
    wait_for(&subscription, is(ChangeKind::NodeAdded, "/fs/a/b/c.txt"));
}

#[test]
fn start_fails_when_the_root_is_gone() {
    let fixture = fixture();
    let root = fixture.monitor.root().to_path_buf();
    fs::remove_dir(&root).expect("rmdir");

    assert!(matches!(fixture.monitor.start(), Err(ConnectorError::Monitor(_))));
    let status = fixture.monitor.status();
    assert_eq!(status.state, MonitorState::Stopped);
    assert_eq!(status.errors, 1);
    assert!(status.last_error.is_some());
}

#[test]
fn unlistable_directories_count_as_errors() {
    let fixture = fixture();
    let missing = fixture.dir.path().join("vanished");

    assert!(fixture.monitor.shared.list_children(&missing).is_none());
    let status = fixture.monitor.status();
    assert_eq!(status.errors, 1);
    assert!(
        status
            .last_error
            .as_deref()
            .is_some_and(|message| message.contains("vanished")),
        "{status:?}"
    );

    fs::create_dir(&missing).expect("mkdir");
    fs::write(missing.join("b.txt"), "b").expect("write");
    fs::write(missing.join("a.txt"), "a").expect("write");
    let children = fixture.monitor.shared.list_children(&missing).expect("listing");
    let names: Vec<_> = children
        .iter()
        .map(|(path, _)| path.file_name().expect("name").to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, ["a.txt", "b.txt"]);
    assert_eq!(fixture.monitor.status().errors, 1);
}
