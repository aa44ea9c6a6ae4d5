use xgotop::storage::{EventFilter, Session, SessionManager, StorageFormat};
use xgotop::tracker::Tracker;
use xgotop_common::{EventType, GoRuntimeEvent};

fn event(ty: EventType, ts: u64, goroutine: u64, attributes: [u64; 5]) -> GoRuntimeEvent {
    GoRuntimeEvent::stamped(ty, ts - 5, ts, goroutine, 1, attributes)
}

fn sample_run() -> Vec<GoRuntimeEvent> {
    vec![
        event(EventType::GoroutineCreated, 100, 1, [1, 7, 0, 0, 0]),
        event(EventType::StatusChange, 110, 7, [0, 1, 0, 0, 0]),
        event(EventType::AllocateObject, 120, 7, [64, 25, 0, 0, 0]),
        event(EventType::AllocateSlice, 130, 7, [8, 2, 16, 32, 0]),
        event(EventType::AllocateMap, 140, 1, [8, 24, 16, 2, 4]),
        event(EventType::GoroutineExited, 150, 7, [7, 0, 0, 0, 0]),
    ]
}

fn record(manager: &SessionManager, format: StorageFormat) -> String {
    let session = Session::new(Some(4242), "/srv/app");
    let id = session.id.clone();
    let store = manager.create(session, format).unwrap();
    let events = sample_run();
    store.write_event(&events[0]).unwrap();
    store.write_batch(&events[1..]).unwrap();
    store.flush().unwrap();

    let mut session = store.session();
    session.finish(session.event_count);
    store.update_session(&session).unwrap();
    id
}

#[test]
fn test_record_and_replay_every_format() {
    for format in [StorageFormat::Binary, StorageFormat::Jsonl, StorageFormat::Sqlite] {
        let dir = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(dir.path()).unwrap();
        let id = record(&manager, format);

        let session = manager.get(&id).unwrap();
        assert_eq!(session.event_count, 6, "{format}");
        assert_eq!(session.pid, Some(4242));
        assert!(session.ended_at.is_some());

        let store = manager.open(&id).unwrap();
        let events = store.read_events(&EventFilter::default()).unwrap();
        assert_eq!(events, sample_run(), "{format}");
        assert_eq!(store.goroutines().unwrap(), vec![1, 7]);
    }
}

#[test]
fn test_filters_on_reopened_session() {
    let dir = tempfile::tempdir().unwrap();
    let manager = SessionManager::new(dir.path()).unwrap();
    let id = record(&manager, StorageFormat::Jsonl);
    let store = manager.open(&id).unwrap();

    let by_goroutine =
        store.read_events(&EventFilter { goroutine: Some(7), ..Default::default() }).unwrap();
    assert_eq!(by_goroutine.len(), 4);

    let window = store
        .read_events(&EventFilter { start_ns: Some(120), end_ns: Some(140), ..Default::default() })
        .unwrap();
    let stamps: Vec<u64> = window.iter().map(|e| e.timestamp_ns).collect();
    assert_eq!(stamps, vec![120, 130, 140]);

    let page = store.read_events(&EventFilter { offset: 2, limit: 2, ..Default::default() }).unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].timestamp_ns, 120);

    let maps = store
        .read_events(&EventFilter { event_type: Some(EventType::AllocateMap), ..Default::default() })
        .unwrap();
    assert_eq!(maps.len(), 1);
}

#[test]
fn test_list_and_delete() {
    let dir = tempfile::tempdir().unwrap();
    let manager = SessionManager::new(dir.path()).unwrap();
    let first = record(&manager, StorageFormat::Binary);
    let second = record(&manager, StorageFormat::Jsonl);

    let ids: Vec<String> = manager.list().unwrap().into_iter().map(|s| s.id).collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&first) && ids.contains(&second));

    manager.delete(&first).unwrap();
    assert!(manager.get(&first).is_err());
    assert_eq!(manager.list().unwrap().len(), 1);
}

#[test]
fn test_replay_summary_matches_live_fold() {
    let dir = tempfile::tempdir().unwrap();
    let manager = SessionManager::new(dir.path()).unwrap();
    let id = record(&manager, StorageFormat::Binary);

    let mut live = Tracker::new();
    for e in &sample_run() {
        live.apply(e);
    }

    let mut replayed = Tracker::new();
    for e in &manager.open(&id).unwrap().read_events(&EventFilter::default()).unwrap() {
        replayed.apply(e);
    }

    assert_eq!(replayed.total_events(), live.total_events());
    assert_eq!(replayed.created(), 1);
    assert_eq!(replayed.exited(), 1);
    assert_eq!(replayed.mean_lifetime_ns(), Some(50));
    assert_eq!(replayed.total_allocated(), live.total_allocated());
    // 64 object + 8*32 slice + (8+16)*4 map
    assert_eq!(replayed.total_allocated().bytes, 64 + 256 + 96);
}
