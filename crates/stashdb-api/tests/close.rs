// Close semantics: final flush, strictness, idempotence, drop

mod common;

use common::{text_config, StoreFixture};
use stashdb::{EngineError, Environment, Error, GetManyOptions};
use std::sync::atomic::Ordering;

#[test]
fn test_close_flushes_buffer() {
    let fixture = StoreFixture::new();
    {
        let store = fixture.open(text_config());
        store.put("a", &1u8).unwrap();
        store.delete("never").unwrap();
        store.close(true).unwrap();
    }
    let store = fixture.open(text_config());
    assert_eq!(store.get::<_, u8>("a").unwrap(), Some(1));
}

#[test]
fn test_close_twice() {
    let fixture = StoreFixture::new();
    let store = fixture.open_faulty(text_config());
    store.put("a", &1u8).unwrap();

    store.close(true).unwrap();
    store.close(true).unwrap();
    store.close(false).unwrap();

    let env = store.env();
    assert_eq!(env.commit_count(), 1);
    assert_eq!(env.closes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_every_operation_rejected_after_close() {
    let fixture = StoreFixture::new();
    let store = fixture.open(text_config());
    store.close(false).unwrap();
    assert!(store.is_closed());

    assert!(matches!(store.put("k", &1u8), Err(Error::StoreClosed)));
    assert!(matches!(store.delete("k"), Err(Error::StoreClosed)));
    assert!(matches!(store.remove("k"), Err(Error::StoreClosed)));
    assert!(matches!(store.get::<_, u8>("k"), Err(Error::StoreClosed)));
    assert!(matches!(store.get_or("k", 0u8), Err(Error::StoreClosed)));
    assert!(matches!(store.exists("k", None), Err(Error::StoreClosed)));
    assert!(matches!(store.contains("k"), Err(Error::StoreClosed)));
    assert!(matches!(store.flush(), Err(Error::StoreClosed)));
    assert!(matches!(store.stats(), Err(Error::StoreClosed)));
    assert!(matches!(
        store.put_many([("k", 1u8)]),
        Err(Error::StoreClosed)
    ));
    assert!(matches!(
        store.get_many::<_, _, u8>(["k"], GetManyOptions::default()),
        Err(Error::StoreClosed)
    ));
}

#[test]
fn test_strict_close_reports_failed_flush() {
    let fixture = StoreFixture::new();
    let store = fixture.open_faulty(text_config());
    store.put("doomed", &1u8).unwrap();
    store.env().fail_next_commits(1);

    match store.close(true) {
        Err(Error::FinalFlush(source)) => {
            assert!(matches!(*source, Error::Engine(EngineError::Io(_))));
        }
        other => panic!("unexpected result: {:?}", other),
    }

    // the environment was released regardless
    assert_eq!(store.env().closes.load(Ordering::SeqCst), 1);
    assert!(matches!(
        store.env().begin_read(),
        Err(EngineError::Closed)
    ));
    store.close(true).unwrap();
}

#[test]
fn test_lenient_close_swallows_failed_flush() {
    let fixture = StoreFixture::new();
    let store = fixture.open_faulty(text_config());
    store.put("doomed", &1u8).unwrap();
    store.env().fail_next_commits(1);

    store.close(false).unwrap();
    assert_eq!(store.env().closes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_sync_failure_does_not_fail_close() {
    let fixture = StoreFixture::new();
    let store = fixture.open_faulty(text_config());
    store.put("a", &1u8).unwrap();
    store.env().fail_sync.store(true, Ordering::SeqCst);

    store.close(true).unwrap();
    assert_eq!(store.env().commit_count(), 1);
}

#[test]
fn test_drop_closes_store() {
    let fixture = StoreFixture::new();
    {
        let store = fixture.open(text_config());
        store.put("dropped", &"flushed").unwrap();
    }
    let store = fixture.open(text_config());
    assert_eq!(
        store.get::<_, String>("dropped").unwrap().as_deref(),
        Some("flushed")
    );
}

#[test]
fn test_drop_with_failing_flush_does_not_panic() {
    let fixture = StoreFixture::new();
    {
        let store = fixture.open_faulty(text_config());
        store.put("lost", &1u8).unwrap();
        store.env().fail_next_commits(1);
    }
    let store = fixture.open(text_config());
    assert_eq!(store.get::<_, u8>("lost").unwrap(), None);
}
