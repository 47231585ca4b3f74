use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Value};
use th_config_store::{ConfigMap, ConfigStore, ConfigStoreError, InstanceConfig, Qualifier};

fn map(value: Value) -> ConfigMap {
    match value {
        Value::Object(m) => m,
        other => panic!("not an object: {other}"),
    }
}

#[test]
fn set_then_get_roundtrips() {
    let dir = tempfile::tempdir().unwrap();
    let store = ConfigStore::new(dir.path());
    let q = Qualifier::Port(8080);

    store.set("expert", &q, "default_dir", json!("/data")).unwrap();
    store.set("expert", &q, "limits", json!({ "max": 3 })).unwrap();

    assert_eq!(store.get("expert", &q, "default_dir", Value::Null).unwrap(), json!("/data"));
    assert_eq!(store.get("expert", &q, "limits", Value::Null).unwrap(), json!({ "max": 3 }));
    assert_eq!(store.get("expert", &q, "missing", json!(7)).unwrap(), json!(7));

    // A fresh store over the same directory sees the persisted record.
    let reopened = ConfigStore::new(dir.path());
    assert_eq!(
        reopened.load("expert", &q).unwrap(),
        map(json!({ "default_dir": "/data", "limits": { "max": 3 } }))
    );
}

#[test]
fn update_twice_yields_identical_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let store = ConfigStore::new(dir.path());
    let q = Qualifier::alias("dev");
    let values = map(json!({ "b": 2, "a": 1, "nested": { "z": true } }));

    store.update("expert", &q, values.clone()).unwrap();
    let path = store.path_for("expert", &q).unwrap();
    let first = std::fs::read(&path).unwrap();

    store.update("expert", &q, values).unwrap();
    let second = std::fs::read(&path).unwrap();

    assert_eq!(first, second);
    // Pretty-printed, insertion ordered.
    let text = String::from_utf8(first).unwrap();
    assert!(text.find("\"b\"").unwrap() < text.find("\"a\"").unwrap());
    assert!(text.contains("\n  "));
}

#[test]
fn port_records_are_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let store = ConfigStore::new(dir.path());

    store.set("expert", &Qualifier::Port(8080), "mode", json!("a")).unwrap();
    store.set("expert", &Qualifier::Port(8081), "mode", json!("b")).unwrap();

    assert_eq!(
        store.get("expert", &Qualifier::Port(8080), "mode", Value::Null).unwrap(),
        json!("a")
    );
    assert_eq!(
        store.get("expert", &Qualifier::Port(8081), "mode", Value::Null).unwrap(),
        json!("b")
    );
    assert!(dir.path().join("expert_port_8080_server_config.json").exists());
    assert!(dir.path().join("expert_port_8081_server_config.json").exists());
}

#[test]
fn list_all_reports_corrupt_files_individually() {
    let dir = tempfile::tempdir().unwrap();
    let store = ConfigStore::new(dir.path());
    store.set("expert", &Qualifier::Port(8080), "ok", json!(true)).unwrap();
    store.set("expert", &Qualifier::alias("dev"), "ok", json!(true)).unwrap();
    store.set("other", &Qualifier::Port(8080), "ok", json!(true)).unwrap();
    std::fs::write(dir.path().join("expert_port_9000_server_config.json"), "{ nope").unwrap();
    std::fs::write(dir.path().join("README.txt"), "ignored").unwrap();

    let listing = store.list_all("expert").unwrap();
    let qualifiers: Vec<&Qualifier> = listing.iter().map(|(q, _)| q).collect();
    assert_eq!(
        qualifiers,
        vec![&Qualifier::Port(8080), &Qualifier::Port(9000), &Qualifier::alias("dev")]
    );
    assert!(listing[0].1.is_ok());
    assert!(matches!(listing[1].1, Err(ConfigStoreError::ParseFailure { .. })));
    assert!(listing[2].1.is_ok());
}

#[test]
fn list_all_on_missing_directory_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let store = ConfigStore::new(dir.path().join("never-created"));
    assert!(store.list_all("expert").unwrap().is_empty());
}

#[test]
fn callbacks_run_in_order_and_survive_failures() {
    let dir = tempfile::tempdir().unwrap();
    let store = ConfigStore::new(dir.path());
    let q = Qualifier::Port(8080);
    let log = Arc::new(Mutex::new(Vec::<String>::new()));

    let l = log.clone();
    store
        .on_change("expert", &q, move |prev, cur| {
            l.lock().push(format!("first {} -> {}", prev.len(), cur.len()));
            Ok(())
        })
        .unwrap();
    store
        .on_change("expert", &q, |_, _| Err("downstream unavailable".into()))
        .unwrap();
    store
        .on_change("expert", &q, |_, _| panic!("callback bug"))
        .unwrap();
    let l = log.clone();
    store
        .on_change("expert", &q, move |_, cur| {
            l.lock().push(format!("last {}", cur["k"]));
            Ok(())
        })
        .unwrap();

    store.set("expert", &q, "k", json!(1)).unwrap();

    assert_eq!(*log.lock(), vec!["first 0 -> 1", "last 1"]);
    // The write stands regardless of callback failures.
    assert_eq!(store.get("expert", &q, "k", Value::Null).unwrap(), json!(1));
}

#[test]
fn unchanged_content_does_not_notify() {
    let dir = tempfile::tempdir().unwrap();
    let store = ConfigStore::new(dir.path());
    let q = Qualifier::Port(1);
    let calls = Arc::new(AtomicUsize::new(0));

    let c = calls.clone();
    let id = store
        .on_change("s", &q, move |_, _| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

    store.set("s", &q, "k", json!("v")).unwrap();
    store.set("s", &q, "k", json!("v")).unwrap();
    store.update("s", &q, map(json!({ "k": "v" }))).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Other records do not notify this subscriber.
    store.set("s", &Qualifier::Port(2), "k", json!("v")).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    assert!(store.unsubscribe(id));
    assert!(!store.unsubscribe(id));
    store.set("s", &q, "k", json!("w")).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn callback_may_write_back_into_same_record() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(ConfigStore::new(dir.path()));
    let instance = InstanceConfig::new(store.clone(), "s", Qualifier::alias("main")).unwrap();

    let writer = instance.clone();
    instance
        .on_change(move |_, cur| {
            if let Some(Value::String(dir)) = cur.get("default_dir") {
                let normalized = dir.trim_end_matches('/').to_owned();
                if normalized != *dir {
                    writer.set("default_dir", json!(normalized))?;
                }
            }
            Ok(())
        })
        .unwrap();

    instance.set("default_dir", json!("/srv/data/")).unwrap();
    assert_eq!(instance.get("default_dir", Value::Null).unwrap(), json!("/srv/data"));
}

#[test]
fn remove_record_notifies_and_deletes_file() {
    let dir = tempfile::tempdir().unwrap();
    let store = ConfigStore::new(dir.path());
    let q = Qualifier::alias("tmp");
    let seen = Arc::new(Mutex::new(None));

    store.set("s", &q, "k", json!(1)).unwrap();
    let s = seen.clone();
    store
        .on_change("s", &q, move |prev, cur| {
            *s.lock() = Some((prev.len(), cur.len()));
            Ok(())
        })
        .unwrap();

    assert!(store.remove_record("s", &q).unwrap());
    assert!(!store.path_for("s", &q).unwrap().exists());
    assert_eq!(*seen.lock(), Some((1, 0)));
    assert!(!store.remove_record("s", &q).unwrap());
}

#[test]
fn concurrent_writers_do_not_lose_updates() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(ConfigStore::new(dir.path()));
    let q = Qualifier::Port(8080);

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = store.clone();
            let q = q.clone();
            std::thread::spawn(move || {
                store.set("s", &q, &format!("key{i}"), json!(i)).unwrap();
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(store.load("s", &q).unwrap().len(), 8);
}
