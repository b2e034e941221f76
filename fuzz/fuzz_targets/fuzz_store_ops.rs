#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use stashdb::{ObjectStore, StoreConfig, SyncMode};
use std::collections::BTreeMap;

#[derive(Arbitrary, Debug)]
enum StoreOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Get { key: Vec<u8> },
    Delete { key: Vec<u8> },
    Remove { key: Vec<u8> },
    PutMany { items: Vec<(Vec<u8>, Vec<u8>)> },
    Flush,
}

fuzz_target!(|ops: Vec<StoreOp>| {
    let Ok(dir) = tempfile::TempDir::new() else {
        return;
    };
    let config = StoreConfig::default()
        .with_batch_size(8)
        .with_map_size(16 * 1024)
        .with_sync_mode(SyncMode::None);
    let Ok(store) = ObjectStore::open(dir.path(), config) else {
        return;
    };
    let mut model: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();

    for op in ops.iter().take(100) {
        match op {
            StoreOp::Put { key, value } => {
                store.put(key, value).unwrap();
                model.insert(key.clone(), value.clone());
            }
            StoreOp::Get { key } => {
                let value: Option<Vec<u8>> = store.get(key).unwrap();
                assert_eq!(value.as_ref(), model.get(key));
            }
            StoreOp::Delete { key } => {
                store.delete(key).unwrap();
                model.remove(key);
            }
            StoreOp::Remove { key } => {
                let result = store.remove(key);
                assert_eq!(result.is_ok(), model.remove(key).is_some());
            }
            StoreOp::PutMany { items } => {
                let items: Vec<_> = items.iter().take(16).cloned().collect();
                store.put_many(items.iter().map(|(k, v)| (k, v))).unwrap();
                model.extend(items);
            }
            StoreOp::Flush => store.flush().unwrap(),
        }
    }

    for (key, value) in &model {
        let stored: Option<Vec<u8>> = store.get(key).unwrap();
        assert_eq!(stored.as_ref(), Some(value));
    }
    store.close(true).unwrap();
});
