// Random operation sequences checked against an in-memory model

mod common;

use common::{text_config, StoreFixture};
use proptest::prelude::*;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
enum Op {
    Put(u8, u32),
    Delete(u8),
    Remove(u8),
    PutMany(Vec<(u8, u32)>),
    Flush,
    Reopen,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0u8..16, any::<u32>()).prop_map(|(k, v)| Op::Put(k, v)),
        2 => (0u8..16).prop_map(Op::Delete),
        1 => (0u8..16).prop_map(Op::Remove),
        1 => prop::collection::vec((0u8..16, any::<u32>()), 0..6).prop_map(Op::PutMany),
        1 => Just(Op::Flush),
        1 => Just(Op::Reopen),
    ]
}

fn key(k: u8) -> String {
    format!("key-{}", k)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_store_matches_model(
        ops in prop::collection::vec(op_strategy(), 1..40),
        batch_size in 1usize..6,
    ) {
        let fixture = StoreFixture::new();
        let config = text_config().with_batch_size(batch_size);
        let mut store = fixture.open(config.clone());
        let mut model: BTreeMap<u8, u32> = BTreeMap::new();

        for op in ops {
            match op {
                Op::Put(k, v) => {
                    store.put(&key(k), &v).unwrap();
                    model.insert(k, v);
                }
                Op::Delete(k) => {
                    store.delete(&key(k)).unwrap();
                    model.remove(&k);
                }
                Op::Remove(k) => {
                    let removed = store.remove(&key(k));
                    prop_assert_eq!(removed.is_ok(), model.remove(&k).is_some());
                }
                Op::PutMany(items) => {
                    store
                        .put_many(items.iter().map(|(k, v)| (key(*k), *v)))
                        .unwrap();
                    model.extend(items);
                }
                Op::Flush => store.flush().unwrap(),
                Op::Reopen => {
                    store.close(true).unwrap();
                    drop(store);
                    store = fixture.open(config.clone());
                }
            }
        }

        for k in 0u8..16 {
            let stored: Option<u32> = store.get(&key(k)).unwrap();
            prop_assert_eq!(stored, model.get(&k).copied());
            prop_assert_eq!(store.contains(&key(k)).unwrap(), model.contains_key(&k));
        }
        store.flush().unwrap();
        prop_assert_eq!(store.stats().unwrap().stored_entries, model.len() as u64);
    }
}
