//! Demonstrates StashDB's buffered object store.
//!
//! Run with: cargo run -p stashdb --example object_store_demo

use serde::{Deserialize, Serialize};
use stashdb::{GetManyOptions, ObjectStore, StoreConfig, TextEncoding};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct User {
    name: String,
    email: String,
    logins: u32,
}

fn user(name: &str, logins: u32) -> User {
    User {
        name: name.to_string(),
        email: format!("{}@example.com", name.to_lowercase()),
        logins,
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let db_path = "./demo_objects";
    let config = StoreConfig::default()
        .with_key_encoding(TextEncoding::Utf8)
        .with_batch_size(4)
        .with_map_size(64 * 1024);

    println!("=== StashDB Object Store Demo ===\n");

    if Path::new(db_path).exists() {
        std::fs::remove_dir_all(db_path)?;
        println!("🧹 Cleaned up previous demo data\n");
    }

    // PART 1: Buffered writes
    println!("📝 PART 1: Writing objects...");
    {
        let store = ObjectStore::open(db_path, config.clone())?;

        store.put("user:1", &user("Alice", 3))?;
        store.put("user:2", &user("Bob", 1))?;
        store.put("stats:total_users", &2u64)?;

        let stats = store.stats()?;
        println!(
            "   {} writes buffered, {} entries committed",
            stats.buffered_ops, stats.stored_entries
        );

        // Reads see buffered writes before they are committed
        let alice: Option<User> = store.get("user:1")?;
        println!("   Read back before flush: {:?}", alice);

        store.close(true)?;
    }
    println!("   🔒 Store closed, buffer flushed\n");

    // PART 2: Reopen, batch reads and atomic batch writes
    println!("🔓 PART 2: Reopening and reading in bulk...");
    {
        let store = ObjectStore::open(db_path, config.clone())?;

        let users = store.get_many::<_, _, User>(
            ["user:1", "user:2", "user:3"],
            GetManyOptions::decode_keys(),
        )?;
        for (key, value) in &users.found {
            println!("   {:?} => {} <{}>", key, value.name, value.email);
        }
        println!("   Missing: {:?}", users.not_found);

        // All three land in one transaction
        store.put_many([
            ("user:3", user("Carol", 0)),
            ("user:4", user("Dave", 7)),
            ("user:5", user("Eve", 2)),
        ])?;
        store.put("stats:total_users", &5u64)?;
        println!("   ✅ Added 3 users atomically");

        store.close(true)?;
    }
    println!();

    // PART 3: Deletes and growth
    println!("🔄 PART 3: Deleting and growing the map...");
    {
        let store = ObjectStore::open(db_path, config.clone())?;

        store.delete("user:2")?;
        match store.remove("user:2") {
            Ok(()) => println!("   user:2 removed twice?"),
            Err(e) => println!("   Second remove fails: {}", e),
        }

        // Large values force the map past its initial 64 KiB
        for i in 0..32u32 {
            store.put(&format!("blob:{}", i), &vec![i as u8; 8 * 1024])?;
        }
        store.flush()?;

        let stats = store.stats()?;
        println!(
            "   Map size: {} KiB after {} growth event(s)",
            stats.map_size / 1024,
            stats.growth_events
        );
        store.close(true)?;
    }
    println!();

    // PART 4: Final verification
    println!("✅ PART 4: Final verification...");
    {
        let store = ObjectStore::open(db_path, config)?;

        let bob: Option<User> = store.get("user:2")?;
        let total: u64 = store.get_or("stats:total_users", 0)?;
        let blob: Vec<u8> = store.get_required("blob:31")?;

        assert_eq!(bob, None);
        assert_eq!(total, 5);
        assert_eq!(blob.len(), 8 * 1024);
        println!("   {} entries stored", store.stats()?.stored_entries);
        println!("   ✅ All assertions passed!");

        store.close(true)?;
    }

    std::fs::remove_dir_all(db_path)?;
    println!("\n🧹 Cleaned up demo store");
    println!("\n=== Demo Complete! ===");

    Ok(())
}
