use std::sync::Arc;

use basaltdb::container::hash::ExtendibleHashTable;

#[test]
fn test_concurrent_inserts() {
    let table: Arc<ExtendibleHashTable<u32, u32>> = Arc::new(ExtendibleHashTable::new(4));

    let mut handles = Vec::new();
    for t in 0..4u32 {
        let table = table.clone();
        handles.push(std::thread::spawn(move || {
            for i in 0..500u32 {
                let key = t * 500 + i;
                table.insert(key, key + 1);
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    for key in 0..2000u32 {
        assert_eq!(table.find(&key), Some(key + 1), "key {}", key);
    }

    let global = table.global_depth();
    for i in 0..(1usize << global) {
        assert!(table.local_depth(i) <= global);
    }
}

#[test]
fn test_concurrent_reads_during_writes() {
    let table: Arc<ExtendibleHashTable<u32, u32>> = Arc::new(ExtendibleHashTable::new(4));
    for key in 0..1000u32 {
        table.insert(key, key);
    }

    let writer = {
        let table = table.clone();
        std::thread::spawn(move || {
            for key in 1000..2000u32 {
                table.insert(key, key);
            }
        })
    };
    let reader = {
        let table = table.clone();
        std::thread::spawn(move || {
            for _ in 0..10 {
                for key in 0..1000u32 {
                    assert_eq!(table.find(&key), Some(key));
                }
            }
        })
    };

    writer.join().unwrap();
    reader.join().unwrap();
}

#[test]
fn test_remove_then_reinsert() {
    let table: ExtendibleHashTable<u32, String> = ExtendibleHashTable::new(2);
    for key in 0..100u32 {
        table.insert(key, format!("v{}", key));
    }
    for key in 0..100u32 {
        assert!(table.remove(&key));
    }
    for key in 0..100u32 {
        assert_eq!(table.find(&key), None);
        table.insert(key, "again".to_string());
        assert_eq!(table.find(&key).as_deref(), Some("again"));
    }
}
