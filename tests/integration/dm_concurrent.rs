#![allow(missing_docs)]

mod common;

use std::convert::TryInto;
use std::sync::{Arc, Barrier};
use std::thread;

use vellum::{DataManager, MemoryTransactions, Result, Uid, VellumError, SUPER_XID};

fn insert_retrying(dm: &DataManager, payload: &[u8]) -> Result<Uid> {
    loop {
        match dm.insert(SUPER_XID, payload) {
            Err(VellumError::DatabaseBusy) => thread::yield_now(),
            other => return other,
        }
    }
}

#[test]
fn parallel_inserts_read_back_intact() -> Result<()> {
    common::init_tracing();
    let (_dir, path) = common::store_path("parallel");
    let dm = DataManager::create(&path, common::options(64))?;
    let threads = 8usize;
    let per_thread = 200usize;
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let dm = dm.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || -> Result<Vec<(Uid, Vec<u8>)>> {
                barrier.wait();
                let mut written = Vec::with_capacity(per_thread);
                for i in 0..per_thread {
                    let payload = format!("thread-{t}-item-{i}").into_bytes();
                    let uid = insert_retrying(&dm, &payload)?;
                    written.push((uid, payload));
                }
                Ok(written)
            })
        })
        .collect();

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.join().expect("insert thread panicked")?);
    }
    let mut uids: Vec<Uid> = all.iter().map(|(uid, _)| *uid).collect();
    uids.sort();
    uids.dedup();
    assert_eq!(uids.len(), threads * per_thread, "uids must be unique");

    for (uid, payload) in &all {
        let item = dm.read(*uid)?.expect("live item");
        assert_eq!(&item.data(), payload);
        item.release()?;
    }
    dm.close()?;

    let dm = DataManager::open(&path, common::options(64), Arc::new(MemoryTransactions::new()))?;
    for (uid, payload) in all.iter().step_by(37) {
        let item = dm.read(*uid)?.expect("live item after reopen");
        assert_eq!(&item.data(), payload);
        item.release()?;
    }
    dm.close()?;
    Ok(())
}

#[test]
fn write_brackets_serialize_on_one_item() -> Result<()> {
    common::init_tracing();
    let (_dir, path) = common::store_path("counter");
    let dm = DataManager::create(&path, common::options(32))?;
    let counter = dm.insert(SUPER_XID, &0u64.to_be_bytes())?;
    let threads = 4;
    let rounds = 250;

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let dm = dm.clone();
            thread::spawn(move || -> Result<()> {
                for _ in 0..rounds {
                    let item = dm.read(counter)?.expect("counter item");
                    {
                        let mut write = item.before();
                        write.update(|data| {
                            let value = u64::from_be_bytes(data[..8].try_into().unwrap());
                            data.copy_from_slice(&(value + 1).to_be_bytes());
                        });
                        write.after(SUPER_XID)?;
                    }
                    // Readers may only observe whole values.
                    let seen = item.read().with_data(|data| data.len());
                    assert_eq!(seen, 8);
                    item.release()?;
                }
                Ok(())
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("counter thread panicked")?;
    }

    let item = dm.read(counter)?.expect("counter item");
    let total = item
        .read()
        .with_data(|data| u64::from_be_bytes(data[..8].try_into().unwrap()));
    assert_eq!(total, (threads * rounds) as u64);
    item.release()?;
    assert!(dm.wal_stats().records_appended >= (threads * rounds) as u64);
    dm.close()?;
    Ok(())
}
