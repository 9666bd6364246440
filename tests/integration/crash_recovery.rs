#![allow(missing_docs)]

mod common;

use std::path::Path;
use std::sync::Arc;

use vellum::storage::{RecoveryStats, TxnState};
use vellum::{DataManager, MemoryTransactions, Result, Uid, Xid, SUPER_XID};

fn reopen(path: &Path, txns: &Arc<MemoryTransactions>) -> Result<DataManager> {
    DataManager::open(path, common::options(16), txns.clone())
}

fn overwrite(dm: &DataManager, uid: Uid, xid: Xid, bytes: &[u8]) -> Result<()> {
    let item = dm.read(uid)?.expect("live item");
    let mut write = item.before();
    write.update(|data| data.copy_from_slice(bytes));
    write.after(xid)?;
    item.release()
}

fn live_bytes(dm: &DataManager, uid: Uid) -> Result<Option<Vec<u8>>> {
    match dm.read(uid)? {
        Some(item) => {
            let data = item.data();
            item.release()?;
            Ok(Some(data))
        }
        None => Ok(None),
    }
}

#[test]
fn crash_redoes_committed_and_undoes_active() -> Result<()> {
    common::init_tracing();
    let (_dir, path) = common::store_path("crash");
    let txns = Arc::new(MemoryTransactions::new());

    let dm = DataManager::create(&path, common::options(16))?;
    let shared_c = dm.insert(SUPER_XID, b"cccc")?;
    let shared_d = dm.insert(SUPER_XID, b"dddd")?;

    let committed = txns.begin();
    let a = dm.insert(committed, b"committed")?;
    overwrite(&dm, shared_c, committed, b"CCCC")?;
    txns.commit(committed)?;

    let active = txns.begin();
    let b = dm.insert(active, b"in flight")?;
    overwrite(&dm, shared_d, active, b"DDDD")?;
    drop(dm); // crash: page one never gets its clean-close token

    let dm = reopen(&path, &txns)?;
    assert_eq!(
        dm.last_recovery(),
        Some(&RecoveryStats {
            records: 6,
            truncated_to: 2,
            redone: 4,
            undone: 2,
            aborted: 1,
        })
    );
    assert_eq!(live_bytes(&dm, a)?, Some(b"committed".to_vec()));
    assert_eq!(live_bytes(&dm, shared_c)?, Some(b"CCCC".to_vec()));
    assert_eq!(live_bytes(&dm, b)?, None);
    assert_eq!(live_bytes(&dm, shared_d)?, Some(b"dddd".to_vec()));
    assert_eq!(txns.state(active), Some(TxnState::Aborted));
    assert_eq!(txns.state(committed), Some(TxnState::Committed));
    dm.close()?;

    let dm = reopen(&path, &txns)?;
    assert!(dm.last_recovery().is_none());
    assert_eq!(live_bytes(&dm, b)?, None);
    dm.close()?;
    Ok(())
}

#[test]
fn committed_update_is_redone_when_page_never_reached_disk() -> Result<()> {
    common::init_tracing();
    let (_dir, path) = common::store_path("redo");
    let txns = Arc::new(MemoryTransactions::new());

    let dm = DataManager::create(&path, common::options(16))?;
    let uid = dm.insert(SUPER_XID, &[0u8; 32])?;
    let xid = txns.begin();
    let pinned = dm.read(uid)?.expect("live item");
    {
        let mut write = pinned.before();
        write.update(|data| data.fill(0x42));
        write.after(xid)?;
    }
    txns.commit(xid)?;
    // Leak the pin so the dirty page is never written back.
    std::mem::forget(pinned);
    drop(dm);

    let dm = reopen(&path, &txns)?;
    assert!(dm.last_recovery().is_some());
    assert_eq!(live_bytes(&dm, uid)?, Some(vec![0x42; 32]));
    dm.close()?;
    Ok(())
}

#[test]
fn interleaved_active_transactions_are_fully_undone() -> Result<()> {
    common::init_tracing();
    let (_dir, path) = common::store_path("interleaved");
    let txns = Arc::new(MemoryTransactions::new());

    let dm = DataManager::create(&path, common::options(16))?;
    let base: Vec<Uid> = (0..4u8)
        .map(|i| dm.insert(SUPER_XID, &[i; 16]))
        .collect::<Result<_>>()?;

    let t1 = txns.begin();
    let t2 = txns.begin();
    let mut inserted = Vec::new();
    inserted.push(dm.insert(t1, b"t1 first")?);
    overwrite(&dm, base[0], t1, &[0xA1; 16])?;
    inserted.push(dm.insert(t2, b"t2 first")?);
    overwrite(&dm, base[1], t2, &[0xB1; 16])?;
    overwrite(&dm, base[0], t1, &[0xA2; 16])?;
    inserted.push(dm.insert(t1, b"t1 second")?);
    overwrite(&dm, base[1], t2, &[0xB2; 16])?;
    drop(dm);

    let dm = reopen(&path, &txns)?;
    let stats = dm.last_recovery().expect("recovery ran").clone();
    assert_eq!(stats.undone, 7);
    assert_eq!(stats.aborted, 2);
    for uid in inserted {
        assert_eq!(live_bytes(&dm, uid)?, None, "insert at {uid} survived");
    }
    for (i, uid) in base.iter().enumerate() {
        assert_eq!(live_bytes(&dm, *uid)?, Some(vec![i as u8; 16]));
    }
    assert_eq!(txns.state(t1), Some(TxnState::Aborted));
    assert_eq!(txns.state(t2), Some(TxnState::Aborted));
    dm.close()?;
    Ok(())
}

#[test]
fn crash_before_any_insert_recovers_to_page_one() -> Result<()> {
    let (_dir, path) = common::store_path("empty");
    let txns = Arc::new(MemoryTransactions::new());
    drop(DataManager::create(&path, common::options(16))?);

    let dm = reopen(&path, &txns)?;
    let stats = dm.last_recovery().expect("recovery ran");
    assert_eq!(stats.records, 0);
    assert_eq!(stats.truncated_to, 1);
    assert_eq!(dm.page_count(), 1);
    let uid = dm.insert(SUPER_XID, b"after recovery")?;
    assert_eq!(live_bytes(&dm, uid)?, Some(b"after recovery".to_vec()));
    dm.close()?;
    Ok(())
}

#[test]
fn undone_work_stays_undone_after_a_second_crash() -> Result<()> {
    common::init_tracing();
    let (_dir, path) = common::store_path("double_crash");
    let txns = Arc::new(MemoryTransactions::new());

    let dm = DataManager::create(&path, common::options(16))?;
    let base = dm.insert(SUPER_XID, b"base")?;
    let active = txns.begin();
    let gone = dm.insert(active, b"gone")?;
    overwrite(&dm, base, active, b"BASE")?;
    drop(dm);

    let dm = reopen(&path, &txns)?;
    assert_eq!(dm.last_recovery().map(|s| s.undone), Some(2));
    assert_eq!(live_bytes(&dm, gone)?, None);
    assert_eq!(live_bytes(&dm, base)?, Some(b"base".to_vec()));
    drop(dm); // crash again before a clean close

    let dm = reopen(&path, &txns)?;
    assert_eq!(
        dm.last_recovery(),
        Some(&RecoveryStats {
            records: 5,
            truncated_to: 2,
            redone: 5,
            undone: 0,
            aborted: 0,
        })
    );
    assert_eq!(live_bytes(&dm, gone)?, None);
    assert_eq!(live_bytes(&dm, base)?, Some(b"base".to_vec()));
    dm.close()?;
    Ok(())
}
