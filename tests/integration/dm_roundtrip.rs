#![allow(missing_docs)]

mod common;

use std::sync::Arc;

use proptest::prelude::*;
use vellum::{DataManager, MemoryTransactions, Result, Uid, SUPER_XID};

fn read_bytes(dm: &DataManager, uid: Uid) -> Result<Vec<u8>> {
    let item = dm.read(uid)?.expect("item is live");
    let data = item.data();
    item.release()?;
    Ok(data)
}

#[test]
fn ten_page_store_keeps_update_across_reopen() -> Result<()> {
    common::init_tracing();
    let (_dir, path) = common::store_path("scenario");
    let payloads: Vec<Vec<u8>> = (0..3u8).map(|i| vec![b'a' + i; 60]).collect();
    let updated = vec![b'z'; 60];

    let uids = {
        let dm = DataManager::create(&path, common::options(10))?;
        let mut uids = Vec::new();
        for payload in &payloads {
            uids.push(dm.insert(SUPER_XID, payload)?);
        }
        for (uid, payload) in uids.iter().zip(&payloads) {
            assert_eq!(&read_bytes(&dm, *uid)?, payload);
        }

        let item = dm.read(uids[1])?.expect("second item");
        let mut write = item.before();
        write.update(|data| data.copy_from_slice(&updated));
        write.after(SUPER_XID)?;
        item.release()?;
        dm.close()?;
        uids
    };

    let dm = DataManager::open(
        &path,
        common::options(10),
        Arc::new(MemoryTransactions::new()),
    )?;
    assert!(dm.last_recovery().is_none(), "clean close must skip recovery");
    assert_eq!(read_bytes(&dm, uids[0])?, payloads[0]);
    assert_eq!(read_bytes(&dm, uids[1])?, updated);
    assert_eq!(read_bytes(&dm, uids[2])?, payloads[2]);
    dm.close()?;
    Ok(())
}

#[test]
fn rollback_leaves_item_untouched() -> Result<()> {
    common::init_tracing();
    let (_dir, path) = common::store_path("rollback");
    let dm = DataManager::create(&path, common::options(16))?;
    let uid = dm.insert(SUPER_XID, b"original bytes")?;
    let item = dm.read(uid)?.expect("live item");
    let mut write = item.before();
    write.update(|data| data.fill(0xFF));
    assert_eq!(write.with_data(<[u8]>::to_vec), vec![0xFF; 14]);
    write.rollback();
    assert_eq!(item.data(), b"original bytes".to_vec());
    item.release()?;
    dm.close()?;
    Ok(())
}

#[test]
fn free_space_is_reused_after_reopen() -> Result<()> {
    let (_dir, path) = common::store_path("reuse");
    {
        let dm = DataManager::create(&path, common::options(16))?;
        dm.insert(SUPER_XID, &[1u8; 100])?;
        dm.close()?;
    }
    let dm = DataManager::open(
        &path,
        common::options(16),
        Arc::new(MemoryTransactions::new()),
    )?;
    let pages = dm.page_count();
    let uid = dm.insert(SUPER_XID, &[2u8; 100])?;
    assert_eq!(dm.page_count(), pages, "partially filled page should be reused");
    assert_eq!(read_bytes(&dm, uid)?, vec![2u8; 100]);
    dm.close()?;
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn payloads_round_trip(
        payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..600), 1..40)
    ) {
        let (_dir, path) = common::store_path("prop");
        let dm = DataManager::create(&path, common::options(64)).unwrap();
        let uids: Vec<Uid> = payloads
            .iter()
            .map(|p| dm.insert(SUPER_XID, p).unwrap())
            .collect();
        for (uid, payload) in uids.iter().zip(&payloads) {
            prop_assert_eq!(&read_bytes(&dm, *uid).unwrap(), payload);
        }
        dm.close().unwrap();
    }
}
