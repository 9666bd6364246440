//! Crash recovery: size, redo, then undo, driven by the write-ahead log.

use std::collections::BTreeMap;

use tracing::{debug, info};

use super::data_item::set_raw_invalid;
use super::record::{encode_update, LogRecord};
use super::txn::{TransactionStatus, SUPER_XID};
use crate::primitives::pager::{layout, Page, PageCache};
use crate::primitives::wal::Wal;
use crate::types::{PageNo, Result, Uid, Xid};

/// Work done by one recovery run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Records read from the log.
    pub records: u64,
    /// Page count the data file was truncated to.
    pub truncated_to: u32,
    /// Records reapplied by the redo pass.
    pub redone: u64,
    /// Records reversed by the undo pass.
    pub undone: u64,
    /// Transactions aborted by the undo pass.
    pub aborted: u64,
}

/// Brings the data file in line with the log before the store serves requests.
pub fn recover(
    txns: &dyn TransactionStatus,
    wal: &Wal,
    pages: &PageCache,
) -> Result<RecoveryStats> {
    info!("recovery.start");
    let mut stats = RecoveryStats::default();

    let mut max_pgno = 0u32;
    for_each_record(wal, |record| {
        stats.records += 1;
        max_pgno = max_pgno.max(record.page().0);
        Ok(())
    })?;
    let max_pgno = max_pgno.max(1);
    pages.truncate_by_page_number(PageNo(max_pgno))?;
    stats.truncated_to = max_pgno;
    info!(records = stats.records, page_count = max_pgno, "recovery.size.complete");

    for_each_record(wal, |record| {
        if !txns.is_active(record.xid())? {
            redo(pages, &record)?;
            stats.redone += 1;
        }
        Ok(())
    })?;
    info!(redone = stats.redone, "recovery.redo.complete");

    let mut active: BTreeMap<Xid, Vec<LogRecord>> = BTreeMap::new();
    for_each_record(wal, |record| {
        if txns.is_active(record.xid())? {
            active.entry(record.xid()).or_default().push(record);
        }
        Ok(())
    })?;
    for (xid, records) in active {
        for record in records.iter().rev() {
            undo(wal, pages, record)?;
            stats.undone += 1;
        }
        wal.sync()?;
        txns.abort(xid)?;
        stats.aborted += 1;
        debug!(xid, records = records.len(), "recovery.undo.aborted");
    }
    info!(undone = stats.undone, aborted = stats.aborted, "recovery.undo.complete");
    Ok(stats)
}

fn for_each_record(wal: &Wal, mut f: impl FnMut(LogRecord) -> Result<()>) -> Result<()> {
    wal.rewind();
    while let Some(bytes) = wal.next()? {
        f(LogRecord::decode(&bytes)?)?;
    }
    Ok(())
}

fn redo(pages: &PageCache, record: &LogRecord) -> Result<()> {
    match record {
        LogRecord::Insert {
            pgno, offset, raw, ..
        } => with_page(pages, *pgno, |page| layout::recover_insert(page, raw, *offset)),
        LogRecord::Update { uid, new, .. } => apply_update(pages, *uid, new),
    }
}

// Each reversal is logged under the super xid first, so a later redo pass
// replays it after the record it reverses.
fn undo(wal: &Wal, pages: &PageCache, record: &LogRecord) -> Result<()> {
    match record {
        LogRecord::Insert {
            pgno, offset, raw, ..
        } => {
            let mut tombstone = raw.clone();
            set_raw_invalid(&mut tombstone);
            let uid = Uid::new(*pgno, *offset);
            wal.log(&encode_update(SUPER_XID, uid, raw, &tombstone))?;
            with_page(pages, *pgno, |page| {
                layout::recover_insert(page, &tombstone, *offset)
            })
        }
        LogRecord::Update { uid, old, new, .. } => {
            wal.log(&encode_update(SUPER_XID, *uid, new, old))?;
            apply_update(pages, *uid, old)
        }
    }
}

fn apply_update(pages: &PageCache, uid: Uid, image: &[u8]) -> Result<()> {
    with_page(pages, uid.page(), |page| {
        layout::recover_update(page, image, uid.offset())
    })
}

fn with_page(pages: &PageCache, pgno: PageNo, f: impl FnOnce(&Page) -> Result<()>) -> Result<()> {
    let page = pages.get_page(pgno)?;
    let outcome = f(&page);
    let released = pages.release(&page);
    outcome.and(released)
}
