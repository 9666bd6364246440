#![forbid(unsafe_code)]

mod freelist;
pub mod meta;
mod page;
mod pager;

pub use freelist::{FreeSpaceIndex, PageInfo, INTERVALS, THRESHOLD};
pub use page::{layout, Page, FSO_LEN, MAX_FREE_SPACE};
pub use pager::{PageCache, PagerStats, MIN_CACHE_PAGES};
