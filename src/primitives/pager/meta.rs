//! Page one carries a random validation token used to detect unclean shutdown.
//!
//! On open a fresh token is written at [`OPEN_TOKEN`]; a clean close copies it
//! to [`CLOSE_TOKEN`]. If the two ranges differ when the file is opened again,
//! the previous session did not close cleanly and recovery must run.

use std::ops::Range;

use rand::{rngs::OsRng, RngCore};

use super::page::Page;
use crate::types::PAGE_SIZE;

/// Bytes holding the token written when the store is opened.
pub const OPEN_TOKEN: Range<usize> = 100..108;
/// Bytes holding the copy written on clean close.
pub const CLOSE_TOKEN: Range<usize> = 108..116;

/// Returns a page-one image carrying a freshly opened (not yet closed) token.
pub fn init_raw() -> Box<[u8]> {
    let mut raw = vec![0u8; PAGE_SIZE].into_boxed_slice();
    fill_open_token(&mut raw);
    raw
}

/// Writes a new random open token into page one.
pub fn set_open(page: &Page) {
    fill_open_token(&mut page.write());
}

/// Copies the open token into the close slot marking a clean shutdown.
pub fn set_close(page: &Page) {
    let mut raw = page.write();
    raw.copy_within(OPEN_TOKEN, CLOSE_TOKEN.start);
}

/// Returns true if the last session closed cleanly.
pub fn check(page: &Page) -> bool {
    let raw = page.read();
    raw[OPEN_TOKEN] == raw[CLOSE_TOKEN]
}

fn fill_open_token(raw: &mut [u8]) {
    OsRng.fill_bytes(&mut raw[OPEN_TOKEN]);
}
