//! Canned drafts and constants shared across test suites.

use sgfa_core::Entry;

pub const ALICE: &str = "alice";
pub const BOB: &str = "bob";

pub const NOON: &str = "2026-08-01 12:00:00";
pub const LATER: &str = "2026-08-01 13:00:00";

/// A draft entry ready for its first write.
pub fn draft(title: &str, body: &str, tags: &[&str]) -> Entry {
    let mut entry = Entry::new();
    entry.set_title(title).expect("fixture title");
    entry.set_body(body).expect("fixture body");

    for tag in tags {
        entry.add_tag(tag).expect("fixture tag");
    }

    entry
}
