//! Extra-data store
//!
//! Reporting computes per-item state (running totals, sort keys, display
//! flags) without touching the journal. Each posting or account gets at
//! most one record, created lazily on first access and discarded when the
//! store is reset between report runs.

use std::collections::HashMap;

use chrono::NaiveDate;
use ledger_math::{Amount, Balance};
use log::debug;

use crate::expr::Value;
use crate::journal::{AccountId, PostingId};

bitflags::bitflags! {
    /// Computation flags on a posting record
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PostFlags: u16 {
        const RECEIVED = 0x0001;   // seen by the related-postings stage
        const HANDLED = 0x0002;    // already emitted by the related-postings stage
        const TO_DISPLAY = 0x0004;
        const DISPLAYED = 0x0008;
        const NO_TOTAL = 0x0010;   // excluded from running totals
        const SORT_CALC = 0x0020;  // sort_value is current
        const COMPOSITE = 0x0040;  // composite_amount overrides the amount
        const MATCHES = 0x0080;    // accepted by the last filter
    }
}

bitflags::bitflags! {
    /// Computation flags on an account record
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AccountFlags: u16 {
        const TO_DISPLAY = 0x0001;
        const DISPLAYED = 0x0002;
        const SORT_CALC = 0x0004;
        const HAS_NON_VIRTUALS = 0x0008;
        const HAS_UNB_VIRTUALS = 0x0010;
        const SUMMED = 0x0020;     // total and total_count are current
    }
}

/// Report-computed state of a posting
#[derive(Debug, Clone, Default)]
pub struct PostXData {
    /// Running total up to and including this posting
    pub total: Balance,
    /// Cached sort key
    pub sort_value: Option<Value>,
    /// Amount override used in place of the posting's own amount
    pub composite_amount: Option<Amount>,
    /// Position in the running-total sequence
    pub index: usize,
    /// Number of postings accumulated so far
    pub count: usize,
    /// Flags
    pub flags: PostFlags,
    /// Date override
    pub date: Option<NaiveDate>,
    /// Account override used for grouping and display
    pub reported_account: Option<AccountId>,
}

/// Report-computed state of an account
#[derive(Debug, Clone, Default)]
pub struct AccountXData {
    /// Sum of amounts posted directly to the account
    pub value: Balance,
    /// Subtree total (own value plus all descendants)
    pub total: Balance,
    /// Cached sort key
    pub sort_value: Option<Value>,
    /// Postings counted directly
    pub count: usize,
    /// Postings counted in the subtree
    pub total_count: usize,
    /// Virtual postings counted directly
    pub virtuals: usize,
    /// Flags
    pub flags: AccountFlags,
}

/// Side table of per-item records, keyed by item id
#[derive(Debug, Default)]
pub struct ExtraData {
    posts: HashMap<PostingId, PostXData>,
    accounts: HashMap<AccountId, AccountXData>,
}

impl ExtraData {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Record for a posting, created on first access
    pub fn post_mut(&mut self, id: PostingId) -> &mut PostXData {
        self.posts.entry(id).or_default()
    }

    /// Record for a posting, if one exists
    pub fn post(&self, id: PostingId) -> Option<&PostXData> {
        self.posts.get(&id)
    }

    /// Whether a posting has a record
    pub fn has_post(&self, id: PostingId) -> bool {
        self.posts.contains_key(&id)
    }

    /// Record for an account, created on first access
    pub fn account_mut(&mut self, id: AccountId) -> &mut AccountXData {
        self.accounts.entry(id).or_default()
    }

    /// Record for an account, if one exists
    pub fn account(&self, id: AccountId) -> Option<&AccountXData> {
        self.accounts.get(&id)
    }

    /// Whether an account has a record
    pub fn has_account(&self, id: AccountId) -> bool {
        self.accounts.contains_key(&id)
    }

    /// Number of posting records
    pub fn post_count(&self) -> usize {
        self.posts.len()
    }

    /// Number of account records
    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }

    /// Drop every posting record
    pub fn clear_posts(&mut self) {
        debug!("clearing {} posting records", self.posts.len());
        self.posts.clear();
    }

    /// Drop every account record
    pub fn clear_accounts(&mut self) {
        debug!("clearing {} account records", self.accounts.len());
        self.accounts.clear();
    }

    /// Drop every record
    pub fn reset_all(&mut self) {
        self.clear_posts();
        self.clear_accounts();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_created_lazily() {
        let mut store = ExtraData::new();
        let post = PostingId::Journal(3);
        assert!(store.post(post).is_none());

        store.post_mut(post).flags |= PostFlags::MATCHES;
        assert!(store.has_post(post));
        assert!(store.post(post).unwrap().flags.contains(PostFlags::MATCHES));

        // Same record on second access
        store.post_mut(post).index = 7;
        assert_eq!(store.post_count(), 1);
        assert_eq!(store.post(post).unwrap().index, 7);
    }

    #[test]
    fn test_reset_all_drops_everything() {
        let mut store = ExtraData::new();
        store.post_mut(PostingId::Journal(0));
        store.post_mut(PostingId::Temp(0));
        store.account_mut(AccountId::Journal(1)).count = 2;

        store.reset_all();
        assert_eq!(store.post_count(), 0);
        assert_eq!(store.account_count(), 0);
        assert!(!store.has_account(AccountId::Journal(1)));
    }
}
