//! Per-run reporting context
//!
//! A `ReportContext` borrows the journal for the duration of one report
//! run and owns everything the run creates: the extra-data store and the
//! arena of synthetic entries, postings and accounts that grouping stages
//! generate. Stages pass ids around; the context resolves them.

use std::collections::HashMap;

use chrono::{Local, NaiveDate};
use compact_str::CompactString;
use ledger_math::{Amount, PriceHistory};
use log::debug;

use crate::journal::{Account, AccountId, Entry, EntryId, Journal, Posting, PostingFlags, PostingId};
use crate::xdata::{AccountXData, ExtraData, PostFlags, PostXData};

/// Arena of synthetic objects created during a run
#[derive(Debug, Default)]
pub struct Temporaries {
    accounts: Vec<Account>,
    entries: Vec<Entry>,
    posts: Vec<Posting>,
    account_names: HashMap<CompactString, AccountId>,
}

impl Temporaries {
    /// Create an empty arena
    pub fn new() -> Self {
        Self::default()
    }

    /// Find or create a report-only account such as `<Total>`
    pub fn create_account(&mut self, name: &str) -> AccountId {
        if let Some(id) = self.account_names.get(name) {
            return *id;
        }
        let id = AccountId::Temp(self.accounts.len());
        self.accounts.push(Account::detached(id, name));
        self.account_names.insert(CompactString::from(name), id);
        id
    }

    /// Create an entry with no postings
    pub fn create_entry(&mut self, date: NaiveDate, payee: &str) -> EntryId {
        let id = EntryId::Temp(self.entries.len());
        self.entries.push(Entry::new(id, date, payee));
        id
    }

    /// Store a copy of `source` without its postings
    pub fn copy_entry(&mut self, source: &Entry) -> EntryId {
        let id = EntryId::Temp(self.entries.len());
        let mut entry = source.clone();
        entry.id = id;
        entry.postings.clear();
        self.entries.push(entry);
        id
    }

    /// Create a generated posting and link it into its temporary entry
    pub fn create_post(&mut self, entry: EntryId, account: AccountId, amount: Amount) -> PostingId {
        let id = PostingId::Temp(self.posts.len());
        let mut post = Posting::new(id, entry, account, amount);
        post.flags = PostingFlags::GENERATED | PostingFlags::TEMP;
        self.insert_post(post)
    }

    /// Store a copy of `source` re-homed into `entry`
    pub fn copy_post(&mut self, source: &Posting, entry: EntryId) -> PostingId {
        let mut post = source.clone();
        post.id = PostingId::Temp(self.posts.len());
        post.entry = entry;
        post.flags |= PostingFlags::TEMP;
        self.insert_post(post)
    }

    fn insert_post(&mut self, post: Posting) -> PostingId {
        let id = post.id;
        if let EntryId::Temp(index) = post.entry {
            if let Some(entry) = self.entries.get_mut(index) {
                entry.postings.push(id);
            }
        }
        if let AccountId::Temp(index) = post.account {
            if let Some(account) = self.accounts.get_mut(index) {
                account.posts.push(id);
            }
        }
        self.posts.push(post);
        id
    }

    /// Look up a temporary account
    pub fn account(&self, id: AccountId) -> Option<&Account> {
        match id {
            AccountId::Temp(index) => self.accounts.get(index),
            AccountId::Journal(_) => None,
        }
    }

    /// Look up a temporary entry
    pub fn entry(&self, id: EntryId) -> Option<&Entry> {
        match id {
            EntryId::Temp(index) => self.entries.get(index),
            EntryId::Journal(_) => None,
        }
    }

    /// Mutable access to a temporary entry
    pub fn entry_mut(&mut self, id: EntryId) -> Option<&mut Entry> {
        match id {
            EntryId::Temp(index) => self.entries.get_mut(index),
            EntryId::Journal(_) => None,
        }
    }

    /// Look up a temporary posting
    pub fn post(&self, id: PostingId) -> Option<&Posting> {
        match id {
            PostingId::Temp(index) => self.posts.get(index),
            PostingId::Journal(_) => None,
        }
    }

    /// Number of temporary postings
    pub fn post_count(&self) -> usize {
        self.posts.len()
    }

    /// Number of temporary entries
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Drop every temporary
    pub fn clear(&mut self) {
        debug!("dropping {} temporary entries and {} temporary postings", self.entries.len(), self.posts.len());
        self.accounts.clear();
        self.entries.clear();
        self.posts.clear();
        self.account_names.clear();
    }
}

/// State shared by every stage of one report run
#[derive(Debug)]
pub struct ReportContext<'j> {
    journal: &'j Journal,
    prices: Option<&'j PriceHistory>,
    today: NaiveDate,
    temps: Temporaries,
    xdata: ExtraData,
}

impl<'j> ReportContext<'j> {
    /// Create a context over `journal`, dated today
    pub fn new(journal: &'j Journal) -> Self {
        Self {
            journal,
            prices: None,
            today: Local::now().date_naive(),
            temps: Temporaries::new(),
            xdata: ExtraData::new(),
        }
    }

    /// Use `prices` when revaluing totals
    pub fn with_prices(mut self, prices: &'j PriceHistory) -> Self {
        self.prices = Some(prices);
        self
    }

    /// Override the current date
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    /// The journal being reported on
    pub fn journal(&self) -> &'j Journal {
        self.journal
    }

    /// Price history, if any
    pub fn prices(&self) -> Option<&'j PriceHistory> {
        self.prices
    }

    /// The current date for the run
    pub fn today(&self) -> NaiveDate {
        self.today
    }

    /// Synthetic objects created so far
    pub fn temps(&self) -> &Temporaries {
        &self.temps
    }

    /// Mutable access to the temporaries arena
    pub fn temps_mut(&mut self) -> &mut Temporaries {
        &mut self.temps
    }

    /// The extra-data store
    pub fn xdata(&self) -> &ExtraData {
        &self.xdata
    }

    /// Mutable access to the extra-data store
    pub fn xdata_mut(&mut self) -> &mut ExtraData {
        &mut self.xdata
    }

    /// Resolve a posting id
    ///
    /// # Panics
    ///
    /// Panics if the id refers to no posting; ids only come from this run.
    pub fn post(&self, id: PostingId) -> &Posting {
        let found = match id {
            PostingId::Journal(_) => self.journal.post(id),
            PostingId::Temp(_) => self.temps.post(id),
        };
        match found {
            Some(post) => post,
            None => panic!("dangling posting id {:?}", id),
        }
    }

    /// Resolve an entry id
    ///
    /// # Panics
    ///
    /// Panics if the id refers to no entry.
    pub fn entry(&self, id: EntryId) -> &Entry {
        let found = match id {
            EntryId::Journal(_) => self.journal.entry(id),
            EntryId::Temp(_) => self.temps.entry(id),
        };
        match found {
            Some(entry) => entry,
            None => panic!("dangling entry id {:?}", id),
        }
    }

    /// Resolve an account id
    ///
    /// # Panics
    ///
    /// Panics if the id refers to no account.
    pub fn account(&self, id: AccountId) -> &Account {
        let found = match id {
            AccountId::Journal(_) => self.journal.account(id),
            AccountId::Temp(_) => self.temps.account(id),
        };
        match found {
            Some(account) => account,
            None => panic!("dangling account id {:?}", id),
        }
    }

    /// Extra data for a posting, created on first access
    pub fn post_xdata(&mut self, id: PostingId) -> &mut PostXData {
        let _ = self.post(id);
        self.xdata.post_mut(id)
    }

    /// Extra data for an account, created on first access
    pub fn account_xdata(&mut self, id: AccountId) -> &mut AccountXData {
        let _ = self.account(id);
        self.xdata.account_mut(id)
    }

    /// Effective amount of a posting, honouring a composite override
    pub fn amount_of(&self, id: PostingId) -> Amount {
        match self.xdata.post(id) {
            Some(xdata) if xdata.flags.contains(PostFlags::COMPOSITE) => {
                xdata.composite_amount.clone().unwrap_or_default()
            }
            _ => self.post(id).amount.clone(),
        }
    }

    /// Effective date of a posting: the override, else its entry's date
    pub fn date_of(&self, id: PostingId) -> NaiveDate {
        match self.xdata.post(id).and_then(|xdata| xdata.date) {
            Some(date) => date,
            None => self.entry(self.post(id).entry).date,
        }
    }

    /// Account a posting reports under: the override, else its own
    pub fn reported_account(&self, id: PostingId) -> AccountId {
        match self.xdata.post(id).and_then(|xdata| xdata.reported_account) {
            Some(account) => account,
            None => self.post(id).account,
        }
    }

    /// Payee of a posting's entry
    pub fn payee_of(&self, id: PostingId) -> &str {
        &self.entry(self.post(id).entry).payee
    }

    /// Full name of an account
    pub fn fullname(&self, id: AccountId) -> &str {
        &self.account(id).fullname
    }

    /// Find or create a report-only account
    pub fn temp_account(&mut self, name: &str) -> AccountId {
        self.temps.create_account(name)
    }

    /// Create a synthetic entry
    pub fn create_entry(&mut self, date: NaiveDate, payee: &str) -> EntryId {
        self.temps.create_entry(date, payee)
    }

    /// Copy an entry (journal or temporary) without its postings
    pub fn copy_entry(&mut self, id: EntryId) -> EntryId {
        let source = self.entry(id).clone();
        self.temps.copy_entry(&source)
    }

    /// Create a generated posting in a synthetic entry
    pub fn create_post(&mut self, entry: EntryId, account: AccountId, amount: Amount) -> PostingId {
        self.temps.create_post(entry, account, amount)
    }

    /// Copy a posting into another synthetic entry
    pub fn copy_post(&mut self, id: PostingId, entry: EntryId) -> PostingId {
        let source = self.post(id).clone();
        self.temps.copy_post(&source, entry)
    }

    /// Copy a posting into a synthetic entry under a different account
    pub fn copy_post_to(&mut self, id: PostingId, entry: EntryId, account: AccountId) -> PostingId {
        let mut source = self.post(id).clone();
        source.account = account;
        self.temps.copy_post(&source, entry)
    }

    /// Forget all computed state and synthetic objects
    pub fn reset(&mut self) {
        self.xdata.reset_all();
        self.temps.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn sample_journal() -> Journal {
        let mut journal = Journal::new();
        journal
            .entry_builder(date(2024, 1, 5), "Grocer")
            .post("Expenses:Food", "$10".parse().unwrap())
            .post("Assets:Cash", "-$10".parse().unwrap())
            .add();
        journal
    }

    #[test]
    fn test_composite_amount_overrides() {
        let journal = sample_journal();
        let mut ctx = ReportContext::new(&journal);
        let post = PostingId::Journal(0);
        assert_eq!(ctx.amount_of(post), "$10".parse().unwrap());

        let xdata = ctx.post_xdata(post);
        xdata.composite_amount = Some("-$10".parse().unwrap());
        xdata.flags |= PostFlags::COMPOSITE;
        assert_eq!(ctx.amount_of(post), "-$10".parse().unwrap());
        // The journal is untouched
        assert_eq!(journal.post(post).unwrap().amount, "$10".parse().unwrap());
    }

    #[test]
    fn test_temporaries_link_into_entries() {
        let journal = sample_journal();
        let mut ctx = ReportContext::new(&journal);
        let entry = ctx.create_entry(date(2024, 1, 31), "- 2024-01-31");
        let total = ctx.temp_account("<Total>");
        assert_eq!(ctx.temp_account("<Total>"), total);

        let post = ctx.create_post(entry, total, "$5".parse().unwrap());
        assert_eq!(ctx.entry(entry).postings.as_slice(), &[post]);
        assert!(ctx.post(post).is_generated());
        assert_eq!(ctx.date_of(post), date(2024, 1, 31));
        assert_eq!(ctx.fullname(ctx.reported_account(post)), "<Total>");
    }

    #[test]
    fn test_copy_entry_drops_postings() {
        let journal = sample_journal();
        let mut ctx = ReportContext::new(&journal);
        let copy = ctx.copy_entry(EntryId::Journal(0));
        assert!(ctx.entry(copy).postings.is_empty());
        assert_eq!(ctx.entry(copy).payee, "Grocer");

        let moved = ctx.copy_post(PostingId::Journal(0), copy);
        assert_eq!(ctx.post(moved).entry, copy);
        assert_eq!(ctx.entry(copy).postings.len(), 1);
    }

    #[test]
    fn test_reset_drops_state() {
        let journal = sample_journal();
        let mut ctx = ReportContext::new(&journal);
        ctx.post_xdata(PostingId::Journal(0)).index = 1;
        let entry = ctx.create_entry(date(2024, 1, 1), "x");
        ctx.reset();
        assert_eq!(ctx.xdata().post_count(), 0);
        assert_eq!(ctx.temps().entry_count(), 0);
        assert!(ctx.temps().entry(entry).is_none());
    }

    #[test]
    #[should_panic(expected = "dangling posting id")]
    fn test_dangling_id_panics() {
        let journal = sample_journal();
        let ctx = ReportContext::new(&journal);
        ctx.post(PostingId::Temp(42));
    }
}
