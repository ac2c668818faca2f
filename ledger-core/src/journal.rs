//! Journal data structures: accounts, entries and postings
//!
//! The journal owns every domain object in flat arenas and hands out stable
//! ids. Reporting never mutates these objects; computed state lives in the
//! per-run extra-data store and synthetic objects live in the run's
//! temporaries arena, which is why every id distinguishes the two origins.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use compact_str::CompactString;
use ledger_math::Amount;
use smallvec::SmallVec;

use crate::datetime::{DateInterval, DateSpan};

macro_rules! object_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum $name {
            /// Object owned by the journal
            Journal(usize),
            /// Synthetic object owned by the current run
            Temp(usize),
        }

        impl $name {
            /// Whether the object is a run-owned temporary
            pub fn is_temp(&self) -> bool {
                matches!(self, $name::Temp(_))
            }

            /// Arena index within the owning store
            pub fn index(&self) -> usize {
                match *self {
                    $name::Journal(index) | $name::Temp(index) => index,
                }
            }
        }
    };
}

object_id!(
    /// Stable identifier of an account
    AccountId
);
object_id!(
    /// Stable identifier of an entry
    EntryId
);
object_id!(
    /// Stable identifier of a posting
    PostingId
);

impl EntryId {
    /// Entry id carried by postings built outside of any entry
    pub const DETACHED: EntryId = EntryId::Temp(usize::MAX);
}

impl PostingId {
    /// Posting id carried by postings that live outside every store
    pub const DETACHED: PostingId = PostingId::Temp(usize::MAX);
}

bitflags::bitflags! {
    /// Posting flags the reporting core looks at
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PostingFlags: u16 {
        const VIRTUAL = 0x0010;      // account specified with (parens)
        const MUST_BALANCE = 0x0020; // posting must balance in transaction
        const CALCULATED = 0x0040;   // posting's amount was calculated
        const GENERATED = 0x0080;    // posting was generated by a report
        const TEMP = 0x0100;         // a temporary, run-owned posting
    }
}

/// Clearing state of an entry or posting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ItemState {
    /// Uncleared
    #[default]
    Uncleared,
    /// Cleared (*)
    Cleared,
    /// Pending (!)
    Pending,
}

/// A node in the account hierarchy
#[derive(Debug, Clone)]
pub struct Account {
    /// Stable id
    pub id: AccountId,
    /// Short name (last path component)
    pub name: CompactString,
    /// Full colon-separated path
    pub fullname: CompactString,
    /// Parent account; `None` only for the root
    pub parent: Option<AccountId>,
    /// Child accounts ordered by short name
    pub children: BTreeMap<CompactString, AccountId>,
    /// Postings made directly to this account
    pub posts: Vec<PostingId>,
    /// Depth below the root (root is 0)
    pub depth: usize,
}

impl Account {
    fn new(id: AccountId, name: &str, fullname: &str, parent: Option<AccountId>, depth: usize) -> Self {
        Self {
            id,
            name: CompactString::from(name),
            fullname: CompactString::from(fullname),
            parent,
            children: BTreeMap::new(),
            posts: Vec::new(),
            depth,
        }
    }

    /// Create a standalone account, as used for report-only accounts
    pub fn detached(id: AccountId, name: &str) -> Self {
        Self::new(id, name, name, None, 0)
    }

    /// Whether this is the root of its hierarchy
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Whether this account has no children
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fullname)
    }
}

/// A dated, payee-labelled group of postings
#[derive(Debug, Clone)]
pub struct Entry {
    /// Stable id
    pub id: EntryId,
    /// Primary date
    pub date: NaiveDate,
    /// Auxiliary (effective) date
    pub aux_date: Option<NaiveDate>,
    /// Clearing state
    pub state: ItemState,
    /// Optional check number or code
    pub code: Option<CompactString>,
    /// Payee
    pub payee: CompactString,
    /// Optional note
    pub note: Option<CompactString>,
    /// Postings in entry order
    pub postings: SmallVec<[PostingId; 4]>,
    /// Time span covered, set on report-generated subtotal entries
    pub span: Option<DateSpan>,
}

impl Entry {
    /// Create an entry with no postings
    pub fn new(id: EntryId, date: NaiveDate, payee: &str) -> Self {
        Self {
            id,
            date,
            aux_date: None,
            state: ItemState::Uncleared,
            code: None,
            payee: CompactString::from(payee),
            note: None,
            postings: SmallVec::new(),
            span: None,
        }
    }

    /// Effective date: the auxiliary date when present
    pub fn effective_date(&self) -> NaiveDate {
        self.aux_date.unwrap_or(self.date)
    }
}

/// One leg of an entry
#[derive(Debug, Clone)]
pub struct Posting {
    /// Stable id
    pub id: PostingId,
    /// Owning entry
    pub entry: EntryId,
    /// Account posted to
    pub account: AccountId,
    /// Amount posted
    pub amount: Amount,
    /// Posting flags
    pub flags: PostingFlags,
    /// Clearing state
    pub state: ItemState,
    /// Optional note
    pub note: Option<CompactString>,
}

impl Posting {
    /// Create a posting
    pub fn new(id: PostingId, entry: EntryId, account: AccountId, amount: Amount) -> Self {
        Self {
            id,
            entry,
            account,
            amount,
            flags: PostingFlags::default(),
            state: ItemState::Uncleared,
            note: None,
        }
    }

    /// Check if posting is virtual (enclosed in parentheses)
    pub fn is_virtual(&self) -> bool {
        self.flags.contains(PostingFlags::VIRTUAL)
    }

    /// Check if posting was generated by a report
    pub fn is_generated(&self) -> bool {
        self.flags.contains(PostingFlags::GENERATED)
    }
}

/// Template posting of a periodic entry
#[derive(Debug, Clone)]
pub struct PostingTemplate {
    /// Account to post to
    pub account: AccountId,
    /// Amount for each occurrence
    pub amount: Amount,
}

/// A recurring entry (`~ monthly`) used by budgets and forecasts
#[derive(Debug, Clone)]
pub struct PeriodicEntry {
    /// Recurrence
    pub period: DateInterval,
    /// Template postings
    pub posts: Vec<PostingTemplate>,
}

/// Main journal containing all accounts, entries and postings
#[derive(Debug, Clone)]
pub struct Journal {
    accounts: Vec<Account>,
    entries: Vec<Entry>,
    posts: Vec<Posting>,
    period_entries: Vec<PeriodicEntry>,
}

impl Default for Journal {
    fn default() -> Self {
        Self::new()
    }
}

impl Journal {
    /// Create a new journal holding only the root account
    pub fn new() -> Self {
        Self {
            accounts: vec![Account::new(AccountId::Journal(0), "", "", None, 0)],
            entries: Vec::new(),
            posts: Vec::new(),
            period_entries: Vec::new(),
        }
    }

    /// Id of the root account
    pub fn root(&self) -> AccountId {
        AccountId::Journal(0)
    }

    /// Look up an account owned by the journal
    pub fn account(&self, id: AccountId) -> Option<&Account> {
        match id {
            AccountId::Journal(index) => self.accounts.get(index),
            AccountId::Temp(_) => None,
        }
    }

    /// Look up an entry owned by the journal
    pub fn entry(&self, id: EntryId) -> Option<&Entry> {
        match id {
            EntryId::Journal(index) => self.entries.get(index),
            EntryId::Temp(_) => None,
        }
    }

    /// Look up a posting owned by the journal
    pub fn post(&self, id: PostingId) -> Option<&Posting> {
        match id {
            PostingId::Journal(index) => self.posts.get(index),
            PostingId::Temp(_) => None,
        }
    }

    /// All accounts, root first
    pub fn accounts(&self) -> impl Iterator<Item = &Account> {
        self.accounts.iter()
    }

    /// All entries in journal order
    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter()
    }

    /// All postings in journal order
    pub fn posts(&self) -> impl Iterator<Item = &Posting> {
        self.posts.iter()
    }

    /// Periodic entries
    pub fn period_entries(&self) -> &[PeriodicEntry] {
        &self.period_entries
    }

    /// Number of accounts including the root
    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }

    /// Number of entries
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Number of postings
    pub fn post_count(&self) -> usize {
        self.posts.len()
    }

    /// Find an account by its full name
    pub fn find_account(&self, path: &str) -> Option<AccountId> {
        let mut current = self.root();
        for component in path.split(':').filter(|c| !c.is_empty()) {
            current = *self.account(current)?.children.get(component)?;
        }
        Some(current)
    }

    /// Find an account by its full name, creating missing components
    pub fn find_or_create_account(&mut self, path: &str) -> AccountId {
        let mut current = self.root();
        for component in path.split(':').filter(|c| !c.is_empty()) {
            let parent = &self.accounts[current.index()];
            if let Some(child) = parent.children.get(component) {
                current = *child;
                continue;
            }

            let fullname = if parent.is_root() {
                component.to_string()
            } else {
                format!("{}:{}", parent.fullname, component)
            };
            let depth = parent.depth + 1;
            let id = AccountId::Journal(self.accounts.len());
            self.accounts.push(Account::new(id, component, &fullname, Some(current), depth));
            self.accounts[current.index()].children.insert(CompactString::from(component), id);
            current = id;
        }
        current
    }

    /// Start building an entry
    pub fn entry_builder(&mut self, date: NaiveDate, payee: &str) -> EntryBuilder<'_> {
        EntryBuilder {
            journal: self,
            date,
            aux_date: None,
            payee: payee.to_string(),
            code: None,
            note: None,
            state: ItemState::Uncleared,
            posts: Vec::new(),
        }
    }

    /// Add a periodic entry from (account path, amount) templates
    pub fn add_period_entry(&mut self, period: DateInterval, posts: Vec<(&str, Amount)>) {
        let posts = posts
            .into_iter()
            .map(|(path, amount)| PostingTemplate { account: self.find_or_create_account(path), amount })
            .collect();
        self.period_entries.push(PeriodicEntry { period, posts });
    }
}

/// Builder for journal entries
pub struct EntryBuilder<'a> {
    journal: &'a mut Journal,
    date: NaiveDate,
    aux_date: Option<NaiveDate>,
    payee: String,
    code: Option<String>,
    note: Option<String>,
    state: ItemState,
    posts: Vec<(String, Amount, PostingFlags, ItemState)>,
}

impl<'a> EntryBuilder<'a> {
    /// Set the auxiliary date
    pub fn aux_date(mut self, date: NaiveDate) -> Self {
        self.aux_date = Some(date);
        self
    }

    /// Set the code
    pub fn code<S: Into<String>>(mut self, code: S) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Set the note
    pub fn note<S: Into<String>>(mut self, note: S) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Set the clearing state
    pub fn state(mut self, state: ItemState) -> Self {
        self.state = state;
        self
    }

    /// Add a posting to the given account path
    pub fn post(mut self, account: &str, amount: Amount) -> Self {
        self.posts.push((account.to_string(), amount, PostingFlags::default(), ItemState::Uncleared));
        self
    }

    /// Add a cleared posting
    pub fn cleared_post(mut self, account: &str, amount: Amount) -> Self {
        self.posts.push((account.to_string(), amount, PostingFlags::default(), ItemState::Cleared));
        self
    }

    /// Add a virtual posting
    pub fn virtual_post(mut self, account: &str, amount: Amount) -> Self {
        self.posts.push((account.to_string(), amount, PostingFlags::VIRTUAL, ItemState::Uncleared));
        self
    }

    /// Add the entry to the journal
    pub fn add(self) -> EntryId {
        let journal = self.journal;
        let entry_id = EntryId::Journal(journal.entries.len());
        let mut entry = Entry::new(entry_id, self.date, &self.payee);
        entry.aux_date = self.aux_date;
        entry.state = self.state;
        entry.code = self.code.map(CompactString::from);
        entry.note = self.note.map(CompactString::from);

        for (path, amount, flags, state) in self.posts {
            let account = journal.find_or_create_account(&path);
            let post_id = PostingId::Journal(journal.posts.len());
            let mut post = Posting::new(post_id, entry_id, account, amount);
            post.flags = flags;
            post.state = if self.state == ItemState::Uncleared { state } else { self.state };
            journal.posts.push(post);
            journal.accounts[account.index()].posts.push(post_id);
            entry.postings.push(post_id);
        }

        journal.entries.push(entry);
        entry_id
    }
}
