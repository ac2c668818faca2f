//! Posting handler pipeline
//!
//! A report is a chain of stages. Each stage receives posting ids one at a
//! time through [`PostHandler::handle`], may buffer or transform them, and
//! forwards to the stage it owns. [`PostHandler::flush`] drains whatever a
//! stage still holds and then flushes its downstream exactly once, so the
//! final group of a buffering stage is never lost.
//!
//! Stages never mutate the journal. Per-item state goes into the context's
//! extra-data store and synthetic postings into its temporaries arena.

use std::cell::RefCell;
use std::mem;
use std::rc::Rc;

use chrono::NaiveDate;
use ledger_math::{Amount, Balance};
use log::{debug, trace};

use crate::context::ReportContext;
use crate::error::{ReportError, ReportResult};
use crate::expr::op::sort_by_key_values;
use crate::expr::{Expression, ItemPredicate, Value};
use crate::journal::{AccountId, EntryId, PostingFlags, PostingId};
use crate::scope::PostScope;
use crate::xdata::{AccountFlags, PostFlags};

mod generate;
mod group;

pub use generate::{BudgetFlags, BudgetPosts, ForecastPosts, GeneratePosts};
pub use group::{
    ByPayeePosts, ChangedValuePosts, CollapsePosts, DowPosts, IntervalPosts, RelatedPosts, SubtotalPosts,
    SubtotalState, TransferDetails, TransferKind,
};

/// A stage of the posting pipeline
pub trait PostHandler {
    /// Receive one posting
    fn handle(&mut self, post: PostingId, ctx: &mut ReportContext<'_>) -> ReportResult<()>;

    /// Drain buffered state, then flush downstream
    fn flush(&mut self, ctx: &mut ReportContext<'_>) -> ReportResult<()>;
}

/// Owned downstream stage
pub type PostHandlerBox = Box<dyn PostHandler>;

/// Posting ids recorded by a [`CollectPosts`] sink
pub type SharedPosts = Rc<RefCell<Vec<PostingId>>>;

/// Emit one synthetic posting per commodity of `value` into `entry`
///
/// An empty balance still yields a single zero posting so that empty
/// groups remain visible downstream.
pub(crate) fn handle_value(
    value: &Balance,
    account: AccountId,
    entry: EntryId,
    flags: PostFlags,
    date: Option<NaiveDate>,
    handler: &mut dyn PostHandler,
    ctx: &mut ReportContext<'_>,
) -> ReportResult<()> {
    let amounts: Vec<Amount> = if value.is_empty() {
        vec![Amount::zero()]
    } else {
        value.amounts().cloned().collect()
    };

    for amount in amounts {
        let post = ctx.create_post(entry, account, amount);
        let xdata = ctx.post_xdata(post);
        xdata.flags |= flags;
        if date.is_some() {
            xdata.date = date;
        }
        handler.handle(post, ctx)?;
    }
    Ok(())
}

/// Drops every posting
#[derive(Debug, Default)]
pub struct IgnorePosts;

impl IgnorePosts {
    /// Create the sink
    pub fn new() -> Self {
        Self
    }
}

impl PostHandler for IgnorePosts {
    fn handle(&mut self, _post: PostingId, _ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        Ok(())
    }

    fn flush(&mut self, _ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        Ok(())
    }
}

/// Flush bookkeeping for stages that hold postings until flushed
///
/// Receiving a posting after the flush, or flushing twice, panics.
#[derive(Debug, Default)]
pub(crate) struct FlushState {
    flushed: bool,
}

impl FlushState {
    pub(crate) fn receive(&self, stage: &str, post: PostingId) {
        assert!(!self.flushed, "{} stage received posting {:?} after flush", stage, post);
    }

    pub(crate) fn flush(&mut self, stage: &str) {
        assert!(!self.flushed, "{} stage flushed twice", stage);
        self.flushed = true;
    }
}

/// Terminal sink recording the ids it receives, in order
#[derive(Debug)]
pub struct CollectPosts {
    posts: SharedPosts,
    flush_state: FlushState,
}

impl CollectPosts {
    /// Record into `posts`
    pub fn new(posts: SharedPosts) -> Self {
        Self { posts, flush_state: FlushState::default() }
    }

    /// A boxed collector and the handle to read its results
    pub fn shared() -> (PostHandlerBox, SharedPosts) {
        let posts = SharedPosts::default();
        (Box::new(Self::new(Rc::clone(&posts))), posts)
    }
}

impl PostHandler for CollectPosts {
    fn handle(&mut self, post: PostingId, _ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        self.flush_state.receive("collect", post);
        self.posts.borrow_mut().push(post);
        Ok(())
    }

    fn flush(&mut self, _ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        self.flush_state.flush("collect");
        Ok(())
    }
}

/// Adds each posting's amount into its reported account's running value
pub struct SetAccountValue {
    handler: PostHandlerBox,
}

impl SetAccountValue {
    /// Create the stage
    pub fn new(handler: PostHandlerBox) -> Self {
        Self { handler }
    }
}

impl PostHandler for SetAccountValue {
    fn handle(&mut self, post: PostingId, ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        let account = ctx.reported_account(post);
        let amount = ctx.amount_of(post);
        let posting = ctx.post(post);
        let is_virtual = posting.is_virtual();
        let must_balance = posting.flags.contains(PostingFlags::MUST_BALANCE);

        let xdata = ctx.account_xdata(account);
        xdata.value += &amount;
        xdata.count += 1;
        if is_virtual {
            xdata.virtuals += 1;
            if !must_balance {
                xdata.flags |= AccountFlags::HAS_UNB_VIRTUALS;
            }
        } else {
            xdata.flags |= AccountFlags::HAS_NON_VIRTUALS;
        }

        self.handler.handle(post, ctx)
    }

    fn flush(&mut self, ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        self.handler.flush(ctx)
    }
}

/// Forwards postings accepted by a predicate, marking them as matched
pub struct FilterPosts {
    handler: PostHandlerBox,
    predicate: ItemPredicate,
}

impl FilterPosts {
    /// Create the stage from a compiled predicate
    pub fn new(handler: PostHandlerBox, predicate: ItemPredicate) -> Self {
        Self { handler, predicate }
    }

    /// Compile `source` and create the stage
    pub fn from_source(handler: PostHandlerBox, source: &str) -> ReportResult<Self> {
        Ok(Self::new(handler, ItemPredicate::new(source)?))
    }
}

impl PostHandler for FilterPosts {
    fn handle(&mut self, post: PostingId, ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        if self.predicate.matches(&PostScope::new(ctx, post))? {
            ctx.post_xdata(post).flags |= PostFlags::MATCHES;
            self.handler.handle(post, ctx)?;
        }
        Ok(())
    }

    fn flush(&mut self, ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        self.handler.flush(ctx)
    }
}

/// Buffers every posting and forwards them stably sorted by a key
pub struct SortPosts {
    handler: PostHandlerBox,
    flush_state: FlushState,
    sort_order: Expression,
    posts: Vec<PostingId>,
}

impl SortPosts {
    /// Create the stage from a compiled key expression
    pub fn new(handler: PostHandlerBox, sort_order: Expression) -> Self {
        Self { handler, flush_state: FlushState::default(), sort_order, posts: Vec::new() }
    }

    /// Compile `source` as the sort key
    pub fn from_source(handler: PostHandlerBox, source: &str) -> ReportResult<Self> {
        let sort_order = Expression::parse(source).map_err(|err| ReportError::in_sort_string(source, err))?;
        Ok(Self::new(handler, sort_order))
    }

    fn sort_key(&self, post: PostingId, ctx: &mut ReportContext<'_>) -> ReportResult<Value> {
        if let Some(xdata) = ctx.xdata().post(post) {
            if xdata.flags.contains(PostFlags::SORT_CALC) {
                if let Some(value) = &xdata.sort_value {
                    return Ok(value.clone());
                }
            }
        }

        let value = self
            .sort_order
            .evaluate(&PostScope::new(ctx, post))
            .map_err(|err| ReportError::in_sort_string(self.sort_order.source(), err))?;
        let xdata = ctx.post_xdata(post);
        xdata.sort_value = Some(value.clone());
        xdata.flags |= PostFlags::SORT_CALC;
        Ok(value)
    }
}

impl PostHandler for SortPosts {
    fn handle(&mut self, post: PostingId, _ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        self.flush_state.receive("sort", post);
        self.posts.push(post);
        Ok(())
    }

    fn flush(&mut self, ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        self.flush_state.flush("sort");
        let posts = mem::take(&mut self.posts);
        debug!("sorting {} postings by '{}'", posts.len(), self.sort_order);

        let mut keyed = Vec::with_capacity(posts.len());
        for post in posts {
            keyed.push((self.sort_key(post, ctx)?, post));
        }

        sort_by_key_values(&mut keyed).map_err(|err| ReportError::in_sort_string(self.sort_order.source(), err))?;

        for (_, post) in keyed {
            ctx.post_xdata(post).flags.remove(PostFlags::SORT_CALC);
            self.handler.handle(post, ctx)?;
        }
        self.handler.flush(ctx)
    }
}

/// Maintains the running total, index and count of the stream
pub struct CalcPosts {
    handler: PostHandlerBox,
    last_post: Option<PostingId>,
}

impl CalcPosts {
    /// Create the stage
    pub fn new(handler: PostHandlerBox) -> Self {
        Self { handler, last_post: None }
    }
}

impl PostHandler for CalcPosts {
    fn handle(&mut self, post: PostingId, ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        let (mut total, index, count) = match self.last_post.and_then(|last| ctx.xdata().post(last)) {
            Some(last) => (last.total.clone(), last.index + 1, last.count),
            None => (Balance::new(), 0, 0),
        };
        let amount = ctx.amount_of(post);

        let xdata = ctx.post_xdata(post);
        xdata.index = index;
        if xdata.flags.contains(PostFlags::NO_TOTAL) {
            xdata.count = count;
        } else {
            total += &amount;
            xdata.count = count + 1;
        }
        xdata.total = total;
        trace!("running total after {:?}: {}", post, xdata.total);

        self.last_post = Some(post);
        self.handler.handle(post, ctx)
    }

    fn flush(&mut self, ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        self.handler.flush(ctx)
    }
}

/// Forwards postings with a negated amount overlay
pub struct InvertPosts {
    handler: PostHandlerBox,
}

impl InvertPosts {
    /// Create the stage
    pub fn new(handler: PostHandlerBox) -> Self {
        Self { handler }
    }
}

impl PostHandler for InvertPosts {
    fn handle(&mut self, post: PostingId, ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        let negated = ctx.amount_of(post).negated();
        let xdata = ctx.post_xdata(post);
        xdata.composite_amount = Some(negated);
        xdata.flags |= PostFlags::COMPOSITE;
        self.handler.handle(post, ctx)
    }

    fn flush(&mut self, ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        self.handler.flush(ctx)
    }
}

/// Keeps only the postings of the first `head` and/or last `tail` entries
pub struct TruncateEntries {
    handler: PostHandlerBox,
    flush_state: FlushState,
    head: Option<usize>,
    tail: Option<usize>,
    posts: Vec<PostingId>,
}

impl TruncateEntries {
    /// Create the stage; with neither bound every posting passes
    pub fn new(handler: PostHandlerBox, head: Option<usize>, tail: Option<usize>) -> Self {
        Self { handler, flush_state: FlushState::default(), head, tail, posts: Vec::new() }
    }
}

impl PostHandler for TruncateEntries {
    fn handle(&mut self, post: PostingId, _ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        self.flush_state.receive("truncate", post);
        self.posts.push(post);
        Ok(())
    }

    fn flush(&mut self, ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        self.flush_state.flush("truncate");
        let posts = mem::take(&mut self.posts);

        let mut entries: Vec<EntryId> = Vec::new();
        for post in &posts {
            let entry = ctx.post(*post).entry;
            if !entries.contains(&entry) {
                entries.push(entry);
            }
        }

        let len = entries.len();
        let keep = |position: usize| match (self.head, self.tail) {
            (None, None) => true,
            (head, tail) => {
                head.map_or(false, |head| position < head) || tail.map_or(false, |tail| position >= len.saturating_sub(tail))
            }
        };
        let kept: Vec<EntryId> =
            entries.iter().enumerate().filter(|(position, _)| keep(*position)).map(|(_, entry)| *entry).collect();
        debug!("truncating to {} of {} entries", kept.len(), len);

        for post in posts {
            if kept.contains(&ctx.post(post).entry) {
                self.handler.handle(post, ctx)?;
            }
        }
        self.handler.flush(ctx)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::journal::Journal;

    fn run(handler: &mut dyn PostHandler, ctx: &mut ReportContext<'_>) {
        let posts: Vec<PostingId> = ctx.journal().posts().map(|post| post.id).collect();
        for post in posts {
            handler.handle(post, ctx).unwrap();
        }
        handler.flush(ctx).unwrap();
    }

    #[test]
    fn test_filter_marks_matches() {
        let journal = sample_journal();
        let mut ctx = ReportContext::new(&journal);
        let (sink, collected) = CollectPosts::shared();
        let mut filter = FilterPosts::from_source(sink, "account =~ /^Expenses/").unwrap();
        run(&mut filter, &mut ctx);

        let collected = collected.borrow();
        assert_eq!(collected.len(), 3);
        for post in collected.iter() {
            assert!(ctx.xdata().post(*post).unwrap().flags.contains(PostFlags::MATCHES));
        }
        assert!(ctx.xdata().post(PostingId::Journal(1)).is_none());
    }

    #[test]
    fn test_sort_is_stable() {
        let journal = sample_journal();
        let mut ctx = ReportContext::new(&journal);
        let (sink, collected) = CollectPosts::shared();
        let mut sort = SortPosts::from_source(sink, "payee").unwrap();
        run(&mut sort, &mut ctx);

        let payees: Vec<&str> = collected.borrow().iter().map(|post| ctx.payee_of(*post)).collect();
        assert_eq!(payees, vec!["Grocer", "Grocer", "Grocer", "Grocer", "Landlord", "Landlord"]);
        // Ties keep arrival order
        assert_eq!(
            collected.borrow().as_slice(),
            &[0, 1, 4, 5, 2, 3].map(PostingId::Journal)
        );
        assert!(!ctx.xdata().post(PostingId::Journal(0)).unwrap().flags.contains(PostFlags::SORT_CALC));
    }

    #[test]
    fn test_sort_reports_bad_key() {
        let err = SortPosts::from_source(Box::new(IgnorePosts), "amount +").err().unwrap();
        assert!(err.to_string().starts_with("In sort string 'amount +'"));

        let journal = sample_journal();
        let mut ctx = ReportContext::new(&journal);
        let mut sort = SortPosts::from_source(Box::new(IgnorePosts), "nonsense").unwrap();
        sort.handle(PostingId::Journal(0), &mut ctx).unwrap();
        let err = sort.flush(&mut ctx).unwrap_err();
        assert!(matches!(err, ReportError::SortString { .. }));
    }

    #[test]
    fn test_sort_orders_mixed_commodities() {
        let mut journal = Journal::new();
        journal
            .entry_builder(date(2024, 1, 1), "A")
            .post("Expenses:Fuel", "2 EUR".parse().unwrap())
            .post("Expenses:Food", "$1".parse().unwrap())
            .post("Expenses:Rail", "1 EUR".parse().unwrap())
            .post("Expenses:Misc", "$3".parse().unwrap())
            .add();
        let mut ctx = ReportContext::new(&journal);
        let (sink, collected) = CollectPosts::shared();
        let mut sort = SortPosts::from_source(sink, "amount").unwrap();
        run(&mut sort, &mut ctx);

        let amounts: Vec<String> = collected.borrow().iter().map(|post| ctx.amount_of(*post).to_string()).collect();
        assert_eq!(amounts, vec!["$1", "$3", "1 EUR", "2 EUR"]);
    }

    #[test]
    fn test_sort_rejects_incomparable_kinds() {
        let journal = sample_journal();
        let mut ctx = ReportContext::new(&journal);
        let key = "account == \"Assets:Cash\" ? payee : amount";
        let mut sort = SortPosts::from_source(Box::new(IgnorePosts), key).unwrap();
        let posts: Vec<PostingId> = ctx.journal().posts().map(|post| post.id).collect();
        for post in posts {
            sort.handle(post, &mut ctx).unwrap();
        }
        let err = sort.flush(&mut ctx).unwrap_err();
        assert!(err.to_string().starts_with("In sort string"), "{}", err);
    }

    #[test]
    fn test_calc_running_total() {
        let journal = sample_journal();
        let mut ctx = ReportContext::new(&journal);
        let (sink, collected) = CollectPosts::shared();
        let filter = FilterPosts::from_source(sink, "account =~ /Expenses/").unwrap();
        let mut calc = CalcPosts::new(Box::new(filter));
        run(&mut calc, &mut ctx);

        let totals: Vec<String> = collected
            .borrow()
            .iter()
            .map(|post| ctx.xdata().post(*post).unwrap().total.to_string())
            .collect();
        // Every posting passes through calc, so totals include the cash legs
        assert_eq!(totals.len(), 3);
        let last = ctx.xdata().post(PostingId::Journal(5)).unwrap();
        assert!(last.total.is_zero());
        assert_eq!(last.index, 5);
        assert_eq!(last.count, 6);
    }

    #[test]
    fn test_calc_skips_no_total() {
        let journal = sample_journal();
        let mut ctx = ReportContext::new(&journal);
        ctx.post_xdata(PostingId::Journal(1)).flags |= PostFlags::NO_TOTAL;
        let mut calc = CalcPosts::new(Box::new(IgnorePosts));
        calc.handle(PostingId::Journal(0), &mut ctx).unwrap();
        calc.handle(PostingId::Journal(1), &mut ctx).unwrap();
        calc.flush(&mut ctx).unwrap();

        let second = ctx.xdata().post(PostingId::Journal(1)).unwrap();
        assert_eq!(second.total, Balance::from_amount(&"$10".parse().unwrap()));
        assert_eq!(second.count, 1);
        assert_eq!(second.index, 1);
    }

    #[test]
    fn test_invert_uses_overlay() {
        let journal = sample_journal();
        let mut ctx = ReportContext::new(&journal);
        let mut invert = InvertPosts::new(Box::new(IgnorePosts));
        invert.handle(PostingId::Journal(0), &mut ctx).unwrap();
        assert_eq!(ctx.amount_of(PostingId::Journal(0)), "-$10".parse().unwrap());
        assert_eq!(journal.post(PostingId::Journal(0)).unwrap().amount, "$10".parse().unwrap());
    }

    #[test]
    fn test_set_account_value() {
        let journal = sample_journal();
        let mut ctx = ReportContext::new(&journal);
        let mut stage = SetAccountValue::new(Box::new(IgnorePosts));
        run(&mut stage, &mut ctx);

        let food = journal.find_account("Expenses:Food").unwrap();
        let xdata = ctx.xdata().account(food).unwrap();
        assert_eq!(xdata.value, Balance::from_amount(&"$17".parse().unwrap()));
        assert_eq!(xdata.count, 2);
        assert!(xdata.flags.contains(AccountFlags::HAS_NON_VIRTUALS));
    }

    #[test]
    fn test_truncate_head_and_tail() {
        let journal = sample_journal();
        let mut ctx = ReportContext::new(&journal);
        let (sink, collected) = CollectPosts::shared();
        let mut head = TruncateEntries::new(sink, Some(1), None);
        run(&mut head, &mut ctx);
        assert_eq!(collected.borrow().as_slice(), &[PostingId::Journal(0), PostingId::Journal(1)]);

        let (sink, collected) = CollectPosts::shared();
        let mut tail = TruncateEntries::new(sink, None, Some(1));
        run(&mut tail, &mut ctx);
        assert_eq!(collected.borrow().as_slice(), &[PostingId::Journal(4), PostingId::Journal(5)]);
    }

    #[test]
    #[should_panic(expected = "sort stage received posting Journal(0) after flush")]
    fn test_sort_rejects_posting_after_flush() {
        let journal = sample_journal();
        let mut ctx = ReportContext::new(&journal);
        let mut sort = SortPosts::from_source(Box::new(IgnorePosts), "amount").unwrap();
        sort.flush(&mut ctx).unwrap();
        let _ = sort.handle(PostingId::Journal(0), &mut ctx);
    }

    #[test]
    #[should_panic(expected = "truncate stage flushed twice")]
    fn test_truncate_rejects_double_flush() {
        let journal = sample_journal();
        let mut ctx = ReportContext::new(&journal);
        let mut truncate = TruncateEntries::new(Box::new(IgnorePosts), Some(1), None);
        run(&mut truncate, &mut ctx);
        let _ = truncate.flush(&mut ctx);
    }

    #[test]
    #[should_panic(expected = "flushed twice")]
    fn test_collector_rejects_double_flush() {
        let journal = sample_journal();
        let mut ctx = ReportContext::new(&journal);
        let (mut sink, _) = CollectPosts::shared();
        sink.flush(&mut ctx).unwrap();
        sink.flush(&mut ctx).unwrap();
    }
}
