//! Grouping stages: collapse, related, revaluation, subtotals and buckets

use std::collections::BTreeMap;
use std::mem;

use chrono::{Datelike, NaiveDate};
use compact_str::CompactString;
use indexmap::IndexMap;
use ledger_math::Balance;
use log::{debug, trace};

use super::{handle_value, FlushState, PostHandler, PostHandlerBox, SortPosts};
use crate::context::ReportContext;
use crate::datetime::{weekday_name, DateInterval, DateSpan};
use crate::error::ReportResult;
use crate::expr::{Expression, Value};
use crate::journal::{AccountId, EntryId, PostingId};
use crate::scope::PostScope;
use crate::xdata::{AccountFlags, PostFlags};

/// Merges the postings of each entry into one total per commodity
pub struct CollapsePosts {
    handler: PostHandlerBox,
    flush_state: FlushState,
    subtotal: Balance,
    count: usize,
    last_entry: Option<EntryId>,
    last_post: Option<PostingId>,
}

impl CollapsePosts {
    /// Create the stage
    pub fn new(handler: PostHandlerBox) -> Self {
        Self {
            handler,
            flush_state: FlushState::default(),
            subtotal: Balance::new(),
            count: 0,
            last_entry: None,
            last_post: None,
        }
    }

    fn report_subtotal(&mut self, ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        let (Some(last_entry), Some(last_post)) = (self.last_entry, self.last_post) else {
            return Ok(());
        };

        if self.count == 1 {
            self.handler.handle(last_post, ctx)?;
        } else {
            let source = ctx.entry(last_entry);
            let (date, payee) = (source.date, source.payee.clone());
            let entry = ctx.create_entry(date, &payee);
            let totals = ctx.temp_account("<Total>");
            handle_value(&self.subtotal, totals, entry, PostFlags::empty(), None, self.handler.as_mut(), ctx)?;
        }

        self.subtotal = Balance::new();
        self.count = 0;
        Ok(())
    }
}

impl PostHandler for CollapsePosts {
    fn handle(&mut self, post: PostingId, ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        self.flush_state.receive("collapse", post);
        let entry = ctx.post(post).entry;
        if self.count > 0 && self.last_entry != Some(entry) {
            self.report_subtotal(ctx)?;
        }

        self.subtotal += &ctx.amount_of(post);
        self.count += 1;
        self.last_entry = Some(entry);
        self.last_post = Some(post);
        Ok(())
    }

    fn flush(&mut self, ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        self.flush_state.flush("collapse");
        if self.count > 0 {
            self.report_subtotal(ctx)?;
        }
        self.handler.flush(ctx)
    }
}

/// Replaces matched postings by the other postings of their entries
pub struct RelatedPosts {
    handler: PostHandlerBox,
    flush_state: FlushState,
    posts: Vec<PostingId>,
    also_matching: bool,
}

impl RelatedPosts {
    /// Create the stage; with `also_matching` the received postings are
    /// reported alongside their siblings
    pub fn new(handler: PostHandlerBox, also_matching: bool) -> Self {
        Self { handler, flush_state: FlushState::default(), posts: Vec::new(), also_matching }
    }
}

impl PostHandler for RelatedPosts {
    fn handle(&mut self, post: PostingId, ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        self.flush_state.receive("related", post);
        ctx.post_xdata(post).flags |= PostFlags::RECEIVED;
        self.posts.push(post);
        Ok(())
    }

    fn flush(&mut self, ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        self.flush_state.flush("related");
        let posts = mem::take(&mut self.posts);
        debug!("emitting siblings of {} postings", posts.len());

        for post in posts {
            let entry = ctx.post(post).entry;
            let siblings: Vec<PostingId> = ctx.entry(entry).postings.to_vec();
            for sibling in siblings {
                let flags = ctx.xdata().post(sibling).map(|xdata| xdata.flags).unwrap_or_default();
                if flags.contains(PostFlags::HANDLED) {
                    continue;
                }
                let wanted = if flags.contains(PostFlags::RECEIVED) {
                    self.also_matching
                } else {
                    let posting = ctx.post(sibling);
                    !posting.is_virtual() && !posting.is_generated()
                };
                if wanted {
                    ctx.post_xdata(sibling).flags |= PostFlags::HANDLED;
                    self.handler.handle(sibling, ctx)?;
                }
            }
        }
        self.handler.flush(ctx)
    }
}

/// Emits a synthetic posting whenever the market value of the running
/// total changes between two postings
///
/// Running totals must already be computed upstream by a calc stage.
pub struct ChangedValuePosts {
    handler: PostHandlerBox,
    total_expr: Expression,
    changed_values_only: bool,
    last_post: Option<PostingId>,
    last_balance: Balance,
}

impl ChangedValuePosts {
    /// Create the stage; `total_expr` reads the running total of a posting
    pub fn new(handler: PostHandlerBox, total_expr: Expression, changed_values_only: bool) -> Self {
        Self { handler, total_expr, changed_values_only, last_post: None, last_balance: Balance::new() }
    }

    fn revalued_total(&self, post: PostingId, date: NaiveDate, ctx: &ReportContext<'_>) -> ReportResult<Balance> {
        let total = self.total_expr.evaluate(&PostScope::new(ctx, post))?.to_balance()?;
        Ok(match ctx.prices() {
            Some(prices) => total.value(prices, date),
            None => total,
        })
    }

    fn output_diff(&mut self, date: NaiveDate, ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        let Some(last_post) = self.last_post else {
            return Ok(());
        };
        let current = self.revalued_total(last_post, date, ctx)?;
        let diff = &current - &self.last_balance;
        if diff.is_zero() {
            return Ok(());
        }

        debug!("value of running total changed by {} on {}", diff, date);
        let entry = ctx.create_entry(date, "Commodities revalued");
        let account = ctx.temp_account("<Revalued>");
        for amount in diff.amounts().cloned().collect::<Vec<_>>() {
            let post = ctx.create_post(entry, account, amount);
            let xdata = ctx.post_xdata(post);
            xdata.flags |= PostFlags::NO_TOTAL;
            xdata.total = current.clone();
            self.handler.handle(post, ctx)?;
        }
        self.last_balance = current;
        Ok(())
    }
}

impl PostHandler for ChangedValuePosts {
    fn handle(&mut self, post: PostingId, ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        let date = ctx.date_of(post);
        self.output_diff(date, ctx)?;

        if self.changed_values_only {
            ctx.post_xdata(post).flags |= PostFlags::DISPLAYED;
        }
        self.handler.handle(post, ctx)?;

        self.last_balance = self.revalued_total(post, date, ctx)?;
        self.last_post = Some(post);
        Ok(())
    }

    fn flush(&mut self, ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        if self.last_post.is_some() {
            let today = ctx.today();
            self.output_diff(today, ctx)?;
            self.last_post = None;
        }
        self.handler.flush(ctx)
    }
}

/// Per-account accumulator shared by the subtotalling stages
#[derive(Debug, Default)]
pub struct SubtotalState {
    values: BTreeMap<CompactString, (AccountId, Balance)>,
    start: Option<NaiveDate>,
    finish: Option<NaiveDate>,
}

impl SubtotalState {
    /// Create an empty accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether nothing has been added since the last report
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Earliest and latest dates seen, as a span
    pub fn span(&self) -> Option<DateSpan> {
        Some(DateSpan::new(self.start?, self.finish?))
    }

    /// Accumulate a posting under its reported account
    pub fn add(&mut self, post: PostingId, ctx: &mut ReportContext<'_>) {
        let date = ctx.date_of(post);
        self.start = Some(self.start.map_or(date, |start| start.min(date)));
        self.finish = Some(self.finish.map_or(date, |finish| finish.max(date)));

        let account = ctx.reported_account(post);
        let amount = ctx.amount_of(post);
        let fullname = CompactString::from(ctx.fullname(account));
        let (_, balance) = self.values.entry(fullname).or_insert_with(|| (account, Balance::new()));
        *balance += &amount;

        let is_virtual = ctx.post(post).is_virtual();
        ctx.account_xdata(account).flags |=
            if is_virtual { AccountFlags::HAS_UNB_VIRTUALS } else { AccountFlags::HAS_NON_VIRTUALS };
    }

    /// Emit one synthetic entry holding every accumulated account total
    ///
    /// The entry is dated at the start of `span` (by default the dates
    /// seen) and its payee is `payee`, or `- <span end>` when none is given.
    pub fn report(
        &mut self,
        ctx: &mut ReportContext<'_>,
        payee: Option<&str>,
        span: Option<DateSpan>,
        handler: &mut dyn PostHandler,
    ) -> ReportResult<()> {
        let Some(span) = span.or_else(|| self.span()) else {
            return Ok(());
        };
        let values = mem::take(&mut self.values);
        self.start = None;
        self.finish = None;
        if values.is_empty() {
            return Ok(());
        }

        let payee = match payee {
            Some(payee) => payee.to_string(),
            None => format!("- {}", span.end),
        };
        trace!("subtotal '{}' over {} with {} accounts", payee, span, values.len());
        let entry = ctx.create_entry(span.begin, &payee);
        if let Some(entry) = ctx.temps_mut().entry_mut(entry) {
            entry.span = Some(span);
        }

        for (_, (account, balance)) in values {
            handle_value(&balance, account, entry, PostFlags::empty(), None, handler, ctx)?;
        }
        Ok(())
    }
}

/// Totals every account over the whole stream
pub struct SubtotalPosts {
    handler: PostHandlerBox,
    flush_state: FlushState,
    state: SubtotalState,
}

impl SubtotalPosts {
    /// Create the stage
    pub fn new(handler: PostHandlerBox) -> Self {
        Self { handler, flush_state: FlushState::default(), state: SubtotalState::new() }
    }
}

impl PostHandler for SubtotalPosts {
    fn handle(&mut self, post: PostingId, ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        self.flush_state.receive("subtotal", post);
        self.state.add(post, ctx);
        Ok(())
    }

    fn flush(&mut self, ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        self.flush_state.flush("subtotal");
        if !self.state.is_empty() {
            self.state.report(ctx, None, None, self.handler.as_mut())?;
        }
        self.handler.flush(ctx)
    }
}

/// Subtotals postings per calendar period
///
/// Periods between the first and last posting that received nothing still
/// produce a zero posting against `<None>`.
pub struct IntervalPosts {
    handler: PostHandlerBox,
    flush_state: FlushState,
    interval: DateInterval,
    state: SubtotalState,
    bucket: Option<NaiveDate>,
}

impl IntervalPosts {
    /// Create the stage
    pub fn new(handler: PostHandlerBox, interval: DateInterval) -> Self {
        Self { handler, flush_state: FlushState::default(), interval, state: SubtotalState::new(), bucket: None }
    }

    /// Create the stage, sorting each bucket's output by `sort_order`
    pub fn with_sort(handler: PostHandlerBox, interval: DateInterval, sort_order: Option<&str>) -> ReportResult<Self> {
        let handler: PostHandlerBox = match sort_order {
            Some(source) if !source.trim().is_empty() => Box::new(SortPosts::from_source(handler, source)?),
            _ => handler,
        };
        Ok(Self::new(handler, interval))
    }

    fn close_bucket(&mut self, begin: NaiveDate, next: Option<NaiveDate>, ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        let span = match next {
            Some(next) => Some(DateSpan::from_bucket(begin, next)),
            None => self.state.span(),
        };
        debug!("closing bucket starting {}", begin);
        self.state.report(ctx, None, span, self.handler.as_mut())
    }

    fn report_empty(&mut self, begin: NaiveDate, next: NaiveDate, ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        let span = DateSpan::from_bucket(begin, next);
        trace!("empty bucket {}", span);
        let entry = ctx.create_entry(begin, &format!("- {}", span.end));
        if let Some(entry) = ctx.temps_mut().entry_mut(entry) {
            entry.span = Some(span);
        }
        let none = ctx.temp_account("<None>");
        handle_value(&Balance::new(), none, entry, PostFlags::empty(), None, self.handler.as_mut(), ctx)
    }
}

impl PostHandler for IntervalPosts {
    fn handle(&mut self, post: PostingId, ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        self.flush_state.receive("interval", post);
        let date = ctx.date_of(post);
        if !self.interval.contains(date) {
            return Ok(());
        }
        if self.interval.period.is_none() {
            return self.handler.handle(post, ctx);
        }

        match self.bucket {
            None => {
                // Leading periods before the first posting are skipped
                let mut begin = self.interval.first_bucket(date);
                while let Some(next) = self.interval.increment(begin) {
                    if date < next {
                        break;
                    }
                    begin = next;
                }
                self.bucket = Some(begin);
            }
            Some(begin) => {
                if let Some(next) = self.interval.increment(begin) {
                    if date >= next {
                        self.close_bucket(begin, Some(next), ctx)?;
                        let mut begin = next;
                        while let Some(next) = self.interval.increment(begin) {
                            if date < next {
                                break;
                            }
                            self.report_empty(begin, next, ctx)?;
                            begin = next;
                        }
                        self.bucket = Some(begin);
                    }
                }
            }
        }

        self.state.add(post, ctx);
        Ok(())
    }

    fn flush(&mut self, ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        self.flush_state.flush("interval");
        if let Some(begin) = self.bucket.take() {
            if !self.state.is_empty() {
                let next = self.interval.increment(begin);
                self.close_bucket(begin, next, ctx)?;
            }
        }
        self.handler.flush(ctx)
    }
}

/// Subtotals postings per payee, in order of first appearance
pub struct ByPayeePosts {
    handler: PostHandlerBox,
    flush_state: FlushState,
    payees: IndexMap<CompactString, SubtotalState>,
}

impl ByPayeePosts {
    /// Create the stage
    pub fn new(handler: PostHandlerBox) -> Self {
        Self { handler, flush_state: FlushState::default(), payees: IndexMap::new() }
    }
}

impl PostHandler for ByPayeePosts {
    fn handle(&mut self, post: PostingId, ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        self.flush_state.receive("by_payee", post);
        let payee = CompactString::from(ctx.payee_of(post));
        self.payees.entry(payee).or_default().add(post, ctx);
        Ok(())
    }

    fn flush(&mut self, ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        self.flush_state.flush("by_payee");
        let payees = mem::take(&mut self.payees);
        debug!("reporting {} payee groups", payees.len());
        for (payee, mut state) in payees {
            state.report(ctx, Some(&payee), None, self.handler.as_mut())?;
        }
        self.handler.flush(ctx)
    }
}

/// Subtotals postings by day of the week, Sunday first
pub struct DowPosts {
    handler: PostHandlerBox,
    flush_state: FlushState,
    days: [Vec<PostingId>; 7],
}

impl DowPosts {
    /// Create the stage
    pub fn new(handler: PostHandlerBox) -> Self {
        Self { handler, flush_state: FlushState::default(), days: Default::default() }
    }
}

impl PostHandler for DowPosts {
    fn handle(&mut self, post: PostingId, ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        self.flush_state.receive("dow", post);
        let weekday = ctx.date_of(post).weekday().num_days_from_sunday() as usize;
        self.days[weekday].push(post);
        Ok(())
    }

    fn flush(&mut self, ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        self.flush_state.flush("dow");
        for (index, day) in self.days.iter_mut().enumerate() {
            let posts = mem::take(day);
            if posts.is_empty() {
                continue;
            }
            let mut state = SubtotalState::new();
            for post in posts {
                state.add(post, ctx);
            }
            let payee = format!("{}s", weekday_name(index));
            state.report(ctx, Some(&payee), None, self.handler.as_mut())?;
        }
        self.handler.flush(ctx)
    }
}

/// Which field [`TransferDetails`] rewrites
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    /// Replace the entry's payee
    SetPayee,
    /// Move the posting to an account named by the value
    SetAccount,
}

/// Rewrites a detail of each posting from an expression, on private copies
pub struct TransferDetails {
    handler: PostHandlerBox,
    kind: TransferKind,
    expr: Expression,
}

impl TransferDetails {
    /// Create the stage
    pub fn new(handler: PostHandlerBox, kind: TransferKind, expr: Expression) -> Self {
        Self { handler, kind, expr }
    }

    /// Report each posting's commodity as its payee
    pub fn comm_as_payee(handler: PostHandlerBox) -> Self {
        Self::new(handler, TransferKind::SetPayee, Expression::identifier("commodity"))
    }

    /// Report each entry's code as its payee
    pub fn code_as_payee(handler: PostHandlerBox) -> Self {
        Self::new(handler, TransferKind::SetPayee, Expression::identifier("code"))
    }

    /// Report each posting under an account named after its payee
    pub fn payee_as_account(handler: PostHandlerBox) -> Self {
        Self::new(handler, TransferKind::SetAccount, Expression::identifier("payee"))
    }

    /// Report each posting under an account named after its commodity
    pub fn comm_as_account(handler: PostHandlerBox) -> Self {
        Self::new(handler, TransferKind::SetAccount, Expression::identifier("commodity"))
    }
}

impl PostHandler for TransferDetails {
    fn handle(&mut self, post: PostingId, ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        let text = match self.expr.evaluate(&PostScope::new(ctx, post))? {
            Value::Null => String::new(),
            value => value.to_string(),
        };
        let text = if text.is_empty() { "<none>".to_string() } else { text };

        let date = ctx.date_of(post);
        let source = ctx.post(post).entry;
        let entry = ctx.copy_entry(source);
        if let Some(copy) = ctx.temps_mut().entry_mut(entry) {
            copy.date = date;
            if self.kind == TransferKind::SetPayee {
                copy.payee = CompactString::from(text.as_str());
            }
        }

        let copy = match self.kind {
            TransferKind::SetPayee => ctx.copy_post(post, entry),
            TransferKind::SetAccount => {
                let account = ctx.temp_account(&text);
                ctx.copy_post_to(post, entry, account)
            }
        };

        let mut xdata = ctx.xdata().post(post).cloned().unwrap_or_default();
        xdata.flags.remove(PostFlags::RECEIVED | PostFlags::HANDLED);
        xdata.composite_amount = Some(ctx.amount_of(post));
        xdata.flags |= PostFlags::COMPOSITE;
        if self.kind == TransferKind::SetAccount {
            xdata.reported_account = None;
        }
        *ctx.post_xdata(copy) = xdata;

        self.handler.handle(copy, ctx)
    }

    fn flush(&mut self, ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        self.handler.flush(ctx)
    }
}
