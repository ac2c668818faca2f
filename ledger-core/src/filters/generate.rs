//! Stages that materialise periodic templates
//!
//! Every template posting of a periodic entry becomes one pending item
//! with its own recurrence cursor, so templates with different periods
//! advance independently.

use chrono::{Months, NaiveDate};
use ledger_math::Amount;
use log::{debug, trace, warn};

use super::{PostHandler, PostHandlerBox};
use crate::context::ReportContext;
use crate::datetime::DateInterval;
use crate::error::ReportResult;
use crate::expr::ItemPredicate;
use crate::journal::{AccountId, PeriodicEntry, PostingId};
use crate::scope::PostScope;
use crate::xdata::PostFlags;

bitflags::bitflags! {
    /// Which postings a budget report passes on
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BudgetFlags: u8 {
        /// Postings to budgeted accounts, preceded by the budget items due
        const BUDGETED = 0x01;
        /// Postings to accounts with no budget
        const UNBUDGETED = 0x02;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cursor {
    Unstarted,
    At(NaiveDate),
    Exhausted,
}

#[derive(Debug, Clone)]
struct PendingPost {
    interval: DateInterval,
    account: AccountId,
    amount: Amount,
    cursor: Cursor,
}

impl PendingPost {
    fn advance(&mut self, from: NaiveDate) {
        self.cursor = match self.interval.increment(from) {
            Some(next) => Cursor::At(next),
            None => {
                warn!("period of template for {:?} does not advance past {}", self.account, from);
                Cursor::Exhausted
            }
        };
    }
}

fn pending_posts(periodic: &[PeriodicEntry]) -> Vec<PendingPost> {
    periodic
        .iter()
        .flat_map(|entry| {
            entry.posts.iter().map(|template| PendingPost {
                interval: entry.period.clone(),
                account: template.account,
                amount: template.amount.clone(),
                cursor: Cursor::Unstarted,
            })
        })
        .collect()
}

fn materialize(pending: &PendingPost, date: NaiveDate, payee: &str, negate: bool, ctx: &mut ReportContext<'_>) -> PostingId {
    let entry = ctx.create_entry(date, payee);
    let amount = if negate { pending.amount.negated() } else { pending.amount.clone() };
    trace!("{} on {}: {}", payee, date, amount);
    ctx.create_post(entry, pending.account, amount)
}

/// Passes actual postings through, then adds every template occurrence
/// due before `until`
pub struct GeneratePosts {
    handler: PostHandlerBox,
    pending: Vec<PendingPost>,
    until: NaiveDate,
}

impl GeneratePosts {
    /// Create the stage over the templates of `periodic`
    pub fn new(handler: PostHandlerBox, periodic: &[PeriodicEntry], until: NaiveDate) -> Self {
        Self { handler, pending: pending_posts(periodic), until }
    }
}

impl PostHandler for GeneratePosts {
    fn handle(&mut self, post: PostingId, ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        self.handler.handle(post, ctx)
    }

    fn flush(&mut self, ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        let today = ctx.today();
        let mut due: Vec<(NaiveDate, usize)> = Vec::new();
        for (index, pending) in self.pending.iter_mut().enumerate() {
            let mut date = pending.interval.first_bucket(today);
            while date < self.until && pending.interval.contains(date) {
                due.push((date, index));
                match pending.interval.increment(date) {
                    Some(next) => date = next,
                    None => break,
                }
            }
            pending.cursor = Cursor::Exhausted;
        }
        due.sort_by_key(|(date, _)| *date);
        debug!("generating {} template postings before {}", due.len(), self.until);

        for (date, index) in due {
            let post = materialize(&self.pending[index], date, "Generated entry", false, ctx);
            self.handler.handle(post, ctx)?;
        }
        self.handler.flush(ctx)
    }
}

/// Sorts postings into budgeted and unbudgeted ones and interleaves the
/// budget items that fall due
pub struct BudgetPosts {
    handler: PostHandlerBox,
    pending: Vec<PendingPost>,
    flags: BudgetFlags,
}

impl BudgetPosts {
    /// Create the stage over the templates of `periodic`
    pub fn new(handler: PostHandlerBox, periodic: &[PeriodicEntry], flags: BudgetFlags) -> Self {
        Self { handler, pending: pending_posts(periodic), flags }
    }

    /// Budget account covering `account`, searching templates in order
    fn budget_account(&self, account: AccountId, ctx: &ReportContext<'_>) -> Option<AccountId> {
        for pending in &self.pending {
            let mut current = Some(account);
            while let Some(id) = current {
                if id == pending.account {
                    return Some(id);
                }
                current = ctx.account(id).parent;
            }
        }
        None
    }

    /// Emit every budget item due strictly before `moment`, earliest first
    fn report_budget_items(&mut self, moment: NaiveDate, ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        loop {
            let mut earliest: Option<(usize, NaiveDate)> = None;
            for (index, pending) in self.pending.iter_mut().enumerate() {
                if pending.cursor == Cursor::Unstarted {
                    pending.cursor = Cursor::At(pending.interval.first_bucket(moment));
                }
                let Cursor::At(begin) = pending.cursor else {
                    continue;
                };
                if begin < moment && !pending.interval.is_past(begin) && earliest.map_or(true, |(_, date)| begin < date) {
                    earliest = Some((index, begin));
                }
            }

            let Some((index, begin)) = earliest else {
                return Ok(());
            };
            let post = materialize(&self.pending[index], begin, "Budget entry", true, ctx);
            self.pending[index].advance(begin);
            self.handler.handle(post, ctx)?;
        }
    }
}

impl PostHandler for BudgetPosts {
    fn handle(&mut self, post: PostingId, ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        let account = ctx.post(post).account;
        match self.budget_account(account, ctx) {
            Some(budget) => {
                if !self.flags.contains(BudgetFlags::BUDGETED) {
                    return Ok(());
                }
                if budget != account {
                    ctx.post_xdata(post).reported_account = Some(budget);
                }
                let date = ctx.date_of(post);
                self.report_budget_items(date, ctx)?;
                self.handler.handle(post, ctx)
            }
            None if self.flags.contains(BudgetFlags::UNBUDGETED) => self.handler.handle(post, ctx),
            None => Ok(()),
        }
    }

    fn flush(&mut self, ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        self.handler.flush(ctx)
    }
}

/// Projects periodic templates into the future while a predicate holds
///
/// Generated postings are forwarded before the predicate is checked; a
/// downstream filter marks the ones it accepts. Generation stops at the
/// first accepted posting that fails the predicate, once every template
/// has produced a posting nobody accepted, or five years past today.
pub struct ForecastPosts {
    handler: PostHandlerBox,
    pending: Vec<PendingPost>,
    predicate: ItemPredicate,
}

impl ForecastPosts {
    /// Create the stage over the templates of `periodic`
    pub fn new(handler: PostHandlerBox, periodic: &[PeriodicEntry], predicate: ItemPredicate) -> Self {
        Self { handler, pending: pending_posts(periodic), predicate }
    }

    fn start_cursors(&mut self, today: NaiveDate) {
        for pending in &mut self.pending {
            match pending.interval.start {
                None => {
                    let begin = pending.interval.first_bucket(today);
                    pending.advance(begin);
                }
                Some(start) => {
                    pending.cursor = Cursor::At(start);
                    while let Cursor::At(begin) = pending.cursor {
                        if begin >= today {
                            break;
                        }
                        pending.advance(begin);
                    }
                }
            }
        }
    }
}

impl PostHandler for ForecastPosts {
    fn handle(&mut self, post: PostingId, ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        self.handler.handle(post, ctx)
    }

    fn flush(&mut self, ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        let today = ctx.today();
        let horizon = today.checked_add_months(Months::new(60)).unwrap_or(NaiveDate::MAX);
        self.start_cursors(today);

        let mut passed: Vec<usize> = Vec::new();
        let mut generated = 0usize;
        loop {
            let least = self
                .pending
                .iter()
                .enumerate()
                .filter_map(|(index, pending)| match pending.cursor {
                    Cursor::At(date) => Some((index, date)),
                    _ => None,
                })
                .min_by_key(|(_, date)| *date);
            let Some((index, begin)) = least else {
                break;
            };

            if self.pending[index].interval.is_past(begin) {
                self.pending[index].cursor = Cursor::Exhausted;
                passed.retain(|passed| *passed != index);
                continue;
            }
            if begin > horizon {
                break;
            }

            let post = materialize(&self.pending[index], begin, "Forecast entry", false, ctx);
            self.pending[index].advance(begin);
            self.handler.handle(post, ctx)?;
            generated += 1;

            let matched = ctx.xdata().post(post).map_or(false, |xdata| xdata.flags.contains(PostFlags::MATCHES));
            if matched {
                if !self.predicate.matches(&PostScope::new(ctx, post))? {
                    break;
                }
                passed.clear();
            } else if !passed.contains(&index) {
                passed.push(index);
                let live = self.pending.iter().filter(|pending| pending.cursor != Cursor::Exhausted).count();
                if passed.len() >= live {
                    break;
                }
            }
        }
        debug!("forecast generated {} postings", generated);
        self.handler.flush(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::date;
    use super::super::{CollectPosts, FilterPosts};
    use super::*;
    use crate::datetime::{parse_period, Period};
    use crate::journal::Journal;

    fn feed(handler: &mut dyn PostHandler, ctx: &mut ReportContext<'_>) {
        let posts: Vec<PostingId> = ctx.journal().posts().map(|post| post.id).collect();
        for post in posts {
            handler.handle(post, ctx).unwrap();
        }
        handler.flush(ctx).unwrap();
    }

    fn dates(ctx: &ReportContext<'_>, posts: &[PostingId]) -> Vec<NaiveDate> {
        posts.iter().map(|post| ctx.date_of(*post)).collect()
    }

    #[test]
    fn test_generate_interleaves_templates() {
        let mut journal = Journal::new();
        journal.add_period_entry(
            DateInterval::from_period(Period::Monthly(1)).with_start(date(2024, 1, 1)),
            vec![("Expenses:Rent", "$500".parse().unwrap())],
        );
        journal.add_period_entry(
            DateInterval::from_period(Period::Quarterly(1)).with_start(date(2024, 1, 15)),
            vec![("Expenses:Insurance", "$90".parse().unwrap())],
        );
        let mut ctx = ReportContext::new(&journal);
        let (sink, collected) = CollectPosts::shared();
        let mut generate = GeneratePosts::new(sink, journal.period_entries(), date(2024, 4, 1));
        feed(&mut generate, &mut ctx);

        let collected = collected.borrow();
        assert_eq!(
            dates(&ctx, &collected),
            vec![date(2024, 1, 1), date(2024, 1, 15), date(2024, 2, 1), date(2024, 3, 1)]
        );
        assert!(collected.iter().all(|post| ctx.post(*post).is_generated()));
    }

    fn budget_journal() -> Journal {
        let mut journal = Journal::new();
        journal.add_period_entry(
            parse_period("monthly from 2024-01-01").unwrap(),
            vec![("Expenses:Food", "$100".parse().unwrap())],
        );
        journal
            .entry_builder(date(2024, 2, 10), "Grocer")
            .post("Expenses:Food:Groceries", "$30".parse().unwrap())
            .add();
        journal
            .entry_builder(date(2024, 2, 12), "Landlord")
            .post("Expenses:Rent", "$500".parse().unwrap())
            .add();
        journal
    }

    #[test]
    fn test_budget_reports_due_items() {
        let journal = budget_journal();
        let mut ctx = ReportContext::new(&journal);
        let (sink, collected) = CollectPosts::shared();
        let mut budget = BudgetPosts::new(sink, journal.period_entries(), BudgetFlags::BUDGETED);
        feed(&mut budget, &mut ctx);

        let collected = collected.borrow();
        assert_eq!(collected.len(), 3);
        assert_eq!(dates(&ctx, &collected[..2]), vec![date(2024, 1, 1), date(2024, 2, 1)]);
        assert_eq!(ctx.payee_of(collected[0]), "Budget entry");
        assert_eq!(ctx.amount_of(collected[0]), "-$100".parse().unwrap());

        let groceries = collected[2];
        assert_eq!(groceries, PostingId::Journal(0));
        assert_eq!(ctx.fullname(ctx.reported_account(groceries)), "Expenses:Food");
    }

    #[test]
    fn test_unbudgeted_only() {
        let journal = budget_journal();
        let mut ctx = ReportContext::new(&journal);
        let (sink, collected) = CollectPosts::shared();
        let mut budget = BudgetPosts::new(sink, journal.period_entries(), BudgetFlags::UNBUDGETED);
        feed(&mut budget, &mut ctx);
        assert_eq!(collected.borrow().as_slice(), &[PostingId::Journal(1)]);
    }

    fn forecast_journal() -> Journal {
        let mut journal = Journal::new();
        journal.add_period_entry(
            DateInterval::from_period(Period::Monthly(1)),
            vec![("Expenses:Rent", "$500".parse().unwrap())],
        );
        journal
    }

    #[test]
    fn test_forecast_stops_on_first_rejection() {
        let journal = forecast_journal();
        let mut ctx = ReportContext::new(&journal).with_today(date(2024, 3, 15));
        let (sink, collected) = CollectPosts::shared();
        let source = "date < [2024-06-01]";
        let filter = FilterPosts::from_source(sink, source).unwrap();
        let mut forecast =
            ForecastPosts::new(Box::new(filter), journal.period_entries(), ItemPredicate::new(source).unwrap());
        feed(&mut forecast, &mut ctx);

        let collected = collected.borrow();
        assert_eq!(dates(&ctx, &collected), vec![date(2024, 4, 1), date(2024, 5, 1)]);
        assert_eq!(ctx.payee_of(collected[0]), "Forecast entry");
    }

    #[test]
    fn test_forecast_horizon() {
        let journal = forecast_journal();
        let mut ctx = ReportContext::new(&journal).with_today(date(2024, 3, 15));
        let (sink, collected) = CollectPosts::shared();
        let filter = FilterPosts::new(sink, ItemPredicate::always());
        let mut forecast = ForecastPosts::new(Box::new(filter), journal.period_entries(), ItemPredicate::always());
        feed(&mut forecast, &mut ctx);

        let collected = collected.borrow();
        assert_eq!(collected.len(), 60);
        assert_eq!(ctx.date_of(collected[59]), date(2029, 3, 1));
    }

    #[test]
    fn test_forecast_respects_interval_end() {
        let mut journal = Journal::new();
        journal.add_period_entry(
            parse_period("monthly from 2024-01-01 to 2024-06-01").unwrap(),
            vec![("Expenses:Rent", "$500".parse().unwrap())],
        );
        let mut ctx = ReportContext::new(&journal).with_today(date(2024, 3, 15));
        let (sink, collected) = CollectPosts::shared();
        let filter = FilterPosts::new(sink, ItemPredicate::always());
        let mut forecast = ForecastPosts::new(Box::new(filter), journal.period_entries(), ItemPredicate::always());
        feed(&mut forecast, &mut ctx);
        assert_eq!(dates(&ctx, &collected.borrow()), vec![date(2024, 4, 1), date(2024, 5, 1)]);
    }
}
