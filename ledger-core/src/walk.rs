//! Walking postings and accounts
//!
//! Drivers that feed journal postings into a handler chain, plus the
//! account-side counterpart: subtree totals, sorted child views and a
//! depth-first traversal into an [`AccountHandler`] chain.

use std::cell::RefCell;
use std::rc::Rc;

use log::{debug, trace};

use crate::context::ReportContext;
use crate::error::{ReportError, ReportResult};
use crate::expr::op::sort_by_key_values;
use crate::expr::{Expression, ItemPredicate, Value};
use crate::filters::PostHandler;
use crate::journal::{AccountId, EntryId, PostingId};
use crate::scope::AccountScope;
use crate::xdata::AccountFlags;

/// Feed `posts` in order into `handler`, then flush it
pub fn walk_posts(posts: &[PostingId], handler: &mut dyn PostHandler, ctx: &mut ReportContext<'_>) -> ReportResult<()> {
    for post in posts {
        handler.handle(*post, ctx)?;
    }
    handler.flush(ctx)
}

/// Feed every posting of `entries` in order into `handler`, then flush it
pub fn walk_entries(entries: &[EntryId], handler: &mut dyn PostHandler, ctx: &mut ReportContext<'_>) -> ReportResult<()> {
    for entry in entries {
        let posts: Vec<PostingId> = ctx.entry(*entry).postings.to_vec();
        for post in posts {
            handler.handle(post, ctx)?;
        }
    }
    handler.flush(ctx)
}

/// Feed every journal posting in entry order into `handler`, then flush it
pub fn walk_journal(handler: &mut dyn PostHandler, ctx: &mut ReportContext<'_>) -> ReportResult<()> {
    let entries: Vec<EntryId> = ctx.journal().entries().map(|entry| entry.id).collect();
    debug!("walking {} entries", entries.len());
    walk_entries(&entries, handler, ctx)
}

/// Forget every extra-data record of the run
pub fn clear_all_xdata(ctx: &mut ReportContext<'_>) {
    ctx.xdata_mut().reset_all();
}

/// A stage of the account pipeline
pub trait AccountHandler {
    /// Receive one account
    fn handle(&mut self, account: AccountId, ctx: &mut ReportContext<'_>) -> ReportResult<()>;

    /// Drain buffered state, then flush downstream
    fn flush(&mut self, ctx: &mut ReportContext<'_>) -> ReportResult<()>;
}

/// Owned downstream account stage
pub type AccountHandlerBox = Box<dyn AccountHandler>;

/// Account ids recorded by a [`CollectAccounts`] sink
pub type SharedAccounts = Rc<RefCell<Vec<AccountId>>>;

/// Drops every account
#[derive(Debug, Default)]
pub struct IgnoreAccounts;

impl AccountHandler for IgnoreAccounts {
    fn handle(&mut self, _account: AccountId, _ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        Ok(())
    }

    fn flush(&mut self, _ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        Ok(())
    }
}

/// Terminal sink recording the accounts it receives
#[derive(Debug)]
pub struct CollectAccounts {
    accounts: SharedAccounts,
}

impl CollectAccounts {
    /// A boxed collector and the handle to read its results
    pub fn shared() -> (AccountHandlerBox, SharedAccounts) {
        let accounts = SharedAccounts::default();
        (Box::new(Self { accounts: Rc::clone(&accounts) }), accounts)
    }
}

impl AccountHandler for CollectAccounts {
    fn handle(&mut self, account: AccountId, _ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        self.accounts.borrow_mut().push(account);
        Ok(())
    }

    fn flush(&mut self, _ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        Ok(())
    }
}

/// Forwards accounts accepted by a predicate, marking them for display
pub struct FilterAccounts {
    handler: AccountHandlerBox,
    predicate: ItemPredicate,
}

impl FilterAccounts {
    /// Create the stage
    pub fn new(handler: AccountHandlerBox, predicate: ItemPredicate) -> Self {
        Self { handler, predicate }
    }

    /// Compile `source` and create the stage
    pub fn from_source(handler: AccountHandlerBox, source: &str) -> ReportResult<Self> {
        Ok(Self::new(handler, ItemPredicate::new(source)?))
    }
}

impl AccountHandler for FilterAccounts {
    fn handle(&mut self, account: AccountId, ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        if self.predicate.matches(&AccountScope::new(ctx, account))? {
            ctx.account_xdata(account).flags |= AccountFlags::TO_DISPLAY;
            self.handler.handle(account, ctx)?;
        }
        Ok(())
    }

    fn flush(&mut self, ctx: &mut ReportContext<'_>) -> ReportResult<()> {
        self.handler.flush(ctx)
    }
}

/// Compute subtree totals bottom-up
///
/// An account's total is its own value plus the totals of all its
/// children. Results are memoized for the run; later calls return
/// immediately.
pub fn sum_accounts(account: AccountId, ctx: &mut ReportContext<'_>) {
    if ctx.xdata().account(account).map_or(false, |xdata| xdata.flags.contains(AccountFlags::SUMMED)) {
        return;
    }

    let children: Vec<AccountId> = ctx.account(account).children.values().copied().collect();
    let xdata = ctx.account_xdata(account);
    let mut total = xdata.value.clone();
    let mut total_count = xdata.count;

    for child in children {
        sum_accounts(child, ctx);
        if let Some(child) = ctx.xdata().account(child) {
            total += &child.total;
            total_count += child.total_count;
        }
    }

    trace!("subtree total of {}: {}", ctx.fullname(account), total);
    let xdata = ctx.account_xdata(account);
    xdata.total = total;
    xdata.total_count = total_count;
    xdata.flags |= AccountFlags::SUMMED;
}

fn account_sort_key(account: AccountId, sort_order: &Expression, ctx: &mut ReportContext<'_>) -> ReportResult<Value> {
    if let Some(xdata) = ctx.xdata().account(account) {
        if xdata.flags.contains(AccountFlags::SORT_CALC) {
            if let Some(value) = &xdata.sort_value {
                return Ok(value.clone());
            }
        }
    }
    let value = sort_order
        .evaluate(&AccountScope::new(ctx, account))
        .map_err(|err| ReportError::in_sort_string(sort_order.source(), err))?;
    let xdata = ctx.account_xdata(account);
    xdata.sort_value = Some(value.clone());
    xdata.flags |= AccountFlags::SORT_CALC;
    Ok(value)
}

/// Immediate children of `account`, stably sorted by `sort_order`
///
/// The hierarchy itself is left untouched.
pub fn sort_accounts(account: AccountId, sort_order: &Expression, ctx: &mut ReportContext<'_>) -> ReportResult<Vec<AccountId>> {
    let children: Vec<AccountId> = ctx.account(account).children.values().copied().collect();
    let mut keyed = Vec::with_capacity(children.len());
    for child in children {
        keyed.push((account_sort_key(child, sort_order, ctx)?, child));
    }

    sort_by_key_values(&mut keyed).map_err(|err| ReportError::in_sort_string(sort_order.source(), err))?;
    Ok(keyed.into_iter().map(|(_, child)| child).collect())
}

/// Visit `account` and then its descendants depth-first
///
/// Children are visited in name order, or by `sort_order` when given.
/// The handler is not flushed.
pub fn walk_accounts(
    account: AccountId,
    handler: &mut dyn AccountHandler,
    sort_order: Option<&Expression>,
    ctx: &mut ReportContext<'_>,
) -> ReportResult<()> {
    handler.handle(account, ctx)?;

    let children = match sort_order {
        Some(sort_order) => sort_accounts(account, sort_order, ctx)?,
        None => ctx.account(account).children.values().copied().collect(),
    };
    for child in children {
        walk_accounts(child, handler, sort_order, ctx)?;
    }
    Ok(())
}

/// [`walk_accounts`] with a sort key compiled from `source`
pub fn walk_accounts_sorted_by(
    account: AccountId,
    handler: &mut dyn AccountHandler,
    source: &str,
    ctx: &mut ReportContext<'_>,
) -> ReportResult<()> {
    let sort_order = Expression::parse(source).map_err(|err| ReportError::in_sort_string(source, err))?;
    walk_accounts(account, handler, Some(&sort_order), ctx)
}
