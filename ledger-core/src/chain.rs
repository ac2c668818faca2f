//! Assembling a posting pipeline from report options
//!
//! [`chain_post_handlers`] wraps a terminal handler in the stages the
//! options ask for. Stages are added innermost first, so the last one
//! wrapped is the first to see each posting.

use chrono::NaiveDate;
use log::debug;
use serde::Deserialize;

use crate::datetime::parse_period;
use crate::error::ReportResult;
use crate::expr::{Expression, ItemPredicate};
use crate::filters::{
    BudgetFlags, BudgetPosts, ByPayeePosts, CalcPosts, ChangedValuePosts, CollapsePosts, DowPosts, FilterPosts,
    ForecastPosts, IntervalPosts, PostHandlerBox, RelatedPosts, SortPosts, SubtotalPosts, TransferDetails,
    TransferKind, TruncateEntries,
};
use crate::journal::PeriodicEntry;

/// Which postings a budget report keeps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetMode {
    /// Postings to budgeted accounts, with the budget items due
    Budgeted,
    /// Postings to accounts outside every budget
    Unbudgeted,
    /// Both
    All,
}

impl BudgetMode {
    /// The stage flags for this mode
    pub fn flags(self) -> BudgetFlags {
        match self {
            BudgetMode::Budgeted => BudgetFlags::BUDGETED,
            BudgetMode::Unbudgeted => BudgetFlags::UNBUDGETED,
            BudgetMode::All => BudgetFlags::BUDGETED | BudgetFlags::UNBUDGETED,
        }
    }
}

/// Options controlling a report run
///
/// The default value builds a pipeline that only computes running totals.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReportOptions {
    /// Predicate deciding which computed postings are shown
    pub display: Option<String>,
    /// Emit revaluation postings when market values change
    pub revalued: bool,
    /// Show only revaluation postings
    pub revalued_only: bool,
    /// Predicate applied after running totals are computed
    pub only: Option<String>,
    /// Sort key for postings
    pub sort: Option<String>,
    /// Collapse each entry to one posting per commodity
    pub collapse: bool,
    /// Subtotal everything by account
    pub subtotal: bool,
    /// Group by day of the week
    pub dow: bool,
    /// Group by payee
    pub by_payee: bool,
    /// Period expression for time buckets, e.g. `monthly`
    pub period: Option<String>,
    /// Sort key applied within each time bucket
    pub period_sort: Option<String>,
    /// Report the other postings of matching entries
    pub related: bool,
    /// With `related`, report the matching postings too
    pub related_all: bool,
    /// Predicate selecting which journal postings take part
    pub limit: Option<String>,
    /// Budget mode
    pub budget: Option<BudgetMode>,
    /// Forecast future postings while this predicate holds
    pub forecast_while: Option<String>,
    /// Use the commodity as payee
    pub comm_as_payee: bool,
    /// Use the entry code as payee
    pub code_as_payee: bool,
    /// Use the payee as account
    pub payee_as_account: bool,
    /// Use the commodity as account
    pub comm_as_account: bool,
    /// Use the entry code as account
    pub code_as_account: bool,
    /// Expression naming the account to report postings under
    pub set_account: Option<String>,
    /// Expression naming the payee to report postings under
    pub set_payee: Option<String>,
    /// Show only the first N entries
    pub head: Option<usize>,
    /// Show only the last N entries
    pub tail: Option<usize>,
    /// Reference date for forecasts and revaluation
    pub today: Option<NaiveDate>,
    /// Expression for the total compared by revaluation
    pub total_expr: Option<String>,
}

impl ReportOptions {
    fn transfer(&self) -> ReportResult<Option<(TransferKind, Expression)>> {
        let (kind, source) = if let Some(source) = &self.set_account {
            (TransferKind::SetAccount, source.as_str())
        } else if let Some(source) = &self.set_payee {
            (TransferKind::SetPayee, source.as_str())
        } else if self.comm_as_payee {
            (TransferKind::SetPayee, "commodity")
        } else if self.code_as_payee {
            (TransferKind::SetPayee, "code")
        } else if self.payee_as_account {
            (TransferKind::SetAccount, "payee")
        } else if self.comm_as_account {
            (TransferKind::SetAccount, "commodity")
        } else if self.code_as_account {
            (TransferKind::SetAccount, "code")
        } else {
            return Ok(None);
        };
        Ok(Some((kind, Expression::parse(source)?)))
    }
}

/// Wrap `base` in the stages selected by `options`
///
/// `periodic` supplies the templates for budgets and forecasts.
pub fn chain_post_handlers(
    options: &ReportOptions,
    base: PostHandlerBox,
    periodic: &[PeriodicEntry],
) -> ReportResult<PostHandlerBox> {
    let mut handler = base;

    if let Some(source) = &options.forecast_while {
        handler = Box::new(FilterPosts::from_source(handler, source)?);
    }

    if options.head.is_some() || options.tail.is_some() {
        handler = Box::new(TruncateEntries::new(handler, options.head, options.tail));
    }

    if let Some(source) = &options.display {
        handler = Box::new(FilterPosts::from_source(handler, source)?);
    }

    if options.revalued || options.revalued_only {
        let total_expr = Expression::parse(options.total_expr.as_deref().unwrap_or("total"))?;
        handler = Box::new(ChangedValuePosts::new(handler, total_expr, options.revalued_only));
    }

    handler = Box::new(CalcPosts::new(handler));

    if let Some(source) = &options.only {
        handler = Box::new(FilterPosts::from_source(handler, source)?);
    }

    if let Some(source) = &options.sort {
        handler = Box::new(SortPosts::from_source(handler, source)?);
    }

    if options.collapse {
        handler = Box::new(CollapsePosts::new(handler));
    }

    if options.subtotal {
        handler = Box::new(SubtotalPosts::new(handler));
    }

    if options.dow {
        handler = Box::new(DowPosts::new(handler));
    } else if options.by_payee {
        handler = Box::new(ByPayeePosts::new(handler));
    }

    if let Some(period) = &options.period {
        let interval = parse_period(period)?;
        handler = Box::new(IntervalPosts::with_sort(handler, interval, options.period_sort.as_deref())?);
        handler = Box::new(SortPosts::new(handler, Expression::identifier("date")));
    }

    if options.related || options.related_all {
        handler = Box::new(RelatedPosts::new(handler, options.related_all));
    }

    let limit = options.limit.as_deref().map(ItemPredicate::new).transpose()?;
    if let Some(predicate) = &limit {
        handler = Box::new(FilterPosts::new(handler, predicate.clone()));
    }

    if let Some(mode) = options.budget {
        handler = Box::new(BudgetPosts::new(handler, periodic, mode.flags()));
        if let Some(predicate) = &limit {
            handler = Box::new(FilterPosts::new(handler, predicate.clone()));
        }
    } else if let Some(source) = &options.forecast_while {
        handler = Box::new(ForecastPosts::new(handler, periodic, ItemPredicate::new(source)?));
        if let Some(predicate) = &limit {
            handler = Box::new(FilterPosts::new(handler, predicate.clone()));
        }
    }

    if let Some((kind, expr)) = options.transfer()? {
        handler = Box::new(TransferDetails::new(handler, kind, expr));
    }

    debug!("built posting chain for {:?}", options);
    Ok(handler)
}
