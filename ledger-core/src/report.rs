//! Register and balance report drivers
//!
//! Each driver builds a fresh [`ReportContext`] over the journal, runs the
//! posting chain selected by the options and reads the results back out of
//! the extra-data store before the context is dropped.

use chrono::NaiveDate;
use ledger_math::{Amount, Balance, PriceHistory};
use log::{debug, info};
use serde::Serialize;

use crate::chain::{chain_post_handlers, ReportOptions};
use crate::context::ReportContext;
use crate::error::ReportResult;
use crate::filters::{CollectPosts, IgnorePosts, SetAccountValue};
use crate::journal::Journal;
use crate::walk::{sum_accounts, walk_accounts, walk_accounts_sorted_by, walk_journal, AccountHandlerBox, CollectAccounts, FilterAccounts};

/// One line of a register report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegisterRow {
    /// Reported date
    pub date: NaiveDate,
    /// Payee of the (possibly synthetic) entry
    pub payee: String,
    /// Full name of the reported account
    pub account: String,
    /// Reported amount
    pub amount: Amount,
    /// Running total after this posting
    pub total: Balance,
}

/// One line of a balance report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BalanceRow {
    /// Full account name
    pub account: String,
    /// Depth below the root account
    pub depth: usize,
    /// Sum posted directly to the account
    pub value: Balance,
    /// Sum over the account and its descendants
    pub total: Balance,
}

fn context<'j>(journal: &'j Journal, options: &ReportOptions, prices: Option<&'j PriceHistory>) -> ReportContext<'j> {
    let mut ctx = ReportContext::new(journal);
    if let Some(prices) = prices {
        ctx = ctx.with_prices(prices);
    }
    if let Some(today) = options.today {
        ctx = ctx.with_today(today);
    }
    ctx
}

/// Run the posting chain over `journal` and list what reaches the end
pub fn register_report(
    journal: &Journal,
    options: &ReportOptions,
    prices: Option<&PriceHistory>,
) -> ReportResult<Vec<RegisterRow>> {
    let mut ctx = context(journal, options, prices);
    let (sink, posts) = CollectPosts::shared();
    let mut handler = chain_post_handlers(options, sink, journal.period_entries())?;
    walk_journal(&mut *handler, &mut ctx)?;

    let posts = posts.borrow();
    let rows = posts
        .iter()
        .map(|post| RegisterRow {
            date: ctx.date_of(*post),
            payee: ctx.payee_of(*post).to_string(),
            account: ctx.fullname(ctx.reported_account(*post)).to_string(),
            amount: ctx.amount_of(*post),
            total: ctx.xdata().post(*post).map(|xdata| xdata.total.clone()).unwrap_or_default(),
        })
        .collect::<Vec<_>>();
    info!("register report: {} rows", rows.len());
    Ok(rows)
}

/// Aggregate the postings selected by `options` into account totals
///
/// Accounts are listed depth-first, children in name order or by `sort`;
/// `display` filters which of them are listed. The root account itself is
/// never listed.
pub fn balance_report(
    journal: &Journal,
    options: &ReportOptions,
    sort: Option<&str>,
    display: Option<&str>,
) -> ReportResult<Vec<BalanceRow>> {
    let mut ctx = context(journal, options, None);
    let base = Box::new(SetAccountValue::new(Box::new(IgnorePosts::new())));
    let mut handler = chain_post_handlers(options, base, journal.period_entries())?;
    walk_journal(&mut *handler, &mut ctx)?;

    let root = journal.root();
    sum_accounts(root, &mut ctx);

    let (collector, accounts) = CollectAccounts::shared();
    let mut account_handler: AccountHandlerBox = match display {
        Some(source) => Box::new(FilterAccounts::from_source(collector, source)?),
        None => collector,
    };
    match sort {
        Some(source) => walk_accounts_sorted_by(root, &mut *account_handler, source, &mut ctx)?,
        None => walk_accounts(root, &mut *account_handler, None, &mut ctx)?,
    }
    account_handler.flush(&mut ctx)?;

    let accounts = accounts.borrow();
    let rows = accounts
        .iter()
        .filter(|account| **account != root)
        .map(|account| {
            let xdata = ctx.xdata().account(*account);
            BalanceRow {
                account: ctx.fullname(*account).to_string(),
                depth: ctx.account(*account).depth,
                value: xdata.map(|xdata| xdata.value.clone()).unwrap_or_default(),
                total: xdata.map(|xdata| xdata.total.clone()).unwrap_or_default(),
            }
        })
        .collect::<Vec<_>>();
    debug!("balance report: {} of {} accounts listed", rows.len(), journal.account_count());
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::testing::{date, sample_journal};

    fn dollars(text: &str) -> Balance {
        Balance::from_amount(&text.parse::<Amount>().unwrap())
    }

    #[test]
    fn test_register_running_total() {
        let journal = sample_journal();
        let options = ReportOptions { limit: Some("account =~ /Food/".into()), ..Default::default() };
        let rows = register_report(&journal, &options, None).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].date, date(2024, 1, 5));
        assert_eq!(rows[1].payee, "Grocer");
        assert_eq!(rows[1].total, dollars("$17"));
    }

    #[test]
    fn test_register_monthly_buckets() {
        let journal = sample_journal();
        let options = ReportOptions {
            period: Some("monthly".into()),
            limit: Some("account =~ /Expenses/".into()),
            ..Default::default()
        };
        let rows = register_report(&journal, &options, None).unwrap();

        let accounts: Vec<&str> = rows.iter().map(|row| row.account.as_str()).collect();
        assert_eq!(accounts, vec!["Expenses:Food", "Expenses:Rent", "Expenses:Food"]);
        assert_eq!(rows[0].date, date(2024, 1, 1));
        assert_eq!(rows[2].total, dollars("$517"));
    }

    #[test]
    fn test_balance_tree() {
        let journal = sample_journal();
        let rows = balance_report(&journal, &ReportOptions::default(), None, None).unwrap();

        let names: Vec<&str> = rows.iter().map(|row| row.account.as_str()).collect();
        assert_eq!(names, vec!["Assets", "Assets:Bank", "Assets:Cash", "Expenses", "Expenses:Food", "Expenses:Rent"]);
        assert_eq!(rows[3].total, dollars("$517"));
        assert!(rows[3].value.is_empty());
        assert_eq!(rows[4].value, dollars("$17"));
        assert_eq!(rows[4].depth, 2);
    }

    #[test]
    fn test_balance_sorted_and_filtered() {
        let journal = sample_journal();
        let rows = balance_report(&journal, &ReportOptions::default(), Some("total"), Some("depth == 2")).unwrap();

        let names: Vec<&str> = rows.iter().map(|row| row.account.as_str()).collect();
        assert_eq!(names, vec!["Assets:Bank", "Assets:Cash", "Expenses:Food", "Expenses:Rent"]);
    }

    #[test]
    fn test_rows_serialize() {
        let journal = sample_journal();
        let options = ReportOptions { head: Some(1), ..Default::default() };
        let rows = register_report(&journal, &options, None).unwrap();
        let json = serde_json::to_value(&rows).unwrap();
        assert_eq!(json[0]["payee"], "Grocer");
        assert_eq!(json[0]["date"], "2024-01-05");
    }
}
