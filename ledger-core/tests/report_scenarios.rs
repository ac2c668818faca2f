//! End-to-end report scenarios

use chrono::NaiveDate;
use ledger_core::datetime::parse_period;
use ledger_core::expr::ItemPredicate;
use ledger_core::filters::{CalcPosts, CollectPosts, FilterPosts, IntervalPosts, SortPosts, SubtotalPosts};
use ledger_core::repitem::ReportTree;
use ledger_core::walk::{clear_all_xdata, walk_journal};
use ledger_core::{
    chain_post_handlers, register_report, Journal, PostHandlerBox, PostingId, ReportContext, ReportOptions,
};
use ledger_math::{Amount, Balance, PriceHistory};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn amt(text: &str) -> Amount {
    text.parse().unwrap()
}

fn run(journal: &Journal, chain: impl FnOnce(PostHandlerBox) -> PostHandlerBox) -> (ReportContext<'_>, Vec<PostingId>) {
    init();
    let mut ctx = ReportContext::new(journal);
    let (sink, collected) = CollectPosts::shared();
    let mut handler = chain(sink);
    walk_journal(&mut *handler, &mut ctx).unwrap();
    let posts = collected.borrow().clone();
    (ctx, posts)
}

fn three_postings() -> Journal {
    let mut journal = Journal::new();
    journal.entry_builder(date(2024, 1, 5), "One").post("AcctA", amt("$10")).add();
    journal.entry_builder(date(2024, 1, 20), "Two").post("AcctB", amt("$5")).add();
    journal.entry_builder(date(2024, 2, 1), "Three").post("AcctA", amt("$7")).add();
    journal
}

#[test]
fn test_filter_then_subtotal_yields_single_bucket() {
    let journal = three_postings();
    let (ctx, posts) = run(&journal, |sink| {
        let subtotal = Box::new(SubtotalPosts::new(sink));
        Box::new(FilterPosts::from_source(subtotal, "account == \"AcctA\"").unwrap())
    });

    assert_eq!(posts.len(), 1);
    assert_eq!(ctx.fullname(ctx.reported_account(posts[0])), "AcctA");
    assert_eq!(ctx.amount_of(posts[0]), amt("$17"));

    let entry = ctx.entry(ctx.post(posts[0]).entry);
    let span = entry.span.unwrap();
    assert_eq!((span.begin, span.end), (date(2024, 1, 5), date(2024, 2, 1)));
}

#[test]
fn test_monthly_interval_covers_every_month() {
    let mut journal = three_postings();
    journal.entry_builder(date(2024, 3, 10), "Four").post("AcctA", amt("$1")).add();

    let interval = parse_period("monthly").unwrap();
    let (ctx, posts) = run(&journal, |sink| Box::new(IntervalPosts::new(sink, interval)));

    let buckets: Vec<(NaiveDate, &str)> =
        posts.iter().map(|post| (ctx.date_of(*post), ctx.fullname(ctx.reported_account(*post)))).collect();
    assert_eq!(
        buckets,
        vec![
            (date(2024, 1, 1), "AcctA"),
            (date(2024, 1, 1), "AcctB"),
            (date(2024, 2, 1), "AcctA"),
            (date(2024, 3, 1), "AcctA"),
        ]
    );
}

#[test]
fn test_interval_gap_emits_empty_bucket() {
    let mut journal = Journal::new();
    journal.entry_builder(date(2024, 1, 5), "One").post("AcctA", amt("$10")).add();
    journal.entry_builder(date(2024, 3, 10), "Two").post("AcctA", amt("$3")).add();

    let interval = parse_period("monthly").unwrap();
    let (ctx, posts) = run(&journal, |sink| Box::new(IntervalPosts::new(sink, interval)));

    assert_eq!(posts.len(), 3);
    assert_eq!(ctx.fullname(ctx.reported_account(posts[1])), "<None>");
    assert!(ctx.amount_of(posts[1]).is_zero());
    assert_eq!(ctx.date_of(posts[1]), date(2024, 2, 1));
}

#[test]
fn test_reset_yields_fresh_records() {
    let journal = three_postings();
    let (mut ctx, posts) = run(&journal, |sink| Box::new(CalcPosts::new(sink)));
    assert_eq!(ctx.xdata().post(posts[2]).unwrap().total, Balance::from_amount(&amt("$22")));

    clear_all_xdata(&mut ctx);
    for post in &posts {
        assert!(ctx.xdata().post(*post).is_none());
    }
    let record = ctx.post_xdata(posts[2]);
    assert!(record.total.is_empty());
    assert_eq!(record.count, 0);
    assert!(record.flags.is_empty());
}

#[test]
fn test_tree_lists_are_independent() {
    init();
    let journal = three_postings();
    let mut tree = ReportTree::new(&journal);
    let report = tree.wrap_report("scenario");
    let first = tree.fake_entry(date(2024, 1, 1), "first");
    let second = tree.fake_entry(date(2024, 1, 2), "second");
    let child = tree.wrap_report("child");

    tree.add_content(report, first);
    tree.add_child(report, child);
    tree.add_content(report, second);

    assert_eq!(tree.contents(report).collect::<Vec<_>>(), vec![first, second]);
    assert_eq!(tree.children(report).collect::<Vec<_>>(), vec![child]);
    assert_eq!(tree.date(second), Some(date(2024, 1, 2)));
}

#[test]
fn test_populated_tree_agrees_with_pipeline() {
    init();
    let journal = three_postings();
    let ctx = ReportContext::new(&journal);
    let mut tree = ReportTree::new(&journal);
    let report = tree.wrap_report("accounts");
    tree.populate_accounts(report, &ctx, &ItemPredicate::new("account == \"AcctA\"").unwrap()).unwrap();

    let mut value = Balance::new();
    tree.add_value(report, &mut value);
    assert!(value.is_empty());

    let mut total = Balance::new();
    tree.add_total(report, &mut total);
    assert_eq!(total, Balance::from_amount(&amt("$17")));
    let top = tree.children(report).next().unwrap();
    tree.add_total(top, &mut total);
    assert_eq!(total, Balance::from_amount(&amt("$34")));
}

fn budget_journal() -> Journal {
    let mut journal = Journal::new();
    journal.add_period_entry(parse_period("monthly from 2024-01-01").unwrap(), vec![("Expenses:Food", amt("$100"))]);
    journal.entry_builder(date(2024, 2, 10), "Grocer").post("Expenses:Food:Groceries", amt("$30")).add();
    journal.entry_builder(date(2024, 2, 12), "Landlord").post("Expenses:Rent", amt("$500")).add();
    journal
}

#[test]
fn test_budget_report() {
    init();
    let journal = budget_journal();
    let options: ReportOptions = serde_json::from_str(r#"{"budget": "all"}"#).unwrap();
    let rows = register_report(&journal, &options, None).unwrap();

    let summary: Vec<(&str, &str, Amount)> =
        rows.iter().map(|row| (row.payee.as_str(), row.account.as_str(), row.amount.clone())).collect();
    assert_eq!(
        summary,
        vec![
            ("Budget entry", "Expenses:Food", amt("-$100")),
            ("Budget entry", "Expenses:Food", amt("-$100")),
            ("Grocer", "Expenses:Food", amt("$30")),
            ("Landlord", "Expenses:Rent", amt("$500")),
        ]
    );
    assert_eq!(rows[3].total, Balance::from_amount(&amt("$330")));
}

#[test]
fn test_forecast_report() {
    init();
    let mut journal = Journal::new();
    journal.add_period_entry(parse_period("monthly").unwrap(), vec![("Expenses:Rent", amt("$500"))]);
    journal.entry_builder(date(2024, 1, 10), "Landlord").post("Expenses:Rent", amt("$500")).add();

    let options = ReportOptions {
        forecast_while: Some("date < [2024-06-01]".into()),
        today: Some(date(2024, 3, 15)),
        ..Default::default()
    };
    let rows = register_report(&journal, &options, None).unwrap();

    let dates: Vec<NaiveDate> = rows.iter().map(|row| row.date).collect();
    assert_eq!(dates, vec![date(2024, 1, 10), date(2024, 4, 1), date(2024, 5, 1)]);
    assert_eq!(rows[1].payee, "Forecast entry");
    assert_eq!(rows[2].total, Balance::from_amount(&amt("$1500")));
}

#[test]
fn test_revaluation_report() {
    init();
    let mut journal = Journal::new();
    journal
        .entry_builder(date(2024, 1, 1), "Broker")
        .post("Assets:Brokerage", amt("10 AAPL"))
        .post("Assets:Cash", amt("-$1000"))
        .add();
    let mut prices = PriceHistory::new();
    prices.add_price("AAPL", date(2024, 1, 1), amt("$100"));
    prices.add_price("AAPL", date(2024, 2, 1), amt("$120"));

    let options = ReportOptions {
        revalued: true,
        limit: Some("account =~ /Brokerage/".into()),
        today: Some(date(2024, 3, 1)),
        ..Default::default()
    };
    let rows = register_report(&journal, &options, Some(&prices)).unwrap();

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].payee, "Commodities revalued");
    assert_eq!(rows[1].account, "<Revalued>");
    assert_eq!(rows[1].amount, amt("$200"));
    assert_eq!(rows[1].date, date(2024, 3, 1));
    assert_eq!(rows[1].total, Balance::from_amount(&amt("$1200")));
}

#[test]
fn test_json_options_match_manual_chain() {
    let journal = three_postings();
    let options: ReportOptions =
        serde_json::from_str(r#"{"limit": "account == \"AcctA\"", "sort": "amount"}"#).unwrap();

    let (chained_ctx, chained) = run(&journal, |sink| chain_post_handlers(&options, sink, &[]).unwrap());
    let (manual_ctx, manual) = run(&journal, |sink| {
        let calc = Box::new(CalcPosts::new(sink));
        let sort = Box::new(SortPosts::from_source(calc, "amount").unwrap());
        Box::new(FilterPosts::from_source(sort, "account == \"AcctA\"").unwrap())
    });

    assert_eq!(chained, manual);
    assert_eq!(chained, vec![PostingId::Journal(2), PostingId::Journal(0)]);
    for post in &chained {
        assert_eq!(chained_ctx.xdata().post(*post).unwrap().total, manual_ctx.xdata().post(*post).unwrap().total);
    }
}
