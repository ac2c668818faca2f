//! Property tests for the posting pipeline stages

use chrono::{Days, NaiveDate};
use ledger_core::filters::{CalcPosts, CollapsePosts, CollectPosts, SortPosts, SubtotalPosts};
use ledger_core::walk::walk_journal;
use ledger_core::{Journal, PostHandlerBox, PostingId, ReportContext};
use ledger_math::{Amount, Balance, Decimal};
use proptest::prelude::*;

const ACCOUNTS: [&str; 3] = ["Assets:Cash", "Expenses:Food", "Income:Salary"];

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn dollars(n: i64) -> Amount {
    Amount::new(Decimal::from(n), Some("$"))
}

/// One journal entry per outer element, one posting per (account, dollars)
fn build_journal(entries: &[Vec<(usize, i64)>]) -> Journal {
    let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    let mut journal = Journal::new();
    for (day, posts) in entries.iter().enumerate() {
        let date = start.checked_add_days(Days::new(day as u64)).unwrap();
        let mut builder = journal.entry_builder(date, &format!("Payee {}", day % 4));
        for (account, amount) in posts {
            builder = builder.post(ACCOUNTS[*account], dollars(*amount));
        }
        builder.add();
    }
    journal
}

fn entries_strategy(amounts: std::ops::Range<i64>) -> impl Strategy<Value = Vec<Vec<(usize, i64)>>> {
    prop::collection::vec(prop::collection::vec((0..ACCOUNTS.len(), amounts), 1..5), 1..15)
}

fn run<F>(journal: &Journal, build: F) -> (ReportContext<'_>, Vec<PostingId>)
where
    F: FnOnce(PostHandlerBox) -> PostHandlerBox,
{
    init();
    let mut ctx = ReportContext::new(journal);
    let (sink, collected) = CollectPosts::shared();
    let mut chain = build(sink);
    walk_journal(&mut *chain, &mut ctx).unwrap();
    let posts = collected.borrow().clone();
    (ctx, posts)
}

fn sum(ctx: &ReportContext<'_>, posts: &[PostingId]) -> Balance {
    let mut total = Balance::new();
    for post in posts {
        total += &ctx.amount_of(*post);
    }
    total
}

proptest! {
    #[test]
    fn subtotal_conserves_amounts(entries in entries_strategy(-500..500)) {
        let journal = build_journal(&entries);
        let inputs: Vec<PostingId> = journal.posts().map(|post| post.id).collect();
        let (ctx, outputs) = run(&journal, |sink| Box::new(SubtotalPosts::new(sink)));

        prop_assert_eq!(sum(&ctx, &outputs), sum(&ctx, &inputs));
        // One bucket per account that received anything
        let used: std::collections::BTreeSet<usize> =
            entries.iter().flatten().map(|(account, _)| *account).collect();
        prop_assert_eq!(outputs.len(), used.len());
    }

    #[test]
    fn sort_is_a_stable_permutation(entries in entries_strategy(1..4)) {
        let journal = build_journal(&entries);
        let (ctx, outputs) = run(&journal, |sink| Box::new(SortPosts::from_source(sink, "amount").unwrap()));

        let mut expected: Vec<(Decimal, PostingId)> =
            journal.posts().map(|post| (post.amount.quantity(), post.id)).collect();
        expected.sort_by_key(|(quantity, _)| *quantity);
        let expected: Vec<PostingId> = expected.into_iter().map(|(_, id)| id).collect();
        prop_assert_eq!(outputs, expected);
        prop_assert_eq!(ctx.temps().post_count(), 0);
    }

    #[test]
    fn calc_records_prefix_sums(entries in entries_strategy(-100..100)) {
        let journal = build_journal(&entries);
        let (ctx, outputs) = run(&journal, |sink| Box::new(CalcPosts::new(sink)));

        prop_assert_eq!(outputs.len(), journal.post_count());
        let mut running = Balance::new();
        for (index, post) in outputs.iter().enumerate() {
            running += &ctx.amount_of(*post);
            let xdata = ctx.xdata().post(*post).unwrap();
            prop_assert_eq!(&xdata.total, &running);
            prop_assert_eq!(xdata.index, index);
            prop_assert_eq!(xdata.count, index + 1);
        }
    }

    #[test]
    fn collapse_emits_one_posting_per_entry(entries in entries_strategy(-100..100)) {
        let journal = build_journal(&entries);
        let (ctx, outputs) = run(&journal, |sink| Box::new(CollapsePosts::new(sink)));

        prop_assert_eq!(outputs.len(), entries.len());
        for (post, source) in outputs.iter().zip(journal.entries()) {
            let mut expected = Balance::new();
            for id in &source.postings {
                expected += &journal.post(*id).unwrap().amount;
            }
            prop_assert_eq!(Balance::from_amount(&ctx.amount_of(*post)), expected);
            prop_assert_eq!(ctx.date_of(*post), source.date);
        }
    }
}
