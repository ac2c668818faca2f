use chrono::{Days, NaiveDate};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ledger_core::{balance_report, register_report, Journal, ReportOptions};
use ledger_math::{Amount, Decimal};

fn journal(entries: usize) -> Journal {
    let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
    let accounts = ["Expenses:Food", "Expenses:Rent", "Expenses:Travel:Air", "Income:Salary"];
    let mut journal = Journal::new();
    for i in 0..entries {
        let date = start.checked_add_days(Days::new((i / 3) as u64)).unwrap();
        let amount = Amount::new(Decimal::new((i as i64 % 997) * 100 + 1, 2), Some("$"));
        journal
            .entry_builder(date, &format!("Payee {}", i % 17))
            .post(accounts[i % accounts.len()], amount.clone())
            .post("Assets:Checking", -amount)
            .add();
    }
    journal
}

fn register_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("register");
    let sorted = ReportOptions { sort: Some("amount".into()), ..Default::default() };
    let monthly = ReportOptions { period: Some("monthly".into()), ..Default::default() };

    for size in [1_000usize, 10_000] {
        let journal = journal(size);
        group.bench_with_input(BenchmarkId::new("sorted", size), &journal, |b, journal| {
            b.iter(|| register_report(black_box(journal), &sorted, None).unwrap())
        });
        group.bench_with_input(BenchmarkId::new("monthly", size), &journal, |b, journal| {
            b.iter(|| register_report(black_box(journal), &monthly, None).unwrap())
        });
    }
    group.finish();
}

fn balance_benchmark(c: &mut Criterion) {
    let journal = journal(10_000);
    let options = ReportOptions::default();
    c.bench_function("balance 10000", |b| {
        b.iter(|| balance_report(black_box(&journal), &options, Some("total"), None).unwrap())
    });
}

criterion_group!(benches, register_benchmark, balance_benchmark);
criterion_main!(benches);
