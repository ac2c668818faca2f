//! Reporting core for Ledger
//!
//! This crate turns the postings and account hierarchy of a journal into
//! report data. Postings flow through a chain of handler stages that
//! filter, sort, group, bucket by period and synthesize derived postings;
//! accounts are summed bottom-up and walked depth-first; a report-item
//! tree offers the same data as a navigable hierarchy.
//!
//! Per-item report state never lives on the journal objects. It is kept in
//! an extra-data store keyed by item id and owned, together with every
//! synthetic object a run creates, by a [`ReportContext`].

#![warn(clippy::all)]
#![warn(missing_docs)]

/// Module for journal domain objects and their ids
pub mod journal;

/// Module for periods, date intervals and spans
pub mod datetime;

/// Module for expression evaluation
pub mod expr;

/// Module for per-item report state
pub mod xdata;

/// Module for the per-run report context
pub mod context;

/// Module for expression scopes over postings and accounts
pub mod scope;

/// Module for report errors
pub mod error;

/// Module for posting handler stages
pub mod filters;

/// Module for posting and account walkers
pub mod walk;

/// Module for report-item trees
pub mod repitem;

/// Module for building handler chains from options
pub mod chain;

/// Module for report drivers
pub mod report;

pub use chain::{chain_post_handlers, BudgetMode, ReportOptions};
pub use context::{ReportContext, Temporaries};
pub use error::{ReportError, ReportResult};
pub use expr::{Expression, ItemPredicate, Value};
pub use filters::{PostHandler, PostHandlerBox};
pub use journal::{Account, AccountId, Entry, EntryId, Journal, Posting, PostingId};
pub use report::{balance_report, register_report, BalanceRow, RegisterRow};
pub use xdata::ExtraData;
