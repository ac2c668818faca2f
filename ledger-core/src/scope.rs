//! Expression scopes for postings and accounts

use ledger_math::{Amount, Balance};

use crate::context::ReportContext;
use crate::expr::{Scope, Value};
use crate::journal::{AccountId, ItemState, PostingId};
use crate::xdata::PostFlags;

/// Present a balance as an amount when it holds at most one commodity
pub fn balance_value(balance: &Balance) -> Value {
    match balance.to_amount() {
        Ok(amount) => Value::Amount(amount),
        Err(_) => Value::Balance(balance.clone()),
    }
}

fn optional_string(text: Option<&str>) -> Value {
    text.map_or(Value::Null, Value::from)
}

/// Names visible when evaluating an expression for a posting
pub struct PostScope<'a, 'j> {
    ctx: &'a ReportContext<'j>,
    post: PostingId,
}

impl<'a, 'j> PostScope<'a, 'j> {
    /// Scope for `post`
    pub fn new(ctx: &'a ReportContext<'j>, post: PostingId) -> Self {
        Self { ctx, post }
    }
}

impl Scope for PostScope<'_, '_> {
    fn lookup(&self, name: &str) -> Option<Value> {
        let ctx = self.ctx;
        let post = ctx.post(self.post);
        let entry = ctx.entry(post.entry);
        let xdata = ctx.xdata().post(self.post);
        let state = if post.state == ItemState::Uncleared { entry.state } else { post.state };

        let value = match name {
            "amount" => Value::Amount(ctx.amount_of(self.post)),
            "total" => xdata.map_or(Value::Amount(Amount::zero()), |x| balance_value(&x.total)),
            "date" => Value::Date(ctx.date_of(self.post)),
            "payee" => Value::from(entry.payee.as_str()),
            "account" => Value::from(ctx.fullname(ctx.reported_account(self.post))),
            "account_base" => Value::from(ctx.account(ctx.reported_account(self.post)).name.as_str()),
            "depth" => Value::Integer(ctx.account(ctx.reported_account(self.post)).depth as i64),
            "commodity" => Value::from(ctx.amount_of(self.post).commodity().unwrap_or("")),
            "code" => optional_string(entry.code.as_deref()),
            "note" => optional_string(post.note.as_deref().or(entry.note.as_deref())),
            "cleared" => Value::Bool(state == ItemState::Cleared),
            "pending" => Value::Bool(state == ItemState::Pending),
            "uncleared" => Value::Bool(state == ItemState::Uncleared),
            "virtual" => Value::Bool(post.is_virtual()),
            "real" => Value::Bool(!post.is_virtual()),
            "generated" => Value::Bool(post.is_generated()),
            "index" => Value::Integer(xdata.map_or(0, |x| x.index) as i64),
            "count" => Value::Integer(xdata.map_or(0, |x| x.count) as i64),
            "matched" => Value::Bool(xdata.map_or(false, |x| x.flags.contains(PostFlags::MATCHES))),
            _ => return None,
        };
        Some(value)
    }
}

/// Names visible when evaluating an expression for an account
pub struct AccountScope<'a, 'j> {
    ctx: &'a ReportContext<'j>,
    account: AccountId,
}

impl<'a, 'j> AccountScope<'a, 'j> {
    /// Scope for `account`
    pub fn new(ctx: &'a ReportContext<'j>, account: AccountId) -> Self {
        Self { ctx, account }
    }
}

impl Scope for AccountScope<'_, '_> {
    fn lookup(&self, name: &str) -> Option<Value> {
        let account = self.ctx.account(self.account);
        let xdata = self.ctx.xdata().account(self.account);
        let zero = || Value::Amount(Amount::zero());

        let value = match name {
            "account" | "fullname" => Value::from(account.fullname.as_str()),
            "account_base" | "name" => Value::from(account.name.as_str()),
            "depth" => Value::Integer(account.depth as i64),
            "amount" | "value" => xdata.map_or_else(zero, |x| balance_value(&x.value)),
            "total" => xdata.map_or_else(zero, |x| balance_value(&x.total)),
            "count" => Value::Integer(xdata.map_or(0, |x| x.count) as i64),
            "total_count" => Value::Integer(xdata.map_or(0, |x| x.total_count) as i64),
            "virtuals" => Value::Integer(xdata.map_or(0, |x| x.virtuals) as i64),
            "parent" => {
                optional_string(account.parent.map(|parent| self.ctx.fullname(parent)))
            }
            _ => return None,
        };
        Some(value)
    }
}
