//! Report-item tree
//!
//! A report can be presented as a tree of items wrapping journal objects.
//! Every node has two independent ordered lists: *contents*, the flat
//! membership of the node (an entry's postings, an account's postings),
//! and *children*, its place in a hierarchy (sub-accounts). Nodes live in
//! an arena owned by [`ReportTree`] and refer to each other by [`NodeId`].
//!
//! A node either borrows an object owned by the journal or owns a private
//! one created for the report (a fake posting or entry); `Cow` tells the
//! two apart.

use std::borrow::Cow;
use std::collections::HashMap;
use std::io::Write;
use std::mem;

use chrono::NaiveDate;
use ledger_math::Balance;
use log::debug;

use crate::context::ReportContext;
use crate::error::ReportResult;
use crate::expr::{ExprResult, Expression, ItemPredicate, Scope, Value};
use crate::journal::{Account, AccountId, Entry, EntryId, Journal, Posting, PostingId};
use crate::scope::{balance_value, PostScope};

/// Handle to a node of a [`ReportTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// Header of a sub-report node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportInfo {
    /// Display title
    pub title: String,
}

/// What a node stands for
#[derive(Debug, Clone)]
pub enum ItemKind<'j> {
    /// A journal posting, or a fake one owned by the node
    Posting(Cow<'j, Posting>),
    /// A journal entry, or a fake one owned by the node
    Entry(Cow<'j, Entry>),
    /// A journal account
    Account(&'j Account),
    /// A sub-report
    Report(ReportInfo),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Relation {
    Content,
    Child,
}

#[derive(Debug, Clone, Copy, Default)]
struct List {
    first: Option<NodeId>,
    last: Option<NodeId>,
}

/// One node of the tree
#[derive(Debug, Clone)]
pub struct RepItem<'j> {
    /// Wrapped object
    pub kind: ItemKind<'j>,
    /// Number of ancestor levels hidden from display
    pub parents_elided: usize,
    /// Account presented instead of the wrapped object's own
    pub reported_account: Option<AccountId>,
    /// Date presented instead of the wrapped object's own
    pub reported_date: Option<NaiveDate>,
    parent: Option<(NodeId, Relation)>,
    prev: Option<NodeId>,
    next: Option<NodeId>,
    contents: List,
    children: List,
    value: Option<Balance>,
    total: Option<Balance>,
    sort_value: Option<Value>,
}

impl<'j> RepItem<'j> {
    fn new(kind: ItemKind<'j>) -> Self {
        Self {
            kind,
            parents_elided: 0,
            reported_account: None,
            reported_date: None,
            parent: None,
            prev: None,
            next: None,
            contents: List::default(),
            children: List::default(),
            value: None,
            total: None,
            sort_value: None,
        }
    }

    /// Whether the node owns its object rather than borrowing it
    pub fn is_temp(&self) -> bool {
        matches!(&self.kind, ItemKind::Posting(Cow::Owned(_)) | ItemKind::Entry(Cow::Owned(_)))
    }
}

/// Iterator over one sibling list
pub struct Siblings<'t, 'j> {
    tree: &'t ReportTree<'j>,
    next: Option<NodeId>,
}

impl Iterator for Siblings<'_, '_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.next?;
        self.next = self.tree.node(current).next;
        Some(current)
    }
}

/// Arena of report items over one journal
#[derive(Debug)]
pub struct ReportTree<'j> {
    journal: &'j Journal,
    nodes: Vec<RepItem<'j>>,
}

impl<'j> ReportTree<'j> {
    /// Create an empty tree
    pub fn new(journal: &'j Journal) -> Self {
        Self { journal, nodes: Vec::new() }
    }

    /// Number of nodes created so far
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether no node has been created
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Access a node
    ///
    /// # Panics
    ///
    /// Panics if `id` was not created by this tree.
    pub fn node(&self, id: NodeId) -> &RepItem<'j> {
        match self.nodes.get(id.0) {
            Some(node) => node,
            None => panic!("node {:?} does not belong to this tree", id),
        }
    }

    /// Mutable access to a node
    pub fn node_mut(&mut self, id: NodeId) -> &mut RepItem<'j> {
        match self.nodes.get_mut(id.0) {
            Some(node) => node,
            None => panic!("node {:?} does not belong to this tree", id),
        }
    }

    fn push(&mut self, kind: ItemKind<'j>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(RepItem::new(kind));
        id
    }

    /// Wrap a journal posting
    pub fn wrap_post(&mut self, post: &'j Posting) -> NodeId {
        self.push(ItemKind::Posting(Cow::Borrowed(post)))
    }

    /// Wrap a journal entry
    pub fn wrap_entry(&mut self, entry: &'j Entry) -> NodeId {
        self.push(ItemKind::Entry(Cow::Borrowed(entry)))
    }

    /// Wrap a journal account
    pub fn wrap_account(&mut self, account: &'j Account) -> NodeId {
        self.push(ItemKind::Account(account))
    }

    /// Create a sub-report node
    pub fn wrap_report(&mut self, title: &str) -> NodeId {
        self.push(ItemKind::Report(ReportInfo { title: title.to_string() }))
    }

    /// Create a node owning a zero posting to `account`
    ///
    /// The posting is detached: its id resolves in no journal or run.
    pub fn fake_transaction(&mut self, account: AccountId) -> NodeId {
        let post = Posting::new(PostingId::DETACHED, EntryId::DETACHED, account, Default::default());
        self.push(ItemKind::Posting(Cow::Owned(post)))
    }

    /// Create a node owning an entry with no postings
    pub fn fake_entry(&mut self, date: NaiveDate, payee: &str) -> NodeId {
        self.push(ItemKind::Entry(Cow::Owned(Entry::new(EntryId::DETACHED, date, payee))))
    }

    fn attach(&mut self, parent: NodeId, item: NodeId, relation: Relation) -> NodeId {
        if let Some((current, current_relation)) = self.node(item).parent {
            assert!(
                current == parent && current_relation == relation,
                "node {:?} is already attached to {:?}",
                item,
                current
            );
            return item;
        }
        assert_ne!(parent, item, "node {:?} cannot contain itself", item);

        let list = match relation {
            Relation::Content => self.node(parent).contents,
            Relation::Child => self.node(parent).children,
        };
        if let Some(last) = list.last {
            self.node_mut(last).next = Some(item);
        }
        let node = self.node_mut(item);
        node.parent = Some((parent, relation));
        node.prev = list.last;
        node.next = None;

        let parent_node = self.node_mut(parent);
        let list = match relation {
            Relation::Content => &mut parent_node.contents,
            Relation::Child => &mut parent_node.children,
        };
        list.first.get_or_insert(item);
        list.last = Some(item);
        item
    }

    /// Append `item` to the contents of `parent`
    ///
    /// Adding an item again to the same list is a no-op.
    ///
    /// # Panics
    ///
    /// Panics if `item` already belongs to another node or list.
    pub fn add_content(&mut self, parent: NodeId, item: NodeId) -> NodeId {
        self.attach(parent, item, Relation::Content)
    }

    /// Append `item` to the children of `parent`
    ///
    /// # Panics
    ///
    /// Panics if `item` already belongs to another node or list.
    pub fn add_child(&mut self, parent: NodeId, item: NodeId) -> NodeId {
        self.attach(parent, item, Relation::Child)
    }

    /// Parent of a node, if attached
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent.map(|(parent, _)| parent)
    }

    /// Contents of a node, in insertion order
    pub fn contents(&self, id: NodeId) -> Siblings<'_, 'j> {
        Siblings { tree: self, next: self.node(id).contents.first }
    }

    /// Children of a node, in insertion order
    pub fn children(&self, id: NodeId) -> Siblings<'_, 'j> {
        Siblings { tree: self, next: self.node(id).children.first }
    }

    /// Wrap every posting accepted by `filter`, grouped under an entry node
    /// per journal entry, as contents of `root`
    pub fn populate_entries(&mut self, root: NodeId, ctx: &ReportContext<'j>, filter: &ItemPredicate) -> ReportResult<()> {
        let journal = self.journal;
        for entry in journal.entries() {
            let mut entry_node = None;
            for post_id in &entry.postings {
                if !filter.matches(&PostScope::new(ctx, *post_id))? {
                    continue;
                }
                let Some(post) = journal.post(*post_id) else {
                    continue;
                };
                let parent = match entry_node {
                    Some(node) => node,
                    None => {
                        let node = self.wrap_entry(entry);
                        self.add_content(root, node);
                        entry_node = Some(node);
                        node
                    }
                };
                let node = self.wrap_post(post);
                self.add_content(parent, node);
            }
        }
        debug!("populated {} nodes from entries", self.nodes.len());
        Ok(())
    }

    /// Wrap every posting accepted by `filter` as contents of its account's
    /// node, building the account hierarchy through child links; the
    /// journal root account becomes a child of `root`
    pub fn populate_accounts(&mut self, root: NodeId, ctx: &ReportContext<'j>, filter: &ItemPredicate) -> ReportResult<()> {
        let journal = self.journal;
        let mut account_nodes: HashMap<AccountId, NodeId> = HashMap::new();

        for post in journal.posts() {
            if !filter.matches(&PostScope::new(ctx, post.id))? {
                continue;
            }
            let node = self.wrap_post(post);
            let account_node = self.account_node(post.account, &mut account_nodes);
            self.add_content(account_node, node);
        }

        if let Some(top) = account_nodes.get(&journal.root()) {
            self.add_child(root, *top);
        }
        debug!("populated {} account nodes", account_nodes.len());
        Ok(())
    }

    fn account_node(&mut self, account: AccountId, nodes: &mut HashMap<AccountId, NodeId>) -> NodeId {
        if let Some(node) = nodes.get(&account) {
            return *node;
        }
        let journal = self.journal;
        let Some(wrapped) = journal.account(account) else {
            panic!("account {:?} is not a journal account", account);
        };
        let node = self.wrap_account(wrapped);
        nodes.insert(account, node);
        if let Some(parent) = wrapped.parent {
            let parent_node = self.account_node(parent, nodes);
            self.add_child(parent_node, node);
        }
        node
    }

    /// Date the node presents: the override, else its object's date
    pub fn date(&self, id: NodeId) -> Option<NaiveDate> {
        let node = self.node(id);
        if node.reported_date.is_some() {
            return node.reported_date;
        }
        match &node.kind {
            ItemKind::Entry(entry) => Some(entry.date),
            ItemKind::Posting(post) => match self.journal.entry(post.entry) {
                Some(entry) => Some(entry.date),
                None => self.parent(id).and_then(|parent| self.date(parent)),
            },
            ItemKind::Account(_) | ItemKind::Report(_) => None,
        }
    }

    /// Account the node presents: the override, else its object's account
    pub fn account(&self, id: NodeId) -> Option<&'j Account> {
        let node = self.node(id);
        let account = match (&node.kind, node.reported_account) {
            (_, Some(account)) => account,
            (ItemKind::Posting(post), None) => post.account,
            (ItemKind::Account(account), None) => return Some(*account),
            _ => return None,
        };
        self.journal.account(account)
    }

    fn compute_value(&self, id: NodeId) -> Balance {
        let node = self.node(id);
        if let Some(value) = &node.value {
            return value.clone();
        }
        match &node.kind {
            ItemKind::Posting(post) => Balance::from_amount(&post.amount),
            ItemKind::Account(_) => {
                let mut value = Balance::new();
                for content in self.contents(id) {
                    value += &self.compute_total(content);
                }
                value
            }
            ItemKind::Entry(_) | ItemKind::Report(_) => {
                let mut value = Balance::new();
                for content in self.contents(id) {
                    value += &self.compute_value(content);
                }
                value
            }
        }
    }

    fn compute_total(&self, id: NodeId) -> Balance {
        if let Some(total) = &self.node(id).total {
            return total.clone();
        }
        let mut total = self.compute_value(id);
        for child in self.children(id) {
            total += &self.compute_total(child);
        }
        total
    }

    /// Add the node's own value into `acc`, caching it on the node
    ///
    /// A posting's value is its amount, an account's the totals of its
    /// contents, an entry's or report's the values of its contents.
    pub fn add_value(&mut self, id: NodeId, acc: &mut Balance) {
        let value = self.compute_value(id);
        *acc += &value;
        self.node_mut(id).value = Some(value);
    }

    /// Add the node's value plus its children's totals into `acc`,
    /// caching it on the node
    pub fn add_total(&mut self, id: NodeId, acc: &mut Balance) {
        let total = self.compute_total(id);
        *acc += &total;
        self.node_mut(id).total = Some(total);
    }

    /// Add the node's sort key into `acc`, evaluating `sort_order` once
    pub fn add_sort_value(&mut self, id: NodeId, sort_order: &Expression, acc: &mut Value) -> ExprResult<()> {
        let key = match &self.node(id).sort_value {
            Some(key) => key.clone(),
            None => {
                let key = sort_order.evaluate(&NodeScope::new(self, id))?;
                self.node_mut(id).sort_value = Some(key.clone());
                key
            }
        };
        *acc = (mem::replace(acc, Value::Null) + key)?;
        Ok(())
    }

    /// Drop every cached value, total and sort key
    pub fn clear_caches(&mut self) {
        for node in &mut self.nodes {
            node.value = None;
            node.total = None;
            node.sort_value = None;
        }
    }

    fn label(&self, id: NodeId) -> String {
        match &self.node(id).kind {
            ItemKind::Posting(post) => {
                let account = self.account(id).map_or("<unknown>", |account| account.fullname.as_str());
                format!("posting {} {}", account, post.amount)
            }
            ItemKind::Entry(entry) => format!("entry {} {}", entry.date, entry.payee),
            ItemKind::Account(account) => format!("account {}", account.fullname),
            ItemKind::Report(info) => format!("report {}", info.title),
        }
    }

    /// Write an indented dump of `id` and everything below it
    pub fn print_tree<W: Write>(&self, id: NodeId, out: &mut W) -> ReportResult<()> {
        self.print_node(id, 0, out)
    }

    fn print_node<W: Write>(&self, id: NodeId, depth: usize, out: &mut W) -> ReportResult<()> {
        let node = self.node(id);
        let temp = if node.is_temp() { " (temp)" } else { "" };
        writeln!(out, "{:indent$}{}{}", "", self.label(id), temp, indent = depth * 2)?;
        for content in self.contents(id) {
            self.print_node(content, depth + 1, out)?;
        }
        for child in self.children(id) {
            self.print_node(child, depth + 1, out)?;
        }
        Ok(())
    }
}

/// Names visible when evaluating an expression for a tree node
pub struct NodeScope<'t, 'j> {
    tree: &'t ReportTree<'j>,
    node: NodeId,
}

impl<'t, 'j> NodeScope<'t, 'j> {
    /// Scope for `node`
    pub fn new(tree: &'t ReportTree<'j>, node: NodeId) -> Self {
        Self { tree, node }
    }
}

impl Scope for NodeScope<'_, '_> {
    fn lookup(&self, name: &str) -> Option<Value> {
        let tree = self.tree;
        let node = tree.node(self.node);
        let value = match name {
            "value" | "amount" => balance_value(&tree.compute_value(self.node)),
            "total" => balance_value(&tree.compute_total(self.node)),
            "date" => tree.date(self.node).map_or(Value::Null, Value::Date),
            "account" => tree.account(self.node).map_or(Value::Null, |account| Value::from(account.fullname.as_str())),
            "depth" => tree.account(self.node).map_or(Value::Integer(0), |account| Value::Integer(account.depth as i64)),
            "payee" => match &node.kind {
                ItemKind::Entry(entry) => Value::from(entry.payee.as_str()),
                ItemKind::Posting(post) => {
                    tree.journal.entry(post.entry).map_or(Value::Null, |entry| Value::from(entry.payee.as_str()))
                }
                _ => Value::Null,
            },
            "title" => match &node.kind {
                ItemKind::Report(info) => Value::from(info.title.as_str()),
                _ => Value::Null,
            },
            "parents_elided" => Value::Integer(node.parents_elided as i64),
            _ => return None,
        };
        Some(value)
    }
}
