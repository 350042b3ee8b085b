//! [`DoltTx`] -- the [`Transaction`] implementation for the Dolt backend.
//!
//! Mirrors `sqlite/transaction.rs`: a thin wrapper around a connection (here,
//! a `mysql::Transaction`) that delegates every method to the module-level
//! `_on_conn` helpers shared with [`crate::dolt::DoltStore`]'s own methods.

use std::cell::RefCell;

use chrono::{DateTime, Utc};
use mysql::TxOpts;

use beads_core::comment::Comment;
use beads_core::dependency::Dependency;
use beads_core::filter::IssueFilter;
use beads_core::issue::Issue;

use crate::dolt::{comments, config, dependencies, issues, labels, DoltStore};
use crate::error::Result;
use crate::traits::{IssueUpdates, Transaction};

/// A transaction-scoped handle over a single Dolt connection.
///
/// `mysql::Transaction` requires `&mut self` for every query, so the
/// connection is wrapped in a `RefCell` to satisfy [`Transaction`]'s `&self`
/// methods -- mirroring `sqlite/transaction.rs`'s use of a plain
/// `&Connection` (rusqlite's own internal locking does the same job there).
pub struct DoltTx<'a> {
    conn: RefCell<mysql::Transaction<'a>>,
}

impl<'a> DoltTx<'a> {
    pub(crate) fn new(conn: mysql::Transaction<'a>) -> Self {
        Self { conn: RefCell::new(conn) }
    }

    pub(crate) fn into_inner(self) -> mysql::Transaction<'a> {
        self.conn.into_inner()
    }
}

impl Transaction for DoltTx<'_> {
    fn create_issue(&self, issue: &Issue, actor: &str) -> Result<()> {
        issues::insert_issue(&mut *self.conn.borrow_mut(), issue, actor)
    }

    fn create_issues(&self, issues_list: &[Issue], actor: &str) -> Result<()> {
        let mut conn = self.conn.borrow_mut();
        for issue in issues_list {
            issues::insert_issue(&mut *conn, issue, actor)?;
        }
        Ok(())
    }

    fn update_issue(&self, id: &str, updates: &IssueUpdates, actor: &str) -> Result<()> {
        issues::update_issue_on_conn(&mut *self.conn.borrow_mut(), id, updates, actor)
    }

    fn close_issue(&self, id: &str, reason: &str, actor: &str, session: &str) -> Result<()> {
        issues::close_issue_on_conn(&mut *self.conn.borrow_mut(), id, reason, actor, session)
    }

    fn delete_issue(&self, id: &str) -> Result<()> {
        issues::delete_issue_on_conn(&mut *self.conn.borrow_mut(), id)
    }

    fn get_issue(&self, id: &str) -> Result<Issue> {
        issues::get_issue_on_conn(&mut *self.conn.borrow_mut(), id)
    }

    fn search_issues(&self, query: &str, filter: &IssueFilter) -> Result<Vec<Issue>> {
        issues::search_issues_on_conn(&mut *self.conn.borrow_mut(), query, filter)
    }

    fn add_dependency(&self, dep: &Dependency, actor: &str) -> Result<()> {
        dependencies::add_dependency_on_conn(&mut *self.conn.borrow_mut(), dep, actor)
    }

    fn remove_dependency(&self, issue_id: &str, depends_on_id: &str, actor: &str) -> Result<()> {
        dependencies::remove_dependency_on_conn(&mut *self.conn.borrow_mut(), issue_id, depends_on_id, actor)
    }

    fn get_dependency_records(&self, issue_id: &str) -> Result<Vec<Dependency>> {
        dependencies::get_dependency_records_on_conn(&mut *self.conn.borrow_mut(), issue_id)
    }

    fn add_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()> {
        labels::add_label_on_conn(&mut *self.conn.borrow_mut(), issue_id, label, actor)
    }

    fn remove_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()> {
        labels::remove_label_on_conn(&mut *self.conn.borrow_mut(), issue_id, label, actor)
    }

    fn get_labels(&self, issue_id: &str) -> Result<Vec<String>> {
        labels::get_labels_on_conn(&mut *self.conn.borrow_mut(), issue_id)
    }

    fn set_config(&self, key: &str, value: &str) -> Result<()> {
        config::set_config_on_conn(&mut *self.conn.borrow_mut(), key, value)
    }

    fn get_config(&self, key: &str) -> Result<String> {
        config::get_config_on_conn(&mut *self.conn.borrow_mut(), key)
    }

    fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        config::set_metadata_on_conn(&mut *self.conn.borrow_mut(), key, value)
    }

    fn get_metadata(&self, key: &str) -> Result<String> {
        config::get_metadata_on_conn(&mut *self.conn.borrow_mut(), key)
    }

    fn add_comment(&self, issue_id: &str, actor: &str, comment: &str) -> Result<()> {
        comments::add_comment_no_event(&mut *self.conn.borrow_mut(), issue_id, actor, comment)?;
        Ok(())
    }

    fn import_comment(&self, issue_id: &str, author: &str, text: &str, created_at: DateTime<Utc>) -> Result<Comment> {
        comments::import_comment_on_conn(&mut *self.conn.borrow_mut(), issue_id, author, text, &created_at)
    }

    fn get_comments(&self, issue_id: &str) -> Result<Vec<Comment>> {
        comments::get_comments_on_conn(&mut *self.conn.borrow_mut(), issue_id)
    }
}

impl DoltStore {
    pub(crate) fn run_in_transaction_impl(&self, f: &dyn Fn(&dyn Transaction) -> Result<()>) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.start_transaction(TxOpts::default()).map_err(crate::error::StorageError::DoltQuery)?;
            let handle = DoltTx::new(tx);
            match f(&handle) {
                Ok(()) => handle.into_inner().commit().map_err(crate::error::StorageError::DoltQuery),
                Err(e) => {
                    let _ = handle.into_inner().rollback();
                    Err(e)
                }
            }
        })
    }
}
