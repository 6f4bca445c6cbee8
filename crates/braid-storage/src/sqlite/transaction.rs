//! Transaction wrapper for [`SqliteStore`].

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use braid_core::comment::Comment;
use braid_core::dependency::Dependency;
use braid_core::filter::IssueFilter;
use braid_core::issue::Issue;

use crate::error::{Result, StorageError};
use crate::sqlite::comments;
use crate::sqlite::config;
use crate::sqlite::dependencies;
use crate::sqlite::issues;
use crate::sqlite::labels;
use crate::sqlite::store::SqliteStore;
use crate::traits::{IssueUpdates, Transaction};

/// A thin wrapper around a connection with an active transaction.
///
/// Delegates to the same connection-level helpers the store uses, so a
/// rolled-back transaction leaves no rows and no events behind.
pub(crate) struct SqliteTx<'a> {
    pub(crate) conn: &'a Connection,
}

impl Transaction for SqliteTx<'_> {
    fn create_issue(&self, issue: &Issue, actor: &str) -> Result<()> {
        issues::insert_issue(self.conn, issue, actor)
    }

    fn update_issue(&self, id: &str, updates: &IssueUpdates, actor: &str) -> Result<()> {
        issues::update_issue_on_conn(self.conn, id, updates, actor)
    }

    fn close_issue(&self, id: &str, reason: &str, actor: &str) -> Result<()> {
        issues::close_issue_on_conn(self.conn, id, reason, actor)
    }

    fn delete_issue(&self, id: &str, actor: &str) -> Result<()> {
        issues::delete_issue_on_conn(self.conn, id, actor)
    }

    fn get_issue(&self, id: &str) -> Result<Issue> {
        issues::get_issue_on_conn(self.conn, id)
    }

    fn search_issues(&self, query: &str, filter: &IssueFilter) -> Result<Vec<Issue>> {
        issues::search_issues_on_conn(self.conn, query, filter)
    }

    fn add_dependency(&self, dep: &Dependency, actor: &str) -> Result<()> {
        dependencies::add_dependency_on_conn(self.conn, dep, actor)
    }

    fn remove_dependency(&self, issue_id: &str, depends_on_id: &str, actor: &str) -> Result<()> {
        dependencies::remove_dependency_on_conn(self.conn, issue_id, depends_on_id, actor)
    }

    fn get_dependency_records(&self, issue_id: &str) -> Result<Vec<Dependency>> {
        dependencies::get_dependency_records_on_conn(self.conn, issue_id)
    }

    fn add_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()> {
        labels::add_label_on_conn(self.conn, issue_id, label, actor)
    }

    fn remove_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()> {
        labels::remove_label_on_conn(self.conn, issue_id, label, actor)
    }

    fn get_labels(&self, issue_id: &str) -> Result<Vec<String>> {
        labels::get_labels_on_conn(self.conn, issue_id)
    }

    fn set_config(&self, key: &str, value: &str) -> Result<()> {
        config::set_config_on_conn(self.conn, key, value)
    }

    fn get_config(&self, key: &str) -> Result<String> {
        config::get_config_on_conn(self.conn, key)
    }

    fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        config::set_metadata_on_conn(self.conn, key, value)
    }

    fn get_metadata(&self, key: &str) -> Result<String> {
        config::get_metadata_on_conn(self.conn, key)
    }

    fn add_comment(&self, issue_id: &str, author: &str, text: &str) -> Result<Comment> {
        comments::add_comment_on_conn(self.conn, issue_id, author, text)
    }

    fn import_comment(
        &self,
        issue_id: &str,
        author: &str,
        text: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Comment> {
        comments::import_comment_on_conn(self.conn, issue_id, author, text, created_at)
    }

    fn get_comments(&self, issue_id: &str) -> Result<Vec<Comment>> {
        comments::get_comments_on_conn(self.conn, issue_id)
    }

    fn import_issue(&self, issue: &Issue, actor: &str) -> Result<()> {
        issues::import_issue_on_conn(self.conn, issue, actor)
    }

    fn import_dependencies(&self, issue_id: &str, deps: &[Dependency]) -> Result<Vec<String>> {
        dependencies::import_dependencies_on_conn(self.conn, issue_id, deps)
    }
}

// ---------------------------------------------------------------------------
// SqliteStore::run_in_transaction
// ---------------------------------------------------------------------------

impl SqliteStore {
    /// Runs a closure inside a database transaction.
    pub fn run_in_transaction_impl(
        &self,
        f: &dyn Fn(&dyn Transaction) -> Result<()>,
    ) -> Result<()> {
        let conn = self.lock_conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| StorageError::Transaction(format!("failed to begin: {e}")))?;

        let sqlite_tx = SqliteTx { conn: &tx };
        match f(&sqlite_tx) {
            Ok(()) => {
                tx.commit()
                    .map_err(|e| StorageError::Transaction(format!("failed to commit: {e}")))?;
                Ok(())
            }
            Err(e) => {
                // Rolled back on drop.
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use braid_core::enums::DependencyType;
    use braid_core::issue::IssueBuilder;

    fn test_store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    #[test]
    fn transaction_commit() {
        let store = test_store();

        store
            .run_in_transaction_impl(&|tx| {
                let issue = IssueBuilder::new("In transaction").id("br-tx1").build();
                tx.create_issue(&issue, "alice")?;
                tx.add_label("br-tx1", "transacted", "alice")?;
                Ok(())
            })
            .unwrap();

        let issue = store.get_issue_impl("br-tx1").unwrap();
        assert_eq!(issue.title, "In transaction");
        assert_eq!(store.get_labels_impl("br-tx1").unwrap(), vec!["transacted"]);
    }

    #[test]
    fn transaction_rollback_appends_nothing() {
        let store = test_store();

        let result = store.run_in_transaction_impl(&|tx| {
            let issue = IssueBuilder::new("Should roll back").id("br-tx2").build();
            tx.create_issue(&issue, "alice")?;
            Err(StorageError::Internal("forced rollback".into()))
        });
        assert!(result.is_err());

        assert!(store.get_issue_impl("br-tx2").unwrap_err().is_not_found());

        // No orphaned events either.
        let conn = store.lock_conn().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM events WHERE issue_id = 'br-tx2'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn transaction_with_dependencies() {
        let store = test_store();

        store
            .run_in_transaction_impl(&|tx| {
                let parent = IssueBuilder::new("Parent").id("br-txp").build();
                let child = IssueBuilder::new("Child").id("br-txc").build();
                tx.create_issue(&parent, "alice")?;
                tx.create_issue(&child, "alice")?;

                let dep =
                    Dependency::typed("br-txc", "br-txp", DependencyType::ParentChild);
                tx.add_dependency(&dep, "alice")?;
                Ok(())
            })
            .unwrap();

        let deps = store.get_dependencies_impl("br-txc").unwrap();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].id, "br-txp");
    }
}
