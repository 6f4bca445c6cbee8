//! Comment operations for [`SqliteStore`].

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};

use braid_core::comment::Comment;
use braid_core::enums::EventType;

use crate::error::Result;
use crate::sqlite::issues::{emit_event, format_datetime, parse_datetime};
use crate::sqlite::store::SqliteStore;

// ---------------------------------------------------------------------------
// Connection-level helpers (shared with Transaction)
// ---------------------------------------------------------------------------

pub(crate) fn add_comment_on_conn(
    conn: &Connection,
    issue_id: &str,
    author: &str,
    text: &str,
) -> Result<Comment> {
    let now = Utc::now();
    let now_str = format_datetime(&now);

    conn.execute(
        "INSERT INTO comments (issue_id, author, text, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![issue_id, author, text, now_str],
    )?;
    let id = conn.last_insert_rowid();

    emit_event(
        conn,
        issue_id,
        EventType::Commented,
        author,
        None,
        None,
        &now_str,
    )?;

    Ok(Comment {
        id,
        issue_id: issue_id.to_owned(),
        author: author.to_owned(),
        text: text.to_owned(),
        created_at: now,
    })
}

/// Inserts a comment with an explicit timestamp and no event. Import uses
/// this so replayed comments do not fabricate audit entries.
pub(crate) fn import_comment_on_conn(
    conn: &Connection,
    issue_id: &str,
    author: &str,
    text: &str,
    created_at: DateTime<Utc>,
) -> Result<Comment> {
    conn.execute(
        "INSERT INTO comments (issue_id, author, text, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![issue_id, author, text, format_datetime(&created_at)],
    )?;
    let id = conn.last_insert_rowid();

    Ok(Comment {
        id,
        issue_id: issue_id.to_owned(),
        author: author.to_owned(),
        text: text.to_owned(),
        created_at,
    })
}

pub(crate) fn get_comments_on_conn(conn: &Connection, issue_id: &str) -> Result<Vec<Comment>> {
    let mut stmt = conn.prepare(
        "SELECT id, issue_id, author, text, created_at
         FROM comments WHERE issue_id = ?1 ORDER BY id",
    )?;
    let rows = stmt.query_map(params![issue_id], |row| {
        Ok(Comment {
            id: row.get("id")?,
            issue_id: row.get("issue_id")?,
            author: row.get("author")?,
            text: row.get("text")?,
            created_at: parse_datetime(&row.get::<_, String>("created_at")?),
        })
    })?;

    let mut comments = Vec::new();
    for row in rows {
        comments.push(row?);
    }
    Ok(comments)
}

// ---------------------------------------------------------------------------
// SqliteStore methods
// ---------------------------------------------------------------------------

impl SqliteStore {
    /// Adds a comment to an issue.
    pub fn add_comment_impl(&self, issue_id: &str, author: &str, text: &str) -> Result<Comment> {
        let conn = self.lock_conn()?;
        add_comment_on_conn(&conn, issue_id, author, text)
    }

    /// Returns all comments for an issue in insertion order.
    pub fn get_comments_impl(&self, issue_id: &str) -> Result<Vec<Comment>> {
        let conn = self.lock_conn()?;
        get_comments_on_conn(&conn, issue_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use braid_core::issue::IssueBuilder;

    fn test_store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    #[test]
    fn add_and_list_comments() {
        let store = test_store();
        let issue = IssueBuilder::new("Commented").id("br-cm1").build();
        store.create_issue_impl(&issue, "alice").unwrap();

        let c1 = store.add_comment_impl("br-cm1", "alice", "first").unwrap();
        let c2 = store.add_comment_impl("br-cm1", "bob", "second").unwrap();
        assert!(c2.id > c1.id);

        let comments = store.get_comments_impl("br-cm1").unwrap();
        assert_eq!(comments.len(), 2);
        assert_eq!(comments[0].text, "first");
        assert_eq!(comments[1].author, "bob");
    }
}
