//! Tag repository contract and SQLite implementation.
//!
//! # Invariants
//! - Tag names are unique case-insensitively (`COLLATE NOCASE`).
//! - Deleting a tag removes its links but never the events.

use crate::model::tag::{Tag, TagId};
use crate::repo::{parse_uuid, RepoError, RepoResult};
use rusqlite::{params, Connection, ErrorCode, Row};

pub trait TagRepository {
    fn insert_tag(&self, tag: &Tag) -> RepoResult<TagId>;
    fn update_tag(&self, tag: &Tag) -> RepoResult<()>;
    fn delete_tag(&self, id: TagId) -> RepoResult<()>;
    fn get_tag(&self, id: TagId) -> RepoResult<Option<Tag>>;
    /// All tags sorted by name.
    fn list_tags(&self) -> RepoResult<Vec<Tag>>;
}

pub struct SqliteTagRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteTagRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl TagRepository for SqliteTagRepository<'_> {
    fn insert_tag(&self, tag: &Tag) -> RepoResult<TagId> {
        self.conn
            .execute(
                "INSERT INTO tags (uuid, name, color) VALUES (?1, ?2, ?3);",
                params![tag.id.to_string(), tag.name.as_str(), tag.color.as_str()],
            )
            .map_err(|err| map_unique_violation(err, &tag.name))?;
        Ok(tag.id)
    }

    fn update_tag(&self, tag: &Tag) -> RepoResult<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE tags SET name = ?2, color = ?3 WHERE uuid = ?1;",
                params![tag.id.to_string(), tag.name.as_str(), tag.color.as_str()],
            )
            .map_err(|err| map_unique_violation(err, &tag.name))?;
        if changed == 0 {
            return Err(RepoError::NotFound(tag.id));
        }
        Ok(())
    }

    fn delete_tag(&self, id: TagId) -> RepoResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM tags WHERE uuid = ?1;", [id.to_string()])?;
        if changed == 0 {
            return Err(RepoError::NotFound(id));
        }
        Ok(())
    }

    fn get_tag(&self, id: TagId) -> RepoResult<Option<Tag>> {
        let mut stmt = self
            .conn
            .prepare("SELECT uuid, name, color FROM tags WHERE uuid = ?1;")?;
        let mut rows = stmt.query([id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_tag_row(row)?));
        }
        Ok(None)
    }

    fn list_tags(&self) -> RepoResult<Vec<Tag>> {
        let mut stmt = self
            .conn
            .prepare("SELECT uuid, name, color FROM tags ORDER BY name COLLATE NOCASE ASC;")?;
        let mut rows = stmt.query([])?;
        let mut tags = Vec::new();
        while let Some(row) = rows.next()? {
            tags.push(parse_tag_row(row)?);
        }
        Ok(tags)
    }
}

fn parse_tag_row(row: &Row<'_>) -> RepoResult<Tag> {
    let uuid_text: String = row.get("uuid")?;
    Ok(Tag {
        id: parse_uuid(&uuid_text, "tags.uuid")?,
        name: row.get("name")?,
        color: row.get("color")?,
    })
}

fn map_unique_violation(err: rusqlite::Error, name: &str) -> RepoError {
    match &err {
        rusqlite::Error::SqliteFailure(inner, _)
            if inner.code == ErrorCode::ConstraintViolation =>
        {
            RepoError::Conflict(format!("tag name already exists: {name}"))
        }
        _ => err.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::{SqliteTagRepository, TagRepository};
    use crate::db::open_db_in_memory;
    use crate::model::tag::Tag;
    use crate::repo::RepoError;

    #[test]
    fn duplicate_names_conflict_case_insensitively() {
        let conn = open_db_in_memory().unwrap();
        let repo = SqliteTagRepository::new(&conn);
        repo.insert_tag(&Tag::new("Stress", "#FF0000")).unwrap();

        let err = repo.insert_tag(&Tag::new("stress", "#00FF00")).unwrap_err();
        assert!(matches!(err, RepoError::Conflict(_)));
    }

    #[test]
    fn list_is_sorted_by_name() {
        let conn = open_db_in_memory().unwrap();
        let repo = SqliteTagRepository::new(&conn);
        repo.insert_tag(&Tag::new("work", "#111111")).unwrap();
        repo.insert_tag(&Tag::new("Coffee", "#222222")).unwrap();

        let names: Vec<String> = repo
            .list_tags()
            .unwrap()
            .into_iter()
            .map(|tag| tag.name)
            .collect();
        assert_eq!(names, vec!["Coffee".to_string(), "work".to_string()]);
    }
}
