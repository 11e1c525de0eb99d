//! Profile, product and urge-log persistence.

use crate::model::catalog::{Product, Profile, UrgeLog};
use crate::repo::{bool_to_int, int_to_bool, parse_uuid, RepoError, RepoResult};
use rusqlite::{params, Connection};

pub trait CatalogRepository {
    /// Stores the single profile row, replacing any previous one.
    fn save_profile(&self, profile: &Profile) -> RepoResult<()>;
    fn get_profile(&self) -> RepoResult<Option<Profile>>;
    fn insert_product(&self, product: &Product) -> RepoResult<()>;
    fn list_products(&self) -> RepoResult<Vec<Product>>;
    fn insert_urge_log(&self, urge: &UrgeLog) -> RepoResult<()>;
    fn list_urge_logs_between(&self, start_ms: i64, end_ms: i64) -> RepoResult<Vec<UrgeLog>>;
}

pub struct SqliteCatalogRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteCatalogRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl CatalogRepository for SqliteCatalogRepository<'_> {
    fn save_profile(&self, profile: &Profile) -> RepoResult<()> {
        self.conn.execute("DELETE FROM profiles;", [])?;
        self.conn.execute(
            "INSERT INTO profiles (uuid, display_name, baseline_per_day, created_at)
             VALUES (?1, ?2, ?3, ?4);",
            params![
                profile.id.to_string(),
                profile.display_name.as_str(),
                profile.baseline_per_day,
                profile.created_at_ms,
            ],
        )?;
        Ok(())
    }

    fn get_profile(&self) -> RepoResult<Option<Profile>> {
        let mut stmt = self.conn.prepare(
            "SELECT uuid, display_name, baseline_per_day, created_at
             FROM profiles ORDER BY created_at ASC LIMIT 1;",
        )?;
        let mut rows = stmt.query([])?;
        if let Some(row) = rows.next()? {
            let uuid_text: String = row.get("uuid")?;
            return Ok(Some(Profile {
                id: parse_uuid(&uuid_text, "profiles.uuid")?,
                display_name: row.get("display_name")?,
                baseline_per_day: row.get("baseline_per_day")?,
                created_at_ms: row.get("created_at")?,
            }));
        }
        Ok(None)
    }

    fn insert_product(&self, product: &Product) -> RepoResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO products (uuid, name, units_per_pack, price_minor)
             VALUES (?1, ?2, ?3, ?4);",
            params![
                product.id.to_string(),
                product.name.as_str(),
                product.units_per_pack,
                product.price_minor,
            ],
        )?;
        Ok(())
    }

    fn list_products(&self) -> RepoResult<Vec<Product>> {
        let mut stmt = self.conn.prepare(
            "SELECT uuid, name, units_per_pack, price_minor FROM products ORDER BY name ASC;",
        )?;
        let mut rows = stmt.query([])?;
        let mut products = Vec::new();
        while let Some(row) = rows.next()? {
            let uuid_text: String = row.get("uuid")?;
            products.push(Product {
                id: parse_uuid(&uuid_text, "products.uuid")?,
                name: row.get("name")?,
                units_per_pack: row.get("units_per_pack")?,
                price_minor: row.get("price_minor")?,
            });
        }
        Ok(products)
    }

    fn insert_urge_log(&self, urge: &UrgeLog) -> RepoResult<()> {
        if !(1..=5).contains(&urge.intensity) {
            return Err(RepoError::InvalidInput(format!(
                "urge intensity must be 1..=5, got {}",
                urge.intensity
            )));
        }
        self.conn.execute(
            "INSERT OR IGNORE INTO urge_logs (uuid, timestamp_ms, intensity, resisted, note)
             VALUES (?1, ?2, ?3, ?4, ?5);",
            params![
                urge.id.to_string(),
                urge.timestamp_ms,
                urge.intensity,
                bool_to_int(urge.resisted),
                urge.note.as_str(),
            ],
        )?;
        Ok(())
    }

    fn list_urge_logs_between(&self, start_ms: i64, end_ms: i64) -> RepoResult<Vec<UrgeLog>> {
        let mut stmt = self.conn.prepare(
            "SELECT uuid, timestamp_ms, intensity, resisted, note
             FROM urge_logs
             WHERE timestamp_ms >= ?1 AND timestamp_ms < ?2
             ORDER BY timestamp_ms ASC, uuid ASC;",
        )?;
        let mut rows = stmt.query(params![start_ms, end_ms])?;
        let mut urges = Vec::new();
        while let Some(row) = rows.next()? {
            let uuid_text: String = row.get("uuid")?;
            urges.push(UrgeLog {
                id: parse_uuid(&uuid_text, "urge_logs.uuid")?,
                timestamp_ms: row.get("timestamp_ms")?,
                intensity: row.get("intensity")?,
                resisted: int_to_bool(row.get("resisted")?, "urge_logs.resisted")?,
                note: row.get("note")?,
            });
        }
        Ok(urges)
    }
}

#[cfg(test)]
mod tests {
    use super::{CatalogRepository, SqliteCatalogRepository};
    use crate::db::open_db_in_memory;
    use crate::model::catalog::{Profile, UrgeLog};
    use crate::repo::RepoError;
    use uuid::Uuid;

    #[test]
    fn save_profile_keeps_a_single_row() {
        let conn = open_db_in_memory().unwrap();
        let repo = SqliteCatalogRepository::new(&conn);
        for name in ["first", "second"] {
            repo.save_profile(&Profile {
                id: Uuid::new_v4(),
                display_name: name.to_string(),
                baseline_per_day: Some(12),
                created_at_ms: 1,
            })
            .unwrap();
        }

        let profile = repo.get_profile().unwrap().unwrap();
        assert_eq!(profile.display_name, "second");
    }

    #[test]
    fn urge_intensity_out_of_range_is_rejected() {
        let conn = open_db_in_memory().unwrap();
        let repo = SqliteCatalogRepository::new(&conn);
        let err = repo
            .insert_urge_log(&UrgeLog {
                id: Uuid::new_v4(),
                timestamp_ms: 1,
                intensity: 9,
                resisted: true,
                note: String::new(),
            })
            .unwrap_err();
        assert!(matches!(err, RepoError::InvalidInput(_)));
    }
}
