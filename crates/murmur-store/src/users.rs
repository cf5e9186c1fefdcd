use rusqlite::{params, OptionalExtension};

use murmur_shared::{Profile, ProfileUpdate, UserId};

use crate::database::Database;
use crate::error::{not_found, Result};
use crate::messages::{format_ts, now, parse_ts};

const PROFILE_COLUMNS: &str = "id, full_name, bio, profile_pic, created_at, updated_at";

impl Database {
    /// Insert or update the public profile for `id`. `created_at` is kept
    /// on update.
    pub fn upsert_profile(&self, id: &UserId, update: &ProfileUpdate) -> Result<Profile> {
        let ts = format_ts(&now());

        self.conn().execute(
            "INSERT INTO users (id, full_name, bio, profile_pic, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT(id) DO UPDATE SET
                full_name   = excluded.full_name,
                bio         = excluded.bio,
                profile_pic = COALESCE(excluded.profile_pic, users.profile_pic),
                updated_at  = excluded.updated_at",
            params![
                id.as_str(),
                update.full_name.trim(),
                update.bio.trim(),
                update.profile_pic,
                ts,
            ],
        )?;

        self.get_profile(id)
    }

    pub fn get_profile(&self, id: &UserId) -> Result<Profile> {
        self.conn()
            .query_row(
                &format!("SELECT {PROFILE_COLUMNS} FROM users WHERE id = ?1"),
                params![id.as_str()],
                row_to_profile,
            )
            .map_err(not_found)
    }

    pub fn profile_exists(&self, id: &UserId) -> Result<bool> {
        let found = self
            .conn()
            .query_row(
                "SELECT 1 FROM users WHERE id = ?1",
                params![id.as_str()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Every profile except `viewer`'s own, oldest account first.
    pub fn list_profiles_except(&self, viewer: &UserId) -> Result<Vec<Profile>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {PROFILE_COLUMNS} FROM users WHERE id != ?1 ORDER BY created_at ASC, rowid ASC"
        ))?;

        let rows = stmt.query_map(params![viewer.as_str()], row_to_profile)?;

        let mut profiles = Vec::new();
        for row in rows {
            profiles.push(row?);
        }
        Ok(profiles)
    }
}

fn row_to_profile(row: &rusqlite::Row<'_>) -> rusqlite::Result<Profile> {
    let id: String = row.get(0)?;
    let full_name: String = row.get(1)?;
    let bio: String = row.get(2)?;
    let profile_pic: Option<String> = row.get(3)?;
    let created: String = row.get(4)?;
    let updated: String = row.get(5)?;

    Ok(Profile {
        id: UserId(id),
        full_name,
        bio,
        profile_pic,
        created_at: parse_ts(4, &created)?,
        updated_at: parse_ts(5, &updated)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StoreError;

    fn update(name: &str) -> ProfileUpdate {
        ProfileUpdate {
            full_name: name.to_string(),
            bio: "hello".to_string(),
            profile_pic: None,
        }
    }

    #[test]
    fn upsert_creates_then_updates() {
        let db = Database::open_in_memory().unwrap();
        let id = UserId::from("alice");

        let created = db.upsert_profile(&id, &update("  Alice ")).unwrap();
        assert_eq!(created.full_name, "Alice");
        assert!(db.profile_exists(&id).unwrap());

        let mut change = update("Alice B");
        change.profile_pic = Some("https://img/a.png".into());
        let updated = db.upsert_profile(&id, &change).unwrap();
        assert_eq!(updated.full_name, "Alice B");
        assert_eq!(updated.created_at, created.created_at);
        assert!(updated.updated_at >= created.updated_at);

        // Omitting the picture keeps the previous one.
        let kept = db.upsert_profile(&id, &update("Alice C")).unwrap();
        assert_eq!(kept.profile_pic.as_deref(), Some("https://img/a.png"));
    }

    #[test]
    fn list_excludes_viewer() {
        let db = Database::open_in_memory().unwrap();
        for name in ["alice", "bob", "carol"] {
            db.upsert_profile(&UserId::from(name), &update(name)).unwrap();
        }

        let peers = db.list_profiles_except(&UserId::from("bob")).unwrap();
        let ids: Vec<_> = peers.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["alice", "carol"]);
    }

    #[test]
    fn missing_profile() {
        let db = Database::open_in_memory().unwrap();
        let id = UserId::from("ghost");
        assert!(!db.profile_exists(&id).unwrap());
        assert!(matches!(db.get_profile(&id), Err(StoreError::NotFound)));
    }
}
