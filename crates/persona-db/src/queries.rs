use crate::models::{CharacterChanges, CharacterRow, MessageRow, UserRow};
use crate::Database;
use anyhow::Result;
use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, Row};
use tracing::info;
use uuid::Uuid;

/// Timestamp format used for every `created_at`/`updated_at` column.
/// Millisecond precision keeps turns written in quick succession ordered.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl Database {
    // -- Users --

    pub fn create_user(&self, id: &str, email: &str, password_hash: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, email, password, created_at) VALUES (?1, ?2, ?3, ?4)",
                (id, email, password_hash, now_timestamp()),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email", email))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    // -- Characters --

    pub fn list_characters(&self) -> Result<Vec<CharacterRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, description, image, base_prompt, greeting_text, created_at, updated_at
                 FROM characters
                 ORDER BY created_at ASC, rowid ASC",
            )?;
            let rows = stmt
                .query_map([], character_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_character(&self, id: &str) -> Result<Option<CharacterRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, name, description, image, base_prompt, greeting_text, created_at, updated_at
                 FROM characters WHERE id = ?1",
                [id],
                character_from_row,
            )
            .optional()
        })
    }

    pub fn create_character(&self, row: &CharacterRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO characters
                    (id, name, description, image, base_prompt, greeting_text, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    row.id,
                    row.name,
                    row.description,
                    row.image,
                    row.base_prompt,
                    row.greeting_text,
                    row.created_at,
                    row.updated_at,
                ],
            )?;
            Ok(())
        })
    }

    /// Returns the updated row, or `None` if no character has this id.
    pub fn update_character(
        &self,
        id: &str,
        changes: &CharacterChanges<'_>,
    ) -> Result<Option<CharacterRow>> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE characters
                 SET name = ?2,
                     description = ?3,
                     image = COALESCE(?4, image),
                     base_prompt = ?5,
                     greeting_text = ?6,
                     updated_at = ?7
                 WHERE id = ?1",
                rusqlite::params![
                    id,
                    changes.name,
                    changes.description,
                    changes.image,
                    changes.base_prompt,
                    changes.greeting_text,
                    now_timestamp(),
                ],
            )?;
            if updated == 0 {
                return Ok(None);
            }
            conn.query_row(
                "SELECT id, name, description, image, base_prompt, greeting_text, created_at, updated_at
                 FROM characters WHERE id = ?1",
                [id],
                character_from_row,
            )
            .optional()
        })
    }

    /// Deletes the character and, through the cascade, all of its turns.
    /// Returns false if nothing was deleted.
    pub fn delete_character(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let deleted = conn.execute("DELETE FROM characters WHERE id = ?1", [id])?;
            Ok(deleted > 0)
        })
    }

    // -- Turns --

    /// All turns of one (character, user) conversation in replay order.
    pub fn list_turns(&self, character_id: &str, user_id: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, character_id, user_id, content, role, created_at
                 FROM messages
                 WHERE character_id = ?1 AND user_id = ?2
                 ORDER BY created_at ASC, rowid ASC",
            )?;
            let rows = stmt
                .query_map([character_id, user_id], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn create_turn(
        &self,
        character_id: &str,
        user_id: &str,
        content: &str,
        role: Option<&str>,
    ) -> Result<String> {
        self.with_conn(|conn| insert_turn(conn, character_id, user_id, content, role))
    }

    /// Writes the user turn and the model turn of one exchange in a single
    /// transaction. Returns the ids of both rows, user turn first.
    pub fn record_exchange(
        &self,
        character_id: &str,
        user_id: &str,
        utterance: &str,
        reply: &str,
    ) -> Result<(String, String)> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let user_turn = insert_turn(&tx, character_id, user_id, utterance, Some("user"))?;
            let model_turn = insert_turn(&tx, character_id, user_id, reply, Some("model"))?;
            tx.commit()?;
            Ok((user_turn, model_turn))
        })
    }

    pub fn delete_turns(&self, character_id: &str, user_id: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let deleted = conn.execute(
                "DELETE FROM messages WHERE character_id = ?1 AND user_id = ?2",
                [character_id, user_id],
            )?;
            Ok(deleted)
        })
    }

    /// Legacy backfill: rows written before roles existed become user turns.
    pub fn backfill_turn_roles(&self, character_id: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE messages SET role = 'user' WHERE character_id = ?1 AND role IS NULL",
                [character_id],
            )?;
            if updated > 0 {
                info!("Backfilled role on {} turns of character {}", updated, character_id);
            }
            Ok(updated)
        })
    }
}

fn insert_turn(
    conn: &Connection,
    character_id: &str,
    user_id: &str,
    content: &str,
    role: Option<&str>,
) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO messages (id, character_id, user_id, content, role, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![id, character_id, user_id, content, role, now_timestamp()],
    )?;
    Ok(id)
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    // column is one of a fixed set chosen by the callers above
    let sql = format!(
        "SELECT id, email, password, created_at FROM users WHERE {} = ?1",
        column
    );
    let mut stmt = conn.prepare(&sql)?;

    stmt.query_row([value], |row| {
        Ok(UserRow {
            id: row.get(0)?,
            email: row.get(1)?,
            password: row.get(2)?,
            created_at: row.get(3)?,
        })
    })
    .optional()
}

fn character_from_row(row: &Row<'_>) -> rusqlite::Result<CharacterRow> {
    Ok(CharacterRow {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        image: row.get(3)?,
        base_prompt: row.get(4)?,
        greeting_text: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        character_id: row.get(1)?,
        user_id: row.get(2)?,
        content: row.get(3)?,
        role: row.get(4)?,
        created_at: row.get(5)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> (Database, String, String) {
        let db = Database::open_in_memory().unwrap();
        let user_id = Uuid::new_v4().to_string();
        db.create_user(&user_id, "ada@example.com", "hash").unwrap();

        let character_id = Uuid::new_v4().to_string();
        let now = now_timestamp();
        db.create_character(&CharacterRow {
            id: character_id.clone(),
            name: "Ada".into(),
            description: "Analyst".into(),
            image: "/uploads/ada.png".into(),
            base_prompt: "You are Ada.".into(),
            greeting_text: "Hello.".into(),
            created_at: now.clone(),
            updated_at: now,
        })
        .unwrap();

        (db, character_id, user_id)
    }

    #[test]
    fn turns_come_back_in_insertion_order() {
        let (db, cid, uid) = seeded();
        for (i, role) in ["user", "model", "user", "model"].iter().enumerate() {
            db.create_turn(&cid, &uid, &format!("turn {}", i), Some(*role)).unwrap();
        }

        let turns = db.list_turns(&cid, &uid).unwrap();
        let contents: Vec<_> = turns.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["turn 0", "turn 1", "turn 2", "turn 3"]);
    }

    #[test]
    fn turns_are_scoped_to_the_user() {
        let (db, cid, uid) = seeded();
        let other = Uuid::new_v4().to_string();
        db.create_user(&other, "grace@example.com", "hash").unwrap();

        db.create_turn(&cid, &uid, "mine", Some("user")).unwrap();
        db.create_turn(&cid, &other, "theirs", Some("user")).unwrap();

        let turns = db.list_turns(&cid, &uid).unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].content, "mine");
    }

    #[test]
    fn record_exchange_writes_user_then_model() {
        let (db, cid, uid) = seeded();
        let (user_turn, model_turn) = db.record_exchange(&cid, &uid, "hi", "hello back").unwrap();

        let turns = db.list_turns(&cid, &uid).unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].id, user_turn);
        assert_eq!(turns[0].role.as_deref(), Some("user"));
        assert_eq!(turns[1].id, model_turn);
        assert_eq!(turns[1].role.as_deref(), Some("model"));
        assert_eq!(turns[1].content, "hello back");
    }

    #[test]
    fn record_exchange_for_unknown_character_writes_nothing() {
        let (db, _cid, uid) = seeded();
        assert!(db.record_exchange("missing", &uid, "hi", "hello").is_err());
        let count: i64 = db
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM messages", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn backfill_is_idempotent() {
        let (db, cid, uid) = seeded();
        db.create_turn(&cid, &uid, "legacy", None).unwrap();
        db.create_turn(&cid, &uid, "reply", Some("model")).unwrap();

        assert_eq!(db.backfill_turn_roles(&cid).unwrap(), 1);
        let first: Vec<_> = db.list_turns(&cid, &uid).unwrap().into_iter().map(|t| t.role).collect();

        assert_eq!(db.backfill_turn_roles(&cid).unwrap(), 0);
        let second: Vec<_> = db.list_turns(&cid, &uid).unwrap().into_iter().map(|t| t.role).collect();

        assert_eq!(first, vec![Some("user".to_string()), Some("model".to_string())]);
        assert_eq!(first, second);
    }

    #[test]
    fn delete_turns_clears_only_that_conversation() {
        let (db, cid, uid) = seeded();
        let other = Uuid::new_v4().to_string();
        db.create_user(&other, "grace@example.com", "hash").unwrap();
        db.record_exchange(&cid, &uid, "a", "b").unwrap();
        db.record_exchange(&cid, &other, "c", "d").unwrap();

        assert_eq!(db.delete_turns(&cid, &uid).unwrap(), 2);
        assert!(db.list_turns(&cid, &uid).unwrap().is_empty());
        assert_eq!(db.list_turns(&cid, &other).unwrap().len(), 2);
    }

    #[test]
    fn update_keeps_image_when_not_given() {
        let (db, cid, _uid) = seeded();
        let updated = db
            .update_character(
                &cid,
                &CharacterChanges {
                    name: "Ada L.",
                    description: "Countess",
                    image: None,
                    base_prompt: "You are Ada Lovelace.",
                    greeting_text: "Good evening.",
                },
            )
            .unwrap()
            .unwrap();
        assert_eq!(updated.name, "Ada L.");
        assert_eq!(updated.image, "/uploads/ada.png");

        assert!(db
            .update_character(
                "missing",
                &CharacterChanges {
                    name: "x",
                    description: "y",
                    image: Some("z"),
                    base_prompt: "",
                    greeting_text: "",
                },
            )
            .unwrap()
            .is_none());
    }

    #[test]
    fn deleting_character_cascades_to_turns() {
        let (db, cid, uid) = seeded();
        db.record_exchange(&cid, &uid, "a", "b").unwrap();

        assert!(db.delete_character(&cid).unwrap());
        assert!(!db.delete_character(&cid).unwrap());
        assert!(db.get_character(&cid).unwrap().is_none());
        assert!(db.list_turns(&cid, &uid).unwrap().is_empty());
    }

    #[test]
    fn users_are_found_by_email_and_id() {
        let (db, _cid, uid) = seeded();
        let by_email = db.get_user_by_email("ada@example.com").unwrap().unwrap();
        assert_eq!(by_email.id, uid);
        assert!(db.get_user_by_id(&uid).unwrap().is_some());
        assert!(db.get_user_by_email("nobody@example.com").unwrap().is_none());
        assert!(db.create_user(&Uuid::new_v4().to_string(), "ada@example.com", "h").is_err());
    }

    #[test]
    fn duplicate_email_is_a_constraint_violation() {
        let (db, _cid, _uid) = seeded();
        let err = db
            .create_user(&Uuid::new_v4().to_string(), "ada@example.com", "h")
            .unwrap_err();
        assert!(crate::is_constraint_violation(&err));

        let other = db.with_conn(|conn| {
            conn.execute("SELECT * FROM no_such_table", [])?;
            Ok(())
        });
        assert!(!crate::is_constraint_violation(&other.unwrap_err()));
    }
}
