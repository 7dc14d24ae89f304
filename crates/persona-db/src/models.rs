/// Database row types. These map directly to SQLite rows.
/// Distinct from persona-types API models to keep the DB layer independent.

pub struct UserRow {
    pub id: String,
    pub email: String,
    pub password: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct CharacterRow {
    pub id: String,
    pub name: String,
    pub description: String,
    pub image: String,
    pub base_prompt: String,
    pub greeting_text: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Editable character columns. `image: None` keeps the stored image.
pub struct CharacterChanges<'a> {
    pub name: &'a str,
    pub description: &'a str,
    pub image: Option<&'a str>,
    pub base_prompt: &'a str,
    pub greeting_text: &'a str,
}

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: String,
    pub character_id: String,
    pub user_id: String,
    pub content: String,
    pub role: Option<String>,
    pub created_at: String,
}
