use crate::db;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Student,
}

impl Role {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Self::Admin),
            "student" => Some(Self::Student),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Student => "student",
        }
    }
}

/// The logged-in user for this process. Students log in with their index
/// number as username.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub username: String,
    pub role: Role,
    pub session_id: String,
    pub login_time: String,
}

impl Session {
    pub fn new(username: impl Into<String>, role: Role) -> Self {
        Self {
            username: username.into(),
            role,
            session_id: Uuid::new_v4().to_string(),
            login_time: db::now_rfc3339(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error("username already exists: {0}")]
    UsernameTaken(String),
    #[error("no student with index number {0}")]
    UnknownStudent(String),
    #[error("no user named {0}")]
    UnknownUser(String),
    #[error("password must be at least 6 characters long")]
    WeakPassword,
    #[error("username must not be empty")]
    EmptyUsername,
    #[error(transparent)]
    Db(#[from] rusqlite::Error),
}

impl AuthError {
    /// Error code at the request boundary.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "unauthorized",
            AuthError::UsernameTaken(_) => "conflict",
            AuthError::UnknownStudent(_) | AuthError::UnknownUser(_) => "not_found",
            AuthError::WeakPassword | AuthError::EmptyUsername => "bad_params",
            AuthError::Db(_) => "db_query_failed",
        }
    }
}

fn digest_hex(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b"$");
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// `sha256$<salt>$<hex digest>` with a fresh random salt.
pub fn hash_password(password: &str) -> String {
    let salt = Uuid::new_v4().simple().to_string();
    format!("sha256${}${}", salt, digest_hex(&salt, password))
}

pub fn verify_password(password: &str, stored: &str) -> bool {
    let mut parts = stored.splitn(3, '$');
    let (Some("sha256"), Some(salt), Some(expected)) = (parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    let actual = digest_hex(salt, password);
    actual.len() == expected.len()
        && actual
            .bytes()
            .zip(expected.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

pub fn validate_password_strength(password: &str) -> Result<(), AuthError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::WeakPassword);
    }
    Ok(())
}

/// Registers a user. A student account must name an existing index number.
pub fn create_user(
    conn: &Connection,
    username: &str,
    password: &str,
    role: Role,
) -> Result<(), AuthError> {
    let username = username.trim();
    if username.is_empty() {
        return Err(AuthError::EmptyUsername);
    }
    validate_password_strength(password)?;

    let taken: Option<i64> = conn
        .query_row("SELECT 1 FROM users WHERE username = ?", [username], |r| r.get(0))
        .optional()?;
    if taken.is_some() {
        return Err(AuthError::UsernameTaken(username.to_string()));
    }
    if role == Role::Student && db::get_student(conn, username)?.is_none() {
        return Err(AuthError::UnknownStudent(username.to_string()));
    }

    conn.execute(
        "INSERT INTO users(username, password_hash, role, created_at) VALUES(?, ?, ?, ?)",
        (username, hash_password(password), role.as_str(), db::now_rfc3339()),
    )?;
    tracing::info!(username, role = role.as_str(), "user registered");
    Ok(())
}

pub fn admin_exists(conn: &Connection) -> Result<bool, AuthError> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM users WHERE role = 'admin' LIMIT 1", [], |r| r.get(0))
        .optional()?;
    Ok(found.is_some())
}

/// Replaces a user's password hash. The old password is not needed.
pub fn reset_password(conn: &Connection, username: &str, new_password: &str) -> Result<(), AuthError> {
    let username = username.trim();
    validate_password_strength(new_password)?;
    let changed = conn.execute(
        "UPDATE users SET password_hash = ? WHERE username = ?",
        (hash_password(new_password), username),
    )?;
    if changed == 0 {
        return Err(AuthError::UnknownUser(username.to_string()));
    }
    tracing::info!(username, "password reset");
    Ok(())
}

pub fn authenticate(conn: &Connection, username: &str, password: &str) -> Result<Session, AuthError> {
    let username = username.trim();
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT password_hash, role FROM users WHERE username = ?",
            [username],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let Some((hash, role)) = row else {
        tracing::warn!(username, "login for unknown user");
        return Err(AuthError::InvalidCredentials);
    };
    if !verify_password(password, &hash) {
        tracing::warn!(username, "login with wrong password");
        return Err(AuthError::InvalidCredentials);
    }
    let role = Role::parse(&role).ok_or(AuthError::InvalidCredentials)?;
    let session = Session::new(username, role);
    tracing::info!(username, session_id = %session.session_id, "login");
    Ok(session)
}
