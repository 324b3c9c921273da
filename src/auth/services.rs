use std::fmt;

use anyhow::Context;
use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    auth::{
        dto::SignupRequest,
        password,
        repo::{StoreError, UserStore},
        repo_types::{CreatedUser, NewUser},
    },
    context::RequestContext,
    response::FieldErrors,
};

pub const MIN_PASSWORD_LEN: usize = 6;

/// Ways a signup can end other than with a created user.
#[derive(Debug, Error)]
pub enum SignupError {
    #[error("All fields are required")]
    MissingFields(FieldErrors),
    #[error("Invalid email format")]
    InvalidEmail,
    #[error("Password must be at least 6 characters long")]
    PasswordTooShort,
    #[error("User with this email already exists")]
    EmailTaken,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Deliberately permissive `local@domain.tld` check.
pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Signup input that passed every validation stage.
pub struct ValidSignup {
    pub name: String,
    pub email: String,
    pub password: String,
}

impl fmt::Debug for ValidSignup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidSignup")
            .field("name", &self.name)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

/// Presence, email syntax and password length, in that order.
pub fn validate_signup(req: SignupRequest) -> Result<ValidSignup, SignupError> {
    let present = |v: Option<String>| v.filter(|s| !s.is_empty());
    let (name, email, password) = (present(req.name), present(req.email), present(req.password));

    let mut missing = FieldErrors::new();
    if name.is_none() {
        missing.insert("name".into(), "Name is required".into());
    }
    if email.is_none() {
        missing.insert("email".into(), "Email is required".into());
    }
    if password.is_none() {
        missing.insert("password".into(), "Password is required".into());
    }
    let (Some(name), Some(email), Some(password)) = (name, email, password) else {
        return Err(SignupError::MissingFields(missing));
    };

    if !is_valid_email(&email) {
        return Err(SignupError::InvalidEmail);
    }
    // Length is counted in Unicode scalar values: "😀😀😀" is three
    // characters, not six.
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(SignupError::PasswordTooShort);
    }

    Ok(ValidSignup {
        name,
        email,
        password,
    })
}

/// Validate, reject duplicates, hash and persist.
///
/// The lookup before the insert is only a fast path: concurrent signups for
/// the same email can both pass it, and the loser of the unique constraint
/// gets [`SignupError::EmailTaken`] as well.
pub async fn register(
    store: &dyn UserStore,
    password_cost: u32,
    ctx: &RequestContext,
    req: SignupRequest,
) -> Result<CreatedUser, SignupError> {
    let signup = match validate_signup(req) {
        Ok(s) => s,
        Err(e) => {
            warn!(request_id = %ctx.id, reason = %e, "signup rejected");
            return Err(e);
        }
    };

    info!(request_id = %ctx.id, email = %signup.email, "Starting user registration process");

    let existing = store
        .find_by_email(&signup.email)
        .await
        .context("look up user by email")?;
    if existing.is_some() {
        warn!(request_id = %ctx.id, email = %signup.email, "User already exists");
        return Err(SignupError::EmailTaken);
    }

    debug!(request_id = %ctx.id, "Hashing password");
    let password_hash = password::hash_password(signup.password, password_cost).await?;

    debug!(request_id = %ctx.id, email = %signup.email, "Creating new user in database");
    let user = match store
        .insert(NewUser {
            name: &signup.name,
            email: &signup.email,
            password_hash: &password_hash,
        })
        .await
    {
        Ok(u) => u,
        Err(StoreError::DuplicateEmail) => {
            warn!(request_id = %ctx.id, email = %signup.email, "User already exists (lost insert race)");
            return Err(SignupError::EmailTaken);
        }
        Err(e) => return Err(anyhow::Error::new(e).context("insert user").into()),
    };

    info!(
        request_id = %ctx.id,
        user_id = %user.id,
        email = %user.email,
        "User created successfully"
    );
    Ok(user)
}
