use std::fmt;

use serde::{Deserialize, Serialize};

use crate::auth::repo_types::CreatedUser;

/// Request body for user registration. Absent fields deserialize as `None`
/// so they surface as validation errors rather than body rejections.
#[derive(Default, Deserialize)]
pub struct SignupRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl fmt::Debug for SignupRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignupRequest")
            .field("name", &self.name)
            .field("email", &self.email)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Request body for the login placeholder. The password is never read, so
/// it is not deserialized.
#[derive(Default, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: Option<String>,
}

/// `data` of a successful signup.
#[derive(Debug, Serialize)]
pub struct SignupResponse {
    pub user: CreatedUser,
}

#[derive(Debug, Serialize)]
pub struct EndpointInfo {
    pub method: &'static str,
    pub path: &'static str,
    pub description: &'static str,
}
