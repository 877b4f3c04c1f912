//! Query parameters of the chat endpoint.

use std::fmt;

use salon_core::ANONYMOUS_USERNAME;
use secrecy::SecretString;

/// Credentials and identity a client supplies when connecting.
///
/// Built from the raw query pairs; when a key repeats, its first value wins.
pub struct ConnectParams {
    pub username: String,
    /// Absent and empty passwords are both `None`.
    pub password: Option<SecretString>,
    pub create: bool,
}

impl ConnectParams {
    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut username = None;
        let mut password = None;
        let mut create = None;
        for (key, value) in pairs {
            let slot = match key.as_str() {
                "username" => &mut username,
                "password" => &mut password,
                "create" => &mut create,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value);
            }
        }

        Self {
            username: username
                .filter(|u| !u.is_empty())
                .unwrap_or_else(|| ANONYMOUS_USERNAME.to_string()),
            password: password.filter(|p| !p.is_empty()).map(SecretString::from),
            create: create.as_deref().is_some_and(parse_create_flag),
        }
    }
}

impl fmt::Debug for ConnectParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectParams")
            .field("username", &self.username)
            .field("has_password", &self.password.is_some())
            .field("create", &self.create)
            .finish()
    }
}

/// `"1"` or any casing of `"true"`.
pub fn parse_create_flag(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}
