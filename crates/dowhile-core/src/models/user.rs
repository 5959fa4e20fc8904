use serde::{Deserialize, Serialize};

/// Authenticated GitHub user as returned by the DoWhile backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct User {
    pub id: String,
    pub name: String,
    pub login: String,
    pub avatar_url: String,
}

impl User {
    /// Name to show in the UI, falling back to the login handle
    /// for GitHub accounts without a display name.
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.login
        } else {
            &self.name
        }
    }
}

/// Response body of `POST authenticate`.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: User,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_auth_response() {
        let json = r#"{"token":"T2","user":{"id":"2","name":"Ana","login":"ana","avatar_url":"u"}}"#;
        let resp: AuthResponse = serde_json::from_str(json).expect("Failed to parse auth JSON");
        assert_eq!(resp.token, "T2");
        assert_eq!(resp.user.login, "ana");
        assert_eq!(resp.user.avatar_url, "u");
    }

    #[test]
    fn test_display_name_falls_back_to_login() {
        let mut user = User {
            id: "1".to_string(),
            name: "Ana".to_string(),
            login: "ana".to_string(),
            avatar_url: String::new(),
        };
        assert_eq!(user.display_name(), "Ana");

        user.name = "  ".to_string();
        assert_eq!(user.display_name(), "ana");
    }
}
