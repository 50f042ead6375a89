use serde::Serialize;

/// Local identity announced to the relay.
///
/// Created once per session by whoever owns the app context and passed down;
/// nothing reads it from global state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub user_id: String,
    pub display_name: String,
}

impl Participant {
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
        }
    }

    /// Throwaway identity: `user_` plus 9 random characters
    pub fn anonymous() -> Self {
        let random = uuid::Uuid::new_v4().simple().to_string();
        let user_id = format!("user_{}", &random[..9]);
        Self::with_derived_name(user_id)
    }

    /// Display name derived from the last four characters of the id
    pub fn with_derived_name(user_id: impl Into<String>) -> Self {
        let user_id = user_id.into();
        let chars: Vec<char> = user_id.chars().collect();
        let suffix: String = chars[chars.len().saturating_sub(4)..].iter().collect();
        Self {
            display_name: format!("用户{}", suffix),
            user_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anonymous_id_shape() {
        let p = Participant::anonymous();
        assert!(p.user_id.starts_with("user_"));
        assert_eq!(p.user_id.len(), 14);
        assert_eq!(p.display_name, format!("用户{}", &p.user_id[10..]));
    }

    #[test]
    fn test_anonymous_ids_differ() {
        assert_ne!(Participant::anonymous().user_id, Participant::anonymous().user_id);
    }

    #[test]
    fn test_short_id_uses_whole_id() {
        assert_eq!(Participant::with_derived_name("ab").display_name, "用户ab");
    }
}
