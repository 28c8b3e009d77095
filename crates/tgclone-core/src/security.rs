use crate::domain::UserId;

/// Only explicitly listed operators may control clone runs. An empty list
/// authorizes nobody.
pub fn is_authorized(user_id: Option<UserId>, allowed_users: &[i64]) -> bool {
    let Some(user_id) = user_id else {
        return false;
    };
    if allowed_users.is_empty() {
        return false;
    }
    allowed_users.contains(&user_id.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorization_requires_listed_user() {
        assert!(is_authorized(Some(UserId(7)), &[1, 7]));
        assert!(!is_authorized(Some(UserId(8)), &[1, 7]));
        assert!(!is_authorized(None, &[1, 7]));
        assert!(!is_authorized(Some(UserId(7)), &[]));
    }
}
