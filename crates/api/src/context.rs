use neuroviz_core::UserId;

/// Caller context for a request (authenticated identity).
///
/// Inserted by the auth middleware and passed explicitly into every job
/// operation; there is no ambient "current user".
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CallerContext {
    user_id: UserId,
}

impl CallerContext {
    pub fn new(user_id: UserId) -> Self {
        Self { user_id }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }
}
