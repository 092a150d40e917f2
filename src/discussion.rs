use async_trait::async_trait;

/// Boundary to the discussion resource: may this user take part in this
/// discussion? Consulted on every chat and audio join, before any room state
/// is touched.
#[async_trait]
pub trait DiscussionAccess: Send + Sync {
    async fn is_participant(&self, discussion_id: &str, user_id: &str) -> bool;
}

/// Grants every authenticated user access to every discussion. Stands in
/// until the forum's discussion service is wired to this process.
pub struct OpenAccess;

#[async_trait]
impl DiscussionAccess for OpenAccess {
    async fn is_participant(&self, _discussion_id: &str, _user_id: &str) -> bool {
        true
    }
}
