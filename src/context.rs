//! Per-request execution context.

use uuid::Uuid;

/// Identifies the tenant (and optionally the actor) a request runs for.
///
/// Every store call and every cache key is scoped by `organization_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    pub organization_id: String,
    pub actor_user_id: Option<String>,
    /// Correlates log events of one request.
    pub execution_id: Uuid,
}

impl ExecutionContext {
    pub fn new(organization_id: impl Into<String>) -> Self {
        Self {
            organization_id: organization_id.into(),
            actor_user_id: None,
            execution_id: Uuid::new_v4(),
        }
    }

    pub fn with_actor(mut self, actor_user_id: impl Into<String>) -> Self {
        self.actor_user_id = Some(actor_user_id.into());
        self
    }
}
