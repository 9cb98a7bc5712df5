use std::fmt;

use crate::services::resources::ResourceKind;

/// Object id used for checks that are not about one existing item (creation).
pub const GLOBAL_OBJECT: &str = "global";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Relation {
    CanView,
    CanCreate,
    CanEdit,
    CanDelete,
}

impl Relation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Relation::CanView => "can_view",
            Relation::CanCreate => "can_create",
            Relation::CanEdit => "can_edit",
            Relation::CanDelete => "can_delete",
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// "Does `principal_id` have `relation` on `resource_type:resource_id`?"
///
/// Built fresh for every request, never cached.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AuthorizationQuery {
    pub principal_id: String,
    pub resource_type: ResourceKind,
    pub resource_id: String,
    pub relation: Relation,
}

impl AuthorizationQuery {
    pub fn new(
        principal_id: impl Into<String>,
        resource_type: ResourceKind,
        resource_id: impl Into<String>,
        relation: Relation,
    ) -> Self {
        Self {
            principal_id: principal_id.into(),
            resource_type,
            resource_id: resource_id.into(),
            relation,
        }
    }

    /// Tuple object, e.g. `group:engineering`.
    pub fn object(&self) -> String {
        format!("{}:{}", self.resource_type.object_type(), self.resource_id)
    }
}

impl fmt::Display for AuthorizationQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.principal_id,
            self.relation,
            self.object()
        )
    }
}
