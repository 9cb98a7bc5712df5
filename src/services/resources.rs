/*
 * Responsibility
 * - The resource kinds served by the gateway (identities, clients, roles, groups, schemas, rules, identity providers)
 * - Naming shared by routing, the relationship backend (object types) and upstream stores
 */
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Identity,
    Client,
    Role,
    Group,
    Schema,
    Rule,
    /// Social sign-in / upstream identity provider configuration.
    Idp,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 7] = [
        ResourceKind::Identity,
        ResourceKind::Client,
        ResourceKind::Role,
        ResourceKind::Group,
        ResourceKind::Schema,
        ResourceKind::Rule,
        ResourceKind::Idp,
    ];

    /// Object type used in relationship tuples (`<type>:<id>`).
    pub fn object_type(&self) -> &'static str {
        match self {
            ResourceKind::Identity => "identity",
            ResourceKind::Client => "client",
            ResourceKind::Role => "role",
            ResourceKind::Group => "group",
            ResourceKind::Schema => "schema",
            ResourceKind::Rule => "rule",
            ResourceKind::Idp => "provider",
        }
    }

    pub fn singular(&self) -> &'static str {
        self.object_type()
    }

    /// Path segment under `/api/v0`.
    pub fn collection(&self) -> &'static str {
        match self {
            ResourceKind::Identity => "identities",
            ResourceKind::Client => "clients",
            ResourceKind::Role => "roles",
            ResourceKind::Group => "groups",
            ResourceKind::Schema => "schemas",
            ResourceKind::Rule => "rules",
            ResourceKind::Idp => "idps",
        }
    }

    /// JSON field carrying the item identifier.
    pub fn id_field(&self) -> &'static str {
        match self {
            ResourceKind::Client => "client_id",
            _ => "id",
        }
    }

    pub fn item_id(&self, item: &Value) -> Option<String> {
        match item.get(self.id_field())? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Fields a create/update payload must carry.
    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            ResourceKind::Identity => &["schema_id", "traits"],
            ResourceKind::Client => &["client_name"],
            ResourceKind::Role => &["name"],
            ResourceKind::Group => &["name"],
            ResourceKind::Schema => &["id", "schema"],
            ResourceKind::Rule => &["id", "match"],
            ResourceKind::Idp => &["id", "provider", "client_id"],
        }
    }
}
