use crate::core::{EntityId, LinkProjection, Role, normalize_email};

/// One way a record can be selected by a [`LinkFilter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkMatch {
    /// The record's own id.
    Id(EntityId),
    /// The record's foreign key (a Profile's `accountId`).
    LinkedId(EntityId),
    /// The record's normalized email.
    Email(String),
}

impl LinkMatch {
    pub fn email(email: &str) -> Self {
        LinkMatch::Email(normalize_email(email))
    }

    fn matches(&self, projection: &LinkProjection) -> bool {
        match self {
            LinkMatch::Id(id) => &projection.id == id,
            LinkMatch::LinkedId(id) => projection.linked_id.as_ref() == Some(id),
            LinkMatch::Email(email) => !email.is_empty() && &projection.email == email,
        }
    }
}

/// Projection query for [`EntityStore::find_many`](super::EntityStore::find_many).
///
/// A record matches when it has the required role (if any) and satisfies at
/// least one of the match terms. A filter with no terms at all matches every
/// record; a filter whose term list was started but is empty matches nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkFilter {
    role: Option<Role>,
    any_of: Option<Vec<LinkMatch>>,
}

impl LinkFilter {
    pub fn all() -> Self {
        Self::default()
    }

    /// A filter that will select only through explicit terms.
    pub fn none() -> Self {
        Self {
            role: None,
            any_of: Some(Vec::new()),
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }

    pub fn matching(mut self, term: LinkMatch) -> Self {
        self.any_of.get_or_insert_with(Vec::new).push(term);
        self
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn terms(&self) -> Option<&[LinkMatch]> {
        self.any_of.as_deref()
    }

    pub fn is_unsatisfiable(&self) -> bool {
        matches!(&self.any_of, Some(terms) if terms.is_empty())
    }

    pub fn matches(&self, projection: &LinkProjection) -> bool {
        if let Some(role) = self.role {
            if projection.role != Some(role) {
                return false;
            }
        }
        match &self.any_of {
            None => true,
            Some(terms) => terms.iter().any(|term| term.matches(projection)),
        }
    }
}
