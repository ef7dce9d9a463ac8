use crate::message::Landmark;
use std::collections::BTreeMap;

///
/// RowSpec
///
/// One parsed request row: an action, a paper selector, an optional user
/// selector, and kind-specific columns. Rows come from a CSV sheet or are
/// built programmatically.
///

#[derive(Clone, Debug)]
pub struct RowSpec {
    pub landmark: Landmark,
    pub action: String,
    pub paper: String,
    pub user: Option<String>,
    pub fields: BTreeMap<String, String>,
    pub override_conflict: bool,
}

impl RowSpec {
    #[must_use]
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            landmark: Landmark::default(),
            action: action.into(),
            paper: String::new(),
            user: None,
            fields: BTreeMap::new(),
            override_conflict: false,
        }
    }

    #[must_use]
    pub fn paper(mut self, selector: impl Into<String>) -> Self {
        self.paper = selector.into();
        self
    }

    #[must_use]
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    #[must_use]
    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn overriding(mut self) -> Self {
        self.override_conflict = true;
        self
    }

    #[must_use]
    pub fn at(mut self, landmark: Landmark) -> Self {
        self.landmark = landmark;
        self
    }

    /// A kind-specific column; empty cells count as absent.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
            .map(str::trim)
    }
}

/// Boolean-ish sheet tokens (`override` column and friends).
#[must_use]
pub fn truthy(token: &str) -> bool {
    matches!(
        token.trim().to_ascii_lowercase().as_str(),
        "1" | "y" | "yes" | "true" | "on"
    )
}

///
/// TESTS
///
