use crate::model::UserId;
use serde::{Deserialize, Serialize};

///
/// User
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub name: String,
    pub pc_member: bool,
    pub chair: bool,
    /// Synthetic identity used to take an anonymous review.
    pub anonymous: bool,
    pub disabled: bool,
}

impl User {
    #[must_use]
    pub fn new(id: UserId, email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id,
            email: email.into(),
            name: name.into(),
            pc_member: false,
            chair: false,
            anonymous: false,
            disabled: false,
        }
    }

    #[must_use]
    pub fn pc(mut self) -> Self {
        self.pc_member = true;
        self
    }

    #[must_use]
    pub fn chaired(mut self) -> Self {
        self.chair = true;
        self.pc_member = true;
        self
    }

    /// Display form used in markup descriptions.
    #[must_use]
    pub fn display(&self) -> String {
        if self.name.is_empty() {
            self.email.clone()
        } else {
            format!("{} <{}>", self.name, self.email)
        }
    }
}

///
/// Actor
///
/// The acting principal for one batch. Paper-scoped rights (contact
/// authorship) are resolved against the staged conflict state, not here.
///

#[derive(Clone, Copy, Debug)]
pub struct Actor {
    pub uid: UserId,
    pub chair: bool,
    pub pc_member: bool,
}

impl Actor {
    #[must_use]
    pub const fn chair(uid: UserId) -> Self {
        Self {
            uid,
            chair: true,
            pc_member: true,
        }
    }

    #[must_use]
    pub const fn pc(uid: UserId) -> Self {
        Self {
            uid,
            chair: false,
            pc_member: true,
        }
    }

    /// Whether the actor may administer every paper. Track-scoped paper
    /// managers would refine this per paper; the engine only needs the
    /// conference-wide answer.
    #[must_use]
    pub const fn can_administer(&self) -> bool {
        self.chair
    }
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_falls_back_to_email() {
        let user = User::new(UserId(3), "a@x.org", "");
        assert_eq!(user.display(), "a@x.org");

        let named = User::new(UserId(3), "a@x.org", "Alice");
        assert_eq!(named.display(), "Alice <a@x.org>");
    }

    #[test]
    fn only_chairs_administer() {
        assert!(Actor::chair(UserId(1)).can_administer());
        assert!(!Actor::pc(UserId(2)).can_administer());
    }
}
