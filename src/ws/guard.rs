//! View and edit eligibility of an identity on a note.
//!
//! Evaluated fresh on every attempt; nothing here is cached.

use crate::auth::identity::Identity;
use crate::models::PermissionLevel;

pub fn may_view(permission: PermissionLevel, owner: Option<&str>, identity: &Identity) -> bool {
    match permission {
        PermissionLevel::Private => identity.is(owner),
        PermissionLevel::Limited | PermissionLevel::Protected => identity.authenticated,
        PermissionLevel::Freely | PermissionLevel::Editable | PermissionLevel::Locked => true,
    }
}

pub fn may_edit(permission: PermissionLevel, owner: Option<&str>, identity: &Identity) -> bool {
    match permission {
        PermissionLevel::Freely => true,
        PermissionLevel::Editable | PermissionLevel::Limited => identity.authenticated,
        PermissionLevel::Locked | PermissionLevel::Private | PermissionLevel::Protected => identity.is(owner),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PermissionLevel::*;

    #[test]
    fn view_matrix() {
        let owner = Identity::user("owner", None);
        let other = Identity::user("other", None);
        let anon = Identity::anonymous();

        for level in [Freely, Editable, Locked] {
            assert!(may_view(level, Some("owner"), &anon));
        }
        for level in [Limited, Protected] {
            assert!(!may_view(level, Some("owner"), &anon));
            assert!(may_view(level, Some("owner"), &other));
        }
        assert!(may_view(Private, Some("owner"), &owner));
        assert!(!may_view(Private, Some("owner"), &other));
        assert!(!may_view(Private, None, &anon));
    }

    #[test]
    fn edit_matrix() {
        let owner = Identity::user("owner", None);
        let other = Identity::user("other", None);
        let anon = Identity::anonymous();

        assert!(may_edit(Freely, Some("owner"), &anon));
        for level in [Editable, Limited] {
            assert!(!may_edit(level, Some("owner"), &anon));
            assert!(may_edit(level, Some("owner"), &other));
        }
        for level in [Locked, Private, Protected] {
            assert!(may_edit(level, Some("owner"), &owner));
            assert!(!may_edit(level, Some("owner"), &other));
            assert!(!may_edit(level, Some("owner"), &anon));
            assert!(!may_edit(level, None, &other));
        }
    }
}
