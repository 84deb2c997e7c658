use crate::models::{Content, Id};

/// Which rows a listing or fetch may return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// Everything, including hidden and deleted rows. Internal use only.
    All,
    /// Neither hidden by the owner nor deleted by an admin.
    Public,
    /// Public rows plus everything owned by this user.
    ViewableBy(Id),
}

impl Visibility {
    pub fn for_viewer(viewer: Option<Id>) -> Self {
        match viewer {
            Some(id) => Visibility::ViewableBy(id),
            None => Visibility::Public,
        }
    }

    pub fn admits(&self, content: &Content) -> bool {
        match self {
            Visibility::All => true,
            Visibility::Public => content.is_public(),
            Visibility::ViewableBy(user) => content.is_owned_by(*user) || content.is_public(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ContentKind;
    use chrono::Utc;

    fn item(owner: Id, hidden: bool, deleted: bool) -> Content {
        Content {
            id: 1,
            kind: ContentKind::Question,
            parent_id: None,
            user_id: Some(owner),
            slug: "q".into(),
            title: "Q?".into(),
            text: String::new(),
            tags: vec![],
            is_hidden: hidden,
            is_deleted: deleted,
            is_accepted: false,
            up: 0,
            down: 0,
            points: 0,
            timepoints: 0,
            views: 0,
            created: Utc::now(),
        }
    }

    #[test]
    fn public_excludes_hidden_and_deleted() {
        assert!(Visibility::Public.admits(&item(1, false, false)));
        assert!(!Visibility::Public.admits(&item(1, true, false)));
        assert!(!Visibility::Public.admits(&item(1, false, true)));
    }

    #[test]
    fn owners_always_see_their_content() {
        let hidden_and_deleted = item(7, true, true);
        assert!(Visibility::ViewableBy(7).admits(&hidden_and_deleted));
        assert!(!Visibility::ViewableBy(8).admits(&hidden_and_deleted));
        assert!(!Visibility::ViewableBy(8).admits(&item(7, false, true)));
        assert!(!Visibility::for_viewer(None).admits(&item(7, true, false)));
    }
}
