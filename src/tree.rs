use crate::models::{Content, ContentKind, Id};

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("content {0} has no reachable question")]
pub struct Orphaned(pub Id);

/// Find the root question of `item` given its fetched ancestors
/// (`ancestors[0]` the parent, `ancestors[1]` the grandparent).
/// Walks at most two links; any other shape is orphaned content.
pub fn question_of<'a>(item: &'a Content, ancestors: &'a [Content]) -> Result<&'a Content, Orphaned> {
    let parent = ancestors.first();
    let grandparent = ancestors.get(1);
    match (item.kind, parent.map(|p| p.kind), grandparent.map(|g| g.kind)) {
        (ContentKind::Question, _, _) => Ok(item),
        (ContentKind::Answer, Some(ContentKind::Question), _)
        | (ContentKind::Comment, Some(ContentKind::Question), _) => parent.ok_or(Orphaned(item.id)),
        (ContentKind::Comment, Some(ContentKind::Answer), Some(ContentKind::Question)) => {
            grandparent.ok_or(Orphaned(item.id))
        }
        _ => Err(Orphaned(item.id)),
    }
}

/// How many parent links [`question_of`] needs for an item of this kind.
pub fn max_depth(kind: ContentKind) -> usize {
    match kind {
        ContentKind::Question => 0,
        ContentKind::Answer => 1,
        ContentKind::Comment => 2,
    }
}
