//! Adapter between the client-authored entry graph (`nog_core`'s
//! `Tree`/`ObjectEntry`, wrapped in the lazy/dirty `Entry` lifecycle) and
//! the publication pipeline's [`StageNode`] graph. Building a [`PostNode`]
//! tree in memory and calling [`build_stage_graph`] is the client-facing
//! equivalent of the original's `Tree._postToStream`/`Object._postToStream`
//! walk: content already posted (a known sha1) short-circuits to a
//! reference; everything else gets its identity computed and is staged.

use std::collections::HashMap;

use serde_json::Value;

use nog_core::{Commit, Entry, EntryKind, IdVersion, ObjectEntry, Sha1, Tree, TreeEntry};

use crate::error::ClientError;
use crate::poststream::{node_sha1, StageNode};

/// An object awaiting publication: either already posted (`entry.sha1()`
/// is known, possibly from a different repo) or freshly authored content
/// that still needs its identity computed.
pub struct PostObject {
    pub entry: Entry<ObjectEntry>,
    pub idversion: IdVersion,
}

/// A tree awaiting publication, with its children given explicitly in
/// publication order (the tree's own `entries` field is derived from this
/// list once every child's identity is known, so this is never empty for a
/// dirty tree -- the caller builds it bottom-up).
pub struct PostTree {
    pub entry: Entry<Tree>,
    pub name: String,
    pub meta: Value,
    pub children: Vec<PostNode>,
}

pub enum PostNode {
    Object(PostObject),
    Tree(PostTree),
}

impl PostNode {
    fn kind(&self) -> EntryKind {
        match self {
            PostNode::Object(_) => EntryKind::Object,
            PostNode::Tree(_) => EntryKind::Tree,
        }
    }
}

/// Walks `root` post-order, staging every dirty node's wire content and
/// short-circuiting already-posted nodes to a reference. Returns the
/// root's sha1 and a lookup table suitable for [`crate::poststream::post_order`].
pub fn build_stage_graph(root: &PostNode) -> Result<(Sha1, HashMap<Sha1, StageNode>), ClientError> {
    let mut lookup = HashMap::new();
    let sha1 = build_node(root, &mut lookup)?;
    Ok((sha1, lookup))
}

fn build_node(node: &PostNode, lookup: &mut HashMap<Sha1, StageNode>) -> Result<Sha1, ClientError> {
    match node {
        PostNode::Object(obj) => build_leaf(&obj.entry, "object", lookup, |e| e.to_wire(obj.idversion).map_err(ClientError::from)),
        PostNode::Tree(tree) => {
            if let Some(sha1) = tree.entry.sha1() {
                register_reference(sha1, "tree", tree.entry.repo(), lookup);
                return Ok(sha1);
            }
            let mut children = Vec::with_capacity(tree.children.len());
            let mut child_shas = Vec::with_capacity(tree.children.len());
            for child in &tree.children {
                let child_sha1 = build_node(child, lookup)?;
                children.push(TreeEntry {
                    kind: child.kind(),
                    sha1: child_sha1,
                });
                child_shas.push(child_sha1);
            }
            let wire_tree = Tree::new(tree.name.clone(), tree.meta.clone(), children);
            wire_tree.validate()?;
            let wire = wire_tree.to_wire();
            let sha1 = node_sha1(&wire)?;
            lookup.entry(sha1).or_insert(StageNode {
                sha1,
                kind: "tree",
                wire,
                origin_repo: None,
                children: child_shas,
            });
            Ok(sha1)
        }
    }
}

fn build_leaf(
    entry: &Entry<ObjectEntry>,
    kind: &'static str,
    lookup: &mut HashMap<Sha1, StageNode>,
    to_wire: impl FnOnce(&ObjectEntry) -> Result<Value, ClientError>,
) -> Result<Sha1, ClientError> {
    if let Some(sha1) = entry.sha1() {
        register_reference(sha1, kind, entry.repo(), lookup);
        return Ok(sha1);
    }
    let content = entry
        .content()
        .expect("a dirty Entry (no sha1) always carries content");
    let wire = to_wire(content)?;
    let sha1 = node_sha1(&wire)?;
    lookup.entry(sha1).or_insert(StageNode {
        sha1,
        kind,
        wire,
        origin_repo: None,
        children: vec![],
    });
    Ok(sha1)
}

/// Registers an already-posted node so [`PostStream::stage_subtree`] still
/// sees it (carrying its origin repo) when it needs to emit a cross-repo
/// copy marker; a node with no children is always a DFS leaf regardless of
/// its real kind.
fn register_reference(sha1: Sha1, kind: &'static str, origin_repo: Option<&str>, lookup: &mut HashMap<Sha1, StageNode>) {
    lookup.entry(sha1).or_insert_with(|| StageNode {
        sha1,
        kind,
        wire: Value::Null,
        origin_repo: origin_repo.map(str::to_string),
        children: vec![],
    });
}

/// Builds the wire form of a commit once its tree has already been posted
/// (its sha1 is known), ready for [`crate::repo::RemoteRepo::post_commit_content`].
pub fn commit_wire(commit: &Commit, tree_sha1: Sha1) -> Value {
    let mut commit = commit.clone();
    commit.tree = Some(tree_sha1);
    commit.to_wire()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dirty_object(name: &str, text: &str) -> PostNode {
        PostNode::Object(PostObject {
            entry: Entry::new(ObjectEntry {
                name: name.to_string(),
                meta: json!({}),
                text: Some(text.to_string()),
                blob: None,
            }),
            idversion: IdVersion::V1,
        })
    }

    #[test]
    fn stages_dirty_leaf_object() {
        let node = dirty_object("leaf", "hello");
        let (sha1, lookup) = build_stage_graph(&node).unwrap();
        let staged = lookup.get(&sha1).unwrap();
        assert_eq!(staged.kind, "object");
        assert_eq!(staged.children, Vec::<Sha1>::new());
    }

    #[test]
    fn already_posted_object_short_circuits_to_reference() {
        let sha1 = Sha1::digest(b"posted");
        let mut entry: Entry<ObjectEntry> = Entry::lazy(sha1);
        entry.set_repo("acme/other");
        let node = PostNode::Object(PostObject {
            entry,
            idversion: IdVersion::V1,
        });
        let (root_sha1, lookup) = build_stage_graph(&node).unwrap();
        assert_eq!(root_sha1, sha1);
        let staged = lookup.get(&sha1).unwrap();
        assert_eq!(staged.origin_repo.as_deref(), Some("acme/other"));
    }

    #[test]
    fn tree_stages_children_before_itself() {
        let child_a = dirty_object("a", "content-a");
        let child_b = dirty_object("b", "content-b");
        let tree = PostNode::Tree(PostTree {
            entry: Entry::new(Tree::default()),
            name: "root".into(),
            meta: json!({}),
            children: vec![child_a, child_b],
        });
        let (root_sha1, lookup) = build_stage_graph(&tree).unwrap();
        let root = lookup.get(&root_sha1).unwrap();
        assert_eq!(root.kind, "tree");
        assert_eq!(root.children.len(), 2);
        for child_sha1 in &root.children {
            assert!(lookup.contains_key(child_sha1));
        }
    }
}
