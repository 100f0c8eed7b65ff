//! Structural slots shared by every force.

use serde::{Deserialize, Serialize};

/// An immutable position in the reveal tree.
///
/// Children are not stored; they are derived from parent links in
/// declaration order by [`child_ids`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prototype {
    /// Unique id within the mission.
    pub id: String,
    /// Parent slot, `None` at the top of the tree.
    #[serde(default)]
    pub parent_id: Option<String>,
    /// Indentation hint for renderers.
    #[serde(default)]
    pub depth_padding: u32,
}

impl Prototype {
    /// Whether this slot sits at the top of the tree.
    #[must_use]
    pub const fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// Ids of the prototypes whose parent is `parent_id`, in declaration order.
#[must_use]
pub fn child_ids<'a>(prototypes: &'a [Prototype], parent_id: &str) -> Vec<&'a str> {
    prototypes
        .iter()
        .filter(|p| p.parent_id.as_deref() == Some(parent_id))
        .map(|p| p.id.as_str())
        .collect()
}

/// Depth of `id` in the tree, or `None` if a parent link dangles or loops.
#[must_use]
pub fn depth(prototypes: &[Prototype], id: &str) -> Option<usize> {
    let mut current = prototypes.iter().find(|p| p.id == id)?;
    let mut depth = 0;
    while let Some(parent) = current.parent_id.as_deref() {
        depth += 1;
        if depth > prototypes.len() {
            return None;
        }
        current = prototypes.iter().find(|p| p.id == parent)?;
    }
    Some(depth)
}
