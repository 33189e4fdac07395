//! Reply threading and `match-threads` expansion.
//!
//! Messages are linked through `Message-ID`, `In-Reply-To` and `References`
//! (JWZ style, <https://www.jwz.org/doc/threading.html>). Containers for
//! referenced but absent messages are pruned, so a node's parent is its
//! nearest ancestor that is actually in the folder. Roots that are replies
//! (`Re:` subject) with no surviving parent are attached to the first root
//! carrying the same base subject.

use std::collections::HashMap;

use crate::model::message::MessageInfo;

use super::result::UidSet;

/// One message in the thread forest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadNode {
    pub uid: String,
    pub parent: Option<usize>,
    pub first_child: Option<usize>,
    pub next_sibling: Option<usize>,
}

/// Thread forest with a uid lookup. Roots and siblings follow summary order.
#[derive(Debug, Clone, Default)]
pub struct ThreadTree {
    nodes: Vec<ThreadNode>,
    roots: Vec<usize>,
    by_uid: HashMap<String, usize>,
}

/// Internal container used while linking.
#[derive(Debug)]
struct Container {
    /// Index into the summary, if this container has an actual message.
    entry_index: Option<usize>,
    parent: Option<String>,
}

impl ThreadTree {
    /// Thread the given messages (in summary order).
    pub fn build(infos: &[&MessageInfo]) -> Self {
        let mut containers: HashMap<String, Container> = HashMap::new();
        let mut ids: Vec<String> = Vec::with_capacity(infos.len());

        for (idx, info) in infos.iter().enumerate() {
            let mut mid = normalize_id(&info.message_id);
            if mid.is_empty() || containers.get(&mid).is_some_and(|c| c.entry_index.is_some()) {
                // Missing or duplicate Message-ID
                mid = format!("__synth_{idx}__");
            }
            containers
                .entry(mid.clone())
                .or_insert(Container {
                    entry_index: None,
                    parent: None,
                })
                .entry_index = Some(idx);
            ids.push(mid.clone());

            // References: A B C means A→B→C→this message
            let mut chain: Vec<String> = info
                .references
                .iter()
                .map(|r| normalize_id(r))
                .filter(|r| !r.is_empty())
                .collect();
            if let Some(reply_to) = &info.in_reply_to {
                let rid = normalize_id(reply_to);
                if !rid.is_empty() && chain.last() != Some(&rid) {
                    chain.retain(|r| *r != rid);
                    chain.push(rid);
                }
            }
            for rid in &chain {
                containers.entry(rid.clone()).or_insert(Container {
                    entry_index: None,
                    parent: None,
                });
            }
            chain.push(mid);

            for window in chain.windows(2) {
                let (parent_id, child_id) = (&window[0], &window[1]);
                if parent_id == child_id || would_create_cycle(&containers, parent_id, child_id) {
                    continue;
                }
                if let Some(child) = containers.get_mut(child_id) {
                    child.parent = Some(parent_id.clone());
                }
            }
        }

        // Nearest real ancestor of each message
        let mut parents: Vec<Option<usize>> = ids
            .iter()
            .map(|id| {
                let mut current = containers.get(id).and_then(|c| c.parent.clone());
                let mut depth = 0;
                while let Some(pid) = current {
                    depth += 1;
                    let container = containers.get(&pid)?;
                    if container.entry_index.is_some() || depth > infos.len() + 100 {
                        return container.entry_index;
                    }
                    current = container.parent.clone();
                }
                None
            })
            .collect();

        // Subject threading for orphaned replies
        let mut subject_roots: HashMap<String, usize> = HashMap::new();
        for (idx, info) in infos.iter().enumerate() {
            if parents[idx].is_none() && !is_reply_subject(&info.subject) {
                subject_roots
                    .entry(normalize_subject(&info.subject))
                    .or_insert(idx);
            }
        }
        for (idx, info) in infos.iter().enumerate() {
            if parents[idx].is_none() && is_reply_subject(&info.subject) {
                if let Some(&root) = subject_roots.get(&normalize_subject(&info.subject)) {
                    if root != idx {
                        parents[idx] = Some(root);
                    }
                }
            }
        }

        let mut tree = ThreadTree {
            nodes: infos
                .iter()
                .map(|info| ThreadNode {
                    uid: info.uid.clone(),
                    parent: None,
                    first_child: None,
                    next_sibling: None,
                })
                .collect(),
            roots: Vec::new(),
            by_uid: HashMap::with_capacity(infos.len()),
        };
        let mut last_child: Vec<Option<usize>> = vec![None; infos.len()];
        for (idx, parent) in parents.into_iter().enumerate() {
            tree.by_uid.entry(infos[idx].uid.clone()).or_insert(idx);
            match parent {
                Some(p) => {
                    tree.nodes[idx].parent = Some(p);
                    match last_child[p] {
                        Some(prev) => tree.nodes[prev].next_sibling = Some(idx),
                        None => tree.nodes[p].first_child = Some(idx),
                    }
                    last_child[p] = Some(idx);
                }
                None => tree.roots.push(idx),
            }
        }
        tree
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, idx: usize) -> &ThreadNode {
        &self.nodes[idx]
    }

    pub fn lookup(&self, uid: &str) -> Option<usize> {
        self.by_uid.get(uid).copied()
    }

    /// Root nodes in summary order.
    pub fn roots(&self) -> impl Iterator<Item = &ThreadNode> {
        self.roots.iter().map(|&i| &self.nodes[i])
    }

    /// Children of a node, in order.
    pub fn children(&self, idx: usize) -> impl Iterator<Item = usize> + '_ {
        std::iter::successors(self.nodes[idx].first_child, |&c| self.nodes[c].next_sibling)
    }

    fn add_subtree(&self, idx: usize, out: &mut UidSet) {
        let mut stack = vec![idx];
        while let Some(i) = stack.pop() {
            out.insert(self.nodes[i].uid.clone());
            stack.extend(self.children(i));
        }
    }
}

/// Expansion requested by `match-threads`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadMatch {
    /// The seed set unchanged.
    None,
    /// Every message of each seed's thread.
    All,
    /// Each seed and its descendants.
    Replies,
    /// Each seed, its ancestors and its descendants.
    RepliesParents,
    /// Seeds that are alone in their thread.
    Single,
}

impl ThreadMatch {
    /// Parse a match-type string. Unrecognised names behave as `none`.
    pub fn parse(name: &str) -> Self {
        match name {
            "all" => Self::All,
            "replies" => Self::Replies,
            "replies_parents" => Self::RepliesParents,
            "single" => Self::Single,
            _ => Self::None,
        }
    }

    /// Expand a seed set through the thread tree.
    ///
    /// Seeds without a node are kept (except for `single`) but not expanded.
    pub fn expand(self, tree: &ThreadTree, seeds: UidSet) -> UidSet {
        if self == Self::None {
            return seeds;
        }
        let mut out = UidSet::new();
        for uid in seeds {
            let node = tree.lookup(&uid);
            if self != Self::Single {
                out.insert(uid);
            }
            let Some(mut idx) = node else {
                continue;
            };
            match self {
                Self::Single => {
                    let n = tree.node(idx);
                    if n.parent.is_none() && n.first_child.is_none() {
                        out.insert(n.uid.clone());
                    }
                }
                Self::All => {
                    while let Some(p) = tree.node(idx).parent {
                        idx = p;
                    }
                    tree.add_subtree(idx, &mut out);
                }
                Self::RepliesParents => {
                    let mut scan = tree.node(idx).parent;
                    while let Some(p) = scan {
                        out.insert(tree.node(p).uid.clone());
                        scan = tree.node(p).parent;
                    }
                    tree.add_subtree(idx, &mut out);
                }
                Self::Replies => tree.add_subtree(idx, &mut out),
                Self::None => {}
            }
        }
        out
    }
}

/// Check if making `parent_id` the parent of `child_id` would create a cycle.
fn would_create_cycle(containers: &HashMap<String, Container>, parent_id: &str, child_id: &str) -> bool {
    let mut current = Some(parent_id.to_string());
    let mut depth = 0;
    while let Some(ref id) = current {
        if id == child_id {
            return true;
        }
        depth += 1;
        if depth > 1000 {
            return true;
        }
        current = containers.get(id.as_str()).and_then(|c| c.parent.clone());
    }
    false
}

/// Strip angle brackets and whitespace from a Message-ID.
fn normalize_id(id: &str) -> String {
    id.trim()
        .trim_start_matches('<')
        .trim_end_matches('>')
        .trim()
        .to_string()
}

fn is_reply_subject(subject: &str) -> bool {
    let lower = subject.trim().to_lowercase();
    ["re:", "fwd:", "fw:"].iter().any(|p| lower.starts_with(p))
}

/// Strip Re:/Fwd: prefixes and lowercase.
fn normalize_subject(subject: &str) -> String {
    let mut s = subject.trim();
    loop {
        let lower = s.to_lowercase();
        let cut = ["re:", "fwd:", "fw:"]
            .iter()
            .find(|p| lower.starts_with(*p))
            .map(|p| p.len());
        match cut {
            Some(n) => s = s[n..].trim_start(),
            None => break,
        }
    }
    s.to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(uid: &str, mid: &str, reply_to: Option<&str>, subject: &str) -> MessageInfo {
        let mut m = MessageInfo::new(uid);
        m.message_id = mid.to_string();
        m.in_reply_to = reply_to.map(String::from);
        m.references = reply_to.map(|r| vec![r.to_string()]).unwrap_or_default();
        m.subject = subject.to_string();
        m
    }

    fn set(uids: &[&str]) -> UidSet {
        uids.iter().map(|s| s.to_string()).collect()
    }

    /// 1 ← 2 ← 3, 1 ← 4, and a lone 5.
    fn sample() -> ThreadTree {
        let msgs = vec![
            info("1", "a@x", None, "Plan"),
            info("2", "b@x", Some("a@x"), "Re: Plan"),
            info("3", "c@x", Some("b@x"), "Re: Plan"),
            info("4", "d@x", Some("a@x"), "Re: Plan"),
            info("5", "e@x", None, "Lunch"),
        ];
        let refs: Vec<&MessageInfo> = msgs.iter().collect();
        ThreadTree::build(&refs)
    }

    #[test]
    fn test_normalize_subject() {
        assert_eq!(normalize_subject("Re: Hello"), "hello");
        assert_eq!(normalize_subject("FW: Re: Hello"), "hello");
        assert_eq!(normalize_subject("Hello"), "hello");
    }

    #[test]
    fn test_tree_shape() {
        let tree = sample();
        let roots: Vec<&str> = tree.roots().map(|n| n.uid.as_str()).collect();
        assert_eq!(roots, vec!["1", "5"]);
        let one = tree.lookup("1").expect("node");
        let kids: Vec<&str> = tree.children(one).map(|i| tree.node(i).uid.as_str()).collect();
        assert_eq!(kids, vec!["2", "4"]);
    }

    #[test]
    fn test_expand_modes() {
        let tree = sample();
        assert_eq!(ThreadMatch::None.expand(&tree, set(&["3"])), set(&["3"]));
        assert_eq!(ThreadMatch::All.expand(&tree, set(&["3"])), set(&["1", "2", "3", "4"]));
        assert_eq!(ThreadMatch::Replies.expand(&tree, set(&["2"])), set(&["2", "3"]));
        assert_eq!(
            ThreadMatch::RepliesParents.expand(&tree, set(&["2"])),
            set(&["1", "2", "3"])
        );
        assert_eq!(ThreadMatch::Single.expand(&tree, set(&["2", "5"])), set(&["5"]));
    }

    #[test]
    fn test_missing_parent_is_pruned() {
        let msgs = vec![
            info("1", "a@x", None, "Topic"),
            info("2", "c@x", Some("b@x"), "Other"),
        ];
        let mut msgs = msgs;
        msgs[1].references = vec!["a@x".into(), "b@x".into()];
        let refs: Vec<&MessageInfo> = msgs.iter().collect();
        let tree = ThreadTree::build(&refs);
        let two = tree.lookup("2").expect("node");
        assert_eq!(tree.node(two).parent, tree.lookup("1"));
    }

    #[test]
    fn test_subject_threading_and_unknown_seed() {
        let msgs = vec![info("1", "a@x", None, "Budget"), info("2", "", None, "Re: budget")];
        let refs: Vec<&MessageInfo> = msgs.iter().collect();
        let tree = ThreadTree::build(&refs);
        assert_eq!(ThreadMatch::All.expand(&tree, set(&["2"])), set(&["1", "2"]));
        assert_eq!(ThreadMatch::Replies.expand(&tree, set(&["zz"])), set(&["zz"]));
        assert!(ThreadMatch::Single.expand(&tree, set(&["zz"])).is_empty());
    }
}
