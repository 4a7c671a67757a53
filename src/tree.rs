//! A simple tree of nodes, addressed by numeric id.
//!
//! Every node has a map of named children. Used as the storage of the
//! in-memory filesystem.
use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

use crate::fs::{FsError, FsResult};

/// Id of the root node.
pub const ROOT_ID: u64 = 1;

/// A tree contains a bunch of nodes.
#[derive(Debug)]
pub struct Tree<K: Eq + Hash, D> {
    nodes: HashMap<u64, Node<K, D>>,
    node_id: u64,
}

/// Node itself. "data" contains user-modifiable data.
#[derive(Debug)]
pub struct Node<K: Eq + Hash, D> {
    pub data: D,
    parent_id: u64,
    children: HashMap<K, u64>,
}

impl<K: Eq + Hash + Debug + Clone, D: Debug> Tree<K, D> {
    /// Get new tree and initialize the root with 'data'.
    pub fn new(data: D) -> Tree<K, D> {
        let mut t = Tree {
            nodes: HashMap::new(),
            node_id: ROOT_ID,
        };
        t.new_node(99999999, data);
        t
    }

    fn new_node(&mut self, parent: u64, data: D) -> u64 {
        let id = self.node_id;
        self.node_id += 1;
        let node = Node {
            parent_id: parent,
            data,
            children: HashMap::new(),
        };
        self.nodes.insert(id, node);
        id
    }

    /// add a child node to an existing node.
    pub fn add_child(&mut self, parent: u64, key: K, data: D, overwrite: bool) -> FsResult<u64> {
        {
            let pnode = self.nodes.get(&parent).ok_or(FsError::NotFound)?;
            if !overwrite && pnode.children.contains_key(&key) {
                return Err(FsError::Exists);
            }
        }
        let id = self.new_node(parent, data);
        let pnode = self.nodes.get_mut(&parent).ok_or(FsError::NotFound)?;
        if let Some(old) = pnode.children.insert(key, id) {
            self.delete_subtree(old)?;
        }
        Ok(id)
    }

    /// Get a child node by key K.
    pub fn get_child<Q>(&self, parent: u64, key: &Q) -> FsResult<u64>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let pnode = self.nodes.get(&parent).ok_or(FsError::NotFound)?;
        pnode.children.get(key).copied().ok_or(FsError::NotFound)
    }

    /// Get all children of this node. Returns a vector of (key, id).
    pub fn get_children(&self, parent: u64) -> FsResult<Vec<(K, u64)>> {
        let pnode = self.nodes.get(&parent).ok_or(FsError::NotFound)?;
        Ok(pnode
            .children
            .iter()
            .map(|(k, id)| (k.clone(), *id))
            .collect())
    }

    fn get_node_ref(&self, id: u64) -> FsResult<&Node<K, D>> {
        self.nodes.get(&id).ok_or(FsError::NotFound)
    }

    /// Get reference to a node.
    pub fn get_node(&self, id: u64) -> FsResult<&D> {
        Ok(&self.get_node_ref(id)?.data)
    }

    /// Get mutable reference to a node.
    pub fn get_node_mut(&mut self, id: u64) -> FsResult<&mut D> {
        Ok(&mut self.nodes.get_mut(&id).ok_or(FsError::NotFound)?.data)
    }

    fn unlink_from_parent(&mut self, id: u64) -> FsResult<()> {
        let parent_id = self.get_node_ref(id)?.parent_id;
        if let Some(pnode) = self.nodes.get_mut(&parent_id) {
            pnode.children.retain(|_, child| *child != id);
        }
        Ok(())
    }

    /// Delete a node. Fails if node has children.
    pub fn delete_node(&mut self, id: u64) -> FsResult<()> {
        if id == ROOT_ID {
            return Err(FsError::Forbidden);
        }
        if !self.get_node_ref(id)?.children.is_empty() {
            return Err(FsError::NotEmpty);
        }
        self.unlink_from_parent(id)?;
        self.nodes.remove(&id);
        Ok(())
    }

    /// Delete a subtree.
    pub fn delete_subtree(&mut self, id: u64) -> FsResult<()> {
        let mut work = vec![id];
        while let Some(id) = work.pop() {
            if let Some(node) = self.nodes.remove(&id) {
                work.extend(node.children.values().copied());
            }
        }
        Ok(())
    }

    /// Move a node to a new position and new name in the tree.
    /// If "overwrite" is true, will replace an existing
    /// node, but only if it doesn't have any children.
    pub fn move_node(&mut self, id: u64, new_parent: u64, new_name: K, overwrite: bool) -> FsResult<()> {
        if id == ROOT_ID {
            return Err(FsError::Forbidden);
        }
        // the new parent may not be inside the subtree we move.
        let mut up = new_parent;
        loop {
            if up == id {
                return Err(FsError::Forbidden);
            }
            match self.nodes.get(&up) {
                Some(n) if up != ROOT_ID => up = n.parent_id,
                _ => break,
            }
        }

        let dest = self.get_child(new_parent, &new_name).ok();
        if let Some(dest) = dest {
            if dest == id {
                return Ok(());
            }
            if !overwrite {
                return Err(FsError::Exists);
            }
            if !self.get_node_ref(dest)?.children.is_empty() {
                return Err(FsError::NotEmpty);
            }
        }

        self.unlink_from_parent(id)?;
        if let Some(dest) = dest {
            self.nodes.remove(&dest);
        }
        let pnode = self.nodes.get_mut(&new_parent).ok_or(FsError::NotFound)?;
        pnode.children.insert(new_name, id);
        if let Some(node) = self.nodes.get_mut(&id) {
            node.parent_id = new_parent;
        }
        Ok(())
    }
}
