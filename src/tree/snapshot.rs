//! Whole-tree snapshots: a `.header`/`.data` file pair.
//!
//! The writer assigns every reachable node a 32-bit id breadth-first (the
//! root takes 0; the head leaf, when distinct, takes 1) and then emits
//! node records depth-first, pushing children in reverse so the file
//! reads in pre-order. All integers are little-endian:
//!
//! ```text
//! header (16 bytes): key_type:u32  order:u32  root_id:i32  head_leaf_id:i32
//! record:            id:i32  type:u8  size:i32  size x encoded key
//!                    leaf (type 1):     size x value:u64, next_id:i32
//!                    internal (type 0): (size+1) x child_id:i32
//! ```
//!
//! Both directions run under the exclusive snapshot latch: no operation
//! is in flight, so no node latches are taken.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::ptr as StdPtr;
use std::sync::atomic::Ordering;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::key::{IndexKey, KeyType};
use crate::node::{Node, NodeKind, NodeRef};
use crate::tracing_helpers::debug_log;

use super::BPlusTree;

/// Record type byte for a leaf node.
const LEAF_TAG: u8 = 1;
/// Record type byte for an internal node.
const INTERNAL_TAG: u8 = 0;

/// `base` with an extra suffix appended (`"t"` becomes `"t.header"`).
fn companion_path(base: &Path, suffix: &str) -> PathBuf {
    let mut name = base.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// Decoded and validated snapshot header.
struct Header {
    order: u32,
    root_id: i32,
    head_leaf_id: i32,
}

fn decode_header<K: IndexKey>(mut buf: Bytes) -> Result<Header> {
    if buf.remaining() < 16 {
        return Err(Error::Truncated);
    }
    let key_type = KeyType::try_from(buf.get_u32_le())?;
    if key_type != K::KEY_TYPE {
        return Err(Error::KeyTypeMismatch {
            expected: K::KEY_TYPE,
            found: key_type,
        });
    }
    let order = buf.get_u32_le();
    if order < 2 {
        return Err(Error::Corrupted("order below the supported minimum"));
    }
    Ok(Header {
        order,
        root_id: buf.get_i32_le(),
        head_leaf_id: buf.get_i32_le(),
    })
}

/// Nodes decoded from the data file, plus the links still to be resolved.
struct Parsed<K: IndexKey> {
    nodes: HashMap<i32, NodeRef<K>>,
    leaf_next: Vec<(i32, i32)>,
    children: Vec<(i32, Vec<i32>)>,
}

impl<K: IndexKey> Parsed<K> {
    /// Free every staged node. Child links are not ownership edges until
    /// the tree adopts the root, so each node is freed individually.
    fn discard(self) {
        for (_, node) in self.nodes {
            // SAFETY: staged nodes are only reachable from this map.
            unsafe { Node::free(node) };
        }
    }
}

fn parse_nodes<K: IndexKey>(mut buf: Bytes) -> Result<Parsed<K>> {
    let mut parsed = Parsed {
        nodes: HashMap::new(),
        leaf_next: Vec::new(),
        children: Vec::new(),
    };
    while buf.has_remaining() {
        if let Err(err) = parse_record(&mut buf, &mut parsed) {
            parsed.discard();
            return Err(err);
        }
    }
    Ok(parsed)
}

fn parse_record<K: IndexKey>(buf: &mut Bytes, parsed: &mut Parsed<K>) -> Result<()> {
    if buf.remaining() < 9 {
        return Err(Error::Truncated);
    }
    let id = buf.get_i32_le();
    if parsed.nodes.contains_key(&id) {
        return Err(Error::Corrupted("duplicate node id"));
    }
    let tag = buf.get_u8();
    let size = buf.get_i32_le();
    if size < 0 {
        return Err(Error::Corrupted("negative node size"));
    }
    let size = size as usize;

    let mut keys = Vec::with_capacity(size);
    for _ in 0..size {
        keys.push(K::decode(buf)?);
    }

    let node = match tag {
        LEAF_TAG => {
            if buf.remaining() < size * 8 + 4 {
                return Err(Error::Truncated);
            }
            let mut values = Vec::with_capacity(size);
            for _ in 0..size {
                values.push(buf.get_u64_le());
            }
            parsed.leaf_next.push((id, buf.get_i32_le()));
            let node = Node::new_leaf();
            // SAFETY: the node is private until inserted into the map.
            unsafe {
                let data = (*node).data_mut();
                data.keys = keys;
                *data.values_mut() = values;
            }
            node
        }
        INTERNAL_TAG => {
            if buf.remaining() < (size + 1) * 4 {
                return Err(Error::Truncated);
            }
            let mut child_ids = Vec::with_capacity(size + 1);
            for _ in 0..=size {
                child_ids.push(buf.get_i32_le());
            }
            parsed.children.push((id, child_ids));
            let node = Node::new_internal();
            // SAFETY: as above.
            unsafe { (*node).data_mut().keys = keys };
            node
        }
        other => return Err(Error::UnknownNodeType(other)),
    };

    parsed.nodes.insert(id, node);
    Ok(())
}

/// Fully linked tree, ready to adopt.
struct Linked<K: IndexKey> {
    root: NodeRef<K>,
    head_leaf: NodeRef<K>,
    entries: usize,
}

fn link_nodes<K: IndexKey>(parsed: Parsed<K>, header: &Header) -> Result<Linked<K>> {
    match try_link(&parsed, header) {
        Ok(linked) => Ok(linked),
        Err(err) => {
            parsed.discard();
            Err(err)
        }
    }
}

fn try_link<K: IndexKey>(parsed: &Parsed<K>, header: &Header) -> Result<Linked<K>> {
    let lookup = |id: i32| -> Result<NodeRef<K>> {
        parsed
            .nodes
            .get(&id)
            .copied()
            .ok_or(Error::Corrupted("dangling node id"))
    };

    for &(id, next_id) in &parsed.leaf_next {
        if next_id == -1 {
            continue;
        }
        let leaf = lookup(id)?;
        let next = lookup(next_id)?;
        // SAFETY: single-threaded under the exclusive snapshot latch.
        unsafe {
            if !(*next).data().is_leaf() {
                return Err(Error::Corrupted("leaf link names an internal node"));
            }
            (*leaf).data_mut().set_next(next);
            (*next).data_mut().set_prev(leaf);
        }
    }

    for (id, child_ids) in &parsed.children {
        let node = lookup(*id)?;
        for &child_id in child_ids {
            let child = lookup(child_id)?;
            // SAFETY: as above. The parent check keeps child edges a
            // tree: without it a shared child would later be freed twice.
            unsafe {
                if !(*child).data().parent.is_null() {
                    return Err(Error::Corrupted("node referenced by two parents"));
                }
                (*node).data_mut().children_mut().push(child);
                (*child).data_mut().parent = node;
            }
        }
    }

    let root = lookup(header.root_id)?;
    // SAFETY: snapshot latch.
    let root_is_parented = unsafe { !(*root).data().parent.is_null() };
    if root_is_parented {
        return Err(Error::Corrupted("root is referenced as a child"));
    }

    let head_leaf = if header.head_leaf_id == -1 {
        StdPtr::null_mut()
    } else {
        let head = lookup(header.head_leaf_id)?;
        // SAFETY: snapshot latch.
        let head_is_leaf = unsafe { (*head).data().is_leaf() };
        if !head_is_leaf {
            return Err(Error::Corrupted("head leaf id names an internal node"));
        }
        head
    };

    // Walk the adopted tree once: entry count, and proof that every
    // decoded node is reachable (strays would otherwise leak or alias).
    let mut entries = 0;
    let mut visited = 0;
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        visited += 1;
        // SAFETY: snapshot latch.
        unsafe {
            match &(*node).data().kind {
                NodeKind::Leaf { .. } => entries += (*node).data().len(),
                NodeKind::Internal { children } => stack.extend(children.iter().copied()),
            }
        }
    }
    if visited != parsed.nodes.len() {
        return Err(Error::Corrupted("unreachable nodes in snapshot"));
    }

    Ok(Linked {
        root,
        head_leaf,
        entries,
    })
}

impl<K: IndexKey> BPlusTree<K> {
    /// Write the tree to `base.header` and `base.data`.
    ///
    /// Takes the snapshot latch exclusive: the call blocks until in-flight
    /// operations drain, and holds new ones off for the duration of the
    /// write, so the files capture one consistent state.
    ///
    /// # Errors
    ///
    /// [`Error::Io`] when either file cannot be created or written.
    pub fn serialize(&self, base: impl AsRef<Path>) -> Result<()> {
        let base = base.as_ref();
        let _snap = self.snapshot_latch.write();

        let (root, head_leaf) = {
            let roots = self.roots.lock();
            (roots.root, roots.head_leaf)
        };

        // Assign ids breadth-first; pinning the head leaf right after the
        // root guarantees the header can name it.
        let mut ids: HashMap<NodeRef<K>, i32> = HashMap::new();
        if !root.is_null() {
            let mut next_id: i32 = 0;
            ids.insert(root, next_id);
            next_id += 1;
            if !head_leaf.is_null() && head_leaf != root {
                ids.insert(head_leaf, next_id);
                next_id += 1;
            }
            let mut queue = VecDeque::from([root]);
            while let Some(node) = queue.pop_front() {
                // SAFETY: the exclusive snapshot latch excludes all other
                // access for the whole serialization.
                let data = unsafe { (*node).data() };
                if let NodeKind::Internal { children } = &data.kind {
                    for &child in children {
                        if !ids.contains_key(&child) {
                            ids.insert(child, next_id);
                            next_id += 1;
                            queue.push_back(child);
                        }
                    }
                }
            }
        }

        let mut header = BytesMut::with_capacity(16);
        header.put_u32_le(K::KEY_TYPE as u32);
        header.put_u32_le(self.order() as u32);
        header.put_i32_le(if root.is_null() { -1 } else { ids[&root] });
        header.put_i32_le(if head_leaf.is_null() { -1 } else { ids[&head_leaf] });

        let mut records = BytesMut::new();
        if !root.is_null() {
            let mut stack = vec![root];
            while let Some(node) = stack.pop() {
                // SAFETY: exclusive snapshot latch, as above.
                let data = unsafe { (*node).data() };
                records.put_i32_le(ids[&node]);
                match &data.kind {
                    NodeKind::Leaf { values, next, .. } => {
                        records.put_u8(LEAF_TAG);
                        records.put_i32_le(data.len() as i32);
                        for key in &data.keys {
                            key.encode(&mut records);
                        }
                        for &value in values {
                            records.put_u64_le(value);
                        }
                        records.put_i32_le(if next.is_null() { -1 } else { ids[next] });
                    }
                    NodeKind::Internal { children } => {
                        records.put_u8(INTERNAL_TAG);
                        records.put_i32_le(data.len() as i32);
                        for key in &data.keys {
                            key.encode(&mut records);
                        }
                        for child in children {
                            records.put_i32_le(ids[child]);
                        }
                        // Reverse push so the file reads in pre-order.
                        for &child in children.iter().rev() {
                            stack.push(child);
                        }
                    }
                }
            }
        }

        fs::write(companion_path(base, ".header"), &header)?;
        fs::write(companion_path(base, ".data"), &records)?;
        debug_log!(nodes = ids.len(), "snapshot written");
        Ok(())
    }

    /// Replace this tree's contents with the snapshot at `base`, adopting
    /// the stored order.
    ///
    /// Takes the snapshot latch exclusive, like [`BPlusTree::serialize`].
    /// Failures that occur before the header is accepted (missing or
    /// unreadable files, a foreign key type) leave the tree untouched; any
    /// later decode failure leaves it cleanly empty, never partially
    /// populated.
    ///
    /// # Errors
    ///
    /// [`Error::Io`] when either file cannot be read, and
    /// [`Error::Truncated`], [`Error::UnknownNodeType`],
    /// [`Error::UnsupportedKeyType`], [`Error::KeyTypeMismatch`], or
    /// [`Error::Corrupted`] when the files do not form a valid snapshot
    /// for this tree.
    pub fn deserialize(&self, base: impl AsRef<Path>) -> Result<()> {
        let base = base.as_ref();
        let _snap = self.snapshot_latch.write();

        let header_bytes = Bytes::from(fs::read(companion_path(base, ".header"))?);
        let record_bytes = Bytes::from(fs::read(companion_path(base, ".data"))?);
        let header = decode_header::<K>(header_bytes)?;

        // Past this point the old tree is gone; later failures leave the
        // tree empty rather than partially populated.
        {
            let mut roots = self.roots.lock();
            if !roots.root.is_null() {
                // SAFETY: the exclusive snapshot latch proves no operation
                // is in flight and none can observe the old nodes again.
                unsafe { Node::free_subtree(roots.root) };
            }
            roots.root = StdPtr::null_mut();
            roots.head_leaf = StdPtr::null_mut();
        }
        self.order.store(header.order as usize, Ordering::Release);
        self.len.store(0, Ordering::Release);

        if header.root_id == -1 {
            return Ok(());
        }

        let linked = link_nodes(parse_nodes::<K>(record_bytes)?, &header)?;
        {
            let mut roots = self.roots.lock();
            roots.root = linked.root;
            roots.head_leaf = linked.head_leaf;
        }
        self.len.store(linked.entries, Ordering::Release);
        debug_log!(entries = linked.entries, "snapshot restored");
        Ok(())
    }
}
