//! In-memory git packfile decoding.
//!
//! A fetched pack is inflated, its deltas resolved and the tree of one
//! commit walked into a [`SourceTree`]. Objects never leave memory.

use super::SourceTree;
use flate2::{Decompress, FlushDecompress, Status};
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// SHA-1 object name
pub type ObjectId = [u8; 20];

const PACK_SIGNATURE: &[u8; 4] = b"PACK";
const TREE_MODE_DIR: &[u8] = b"40000";
const TREE_MODE_SYMLINK: &[u8] = b"120000";
const TREE_MODE_GITLINK: &[u8] = b"160000";

#[derive(Debug, Error)]
pub enum PackError {
    #[error("truncated {0}")]
    Truncated(&'static str),
    #[error("malformed pkt-line")]
    BadPktLine,
    #[error("not a version 2 packfile")]
    BadHeader,
    #[error("unknown object type {0}")]
    UnknownType(u8),
    #[error("corrupt object data: {0}")]
    Inflate(String),
    #[error("invalid delta: {0}")]
    BadDelta(&'static str),
    #[error("{0} delta base(s) missing from pack")]
    MissingBase(usize),
    #[error("object {0} missing from pack")]
    MissingObject(String),
    #[error("malformed {0} object")]
    BadObject(&'static str),
    #[error("unknown sideband channel {0}")]
    UnknownBand(u8),
    #[error("response has no packfile section")]
    NoPackfile,
    #[error("remote error: {0}")]
    Remote(String),
}

/// Kind of a resolved object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Commit,
    Tree,
    Blob,
    Tag,
}

impl Kind {
    fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Kind::Commit),
            2 => Some(Kind::Tree),
            3 => Some(Kind::Blob),
            4 => Some(Kind::Tag),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Kind::Commit => "commit",
            Kind::Tree => "tree",
            Kind::Blob => "blob",
            Kind::Tag => "tag",
        }
    }
}

/// Name of an object with the given kind and content
pub fn object_id(kind: Kind, data: &[u8]) -> ObjectId {
    let mut hasher = Sha1::new();
    hasher.update(format!("{} {}\0", kind.as_str(), data.len()).as_bytes());
    hasher.update(data);
    hasher.finalize().into()
}

/// Parse a 40 character hex object name
pub fn parse_object_id(hex_id: &[u8]) -> Option<ObjectId> {
    let bytes = hex::decode(hex_id).ok()?;
    bytes.try_into().ok()
}

#[derive(Debug, Clone)]
struct Object {
    kind: Kind,
    data: Arc<Vec<u8>>,
}

enum Entry {
    Full(Object),
    OffsetDelta { base: usize, delta: Vec<u8> },
    RefDelta { base: ObjectId, delta: Vec<u8> },
}

/// Every object of a pack, keyed by name
#[derive(Debug, Default)]
pub struct ObjectStore {
    objects: HashMap<ObjectId, Object>,
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl Cursor<'_> {
    fn byte(&mut self, what: &'static str) -> Result<u8, PackError> {
        let b = *self.buf.get(self.pos).ok_or(PackError::Truncated(what))?;
        self.pos += 1;
        Ok(b)
    }

    fn take(&mut self, len: usize, what: &'static str) -> Result<&[u8], PackError> {
        let slice = self
            .buf
            .get(self.pos..self.pos + len)
            .ok_or(PackError::Truncated(what))?;
        self.pos += len;
        Ok(slice)
    }

    /// Object header: type code and inflated size
    fn header(&mut self) -> Result<(u8, usize), PackError> {
        let mut b = self.byte("object header")?;
        let code = (b >> 4) & 0x07;
        let mut size = usize::from(b & 0x0f);
        let mut shift = 4;
        while b & 0x80 != 0 {
            b = self.byte("object header")?;
            size |= usize::from(b & 0x7f)
                .checked_shl(shift)
                .ok_or(PackError::Truncated("object size"))?;
            shift += 7;
        }
        Ok((code, size))
    }

    /// Backwards distance of an offset delta's base
    fn base_distance(&mut self) -> Result<usize, PackError> {
        let mut b = self.byte("delta offset")?;
        let mut distance = usize::from(b & 0x7f);
        while b & 0x80 != 0 {
            b = self.byte("delta offset")?;
            distance = distance
                .checked_add(1)
                .and_then(|d| d.checked_shl(7))
                .ok_or(PackError::BadDelta("offset overflow"))?
                | usize::from(b & 0x7f);
        }
        Ok(distance)
    }

    /// Inflate one zlib stream of `size` bytes
    fn inflate(&mut self, size: usize) -> Result<Vec<u8>, PackError> {
        let input = &self.buf[self.pos..];
        let mut inflater = Decompress::new(true);
        let mut out = Vec::with_capacity(size + 1);
        loop {
            let consumed = usize::try_from(inflater.total_in())
                .map_err(|e| PackError::Inflate(e.to_string()))?;
            let produced = out.len();
            let status = inflater
                .decompress_vec(&input[consumed..], &mut out, FlushDecompress::None)
                .map_err(|e| PackError::Inflate(e.to_string()))?;
            if status == Status::StreamEnd {
                break;
            }
            let stalled = usize::try_from(inflater.total_in()).ok() == Some(consumed)
                && out.len() == produced;
            if stalled {
                if out.len() < out.capacity() {
                    return Err(PackError::Truncated("object data"));
                }
                out.reserve(size.max(64));
            }
        }
        if out.len() != size {
            return Err(PackError::Inflate(format!(
                "expected {size} bytes, got {}",
                out.len()
            )));
        }
        self.pos += usize::try_from(inflater.total_in())
            .map_err(|e| PackError::Inflate(e.to_string()))?;
        Ok(out)
    }
}

/// Little-endian base-128 size at the start of a delta
fn delta_size(delta: &[u8], pos: &mut usize) -> Result<usize, PackError> {
    let mut size = 0usize;
    let mut shift = 0u32;
    loop {
        let b = *delta.get(*pos).ok_or(PackError::BadDelta("truncated size"))?;
        *pos += 1;
        size |= usize::from(b & 0x7f)
            .checked_shl(shift)
            .ok_or(PackError::BadDelta("size overflow"))?;
        shift += 7;
        if b & 0x80 == 0 {
            return Ok(size);
        }
    }
}

/// Rebuild an object from its base and a delta
pub fn apply_delta(base: &[u8], delta: &[u8]) -> Result<Vec<u8>, PackError> {
    let mut pos = 0;
    if delta_size(delta, &mut pos)? != base.len() {
        return Err(PackError::BadDelta("base size mismatch"));
    }
    let target_size = delta_size(delta, &mut pos)?;
    let mut out = Vec::with_capacity(target_size);

    while let Some(&op) = delta.get(pos) {
        pos += 1;
        if op & 0x80 != 0 {
            let mut arg = |bits: u8, shifts: &[u32]| -> Result<usize, PackError> {
                let mut value = 0usize;
                for (i, shift) in shifts.iter().enumerate() {
                    if bits & (1 << i) != 0 {
                        let b = *delta.get(pos).ok_or(PackError::BadDelta("truncated copy"))?;
                        pos += 1;
                        value |= usize::from(b) << shift;
                    }
                }
                Ok(value)
            };
            let offset = arg(op & 0x0f, &[0, 8, 16, 24])?;
            let size = match arg((op >> 4) & 0x07, &[0, 8, 16])? {
                0 => 0x10000,
                n => n,
            };
            let chunk = offset
                .checked_add(size)
                .and_then(|end| base.get(offset..end))
                .ok_or(PackError::BadDelta("copy out of range"))?;
            out.extend_from_slice(chunk);
        } else if op != 0 {
            let len = usize::from(op);
            let chunk = delta
                .get(pos..pos + len)
                .ok_or(PackError::BadDelta("truncated insert"))?;
            pos += len;
            out.extend_from_slice(chunk);
        } else {
            return Err(PackError::BadDelta("reserved opcode"));
        }
    }

    if out.len() != target_size {
        return Err(PackError::BadDelta("target size mismatch"));
    }
    Ok(out)
}

impl ObjectStore {
    /// Decode a complete packfile
    ///
    /// # Errors
    ///
    /// Returns [`PackError`] if the pack is truncated, corrupt or refers to
    /// delta bases it does not contain.
    pub fn from_pack(pack: &[u8]) -> Result<Self, PackError> {
        let mut cursor = Cursor { buf: pack, pos: 0 };
        if cursor.take(4, "pack header")? != PACK_SIGNATURE {
            return Err(PackError::BadHeader);
        }
        let version = cursor.take(4, "pack header")?;
        if version != [0, 0, 0, 2] {
            return Err(PackError::BadHeader);
        }
        let count = cursor.take(4, "pack header")?;
        let count = u32::from_be_bytes([count[0], count[1], count[2], count[3]]);

        let mut entries: Vec<(usize, Entry)> = Vec::new();
        for _ in 0..count {
            let start = cursor.pos;
            let (code, size) = cursor.header()?;
            let entry = match code {
                6 => {
                    let distance = cursor.base_distance()?;
                    let base = start
                        .checked_sub(distance)
                        .ok_or(PackError::BadDelta("offset before pack start"))?;
                    Entry::OffsetDelta {
                        base,
                        delta: cursor.inflate(size)?,
                    }
                }
                7 => {
                    let base = cursor.take(20, "delta base")?;
                    let mut id = [0u8; 20];
                    id.copy_from_slice(base);
                    Entry::RefDelta {
                        base: id,
                        delta: cursor.inflate(size)?,
                    }
                }
                code => {
                    let kind = Kind::from_code(code).ok_or(PackError::UnknownType(code))?;
                    Entry::Full(Object {
                        kind,
                        data: Arc::new(cursor.inflate(size)?),
                    })
                }
            };
            entries.push((start, entry));
        }

        Self::resolve(entries)
    }

    fn resolve(entries: Vec<(usize, Entry)>) -> Result<Self, PackError> {
        let mut store = Self::default();
        let mut by_offset: HashMap<usize, Object> = HashMap::new();
        let mut pending = Vec::new();

        for (offset, entry) in entries {
            match entry {
                Entry::Full(object) => {
                    store.insert(&object);
                    by_offset.insert(offset, object);
                }
                delta => pending.push((offset, delta)),
            }
        }

        // Bases may themselves be deltas, so resolve until nothing moves.
        while !pending.is_empty() {
            let before = pending.len();
            let mut waiting = Vec::new();
            for (offset, entry) in pending {
                let (base, delta) = match &entry {
                    Entry::OffsetDelta { base, delta } => (by_offset.get(base).cloned(), delta),
                    Entry::RefDelta { base, delta } => (store.objects.get(base).cloned(), delta),
                    Entry::Full(_) => continue,
                };
                match base {
                    Some(base) => {
                        let object = Object {
                            kind: base.kind,
                            data: Arc::new(apply_delta(&base.data, delta)?),
                        };
                        store.insert(&object);
                        by_offset.insert(offset, object);
                    }
                    None => waiting.push((offset, entry)),
                }
            }
            if waiting.len() == before {
                return Err(PackError::MissingBase(waiting.len()));
            }
            pending = waiting;
        }

        Ok(store)
    }

    fn insert(&mut self, object: &Object) {
        self.objects
            .insert(object_id(object.kind, &object.data), object.clone());
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn get(&self, id: &ObjectId, kind: Kind) -> Result<&[u8], PackError> {
        match self.objects.get(id) {
            Some(object) if object.kind == kind => Ok(&object.data),
            Some(_) => Err(PackError::BadObject(kind.as_str())),
            None => Err(PackError::MissingObject(hex::encode(id))),
        }
    }

    /// Files of the tree `commit` points at
    ///
    /// Symbolic links and submodules are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`PackError`] if the commit or any object below it is missing
    /// or malformed.
    pub fn checkout(&self, commit: &ObjectId) -> Result<SourceTree, PackError> {
        let data = self.get(commit, Kind::Commit)?;
        let tree = data
            .split(|&b| b == b'\n')
            .next()
            .and_then(|line| line.strip_prefix(b"tree "))
            .and_then(parse_object_id)
            .ok_or(PackError::BadObject("commit"))?;

        let mut files = SourceTree::new();
        self.walk(&tree, "", &mut files)?;
        Ok(files)
    }

    fn walk(&self, tree: &ObjectId, prefix: &str, files: &mut SourceTree) -> Result<(), PackError> {
        let mut rest = self.get(tree, Kind::Tree)?;
        while !rest.is_empty() {
            let space = rest
                .iter()
                .position(|&b| b == b' ')
                .ok_or(PackError::BadObject("tree"))?;
            let nul = rest
                .iter()
                .position(|&b| b == 0)
                .ok_or(PackError::BadObject("tree"))?;
            if nul < space || rest.len() < nul + 21 {
                return Err(PackError::BadObject("tree"));
            }
            let mode = &rest[..space];
            let name = String::from_utf8_lossy(&rest[space + 1..nul]);
            let mut id = [0u8; 20];
            id.copy_from_slice(&rest[nul + 1..nul + 21]);
            rest = &rest[nul + 21..];

            let path = format!("{prefix}{name}");
            match mode {
                TREE_MODE_DIR => self.walk(&id, &format!("{path}/"), files)?,
                TREE_MODE_SYMLINK | TREE_MODE_GITLINK => {}
                _ => files.insert(&path, self.get(&id, Kind::Blob)?.to_vec()),
            }
        }
        Ok(())
    }
}
