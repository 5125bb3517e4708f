use crate::error::LuaError;
use crate::number::float_to_int;
use crate::value::{LuaValue, TableRef};
use indexmap::{IndexMap, IndexSet};
use std::hash::{Hash, Hasher};
use std::rc::Rc;

/// A hashable table key: any value except nil and NaN, with integral floats
/// normalized to integers.
#[derive(Clone, Debug)]
pub struct TableKey(LuaValue);

impl TableKey {
    /// Validate and normalize `key` for storage.
    pub fn new(key: LuaValue) -> Result<Self, LuaError> {
        match key {
            LuaValue::Nil => Err(LuaError::InvalidKey("table index is nil".into())),
            LuaValue::Float(f) if f.is_nan() => Err(LuaError::InvalidKey("table index is NaN".into())),
            LuaValue::Float(f) => Ok(TableKey(match float_to_int(f) {
                Some(n) => LuaValue::Integer(n),
                None => LuaValue::Float(f),
            })),
            other => Ok(TableKey(other)),
        }
    }

    /// Normalize a lookup key; `None` means the key can never be present.
    fn lookup(key: &LuaValue) -> Option<Self> {
        match key {
            LuaValue::Nil => None,
            LuaValue::Float(f) if f.is_nan() => None,
            LuaValue::Float(f) => Some(TableKey(match float_to_int(*f) {
                Some(n) => LuaValue::Integer(n),
                None => LuaValue::Float(*f),
            })),
            other => Some(TableKey(other.clone())),
        }
    }

    pub fn value(&self) -> &LuaValue {
        &self.0
    }

    pub fn into_value(self) -> LuaValue {
        self.0
    }
}

impl PartialEq for TableKey {
    fn eq(&self, other: &Self) -> bool {
        match (&self.0, &other.0) {
            (LuaValue::Float(a), LuaValue::Float(b)) => a.to_bits() == b.to_bits(),
            (a, b) => a.raw_equals(b),
        }
    }
}

impl Eq for TableKey {}

impl Hash for TableKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.type_tag().hash(state);
        match &self.0 {
            LuaValue::Nil => {}
            LuaValue::Boolean(b) => b.hash(state),
            LuaValue::Integer(n) => n.hash(state),
            LuaValue::Float(f) => f.to_bits().hash(state),
            LuaValue::LuaString(s) => s.hash(state),
            LuaValue::Table(t) => (Rc::as_ptr(t) as *const u8 as usize).hash(state),
            LuaValue::Closure(c) => (Rc::as_ptr(c) as *const u8 as usize).hash(state),
        }
    }
}

/// Largest per-part preallocation honoured by [`LuaTable::with_capacity`].
pub const MAX_PRESIZE: usize = 1 << 16;

/// A Lua table: an associative array keyed by any non-nil, non-NaN value.
///
/// Integer keys `1..=n` live in a compact `array` part that never holds a
/// nil; everything else goes into the insertion-ordered `hash` part. A key
/// is never present in both parts.
#[derive(Default)]
pub struct LuaTable {
    array: Vec<LuaValue>,
    hash: IndexMap<TableKey, LuaValue>,
    metatable: Option<TableRef>,
    /// Key order for `next`, rebuilt lazily and dropped when a key is added.
    snapshot: Option<IndexSet<TableKey>>,
}

impl std::fmt::Debug for LuaTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LuaTable")
            .field("array", &self.array.len())
            .field("hash", &self.hash.len())
            .field("metatable", &self.metatable.as_ref().map(Rc::as_ptr))
            .finish()
    }
}

impl LuaTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Presized table. The sizes are hints and are capped at
    /// [`MAX_PRESIZE`] entries per part.
    pub fn with_capacity(narr: usize, nrec: usize) -> Self {
        Self {
            array: Vec::with_capacity(narr.min(MAX_PRESIZE)),
            hash: IndexMap::with_capacity(nrec.min(MAX_PRESIZE)),
            ..Default::default()
        }
    }

    pub fn metatable(&self) -> Option<TableRef> {
        self.metatable.clone()
    }

    pub fn set_metatable(&mut self, mt: Option<TableRef>) {
        self.metatable = mt;
    }

    /// Read `t[key]`. Returns `LuaValue::Nil` for missing keys.
    pub fn get(&self, key: &LuaValue) -> LuaValue {
        let Some(key) = TableKey::lookup(key) else {
            return LuaValue::Nil;
        };
        self.get_key(&key)
    }

    fn get_key(&self, key: &TableKey) -> LuaValue {
        if let LuaValue::Integer(i) = key.0 {
            if let Some(v) = self.array_slot(i) {
                return v.clone();
            }
        }
        self.hash.get(key).cloned().unwrap_or(LuaValue::Nil)
    }

    pub fn get_int(&self, i: i64) -> LuaValue {
        match self.array_slot(i) {
            Some(v) => v.clone(),
            None => self.hash.get(&TableKey(LuaValue::Integer(i))).cloned().unwrap_or_default(),
        }
    }

    pub fn get_str(&self, name: &str) -> LuaValue {
        self.get(&LuaValue::from(name))
    }

    fn array_slot(&self, i: i64) -> Option<&LuaValue> {
        if i >= 1 {
            self.array.get((i - 1) as usize)
        } else {
            None
        }
    }

    /// Write `t[key] = val`. Assigning nil removes the key.
    pub fn put(&mut self, key: LuaValue, val: LuaValue) -> Result<(), LuaError> {
        let key = TableKey::new(key)?;
        self.put_key(key, val);
        Ok(())
    }

    pub fn put_int(&mut self, i: i64, val: LuaValue) {
        self.put_key(TableKey(LuaValue::Integer(i)), val);
    }

    pub fn put_str(&mut self, name: &str, val: LuaValue) {
        self.put_key(TableKey(LuaValue::from(name)), val);
    }

    fn put_key(&mut self, key: TableKey, val: LuaValue) {
        if let LuaValue::Integer(i) = key.0 {
            if i >= 1 {
                let idx = (i - 1) as usize;
                if idx < self.array.len() {
                    if val.is_nil() {
                        self.remove_array_slot(idx);
                    } else {
                        self.array[idx] = val;
                    }
                    return;
                }
                if idx == self.array.len() && !val.is_nil() {
                    self.array.push(val);
                    self.absorb_successors();
                    self.snapshot = None;
                    return;
                }
            }
        }
        if val.is_nil() {
            self.hash.shift_remove(&key);
        } else if self.hash.insert(key, val).is_none() {
            self.snapshot = None;
        }
    }

    /// Remove array element `idx` without leaving a hole: elements above it
    /// move to the hash part under their own keys. This costs O(len - idx),
    /// and refilling the slot pays the same again to absorb them back.
    fn remove_array_slot(&mut self, idx: usize) {
        if idx + 1 == self.array.len() {
            self.array.pop();
            return;
        }
        let tail = self.array.split_off(idx + 1);
        self.array.truncate(idx);
        for (offset, v) in tail.into_iter().enumerate() {
            let k = (idx + 2 + offset) as i64;
            self.hash.insert(TableKey(LuaValue::Integer(k)), v);
        }
    }

    /// After the array part grows, pull the keys that now continue the
    /// sequence out of the hash part.
    fn absorb_successors(&mut self) {
        loop {
            let next = TableKey(LuaValue::Integer(self.array.len() as i64 + 1));
            match self.hash.shift_remove(&next) {
                Some(v) => self.array.push(v),
                None => break,
            }
        }
    }

    /// Lua-style length: the array part length, which is always a border.
    pub fn length(&self) -> i64 {
        self.array.len() as i64
    }

    /// Append `val` to the array part (equivalent to `t[#t+1] = val`).
    pub fn push(&mut self, val: LuaValue) {
        let n = self.length() + 1;
        self.put_int(n, val);
    }

    /// Live entries, array part first. Does not disturb `next` traversal.
    pub fn iter(&self) -> impl Iterator<Item = (LuaValue, LuaValue)> + '_ {
        let array = self
            .array
            .iter()
            .enumerate()
            .map(|(i, v)| (LuaValue::Integer(i as i64 + 1), v.clone()));
        let hash = self.hash.iter().map(|(k, v)| (k.0.clone(), v.clone()));
        array.chain(hash)
    }

    pub fn array_len(&self) -> usize {
        self.array.len()
    }

    pub fn hash_len(&self) -> usize {
        self.hash.len()
    }

    fn build_snapshot(&self) -> IndexSet<TableKey> {
        let mut keys = IndexSet::with_capacity(self.array.len() + self.hash.len());
        for i in 1..=self.array.len() {
            keys.insert(TableKey(LuaValue::Integer(i as i64)));
        }
        keys.extend(self.hash.keys().cloned());
        keys
    }

    /// The entry following `key` in traversal order (`nil` starts a new
    /// traversal). Keys removed since the traversal began are skipped.
    pub fn next(&mut self, key: &LuaValue) -> Result<Option<(LuaValue, LuaValue)>, LuaError> {
        let start = match TableKey::lookup(key) {
            None if key.is_nil() => {
                // Only insertions drop the snapshot, so a traversal already
                // in progress keeps its order.
                if self.snapshot.is_none() {
                    self.snapshot = Some(self.build_snapshot());
                }
                0
            }
            None => return Err(LuaError::InvalidKey("invalid key to 'next'".into())),
            Some(k) => {
                if self.snapshot.is_none() {
                    self.snapshot = Some(self.build_snapshot());
                }
                let pos = self.snapshot.as_ref().and_then(|s| s.get_index_of(&k));
                match pos {
                    Some(pos) => pos + 1,
                    None => return Err(LuaError::InvalidKey("invalid key to 'next'".into())),
                }
            }
        };
        let Some(snapshot) = self.snapshot.as_ref() else {
            return Ok(None);
        };
        for k in snapshot.iter().skip(start) {
            let v = self.get_key(k);
            if !v.is_nil() {
                return Ok(Some((k.0.clone(), v)));
            }
        }
        Ok(None)
    }
}
