use std::collections::BTreeMap;

/// A 2d-array of lazily created children, indexed `width * y + x`.
#[derive(Debug, Clone)]
pub struct SparseArray<T> {
    width: u32,
    height: u32,
    items: BTreeMap<u32, T>,
}

impl<T> SparseArray<T> {
    pub fn new(width: u32, height: u32) -> Self {
        SparseArray {
            width,
            height,
            items: BTreeMap::new(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Number of slots, instantiated or not.
    pub fn capacity(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn index_of(&self, x: u32, y: u32) -> u32 {
        self.width * y + x
    }

    pub fn get(&self, index: u32) -> Option<&T> {
        self.items.get(&index)
    }

    pub fn get_mut(&mut self, index: u32) -> Option<&mut T> {
        self.items.get_mut(&index)
    }

    pub fn contains(&self, index: u32) -> bool {
        self.items.contains_key(&index)
    }

    /// Returns the child at `index`, creating it with `create` first if it
    /// does not exist yet.
    pub fn get_or_try_insert_with<E, F>(&mut self, index: u32, create: F) -> Result<&mut T, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        debug_assert!((index as u64) < self.capacity());
        match self.items.entry(index) {
            std::collections::btree_map::Entry::Occupied(entry) => Ok(entry.into_mut()),
            std::collections::btree_map::Entry::Vacant(entry) => Ok(entry.insert(create()?)),
        }
    }

    pub fn remove(&mut self, index: u32) -> Option<T> {
        self.items.remove(&index)
    }

    /// Number of instantiated children.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &T)> {
        self.items.iter().map(|(index, item)| (*index, item))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (u32, &mut T)> {
        self.items.iter_mut().map(|(index, item)| (*index, item))
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}
