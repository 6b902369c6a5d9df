use std::collections::{HashMap, HashSet};
use std::hash::{BuildHasherDefault, Hash, Hasher};

use seahash::SeaHasher;

/// A `HashMap` using a fast and stable hasher.
pub type FastHashMap<K, V> = HashMap<K, V, BuildHasherDefault<SeaHasher>>;

/// A `HashSet` using a fast and stable hasher.
pub type FastHashSet<K> = HashSet<K, BuildHasherDefault<SeaHasher>>;

/// Hashes `value` into a 64-bit value which stays the same across runs and platforms.
#[inline]
pub fn hash64<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut state = SeaHasher::default();
    value.hash(&mut state);
    state.finish()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn stable() {
        assert_eq!(hash64("textures/crate.png"), hash64("textures/crate.png"));
        assert_ne!(hash64("textures/crate.png"), hash64("textures/crate.bmp"));
    }

    #[test]
    fn collections() {
        let mut set = FastHashSet::default();
        set.insert(hash64("a"));
        set.insert(hash64("a"));
        set.insert(hash64("b"));
        assert_eq!(set.len(), 2);
    }
}
