//! Central registry for named aliases. Aliases are human-friendly names that resolve
//! into the canonical key of a resource.

use crate::utils::hash::FastHashMap;

// Bounds the length of alias chains, deeper chains are considered cyclic.
const MAX_ALIAS_DEPTH: usize = 16;

#[derive(Debug, Default, Clone)]
pub struct AliasResolver {
    registry: FastHashMap<String, String>,
}

impl AliasResolver {
    pub fn new() -> Self {
        AliasResolver {
            registry: FastHashMap::default(),
        }
    }

    /// Add or replace an alias definition. Last writer wins.
    pub fn add<T1, T2>(&mut self, name: T1, canonical: T2) -> Result<(), failure::Error>
    where
        T1: Into<String>,
        T2: Into<String>,
    {
        let name = name.into();
        let canonical = canonical.into();

        if name.is_empty() || canonical.is_empty() {
            bail!("Alias and its target MUST NOT be empty.");
        }

        if name == canonical {
            bail!("Alias '{}' MUST NOT refer to itself.", name);
        }

        self.registry.insert(name, canonical);
        Ok(())
    }

    /// Removes an alias definition. Returns false if it did not exist.
    pub fn remove<T: AsRef<str>>(&mut self, name: T) -> bool {
        self.registry.remove(name.as_ref()).is_some()
    }

    /// Checks if an alias exists.
    #[inline]
    pub fn has<T: AsRef<str>>(&self, name: T) -> bool {
        self.registry.contains_key(name.as_ref())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// Resolves aliases recursively. Keys without alias resolve to themselves.
    pub fn resolve<'a>(&'a self, src: &'a str) -> &'a str {
        let mut dst = src;
        for _ in 0..MAX_ALIAS_DEPTH {
            match self.registry.get(dst) {
                Some(v) => dst = v,
                None => return dst,
            }
        }

        warn!("Alias '{}' could not be resolved, it might be cyclic.", src);
        dst
    }
}
