//! Class metadata
//!
//! Classes are defined by loaders. A class is identified by its [`ClassId`],
//! never by name: two loaders can each define a class called `App` and the
//! two are unrelated. Unloading a loader retires its classes for lookup and
//! allocation, while objects that already exist keep their class.

use std::any::TypeId;
use std::fmt;

use rustc_hash::FxHashMap;

use crate::error::{HeapError, HeapResult};

/// Identity of a loaded class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(u32);

impl ClassId {
    /// Wrap a raw id. Only meaningful for ids handed out by the same heap.
    pub const fn from_raw(raw: u32) -> Self {
        ClassId(raw)
    }

    /// The raw id
    pub const fn as_raw(self) -> u32 {
        self.0
    }

    fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identity of a class loader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoaderId(u32);

impl LoaderId {
    /// The loader every heap starts with
    pub const BOOTSTRAP: LoaderId = LoaderId(0);

    fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for LoaderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "loader#{}", self.0)
    }
}

/// Everything the heap knows about a class
#[derive(Debug, Clone)]
pub struct ClassInfo {
    /// The class
    pub id: ClassId,
    /// Simple name, unique per loader
    pub name: String,
    /// Defining loader
    pub loader: LoaderId,
    /// Direct superclass
    pub superclass: Option<ClassId>,
    /// Rust type of instances
    pub layout: TypeId,
    /// Rust type name of instances, for messages
    pub layout_name: &'static str,
    /// `false` once the defining loader was unloaded
    pub loaded: bool,
}

#[derive(Debug)]
struct LoaderInfo {
    name: String,
    alive: bool,
}

/// All loaders and classes of one heap.
#[derive(Debug)]
pub(crate) struct ClassRegistry {
    loaders: Vec<LoaderInfo>,
    classes: Vec<ClassInfo>,
    by_name: FxHashMap<(LoaderId, String), ClassId>,
}

impl ClassRegistry {
    pub(crate) fn new() -> Self {
        Self {
            loaders: vec![LoaderInfo {
                name: "bootstrap".to_string(),
                alive: true,
            }],
            classes: Vec::new(),
            by_name: FxHashMap::default(),
        }
    }

    pub(crate) fn define_loader(&mut self, name: &str) -> LoaderId {
        let id = LoaderId(self.loaders.len() as u32);
        self.loaders.push(LoaderInfo {
            name: name.to_string(),
            alive: true,
        });
        id
    }

    pub(crate) fn loader_name(&self, loader: LoaderId) -> Option<&str> {
        self.loaders.get(loader.index()).map(|l| l.name.as_str())
    }

    pub(crate) fn define_class<T: 'static>(
        &mut self,
        loader: LoaderId,
        name: &str,
        superclass: Option<ClassId>,
    ) -> HeapResult<ClassId> {
        match self.loaders.get(loader.index()) {
            Some(info) if info.alive => {}
            _ => return Err(HeapError::UnknownLoader(loader)),
        }
        if let Some(sup) = superclass {
            let info = self.get(sup).ok_or(HeapError::UnknownClassId(sup))?;
            if !info.loaded {
                return Err(HeapError::ClassNotLoaded(sup));
            }
        }
        let key = (loader, name.to_string());
        if self.by_name.contains_key(&key) {
            return Err(HeapError::DuplicateClass {
                loader,
                name: name.to_string(),
            });
        }

        let id = ClassId(self.classes.len() as u32);
        self.classes.push(ClassInfo {
            id,
            name: name.to_string(),
            loader,
            superclass,
            layout: TypeId::of::<T>(),
            layout_name: std::any::type_name::<T>(),
            loaded: true,
        });
        self.by_name.insert(key, id);
        Ok(id)
    }

    /// Find a loaded class by loader and name.
    pub(crate) fn lookup(&self, loader: LoaderId, name: &str) -> Option<ClassId> {
        let id = *self.by_name.get(&(loader, name.to_string()))?;
        self.get(id).filter(|info| info.loaded).map(|info| info.id)
    }

    pub(crate) fn get(&self, id: ClassId) -> Option<&ClassInfo> {
        self.classes.get(id.index())
    }

    /// `true` if `sub` is `sup` or inherits from it.
    pub(crate) fn is_subclass_of(&self, sub: ClassId, sup: ClassId) -> bool {
        let mut current = Some(sub);
        while let Some(id) = current {
            if id == sup {
                return true;
            }
            current = self.get(id).and_then(|info| info.superclass);
        }
        false
    }

    /// Retire a loader and all of its classes. Returns how many classes
    /// were unloaded.
    pub(crate) fn unload_loader(&mut self, loader: LoaderId) -> HeapResult<usize> {
        if loader == LoaderId::BOOTSTRAP {
            return Err(HeapError::UnknownLoader(loader));
        }
        match self.loaders.get_mut(loader.index()) {
            Some(info) if info.alive => info.alive = false,
            _ => return Err(HeapError::UnknownLoader(loader)),
        }

        let mut unloaded = 0;
        for class in self.classes.iter_mut().filter(|c| c.loader == loader && c.loaded) {
            class.loaded = false;
            unloaded += 1;
        }
        self.by_name.retain(|(owner, _), _| *owner != loader);
        Ok(unloaded)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &ClassInfo> {
        self.classes.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct App;
    struct Other;

    #[test]
    fn test_same_name_in_two_loaders() {
        let mut registry = ClassRegistry::new();
        let plugin = registry.define_loader("plugin");

        let a = registry.define_class::<App>(LoaderId::BOOTSTRAP, "App", None).unwrap();
        let b = registry.define_class::<App>(plugin, "App", None).unwrap();
        assert_ne!(a, b);
        assert_eq!(registry.lookup(LoaderId::BOOTSTRAP, "App"), Some(a));
        assert_eq!(registry.lookup(plugin, "App"), Some(b));
        assert_eq!(registry.loader_name(plugin), Some("plugin"));
    }

    #[test]
    fn test_duplicate_class_rejected() {
        let mut registry = ClassRegistry::new();
        registry.define_class::<App>(LoaderId::BOOTSTRAP, "App", None).unwrap();
        let err = registry
            .define_class::<Other>(LoaderId::BOOTSTRAP, "App", None)
            .unwrap_err();
        assert!(matches!(err, HeapError::DuplicateClass { .. }));
    }

    #[test]
    fn test_subclass_chain() {
        let mut registry = ClassRegistry::new();
        let base = registry.define_class::<App>(LoaderId::BOOTSTRAP, "App", None).unwrap();
        let mid = registry
            .define_class::<App>(LoaderId::BOOTSTRAP, "DerivedApp", Some(base))
            .unwrap();
        let leaf = registry
            .define_class::<App>(LoaderId::BOOTSTRAP, "LeafApp", Some(mid))
            .unwrap();

        assert!(registry.is_subclass_of(leaf, base));
        assert!(registry.is_subclass_of(base, base));
        assert!(!registry.is_subclass_of(base, leaf));
    }

    #[test]
    fn test_unload_hides_classes() {
        let mut registry = ClassRegistry::new();
        let plugin = registry.define_loader("plugin");
        let id = registry.define_class::<App>(plugin, "App", None).unwrap();

        assert_eq!(registry.unload_loader(plugin).unwrap(), 1);
        assert_eq!(registry.lookup(plugin, "App"), None);
        assert!(!registry.get(id).unwrap().loaded);
        assert!(matches!(
            registry.define_class::<App>(plugin, "Late", None),
            Err(HeapError::UnknownLoader(_))
        ));
        assert!(registry.unload_loader(LoaderId::BOOTSTRAP).is_err());
    }
}
