//! [`HostRuntime`] implementation for [`Heap`].

use std::fmt;

use heapwalk_core::{HostRuntime, IterationControl};

use crate::class::{ClassId, LoaderId};
use crate::error::{HeapError, HeapResult};
use crate::handle::Handle;
use crate::heap::{Heap, HeapObject};

/// How a caller names a class on a [`Heap`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeDescriptor {
    /// A class name as defined by a particular loader
    Named {
        /// Defining loader
        loader: LoaderId,
        /// Class name
        name: String,
    },
    /// A class id obtained earlier
    Class(ClassId),
}

impl TypeDescriptor {
    /// A class name in `loader`
    pub fn named(loader: LoaderId, name: impl Into<String>) -> Self {
        TypeDescriptor::Named {
            loader,
            name: name.into(),
        }
    }

    /// A class name in the bootstrap loader
    pub fn bootstrap(name: impl Into<String>) -> Self {
        Self::named(LoaderId::BOOTSTRAP, name)
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDescriptor::Named { loader, name } => write!(f, "{name} ({loader})"),
            TypeDescriptor::Class(id) => write!(f, "class {id}"),
        }
    }
}

impl From<ClassId> for TypeDescriptor {
    fn from(id: ClassId) -> Self {
        TypeDescriptor::Class(id)
    }
}

impl Heap {
    /// Resolve a descriptor to a loaded class.
    pub fn resolve(&self, descriptor: &TypeDescriptor) -> HeapResult<ClassId> {
        match descriptor {
            TypeDescriptor::Named { loader, name } => {
                self.lookup_class(*loader, name)
                    .ok_or_else(|| HeapError::UnknownClass {
                        loader: *loader,
                        name: name.clone(),
                    })
            }
            TypeDescriptor::Class(id) => match self.class_info(*id) {
                Some(info) if info.loaded => Ok(*id),
                Some(_) => Err(HeapError::ClassNotLoaded(*id)),
                None => Err(HeapError::UnknownClassId(*id)),
            },
        }
    }
}

impl HostRuntime for Heap {
    type Descriptor = TypeDescriptor;
    type ClassToken = ClassId;
    type RawObject = HeapObject;
    type Handle = Handle;
    type Error = HeapError;

    fn runtime_id(&self) -> usize {
        self.id()
    }

    fn resolve_class(&self, descriptor: &TypeDescriptor) -> HeapResult<ClassId> {
        self.resolve(descriptor)
    }

    fn iterate_heap(
        &self,
        _class_hint: &ClassId,
        visitor: &mut dyn FnMut(&HeapObject) -> IterationControl,
    ) -> HeapResult<()> {
        self.walk(visitor).map(|_| ())
    }

    fn class_of(&self, object: &HeapObject) -> ClassId {
        object.class()
    }

    fn make_durable(&self, object: &HeapObject) -> HeapResult<Handle> {
        self.root(object)
    }

    fn collect_garbage(&self) -> HeapResult<()> {
        self.collect().map(|_| ())
    }
}
