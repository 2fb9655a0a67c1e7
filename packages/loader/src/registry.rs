use std::cell::RefCell;
use std::collections::BTreeSet;
use trellis_common::DefDescriptor;

/// Answers whether a definition is already available locally
pub trait DefinitionCache {
    fn has_definition(&self, descriptor: &DefDescriptor) -> bool;
}

/// Definitions registered so far, typically by fetched code executing
#[derive(Debug, Default)]
pub struct DefinitionRegistry {
    definitions: RefCell<BTreeSet<DefDescriptor>>,
}

impl DefinitionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, descriptor: DefDescriptor) -> bool {
        self.definitions.borrow_mut().insert(descriptor)
    }

    pub fn len(&self) -> usize {
        self.definitions.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.borrow().is_empty()
    }
}

impl DefinitionCache for DefinitionRegistry {
    fn has_definition(&self, descriptor: &DefDescriptor) -> bool {
        self.definitions.borrow().contains(descriptor)
    }
}
