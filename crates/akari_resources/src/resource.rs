use std::{any::Any, sync::Arc};

use uuid::Uuid;

pub trait AsAny: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Anything the resource manager can load, cache and save.
///
/// The uuid is part of the persisted payload, it has to match the metadata record the
/// resource is registered under.
pub trait Resource: AsAny {
    fn uuid(&self) -> Uuid;
    /// Runs on the consumer thread after a successful decode, before any handle sees the
    /// resource
    fn initialize(&mut self) {}
}

impl dyn Resource {
    pub fn downcast_ref<T: Resource>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
    pub fn downcast_mut<T: Resource>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }
    pub fn is<T: Resource>(&self) -> bool {
        self.as_any().is::<T>()
    }
}
