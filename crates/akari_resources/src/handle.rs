use std::{fmt, marker::PhantomData, sync::Arc};

use parking_lot::RwLock;
use serde::{
    de::{self, Visitor},
    ser::SerializeStruct,
    Deserialize, Serialize,
};
use uuid::Uuid;

use crate::{AsAny, Resource};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadState {
    Unresolved,
    Resolved,
    Failed,
}

enum Slot {
    Unresolved,
    Resolved(Arc<dyn Resource>),
    Failed(String),
}

struct HandleInner {
    uuid: Uuid,
    slot: RwLock<Slot>,
}

/// Future-like reference to a resource.
///
/// Clones share one slot, so resolving (or invalidating) a handle is observed by every alias.
/// The uuid is known before the payload exists and never changes.
#[derive(Clone)]
pub struct ResourceHandle {
    inner: Arc<HandleInner>,
}

impl ResourceHandle {
    pub fn unresolved(uuid: Uuid) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                uuid,
                slot: RwLock::new(Slot::Unresolved),
            }),
        }
    }
    #[inline]
    pub fn uuid(&self) -> Uuid {
        self.inner.uuid
    }
    pub fn state(&self) -> LoadState {
        match &*self.inner.slot.read() {
            Slot::Unresolved => LoadState::Unresolved,
            Slot::Resolved(_) => LoadState::Resolved,
            Slot::Failed(_) => LoadState::Failed,
        }
    }
    pub fn is_resolved(&self) -> bool {
        self.state() == LoadState::Resolved
    }
    /// Why the last load of this handle failed
    pub fn error(&self) -> Option<String> {
        match &*self.inner.slot.read() {
            Slot::Failed(message) => Some(message.clone()),
            _ => None,
        }
    }
    pub fn get_dyn(&self) -> Option<Arc<dyn Resource>> {
        match &*self.inner.slot.read() {
            Slot::Resolved(resource) => Some(resource.clone()),
            _ => None,
        }
    }
    /// None while unresolved or if the payload isn't a `T`
    pub fn get<T: Resource>(&self) -> Option<Arc<T>> {
        let resource = self.get_dyn()?;
        AsAny::into_any(resource).downcast::<T>().ok()
    }
    pub fn typed<T: Resource>(&self) -> Handle<T> {
        Handle {
            raw: self.clone(),
            _phantom: PhantomData,
        }
    }
    /// True if both handles are aliases of the same slot
    pub fn same_slot(&self, other: &ResourceHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
    /// Drops the payload, every alias goes back to unresolved
    pub fn invalidate(&self) {
        *self.inner.slot.write() = Slot::Unresolved;
    }
    pub(crate) fn resolve(&self, resource: Arc<dyn Resource>) {
        *self.inner.slot.write() = Slot::Resolved(resource);
    }
    pub(crate) fn fail(&self, message: String) {
        *self.inner.slot.write() = Slot::Failed(message);
    }
}

impl PartialEq for ResourceHandle {
    fn eq(&self, other: &Self) -> bool {
        self.uuid() == other.uuid()
    }
}
impl Eq for ResourceHandle {}

impl std::hash::Hash for ResourceHandle {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.uuid().hash(state);
    }
}

impl fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("uuid", &self.uuid())
            .field("state", &self.state())
            .finish()
    }
}

impl Serialize for ResourceHandle {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut state = serializer.serialize_struct("Handle", 1)?;
        state.serialize_field("uuid", &self.uuid())?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for ResourceHandle {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_struct("Handle", &["uuid"], HandleVisitor)
    }
}

/// Deserialized handles are always unresolved, they are realized through
/// `load_from_uuid`
struct HandleVisitor;

impl<'de> Visitor<'de> for HandleVisitor {
    type Value = ResourceHandle;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("struct Handle")
    }
    fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
    where
        A: de::SeqAccess<'de>,
    {
        let uuid: Uuid = seq
            .next_element()?
            .ok_or_else(|| de::Error::invalid_length(0, &self))?;

        Ok(ResourceHandle::unresolved(uuid))
    }
    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: de::MapAccess<'de>,
    {
        let mut uuid: Option<Uuid> = None;
        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "uuid" => {
                    if uuid.is_some() {
                        return Err(de::Error::duplicate_field("uuid"));
                    }

                    uuid = Some(map.next_value()?);
                }
                other => return Err(de::Error::unknown_field(other, &["uuid"])),
            }
        }

        let uuid = uuid.ok_or_else(|| de::Error::missing_field("uuid"))?;
        Ok(ResourceHandle::unresolved(uuid))
    }
}

/// Typed view over a [`ResourceHandle`]
pub struct Handle<T> {
    raw: ResourceHandle,
    _phantom: PhantomData<fn() -> T>,
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self {
            raw: self.raw.clone(),
            _phantom: PhantomData,
        }
    }
}

impl<T: Resource> Handle<T> {
    pub fn get(&self) -> Option<Arc<T>> {
        self.raw.get::<T>()
    }
    pub fn uuid(&self) -> Uuid {
        self.raw.uuid()
    }
    pub fn state(&self) -> LoadState {
        self.raw.state()
    }
    pub fn raw(&self) -> &ResourceHandle {
        &self.raw
    }
}

impl<T> From<Handle<T>> for ResourceHandle {
    fn from(handle: Handle<T>) -> Self {
        handle.raw
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle<{}>({:?})", std::any::type_name::<T>(), self.raw)
    }
}

impl<T> Serialize for Handle<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.raw.serialize(serializer)
    }
}

impl<'de, T> Deserialize<'de> for Handle<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        Ok(Self {
            raw: ResourceHandle::deserialize(deserializer)?,
            _phantom: PhantomData,
        })
    }
}
