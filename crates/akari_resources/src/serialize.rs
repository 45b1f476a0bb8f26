use std::{
    any::TypeId,
    collections::HashMap,
    io::Write,
    path::Path,
};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use type_uuid::TypeUuid;
use uuid::Uuid;

use crate::Resource;

/// Turns resource files into resources and back.
///
/// `decode` runs on worker threads and must not depend on any state of the resource manager.
pub trait Serializer: Send + Sync + 'static {
    fn decode(&self, path: &Path) -> anyhow::Result<Box<dyn Resource>>;
    fn encode(&self, resource: &dyn Resource, path: &Path) -> anyhow::Result<()>;
}

struct SerdeFns {
    name: &'static str,
    serialize: fn(&dyn Resource, &mut dyn FnMut(&dyn erased_serde::Serialize)),
    deserialize:
        fn(&mut dyn erased_serde::Deserializer) -> Result<Box<dyn Resource>, erased_serde::Error>,
}

#[derive(Serialize)]
struct Envelope<'a> {
    #[serde(rename = "type")]
    type_uuid: Uuid,
    data: &'a dyn erased_serde::Serialize,
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    type_uuid: Uuid,
    data: serde_yaml::Value,
}

/// YAML gateway for every registered resource type.
///
/// Files carry the type uuid next to the payload, so decoding doesn't need to know what it is
/// looking at and files of unregistered types are rejected.
#[derive(Default)]
pub struct YamlSerializer {
    fn_map: HashMap<type_uuid::Bytes, SerdeFns, fxhash::FxBuildHasher>,
    type_ids: HashMap<TypeId, type_uuid::Bytes, fxhash::FxBuildHasher>,
}

impl YamlSerializer {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn register_type<T: Resource + Serialize + DeserializeOwned + TypeUuid>(&mut self) {
        let fns = SerdeFns {
            name: std::any::type_name::<T>(),
            serialize: |resource, serializer_fn| {
                if let Some(typed) = resource.downcast_ref::<T>() {
                    (serializer_fn)(typed);
                }
            },
            deserialize: |deserializer| -> Result<Box<dyn Resource>, erased_serde::Error> {
                let typed = erased_serde::deserialize::<T>(deserializer)?;
                Ok(Box::new(typed))
            },
        };

        if self.fn_map.insert(T::UUID, fns).is_some() {
            log::warn!("Resource type {} registered twice", std::any::type_name::<T>());
        }
        self.type_ids.insert(TypeId::of::<T>(), T::UUID);
    }
    pub fn with_type<T: Resource + Serialize + DeserializeOwned + TypeUuid>(mut self) -> Self {
        self.register_type::<T>();
        self
    }
    pub fn is_registered<T: TypeUuid>(&self) -> bool {
        self.fn_map.contains_key(&T::UUID)
    }
}

impl Serializer for YamlSerializer {
    fn decode(&self, path: &Path) -> anyhow::Result<Box<dyn Resource>> {
        let file = std::fs::File::open(path)?;
        let raw: RawEnvelope = serde_yaml::from_reader(file)?;

        let fns = self.fn_map.get(raw.type_uuid.as_bytes()).ok_or_else(|| {
            anyhow::anyhow!("{} is not a registered resource type", raw.type_uuid)
        })?;

        let resource = (fns.deserialize)(&mut <dyn erased_serde::Deserializer>::erase(raw.data))
            .map_err(|err| anyhow::anyhow!("Invalid {}: {}", fns.name, err))?;

        Ok(resource)
    }
    fn encode(&self, resource: &dyn Resource, path: &Path) -> anyhow::Result<()> {
        let type_uuid = self
            .type_ids
            .get(&resource.as_any().type_id())
            .ok_or_else(|| anyhow::anyhow!("Resource {} has an unregistered type", resource.uuid()))?;
        let fns = &self.fn_map[type_uuid];

        let mut yaml = None;
        (fns.serialize)(resource, &mut |data| {
            yaml = Some(serde_yaml::to_string(&Envelope {
                type_uuid: Uuid::from_bytes(*type_uuid),
                data,
            }));
        });
        let yaml = yaml.ok_or_else(|| anyhow::anyhow!("Failed to serialize {}", fns.name))??;

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;

        let mut file = tempfile::NamedTempFile::new_in(dir)?;
        file.write_all(yaml.as_bytes())?;
        file.persist(path)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize, type_uuid::TypeUuid)]
    #[uuid = "3f6a1d52-8a0e-4b43-9d51-6c3c2b7e0a11"]
    struct Note {
        uuid: Uuid,
        text: String,
    }

    impl Resource for Note {
        fn uuid(&self) -> Uuid {
            self.uuid
        }
    }

    #[derive(Serialize, Deserialize, type_uuid::TypeUuid)]
    #[uuid = "8c5f2e07-1b6d-4f0a-a3b2-94e1d7c6f580"]
    struct Counter {
        uuid: Uuid,
        count: u32,
    }

    impl Resource for Counter {
        fn uuid(&self) -> Uuid {
            self.uuid
        }
    }

    #[test]
    fn encoded_file_decodes_to_same_type() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes/a.note");
        let serializer = YamlSerializer::new().with_type::<Note>();
        let note = Note {
            uuid: Uuid::new_v4(),
            text: "hello".into(),
        };

        serializer.encode(&note, &path).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("3f6a1d52-8a0e-4b43-9d51-6c3c2b7e0a11"));

        let decoded = serializer.decode(&path).unwrap();
        assert_eq!(decoded.uuid(), note.uuid);
        assert_eq!(decoded.downcast_ref::<Note>(), Some(&note));
    }

    #[test]
    fn unregistered_types_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.counter");
        let counter = Counter {
            uuid: Uuid::new_v4(),
            count: 3,
        };

        let notes_only = YamlSerializer::new().with_type::<Note>();
        assert!(notes_only.encode(&counter, &path).is_err());
        assert!(!path.exists());

        let both = YamlSerializer::new().with_type::<Note>().with_type::<Counter>();
        assert!(both.is_registered::<Counter>());
        both.encode(&counter, &path).unwrap();

        assert!(notes_only.decode(&path).is_err());
        assert!(both.decode(&path).unwrap().is::<Counter>());
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.note");
        std::fs::write(&path, "just some text").unwrap();

        let serializer = YamlSerializer::new().with_type::<Note>();
        assert!(serializer.decode(&path).is_err());
        assert!(serializer.decode(&dir.path().join("missing.note")).is_err());
    }
}
