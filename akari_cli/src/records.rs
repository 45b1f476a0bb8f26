use std::{io::Write, path::Path};

use akari_resources::{MetadataStore, Record};
use uuid::Uuid;

fn sorted(store: &MetadataStore) -> Vec<&Record> {
    let mut records: Vec<_> = store.records().iter().collect();
    records.sort_by(|a, b| a.path.cmp(&b.path));
    records
}

pub fn list(store: &MetadataStore, out: &mut impl Write) -> anyhow::Result<()> {
    for record in sorted(store) {
        writeln!(out, "{}  {}", record.uuid, record.path.display())?;
    }
    Ok(())
}

pub fn lookup(store: &MetadataStore, key: &str, out: &mut impl Write) -> anyhow::Result<()> {
    if let Ok(uuid) = key.parse::<Uuid>() {
        let path = store
            .path_for(&uuid)
            .ok_or_else(|| anyhow::anyhow!("{} is not registered", uuid))?;
        writeln!(out, "{}", path.display())?;
    } else {
        let uuid = store
            .uuid_for(Path::new(key))
            .ok_or_else(|| anyhow::anyhow!("{:?} is not registered", key))?;
        writeln!(out, "{}", uuid)?;
    }

    Ok(())
}

/// Returns the number of records without a resource file
pub fn verify(store: &MetadataStore, out: &mut impl Write) -> anyhow::Result<usize> {
    let mut missing = 0;
    for record in sorted(store) {
        if !record.path.is_file() {
            writeln!(out, "missing  {}  {}", record.uuid, record.path.display())?;
            missing += 1;
        }
    }

    log::info!("Checked {} record(s)", store.len());
    Ok(missing)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(f: impl FnOnce(&mut Vec<u8>) -> anyhow::Result<()>) -> String {
        let mut out = Vec::new();
        f(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn lookup_both_directions() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = MetadataStore::load(dir.path()).unwrap();
        let uuid = Uuid::new_v4();
        store.add(uuid, "textures/a.asset").unwrap();

        assert_eq!(
            output(|out| lookup(&store, &uuid.to_string(), out)),
            "textures/a.asset\n"
        );
        assert_eq!(
            output(|out| lookup(&store, "./textures/a.asset", out)),
            format!("{}\n", uuid)
        );
        assert!(lookup(&store, "b.asset", &mut Vec::new()).is_err());
        assert!(lookup(&store, &Uuid::new_v4().to_string(), &mut Vec::new()).is_err());
    }

    #[test]
    fn list_and_verify() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = MetadataStore::load(dir.path().join("metadata")).unwrap();

        let present = dir.path().join("present.asset");
        std::fs::write(&present, "").unwrap();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        store.add(a, &present).unwrap();
        store.add(b, dir.path().join("absent.asset")).unwrap();

        let listed = output(|out| list(&store, out));
        assert_eq!(listed.lines().count(), 2);
        assert!(listed.contains(&a.to_string()));

        let mut out = Vec::new();
        assert_eq!(verify(&store, &mut out).unwrap(), 1);
        let report = String::from_utf8(out).unwrap();
        assert!(report.contains(&b.to_string()));
        assert!(!report.contains(&a.to_string()));
    }
}
