use crate::engines::Result;
use crate::proto::{self, DELIMITER};
use log::{debug, warn};
use std::collections::btree_map::{self, BTreeMap};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Counts reported by [`FlatStore::load`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadStats {
    /// Lines stored into the map. A key repeated in the file counts each time.
    pub records: usize,
    /// Lines dropped because they had no delimiter.
    pub skipped: usize,
}

/// In-memory string map persisted to a single flat file on request.
///
/// Nothing touches the disk except [`save`](FlatStore::save) and
/// [`load`](FlatStore::load).
#[derive(Debug, Clone)]
pub struct FlatStore {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl FlatStore {
    pub fn new(path: impl Into<PathBuf>) -> FlatStore {
        FlatStore {
            path: path.into(),
            entries: BTreeMap::new(),
        }
    }

    /// Bind to `path` and load whatever it holds.
    pub fn open(path: impl Into<PathBuf>) -> Result<FlatStore> {
        let mut store = FlatStore::new(path);
        store.load()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn set(&mut self, key: String, value: String) {
        self.entries.insert(key, value);
    }

    /// The value for `key`, or an empty string when absent.
    pub fn get(&self, key: &str) -> String {
        self.lookup(key).unwrap_or_default().to_owned()
    }

    pub fn lookup(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, String> {
        self.entries.iter()
    }

    /// Write every entry to the backing file in key order.
    ///
    /// Records go to a uniquely named temporary file next to the backing
    /// file, which is then renamed over it, so the old content survives a
    /// failed write. A symlinked backing file is resolved first and the
    /// file it points to is replaced, keeping its permissions.
    pub fn save(&self) -> Result<()> {
        let target = match fs::canonicalize(&self.path) {
            Ok(target) => target,
            Err(e) if e.kind() == ErrorKind::NotFound => self.path.clone(),
            Err(e) => return Err(e.into()),
        };
        let dir = match target.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        // Opened without truncation so a new file gets the default mode.
        let permissions = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&target)?
            .metadata()?
            .permissions();
        let tmp = NamedTempFile::new_in(dir)?;
        fs::set_permissions(tmp.path(), permissions)?;
        self.write_to(tmp.as_file())?;
        tmp.persist(&target).map_err(|e| e.error)?;
        debug!("Saved {} entries to {}", self.entries.len(), target.display());
        Ok(())
    }

    /// Replace the map with the content of the backing file.
    ///
    /// A missing file yields an empty map. On any other failure the map is
    /// left empty and the error is returned.
    pub fn load(&mut self) -> Result<LoadStats> {
        self.entries.clear();
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("{} does not exist, starting empty", self.path.display());
                return Ok(LoadStats::default());
            }
            Err(e) => return Err(e.into()),
        };
        match self.read_from(file) {
            Ok(stats) => {
                debug!(
                    "Loaded {} records from {} ({} skipped)",
                    stats.records,
                    self.path.display(),
                    stats.skipped
                );
                Ok(stats)
            }
            Err(e) => {
                self.entries.clear();
                Err(e)
            }
        }
    }

    fn write_to(&self, file: &File) -> Result<()> {
        let mut writer = BufWriter::new(file);
        for (key, value) in &self.entries {
            if key.contains(DELIMITER) {
                warn!("Key {key:?} contains '{DELIMITER}' and will not survive a reload");
            }
            writer.write_all(proto::encode(key, value).as_bytes())?;
        }
        writer.flush()?;
        Ok(())
    }

    fn read_from(&mut self, file: File) -> Result<LoadStats> {
        let mut stats = LoadStats::default();
        let mut reader = BufReader::new(file);
        let mut line = String::new();
        let mut n = 0;
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                break;
            }
            n += 1;
            // Only the newline is a terminator; a '\r' belongs to the value.
            let record = line.strip_suffix('\n').unwrap_or(&line);
            match proto::parse_line(record) {
                Some((key, value)) => {
                    self.entries.insert(key.to_owned(), value.to_owned());
                    stats.records += 1;
                }
                None => {
                    if !record.is_empty() {
                        warn!("{}:{n}: no '{DELIMITER}', skipped", self.path.display());
                    }
                    stats.skipped += 1;
                }
            }
        }
        Ok(stats)
    }
}

impl<'a> IntoIterator for &'a FlatStore {
    type Item = (&'a String, &'a String);
    type IntoIter = btree_map::Iter<'a, String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn get_missing_key_is_empty() {
        let store = FlatStore::new("unused");
        assert_eq!(store.get("nonexistent"), "");
        assert_eq!(store.lookup("nonexistent"), None);
    }

    #[test]
    fn set_overwrites() {
        let mut store = FlatStore::new("unused");
        store.set("k".to_owned(), "v1".to_owned());
        store.set("k".to_owned(), "v2".to_owned());
        assert_eq!(store.get("k"), "v2");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn save_writes_sorted_records() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("store.txt");
        let mut store = FlatStore::new(&path);
        store.set("b".to_owned(), "2:3".to_owned());
        store.set("a".to_owned(), "1".to_owned());
        store.save().unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "a:1\nb:2:3\n");
        let names: Vec<_> = fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, vec!["store.txt"]);
    }

    #[test]
    fn save_replaces_previous_content() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("store.txt");
        fs::write(&path, "old:content\nmore:lines\n").unwrap();

        let mut store = FlatStore::new(&path);
        store.set("new".to_owned(), "1".to_owned());
        store.save().unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "new:1\n");
    }

    #[test]
    fn load_keeps_carriage_return() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("store.txt");
        fs::write(&path, "a:1\r\nb:2\n").unwrap();

        let mut store = FlatStore::new(&path);
        store.load().unwrap();
        assert_eq!(store.get("a"), "1\r");
        assert_eq!(store.get("b"), "2");
    }

    #[test]
    fn load_counts_skipped_lines() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("store.txt");
        fs::write(&path, "a:1\nmalformed line\n\nb:2").unwrap();

        let mut store = FlatStore::new(&path);
        let stats = store.load().unwrap();
        assert_eq!(stats, LoadStats { records: 2, skipped: 2 });
        assert_eq!(store.get("b"), "2");
    }

    #[test]
    fn load_invalid_utf8_leaves_map_empty() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("store.txt");
        fs::write(&path, b"a:1\nb:\xff\xfe\n").unwrap();

        let mut store = FlatStore::new(&path);
        store.set("stale".to_owned(), "x".to_owned());
        assert!(store.load().is_err());
        assert!(store.is_empty());
    }
}
