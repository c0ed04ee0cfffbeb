use std::{
    collections::HashMap,
    fmt::{self, Debug},
    fs::{self, File},
    io::{self, Read, Seek},
    path::{Path, PathBuf},
};

use parking_lot::Mutex;
use zip::{ZipArchive, read::ZipFile, result::ZipError};

use crate::error::{ClassLoadReason, Error, Result};

/// Supplies class file bytes by internal class name (`a/b/C`).
pub trait ClassSource: Debug + Send + Sync {
    fn name(&self) -> &str;

    /// `Ok(None)` when this source does not have the class.
    fn find_class(&self, class_name: &str) -> Result<Option<Vec<u8>>>;
}

fn io_error(class_name: &str, err: impl fmt::Display) -> Error {
    Error::class_load(class_name, ClassLoadReason::Io(err.to_string()))
}

/// A class path directory holding `a/b/C.class` files.
#[derive(Debug)]
pub struct DirectorySource {
    name: String,
    base_path: PathBuf,
}

impl DirectorySource {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        let base_path = base_path.into();
        DirectorySource {
            name: base_path.display().to_string(),
            base_path,
        }
    }
}

impl ClassSource for DirectorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn find_class(&self, class_name: &str) -> Result<Option<Vec<u8>>> {
        let path = self.base_path.join(format!("{class_name}.class"));
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(class_name, format_args!("{}: {e}", path.display()))),
        }
    }
}

/// A jar or zip archive with class files at their package paths.
pub struct ArchiveSource {
    name: String,
    zip_file: Mutex<ZipArchive<File>>,
}

impl ArchiveSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let name = path.display().to_string();
        let file = File::open(path).map_err(|e| io_error(&name, e))?;
        let archive = ZipArchive::new(file).map_err(|e| io_error(&name, e))?;
        Ok(ArchiveSource {
            name,
            zip_file: Mutex::new(archive),
        })
    }

    fn get_class_bytes<R: Read + Seek>(class_file: &mut ZipFile<R>) -> io::Result<Vec<u8>> {
        let mut content = Vec::with_capacity(class_file.size() as usize);
        class_file.read_to_end(&mut content)?;
        Ok(content)
    }
}

impl Debug for ArchiveSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveSource")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl ClassSource for ArchiveSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn find_class(&self, class_name: &str) -> Result<Option<Vec<u8>>> {
        let mut archive = self.zip_file.lock();
        let mut class_file = match archive.by_name(&format!("{class_name}.class")) {
            Ok(file) => file,
            Err(ZipError::FileNotFound) => return Ok(None),
            Err(e) => return Err(io_error(class_name, e)),
        };
        Self::get_class_bytes(&mut class_file)
            .map(Some)
            .map_err(|e| io_error(class_name, e))
    }
}

/// Class files held in memory, keyed by class name.
#[derive(Debug, Default, Clone)]
pub struct MemorySource {
    name: String,
    classes: HashMap<String, Vec<u8>>,
}

impl MemorySource {
    pub fn new(name: impl Into<String>) -> Self {
        MemorySource {
            name: name.into(),
            classes: HashMap::new(),
        }
    }

    pub fn insert(&mut self, class_name: impl Into<String>, bytes: Vec<u8>) -> &mut Self {
        self.classes.insert(class_name.into(), bytes);
        self
    }

    pub fn with_class(mut self, class_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.insert(class_name, bytes);
        self
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl ClassSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn find_class(&self, class_name: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.classes.get(class_name).cloned())
    }
}

type FindFn = dyn Fn(&str) -> Result<Option<Vec<u8>>> + Send + Sync;

/// Looks classes up through a closure.
pub struct FnSource {
    name: String,
    find: Box<FindFn>,
}

impl FnSource {
    pub fn new(
        name: impl Into<String>,
        find: impl Fn(&str) -> Result<Option<Vec<u8>>> + Send + Sync + 'static,
    ) -> Self {
        FnSource {
            name: name.into(),
            find: Box::new(find),
        }
    }
}

impl Debug for FnSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnSource")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl ClassSource for FnSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn find_class(&self, class_name: &str) -> Result<Option<Vec<u8>>> {
        (self.find)(class_name)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use zip::write::SimpleFileOptions;

    use super::*;

    #[test]
    fn test_directory_source() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a/b")).unwrap();
        fs::write(dir.path().join("a/b/C.class"), [1, 2, 3]).unwrap();

        let source = DirectorySource::new(dir.path());
        assert_eq!(source.find_class("a/b/C").unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(source.find_class("a/b/D").unwrap(), None);
    }

    #[test]
    fn test_archive_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("classes.jar");
        let mut writer = zip::ZipWriter::new(File::create(&path).unwrap());
        writer
            .start_file("a/b/C.class", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(&[4, 5, 6]).unwrap();
        writer.finish().unwrap();

        let source = ArchiveSource::open(&path).unwrap();
        assert_eq!(source.find_class("a/b/C").unwrap(), Some(vec![4, 5, 6]));
        assert_eq!(source.find_class("Missing").unwrap(), None);
    }

    #[test]
    fn test_archive_open_failure() {
        let dir = tempfile::tempdir().unwrap();
        let err = ArchiveSource::open(dir.path().join("nope.jar")).unwrap_err();
        assert!(matches!(
            err.class_load_reason(),
            Some(ClassLoadReason::Io(_))
        ));
    }

    #[test]
    fn test_fn_source() {
        let source = FnSource::new("fn", |name| {
            Ok((name == "Hit").then(|| vec![0xca, 0xfe]))
        });
        assert_eq!(source.find_class("Hit").unwrap(), Some(vec![0xca, 0xfe]));
        assert_eq!(source.find_class("Miss").unwrap(), None);
    }
}
