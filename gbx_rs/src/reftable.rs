use crate::{
    document::Gbx, reader::GbxReader, writer::GbxWriter, Context, GbxError, GbxErrorInner,
};
use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use std::{
    path::{Path, PathBuf},
    sync::{Arc, OnceLock},
};

/// Flag bit set when an entry names a resource index instead of a file.
const RESOURCE: u32 = 4;

/// Supplies the bytes of externally referenced files.
pub trait FileSource {
    fn open(&self, path: &Path) -> std::io::Result<Vec<u8>>;
}

/// Opens referenced files relative to a directory on disk.
#[derive(Debug, Clone)]
pub struct DirSource {
    base: PathBuf,
}

impl DirSource {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        DirSource { base: base.into() }
    }

    /// Resolves relative to the folder containing `document`.
    pub fn for_document(document: &Path) -> Self {
        DirSource::new(document.parent().unwrap_or(Path::new(".")))
    }
}

impl FileSource for DirSource {
    fn open(&self, path: &Path) -> std::io::Result<Vec<u8>> {
        let path = self.base.join(path);
        tracing::debug!("opening external reference {}", path.display());
        std::fs::read(path)
    }
}

/// One folder of the table. Folders are stored in depth-first order, so a
/// folder's wire index is its position plus one.
#[derive(Debug, Clone, PartialEq)]
pub struct Folder {
    pub name: String,
    pub parent: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RefTableFile {
    Name(String),
    Resource(u32),
}

#[derive(Debug, Clone)]
pub struct RefTableEntry {
    pub flags: u32,
    pub file: RefTableFile,
    /// Node index that references this entry in the body.
    pub node_index: i32,
    pub use_file: bool,
    /// Position in [`RefTable::folders`], `None` for the root folder.
    pub folder: Option<usize>,
    resolved: OnceLock<Arc<Gbx>>,
}

impl RefTableEntry {
    pub fn new(file: RefTableFile, node_index: i32, folder: Option<usize>) -> Self {
        let flags = match file {
            RefTableFile::Resource(_) => RESOURCE,
            RefTableFile::Name(_) => 0,
        };
        RefTableEntry {
            flags,
            file,
            node_index,
            use_file: false,
            folder,
            resolved: OnceLock::new(),
        }
    }

    /// Whether the referenced document has been loaded.
    pub fn is_resolved(&self) -> bool {
        self.resolved.get().is_some()
    }

    pub(crate) fn resolved(&self) -> Option<&Arc<Gbx>> {
        self.resolved.get()
    }

    /// Caches a loaded document. The first document stored wins.
    pub(crate) fn set_resolved(&self, gbx: Arc<Gbx>) -> &Arc<Gbx> {
        self.resolved.get_or_init(|| gbx)
    }
}

impl PartialEq for RefTableEntry {
    fn eq(&self, other: &Self) -> bool {
        self.flags == other.flags
            && self.file == other.file
            && self.node_index == other.node_index
            && self.use_file == other.use_file
            && self.folder == other.folder
    }
}

/// External references of one document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefTable {
    /// How many folders up from the document the folder tree is rooted.
    pub ancestor_level: u32,
    pub folders: Vec<Folder>,
    pub entries: Vec<RefTableEntry>,
}

impl RefTable {
    pub(crate) fn read(r: &mut GbxReader<'_>, version: u16) -> Result<RefTable, GbxError> {
        let mut table = RefTable::default();

        let num_external_nodes = r
            .read_length(false)
            .context("Reading num external nodes")?;
        tracing::debug!("num external nodes {}", num_external_nodes);
        if num_external_nodes == 0 {
            return Ok(table);
        }

        table.ancestor_level = r.read_u32::<LE>().context("Reading ancestor level")?;
        read_folders(r, None, &mut table.folders).context("Reading folders")?;

        for i in 0..num_external_nodes {
            let entry = read_entry(r, version, table.folders.len())
                .with_context(|| format!("Reading external node {i}"))?;
            table.entries.push(entry);
        }

        Ok(table)
    }

    pub(crate) fn write(&self, w: &mut GbxWriter, version: u16) -> Result<(), GbxError> {
        w.write_length(self.entries.len())?;
        if self.entries.is_empty() {
            return Ok(());
        }

        w.write_u32::<LE>(self.ancestor_level)?;
        self.write_folders(w, None)?;

        for (i, entry) in self.entries.iter().enumerate() {
            let resource = entry.flags & RESOURCE != 0;
            w.write_u32::<LE>(entry.flags)?;
            match (&entry.file, resource) {
                (RefTableFile::Name(name), false) => w.write_string(name)?,
                (RefTableFile::Resource(index), true) => w.write_u32::<LE>(*index)?,
                _ => {
                    return Err(GbxErrorInner::ReferenceResolution {
                        entry: i,
                        reason: String::from("entry flags disagree with its file"),
                    }
                    .into())
                }
            }
            w.write_i32::<LE>(entry.node_index)?;
            if version >= 5 {
                w.write_bool(entry.use_file)?;
            }
            if !resource {
                w.write_u32::<LE>(entry.folder.map_or(0, |folder| folder as u32 + 1))?;
            }
        }

        Ok(())
    }

    fn write_folders(&self, w: &mut GbxWriter, parent: Option<usize>) -> Result<(), GbxError> {
        let children: Vec<usize> = (0..self.folders.len())
            .filter(|&i| self.folders[i].parent == parent)
            .collect();

        w.write_length(children.len())?;
        for child in children {
            w.write_string(&self.folders[child].name)?;
            self.write_folders(w, Some(child))?;
        }
        Ok(())
    }

    /// Path of an entry relative to the referencing document's folder.
    pub fn entry_path(&self, entry: usize) -> Option<PathBuf> {
        let entry = self.entries.get(entry)?;
        let RefTableFile::Name(name) = &entry.file else {
            return None;
        };

        let mut parts = Vec::new();
        let mut folder = entry.folder;
        while let Some(index) = folder {
            let folder_ref = self.folders.get(index)?;
            parts.push(folder_ref.name.as_str());
            folder = folder_ref.parent;
        }

        let mut path = PathBuf::new();
        for _ in 0..self.ancestor_level {
            path.push("..");
        }
        for part in parts.into_iter().rev() {
            path.push(part.trim_end_matches(&['\\', '/'][..]));
        }
        path.push(name);
        Some(path)
    }
}

fn read_folders(
    r: &mut GbxReader<'_>,
    parent: Option<usize>,
    folders: &mut Vec<Folder>,
) -> Result<(), GbxError> {
    let num_folders = r.read_length(false).context("Reading num folders")?;
    for i in 0..num_folders {
        let name = r
            .read_string()
            .with_context(|| format!("Reading folder {i} name"))?;
        tracing::trace!("folder {:?} under {:?}", name, parent);
        folders.push(Folder { name, parent });
        read_folders(r, Some(folders.len() - 1), folders)?;
    }
    Ok(())
}

fn read_entry(
    r: &mut GbxReader<'_>,
    version: u16,
    num_folders: usize,
) -> Result<RefTableEntry, GbxError> {
    let flags = r.read_u32::<LE>().context("Reading flags")?;
    let resource = flags & RESOURCE != 0;

    let file = if resource {
        RefTableFile::Resource(r.read_u32::<LE>().context("Reading resource index")?)
    } else {
        RefTableFile::Name(r.read_string().context("Reading file name")?)
    };

    let node_index = r.read_i32::<LE>().context("Reading node index")?;
    let use_file = if version >= 5 {
        r.read_bool().context("Reading use file")?
    } else {
        false
    };

    let folder = if resource {
        None
    } else {
        let index = r.read_u32::<LE>().context("Reading folder index")? as usize;
        if index > num_folders {
            return Err(GbxErrorInner::ReferenceResolution {
                entry: index,
                reason: format!("folder index beyond {num_folders} folders"),
            }
            .into());
        }
        index.checked_sub(1)
    };

    Ok(RefTableEntry {
        flags,
        file,
        node_index,
        use_file,
        folder,
        resolved: OnceLock::new(),
    })
}
