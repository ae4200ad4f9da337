use crate::{
    codec::{Codec, Lzo, Packed, Zlib},
    dispatch,
    header::{Compression, Header, HeaderChunk},
    node::{Node, NodeArena, NodeId, NodeRef, WriteGraph},
    reader::GbxReader,
    reftable::{FileSource, RefTable},
    registry::{canonical_class_id, NodeClass},
    writer::GbxWriter,
    Class, Context, GbxError, GbxErrorInner,
};
use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use std::sync::{atomic::AtomicBool, Arc};

/// Options for reading and writing documents.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Codec for the document body. Compressed bodies cannot be read without
    /// one.
    pub body_codec: Option<Arc<dyn Codec>>,
    /// Codec for compressed sub-sections. Without one, sub-sections are kept
    /// as opaque bytes.
    pub section_codec: Option<Arc<dyn Codec>>,
    /// Checked between chunks. Reading stops with an error once it is set.
    pub cancel: Option<Arc<AtomicBool>>,
    /// Largest length prefix accepted before allocating.
    pub max_length: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            body_codec: Some(Arc::new(Lzo)),
            section_codec: Some(Arc::new(Zlib)),
            cancel: None,
            max_length: 0x1000_0000,
        }
    }
}

/// A referenced node, either in the same document or in a loaded external
/// document.
#[derive(Debug, Clone, Copy)]
pub enum Resolved<'a> {
    Internal(&'a Node),
    /// The external document. The referenced node is its root.
    External(&'a Gbx),
}

impl<'a> Resolved<'a> {
    pub fn node(&self) -> &'a Node {
        match self {
            Resolved::Internal(node) => node,
            Resolved::External(gbx) => gbx.root(),
        }
    }
}

/// A document: header, reference table, and the node graph of the body.
#[derive(Debug, Clone)]
pub struct Gbx {
    pub header: Header,
    pub ref_table: RefTable,
    root: Node,
    /// Every node other than the root.
    nodes: NodeArena,
    num_nodes: u32,
    body: Option<Packed>,
    settings: Settings,
}

impl Gbx {
    /// A new document with `root` as its root node.
    pub fn new<N: NodeClass>(root: N) -> Gbx {
        let mut header = Header::new(N::CLASS_ID);
        header.chunks = N::CHUNKS
            .iter()
            .filter(|info| info.header && !info.ignored)
            .map(|info| HeaderChunk {
                id: info.id,
                heavy: false,
                version: Some(info.version.unwrap_or(0)),
                data: Vec::new(),
            })
            .collect();

        Gbx {
            header,
            ref_table: RefTable::default(),
            root: Node::new(root),
            nodes: NodeArena::default(),
            num_nodes: 0,
            body: None,
            settings: Settings::default(),
        }
    }

    pub fn read(data: &[u8]) -> Result<Gbx, GbxError> {
        Gbx::read_with(data, Settings::default())
    }

    pub fn read_with(data: &[u8], settings: Settings) -> Result<Gbx, GbxError> {
        let mut r = GbxReader::new(data, settings.clone());
        let mut header = Header::read(&mut r).context("Parsing header")?;

        let num_nodes = r.read_u32::<LE>().context("Reading num nodes")?;
        tracing::debug!("num nodes {}", num_nodes);

        let ref_table = RefTable::read(&mut r, header.version).context("Reading ref table")?;

        let (body, packed) = match header.body_compression {
            Compression::Compressed => {
                let uncompressed_size = r
                    .read_u32::<LE>()
                    .context("Reading uncompressed size")?;
                tracing::debug!("uncompressed size {}", uncompressed_size);
                let compressed_size = r.read_u32::<LE>().context("Reading compressed size")?;
                tracing::debug!("compressed size {}", compressed_size);

                let codec = settings
                    .body_codec
                    .clone()
                    .ok_or(GbxErrorInner::MissingCodec("body"))?;
                let compressed = r
                    .read_raw(compressed_size as usize)
                    .context("Reading compressed body")?;
                let body = codec
                    .decompress(compressed, uncompressed_size as usize)
                    .context("Decompressing body")?;
                let packed = Packed {
                    unpacked: body.clone(),
                    packed: compressed.to_vec(),
                };
                (body, Some(packed))
            }
            Compression::Uncompressed => {
                let remaining = r.remaining();
                (r.read_raw(remaining)?.to_vec(), None)
            }
        };

        let class_id = canonical_class_id(header.class_id);
        let class = Class::new(class_id).ok_or(GbxErrorInner::UnknownClass(header.class_id))?;
        let mut root = Node::from_parts(class_id, header.class_id, class);
        header.decode_chunks(&mut root.class, &settings);

        let mut body_reader = GbxReader::new(&body, settings.clone());
        for (position, entry) in ref_table.entries.iter().enumerate() {
            body_reader.graph.externals.insert(entry.node_index, position);
        }

        dispatch::read_chunks(&mut body_reader, &mut root).context("Reading body")?;
        if body_reader.remaining() != 0 {
            tracing::warn!("{} bytes after the root node", body_reader.remaining());
        }

        Ok(Gbx {
            header,
            ref_table,
            root,
            nodes: std::mem::take(&mut body_reader.graph.nodes),
            num_nodes,
            body: packed,
            settings,
        })
    }

    /// Buffers `source`, then reads it exactly like [`Gbx::read_with`].
    #[cfg(feature = "tokio")]
    pub async fn read_async<R>(source: &mut R, settings: Settings) -> Result<Gbx, GbxError>
    where
        R: tokio::io::AsyncRead + Unpin,
    {
        use tokio::io::AsyncReadExt;

        let mut data = Vec::new();
        source
            .read_to_end(&mut data)
            .await
            .context("Buffering document")?;
        Gbx::read_with(&data, settings)
    }

    pub fn write(&mut self) -> Result<Vec<u8>, GbxError> {
        let settings = self.settings.clone();
        self.write_with(&settings)
    }

    pub fn write_with(&mut self, settings: &Settings) -> Result<Vec<u8>, GbxError> {
        let payloads = self
            .header
            .encode_chunks(&mut self.root.class, settings)
            .context("Writing header chunks")?;

        let externals = self
            .ref_table
            .entries
            .iter()
            .map(|entry| entry.node_index)
            .collect();
        let mut body_writer = GbxWriter::new(settings.clone());
        body_writer.graph = WriteGraph::new(std::mem::take(&mut self.nodes), externals);

        let result =
            dispatch::write_chunks(&mut body_writer, &mut self.root).context("Writing body");
        let graph = std::mem::take(&mut body_writer.graph);
        let highest = graph.highest_index().unwrap_or(0);
        self.nodes = graph.nodes;
        result?;

        for (&id, &index) in graph.written.iter() {
            if let Some(node) = self.nodes.get_mut(id) {
                node.index = Some(index);
            }
        }

        let num_nodes = self.num_nodes.max(highest as u32 + 1);
        let body = body_writer.into_inner();

        let mut w = GbxWriter::new(settings.clone());
        self.header
            .write(&mut w, &payloads)
            .context("Writing header")?;
        w.write_u32::<LE>(num_nodes)?;
        self.ref_table
            .write(&mut w, self.header.version)
            .context("Writing ref table")?;

        match self.header.body_compression {
            Compression::Compressed => {
                let codec = settings
                    .body_codec
                    .clone()
                    .ok_or(GbxErrorInner::MissingCodec("body"))?;
                let packed = Packed::repack(self.body.as_ref(), &body, codec.as_ref())
                    .context("Compressing body")?;
                w.write_u32::<LE>(body.len() as u32)?;
                w.write_u32::<LE>(packed.len() as u32)?;
                w.write_raw(&packed)?;
            }
            Compression::Uncompressed => w.write_raw(&body)?,
        }

        Ok(w.into_inner())
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut Node {
        &mut self.root
    }

    /// Root node as its catalog class.
    pub fn root_as<N: NodeClass>(&self) -> Result<&N, GbxError> {
        let root = self.root();
        root.get::<N>().ok_or_else(|| {
            GbxErrorInner::IncorrectType {
                wanted: N::CLASS_ID,
                had: root.class_id(),
            }
            .into()
        })
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter()
    }

    /// Adds a node to the document. It is written inline the first time a
    /// field references it.
    pub fn insert(&mut self, node: Node) -> NodeId {
        self.nodes.insert(node)
    }

    /// Looks up a referenced node, loading external documents through
    /// `source` on first use. Loaded documents are cached on their reference
    /// table entry; a failed load is not cached.
    pub fn resolve(
        &self,
        reference: NodeRef,
        source: &dyn FileSource,
    ) -> Result<Resolved<'_>, GbxError> {
        let entry_index = match reference {
            NodeRef::Internal(id) => {
                return self
                    .node(id)
                    .map(Resolved::Internal)
                    .ok_or_else(|| GbxErrorInner::InvalidNodeRef(id.index() as i32).into());
            }
            NodeRef::External(entry) => entry,
        };

        let Some(entry) = self.ref_table.entries.get(entry_index) else {
            return Err(GbxErrorInner::ReferenceResolution {
                entry: entry_index,
                reason: String::from("no such reference table entry"),
            }
            .into());
        };

        if let Some(gbx) = entry.resolved() {
            return Ok(Resolved::External(gbx));
        }

        let Some(path) = self.ref_table.entry_path(entry_index) else {
            return Err(GbxErrorInner::ReferenceResolution {
                entry: entry_index,
                reason: String::from("entry names a resource, not a file"),
            }
            .into());
        };

        tracing::debug!("resolving entry {} at {}", entry_index, path.display());
        let data = source
            .open(&path)
            .map_err(|err| GbxErrorInner::ReferenceResolution {
                entry: entry_index,
                reason: format!("could not open {}: {}", path.display(), err),
            })?;
        let gbx = Gbx::read_with(&data, self.settings.clone())
            .with_context(|| format!("Reading external reference {}", path.display()))?;

        Ok(Resolved::External(entry.set_resolved(Arc::new(gbx))))
    }
}
