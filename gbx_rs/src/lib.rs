use std::{
    fmt::{Debug, Display},
    ops::Deref,
};

pub mod catalog;
mod codec;
mod dispatch;
mod document;
mod header;
mod node;
mod reader;
mod reftable;
mod registry;
mod rw;
mod types;
mod writer;

pub use catalog::Class;
pub use codec::{Codec, CompressedSection, Lzo, Zlib};
pub use document::{Gbx, Resolved, Settings};
pub use header::{ByteFormat, Compression, Header, HeaderChunk};
pub use node::{ChunkSlot, Node, NodeId, NodeRef};
pub use reader::GbxReader;
pub use reftable::{DirSource, FileSource, Folder, RefTable, RefTableEntry, RefTableFile};
pub use registry::{canonical_chunk_id, canonical_class_id, lookup_chunk, ChunkInfo, NodeClass};
pub use rw::{ReadWrite, ReaderWriter};
pub use types::{
    Box3, Byte3, FileRef, Id, Int2, Int3, Int4, Iso4, Mat3, Mat4, Meta, Quat, Vec2, Vec3, Vec4,
};
pub use writer::GbxWriter;

/// Marks the end of a node's chunk list.
pub const FACADE: u32 = 0xfacade01;

/// "PIKS" read as a little-endian u32, follows the ID of a skippable chunk.
pub const SKIP: u32 = 0x534b4950;

trait Context<T> {
    fn context<C>(self, context: C) -> Result<T, GbxError>
    where
        C: std::fmt::Display + Send + Sync + 'static;

    fn with_context<F, C>(self, context_fn: F) -> Result<T, GbxError>
    where
        F: FnOnce() -> C,
        C: std::fmt::Display + Send + Sync + 'static;
}

impl<T, E: Into<GbxError>> Context<T> for Result<T, E> {
    fn context<C>(self, context: C) -> Result<T, GbxError>
    where
        C: std::fmt::Display + Send + Sync + 'static,
    {
        match self {
            Ok(t) => Ok(t),
            Err(err) => Err(GbxError::Context {
                context: context.to_string(),
                inner: Box::new(err.into()),
            }),
        }
    }

    fn with_context<F, C>(self, context_fn: F) -> Result<T, GbxError>
    where
        F: FnOnce() -> C,
        C: std::fmt::Display + Send + Sync + 'static,
    {
        match self {
            Ok(t) => Ok(t),
            Err(err) => Err(GbxError::Context {
                context: context_fn().to_string(),
                inner: Box::new(err.into()),
            }),
        }
    }
}

#[derive(Debug)]
pub enum GbxError {
    Root(GbxErrorInner),
    Context {
        context: String,
        inner: Box<GbxError>,
    },
}

impl<T: Into<GbxErrorInner>> From<T> for GbxError {
    fn from(value: T) -> Self {
        GbxError::Root(value.into())
    }
}

impl Display for GbxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GbxError::Root(inner) => write!(f, "{}", inner),
            GbxError::Context { context, inner } => {
                Display::fmt(inner, f)?;
                write!(f, "\n  {}", context)
            }
        }
    }
}

impl Deref for GbxError {
    type Target = GbxErrorInner;

    fn deref(&self) -> &Self::Target {
        match self {
            GbxError::Root(inner) => inner,
            GbxError::Context { inner, .. } => {
                let box_ref = Box::as_ref(inner);
                <GbxError as Deref>::deref(box_ref)
            }
        }
    }
}

impl std::error::Error for GbxError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        let inner: &GbxErrorInner = self;
        Some(inner)
    }
}

#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum GbxErrorInner {
    #[error("I/O error")]
    Io(#[from] std::io::Error),

    #[error("Not a GBX file")]
    NotGbx,

    #[error("GBX version {0} not supported")]
    VersionNotSupported(u16),

    #[error("Text GBX files are not supported")]
    TextFormat,

    #[error("Could not decompress")]
    Lzo(#[from] lzokay_native::Error),

    #[error("No codec configured for {0}")]
    MissingCodec(&'static str),

    #[error("Invalid byte format {0}")]
    InvalidByteFormat(u8),

    #[error("Invalid compression state {0}")]
    InvalidCompressionState(u8),

    #[error("Length {length} at {position:08x} is negative or larger than {limit}")]
    SizeValidation {
        length: i64,
        position: u64,
        limit: usize,
    },

    #[error("No class registered with ID {0:08x}")]
    UnknownClass(u32),

    #[error("Unrecoverable chunk {chunk_id:08x} for class {class_id:08x}")]
    UnrecoverableChunk { chunk_id: u32, class_id: u32 },

    #[error("Version {version} of chunk {chunk_id:08x} not supported")]
    ChunkVersionNotSupported { chunk_id: u32, version: i32 },

    #[error("Could not resolve external reference {entry}: {reason}")]
    ReferenceResolution { entry: usize, reason: String },

    #[error("Wanted class ID {wanted:08x}, had class ID {had:08x} instead")]
    IncorrectType { wanted: u32, had: u32 },

    #[error("Invalid UTF-8")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("Invalid lookback string {0:08x}, file may be corrupted")]
    InvalidLookbackString(u32),

    #[error("Invalid node reference {0}")]
    InvalidNodeRef(i32),

    #[error("{value} does not fit an optimized integer with maximum {max}")]
    OptimizedIntOutOfRange { value: u32, max: u32 },

    #[error("Cancelled")]
    Cancelled,
}
