use crate::{catalog::Class, rw::ReaderWriter, GbxError};
use std::fmt::Debug;

/// Static facts about one chunk of a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkInfo {
    pub id: u32,
    /// Written with a `PIKS` marker and a byte length.
    pub skippable: bool,
    /// Appears in the user data section of a document.
    pub header: bool,
    /// Never interpreted, only carried through as bytes.
    pub ignored: bool,
    /// Version written for nodes created in memory. `None` when the chunk
    /// has no version field.
    pub version: Option<i32>,
}

impl ChunkInfo {
    pub const fn new(id: u32) -> ChunkInfo {
        ChunkInfo {
            id,
            skippable: false,
            header: false,
            ignored: false,
            version: None,
        }
    }

    pub const fn skippable(self) -> ChunkInfo {
        ChunkInfo {
            skippable: true,
            ..self
        }
    }

    pub const fn header(self) -> ChunkInfo {
        ChunkInfo {
            header: true,
            ..self
        }
    }

    pub const fn ignored(self) -> ChunkInfo {
        ChunkInfo {
            ignored: true,
            ..self
        }
    }

    pub const fn version(self, version: i32) -> ChunkInfo {
        ChunkInfo {
            version: Some(version),
            ..self
        }
    }

    pub fn is_versioned(&self) -> bool {
        self.version.is_some()
    }
}

/// A registered node type.
///
/// Implemented for every catalog class by the `catalog!` macro.
pub trait NodeClass: Sized + Default + Clone + Debug {
    const CLASS_ID: u32;
    const NAME: &'static str;
    /// Chunks in the order they are written for a node created in memory.
    const CHUNKS: &'static [ChunkInfo];

    /// Runs the layout routine of one chunk in the direction of `rw`.
    fn read_write_chunk(
        &mut self,
        chunk_id: u32,
        rw: &mut ReaderWriter<'_, '_>,
    ) -> Result<(), GbxError>;

    fn from_class(class: &Class) -> Option<&Self>;

    fn from_class_mut(class: &mut Class) -> Option<&mut Self>;

    fn into_class(self) -> Class;

    fn chunk(chunk_id: u32) -> Option<&'static ChunkInfo> {
        Self::CHUNKS.iter().find(|chunk| chunk.id == chunk_id)
    }
}

/// Maps class IDs used by older games to the ones the catalog is keyed by.
pub fn canonical_class_id(class_id: u32) -> u32 {
    match class_id {
        0x21080000 => 0x03043000, // CGameCtnChallenge (VSkipper)
        0x2108d000 => 0x03093000, // CGameCtnReplayRecord (VSkipper)
        0x24003000 => 0x03043000, // CGameCtnChallenge
        0x2400c000 => 0x0305b000, // CGameCtnChallengeParameters
        0x2401b000 => 0x03092000, // CGameCtnGhost
        0x2403a000 => 0x03059000, // CGameCtnBlockSkin
        0x2403c000 => 0x0301b000, // CGameCtnCollectorList
        0x2403f000 => 0x03093000, // CGameCtnReplayRecord
        0x24061000 => 0x03078000, // CGameCtnMediaTrack
        0x24062000 => 0x03078000, // CGameCtnMediaTrack
        0x24076000 => 0x03079000, // CGameCtnMediaClip
        0x2407e000 => 0x03093000, // CGameCtnReplayRecord
        0x0313b000 => 0x2e009000, // CGameWaypointSpecialProperty
        _ => class_id,
    }
}

pub fn canonical_chunk_id(chunk_id: u32) -> u32 {
    canonical_class_id(chunk_id & 0xffff_f000) | (chunk_id & 0xfff)
}

/// Chunk metadata for a class ID as written in a file.
pub fn lookup_chunk(class_id: u32, chunk_id: u32) -> Option<&'static ChunkInfo> {
    let chunk_id = canonical_chunk_id(chunk_id);
    Class::new(canonical_class_id(class_id))?
        .chunks()
        .iter()
        .find(|chunk| chunk.id == chunk_id)
}
