use crate::{rw::ReaderWriter, Context, GbxError, ReadWrite};
use std::fmt::Display;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Vec4 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Int2 {
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Int3 {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Int4 {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub w: i32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Byte3 {
    pub x: u8,
    pub y: u8,
    pub z: u8,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quat {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Default for Quat {
    fn default() -> Self {
        Quat {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            w: 1.0,
        }
    }
}

/// Row-major 3x3 matrix.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Mat3(pub [[f32; 3]; 3]);

/// Row-major 4x4 matrix.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Mat4(pub [[f32; 4]; 4]);

/// Axis-aligned box stored as its two corners.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Box3 {
    pub min: Vec3,
    pub max: Vec3,
}

/// Rotation followed by translation.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Iso4 {
    pub rotation: Mat3,
    pub translation: Vec3,
}

impl ReadWrite for Vec2 {
    fn read_write(&mut self, rw: &mut ReaderWriter<'_, '_>) -> Result<(), GbxError> {
        rw.f32(&mut self.x)?;
        rw.f32(&mut self.y)
    }
}

impl ReadWrite for Vec3 {
    fn read_write(&mut self, rw: &mut ReaderWriter<'_, '_>) -> Result<(), GbxError> {
        rw.f32(&mut self.x)?;
        rw.f32(&mut self.y)?;
        rw.f32(&mut self.z)
    }
}

impl ReadWrite for Vec4 {
    fn read_write(&mut self, rw: &mut ReaderWriter<'_, '_>) -> Result<(), GbxError> {
        rw.f32(&mut self.x)?;
        rw.f32(&mut self.y)?;
        rw.f32(&mut self.z)?;
        rw.f32(&mut self.w)
    }
}

impl ReadWrite for Int2 {
    fn read_write(&mut self, rw: &mut ReaderWriter<'_, '_>) -> Result<(), GbxError> {
        rw.i32(&mut self.x)?;
        rw.i32(&mut self.y)
    }
}

impl ReadWrite for Int3 {
    fn read_write(&mut self, rw: &mut ReaderWriter<'_, '_>) -> Result<(), GbxError> {
        rw.i32(&mut self.x)?;
        rw.i32(&mut self.y)?;
        rw.i32(&mut self.z)
    }
}

impl ReadWrite for Int4 {
    fn read_write(&mut self, rw: &mut ReaderWriter<'_, '_>) -> Result<(), GbxError> {
        rw.i32(&mut self.x)?;
        rw.i32(&mut self.y)?;
        rw.i32(&mut self.z)?;
        rw.i32(&mut self.w)
    }
}

impl ReadWrite for Byte3 {
    fn read_write(&mut self, rw: &mut ReaderWriter<'_, '_>) -> Result<(), GbxError> {
        rw.u8(&mut self.x)?;
        rw.u8(&mut self.y)?;
        rw.u8(&mut self.z)
    }
}

impl ReadWrite for Quat {
    fn read_write(&mut self, rw: &mut ReaderWriter<'_, '_>) -> Result<(), GbxError> {
        rw.f32(&mut self.x)?;
        rw.f32(&mut self.y)?;
        rw.f32(&mut self.z)?;
        rw.f32(&mut self.w)
    }
}

impl ReadWrite for Mat3 {
    fn read_write(&mut self, rw: &mut ReaderWriter<'_, '_>) -> Result<(), GbxError> {
        for row in self.0.iter_mut() {
            for value in row.iter_mut() {
                rw.f32(value)?;
            }
        }
        Ok(())
    }
}

impl ReadWrite for Mat4 {
    fn read_write(&mut self, rw: &mut ReaderWriter<'_, '_>) -> Result<(), GbxError> {
        for row in self.0.iter_mut() {
            for value in row.iter_mut() {
                rw.f32(value)?;
            }
        }
        Ok(())
    }
}

impl ReadWrite for Box3 {
    fn read_write(&mut self, rw: &mut ReaderWriter<'_, '_>) -> Result<(), GbxError> {
        rw.value(&mut self.min)?;
        rw.value(&mut self.max)
    }
}

impl ReadWrite for Iso4 {
    fn read_write(&mut self, rw: &mut ReaderWriter<'_, '_>) -> Result<(), GbxError> {
        rw.value(&mut self.rotation)?;
        rw.value(&mut self.translation)
    }
}

/// A lookback string.
///
/// The first occurrence of a string in a document is written literally, later
/// occurrences as an index into the strings seen so far.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum Id {
    #[default]
    Empty,
    Unassigned,
    /// Numeric collection ID, e.g. 26 for Stadium.
    Number(u32),
    Text(String),
}

impl Id {
    pub fn as_str(&self) -> &str {
        match self {
            Id::Empty | Id::Number(_) => "",
            Id::Unassigned => "Unassigned",
            Id::Text(text) => text,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Id::Empty)
    }
}

impl From<&str> for Id {
    fn from(value: &str) -> Self {
        if value.is_empty() {
            Id::Empty
        } else {
            Id::Text(value.to_owned())
        }
    }
}

impl From<String> for Id {
    fn from(value: String) -> Self {
        if value.is_empty() {
            Id::Empty
        } else {
            Id::Text(value)
        }
    }
}

impl PartialEq<str> for Id {
    fn eq(&self, other: &str) -> bool {
        matches!(self, Id::Text(text) if text == other)
    }
}

impl PartialEq<&str> for Id {
    fn eq(&self, other: &&str) -> bool {
        self == *other
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Id::Number(number) => write!(f, "#{}", number),
            other => write!(f, "{}", other.as_str()),
        }
    }
}

/// Identifier triple naming a game resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Meta {
    pub id: Id,
    pub collection: Id,
    pub author: Id,
}

impl ReadWrite for Meta {
    fn read_write(&mut self, rw: &mut ReaderWriter<'_, '_>) -> Result<(), GbxError> {
        rw.id(&mut self.id).context("Reading meta ID")?;
        rw.id(&mut self.collection)
            .context("Reading meta collection")?;
        rw.id(&mut self.author).context("Reading meta author")?;
        Ok(())
    }
}

/// Reference to a pack file or other resource, by path or URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileRef {
    pub version: u8,
    pub checksum: Option<[u8; 32]>,
    pub file_path: String,
    pub locator_url: Option<String>,
}

impl ReadWrite for FileRef {
    fn read_write(&mut self, rw: &mut ReaderWriter<'_, '_>) -> Result<(), GbxError> {
        rw.u8(&mut self.version)
            .context("Reading file reference version")?;

        if self.version >= 3 {
            let mut checksum = self.checksum.unwrap_or_default().to_vec();
            rw.raw(&mut checksum, 32)
                .context("Reading file reference checksum")?;
            let mut fixed = [0u8; 32];
            fixed.copy_from_slice(&checksum);
            self.checksum = Some(fixed);
        }

        rw.string(&mut self.file_path)
            .context("Reading file reference path")?;

        if (!self.file_path.is_empty() && self.version >= 1) || self.version >= 3 {
            let mut locator_url = self.locator_url.take().unwrap_or_default();
            rw.string(&mut locator_url)
                .context("Reading file reference locator URL")?;
            self.locator_url = Some(locator_url);
        }

        Ok(())
    }
}
