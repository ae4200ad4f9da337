use crate::{
    codec::CompressedSection,
    node::NodeRef,
    reader::GbxReader,
    registry::NodeClass,
    writer::GbxWriter,
    Context, GbxError, GbxErrorInner, Id, Meta, Vec2, Vec3,
};
use byteorder::{ReadBytesExt, WriteBytesExt, LE};

/// Marker written before arrays in their deprecated form.
const DEPRECATED_ARRAY_VERSION: u32 = 10;

/// A value with one layout used for both reading and writing.
///
/// When reading, `self` is overwritten with what was read. When writing,
/// `self` is written and left unchanged.
pub trait ReadWrite: Default {
    fn read_write(&mut self, rw: &mut ReaderWriter<'_, '_>) -> Result<(), GbxError>;
}

enum Mode<'rw, 'data> {
    Reader(&'rw mut GbxReader<'data>),
    Writer(&'rw mut GbxWriter),
}

/// Either a reader or a writer, never both.
///
/// Layout routines describe a chunk once as a sequence of calls on this type
/// and get symmetric reading and writing from it.
pub struct ReaderWriter<'rw, 'data> {
    mode: Mode<'rw, 'data>,
    chunk_id: u32,
    version: i32,
}

macro_rules! primitives {
    ($($name:ident: $ty:ty => $read:expr, $write:expr;)*) => {
        $(
            impl ReadWrite for $ty {
                fn read_write(&mut self, rw: &mut ReaderWriter<'_, '_>) -> Result<(), GbxError> {
                    match &mut rw.mode {
                        Mode::Reader(r) => *self = $read(&mut **r)?,
                        Mode::Writer(w) => $write(&mut **w, *self)?,
                    }
                    Ok(())
                }
            }
        )*

        impl ReaderWriter<'_, '_> {
            $(
                pub fn $name(&mut self, value: &mut $ty) -> Result<(), GbxError> {
                    value.read_write(self)
                }
            )*
        }
    };
}

primitives! {
    u8: u8 => |r: &mut GbxReader| r.read_u8(), |w: &mut GbxWriter, v| w.write_u8(v);
    i8: i8 => |r: &mut GbxReader| r.read_i8(), |w: &mut GbxWriter, v| w.write_i8(v);
    u16: u16 => |r: &mut GbxReader| r.read_u16::<LE>(), |w: &mut GbxWriter, v| w.write_u16::<LE>(v);
    i16: i16 => |r: &mut GbxReader| r.read_i16::<LE>(), |w: &mut GbxWriter, v| w.write_i16::<LE>(v);
    u32: u32 => |r: &mut GbxReader| r.read_u32::<LE>(), |w: &mut GbxWriter, v| w.write_u32::<LE>(v);
    i32: i32 => |r: &mut GbxReader| r.read_i32::<LE>(), |w: &mut GbxWriter, v| w.write_i32::<LE>(v);
    u64: u64 => |r: &mut GbxReader| r.read_u64::<LE>(), |w: &mut GbxWriter, v| w.write_u64::<LE>(v);
    i64: i64 => |r: &mut GbxReader| r.read_i64::<LE>(), |w: &mut GbxWriter, v| w.write_i64::<LE>(v);
    u128: u128 => |r: &mut GbxReader| r.read_u128::<LE>(), |w: &mut GbxWriter, v| w.write_u128::<LE>(v);
    f32: f32 => |r: &mut GbxReader| r.read_f32::<LE>(), |w: &mut GbxWriter, v| w.write_f32::<LE>(v);
    bool: bool => |r: &mut GbxReader| r.read_bool(), |w: &mut GbxWriter, v| w.write_bool(v);
}

impl ReadWrite for String {
    fn read_write(&mut self, rw: &mut ReaderWriter<'_, '_>) -> Result<(), GbxError> {
        match &mut rw.mode {
            Mode::Reader(r) => *self = r.read_string()?,
            Mode::Writer(w) => w.write_string(self)?,
        }
        Ok(())
    }
}

impl ReadWrite for Id {
    fn read_write(&mut self, rw: &mut ReaderWriter<'_, '_>) -> Result<(), GbxError> {
        match &mut rw.mode {
            Mode::Reader(r) => *self = r.read_id()?,
            Mode::Writer(w) => w.write_id(self)?,
        }
        Ok(())
    }
}

impl<'rw, 'data> ReaderWriter<'rw, 'data> {
    pub fn reader(reader: &'rw mut GbxReader<'data>) -> Self {
        ReaderWriter {
            mode: Mode::Reader(reader),
            chunk_id: 0,
            version: 0,
        }
    }

    pub fn writer(writer: &'rw mut GbxWriter) -> Self {
        ReaderWriter {
            mode: Mode::Writer(writer),
            chunk_id: 0,
            version: 0,
        }
    }

    pub(crate) fn for_chunk(mut self, chunk_id: u32, version: i32) -> Self {
        self.chunk_id = chunk_id;
        self.version = version;
        self
    }

    pub fn is_reader(&self) -> bool {
        matches!(self.mode, Mode::Reader(_))
    }

    pub fn is_writer(&self) -> bool {
        matches!(self.mode, Mode::Writer(_))
    }

    pub fn as_reader(&mut self) -> Option<&mut GbxReader<'data>> {
        match &mut self.mode {
            Mode::Reader(r) => Some(r),
            Mode::Writer(_) => None,
        }
    }

    pub fn as_writer(&mut self) -> Option<&mut GbxWriter> {
        match &mut self.mode {
            Mode::Reader(_) => None,
            Mode::Writer(w) => Some(w),
        }
    }

    /// Offset in the section being read or written.
    pub fn position(&self) -> u64 {
        match &self.mode {
            Mode::Reader(r) => r.position(),
            Mode::Writer(w) => w.position(),
        }
    }

    pub fn chunk_id(&self) -> u32 {
        self.chunk_id
    }

    /// Version of the chunk being read or written.
    pub fn version(&self) -> i32 {
        self.version
    }

    /// Reads or writes the chunk's version as its first field.
    pub fn version_i32(&mut self) -> Result<i32, GbxError> {
        let mut version = self.version;
        self.i32(&mut version).context("Reading chunk version")?;
        self.version = version;
        Ok(version)
    }

    /// Like [`ReaderWriter::version_i32`] for chunks with a one-byte version.
    pub fn version_u8(&mut self) -> Result<i32, GbxError> {
        let mut version = self.version as u8;
        self.u8(&mut version).context("Reading chunk version")?;
        self.version = version as i32;
        Ok(self.version)
    }

    pub fn unsupported_version(&self, version: i32) -> GbxError {
        GbxErrorInner::ChunkVersionNotSupported {
            chunk_id: self.chunk_id,
            version,
        }
        .into()
    }

    pub fn value<T: ReadWrite>(&mut self, value: &mut T) -> Result<(), GbxError> {
        value.read_write(self)
    }

    pub fn string(&mut self, value: &mut String) -> Result<(), GbxError> {
        value.read_write(self)
    }

    pub fn id(&mut self, value: &mut Id) -> Result<(), GbxError> {
        value.read_write(self)
    }

    pub fn meta(&mut self, value: &mut Meta) -> Result<(), GbxError> {
        value.read_write(self)
    }

    pub fn vec2(&mut self, value: &mut Vec2) -> Result<(), GbxError> {
        value.read_write(self)
    }

    pub fn vec3(&mut self, value: &mut Vec3) -> Result<(), GbxError> {
        value.read_write(self)
    }

    /// String of a known length without a length prefix.
    pub fn string_exact(&mut self, value: &mut String, len: usize) -> Result<(), GbxError> {
        match &mut self.mode {
            Mode::Reader(r) => *value = r.read_string_exact(len)?,
            Mode::Writer(w) => {
                if value.len() != len {
                    return Err(GbxErrorInner::SizeValidation {
                        length: value.len() as i64,
                        position: w.position(),
                        limit: len,
                    }
                    .into());
                }
                w.write_raw(value.as_bytes())?;
            }
        }
        Ok(())
    }

    /// Length-prefixed bytes.
    pub fn bytes(&mut self, value: &mut Vec<u8>) -> Result<(), GbxError> {
        match &mut self.mode {
            Mode::Reader(r) => *value = r.read_bytes()?,
            Mode::Writer(w) => w.write_bytes(value)?,
        }
        Ok(())
    }

    /// Bytes of a known length without a length prefix.
    pub fn raw(&mut self, value: &mut Vec<u8>, len: usize) -> Result<(), GbxError> {
        match &mut self.mode {
            Mode::Reader(r) => *value = r.read_raw(len)?.to_vec(),
            Mode::Writer(w) => {
                if value.len() != len {
                    return Err(GbxErrorInner::SizeValidation {
                        length: value.len() as i64,
                        position: w.position(),
                        limit: len,
                    }
                    .into());
                }
                w.write_raw(value)?;
            }
        }
        Ok(())
    }

    /// Reads or writes an element count, checked against the length ceiling.
    pub fn count(&mut self, len: &mut usize) -> Result<(), GbxError> {
        match &mut self.mode {
            Mode::Reader(r) => *len = r.read_length(false)?,
            Mode::Writer(w) => w.write_length(*len)?,
        }
        Ok(())
    }

    pub fn array<T: ReadWrite>(&mut self, value: &mut Vec<T>) -> Result<(), GbxError> {
        self.array_with(value, |rw, item| item.read_write(rw))
    }

    /// Count-prefixed array with a custom element layout.
    pub fn array_with<T, F>(&mut self, value: &mut Vec<T>, f: F) -> Result<(), GbxError>
    where
        T: Default,
        F: FnMut(&mut Self, &mut T) -> Result<(), GbxError>,
    {
        let mut len = value.len();
        self.count(&mut len).context("Reading array length")?;
        self.array_fixed_with(value, len, f)
    }

    /// Array whose length is known from an earlier field.
    pub fn array_fixed<T: ReadWrite>(
        &mut self,
        value: &mut Vec<T>,
        len: usize,
    ) -> Result<(), GbxError> {
        self.array_fixed_with(value, len, |rw, item| item.read_write(rw))
    }

    pub fn array_fixed_with<T, F>(
        &mut self,
        value: &mut Vec<T>,
        len: usize,
        mut f: F,
    ) -> Result<(), GbxError>
    where
        T: Default,
        F: FnMut(&mut Self, &mut T) -> Result<(), GbxError>,
    {
        if self.is_reader() {
            value.clear();
            for i in 0..len {
                let mut item = T::default();
                f(self, &mut item).with_context(|| format!("Reading array item {i}"))?;
                value.push(item);
            }
        } else {
            if value.len() != len {
                return Err(GbxErrorInner::SizeValidation {
                    length: value.len() as i64,
                    position: self.position(),
                    limit: len,
                }
                .into());
            }
            for (i, item) in value.iter_mut().enumerate() {
                f(self, item).with_context(|| format!("Writing array item {i}"))?;
            }
        }
        Ok(())
    }

    /// Array preceded by an obsolete version marker. Always written with the
    /// current marker.
    pub fn array_deprec<T: ReadWrite>(&mut self, value: &mut Vec<T>) -> Result<(), GbxError> {
        let mut marker = DEPRECATED_ARRAY_VERSION;
        self.u32(&mut marker)
            .context("Reading deprecated array version")?;
        if marker != DEPRECATED_ARRAY_VERSION {
            tracing::trace!("deprecated array version {}", marker);
        }
        self.array(value)
    }

    /// Integer as wide as needed to hold `max`.
    pub fn optimized_int(&mut self, value: &mut u32, max: u32) -> Result<(), GbxError> {
        match &mut self.mode {
            Mode::Reader(r) => *value = r.read_optimized_int(max)?,
            Mode::Writer(w) => w.write_optimized_int(*value, max)?,
        }
        Ok(())
    }

    /// Count-prefixed `u16` array stored as the differences between
    /// consecutive values.
    pub fn delta_u16_array(&mut self, value: &mut Vec<u16>) -> Result<(), GbxError> {
        let mut len = value.len();
        self.count(&mut len).context("Reading delta array length")?;
        match &mut self.mode {
            Mode::Reader(r) => *value = r.read_delta_u16(len)?,
            Mode::Writer(w) => w.write_delta_u16(value)?,
        }
        Ok(())
    }

    pub fn delta_i32_array(&mut self, value: &mut Vec<i32>) -> Result<(), GbxError> {
        let mut len = value.len();
        self.count(&mut len).context("Reading delta array length")?;
        match &mut self.mode {
            Mode::Reader(r) => *value = r.read_delta_i32(len)?,
            Mode::Writer(w) => w.write_delta_i32(value)?,
        }
        Ok(())
    }

    /// Everything up to the end of the current node, kept as bytes.
    pub fn till_facade(&mut self, value: &mut Vec<u8>) -> Result<(), GbxError> {
        match &mut self.mode {
            Mode::Reader(r) => *value = r.read_till_facade()?,
            Mode::Writer(w) => w.write_raw(value)?,
        }
        Ok(())
    }

    pub fn node_ref(&mut self, value: &mut Option<NodeRef>) -> Result<(), GbxError> {
        match &mut self.mode {
            Mode::Reader(r) => *value = r.read_node_ref()?,
            Mode::Writer(w) => w.write_node_ref(*value)?,
        }
        Ok(())
    }

    /// Node reference that must point to a node of class `N`. External
    /// references are not checked until they are resolved.
    pub fn node_ref_of<N: NodeClass>(&mut self, value: &mut Option<NodeRef>) -> Result<(), GbxError> {
        self.node_ref(value)?;

        if let (Mode::Reader(r), Some(NodeRef::Internal(id))) = (&self.mode, *value) {
            if let Some(node) = r.graph.nodes.get(id) {
                if node.class_id() != N::CLASS_ID {
                    return Err(GbxErrorInner::IncorrectType {
                        wanted: N::CLASS_ID,
                        had: node.class_id(),
                    }
                    .into());
                }
            }
        }

        Ok(())
    }

    pub fn node_ref_array(&mut self, value: &mut Vec<Option<NodeRef>>) -> Result<(), GbxError> {
        self.array_with(value, |rw, item| rw.node_ref(item))
    }

    /// Size-prefixed, possibly compressed sub-section with its own layout.
    pub fn compressed<T: ReadWrite>(
        &mut self,
        value: &mut CompressedSection<T>,
    ) -> Result<(), GbxError> {
        match &mut self.mode {
            Mode::Reader(r) => value.read(r),
            Mode::Writer(w) => value.write(w),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Settings, Vec3};

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Sample {
        count: u32,
        name: String,
        position: Vec3,
        flags: Vec<u8>,
    }

    impl ReadWrite for Sample {
        fn read_write(&mut self, rw: &mut ReaderWriter<'_, '_>) -> Result<(), GbxError> {
            rw.u32(&mut self.count)?;
            rw.string(&mut self.name)?;
            rw.vec3(&mut self.position)?;
            rw.array(&mut self.flags)
        }
    }

    #[test]
    fn one_layout_both_directions() {
        let sample = Sample {
            count: 3,
            name: String::from("Pylon"),
            position: Vec3 {
                x: 1.0,
                y: 2.5,
                z: -4.0,
            },
            flags: vec![1, 0, 1],
        };

        let mut writer = GbxWriter::new(Settings::default());
        writer.write(&sample).unwrap();
        let data = writer.into_inner();
        assert_eq!(data.len(), 4 + 4 + 5 + 12 + 4 + 3);

        let mut reader = GbxReader::new(&data, Settings::default());
        assert_eq!(reader.read::<Sample>().unwrap(), sample);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn exactly_one_direction() {
        let mut writer = GbxWriter::new(Settings::default());
        let mut rw = ReaderWriter::writer(&mut writer);
        assert!(rw.is_writer());
        assert!(!rw.is_reader());
        assert!(rw.as_reader().is_none());

        let data = [0u8; 4];
        let mut reader = GbxReader::new(&data, Settings::default());
        let mut rw = ReaderWriter::reader(&mut reader);
        assert!(rw.is_reader());
        assert!(rw.as_writer().is_none());
    }

    #[test]
    fn deprecated_arrays_write_current_marker() {
        let mut values = vec![7u32, 8];
        let mut writer = GbxWriter::new(Settings::default());
        ReaderWriter::writer(&mut writer)
            .array_deprec(&mut values)
            .unwrap();
        let data = writer.into_inner();
        assert_eq!(&data[..8], [10, 0, 0, 0, 2, 0, 0, 0]);

        let mut read = Vec::<u32>::new();
        let mut reader = GbxReader::new(&data, Settings::default());
        ReaderWriter::reader(&mut reader)
            .array_deprec(&mut read)
            .unwrap();
        assert_eq!(read, values);
    }

    #[test]
    fn fixed_array_length_must_match() {
        let mut values = vec![1u32, 2, 3];
        let mut writer = GbxWriter::new(Settings::default());
        let err = ReaderWriter::writer(&mut writer)
            .array_fixed(&mut values, 2)
            .unwrap_err();
        assert!(matches!(&*err, GbxErrorInner::SizeValidation { .. }));
    }

    #[test]
    fn version_is_kept_on_the_chunk() {
        let data = [4u8, 0, 0, 0];
        let mut reader = GbxReader::new(&data, Settings::default());
        let mut rw = ReaderWriter::reader(&mut reader).for_chunk(0x0909_0000, 0);
        assert_eq!(rw.version_i32().unwrap(), 4);
        assert_eq!(rw.version(), 4);
        assert!(matches!(
            &*rw.unsupported_version(4),
            GbxErrorInner::ChunkVersionNotSupported {
                chunk_id: 0x0909_0000,
                version: 4
            }
        ));
    }
}
