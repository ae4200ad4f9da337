use crate::{
    dispatch,
    document::Settings,
    node::{Node, NodeRef, WriteGraph},
    rw::ReaderWriter,
    Context, GbxError, GbxErrorInner, Id, ReadWrite,
};
use byteorder::{WriteBytesExt, LE};
use std::{
    fmt::Debug,
    io::{Cursor, Write},
    ops::{Deref, DerefMut},
};

const LOOKBACK_VERSION: u32 = 3;

#[derive(Debug, Default)]
pub(crate) struct IdWriteState {
    version_written: bool,
    strings: Vec<String>,
}

/// Little-endian sink for one section of a document.
pub struct GbxWriter {
    inner: Cursor<Vec<u8>>,
    ids: IdWriteState,
    pub(crate) graph: WriteGraph,
    pub(crate) settings: Settings,
}

impl Debug for GbxWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GbxWriter")
            .field("position", &self.inner.position())
            .field("ids", &self.ids)
            .field("written", &self.graph.written.len())
            .finish()
    }
}

impl Deref for GbxWriter {
    type Target = Cursor<Vec<u8>>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DerefMut for GbxWriter {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

impl GbxWriter {
    pub fn new(settings: Settings) -> Self {
        GbxWriter {
            inner: Cursor::new(Vec::new()),
            ids: IdWriteState::default(),
            graph: WriteGraph::default(),
            settings,
        }
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.inner.into_inner()
    }

    /// Writes any value with a read/write layout.
    pub fn write<T: ReadWrite + Clone>(&mut self, value: &T) -> Result<(), GbxError> {
        value.clone().read_write(&mut ReaderWriter::writer(self))
    }

    pub fn write_bool(&mut self, value: bool) -> Result<(), GbxError> {
        self.write_u32::<LE>(value as u32)?;
        Ok(())
    }

    pub fn write_length(&mut self, len: usize) -> Result<(), GbxError> {
        if len > self.settings.max_length || len > i32::MAX as usize {
            return Err(GbxErrorInner::SizeValidation {
                length: len as i64,
                position: self.position(),
                limit: self.settings.max_length,
            }
            .into());
        }

        self.write_i32::<LE>(len as i32)?;
        Ok(())
    }

    pub fn write_raw(&mut self, data: &[u8]) -> Result<(), GbxError> {
        self.write_all(data)?;
        Ok(())
    }

    pub fn write_bytes(&mut self, data: &[u8]) -> Result<(), GbxError> {
        self.write_length(data.len())
            .context("Writing data length")?;
        self.write_raw(data)
    }

    pub fn write_string(&mut self, value: &str) -> Result<(), GbxError> {
        self.write_length(value.len())
            .context("Writing string length")?;
        self.write_raw(value.as_bytes())
    }

    /// Writes a lookback string. Text is written literally the first time
    /// this writer sees it and as a back reference afterwards, so a stream
    /// that repeated a literal re-encodes to fewer bytes but the same IDs.
    pub fn write_id(&mut self, value: &Id) -> Result<(), GbxError> {
        if !self.ids.version_written {
            self.write_u32::<LE>(LOOKBACK_VERSION)?;
            self.ids.version_written = true;
        }

        match value {
            Id::Empty => self.write_u32::<LE>(0xffff_ffff)?,
            Id::Unassigned => self.write_u32::<LE>(0xbfff_ffff)?,
            Id::Number(number) => self.write_u32::<LE>(*number)?,
            Id::Text(text) => match self.ids.strings.iter().position(|seen| seen == text) {
                Some(position) => self.write_u32::<LE>(0x4000_0000 | (position as u32 + 1))?,
                None => {
                    self.write_u32::<LE>(0x4000_0000)?;
                    self.write_string(text)?;
                    self.ids.strings.push(text.clone());
                }
            },
        }

        Ok(())
    }

    pub fn write_optimized_int(&mut self, value: u32, max: u32) -> Result<(), GbxError> {
        let fits = match max {
            0 => value == 0,
            1..=0xff => value <= 0xff,
            0x100..=0xffff => value <= 0xffff,
            _ => true,
        };
        if !fits {
            return Err(GbxErrorInner::OptimizedIntOutOfRange { value, max }.into());
        }

        match max {
            0 => {}
            1..=0xff => self.write_u8(value as u8)?,
            0x100..=0xffff => self.write_u16::<LE>(value as u16)?,
            _ => self.write_u32::<LE>(value)?,
        }
        Ok(())
    }

    pub fn write_delta_u16(&mut self, values: &[u16]) -> Result<(), GbxError> {
        let mut previous = 0u16;
        for &value in values {
            self.write_i16::<LE>(value.wrapping_sub(previous) as i16)?;
            previous = value;
        }
        Ok(())
    }

    pub fn write_delta_i32(&mut self, values: &[i32]) -> Result<(), GbxError> {
        let mut previous = 0i32;
        for &value in values {
            self.write_i32::<LE>(value.wrapping_sub(previous))?;
            previous = value;
        }
        Ok(())
    }

    pub fn write_node_ref(&mut self, value: Option<NodeRef>) -> Result<(), GbxError> {
        match value {
            None => self.write_i32::<LE>(-1)?,

            Some(NodeRef::External(entry)) => {
                let Some(&index) = self.graph.externals.get(entry) else {
                    return Err(GbxErrorInner::ReferenceResolution {
                        entry,
                        reason: String::from("no such reference table entry"),
                    }
                    .into());
                };
                self.write_i32::<LE>(index)?;
            }

            Some(NodeRef::Internal(id)) => {
                if let Some(&index) = self.graph.written.get(&id) {
                    self.write_i32::<LE>(index)?;
                    return Ok(());
                }

                let Some(mut node) = self.graph.nodes.take(id) else {
                    return Err(GbxErrorInner::InvalidNodeRef(id.index() as i32).into());
                };

                let index = self.graph.assign_index(node.index);
                self.graph.written.insert(id, index);
                tracing::trace!("writing node {} of {:08x}", index, node.class_id());

                let result = self.write_inline_node(index, &mut node);
                self.graph.nodes.fill(id, node);
                result.with_context(|| format!("Writing node {index}"))?;
            }
        }

        Ok(())
    }

    fn write_inline_node(&mut self, index: i32, node: &mut Node) -> Result<(), GbxError> {
        self.write_i32::<LE>(index)?;
        self.write_u32::<LE>(node.wire_class_id())?;
        dispatch::write_chunks(self, node)
    }

    pub fn patch_u32(&mut self, position: u64, value: u32) -> Result<(), GbxError> {
        let end = self.position();
        self.set_position(position);
        self.write_u32::<LE>(value)?;
        self.set_position(end);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GbxReader;
    use byteorder::ReadBytesExt;

    #[test]
    fn lookback_strings_reuse_indices() {
        let mut writer = GbxWriter::new(Settings::default());
        for id in ["Stadium", "Canyon", "Stadium", ""] {
            writer.write_id(&Id::from(id)).unwrap();
        }
        let data = writer.into_inner();

        let mut reader = GbxReader::new(&data, Settings::default());
        assert_eq!(reader.read_u32::<LE>().unwrap(), LOOKBACK_VERSION);
        assert_eq!(reader.read_u32::<LE>().unwrap(), 0x4000_0000);
        assert_eq!(reader.read_string().unwrap(), "Stadium");
        assert_eq!(reader.read_u32::<LE>().unwrap(), 0x4000_0000);
        assert_eq!(reader.read_string().unwrap(), "Canyon");
        assert_eq!(reader.read_u32::<LE>().unwrap(), 0x4000_0001);
        assert_eq!(reader.read_u32::<LE>().unwrap(), 0xffff_ffff);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn repeated_literals_collapse_to_back_references() {
        let mut data = LOOKBACK_VERSION.to_le_bytes().to_vec();
        for _ in 0..2 {
            data.extend(0x4000_0000u32.to_le_bytes());
            data.extend(7u32.to_le_bytes());
            data.extend(b"Stadium");
        }
        data.extend(0x4000_0002u32.to_le_bytes());

        let mut reader = GbxReader::new(&data, Settings::default());
        let ids: Vec<Id> = (0..3).map(|_| reader.read_id().unwrap()).collect();
        assert!(ids.iter().all(|id| *id == Id::from("Stadium")));

        let mut writer = GbxWriter::new(Settings::default());
        for id in &ids {
            writer.write_id(id).unwrap();
        }
        let written = writer.into_inner();
        assert_eq!(written.len(), data.len() - 11);

        let mut reader = GbxReader::new(&written, Settings::default());
        for id in &ids {
            assert_eq!(&reader.read_id().unwrap(), id);
        }
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn optimized_int_byte_widths() {
        for (max, width) in [(0u32, 0usize), (130, 1), (255, 1), (256, 2), (65535, 2), (65536, 4)] {
            let mut writer = GbxWriter::new(Settings::default());
            let values = if max == 0 { vec![0] } else { vec![0, 1, max - 1] };
            for &value in &values {
                writer.write_optimized_int(value, max).unwrap();
            }
            let data = writer.into_inner();
            assert_eq!(data.len(), width * values.len(), "max {max}");

            let mut reader = GbxReader::new(&data, Settings::default());
            for &value in &values {
                assert_eq!(reader.read_optimized_int(max).unwrap(), value);
            }
        }
    }

    #[test]
    fn optimized_int_out_of_range() {
        let mut writer = GbxWriter::new(Settings::default());
        let err = writer.write_optimized_int(300, 130).unwrap_err();
        assert!(matches!(
            &*err,
            GbxErrorInner::OptimizedIntOutOfRange {
                value: 300,
                max: 130
            }
        ));
    }

    #[test]
    fn delta_arrays_emit_differences() {
        let mut writer = GbxWriter::new(Settings::default());
        writer.write_delta_i32(&[10, 12, 7]).unwrap();
        let data = writer.into_inner();

        let mut reader = GbxReader::new(&data, Settings::default());
        assert_eq!(reader.read_i32::<LE>().unwrap(), 10);
        assert_eq!(reader.read_i32::<LE>().unwrap(), 2);
        assert_eq!(reader.read_i32::<LE>().unwrap(), -5);
    }

    #[test]
    fn patch_keeps_position() {
        let mut writer = GbxWriter::new(Settings::default());
        writer.write_u32::<LE>(0).unwrap();
        writer.write_u32::<LE>(7).unwrap();
        writer.patch_u32(0, 42).unwrap();
        writer.write_u8(1).unwrap();
        assert_eq!(writer.into_inner(), [42, 0, 0, 0, 7, 0, 0, 0, 1]);
    }
}
