use crate::{
    dispatch,
    document::Settings,
    node::{NodeRef, ReadGraph},
    rw::ReaderWriter,
    Context, GbxError, GbxErrorInner, Id, ReadWrite, FACADE,
};
use byteorder::{ReadBytesExt, LE};
use std::{
    fmt::Debug,
    io::Cursor,
    ops::{Deref, DerefMut},
    sync::atomic::Ordering,
};

#[derive(Debug, Default)]
pub(crate) struct IdReadState {
    version: Option<u32>,
    strings: Vec<String>,
}

/// Reader state before a chunk is decoded. Rewinding to it undoes every
/// lookback string and node the chunk added, so a chunk that is finally kept
/// as bytes leaves nothing behind for later chunks to refer to.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Checkpoint {
    position: u64,
    lookback_version: Option<u32>,
    strings: usize,
    nodes: usize,
}

impl Checkpoint {
    pub(crate) fn position(&self) -> u64 {
        self.position
    }
}

/// Forward-only little-endian cursor over one section of a document.
pub struct GbxReader<'data> {
    inner: Cursor<&'data [u8]>,
    ids: IdReadState,
    pub(crate) graph: ReadGraph,
    pub(crate) settings: Settings,
}

impl Debug for GbxReader<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GbxReader")
            .field("position", &self.inner.position())
            .field("ids", &self.ids)
            .field("nodes", &self.graph.nodes.len())
            .finish()
    }
}

impl<'data> Deref for GbxReader<'data> {
    type Target = Cursor<&'data [u8]>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DerefMut for GbxReader<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

impl<'data> GbxReader<'data> {
    pub fn new(data: &'data [u8], settings: Settings) -> Self {
        GbxReader {
            inner: Cursor::new(data),
            ids: IdReadState::default(),
            graph: ReadGraph::default(),
            settings,
        }
    }

    pub fn remaining(&self) -> usize {
        self.inner
            .get_ref()
            .len()
            .saturating_sub(self.inner.position() as usize)
    }

    pub fn peek_u32(&mut self) -> Result<u32, GbxError> {
        let position = self.position();
        let value = self.read_u32::<LE>()?;
        self.set_position(position);
        Ok(value)
    }

    pub(crate) fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            position: self.position(),
            lookback_version: self.ids.version,
            strings: self.ids.strings.len(),
            nodes: self.graph.nodes.len(),
        }
    }

    pub(crate) fn rewind(&mut self, checkpoint: Checkpoint) {
        self.set_position(checkpoint.position);
        self.ids.version = checkpoint.lookback_version;
        self.ids.strings.truncate(checkpoint.strings);
        self.graph.nodes.truncate(checkpoint.nodes);
        self.graph
            .indices
            .retain(|_, id| id.index() < checkpoint.nodes);
    }

    /// Reads any value with a read/write layout.
    pub fn read<T: ReadWrite>(&mut self) -> Result<T, GbxError> {
        let mut value = T::default();
        value.read_write(&mut ReaderWriter::reader(self))?;
        Ok(value)
    }

    pub fn read_bool(&mut self) -> Result<bool, GbxError> {
        Ok(self.read_u32::<LE>()? != 0)
    }

    /// Reads an `i32` length prefix and checks it against the configured
    /// ceiling and, when `bytes` is set, the data left in the section.
    pub fn read_length(&mut self, bytes: bool) -> Result<usize, GbxError> {
        let position = self.position();
        let length = self.read_i32::<LE>()?;
        let limit = if bytes {
            self.settings.max_length.min(self.remaining())
        } else {
            self.settings.max_length
        };

        if length < 0 || length as usize > limit {
            return Err(GbxErrorInner::SizeValidation {
                length: length as i64,
                position,
                limit,
            }
            .into());
        }

        Ok(length as usize)
    }

    pub fn read_raw(&mut self, len: usize) -> Result<&'data [u8], GbxError> {
        let data: &'data [u8] = *self.inner.get_ref();
        let start = self.position() as usize;
        if len > self.remaining() {
            return Err(GbxErrorInner::SizeValidation {
                length: len as i64,
                position: start as u64,
                limit: self.remaining(),
            }
            .into());
        }

        self.set_position((start + len) as u64);
        Ok(&data[start..start + len])
    }

    pub fn read_bytes(&mut self) -> Result<Vec<u8>, GbxError> {
        let len = self.read_length(true).context("Reading data length")?;
        Ok(self.read_raw(len)?.to_vec())
    }

    pub fn read_string(&mut self) -> Result<String, GbxError> {
        let len = self.read_length(true).context("Reading string length")?;
        self.read_string_exact(len)
    }

    pub fn read_string_exact(&mut self, len: usize) -> Result<String, GbxError> {
        let bytes = self.read_raw(len).context("Reading string data")?;
        Ok(std::str::from_utf8(bytes)?.to_owned())
    }

    pub fn read_id(&mut self) -> Result<Id, GbxError> {
        if self.ids.version.is_none() {
            self.ids.version = Some(self.read_u32::<LE>().context("Reading lookback version")?);
        }

        let index = self.read_u32::<LE>().context("Reading lookback index")?;
        if index == 0xffff_ffff {
            return Ok(Id::Empty);
        }

        if (index & 0xc000_0000) != 0 && (index & 0x3fff_ffff) == 0 {
            let text = self
                .read_string()
                .context("Reading first occurrence of lookback string")?;
            tracing::trace!("new string {:?}", text);
            self.ids.strings.push(text.clone());
            return Ok(Id::Text(text));
        }

        if (index & 0x3fff) == 0x3fff {
            return match index >> 30 {
                2 => Ok(Id::Unassigned),
                3 => Ok(Id::Empty),
                _ => Err(GbxErrorInner::InvalidLookbackString(index).into()),
            };
        }

        if (index >> 30) == 0 {
            return Ok(Id::Number(index));
        }

        let position = (index & 0x3fff_ffff) as usize;
        self.ids
            .strings
            .get(position - 1)
            .map(|text| Id::Text(text.clone()))
            .ok_or_else(|| GbxErrorInner::InvalidLookbackString(index).into())
    }

    /// Reads an integer whose width depends on the largest value it can hold.
    pub fn read_optimized_int(&mut self, max: u32) -> Result<u32, GbxError> {
        Ok(match max {
            0 => 0,
            1..=0xff => self.read_u8()? as u32,
            0x100..=0xffff => self.read_u16::<LE>()? as u32,
            _ => self.read_u32::<LE>()?,
        })
    }

    pub fn read_delta_u16(&mut self, count: usize) -> Result<Vec<u16>, GbxError> {
        let mut values = Vec::with_capacity(count.min(self.remaining() / 2));
        let mut total = 0u16;
        for _ in 0..count {
            total = total.wrapping_add(self.read_i16::<LE>()? as u16);
            values.push(total);
        }
        Ok(values)
    }

    pub fn read_delta_i32(&mut self, count: usize) -> Result<Vec<i32>, GbxError> {
        let mut values = Vec::with_capacity(count.min(self.remaining() / 4));
        let mut total = 0i32;
        for _ in 0..count {
            total = total.wrapping_add(self.read_i32::<LE>()?);
            values.push(total);
        }
        Ok(values)
    }

    /// Consumes bytes up to the next node terminator, leaving it unread.
    pub fn read_till_facade(&mut self) -> Result<Vec<u8>, GbxError> {
        let start = self.position() as usize;
        while self.remaining() >= 4 {
            if self.peek_u32()? == FACADE {
                break;
            }
            let next = self.position() + 1;
            self.set_position(next);
        }
        if self.remaining() < 4 {
            tracing::warn!("Reached end of data without finding a node terminator");
            let end = self.inner.get_ref().len() as u64;
            self.set_position(end);
        }

        let end = self.position() as usize;
        Ok(self.inner.get_ref()[start..end].to_vec())
    }

    pub fn read_node_ref(&mut self) -> Result<Option<NodeRef>, GbxError> {
        let index = self
            .read_i32::<LE>()
            .context("Reading node reference index")?;

        if index == -1 {
            return Ok(None);
        }

        if let Some(&id) = self.graph.indices.get(&index) {
            return Ok(Some(NodeRef::Internal(id)));
        }

        if let Some(&entry) = self.graph.externals.get(&index) {
            tracing::trace!("external reference {} to entry {}", index, entry);
            return Ok(Some(NodeRef::External(entry)));
        }

        if index < 0 {
            return Err(GbxErrorInner::InvalidNodeRef(index).into());
        }

        let class_id = self
            .read_u32::<LE>()
            .context("Reading node reference class ID")?;

        let id = self.graph.nodes.reserve();
        self.graph.indices.insert(index, id);

        let start = self.position();
        let mut node = dispatch::read_node(self, class_id)
            .with_context(|| format!("Reading node {index} of class {class_id:08x}"))?;
        tracing::trace!(
            "read {} bytes of {:08x}",
            self.position() - start,
            class_id
        );

        node.index = Some(index);
        self.graph.nodes.fill(id, node);

        Ok(Some(NodeRef::Internal(id)))
    }

    pub(crate) fn check_cancelled(&self) -> Result<(), GbxError> {
        match &self.settings.cancel {
            Some(cancel) if cancel.load(Ordering::Relaxed) => Err(GbxErrorInner::Cancelled.into()),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;
    use std::io::Write;

    fn reader(data: &[u8]) -> GbxReader<'_> {
        GbxReader::new(data, Settings::default())
    }

    #[test]
    fn lookback_strings() {
        let mut data = Vec::new();
        data.write_u32::<LE>(3).unwrap();
        data.write_u32::<LE>(0x4000_0000).unwrap();
        data.write_u32::<LE>(5).unwrap();
        data.write_all(b"Block").unwrap();
        data.write_u32::<LE>(0x4000_0001).unwrap();
        data.write_u32::<LE>(0xffff_ffff).unwrap();
        data.write_u32::<LE>(26).unwrap();
        data.write_u32::<LE>(0xbfff_ffff).unwrap();

        let mut reader = reader(&data);
        assert_eq!(reader.read_id().unwrap(), "Block");
        assert_eq!(reader.read_id().unwrap(), "Block");
        assert_eq!(reader.read_id().unwrap(), Id::Empty);
        assert_eq!(reader.read_id().unwrap(), Id::Number(26));
        assert_eq!(reader.read_id().unwrap(), Id::Unassigned);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn lookback_index_out_of_range() {
        let mut data = Vec::new();
        data.write_u32::<LE>(3).unwrap();
        data.write_u32::<LE>(0x4000_0002).unwrap();

        let err = reader(&data).read_id().unwrap_err();
        assert!(matches!(
            &*err,
            GbxErrorInner::InvalidLookbackString(0x4000_0002)
        ));
    }

    #[test]
    fn negative_string_length() {
        let mut data = Vec::new();
        data.write_i32::<LE>(-5).unwrap();

        let err = reader(&data).read_string().unwrap_err();
        assert!(matches!(
            &*err,
            GbxErrorInner::SizeValidation { length: -5, .. }
        ));
    }

    #[test]
    fn huge_string_length() {
        let mut data = Vec::new();
        data.write_i32::<LE>(0x7fff_0000).unwrap();
        data.write_all(b"tiny").unwrap();

        let err = reader(&data).read_string().unwrap_err();
        assert!(matches!(&*err, GbxErrorInner::SizeValidation { .. }));
    }

    #[test]
    fn delta_arrays_accumulate() {
        let mut data = Vec::new();
        for delta in [5i16, 1, -3, 10] {
            data.write_i16::<LE>(delta).unwrap();
        }
        assert_eq!(reader(&data).read_delta_u16(4).unwrap(), [5, 6, 3, 13]);
    }

    #[test]
    fn till_facade_stops_before_terminator() {
        let mut data = vec![1, 2, 3];
        data.write_u32::<LE>(FACADE).unwrap();

        let mut reader = reader(&data);
        assert_eq!(reader.read_till_facade().unwrap(), [1, 2, 3]);
        assert_eq!(reader.read_u32::<LE>().unwrap(), FACADE);
    }

    #[test]
    fn rewind_forgets_lookback_strings() {
        let mut data = Vec::new();
        data.write_u32::<LE>(3).unwrap();
        data.write_u32::<LE>(0x4000_0000).unwrap();
        data.write_u32::<LE>(4).unwrap();
        data.write_all(b"Road").unwrap();
        data.write_u32::<LE>(0x4000_0001).unwrap();

        let mut reader = reader(&data);
        let checkpoint = reader.checkpoint();
        assert_eq!(reader.read_id().unwrap(), "Road");
        reader.rewind(checkpoint);
        assert_eq!(reader.position(), 0);

        // The version word is read again and the string is new again.
        assert_eq!(reader.read_id().unwrap(), "Road");
        assert_eq!(reader.read_id().unwrap(), "Road");
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn optimized_int_widths() {
        let data = [7u8, 0x34, 0x12, 0x78, 0x56, 0x34, 0x12];
        let mut reader = reader(&data);
        assert_eq!(reader.read_optimized_int(0).unwrap(), 0);
        assert_eq!(reader.read_optimized_int(130).unwrap(), 7);
        assert_eq!(reader.read_optimized_int(0x1000).unwrap(), 0x1234);
        assert_eq!(reader.read_optimized_int(0x10000).unwrap(), 0x12345678);
        assert_eq!(reader.remaining(), 0);
    }
}
