use crate::{
    catalog::Class,
    dispatch,
    document::Settings,
    reader::GbxReader,
    registry::canonical_chunk_id,
    writer::GbxWriter,
    Context, GbxError, GbxErrorInner,
};
use byteorder::{ReadBytesExt, WriteBytesExt, LE};

const MAGIC: &[u8; 3] = b"GBX";
const HEAVY: u32 = 0x8000_0000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ByteFormat {
    Text,
    Binary,
}

impl TryFrom<u8> for ByteFormat {
    type Error = GbxErrorInner;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            b'B' => Ok(ByteFormat::Binary),
            b'T' => Ok(ByteFormat::Text),
            _ => Err(GbxErrorInner::InvalidByteFormat(value)),
        }
    }
}

impl From<ByteFormat> for u8 {
    fn from(value: ByteFormat) -> Self {
        match value {
            ByteFormat::Binary => b'B',
            ByteFormat::Text => b'T',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Compression {
    Compressed,
    Uncompressed,
}

impl TryFrom<u8> for Compression {
    type Error = GbxErrorInner;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            b'C' => Ok(Compression::Compressed),
            b'U' => Ok(Compression::Uncompressed),
            _ => Err(GbxErrorInner::InvalidCompressionState(value)),
        }
    }
}

impl From<Compression> for u8 {
    fn from(value: Compression) -> Self {
        match value {
            Compression::Compressed => b'C',
            Compression::Uncompressed => b'U',
        }
    }
}

/// Framing of a document up to the node count.
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub version: u16,
    pub byte_format: ByteFormat,
    pub ref_table_compression: Compression,
    pub body_compression: Compression,
    /// `R` or `E` from version 4 on.
    pub unknown: Option<u8>,
    /// Root class ID as written.
    pub class_id: u32,
    pub chunks: Vec<HeaderChunk>,
}

/// One chunk of the user data section.
#[derive(Clone, PartialEq, derivative::Derivative)]
#[derivative(Debug)]
pub struct HeaderChunk {
    pub id: u32,
    pub heavy: bool,
    /// Version the chunk was decoded with. `None` when it is carried as
    /// bytes only, either because no layout is registered or because the
    /// layout disagreed with the declared size.
    pub version: Option<i32>,
    #[derivative(Debug = "ignore")]
    pub data: Vec<u8>,
}

impl Header {
    pub fn new(class_id: u32) -> Header {
        Header {
            version: 6,
            byte_format: ByteFormat::Binary,
            ref_table_compression: Compression::Uncompressed,
            body_compression: Compression::Compressed,
            unknown: Some(b'R'),
            class_id,
            chunks: Vec::new(),
        }
    }

    pub(crate) fn read(r: &mut GbxReader<'_>) -> Result<Header, GbxError> {
        if r.remaining() < MAGIC.len() || r.read_raw(MAGIC.len())? != MAGIC {
            return Err(GbxErrorInner::NotGbx.into());
        }

        let version = r.read_u16::<LE>().context("Reading version")?;
        if version < 3 {
            return Err(GbxErrorInner::VersionNotSupported(version).into());
        }
        tracing::debug!("version {}", version);

        let byte_format = r.read_u8().context("Reading byte format")?;
        tracing::debug!("byte format {:?}", byte_format as char);
        let byte_format: ByteFormat = byte_format.try_into().context("Parsing byte format")?;
        if byte_format == ByteFormat::Text {
            return Err(GbxErrorInner::TextFormat.into());
        }

        let ref_table_compression = r.read_u8().context("Reading ref table compression")?;
        tracing::debug!("ref table compression {:?}", ref_table_compression as char);
        let ref_table_compression = ref_table_compression
            .try_into()
            .context("Parsing ref table compression")?;

        let body_compression = r.read_u8().context("Reading body compression")?;
        tracing::debug!("body compression {:?}", body_compression as char);
        let body_compression = body_compression
            .try_into()
            .context("Parsing body compression")?;

        let unknown = if version >= 4 {
            Some(r.read_u8().context("Reading unknown 1")?)
        } else {
            None
        };

        let class_id = r.read_u32::<LE>().context("Reading class id")?;
        tracing::debug!("class id 0x{:08x}", class_id);

        let user_data_size = if version >= 6 {
            let size = r.read_u32::<LE>().context("Reading user data size")?;
            tracing::debug!("user data size {}", size);
            Some(size)
        } else {
            None
        };

        let mut chunks = Vec::new();
        if user_data_size != Some(0) {
            let num_header_chunks = r
                .read_length(false)
                .context("Reading num header chunks")?;
            tracing::debug!("num header chunks {}", num_header_chunks);

            let mut sizes = Vec::with_capacity(num_header_chunks.min(r.remaining() / 8));
            for i in 0..num_header_chunks {
                let id = r
                    .read_u32::<LE>()
                    .with_context(|| format!("Reading chunk {i} ID"))?;
                let size_heavy = r
                    .read_u32::<LE>()
                    .with_context(|| format!("Reading chunk {i} size"))?;
                tracing::debug!("  chunk {:08x} size {:08x}", id, size_heavy);
                sizes.push((id, size_heavy & !HEAVY, size_heavy & HEAVY != 0));
            }

            let mut total = 4 + 8 * sizes.len();
            for (id, size, heavy) in sizes {
                let data = r
                    .read_raw(size as usize)
                    .with_context(|| format!("Reading chunk {id:08x} data"))?;
                total += data.len();
                chunks.push(HeaderChunk {
                    id,
                    heavy,
                    version: None,
                    data: data.to_vec(),
                });
            }

            if let Some(size) = user_data_size {
                if size as usize != total {
                    tracing::warn!("User data size {} but chunks take {}", size, total);
                }
            }
        }

        Ok(Header {
            version,
            byte_format,
            ref_table_compression,
            body_compression,
            unknown,
            class_id,
            chunks,
        })
    }

    /// Decodes registered header chunks into the root class. Chunks share one
    /// lookback string scope, separate from the body.
    pub(crate) fn decode_chunks(&mut self, class: &mut Class, settings: &Settings) {
        let data: Vec<u8> = self
            .chunks
            .iter()
            .flat_map(|chunk| chunk.data.iter().copied())
            .collect();
        let mut r = GbxReader::new(&data, settings.clone());

        for chunk in self.chunks.iter_mut() {
            let start = r.checkpoint();
            let end = start.position() + chunk.data.len() as u64;
            let chunk_id = canonical_chunk_id(chunk.id);

            chunk.version = match class.chunk(chunk_id) {
                Some(info) if info.header && !info.ignored => {
                    match dispatch::read_header_chunk(&mut r, class, chunk_id, info) {
                        Ok(version) if r.position() == end => Some(version),
                        Ok(_) => {
                            tracing::warn!(
                                "Header chunk {:08x} declared {} bytes but its layout read {}",
                                chunk_id,
                                chunk.data.len(),
                                r.position() - start.position()
                            );
                            None
                        }
                        Err(err) => {
                            tracing::warn!("Could not decode header chunk {:08x}: {}", chunk_id, err);
                            None
                        }
                    }
                }
                _ => {
                    tracing::trace!("header chunk {:08x} kept as bytes", chunk.id);
                    None
                }
            };

            if chunk.version.is_none() {
                r.rewind(start);
            }
            r.set_position(end);
        }
    }

    /// Re-encodes decoded header chunks from the root class and returns the
    /// payload of every chunk in order.
    pub(crate) fn encode_chunks(
        &self,
        class: &mut Class,
        settings: &Settings,
    ) -> Result<Vec<Vec<u8>>, GbxError> {
        let mut w = GbxWriter::new(settings.clone());
        let mut bounds = Vec::with_capacity(self.chunks.len());

        for chunk in self.chunks.iter() {
            let start = w.position() as usize;
            match chunk.version {
                Some(version) => {
                    dispatch::write_header_chunk(&mut w, class, canonical_chunk_id(chunk.id), version)?
                }
                None => w.write_raw(&chunk.data)?,
            }
            bounds.push((start, w.position() as usize));
        }

        let data = w.into_inner();
        Ok(bounds
            .into_iter()
            .map(|(start, end)| data[start..end].to_vec())
            .collect())
    }

    pub(crate) fn write(&self, w: &mut GbxWriter, payloads: &[Vec<u8>]) -> Result<(), GbxError> {
        w.write_raw(MAGIC)?;
        w.write_u16::<LE>(self.version)?;
        w.write_u8(self.byte_format.into())?;
        w.write_u8(self.ref_table_compression.into())?;
        w.write_u8(self.body_compression.into())?;
        if self.version >= 4 {
            w.write_u8(self.unknown.unwrap_or(b'R'))?;
        }
        w.write_u32::<LE>(self.class_id)?;

        let user_data_size = if payloads.is_empty() {
            0
        } else {
            4 + 8 * payloads.len() + payloads.iter().map(Vec::len).sum::<usize>()
        };
        if self.version >= 6 {
            w.write_u32::<LE>(user_data_size as u32)?;
        }

        if self.version < 6 || user_data_size > 0 {
            w.write_length(payloads.len())?;
            for (chunk, payload) in self.chunks.iter().zip(payloads) {
                w.write_u32::<LE>(chunk.id)?;
                let heavy = if chunk.heavy { HEAVY } else { 0 };
                w.write_u32::<LE>(payload.len() as u32 | heavy)?;
            }
            for payload in payloads {
                w.write_raw(payload)?;
            }
        }

        Ok(())
    }
}
