use crate::{
    reader::GbxReader, rw::ReaderWriter, writer::GbxWriter, Context, GbxError, GbxErrorInner,
    ReadWrite,
};
use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use flate2::{read::ZlibDecoder, write::ZlibEncoder};
use std::{
    fmt::Debug,
    io::{Cursor, Read, Write},
};

/// Compression capability injected through [`crate::Settings`].
pub trait Codec: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    /// Decompresses `data`, which must expand to exactly `size` bytes.
    fn decompress(&self, data: &[u8], size: usize) -> Result<Vec<u8>, GbxError>;

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, GbxError>;
}

/// LZO1X, used for document bodies.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lzo;

impl Codec for Lzo {
    fn name(&self) -> &'static str {
        "lzo"
    }

    fn decompress(&self, data: &[u8], size: usize) -> Result<Vec<u8>, GbxError> {
        let out = lzokay_native::decompress(&mut Cursor::new(data), Some(size))
            .context("Decompressing LZO data")?;
        check_size(out, size)
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, GbxError> {
        Ok(lzokay_native::compress(data).context("Compressing LZO data")?)
    }
}

/// zlib, used for sub-sections such as ghost samples.
#[derive(Debug, Clone, Copy, Default)]
pub struct Zlib;

impl Codec for Zlib {
    fn name(&self) -> &'static str {
        "zlib"
    }

    fn decompress(&self, data: &[u8], size: usize) -> Result<Vec<u8>, GbxError> {
        let mut out = Vec::with_capacity(size);
        ZlibDecoder::new(data)
            .read_to_end(&mut out)
            .context("Decompressing zlib data")?;
        check_size(out, size)
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, GbxError> {
        let mut encoder = ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data).context("Compressing zlib data")?;
        Ok(encoder.finish().context("Finishing zlib stream")?)
    }
}

fn check_size(out: Vec<u8>, size: usize) -> Result<Vec<u8>, GbxError> {
    if out.len() != size {
        return Err(GbxErrorInner::SizeValidation {
            length: out.len() as i64,
            position: 0,
            limit: size,
        }
        .into());
    }
    Ok(out)
}

/// Compressed bytes as read, with what they decompressed to.
///
/// Re-compressing rarely reproduces the original bytes, so unchanged data
/// is written back in its original compressed form.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Packed {
    pub unpacked: Vec<u8>,
    pub packed: Vec<u8>,
}

impl Packed {
    pub fn repack(
        original: Option<&Packed>,
        unpacked: &[u8],
        codec: &dyn Codec,
    ) -> Result<Vec<u8>, GbxError> {
        match original {
            Some(original) if original.unpacked == unpacked => Ok(original.packed.clone()),
            _ => codec.compress(unpacked),
        }
    }
}

/// A size-prefixed, compressed sub-section decoded with its own reader.
///
/// Without a section codec configured the sub-section is kept as opaque
/// bytes and written back unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompressedSection<T> {
    value: Option<T>,
    uncompressed_size: u32,
    opaque: Vec<u8>,
    original: Option<Packed>,
}

impl<T: ReadWrite> CompressedSection<T> {
    pub fn new(value: T) -> Self {
        CompressedSection {
            value: Some(value),
            uncompressed_size: 0,
            opaque: Vec::new(),
            original: None,
        }
    }

    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn value_mut(&mut self) -> Option<&mut T> {
        self.value.as_mut()
    }

    /// Whether the sub-section was read without a codec and is only bytes.
    pub fn is_opaque(&self) -> bool {
        self.value.is_none()
    }

    pub fn uncompressed_size(&self) -> u32 {
        self.uncompressed_size
    }

    pub(crate) fn read(&mut self, r: &mut GbxReader<'_>) -> Result<(), GbxError> {
        self.uncompressed_size = r
            .read_u32::<LE>()
            .context("Reading uncompressed size")?;
        let data = r.read_bytes().context("Reading compressed data")?;

        if data.is_empty() {
            self.value = None;
            self.opaque = data;
            self.original = None;
            return Ok(());
        }

        let Some(codec) = r.settings.section_codec.clone() else {
            tracing::warn!(
                "No section codec configured, keeping {} compressed bytes",
                data.len()
            );
            self.value = None;
            self.opaque = data;
            self.original = None;
            return Ok(());
        };

        let unpacked = codec
            .decompress(&data, self.uncompressed_size as usize)
            .with_context(|| format!("Decompressing section with {}", codec.name()))?;

        let mut inner = GbxReader::new(&unpacked, r.settings.clone());
        let value = inner.read::<T>().context("Reading compressed section")?;
        if inner.remaining() != 0 {
            tracing::warn!(
                "{} bytes left over in compressed section",
                inner.remaining()
            );
        }

        self.value = Some(value);
        self.opaque = Vec::new();
        self.original = Some(Packed {
            unpacked,
            packed: data,
        });
        Ok(())
    }

    pub(crate) fn write(&mut self, w: &mut GbxWriter) -> Result<(), GbxError> {
        let Some(value) = self.value.as_mut() else {
            w.write_u32::<LE>(self.uncompressed_size)?;
            return w.write_bytes(&self.opaque);
        };

        let mut inner = GbxWriter::new(w.settings.clone());
        value
            .read_write(&mut ReaderWriter::writer(&mut inner))
            .context("Writing compressed section")?;
        let unpacked = inner.into_inner();

        let data = match w.settings.section_codec.clone() {
            Some(codec) => Packed::repack(self.original.as_ref(), &unpacked, codec.as_ref())?,
            None => {
                tracing::warn!("No section codec configured, writing section uncompressed");
                unpacked.clone()
            }
        };

        w.write_u32::<LE>(unpacked.len() as u32)?;
        w.write_bytes(&data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Settings;
    use std::sync::Arc;

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Times {
        times: Vec<i32>,
    }

    impl ReadWrite for Times {
        fn read_write(&mut self, rw: &mut ReaderWriter<'_, '_>) -> Result<(), GbxError> {
            rw.array(&mut self.times)
        }
    }

    fn section_bytes(times: &[i32]) -> Vec<u8> {
        let mut inner = Vec::new();
        inner.write_u32::<LE>(times.len() as u32).unwrap();
        for &time in times {
            inner.write_i32::<LE>(time).unwrap();
        }
        let packed = Zlib.compress(&inner).unwrap();

        let mut data = Vec::new();
        data.write_u32::<LE>(inner.len() as u32).unwrap();
        data.write_u32::<LE>(packed.len() as u32).unwrap();
        data.extend_from_slice(&packed);
        data
    }

    #[test]
    fn zlib_round_trip() {
        let data = b"checkpoint checkpoint checkpoint finish".to_vec();
        let packed = Zlib.compress(&data).unwrap();
        assert_eq!(Zlib.decompress(&packed, data.len()).unwrap(), data);

        let err = Zlib.decompress(&packed, data.len() + 1).unwrap_err();
        assert!(matches!(&*err, GbxErrorInner::SizeValidation { .. }));
    }

    #[test]
    fn lzo_round_trip() {
        let data = vec![7u8; 300];
        let packed = Lzo.compress(&data).unwrap();
        assert_eq!(Lzo.decompress(&packed, data.len()).unwrap(), data);
    }

    #[test]
    fn section_decodes_with_codec() {
        let data = section_bytes(&[100, 250, 400]);
        let mut reader = GbxReader::new(&data, Settings::default());
        let mut section = CompressedSection::<Times>::default();
        section.read(&mut reader).unwrap();
        assert_eq!(section.value().unwrap().times, [100, 250, 400]);

        let mut writer = GbxWriter::new(Settings::default());
        section.write(&mut writer).unwrap();
        assert_eq!(writer.into_inner(), data);
    }

    #[test]
    fn section_without_codec_is_opaque() {
        let data = section_bytes(&[1, 2]);
        let settings = Settings {
            section_codec: None,
            ..Settings::default()
        };

        let mut reader = GbxReader::new(&data, settings.clone());
        let mut section = CompressedSection::<Times>::default();
        section.read(&mut reader).unwrap();
        assert!(section.is_opaque());
        assert_eq!(reader.remaining(), 0);

        let mut writer = GbxWriter::new(settings);
        section.write(&mut writer).unwrap();
        assert_eq!(writer.into_inner(), data);
    }

    #[test]
    fn modified_section_is_recompressed() {
        let data = section_bytes(&[5]);
        let mut reader = GbxReader::new(&data, Settings::default());
        let mut section = CompressedSection::<Times>::default();
        section.read(&mut reader).unwrap();
        section.value_mut().unwrap().times.push(9);

        let mut writer = GbxWriter::new(Settings::default());
        section.write(&mut writer).unwrap();
        let written = writer.into_inner();

        let settings = Settings {
            section_codec: Some(Arc::new(Zlib)),
            ..Settings::default()
        };
        let mut reader = GbxReader::new(&written, settings);
        let mut reread = CompressedSection::<Times>::default();
        reread.read(&mut reader).unwrap();
        assert_eq!(reread.value().unwrap().times, [5, 9]);
    }
}
