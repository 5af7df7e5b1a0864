//! Compression formats for packed genes.
//!
//! Compressors wrap any downstream [`Write`] sink (normally the chunker) and
//! decompressors wrap any [`Read`] source, so payloads always flow through in
//! bounded pieces.

use crate::error::{GeneError, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use liblzma::read::XzDecoder;
use liblzma::stream::{Check, MtStreamBuilder, Stream};
use liblzma::write::XzEncoder;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, Read, Write};
use std::str::FromStr;
use tracing::debug;

/// Sources larger than this are worth compressing with gzip.
pub const MIN_COMPRESSIBLE_SIZE: u64 = 2 * 1024;

/// xz preset used for maximum compression.
const XZ_PRESET: u32 = 6;

/// Decoder memory ceiling when total memory cannot be determined.
const FALLBACK_XZ_MEMLIMIT: u64 = 512 * 1024 * 1024;

/// Compression format recorded in the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    #[default]
    Plain,
    Gz,
    Xz,
}

impl Format {
    /// Choose a format for a source of `source_len` bytes.
    ///
    /// Tiny sources stay plain: compression overhead outweighs the gain.
    pub fn select(max_compression: bool, source_len: u64) -> Self {
        if max_compression {
            Format::Xz
        } else if source_len > MIN_COMPRESSIBLE_SIZE {
            Format::Gz
        } else {
            Format::Plain
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Plain => "plain",
            Format::Gz => "gz",
            Format::Xz => "xz",
        }
    }

    /// Wrap `sink` in this format's compressor.
    pub fn compressor<W: Write>(self, sink: W, settings: &CodecSettings) -> Result<Compressor<W>> {
        let compressor = match self {
            Format::Plain => Compressor::Plain(sink),
            Format::Gz => Compressor::Gz(GzEncoder::new(sink, Compression::fast())),
            Format::Xz => {
                let stream = settings.xz_encoder()?;
                Compressor::Xz(XzEncoder::new_stream(sink, stream))
            }
        };
        debug!(format = self.as_str(), "Compressor ready");
        Ok(compressor)
    }

    /// Wrap `source` in this format's decompressor.
    pub fn decompressor<R: Read>(self, source: R, settings: &CodecSettings) -> Result<Decompressor<R>> {
        Ok(match self {
            Format::Plain => Decompressor::Plain(source),
            Format::Gz => Decompressor::Gz(GzDecoder::new(source)),
            Format::Xz => {
                let stream = settings.xz_decoder()?;
                Decompressor::Xz(XzDecoder::new_stream(source, stream))
            }
        })
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Format {
    type Err = GeneError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "plain" => Ok(Format::Plain),
            "gz" => Ok(Format::Gz),
            "xz" => Ok(Format::Xz),
            other => Err(GeneError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Host-derived tuning for the threaded xz codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecSettings {
    pub xz_threads: u32,
    /// Memory ceiling for threaded xz decoding, in bytes.
    pub xz_memlimit: u64,
}

impl CodecSettings {
    /// Size the codec for the current machine.
    pub fn detect() -> Self {
        let mut sys = sysinfo::System::new();
        sys.refresh_memory();
        let settings = Self {
            xz_threads: xz_threads_for(num_cpus::get()),
            xz_memlimit: xz_memlimit_for(sys.total_memory()),
        };
        debug!(
            threads = settings.xz_threads,
            memlimit = settings.xz_memlimit,
            "Codec settings detected"
        );
        settings
    }

    fn xz_encoder(&self) -> Result<Stream> {
        let mut builder = MtStreamBuilder::new();
        builder
            .threads(self.xz_threads)
            .preset(XZ_PRESET)
            .check(Check::Crc64);
        builder.encoder().map_err(lzma_error)
    }

    fn xz_decoder(&self) -> Result<Stream> {
        let mut builder = MtStreamBuilder::new();
        builder
            .threads(self.xz_threads)
            .memlimit_threading(self.xz_memlimit)
            .memlimit_stop(u64::MAX);
        builder.decoder().map_err(lzma_error)
    }
}

impl Default for CodecSettings {
    fn default() -> Self {
        Self::detect()
    }
}

/// Leave one core free on small machines and two on larger ones.
fn xz_threads_for(cpus: usize) -> u32 {
    let reserve = if cpus <= 4 { 1 } else { 2 };
    u32::try_from(cpus.saturating_sub(reserve).max(1)).unwrap_or(u32::MAX)
}

fn xz_memlimit_for(total_memory: u64) -> u64 {
    if total_memory == 0 {
        FALLBACK_XZ_MEMLIMIT
    } else {
        total_memory / 4
    }
}

fn lzma_error(err: liblzma::stream::Error) -> GeneError {
    GeneError::Io(io::Error::other(err))
}

/// Compressing writer in front of a downstream sink.
pub enum Compressor<W: Write> {
    Plain(W),
    Gz(GzEncoder<W>),
    Xz(XzEncoder<W>),
}

impl<W: Write> Compressor<W> {
    /// Write the format trailer and hand back the downstream sink.
    pub fn finish(self) -> Result<W> {
        match self {
            Compressor::Plain(mut sink) => {
                sink.flush()?;
                Ok(sink)
            }
            Compressor::Gz(encoder) => encoder.finish().map_err(GeneError::from_io),
            Compressor::Xz(encoder) => encoder.finish().map_err(GeneError::from_io),
        }
    }
}

impl<W: Write> Write for Compressor<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Compressor::Plain(sink) => sink.write(buf),
            Compressor::Gz(encoder) => encoder.write(buf),
            Compressor::Xz(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Compressor::Plain(sink) => sink.flush(),
            Compressor::Gz(encoder) => encoder.flush(),
            Compressor::Xz(encoder) => encoder.flush(),
        }
    }
}

/// Decompressing reader over an upstream source.
pub enum Decompressor<R: Read> {
    Plain(R),
    Gz(GzDecoder<R>),
    Xz(XzDecoder<R>),
}

impl<R: Read> Decompressor<R> {
    /// Hand back the upstream source, discarding any decoder state.
    pub fn into_inner(self) -> R {
        match self {
            Decompressor::Plain(source) => source,
            Decompressor::Gz(decoder) => decoder.into_inner(),
            Decompressor::Xz(decoder) => decoder.into_inner(),
        }
    }
}

impl<R: Read> Read for Decompressor<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Decompressor::Plain(source) => source.read(buf),
            Decompressor::Gz(decoder) => decoder.read(buf),
            Decompressor::Xz(decoder) => decoder.read(buf),
        }
    }
}
