use flate2::read::MultiGzDecoder;
use std::io::{self, Chain, Cursor, ErrorKind, Read};

pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

type Head<R> = Chain<Cursor<Vec<u8>>, R>;

/// Report bytes with transparent gzip decoding.
///
/// Compression is detected from the first two bytes of the stream. The sniffed
/// bytes are replayed in front of the remaining input, so nothing is buffered
/// beyond the magic prefix.
pub enum ReportStream<R: Read> {
    Plain(Head<R>),
    Gzip(MultiGzDecoder<Head<R>>),
}

impl<R: Read> ReportStream<R> {
    pub fn open(mut inner: R) -> io::Result<Self> {
        let mut magic = [0u8; 2];
        let mut filled = 0;
        while filled < magic.len() {
            match inner.read(&mut magic[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        let head = Cursor::new(magic[..filled].to_vec()).chain(inner);
        if filled == magic.len() && magic == GZIP_MAGIC {
            Ok(ReportStream::Gzip(MultiGzDecoder::new(head)))
        } else {
            Ok(ReportStream::Plain(head))
        }
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self, ReportStream::Gzip(_))
    }
}

impl<R: Read> Read for ReportStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            ReportStream::Plain(r) => r.read(buf),
            ReportStream::Gzip(r) => r.read(buf),
        }
    }
}
