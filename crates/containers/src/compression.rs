use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use flate2::read::GzDecoder;
use lz4_flex::frame::FrameDecoder;

/// Opens `path` as an LZ4-framed stream.
pub fn open_lz4(path: &Path) -> io::Result<Box<dyn Read + Send>> {
    let file = File::open(path)?;
    Ok(Box::new(FrameDecoder::new(BufReader::new(file))))
}

/// Opens `path` as a gzip stream.
pub fn open_gzip(path: &Path) -> io::Result<Box<dyn Read + Send>> {
    let file = File::open(path)?;
    Ok(Box::new(GzDecoder::new(BufReader::new(file))))
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    #[test]
    fn lz4_round_trip() {
        let dir = tempdir::TempDir::new("compression-test").unwrap();
        let path = dir.path().join("data.lz4");
        let mut encoder = lz4_flex::frame::FrameEncoder::new(File::create(&path).unwrap());
        encoder.write_all(b"one\ntwo\n").unwrap();
        encoder.finish().unwrap();

        let mut out = String::new();
        open_lz4(&path).unwrap().read_to_string(&mut out).unwrap();
        assert_eq!(out, "one\ntwo\n");
    }

    #[test]
    fn gzip_round_trip() {
        let dir = tempdir::TempDir::new("compression-test").unwrap();
        let path = dir.path().join("data.gz");
        let mut encoder = flate2::write::GzEncoder::new(
            File::create(&path).unwrap(),
            flate2::Compression::default(),
        );
        encoder.write_all(b"one\ntwo\n").unwrap();
        encoder.finish().unwrap();

        let mut out = String::new();
        open_gzip(&path).unwrap().read_to_string(&mut out).unwrap();
        assert_eq!(out, "one\ntwo\n");
    }
}
