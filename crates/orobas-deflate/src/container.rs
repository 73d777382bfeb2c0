//! Gzip (RFC 1952) and zlib (RFC 1950) framing around raw DEFLATE data.

use orobas_core::{CompressionLevel, Error, Framing, Result};

/// Gzip magic number.
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Compression method: DEFLATE.
const CM_DEFLATE: u8 = 8;

/// Gzip header flags.
const FHCRC: u8 = 2;
const FEXTRA: u8 = 4;
const FNAME: u8 = 8;
const FCOMMENT: u8 = 16;

/// OS identifier: Unix.
const OS_UNIX: u8 = 3;

/// Zlib CMF byte: DEFLATE with a 32 KiB window.
const ZLIB_CMF: u8 = 0x78;

/// Append the stream header for `framing`.
pub fn write_header(framing: Framing, level: CompressionLevel, out: &mut Vec<u8>) {
    match framing {
        Framing::Raw => {}
        Framing::Gzip => {
            let xfl = match level {
                CompressionLevel::Default => 4,
                CompressionLevel::High => 2,
            };
            out.extend_from_slice(&GZIP_MAGIC);
            out.push(CM_DEFLATE);
            out.push(0);
            out.extend_from_slice(&[0, 0, 0, 0]);
            out.push(xfl);
            out.push(OS_UNIX);
        }
        Framing::Zlib => {
            let flevel: u8 = match level {
                CompressionLevel::Default => 0,
                CompressionLevel::High => 2,
            };
            let mut flg = flevel << 6;
            let check = ((ZLIB_CMF as u16) << 8 | flg as u16) % 31;
            if check != 0 {
                flg += (31 - check) as u8;
            }
            out.push(ZLIB_CMF);
            out.push(flg);
        }
    }
}

/// Append the stream trailer for `framing`.
pub fn write_trailer(framing: Framing, crc32: u32, adler32: u32, total_in: u64, out: &mut Vec<u8>) {
    match framing {
        Framing::Raw => {}
        Framing::Gzip => {
            out.extend_from_slice(&crc32.to_le_bytes());
            out.extend_from_slice(&(total_in as u32).to_le_bytes());
        }
        Framing::Zlib => out.extend_from_slice(&adler32.to_be_bytes()),
    }
}

/// Parse a stream header at the start of `data`.
///
/// Returns `Ok(None)` when more bytes are needed, otherwise the header length.
pub fn parse_header(framing: Framing, data: &[u8]) -> Result<Option<usize>> {
    match framing {
        Framing::Raw => Ok(Some(0)),
        Framing::Zlib => {
            let [cmf, flg, ..] = data else {
                return Ok(None);
            };
            if cmf & 0x0F != CM_DEFLATE || cmf >> 4 > 7 {
                return Err(Error::corrupted("invalid zlib compression method"));
            }
            if ((*cmf as u16) << 8 | *flg as u16) % 31 != 0 {
                return Err(Error::corrupted("zlib header check failed"));
            }
            if flg & 0x20 != 0 {
                return Err(Error::Unsupported("zlib preset dictionary".into()));
            }
            Ok(Some(2))
        }
        Framing::Gzip => parse_gzip_header(data),
    }
}

fn parse_gzip_header(data: &[u8]) -> Result<Option<usize>> {
    if data.len() < 10 {
        return Ok(None);
    }
    if data[0..2] != GZIP_MAGIC {
        return Err(Error::corrupted("invalid gzip magic"));
    }
    if data[2] != CM_DEFLATE {
        return Err(Error::corrupted("unsupported compression method"));
    }

    let flags = data[3];
    let mut pos = 10;

    if flags & FEXTRA != 0 {
        if pos + 2 > data.len() {
            return Ok(None);
        }
        let xlen = u16::from_le_bytes([data[pos], data[pos + 1]]) as usize;
        pos += 2 + xlen;
    }

    for field in [FNAME, FCOMMENT] {
        if flags & field != 0 {
            let Some(nul) = data.get(pos..).and_then(|rest| rest.iter().position(|&b| b == 0))
            else {
                return Ok(None);
            };
            pos += nul + 1;
        }
    }

    if flags & FHCRC != 0 {
        pos += 2;
    }

    if pos > data.len() {
        return Ok(None);
    }
    Ok(Some(pos))
}

/// Check a stream trailer against the decoded data's checksums.
pub fn check_trailer(
    framing: Framing,
    trailer: &[u8],
    crc32: u32,
    adler32: u32,
    total_out: u64,
) -> Result<()> {
    match framing {
        Framing::Raw => Ok(()),
        Framing::Gzip => {
            let stored_crc = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
            if stored_crc != crc32 {
                return Err(Error::checksum_mismatch(stored_crc, crc32));
            }
            let stored_size = u32::from_le_bytes([trailer[4], trailer[5], trailer[6], trailer[7]]);
            if stored_size != total_out as u32 {
                return Err(Error::corrupted("gzip size mismatch"));
            }
            Ok(())
        }
        Framing::Zlib => {
            let stored = u32::from_be_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
            if stored != adler32 {
                return Err(Error::checksum_mismatch(stored, adler32));
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zlib_header_check_bits() {
        for level in [CompressionLevel::Default, CompressionLevel::High] {
            let mut out = Vec::new();
            write_header(Framing::Zlib, level, &mut out);
            assert_eq!(out.len(), 2);
            assert_eq!(((out[0] as u16) << 8 | out[1] as u16) % 31, 0);
            assert_eq!(parse_header(Framing::Zlib, &out).unwrap(), Some(2));
        }
    }

    #[test]
    fn test_gzip_header_roundtrip() {
        let mut out = Vec::new();
        write_header(Framing::Gzip, CompressionLevel::Default, &mut out);
        assert_eq!(out.len(), Framing::Gzip.header_len());
        assert_eq!(parse_header(Framing::Gzip, &out[..9]).unwrap(), None);
        assert_eq!(parse_header(Framing::Gzip, &out).unwrap(), Some(10));
    }

    #[test]
    fn test_gzip_header_with_name() {
        let mut header = vec![0x1f, 0x8b, 8, FNAME, 0, 0, 0, 0, 0, 3];
        header.extend_from_slice(b"file.txt");
        assert_eq!(parse_header(Framing::Gzip, &header).unwrap(), None);
        header.push(0);
        assert_eq!(parse_header(Framing::Gzip, &header).unwrap(), Some(19));
    }

    #[test]
    fn test_bad_magic() {
        assert!(parse_header(Framing::Gzip, &[0u8; 10]).is_err());
        assert!(parse_header(Framing::Zlib, &[0x78, 0x00]).is_err());
    }

    #[test]
    fn test_trailer_mismatch() {
        let mut trailer = Vec::new();
        write_trailer(Framing::Gzip, 0xDEAD_BEEF, 0, 5, &mut trailer);
        assert!(check_trailer(Framing::Gzip, &trailer, 0xDEAD_BEEF, 0, 5).is_ok());
        assert!(matches!(
            check_trailer(Framing::Gzip, &trailer, 1, 0, 5),
            Err(Error::ChecksumMismatch { .. })
        ));
    }
}
