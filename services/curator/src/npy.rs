//! NumPy `.npy` v1.0 encoding for `uint8` tensors.
//!
//! Layout: magic, version, little-endian header length, then an ASCII dict
//! padded with spaces and terminated by `\n` so the payload starts on a
//! 64-byte boundary.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

pub const MAGIC: [u8; 6] = *b"\x93NUMPY";
pub const VERSION: [u8; 2] = [1, 0];

const PREAMBLE_LEN: usize = MAGIC.len() + VERSION.len() + 2;
const ALIGNMENT: usize = 64;

/// Build the full v1.0 header for a C-ordered `|u1` array.
pub fn encode_header(shape: &[usize]) -> Vec<u8> {
    let dims = match shape {
        [single] => format!("({},)", single),
        _ => format!(
            "({})",
            shape.iter().map(|d| d.to_string()).collect::<Vec<_>>().join(", ")
        ),
    };
    let mut dict = format!(
        "{{'descr': '|u1', 'fortran_order': False, 'shape': {}, }}",
        dims
    );

    let unpadded = PREAMBLE_LEN + dict.len() + 1;
    let padding = (ALIGNMENT - unpadded % ALIGNMENT) % ALIGNMENT;
    dict.extend(std::iter::repeat(' ').take(padding));
    dict.push('\n');

    let mut header = Vec::with_capacity(PREAMBLE_LEN + dict.len());
    header.extend_from_slice(&MAGIC);
    header.extend_from_slice(&VERSION);
    header.extend_from_slice(&(dict.len() as u16).to_le_bytes());
    header.extend_from_slice(dict.as_bytes());
    header
}

/// Write `data` as a `uint8` array of the given shape.
pub fn write_u8(path: &Path, shape: &[usize], data: &[u8]) -> io::Result<()> {
    let expected: usize = shape.iter().product();
    if expected != data.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "shape {:?} needs {} bytes, got {}",
                shape,
                expected,
                data.len()
            ),
        ));
    }

    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(&encode_header(shape))?;
    writer.write_all(data)?;
    writer.flush()
}

/// Read the shape recorded in an `.npy` header.
pub fn read_shape(path: &Path) -> io::Result<Vec<usize>> {
    let mut reader = BufReader::new(File::open(path)?);

    let mut preamble = [0u8; PREAMBLE_LEN];
    reader.read_exact(&mut preamble)?;
    if preamble[..6] != MAGIC {
        return Err(invalid("not an npy file"));
    }
    if preamble[6..8] != VERSION {
        return Err(invalid("unsupported npy version"));
    }

    let header_len = u16::from_le_bytes([preamble[8], preamble[9]]) as usize;
    let mut dict = vec![0u8; header_len];
    reader.read_exact(&mut dict)?;
    let dict = String::from_utf8(dict).map_err(|_| invalid("header is not ASCII"))?;

    parse_shape(&dict).ok_or_else(|| invalid("header has no shape"))
}

fn parse_shape(dict: &str) -> Option<Vec<usize>> {
    let after = &dict[dict.find("'shape':")? + "'shape':".len()..];
    let open = after.find('(')?;
    let close = after.find(')')?;
    after[open + 1..close]
        .split(',')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(|d| d.parse().ok())
        .collect()
}

fn invalid(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.to_string())
}
