//! Little-endian binary helpers for the formats crossing the RHI boundary:
//! NUL-terminated string arrays and u32 -> u32 maps.

use std::collections::BTreeMap;
use std::io::{self, Read, Write};

fn read_u32(reader: &mut impl Read) -> io::Result<u32> {
    let mut bytes = [0u8; 4];
    reader.read_exact(&mut bytes)?;
    Ok(u32::from_le_bytes(bytes))
}

fn write_u32(writer: &mut impl Write, value: u32) -> io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

/// Writes `u32 count`, then per string `u32 length` followed by the UTF-8
/// bytes and a trailing NUL. The length covers the NUL.
pub fn write_string_array(writer: &mut impl Write, strings: &[String]) -> io::Result<()> {
    write_u32(writer, strings.len() as u32)?;
    for string in strings {
        let bytes = string.as_bytes();
        write_u32(writer, bytes.len() as u32 + 1)?;
        writer.write_all(bytes)?;
        writer.write_all(&[0])?;
    }
    Ok(())
}

pub fn read_string_array(reader: &mut impl Read) -> io::Result<Vec<String>> {
    let count = read_u32(reader)?;
    let mut strings = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let length = read_u32(reader)? as usize;
        let mut bytes = vec![0u8; length];
        reader.read_exact(&mut bytes)?;
        if bytes.last() == Some(&0) {
            bytes.pop();
        }
        strings.push(
            String::from_utf8(bytes)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?,
        );
    }
    Ok(strings)
}

/// Writes `u32 count`, then `count` (key, value) pairs.
pub fn write_u32_map(writer: &mut impl Write, map: &BTreeMap<u32, u32>) -> io::Result<()> {
    write_u32(writer, map.len() as u32)?;
    for (&key, &value) in map {
        write_u32(writer, key)?;
        write_u32(writer, value)?;
    }
    Ok(())
}

pub fn read_u32_map(reader: &mut impl Read) -> io::Result<BTreeMap<u32, u32>> {
    let count = read_u32(reader)?;
    let mut map = BTreeMap::new();
    for _ in 0..count {
        let key = read_u32(reader)?;
        let value = read_u32(reader)?;
        map.insert(key, value);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_array_round_trip() {
        let strings = vec!["albedo.png".to_string(), String::new(), "normal map".to_string()];
        let mut bytes = Vec::new();
        write_string_array(&mut bytes, &strings).unwrap();
        let read = read_string_array(&mut bytes.as_slice()).unwrap();
        assert_eq!(strings, read);
    }

    #[test]
    fn string_array_layout() {
        let mut bytes = Vec::new();
        write_string_array(&mut bytes, &["ab".to_string()]).unwrap();
        // count=1, length=3 ("ab" + NUL), payload
        assert_eq!(bytes, vec![1, 0, 0, 0, 3, 0, 0, 0, b'a', b'b', 0]);
    }

    #[test]
    fn u32_map_round_trip() {
        let mut map = BTreeMap::new();
        map.insert(3, 9);
        map.insert(7, 49);
        let mut bytes = Vec::new();
        write_u32_map(&mut bytes, &map).unwrap();
        assert_eq!(bytes.len(), 4 + 2 * 8);
        let read = read_u32_map(&mut bytes.as_slice()).unwrap();
        assert_eq!(map, read);
    }
}
