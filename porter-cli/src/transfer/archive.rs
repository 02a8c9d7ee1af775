//! ZIP wrapping of exported JSON

use std::io::{Cursor, Read, Write};

use zip::{write::FileOptions, CompressionMethod, ZipArchive, ZipWriter};

use super::error::TransferResult;

/// Name of the single entry written on export
pub const ENTITIES_ENTRY: &str = "entities.json";

/// Build an archive holding one uncompressed entry
pub fn write_single_entry(name: &str, content: &[u8]) -> TransferResult<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut zip = ZipWriter::new(&mut cursor);
        let options = FileOptions::default().compression_method(CompressionMethod::Stored);
        zip.start_file(name, options)?;
        zip.write_all(content)?;
        zip.finish()?;
    }
    Ok(cursor.into_inner())
}

/// Read every `.json` entry of an archive, in archive order
pub fn read_json_entries(bytes: &[u8]) -> TransferResult<Vec<(String, String)>> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let mut entries = Vec::new();

    for idx in 0..archive.len() {
        let mut file = archive.by_index(idx)?;
        if file.is_dir() || !file.name().to_ascii_lowercase().ends_with(".json") {
            log::debug!("Skipping archive entry {}", file.name());
            continue;
        }
        let name = file.name().to_string();
        let mut content = String::new();
        file.read_to_string(&mut content)?;
        entries.push((name, content));
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_stored_entry() {
        let bytes = write_single_entry(ENTITIES_ENTRY, b"[]").unwrap();

        let mut archive = ZipArchive::new(Cursor::new(bytes.as_slice())).unwrap();
        assert_eq!(archive.len(), 1);
        let file = archive.by_index(0).unwrap();
        assert_eq!(file.name(), ENTITIES_ENTRY);
        assert_eq!(file.compression(), CompressionMethod::Stored);
    }

    #[test]
    fn test_read_skips_non_json() {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut zip = ZipWriter::new(&mut cursor);
            let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
            zip.start_file("readme.txt", options).unwrap();
            zip.write_all(b"hello").unwrap();
            zip.start_file("b.json", options).unwrap();
            zip.write_all(b"{}").unwrap();
            zip.finish().unwrap();
        }

        let entries = read_json_entries(&cursor.into_inner()).unwrap();
        assert_eq!(entries, vec![("b.json".to_string(), "{}".to_string())]);
    }

    #[test]
    fn test_garbage_is_archive_error() {
        let result = read_json_entries(b"not a zip");
        assert!(matches!(result, Err(crate::transfer::TransferError::Archive(_))));
    }
}
