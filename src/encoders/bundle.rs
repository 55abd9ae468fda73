//! Uncompressed ZIP container for multi-part outputs

use crate::error::Result;
use std::io::{Cursor, Write};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Store `entries` (name, bytes) in a ZIP archive without compression
pub fn zip_entries(entries: &[(&str, &[u8])]) -> Result<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

    for (name, data) in entries {
        writer.start_file(*name, options)?;
        writer.write_all(data)?;
    }

    Ok(writer.finish()?.into_inner())
}
