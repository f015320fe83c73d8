//! Packing and unpacking module archives
//!
//! The distribution server can serve a whole module set as one archive so
//! remote loaders resolve everything in a single round trip. The format is a
//! plain tar of wire resource entries; compression is negotiated at the HTTP
//! layer, not baked into the archive.

use bytes::Bytes;
use std::collections::HashMap;
use std::io::Read;

use crate::error::CodeError;
use crate::Result;

/// Packs resource entries into a tar archive
pub fn pack<'a, I>(entries: I) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = (&'a str, &'a [u8])>,
{
    let mut builder = tar::Builder::new(Vec::new());
    for (resource_name, bytes) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(bytes.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, resource_name, bytes)
            .map_err(|e| CodeError::Archive(format!("failed to append [{}]: {}", resource_name, e)))?;
    }
    builder
        .into_inner()
        .map_err(|e| CodeError::Archive(format!("failed to finish archive: {}", e)))
}

/// Expands a tar archive into resource entries keyed by path
pub fn unpack(bytes: &[u8]) -> Result<HashMap<String, Bytes>> {
    let mut archive = tar::Archive::new(bytes);
    let mut entries = HashMap::new();
    for entry in archive
        .entries()
        .map_err(|e| CodeError::Archive(format!("unreadable archive: {}", e)))?
    {
        let mut entry = entry.map_err(|e| CodeError::Archive(format!("corrupt entry: {}", e)))?;
        let path = entry
            .path()
            .map_err(|e| CodeError::Archive(format!("corrupt entry path: {}", e)))?
            .to_string_lossy()
            .into_owned();
        let mut content = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut content)
            .map_err(|e| CodeError::Archive(format!("failed to read [{}]: {}", path, e)))?;
        entries.insert(path, Bytes::from(content));
    }
    Ok(entries)
}
