//! The envelope around every binary artifact (`registry.dat`, `d.dat`,
//! `i.dat`, `o.dat`): a magic tag plus a format version, then bincode.
//! Consumers must treat anything unrecognized as absent and regenerate.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

const MAGIC: &[u8; 4] = b"loam";
const FORMAT_VERSION: u16 = 1;

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(64);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    bincode::serialize_into(&mut out, value).context("failed to encode binary artifact")?;
    Ok(out)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Option<T> {
    let rest = bytes.strip_prefix(MAGIC.as_slice())?;
    if rest.len() < 2 {
        return None;
    }
    let (version, payload) = rest.split_at(2);
    if u16::from_le_bytes([version[0], version[1]]) != FORMAT_VERSION {
        return None;
    }
    bincode::deserialize(payload).ok()
}
