//! In-memory model of the token's object directory
//!
//! The card stores one flat blob holding every provisioned object:
//! certificates, certificate attributes and key attributes. This module
//! models that blob, parses it from and serializes it to the on-card
//! layout, and enforces the card's structural limits (object count cap,
//! reserved version byte, bounded uncompressed size).
//!
//! ## On-card layout
//!
//! ```text
//! format-version (2B) | object-version (2B) | CUID (10B) |
//! compression-type (2B: 0=none, 1=zlib) | region-size (2B) | offset (2B)
//! token-name (1B length + bytes)
//! object region (possibly zlib compressed):
//!     count (2B), then per object: id (4B) | length (2B) | data
//! ```
//!
//! Multi-byte fields are big endian. On the wire a certificate travels
//! as a single attribute-class object whose final value attribute holds
//! the raw certificate; parsing splits that into a public certificate
//! object plus its attribute object, and serialization reverses the
//! split symmetrically.

use std::io::{Read, Write};

use bytes::{BufMut, Bytes, BytesMut};
use flate2::{Compression, read::ZlibDecoder, write::ZlibEncoder};
use tracing::debug;

use crate::{Error, Result};

/// Hard cap on concurrent object specs, fixed by card memory
pub const MAX_OBJECT_SPECS: usize = 20;

/// Bound on the uncompressed object region, matching card memory
pub const MAX_UNCOMPRESSED: usize = 32_768;

/// Reserved object version value; never generated
pub const RESERVED_OBJECT_VERSION: u8 = 0xFF;

/// Object directory format this code writes
pub const FORMAT_VERSION: u16 = 1;

const COMPRESSION_NONE: u16 = 0;
const COMPRESSION_ZLIB: u16 = 1;
const HEADER_LEN: usize = 20;

/// Object classes in the directory
pub mod class {
    /// Public certificate body
    pub const CERTIFICATE: u8 = b'C';
    /// Certificate attributes
    pub const CERT_ATTRIBUTES: u8 = b'c';
    /// Key attributes
    pub const KEY_ATTRIBUTES: u8 = b'k';
}

/// Attribute tags inside attribute-class objects
pub mod attr {
    /// Display label
    pub const LABEL: u8 = 0x01;
    /// Key identifier
    pub const KEY_ID: u8 = 0x02;
    /// Raw value (certificate body on the wire)
    pub const VALUE: u8 = 0x03;
    /// Fixed attributes word read by the on-card reader
    pub const FIXED: u8 = 0x04;
}

/// The fixed-attributes word for a credential suffix digit. The low
/// nibble carries the digit so the on-card reader can pair objects
/// without parsing ids.
pub const fn fixed_attributes(suffix: u8) -> u32 {
    ((suffix - b'0') as u32) & 0x0F
}

/// A two-byte object id: class byte plus suffix digit `'0'..'9'`
pub type SpecId = [u8; 2];

/// One object in the directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSpec {
    /// Object id
    pub id: SpecId,
    /// Object payload; attribute TLVs for attribute classes, the raw
    /// certificate for certificate objects
    pub data: Vec<u8>,
}

impl ObjectSpec {
    /// Create a spec from class, suffix and payload
    pub fn new(class: u8, suffix: u8, data: Vec<u8>) -> Self {
        Self {
            id: [class, suffix],
            data,
        }
    }

    /// Object class byte
    pub const fn class(&self) -> u8 {
        self.id[0]
    }

    /// Suffix digit
    pub const fn suffix(&self) -> u8 {
        self.id[1]
    }

    /// The 4-byte id used on the card
    pub const fn card_id(&self) -> [u8; 4] {
        [self.id[0], self.id[1], 0, 0]
    }
}

/// Append one attribute TLV to a buffer
pub fn put_attribute(buf: &mut Vec<u8>, tag: u8, value: &[u8]) {
    buf.push(tag);
    buf.push((value.len() >> 8) as u8);
    buf.push(value.len() as u8);
    buf.extend_from_slice(value);
}

/// Find the first attribute with `tag`, returning its value
pub fn find_attribute(data: &[u8], tag: u8) -> Option<&[u8]> {
    let mut rest = data;
    while rest.len() >= 3 {
        let t = rest[0];
        let len = ((rest[1] as usize) << 8) | rest[2] as usize;
        let end = 3 + len;
        if rest.len() < end {
            return None;
        }
        if t == tag {
            return Some(&rest[3..end]);
        }
        rest = &rest[end..];
    }
    None
}

/// Remove the first attribute with `tag`, returning its value and the
/// remaining attribute data
fn take_attribute(data: &[u8], tag: u8) -> Option<(Vec<u8>, Vec<u8>)> {
    let mut rest = data;
    let mut consumed = 0usize;
    while rest.len() >= 3 {
        let t = rest[0];
        let len = ((rest[1] as usize) << 8) | rest[2] as usize;
        let end = 3 + len;
        if rest.len() < end {
            return None;
        }
        if t == tag {
            let mut remaining = Vec::with_capacity(data.len() - end);
            remaining.extend_from_slice(&data[..consumed]);
            remaining.extend_from_slice(&rest[end..]);
            return Some((rest[3..end].to_vec(), remaining));
        }
        consumed += end;
        rest = &rest[end..];
    }
    None
}

/// The token's object directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectStore {
    format_version: u16,
    object_version: u8,
    cuid: [u8; 10],
    token_name: String,
    specs: Vec<ObjectSpec>,
}

impl ObjectStore {
    /// Create an empty directory for a token
    pub fn new(cuid: [u8; 10], token_name: &str, object_version: u8) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            object_version,
            cuid,
            token_name: token_name.to_string(),
            specs: Vec::new(),
        }
    }

    /// Generate an object version, retrying until the draw avoids the
    /// reserved rollover value.
    pub fn generate_object_version(mut draw: impl FnMut() -> u8) -> u8 {
        loop {
            let version = draw();
            if version != RESERVED_OBJECT_VERSION {
                return version;
            }
        }
    }

    /// Object version
    pub const fn object_version(&self) -> u8 {
        self.object_version
    }

    /// Bump to a fresh object version
    pub fn set_object_version(&mut self, version: u8) {
        debug_assert_ne!(version, RESERVED_OBJECT_VERSION);
        self.object_version = version;
    }

    /// CUID the directory belongs to
    pub const fn cuid(&self) -> &[u8; 10] {
        &self.cuid
    }

    /// Token display name
    pub fn token_name(&self) -> &str {
        &self.token_name
    }

    /// Number of object specs currently held
    pub fn object_spec_count(&self) -> usize {
        self.specs.len()
    }

    /// All specs in directory order
    pub fn specs(&self) -> &[ObjectSpec] {
        &self.specs
    }

    /// Look up a spec by id
    pub fn get(&self, id: &SpecId) -> Option<&ObjectSpec> {
        self.specs.iter().find(|s| &s.id == id)
    }

    /// Add a spec, replacing any existing spec with the same id.
    ///
    /// The count of distinct ids never exceeds [`MAX_OBJECT_SPECS`].
    pub fn add_object_spec(&mut self, spec: ObjectSpec) -> Result<()> {
        if let Some(existing) = self.specs.iter_mut().find(|s| s.id == spec.id) {
            *existing = spec;
            return Ok(());
        }
        if self.specs.len() >= MAX_OBJECT_SPECS {
            return Err(Error::ObjectDirectoryFull(MAX_OBJECT_SPECS));
        }
        self.specs.push(spec);
        Ok(())
    }

    /// Remove a spec by id; returns whether one was present
    pub fn remove_object_spec(&mut self, id: &SpecId) -> bool {
        let before = self.specs.len();
        self.specs.retain(|s| &s.id != id);
        before != self.specs.len()
    }

    /// The lowest suffix digit not used by any spec of `class`.
    ///
    /// Renewal of encryption credentials allocates here so historical
    /// certificates stay on the token for decrypting old data.
    pub fn next_free_suffix(&self, cls: u8) -> Result<u8> {
        (b'0'..=b'9')
            .find(|d| !self.specs.iter().any(|s| s.class() == cls && s.suffix() == *d))
            .ok_or(Error::ObjectDirectoryFull(MAX_OBJECT_SPECS))
    }

    /// Parse a directory from its on-card serialization
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN + 1 {
            return Err(Error::InvalidObjectData("buffer shorter than header"));
        }

        let format_version = u16::from_be_bytes([buf[0], buf[1]]);
        let object_version = buf[3];
        let mut cuid = [0u8; 10];
        cuid.copy_from_slice(&buf[4..14]);
        let compression = u16::from_be_bytes([buf[14], buf[15]]);
        let region_size = u16::from_be_bytes([buf[16], buf[17]]) as usize;
        let offset = u16::from_be_bytes([buf[18], buf[19]]) as usize;

        let name_len = buf[HEADER_LEN] as usize;
        if buf.len() < HEADER_LEN + 1 + name_len {
            return Err(Error::InvalidObjectData("token name overruns buffer"));
        }
        let token_name = String::from_utf8(buf[HEADER_LEN + 1..HEADER_LEN + 1 + name_len].to_vec())
            .map_err(|_| Error::InvalidObjectData("token name is not UTF-8"))?;

        if buf.len() < offset + region_size {
            return Err(Error::InvalidObjectData("object region overruns buffer"));
        }
        let region_raw = &buf[offset..offset + region_size];

        let region = match compression {
            COMPRESSION_NONE => region_raw.to_vec(),
            COMPRESSION_ZLIB => {
                let mut decoder = ZlibDecoder::new(region_raw);
                let mut out = Vec::new();
                decoder
                    .take((MAX_UNCOMPRESSED + 1) as u64)
                    .read_to_end(&mut out)?;
                if out.len() > MAX_UNCOMPRESSED {
                    return Err(Error::InvalidObjectData("uncompressed region exceeds bound"));
                }
                out
            }
            _ => return Err(Error::InvalidObjectData("unknown compression type")),
        };

        let mut store = Self {
            format_version,
            object_version,
            cuid,
            token_name,
            specs: Vec::new(),
        };
        store.parse_region(&region)?;
        Ok(store)
    }

    fn parse_region(&mut self, region: &[u8]) -> Result<()> {
        if region.len() < 2 {
            return Err(Error::InvalidObjectData("region shorter than object count"));
        }
        let count = u16::from_be_bytes([region[0], region[1]]) as usize;

        let mut rest = &region[2..];
        for _ in 0..count {
            if rest.len() < 6 {
                return Err(Error::InvalidObjectData("truncated object header"));
            }
            let id: SpecId = [rest[0], rest[1]];
            let len = ((rest[4] as usize) << 8) | rest[5] as usize;
            if rest.len() < 6 + len {
                return Err(Error::InvalidObjectData("truncated object data"));
            }
            let data = rest[6..6 + len].to_vec();
            rest = &rest[6 + len..];

            if id[0] == class::CERT_ATTRIBUTES {
                // Split the raw certificate out of the wire blob into
                // its own public object.
                let (value, attrs) = take_attribute(&data, attr::VALUE)
                    .ok_or(Error::InvalidObjectData("certificate object without value"))?;
                self.add_object_spec(ObjectSpec::new(class::CERTIFICATE, id[1], value))?;
                self.add_object_spec(ObjectSpec::new(class::CERT_ATTRIBUTES, id[1], attrs))?;
            } else {
                self.add_object_spec(ObjectSpec { id, data })?;
            }
        }
        Ok(())
    }

    fn build_region(&self) -> Result<Vec<u8>> {
        // Certificate bodies fold back into their attribute objects, so
        // they do not count as wire objects of their own.
        let wire_count = self
            .specs
            .iter()
            .filter(|s| s.class() != class::CERTIFICATE)
            .count();

        let mut region = Vec::new();
        region.push((wire_count >> 8) as u8);
        region.push(wire_count as u8);

        for spec in &self.specs {
            match spec.class() {
                class::CERTIFICATE => continue,
                class::CERT_ATTRIBUTES => {
                    let mut data = spec.data.clone();
                    let body = self
                        .get(&[class::CERTIFICATE, spec.suffix()])
                        .ok_or(Error::InvalidObjectData("certificate attributes without body"))?;
                    put_attribute(&mut data, attr::VALUE, &body.data);
                    Self::put_wire_object(&mut region, spec, &data);
                }
                _ => Self::put_wire_object(&mut region, spec, &spec.data),
            }
        }
        Ok(region)
    }

    fn put_wire_object(region: &mut Vec<u8>, spec: &ObjectSpec, data: &[u8]) {
        region.extend_from_slice(&spec.card_id());
        region.push((data.len() >> 8) as u8);
        region.push(data.len() as u8);
        region.extend_from_slice(data);
    }

    /// Serialize to the on-card layout, optionally zlib compressed
    pub fn serialize(&self, compress: bool) -> Result<Bytes> {
        let region = self.build_region()?;
        if region.len() > MAX_UNCOMPRESSED {
            return Err(Error::InvalidObjectData("object region exceeds card bound"));
        }

        let (compression, region_out) = if compress {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&region)?;
            (COMPRESSION_ZLIB, encoder.finish()?)
        } else {
            (COMPRESSION_NONE, region)
        };

        let offset = HEADER_LEN + 1 + self.token_name.len();
        let mut buf = BytesMut::with_capacity(offset + region_out.len());

        buf.put_u16(self.format_version);
        buf.put_u16(self.object_version as u16);
        buf.put_slice(&self.cuid);
        buf.put_u16(compression);
        buf.put_u16(region_out.len() as u16);
        buf.put_u16(offset as u16);
        buf.put_u8(self.token_name.len() as u8);
        buf.put_slice(self.token_name.as_bytes());
        buf.put_slice(&region_out);

        debug!(
            objects = self.specs.len(),
            compressed = compress,
            bytes = buf.len(),
            "serialized object directory"
        );
        Ok(buf.freeze())
    }
}
