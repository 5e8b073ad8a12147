//! Publications: trusted snapshots of the calendar root.
//!
//! A *publication* pins the calendar root at a specific second. It travels
//! in three shapes: as a TLV record inside a signature or the publications
//! file, as the publications-file entry collection, and as a printable
//! base-32 string distributed out of band (newspapers, RFC 3161 style
//! notices). All three shapes compare equal through [`PublishedData`].

mod base32;
mod file;

pub use base32::{crc32, decode as base32_decode, encode as base32_encode};
pub use file::{CertificateRecord, FileHeader, PublicationsFile};

use crate::error::{KsiError, KsiResult};
use crate::hash::Imprint;
use crate::tlv::Tlv;

/// Container tag of the published data pair.
pub const TAG_PUBLISHED_DATA: u16 = 0x10;
const TAG_PUBLICATION_TIME: u16 = 0x02;
const TAG_PUBLISHED_HASH: u16 = 0x04;

const TAG_PUBLICATION_REFERENCE: u16 = 0x09;
const TAG_REPOSITORY_URI: u16 = 0x0a;

/// Number of output characters between `-` separators in the printable
/// publication string.
const PUBLICATION_STRING_GROUP: usize = 6;

/// The `(publication_time, published_hash)` pair at the heart of every
/// publication shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedData {
    publication_time: u64,
    published_hash: Imprint,
}

impl PublishedData {
    pub fn new(publication_time: u64, published_hash: Imprint) -> Self {
        PublishedData {
            publication_time,
            published_hash,
        }
    }

    pub fn publication_time(&self) -> u64 {
        self.publication_time
    }

    pub fn published_hash(&self) -> &Imprint {
        &self.published_hash
    }

    /// Parses a published-data container element.
    pub fn from_tlv(tlv: Tlv) -> KsiResult<Self> {
        let mut time = None;
        let mut hash = None;
        for child in tlv.into_children()? {
            match child.tag() {
                TAG_PUBLICATION_TIME => time = Some(child.get_uint()?),
                TAG_PUBLISHED_HASH => hash = Some(Imprint::from_wire(child.raw()?)?),
                _ => child.ensure_skippable()?,
            }
        }
        let publication_time =
            time.ok_or_else(|| KsiError::invalid_format("published data without a time"))?;
        let published_hash =
            hash.ok_or_else(|| KsiError::invalid_format("published data without a hash"))?;
        Ok(PublishedData {
            publication_time,
            published_hash,
        })
    }

    pub fn to_tlv(&self) -> KsiResult<Tlv> {
        Tlv::from_nested(
            TAG_PUBLISHED_DATA,
            vec![
                Tlv::from_uint(TAG_PUBLICATION_TIME, self.publication_time)?,
                Tlv::from_raw(TAG_PUBLISHED_HASH, self.published_hash.as_wire())?,
            ],
        )
    }

    /// Renders the printable publication string: base-32 over the 8-byte
    /// big-endian publication time, the published imprint and a CRC-32
    /// tail, grouped with `-` separators.
    pub fn to_publication_string(&self) -> String {
        let mut data = Vec::new();
        data.extend_from_slice(&self.publication_time.to_be_bytes());
        data.extend_from_slice(&self.published_hash.as_wire());
        let crc = crc32(&data);
        data.extend_from_slice(&crc.to_be_bytes());
        base32::encode(&data, PUBLICATION_STRING_GROUP)
    }

    /// Decodes a printable publication string, validating the CRC tail and
    /// the imprint length.
    pub fn from_publication_string(s: &str) -> KsiResult<Self> {
        let data = base32::decode(s)?;
        if data.len() < 8 + 4 + 2 {
            return Err(KsiError::InvalidPublication(
                "publication string is too short".into(),
            ));
        }
        let (body, tail) = data.split_at(data.len() - 4);
        let declared_crc = u32::from_be_bytes([tail[0], tail[1], tail[2], tail[3]]);
        if crc32(body) != declared_crc {
            return Err(KsiError::InvalidPublication(
                "publication string checksum mismatch".into(),
            ));
        }
        let (time_bytes, imprint_bytes) = body.split_at(8);
        let publication_time = u64::from_be_bytes(time_bytes.try_into().expect("split_at(8)"));
        let published_hash = Imprint::from_wire(imprint_bytes)
            .map_err(|e| KsiError::InvalidPublication(e.to_string()))?;
        Ok(PublishedData {
            publication_time,
            published_hash,
        })
    }
}

/// A published-data pair plus the out-of-band references advertising it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicationRecord {
    published_data: PublishedData,
    references: Vec<String>,
    repository_uris: Vec<String>,
}

impl PublicationRecord {
    pub fn new(published_data: PublishedData) -> Self {
        PublicationRecord {
            published_data,
            references: Vec::new(),
            repository_uris: Vec::new(),
        }
    }

    pub fn with_references(mut self, references: Vec<String>) -> Self {
        self.references = references;
        self
    }

    pub fn published_data(&self) -> &PublishedData {
        &self.published_data
    }

    pub fn publication_time(&self) -> u64 {
        self.published_data.publication_time()
    }

    pub fn references(&self) -> &[String] {
        &self.references
    }

    pub fn repository_uris(&self) -> &[String] {
        &self.repository_uris
    }

    /// Parses a publication record; the container tag differs between the
    /// signature and the publications file, so the caller matches it.
    pub fn from_tlv(tlv: Tlv) -> KsiResult<Self> {
        let mut published_data = None;
        let mut references = Vec::new();
        let mut repository_uris = Vec::new();
        for child in tlv.into_children()? {
            match child.tag() {
                TAG_PUBLISHED_DATA => {
                    published_data = Some(PublishedData::from_tlv(child)?);
                }
                TAG_PUBLICATION_REFERENCE => references.push(child.get_utf8()?),
                TAG_REPOSITORY_URI => repository_uris.push(child.get_utf8()?),
                _ => child.ensure_skippable()?,
            }
        }
        let published_data = published_data
            .ok_or_else(|| KsiError::invalid_format("publication record without published data"))?;
        Ok(PublicationRecord {
            published_data,
            references,
            repository_uris,
        })
    }

    pub fn to_tlv(&self, container_tag: u16) -> KsiResult<Tlv> {
        let mut children = vec![self.published_data.to_tlv()?];
        for reference in &self.references {
            children.push(Tlv::from_raw(
                TAG_PUBLICATION_REFERENCE,
                reference.clone().into_bytes(),
            )?);
        }
        for uri in &self.repository_uris {
            children.push(Tlv::from_raw(TAG_REPOSITORY_URI, uri.clone().into_bytes())?);
        }
        Tlv::from_nested(container_tag, children)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::HashAlgorithm;

    fn published(time: u64, fill: u8) -> PublishedData {
        PublishedData::new(
            time,
            Imprint::new(HashAlgorithm::Sha2_256, vec![fill; 32]).unwrap(),
        )
    }

    #[test]
    fn published_data_tlv_round_trip() {
        let data = published(1_405_382_400, 0x5a);
        let tlv = data.to_tlv().unwrap();
        assert_eq!(tlv.tag(), TAG_PUBLISHED_DATA);
        let reparsed = PublishedData::from_tlv(
            Tlv::parse(&tlv.serialize().unwrap()).unwrap(),
        )
        .unwrap();
        assert_eq!(reparsed, data);
    }

    #[test]
    fn publication_string_round_trip() {
        let data = published(1_405_382_400, 0x5a);
        let s = data.to_publication_string();
        assert!(s.contains('-'));
        assert_eq!(PublishedData::from_publication_string(&s).unwrap(), data);
    }

    #[test]
    fn publication_string_rejects_corruption() {
        let data = published(1_405_382_400, 0x5a);
        let s = data.to_publication_string();
        // Swap one payload character for another alphabet character.
        let mut chars: Vec<char> = s.chars().collect();
        let i = chars.iter().position(|&c| c == 'A').unwrap_or(2);
        chars[i] = if chars[i] == 'B' { 'C' } else { 'B' };
        let tampered: String = chars.into_iter().collect();
        assert!(matches!(
            PublishedData::from_publication_string(&tampered),
            Err(KsiError::InvalidPublication(_))
        ));
    }

    #[test]
    fn publication_record_keeps_references() {
        let record = PublicationRecord::new(published(100, 1))
            .with_references(vec!["Financial Times, 2014-07-15".into()]);
        let tlv = record.to_tlv(0x0803).unwrap();
        let reparsed =
            PublicationRecord::from_tlv(Tlv::parse(&tlv.serialize().unwrap()).unwrap()).unwrap();
        assert_eq!(reparsed, record);
        assert_eq!(reparsed.references().len(), 1);
    }
}
