//! The publications file: the periodically re-issued collection of every
//! publication to date, signed as a whole.
//!
//! Layout on the wire: an 8-byte magic, a header element, certificate
//! records, publication records, and finally a CMS signature over every
//! byte that precedes it. The header must come first and the signature
//! last; anything after the signature would escape the signed span and is
//! rejected.

use tracing::debug;

use super::PublicationRecord;
use crate::error::{KsiError, KsiResult};
use crate::provider::PkiVerifier;
use crate::tlv::Tlv;

/// File magic preceding the TLV sequence.
pub const PUBLICATIONS_FILE_MAGIC: &[u8; 8] = b"KSIPUBLF";

const TAG_HEADER: u16 = 0x0701;
const TAG_CERTIFICATE_RECORD: u16 = 0x0702;
const TAG_PUBLICATION_RECORD: u16 = 0x0703;
const TAG_CMS_SIGNATURE: u16 = 0x0704;

const TAG_HEADER_VERSION: u16 = 0x01;
const TAG_HEADER_CREATION_TIME: u16 = 0x02;
const TAG_HEADER_REPOSITORY_URI: u16 = 0x03;

const TAG_CERT_ID: u16 = 0x01;
const TAG_CERT_VALUE: u16 = 0x02;

/// Header metadata of a publications file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub version: u64,
    pub creation_time: u64,
    pub repository_uri: Option<String>,
}

/// An X.509 certificate the file distributes for authentication-record
/// checking, keyed by its short identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRecord {
    pub certificate_id: Vec<u8>,
    pub certificate: Vec<u8>,
}

/// A parsed publications file, retaining the raw bytes so the signed span
/// can be handed to the PKI verifier unaltered.
#[derive(Debug, Clone)]
pub struct PublicationsFile {
    header: FileHeader,
    certificates: Vec<CertificateRecord>,
    publications: Vec<PublicationRecord>,
    cms_signature: Vec<u8>,
    raw: Vec<u8>,
    signed_len: usize,
}

impl PublicationsFile {
    pub fn parse(data: &[u8]) -> KsiResult<Self> {
        let body = data
            .strip_prefix(PUBLICATIONS_FILE_MAGIC.as_slice())
            .ok_or_else(|| KsiError::invalid_format("missing publications file magic"))?;

        let mut header = None;
        let mut certificates = Vec::new();
        let mut publications: Vec<PublicationRecord> = Vec::new();
        let mut cms_signature = None;
        let mut signed_len = None;

        for element in Tlv::parse_sequence(body)? {
            if cms_signature.is_some() {
                return Err(KsiError::invalid_format(
                    "element after the publications file signature",
                ));
            }
            match element.tag() {
                TAG_HEADER => {
                    if header.is_some() {
                        return Err(KsiError::invalid_format("duplicate publications file header"));
                    }
                    if !(certificates.is_empty() && publications.is_empty()) {
                        return Err(KsiError::invalid_format(
                            "publications file header is not the first element",
                        ));
                    }
                    header = Some(Self::parse_header(element)?);
                }
                TAG_CERTIFICATE_RECORD => {
                    certificates.push(Self::parse_certificate(element)?);
                }
                TAG_PUBLICATION_RECORD => {
                    let record = PublicationRecord::from_tlv(element)?;
                    if let Some(previous) = publications.last()
                        && record.publication_time() < previous.publication_time()
                    {
                        return Err(KsiError::invalid_format(
                            "publication records out of time order",
                        ));
                    }
                    publications.push(record);
                }
                TAG_CMS_SIGNATURE => {
                    // The signed span ends where the signature element starts.
                    signed_len = element
                        .absolute_offset()
                        .map(|off| PUBLICATIONS_FILE_MAGIC.len() + off);
                    cms_signature = Some(element.raw()?.to_vec());
                }
                _ => element.ensure_skippable()?,
            }
        }

        let header =
            header.ok_or_else(|| KsiError::invalid_format("publications file without a header"))?;
        let cms_signature = cms_signature
            .ok_or_else(|| KsiError::invalid_format("publications file without a signature"))?;
        let signed_len = signed_len.expect("signature element carries a parse offset");

        debug!(
            publications = publications.len(),
            certificates = certificates.len(),
            creation_time = header.creation_time,
            "parsed publications file"
        );

        Ok(PublicationsFile {
            header,
            certificates,
            publications,
            cms_signature,
            raw: data.to_vec(),
            signed_len,
        })
    }

    fn parse_header(tlv: Tlv) -> KsiResult<FileHeader> {
        let mut version = None;
        let mut creation_time = None;
        let mut repository_uri = None;
        for child in tlv.into_children()? {
            match child.tag() {
                TAG_HEADER_VERSION => version = Some(child.get_uint()?),
                TAG_HEADER_CREATION_TIME => creation_time = Some(child.get_uint()?),
                TAG_HEADER_REPOSITORY_URI => repository_uri = Some(child.get_utf8()?),
                _ => child.ensure_skippable()?,
            }
        }
        Ok(FileHeader {
            version: version
                .ok_or_else(|| KsiError::invalid_format("publications file header version missing"))?,
            creation_time: creation_time.ok_or_else(|| {
                KsiError::invalid_format("publications file header creation time missing")
            })?,
            repository_uri,
        })
    }

    fn parse_certificate(tlv: Tlv) -> KsiResult<CertificateRecord> {
        let mut certificate_id = None;
        let mut certificate = None;
        for child in tlv.into_children()? {
            match child.tag() {
                TAG_CERT_ID => certificate_id = Some(child.raw()?.to_vec()),
                TAG_CERT_VALUE => certificate = Some(child.raw()?.to_vec()),
                _ => child.ensure_skippable()?,
            }
        }
        Ok(CertificateRecord {
            certificate_id: certificate_id
                .ok_or_else(|| KsiError::invalid_format("certificate record without an id"))?,
            certificate: certificate
                .ok_or_else(|| KsiError::invalid_format("certificate record without a value"))?,
        })
    }

    /// Serializes a publications file from parts; used by fixtures and by
    /// the cache when persisting a fetched file.
    pub fn compose(
        header: FileHeader,
        certificates: Vec<CertificateRecord>,
        publications: Vec<PublicationRecord>,
        cms_signature: Vec<u8>,
    ) -> KsiResult<Self> {
        let mut data = PUBLICATIONS_FILE_MAGIC.to_vec();
        let mut header_children = vec![
            Tlv::from_uint(TAG_HEADER_VERSION, header.version)?,
            Tlv::from_uint(TAG_HEADER_CREATION_TIME, header.creation_time)?,
        ];
        if let Some(uri) = &header.repository_uri {
            header_children.push(Tlv::from_raw(
                TAG_HEADER_REPOSITORY_URI,
                uri.clone().into_bytes(),
            )?);
        }
        data.extend(Tlv::from_nested(TAG_HEADER, header_children)?.serialize()?);

        for cert in &certificates {
            data.extend(
                Tlv::from_nested(
                    TAG_CERTIFICATE_RECORD,
                    vec![
                        Tlv::from_raw(TAG_CERT_ID, cert.certificate_id.clone())?,
                        Tlv::from_raw(TAG_CERT_VALUE, cert.certificate.clone())?,
                    ],
                )?
                .serialize()?,
            );
        }
        for record in &publications {
            data.extend(record.to_tlv(TAG_PUBLICATION_RECORD)?.serialize()?);
        }

        let signed_len = data.len();
        data.extend(Tlv::from_raw(TAG_CMS_SIGNATURE, cms_signature.clone())?.serialize()?);

        Ok(PublicationsFile {
            header,
            certificates,
            publications,
            cms_signature,
            raw: data,
            signed_len,
        })
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    pub fn publications(&self) -> &[PublicationRecord] {
        &self.publications
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// The exact publication at `time`, if the file carries one.
    pub fn publication_at(&self, time: u64) -> Option<&PublicationRecord> {
        self.publications
            .iter()
            .find(|record| record.publication_time() == time)
    }

    /// The earliest publication at or after `time`: the natural extension
    /// target for a signature created at `time`.
    pub fn nearest_publication(&self, time: u64) -> Option<&PublicationRecord> {
        self.publications
            .iter()
            .filter(|record| record.publication_time() >= time)
            .min_by_key(|record| record.publication_time())
    }

    /// The latest publication not newer than `time`.
    pub fn latest_publication(&self, time: u64) -> Option<&PublicationRecord> {
        self.publications
            .iter()
            .filter(|record| record.publication_time() <= time)
            .max_by_key(|record| record.publication_time())
    }

    /// Looks a distributed certificate up by its identifier.
    pub fn certificate_by_id(&self, certificate_id: &[u8]) -> Option<&CertificateRecord> {
        self.certificates
            .iter()
            .find(|record| record.certificate_id == certificate_id)
    }

    /// Validates the CMS signature over the signed span through the
    /// embedder's trust store.
    pub fn verify(
        &self,
        pki: &dyn PkiVerifier,
        expected_cert_email: Option<&str>,
    ) -> KsiResult<()> {
        pki.verify_cms(
            &self.raw[..self.signed_len],
            &self.cms_signature,
            expected_cert_email,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{HashAlgorithm, Imprint};
    use crate::publication::PublishedData;

    fn record(time: u64, fill: u8) -> PublicationRecord {
        PublicationRecord::new(PublishedData::new(
            time,
            Imprint::new(HashAlgorithm::Sha2_256, vec![fill; 32]).unwrap(),
        ))
    }

    fn sample_file() -> PublicationsFile {
        PublicationsFile::compose(
            FileHeader {
                version: 1,
                creation_time: 4000,
                repository_uri: Some("http://publications.example".into()),
            },
            vec![CertificateRecord {
                certificate_id: vec![0x01, 0x02],
                certificate: vec![0x30, 0x82],
            }],
            vec![record(1000, 1), record(2000, 2), record(3000, 3)],
            vec![0xde, 0xad],
        )
        .unwrap()
    }

    #[test]
    fn compose_parse_round_trip() {
        let file = sample_file();
        let reparsed = PublicationsFile::parse(file.as_bytes()).unwrap();
        assert_eq!(reparsed.header(), file.header());
        assert_eq!(reparsed.publications(), file.publications());
        assert_eq!(reparsed.signed_len, file.signed_len);
        assert_eq!(reparsed.cms_signature, file.cms_signature);
    }

    #[test]
    fn signed_span_excludes_signature_element() {
        let file = sample_file();
        // The span covers the magic and stops exactly where the signature
        // element's header begins.
        assert!(file.signed_len < file.raw.len());
        let sig_tlv = Tlv::parse(&file.raw[file.signed_len..]).unwrap();
        assert_eq!(sig_tlv.tag(), TAG_CMS_SIGNATURE);
    }

    #[test]
    fn publication_queries() {
        let file = sample_file();
        assert_eq!(file.publication_at(2000).unwrap().publication_time(), 2000);
        assert!(file.publication_at(2001).is_none());
        assert_eq!(
            file.nearest_publication(1001).unwrap().publication_time(),
            2000
        );
        assert_eq!(
            file.nearest_publication(3000).unwrap().publication_time(),
            3000
        );
        assert!(file.nearest_publication(3001).is_none());
        assert_eq!(
            file.latest_publication(2999).unwrap().publication_time(),
            2000
        );
        assert!(file.certificate_by_id(&[0x01, 0x02]).is_some());
        assert!(file.certificate_by_id(&[0xff]).is_none());
    }

    #[test]
    fn rejects_missing_magic_and_misplaced_elements() {
        assert!(PublicationsFile::parse(b"NOTMAGIC").is_err());

        let file = sample_file();
        // Append a stray element after the signature.
        let mut data = file.as_bytes().to_vec();
        data.extend(Tlv::from_uint(0x05, 1).unwrap().serialize().unwrap());
        assert!(PublicationsFile::parse(&data).is_err());
    }

    #[test]
    fn rejects_out_of_order_publications() {
        let bad = PublicationsFile::compose(
            FileHeader {
                version: 1,
                creation_time: 0,
                repository_uri: None,
            },
            vec![],
            vec![record(2000, 2), record(1000, 1)],
            vec![0x00],
        );
        // Compose itself does not sort; parsing the bytes back flags it.
        let bytes = bad.unwrap().raw;
        assert!(PublicationsFile::parse(&bytes).is_err());
    }
}
