//! The signature container: typed views over the signature TLV.
//!
//! A signature is one or more aggregation hash chains (lowest first),
//! at most one calendar hash chain, and exactly one trust anchor when the
//! calendar chain is present: either a calendar authentication record
//! (PKI-signed, used while the matching publication is pending) or a
//! publication record. A legacy RFC 3161 compatibility record may ride
//! along and is carried opaquely.
//!
//! All structural invariants are checked when the container is parsed or
//! assembled; a constructed [`Signature`] is immutable. Extension never
//! mutates: it yields a new signature with the fresher calendar chain and
//! publication record attached.

use tracing::debug;

use crate::error::{KsiError, KsiResult};
use crate::hash::{HashAlgorithm, Hasher, Imprint};
use crate::hashchain::{self, ChainLink, Direction, LinkSibling};
use crate::publication::{PublicationRecord, PublishedData, TAG_PUBLISHED_DATA};
use crate::tlv::Tlv;

/// Container tag of a complete signature.
pub const TAG_SIGNATURE: u16 = 0x0800;
const TAG_AGGREGATION_CHAIN: u16 = 0x0801;
const TAG_CALENDAR_CHAIN: u16 = 0x0802;
const TAG_PUBLICATION_RECORD: u16 = 0x0803;
const TAG_CALENDAR_AUTH_RECORD: u16 = 0x0805;
const TAG_RFC3161_RECORD: u16 = 0x0806;

const TAG_LINK_LEFT: u16 = 0x07;
const TAG_LINK_RIGHT: u16 = 0x08;

// Aggregation chain members.
const TAG_AGGR_TIME: u16 = 0x02;
const TAG_CHAIN_INDEX: u16 = 0x03;
const TAG_INPUT_DATA: u16 = 0x04;
const TAG_INPUT_HASH: u16 = 0x05;
const TAG_AGGR_ALGORITHM: u16 = 0x06;

// Aggregation link members.
const TAG_LEVEL_CORRECTION: u16 = 0x01;
const TAG_SIBLING_HASH: u16 = 0x02;
const TAG_META_HASH: u16 = 0x03;
const TAG_META_DATA: u16 = 0x04;

// Calendar chain members.
const TAG_CAL_PUBLICATION_TIME: u16 = 0x01;
const TAG_CAL_AGGR_TIME: u16 = 0x02;
const TAG_CAL_INPUT_HASH: u16 = 0x05;

// Signature data (inside the calendar authentication record).
const TAG_SIGNATURE_DATA: u16 = 0x0b;
const TAG_SIG_TYPE: u16 = 0x01;
const TAG_SIG_VALUE: u16 = 0x02;
const TAG_SIG_CERT_ID: u16 = 0x03;
const TAG_SIG_CERT_REPO_URI: u16 = 0x04;

fn tag_for_direction(direction: Direction) -> u16 {
    match direction {
        Direction::Left => TAG_LINK_LEFT,
        Direction::Right => TAG_LINK_RIGHT,
    }
}

/// One aggregation hash chain: the per-second Merkle path from a document
/// (or a lower chain's root) towards the per-second root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationChain {
    aggregation_time: u64,
    chain_index: Vec<u64>,
    input_data: Option<Vec<u8>>,
    input_hash: Imprint,
    algorithm: HashAlgorithm,
    links: Vec<ChainLink>,
}

impl AggregationChain {
    pub fn new(
        aggregation_time: u64,
        chain_index: Vec<u64>,
        input_hash: Imprint,
        algorithm: HashAlgorithm,
        links: Vec<ChainLink>,
    ) -> Self {
        AggregationChain {
            aggregation_time,
            chain_index,
            input_data: None,
            input_hash,
            algorithm,
            links,
        }
    }

    pub fn aggregation_time(&self) -> u64 {
        self.aggregation_time
    }

    pub fn chain_index(&self) -> &[u64] {
        &self.chain_index
    }

    pub fn input_hash(&self) -> &Imprint {
        &self.input_hash
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn links(&self) -> &[ChainLink] {
        &self.links
    }

    /// Folds the chain from its declared input at `start_level`.
    pub fn aggregate(&self, start_level: u8) -> KsiResult<(Imprint, u8)> {
        hashchain::aggregate(&self.links, &self.input_hash, start_level, self.algorithm)
    }

    pub fn from_tlv(tlv: Tlv) -> KsiResult<Self> {
        let mut aggregation_time = None;
        let mut chain_index = Vec::new();
        let mut input_data = None;
        let mut input_hash = None;
        let mut algorithm = None;
        let mut links = Vec::new();

        for child in tlv.into_children()? {
            match child.tag() {
                TAG_AGGR_TIME => aggregation_time = Some(child.get_uint()?),
                TAG_CHAIN_INDEX => chain_index.push(child.get_uint()?),
                TAG_INPUT_DATA => input_data = Some(child.raw()?.to_vec()),
                TAG_INPUT_HASH => input_hash = Some(Imprint::from_wire(child.raw()?)?),
                TAG_AGGR_ALGORITHM => {
                    let id = child.get_uint()?;
                    let id = u8::try_from(id).map_err(|_| {
                        KsiError::invalid_format(format!("hash algorithm id {id} out of range"))
                    })?;
                    algorithm = Some(HashAlgorithm::from_wire(id)?);
                }
                TAG_LINK_LEFT => links.push(Self::parse_link(Direction::Left, child)?),
                TAG_LINK_RIGHT => links.push(Self::parse_link(Direction::Right, child)?),
                _ => child.ensure_skippable()?,
            }
        }

        Ok(AggregationChain {
            aggregation_time: aggregation_time
                .ok_or_else(|| KsiError::invalid_format("aggregation chain without a time"))?,
            chain_index,
            input_data,
            input_hash: input_hash
                .ok_or_else(|| KsiError::invalid_format("aggregation chain without an input hash"))?,
            algorithm: algorithm
                .ok_or_else(|| KsiError::invalid_format("aggregation chain without an algorithm"))?,
            links,
        })
    }

    fn parse_link(direction: Direction, tlv: Tlv) -> KsiResult<ChainLink> {
        let mut level_correction = 0;
        let mut sibling_hash = None;
        let mut meta_hash = None;
        let mut meta_data = None;

        for child in tlv.into_children()? {
            match child.tag() {
                TAG_LEVEL_CORRECTION => level_correction = child.get_uint()?,
                TAG_SIBLING_HASH => sibling_hash = Some(Imprint::from_wire(child.raw()?)?),
                TAG_META_HASH => meta_hash = Some(Imprint::from_wire(child.raw()?)?),
                TAG_META_DATA => meta_data = Some(child.raw()?.to_vec()),
                _ => child.ensure_skippable()?,
            }
        }

        let sibling = match (sibling_hash, meta_hash, meta_data) {
            (Some(imprint), None, None) => LinkSibling::Imprint(imprint),
            (None, Some(imprint), None) => LinkSibling::MetaHash(imprint),
            (None, None, Some(raw)) => LinkSibling::MetaData(raw),
            _ => {
                return Err(KsiError::invalid_format(
                    "hash chain link must carry exactly one content form",
                ));
            }
        };
        Ok(ChainLink::new(direction, level_correction, sibling))
    }

    fn link_to_tlv(link: &ChainLink) -> KsiResult<Tlv> {
        let mut children = Vec::new();
        if link.level_correction != 0 {
            children.push(Tlv::from_uint(TAG_LEVEL_CORRECTION, link.level_correction)?);
        }
        children.push(match &link.sibling {
            LinkSibling::Imprint(imprint) => Tlv::from_raw(TAG_SIBLING_HASH, imprint.as_wire())?,
            LinkSibling::MetaHash(imprint) => Tlv::from_raw(TAG_META_HASH, imprint.as_wire())?,
            LinkSibling::MetaData(raw) => Tlv::from_raw(TAG_META_DATA, raw.clone())?,
        });
        Tlv::from_nested(tag_for_direction(link.direction), children)
    }

    pub fn to_tlv(&self) -> KsiResult<Tlv> {
        let mut children = vec![Tlv::from_uint(TAG_AGGR_TIME, self.aggregation_time)?];
        for index in &self.chain_index {
            children.push(Tlv::from_uint(TAG_CHAIN_INDEX, *index)?);
        }
        if let Some(input_data) = &self.input_data {
            children.push(Tlv::from_raw(TAG_INPUT_DATA, input_data.clone())?);
        }
        children.push(Tlv::from_raw(TAG_INPUT_HASH, self.input_hash.as_wire())?);
        children.push(Tlv::from_uint(
            TAG_AGGR_ALGORITHM,
            u64::from(self.algorithm.wire_id()),
        )?);
        for link in &self.links {
            children.push(Self::link_to_tlv(link)?);
        }
        Tlv::from_nested(TAG_AGGREGATION_CHAIN, children)
    }
}

/// The calendar hash chain: the path from a per-second root to the
/// calendar root published at `publication_time`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarChain {
    publication_time: u64,
    aggregation_time: Option<u64>,
    input_hash: Imprint,
    links: Vec<ChainLink>,
}

impl CalendarChain {
    pub fn new(
        publication_time: u64,
        aggregation_time: Option<u64>,
        input_hash: Imprint,
        links: Vec<ChainLink>,
    ) -> Self {
        CalendarChain {
            publication_time,
            aggregation_time,
            input_hash,
            links,
        }
    }

    pub fn publication_time(&self) -> u64 {
        self.publication_time
    }

    /// The second this chain anchors; defaults to the publication time
    /// when the wire omits it.
    pub fn aggregation_time(&self) -> u64 {
        self.aggregation_time.unwrap_or(self.publication_time)
    }

    pub fn input_hash(&self) -> &Imprint {
        &self.input_hash
    }

    pub fn links(&self) -> &[ChainLink] {
        &self.links
    }

    /// Folds the chain into the calendar root.
    pub fn aggregate(&self) -> KsiResult<Imprint> {
        hashchain::aggregate_calendar(&self.links, &self.input_hash)
    }

    /// Reads the aggregation time out of the chain shape.
    pub fn calculate_aggregation_time(&self) -> KsiResult<u64> {
        hashchain::calendar_aggregation_time(&self.links, self.publication_time)
    }

    pub fn from_tlv(tlv: Tlv) -> KsiResult<Self> {
        let mut publication_time = None;
        let mut aggregation_time = None;
        let mut input_hash = None;
        let mut links = Vec::new();

        for child in tlv.into_children()? {
            match child.tag() {
                TAG_CAL_PUBLICATION_TIME => publication_time = Some(child.get_uint()?),
                TAG_CAL_AGGR_TIME => aggregation_time = Some(child.get_uint()?),
                TAG_CAL_INPUT_HASH => input_hash = Some(Imprint::from_wire(child.raw()?)?),
                TAG_LINK_LEFT | TAG_LINK_RIGHT => {
                    // Calendar links carry the sibling imprint directly.
                    let direction = if child.tag() == TAG_LINK_LEFT {
                        Direction::Left
                    } else {
                        Direction::Right
                    };
                    let imprint = Imprint::from_wire(child.raw()?)?;
                    links.push(ChainLink::new(direction, 0, LinkSibling::Imprint(imprint)));
                }
                _ => child.ensure_skippable()?,
            }
        }

        Ok(CalendarChain {
            publication_time: publication_time
                .ok_or_else(|| KsiError::invalid_format("calendar chain without a publication time"))?,
            aggregation_time,
            input_hash: input_hash
                .ok_or_else(|| KsiError::invalid_format("calendar chain without an input hash"))?,
            links,
        })
    }

    pub fn to_tlv(&self) -> KsiResult<Tlv> {
        let mut children = vec![Tlv::from_uint(TAG_CAL_PUBLICATION_TIME, self.publication_time)?];
        if let Some(aggregation_time) = self.aggregation_time {
            children.push(Tlv::from_uint(TAG_CAL_AGGR_TIME, aggregation_time)?);
        }
        children.push(Tlv::from_raw(TAG_CAL_INPUT_HASH, self.input_hash.as_wire())?);
        for link in &self.links {
            let LinkSibling::Imprint(imprint) = &link.sibling else {
                return Err(KsiError::invalid_format(
                    "calendar chain link without a sibling imprint",
                ));
            };
            children.push(Tlv::from_raw(
                tag_for_direction(link.direction),
                imprint.as_wire(),
            )?);
        }
        Tlv::from_nested(TAG_CALENDAR_CHAIN, children)
    }
}

/// The PKI signature block inside a calendar authentication record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureData {
    pub signature_type: String,
    pub signature_value: Vec<u8>,
    pub certificate_id: Vec<u8>,
    pub cert_repository_uri: Option<String>,
}

impl SignatureData {
    fn from_tlv(tlv: Tlv) -> KsiResult<Self> {
        let mut signature_type = None;
        let mut signature_value = None;
        let mut certificate_id = None;
        let mut cert_repository_uri = None;
        for child in tlv.into_children()? {
            match child.tag() {
                TAG_SIG_TYPE => signature_type = Some(child.get_utf8()?),
                TAG_SIG_VALUE => signature_value = Some(child.raw()?.to_vec()),
                TAG_SIG_CERT_ID => certificate_id = Some(child.raw()?.to_vec()),
                TAG_SIG_CERT_REPO_URI => cert_repository_uri = Some(child.get_utf8()?),
                _ => child.ensure_skippable()?,
            }
        }
        Ok(SignatureData {
            signature_type: signature_type
                .ok_or_else(|| KsiError::invalid_format("signature data without a type"))?,
            signature_value: signature_value
                .ok_or_else(|| KsiError::invalid_format("signature data without a value"))?,
            certificate_id: certificate_id
                .ok_or_else(|| KsiError::invalid_format("signature data without a certificate id"))?,
            cert_repository_uri,
        })
    }

    fn to_tlv(&self) -> KsiResult<Tlv> {
        let mut children = vec![
            Tlv::from_raw(TAG_SIG_TYPE, self.signature_type.clone().into_bytes())?,
            Tlv::from_raw(TAG_SIG_VALUE, self.signature_value.clone())?,
            Tlv::from_raw(TAG_SIG_CERT_ID, self.certificate_id.clone())?,
        ];
        if let Some(uri) = &self.cert_repository_uri {
            children.push(Tlv::from_raw(TAG_SIG_CERT_REPO_URI, uri.clone().into_bytes())?);
        }
        Tlv::from_nested(TAG_SIGNATURE_DATA, children)
    }
}

/// PKI-signed statement of the calendar root at a given second, standing
/// in for a publication record until the real publication appears.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarAuthRecord {
    pub published_data: PublishedData,
    pub signature_data: SignatureData,
}

impl CalendarAuthRecord {
    pub fn from_tlv(tlv: Tlv) -> KsiResult<Self> {
        let mut published_data = None;
        let mut signature_data = None;
        for child in tlv.into_children()? {
            match child.tag() {
                TAG_PUBLISHED_DATA => published_data = Some(PublishedData::from_tlv(child)?),
                TAG_SIGNATURE_DATA => signature_data = Some(SignatureData::from_tlv(child)?),
                _ => child.ensure_skippable()?,
            }
        }
        Ok(CalendarAuthRecord {
            published_data: published_data.ok_or_else(|| {
                KsiError::invalid_format("calendar authentication record without published data")
            })?,
            signature_data: signature_data.ok_or_else(|| {
                KsiError::invalid_format("calendar authentication record without signature data")
            })?,
        })
    }

    pub fn to_tlv(&self) -> KsiResult<Tlv> {
        Tlv::from_nested(
            TAG_CALENDAR_AUTH_RECORD,
            vec![self.published_data.to_tlv()?, self.signature_data.to_tlv()?],
        )
    }
}

/// A complete keyless signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    aggregation_chains: Vec<AggregationChain>,
    calendar_chain: Option<CalendarChain>,
    calendar_auth_record: Option<CalendarAuthRecord>,
    publication_record: Option<PublicationRecord>,
    rfc3161_record: Option<Tlv>,
}

impl Signature {
    /// Assembles a signature from parts, enforcing the structural
    /// invariants. Aggregation chains may be given in any order; they are
    /// sorted lowest-first (longest chain index first).
    pub fn from_parts(
        mut aggregation_chains: Vec<AggregationChain>,
        calendar_chain: Option<CalendarChain>,
        calendar_auth_record: Option<CalendarAuthRecord>,
        publication_record: Option<PublicationRecord>,
        rfc3161_record: Option<Tlv>,
    ) -> KsiResult<Self> {
        if aggregation_chains.is_empty() {
            return Err(KsiError::InvalidSignature(
                "signature without an aggregation chain".into(),
            ));
        }
        aggregation_chains.sort_by(|a, b| b.chain_index().len().cmp(&a.chain_index().len()));
        for pair in aggregation_chains.windows(2) {
            let (lower, higher) = (&pair[0], &pair[1]);
            if !lower.chain_index().starts_with(higher.chain_index()) {
                return Err(KsiError::InvalidSignature(
                    "aggregation chain indices do not form a consistent path".into(),
                ));
            }
        }

        match (&calendar_chain, &calendar_auth_record, &publication_record) {
            (None, None, None) => {}
            (None, _, _) => {
                return Err(KsiError::InvalidSignature(
                    "trust anchor without a calendar chain".into(),
                ));
            }
            (Some(_), Some(_), Some(_)) => {
                return Err(KsiError::InvalidSignature(
                    "signature carries both a calendar authentication record and a publication record"
                        .into(),
                ));
            }
            (Some(_), None, None) => {
                return Err(KsiError::InvalidSignature(
                    "calendar chain without a calendar authentication record or publication record"
                        .into(),
                ));
            }
            (Some(_), Some(_), None) | (Some(_), None, Some(_)) => {}
        }

        Ok(Signature {
            aggregation_chains,
            calendar_chain,
            calendar_auth_record,
            publication_record,
            rfc3161_record,
        })
    }

    /// Parses a serialized signature container.
    pub fn parse(data: &[u8]) -> KsiResult<Self> {
        let tlv = Tlv::parse(data)?;
        Self::from_tlv(tlv)
    }

    pub fn from_tlv(tlv: Tlv) -> KsiResult<Self> {
        if tlv.tag() != TAG_SIGNATURE {
            return Err(KsiError::invalid_format(format!(
                "expected signature container, got TLV[{:#06x}]",
                tlv.tag()
            )));
        }
        Self::from_content_tlvs(tlv.into_children()?)
    }

    /// Builds a signature out of the container's child elements; also the
    /// entry point for aggregation responses, which carry the same
    /// children without the outer container.
    pub fn from_content_tlvs(children: Vec<Tlv>) -> KsiResult<Self> {
        let mut aggregation_chains = Vec::new();
        let mut calendar_chain = None;
        let mut calendar_auth_record = None;
        let mut publication_record = None;
        let mut rfc3161_record = None;

        for child in children {
            match child.tag() {
                TAG_AGGREGATION_CHAIN => {
                    aggregation_chains.push(AggregationChain::from_tlv(child)?);
                }
                TAG_CALENDAR_CHAIN => {
                    if calendar_chain.is_some() {
                        return Err(KsiError::invalid_format("duplicate calendar chain"));
                    }
                    calendar_chain = Some(CalendarChain::from_tlv(child)?);
                }
                TAG_CALENDAR_AUTH_RECORD => {
                    if calendar_auth_record.is_some() {
                        return Err(KsiError::invalid_format(
                            "duplicate calendar authentication record",
                        ));
                    }
                    calendar_auth_record = Some(CalendarAuthRecord::from_tlv(child)?);
                }
                TAG_PUBLICATION_RECORD => {
                    if publication_record.is_some() {
                        return Err(KsiError::invalid_format("duplicate publication record"));
                    }
                    publication_record = Some(PublicationRecord::from_tlv(child)?);
                }
                TAG_RFC3161_RECORD => rfc3161_record = Some(child),
                _ => child.ensure_skippable()?,
            }
        }

        let signature = Self::from_parts(
            aggregation_chains,
            calendar_chain,
            calendar_auth_record,
            publication_record,
            rfc3161_record,
        )?;
        debug!(
            signing_time = signature.signing_time(),
            chains = signature.aggregation_chains.len(),
            "parsed signature"
        );
        Ok(signature)
    }

    pub fn to_tlv(&self) -> KsiResult<Tlv> {
        let mut children = Vec::new();
        for chain in &self.aggregation_chains {
            children.push(chain.to_tlv()?);
        }
        if let Some(chain) = &self.calendar_chain {
            children.push(chain.to_tlv()?);
        }
        if let Some(record) = &self.publication_record {
            children.push(record.to_tlv(TAG_PUBLICATION_RECORD)?);
        }
        if let Some(record) = &self.calendar_auth_record {
            children.push(record.to_tlv()?);
        }
        if let Some(record) = &self.rfc3161_record {
            children.push(record.clone());
        }
        Tlv::from_nested(TAG_SIGNATURE, children)
    }

    pub fn serialize(&self) -> KsiResult<Vec<u8>> {
        self.to_tlv()?.serialize()
    }

    /// Aggregation chains, lowest first.
    pub fn aggregation_chains(&self) -> &[AggregationChain] {
        &self.aggregation_chains
    }

    pub fn calendar_chain(&self) -> Option<&CalendarChain> {
        self.calendar_chain.as_ref()
    }

    pub fn calendar_auth_record(&self) -> Option<&CalendarAuthRecord> {
        self.calendar_auth_record.as_ref()
    }

    pub fn publication_record(&self) -> Option<&PublicationRecord> {
        self.publication_record.as_ref()
    }

    pub fn rfc3161_record(&self) -> Option<&Tlv> {
        self.rfc3161_record.as_ref()
    }

    /// The second the document hash was aggregated: the lowest chain's
    /// aggregation time.
    pub fn signing_time(&self) -> u64 {
        self.aggregation_chains[0].aggregation_time()
    }

    /// The hash the signature binds: the lowest chain's input.
    pub fn input_hash(&self) -> &Imprint {
        self.aggregation_chains[0].input_hash()
    }

    /// Algorithm of the bound document hash.
    pub fn document_hash_algorithm(&self) -> HashAlgorithm {
        self.input_hash().algorithm()
    }

    /// Opens a hasher suitable for re-hashing the signed document.
    pub fn create_hasher(&self) -> KsiResult<Hasher> {
        Hasher::open(self.document_hash_algorithm())
    }

    /// Folds every aggregation chain in order, starting at level 0 and
    /// threading each end level into the next chain. The result is the
    /// input the calendar chain anchors.
    pub fn aggregate_chains(&self) -> KsiResult<(Imprint, u8)> {
        let mut level = 0u8;
        let mut output: Option<Imprint> = None;
        for chain in &self.aggregation_chains {
            let (out, end_level) = chain.aggregate(level)?;
            level = end_level;
            output = Some(out);
        }
        Ok((output.expect("at least one aggregation chain"), level))
    }

    /// Derives the calendar root by folding the calendar chain.
    pub fn calendar_root(&self) -> KsiResult<Imprint> {
        let chain = self
            .calendar_chain
            .as_ref()
            .ok_or_else(|| KsiError::InvalidSignature("signature has no calendar chain".into()))?;
        chain.aggregate()
    }

    /// Produces the extended signature: same aggregation chains, the
    /// responder's calendar chain, the target publication record, and no
    /// calendar authentication record. `self` is unchanged.
    pub fn extend(
        &self,
        calendar_chain: CalendarChain,
        publication_record: PublicationRecord,
    ) -> KsiResult<Signature> {
        if publication_record.publication_time() < self.signing_time() {
            return Err(KsiError::InvalidPublication(
                "publication precedes the signing time".into(),
            ));
        }
        if calendar_chain.publication_time() != publication_record.publication_time() {
            return Err(KsiError::InvalidPublication(
                "calendar chain does not reach the publication time".into(),
            ));
        }
        if calendar_chain.aggregation_time() != self.signing_time() {
            return Err(KsiError::ExtendWrongCalChain);
        }
        let (aggregation_output, _) = self.aggregate_chains()?;
        if calendar_chain.input_hash() != &aggregation_output {
            return Err(KsiError::ExtendWrongCalChain);
        }

        debug!(
            signing_time = self.signing_time(),
            publication_time = publication_record.publication_time(),
            "extending signature"
        );

        Signature::from_parts(
            self.aggregation_chains.clone(),
            Some(calendar_chain),
            None,
            Some(publication_record),
            self.rfc3161_record.clone(),
        )
    }
}
