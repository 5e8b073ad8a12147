//! Protocol data units exchanged with the aggregation and extension
//! services.
//!
//! Every PDU is a TLV container holding a header (instance, message and
//! login identification), a request or response payload, optionally an
//! error payload, and an HMAC imprint keyed by the shared service secret.
//! The HMAC covers the serialized PDU with the HMAC element itself left
//! out, so either side can recompute it from what it received.

use tracing::debug;

use crate::error::{KsiError, KsiResult};
use crate::hash::{self, HashAlgorithm, Imprint};
use crate::signature::CalendarChain;
use crate::tlv::Tlv;

pub const TAG_AGGREGATION_PDU: u16 = 0x0200;
const TAG_AGGREGATION_REQUEST: u16 = 0x0201;
const TAG_AGGREGATION_RESPONSE: u16 = 0x0202;
const TAG_AGGREGATION_ERROR: u16 = 0x0203;

pub const TAG_EXTEND_PDU: u16 = 0x0300;
const TAG_EXTEND_REQUEST: u16 = 0x0301;
const TAG_EXTEND_RESPONSE: u16 = 0x0302;
const TAG_EXTEND_ERROR: u16 = 0x0303;

const TAG_HEADER: u16 = 0x01;
const TAG_HMAC: u16 = 0x1f;

const TAG_LOGIN_ID: u16 = 0x01;
const TAG_INSTANCE_ID: u16 = 0x05;
const TAG_MESSAGE_ID: u16 = 0x06;

const TAG_REQUEST_ID: u16 = 0x01;
const TAG_REQUEST_HASH: u16 = 0x02;
const TAG_REQUEST_LEVEL: u16 = 0x03;

const TAG_STATUS: u16 = 0x04;
const TAG_ERROR_MESSAGE: u16 = 0x05;

const TAG_EXTEND_START_TIME: u16 = 0x10;
const TAG_EXTEND_END_TIME: u16 = 0x11;
const TAG_EXTEND_LAST_TIME: u16 = 0x10;
const TAG_CALENDAR_CHAIN: u16 = 0x0802;

/// Identification header present in every PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PduHeader {
    pub login_id: String,
    pub instance_id: Option<u64>,
    pub message_id: Option<u64>,
}

impl PduHeader {
    pub fn new(login_id: impl Into<String>) -> Self {
        PduHeader {
            login_id: login_id.into(),
            instance_id: None,
            message_id: None,
        }
    }

    fn from_tlv(tlv: Tlv) -> KsiResult<Self> {
        let mut login_id = None;
        let mut instance_id = None;
        let mut message_id = None;
        for child in tlv.into_children()? {
            match child.tag() {
                TAG_LOGIN_ID => login_id = Some(child.get_utf8()?),
                TAG_INSTANCE_ID => instance_id = Some(child.get_uint()?),
                TAG_MESSAGE_ID => message_id = Some(child.get_uint()?),
                _ => child.ensure_skippable()?,
            }
        }
        Ok(PduHeader {
            login_id: login_id
                .ok_or_else(|| KsiError::invalid_format("PDU header without a login id"))?,
            instance_id,
            message_id,
        })
    }

    fn to_tlv(&self) -> KsiResult<Tlv> {
        let mut children = vec![Tlv::from_raw(
            TAG_LOGIN_ID,
            self.login_id.clone().into_bytes(),
        )?];
        if let Some(instance_id) = self.instance_id {
            children.push(Tlv::from_uint(TAG_INSTANCE_ID, instance_id)?);
        }
        if let Some(message_id) = self.message_id {
            children.push(Tlv::from_uint(TAG_MESSAGE_ID, message_id)?);
        }
        Tlv::from_nested(TAG_HEADER, children)
    }
}

/// Error payload of a service answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorPdu {
    pub status: u64,
    pub message: String,
}

impl ErrorPdu {
    fn from_tlv(tlv: Tlv) -> KsiResult<Self> {
        let mut status = None;
        let mut message = None;
        for child in tlv.into_children()? {
            match child.tag() {
                TAG_STATUS => status = Some(child.get_uint()?),
                TAG_ERROR_MESSAGE => message = Some(child.get_utf8()?),
                _ => child.ensure_skippable()?,
            }
        }
        Ok(ErrorPdu {
            status: status.ok_or_else(|| KsiError::invalid_format("error payload without a status"))?,
            message: message.unwrap_or_default(),
        })
    }

    fn to_tlv(&self, tag: u16) -> KsiResult<Tlv> {
        Tlv::from_nested(
            tag,
            vec![
                Tlv::from_uint(TAG_STATUS, self.status)?,
                Tlv::from_raw(TAG_ERROR_MESSAGE, self.message.clone().into_bytes())?,
            ],
        )
    }
}

/// A signing request: bind `request_hash` into the current round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationReq {
    pub request_id: u64,
    pub request_hash: Imprint,
    pub request_level: Option<u64>,
}

impl AggregationReq {
    fn from_tlv(tlv: Tlv) -> KsiResult<Self> {
        let mut request_id = None;
        let mut request_hash = None;
        let mut request_level = None;
        for child in tlv.into_children()? {
            match child.tag() {
                TAG_REQUEST_ID => request_id = Some(child.get_uint()?),
                TAG_REQUEST_HASH => request_hash = Some(Imprint::from_wire(child.raw()?)?),
                TAG_REQUEST_LEVEL => request_level = Some(child.get_uint()?),
                _ => child.ensure_skippable()?,
            }
        }
        Ok(AggregationReq {
            request_id: request_id
                .ok_or_else(|| KsiError::invalid_format("aggregation request without an id"))?,
            request_hash: request_hash
                .ok_or_else(|| KsiError::invalid_format("aggregation request without a hash"))?,
            request_level,
        })
    }

    fn to_tlv(&self) -> KsiResult<Tlv> {
        let mut children = vec![
            Tlv::from_uint(TAG_REQUEST_ID, self.request_id)?,
            Tlv::from_raw(TAG_REQUEST_HASH, self.request_hash.as_wire())?,
        ];
        if let Some(level) = self.request_level {
            children.push(Tlv::from_uint(TAG_REQUEST_LEVEL, level)?);
        }
        Tlv::from_nested(TAG_AGGREGATION_REQUEST, children)
    }
}

/// A signing answer: status plus the signature component elements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationResp {
    pub request_id: u64,
    pub status: u64,
    pub error_message: Option<String>,
    /// Signature component elements (aggregation chains, calendar chain,
    /// trust anchor), kept as TLVs for assembly into a signature.
    pub content: Vec<Tlv>,
}

impl AggregationResp {
    fn from_tlv(tlv: Tlv) -> KsiResult<Self> {
        let mut request_id = None;
        let mut status = None;
        let mut error_message = None;
        let mut content = Vec::new();
        for child in tlv.into_children()? {
            match child.tag() {
                TAG_REQUEST_ID => request_id = Some(child.get_uint()?),
                TAG_STATUS => status = Some(child.get_uint()?),
                TAG_ERROR_MESSAGE => error_message = Some(child.get_utf8()?),
                0x0800..=0x0806 => content.push(child),
                _ => child.ensure_skippable()?,
            }
        }
        Ok(AggregationResp {
            request_id: request_id
                .ok_or_else(|| KsiError::invalid_format("aggregation response without an id"))?,
            status: status
                .ok_or_else(|| KsiError::invalid_format("aggregation response without a status"))?,
            error_message,
            content,
        })
    }

    fn to_tlv(&self) -> KsiResult<Tlv> {
        let mut children = vec![
            Tlv::from_uint(TAG_REQUEST_ID, self.request_id)?,
            Tlv::from_uint(TAG_STATUS, self.status)?,
        ];
        if let Some(message) = &self.error_message {
            children.push(Tlv::from_raw(TAG_ERROR_MESSAGE, message.clone().into_bytes())?);
        }
        children.extend(self.content.iter().cloned());
        Tlv::from_nested(TAG_AGGREGATION_RESPONSE, children)
    }
}

/// An extension request: a calendar chain from `aggregation_time` up to
/// `publication_time` (the service's latest round when omitted).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendReq {
    pub request_id: u64,
    pub aggregation_time: u64,
    pub publication_time: Option<u64>,
}

impl ExtendReq {
    fn from_tlv(tlv: Tlv) -> KsiResult<Self> {
        let mut request_id = None;
        let mut aggregation_time = None;
        let mut publication_time = None;
        for child in tlv.into_children()? {
            match child.tag() {
                TAG_REQUEST_ID => request_id = Some(child.get_uint()?),
                TAG_EXTEND_START_TIME => aggregation_time = Some(child.get_uint()?),
                TAG_EXTEND_END_TIME => publication_time = Some(child.get_uint()?),
                _ => child.ensure_skippable()?,
            }
        }
        Ok(ExtendReq {
            request_id: request_id
                .ok_or_else(|| KsiError::invalid_format("extend request without an id"))?,
            aggregation_time: aggregation_time
                .ok_or_else(|| KsiError::invalid_format("extend request without a start time"))?,
            publication_time,
        })
    }

    fn to_tlv(&self) -> KsiResult<Tlv> {
        let mut children = vec![
            Tlv::from_uint(TAG_REQUEST_ID, self.request_id)?,
            Tlv::from_uint(TAG_EXTEND_START_TIME, self.aggregation_time)?,
        ];
        if let Some(publication_time) = self.publication_time {
            children.push(Tlv::from_uint(TAG_EXTEND_END_TIME, publication_time)?);
        }
        Tlv::from_nested(TAG_EXTEND_REQUEST, children)
    }
}

/// An extension answer: status plus the requested calendar chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendResp {
    pub request_id: u64,
    pub status: u64,
    pub error_message: Option<String>,
    /// Latest second the service could have extended to.
    pub last_time: Option<u64>,
    pub calendar_chain: Option<CalendarChain>,
}

impl ExtendResp {
    fn from_tlv(tlv: Tlv) -> KsiResult<Self> {
        let mut request_id = None;
        let mut status = None;
        let mut error_message = None;
        let mut last_time = None;
        let mut calendar_chain = None;
        for child in tlv.into_children()? {
            match child.tag() {
                TAG_REQUEST_ID => request_id = Some(child.get_uint()?),
                TAG_STATUS => status = Some(child.get_uint()?),
                TAG_ERROR_MESSAGE => error_message = Some(child.get_utf8()?),
                TAG_EXTEND_LAST_TIME => last_time = Some(child.get_uint()?),
                TAG_CALENDAR_CHAIN => calendar_chain = Some(CalendarChain::from_tlv(child)?),
                _ => child.ensure_skippable()?,
            }
        }
        Ok(ExtendResp {
            request_id: request_id
                .ok_or_else(|| KsiError::invalid_format("extend response without an id"))?,
            status: status
                .ok_or_else(|| KsiError::invalid_format("extend response without a status"))?,
            error_message,
            last_time,
            calendar_chain,
        })
    }

    fn to_tlv(&self) -> KsiResult<Tlv> {
        let mut children = vec![
            Tlv::from_uint(TAG_REQUEST_ID, self.request_id)?,
            Tlv::from_uint(TAG_STATUS, self.status)?,
        ];
        if let Some(message) = &self.error_message {
            children.push(Tlv::from_raw(TAG_ERROR_MESSAGE, message.clone().into_bytes())?);
        }
        if let Some(last_time) = self.last_time {
            children.push(Tlv::from_uint(TAG_EXTEND_LAST_TIME, last_time)?);
        }
        if let Some(chain) = &self.calendar_chain {
            children.push(chain.to_tlv()?);
        }
        Tlv::from_nested(TAG_EXTEND_RESPONSE, children)
    }
}

macro_rules! define_pdu {
    ($(#[$doc:meta])* $name:ident, $pdu_tag:expr, $req_ty:ty, $req_tag:path,
     $resp_ty:ty, $resp_tag:path, $err_tag:path, $payload:ident) => {
        /// Request/response payload alternatives of the PDU.
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub enum $payload {
            Request($req_ty),
            Response($resp_ty),
        }

        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $name {
            pub header: Option<PduHeader>,
            pub payload: Option<$payload>,
            pub error: Option<ErrorPdu>,
            pub hmac: Option<Imprint>,
        }

        impl $name {
            pub fn new_request(header: PduHeader, request: $req_ty) -> Self {
                $name {
                    header: Some(header),
                    payload: Some($payload::Request(request)),
                    error: None,
                    hmac: None,
                }
            }

            pub fn new_response(header: PduHeader, response: $resp_ty) -> Self {
                $name {
                    header: Some(header),
                    payload: Some($payload::Response(response)),
                    error: None,
                    hmac: None,
                }
            }

            pub fn parse(data: &[u8]) -> KsiResult<Self> {
                let tlv = Tlv::parse(data)?;
                if tlv.tag() != $pdu_tag {
                    return Err(KsiError::invalid_format(format!(
                        "expected PDU TLV[{:#06x}], got TLV[{:#06x}]",
                        $pdu_tag,
                        tlv.tag()
                    )));
                }
                let mut header = None;
                let mut payload = None;
                let mut error = None;
                let mut hmac = None;
                for child in tlv.into_children()? {
                    match child.tag() {
                        TAG_HEADER => header = Some(PduHeader::from_tlv(child)?),
                        $req_tag => {
                            payload =
                                Some($payload::Request(<$req_ty>::from_tlv(child)?))
                        }
                        $resp_tag => {
                            payload =
                                Some($payload::Response(<$resp_ty>::from_tlv(child)?))
                        }
                        $err_tag => error = Some(ErrorPdu::from_tlv(child)?),
                        TAG_HMAC => hmac = Some(Imprint::from_wire(child.raw()?)?),
                        _ => child.ensure_skippable()?,
                    }
                }
                Ok($name {
                    header,
                    payload,
                    error,
                    hmac,
                })
            }

            fn to_tlv(&self, include_hmac: bool) -> KsiResult<Tlv> {
                let mut children = Vec::new();
                if let Some(header) = &self.header {
                    children.push(header.to_tlv()?);
                }
                match &self.payload {
                    Some($payload::Request(request)) => children.push(request.to_tlv()?),
                    Some($payload::Response(response)) => children.push(response.to_tlv()?),
                    None => {}
                }
                if let Some(error) = &self.error {
                    children.push(error.to_tlv($err_tag)?);
                }
                if include_hmac && let Some(hmac) = &self.hmac {
                    children.push(Tlv::from_raw(TAG_HMAC, hmac.as_wire())?);
                }
                Tlv::from_nested($pdu_tag, children)
            }

            pub fn serialize(&self) -> KsiResult<Vec<u8>> {
                self.to_tlv(true)?.serialize()
            }

            /// The keyed digest over the PDU with the HMAC element left
            /// out.
            pub fn calculate_hmac(
                &self,
                algorithm: HashAlgorithm,
                key: &[u8],
            ) -> KsiResult<Imprint> {
                let bytes = self.to_tlv(false)?.serialize()?;
                hash::hmac(algorithm, key, &bytes)
            }

            /// Computes and attaches the HMAC.
            pub fn with_hmac(mut self, algorithm: HashAlgorithm, key: &[u8]) -> KsiResult<Self> {
                self.hmac = Some(self.calculate_hmac(algorithm, key)?);
                Ok(self)
            }

            /// Recomputes the HMAC under `key` (with the algorithm the
            /// carried imprint declares) and compares.
            pub fn verify_hmac(&self, key: &[u8]) -> KsiResult<()> {
                let carried = self
                    .hmac
                    .as_ref()
                    .ok_or_else(|| KsiError::invalid_format("PDU without an HMAC"))?;
                let calculated = self.calculate_hmac(carried.algorithm(), key)?;
                if &calculated != carried {
                    debug!(%carried, %calculated, "HMAC verification failed");
                    return Err(KsiError::HmacMismatch);
                }
                Ok(())
            }
        }
    };
}

define_pdu!(
    /// The aggregation-service PDU.
    AggregationPdu,
    TAG_AGGREGATION_PDU,
    AggregationReq,
    TAG_AGGREGATION_REQUEST,
    AggregationResp,
    TAG_AGGREGATION_RESPONSE,
    TAG_AGGREGATION_ERROR,
    AggregationPayload
);

define_pdu!(
    /// The extension-service PDU.
    ExtendPdu,
    TAG_EXTEND_PDU,
    ExtendReq,
    TAG_EXTEND_REQUEST,
    ExtendResp,
    TAG_EXTEND_RESPONSE,
    TAG_EXTEND_ERROR,
    ExtendPayload
);
