//! The per-context client object and its service flows.
//!
//! A context owns everything with per-client state: configuration, the
//! transport handle, the PKI verifier, the publications-file cache and the
//! error ring. Every public operation clears the ring on entry and
//! annotates the errors it propagates, so a failed call leaves a readable
//! trace behind.

use std::time::Instant;

use tracing::debug;

use ksig_core::error::{KsiError, KsiResult};
use ksig_core::hash::{HashAlgorithm, Imprint};
use ksig_core::pdu::{
    AggregationPayload, AggregationPdu, AggregationReq, AggregationResp, ExtendPayload, ExtendPdu,
    ExtendReq, ExtendResp, PduHeader,
};
use ksig_core::provider::{ExtendProvider, PkiVerifier};
use ksig_core::publication::{PublicationRecord, PublicationsFile};
use ksig_core::signature::{CalendarChain, Signature};
use ksig_core::verify::{VerificationResult, Verifier};

use crate::config::{ClientConfig, PubFileCachePolicy, ServiceCredentials};
use crate::error_ring::ErrorRing;
use crate::status;
use crate::transport::{Endpoint, EndpointKind, Transport};

/// HMAC algorithm used on outgoing PDUs.
const HMAC_ALGORITHM: HashAlgorithm = HashAlgorithm::Sha2_256;

macro_rules! annotate {
    ($ring:expr, $result:expr) => {
        match $result {
            Ok(value) => Ok(value),
            Err(err) => {
                $ring.push(&err, file!(), line!());
                Err(err)
            }
        }
    };
}

struct CachedPublicationsFile {
    file: PublicationsFile,
    fetched_at: Instant,
}

/// A keyless-signing client context.
pub struct KsiContext {
    config: ClientConfig,
    transport: Box<dyn Transport>,
    pki: Box<dyn PkiVerifier>,
    ring: ErrorRing,
    publications_file: Option<CachedPublicationsFile>,
    request_counter: u64,
    last_verification: Option<VerificationResult>,
}

impl KsiContext {
    pub fn new(
        config: ClientConfig,
        transport: Box<dyn Transport>,
        pki: Box<dyn PkiVerifier>,
    ) -> Self {
        KsiContext {
            config,
            transport,
            pki,
            ring: ErrorRing::default(),
            publications_file: None,
            request_counter: 0,
            last_verification: None,
        }
    }

    /// Replaces the error ring with one of the given capacity.
    pub fn with_error_ring_capacity(mut self, capacity: usize) -> Self {
        self.ring = ErrorRing::new(capacity);
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn error_ring(&self) -> &ErrorRing {
        &self.ring
    }

    /// Renders the current error trace.
    pub fn status_dump(&self) -> String {
        self.ring.status_dump()
    }

    /// The step record of the most recent verification run, kept whatever
    /// the verdict was.
    pub fn last_verification_result(&self) -> Option<&VerificationResult> {
        self.last_verification.as_ref()
    }

    fn next_request_id(&mut self) -> u64 {
        self.request_counter += 1;
        self.request_counter
    }

    fn endpoint(config: &ClientConfig, kind: EndpointKind, uri: &str) -> Endpoint {
        Endpoint::new(
            kind,
            uri,
            config.connect_timeout(),
            config.transfer_timeout(),
        )
    }

    fn aggregator(&self) -> KsiResult<&ServiceCredentials> {
        self.config
            .aggregator
            .as_ref()
            .ok_or(KsiError::InvalidArgument)
    }

    fn extender(&self) -> KsiResult<&ServiceCredentials> {
        self.config
            .extender
            .as_ref()
            .ok_or(KsiError::InvalidArgument)
    }

    // -----------------------------------------------------------------
    // Signing
    // -----------------------------------------------------------------

    /// Requests a signature binding `document_hash` to the current
    /// aggregation round.
    pub fn sign(&mut self, document_hash: &Imprint) -> KsiResult<Signature> {
        self.ring.clear();
        let result = self.sign_inner(document_hash);
        annotate!(self.ring, result)
    }

    fn sign_inner(&mut self, document_hash: &Imprint) -> KsiResult<Signature> {
        if !document_hash.algorithm().is_trusted() {
            return Err(KsiError::UntrustedHashAlgorithm);
        }
        let request_id = self.next_request_id();
        let aggregator = self.aggregator()?.clone();
        debug!(request_id, %document_hash, "sending aggregation request");

        let request = AggregationPdu::new_request(
            PduHeader {
                login_id: aggregator.login_id.clone(),
                instance_id: None,
                message_id: Some(request_id),
            },
            AggregationReq {
                request_id,
                request_hash: document_hash.clone(),
                request_level: None,
            },
        )
        .with_hmac(HMAC_ALGORITHM, aggregator.key.as_bytes())?;

        let endpoint = Self::endpoint(&self.config, EndpointKind::Aggregator, &aggregator.uri);
        let response_bytes = self
            .transport
            .exchange(&endpoint, &request.serialize()?)?;
        let response = take_aggregation_response(&response_bytes, aggregator.key.as_bytes())?;
        if response.request_id != request_id {
            return Err(KsiError::invalid_format(format!(
                "aggregation response id {} does not match request id {}",
                response.request_id, request_id
            )));
        }

        let signature = Signature::from_content_tlvs(response.content)?;
        if signature.input_hash() != document_hash {
            return Err(KsiError::InvalidSignature(
                "aggregation response does not bind the requested hash".into(),
            ));
        }
        debug!(signing_time = signature.signing_time(), "signature created");
        Ok(signature)
    }

    // -----------------------------------------------------------------
    // Extension
    // -----------------------------------------------------------------

    /// Extends `signature` to the nearest publication at or after its
    /// signing time, taken from the publications file.
    pub fn extend(&mut self, signature: &Signature) -> KsiResult<Signature> {
        self.ring.clear();
        let result = self.extend_inner(signature);
        annotate!(self.ring, result)
    }

    fn extend_inner(&mut self, signature: &Signature) -> KsiResult<Signature> {
        let file = self.publications_file_inner()?.ok_or_else(|| {
            KsiError::InvalidArgument
        })?;
        let record = file
            .nearest_publication(signature.signing_time())
            .ok_or(KsiError::ExtendNoSuitablePublication)?
            .clone();
        self.extend_to_inner(signature, &record)
    }

    /// Extends `signature` to the given publication record.
    pub fn extend_to(
        &mut self,
        signature: &Signature,
        record: &PublicationRecord,
    ) -> KsiResult<Signature> {
        self.ring.clear();
        let result = self.extend_to_inner(signature, record);
        annotate!(self.ring, result)
    }

    fn extend_to_inner(
        &mut self,
        signature: &Signature,
        record: &PublicationRecord,
    ) -> KsiResult<Signature> {
        let request_id = self.next_request_id();
        let extender = self.extender()?.clone();
        let endpoint = Self::endpoint(&self.config, EndpointKind::Extender, &extender.uri);
        let chain = request_calendar_chain(
            self.transport.as_mut(),
            &endpoint,
            &extender,
            request_id,
            signature.signing_time(),
            Some(record.publication_time()),
        )?;
        signature.extend(chain, record.clone())
    }

    // -----------------------------------------------------------------
    // Publications file
    // -----------------------------------------------------------------

    /// Returns the publications file, fetching and PKI-verifying it when
    /// the cache is empty or expired by policy. The cached file is only
    /// replaced after the fresh one verified.
    pub fn publications_file(&mut self) -> KsiResult<PublicationsFile> {
        self.ring.clear();
        let result = self
            .publications_file_inner()
            .and_then(|file| file.ok_or(KsiError::InvalidArgument));
        annotate!(self.ring, result)
    }

    fn cache_is_fresh(&self) -> bool {
        match &self.publications_file {
            None => false,
            Some(cached) => match self.config.pubfile_cache_policy {
                PubFileCachePolicy::NeverExpire => true,
                PubFileCachePolicy::Ttl { seconds } => {
                    cached.fetched_at.elapsed().as_secs() < seconds
                }
            },
        }
    }

    /// `Ok(None)` when no publications-file URI is configured.
    fn publications_file_inner(&mut self) -> KsiResult<Option<PublicationsFile>> {
        let Some(uri) = self.config.publications_file_uri.clone() else {
            return Ok(None);
        };
        if self.cache_is_fresh() {
            let cached = self.publications_file.as_ref().expect("cache checked");
            return Ok(Some(cached.file.clone()));
        }

        debug!(%uri, "fetching publications file");
        let endpoint = Self::endpoint(&self.config, EndpointKind::PublicationsFile, &uri);
        let bytes = self.transport.exchange(&endpoint, &[])?;
        let file = PublicationsFile::parse(&bytes)?;
        file.verify(self.pki.as_ref(), self.config.publication_cert_email.as_deref())?;

        self.publications_file = Some(CachedPublicationsFile {
            file: file.clone(),
            fetched_at: Instant::now(),
        });
        Ok(Some(file))
    }

    // -----------------------------------------------------------------
    // Verification
    // -----------------------------------------------------------------

    /// Verifies a signature with every input this context can provide:
    /// the publications file when configured, the PKI trust store, and the
    /// extension service for signatures nothing else anchors.
    pub fn verify(&mut self, signature: &Signature) -> KsiResult<()> {
        self.verify_with(signature, None, None)
    }

    /// Verifies and additionally checks the signature binds
    /// `document_hash`.
    pub fn verify_with_document(
        &mut self,
        signature: &Signature,
        document_hash: &Imprint,
    ) -> KsiResult<()> {
        self.verify_with(signature, Some(document_hash), None)
    }

    /// Verifies against a user-supplied printable publication string.
    pub fn verify_with_publication_string(
        &mut self,
        signature: &Signature,
        publication_string: &str,
    ) -> KsiResult<()> {
        self.verify_with(signature, None, Some(publication_string))
    }

    fn verify_with(
        &mut self,
        signature: &Signature,
        document_hash: Option<&Imprint>,
        publication_string: Option<&str>,
    ) -> KsiResult<()> {
        self.ring.clear();
        self.last_verification = None;

        let publications_file = match self.publications_file_inner() {
            Ok(file) => file,
            Err(err) => {
                self.ring.push(&err, file!(), line!());
                return Err(err);
            }
        };

        let request_id = self.next_request_id();
        let KsiContext {
            config,
            transport,
            pki,
            ring,
            ..
        } = self;

        let mut verifier = Verifier::new(signature).with_pki_verifier(pki.as_ref());
        if let Some(hash) = document_hash {
            verifier = verifier.with_document_hash(hash);
        }
        if let Some(file) = &publications_file {
            verifier = verifier.with_publications_file(file);
        }
        if let Some(string) = publication_string {
            verifier = annotate!(ring, verifier.with_publication_string(string))?;
        }

        let mut online = match config.extender.as_ref() {
            Some(extender) => Some(TransportExtendProvider {
                transport: transport.as_mut(),
                endpoint: Self::endpoint(config, EndpointKind::Extender, &extender.uri),
                credentials: extender,
                request_id,
            }),
            None => None,
        };
        if let Some(provider) = online.as_mut() {
            verifier = verifier.with_extender(provider);
        }

        let outcome = verifier.run();
        let result = verifier.into_result();
        if let Err(err) = &outcome {
            if let Some(message) = result.last_failure_message() {
                debug!(message, "verification failed");
            }
            ring.push(err, file!(), line!());
        }
        self.last_verification = Some(result);
        outcome
    }
}

/// Extend provider backed by the context transport; one instance serves
/// one verification run.
struct TransportExtendProvider<'a> {
    transport: &'a mut dyn Transport,
    endpoint: Endpoint,
    credentials: &'a ServiceCredentials,
    request_id: u64,
}

impl ExtendProvider for TransportExtendProvider<'_> {
    fn extend(
        &mut self,
        aggregation_time: u64,
        publication_time: Option<u64>,
    ) -> KsiResult<CalendarChain> {
        self.request_id += 1;
        request_calendar_chain(
            self.transport,
            &self.endpoint,
            self.credentials,
            self.request_id,
            aggregation_time,
            publication_time,
        )
    }
}

fn request_calendar_chain(
    transport: &mut dyn Transport,
    endpoint: &Endpoint,
    credentials: &ServiceCredentials,
    request_id: u64,
    aggregation_time: u64,
    publication_time: Option<u64>,
) -> KsiResult<CalendarChain> {
    debug!(request_id, aggregation_time, ?publication_time, "sending extend request");
    let request = ExtendPdu::new_request(
        PduHeader {
            login_id: credentials.login_id.clone(),
            instance_id: None,
            message_id: Some(request_id),
        },
        ExtendReq {
            request_id,
            aggregation_time,
            publication_time,
        },
    )
    .with_hmac(HMAC_ALGORITHM, credentials.key.as_bytes())?;

    let response_bytes = transport.exchange(endpoint, &request.serialize()?)?;
    let response = take_extend_response(&response_bytes, credentials.key.as_bytes())?;
    if response.request_id != request_id {
        return Err(KsiError::invalid_format(format!(
            "extend response id {} does not match request id {}",
            response.request_id, request_id
        )));
    }
    response
        .calendar_chain
        .ok_or_else(|| KsiError::invalid_format("extend response without a calendar chain"))
}

/// Unpacks an aggregation answer: service errors first, then the
/// header/HMAC requirements, then the payload.
fn take_aggregation_response(bytes: &[u8], key: &[u8]) -> KsiResult<AggregationResp> {
    let pdu = AggregationPdu::parse(bytes)?;
    if let Some(error) = &pdu.error
        && let Some(err) = status::map_aggregator_status(error.status, error.message.clone())
    {
        return Err(err);
    }
    if pdu.header.is_none() {
        return Err(KsiError::invalid_format(
            "a successful aggregation response must have a header",
        ));
    }
    if pdu.hmac.is_none() {
        return Err(KsiError::invalid_format(
            "a successful aggregation response must have an HMAC",
        ));
    }
    pdu.verify_hmac(key)?;
    let Some(AggregationPayload::Response(response)) = pdu.payload else {
        return Err(KsiError::invalid_format(
            "aggregation response payload missing",
        ));
    };
    if let Some(err) =
        status::map_aggregator_status(response.status, response.error_message.clone().unwrap_or_default())
    {
        return Err(err);
    }
    Ok(response)
}

/// Unpacks an extension answer with the same discipline.
fn take_extend_response(bytes: &[u8], key: &[u8]) -> KsiResult<ExtendResp> {
    let pdu = ExtendPdu::parse(bytes)?;
    if let Some(error) = &pdu.error
        && let Some(err) = status::map_extender_status(error.status, error.message.clone())
    {
        return Err(err);
    }
    if pdu.header.is_none() {
        return Err(KsiError::invalid_format(
            "a successful extension response must have a header",
        ));
    }
    if pdu.hmac.is_none() {
        return Err(KsiError::invalid_format(
            "a successful extension response must have an HMAC",
        ));
    }
    pdu.verify_hmac(key)?;
    let Some(ExtendPayload::Response(response)) = pdu.payload else {
        return Err(KsiError::invalid_format("extend response payload missing"));
    };
    if let Some(err) =
        status::map_extender_status(response.status, response.error_message.clone().unwrap_or_default())
    {
        return Err(err);
    }
    Ok(response)
}
