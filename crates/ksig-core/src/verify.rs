//! The multi-step verification pipeline.
//!
//! Verification is a fixed, ordered list of named assertions. Each step is
//! *performed* only when its inputs are available (a document hash was
//! supplied, the signature carries a calendar chain, a publications file
//! was given, ...), and a failed step never stops the run: the caller
//! always gets the complete ordered record of what was checked and how it
//! went.
//!
//! The overall verdict is strict: the signature verifies only when every
//! performed step passed *and* at least one trust-anchoring step — a PKI
//! check of the authentication record, a publications-file or publication
//! string match, or an online calendar comparison — anchored the result to
//! something outside the signature itself.

use std::fmt;

use tracing::debug;

use crate::error::{KsiError, KsiResult};
use crate::hash::Imprint;
use crate::provider::{ExtendProvider, PkiVerifier};
use crate::publication::{PublicationsFile, PublishedData};
use crate::signature::Signature;

/// The verification steps, one bit each, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum VerificationStep {
    /// Supplied document hash equals the signature input hash.
    Document = 0x01,
    /// Every aggregation chain folds to the next chain's input.
    AggregationChainInternal = 0x02,
    /// Calendar chain continues the aggregation output at the same second.
    AggregationChainWithCalendarChain = 0x04,
    /// Calendar chain shape reproduces its own aggregation time.
    CalendarChainInternal = 0x08,
    /// Calendar root and time match the authentication record.
    CalendarChainWithAuthRecord = 0x10,
    /// Calendar root and time match the attached publication record.
    CalendarChainWithPublication = 0x20,
    /// Extender's calendar chain agrees with the signature.
    CalendarChainOnline = 0x40,
    /// PKI accepts the authentication record signature.
    AuthRecordWithPki = 0x80,
    /// Attached publication record appears in the publications file.
    PublicationWithPublicationsFile = 0x200,
    /// Attached publication record equals the user's publication string.
    PublicationWithPublicationString = 0x400,
}

impl VerificationStep {
    fn bit(self) -> u32 {
        self as u32
    }

    /// Steps that anchor trust outside the signature itself.
    pub fn is_trust_anchor(self) -> bool {
        matches!(
            self,
            VerificationStep::AuthRecordWithPki
                | VerificationStep::PublicationWithPublicationsFile
                | VerificationStep::PublicationWithPublicationString
                | VerificationStep::CalendarChainOnline
        )
    }
}

impl fmt::Display for VerificationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VerificationStep::Document => "document hash",
            VerificationStep::AggregationChainInternal => "aggregation chain internal",
            VerificationStep::AggregationChainWithCalendarChain => {
                "aggregation chain vs calendar chain"
            }
            VerificationStep::CalendarChainInternal => "calendar chain internal",
            VerificationStep::CalendarChainWithAuthRecord => {
                "calendar chain vs authentication record"
            }
            VerificationStep::CalendarChainWithPublication => "calendar chain vs publication",
            VerificationStep::CalendarChainOnline => "online calendar",
            VerificationStep::AuthRecordWithPki => "authentication record PKI signature",
            VerificationStep::PublicationWithPublicationsFile => {
                "publication vs publications file"
            }
            VerificationStep::PublicationWithPublicationString => {
                "publication vs publication string"
            }
        };
        f.write_str(name)
    }
}

/// Outcome of one performed step.
#[derive(Debug, Clone)]
pub struct StepResult {
    pub step: VerificationStep,
    pub succeeded: bool,
    pub description: String,
}

/// Accumulated state of one verification run.
#[derive(Debug, Default)]
pub struct VerificationResult {
    steps_performed: u32,
    steps_failed: u32,
    steps: Vec<StepResult>,
    aggregation_output: Option<(Imprint, u8)>,
}

impl VerificationResult {
    /// Clears all step state and the cached aggregation output.
    pub fn reset(&mut self) {
        self.steps_performed = 0;
        self.steps_failed = 0;
        self.steps.clear();
        self.aggregation_output = None;
    }

    fn add_success(&mut self, step: VerificationStep, description: impl Into<String>) {
        self.steps_performed |= step.bit();
        self.steps.push(StepResult {
            step,
            succeeded: true,
            description: description.into(),
        });
    }

    fn add_failure(&mut self, step: VerificationStep, description: impl Into<String>) {
        let description = description.into();
        debug!(%step, %description, "verification step failed");
        self.steps_performed |= step.bit();
        self.steps_failed |= step.bit();
        self.steps.push(StepResult {
            step,
            succeeded: false,
            description,
        });
    }

    pub fn is_step_performed(&self, step: VerificationStep) -> bool {
        self.steps_performed & step.bit() != 0
    }

    pub fn is_step_success(&self, step: VerificationStep) -> bool {
        self.is_step_performed(step) && self.steps_failed & step.bit() == 0
    }

    /// The ordered record of performed steps.
    pub fn step_results(&self) -> &[StepResult] {
        &self.steps
    }

    /// Description of the most recent failed step, if any.
    pub fn last_failure_message(&self) -> Option<&str> {
        self.steps
            .iter()
            .rev()
            .find(|step| !step.succeeded)
            .map(|step| step.description.as_str())
    }

    /// The cached output of folding the aggregation chains.
    pub fn aggregation_output(&self) -> Option<&Imprint> {
        self.aggregation_output.as_ref().map(|(imprint, _)| imprint)
    }

    fn any_failed(&self) -> bool {
        self.steps_failed != 0
    }

    fn anchored(&self) -> bool {
        [
            VerificationStep::AuthRecordWithPki,
            VerificationStep::PublicationWithPublicationsFile,
            VerificationStep::PublicationWithPublicationString,
            VerificationStep::CalendarChainOnline,
        ]
        .into_iter()
        .any(|step| self.is_step_success(step))
    }
}

/// Drives the ordered verification steps against one signature.
///
/// Optional inputs gate the optional steps; the verifier may be reused
/// across runs after [`Verifier::reset`].
pub struct Verifier<'a> {
    signature: &'a Signature,
    document_hash: Option<&'a Imprint>,
    publications_file: Option<&'a PublicationsFile>,
    publication_string: Option<PublishedData>,
    pki: Option<&'a dyn PkiVerifier>,
    extender: Option<&'a mut dyn ExtendProvider>,
    result: VerificationResult,
}

impl<'a> Verifier<'a> {
    pub fn new(signature: &'a Signature) -> Self {
        Verifier {
            signature,
            document_hash: None,
            publications_file: None,
            publication_string: None,
            pki: None,
            extender: None,
            result: VerificationResult::default(),
        }
    }

    pub fn with_document_hash(mut self, hash: &'a Imprint) -> Self {
        self.document_hash = Some(hash);
        self
    }

    pub fn with_publications_file(mut self, file: &'a PublicationsFile) -> Self {
        self.publications_file = Some(file);
        self
    }

    /// Supplies a user publication string; decoding failures surface
    /// immediately as [`KsiError::InvalidPublication`].
    pub fn with_publication_string(mut self, s: &str) -> KsiResult<Self> {
        self.publication_string = Some(PublishedData::from_publication_string(s)?);
        Ok(self)
    }

    pub fn with_pki_verifier(mut self, pki: &'a dyn PkiVerifier) -> Self {
        self.pki = Some(pki);
        self
    }

    pub fn with_extender(mut self, extender: &'a mut dyn ExtendProvider) -> Self {
        self.extender = Some(extender);
        self
    }

    pub fn result(&self) -> &VerificationResult {
        &self.result
    }

    pub fn into_result(self) -> VerificationResult {
        self.result
    }

    /// Clears the verifier for another run.
    pub fn reset(&mut self) {
        self.result.reset();
    }

    /// Runs every applicable step in order.
    ///
    /// Assertion failures are recorded and do not stop the run; the
    /// complete step record stays available through [`Verifier::result`]
    /// whatever the verdict. Infrastructure errors (a fold that cannot be
    /// computed, a transport failure) abort with their own error.
    pub fn run(&mut self) -> KsiResult<()> {
        self.reset();

        // The chained fold is the reference value several steps compare
        // against; compute it once up front.
        self.result.aggregation_output = Some(self.signature.aggregate_chains()?);

        self.verify_document();
        self.verify_aggregation_internal()?;
        self.verify_aggregation_with_calendar();
        self.verify_calendar_internal();
        self.verify_calendar_with_auth_record()?;
        self.verify_auth_record_with_pki()?;
        self.verify_calendar_with_publication()?;
        self.verify_publication_with_file();
        self.verify_publication_with_string();
        self.verify_calendar_online()?;

        if self.result.any_failed() || !self.result.anchored() {
            return Err(KsiError::VerificationFailure);
        }
        Ok(())
    }

    fn aggregation_output(&self) -> &Imprint {
        self.result
            .aggregation_output
            .as_ref()
            .map(|(imprint, _)| imprint)
            .expect("cached before any step runs")
    }

    fn verify_document(&mut self) {
        let Some(document_hash) = self.document_hash else {
            return;
        };
        if document_hash == self.signature.input_hash() {
            self.result.add_success(
                VerificationStep::Document,
                "document hash matches the signature input hash",
            );
        } else {
            self.result.add_failure(
                VerificationStep::Document,
                format!(
                    "document hash mismatch: expected {}, got {}",
                    self.signature.input_hash(),
                    document_hash
                ),
            );
        }
    }

    fn verify_aggregation_internal(&mut self) -> KsiResult<()> {
        let step = VerificationStep::AggregationChainInternal;
        let chains = self.signature.aggregation_chains();
        let signing_time = self.signature.signing_time();

        let mut level = 0u8;
        for (i, chain) in chains.iter().enumerate() {
            if chain.aggregation_time() != signing_time {
                self.result
                    .add_failure(step, "aggregation chain times differ within the signature");
                return Ok(());
            }
            let (output, end_level) = chain.aggregate(level)?;
            if let Some(next) = chains.get(i + 1)
                && next.input_hash() != &output
            {
                self.result.add_failure(
                    step,
                    format!(
                        "aggregation chain {} output does not match the next chain's input",
                        i
                    ),
                );
                return Ok(());
            }
            level = end_level;
        }
        self.result
            .add_success(step, "aggregation chains are internally consistent");
        Ok(())
    }

    fn verify_aggregation_with_calendar(&mut self) {
        let step = VerificationStep::AggregationChainWithCalendarChain;
        let Some(calendar) = self.signature.calendar_chain() else {
            return;
        };
        if calendar.input_hash() != self.aggregation_output() {
            self.result.add_failure(
                step,
                "calendar chain input does not match the aggregation output",
            );
        } else if calendar.aggregation_time() != self.signature.signing_time() {
            self.result.add_failure(
                step,
                "calendar chain aggregation time does not match the signing time",
            );
        } else {
            self.result
                .add_success(step, "calendar chain continues the aggregation chains");
        }
    }

    fn verify_calendar_internal(&mut self) {
        let step = VerificationStep::CalendarChainInternal;
        let Some(calendar) = self.signature.calendar_chain() else {
            return;
        };
        match calendar.calculate_aggregation_time() {
            Ok(derived) if derived == calendar.aggregation_time() => {
                self.result
                    .add_success(step, "calendar chain shape encodes its aggregation time");
            }
            Ok(derived) => {
                self.result.add_failure(
                    step,
                    format!(
                        "calendar chain shape encodes aggregation time {}, chain declares {}",
                        derived,
                        calendar.aggregation_time()
                    ),
                );
            }
            Err(err) => {
                self.result.add_failure(
                    step,
                    format!("calendar chain shape is inconsistent: {err}"),
                );
            }
        }
    }

    fn verify_calendar_with_auth_record(&mut self) -> KsiResult<()> {
        let step = VerificationStep::CalendarChainWithAuthRecord;
        let Some(record) = self.signature.calendar_auth_record() else {
            return Ok(());
        };
        let calendar = self
            .signature
            .calendar_chain()
            .expect("structural invariant: auth record implies calendar chain");
        let root = self.signature.calendar_root()?;

        if &root != record.published_data.published_hash() {
            self.result.add_failure(
                step,
                "calendar root mismatch with the authentication record",
            );
        } else if calendar.publication_time() != record.published_data.publication_time() {
            self.result.add_failure(
                step,
                "publication time mismatch with the authentication record",
            );
        } else {
            self.result
                .add_success(step, "calendar chain matches the authentication record");
        }
        Ok(())
    }

    fn verify_auth_record_with_pki(&mut self) -> KsiResult<()> {
        let step = VerificationStep::AuthRecordWithPki;
        let (Some(record), Some(pki)) = (self.signature.calendar_auth_record(), self.pki) else {
            return Ok(());
        };
        let signed = record.published_data.to_tlv()?.serialize()?;
        match pki.verify_signature(
            &signed,
            &record.signature_data.signature_value,
            &record.signature_data.signature_type,
            &record.signature_data.certificate_id,
        ) {
            Ok(()) => self
                .result
                .add_success(step, "authentication record signature accepted"),
            Err(err) => self.result.add_failure(
                step,
                format!("authentication record signature rejected: {err}"),
            ),
        }
        Ok(())
    }

    fn verify_calendar_with_publication(&mut self) -> KsiResult<()> {
        let step = VerificationStep::CalendarChainWithPublication;
        let Some(record) = self.signature.publication_record() else {
            return Ok(());
        };
        let calendar = self
            .signature
            .calendar_chain()
            .expect("structural invariant: publication record implies calendar chain");
        let root = self.signature.calendar_root()?;

        if &root != record.published_data().published_hash() {
            self.result.add_failure(step, "calendar root mismatch");
        } else if calendar.publication_time() != record.publication_time() {
            self.result
                .add_failure(step, "publication time mismatch with the publication record");
        } else {
            self.result
                .add_success(step, "calendar chain matches the publication record");
        }
        Ok(())
    }

    fn verify_publication_with_file(&mut self) {
        let step = VerificationStep::PublicationWithPublicationsFile;
        let (Some(file), Some(record)) =
            (self.publications_file, self.signature.publication_record())
        else {
            return;
        };
        match file.publication_at(record.publication_time()) {
            None => self.result.add_failure(
                step,
                format!(
                    "no publication at time {} in the publications file",
                    record.publication_time()
                ),
            ),
            Some(entry) if entry.published_data() == record.published_data() => {
                self.result
                    .add_success(step, "publication record found in the publications file");
            }
            Some(_) => self.result.add_failure(
                step,
                "publication record differs from the publications file entry",
            ),
        }
    }

    fn verify_publication_with_string(&mut self) {
        let step = VerificationStep::PublicationWithPublicationString;
        let Some(user_publication) = &self.publication_string else {
            return;
        };
        match self.signature.publication_record() {
            None => self
                .result
                .add_failure(step, "signature carries no publication record to compare"),
            Some(record) if record.published_data() == user_publication => {
                self.result
                    .add_success(step, "publication record matches the publication string");
            }
            Some(_) => self.result.add_failure(
                step,
                "publication record differs from the publication string",
            ),
        }
    }

    fn verify_calendar_online(&mut self) -> KsiResult<()> {
        let step = VerificationStep::CalendarChainOnline;
        if self.extender.is_none() {
            return Ok(());
        }
        // A verified publication anchor makes the online round-trip
        // redundant; stay offline in that case.
        let already_anchored = [
            VerificationStep::AuthRecordWithPki,
            VerificationStep::PublicationWithPublicationsFile,
            VerificationStep::PublicationWithPublicationString,
        ]
        .into_iter()
        .any(|anchor| self.result.is_step_success(anchor));
        if already_anchored {
            return Ok(());
        }

        let signing_time = self.signature.signing_time();
        let target = self
            .signature
            .calendar_chain()
            .map(|chain| chain.publication_time());
        let extender = self.extender.as_mut().expect("checked above");
        let response = extender.extend(signing_time, target)?;

        let consistent = match self.signature.calendar_chain() {
            Some(chain) => {
                response.input_hash() == chain.input_hash()
                    && response.aggregation_time() == chain.aggregation_time()
                    && response.aggregate()? == chain.aggregate()?
            }
            None => {
                response.input_hash() == self.aggregation_output()
                    && response.aggregation_time() == signing_time
            }
        };
        if consistent {
            self.result
                .add_success(step, "extender confirms the calendar chain");
        } else {
            self.result
                .add_failure(step, "online calendar chain mismatch");
        }
        Ok(())
    }
}
