//! Integration test: signature model and the verification pipeline.
//!
//! Builds internally consistent signatures with the production fold and
//! drives the verifier through its success and failure paths.
//!
//! Run: cargo test -p ksig-core --test signature_verify_test

mod common;

use ksig_core::error::{KsiError, KsiResult};
use ksig_core::hash::Imprint;
use ksig_core::provider::{ExtendProvider, PkiVerifier};
use ksig_core::publication::{PublicationRecord, PublishedData};
use ksig_core::signature::{CalendarAuthRecord, CalendarChain, Signature, SignatureData};
use ksig_core::verify::{VerificationStep, Verifier};

use common::{AGGREGATION_TIME, PUBLICATION_TIME, signature_with_publication};

// ---------------------------------------------------------------------------
// Fakes for the external collaborators
// ---------------------------------------------------------------------------

/// Accepts or rejects everything, by configuration.
struct FakePki {
    accept: bool,
}

impl PkiVerifier for FakePki {
    fn verify_cms(
        &self,
        _signed_bytes: &[u8],
        _signature: &[u8],
        _expected_cert_email: Option<&str>,
    ) -> KsiResult<()> {
        if self.accept {
            Ok(())
        } else {
            Err(KsiError::InvalidPkiSignature("rejected by fake".into()))
        }
    }

    fn verify_signature(
        &self,
        _data: &[u8],
        _signature: &[u8],
        _signature_algorithm: &str,
        _certificate_id: &[u8],
    ) -> KsiResult<()> {
        if self.accept {
            Ok(())
        } else {
            Err(KsiError::InvalidPkiSignature("rejected by fake".into()))
        }
    }
}

/// Replays the signature's own calendar chain, counting calls.
struct FakeExtender {
    chain: CalendarChain,
    calls: usize,
}

impl ExtendProvider for FakeExtender {
    fn extend(
        &mut self,
        _aggregation_time: u64,
        _publication_time: Option<u64>,
    ) -> KsiResult<CalendarChain> {
        self.calls += 1;
        Ok(self.chain.clone())
    }
}

// ---------------------------------------------------------------------------
// 1. Model accessors and round-trip
// ---------------------------------------------------------------------------

#[test]
fn accessors_reflect_the_lowest_chain() {
    let fixture = signature_with_publication();
    let sig = &fixture.signature;
    assert_eq!(sig.signing_time(), AGGREGATION_TIME);
    assert_eq!(sig.input_hash(), &fixture.document);
    assert_eq!(sig.calendar_root().unwrap(), fixture.calendar_root);
    assert_eq!(
        sig.publication_record().unwrap().publication_time(),
        PUBLICATION_TIME
    );
}

#[test]
fn serialized_signature_reparses_identically() {
    let fixture = signature_with_publication();
    let bytes = fixture.signature.serialize().unwrap();
    let reparsed = Signature::parse(&bytes).unwrap();
    assert_eq!(reparsed, fixture.signature);
    assert_eq!(reparsed.serialize().unwrap(), bytes);
}

// ---------------------------------------------------------------------------
// 2. Verification success path (publication anchored)
// ---------------------------------------------------------------------------

#[test]
fn publication_anchored_verification_succeeds() {
    let fixture = signature_with_publication();
    let file = common::publications_file(&fixture);

    let mut verifier = Verifier::new(&fixture.signature)
        .with_document_hash(&fixture.document)
        .with_publications_file(&file);
    verifier.run().unwrap();

    let result = verifier.result();
    for step in [
        VerificationStep::Document,
        VerificationStep::AggregationChainInternal,
        VerificationStep::AggregationChainWithCalendarChain,
        VerificationStep::CalendarChainInternal,
        VerificationStep::CalendarChainWithPublication,
        VerificationStep::PublicationWithPublicationsFile,
    ] {
        assert!(result.is_step_success(step), "step {step} should pass");
    }
    assert!(!result.is_step_performed(VerificationStep::CalendarChainOnline));
    assert!(!result.is_step_performed(VerificationStep::AuthRecordWithPki));
}

#[test]
fn publication_string_anchors_too() {
    let fixture = signature_with_publication();
    let string = fixture
        .signature
        .publication_record()
        .unwrap()
        .published_data()
        .to_publication_string();

    let mut verifier = Verifier::new(&fixture.signature)
        .with_publication_string(&string)
        .unwrap();
    verifier.run().unwrap();
    assert!(
        verifier
            .result()
            .is_step_success(VerificationStep::PublicationWithPublicationString)
    );
}

// ---------------------------------------------------------------------------
// 3. Verification failure paths
// ---------------------------------------------------------------------------

/// Rebuilds the fixture signature with one bit of the published hash
/// flipped.
fn tamper_publication(signature: &Signature) -> Signature {
    let record = signature.publication_record().unwrap();
    let mut digest = record.published_data().published_hash().digest().to_vec();
    digest[0] ^= 0x01;
    let tampered = PublicationRecord::new(PublishedData::new(
        record.publication_time(),
        Imprint::new(record.published_data().published_hash().algorithm(), digest).unwrap(),
    ))
    .with_references(record.references().to_vec());

    Signature::from_parts(
        signature.aggregation_chains().to_vec(),
        signature.calendar_chain().cloned(),
        None,
        Some(tampered),
        None,
    )
    .unwrap()
}

#[test]
fn flipped_publication_hash_fails_only_downstream_steps() {
    let fixture = signature_with_publication();
    let tampered = tamper_publication(&fixture.signature);
    let file = common::publications_file(&fixture);

    let mut verifier = Verifier::new(&tampered)
        .with_document_hash(&fixture.document)
        .with_publications_file(&file);
    let err = verifier.run().unwrap_err();
    assert!(matches!(err, KsiError::VerificationFailure));

    let result = verifier.result();
    // Prior steps still pass.
    for step in [
        VerificationStep::Document,
        VerificationStep::AggregationChainInternal,
        VerificationStep::AggregationChainWithCalendarChain,
        VerificationStep::CalendarChainInternal,
    ] {
        assert!(result.is_step_success(step), "step {step} should pass");
    }
    // The publication comparison names the calendar root.
    assert!(result.is_step_performed(VerificationStep::CalendarChainWithPublication));
    assert!(!result.is_step_success(VerificationStep::CalendarChainWithPublication));
    let failure = result
        .step_results()
        .iter()
        .find(|s| s.step == VerificationStep::CalendarChainWithPublication)
        .unwrap();
    assert!(failure.description.contains("calendar root mismatch"));
}

#[test]
fn wrong_document_hash_fails_the_document_step() {
    let fixture = signature_with_publication();
    let file = common::publications_file(&fixture);
    let wrong = common::imprint(0xEE);

    let mut verifier = Verifier::new(&fixture.signature)
        .with_document_hash(&wrong)
        .with_publications_file(&file);
    assert!(verifier.run().is_err());
    let result = verifier.result();
    assert!(!result.is_step_success(VerificationStep::Document));
    // The failure is reported but later steps were still executed.
    assert!(result.is_step_success(VerificationStep::PublicationWithPublicationsFile));
    assert!(result.last_failure_message().unwrap().contains("document hash"));
}

#[test]
fn internal_only_run_is_not_anchored() {
    let fixture = signature_with_publication();
    let mut verifier = Verifier::new(&fixture.signature);
    let err = verifier.run().unwrap_err();
    assert!(matches!(err, KsiError::VerificationFailure));
    // Every performed step passed; the verdict fails only for lack of a
    // trust anchor.
    assert!(verifier.result().last_failure_message().is_none());
}

// ---------------------------------------------------------------------------
// 4. Authentication-record path
// ---------------------------------------------------------------------------

fn signature_with_auth_record() -> (Signature, Imprint) {
    let fixture = signature_with_publication();
    let root = fixture.calendar_root.clone();
    let auth = CalendarAuthRecord {
        published_data: PublishedData::new(PUBLICATION_TIME, root),
        signature_data: SignatureData {
            signature_type: "1.2.840.113549.1.1.11".into(),
            signature_value: vec![0x5a; 16],
            certificate_id: vec![0xc0, 0xff, 0xee],
            cert_repository_uri: None,
        },
    };
    let signature = Signature::from_parts(
        fixture.signature.aggregation_chains().to_vec(),
        fixture.signature.calendar_chain().cloned(),
        Some(auth),
        None,
        None,
    )
    .unwrap();
    (signature, fixture.document)
}

#[test]
fn auth_record_with_accepting_pki_anchors() {
    let (signature, document) = signature_with_auth_record();
    let pki = FakePki { accept: true };

    let mut verifier = Verifier::new(&signature)
        .with_document_hash(&document)
        .with_pki_verifier(&pki);
    verifier.run().unwrap();
    let result = verifier.result();
    assert!(result.is_step_success(VerificationStep::CalendarChainWithAuthRecord));
    assert!(result.is_step_success(VerificationStep::AuthRecordWithPki));
}

#[test]
fn auth_record_with_rejecting_pki_fails() {
    let (signature, _) = signature_with_auth_record();
    let pki = FakePki { accept: false };

    let mut verifier = Verifier::new(&signature).with_pki_verifier(&pki);
    assert!(verifier.run().is_err());
    assert!(
        !verifier
            .result()
            .is_step_success(VerificationStep::AuthRecordWithPki)
    );
}

// ---------------------------------------------------------------------------
// 5. Online step and anchoring interplay
// ---------------------------------------------------------------------------

#[test]
fn online_step_is_skipped_when_publication_anchors() {
    let fixture = signature_with_publication();
    let file = common::publications_file(&fixture);
    let mut extender = FakeExtender {
        chain: fixture.signature.calendar_chain().unwrap().clone(),
        calls: 0,
    };

    let mut verifier = Verifier::new(&fixture.signature)
        .with_publications_file(&file)
        .with_extender(&mut extender);
    verifier.run().unwrap();
    assert!(
        !verifier
            .result()
            .is_step_performed(VerificationStep::CalendarChainOnline)
    );
    drop(verifier);
    assert_eq!(extender.calls, 0);
}

#[test]
fn online_step_anchors_without_publication_inputs() {
    let fixture = signature_with_publication();
    let mut extender = FakeExtender {
        chain: fixture.signature.calendar_chain().unwrap().clone(),
        calls: 0,
    };

    let mut verifier = Verifier::new(&fixture.signature).with_extender(&mut extender);
    verifier.run().unwrap();
    assert!(
        verifier
            .result()
            .is_step_success(VerificationStep::CalendarChainOnline)
    );
    drop(verifier);
    assert_eq!(extender.calls, 1);
}

/// Adding an anchoring input can only add steps; previously passing steps
/// keep passing.
#[test]
fn anchoring_is_monotonic() {
    let fixture = signature_with_publication();
    let file = common::publications_file(&fixture);

    let mut bare = Verifier::new(&fixture.signature);
    let _ = bare.run();
    let bare_passed: Vec<VerificationStep> = bare
        .result()
        .step_results()
        .iter()
        .filter(|s| s.succeeded)
        .map(|s| s.step)
        .collect();

    let mut anchored = Verifier::new(&fixture.signature).with_publications_file(&file);
    anchored.run().unwrap();
    for step in bare_passed {
        assert!(
            anchored.result().is_step_success(step),
            "step {step} regressed when an anchor was added"
        );
    }
}

// ---------------------------------------------------------------------------
// 6. Verifier reuse
// ---------------------------------------------------------------------------

#[test]
fn verifier_reset_clears_state_between_runs() {
    let fixture = signature_with_publication();
    let file = common::publications_file(&fixture);
    let mut verifier = Verifier::new(&fixture.signature).with_publications_file(&file);

    verifier.run().unwrap();
    let first_len = verifier.result().step_results().len();
    assert!(verifier.result().aggregation_output().is_some());

    // A second run reproduces the same record, not an accumulation.
    verifier.run().unwrap();
    assert_eq!(verifier.result().step_results().len(), first_len);

    verifier.reset();
    assert_eq!(verifier.result().step_results().len(), 0);
    assert!(verifier.result().aggregation_output().is_none());
}

// ---------------------------------------------------------------------------
// 7. Extension
// ---------------------------------------------------------------------------

#[test]
fn extension_replaces_the_anchor_without_mutating() {
    let (signature, _) = signature_with_auth_record();
    let chain = signature.calendar_chain().unwrap().clone();
    let root = chain.aggregate().unwrap();
    let record = PublicationRecord::new(PublishedData::new(PUBLICATION_TIME, root));

    let extended = signature.extend(chain, record.clone()).unwrap();
    assert!(extended.calendar_auth_record().is_none());
    assert_eq!(extended.publication_record(), Some(&record));
    assert_eq!(
        extended.aggregation_chains(),
        signature.aggregation_chains()
    );
    // The original still carries its authentication record.
    assert!(signature.calendar_auth_record().is_some());
}

#[test]
fn extension_rejects_a_foreign_calendar_chain() {
    let fixture = signature_with_publication();
    let foreign = CalendarChain::new(
        PUBLICATION_TIME,
        Some(AGGREGATION_TIME),
        common::imprint(0xDD), // not the aggregation output
        fixture.signature.calendar_chain().unwrap().links().to_vec(),
    );
    let record = fixture.signature.publication_record().unwrap().clone();
    assert!(matches!(
        fixture.signature.extend(foreign, record),
        Err(KsiError::ExtendWrongCalChain)
    ));
}

#[test]
fn extension_rejects_a_publication_before_signing() {
    let fixture = signature_with_publication();
    let chain = fixture.signature.calendar_chain().unwrap().clone();
    let record = PublicationRecord::new(PublishedData::new(1, common::imprint(0x01)));
    assert!(matches!(
        fixture.signature.extend(chain, record),
        Err(KsiError::InvalidPublication(_))
    ));
}
