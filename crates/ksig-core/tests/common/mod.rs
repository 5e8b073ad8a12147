//! Shared fixture builder: internally consistent signatures assembled with
//! the production fold, so every derived value (chain outputs, calendar
//! root, publication record) is honest by construction.
#![allow(dead_code)] // each test binary uses its own subset

use ksig_core::hash::{HashAlgorithm, Hasher, Imprint};
use ksig_core::hashchain::{self, ChainLink, Direction, LinkSibling};
use ksig_core::publication::{FileHeader, PublicationRecord, PublicationsFile, PublishedData};
use ksig_core::signature::{AggregationChain, CalendarChain, Signature};

/// The second the fixture signature was aggregated.
pub const AGGREGATION_TIME: u64 = 9;
/// The second the fixture publication pins.
pub const PUBLICATION_TIME: u64 = 11;

pub fn imprint(fill: u8) -> Imprint {
    Imprint::new(HashAlgorithm::Sha2_256, vec![fill; 32]).unwrap()
}

pub fn document_hash() -> Imprint {
    Hasher::digest(HashAlgorithm::Sha2_256, b"fixture document").unwrap()
}

/// Calendar link directions whose shape derives aggregation second 9 from
/// publication second 11 (walked from the last link: +8, shape, +1).
pub fn calendar_directions() -> Vec<Direction> {
    vec![Direction::Right, Direction::Left, Direction::Right]
}

pub struct Fixture {
    pub signature: Signature,
    pub document: Imprint,
    pub calendar_root: Imprint,
}

/// Builds a signature with two aggregation chains, a calendar chain and a
/// publication record, all mutually consistent.
pub fn signature_with_publication() -> Fixture {
    let document = document_hash();

    let lower_links = vec![
        ChainLink::new(Direction::Left, 0, LinkSibling::Imprint(imprint(0x11))),
        ChainLink::new(Direction::Right, 1, LinkSibling::Imprint(imprint(0x22))),
    ];
    let (lower_out, lower_level) =
        hashchain::aggregate(&lower_links, &document, 0, HashAlgorithm::Sha2_256).unwrap();
    let lower = AggregationChain::new(
        AGGREGATION_TIME,
        vec![3, 5, 8],
        document.clone(),
        HashAlgorithm::Sha2_256,
        lower_links,
    );

    let upper_links = vec![ChainLink::new(
        Direction::Right,
        0,
        LinkSibling::Imprint(imprint(0x33)),
    )];
    let (upper_out, _) =
        hashchain::aggregate(&upper_links, &lower_out, lower_level, HashAlgorithm::Sha2_256)
            .unwrap();
    let upper = AggregationChain::new(
        AGGREGATION_TIME,
        vec![3, 5],
        lower_out,
        HashAlgorithm::Sha2_256,
        upper_links,
    );

    let calendar_links: Vec<ChainLink> = calendar_directions()
        .into_iter()
        .enumerate()
        .map(|(i, direction)| {
            ChainLink::new(
                direction,
                0,
                LinkSibling::Imprint(imprint(0x40 + i as u8)),
            )
        })
        .collect();
    let calendar_root = hashchain::aggregate_calendar(&calendar_links, &upper_out).unwrap();
    let calendar = CalendarChain::new(
        PUBLICATION_TIME,
        Some(AGGREGATION_TIME),
        upper_out,
        calendar_links,
    );

    let publication =
        PublicationRecord::new(PublishedData::new(PUBLICATION_TIME, calendar_root.clone()))
            .with_references(vec!["fixture newspaper".into()]);

    let signature = Signature::from_parts(
        vec![lower, upper],
        Some(calendar),
        None,
        Some(publication),
        None,
    )
    .unwrap();

    Fixture {
        signature,
        document,
        calendar_root,
    }
}

/// A publications file carrying the fixture publication plus unrelated
/// neighbours.
pub fn publications_file(fixture: &Fixture) -> PublicationsFile {
    let earlier = PublicationRecord::new(PublishedData::new(5, imprint(0x77)));
    let ours = fixture
        .signature
        .publication_record()
        .expect("fixture carries a publication record")
        .clone();
    let later = PublicationRecord::new(PublishedData::new(50, imprint(0x88)));
    PublicationsFile::compose(
        FileHeader {
            version: 1,
            creation_time: 60,
            repository_uri: None,
        },
        vec![],
        vec![earlier, ours, later],
        vec![0x01, 0x02, 0x03],
    )
    .unwrap()
}
