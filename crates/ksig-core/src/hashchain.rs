//! Hash-chain folding.
//!
//! A hash chain is an ordered list of links, each naming a sibling value
//! and the side it sits on. Folding a chain walks the links in order,
//! hashing the running value with the sibling (order decided by the link
//! direction) and a trailing level byte. Aggregation chains carry explicit
//! level corrections and fail when the running level leaves the 0–255
//! range; calendar chains instead re-derive the hash algorithm per step
//! and always append the fixed calendar level byte.
//!
//! The list order follows the wire: the first link is the lowest sibling.

use tracing::debug;

use crate::error::{KsiError, KsiResult};
use crate::hash::{HashAlgorithm, Hasher, Imprint};

/// Level byte appended on every calendar-chain step.
///
/// Calendar nodes sit above any conceivable aggregation level, so the
/// original wire format fixes their level byte at the maximum.
pub const CALENDAR_LEVEL: u8 = 0xff;

/// Which side of the hash the sibling value is fed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// The running value is the left input; the sibling is fed second.
    Left,
    /// The sibling is fed first; the running value is the right input.
    Right,
}

/// The content of a link: exactly one of three forms.
///
/// The wire format could in principle carry several of these at once in a
/// single link; such links are rejected as malformed when parsed (see the
/// signature module).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkSibling {
    /// A plain sibling hash.
    Imprint(Imprint),
    /// A hash of client metadata, folded like any sibling hash.
    MetaHash(Imprint),
    /// Pre-imaged client metadata: an octet string already shaped like an
    /// imprint, folded verbatim.
    MetaData(Vec<u8>),
}

impl LinkSibling {
    /// The bytes this sibling contributes to the fold.
    pub fn as_fold_input(&self) -> Vec<u8> {
        match self {
            LinkSibling::Imprint(imprint) | LinkSibling::MetaHash(imprint) => imprint.as_wire(),
            LinkSibling::MetaData(raw) => raw.clone(),
        }
    }
}

/// One step of a hash chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainLink {
    pub direction: Direction,
    /// Aggregation-only: number of levels skipped below this link.
    pub level_correction: u64,
    pub sibling: LinkSibling,
}

impl ChainLink {
    pub fn new(direction: Direction, level_correction: u64, sibling: LinkSibling) -> Self {
        ChainLink {
            direction,
            level_correction,
            sibling,
        }
    }
}

fn fold_step(
    algorithm: HashAlgorithm,
    acc: &Imprint,
    link: &ChainLink,
    level_byte: u8,
) -> KsiResult<Imprint> {
    let mut hasher = Hasher::open(algorithm)?;
    let sibling = link.sibling.as_fold_input();
    match link.direction {
        Direction::Left => {
            hasher.update(&acc.as_wire());
            hasher.update(&sibling);
        }
        Direction::Right => {
            hasher.update(&sibling);
            hasher.update(&acc.as_wire());
        }
    }
    hasher.update(&[level_byte]);
    Ok(hasher.finalize())
}

/// Folds an aggregation chain.
///
/// `start_level` is 0 for the lowest chain of a signature and the previous
/// chain's end level for every higher chain. Returns the output imprint and
/// the end level. Fails with `InvalidFormat` when any link pushes the
/// running level past 255, or when the chain is empty.
pub fn aggregate(
    links: &[ChainLink],
    input: &Imprint,
    start_level: u8,
    algorithm: HashAlgorithm,
) -> KsiResult<(Imprint, u8)> {
    if links.is_empty() {
        return Err(KsiError::invalid_format("empty aggregation hash chain"));
    }
    debug!(%input, start_level, %algorithm, "aggregating hash chain");

    let mut level = u64::from(start_level);
    let mut acc = input.clone();
    for link in links {
        if link.level_correction > 0xff || level + link.level_correction + 1 > 0xff {
            return Err(KsiError::invalid_format(
                "aggregation chain level out of range",
            ));
        }
        level += link.level_correction + 1;
        acc = fold_step(algorithm, &acc, link, level as u8)?;
    }

    debug!(output = %acc, end_level = level, "aggregation chain folded");
    Ok((acc, level as u8))
}

/// Folds a calendar chain into the calendar root.
///
/// The hash algorithm is re-derived as the fold proceeds: it starts as the
/// input imprint's algorithm and switches to the sibling's algorithm at
/// every left link. Level corrections do not apply; every step appends
/// [`CALENDAR_LEVEL`].
pub fn aggregate_calendar(links: &[ChainLink], input: &Imprint) -> KsiResult<Imprint> {
    if links.is_empty() {
        return Err(KsiError::invalid_format("empty calendar hash chain"));
    }
    debug!(%input, "aggregating calendar hash chain");

    let mut algorithm = input.algorithm();
    let mut acc = input.clone();
    for link in links {
        if link.direction == Direction::Left {
            if let LinkSibling::Imprint(sibling) = &link.sibling {
                algorithm = sibling.algorithm();
            }
        }
        acc = fold_step(algorithm, &acc, link, CALENDAR_LEVEL)?;
    }

    debug!(root = %acc, "calendar chain folded");
    Ok(acc)
}

/// The greatest power of two not exceeding `n`. Caller guarantees `n > 0`.
fn high_bit(n: u64) -> u64 {
    1u64 << (63 - n.leading_zeros())
}

/// Reads the aggregation time out of a calendar chain's shape.
///
/// The link directions, consumed from the last link towards the first,
/// encode a walk of the calendar tree that must consume `publication_time`
/// exactly; what the right turns accumulate is the aggregation second. Any
/// leftover signals a forged or corrupted chain.
pub fn calendar_aggregation_time(links: &[ChainLink], publication_time: u64) -> KsiResult<u64> {
    if links.is_empty() {
        return Err(KsiError::invalid_format("empty calendar hash chain"));
    }

    let mut r = publication_time;
    let mut t = 0u64;
    for link in links.iter().rev() {
        if r == 0 {
            return Err(KsiError::invalid_format(
                "calendar chain is longer than the publication time encodes",
            ));
        }
        match link.direction {
            Direction::Left => r = high_bit(r) - 1,
            Direction::Right => {
                t += high_bit(r);
                r -= high_bit(r);
            }
        }
    }
    if r != 0 {
        return Err(KsiError::invalid_format(
            "calendar chain shape does not consume the publication time",
        ));
    }
    Ok(t)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn imprint(fill: u8) -> Imprint {
        Imprint::new(HashAlgorithm::Sha2_256, vec![fill; 32]).unwrap()
    }

    fn link(direction: Direction, fill: u8) -> ChainLink {
        ChainLink::new(direction, 0, LinkSibling::Imprint(imprint(fill)))
    }

    #[test]
    fn high_bit_values() {
        assert_eq!(high_bit(1), 1);
        assert_eq!(high_bit(2), 2);
        assert_eq!(high_bit(3), 2);
        assert_eq!(high_bit(11), 8);
        assert_eq!(high_bit(u64::MAX), 1 << 63);
    }

    #[test]
    fn aggregate_is_deterministic() {
        let links = vec![link(Direction::Left, 0x11), link(Direction::Right, 0x22)];
        let input = imprint(0xaa);
        let (out1, level1) = aggregate(&links, &input, 0, HashAlgorithm::Sha2_256).unwrap();
        let (out2, level2) = aggregate(&links, &input, 0, HashAlgorithm::Sha2_256).unwrap();
        assert_eq!(out1, out2);
        assert_eq!(level1, level2);
        assert_eq!(level1, 2);
    }

    #[test]
    fn direction_changes_the_fold() {
        let input = imprint(0xaa);
        let left = aggregate(
            &[link(Direction::Left, 0x11)],
            &input,
            0,
            HashAlgorithm::Sha2_256,
        )
        .unwrap();
        let right = aggregate(
            &[link(Direction::Right, 0x11)],
            &input,
            0,
            HashAlgorithm::Sha2_256,
        )
        .unwrap();
        assert_ne!(left.0, right.0);
    }

    #[test]
    fn fold_matches_manual_step() {
        let input = imprint(0xaa);
        let sibling = imprint(0x11);
        let (out, level) = aggregate(
            &[ChainLink::new(
                Direction::Left,
                2,
                LinkSibling::Imprint(sibling.clone()),
            )],
            &input,
            0,
            HashAlgorithm::Sha2_256,
        )
        .unwrap();
        assert_eq!(level, 3);

        let mut hasher = Hasher::open(HashAlgorithm::Sha2_256).unwrap();
        hasher.update(&input.as_wire());
        hasher.update(&sibling.as_wire());
        hasher.update(&[3u8]);
        assert_eq!(out, hasher.finalize());
    }

    #[test]
    fn metadata_is_folded_verbatim() {
        let input = imprint(0xaa);
        let meta = vec![0x04, 0x0a, 0x01, 0x02, 0x03];
        let (out, _) = aggregate(
            &[ChainLink::new(
                Direction::Right,
                0,
                LinkSibling::MetaData(meta.clone()),
            )],
            &input,
            0,
            HashAlgorithm::Sha2_256,
        )
        .unwrap();

        let mut hasher = Hasher::open(HashAlgorithm::Sha2_256).unwrap();
        hasher.update(&meta);
        hasher.update(&input.as_wire());
        hasher.update(&[1u8]);
        assert_eq!(out, hasher.finalize());
    }

    #[test]
    fn level_overflow_is_rejected() {
        let input = imprint(0xaa);

        let oversized_correction = vec![ChainLink::new(
            Direction::Left,
            0x100,
            LinkSibling::Imprint(imprint(0x11)),
        )];
        let err = aggregate(&oversized_correction, &input, 0, HashAlgorithm::Sha2_256).unwrap_err();
        assert!(err.to_string().contains("level out of range"));

        let overflowing = vec![ChainLink::new(
            Direction::Left,
            0xfe,
            LinkSibling::Imprint(imprint(0x11)),
        )];
        let err = aggregate(&overflowing, &input, 200, HashAlgorithm::Sha2_256).unwrap_err();
        assert!(err.to_string().contains("level out of range"));
    }

    #[test]
    fn empty_chains_are_rejected() {
        let input = imprint(0xaa);
        assert!(aggregate(&[], &input, 0, HashAlgorithm::Sha2_256).is_err());
        assert!(aggregate_calendar(&[], &input).is_err());
        assert!(calendar_aggregation_time(&[], 11).is_err());
    }

    #[test]
    fn calendar_fold_switches_algorithm_on_left_links() {
        let input = imprint(0xaa);
        let sibling512 = Imprint::new(HashAlgorithm::Sha2_512, vec![0x11; 64]).unwrap();

        let root = aggregate_calendar(
            &[ChainLink::new(
                Direction::Left,
                0,
                LinkSibling::Imprint(sibling512.clone()),
            )],
            &input,
        )
        .unwrap();
        assert_eq!(root.algorithm(), HashAlgorithm::Sha2_512);

        // A right link keeps the input's algorithm.
        let root = aggregate_calendar(
            &[ChainLink::new(
                Direction::Right,
                0,
                LinkSibling::Imprint(sibling512),
            )],
            &input,
        )
        .unwrap();
        assert_eq!(root.algorithm(), HashAlgorithm::Sha2_256);
    }

    #[test]
    fn calendar_fold_appends_calendar_level() {
        let input = imprint(0xaa);
        let sibling = imprint(0x11);
        let root = aggregate_calendar(
            &[ChainLink::new(
                Direction::Right,
                0,
                LinkSibling::Imprint(sibling.clone()),
            )],
            &input,
        )
        .unwrap();

        let mut hasher = Hasher::open(HashAlgorithm::Sha2_256).unwrap();
        hasher.update(&sibling.as_wire());
        hasher.update(&input.as_wire());
        hasher.update(&[CALENDAR_LEVEL]);
        assert_eq!(root, hasher.finalize());
    }

    #[test]
    fn aggregation_time_reconstruction() {
        // Publication second 11, aggregation second 9: the calendar walk
        // from the last link is right (+8), left (shape), right (+1).
        let links = vec![
            link(Direction::Right, 1),
            link(Direction::Left, 2),
            link(Direction::Right, 3),
        ];
        assert_eq!(calendar_aggregation_time(&links, 11).unwrap(), 9);
    }

    #[test]
    fn aggregation_time_rejects_inconsistent_shapes() {
        // Two right turns starting from r = 1 exhaust r mid-walk.
        let links = vec![link(Direction::Right, 1), link(Direction::Right, 2)];
        assert!(calendar_aggregation_time(&links, 1).is_err());

        // A leftover residue fails the terminal check.
        let links = vec![link(Direction::Left, 1)];
        assert!(calendar_aggregation_time(&links, 11).is_err());
    }
}
