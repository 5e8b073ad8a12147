//! Shared inputs for the codec and fold benchmarks.

use ksig_core::hash::{HashAlgorithm, Imprint};
use ksig_core::hashchain::{ChainLink, Direction, LinkSibling};
use ksig_core::tlv::Tlv;

pub fn imprint(fill: u8) -> Imprint {
    Imprint::new(HashAlgorithm::Sha2_256, vec![fill; 32]).expect("valid digest length")
}

/// A signature-shaped TLV tree: nested containers with imprint-sized and
/// integer leaves.
pub fn sample_tree(chains: usize, links_per_chain: usize) -> Tlv {
    let mut children = Vec::new();
    for c in 0..chains {
        let mut chain = vec![
            Tlv::from_uint(0x02, 1_405_382_400 + c as u64).expect("uint"),
            Tlv::from_raw(0x05, imprint(c as u8).as_wire()).expect("raw"),
            Tlv::from_uint(0x06, 1).expect("uint"),
        ];
        for l in 0..links_per_chain {
            chain.push(
                Tlv::from_nested(
                    if l % 2 == 0 { 0x07 } else { 0x08 },
                    vec![Tlv::from_raw(0x02, imprint(l as u8).as_wire()).expect("raw")],
                )
                .expect("nested"),
            );
        }
        children.push(Tlv::from_nested(0x0801, chain).expect("nested"));
    }
    Tlv::from_nested(0x0800, children).expect("nested")
}

/// An aggregation chain of the given length with alternating directions.
pub fn sample_links(count: usize) -> Vec<ChainLink> {
    (0..count)
        .map(|i| {
            ChainLink::new(
                if i % 2 == 0 {
                    Direction::Left
                } else {
                    Direction::Right
                },
                0,
                LinkSibling::Imprint(imprint(i as u8)),
            )
        })
        .collect()
}
