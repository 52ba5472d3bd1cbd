//! Packet ordering within a tile (B.12).

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::ops::Range;

use crate::error::{invalid, unsupported, Result};

/// Progression order (Table A.16).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum ProgressionOrder {
    // 0000 0000 Layer-resolution level-component-position progression
    #[default]
    Lrcp,

    // 0000 0001 Resolution level-layer-component-position progression
    Rlcp,

    // 0000 0010 Resolution level-position-component-layer progression
    Rpcl,

    // 0000 0011 Position-component-resolution level-layer progression
    Pcrl,

    // 0000 0100 Component-position-resolution level-layer progression
    Cprl,
}

impl ProgressionOrder {
    pub(crate) fn new(value: u8) -> Result<ProgressionOrder> {
        match value {
            0b0000_0000 => Ok(ProgressionOrder::Lrcp),
            0b0000_0001 => Ok(ProgressionOrder::Rlcp),
            0b0000_0010 => Ok(ProgressionOrder::Rpcl),
            0b0000_0011 => Ok(ProgressionOrder::Pcrl),
            0b0000_0100 => Ok(ProgressionOrder::Cprl),
            // All other values reserved
            _ => Err(unsupported!("progression order {}", value)),
        }
    }

    /// The key fields from the outermost to the innermost loop.
    fn sort_key(&self, key: &PacketKey) -> [u32; 4] {
        let c = key.component as u32;
        let r = key.resolution as u32;
        let l = key.layer as u32;
        let p = key.precinct;
        match self {
            ProgressionOrder::Lrcp => [l, r, c, p],
            ProgressionOrder::Rlcp => [r, l, c, p],
            ProgressionOrder::Rpcl => [r, p, c, l],
            ProgressionOrder::Pcrl => [p, c, r, l],
            ProgressionOrder::Cprl => [c, p, r, l],
        }
    }

    pub fn compare(&self, a: &PacketKey, b: &PacketKey) -> Ordering {
        self.sort_key(a).cmp(&self.sort_key(b))
    }
}

/// Identifies one packet of a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PacketKey {
    pub component: u16,
    pub resolution: u8,
    pub layer: u16,
    pub precinct: u32,
}

impl PacketKey {
    pub fn new(component: u16, resolution: u8, layer: u16, precinct: u32) -> Self {
        PacketKey {
            component,
            resolution,
            layer,
            precinct,
        }
    }
}

/// The packets one progression covers: components and resolutions are
/// half-open ranges, layers run from 0 to `layers`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketBounds {
    pub components: Range<u16>,
    pub resolutions: Range<u8>,
    pub layers: u16,
}

/// Collects the packets of one progression and puts them in order.
#[derive(Debug)]
pub struct PacketJigsaw {
    order: ProgressionOrder,
    pieces: BTreeMap<[u32; 4], PacketKey>,
}

impl PacketJigsaw {
    pub fn new(order: ProgressionOrder) -> Self {
        PacketJigsaw {
            order,
            pieces: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, key: PacketKey) -> Result<()> {
        if self.pieces.insert(self.order.sort_key(&key), key).is_some() {
            return Err(invalid!("packet {:?} enumerated twice", key));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.pieces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }

    pub fn into_sequence(self) -> Vec<PacketKey> {
        self.pieces.into_values().collect()
    }

    /// Enumerates every packet within `bounds`. `precincts(c, r)` gives the
    /// number of precincts of resolution `r` of component `c`, zero when the
    /// component has no such resolution.
    pub fn solve<F>(order: ProgressionOrder, bounds: &PacketBounds, precincts: F) -> Result<Self>
    where
        F: Fn(u16, u8) -> u32,
    {
        let mut jigsaw = PacketJigsaw::new(order);
        for component in bounds.components.clone() {
            for resolution in bounds.resolutions.clone() {
                let no_precincts = precincts(component, resolution);
                for layer in 0..bounds.layers {
                    for precinct in 0..no_precincts {
                        jigsaw.insert(PacketKey::new(component, resolution, layer, precinct))?;
                    }
                }
            }
        }
        Ok(jigsaw)
    }
}

/// The packet visiting order of one tile.
///
/// Progressions are appended one after the other; a packet already
/// sequenced by an earlier progression is skipped.
#[derive(Debug, Default)]
pub struct PacketSequencer {
    packets: Vec<PacketKey>,
    seen: HashSet<PacketKey>,
    cursor: usize,
}

impl PacketSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `packets` and returns how many of them were new.
    pub fn append(&mut self, packets: impl IntoIterator<Item = PacketKey>) -> usize {
        let before = self.packets.len();
        for key in packets {
            if self.seen.insert(key) {
                self.packets.push(key);
            }
        }
        self.packets.len() - before
    }

    pub fn next(&mut self) -> Option<PacketKey> {
        let key = self.packets.get(self.cursor).copied()?;
        self.cursor += 1;
        Some(key)
    }

    pub fn peek(&self) -> Option<PacketKey> {
        self.packets.get(self.cursor).copied()
    }

    /// Restarts iteration at the first packet.
    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    /// Index of the next packet, which is also the number of packets read.
    pub fn position(&self) -> usize {
        self.cursor
    }

    pub fn remaining(&self) -> usize {
        self.packets.len() - self.cursor
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn packets(&self) -> &[PacketKey] {
        &self.packets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn keys(tuples: &[(u16, u8, u16, u32)]) -> Vec<PacketKey> {
        tuples
            .iter()
            .map(|&(c, r, l, p)| PacketKey::new(c, r, l, p))
            .collect()
    }

    fn bounds() -> PacketBounds {
        PacketBounds {
            components: 0..2,
            resolutions: 0..2,
            layers: 2,
        }
    }

    // Tuples are (component, resolution, layer, precinct); resolution r has r + 1 precincts
    #[rstest]
    #[case::lrcp(ProgressionOrder::Lrcp, &[
        (0, 0, 0, 0), (1, 0, 0, 0), (0, 1, 0, 0), (0, 1, 0, 1), (1, 1, 0, 0), (1, 1, 0, 1),
        (0, 0, 1, 0), (1, 0, 1, 0), (0, 1, 1, 0), (0, 1, 1, 1), (1, 1, 1, 0), (1, 1, 1, 1),
    ])]
    #[case::rlcp(ProgressionOrder::Rlcp, &[
        (0, 0, 0, 0), (1, 0, 0, 0), (0, 0, 1, 0), (1, 0, 1, 0),
        (0, 1, 0, 0), (0, 1, 0, 1), (1, 1, 0, 0), (1, 1, 0, 1),
        (0, 1, 1, 0), (0, 1, 1, 1), (1, 1, 1, 0), (1, 1, 1, 1),
    ])]
    #[case::rpcl(ProgressionOrder::Rpcl, &[
        (0, 0, 0, 0), (0, 0, 1, 0), (1, 0, 0, 0), (1, 0, 1, 0),
        (0, 1, 0, 0), (0, 1, 1, 0), (1, 1, 0, 0), (1, 1, 1, 0),
        (0, 1, 0, 1), (0, 1, 1, 1), (1, 1, 0, 1), (1, 1, 1, 1),
    ])]
    #[case::pcrl(ProgressionOrder::Pcrl, &[
        (0, 0, 0, 0), (0, 0, 1, 0), (0, 1, 0, 0), (0, 1, 1, 0),
        (1, 0, 0, 0), (1, 0, 1, 0), (1, 1, 0, 0), (1, 1, 1, 0),
        (0, 1, 0, 1), (0, 1, 1, 1), (1, 1, 0, 1), (1, 1, 1, 1),
    ])]
    #[case::cprl(ProgressionOrder::Cprl, &[
        (0, 0, 0, 0), (0, 0, 1, 0), (0, 1, 0, 0), (0, 1, 1, 0), (0, 1, 0, 1), (0, 1, 1, 1),
        (1, 0, 0, 0), (1, 0, 1, 0), (1, 1, 0, 0), (1, 1, 1, 0), (1, 1, 0, 1), (1, 1, 1, 1),
    ])]
    fn test_progression_order(
        #[case] order: ProgressionOrder,
        #[case] expected: &[(u16, u8, u16, u32)],
    ) {
        let jigsaw = PacketJigsaw::solve(order, &bounds(), |_, r| r as u32 + 1).unwrap();
        let sequence = jigsaw.into_sequence();
        assert_eq!(sequence, keys(expected));

        // Sorting an ordered sequence again changes nothing
        let mut sorted = sequence.clone();
        sorted.sort_by(|a, b| order.compare(a, b));
        assert_eq!(sorted, sequence);
    }

    #[test]
    fn test_duplicate_packet_is_rejected() {
        let mut jigsaw = PacketJigsaw::new(ProgressionOrder::Lrcp);
        jigsaw.insert(PacketKey::new(0, 0, 0, 0)).unwrap();
        assert!(jigsaw.insert(PacketKey::new(0, 0, 0, 0)).is_err());
        assert_eq!(jigsaw.len(), 1);
    }

    #[test]
    fn test_missing_resolutions_are_skipped() {
        // Component 1 has a single resolution
        let jigsaw = PacketJigsaw::solve(ProgressionOrder::Rlcp, &bounds(), |c, r| {
            if c == 1 && r > 0 {
                0
            } else {
                1
            }
        })
        .unwrap();
        assert_eq!(jigsaw.len(), 6);
    }

    #[test]
    fn test_sequencer_concatenates_progressions() {
        let mut sequencer = PacketSequencer::new();
        let first = PacketJigsaw::solve(
            ProgressionOrder::Rlcp,
            &PacketBounds {
                components: 0..1,
                resolutions: 0..2,
                layers: 1,
            },
            |_, _| 1,
        )
        .unwrap();
        assert_eq!(sequencer.append(first.into_sequence()), 2);

        // The full progression only adds the packets not seen yet
        let full = PacketJigsaw::solve(ProgressionOrder::Lrcp, &bounds(), |_, _| 1).unwrap();
        assert_eq!(sequencer.append(full.into_sequence()), 6);
        assert_eq!(sequencer.len(), 8);

        assert_eq!(sequencer.next(), Some(PacketKey::new(0, 0, 0, 0)));
        assert_eq!(sequencer.next(), Some(PacketKey::new(0, 1, 0, 0)));
        assert_eq!(sequencer.next(), Some(PacketKey::new(1, 0, 0, 0)));
        assert_eq!(sequencer.remaining(), 5);

        sequencer.reset();
        assert_eq!(sequencer.position(), 0);
        assert_eq!(sequencer.peek(), Some(PacketKey::new(0, 0, 0, 0)));
    }
}
