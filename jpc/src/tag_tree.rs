use log::trace;

use crate::bit_reader::PacketBitReader;
use crate::error::Result;

/// A decoder from tag tree bits to numbers in the 2d-array.
///
/// B.10.2 A tag tree is a way of representing a two-dimensional array of non-negative integers in
/// a hierarchical way. It successively creates reduced resolution levels of this two-dimensional
/// array, forming a tree. At every node of this tree the minimum integer of the (up to four) nodes
/// below it is recorded. Level 0 of `levels` holds the leaves, the last level holds the root.
///
/// Values are only decoded as far as a threshold requires, so the same leaf can be queried again
/// in a later packet with a higher threshold and the decoder resumes where it stopped.
#[derive(Debug, Clone)]
pub struct TagTreeDecoder {
    width: u32,
    height: u32,
    levels: Vec<Level>,
}

#[derive(Debug, Clone)]
struct Level {
    width: u32,
    nodes: Vec<Node>,
}

#[derive(Debug, Clone, Copy)]
struct Node {
    // u32::MAX until a 1 bit fixed it
    value: u32,
    // Lower bound established by the bits read so far
    low: u32,
}

impl Default for Node {
    fn default() -> Self {
        Node {
            value: u32::MAX,
            low: 0,
        }
    }
}

impl TagTreeDecoder {
    pub fn new(width: u32, height: u32) -> Self {
        let mut w = width.max(1);
        let mut h = height.max(1);
        let mut levels = Vec::new();

        // Determine depth by dividing out groups of 4
        loop {
            levels.push(Level {
                width: w,
                nodes: vec![Node::default(); (w * h) as usize],
            });
            if w == 1 && h == 1 {
                break;
            }
            w = w.div_ceil(2);
            h = h.div_ceil(2);
        }

        trace!(
            "tag tree {}x{} with {} levels",
            width,
            height,
            levels.len()
        );

        Self {
            width,
            height,
            levels,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Reads bits until the leaf at `(x, y)` is known or known to be at
    /// least `threshold`.
    ///
    /// Returns the leaf value when it is below `threshold`, `None` otherwise.
    pub fn decode<R: std::io::Read>(
        &mut self,
        bits: &mut PacketBitReader<R>,
        x: u32,
        y: u32,
        threshold: u32,
    ) -> Result<Option<u32>> {
        debug_assert!(x < self.width && y < self.height);

        let mut low = 0;
        let mut leaf = Node::default();

        // Walk from the root down to the leaf, passing the lower bound on
        for (depth, level) in self.levels.iter_mut().enumerate().rev() {
            let index = ((y >> depth) * level.width + (x >> depth)) as usize;
            let node = &mut level.nodes[index];

            if low > node.low {
                node.low = low;
            } else {
                low = node.low;
            }

            while low < threshold && low < node.value {
                if bits.read_bit()? == 1 {
                    node.value = low;
                } else {
                    low += 1;
                }
            }

            node.low = low;
            leaf = *node;
        }

        Ok(if leaf.value < threshold {
            Some(leaf.value)
        } else {
            None
        })
    }

    /// The decoded value of a leaf, if it is fully known.
    pub fn value(&self, x: u32, y: u32) -> Option<u32> {
        let leaves = &self.levels[0];
        let node = leaves.nodes.get((y * leaves.width + x) as usize)?;
        if node.value == u32::MAX {
            None
        } else {
            Some(node.value)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pack(bits: &[u8]) -> Vec<u8> {
        let mut bytes = vec![0u8; bits.len().div_ceil(8)];
        for (i, bit) in bits.iter().enumerate() {
            bytes[i / 8] |= bit << (7 - i % 8);
        }
        bytes
    }

    #[test]
    fn test_basic() {
        // Test basic tag tree from B.10.2, leaves decoded in raster order
        #[rustfmt::skip]
        let bits = pack(&[
            0, 1, 1, 1, 1, // 0,0 = 1
            0, 0, 1, // 1,0 = 3
            1, 0, 1, // 2,0 = 2
            0, 0, 1, // 3,0 = 3
            1, 0, 1, 1, // 4,0 = 2
            0, 1, // 5,0 = 3
            0, 1, // 0,1 = 2
            0, 1, // 1,1 = 2
            1, // 2,1 = 1
            0, 0, 0, 1, // 3,1 = 4
            0, 1, // 4,1 = 3
            1, // 5,1 = 2
            0, 1, 1, // 0,2 = 2
            1, // 1,2 = 2
            0, 1, 1, // 2,2 = 2
            1, // 3,2 = 2
            1, 1, // 4,2 = 1
            0, 1, // 5,2 = 2
        ]);
        let expected = [
            [1, 3, 2, 3, 2, 3],
            [2, 2, 1, 4, 3, 2],
            [2, 2, 2, 2, 1, 2],
        ];

        let mut tree = TagTreeDecoder::new(6, 3);
        assert_eq!(tree.levels.len(), 4);
        let mut reader = PacketBitReader::new(&bits[..], 0);
        for (y, row) in expected.iter().enumerate() {
            for (x, value) in row.iter().enumerate() {
                let decoded = tree
                    .decode(&mut reader, x as u32, y as u32, u32::MAX)
                    .unwrap();
                assert_eq!(decoded, Some(*value), "leaf {},{}", x, y);
            }
        }
    }

    #[test]
    fn test_threshold_resumes() {
        // A single leaf of value 2: 0, 0 raise the bound, 1 fixes it
        let bits = pack(&[0, 0, 1]);
        let mut tree = TagTreeDecoder::new(1, 1);
        let mut reader = PacketBitReader::new(&bits[..], 0);

        assert_eq!(tree.decode(&mut reader, 0, 0, 1).unwrap(), None);
        assert_eq!(tree.value(0, 0), None);
        assert_eq!(tree.decode(&mut reader, 0, 0, 2).unwrap(), None);
        assert_eq!(tree.decode(&mut reader, 0, 0, 3).unwrap(), Some(2));
        // Known values consume no further bits
        assert_eq!(tree.decode(&mut reader, 0, 0, 10).unwrap(), Some(2));
        assert_eq!(reader.bytes_consumed(), 1);
        assert_eq!(tree.value(0, 0), Some(2));
    }
}
