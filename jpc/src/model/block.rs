use log::trace;

use crate::countdown::CompletionToken;
use crate::geometry::{GridRegion, Region};
use crate::packet::CodewordSegment;
use crate::source::Substream;

/// Codeword bytes of one terminated segment, gathered over all layers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueuedSegment {
    pub index: u32,
    pub passes: u32,
    pub length: u32,
    pub ranges: Vec<Substream>,
}

/// Leaf unit of entropy coding.
#[derive(Debug)]
pub struct CodeBlock {
    pub(crate) region: Region,

    // Inclusion state (B.10.4), beta is LBlock
    pub(crate) included: bool,
    pub(crate) zero_bitplanes: u32,
    pub(crate) beta: u8,

    // Passes signalled so far, including ones whose data was abandoned
    pub(crate) passes: u32,
    pub(crate) layers_seen: u16,

    pub(crate) segments: Vec<QueuedSegment>,
    pub(crate) token: Option<CompletionToken>,
    pub(crate) finished: bool,
}

impl CodeBlock {
    pub(crate) fn new(region: Region, token: Option<CompletionToken>) -> Self {
        CodeBlock {
            region,
            included: false,
            zero_bitplanes: 0,
            beta: 0,
            passes: 0,
            layers_seen: 0,
            segments: vec![],
            token,
            finished: false,
        }
    }

    pub fn is_included(&self) -> bool {
        self.included
    }

    pub fn zero_bitplanes(&self) -> u32 {
        self.zero_bitplanes
    }

    pub fn lblock(&self) -> u8 {
        self.beta
    }

    pub fn passes(&self) -> u32 {
        self.passes
    }

    pub fn layers_seen(&self) -> u16 {
        self.layers_seen
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn segments(&self) -> &[QueuedSegment] {
        &self.segments
    }

    /// Passes whose codeword bytes actually arrived.
    pub fn queued_passes(&self) -> u32 {
        self.segments.iter().map(|segment| segment.passes).sum()
    }

    /// Appends the bytes of a packet to the segment they continue.
    pub(crate) fn queue(&mut self, segment: &CodewordSegment) {
        let data = match segment.data {
            Some(data) => data,
            None => return,
        };

        match self.segments.last_mut() {
            Some(last) if last.index == segment.index => {
                last.passes += segment.passes;
                last.length += segment.length;
                if data.length > 0 {
                    last.ranges.push(data);
                }
            }
            _ => self.segments.push(QueuedSegment {
                index: segment.index,
                passes: segment.passes,
                length: segment.length,
                ranges: if data.length > 0 { vec![data] } else { vec![] },
            }),
        }

        trace!(
            "block {:?} segment {} now {} bytes",
            self.region,
            segment.index,
            self.segments.last().map_or(0, |s| s.length)
        );
    }

    /// Drops working state once the block has been decoded.
    pub(crate) fn release(&mut self) {
        self.segments = vec![];
        self.finished = true;
    }
}

impl GridRegion for CodeBlock {
    fn region(&self) -> Region {
        self.region
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(index: u32, passes: u32, offset: u64, length: u32) -> CodewordSegment {
        CodewordSegment {
            index,
            passes,
            length,
            data: Some(Substream { offset, length }),
        }
    }

    #[test]
    fn test_queue_merges_continued_segments() {
        let mut block = CodeBlock::new(Region::new(0, 0, 4, 4), None);
        block.queue(&segment(0, 3, 10, 10));
        block.queue(&segment(0, 1, 40, 5));
        block.queue(&segment(1, 2, 60, 7));

        assert_eq!(block.segments().len(), 2);
        assert_eq!(block.segments()[0].passes, 4);
        assert_eq!(block.segments()[0].length, 15);
        assert_eq!(
            block.segments()[0].ranges,
            vec![
                Substream {
                    offset: 10,
                    length: 10
                },
                Substream {
                    offset: 40,
                    length: 5
                },
            ]
        );
        assert_eq!(block.queued_passes(), 6);
    }

    #[test]
    fn test_abandoned_data_is_not_queued() {
        let mut block = CodeBlock::new(Region::new(0, 0, 4, 4), None);
        block.queue(&CodewordSegment {
            index: 0,
            passes: 2,
            length: 9,
            data: None,
        });
        assert!(block.segments().is_empty());
    }
}
