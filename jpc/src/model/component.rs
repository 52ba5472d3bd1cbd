use crate::countdown::{CompletionToken, Countdown};
use crate::error::{invalid, Result};
use crate::geometry::{GridRegion, Region};
use crate::marker::{CodingStyleParameters, ComponentSize, Quantization};
use crate::model::resolution::{Resolution, ResolutionParameters};

/// One component of one tile.
#[derive(Debug)]
pub struct TileComponent {
    pub(crate) index: u16,
    pub(crate) region: Region,
    pub(crate) size: ComponentSize,
    pub(crate) coding: CodingStyleParameters,
    pub(crate) quantization: Quantization,
    pub(crate) roi_shift: u8,
    pub(crate) resolutions: Vec<Resolution>,

    // Highest resolution that is decoded, NL minus the reduction
    pub(crate) top_resolution: u8,
    // Next resolution the inverse wavelet transform waits for
    pub(crate) next_resolution: u8,

    // Decoded resolutions still to finish
    pub(crate) countdown: Countdown,
    // Reported to the tile once every decoded resolution finished
    pub(crate) token: Option<CompletionToken>,

    samples: Option<Vec<f32>>,
}

impl TileComponent {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        index: u16,
        region: Region,
        size: ComponentSize,
        coding: CodingStyleParameters,
        quantization: Quantization,
        roi_shift: u8,
        reduce: u8,
        token: Option<CompletionToken>,
    ) -> Result<Self> {
        let levels = coding.no_decomposition_levels();
        if reduce > levels {
            return Err(invalid!(
                "cannot discard {} resolution levels of component {} with {} decomposition levels",
                reduce,
                index,
                levels
            ));
        }
        let top_resolution = levels - reduce;
        let countdown = Countdown::new(top_resolution as usize + 1);

        let parameters = ResolutionParameters {
            tile_component: region,
            coding: &coding,
            quantization: &quantization,
            roi_shift,
        };
        let mut resolutions = Vec::with_capacity(levels as usize + 1);
        for r in 0..=levels {
            let decoded = r <= top_resolution;
            let token = if decoded {
                Some(
                    countdown
                        .issue()
                        .ok_or_else(|| invalid!("more resolutions than counted"))?,
                )
            } else {
                None
            };
            resolutions.push(Resolution::new(&parameters, r, decoded, token)?);
        }

        Ok(TileComponent {
            index,
            region,
            size,
            coding,
            quantization,
            roi_shift,
            resolutions,
            top_resolution,
            next_resolution: 0,
            countdown,
            token,
            samples: None,
        })
    }

    pub fn index(&self) -> u16 {
        self.index
    }

    pub fn size(&self) -> &ComponentSize {
        &self.size
    }

    pub fn coding(&self) -> &CodingStyleParameters {
        &self.coding
    }

    pub fn quantization(&self) -> &Quantization {
        &self.quantization
    }

    pub fn roi_shift(&self) -> u8 {
        self.roi_shift
    }

    pub fn resolutions(&self) -> &[Resolution] {
        &self.resolutions
    }

    pub fn top_resolution(&self) -> u8 {
        self.top_resolution
    }

    /// Region of the highest decoded resolution, the extent of the samples.
    pub fn output_region(&self) -> Region {
        self.resolutions[self.top_resolution as usize].region
    }

    /// The sample buffer, allocated on first use.
    pub(crate) fn samples_mut(&mut self) -> &mut Vec<f32> {
        let area = self.output_region().area() as usize;
        self.samples.get_or_insert_with(|| vec![0.0; area])
    }

    pub fn samples(&self) -> Option<&[f32]> {
        self.samples.as_deref()
    }

    pub(crate) fn take_samples(&mut self) -> Vec<f32> {
        let area = self.output_region().area() as usize;
        self.samples.take().unwrap_or_else(|| vec![0.0; area])
    }

    /// Where band `kind` of resolution `r` starts in the sample buffer: the
    /// low pass bands of lower resolutions fill the top left corner.
    pub(crate) fn band_origin(&self, r: u8, kind: crate::geometry::BandKind) -> (u32, u32) {
        if r == 0 {
            return (0, 0);
        }
        let low = self.resolutions[r as usize - 1].region;
        let (xob, yob) = kind.offsets();
        (xob * low.width(), yob * low.height())
    }
}

impl GridRegion for TileComponent {
    fn region(&self) -> Region {
        self.region
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::BandKind;
    use crate::marker::{QuantizationStyle, StepSize};

    fn component(reduce: u8) -> Result<TileComponent> {
        TileComponent::new(
            0,
            Region::new(0, 0, 33, 17),
            ComponentSize {
                depth: 7,
                horizontal_separation: 1,
                vertical_separation: 1,
            },
            CodingStyleParameters {
                no_decomposition_levels: 2,
                code_block_width_offset: 2,
                code_block_height_offset: 2,
                ..Default::default()
            },
            Quantization {
                style: QuantizationStyle::No,
                guard_bits: 2,
                step_sizes: vec![StepSize::default(); 7],
            },
            0,
            reduce,
            None,
        )
    }

    #[test]
    fn test_reduction() {
        let reduced = component(1).unwrap();
        assert_eq!(reduced.top_resolution(), 1);
        assert_eq!(reduced.output_region(), Region::new(0, 0, 17, 9));
        assert_eq!(reduced.countdown.remaining(), 2);
        assert!(reduced.resolutions[1].is_decoded());
        assert!(!reduced.resolutions[2].is_decoded());
        assert!(reduced.resolutions[2].token.is_none());

        assert!(component(3).is_err());
    }

    #[test]
    fn test_band_origin() {
        let component = component(0).unwrap();
        assert_eq!(component.band_origin(0, BandKind::LL), (0, 0));
        // Resolution 1 is 17x9
        assert_eq!(component.band_origin(2, BandKind::HL), (17, 0));
        assert_eq!(component.band_origin(2, BandKind::LH), (0, 9));
        assert_eq!(component.band_origin(2, BandKind::HH), (17, 9));
    }

    #[test]
    fn test_samples_are_lazy() {
        let mut component = component(0).unwrap();
        assert!(component.samples().is_none());
        assert_eq!(component.samples_mut().len(), 33 * 17);
    }
}
