use std::sync::Mutex;

use log::info;

use crate::diagnostics::{Diagnostics, NoDiagnostics};
use crate::error::{invalid, CodestreamError, Result};
use crate::geometry::Region;
use crate::model::codestream::{Codestream, CodestreamInfo};
use crate::pipeline::{Pipeline, StageContext};
use crate::source::{ByteSource, SeekRead};
use crate::tasks::{DecodedImage, Tasks};

/// What to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecodeRequest {
    /// Region of the reference grid, the whole image when None.
    pub region: Option<Region>,
    /// Highest resolution levels to discard.
    pub reduce: u8,
    /// Turn recoverable anomalies into errors.
    pub strict: bool,
}

impl DecodeRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn region(mut self, region: Region) -> Self {
        self.region = Some(region);
        self
    }

    pub fn reduce(mut self, reduce: u8) -> Self {
        self.reduce = reduce;
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }
}

/// Decodes one codestream.
///
/// The main header is read when the decoder is created, so its contents can
/// be inspected before anything else is decoded.
pub struct Decoder {
    codestream: Codestream,
    source: Mutex<ByteSource>,
    request: DecodeRequest,
    tasks: Tasks,
    decoded: bool,
}

impl Decoder {
    /// Reads the main header of the codestream in `reader`, which starts at
    /// its current position.
    pub fn new<R: SeekRead + 'static>(reader: R) -> Result<Decoder> {
        let mut source = ByteSource::new(reader)?;
        let mut codestream = Codestream::init(&mut source)?;
        codestream.read_main_header(&mut source)?;

        Ok(Decoder {
            codestream,
            source: Mutex::new(source),
            request: DecodeRequest::default(),
            tasks: Tasks::default(),
            decoded: false,
        })
    }

    pub fn with_request(mut self, request: DecodeRequest) -> Self {
        self.request = request;
        self
    }

    pub fn with_tasks(mut self, tasks: Tasks) -> Self {
        self.tasks = tasks;
        self
    }

    pub fn codestream(&self) -> &Codestream {
        &self.codestream
    }

    pub fn request(&self) -> &DecodeRequest {
        &self.request
    }

    pub fn info(&self) -> CodestreamInfo {
        self.codestream.info()
    }

    /// Runs the pipeline over every tile-part and returns the assembled
    /// image. A decoder decodes once.
    pub fn decode(&mut self, diagnostics: &mut dyn Diagnostics) -> Result<DecodedImage> {
        if self.decoded {
            return Err(invalid!("codestream already decoded"));
        }
        self.decoded = true;

        self.codestream
            .request(self.request.region, self.request.reduce)?;
        info!(
            "decoding {} tiles, reduce {}, strict {}",
            self.codestream.requested_tiles().len(),
            self.request.reduce,
            self.request.strict
        );

        let mut source = self
            .source
            .lock()
            .map_err(|_| invalid!("codestream source poisoned"))?;
        let mut ctx = StageContext {
            codestream: &mut self.codestream,
            source: &mut *source,
            request: &self.request,
            tasks: &mut self.tasks,
            diagnostics,
        };
        Pipeline::new().run(&mut ctx)?;

        let image = self
            .tasks
            .assembler
            .finish()
            .map_err(|e| CodestreamError::task("assembler", "image-finish", e))?;
        self.codestream.free();
        Ok(image)
    }
}

/// Decodes a whole codestream with the default tasks.
pub fn decode_jpc<R: SeekRead + 'static>(reader: R) -> Result<DecodedImage> {
    Decoder::new(reader)?.decode(&mut NoDiagnostics)
}
