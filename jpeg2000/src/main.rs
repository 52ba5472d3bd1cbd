use clap::Parser;
use log::info;
use std::error;
use std::error::Error;
use std::ffi::OsStr;
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;

use jpc::diagnostics::Diagnostics;
use jpc::marker::marker_name;
use jpc::tile_part::TilePartPointer;
use jpc::{CodestreamError, DecodeRequest, Decoder, ImagePlane, PacketKey, Region};

#[derive(Debug)]
enum JP2000Error {
    DecodingCodestream { error: String },
    UnsupportedExtension { extension: String },
    InvalidRegion { region: String },
    UnsupportedOutput { components: usize },
}

impl error::Error for JP2000Error {}
impl fmt::Display for JP2000Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::DecodingCodestream { error } => {
                write!(f, "error decoding jpc codestream {}", error)
            }
            Self::UnsupportedExtension { extension } => {
                write!(f, "unsupported extension {}", extension)
            }
            Self::InvalidRegion { region } => {
                write!(f, "invalid region {}, expected x0,y0,x1,y1", region)
            }
            Self::UnsupportedOutput { components } => {
                write!(f, "pgm output needs one component, image has {}", components)
            }
        }
    }
}

#[derive(Parser)]
struct Opts {
    #[clap(subcommand)]
    subcommand: SubCommand,
}

#[derive(Parser)]
enum SubCommand {
    /// Print the main header and tile layout of a .jpc codestream
    Info(Info),

    /// Decode a .jpc codestream and print decoding statistics
    Decode(Decode),
}

#[derive(Parser)]
struct Info {
    /// Path to .jpc or .j2c file
    path: String,
}

#[derive(Parser)]
struct Decode {
    /// Path to .jpc or .j2c file
    path: String,

    /// Number of highest resolution levels to discard
    #[clap(short, long, default_value_t = 0)]
    reduce: u8,

    /// Region of the reference grid to decode, x0,y0,x1,y1
    #[clap(long, value_parser = parse_region)]
    region: Option<Region>,

    /// Fail on anomalies that are otherwise logged and skipped
    #[clap(long)]
    strict: bool,

    /// Write a single component image to this .pgm file
    #[clap(short, long)]
    output: Option<String>,
}

fn parse_region(value: &str) -> Result<Region, JP2000Error> {
    let invalid = || JP2000Error::InvalidRegion {
        region: value.to_owned(),
    };
    let coordinates = value
        .split(',')
        .map(|part| part.trim().parse::<u32>())
        .collect::<Result<Vec<u32>, _>>()
        .map_err(|_| invalid())?;
    match coordinates[..] {
        [x0, y0, x1, y1] if x0 < x1 && y0 < y1 => Ok(Region::new(x0, y0, x1, y1)),
        _ => Err(invalid()),
    }
}

/// Counts what the pipeline reports.
#[derive(Debug, Default)]
struct Statistics {
    tile_parts: u64,
    tiles: u64,
    packets: u64,
    corrupt_packets: u64,
    header_bytes: u64,
    body_bytes: u64,
    blocks_expected: u64,
    blocks_finished: u64,
    resolutions: u64,
    tiles_finished: u64,
}

impl Diagnostics for Statistics {
    fn tile_part(&mut self, _pointer: &TilePartPointer) {
        self.tile_parts += 1;
    }

    fn tile_instantiated(&mut self, _tile: u32) {
        self.tiles += 1;
    }

    fn packet(&mut self, _tile: u32, _key: PacketKey, header_length: u64, body_length: u64) {
        self.packets += 1;
        self.header_bytes += header_length;
        self.body_bytes += body_length;
    }

    fn corrupt_packet(&mut self, tile: u32, key: PacketKey, error: &CodestreamError) {
        info!("tile {} packet {:?}: {}", tile, key, error);
        self.corrupt_packets += 1;
    }

    fn resolution_started(&mut self, _tile: u32, _component: u16, _resolution: u8, blocks: u64) {
        self.blocks_expected += blocks;
    }

    fn block_finished(&mut self, _tile: u32, _component: u16, _resolution: u8) {
        self.blocks_finished += 1;
    }

    fn resolution_finished(&mut self, _tile: u32, _component: u16, _resolution: u8) {
        self.resolutions += 1;
    }

    fn tile_finished(&mut self, _tile: u32) {
        self.tiles_finished += 1;
    }
}

fn open_codestream(path: &Path) -> Result<BufReader<File>, Box<dyn Error>> {
    let extension = path.extension().and_then(OsStr::to_str).unwrap_or("");
    match extension {
        "jpc" | "j2c" | "j2k" => Ok(BufReader::new(File::open(path)?)),
        _ => Err(JP2000Error::UnsupportedExtension {
            extension: extension.to_owned(),
        }
        .into()),
    }
}

fn decoding_error(error: CodestreamError) -> JP2000Error {
    JP2000Error::DecodingCodestream {
        error: error.to_string(),
    }
}

fn print_info(decoder: &Decoder) {
    let info = decoder.info();
    println!(
        "canvas: ({}, {}) to ({}, {})",
        info.canvas.x0, info.canvas.y0, info.canvas.x1, info.canvas.y1
    );
    println!(
        "tiles: {} x {} of {} x {}",
        info.tiles_wide, info.tiles_high, info.tile_partition.width, info.tile_partition.height
    );
    println!("capabilities: {:?}", info.capabilities.profile());
    for (i, component) in info.components.iter().enumerate() {
        println!(
            "component {}: {} bit {}, subsampling {} x {}",
            i,
            component.precision(),
            if component.is_signed() { "signed" } else { "unsigned" },
            component.horizontal_separation(),
            component.vertical_separation()
        );
    }
    if let Some(cod) = &info.coding_style {
        let parameters = cod.parameters();
        println!(
            "coding: {:?}, {} layers, {} levels, {:?}, code-blocks {} x {}",
            cod.progression_order(),
            cod.no_layers(),
            parameters.no_decomposition_levels(),
            parameters.filter(),
            parameters.code_block_width(),
            parameters.code_block_height()
        );
    }
    println!("progression changes: {}", info.progression_changes);
    println!("tile-part lengths: {}", info.tile_part_lengths);
    println!("packed packet headers: {}", info.packed_packet_headers);
    for comment in &info.comments {
        println!("comment: {}", comment);
    }
    for segment in decoder.codestream().header().segments() {
        println!(
            "{} at byte offset {}, length {}",
            marker_name(segment.marker),
            segment.offset,
            segment.length
        );
    }
}

// Netpbm P5, samples clamped to the component precision
fn write_pgm(path: &str, plane: &ImagePlane) -> Result<(), Box<dyn Error>> {
    let precision = plane.precision.clamp(1, 16);
    let max = (1u32 << precision) - 1;
    let mut writer = BufWriter::new(File::create(path)?);
    write!(writer, "P5\n{} {}\n{}\n", plane.width(), plane.height(), max)?;
    for sample in &plane.samples {
        let value = sample.round().clamp(0.0, max as f32) as u32;
        if max > 255 {
            writer.write_all(&(value as u16).to_be_bytes())?;
        } else {
            writer.write_all(&[value as u8])?;
        }
    }
    writer.flush()?;
    Ok(())
}

fn run() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let opts: Opts = Opts::parse();

    match opts.subcommand {
        SubCommand::Info(c) => {
            let reader = open_codestream(Path::new(&c.path))?;
            let decoder = Decoder::new(reader).map_err(decoding_error)?;
            print_info(&decoder);
        }
        SubCommand::Decode(c) => {
            let reader = open_codestream(Path::new(&c.path))?;
            let mut request = DecodeRequest::new().reduce(c.reduce).strict(c.strict);
            if let Some(region) = c.region {
                request = request.region(region);
            }

            let mut decoder = Decoder::new(reader)
                .map_err(decoding_error)?
                .with_request(request);
            let mut statistics = Statistics::default();
            let image = decoder.decode(&mut statistics).map_err(decoding_error)?;

            let mut stdout = io::stdout().lock();
            writeln!(stdout, "tile-parts: {}", statistics.tile_parts)?;
            writeln!(
                stdout,
                "tiles: {} instantiated, {} finished",
                statistics.tiles, statistics.tiles_finished
            )?;
            writeln!(
                stdout,
                "packets: {} ({} corrupt), {} header bytes, {} body bytes",
                statistics.packets,
                statistics.corrupt_packets,
                statistics.header_bytes,
                statistics.body_bytes
            )?;
            writeln!(
                stdout,
                "code-blocks: {} of {}",
                statistics.blocks_finished, statistics.blocks_expected
            )?;
            writeln!(stdout, "resolutions: {}", statistics.resolutions)?;
            for (i, plane) in image.components.iter().enumerate() {
                writeln!(
                    stdout,
                    "component {}: {} x {} at ({}, {})",
                    i,
                    plane.width(),
                    plane.height(),
                    plane.region.x0,
                    plane.region.y0
                )?;
            }

            if let Some(output) = c.output {
                match &image.components[..] {
                    [plane] => write_pgm(&output, plane)?,
                    planes => {
                        return Err(JP2000Error::UnsupportedOutput {
                            components: planes.len(),
                        }
                        .into())
                    }
                }
            }
        }
    }

    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    match run() {
        Err(e) => Err(e.to_string().into()),
        Ok(_) => Ok(()),
    }
}
