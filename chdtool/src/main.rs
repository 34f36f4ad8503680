use anyhow::{anyhow, bail};
use chd_reader::header::{Header, Version};
use chd_reader::map::{LegacyEntryType, MapEntry, V5CompressionType};
use chd_reader::read::ChdReader;
use chd_reader::{find_codec, make_tag, Chd};
use clap::{Parser, Subcommand};
use sha1::{Digest, Sha1};
use std::ffi::OsStr;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, Write};
use std::path::{Path, PathBuf};
use thousands::Separable;

fn validate_file_exists(s: &OsStr) -> Result<PathBuf, std::io::Error> {
    let path = PathBuf::from(s);
    if path.is_file() {
        return Ok(path);
    }
    Err(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        "File not found or not a file.",
    ))
}

fn parse_fourcc(s: &str) -> anyhow::Result<u32> {
    let bytes = s.as_bytes();
    if bytes.is_empty() || bytes.len() > 4 {
        bail!("tag must be 1 to 4 characters");
    }
    let mut tag = [b' '; 4];
    tag[..bytes.len()].copy_from_slice(bytes);
    Ok(make_tag(&tag))
}

fn fourcc_to_string(tag: u32) -> String {
    let bytes = tag.to_be_bytes();
    if bytes.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
        bytes.iter().map(|&b| b as char).collect()
    } else {
        format!("{tag:08x}")
    }
}

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
#[clap(propagate_version = true)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Displays information about a CHD
    Info {
        /// input file name
        #[clap(short, long, parse(try_from_os_str = validate_file_exists))]
        input: PathBuf,

        /// output a hunk type histogram
        #[clap(short, long)]
        verbose: bool,
    },
    /// Verifies the data SHA1 of a CHD
    Verify {
        /// input file name
        #[clap(short, long, parse(try_from_os_str = validate_file_exists))]
        input: PathBuf,
        /// parent file name for input CHD
        #[clap(short = 'p', long, parse(try_from_os_str = validate_file_exists))]
        inputparent: Option<PathBuf>,
    },
    /// Dump metadata from the CHD to stdout or to a file
    Dumpmeta {
        /// input file name
        #[clap(short, long, parse(try_from_os_str = validate_file_exists))]
        input: PathBuf,
        /// output file name
        #[clap(short, long)]
        output: Option<PathBuf>,
        /// force overwriting an existing file
        #[clap(short, long)]
        force: bool,
        /// 4-character tag for metadata
        #[clap(short, long, parse(try_from_str = parse_fourcc))]
        tag: u32,
        #[clap(short = 'x', long, default_value = "0")]
        index: u32,
    },
    /// Extract the raw contents of a CHD to a file
    Extractraw {
        /// output file name
        #[clap(short, long)]
        output: PathBuf,
        /// force overwriting an existing file
        #[clap(short, long)]
        force: bool,
        /// input file name
        #[clap(short, long, parse(try_from_os_str = validate_file_exists))]
        input: PathBuf,
        /// parent file name for input CHD
        #[clap(short = 'p', long, parse(try_from_os_str = validate_file_exists))]
        inputparent: Option<PathBuf>,
    },
}

type FileChd = Chd<BufReader<File>>;

fn open_with_parent(input: &Path, parent: Option<&Path>) -> anyhow::Result<FileChd> {
    let parent = match parent {
        Some(path) => Some(Box::new(Chd::open_path(path, None)?)),
        None => None,
    };
    Ok(Chd::open_path(input, parent)?)
}

fn create_output(output: &Path, force: bool) -> anyhow::Result<File> {
    Ok(OpenOptions::new()
        .write(true)
        .create_new(!force)
        .create(true)
        .truncate(true)
        .open(output)?)
}

fn codec_name(tag: u32) -> String {
    match find_codec(tag) {
        Some(codec) => codec.name.to_string(),
        None => format!("unknown ({})", fourcc_to_string(tag)),
    }
}

fn print_compression(header: &Header) {
    if !header.is_compressed() {
        println!("Compression:\tnone");
        return;
    }
    let slots = if header.version == Version::ChdV5 { 4 } else { 1 };
    let names: Vec<_> = header.compression[..slots]
        .iter()
        .filter(|&&c| c != 0)
        .map(|&c| codec_name(c))
        .collect();
    println!("Compression:\t{}", names.join(", "));
}

fn print_hashes(header: &Header) {
    if let Some(md5) = header.md5() {
        println!("MD5:\t\t{}", hex::encode(md5));
    }
    if let Some(sha1) = header.sha1() {
        println!("SHA1:\t\t{}", hex::encode(sha1));
    }
    if let Some(raw_sha1) = header.raw_sha1() {
        println!("Data SHA1:\t{}", hex::encode(raw_sha1));
    }
    if header.has_parent() {
        if let Some(md5) = header.parent_md5() {
            println!("Parent MD5:\t{}", hex::encode(md5));
        }
        if let Some(sha1) = header.parent_sha1() {
            println!("Parent SHA1:\t{}", hex::encode(sha1));
        }
    }
}

fn print_histogram<F: Read + Seek>(chd: &Chd<F>) -> anyhow::Result<()> {
    // slots 0-3 are the codecs, then none, self, parent, mini
    let mut counts = [0u64; 8];
    for entry in chd.map().iter() {
        let slot = match entry {
            MapEntry::V5Compressed(e) => match e.hunk_type()? {
                t @ (V5CompressionType::CompressionType0
                | V5CompressionType::CompressionType1
                | V5CompressionType::CompressionType2
                | V5CompressionType::CompressionType3) => t as usize,
                V5CompressionType::CompressionNone => 4,
                V5CompressionType::CompressionSelf => 5,
                V5CompressionType::CompressionParent => 6,
                t => bail!("unexpected map entry type {t:?}"),
            },
            MapEntry::V5Uncompressed(e) if e.block_offset() == 0 => 6,
            MapEntry::V5Uncompressed(_) => 4,
            MapEntry::LegacyEntry(e) => match e.hunk_type()? {
                LegacyEntryType::Compressed => 0,
                LegacyEntryType::Uncompressed => 4,
                LegacyEntryType::SelfHunk => 5,
                LegacyEntryType::ParentHunk => 6,
                LegacyEntryType::Mini => 7,
                t => bail!("unexpected map entry type {t:?}"),
            },
        };
        counts[slot] += 1;
    }

    let total = chd.map().len().max(1) as f64;
    println!();
    println!("     Hunks  Percent  Name");
    println!("----------  -------  ------------------------------------");
    for (slot, &count) in counts.iter().enumerate() {
        if count == 0 {
            continue;
        }
        let name = match slot {
            0..=3 => codec_name(chd.header().compression[slot]),
            4 => "Uncompressed".to_string(),
            5 => "Copy from self".to_string(),
            6 => "Copy from parent".to_string(),
            _ => "Legacy 8-byte mini".to_string(),
        };
        println!(
            "{:>10}   {:>5.1}%  {:<40}",
            count.separate_with_commas(),
            100.0 * count as f64 / total,
            name
        );
    }
    Ok(())
}

fn info(input: &Path, verbose: bool) -> anyhow::Result<()> {
    let file_size = std::fs::metadata(input)?.len();
    let mut chd = Chd::open_path(input, None)?;
    let header = chd.header();

    println!("Input file:\t{}", input.display());
    println!("File Version:\t{}", header.version as u32);
    println!(
        "Logical size:\t{} bytes",
        header.logical_bytes.separate_with_commas()
    );
    println!("Hunk Size:\t{} bytes", header.hunk_bytes.separate_with_commas());
    println!("Total Hunks:\t{}", header.hunk_count.separate_with_commas());
    println!("Unit Size:\t{} bytes", header.unit_bytes.separate_with_commas());
    println!("Total Units:\t{}", header.unit_count.separate_with_commas());
    print_compression(header);
    println!("CHD size:\t{} bytes", file_size.separate_with_commas());
    if header.is_compressed() && header.logical_bytes > 0 {
        println!(
            "Ratio:\t\t{:.1}%",
            100.0 * file_size as f64 / header.logical_bytes as f64
        );
    }
    print_hashes(header);

    let metadata = chd.metadata_refs().try_into_vec()?;
    for meta in metadata {
        println!(
            "Metadata:\tTag='{}'  Index={}  Length={} bytes",
            fourcc_to_string(meta.metatag),
            meta.index,
            meta.length
        );
        let printable: String = meta
            .value
            .iter()
            .map(|&b| {
                if b.is_ascii_graphic() || b == b' ' {
                    b as char
                } else {
                    '.'
                }
            })
            .collect();
        println!("              \t{printable}");
    }

    if verbose {
        print_histogram(&chd)?;
    }
    Ok(())
}

fn verify(input: &Path, parent: Option<&Path>) -> anyhow::Result<()> {
    let chd = open_with_parent(input, parent)?;
    let expected = match chd.header().version {
        Version::ChdV3 => chd.header().sha1,
        Version::ChdV4 | Version::ChdV5 => chd.header().raw_sha1,
        _ => bail!("No verification to be done; CHD has no SHA1"),
    };

    let mut reader = ChdReader::new(chd);
    let mut hasher = Sha1::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let read = reader.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    let actual = hasher.finalize();

    if actual[..] != expected[..] {
        return Err(anyhow!(
            "Raw SHA1 in header = {}\n              actual SHA1 = {}",
            hex::encode(expected),
            hex::encode(actual)
        ));
    }
    println!("Raw SHA1 verification successful!");
    Ok(())
}

fn dumpmeta(
    input: &Path,
    output: Option<&Path>,
    force: bool,
    tag: u32,
    index: u32,
) -> anyhow::Result<()> {
    let mut chd = Chd::open_path(input, None)?;
    let meta = chd
        .get_metadata(tag, index)
        .map_err(|e| anyhow!("Error reading metadata: {e}"))?;

    match output {
        Some(output) => {
            create_output(output, force)?.write_all(&meta.value)?;
            println!("File ({}) written, {} bytes", output.display(), meta.length);
        }
        None => println!("{}", String::from_utf8_lossy(&meta.value)),
    }
    Ok(())
}

fn extractraw(
    input: &Path,
    parent: Option<&Path>,
    output: &Path,
    force: bool,
) -> anyhow::Result<()> {
    let chd = open_with_parent(input, parent)?;
    let mut output_file = BufWriter::new(create_output(output, force)?);

    println!("Output File:  {}", output.display());
    println!("Input CHD:    {}", input.display());

    let mut reader = ChdReader::new(chd);
    let written = std::io::copy(&mut reader, &mut output_file)?;
    output_file.flush()?;
    println!(
        "Extraction complete, {} bytes written",
        written.separate_with_commas()
    );
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    match &cli.command {
        Commands::Info { input, verbose } => info(input, *verbose),
        Commands::Verify { input, inputparent } => verify(input, inputparent.as_deref()),
        Commands::Dumpmeta {
            input,
            output,
            force,
            tag,
            index,
        } => dumpmeta(input, output.as_deref(), *force, *tag, *index),
        Commands::Extractraw {
            input,
            inputparent,
            force,
            output,
        } => extractraw(input, inputparent.as_deref(), output, *force),
    }
}
