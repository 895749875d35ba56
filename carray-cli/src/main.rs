use std::io::{self, BufRead, Read, Write};
use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};

use carray_codecs::{CParams, CodecId, FloatWidth, QuantizeSpec, Shuffle};
use carray_core::dtype::{DTypeKind, ElementType};
use carray_core::{CArray, CArrayOptions, Mode};

// ── CLI definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "carray",
    about = "Build, inspect, and randomly access columnar compressed CArray roots",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new CArray root from whitespace-separated numbers
    Create {
        /// Root directory to create
        root: PathBuf,
        /// Source of numbers ("-" reads stdin)
        #[arg(short, long, default_value = "-")]
        input: String,
        /// Element type: i8|i16|i32|i64|u8|u16|u32|u64|f32|f64|bool
        #[arg(short, long, default_value = "i8")]
        dtype: String,
        /// Rows per full chunk (default: chosen by the size heuristic)
        #[arg(long)]
        chunklen: Option<usize>,
        /// Codec to use: lz4 | zstd | deflate
        #[arg(short, long, default_value = "lz4")]
        codec: String,
        /// Compression level (0-9)
        #[arg(long, default_value_t = 5)]
        level: u8,
        /// Shuffle filter: none | byte | bit
        #[arg(long, default_value = "byte")]
        shuffle: String,
        /// Round floats to this many significant digits before compression
        #[arg(long)]
        quantize: Option<u32>,
    },
    /// Append whitespace-separated numbers to an existing root
    Append {
        root: PathBuf,
        #[arg(short, long, default_value = "-")]
        input: String,
    },
    /// Print a single element by index
    Get { root: PathBuf, index: usize },
    /// Print elements in a slice `[start:stop:step)`
    Slice {
        root: PathBuf,
        start: usize,
        stop: usize,
        #[arg(default_value_t = 1)]
        step: isize,
    },
    /// Sum all elements with dtype promotion
    Sum { root: PathBuf },
    /// Print storage metadata and compression statistics
    Inspect { root: PathBuf },
    /// Print indices where a boolean array is true
    Wheretrue {
        root: PathBuf,
        #[arg(long, default_value_t = 0)]
        skip: usize,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Benchmark random scalar reads through the block cache
    Bench {
        root: PathBuf,
        #[arg(short, long, default_value_t = 1000)]
        count: u64,
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
}

// ── Helpers ────────────────────────────────────────────────────────────────

fn dtype_from_name(name: &str) -> anyhow::Result<DTypeKind> {
    Ok(match name {
        "i8" => DTypeKind::I8,
        "i16" => DTypeKind::I16,
        "i32" => DTypeKind::I32,
        "i64" => DTypeKind::I64,
        "u8" => DTypeKind::U8,
        "u16" => DTypeKind::U16,
        "u32" => DTypeKind::U32,
        "u64" => DTypeKind::U64,
        "f32" => DTypeKind::F32,
        "f64" => DTypeKind::F64,
        "bool" => DTypeKind::Bool,
        other => anyhow::bail!("unknown dtype '{other}'. Valid options: i8,i16,i32,i64,u8,u16,u32,u64,f32,f64,bool"),
    })
}

fn codec_from_name(name: &str) -> anyhow::Result<CodecId> {
    CodecId::from_name(name).map_err(|e| anyhow::anyhow!("{e}"))
}

fn shuffle_from_name(name: &str) -> anyhow::Result<Shuffle> {
    Ok(match name {
        "none" => Shuffle::None,
        "byte" => Shuffle::Byte,
        "bit" => Shuffle::Bit,
        other => anyhow::bail!("unknown shuffle '{other}'. Valid options: none, byte, bit"),
    })
}

fn human_bytes(n: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut v = n as f64;
    let mut unit = 0;
    while v >= 1024.0 && unit < UNITS.len() - 1 {
        v /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{n} B")
    } else {
        format!("{v:.2} {}", UNITS[unit])
    }
}

/// Read whitespace-separated decimal numbers from `source` ("-" = stdin) and
/// pack them into `atom_size`-wide little-endian rows for `kind`.
fn read_rows(source: &str, kind: DTypeKind) -> anyhow::Result<Vec<u8>> {
    let text = if source == "-" {
        let mut buf = String::new();
        io::stdin().lock().read_to_string(&mut buf)?;
        buf
    } else {
        let f = std::fs::File::open(source).with_context(|| format!("opening {source:?}"))?;
        let mut buf = String::new();
        io::BufReader::new(f).lines().try_for_each(|l| -> anyhow::Result<()> {
            buf.push_str(&l?);
            buf.push('\n');
            Ok(())
        })?;
        buf
    };

    let mut out = Vec::new();
    for tok in text.split_whitespace() {
        match kind {
            DTypeKind::F32 => out.extend_from_slice(&tok.parse::<f32>()?.to_le_bytes()),
            DTypeKind::F64 => out.extend_from_slice(&tok.parse::<f64>()?.to_le_bytes()),
            DTypeKind::Bool => out.push((tok.parse::<i64>()? != 0) as u8),
            DTypeKind::I8 => out.push(tok.parse::<i8>()? as u8),
            DTypeKind::U8 => out.push(tok.parse::<u8>()?),
            DTypeKind::I16 => out.extend_from_slice(&tok.parse::<i16>()?.to_le_bytes()),
            DTypeKind::U16 => out.extend_from_slice(&tok.parse::<u16>()?.to_le_bytes()),
            DTypeKind::I32 => out.extend_from_slice(&tok.parse::<i32>()?.to_le_bytes()),
            DTypeKind::U32 => out.extend_from_slice(&tok.parse::<u32>()?.to_le_bytes()),
            DTypeKind::I64 => out.extend_from_slice(&tok.parse::<i64>()?.to_le_bytes()),
            DTypeKind::U64 => out.extend_from_slice(&tok.parse::<u64>()?.to_le_bytes()),
            _ => anyhow::bail!("dtype not supported by the text CLI reader"),
        }
    }
    Ok(out)
}

fn format_row(row: &[u8], kind: DTypeKind) -> String {
    match kind {
        DTypeKind::Bool => (row[0] != 0).to_string(),
        DTypeKind::I8 => (row[0] as i8).to_string(),
        DTypeKind::U8 => row[0].to_string(),
        DTypeKind::I16 => i16::from_le_bytes(row[..2].try_into().unwrap()).to_string(),
        DTypeKind::U16 => u16::from_le_bytes(row[..2].try_into().unwrap()).to_string(),
        DTypeKind::I32 => i32::from_le_bytes(row[..4].try_into().unwrap()).to_string(),
        DTypeKind::U32 => u32::from_le_bytes(row[..4].try_into().unwrap()).to_string(),
        DTypeKind::I64 => i64::from_le_bytes(row[..8].try_into().unwrap()).to_string(),
        DTypeKind::U64 => u64::from_le_bytes(row[..8].try_into().unwrap()).to_string(),
        DTypeKind::F32 => f32::from_le_bytes(row[..4].try_into().unwrap()).to_string(),
        DTypeKind::F64 => f64::from_le_bytes(row[..8].try_into().unwrap()).to_string(),
        _ => format!("{row:?}"),
    }
}

// ── Subcommand implementations ─────────────────────────────────────────────

#[allow(clippy::too_many_arguments)]
fn run_create(
    root: PathBuf,
    input: String,
    dtype: String,
    chunklen: Option<usize>,
    codec: String,
    level: u8,
    shuffle: String,
    quantize: Option<u32>,
) -> anyhow::Result<()> {
    let kind = dtype_from_name(&dtype)?;
    let elem = ElementType::scalar(kind)?;
    let data = read_rows(&input, kind)?;
    let n = data.len() / elem.atom_size.max(1);

    let params = CParams {
        level,
        shuffle: shuffle_from_name(&shuffle)?,
        codec: codec_from_name(&codec)?,
        quantize: quantize.map(|digits| QuantizeSpec {
            digits,
            width: match kind {
                DTypeKind::F32 => FloatWidth::F32,
                _ => FloatWidth::F64,
            },
        }),
        block_size: None,
        threads: Default::default(),
    };

    let t0 = Instant::now();
    let opts = CArrayOptions {
        chunklen,
        expectedlen: Some(n),
        params,
        dflt: None,
        root: Some(root.clone()),
        mode: Mode::Write,
    };
    let array = CArray::from_data(&data, elem, opts)?;
    let elapsed = t0.elapsed();

    eprintln!("  root        : {}", root.display());
    eprintln!("  elements    : {}", array.len());
    eprintln!("  chunklen    : {}", array.chunklen());
    eprintln!("  raw size    : {}", human_bytes(array.nbytes()));
    eprintln!("  compressed  : {}", human_bytes(array.cbytes()));
    eprintln!("  elapsed     : {:.3}s", elapsed.as_secs_f64());
    Ok(())
}

fn run_append(root: PathBuf, input: String) -> anyhow::Result<()> {
    let mut array = CArray::open_root(&root, Mode::Append)?;
    let data = read_rows(&input, array.elem().kind)?;
    array.append(&data)?;
    array.flush()?;
    eprintln!("  appended    : {} rows", data.len() / array.elem().atom_size.max(1));
    eprintln!("  new length  : {}", array.len());
    Ok(())
}

fn run_get(root: PathBuf, index: usize) -> anyhow::Result<()> {
    let mut array = CArray::open_root(&root, Mode::Read)?;
    let row = array.get_scalar(index)?;
    println!("{}", format_row(&row, array.elem().kind));
    Ok(())
}

fn run_slice(root: PathBuf, start: usize, stop: usize, step: isize) -> anyhow::Result<()> {
    let mut array = CArray::open_root(&root, Mode::Read)?;
    let atomsize = array.elem().atom_size;
    let kind = array.elem().kind;
    let raw = array.read_slice(start, stop, step)?;
    for row in raw.chunks(atomsize) {
        println!("{}", format_row(row, kind));
    }
    Ok(())
}

fn run_sum(root: PathBuf) -> anyhow::Result<()> {
    let mut array = CArray::open_root(&root, Mode::Read)?;
    println!("{}", array.sum()?);
    Ok(())
}

fn run_inspect(root: PathBuf) -> anyhow::Result<()> {
    let mut array = CArray::open_root(&root, Mode::Read)?;
    println!("=== CArray root: {} ===", root.display());
    println!();
    println!("  dtype          : {}", array.elem().descriptor());
    println!("  length         : {}", array.len());
    println!("  chunklen       : {}", array.chunklen());
    println!("  chunks         : {}", array.nchunks());
    println!("  raw size       : {}", human_bytes(array.nbytes()));
    println!("  compressed     : {}", human_bytes(array.cbytes()));
    if array.nbytes() > 0 {
        println!("  ratio          : {:.2}x", array.nbytes() as f64 / array.cbytes() as f64);
    }
    Ok(())
}

fn run_wheretrue(root: PathBuf, skip: usize, limit: Option<usize>) -> anyhow::Result<()> {
    let array = CArray::open_root(&root, Mode::Read)?;
    for idx in array.wheretrue(skip, limit)? {
        println!("{}", idx?);
    }
    Ok(())
}

fn run_bench(root: PathBuf, count: u64, seed: u64) -> anyhow::Result<()> {
    let mut array = CArray::open_root(&root, Mode::Read)?;
    let n = array.len();
    if n == 0 {
        anyhow::bail!("array is empty");
    }

    // Simple LCG for reproducible random indices (no external dep).
    let indices: Vec<usize> = {
        let mut rng = seed;
        (0..count)
            .map(|_| {
                rng = rng.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                ((rng >> 33) % n as u64) as usize
            })
            .collect()
    };

    eprintln!("benchmarking {count} random scalar reads across {n} elements...");

    let t0 = Instant::now();
    let mut latencies_us: Vec<u64> = Vec::with_capacity(count as usize);
    for &idx in &indices {
        let t = Instant::now();
        let _ = array.get_scalar(idx)?;
        latencies_us.push(t.elapsed().as_micros() as u64);
    }
    let elapsed = t0.elapsed();
    latencies_us.sort_unstable();

    let p50 = latencies_us[latencies_us.len() / 2];
    let p95 = latencies_us[(latencies_us.len() as f64 * 0.95) as usize];
    let p99 = latencies_us[(latencies_us.len() as f64 * 0.99) as usize];
    let min = latencies_us[0];
    let max = *latencies_us.last().unwrap();

    println!();
    println!("=== Random Scalar Read Benchmark ===");
    println!("  reads       : {count}");
    println!("  elapsed     : {:.3}s", elapsed.as_secs_f64());
    println!("  latency:");
    println!("    min  : {min} µs");
    println!("    p50  : {p50} µs");
    println!("    p95  : {p95} µs");
    println!("    p99  : {p99} µs");
    println!("    max  : {max} µs");
    Ok(())
}

// ── Entry point ────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Create {
            root,
            input,
            dtype,
            chunklen,
            codec,
            level,
            shuffle,
            quantize,
        } => run_create(root, input, dtype, chunklen, codec, level, shuffle, quantize),
        Commands::Append { root, input } => run_append(root, input),
        Commands::Get { root, index } => run_get(root, index),
        Commands::Slice { root, start, stop, step } => run_slice(root, start, stop, step),
        Commands::Sum { root } => run_sum(root),
        Commands::Inspect { root } => run_inspect(root),
        Commands::Wheretrue { root, skip, limit } => run_wheretrue(root, skip, limit),
        Commands::Bench { root, count, seed } => run_bench(root, count, seed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_supported_dtype_name() {
        for name in ["i8", "i16", "i32", "i64", "u8", "u16", "u32", "u64", "f32", "f64", "bool"] {
            assert!(dtype_from_name(name).is_ok(), "{name} should parse");
        }
        assert!(dtype_from_name("nope").is_err());
    }

    #[test]
    fn human_bytes_picks_unit() {
        assert_eq!(human_bytes(500), "500 B");
        assert!(human_bytes(2048).ends_with("KB"));
    }

    #[test]
    fn read_rows_packs_i32_little_endian() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nums.txt");
        std::fs::write(&path, "1 2 3\n-4 5").unwrap();
        let data = read_rows(path.to_str().unwrap(), DTypeKind::I32).unwrap();
        let values: Vec<i32> = data
            .chunks(4)
            .map(|c| i32::from_le_bytes(c.try_into().unwrap()))
            .collect();
        assert_eq!(values, vec![1, 2, 3, -4, 5]);
    }

    #[test]
    fn format_row_renders_each_kind() {
        assert_eq!(format_row(&7i32.to_le_bytes(), DTypeKind::I32), "7");
        assert_eq!(format_row(&[1u8], DTypeKind::Bool), "true");
    }
}
