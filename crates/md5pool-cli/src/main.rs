//! Command-line front end for the md5pool hashing pool.
//!
//! Hashes the named files through a bounded worker pool and prints one
//! `digest  path` line per input, in input order.

use anyhow::bail;
use clap::Parser;
use md5pool::{ArenaConfig, ByteSource, DigestWidth, Md5Pool, PoolConfig};
use std::path::PathBuf;
use std::sync::Arc;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Runtime configuration for the `md5pool` binary.
#[derive(Parser, Debug, Clone)]
#[command(name = "md5pool", version, about = "Hash files through a bounded MD5 worker pool")]
pub struct CliArgs {
    /// Files to hash, in output order.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Number of hashing workers. 0 picks the CPU count.
    ///
    /// Environment variable: `MD5POOL_WORKERS`
    #[arg(long, env = "MD5POOL_WORKERS", default_value_t = 0)]
    pub workers: usize,

    /// Digest width in hex characters (1-32; 16 = half, 32 = full).
    ///
    /// Environment variable: `MD5POOL_WIDTH`
    #[arg(long, env = "MD5POOL_WIDTH", default_value_t = 32)]
    pub width: usize,

    /// Shared arena capacity in bytes.
    ///
    /// Environment variable: `MD5POOL_ARENA_CAPACITY`
    #[arg(long, env = "MD5POOL_ARENA_CAPACITY", default_value_t = 16 * 1024 * 1024)]
    pub arena_capacity: usize,

    /// Streaming chunk size in bytes; files larger than this stream
    /// through the arena chunk by chunk.
    ///
    /// Environment variable: `MD5POOL_CHUNK_SIZE`
    #[arg(long, env = "MD5POOL_CHUNK_SIZE", default_value_t = 1024 * 1024)]
    pub chunk_size: usize,

    /// Disable the shared arena; payloads travel inline.
    #[arg(long, default_value_t = false)]
    pub no_arena: bool,

    /// Print per-file completion progress to stderr.
    #[arg(short, long, default_value_t = false)]
    pub progress: bool,
}

struct RunConfig {
    pool: PoolConfig,
    width: DigestWidth,
}

impl TryFrom<&CliArgs> for RunConfig {
    type Error = anyhow::Error;

    fn try_from(args: &CliArgs) -> Result<Self, Self::Error> {
        if args.width == 0 || args.width > 32 {
            bail!("--width must be between 1 and 32");
        }
        let width = match args.width {
            16 => DigestWidth::Half,
            32 => DigestWidth::Full,
            n => DigestWidth::Chars(n),
        };

        let workers = if args.workers == 0 {
            PoolConfig::default().workers
        } else {
            args.workers
        };

        let arena = if args.no_arena {
            None
        } else {
            Some(ArenaConfig {
                capacity: args.arena_capacity,
                chunk_size: args.chunk_size,
            })
        };

        Ok(Self {
            pool: PoolConfig {
                workers,
                max_concurrent: workers,
                arena,
            },
            width,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = RunConfig::try_from(&args)?;

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    tracing::debug!(
        workers = config.pool.workers,
        arena = config.pool.arena.is_some(),
        "starting pool"
    );

    let pool = Md5Pool::new(config.pool)?;

    let sources: Vec<ByteSource> = args.files.iter().cloned().map(ByteSource::File).collect();

    let progress = args.progress.then(|| {
        Arc::new(|completed: usize, total: usize| {
            eprintln!("{completed}/{total}");
        }) as md5pool::BatchProgressFn
    });

    let digests = pool.submit_batch(sources, config.width, progress).await?;
    for (path, digest) in args.files.iter().zip(&digests) {
        println!("{digest}  {}", path.display());
    }

    pool.destroy().await;
    Ok(())
}
