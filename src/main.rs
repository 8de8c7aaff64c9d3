use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use snapfile::cadapter::ebs::EbsBlockService;
use snapfile::cadapter::localfs::FileBlockService;
use snapfile::config::Config;
use snapfile::{BlockCache, BlockService, CallContext, SectionReader};
use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const SMOKE_LEN: usize = 512;

#[derive(Parser)]
#[command(name = "snapfile")]
#[command(about = "Read a block storage snapshot as a seekable byte stream", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open an EBS snapshot, read its first sector twice and compare
    Smoke {
        #[arg(long, value_name = "SNAPSHOT_ID")]
        snapshot_id: String,
        /// YAML configuration file
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
        /// Give up after this many seconds
        #[arg(long, default_value_t = 60)]
        timeout_secs: u64,
    },
    /// Same check against a local raw image
    Local {
        #[arg(short, long, value_name = "FILE")]
        file: PathBuf,
        #[arg(long, default_value_t = 512 * 1024)]
        block_size: u32,
        /// Defaults to the image length
        #[arg(long)]
        volume_size: Option<u64>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Smoke {
            snapshot_id,
            config,
            timeout_secs,
        } => {
            let cfg = match config {
                Some(path) => Config::from_file(&path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => Config::from_default_path()?,
            };
            let cache = cfg.cache.build()?;
            let service: Arc<dyn BlockService> = Arc::new(EbsBlockService::new(cfg.ebs).await);
            let ctx = CallContext::new().with_timeout(Duration::from_secs(timeout_secs));
            smoke(&snapshot_id, &ctx, cache, service).await
        }
        Commands::Local {
            file,
            block_size,
            volume_size,
        } => {
            let volume_size = match volume_size {
                Some(v) => v,
                None => tokio::fs::metadata(&file).await?.len(),
            };
            let service = Arc::new(FileBlockService::new(&file, block_size, volume_size).await?);
            let id = file.display().to_string();
            smoke(&id, &CallContext::new(), None, service).await
        }
    }
}

async fn smoke(
    snapshot_id: &str,
    ctx: &CallContext,
    cache: Option<Arc<BlockCache>>,
    service: Arc<dyn BlockService>,
) -> Result<()> {
    let mut reader: SectionReader = snapfile::open(snapshot_id, ctx, cache, service).await?;
    let table = reader.file().table();
    println!(
        "{snapshot_id}: {} bytes, block size {}, {} of {} blocks allocated",
        reader.size(),
        table.block_size(),
        table.allocated_blocks(),
        table.layout().block_count(reader.size()),
    );

    let len = SMOKE_LEN.min(reader.size() as usize);
    let mut first = vec![0u8; len];
    read_full(&mut reader, &mut first).await?;
    reader.seek(SeekFrom::Start(0))?;
    let mut second = vec![0u8; len];
    read_full(&mut reader, &mut second).await?;

    if first != second {
        bail!("re-reading the first {len} bytes returned different data");
    }
    println!("first {len} bytes: {}", hex_head(&first, 32));
    println!("smoke: OK");
    Ok(())
}

async fn read_full(reader: &mut SectionReader, buf: &mut [u8]) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            bail!("snapshot ended after {filled} bytes");
        }
        filled += n;
    }
    Ok(())
}

fn hex_head(data: &[u8], max: usize) -> String {
    let head = &data[..data.len().min(max)];
    let mut out = head
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ");
    if data.len() > max {
        out.push_str(" ...");
    }
    out
}
