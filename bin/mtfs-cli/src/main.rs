//! MTFS CLI - Storage backend admin tool
//!
//! Every invocation attaches the configured backend, runs one operation and
//! detaches again, so allocator state is persisted between runs.

mod config;

use anyhow::{Context, Result, bail};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use config::Config;
use mtfs_common::{
    BlockInfo, BlockType, DirectoryBlock, Document, Identifier, Inode, Params, Pool, Superblock,
    Volume,
};
use mtfs_storage::{
    BackendRegistry, LocalConnector, Payload, ROOT_INODE_ID, StorageBackend,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "mtfs-cli")]
#[command(about = "MTFS storage backend admin CLI")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "mtfs.toml")]
    config: PathBuf,

    /// Backend name (overrides the config file)
    #[arg(short, long)]
    backend: Option<String>,

    /// Directory holding the buckets (overrides the config file)
    #[arg(long)]
    store_root: Option<PathBuf>,

    /// Attach parameter as key=value, may be repeated
    #[arg(short, long = "param", value_parser = parse_param)]
    params: Vec<(String, String)>,

    /// Log level
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List registered backends and their parameters
    Backends,
    #[command(flatten)]
    Block(BlockCommands),
}

/// Commands that run against an attached backend
#[derive(Subcommand, Debug)]
enum BlockCommands {
    /// Allocate a block id
    Add { block_type: BlockType },
    /// Release a block id and delete the block
    Del { block_type: BlockType, id: u64 },
    /// Print a block (JSON document, or hex for data blocks)
    Get {
        block_type: BlockType,
        id: u64,
        /// Read the block metadata instead
        #[arg(long)]
        meta: bool,
    },
    /// Store a block from a file (JSON document, or raw bytes for data blocks)
    Put {
        block_type: BlockType,
        id: u64,
        file: PathBuf,
        /// Write the block metadata instead
        #[arg(long)]
        meta: bool,
    },
    /// Superblock operations
    Superblock {
        #[command(subcommand)]
        action: SuperblockCommands,
    },
}

#[derive(Subcommand, Debug)]
enum SuperblockCommands {
    /// Print the superblock
    Show,
    /// Write a superblock describing this volume as pool 0, volume 0
    Init {
        #[arg(long, default_value = "4096")]
        block_size: u64,
        #[arg(long, default_value = "1")]
        redundancy: u64,
        /// Capacity of each structure cache
        #[arg(long, default_value = "1024")]
        cache_size: u64,
    },
    /// Check the volume entry matches the configured backend
    Check {
        #[arg(long, default_value = "0")]
        pool: u32,
        #[arg(long, default_value = "0")]
        volume: u32,
    },
}

fn parse_param(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got {s:?}"))
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load(&args.config)?;

    // CLI takes precedence over the config file
    let backend_name = args.backend.unwrap_or(config.backend.name);
    let store_root = args.store_root.unwrap_or(config.backend.store_root);
    let mut params = config.backend.params;
    params.extend(args.params);
    let log_level = args.log_level.unwrap_or(config.logging.level);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let registry = BackendRegistry::with_defaults(Arc::new(LocalConnector::new(&store_root)));

    let command = match args.command {
        Commands::Backends => {
            println!("{:<12} PARAMETERS", "NAME");
            for info in registry.backends() {
                println!("{:<12} {}", info.name, info.params.join(", "));
            }
            return Ok(());
        }
        Commands::Block(command) => command,
    };

    let backend = registry.create(&backend_name)?;
    backend
        .attach(&params)
        .with_context(|| format!("Failed to attach backend {backend_name}"))?;
    info!(backend = %backend_name, store_root = %store_root.display(), "Backend attached");

    let result = run(backend.as_ref(), &params, command);
    let detached = backend.detach();
    if let Err(e) = &detached {
        warn!("Failed to detach backend: {}", e);
    }

    result?;
    detached?;
    Ok(())
}

fn run(backend: &dyn StorageBackend, params: &Params, command: BlockCommands) -> Result<()> {
    match command {
        BlockCommands::Add { block_type } => {
            let id = backend.add(block_type)?;
            println!("{id}");
        }
        BlockCommands::Del { block_type, id } => {
            backend.del(id, block_type)?;
            println!("Deleted {block_type} {id}");
        }
        BlockCommands::Get {
            block_type,
            id,
            meta,
        } => match backend.get(id, block_type, meta)? {
            Payload::Inode(inode) => println!("{}", serde_json::to_string_pretty(&inode)?),
            Payload::Directory(dir) => println!("{}", serde_json::to_string_pretty(&dir)?),
            Payload::Info(info) => println!("{}", serde_json::to_string_pretty(&info)?),
            Payload::Data(data) => println!("{}", hex::encode(&data)),
        },
        BlockCommands::Put {
            block_type,
            id,
            file,
            meta,
        } => {
            let contents = std::fs::read(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let payload = parse_payload(block_type, meta, contents)?;
            backend.put(id, block_type, &payload, meta)?;
            println!("Stored {} as {block_type} {id}", payload.kind());
        }
        BlockCommands::Superblock { action } => match action {
            SuperblockCommands::Show => {
                let superblock = backend.get_superblock()?;
                println!("{}", serde_json::to_string_pretty(&superblock)?);
            }
            SuperblockCommands::Init {
                block_size,
                redundancy,
                cache_size,
            } => {
                let mut pool = Pool::default();
                pool.volumes
                    .insert(0, Volume::new(backend.name(), params.clone()));
                let mut superblock = Superblock {
                    inode_cache_size: cache_size,
                    directory_cache_size: cache_size,
                    block_cache_size: cache_size,
                    block_size,
                    redundancy,
                    root_inodes: vec![Identifier::new(0, 0, ROOT_INODE_ID)],
                    ..Superblock::default()
                };
                superblock.pools.insert(0, pool);
                backend.put_superblock(&superblock)?;
                println!("Superblock written");
            }
            SuperblockCommands::Check { pool, volume } => {
                let superblock = backend.get_superblock()?;
                superblock.check_volume(pool, volume, backend.name(), params)?;
                println!("Volume {volume} of pool {pool} matches {}", backend.name());
            }
        },
    }
    Ok(())
}

fn parse_payload(block_type: BlockType, meta: bool, contents: Vec<u8>) -> Result<Payload> {
    if meta {
        return Ok(BlockInfo::from_document(&contents)?.into());
    }
    Ok(match block_type {
        BlockType::Inode => Inode::from_document(&contents)?.into(),
        BlockType::DirectoryBlock => DirectoryBlock::from_document(&contents)?.into(),
        BlockType::DataBlock => Payload::Data(Bytes::from(contents)),
        BlockType::Superblock => bail!("use the superblock subcommand"),
    })
}
