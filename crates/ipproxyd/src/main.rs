//! IP2Proxy filter daemon - enriches JSON events with proxy metadata

mod codec;
mod filter;
mod handler;
mod resolver;
mod webservice;

use anyhow::{bail, Context, Result};
use bytes::BytesMut;
use clap::{Parser, ValueEnum};
use ipproxycache::{Resolver, DEFAULT_CACHE_SIZE, DEFAULT_TARGET};
use ipproxydb::{LoadOptions, ProxyDatabase};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tracing::{error, info, warn};

use crate::codec::{error_line, LineDecoder};
use crate::filter::{FilterConfig, ProxyFilter};
use crate::handler::EventHandler;
use crate::resolver::DatabaseResolver;
use crate::webservice::WebServiceResolver;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LookupType {
    /// Local IP2Proxy CSV database
    Db,
    /// IP2Location.io web service
    Ws,
}

/// How the stdin transport stopped
#[derive(Debug, PartialEq, Eq)]
enum Shutdown {
    Eof,
    Interrupted,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// IP2Proxy CSV database file (required with `--lookup-type db`)
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Where lookups are answered
    #[arg(long, value_enum, default_value_t = LookupType::Db)]
    lookup_type: LookupType,

    /// IP2Location.io API key (required with `--lookup-type ws`)
    #[arg(long, default_value = "")]
    api_key: String,

    /// Field containing the IP address (first element if it is an array)
    #[arg(short, long)]
    source: String,

    /// Field the proxy metadata is written to
    #[arg(short, long, default_value = DEFAULT_TARGET)]
    target: String,

    /// Cache capacity (number of IP addresses)
    #[arg(short, long, default_value_t = DEFAULT_CACHE_SIZE)]
    cache_size: usize,

    /// Query the resolver for every event instead of caching results
    #[arg(long)]
    no_cache: bool,

    /// Memory-map the database file instead of reading it into memory
    #[arg(long)]
    use_memory_mapped: bool,

    /// Leave out fields the database does not carry
    #[arg(long)]
    hide_unsupported_fields: bool,

    /// Serve newline-delimited JSON over TCP instead of stdin/stdout
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Events go to stdout, so logs go to stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    info!("Starting IP2Proxy filter v{}", env!("CARGO_PKG_VERSION"));

    let (resolver, use_cache) = build_resolver(&args)?;

    let config = FilterConfig {
        source: args.source.clone(),
        target: args.target.clone(),
        use_cache,
        cache_size: args.cache_size,
    };
    let filter = Arc::new(ProxyFilter::new(config, resolver).context("invalid cache configuration")?);
    if filter.cache().is_some() {
        info!("Cache capacity: {}", args.cache_size);
    } else {
        info!("Cache disabled");
    }

    let handler = Arc::new(EventHandler::new(filter));

    let shutdown = match &args.bind {
        Some(bind) => {
            let listener = TcpListener::bind(bind).await?;
            info!("Server listening on {}", bind);
            serve(listener, Arc::clone(&handler)).await?;
            Shutdown::Interrupted
        }
        None => run_stdio(Arc::clone(&handler)).await?,
    };

    log_stats(&handler);

    if args.bind.is_none() && shutdown == Shutdown::Interrupted {
        // The stdin reader is parked in a blocking read the runtime would wait on
        std::process::exit(0);
    }
    Ok(())
}

/// Pick the resolver for the lookup type, and whether its results may be cached
///
/// Web service lookups always bypass the cache.
fn build_resolver(args: &Args) -> Result<(Arc<dyn Resolver>, bool)> {
    match args.lookup_type {
        LookupType::Ws => {
            info!("Using IP2Location.io API");
            let resolver: Arc<dyn Resolver> = Arc::new(WebServiceResolver::new(
                args.api_key.clone(),
                args.target.clone(),
                args.hide_unsupported_fields,
                Handle::current(),
            )?);
            Ok((resolver, false))
        }
        LookupType::Db => {
            let Some(path) = &args.database else {
                bail!("--database is required with --lookup-type db");
            };

            let db = ProxyDatabase::open(
                path,
                LoadOptions {
                    memory_mapped: args.use_memory_mapped,
                },
            )
            .with_context(|| format!("failed to load database {}", path.display()))?;

            info!(
                path = %path.display(),
                layout = db.layout().name(),
                ranges = db.len(),
                "Database ready"
            );
            let resolver: Arc<dyn Resolver> =
                Arc::new(DatabaseResolver::new(db, args.target.clone(), args.hide_unsupported_fields));
            Ok((resolver, !args.no_cache))
        }
    }
}

async fn run_stdio(handler: Arc<EventHandler>) -> Result<Shutdown> {
    let mut stdout = tokio::io::stdout();

    let shutdown = tokio::select! {
        res = process_stream(tokio::io::stdin(), &mut stdout, &handler) => {
            res?;
            Shutdown::Eof
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            Shutdown::Interrupted
        }
    };

    stdout.flush().await?;
    Ok(shutdown)
}

async fn serve(listener: TcpListener, handler: Arc<EventHandler>) -> Result<()> {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    info!("New connection from {}", addr);
                    let handler = Arc::clone(&handler);

                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, handler).await {
                            error!("Error handling client {}: {}", addr, e);
                        }
                        info!("Connection closed: {}", addr);
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                return Ok(());
            }
        }
    }
}

async fn handle_client(mut stream: TcpStream, handler: Arc<EventHandler>) -> Result<()> {
    let (reader, mut writer) = stream.split();
    process_stream(reader, &mut writer, &handler).await
}

/// Answer every line of `reader` on `writer` until EOF
async fn process_stream<R, W>(mut reader: R, writer: &mut W, handler: &Arc<EventHandler>) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buffer = BytesMut::with_capacity(4096);
    let mut decoder = LineDecoder::new();

    loop {
        let n = reader.read_buf(&mut buffer).await?;

        if n == 0 {
            // Peer closed; an unterminated last line still counts
            match decoder.finish(&mut buffer) {
                Ok(Some(line)) if !line.trim().is_empty() => handle_line(handler, line, writer).await?,
                Ok(_) => {}
                Err(e) => {
                    warn!("Framing error: {}", e);
                    writer.write_all(&error_line(&e.to_string())).await?;
                }
            }
            writer.flush().await?;
            return Ok(());
        }

        loop {
            match decoder.next_line(&mut buffer) {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    handle_line(handler, line, writer).await?;
                }
                Ok(None) => {
                    // Need more data
                    break;
                }
                Err(e) => {
                    warn!("Framing error: {}", e);
                    writer.write_all(&error_line(&e.to_string())).await?;
                }
            }
        }
    }
}

/// Run one line through the handler on the blocking pool and write the reply
async fn handle_line<W>(handler: &Arc<EventHandler>, line: String, out: &mut W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let handler = Arc::clone(handler);
    let reply = tokio::task::spawn_blocking(move || handler.handle(&line)).await?;
    out.write_all(&reply).await?;
    Ok(())
}

fn log_stats(handler: &EventHandler) {
    if let Some(cache) = handler.filter().cache() {
        let stats = cache.stats();
        info!(
            entries = cache.len(),
            hits = stats.hits(),
            misses = stats.misses(),
            refreshes = stats.refreshes(),
            refresh_failures = stats.refresh_failures(),
            resolver_failures = stats.resolver_failures(),
            evictions = stats.evictions(),
            hit_ratio = stats.hit_ratio(),
            "Cache statistics"
        );
    }
}
