mod progress;

use std::{
    env,
    fmt,
    fs::File,
    io::{self, stderr, Write},
    path::{Path, PathBuf},
};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use log::debug;
use serde::Deserialize;
use tokio::task;
use tokio_stream::StreamExt;

use fusfetchlib::{
    crypto::FusKeys,
    fus::{BinaryInfo, FusClient, FusClientBuilder},
    imei::ImeiSource,
    range::ByteRange,
    version::{FwBuildInfo, FwVersion},
};

use progress::ProgressLine;

const PKG_NAME: &str = env!("CARGO_PKG_NAME");
const TEMP_EXT: &str = concat!(env!("CARGO_PKG_NAME"), "_partial");

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogLevel {
    Debug,
    Trace,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Debug => f.write_str("debug"),
            Self::Trace => f.write_str("trace"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Config {
    fus_fixed_key: Option<String>,
    fus_flexible_key_suffix: Option<String>,
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|mut p| {
        p.push(format!("{PKG_NAME}.conf"));
        p
    })
}

fn load_config_file(user_path: Option<&Path>) -> Result<Option<Config>> {
    let default_path = default_config_path();
    let path = user_path.or(default_path.as_deref());

    match path {
        Some(p) => {
            let file = match File::open(p) {
                Ok(f) => f,
                Err(e) => {
                    return if e.kind() == io::ErrorKind::NotFound {
                        Ok(None)
                    } else {
                        Err(e).context(format!("Could not open file: {p:?}"))
                    };
                }
            };

            let config = serde_json::from_reader(file)
                .context(format!("Could not parse config file: {p:?}"))?;

            Ok(Some(config))
        }
        None => Ok(None),
    }
}

/// Load FUS keys from the following list in order:
/// * User-supplied command line arguments
/// * Environment variables
/// * Config file
fn load_keys(opts: &GlobalOpts, config: &Option<Config>) -> Result<FusKeys> {
    let fixed_key = opts.fus_fixed_key
        .as_ref()
        .or_else(|| config.as_ref().and_then(|c| c.fus_fixed_key.as_ref()))
        .ok_or_else(|| anyhow!("No FUS fixed key argument or variable specified"))?
        .as_bytes();
    let flexible_key_suffix = opts.fus_flexible_key_suffix
        .as_ref()
        .or_else(|| config.as_ref().and_then(|c| c.fus_flexible_key_suffix.as_ref()))
        .ok_or_else(|| anyhow!("No FUS flexible key suffix argument or variable specified"))?
        .as_bytes();

    Ok(FusKeys::new(fixed_key, flexible_key_suffix)?)
}

#[derive(Args, Debug)]
struct GlobalOpts {
    /// FUS fixed key
    ///
    /// If unspecified, the key is loaded from the `FUS_FIXED_KEY` environment
    /// variable, followed by the `fus_fixed_key` config file variable.
    #[arg(long, global = true, env = "FUS_FIXED_KEY", hide_env_values = true)]
    fus_fixed_key: Option<String>,
    /// FUS flexible key suffix
    ///
    /// If unspecified, the key is loaded from the `FUS_FLEXIBLE_KEY_SUFFIX`
    /// environment variable, followed by the `fus_flexible_key_suffix` config
    /// file variable.
    #[arg(long, global = true, env = "FUS_FLEXIBLE_KEY_SUFFIX", hide_env_values = true)]
    fus_flexible_key_suffix: Option<String>,
    /// Config file path
    ///
    /// If unspecified, the default config file path is used. The config file
    /// can store the FUS keys to avoid needing to set environment variables
    /// or pass them as command-line arguments.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Ignore TLS validation for HTTPS connections
    ///
    /// By default, all HTTPS connections (eg. to FUS) will validate the TLS
    /// certificate against the system's CA trust store.
    #[arg(long, global = true)]
    ignore_tls_validation: bool,
    /// Set logging verbosity
    ///
    /// This option overrides the RUST_LOG environment variable, which would
    /// otherwise be respected if this option was not passed.
    #[arg(long, global = true, value_enum)]
    loglevel: Option<LogLevel>,
}

#[derive(Args, Debug)]
struct DeviceOpts {
    /// Device's model number (eg. SM-G960F)
    #[arg(short, long)]
    model: String,
    /// Region/CSC code (eg. EUX)
    #[arg(short, long)]
    region: String,
}

#[derive(Args, Debug)]
struct InfoOpts {
    #[command(flatten)]
    device: DeviceOpts,
    /// Version number (latest if unspecified)
    ///
    /// The format is "<PDA>/<CSC>/<Phone>[/<Data>]". If <Data> is omitted or
    /// <Phone> is empty, they're set to the same value as <PDA>. If no
    /// version is specified, the latest version from the catalog is used.
    #[arg(short, long)]
    version: Option<FwVersion>,
    /// Device identity
    ///
    /// Either a full 15-digit IMEI, which is submitted as-is, or an 8-digit
    /// TAC, from which candidate identities are generated. FUS rejects some
    /// identities transiently, so a TAC may take a few attempts.
    #[arg(short, long)]
    imei: String,
}

#[derive(Args, Debug)]
struct DownloadOpts {
    #[command(flatten)]
    info: InfoOpts,
    /// Output path for the downloaded firmware
    ///
    /// By default, the output path is the filename returned by the server,
    /// with the encryption extension stripped when decrypting. All directory
    /// components sent by the server are ignored.
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Allow overwriting the output file if it exists
    #[arg(short, long)]
    force: bool,
    /// Keep the binary encrypted instead of decrypting while downloading
    #[arg(long)]
    no_decrypt: bool,
    /// Byte range to request, as "<start>-" or "<start>-<end>"
    ///
    /// A bounded end offset can only be combined with --no-decrypt, because
    /// decryption has to see the stream from the first cipher block onward.
    #[arg(long)]
    range: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List available firmware versions for a device
    List(DeviceOpts),
    /// Show binary metadata and the decryption key for a firmware version
    Info(InfoOpts),
    /// Download a firmware binary, decrypting it on the fly
    Download(DownloadOpts),
}

/// A small tool for listing and downloading official firmware from FUS.
#[derive(Debug, Parser)]
#[command(author, version)]
struct Cli {
    #[command(flatten)]
    global: GlobalOpts,
    #[command(subcommand)]
    command: Command,
}

fn hex_string(data: &[u8]) -> String {
    data.iter().map(|b| format!("{b:02x}")).collect()
}

fn print_build_info(build: &FwBuildInfo) {
    if let Some(bl) = &build.bootloader {
        println!("  Bootloader class: {bl}");
    }
    println!("  Build date: {}", build.date_code());
    match build.major {
        Some(major) => println!("  Iteration: {major}.{}", build.revision),
        None => println!("  Revision: {}", build.revision),
    }
}

async fn run_list(client: &FusClient, opts: &DeviceOpts) -> Result<()> {
    let list = client.list_firmware(&opts.region, &opts.model).await
        .context("Failed to fetch the firmware catalog")?;

    for (i, version) in list.versions().enumerate() {
        println!("{version}{}", if i == 0 { " (latest)" } else { "" });

        match version.build_info() {
            Ok(build) => print_build_info(&build),
            Err(e) => debug!("No build info for {version}: {e}"),
        }
    }

    Ok(())
}

/// Use the caller-specified version or fall back to the latest one from the
/// catalog.
async fn resolve_version(
    client: &FusClient,
    device: &DeviceOpts,
    version: &Option<FwVersion>,
) -> Result<FwVersion> {
    match version {
        Some(v) => Ok(v.clone()),
        None => {
            let list = client.list_firmware(&device.region, &device.model).await
                .context("Failed to fetch the firmware catalog")?;
            Ok(list.latest)
        }
    }
}

fn print_info(info: &BinaryInfo) {
    println!("Firmware info:");
    println!("- Model: {} ({})", info.model, info.display_name);
    println!("- Region: {}", info.region);
    println!("- Version: {}", info.version);
    println!("- OS: {} {}", info.platform, info.os_version);
    println!("- File: {}", info.remote_path());
    println!("- Size: {} bytes", info.size);
    println!("- CRC32: {:08X}", info.crc);
    println!("- Last modified: {}", info.last_modified);
    println!("- Encryption version: {}", info.encrypt_version.as_u8());
    if let Some(url) = &info.description_url {
        println!("- Changelog: {url}");
    }
}

async fn run_info(client: &FusClient, opts: &InfoOpts) -> Result<()> {
    let version = resolve_version(client, &opts.device, &opts.version).await?;
    let identity = ImeiSource::from_input(&opts.imei)?;

    let (info, _) = client.fetch_binary_info(
        &opts.device.region,
        &opts.device.model,
        &version,
        &identity,
    ).await.context("Failed to query binary information")?;

    let key = client.encryption_key(&info)
        .context("Failed to compute the decryption key")?;

    print_info(&info);
    println!("- Decryption key: {}", hex_string(&key));

    if let Ok(build) = version.build_info() {
        print_build_info(&build);
    }

    Ok(())
}

async fn run_download(client: &FusClient, opts: &DownloadOpts) -> Result<()> {
    let version = resolve_version(client, &opts.info.device, &opts.info.version).await?;
    let identity = ImeiSource::from_input(&opts.info.imei)?;

    let (info, mut session) = client.fetch_binary_info(
        &opts.info.device.region,
        &opts.info.device.model,
        &version,
        &identity,
    ).await.context("Failed to query binary information")?;

    print_info(&info);

    let decrypt_key = if opts.no_decrypt {
        None
    } else {
        Some(client.encryption_key(&info)
            .context("Failed to compute the decryption key")?)
    };

    let range = match &opts.range {
        Some(r) => ByteRange::parse(r).context("Invalid --range value")?,
        None => ByteRange::full(),
    };

    let default_name = if decrypt_key.is_some() {
        info.decrypted_filename()
    } else {
        info.filename.clone()
    };
    let output_path = opts.output.clone()
        .unwrap_or_else(|| PathBuf::from(default_name));
    if output_path.exists() && !opts.force {
        bail!("{output_path:?} already exists. Use -f/--force to overwrite.");
    }
    let temp_path = add_extension(&output_path, TEMP_EXT);

    debug!("Output path (final): {output_path:?}");
    debug!("Output path (temp): {temp_path:?}");

    client.init_download(&info.remote_path(), &mut session).await
        .context("Failed to register the download")?;

    let download = client.open_download(&info.remote_path(), &mut session, range, decrypt_key).await
        .context("Failed to open the download stream")?;

    debug!("Upstream Content-Length: {:?}", download.content_length());
    if let Some(content_range) = download.content_range() {
        debug!("Upstream Content-Range: {content_range}");
    }

    let expected = download.content_length().unwrap_or(info.size);
    let mut file = File::create(&temp_path)
        .context(format!("Could not open file: {temp_path:?}"))?;
    let mut bar = ProgressLine::new(stderr(), expected);
    let mut stream = download.into_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("Error encountered during download")?;

        task::block_in_place(|| file.write_all(&chunk))
            .context("Failed to write output file")?;

        bar.set_position(stream.bytes_received())?;
    }
    bar.finish()?;

    // The checksum covers the complete encrypted binary, so it can only be
    // validated for full downloads.
    if range == ByteRange::full() {
        if stream.bytes_received() != info.size {
            bail!(
                "Download ended early: received {} of {} bytes",
                stream.bytes_received(),
                info.size,
            );
        }

        let crc = stream.crc32();
        if crc != info.crc {
            bail!(
                "Firmware's checksum ({:08X}) does not match expected checksum ({:08X})",
                crc,
                info.crc,
            );
        }

        debug!("CRC32 validated: {crc:08X}");
    }

    std::fs::rename(&temp_path, &output_path)
        .context(format!("Could not move {temp_path:?} to {output_path:?}"))?;

    println!("Saved to {output_path:?}");

    Ok(())
}

/// Add an extension to a file path.
fn add_extension(path: &Path, ext: &str) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(".");
    s.push(ext);
    PathBuf::from(s)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(l) = cli.global.loglevel {
        env::set_var("RUST_LOG", format!("{PKG_NAME}={l},fusfetchlib={l}"));
    }

    env_logger::init();

    debug!("Arguments: {cli:#?}");

    let config = load_config_file(cli.global.config.as_deref())?;
    let keys = load_keys(&cli.global, &config)?;

    let client = FusClientBuilder::new(keys)
        .ignore_tls_validation(cli.global.ignore_tls_validation)
        .build()
        .context("Could not initialize FUS client")?;

    match &cli.command {
        Command::List(opts) => run_list(&client, opts).await,
        Command::Info(opts) => run_info(&client, opts).await,
        Command::Download(opts) => run_download(&client, opts).await,
    }
}
