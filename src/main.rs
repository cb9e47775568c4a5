mod cli;

use framepress::report::{self, CompressionReport};
use framepress::storage::{self, LocalObjectStore, ObjectStore};

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use fp_av::{FfmpegRuntime, FfprobeProber, ToolRegistry};
use fp_compress::{CompressionRequest, Compressor, CompressorSettings, ProgressSender};
use fp_core::config::Config;
use fp_core::{ContainerFamily, QualityTier, SourceMedia};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

struct CompressArgs {
    input: PathBuf,
    target_mb: f64,
    tier: Option<String>,
    no_audio: bool,
    no_preserve_format: bool,
    output: Option<PathBuf>,
    thumbnail: Option<PathBuf>,
    json: bool,
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging
    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "framepress=trace,fp_compress=trace,fp_av=debug,fp_media=debug,fp_core=debug".to_string()
        } else {
            "framepress=info,fp_compress=info,fp_av=warn,fp_media=warn,fp_core=warn".to_string()
        }
    });

    // Logs go to stderr so `--json` output stays parseable.
    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli) {
        eprintln!("Error: {e:#}");
        std::process::exit(exit_code(&e));
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Compress {
            input,
            target_mb,
            tier,
            no_audio,
            no_preserve_format,
            output,
            thumbnail,
            json,
        } => {
            let args = CompressArgs {
                input,
                target_mb,
                tier,
                no_audio,
                no_preserve_format,
                output,
                thumbnail,
                json,
            };
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(compress_file(args, cli.config.as_deref()))
        }
        Commands::Probe { file, json } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(probe_file(&file, cli.config.as_deref(), json))
        }
        Commands::Presets { json } => show_presets(cli.config.as_deref(), json),
        Commands::CheckTools => check_tools(cli.config.as_deref()),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("framepress {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Map the first engine error in the chain to its exit status.
fn exit_code(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|e| e.downcast_ref::<fp_core::Error>())
        .map(fp_core::Error::exit_code)
        .unwrap_or(1)
}

fn load_config(config_path: Option<&Path>) -> Config {
    let config = Config::load_or_default(config_path);
    for warning in config.validate() {
        tracing::warn!("config: {warning}");
    }
    config
}

async fn compress_file(args: CompressArgs, config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path);

    if !args.input.exists() {
        anyhow::bail!("Input file does not exist: {:?}", args.input);
    }

    let tier = match args.tier {
        Some(ref t) => t.parse::<QualityTier>()?,
        None => config.compression.default_tier,
    };

    let cancel = CancellationToken::new();
    let mut request = CompressionRequest::new(args.target_mb)
        .with_tier(tier)
        .with_preserve_audio(!args.no_audio)
        .with_preserve_format(!args.no_preserve_format)
        .with_cancellation(cancel.clone());
    if !args.json {
        request = request.with_progress(ProgressSender::new(|pct, step| {
            eprint!("\r[{pct:5.1}%] {step:<48}");
        }));
    }
    request.validate()?;

    let tools = ToolRegistry::discover(&config.tools);
    let runtime = FfmpegRuntime::new(&tools, config.compression.metadata_timeout())
        .await
        .context("failed to initialise the ffmpeg runtime")?;
    let source = SourceMedia::from_path(&args.input).await?;

    tracing::info!(
        "Compressing {:?} ({:.2} MB) toward {:.2} MB at tier {}",
        args.input,
        source.size_mb(),
        args.target_mb,
        tier
    );

    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received; cancelling");
                cancel.cancel();
            }
        })
    };

    let compressor = Compressor::new(Arc::new(runtime), CompressorSettings::from(&config));
    let outcome = compressor.compress(&source, request).await;
    interrupt.abort();
    if !args.json {
        eprintln!();
    }
    let result = outcome?;

    let mut report = CompressionReport::new(&result);

    let out_dir = match args.output {
        Some(dir) => dir,
        None => args
            .input
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".")),
    };
    tokio::fs::create_dir_all(&out_dir)
        .await
        .with_context(|| format!("failed to create {:?}", out_dir))?;
    let out_path = out_dir.join(&result.output.name);
    if same_file(&out_path, &args.input) {
        tracing::info!("Source is already within target; leaving {:?} untouched", out_path);
    } else {
        tokio::fs::write(&out_path, &result.output.data)
            .await
            .with_context(|| format!("failed to write {:?}", out_path))?;
    }
    report.output_path = Some(out_path);

    if let (Some(path), Some(thumb)) = (args.thumbnail, result.thumbnail.as_ref()) {
        tokio::fs::write(&path, &thumb.data)
            .await
            .with_context(|| format!("failed to write thumbnail {:?}", path))?;
        if let Some(ref mut t) = report.thumbnail {
            t.path = Some(path);
        }
    }

    if config.storage.enabled {
        let store = LocalObjectStore::from_config(&config.storage);
        let prefix = result.job_id.to_string();
        let key = format!("{prefix}/{}", storage::sanitize_segment(&result.output.name));
        store.put(&key, result.output.data.clone()).await?;
        if let Some(ref thumb) = result.thumbnail {
            store
                .put(&format!("{prefix}/thumbnail.jpg"), thumb.data.clone())
                .await?;
        }
        report.signed_url = Some(
            store
                .get_signed_url(&key, config.storage.url_ttl_secs)
                .await?,
        );
        tracing::info!("Stored output under {:?} as {}", store.root(), key);
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report.render_text());
    }

    Ok(())
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

async fn probe_file(file: &Path, config_path: Option<&Path>, json: bool) -> Result<()> {
    if !file.exists() {
        anyhow::bail!("File does not exist: {:?}", file);
    }

    let config = load_config(config_path);
    let tools = ToolRegistry::discover(&config.tools);
    let prober = FfprobeProber::new(tools.require("ffprobe")?.to_path_buf())
        .with_timeout(config.compression.metadata_timeout());
    let metadata = prober.probe(file).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&metadata)?);
        return Ok(());
    }

    let mime = fp_core::mime_from_extension(file);
    println!("File: {}", file.display());
    println!("Type: {mime}");
    match ContainerFamily::from_mime(mime) {
        Some(family) => println!("Container family: {family:?}"),
        None => println!("Container family: other (will be re-encoded to mp4 or webm)"),
    }
    let secs = metadata.duration_secs.max(0.0) as u64;
    println!(
        "Duration: {:02}:{:02}:{:02} ({:.2}s)",
        secs / 3600,
        (secs / 60) % 60,
        secs % 60,
        metadata.duration_secs
    );
    print!("Video: {}x{}", metadata.width, metadata.height);
    if let Some(fps) = metadata.frame_rate {
        print!(" @ {fps:.3} fps");
    }
    println!();

    println!("\nAudio Streams: {}", metadata.audio_streams.len());
    for stream in &metadata.audio_streams {
        print!(
            "  [{}] {} {}ch",
            stream.index,
            stream.codec.as_deref().unwrap_or("unknown"),
            stream.channels
        );
        if let Some(rate) = stream.sample_rate {
            print!(" {rate} Hz");
        }
        println!();
    }

    Ok(())
}

fn show_presets(config_path: Option<&Path>, json: bool) -> Result<()> {
    let config = load_config(config_path);

    if json {
        let value = serde_json::json!({
            "presets": config.presets,
            "bitrate_brackets": config.bitrate_brackets,
            "last_resort": config.compression.last_resort.profile(),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        print!(
            "{}",
            report::render_presets(&config.presets, &config.bitrate_brackets)
        );
        let lr = config.compression.last_resort.profile();
        println!(
            "\nLast resort: scale {:.2}, {} fps, quality {}",
            lr.scale_factor, lr.frame_rate, lr.quality_score
        );
    }

    Ok(())
}

fn check_tools(config_path: Option<&Path>) -> Result<()> {
    println!("Checking external tools...\n");

    let config = load_config(config_path);
    let registry = ToolRegistry::discover(&config.tools);
    let tools = registry.check_all();
    let mut all_ok = true;

    for tool in &tools {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({})", version.lines().next().unwrap_or(""));
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    println!();
    if !all_ok {
        println!("Some tools are missing. Install ffmpeg and ffprobe to compress videos.");
        return Ok(());
    }
    println!("All required tools are available!");

    let rt = tokio::runtime::Runtime::new()?;
    let runtime = match rt.block_on(FfmpegRuntime::new(
        &registry,
        config.compression.metadata_timeout(),
    )) {
        Ok(runtime) => runtime,
        Err(e) => {
            println!("\nCould not query ffmpeg encoders: {e}");
            return Ok(());
        }
    };

    println!("\nRecorder formats:");
    for family in [ContainerFamily::WebM, ContainerFamily::Mp4] {
        for mime in family.native_candidates() {
            let status = match runtime.capabilities().resolve(mime) {
                Some(choice) => format!("✓ {} via {}", mime, choice.video_encoder),
                None => format!("✗ {}", mime),
            };
            println!("  {status}");
        }
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            Config::load(p).with_context(|| format!("failed to load {:?}", p))?
        }
        None => {
            println!("No config file specified, using defaults");
            Config::default()
        }
    };

    let warnings = config.validate();
    if warnings.is_empty() {
        println!("✓ Configuration is valid");
    } else {
        println!("Configuration has {} warning(s):", warnings.len());
        for warning in &warnings {
            println!("  - {warning}");
        }
    }
    println!("  Default tier: {}", config.compression.default_tier);
    println!(
        "  Thumbnail: {}x{} at {}s (quality {})",
        config.compression.thumbnail_width,
        config.compression.thumbnail_height,
        config.compression.thumbnail_at_secs,
        config.compression.thumbnail_quality
    );
    println!(
        "  Bitrate brackets: {}",
        config.bitrate_brackets.brackets().len()
    );
    println!("  Storage enabled: {}", config.storage.enabled);

    Ok(())
}
