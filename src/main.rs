use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand};

use podsnap::export::blank::analyze_capture;
use podsnap::platform::headless::{HeadlessConfig, HeadlessEnvironment};
use podsnap::platform::BrowserEnvironment;
use podsnap::storage::{self, FileStore};
use podsnap::{ExportConfig, ExportRequest, ExportResult, Exporter, Viewport};

#[derive(Parser, Debug)]
#[command(name = "podsnap", version, about = "Export a widget subtree as a PNG")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Capture the target element of an HTML file and download it.
    Export(ExportArgs),
    /// Export twice and check both runs produce the same image.
    VerifyDeterminism(ExportArgs),
    /// Run the blank-capture heuristic on a PNG.
    Analyze {
        png: PathBuf,
        /// Pipeline config JSON providing blank thresholds.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct ExportArgs {
    /// Input HTML file.
    html: PathBuf,

    /// Selector of the element to capture.
    #[arg(long, default_value = "#export-target")]
    selector: String,

    /// Directory receiving the downloaded PNG.
    #[arg(long, default_value = ".")]
    out: PathBuf,

    /// Output file name. Derived from the export counter and --title when absent.
    #[arg(long)]
    filename: Option<String>,

    /// Title slugged into the derived file name.
    #[arg(long, default_value = "snapshot")]
    title: String,

    #[arg(long, default_value_t = 4.0)]
    pixel_ratio: f32,

    /// CSS background color painted under the capture.
    #[arg(long)]
    background: Option<String>,

    #[arg(long)]
    user_agent: Option<String>,

    /// Viewport as WIDTHxHEIGHT.
    #[arg(long, default_value = "1280x720", value_parser = parse_viewport)]
    viewport: Viewport,

    /// Pipeline config JSON (partial configs fill in defaults).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory holding the persisted export counter.
    #[arg(long)]
    state_dir: Option<PathBuf>,
}

fn parse_viewport(s: &str) -> Result<Viewport, String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{}'", s))?;
    let width = w.trim().parse::<u32>().map_err(|e| format!("bad width '{}': {}", w, e))?;
    let height = h.trim().parse::<u32>().map_err(|e| format!("bad height '{}': {}", h, e))?;
    if width == 0 || height == 0 {
        return Err("viewport dimensions must be non-zero".to_string());
    }
    Ok(Viewport { width, height })
}

fn read_config(path: Option<&Path>) -> anyhow::Result<ExportConfig> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path).with_context(|| format!("read config '{}'", path.display()))?;
            serde_json::from_str(&raw).with_context(|| format!("parse config '{}'", path.display()))
        }
        None => Ok(ExportConfig::default()),
    }
}

fn load_environment(args: &ExportArgs) -> anyhow::Result<HeadlessEnvironment> {
    std::fs::create_dir_all(&args.out).with_context(|| format!("create output dir '{}'", args.out.display()))?;
    let mut config = HeadlessConfig {
        viewport: args.viewport,
        output_dir: args.out.clone(),
        ..HeadlessConfig::default()
    };
    if let Some(ua) = &args.user_agent {
        config.user_agent = ua.clone();
    }
    HeadlessEnvironment::load_file(&args.html, config).with_context(|| format!("load '{}'", args.html.display()))
}

async fn run_export(env: &HeadlessEnvironment, args: &ExportArgs, filename: &str) -> anyhow::Result<ExportResult> {
    let config = read_config(args.config.as_deref())?;
    let target = env
        .document()
        .borrow()
        .query_selector(&args.selector)
        .with_context(|| format!("no element matches '{}'", args.selector))?;

    let mut request = ExportRequest::new(target, filename)
        .pixel_ratio(args.pixel_ratio)
        .on_status(|s| log::info!("[cli] status {:?}", s));
    if let Some(bg) = &args.background {
        request = request.background_color(bg.clone());
    }

    let exporter = Exporter::new(env, config);
    Ok(exporter.export(request).await?)
}

async fn cmd_export(args: ExportArgs) -> anyhow::Result<bool> {
    let store = args.state_dir.as_ref().map(FileStore::new);
    let counter = store.as_ref().map(|s| storage::load_export_counter(s)).unwrap_or(0);
    let filename = args
        .filename
        .clone()
        .unwrap_or_else(|| storage::export_filename(counter, &args.title));

    let env = load_environment(&args)?;
    let result = run_export(&env, &args, &filename).await?;
    if let Some(store) = &store {
        storage::save_export_counter(store, storage::advance_counter(counter, &result));
    }

    println!("{}", serde_json::to_string_pretty(&result)?);
    for path in env.downloads() {
        println!("wrote {}", path.display());
    }
    Ok(result.success)
}

async fn cmd_verify(args: ExportArgs) -> anyhow::Result<bool> {
    let filename = args
        .filename
        .clone()
        .unwrap_or_else(|| storage::export_filename(0, &args.title));
    let env = load_environment(&args)?;
    let first = run_export(&env, &args, &filename).await?;
    let second = run_export(&env, &args, &filename).await?;

    let deterministic = first.success
        && second.success
        && first.capture_path == second.capture_path
        && first.blob_digest == second.blob_digest
        && first.blob_size == second.blob_size;

    let summary = serde_json::json!({
        "first": first,
        "second": second,
        "repeatDeterministic": deterministic,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(deterministic)
}

fn cmd_analyze(png: &Path, config: Option<&Path>) -> anyhow::Result<bool> {
    let config = read_config(config)?;
    let bytes = std::fs::read(png).with_context(|| format!("read '{}'", png.display()))?;
    let report = analyze_capture(&bytes, &config.blank).with_context(|| format!("decode '{}'", png.display()))?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(!report.blank)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let outcome = match cli.cmd {
        Command::Export(args) => cmd_export(args).await,
        Command::VerifyDeterminism(args) => cmd_verify(args).await,
        Command::Analyze { png, config } => cmd_analyze(&png, config.as_deref()),
    };

    match outcome {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(e) => {
            eprintln!("podsnap: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewport_parsing() {
        assert_eq!(parse_viewport("800x600").unwrap(), Viewport { width: 800, height: 600 });
        assert!(parse_viewport("800").is_err());
        assert!(parse_viewport("0x600").is_err());
    }

    #[test]
    fn cli_parses_export_flags() {
        let cli = Cli::try_parse_from([
            "podsnap",
            "export",
            "page.html",
            "--pixel-ratio",
            "2",
            "--viewport",
            "390x844",
        ])
        .unwrap();
        match cli.cmd {
            Command::Export(args) => {
                assert_eq!(args.selector, "#export-target");
                assert_eq!(args.pixel_ratio, 2.0);
                assert_eq!(args.viewport.width, 390);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
