use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracksplice_core::{
    AppConfig, IdentifyOptions, Session, diagnostics::init_tracing_with_config, fixtures::demo_edits,
    format_matches, wav,
};

#[derive(Debug, Parser)]
#[command(name = "tracksplice-cli")]
#[command(about = "Headless tools for splicing tracks and locating repeated jingles")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Overrides `paths.logs_dir` from the config file.
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Reads this TOML file instead of searching for tracksplice.config.toml.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print every occurrence of AD inside TARGET as `start,end`.
    Identify {
        #[arg(long)]
        target: PathBuf,

        #[arg(long)]
        ad: PathBuf,

        #[arg(long)]
        threshold: Option<f64>,

        #[arg(long)]
        json: bool,
    },
    /// Insert SRC[srcpos..srcpos+len] into DEST at destpos and save the result.
    Splice {
        #[arg(long)]
        src: PathBuf,

        #[arg(long)]
        dest: PathBuf,

        #[arg(long)]
        destpos: usize,

        #[arg(long)]
        srcpos: usize,

        #[arg(long)]
        len: usize,

        #[arg(long)]
        output: PathBuf,
    },
    /// Replay the demo edit chain and write every track as a wav file.
    Demo {
        #[arg(long, default_value = "data/demo")]
        output_dir: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load_or_default()?,
    };
    let log_dir = cli.log_dir.unwrap_or_else(|| config.paths.logs_dir.clone());
    let telemetry = init_tracing_with_config(&log_dir, &config.diagnostics)?;
    tracing::debug!(log_file = %telemetry.log_file.display(), command = ?cli.command, "dispatching");

    match cli.command {
        Commands::Identify {
            target,
            ad,
            threshold,
            json,
        } => {
            let mut session = Session::new();
            let target = session.load_samples(&wav::load(&target)?)?;
            let ad = session.load_samples(&wav::load(&ad)?)?;
            let options = IdentifyOptions {
                threshold: threshold.unwrap_or(config.identify.threshold),
            };

            let matches = session.identify_with(target, ad, options)?;
            if json {
                let encoded =
                    serde_json::to_string_pretty(&matches).context("failed to encode matches")?;
                println!("{encoded}");
            } else if !matches.is_empty() {
                println!("{}", format_matches(&matches));
            }
        }
        Commands::Splice {
            src,
            dest,
            destpos,
            srcpos,
            len,
            output,
        } => {
            let mut session = Session::new();
            let src_track = session.load_samples(&wav::load(&src)?)?;
            let dest_track = session.load_samples(&wav::load(&dest)?)?;
            session
                .insert(src_track, dest_track, destpos, srcpos, len)
                .with_context(|| {
                    format!(
                        "failed to splice {}[{srcpos}..+{len}] into {} at {destpos}",
                        src.display(),
                        dest.display()
                    )
                })?;

            let spliced = session.read(dest_track, 0, session.length(dest_track)?)?;
            wav::save_with_sample_rate(&output, &spliced, config.wav.sample_rate)?;
            tracing::info!(path = %output.display(), samples = spliced.len(), "splice written");
        }
        Commands::Demo { output_dir } => {
            let demo = demo_edits()?;
            let tracks = [
                ("excerpt", demo.excerpt),
                ("main", demo.main),
                ("donor", demo.donor),
                ("scratch", demo.scratch),
            ];
            for (name, track) in tracks {
                let samples = demo.session.read(track, 0, demo.session.length(track)?)?;
                wav::save_with_sample_rate(
                    &output_dir.join(format!("{name}.wav")),
                    &samples,
                    config.wav.sample_rate,
                )?;
            }

            let stats = serde_json::to_string_pretty(&demo.session.stats())
                .context("failed to encode session stats")?;
            println!("{stats}");
        }
    }

    Ok(())
}
