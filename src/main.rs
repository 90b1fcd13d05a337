use anyhow::Result;
use clap::{Parser, ValueEnum};
use log::info;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use radio_spectrum::bars;
use radio_spectrum::{
    Analyzer, AnalyzerConfig, DecodeSpan, FrameReducer, Loudness, LoudnessAnalyzer, Spectrum,
    SpectrumAnalyzer, WavSource,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// magnitude spectrum as a row of bars
    Spectrum,
    /// smoothed RMS level as a meter
    Loudness,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// path to a mono 16-bit WAV file, if not provided, uses live microphone input
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// what to compute for each frame
    #[arg(short, long, value_enum, default_value_t = Mode::Spectrum)]
    mode: Mode,

    /// number of bars, or the meter width in loudness mode
    #[arg(short, long, default_value_t = bars::DEFAULT_BAR_COUNT)]
    bars: usize,

    /// refresh interval in milliseconds (default 50)
    #[arg(short, long)]
    interval_ms: Option<u64>,

    /// stop after this many seconds
    #[arg(short, long)]
    duration_secs: Option<u64>,

    /// decode only the first half of each frame before the FFT
    #[arg(long)]
    half_frame: bool,

    /// tint the spectrum bars with a hue sweep
    #[arg(long)]
    color: bool,
}

fn main() -> Result<()> {
    // initialize the logger
    env_logger::init();

    // parse command-line arguments
    let args = Args::parse();
    let width = args.bars;

    match args.mode {
        Mode::Spectrum => {
            let mut config = AnalyzerConfig::spectrum();
            if args.half_frame {
                config.decode_span = DecodeSpan::HalfFrame;
            }
            apply_file_rate(&mut config, &args)?;

            let mut analyzer = SpectrumAnalyzer::new(config)?;
            let color = args.color;
            run(&mut analyzer, &args, move |spectrum: &Spectrum| {
                let heights = bars::spectrum_bars(&spectrum.magnitudes, width);
                let row = if color {
                    bars::render_bars_colored(&heights)
                } else {
                    bars::render_bars(&heights)
                };
                match spectrum.peak() {
                    Some(peak) => format!("{} {:>7.1} Hz", row, peak.frequency_hz),
                    None => row,
                }
            })
        }
        Mode::Loudness => {
            let mut analyzer = if args.file.is_some() {
                let mut config = AnalyzerConfig::loudness();
                apply_file_rate(&mut config, &args)?;
                LoudnessAnalyzer::new(config)?
            } else {
                LoudnessAnalyzer::open_default()?
            };
            run(&mut analyzer, &args, move |loudness: &Loudness| {
                format!(
                    "{} {:.3}",
                    bars::render_meter(loudness.smoothed, width),
                    loudness.smoothed
                )
            })
        }
    }
}

/// Replayed files keep their own sample rate so bin frequencies stay right.
fn apply_file_rate(config: &mut AnalyzerConfig, args: &Args) -> Result<()> {
    if let Some(path) = &args.file {
        config.sample_rate = WavSource::spec_of(path)?.sample_rate;
    }
    Ok(())
}

fn run<R, F>(analyzer: &mut Analyzer<R>, args: &Args, render: F) -> Result<()>
where
    R: FrameReducer,
    F: Fn(&R::Output) -> String,
{
    match &args.file {
        Some(path) => {
            let path = path.clone();
            analyzer.start_with(move |_| WavSource::open(&path).map(WavSource::paced))?;
        }
        None => analyzer.start()?,
    }

    info!("Starting the audio visualization tool...");

    let interval = args
        .interval_ms
        .map(Duration::from_millis)
        .unwrap_or(bars::DEFAULT_REFRESH);
    let deadline = args
        .duration_secs
        .map(|secs| Instant::now() + Duration::from_secs(secs));

    // poll at the visualizer cadence; frames produced in between are skipped
    let mut shown = 0;
    while analyzer.is_running() {
        if deadline.map_or(false, |deadline| Instant::now() >= deadline) {
            break;
        }
        let frames = analyzer.frames();
        if frames != shown {
            println!("{}", render(analyzer.latest().as_ref()));
            shown = frames;
        }
        thread::sleep(interval);
    }

    analyzer.shutdown();
    info!("Processed {} frames", analyzer.frames());

    Ok(())
}
