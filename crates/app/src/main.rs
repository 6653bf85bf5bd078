use std::{
    io::BufRead,
    path::{Path, PathBuf},
    sync::mpsc::{self, RecvTimeoutError},
    thread,
    time::{Duration, Instant},
};

use clap::{Args, Parser, Subcommand};
use spectral_eq_core::{
    AudioPipeline, Band, DeviceId, EqError, EqualizerConfig, MemoryBackend, ParameterStore,
    PipelineState, Result, ToneGenerator,
};
use tracing_subscriber::EnvFilter;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const TONE_AMPLITUDE: f32 = 0.5;

fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run(cli.config.as_deref(), &args),
        Commands::Devices => list_devices(),
        Commands::Config(args) => print_config(cli.config.as_deref(), &args),
    }
}

fn run(config_path: Option<&Path>, args: &RunArgs) -> Result<()> {
    let config = effective_config(config_path, args)?;
    tracing::info!(?config_path, tone = args.tone, "starting equalizer");

    let params = ParameterStore::new(config.gains)?;
    let mut pipeline = AudioPipeline::new(config, params.clone())?;

    match args.tone {
        Some(frequency) => {
            let mut backend = MemoryBackend::with_tone(ToneGenerator::new(frequency, TONE_AMPLITUDE))
                .paced(true)
                .retain_output(0);
            pipeline.open(&mut backend)?;
        }
        None => open_live(&mut pipeline)?,
    }
    pipeline.start()?;

    let deadline = args
        .duration
        .map(|duration| {
            Instant::now()
                .checked_add(duration)
                .ok_or_else(|| EqError::config(format!("duration of {duration:?} is too long")))
        })
        .transpose()?;
    control_loop(&pipeline, &params, deadline);

    pipeline.stop();
    let stats = pipeline.stats();
    tracing::info!(blocks = stats.blocks(), "equalizer stopped");
    pipeline.wait()
}

#[cfg(feature = "cpal")]
fn open_live(pipeline: &mut AudioPipeline) -> Result<()> {
    pipeline.open(&mut spectral_eq_core::CpalBackend::new())
}

#[cfg(not(feature = "cpal"))]
fn open_live(_pipeline: &mut AudioPipeline) -> Result<()> {
    Err(EqError::msg(
        "live audio requires the `cpal` feature; pass --tone <HZ> for a synthetic source",
    ))
}

/// Reads control commands from stdin until `quit`, end of input, the
/// deadline, or the pipeline stopping on its own.
fn control_loop(pipeline: &AudioPipeline, params: &ParameterStore, deadline: Option<Instant>) {
    let (tx, rx) = mpsc::channel::<String>();
    thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });

    let initial = params.snapshot();
    tracing::info!("commands: low|mid|high <0-100>, reset, status, quit");
    let mut stdin_open = true;
    loop {
        if pipeline.state() == PipelineState::Stopped {
            return;
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return;
        }

        let line = if stdin_open {
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(line) => line,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    // Without a deadline, closing stdin ends the session.
                    if deadline.is_none() {
                        return;
                    }
                    stdin_open = false;
                    continue;
                }
            }
        } else {
            thread::sleep(POLL_INTERVAL);
            continue;
        };

        match parse_command(&line) {
            Ok(None) => {}
            Ok(Some(ControlCommand::Quit)) => return,
            Ok(Some(ControlCommand::Status)) => report_status(pipeline, params),
            Ok(Some(ControlCommand::Reset)) => {
                if let Err(err) = params.set_gains(initial) {
                    tracing::warn!(%err, "gain reset rejected");
                }
            }
            Ok(Some(ControlCommand::Set(band, position))) => {
                if let Err(err) = params.set_control(band, position) {
                    tracing::warn!(%err, "gain update rejected");
                }
            }
            Err(err) => tracing::warn!(%err, "unrecognised command"),
        }
    }
}

fn report_status(pipeline: &AudioPipeline, params: &ParameterStore) {
    let gains = params.snapshot();
    let stats = pipeline.stats();
    tracing::info!(
        state = %pipeline.state(),
        low = gains.low,
        mid = gains.mid,
        high = gains.high,
        blocks = stats.blocks(),
        input_rms = stats.input_rms(),
        output_rms = stats.output_rms(),
        delay_engaged = stats.delay_engaged(),
        "status"
    );
}

#[derive(Debug, PartialEq)]
enum ControlCommand {
    Set(Band, u8),
    Reset,
    Status,
    Quit,
}

fn parse_command(line: &str) -> Result<Option<ControlCommand>> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Ok(None);
    };

    let command = match head.to_ascii_lowercase().as_str() {
        "quit" | "exit" | "q" => ControlCommand::Quit,
        "status" | "s" => ControlCommand::Status,
        "reset" | "r" => ControlCommand::Reset,
        _ => {
            let band: Band = head.parse()?;
            let value = words
                .next()
                .ok_or_else(|| EqError::msg(format!("missing value for {band} band")))?;
            let position: u8 = value
                .parse()
                .ok()
                .filter(|position| *position <= spectral_eq_core::params::CONTROL_MAX)
                .ok_or_else(|| EqError::msg(format!("`{value}` is not a position in 0-100")))?;
            ControlCommand::Set(band, position)
        }
    };

    if let Some(extra) = words.next() {
        return Err(EqError::msg(format!("unexpected argument `{extra}`")));
    }
    Ok(Some(command))
}

fn effective_config(config_path: Option<&Path>, args: &RunArgs) -> Result<EqualizerConfig> {
    let mut config = match config_path {
        Some(path) => EqualizerConfig::load(path)?,
        None => EqualizerConfig::default(),
    };

    if let Some(device) = &args.input_device {
        config.audio.input_device = Some(device.clone());
    }
    if let Some(device) = &args.output_device {
        config.audio.output_device = Some(device.clone());
    }
    if let Some(block_size) = args.block_size {
        config.audio.block_size = block_size;
    }
    for (band, position) in [
        (Band::Low, args.low),
        (Band::Mid, args.mid),
        (Band::High, args.high),
    ] {
        if let Some(position) = position {
            config
                .gains
                .set(band, spectral_eq_core::control_to_gain(position));
        }
    }

    config.validate()?;
    Ok(config)
}

#[cfg(feature = "cpal")]
fn list_devices() -> Result<()> {
    let listing = spectral_eq_core::list_devices()?;
    println!("host: {}", listing.host);
    println!("input devices:");
    for (index, name) in listing.inputs.iter().enumerate() {
        println!("  {index}: {name}");
    }
    println!("output devices:");
    for (index, name) in listing.outputs.iter().enumerate() {
        println!("  {index}: {name}");
    }
    Ok(())
}

#[cfg(not(feature = "cpal"))]
fn list_devices() -> Result<()> {
    Err(EqError::msg("device listing requires the `cpal` feature"))
}

fn print_config(config_path: Option<&Path>, args: &RunArgs) -> Result<()> {
    let config = effective_config(config_path, args)?;
    print!("{}", render_config(&config)?);
    Ok(())
}

fn render_config(config: &EqualizerConfig) -> Result<String> {
    toml::to_string_pretty(config)
        .map_err(|err| EqError::msg(format!("failed to render configuration: {err}")))
}

/// Parses a non-negative, finite number of seconds.
fn parse_seconds(value: &str) -> std::result::Result<Duration, String> {
    let secs: f64 = value
        .parse()
        .map_err(|_| format!("`{value}` is not a number of seconds"))?;
    Duration::try_from_secs_f64(secs).map_err(|err| format!("`{value}`: {err}"))
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Real-time three band spectral equalizer", long_about = None)]
struct Cli {
    /// TOML (or `.json`) configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the equalizer, reading gain commands from stdin.
    Run(RunArgs),
    /// List the capture and playback devices of the default host.
    Devices,
    /// Print the effective configuration as TOML.
    Config(RunArgs),
}

#[derive(Args, Debug, Default)]
struct RunArgs {
    /// Capture device, by name or by index into the host's input device
    /// list (as printed by `devices`).
    #[arg(long)]
    input_device: Option<DeviceId>,
    /// Playback device, by name or by index into the host's output device
    /// list (as printed by `devices`).
    #[arg(long)]
    output_device: Option<DeviceId>,
    /// Frames per processing block.
    #[arg(long)]
    block_size: Option<usize>,
    /// Initial low band position (0-100).
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
    low: Option<u8>,
    /// Initial mid band position (0-100).
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
    mid: Option<u8>,
    /// Initial high band position (0-100).
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
    high: Option<u8>,
    /// Replace the capture device with a sine tone of this frequency.
    #[arg(long, value_name = "HZ")]
    tone: Option<f32>,
    /// Stop after this many seconds.
    #[arg(long, value_name = "SECS", value_parser = parse_seconds)]
    duration: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_gain_commands() {
        assert_eq!(
            parse_command("low 80").unwrap(),
            Some(ControlCommand::Set(Band::Low, 80))
        );
        assert_eq!(
            parse_command("  MID 0 ").unwrap(),
            Some(ControlCommand::Set(Band::Mid, 0))
        );
        assert_eq!(parse_command("status").unwrap(), Some(ControlCommand::Status));
        assert_eq!(parse_command("reset").unwrap(), Some(ControlCommand::Reset));
        assert_eq!(parse_command("quit").unwrap(), Some(ControlCommand::Quit));
        assert_eq!(parse_command("   ").unwrap(), None);
    }

    #[test]
    fn rejects_malformed_commands() {
        assert!(parse_command("high").is_err());
        assert!(parse_command("high 101").is_err());
        assert!(parse_command("high -3").is_err());
        assert!(parse_command("bass 10").is_err());
        assert!(parse_command("low 10 20").is_err());
    }

    #[test]
    fn cli_flags_override_defaults() {
        let args = RunArgs {
            input_device: Some(DeviceId::Index(2)),
            output_device: Some(DeviceId::Index(8)),
            block_size: Some(512),
            mid: Some(25),
            ..Default::default()
        };

        let config = effective_config(None, &args).unwrap();
        assert_eq!(config.audio.input_device, Some(DeviceId::Index(2)));
        assert_eq!(config.audio.output_device, Some(DeviceId::Index(8)));
        assert_eq!(config.audio.block_size, 512);
        assert_eq!(config.gains.low, 1.0);
        assert_eq!(config.gains.mid, 0.25);
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();

        let cli = Cli::try_parse_from([
            "spectral-eq",
            "run",
            "--tone",
            "440",
            "--low",
            "100",
            "--input-device",
            "BlackHole 2ch",
        ])
        .unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(args.tone, Some(440.0));
        assert_eq!(args.input_device, Some(DeviceId::Name("BlackHole 2ch".into())));
    }

    #[test]
    fn duration_must_be_finite_and_non_negative() {
        for bad in ["-1", "NaN", "inf", "1e30", "soon"] {
            let flag = format!("--duration={bad}");
            let parsed = Cli::try_parse_from(["spectral-eq", "run", "--tone", "440", &flag]);
            assert!(parsed.is_err(), "accepted {bad}");
        }

        let cli =
            Cli::try_parse_from(["spectral-eq", "run", "--tone", "440", "--duration", "2.5"])
                .unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(args.duration, Some(Duration::from_millis(2500)));
    }

    #[test]
    fn rendered_config_parses_back() {
        let args = RunArgs {
            output_device: Some(DeviceId::Name("Speakers".into())),
            high: Some(40),
            ..Default::default()
        };
        let config = effective_config(None, &args).unwrap();

        let rendered = render_config(&config).unwrap();
        assert!(rendered.contains("[audio]"));
        let parsed: EqualizerConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, config);

        let defaults = render_config(&effective_config(None, &RunArgs::default()).unwrap()).unwrap();
        let parsed: EqualizerConfig = toml::from_str(&defaults).unwrap();
        assert_eq!(parsed, EqualizerConfig::default());
    }
}
