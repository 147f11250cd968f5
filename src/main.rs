//! LED light show for a Raspberry Pi
//!
//! Plays timed patterns on a small bank of GPIO-driven LEDs, from an
//! interactive menu, straight from the command line, or under control of
//! an HTTP API.
//!
//! ## Architecture
//! - **Show thread** (the main thread, or a `std::thread` when serving):
//!   owns the output bank through the lifecycle manager and runs patterns
//! - **HTTP server** (tokio/axum, `serve` only): accepts API requests and
//!   sends commands to the show thread over a channel
//!
//! ## Rust concepts
//! - clap derive with subcommands and global options
//! - `#[tokio::main]` on a helper so only `serve` starts a runtime
//! - `Box<dyn Error>` to bubble up any error type to `main`
//!
//! ## Usage
//! ```sh
//! sudo ./target/release/pi-lightshow                   # menu
//! ./target/release/pi-lightshow --simulate run --once  # no hardware
//! sudo ./target/release/pi-lightshow serve --port 8080
//! ```

use clap::{Parser, Subcommand};
use pi_lightshow::bank::OutputBank;
use pi_lightshow::driver::{MemoryDriver, OutputDriver};
use pi_lightshow::error::BankError;
use pi_lightshow::lifecycle::Lifecycle;
use pi_lightshow::menu::{self, MenuChoice};
use pi_lightshow::pattern::Pattern;
use pi_lightshow::runner::{Entry, Outcome, Playlist, Runner};
use pi_lightshow::{
    DEFAULT_PINS, ShowConfig, StopSignal, cycler, is_running, server, setup_signal_handler,
};
use std::error::Error;
use std::io::{self, Write};
use std::sync::mpsc::{self, Receiver};
use tracing_subscriber::EnvFilter;

/// LED light show for GPIO-driven LEDs
#[derive(Parser)]
#[command(name = "pi-lightshow")]
#[command(about = "Timed LED patterns on Raspberry Pi GPIO pins")]
#[command(version)]
struct Args {
    /// GPIO pins in wiring order, comma separated
    #[arg(long, global = true, value_delimiter = ',', default_values_t = DEFAULT_PINS)]
    pins: Vec<u8>,

    /// Tempo multiplier (2.0 plays twice as fast)
    #[arg(long, global = true, default_value_t = 1.0)]
    speed: f64,

    /// Software PWM frequency for dimming patterns, in Hz
    #[arg(long, global = true, default_value_t = 100.0)]
    pwm_frequency: f64,

    /// Seed for the random patterns, for repeatable shows
    #[arg(long, global = true)]
    seed: Option<u64>,

    /// Keep line state in memory instead of driving GPIO
    #[arg(long, global = true)]
    simulate: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive menu (the default)
    Menu,
    /// Play patterns without the menu
    Run {
        /// Pattern ids with optional parameter, e.g. chase,flash:4. Default: full show
        #[arg(long, value_delimiter = ',')]
        patterns: Vec<String>,

        /// Play the playlist once instead of looping
        #[arg(long)]
        once: bool,
    },
    /// List every pattern
    List {
        /// Print the catalog as JSON, as served by GET /api/v1/patterns
        #[arg(long)]
        json: bool,
    },
    /// Light each line in turn to check the wiring
    Check,
    /// Cycle through the lines, one per button press
    Cycle {
        /// GPIO pin of a pull-up push button. Without it, Enter advances
        #[arg(long)]
        button: Option<u8>,
    },
    /// Run the HTTP control API
    Serve {
        /// Port to listen on
        #[arg(long, default_value = "8080")]
        port: u16,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_ansi(false) // Disable ANSI color codes for systemd/journald
        .compact()
        .init();

    let args = Args::parse();
    let config = ShowConfig::new(args.pins.clone(), args.speed, args.pwm_frequency)?;
    let command = args.command.unwrap_or(Command::Menu);

    if let Command::List { json } = command {
        return list_patterns(json);
    }

    tracing::info!("LED Light Show v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Pins: {:?}", config.pins);

    let bank = OutputBank::new(build_driver(&config, args.simulate)?, &config.pins)?;
    let mut lifecycle = Lifecycle::new(bank);

    match command {
        Command::Menu => run_menu(&mut lifecycle, &config, args.seed),
        Command::Run { patterns, once } => {
            let playlist = Playlist::from_specs(patterns.as_slice())?;
            let stop = setup_signal_handler();
            if !once {
                println!("Press Ctrl+C to stop");
            }
            let mut runner = runner(&mut lifecycle, &stop, &config, args.seed);
            let outcome = if once {
                runner.run_once(&playlist)
            } else {
                runner.run_looped(&playlist)
            };
            finish(outcome)
        }
        Command::Check => {
            let stop = setup_signal_handler();
            let playlist = Playlist::new(vec![Entry::from(Pattern::WiringCheck)]);
            finish(runner(&mut lifecycle, &stop, &config, args.seed).run_once(&playlist))
        }
        Command::Cycle { button } => {
            let stop = setup_signal_handler();
            let presses = spawn_presses(button, args.simulate, &stop)?;
            cycler::run(&mut lifecycle, &stop, &presses);
            Ok(())
        }
        Command::Serve { port } => serve(lifecycle, config, args.seed, port),
        Command::List { .. } => Ok(()),
    }
}

fn list_patterns(json: bool) -> Result<(), Box<dyn Error>> {
    if json {
        println!("{}", serde_json::to_string_pretty(&server::pattern_catalog())?);
        return Ok(());
    }
    println!("{:<15} {:<20} {:<10} {:>7}", "ID", "NAME", "FAMILY", "DEFAULT");
    for p in Pattern::ALL {
        let family = format!("{:?}", p.family()).to_lowercase();
        println!(
            "{:<15} {:<20} {:<10} {:>7}",
            p.id(),
            p.title(),
            family,
            p.default_param()
        );
    }
    Ok(())
}

fn build_driver(config: &ShowConfig, simulate: bool) -> Result<Box<dyn OutputDriver>, BankError> {
    if simulate || cfg!(not(feature = "hardware")) {
        tracing::info!(
            "Simulation mode: line levels are kept in memory (RUST_LOG=trace shows frames)"
        );
        return Ok(Box::new(MemoryDriver::new()));
    }
    gpio_driver(config)
}

#[cfg(feature = "hardware")]
fn gpio_driver(config: &ShowConfig) -> Result<Box<dyn OutputDriver>, BankError> {
    Ok(Box::new(pi_lightshow::driver::GpioDriver::new(
        config.pwm_frequency,
    )?))
}

#[cfg(not(feature = "hardware"))]
fn gpio_driver(_config: &ShowConfig) -> Result<Box<dyn OutputDriver>, BankError> {
    Ok(Box::new(MemoryDriver::new()))
}

fn runner<'a>(
    lifecycle: &'a mut Lifecycle,
    stop: &StopSignal,
    config: &ShowConfig,
    seed: Option<u64>,
) -> Runner<'a> {
    let runner = Runner::new(lifecycle, stop.clone(), config.tempo);
    match seed {
        Some(seed) => runner.with_seed(seed),
        None => runner,
    }
}

/// A fatal fault becomes the process error; the lifecycle has already
/// shut the hardware down by then.
fn finish(outcome: Outcome) -> Result<(), Box<dyn Error>> {
    match outcome {
        Outcome::Failed(e) => Err(e.into()),
        _ => Ok(()),
    }
}

// ── Menu ─────────────────────────────────────────────────────────────

fn run_menu(
    lifecycle: &mut Lifecycle,
    config: &ShowConfig,
    seed: Option<u64>,
) -> Result<(), Box<dyn Error>> {
    let stop = setup_signal_handler();

    println!("Testing LEDs...");
    let check = Playlist::new(vec![Entry::from(Pattern::WiringCheck)]);
    finish(runner(lifecycle, &stop, config, seed).run_once(&check))?;

    let input = menu::spawn_stdin_lines();
    while is_running(&stop) {
        print!("{}", menu::render_menu());
        print!("Choose: ");
        io::stdout().flush()?;

        // Ctrl+C at the prompt ends the wait without needing Enter.
        let Some(line) = menu::wait_for_line(&input, &stop) else {
            break;
        };

        let playlist = match menu::parse(&line) {
            Ok(MenuChoice::Quit) => break,
            Ok(MenuChoice::All) => Playlist::full_show(),
            Ok(MenuChoice::Pattern(p)) => Playlist::repeat(p),
            Err(e) => {
                println!("{e}");
                continue;
            }
        };

        println!("Press Ctrl+C to stop");
        finish(runner(lifecycle, &stop, config, seed).run_looped(&playlist))?;
    }

    println!("Goodbye!");
    Ok(())
}

// ── Button cycler ────────────────────────────────────────────────────

fn spawn_presses(
    button: Option<u8>,
    simulate: bool,
    stop: &StopSignal,
) -> Result<Receiver<()>, Box<dyn Error>> {
    let (tx, rx) = mpsc::channel();
    match button {
        #[cfg(feature = "hardware")]
        Some(pin) if !simulate => {
            cycler::spawn_button(pin, tx, stop.clone())?;
            println!("Press the button on GPIO{pin} to cycle, Ctrl+C to stop");
        }
        _ => {
            let _ = (simulate, stop);
            let lines = menu::spawn_stdin_lines();
            std::thread::spawn(move || {
                for _ in lines {
                    if tx.send(()).is_err() {
                        break;
                    }
                }
            });
            println!("Press Enter to cycle, Ctrl+C to stop");
        }
    }
    Ok(rx)
}

// ── HTTP server ──────────────────────────────────────────────────────

#[tokio::main(flavor = "current_thread")]
async fn serve(
    lifecycle: Lifecycle,
    config: ShowConfig,
    seed: Option<u64>,
    port: u16,
) -> Result<(), Box<dyn Error>> {
    use pi_lightshow::StopReason;
    use pi_lightshow::runner::ShowStatus;
    use pi_lightshow::server::{AppState, command_channel, show_loop};
    use std::sync::{Arc, Mutex};

    // Command queue to the show thread; submitting also preempts.
    let stop = StopSignal::new();
    let (commands, queue) = command_channel(stop.clone());

    // Shared show status: show thread writes, HTTP handlers read.
    let status = Arc::new(Mutex::new(ShowStatus::new(config.line_count())));

    let show_status = status.clone();
    let show_stop = stop.clone();
    let tempo = config.tempo;
    let show_handle = std::thread::spawn(move || {
        show_loop(queue, lifecycle, show_status, show_stop, tempo, seed);
    });

    let app = server::create_router(AppState { commands, status });

    let addr = format!("0.0.0.0:{port}");
    tracing::info!("Listening on http://{}", addr);
    tracing::info!("API Documentation: http://localhost:{}/api-docs/openapi.json", port);
    tracing::info!("Try: curl http://localhost:{}/api/v1/status", port);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let shutdown_stop = stop.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if tokio::signal::ctrl_c().await.is_err() {
                tracing::warn!("Ctrl+C handler unavailable, serving until killed");
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutting down");
            shutdown_stop.request(StopReason::Shutdown);
        })
        .await?;

    // The router (and its sender) is gone; wait for the show thread to
    // release the hardware.
    stop.request(StopReason::Shutdown);
    show_handle
        .join()
        .map_err(|_| "show thread panicked during shutdown")?;
    Ok(())
}
