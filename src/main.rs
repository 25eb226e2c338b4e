#[global_allocator]
#[cfg(not(target_env = "msvc"))]
static GLOBAL: jemallocator::Jemalloc = jemallocator::Jemalloc;

#[cfg(target_env = "msvc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::process;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use clap::Parser;
use indicatif::{HumanFloatCount, ProgressBar, ProgressStyle};
use log::{error, warn, LevelFilter};

use vanity_timestamp_gpg::{
    export, mine, pattern::format_fingerprint, Config, CpuBackend, SearchEngine, SearchObserver,
    Target,
};

const PROGRESS_TICK_MS: u64 = 100;

/// Progress bar plus the Ctrl-C flag and optional deadline.
struct CliObserver {
    bar: ProgressBar,
    stop: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CliObserver {
    fn new(stop: Arc<AtomicBool>, timeout: Option<Duration>) -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {human_pos} hashes ({per_sec}) {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.enable_steady_tick(Duration::from_millis(PROGRESS_TICK_MS));
        Self {
            bar,
            stop,
            deadline: timeout.map(|t| Instant::now() + t),
        }
    }
}

impl SearchObserver for CliObserver {
    fn on_progress(&mut self, hashes: u64, _elapsed: Duration) {
        self.bar.set_position(hashes);
    }

    fn should_cancel(&mut self) -> bool {
        self.stop.load(Ordering::Relaxed) || self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

fn init_logger(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

fn run(config: Config) -> vanity_timestamp_gpg::Result<()> {
    let pattern = config.parsed_pattern()?;
    let filter = pattern.compile();
    if config.print_filter {
        println!("{}", filter);
        return Ok(());
    }

    let stop = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&stop);
    if let Err(e) = ctrlc::set_handler(move || handler_flag.store(true, Ordering::Relaxed)) {
        warn!("Ctrl-C handler unavailable: {}", e);
    }

    let backend = CpuBackend::new(config.thread_count())?;
    println!("Pattern:    {}", pattern);
    println!(
        "Difficulty: {} bits (~{} hashes)",
        pattern.difficulty_bits(),
        HumanFloatCount(pattern.expected_hashes())
    );
    let target = match config.target() {
        Target::Primary => "primary",
        Target::Subkey => "subkey",
    };
    println!("Key:        {} ({})", config.cipher_suite, target);
    println!(
        "Grid:       {} lanes x {} rounds on {} threads",
        config.lanes,
        config.rounds,
        backend.threads()
    );
    println!();

    let mut engine = SearchEngine::new(backend, config.search_options())?;
    let key_options = config.key_options();
    let mut observer = CliObserver::new(Arc::clone(&stop), config.timeout());
    let mut found = 0usize;

    loop {
        let key = mine(
            &mut engine,
            &key_options,
            &filter,
            config.target(),
            &mut observer,
        )?;
        let Some(key) = key else { break };
        found += 1;

        observer.bar.println(format!(
            "MATCH FOUND! {} created {}",
            format_fingerprint(&key.fingerprint()),
            key.timestamp()
        ));
        if let Some(subkey) = key.subkey_fingerprint() {
            observer
                .bar
                .println(format!("  subkey     {}", format_fingerprint(&subkey)));
        }
        if !config.dry_run {
            if let Some(path) = export::save_key(&key, &config.pattern, found, &config.output)? {
                observer.bar.println(format!("  saved to   {}", path.display()));
            }
        }

        if !config.nonstop || stop.load(Ordering::Relaxed) {
            break;
        }
    }

    observer
        .bar
        .finish_with_message(format!("Done! Found: {}", found));
    Ok(())
}

fn main() {
    let config = Config::parse();
    init_logger(config.verbose);

    if let Err(e) = config.validate() {
        eprintln!("Configuration error: {}", e);
        process::exit(1);
    }

    if let Err(e) = run(config) {
        error!("{}", e);
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
