mod config;
mod events;
mod tui;

use std::io;
use std::net::IpAddr;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{self, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{cursor, execute};
use log::{info, warn};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;

use config::{Overrides, ServerConfig, SettingsWatcher, restart_only_changes};
use railsync::{NetworkRole, NetworkServer, ServerInfo, Settings, UdpTransport, WorldCache};
use tui::TuiState;

type DedicatedServer = NetworkServer<UdpTransport>;

#[derive(Parser)]
#[command(name = "railsync-server")]
#[command(about = "Dedicated multiplayer session server")]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: IpAddr,

    #[arg(short, long, help = "Overrides the port from the settings file")]
    port: Option<u16>,

    #[arg(short, long, default_value = "railsync.toml")]
    config: PathBuf,

    #[arg(long, help = "Overrides the password from the settings file")]
    password: Option<String>,

    #[arg(short, long, help = "Overrides the player limit from the settings file")]
    max_players: Option<usize>,

    #[arg(short, long, default_value_t = 60)]
    tick_rate: u32,

    #[arg(long)]
    headless: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = ServerConfig {
        bind: args.bind,
        tick_rate: args.tick_rate.max(1),
        settings_path: args.config,
        overrides: Overrides {
            port: args.port,
            password: args.password,
            max_players: args.max_players,
        },
    };

    if args.headless {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    let mut settings = Settings::load_or_create(&config.settings_path).with_context(|| {
        format!("loading settings from {}", config.settings_path.display())
    })?;
    config.overrides.apply(&mut settings);

    let info = ServerInfo::from_settings(&settings);
    let mut server = NetworkServer::new(
        UdpTransport::new(config.bind),
        settings,
        info,
        Box::new(WorldCache::new()),
    )
    .context("building packet dispatcher")?;
    server
        .start()
        .with_context(|| format!("binding {}:{}", config.bind, server.settings().port))?;

    if args.headless {
        run_headless(&mut server, &config);
    } else {
        run_with_tui(&mut server, &config)?;
    }

    server.stop();
    Ok(())
}

/// Pumps the server at the tick rate forever. Log output comes from the
/// library through env_logger.
fn run_headless(server: &mut DedicatedServer, config: &ServerConfig) {
    let tick = Duration::from_secs_f64(1.0 / config.tick_rate as f64);
    let mut watcher = SettingsWatcher::new(&config.settings_path);
    info!("server started on {}:{}", config.bind, server.settings().port);

    loop {
        let started = Instant::now();
        server.pump();
        for event in server.drain_events() {
            log::debug!("{:?}", event);
        }

        if let Some(result) = watcher.poll() {
            match reload(server, config, result) {
                Ok(pending) => {
                    for message in pending {
                        warn!("{}", message);
                    }
                    info!("settings reloaded");
                }
                Err(message) => warn!("{}", message),
            }
        }

        if let Some(remaining) = tick.checked_sub(started.elapsed()) {
            thread::sleep(remaining);
        }
    }
}

fn run_with_tui(server: &mut DedicatedServer, config: &ServerConfig) -> io::Result<()> {
    terminal::enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, cursor::Hide)?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let tick = Duration::from_secs_f64(1.0 / config.tick_rate as f64);
    let started = Instant::now();
    let mut watcher = SettingsWatcher::new(&config.settings_path);
    let mut tui_state = TuiState::new();
    let mut running = true;

    tui_state.log_info(format!(
        "Server started on {}:{}",
        config.bind,
        server.settings().port
    ));

    while running {
        let frame_start = Instant::now();
        server.pump();

        let show_ips = server.settings().log_ips;
        for event in server.drain_events() {
            let (level, line) = events::describe(&event, show_ips);
            tui_state.log(level, line);
        }

        if let Some(result) = watcher.poll() {
            match reload(server, config, result) {
                Ok(pending) => {
                    for message in pending {
                        tui_state.log_warn(message);
                    }
                    tui_state.log_info("Settings reloaded");
                }
                Err(message) => tui_state.log_warn(message),
            }
        }

        if let Some(id) = tui_state.take_pending_kick() {
            if let Err(err) = server.kick(id) {
                tui_state.log_error(format!("Kick failed: {}", err));
            }
        }

        let timeout = tick.saturating_sub(frame_start.elapsed());
        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    let players = server.player_infos();
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => running = false,
                        KeyCode::Tab => tui_state.next_tab(),
                        KeyCode::BackTab => tui_state.prev_tab(),
                        KeyCode::PageUp => tui_state.scroll_up(),
                        KeyCode::PageDown => tui_state.scroll_down(),
                        KeyCode::End => tui_state.scroll_to_bottom(),
                        KeyCode::Up if tui_state.active_tab() == tui::Tab::Players => {
                            tui_state.select_prev(players.len());
                        }
                        KeyCode::Down if tui_state.active_tab() == tui::Tab::Players => {
                            tui_state.select_next(players.len());
                        }
                        KeyCode::Char('k') | KeyCode::Char('K')
                            if tui_state.active_tab() == tui::Tab::Players =>
                        {
                            tui_state.request_kick(&players);
                        }
                        _ => {}
                    }
                }
            }
        }

        let players = server.player_infos();
        let snapshot = tui::Snapshot {
            uptime_secs: started.elapsed().as_secs(),
            port: server.settings().port,
            max_players: server.settings().max_players,
            stats: server.stats(),
            network: server.transport().stats(),
            players: &players,
        };
        terminal.draw(|frame| {
            tui::render(frame, &tui_state, &snapshot);
        })?;
    }

    terminal::disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, cursor::Show)?;

    Ok(())
}

/// Applies a reloaded settings file on top of the command line overrides.
/// Returns a warning for each value that only a restart picks up.
fn reload(
    server: &mut DedicatedServer,
    config: &ServerConfig,
    result: Result<Settings, railsync::SettingsError>,
) -> Result<Vec<String>, String> {
    let mut settings =
        result.map_err(|err| format!("ignoring {}: {}", config.settings_path.display(), err))?;
    config.overrides.apply(&mut settings);
    let pending = restart_only_changes(server.info(), &settings)
        .into_iter()
        .map(|name| format!("{} change takes effect after a restart", name))
        .collect();
    server.apply_settings(settings);
    Ok(pending)
}
