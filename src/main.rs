mod ui;

use chrono::{DateTime, Local, Utc};
use clap::{error::ErrorKind, CommandFactory, Parser, Subcommand};
use crossterm::{
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    tty::IsTty,
};
use log::{info, warn};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    Terminal,
};
use std::{
    error::Error,
    fs::{self, OpenOptions},
    io::{self, stdin, Read},
    path::{Path, PathBuf},
    time::{Duration, Instant},
};
use wordrow::{
    app_dirs::DataPaths,
    chunker::InputMode,
    config::{Config, ConfigStore, FileConfigStore},
    library::{self, PlayPlan},
    runtime::{map_key, AppEvent, CrosstermEventSource, FixedTicker, PlayKey, Runner},
    session::{PlaySession, SessionStatus},
    store::{LibraryDb, SessionRecord},
};

const TICK_RATE_MS: u64 = 100;
const MISTAKE_FLASH_MS: u64 = 350;

/// rebuild imported sentences word by word on the home-row keys
#[derive(Parser, Debug, Clone)]
#[clap(
    version,
    about,
    long_about = "Import any prose, then recall each sentence in order: every row of up to four words is shuffled under the home-row keys and you press them back into place."
)]
pub struct Cli {
    /// keep the library, config and log in this directory instead of the defaults
    #[clap(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// import a text file: title on line 1, optional lang=<tag> on line 2, one sentence per line ("-" reads stdin)
    Import { path: PathBuf },
    /// list imported texts, most recently updated first
    List,
    /// delete a text with its progress and session history
    Delete { id: String },
    /// play a text (defaults to the most recently updated one)
    Play {
        id: Option<String>,
        /// hands to practice with for this run, overriding the saved mode
        #[clap(short = 'm', long, value_enum)]
        mode: Option<InputMode>,
    },
    /// show completed sessions, optionally for one text
    Stats { id: Option<String> },
    /// show or persist the input mode
    Mode {
        #[clap(value_enum)]
        mode: Option<InputMode>,
    },
}

/// What the event loop should do after a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

#[derive(Debug)]
pub struct App {
    pub plan: PlayPlan,
    pub session: PlaySession,
    pub input_mode: InputMode,
    pub started_at: DateTime<Utc>,
    pub flash_until: Option<Instant>,
    seen_mistake_version: u64,
    saved_rows: u64,
}

impl App {
    pub fn new(plan: PlayPlan, input_mode: InputMode, now: Instant) -> Self {
        let session = plan.start(now);
        Self {
            seen_mistake_version: session.mistake_version,
            saved_rows: session.hud.rows_completed,
            plan,
            session,
            input_mode,
            started_at: Utc::now(),
            flash_until: None,
        }
    }

    pub fn on_key(&mut self, key: PlayKey, now: Instant) -> Flow {
        match (self.session.status, key) {
            (_, PlayKey::Quit) => return Flow::Exit,
            (SessionStatus::Completed | SessionStatus::Idle, _) => return Flow::Exit,
            (_, PlayKey::CycleMode) => self.switch_mode(self.input_mode.cycled()),
            (SessionStatus::Paused, _) => self.session.resume(now),
            (SessionStatus::Ready, PlayKey::Pause) => self.session.pause(now),
            (SessionStatus::Ready, PlayKey::Label(label)) => self.session.handle_input(label, now),
            (SessionStatus::Ready, PlayKey::Other) => {}
        }

        if self.session.mistake_version != self.seen_mistake_version {
            self.seen_mistake_version = self.session.mistake_version;
            self.flash_until = Some(now + Duration::from_millis(MISTAKE_FLASH_MS));
        }
        Flow::Continue
    }

    /// Retarget every queued row to `mode`. Revealed words and the current row's progress stay.
    pub fn switch_mode(&mut self, mode: InputMode) {
        self.session.apply_input_mode(mode);
        self.input_mode = mode;
        info!("input mode switched to {mode}");
    }

    pub fn is_flashing(&self, now: Instant) -> bool {
        self.flash_until.is_some_and(|until| now < until)
    }

    /// True once per completed row, so progress can be written as the player goes.
    fn take_row_checkpoint(&mut self) -> bool {
        let rows = self.session.hud.rows_completed;
        if rows != self.saved_rows && !self.session.is_completed() {
            self.saved_rows = rows;
            return true;
        }
        false
    }
}

fn main() {
    let cli = Cli::parse();
    let paths = DataPaths::resolve(cli.data_dir.as_deref());

    if let Err(e) = init_logging(&paths.log) {
        eprintln!("logging disabled: {e}");
    }

    if let Err(e) = run(cli, &paths) {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

fn init_logging(path: &Path) -> Result<(), Box<dyn Error>> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .target(env_logger::Target::Pipe(Box::new(file)))
        .try_init()?;
    Ok(())
}

fn run(cli: Cli, paths: &DataPaths) -> Result<(), Box<dyn Error>> {
    let config_store = FileConfigStore::with_path(&paths.config);

    match cli.command {
        Command::Import { path } => {
            let raw = if path.as_os_str() == "-" {
                let mut buf = String::new();
                stdin().read_to_string(&mut buf)?;
                buf
            } else {
                fs::read_to_string(&path)?
            };
            let mut db = LibraryDb::open(&paths.db)?;
            let summary = library::import_text(&mut db, &raw)?;
            println!(
                "Imported \"{}\" ({}) with {} sentences. id: {}",
                summary.text.title,
                summary.text.lang_full,
                summary.sentences_persisted,
                summary.text.id
            );
        }
        Command::List => {
            let db = LibraryDb::open(&paths.db)?;
            let texts = db.list_texts()?;
            if texts.is_empty() {
                println!("No texts yet. Import one with `wordrow import <file>`.");
            }
            for text in texts {
                println!(
                    "{}  {:<32}  {:<6}  {:>4} sentences  {}",
                    text.id,
                    text.title,
                    text.lang_full,
                    text.sentences_count,
                    text.updated_at.with_timezone(&Local).format("%Y-%m-%d %H:%M")
                );
            }
        }
        Command::Delete { id } => {
            let mut db = LibraryDb::open(&paths.db)?;
            library::delete_text(&mut db, &id)?;
            println!("Deleted {id}.");
        }
        Command::Stats { id } => {
            let db = LibraryDb::open(&paths.db)?;
            let sessions = db.list_sessions(id.as_deref())?;
            print_stats(&sessions);
        }
        Command::Mode { mode } => match mode {
            Some(input_mode) => {
                config_store.save(&Config { input_mode })?;
                println!("Input mode set to {input_mode}.");
            }
            None => println!("{}", config_store.load().input_mode),
        },
        Command::Play { id, mode } => {
            let input_mode = mode.unwrap_or_else(|| config_store.load().input_mode);
            let db = LibraryDb::open(&paths.db)?;
            let text_id = match id {
                Some(id) => id,
                None => match db.list_texts()?.into_iter().next() {
                    Some(text) => text.id,
                    None => return Err("No texts to play. Import one first.".into()),
                },
            };
            let plan = library::load_for_play(&db, &text_id, input_mode)?;
            play(&db, &config_store, plan, input_mode)?;
        }
    }

    Ok(())
}

fn print_stats(sessions: &[SessionRecord]) {
    if sessions.is_empty() {
        println!("No completed sessions yet.");
        return;
    }

    let overview = library::stats_overview(sessions);
    println!(
        "{} sessions, {} rows, {} sentences, {:.1} min active",
        overview.sessions,
        overview.rows_completed,
        overview.sentences_completed,
        overview.active_ms as f64 / 60_000.0
    );
    if let (Some(accuracy), Some(rpm)) = (overview.mean_accuracy, overview.mean_rpm) {
        println!("mean accuracy {accuracy:.0}%, mean {rpm:.1} rows/min");
    }
    for s in sessions {
        println!(
            "{}  {}  {:>3}%  {:>5.1} rows/min  {} mistakes",
            s.ended_at.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
            s.text_id,
            s.accuracy_session,
            s.rpm_session_avg,
            s.mistakes_total
        );
    }
}

fn play(
    db: &LibraryDb,
    config_store: &dyn ConfigStore,
    plan: PlayPlan,
    input_mode: InputMode,
) -> Result<(), Box<dyn Error>> {
    if !stdin().is_tty() {
        let mut cmd = Cli::command();
        cmd.error(ErrorKind::Io, "stdin must be a tty").exit();
    }

    let mut app = App::new(plan, input_mode, Instant::now());
    info!(
        "playing {} in {input_mode} mode from row {}",
        app.plan.text.id,
        app.session.hud.rows_completed
    );

    enable_raw_mode()?;

    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let outcome = start_tui(&mut terminal, &mut app, db, config_store);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen,)?;
    terminal.show_cursor()?;
    outcome?;

    if app.session.is_completed() {
        if let Some(record) =
            library::finish_session(db, &app.session, app.started_at, Utc::now())?
        {
            println!(
                "Finished \"{}\": {}% accuracy, {:.1} rows/min, {} mistakes.",
                app.plan.text.title, record.accuracy_session, record.rpm_session_avg, record.mistakes_total
            );
        }
    } else {
        app.session.pause(Instant::now());
        if library::save_progress(db, &app.session, Utc::now())? {
            println!("Progress saved. Run `wordrow play {}` to resume.", app.plan.text.id);
        }
    }

    Ok(())
}

fn start_tui<B: Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
    db: &LibraryDb,
    config_store: &dyn ConfigStore,
) -> Result<(), Box<dyn Error>> {
    let runner = Runner::new(
        CrosstermEventSource::new(),
        FixedTicker::new(Duration::from_millis(TICK_RATE_MS)),
    );

    loop {
        terminal.draw(|f| f.render_widget(&*app, f.area()))?;

        match runner.step() {
            AppEvent::Tick | AppEvent::Resize => {}
            AppEvent::Key(key) => {
                let Some(play_key) = map_key(&key) else {
                    continue;
                };
                let mode_before = app.input_mode;
                if app.on_key(play_key, Instant::now()) == Flow::Exit {
                    break;
                }
                if app.input_mode != mode_before {
                    let config = Config {
                        input_mode: app.input_mode,
                    };
                    if let Err(e) = config_store.save(&config) {
                        warn!("could not save input mode: {e}");
                    }
                }
                if app.take_row_checkpoint() {
                    if let Err(e) = library::save_progress(db, &app.session, Utc::now()) {
                        warn!("could not save progress: {e}");
                    }
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use wordrow::{chunker::Hand, library::load_for_play};

    #[test]
    fn test_cli_play_defaults() {
        let cli = Cli::parse_from(["wordrow", "play"]);
        assert!(cli.data_dir.is_none());
        assert!(matches!(cli.command, Command::Play { id: None, mode: None }));
    }

    #[test]
    fn test_cli_play_mode_override() {
        let cli = Cli::parse_from(["wordrow", "play", "abc", "--mode", "right"]);
        assert!(matches!(
            cli.command,
            Command::Play { id: Some(ref id), mode: Some(InputMode::Right) } if id == "abc"
        ));

        let cli = Cli::parse_from(["wordrow", "play", "-m", "left"]);
        assert!(matches!(cli.command, Command::Play { mode: Some(InputMode::Left), .. }));
    }

    #[test]
    fn test_cli_global_data_dir() {
        let cli = Cli::parse_from(["wordrow", "list", "--data-dir", "/tmp/wr"]);
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/wr")));
        assert!(matches!(cli.command, Command::List));
    }

    #[test]
    fn test_cli_rejects_unknown_mode() {
        assert!(Cli::try_parse_from(["wordrow", "mode", "feet"]).is_err());
        let cli = Cli::parse_from(["wordrow", "mode"]);
        assert!(matches!(cli.command, Command::Mode { mode: None }));
    }

    fn app_for(raw: &str) -> App {
        let mut db = LibraryDb::open_in_memory().unwrap();
        let id = library::import_text(&mut db, raw).unwrap().text.id;
        let plan = load_for_play(&db, &id, InputMode::Both).unwrap();
        App::new(plan, InputMode::Both, Instant::now())
    }

    fn correct_key(app: &App) -> PlayKey {
        let row = app.session.live_row.as_ref().unwrap();
        let slot = row
            .order
            .iter()
            .position(|&t| t == app.session.reveal_index)
            .unwrap();
        PlayKey::Label(row.labels[slot])
    }

    #[test]
    fn test_pause_then_any_key_resumes() {
        let mut app = app_for("Title\nOne two three.\n");
        let now = Instant::now();

        assert_eq!(app.on_key(PlayKey::Pause, now), Flow::Continue);
        assert_eq!(app.session.status, SessionStatus::Paused);

        let key = correct_key(&app);
        assert_eq!(app.on_key(key, now), Flow::Continue);
        assert_eq!(app.session.status, SessionStatus::Ready);
        assert_eq!(app.session.reveal_index, 0);
    }

    #[test]
    fn test_mistake_starts_flash() {
        let mut app = app_for("Title\nOne two three.\n");
        let now = Instant::now();
        assert_eq!(app.session.live_row.as_ref().unwrap().hand, Hand::Left);

        app.on_key(PlayKey::Label('J'), now);
        assert!(app.is_flashing(now));
        assert!(!app.is_flashing(now + Duration::from_secs(1)));

        app.flash_until = None;
        let key = correct_key(&app);
        app.on_key(key, now);
        assert!(!app.is_flashing(now));
    }

    #[test]
    fn test_completion_then_exit() {
        let mut app = app_for("Title\nOne two three four five.\n");
        let now = Instant::now();

        let key = correct_key(&app);
        app.on_key(key, now);
        while app.session.status == SessionStatus::Ready {
            let key = correct_key(&app);
            app.on_key(key, now);
            if app.session.status == SessionStatus::Ready && app.session.reveal_index == 0 {
                assert!(app.take_row_checkpoint());
            }
        }

        assert!(app.session.is_completed());
        assert!(!app.take_row_checkpoint());
        assert_eq!(app.on_key(PlayKey::Other, now), Flow::Exit);
    }

    #[test]
    fn test_tab_switches_hands_mid_row() {
        let mut app = app_for("Title\nOne two three four five.\n");
        let now = Instant::now();
        assert_eq!(app.session.live_row.as_ref().unwrap().labels, ['A', 'S', 'D', 'F']);

        let key = correct_key(&app);
        app.on_key(key, now);
        assert_eq!(app.session.reveal_index, 1);
        let done_before = app.session.live_row_done.clone();
        let order_before = app.session.live_row.as_ref().unwrap().order.clone();

        assert_eq!(app.on_key(PlayKey::CycleMode, now), Flow::Continue);
        assert_eq!(app.input_mode, InputMode::Left);
        assert_eq!(app.on_key(PlayKey::CycleMode, now), Flow::Continue);
        assert_eq!(app.input_mode, InputMode::Right);

        let live = app.session.live_row.as_ref().unwrap();
        assert_eq!(live.hand, Hand::Right);
        assert_eq!(live.labels, ['J', 'K', 'L', ';']);
        assert_eq!(live.order, order_before);
        assert_eq!(app.session.reveal_index, 1);
        assert_eq!(app.session.live_row_done, done_before);
        assert_eq!(app.session.hud.mistakes_total, 0);
        assert_eq!(app.session.queued_row.as_ref().unwrap().hand, Hand::Right);

        let key = correct_key(&app);
        app.on_key(key, now);
        assert_eq!(app.session.reveal_index, 2);
    }

    #[test]
    fn test_tab_while_paused_keeps_pause() {
        let mut app = app_for("Title\nOne two three.\n");
        let now = Instant::now();
        app.on_key(PlayKey::Pause, now);
        app.on_key(PlayKey::CycleMode, now);
        assert_eq!(app.session.status, SessionStatus::Paused);
        assert_eq!(app.input_mode, InputMode::Left);
    }

    #[test]
    fn test_quit_always_exits() {
        let mut app = app_for("Title\nOne two.\n");
        assert_eq!(app.on_key(PlayKey::Quit, Instant::now()), Flow::Exit);
    }
}
