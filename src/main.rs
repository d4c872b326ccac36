// ============================================
// src/main.rs (メインファイル)
// ============================================

use std::fs::OpenOptions;
use std::io::stdout;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use letterwiz::arena::Arena;
use letterwiz::audio::Sound;
use letterwiz::channel::FileChannel;
use letterwiz::config::Settings;
use letterwiz::errors::Result;
use letterwiz::game::{Action, Phase};
use letterwiz::letters::Letter;
use letterwiz::room::{CHANNEL_NAME, RoleRegistry, RoomClient, new_client_id};
use letterwiz::rounds::Variant;
use letterwiz::simple::SimpleGame;
use letterwiz::store::FileStore;
use letterwiz::ui;

use clap::{Parser, Subcommand};
use console::style;
use dialoguer::Select;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing_subscriber::EnvFilter;

use crossterm::{
    ExecutableCommand,
    cursor::{Hide, Show},
    event::{self, Event, KeyCode},
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};

use ratatui::prelude::*;

// --------------------------------------------------
// コマンドライン引数
// --------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "letterwiz", version)]
#[command(about = "Find my little brother: uppercase ↔ lowercase matching")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// 1レベルあたりのラウンド数
    #[arg(long, global = true)]
    rounds: Option<usize>,

    /// 保存先ディレクトリ (教室版のタブ同士はここを共有する)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// 効果音を鳴らさない
    #[arg(long, global = true)]
    mute: bool,

    /// デバッグログを出す
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// 先生と生徒で遊ぶ教室版 (ターミナルを2つ開く)
    Classroom {
        /// 以前の役割を引き継ぐためのID
        #[arg(long)]
        client_id: Option<String>,

        /// 役割の割り当てをリセットしてから参加する
        #[arg(long)]
        reset_roles: bool,
    },
    /// 一人練習 (レベル4は最終テスト)
    Arena {
        /// レベル5で使うペア数 (1〜26)
        #[arg(long)]
        pairs: Option<usize>,
    },
    /// タップ / 列 の簡易版
    Simple,
}

// --------------------------------------------------
// アプリ本体
// --------------------------------------------------

/// 起動中のバリアント
enum App {
    Classroom(Box<RoomClient<FileStore, FileChannel>>),
    Arena(Arena),
    Simple(SimpleGame),
}

/// キー入力の意味
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Input {
    Level(u8),
    Start,
    Upper(Letter),
    Lower(char),
}

impl Input {
    fn from_key(code: KeyCode) -> Option<Self> {
        match code {
            KeyCode::Enter => Some(Input::Start),
            KeyCode::Char(c) if c.is_ascii_digit() => c.to_digit(10).map(|d| Input::Level(d as u8)),
            KeyCode::Char(c) if c.is_ascii_uppercase() => Letter::new(c).map(Input::Upper),
            KeyCode::Char(c) if c.is_ascii_lowercase() => Some(Input::Lower(c)),
            _ => None,
        }
    }
}

impl App {
    /// タイマーと同期を進める
    fn tick(&mut self, now: Instant) {
        match self {
            App::Classroom(client) => {
                client.pump(now);
            }
            App::Arena(arena) => {
                arena.tick(now);
            }
            App::Simple(game) => {
                game.tick(now);
            }
        }
    }

    fn handle(&mut self, input: Input, now: Instant) {
        match self {
            App::Classroom(client) => {
                let _ = match input {
                    Input::Level(n) => client.switch_level(n, now),
                    Input::Start => client.dispatch(Action::StartActivity, now),
                    Input::Upper(letter) => client.dispatch(Action::SelectUpper(letter), now),
                    Input::Lower(c) => client.dispatch(Action::SelectLower(c), now),
                };
            }
            App::Arena(arena) => {
                let _ = match input {
                    Input::Level(n) => arena.switch_level(n, now),
                    Input::Start => arena.dispatch(Action::StartActivity, now),
                    Input::Upper(letter) => arena.dispatch(Action::SelectUpper(letter), now),
                    Input::Lower(c) => arena.dispatch(Action::SelectLower(c), now),
                };
            }
            App::Simple(game) => {
                let _ = match input {
                    Input::Level(n) => game.switch_level(n, now),
                    Input::Start => game.start(now),
                    // 簡易版は大文字を選ぶ必要がないので、どちらのキーでもタップ扱い
                    Input::Upper(letter) => game.tap(letter.to_lower(), now),
                    Input::Lower(c) => game.tap(c, now),
                };
            }
        }
    }

    fn draw(&self, f: &mut Frame) {
        match self {
            App::Classroom(client) => {
                ui::draw_classroom(f, client.state(), client.role(), &Variant::Classroom.levels(None))
            }
            App::Arena(arena) => ui::draw_arena(f, arena),
            App::Simple(game) => ui::draw_simple(f, game, &Variant::Simple.levels(None)),
        }
    }
}

// --------------------------------------------------
// メイン関数 (TUIセットアップと実行ループ)
// --------------------------------------------------

fn main() -> ExitCode {
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("error:").red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    // 設定ファイルの問題はログの準備ができてから記録する
    let (mut settings, config_problem) = match Settings::load() {
        Ok(settings) => (settings, None),
        Err(e) => {
            eprintln!("{} 設定ファイルを読めなかったのでデフォルト値を使います: {}", style("warning:").yellow().bold(), e);
            (Settings::default(), Some(e))
        }
    };
    if let Some(rounds) = cli.rounds {
        settings.rounds_per_level = rounds;
    }
    if let Some(dir) = &cli.data_dir {
        settings.data_dir = Some(dir.clone());
    }
    if let Some(Command::Arena { pairs: Some(pairs) }) = &cli.command {
        settings.custom_pairs = Some(*pairs);
    }
    settings.validate()?;

    let data_dir = settings.resolve_data_dir()?;
    init_logging(&data_dir, cli.verbose)?;
    if let Some(e) = config_problem {
        tracing::warn!(error = %e, "config file could not be used, using defaults");
    }

    let command = match cli.command {
        Some(command) => command,
        None => choose_command()?,
    };
    tracing::info!(?command, data_dir = %data_dir.display(), "letterwiz starting");

    let mut app = build_app(command, &settings, &data_dir, cli.mute)?;

    let mut terminal = setup_terminal()?;
    let result = run_app(&mut terminal, &mut app);
    restore_terminal(&mut terminal)?;
    result?;

    print_farewell(&app);
    Ok(())
}

/// MARK:ログはデータディレクトリのファイルへ (画面は TUI が使うため)
fn init_logging(data_dir: &Path, verbose: bool) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(data_dir.join("letterwiz.log"))?;
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

/// サブコマンドが無いときはメニューで選ぶ
fn choose_command() -> Result<Command> {
    const CHOICES: [&str; 3] = [
        "Classroom  (teacher + student)",
        "Practice arena  (solo, final test)",
        "Simple  (tap / row)",
    ];
    let picked = Select::new()
        .with_prompt("モードを選んでください")
        .items(&CHOICES)
        .default(0)
        .interact()?;
    Ok(match picked {
        0 => Command::Classroom {
            client_id: None,
            reset_roles: false,
        },
        1 => Command::Arena { pairs: None },
        _ => Command::Simple,
    })
}

fn build_app(command: Command, settings: &Settings, data_dir: &Path, mute: bool) -> Result<App> {
    let rng = StdRng::from_os_rng();
    Ok(match command {
        Command::Classroom { client_id, reset_roles } => {
            let mut store = FileStore::open(data_dir)?;
            if reset_roles {
                RoleRegistry::reset(&mut store)?;
                tracing::info!("role registry cleared");
            }
            let client_id = client_id.unwrap_or_else(|| new_client_id(&mut rand::rng()));
            let channel = FileChannel::open(data_dir, CHANNEL_NAME, &client_id)?;
            let client = RoomClient::join(store, channel, client_id, settings, rng, Instant::now())?;
            App::Classroom(Box::new(client))
        }
        Command::Arena { .. } => App::Arena(Arena::new(settings, rng, Sound::detect(mute))),
        Command::Simple => App::Simple(SimpleGame::new(settings, rng)),
    })
}

fn setup_terminal() -> Result<Terminal<impl Backend>> {
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?; // 代替スクリーンを使用
    stdout().execute(Hide)?; // カーソルを非表示
    let backend = CrosstermBackend::new(stdout());
    Ok(Terminal::new(backend)?)
}

fn restore_terminal(terminal: &mut Terminal<impl Backend>) -> Result<()> {
    stdout().execute(Show)?; // カーソルを再表示
    stdout().execute(LeaveAlternateScreen)?; // 代替スクリーンを終了
    disable_raw_mode()?;
    terminal.flush()?;
    Ok(())
}

fn run_app(terminal: &mut Terminal<impl Backend>, app: &mut App) -> Result<()> {
    loop {
        app.tick(Instant::now());
        terminal.draw(|f| app.draw(f))?;

        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == event::KeyEventKind::Press {
                    if key.code == KeyCode::Esc {
                        break;
                    }
                    if let Some(input) = Input::from_key(key.code) {
                        app.handle(input, Instant::now());
                    }
                }
            }
        }
    }
    tracing::info!("letterwiz exiting");
    Ok(())
}

/// 終了後のリザルト表示
fn print_farewell(app: &App) {
    match app {
        App::Classroom(client) => {
            let state = client.state();
            println!(
                "{} as {} · correct {} / wrong {}",
                style("Classroom").cyan().bold(),
                client.role(),
                state.score.correct,
                state.score.wrong
            );
            println!("{}", style(format!("client id: {}", client.client_id())).dim());
        }
        App::Arena(arena) => match arena.summary() {
            Some(summary) => {
                println!(
                    "{} {} · correct {} / wrong {} · accuracy {:.1}%",
                    style("Arena").magenta().bold(),
                    summary.level.label(),
                    summary.score.correct,
                    summary.score.wrong,
                    summary.accuracy
                );
                if !summary.failed.is_empty() {
                    let failed: Vec<String> = summary.failed.iter().map(|l| l.to_string()).collect();
                    println!("{} {}", style("missed:").red(), failed.join(" "));
                }
            }
            None => println!("{}", style("Arena closed before the last round.").dim()),
        },
        App::Simple(game) => {
            let state = game.state();
            let label = if state.phase() == Phase::Complete { "complete" } else { "stopped" };
            println!(
                "{} {} · correct {} / wrong {}",
                style("Simple").green().bold(),
                label,
                state.score.correct,
                state.score.wrong
            );
        }
    }
}
