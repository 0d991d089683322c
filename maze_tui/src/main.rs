use anyhow::{Context, Result};
use clap::Parser;
use maze_core::{
    Action, LearnerError,
    agent::{Agent, LearnerConfig, QLearner, RandomWalker},
    environment::{CellType, GridWorld, MazeConfig, StepOutcome, WorldView, parse_maze},
    persistence::{DEFAULT_TABLE_PATH, QTableStore},
    training::{Trainer, TrainingConfig},
};
use ratatui::{
    crossterm::{
        self,
        event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
        execute,
        terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
    },
    prelude::*,
    widgets::*,
};
use std::{
    io::{self, Stdout},
    path::{Path, PathBuf},
    time::{Duration, Instant},
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Ticks to hold the agent on the goal before starting over.
const GOAL_PAUSE_TICKS: u32 = 5;

#[derive(Parser, Debug)]
#[command(version, about = "Q-learning maze agent", long_about = None)]
struct Args {
    /// Maze file to load; the built-in 10x10 maze is used when omitted
    #[arg(short, long, value_name = "MAZE_FILE")]
    maze: Option<PathBuf>,

    /// Train the agent before running
    #[arg(long)]
    train: bool,

    /// Number of training episodes
    #[arg(long, default_value_t = 500)]
    episodes: usize,

    /// Learning rate
    #[arg(long, default_value_t = 0.1)]
    alpha: f64,

    /// Discount factor
    #[arg(long, default_value_t = 0.9)]
    gamma: f64,

    /// Exploration probability
    #[arg(long, default_value_t = 0.1)]
    epsilon: f64,

    /// Seed for reproducible action selection
    #[arg(long)]
    seed: Option<u64>,

    /// Where the value table is loaded from and saved to
    #[arg(long, value_name = "PATH", default_value = DEFAULT_TABLE_PATH)]
    q_table: PathBuf,

    /// Milliseconds between simulation steps
    #[arg(long, default_value_t = 200)]
    tick_ms: u64,

    /// Exit after training instead of opening the viewer
    #[arg(long)]
    headless: bool,
}

/// Who picks the next move in the viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Agent,
    Manual,
}

impl Mode {
    fn toggled(self) -> Self {
        match self {
            Mode::Agent => Mode::Manual,
            Mode::Manual => Mode::Agent,
        }
    }
}

struct App<'a> {
    /// The maze being displayed.
    world: GridWorld,
    /// The learner shared with the training run.
    learner: &'a mut QLearner,
    /// Supplies moves in manual mode when no key was pressed.
    fallback: RandomWalker,
    mode: Mode,
    /// Arrow key pressed since the last tick.
    pending_input: Option<Action>,
    last_step: Option<(Action, StepOutcome)>,
    episode_reward: f64,
    episodes_completed: usize,
    /// Remaining ticks to hold on the goal before resetting.
    goal_pause: u32,
    should_quit: bool,
}

impl<'a> App<'a> {
    fn new(world: GridWorld, learner: &'a mut QLearner, seed: Option<u64>) -> Self {
        App {
            world,
            learner,
            fallback: RandomWalker::new(seed),
            mode: Mode::Agent,
            pending_input: None,
            last_step: None,
            episode_reward: 0.0,
            episodes_completed: 0,
            goal_pause: 0,
            should_quit: false,
        }
    }

    /// Handles one step of the simulation.
    fn tick(&mut self) -> Result<(), LearnerError> {
        if self.goal_pause > 0 {
            self.goal_pause -= 1;
            if self.goal_pause == 0 {
                self.reset();
            }
            return Ok(());
        }

        let view = self.world.view();
        let action = match self.mode {
            Mode::Agent => self.learner.get_action(&view)?,
            Mode::Manual => match self.pending_input.take() {
                Some(action) => action,
                None => self.fallback.get_action(&view)?,
            },
        };

        let outcome = self.world.step(action);
        self.episode_reward += outcome.reward;
        self.last_step = Some((action, outcome));
        if outcome.terminal {
            self.episodes_completed += 1;
            self.goal_pause = GOAL_PAUSE_TICKS;
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.world.reset();
        self.episode_reward = 0.0;
        self.last_step = None;
        self.goal_pause = 0;
    }

    fn toggle_mode(&mut self) {
        self.mode = self.mode.toggled();
        self.pending_input = None;
    }

    /// Sets the quit flag.
    fn quit(&mut self) {
        self.should_quit = true;
    }
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();
    init_logging();

    let maze = match &args.maze {
        Some(path) => load_maze(path)?,
        None => MazeConfig::default(),
    };
    let mut world = GridWorld::new(maze).context("Invalid maze configuration")?;
    let mut learner = QLearner::for_world(
        &world,
        LearnerConfig {
            alpha: args.alpha,
            gamma: args.gamma,
            epsilon: args.epsilon,
            seed: args.seed,
        },
    )
    .context("Invalid learner configuration")?;

    // A missing or unusable table is reported by the store and is not fatal.
    let store = QTableStore::new(&args.q_table);
    store.load_into(&mut learner);

    if args.train {
        let trainer = Trainer::new(TrainingConfig {
            episodes: args.episodes,
            ..TrainingConfig::default()
        });
        let report = trainer.run(&mut world, &mut learner)?;
        let tail = report.len().saturating_sub(50)..report.len();
        if let Some(mean) = report.mean_reward(tail.clone()) {
            info!("Mean reward over the last {} episodes: {:.2}", tail.len(), mean);
        }
        store.save(&learner).context("Failed to save value table")?;
    }

    if args.headless {
        return Ok(());
    }

    // Set up the terminal
    let mut terminal = setup_terminal()?;

    world.reset();
    let mut app = App::new(world, &mut learner, args.seed);
    let tick_rate = Duration::from_millis(args.tick_ms.max(1));

    // Run the main application loop
    let result = run_app(&mut terminal, &mut app, tick_rate);

    // Restore the terminal state before reporting any error
    restore_terminal(&mut terminal)?;

    result
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn load_maze(path: &Path) -> Result<MazeConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read maze file {}", path.display()))?;
    parse_maze(&text).with_context(|| format!("Failed to parse maze file {}", path.display()))
}

/// Configures the terminal for TUI interaction.
fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
    let mut stdout = io::stdout();
    enable_raw_mode()?;
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    Terminal::new(backend).map_err(Into::into)
}

/// Restores the terminal to its original state.
fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    Ok(())
}

/// Runs the main loop of the TUI application.
fn run_app(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    app: &mut App<'_>,
    tick_rate: Duration,
) -> Result<()> {
    let mut last_tick = Instant::now();

    loop {
        terminal.draw(|f| ui(f, app))?;

        let timeout = tick_rate
            .checked_sub(last_tick.elapsed())
            .unwrap_or_else(|| Duration::from_secs(0));

        if crossterm::event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => app.quit(),
                        KeyCode::Char('t') => app.toggle_mode(),
                        KeyCode::Char('r') => app.reset(),
                        KeyCode::Up => app.pending_input = Some(Action::Up),
                        KeyCode::Down => app.pending_input = Some(Action::Down),
                        KeyCode::Left => app.pending_input = Some(Action::Left),
                        KeyCode::Right => app.pending_input = Some(Action::Right),
                        _ => {}
                    }
                }
            }
        }

        if last_tick.elapsed() >= tick_rate {
            app.tick()?;
            last_tick = Instant::now();
        }

        if app.should_quit {
            break;
        }
    }
    Ok(())
}

/// Renders the user interface.
fn ui(frame: &mut Frame, app: &App<'_>) {
    let main_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage(65), // Area for the maze
            Constraint::Percentage(25), // Area for status
            Constraint::Percentage(10), // Area for help
        ])
        .split(frame.area());

    render_map(frame, main_layout[0], &app.world.view());
    render_status(frame, main_layout[1], app);

    let help_text = Paragraph::new(
        "Arrows: move (manual)  't': toggle agent/manual  'r': reset  'q'/'Esc': quit",
    )
    .alignment(Alignment::Center)
    .block(Block::default().borders(Borders::TOP));
    frame.render_widget(help_text, main_layout[2]);
}

/// Renders the maze with the agent's position.
fn render_map(frame: &mut Frame, area: Rect, view: &WorldView<'_>) {
    let terrain = view.terrain;
    let mut lines: Vec<Line> = Vec::with_capacity(terrain.rows());

    for row in 0..terrain.rows() {
        let mut spans: Vec<Span> = Vec::with_capacity(terrain.cols());
        for col in 0..terrain.cols() {
            let position = maze_core::Position::new(row, col);
            let span = if position == view.current {
                Span::styled("@ ", Style::default().fg(Color::Blue).bold())
            } else if position == view.goal {
                Span::styled("G ", Style::default().fg(Color::Green).bold())
            } else {
                match terrain[position] {
                    CellType::Obstacle => Span::styled("# ", Style::default().fg(Color::Red)),
                    CellType::Floor => Span::styled(". ", Style::default().fg(Color::DarkGray)),
                }
            };
            spans.push(span);
        }
        lines.push(Line::from(spans));
    }

    let map_paragraph = Paragraph::new(lines)
        .block(Block::default().title("Q-Learning Maze").borders(Borders::ALL))
        .alignment(Alignment::Center);

    frame.render_widget(map_paragraph, area);
}

/// Renders mode, position, rewards and the value estimates of the current cell.
fn render_status(frame: &mut Frame, area: Rect, app: &App<'_>) {
    let current = app.world.current();
    let mode = match app.mode {
        Mode::Agent => Span::styled("agent", Style::default().fg(Color::Cyan)),
        Mode::Manual => Span::styled("manual", Style::default().fg(Color::Yellow)),
    };
    let last_step = match app.last_step {
        Some((action, outcome)) => format!("{} -> {:+.1}", action, outcome.reward),
        None => "-".to_string(),
    };
    let values = match app.learner.action_values(current) {
        Ok(values) => Action::ALL
            .iter()
            .map(|action| format!("{}: {:.2}", action, values[action.index()]))
            .collect::<Vec<_>>()
            .join("  "),
        Err(e) => e.to_string(),
    };

    let items = vec![
        ListItem::new(Line::from(vec![Span::raw("Mode: "), mode])),
        ListItem::new(format!("Position: {}  Last move: {}", current, last_step)),
        ListItem::new(format!(
            "Episode reward: {:.2}  Goals reached: {}",
            app.episode_reward, app.episodes_completed
        )),
        ListItem::new(format!("Q-values: {}", values)),
    ];

    let status_widget =
        List::new(items).block(Block::default().borders(Borders::ALL).title("Status"));
    frame.render_widget(status_widget, area);
}
