use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::{Action, ConfigError, Position, map::Grid};

/// Reward for reaching the goal.
pub const GOAL_REWARD: f64 = 10.0;
/// Reward for bumping into an obstacle.
pub const OBSTACLE_PENALTY: f64 = -1.0;
/// Reward for any other move, including moves clamped at the grid edge.
pub const STEP_PENALTY: f64 = -0.1;

/// Represents the static type of a cell in the maze.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CellType {
    #[default]
    Floor,
    Obstacle,
}

/// Static description of a maze: dimensions, start, goal and obstacles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MazeConfig {
    pub rows: usize,
    pub cols: usize,
    pub start: Position,
    pub goal: Position,
    pub obstacles: Vec<Position>,
}

impl Default for MazeConfig {
    /// The 10x10 maze with 21 obstacles, start in the top-left and goal in the bottom-right.
    fn default() -> Self {
        let obstacles = [
            (1, 3),
            (4, 7),
            (2, 5),
            (7, 1),
            (3, 9),
            (6, 2),
            (8, 4),
            (9, 6),
            (5, 8),
            (3, 1),
            (7, 7),
            (2, 8),
            (1, 4),
            (6, 3),
            (4, 5),
            (9, 2),
            (8, 7),
            (5, 1),
            (3, 6),
            (7, 9),
            (6, 9),
        ];
        MazeConfig {
            rows: 10,
            cols: 10,
            start: Position::new(0, 0),
            goal: Position::new(9, 9),
            obstacles: obstacles.into_iter().map(Position::from).collect(),
        }
    }
}

/// Result of applying one action to the world.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutcome {
    pub state: Position,
    pub reward: f64,
    pub terminal: bool,
}

/// Read-only view of the world for renderers and agents.
#[derive(Debug, Clone, Copy)]
pub struct WorldView<'a> {
    pub terrain: &'a Grid<CellType>,
    pub goal: Position,
    pub current: Position,
}

/// Deterministic grid maze with clamped movement, obstacle rejection and a terminal goal.
#[derive(Debug, Clone)]
pub struct GridWorld {
    terrain: Grid<CellType>,
    start: Position,
    goal: Position,
    current: Position,
}

impl GridWorld {
    /// Builds a world from `config`, rejecting layouts that could never finish an episode.
    pub fn new(config: MazeConfig) -> Result<Self, ConfigError> {
        let MazeConfig {
            rows,
            cols,
            start,
            goal,
            obstacles,
        } = config;

        let mut terrain = Grid::filled(rows, cols, CellType::Floor)?;
        let out_of_bounds = |what, position| ConfigError::OutOfBounds {
            what,
            position,
            rows,
            cols,
        };

        for obstacle in obstacles {
            match terrain.get_mut(obstacle) {
                Some(cell) => *cell = CellType::Obstacle,
                None => return Err(out_of_bounds("obstacle", obstacle)),
            }
        }
        for (what, position) in [("start", start), ("goal", goal)] {
            match terrain.get(position) {
                None => return Err(out_of_bounds(what, position)),
                Some(CellType::Obstacle) => {
                    return Err(ConfigError::OnObstacle { what, position });
                }
                Some(CellType::Floor) => {}
            }
        }

        if !is_reachable(&terrain, start, goal) {
            return Err(ConfigError::Unreachable { start, goal });
        }

        Ok(GridWorld {
            terrain,
            start,
            goal,
            current: start,
        })
    }

    /// Moves the agent back to the start and returns the start position.
    pub fn reset(&mut self) -> Position {
        self.current = self.start;
        self.current
    }

    /// Applies `action` to the current position.
    ///
    /// Obstacles are checked before the goal: a blocked move leaves the agent
    /// where it was, costs [`OBSTACLE_PENALTY`] and never ends the episode.
    pub fn step(&mut self, action: Action) -> StepOutcome {
        let candidate = self.clamped_move(self.current, action);

        let outcome = if self.is_obstacle(candidate) {
            StepOutcome {
                state: self.current,
                reward: OBSTACLE_PENALTY,
                terminal: false,
            }
        } else if candidate == self.goal {
            StepOutcome {
                state: candidate,
                reward: GOAL_REWARD,
                terminal: true,
            }
        } else {
            StepOutcome {
                state: candidate,
                reward: STEP_PENALTY,
                terminal: false,
            }
        };

        self.current = outcome.state;
        outcome
    }

    /// The fixed, ordered action set. Every action is legal from every cell.
    pub fn action_space(&self) -> &'static [Action; Action::COUNT] {
        &Action::ALL
    }

    /// Places the agent on an arbitrary open cell.
    pub fn set_current(&mut self, position: Position) -> Result<(), ConfigError> {
        match self.terrain.get(position) {
            None => Err(ConfigError::OutOfBounds {
                what: "position",
                position,
                rows: self.rows(),
                cols: self.cols(),
            }),
            Some(CellType::Obstacle) => Err(ConfigError::OnObstacle {
                what: "position",
                position,
            }),
            Some(CellType::Floor) => {
                self.current = position;
                Ok(())
            }
        }
    }

    fn clamped_move(&self, from: Position, action: Action) -> Position {
        let Position { row, col } = from;
        match action {
            Action::Up => Position::new(row.saturating_sub(1), col),
            Action::Down => Position::new((row + 1).min(self.rows() - 1), col),
            Action::Left => Position::new(row, col.saturating_sub(1)),
            Action::Right => Position::new(row, (col + 1).min(self.cols() - 1)),
        }
    }

    pub fn rows(&self) -> usize {
        self.terrain.rows()
    }
    pub fn cols(&self) -> usize {
        self.terrain.cols()
    }
    pub fn start(&self) -> Position {
        self.start
    }
    pub fn goal(&self) -> Position {
        self.goal
    }
    pub fn current(&self) -> Position {
        self.current
    }

    /// Returns true if `position` is an in-bounds obstacle.
    pub fn is_obstacle(&self, position: Position) -> bool {
        matches!(self.terrain.get(position), Some(CellType::Obstacle))
    }

    /// All obstacle positions in row-major order.
    pub fn obstacles(&self) -> impl Iterator<Item = Position> + '_ {
        self.terrain
            .enumerate()
            .filter_map(|(position, cell)| (*cell == CellType::Obstacle).then_some(position))
    }

    pub fn view(&self) -> WorldView<'_> {
        WorldView {
            terrain: &self.terrain,
            goal: self.goal,
            current: self.current,
        }
    }
}

/// Breadth-first search over open cells using the four moves.
fn is_reachable(terrain: &Grid<CellType>, start: Position, goal: Position) -> bool {
    let mut visited = terrain.filled_like(false);
    let mut frontier = VecDeque::from([start]);
    visited[start] = true;

    while let Some(current) = frontier.pop_front() {
        if current == goal {
            return true;
        }
        let Position { row, col } = current;
        let neighbors = [
            row.checked_sub(1).map(|r| Position::new(r, col)),
            Some(Position::new(row + 1, col)),
            col.checked_sub(1).map(|c| Position::new(row, c)),
            Some(Position::new(row, col + 1)),
        ];
        for neighbor in neighbors.into_iter().flatten() {
            if terrain.get(neighbor) == Some(&CellType::Floor) && !visited[neighbor] {
                visited[neighbor] = true;
                frontier.push_back(neighbor);
            }
        }
    }
    false
}

/// Loads a maze description from a string representation of a map.
///
/// Each line is one row of whitespace separated tokens:
/// `ST` start, `GO` goal, `WL` obstacle, `BL` open floor.
pub fn parse_maze(map_string: &str) -> Result<MazeConfig, ConfigError> {
    let lines: Vec<&str> = map_string
        .trim()
        .lines()
        .filter(|line| !line.trim().is_empty())
        .collect();
    if lines.is_empty() {
        return Err(ConfigError::MazeParse {
            line: 0,
            message: "map is empty".to_string(),
        });
    }

    let rows = lines.len();
    let mut cols = 0;
    let mut start = None;
    let mut goal = None;
    let mut obstacles = Vec::new();

    for (row, line) in lines.iter().enumerate() {
        let parse_error = |message: String| ConfigError::MazeParse {
            line: row + 1,
            message,
        };
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if row == 0 {
            cols = tokens.len();
        } else if tokens.len() != cols {
            return Err(parse_error(format!(
                "inconsistent width: expected {}, found {}",
                cols,
                tokens.len()
            )));
        }

        for (col, token) in tokens.into_iter().enumerate() {
            let position = Position::new(row, col);
            match token {
                "BL" => {}
                "WL" => obstacles.push(position),
                "ST" => {
                    if start.replace(position).is_some() {
                        return Err(parse_error("multiple start cells ('ST')".to_string()));
                    }
                }
                "GO" => {
                    if goal.replace(position).is_some() {
                        return Err(parse_error("multiple goal cells ('GO')".to_string()));
                    }
                }
                unknown => {
                    return Err(parse_error(format!(
                        "unknown map code '{}' at column {}",
                        unknown,
                        col + 1
                    )));
                }
            }
        }
    }

    let missing = |what: &str| ConfigError::MazeParse {
        line: rows,
        message: format!("no {} cell found in map", what),
    };
    Ok(MazeConfig {
        rows,
        cols,
        start: start.ok_or_else(|| missing("start ('ST')"))?,
        goal: goal.ok_or_else(|| missing("goal ('GO')"))?,
        obstacles,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_maze_is_valid() {
        let world = GridWorld::new(MazeConfig::default()).unwrap();
        assert_eq!(world.obstacles().count(), 21);
        assert_eq!(world.goal(), Position::new(9, 9));
    }

    #[test]
    fn clamped_move_stays_on_grid() {
        let world = GridWorld::new(MazeConfig {
            rows: 2,
            cols: 3,
            start: Position::new(0, 0),
            goal: Position::new(1, 2),
            obstacles: vec![],
        })
        .unwrap();
        assert_eq!(world.clamped_move(Position::new(1, 2), Action::Down), Position::new(1, 2));
        assert_eq!(world.clamped_move(Position::new(1, 2), Action::Right), Position::new(1, 2));
        assert_eq!(world.clamped_move(Position::new(0, 0), Action::Left), Position::new(0, 0));
        assert_eq!(world.clamped_move(Position::new(1, 1), Action::Up), Position::new(0, 1));
    }

    #[test]
    fn reachability_is_blocked_by_walls() {
        let mut terrain = Grid::filled(3, 3, CellType::Floor).unwrap();
        terrain[Position::new(0, 1)] = CellType::Obstacle;
        terrain[Position::new(1, 1)] = CellType::Obstacle;
        terrain[Position::new(2, 1)] = CellType::Obstacle;
        assert!(!is_reachable(&terrain, Position::new(0, 0), Position::new(0, 2)));
        assert!(is_reachable(&terrain, Position::new(0, 0), Position::new(2, 0)));
    }

    #[test]
    fn parse_reports_line_numbers() {
        let err = parse_maze("ST BL\nBL XX GO").unwrap_err();
        assert!(matches!(err, ConfigError::MazeParse { line: 2, .. }));
    }
}
