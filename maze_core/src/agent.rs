use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};

use crate::{
    Action, ConfigError, LearnerError, Position,
    environment::{GridWorld, StepOutcome, WorldView},
    map::Grid,
    persistence::{QTableEntry, QTableSnapshot},
};

/// Trait defining the behavior of an agent.
/// Agents decide which action to take based on a view of the world.
pub trait Agent {
    /// Determines the action the agent wants to perform from the current position.
    /// `&mut self` allows the agent to advance internal state such as its random source.
    fn get_action(&mut self, view: &WorldView<'_>) -> Result<Action, LearnerError>;
}

fn build_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_rng(&mut rand::rng()),
    }
}

/// An agent that picks every action uniformly at random.
#[derive(Debug, Clone)]
pub struct RandomWalker {
    rng: StdRng,
}

impl RandomWalker {
    pub fn new(seed: Option<u64>) -> Self {
        Self {
            rng: build_rng(seed),
        }
    }

    pub fn random_action(&mut self) -> Action {
        Action::ALL[self.rng.random_range(0..Action::COUNT)]
    }
}

impl Agent for RandomWalker {
    fn get_action(&mut self, _view: &WorldView<'_>) -> Result<Action, LearnerError> {
        Ok(self.random_action())
    }
}

/// Hyperparameters of the tabular learner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LearnerConfig {
    /// Learning rate α, in (0, 1].
    pub alpha: f64,
    /// Discount factor γ, in [0, 1].
    pub gamma: f64,
    /// Exploration probability ε, in [0, 1].
    pub epsilon: f64,
    /// Seed for action selection. `None` draws one from the thread RNG.
    pub seed: Option<u64>,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            alpha: 0.1,
            gamma: 0.9,
            epsilon: 0.1,
            seed: None,
        }
    }
}

impl LearnerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("alpha", self.alpha, self.alpha > 0.0 && self.alpha <= 1.0, "(0, 1]"),
            ("gamma", self.gamma, (0.0..=1.0).contains(&self.gamma), "[0, 1]"),
            ("epsilon", self.epsilon, (0.0..=1.0).contains(&self.epsilon), "[0, 1]"),
        ];
        for (name, value, ok, expected) in checks {
            if !ok {
                return Err(ConfigError::InvalidParameter {
                    name,
                    value,
                    expected,
                });
            }
        }
        Ok(())
    }
}

/// One observed step: `(state, action, reward, next_state, terminal)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transition {
    pub state: Position,
    pub action: Action,
    pub reward: f64,
    pub next_state: Position,
    pub terminal: bool,
}

impl Transition {
    /// Pairs the pre-step state and chosen action with what the world returned.
    pub fn from_step(state: Position, action: Action, outcome: StepOutcome) -> Self {
        Self {
            state,
            action,
            reward: outcome.reward,
            next_state: outcome.state,
            terminal: outcome.terminal,
        }
    }
}

/// Tabular Q-learning agent with ε-greedy action selection.
///
/// The value table holds one entry per (cell, action) for the whole grid and is
/// fully populated with `0.0` at construction.
#[derive(Debug, Clone)]
pub struct QLearner {
    table: Grid<[f64; Action::COUNT]>,
    alpha: f64,
    gamma: f64,
    epsilon: f64,
    rng: StdRng,
}

impl QLearner {
    pub fn new(rows: usize, cols: usize, config: LearnerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let table = Grid::filled(rows, cols, [0.0; Action::COUNT])?;
        Ok(Self {
            table,
            alpha: config.alpha,
            gamma: config.gamma,
            epsilon: config.epsilon,
            rng: build_rng(config.seed),
        })
    }

    /// Creates a learner sized to `world`.
    pub fn for_world(world: &GridWorld, config: LearnerConfig) -> Result<Self, ConfigError> {
        Self::new(world.rows(), world.cols(), config)
    }

    pub fn rows(&self) -> usize {
        self.table.rows()
    }
    pub fn cols(&self) -> usize {
        self.table.cols()
    }
    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Returns the value estimates for `state`, indexed by [`Action::index`].
    pub fn action_values(&self, state: Position) -> Result<&[f64; Action::COUNT], LearnerError> {
        self.table
            .get(state)
            .ok_or(LearnerError::StateOutOfBounds {
                position: state,
                rows: self.rows(),
                cols: self.cols(),
            })
    }

    pub fn q_value(&self, state: Position, action: Action) -> Result<f64, LearnerError> {
        Ok(self.action_values(state)?[action.index()])
    }

    /// Highest value estimate over all actions at `state`.
    pub fn max_value(&self, state: Position) -> Result<f64, LearnerError> {
        let values = self.action_values(state)?;
        Ok(values.iter().copied().fold(f64::NEG_INFINITY, f64::max))
    }

    /// Greedy action at `state`.
    ///
    /// Ties go to the earliest action in [`Action::ALL`] order, so an untrained
    /// cell always yields [`Action::Up`].
    pub fn greedy_action(&self, state: Position) -> Result<Action, LearnerError> {
        let values = self.action_values(state)?;
        let mut best = Action::ALL[0];
        for action in Action::ALL.into_iter().skip(1) {
            if values[action.index()] > values[best.index()] {
                best = action;
            }
        }
        Ok(best)
    }

    /// ε-greedy selection: a uniformly random action with probability ε,
    /// otherwise [`greedy_action`](Self::greedy_action).
    pub fn choose_action(&mut self, state: Position) -> Result<Action, LearnerError> {
        // Validate before consuming randomness so bad input never explores.
        self.action_values(state)?;
        if self.rng.random::<f64>() < self.epsilon {
            Ok(Action::ALL[self.rng.random_range(0..Action::COUNT)])
        } else {
            self.greedy_action(state)
        }
    }

    /// Temporal-difference update:
    ///
    /// Q(s,a) ← Q(s,a) + α[target − Q(s,a)], where target is `r` for terminal
    /// transitions and `r + γ max_a' Q(s',a')` otherwise.
    pub fn update(&mut self, transition: &Transition) -> Result<(), LearnerError> {
        let next_max = self.max_value(transition.next_state)?;
        let target = if transition.terminal {
            transition.reward
        } else {
            transition.reward + self.gamma * next_max
        };

        let (rows, cols) = (self.rows(), self.cols());
        let values = self
            .table
            .get_mut(transition.state)
            .ok_or(LearnerError::StateOutOfBounds {
                position: transition.state,
                rows,
                cols,
            })?;
        let current = &mut values[transition.action.index()];
        *current += self.alpha * (target - *current);
        Ok(())
    }

    /// Number of (state, action) estimates that have moved away from zero.
    pub fn nonzero_entries(&self) -> usize {
        self.table
            .iter()
            .flat_map(|values| values.iter())
            .filter(|value| **value != 0.0)
            .count()
    }

    /// Exports the whole value table.
    pub fn snapshot(&self) -> QTableSnapshot {
        let entries = self
            .table
            .enumerate()
            .map(|(position, values)| QTableEntry {
                position,
                values: Action::ALL
                    .iter()
                    .map(|action| (action.name().to_string(), values[action.index()]))
                    .collect(),
            })
            .collect();
        QTableSnapshot {
            rows: self.rows(),
            cols: self.cols(),
            entries,
        }
    }

    /// Replaces the value table with `snapshot`.
    ///
    /// The snapshot must match this learner's shape and list every cell exactly
    /// once with a finite value for every action. On error the current table is
    /// left untouched.
    pub fn restore(&mut self, snapshot: &QTableSnapshot) -> Result<(), LearnerError> {
        let (rows, cols) = (self.rows(), self.cols());
        if snapshot.rows != rows || snapshot.cols != cols {
            return Err(LearnerError::ShapeMismatch {
                rows,
                cols,
                found_rows: snapshot.rows,
                found_cols: snapshot.cols,
            });
        }

        let mut table = self.table.filled_like([0.0; Action::COUNT]);
        let mut seen = self.table.filled_like(false);

        for entry in &snapshot.entries {
            let position = entry.position;
            match seen.get_mut(position) {
                None => {
                    return Err(LearnerError::StateOutOfBounds {
                        position,
                        rows,
                        cols,
                    });
                }
                Some(true) => return Err(LearnerError::DuplicateEntry { position }),
                Some(flag) => *flag = true,
            }

            for name in entry.values.keys() {
                name.parse::<Action>()?;
            }
            for action in Action::ALL {
                let value = *entry
                    .values
                    .get(action.name())
                    .ok_or(LearnerError::IncompleteTable { position, action })?;
                if !value.is_finite() {
                    return Err(LearnerError::NonFiniteValue {
                        position,
                        action,
                        value,
                    });
                }
                table[position][action.index()] = value;
            }
        }

        if let Some((position, _)) = seen.enumerate().find(|(_, seen)| !**seen) {
            return Err(LearnerError::MissingEntry { position });
        }

        self.table = table;
        Ok(())
    }
}

impl Agent for QLearner {
    fn get_action(&mut self, view: &WorldView<'_>) -> Result<Action, LearnerError> {
        self.choose_action(view.current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn learner(epsilon: f64) -> QLearner {
        QLearner::new(
            3,
            3,
            LearnerConfig {
                epsilon,
                seed: Some(7),
                ..LearnerConfig::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn rejects_out_of_range_parameters() {
        let defaults = LearnerConfig::default();
        for config in [
            LearnerConfig {
                alpha: 0.0,
                ..defaults
            },
            LearnerConfig {
                alpha: 1.5,
                ..defaults
            },
            LearnerConfig {
                gamma: -0.1,
                ..defaults
            },
            LearnerConfig {
                epsilon: 1.1,
                ..defaults
            },
            LearnerConfig {
                epsilon: f64::NAN,
                ..defaults
            },
        ] {
            let err = QLearner::new(2, 2, config).unwrap_err();
            assert!(matches!(err, ConfigError::InvalidParameter { .. }), "{err}");
        }
    }

    #[test]
    fn rejects_empty_grid() {
        let err = QLearner::new(0, 4, LearnerConfig::default()).unwrap_err();
        assert_eq!(err, ConfigError::EmptyGrid { rows: 0, cols: 4 });
    }

    #[test]
    fn rejects_grid_too_large_to_allocate() {
        let err = QLearner::new(usize::MAX, 2, LearnerConfig::default()).unwrap_err();
        assert_eq!(
            err,
            ConfigError::GridTooLarge {
                rows: usize::MAX,
                cols: 2,
            }
        );

        // The cell count fits in a usize but the values do not.
        let err = QLearner::new(usize::MAX / 2, 2, LearnerConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::GridTooLarge { .. }), "{err}");
    }

    #[test]
    fn greedy_prefers_first_of_tied_maxima() {
        let mut q = learner(0.0);
        let state = Position::new(1, 1);
        q.table[state] = [0.5, 2.0, 0.0, 2.0];
        assert_eq!(q.greedy_action(state).unwrap(), Action::Down);

        q.table[state] = [-1.0, -1.0, -0.5, -0.5];
        assert_eq!(q.greedy_action(state).unwrap(), Action::Left);
    }

    #[test]
    fn zero_epsilon_never_explores() {
        let mut q = learner(0.0);
        let state = Position::new(0, 2);
        q.table[state] = [0.0, 0.0, 0.0, 1.0];
        for _ in 0..200 {
            assert_eq!(q.choose_action(state).unwrap(), Action::Right);
        }
    }

    #[test]
    fn full_epsilon_covers_every_action() {
        let mut q = learner(1.0);
        let mut seen = [false; Action::COUNT];
        for _ in 0..400 {
            seen[q.choose_action(Position::new(0, 0)).unwrap().index()] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }

    #[test]
    fn terminal_update_ignores_next_state() {
        let mut q = learner(0.0);
        q.table[Position::new(2, 2)] = [100.0; Action::COUNT];
        let transition = Transition {
            state: Position::new(2, 1),
            action: Action::Right,
            reward: 10.0,
            next_state: Position::new(2, 2),
            terminal: true,
        };
        q.update(&transition).unwrap();
        let value = q.q_value(Position::new(2, 1), Action::Right).unwrap();
        assert!((value - 1.0).abs() < 1e-12);
    }

    #[test]
    fn update_bootstraps_from_best_next_value() {
        let mut q = learner(0.0);
        q.table[Position::new(0, 1)] = [1.0, 2.0, -3.0, 0.5];
        let transition = Transition {
            state: Position::new(0, 0),
            action: Action::Right,
            reward: -0.1,
            next_state: Position::new(0, 1),
            terminal: false,
        };
        q.update(&transition).unwrap();
        // 0.1 * (-0.1 + 0.9 * 2.0)
        let value = q.q_value(Position::new(0, 0), Action::Right).unwrap();
        assert!((value - 0.17).abs() < 1e-12);
    }

    #[test]
    fn out_of_bounds_state_is_rejected_without_side_effects() {
        let mut q = learner(0.5);
        let outside = Position::new(3, 0);
        assert!(matches!(
            q.choose_action(outside),
            Err(LearnerError::StateOutOfBounds { .. })
        ));
        let transition = Transition {
            state: outside,
            action: Action::Up,
            reward: 1.0,
            next_state: Position::new(0, 0),
            terminal: false,
        };
        assert!(q.update(&transition).is_err());
        assert_eq!(q.nonzero_entries(), 0);
    }
}
