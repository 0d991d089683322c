//! Episode driver for the learner and the maze.

use std::ops::Range;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    LearnerError, Position,
    agent::{QLearner, Transition},
    environment::GridWorld,
};

/// Settings for a training run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Number of episodes to run.
    pub episodes: usize,
    /// Report progress every this many episodes. `0` disables reports.
    pub log_every: usize,
    /// Cut an episode off after this many steps. `None` runs until the goal.
    pub step_limit: Option<usize>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            episodes: 500,
            log_every: 50,
            step_limit: None,
        }
    }
}

/// Summary of a single episode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpisodeStats {
    pub episode: usize,
    pub total_reward: f64,
    pub steps: usize,
    pub reached_goal: bool,
}

/// Per-episode statistics collected during a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    episodes: Vec<EpisodeStats>,
}

impl TrainingReport {
    pub fn episodes(&self) -> &[EpisodeStats] {
        &self.episodes
    }

    pub fn len(&self) -> usize {
        self.episodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.episodes.is_empty()
    }

    /// Mean cumulative reward over the episodes in `range`, or `None` if the range is empty.
    pub fn mean_reward(&self, range: Range<usize>) -> Option<f64> {
        self.mean_of(range, |stats| stats.total_reward)
    }

    /// Mean episode length over the episodes in `range`, or `None` if the range is empty.
    pub fn mean_steps(&self, range: Range<usize>) -> Option<f64> {
        self.mean_of(range, |stats| stats.steps as f64)
    }

    /// Fraction of episodes that ended at the goal.
    pub fn goal_rate(&self) -> f64 {
        if self.episodes.is_empty() {
            return 0.0;
        }
        let reached = self.episodes.iter().filter(|s| s.reached_goal).count();
        reached as f64 / self.episodes.len() as f64
    }

    fn mean_of(&self, range: Range<usize>, f: impl Fn(&EpisodeStats) -> f64) -> Option<f64> {
        let window = self.episodes.get(range)?;
        if window.is_empty() {
            return None;
        }
        Some(window.iter().map(f).sum::<f64>() / window.len() as f64)
    }
}

/// Runs episodes of the learner against the world.
#[derive(Debug, Clone, Default)]
pub struct Trainer {
    config: TrainingConfig,
}

impl Trainer {
    pub fn new(config: TrainingConfig) -> Self {
        Self { config }
    }

    /// Runs the configured number of episodes, updating `learner` after every step.
    pub fn run(
        &self,
        world: &mut GridWorld,
        learner: &mut QLearner,
    ) -> Result<TrainingReport, LearnerError> {
        check_shape(world, learner)?;
        let total = self.config.episodes;
        info!(episodes = total, "training agent");

        let mut report = TrainingReport {
            episodes: Vec::with_capacity(total),
        };
        for episode in 0..total {
            let mut stats = self.run_episode(world, learner)?;
            stats.episode = episode;

            if self.config.log_every > 0 && episode % self.config.log_every == 0 {
                info!(
                    "Episode {}/{}, Total Reward: {:.2}",
                    episode, total, stats.total_reward
                );
            }
            report.episodes.push(stats);
        }

        info!(
            goal_rate = report.goal_rate(),
            nonzero_entries = learner.nonzero_entries(),
            "training complete"
        );
        Ok(report)
    }

    /// Runs one episode from the start cell until the goal or the step limit.
    pub fn run_episode(
        &self,
        world: &mut GridWorld,
        learner: &mut QLearner,
    ) -> Result<EpisodeStats, LearnerError> {
        check_shape(world, learner)?;
        let mut state = world.reset();
        let mut stats = EpisodeStats {
            episode: 0,
            total_reward: 0.0,
            steps: 0,
            reached_goal: false,
        };

        while self.config.step_limit.is_none_or(|limit| stats.steps < limit) {
            let action = learner.choose_action(state)?;
            let outcome = world.step(action);
            learner.update(&Transition::from_step(state, action, outcome))?;

            state = outcome.state;
            stats.steps += 1;
            stats.total_reward += outcome.reward;
            if outcome.terminal {
                stats.reached_goal = true;
                break;
            }
        }

        debug!(
            steps = stats.steps,
            total_reward = stats.total_reward,
            reached_goal = stats.reached_goal,
            "episode finished"
        );
        Ok(stats)
    }
}

/// The learner's table must cover exactly the world's cells.
fn check_shape(world: &GridWorld, learner: &QLearner) -> Result<(), LearnerError> {
    if (learner.rows(), learner.cols()) != (world.rows(), world.cols()) {
        return Err(LearnerError::ShapeMismatch {
            rows: world.rows(),
            cols: world.cols(),
            found_rows: learner.rows(),
            found_cols: learner.cols(),
        });
    }
    Ok(())
}

/// Follows the greedy policy from the start cell on a copy of `world`.
///
/// Returns the visited cells, start and goal included, if the goal is reached
/// within `max_steps` moves.
pub fn greedy_path(
    world: &GridWorld,
    learner: &QLearner,
    max_steps: usize,
) -> Result<Option<Vec<Position>>, LearnerError> {
    check_shape(world, learner)?;
    let mut world = world.clone();
    let mut path = vec![world.reset()];

    for _ in 0..max_steps {
        let action = learner.greedy_action(world.current())?;
        let outcome = world.step(action);
        path.push(outcome.state);
        if outcome.terminal {
            return Ok(Some(path));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{agent::LearnerConfig, environment::MazeConfig};

    fn corridor() -> GridWorld {
        GridWorld::new(MazeConfig {
            rows: 1,
            cols: 4,
            start: Position::new(0, 0),
            goal: Position::new(0, 3),
            obstacles: vec![],
        })
        .unwrap()
    }

    #[test]
    fn step_limit_cuts_episode_short() {
        let mut world = corridor();
        // Untrained greedy choices bump into the edges before heading right.
        let mut learner = QLearner::for_world(
            &world,
            LearnerConfig {
                epsilon: 0.0,
                seed: Some(1),
                ..LearnerConfig::default()
            },
        )
        .unwrap();
        let trainer = Trainer::new(TrainingConfig {
            episodes: 1,
            log_every: 0,
            step_limit: Some(5),
        });

        let stats = trainer.run_episode(&mut world, &mut learner).unwrap();
        assert_eq!(stats.steps, 5);
        assert!(!stats.reached_goal);
        assert!((stats.total_reward - 5.0 * -0.1).abs() < 1e-9);
    }

    #[test]
    fn report_means_cover_requested_window() {
        let report = TrainingReport {
            episodes: (0..4)
                .map(|episode| EpisodeStats {
                    episode,
                    total_reward: episode as f64,
                    steps: 10 - episode,
                    reached_goal: episode % 2 == 0,
                })
                .collect(),
        };
        assert_eq!(report.mean_reward(0..2), Some(0.5));
        assert_eq!(report.mean_steps(2..4), Some(7.5));
        assert_eq!(report.mean_reward(3..3), None);
        assert_eq!(report.mean_reward(2..9), None);
        assert_eq!(report.goal_rate(), 0.5);
    }

    #[test]
    fn learner_shape_must_match_world() {
        let mut world = corridor();
        let trainer = Trainer::default();
        for (rows, cols) in [(1, 3), (2, 4)] {
            let mut learner = QLearner::new(rows, cols, LearnerConfig::default()).unwrap();
            let expected = LearnerError::ShapeMismatch {
                rows: 1,
                cols: 4,
                found_rows: rows,
                found_cols: cols,
            };
            assert_eq!(trainer.run(&mut world, &mut learner).unwrap_err(), expected);
            assert_eq!(trainer.run_episode(&mut world, &mut learner).unwrap_err(), expected);
            assert_eq!(greedy_path(&world, &learner, 5).unwrap_err(), expected);
            assert_eq!(learner.nonzero_entries(), 0);
        }
    }

    #[test]
    fn greedy_path_gives_up_after_max_steps() {
        let world = corridor();
        let learner = QLearner::for_world(&world, LearnerConfig::default()).unwrap();
        assert_eq!(greedy_path(&world, &learner, 10).unwrap(), None);
    }
}
