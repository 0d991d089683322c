use maze_core::{
    Position,
    agent::{LearnerConfig, QLearner},
    environment::{GridWorld, MazeConfig},
    training::{Trainer, TrainingConfig, greedy_path},
};

fn small_maze() -> GridWorld {
    GridWorld::new(MazeConfig {
        rows: 5,
        cols: 5,
        start: Position::new(0, 0),
        goal: Position::new(4, 4),
        obstacles: vec![Position::new(2, 2), Position::new(3, 3)],
    })
    .unwrap()
}

fn learner_for(world: &GridWorld, seed: u64) -> QLearner {
    QLearner::for_world(
        world,
        LearnerConfig {
            seed: Some(seed),
            ..LearnerConfig::default()
        },
    )
    .unwrap()
}

fn trainer(episodes: usize) -> Trainer {
    Trainer::new(TrainingConfig {
        episodes,
        log_every: 0,
        step_limit: None,
    })
}

#[test]
fn test_every_episode_reaches_goal() {
    let mut world = small_maze();
    let mut learner = learner_for(&world, 11);
    let report = trainer(50).run(&mut world, &mut learner).unwrap();

    assert_eq!(report.len(), 50);
    assert_eq!(report.goal_rate(), 1.0);
    for (i, stats) in report.episodes().iter().enumerate() {
        assert_eq!(stats.episode, i);
        assert!(stats.steps >= 8, "shortest path needs 8 moves");
    }
}

#[test]
fn test_q_learning_convergence() {
    let mut world = small_maze();
    let mut learner = learner_for(&world, 2024);
    let fresh_nonzero = learner.nonzero_entries();

    let report = trainer(1000).run(&mut world, &mut learner).unwrap();

    assert!(learner.nonzero_entries() > fresh_nonzero);
    assert!(learner.nonzero_entries() > 10);

    let early = report.mean_steps(0..100).unwrap();
    let late = report.mean_steps(900..1000).unwrap();
    assert!(late < early, "episodes should shorten: {early} -> {late}");

    let early_reward = report.mean_reward(0..100).unwrap();
    let late_reward = report.mean_reward(900..1000).unwrap();
    assert!(late_reward > early_reward);
}

#[test]
fn test_greedy_path_shortens_across_checkpoints() {
    let mut world = small_maze();
    let mut learner = learner_for(&world, 7);
    let trainer = trainer(250);
    let limit = 100;
    let greedy_length = |world: &GridWorld, learner: &QLearner| {
        greedy_path(world, learner, limit)
            .unwrap()
            .map_or(limit + 1, |path| path.len() - 1)
    };

    // An untrained table keeps choosing Up from the start.
    let mut lengths = vec![greedy_length(&world, &learner)];
    for _ in 0..4 {
        trainer.run(&mut world, &mut learner).unwrap();
        lengths.push(greedy_length(&world, &learner));
    }

    let last = *lengths.last().unwrap();
    assert_eq!(lengths[0], limit + 1);
    assert!(last <= limit, "greedy policy should reach the goal: {lengths:?}");
    assert!(last >= 8, "no path is shorter than 8 moves: {lengths:?}");
}

#[test]
fn test_greedy_path_starts_at_start_and_ends_at_goal() {
    let mut world = small_maze();
    let mut learner = learner_for(&world, 5);
    trainer(1000).run(&mut world, &mut learner).unwrap();

    let path = greedy_path(&world, &learner, 100).unwrap().expect("goal reached");
    assert_eq!(path.first(), Some(&world.start()));
    assert_eq!(path.last(), Some(&world.goal()));
    assert!(path.iter().all(|p| !world.is_obstacle(*p)));
}

#[test]
fn test_training_on_default_maze() {
    let mut world = GridWorld::new(MazeConfig::default()).unwrap();
    let mut learner = learner_for(&world, 1);
    let report = trainer(200).run(&mut world, &mut learner).unwrap();
    assert_eq!(report.goal_rate(), 1.0);
    let above = learner.max_value(Position::new(8, 9)).unwrap();
    let left = learner.max_value(Position::new(9, 8)).unwrap();
    assert!(above.max(left) > 0.0, "goal reward should reach its neighbours");
}
