use std::{
  collections::BTreeMap,
  fs::{self, File},
  io::{self, BufWriter, Write},
  path::PathBuf,
};

use anyhow::{Context, Result};
use clap::Parser;
use gridnav::{AgentId, Coordinator, PlannerConfig, StepReport};
use lib::{
  grid::{Action, CellCode, Grid},
  utils::Cell2D,
};
use mcts::tree::render;
use text_io::{read, try_read};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(version, about = "Decentralised POMCP navigation on a partially observed grid")]
struct Args {
  /// Grid file: one row per line, 0 free, 1 obstacle, 2 agent start, 3 goal
  map: PathBuf,

  /// Planner configuration as JSON, missing fields take their defaults
  #[arg(long, short = 'c')]
  config: Option<PathBuf>,

  #[arg(long)]
  simulations: Option<u32>,

  #[arg(long)]
  horizon: Option<u32>,

  #[arg(long)]
  discount: Option<f32>,

  #[arg(long)]
  seed: Option<u64>,

  /// Plan every agent on its own thread
  #[arg(long)]
  parallel: bool,

  /// Observe the start neighbourhood before planning the first step
  #[arg(long)]
  sense_on_start: bool,

  #[arg(long, default_value_t = 500)]
  max_steps: usize,

  /// Read commands from stdin instead of running a whole episode
  #[arg(long, short = 'i')]
  interactive: bool,
}

impl Args {
  fn planner_config(&self) -> Result<PlannerConfig> {
    let mut config = match &self.config {
      Some(path) => {
        let s = fs::read_to_string(path)
          .with_context(|| format!("Failed to read config: {}", path.display()))?;
        PlannerConfig::from_json(&s)
          .with_context(|| format!("Invalid config: {}", path.display()))?
      }
      None => PlannerConfig::default(),
    };
    if let Some(n) = self.simulations {
      config.simulations = n;
    }
    if let Some(h) = self.horizon {
      config.horizon = h;
    }
    if let Some(d) = self.discount {
      config.discount = d;
    }
    if self.seed.is_some() {
      config.seed = self.seed;
    }
    config.parallel |= self.parallel;
    config.sense_on_start |= self.sense_on_start;
    config.validate()?;
    Ok(config)
  }
}

fn init_logging() {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gridnav=info"));
  fmt()
    .with_env_filter(filter)
    .with_writer(io::stderr)
    .init();
}

// obstacles '#', goals '*', agents by their id
fn render_positions(c: &Coordinator) -> String {
  let grid = c.grid();
  let agents: Vec<(AgentId, Cell2D)> = c
    .agent_ids()
    .into_iter()
    .filter_map(|a| c.position(a).ok().map(|p| (a, p)))
    .collect();
  let mut out = String::new();
  for row in 0..grid.rows() as i32 {
    for col in 0..grid.cols() as i32 {
      let cell = Cell2D::new(row, col);
      let symbol = match agents.iter().find(|(_, p)| *p == cell) {
        Some((a, _)) => char::from_digit(u8::from(*a) as u32 % 10, 10).unwrap_or('?'),
        None => match grid.code(&cell) {
          Some(CellCode::Obstacle) => '#',
          Some(CellCode::Goal) => '*',
          _ => '.',
        },
      };
      out.push(symbol);
    }
    out.push('\n');
  }
  out
}

fn print_report(report: &StepReport) -> Result<()> {
  println!("{}", serde_json::to_string(report)?);
  Ok(())
}

fn run(mut c: Coordinator, max_steps: usize) -> Result<()> {
  while c.steps_taken() < max_steps && !c.all_at_goal() {
    print_report(&c.step()?)?;
  }
  let rewards = c
    .agent_ids()
    .into_iter()
    .map(|a| Ok((a, c.total_reward(a)?)))
    .collect::<Result<BTreeMap<_, _>>>()?;
  println!(
    "{}",
    serde_json::json!({
      "steps": c.steps_taken(),
      "success": c.all_at_goal(),
      "total_rewards": rewards,
    })
  );
  Ok(())
}

fn read_agent() -> Option<AgentId> {
  let id: Result<u8, _> = try_read!();
  id.ok().map(AgentId::new)
}

fn shell(mut c: Coordinator) -> Result<()> {
  let prompt = ">";
  loop {
    print!("{prompt}");
    io::stdout().flush()?;
    let command: String = match try_read!() {
      Ok(command) => command,
      Err(_) => return Ok(()),
    };
    match command.as_str() {
      "print" => {
        print!("{}", render_positions(&c));
      }
      "step" => {
        print_report(&c.step()?)?;
      }
      "run" => {
        let n: Result<usize, _> = try_read!();
        let summary = c.run_episode(n.unwrap_or(1))?;
        println!(
          "{} steps, success: {}, rewards: {:?}",
          summary.steps, summary.success, summary.total_rewards
        );
      }
      "apply" => {
        let agent = read_agent();
        let token: String = read!();
        match (agent, token.parse::<Action>()) {
          (Some(agent), Ok(action)) => match c.apply(&BTreeMap::from([(agent, action)])) {
            Ok(report) => print_report(&report)?,
            Err(e) => println!("{e}"),
          },
          (None, _) => println!("usage: apply <agent> <action>"),
          (_, Err(e)) => println!("{e}"),
        }
      }
      "policy" => match read_agent() {
        Some(agent) => match c.planner(agent) {
          Ok(planner) => {
            for (a, s, v) in planner.root_policy() {
              println!("{a} -> prob {s:.5}, value: {v:.5}");
            }
          }
          Err(e) => println!("{e}"),
        },
        None => println!("usage: policy <agent>"),
      },
      "belief" => match read_agent() {
        Some(agent) => match c.beliefs().get(agent) {
          Ok(belief) => {
            let map = belief.map();
            for row in 0..map.rows() as i32 {
              let line: Vec<String> = (0..map.cols() as i32)
                .map(|col| format!("{:.1}", map[&Cell2D::new(row, col)]))
                .collect();
              println!("{}", line.join(" "));
            }
            println!("entropy: {:.4}", belief.entropy());
          }
          Err(e) => println!("{e}"),
        },
        None => println!("usage: belief <agent>"),
      },
      "tree" => {
        let agent = read_agent();
        let path: String = read!();
        match agent {
          Some(agent) => match c.planner(agent) {
            Ok(planner) => {
              let file = File::create(&path).with_context(|| format!("Failed to create {path}"))?;
              render::save(planner.tree(), BufWriter::new(file), 0, 4)?;
              println!("{} nodes written to {path}", planner.tree().len());
            }
            Err(e) => println!("{e}"),
          },
          None => println!("usage: tree <agent> <file>"),
        }
      }
      "exit" | "quit" | "bye" => {
        return Ok(());
      }
      _ => {}
    }
  }
}

fn main() -> Result<()> {
  init_logging();
  let args = Args::parse();
  let config = args.planner_config()?;
  let source = fs::read_to_string(&args.map)
    .with_context(|| format!("Failed to read map: {}", args.map.display()))?;
  let grid: Grid = source
    .parse()
    .with_context(|| format!("Invalid map: {}", args.map.display()))?;
  let coordinator = Coordinator::new(grid, config).context("Failed to set up agents")?;
  if args.interactive {
    shell(coordinator)
  } else {
    run(coordinator, args.max_steps)
  }
}
