use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use catanatron_server::MapType;
use catanatron_server::game::{ActionPayload, GameAction, GameState, ResourceBundle};
use catanatron_server::session::{
    BuildTarget, Request, RequestKind, SessionConfig, SessionContext, SessionCoordinator,
    SessionRegistry, SessionStatus,
};
use catanatron_server::types::{ActionType, Color, StructureKind, UserId};
use clap::Parser;
use rand::{Rng, SeedableRng, rngs::StdRng};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser, Clone)]
#[command(name = "catanatron-sim")]
#[command(about = "Run many game sessions concurrently between random bots")]
struct Args {
    /// Number of games to play
    #[arg(short = 'n', long, default_value_t = 20)]
    num: u32,

    /// Players per game (2-4)
    #[arg(long, default_value_t = 4)]
    players: usize,

    /// JSON file holding a session config; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Base random seed; game i uses seed + i
    #[arg(long)]
    seed: Option<u64>,

    /// Map type: BASE or MINI
    #[arg(long)]
    map: Option<String>,

    /// Victory points needed to win
    #[arg(long)]
    vps_to_win: Option<u8>,

    /// Give up on a game after this many turns
    #[arg(long, default_value_t = 1000)]
    max_turns: u32,

    /// Runtime worker threads
    #[arg(long, default_value_t = 4)]
    workers: usize,

    /// Silence per-game output
    #[arg(long)]
    quiet: bool,
}

struct GameResult {
    index: u32,
    winner: Option<usize>,
    turns: u32,
    notifications: u64,
    duration: Duration,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();

    if !(2..=4).contains(&args.players) {
        eprintln!("Error: Must specify 2-4 players");
        std::process::exit(1);
    }

    let config = load_config(&args).unwrap_or_else(|msg| {
        eprintln!("Error: {msg}");
        std::process::exit(1);
    });

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(args.workers.max(1))
        .build()
        .unwrap_or_else(|err| {
            eprintln!("Error: could not start runtime: {err}");
            std::process::exit(1);
        });

    let registry = SessionRegistry::new(SessionContext::default());
    let start = Instant::now();
    let results = runtime.block_on(run_sessions(&args, &config, &registry));
    let elapsed = start.elapsed();

    let archived = registry.archive_finished();
    info!(archived = archived.len(), remaining = registry.session_count(), "sessions archived");

    if !args.quiet {
        for result in &results {
            let winner = result
                .winner
                .map(|seat| format!("{:?}", Color::ORDERED[seat]))
                .unwrap_or_else(|| "None".to_string());
            println!(
                "Game {:>4}: Winner={:>6}, Turns={:>4}, Events={:>5}, Duration={:?}",
                result.index + 1,
                winner,
                result.turns,
                result.notifications,
                result.duration
            );
        }
    }
    print_summary(&results, args.players, elapsed);
}

fn load_config(args: &Args) -> Result<SessionConfig, String> {
    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .map_err(|err| format!("cannot read {}: {err}", path.display()))?;
            serde_json::from_str(&text)
                .map_err(|err| format!("invalid config {}: {err}", path.display()))?
        }
        None => SessionConfig::default(),
    };
    if let Some(seed) = args.seed {
        config.game.seed = seed;
    }
    if let Some(map) = &args.map {
        config.game.map_type = map
            .parse::<MapType>()
            .map_err(|_| format!("invalid map type '{map}'. Use BASE or MINI"))?;
    }
    if let Some(vps) = args.vps_to_win {
        config.game.vps_to_win = vps;
    }
    Ok(config)
}

async fn run_sessions(
    args: &Args,
    config: &SessionConfig,
    registry: &SessionRegistry,
) -> Vec<GameResult> {
    let mut handles = Vec::new();
    for index in 0..args.num {
        let mut session_config = config.clone();
        session_config.game.seed = config.game.seed.wrapping_add(index as u64);
        let roster: Vec<UserId> = (0..args.players).map(|_| UserId::new()).collect();

        match registry.start_session(roster, session_config) {
            Ok(session) => {
                let seed = config.game.seed ^ (index as u64).rotate_left(32);
                handles.push(tokio::spawn(play_session(
                    index,
                    session,
                    seed,
                    args.max_turns,
                )));
            }
            Err(err) => eprintln!("Error: game {} could not start: {err}", index + 1),
        }
    }

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        match handle.await {
            Ok(result) => results.push(result),
            Err(err) => eprintln!("Error: session task failed: {err}"),
        }
    }
    results.sort_by_key(|r| r.index);
    results
}

async fn play_session(
    index: u32,
    session: Arc<SessionCoordinator>,
    seed: u64,
    max_turns: u32,
) -> GameResult {
    let start = Instant::now();
    let observer = session.with_game(|game| game.players()[0].user);
    let spectator = match session.subscribe(observer) {
        Ok(mut rx) => Some(tokio::spawn(async move {
            let mut received = 0u64;
            while rx.recv().await.is_some() {
                received += 1;
            }
            received
        })),
        Err(err) => {
            warn!(session = %session.id(), error = %err, "could not subscribe observer");
            None
        }
    };

    let mut rng = StdRng::seed_from_u64(seed);
    loop {
        if session.status() != SessionStatus::Active {
            break;
        }
        let (turn, choice) = session.with_game(|game| (game.turn(), choose(game, &mut rng)));
        if turn > max_turns {
            info!(session = %session.id(), turn, "turn limit reached");
            break;
        }
        let Some((user, kind)) = choice else {
            break;
        };
        if let Err(err) = session.dispatch(Request::new(session.id(), user, kind)) {
            debug!(session = %session.id(), error = %err, "bot action failed, expiring turn");
            if session.expire_turn().is_err() {
                break;
            }
        }
        tokio::task::yield_now().await;
    }

    let (winner, turns) = session.with_game(|game| (game.winner(), game.turn()));
    session.unsubscribe(observer);
    let notifications = match spectator {
        Some(handle) => handle.await.unwrap_or(0),
        None => 0,
    };

    GameResult {
        index,
        winner,
        turns,
        notifications,
        duration: start.elapsed(),
    }
}

/// Random bot: builds when it can, otherwise picks any legal action.
fn choose(game: &GameState, rng: &mut StdRng) -> Option<(UserId, RequestKind)> {
    let actions = game.legal_actions();
    if actions.is_empty() {
        return None;
    }
    let productive: Vec<&GameAction> = actions
        .iter()
        .filter(|a| {
            matches!(
                a.action_type,
                ActionType::BuildRoad
                    | ActionType::BuildSettlement
                    | ActionType::BuildCity
                    | ActionType::BuyDevelopmentCard
            )
        })
        .collect();
    let action = if !productive.is_empty() && rng.gen_bool(0.9) {
        productive[rng.gen_range(0..productive.len())]
    } else {
        &actions[rng.gen_range(0..actions.len())]
    };
    let user = game.players()[action.seat].user;
    Some((user, to_request(game, action)?))
}

fn to_request(game: &GameState, action: &GameAction) -> Option<RequestKind> {
    let user_at = |seat: usize| game.players().get(seat).map(|p| p.user);
    let kind = match (action.action_type, action.payload) {
        (ActionType::Roll, _) => RequestKind::Roll,
        (ActionType::EndTurn, _) => RequestKind::EndTurn,
        (ActionType::BuyDevelopmentCard, _) => RequestKind::BuyCard,
        (ActionType::BuildRoad, ActionPayload::Edge(edge)) => RequestKind::Build {
            target: BuildTarget::Edge(edge),
            structure: StructureKind::Road,
        },
        (ActionType::BuildSettlement, ActionPayload::Node(node)) => RequestKind::Build {
            target: BuildTarget::Node(node),
            structure: StructureKind::Settlement,
        },
        (ActionType::BuildCity, ActionPayload::Node(node)) => RequestKind::Build {
            target: BuildTarget::Node(node),
            structure: StructureKind::City,
        },
        (ActionType::PlayDevelopmentCard, ActionPayload::Card(play)) => {
            RequestKind::PlayCard { play }
        }
        (
            ActionType::MaritimeTrade,
            ActionPayload::MaritimeTrade {
                give,
                receive,
                count,
            },
        ) => RequestKind::Trade {
            offer: ResourceBundle::single(give, game.maritime_rate(action.seat, give) * count),
            want: ResourceBundle::single(receive, count),
            counterparty: None,
        },
        (
            ActionType::OfferTrade,
            ActionPayload::Trade {
                give,
                receive,
                counterparty,
            },
        ) => RequestKind::Trade {
            offer: give,
            want: receive,
            counterparty: Some(user_at(counterparty)?),
        },
        (ActionType::RespondTrade, ActionPayload::Respond(accept)) => {
            RequestKind::RespondTrade { accept }
        }
        (ActionType::MoveRobber, ActionPayload::Robber { tile, victim }) => {
            RequestKind::MoveRobber {
                tile,
                victim: match victim {
                    Some(seat) => Some(user_at(seat)?),
                    None => None,
                },
            }
        }
        _ => return None,
    };
    Some(kind)
}

fn print_summary(results: &[GameResult], players: usize, elapsed: Duration) {
    println!("\n{}", "=".repeat(80));
    println!("SIMULATION SUMMARY");
    println!("{}", "=".repeat(80));

    let mut wins: HashMap<usize, u32> = HashMap::new();
    for seat in results.iter().filter_map(|r| r.winner) {
        *wins.entry(seat).or_insert(0) += 1;
    }

    println!("\nSeat Summary:");
    println!("{:<15} {:<10} {:<12}", "Seat", "Wins", "Win Rate");
    println!("{}", "-".repeat(40));
    for seat in 0..players {
        let seat_wins = wins.get(&seat).copied().unwrap_or(0);
        let win_rate = if results.is_empty() {
            0.0
        } else {
            seat_wins as f64 / results.len() as f64 * 100.0
        };
        println!(
            "{:<15} {:<10} {:<11.1}%",
            format!("{} ({:?})", seat, Color::ORDERED[seat]),
            seat_wins,
            win_rate
        );
    }

    let games = results.len().max(1) as f64;
    let unfinished = results.iter().filter(|r| r.winner.is_none()).count();
    let avg_turns = results.iter().map(|r| r.turns as f64).sum::<f64>() / games;
    let avg_events = results.iter().map(|r| r.notifications as f64).sum::<f64>() / games;
    let avg_duration =
        results.iter().map(|r| r.duration).sum::<Duration>() / results.len().max(1) as u32;

    println!("\nGame Summary:");
    println!("  Total Games: {}", results.len());
    println!("  Unfinished: {unfinished}");
    println!("  Avg Turns: {avg_turns:.2}");
    println!("  Avg Events: {avg_events:.2}");
    println!("  Avg Duration: {avg_duration:.2?}");
    println!("  Wall Time: {elapsed:.2?}");
}
