//! Runs both engines over a roster, printing the bracket, the standings and the ranking.
//!
//! RANKING_INPUT points at a csv of `id,label,seed` rows (a small built-in roster is
//! used otherwise). RANKING_SEED fixes the shuffles and the simulated upsets.
//! Set RUST_LOG=debug to watch the engines work.
use std::env;
use std::fs;

use anyhow::{anyhow, Context};
use dotenv::var;
use pairwise_ranking::{
    format_bracket, format_ranking, format_standings, parse_items, Decision, DecisionSource,
    DecisionUnavailable, FileGateway, IngestConfig, Item, MemoryGateway, Pairing,
    PersistenceGateway, SeedOracle, SeededRandomness, SwissConfig, SwissEngine, UsulConfig,
    UsulEngine, UsulStep,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing_subscriber::EnvFilter;

const BUILTIN_ROSTER: &str = "\
id,label,seed
ash,Ash,100
birch,Birch,90
cedar,Cedar,80
elm,Elm,70
fir,Fir,60
hazel,Hazel,50
larch,Larch,40
";

/// Higher seed usually wins; one question in five is an upset.
fn upsets(
    rng: &mut ChaCha8Rng,
) -> impl FnMut(&Pairing) -> Result<Decision, DecisionUnavailable> + '_ {
    let mut oracle = SeedOracle::default();
    move |pairing: &Pairing| {
        let decision = oracle.decide(pairing)?;
        if !rng.gen_bool(0.2) {
            return Ok(decision);
        }
        Ok(match decision {
            Decision::Winner(id) if id == pairing.first.id => {
                Decision::Winner(pairing.second.id.clone())
            }
            Decision::Winner(_) => Decision::Winner(pairing.first.id.clone()),
            Decision::Draw => Decision::Draw,
        })
    }
}

fn load_roster() -> anyhow::Result<Vec<Item>> {
    let text = match var("RANKING_INPUT") {
        Ok(path) => fs::read_to_string(&path).with_context(|| format!("reading {}", path))?,
        Err(_) => BUILTIN_ROSTER.to_string(),
    };
    let report = parse_items(
        &text,
        &IngestConfig {
            has_header: true,
            ..Default::default()
        },
    );
    for row in &report.rejected {
        println!("skipped {}", row);
    }
    if report.items.is_empty() {
        return Err(anyhow!("no usable rows in roster"));
    }
    Ok(report.items)
}

fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let seed = var("RANKING_SEED")
        .ok()
        .map(|s| s.parse::<u64>())
        .transpose()
        .context("RANKING_SEED must be an integer")?
        .unwrap_or(7);
    let roster = load_roster()?;
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    if roster.len() >= 2 {
        let mut swiss = SwissEngine::create(
            roster.clone(),
            SwissConfig::default(),
            Box::new(MemoryGateway::new()),
        )?;
        let standings = swiss.run_with(&mut upsets(&mut rng))?;
        println!("{}", format_bracket(swiss.state()));
        println!("Standings:");
        println!("{}", format_standings(&standings));
        println!();
    }

    // stop the ranking after a few answers and pick it back up from the snapshot file
    let path = env::temp_dir().join(format!("pairwise-ranking-demo-{}.json", seed));
    // a leftover file from an earlier run would be someone else's history
    fs::remove_file(&path).ok();
    let mut usul = UsulEngine::create(
        roster,
        UsulConfig::default(),
        SeededRandomness::from_seed(seed),
        Box::new(FileGateway::new(&path)),
    )?;
    let mut source = upsets(&mut rng);
    let mut answered = 0;
    while answered < 3 {
        match usul.advance()? {
            UsulStep::Completed(_) => break,
            UsulStep::Decide(pairings) => {
                for pairing in pairings {
                    let decision = source(&pairing)?;
                    usul.submit_decision(pairing.id, decision)?;
                    answered += 1;
                }
            }
        }
    }
    drop(usul);

    let gateway = FileGateway::new(&path);
    let blob = gateway
        .latest()?
        .ok_or_else(|| anyhow!("no snapshot at {}", path.display()))?;
    println!("Resuming ranking at snapshot {}", blob.sequence);
    let mut usul: UsulEngine = UsulEngine::restore(&blob, Box::new(gateway))?;
    let ranking = usul.run_with(&mut source)?;
    println!("Ranking after {} rounds:", usul.state().round);
    println!("{}", format_ranking(&ranking));

    fs::remove_file(&path).ok();
    Ok(())
}
