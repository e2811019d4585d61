//! Builds a distributed discrete Gaussian aggregator from TOML settings and
//! runs one round over random client updates.

use distributed_dp::prelude::*;
use ndarray::Array1;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const SETTINGS: &str = r#"
seed = 2024

[dp]
epsilon = 4.0
delta = 1e-5
l2_norm_clip = 1.0
mechanism = "ddgauss"

[compression]
num_bits = 18
beta = 0.5

[schedule]
num_clients = 1000
num_clients_per_round = 50
num_rounds = 20

[log]
filter = "distributed_dp=info"
"#;

fn main() {
    let settings = Settings::from_toml_str(SETTINGS).expect("settings");
    init_logging(&settings.log).expect("logging");

    let dim = 100;
    let config = settings
        .aggregator_config(ClientTemplate::flat(dim).expect("template"))
        .expect("config");
    let (aggregator, params) = config.build().expect("build aggregator");

    println!("Stages: {:?}", aggregator.stage_names());
    println!("{}", params.to_json().expect("json"));

    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let updates: Vec<Vector> = (0..config.schedule.num_clients_per_round)
        .map(|_| Array1::from_iter((0..dim).map(|_| rng.gen_range(-0.2..0.2))))
        .collect();
    let (mean, metrics) = aggregator
        .aggregate_vectors(0, &updates)
        .expect("aggregate round");

    println!(
        "First coordinates: {:?}",
        mean.iter().take(5).collect::<Vec<_>>()
    );
    println!("Clipped {} of {} clients", metrics.num_clipped, metrics.num_clients);
    println!(
        "Wraps: client {}, aggregate {}",
        metrics.client_wraps, metrics.aggregate_wraps
    );
}
