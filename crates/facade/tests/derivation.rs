use distributed_dp::prelude::*;
use distributed_dp::{DiscreteGaussianTarget, DpError, MechanismParams};
use proptest::prelude::*;

fn reference_config() -> AggregatorConfig {
    AggregatorConfig {
        budget: PrivacyBudget::new(Mechanism::DiscreteGaussian, 2.0, Some(1e-5), 1.0),
        compression: CompressionParams {
            bits: 16,
            beta: 0.5,
            k_stddevs: 4.0,
            ..Default::default()
        },
        schedule: Schedule {
            num_clients: 1_000,
            num_clients_per_round: 100,
            num_rounds: 10,
        },
        template: ClientTemplate::flat(1_000_000).expect("template"),
        seed: 0,
    }
}

fn derive(config: &AggregatorConfig) -> distributed_dp::Result<ParamsRecord> {
    derive_params(
        &config.budget,
        &config.compression,
        &config.schedule,
        &config.template,
        &RdpPrivacyAccountant::default(),
    )
}

#[test]
fn reference_derivation_is_reproducible() {
    let config = reference_config();
    let first = derive(&config).expect("derive");
    let p = first.derived().expect("ddgauss params");

    assert_eq!(first.dim, 1_000_000);
    assert_eq!(p.padded_dim, 1_048_576);
    assert_eq!(p.modulus, 65_536);
    assert!(p.scale.is_finite() && p.scale > 0.0);
    assert!(p.local_stddev > 0.0);
    assert!(p.noise_mult_inflated <= p.noise_mult_clip);
    assert!((p.central_stddev - p.local_stddev * 10.0).abs() < 1e-12);

    let second = derive(&config).expect("derive again");
    let q = second.derived().expect("ddgauss params");
    assert_eq!(first, second);
    assert_eq!(p.scale.to_bits(), q.scale.to_bits());
    assert_eq!(p.local_stddev.to_bits(), q.local_stddev.to_bits());
    assert_eq!(p.inflated_l2.to_bits(), q.inflated_l2.to_bits());
}

#[test]
fn gaussian_derivation_uses_calibrated_multiplier() {
    let mut config = reference_config();
    config.budget.mechanism = Mechanism::Gaussian;
    let record = derive(&config).expect("derive");
    let g = record.gaussian().expect("gaussian params");
    assert!(g.noise_multiplier > 0.0);
    assert_eq!(g.server_stddev, g.noise_multiplier * 1.0);
    assert_eq!(record.delta, Some(1e-5));
    assert_eq!(record.sampling_rate, 0.1);
}

#[test]
fn sentinel_takes_the_plain_branch() {
    let mut config = reference_config();
    config.budget.epsilon = Some(NO_DP_EPSILON);
    let record = derive(&config).expect("derive");
    assert_eq!(record.params, MechanismParams::None { clip: Some(1.0) });
    assert_eq!(record.delta, None);
}

#[test]
fn zero_epsilon_is_an_invalid_budget() {
    let mut config = reference_config();
    config.budget.epsilon = Some(0.0);
    assert!(matches!(
        derive(&config),
        Err(DpError::InvalidBudget {
            field: "epsilon",
            ..
        })
    ));
}

#[test]
fn unknown_mechanism_from_settings_is_echoed() {
    let settings = Settings::from_toml_str(
        r#"
        [dp]
        epsilon = 1.0
        l2_norm_clip = 1.0
        mechanism = "RAPPOR"
        [schedule]
        num_clients = 100
        num_clients_per_round = 10
        num_rounds = 5
        "#,
    )
    .expect("settings");
    let err = settings
        .aggregator_config(ClientTemplate::flat(4).expect("template"))
        .expect_err("unsupported");
    assert_eq!(err.to_string(), "unsupported mechanism: RAPPOR");
}

/// Accountant returning fixed mechanism parameters.
#[derive(Debug)]
struct Fixed {
    gamma: f64,
    local_stddev: f64,
}

impl PrivacyAccountant for Fixed {
    fn gaussian_noise_multiplier(
        &self,
        _epsilon: f64,
        _delta: f64,
        _sampling_rate: f64,
        _steps: usize,
    ) -> distributed_dp::Result<f64> {
        Ok(1.0)
    }

    fn discrete_gaussian_params(
        &self,
        _target: &DiscreteGaussianTarget,
    ) -> distributed_dp::Result<(f64, f64)> {
        Ok((self.gamma, self.local_stddev))
    }
}

proptest! {
    #[test]
    fn prop_inflation_never_raises_the_multiplier(
        gamma in 1e-5f64..1.0,
        local_stddev in 1e-3f64..10.0,
        clip in 0.01f64..10.0,
        beta in 1e-6f64..0.99,
        dim in 1usize..100_000,
    ) {
        let config = AggregatorConfig {
            budget: PrivacyBudget::new(Mechanism::DiscreteGaussian, 1.0, None, clip),
            compression: CompressionParams { beta, ..Default::default() },
            schedule: Schedule { num_clients: 50, num_clients_per_round: 10, num_rounds: 3 },
            template: ClientTemplate::flat(dim).expect("template"),
            seed: 0,
        };
        let record = derive_params(
            &config.budget,
            &config.compression,
            &config.schedule,
            &config.template,
            &Fixed { gamma, local_stddev },
        )
        .expect("derive");
        let p = record.derived().expect("ddgauss params");
        prop_assert!(p.inflated_l2 >= clip);
        prop_assert!(p.noise_mult_inflated <= p.noise_mult_clip);
        prop_assert!(p.padded_dim.is_power_of_two() && p.padded_dim >= dim);
    }
}
