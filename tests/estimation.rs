use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Beta, Distribution, Normal};
use wolfe_bfgs::Bfgs;
use std::fs;
use zoib::data::{ZoibData, load_tsv};
use zoib::dual::Dual;
use zoib::estimate::{FitMethod, fit_model};
use zoib::matrix::DesignMatrix;
use zoib::model::{FittedModel, ModelConfig, ModelError};
use zoib::params::ParameterLayout;
use zoib::priors::sum_to_zero_lpdf;
use zoib::transforms::inv_logit;

struct Simulation {
    data: ZoibData,
    betas: [f64; 2],
}

fn simulate(n: usize, groups: usize, seed: u64) -> Simulation {
    let mut rng = StdRng::seed_from_u64(seed);
    let betas = [0.5, -1.0];
    let (phi, zoi, coi) = (12.0, 0.1, 0.6);

    let noise = Normal::new(0.0, 0.3).unwrap();
    let mut effects: Vec<f64> = (0..groups).map(|_| noise.sample(&mut rng)).collect();
    let mean = effects.iter().sum::<f64>() / groups as f64;
    effects.iter_mut().for_each(|e| *e -= mean);

    let mut x = Array2::<f64>::ones((n, 2));
    let mut y = Array1::<f64>::zeros(n);
    let mut assignment = Vec::with_capacity(n);
    for i in 0..n {
        let g = i % groups;
        let covariate: f64 = rng.gen_range(-1.5..1.5);
        x[[i, 1]] = covariate;
        assignment.push(g);

        let mu = inv_logit(betas[0] + betas[1] * covariate + effects[g]);
        let u: f64 = rng.r#gen();
        y[i] = if u < zoi {
            if rng.r#gen::<f64>() < coi { 1.0 } else { 0.0 }
        } else {
            let draw = Beta::new(mu * phi, (1.0 - mu) * phi).unwrap().sample(&mut rng);
            draw.clamp(1e-9, 1.0 - 1e-9)
        };
    }

    let data = ZoibData::new(
        y,
        x,
        DesignMatrix::incidence(&assignment, groups).unwrap(),
        false,
    )
    .unwrap();
    Simulation { data, betas }
}

#[test]
fn sum_to_zero_penalty_alone_pins_the_sum() {
    let sd = 0.001;
    let cost_and_grad = |pid: &Array1<f64>| -> (f64, Array1<f64>) {
        let value = -sum_to_zero_lpdf(pid.as_slice().unwrap(), sd);
        let grad = (0..pid.len())
            .map(|k| {
                let seeded: Vec<Dual> = pid
                    .iter()
                    .enumerate()
                    .map(|(i, &p)| if i == k { Dual::var(p) } else { Dual::constant(p) })
                    .collect();
                -sum_to_zero_lpdf(&seeded, sd).dot
            })
            .collect();
        (value, grad)
    };

    let solution = Bfgs::new(Array1::from_vec(vec![0.3, -0.1, 0.5]), cost_and_grad)
        .with_tolerance(1e-8)
        .with_max_iterations(200)
        .run()
        .expect("BFGS on the constraint term");
    let total: f64 = solution.final_point.sum();
    assert!(total.abs() < 1e-3, "sum(pid) = {total}");
}

#[test]
fn map_fit_recovers_fixed_effects() {
    let sim = simulate(600, 6, 2024);
    let fit = fit_model(&sim.data, &ModelConfig::default()).expect("MAP fit");

    assert_eq!(fit.method, FitMethod::Map);
    assert!(fit.objective.is_finite());
    for (estimate, truth) in fit.report.betas.iter().zip(sim.betas) {
        assert!(
            (estimate - truth).abs() < 0.25,
            "beta estimate {estimate} too far from {truth}"
        );
    }
    assert!(fit.report.zoi > 0.05 && fit.report.zoi < 0.16, "zoi {}", fit.report.zoi);
    assert!(fit.report.phi > 6.0 && fit.report.phi < 24.0, "phi {}", fit.report.phi);
    assert!(fit.report.pid.iter().sum::<f64>().abs() < 1e-3);
}

#[test]
fn laplace_fit_agrees_in_sign_with_truth() {
    let sim = simulate(200, 4, 7);
    let mut config = ModelConfig::default();
    config.fit.method = FitMethod::Laplace;

    let fit = fit_model(&sim.data, &config).expect("Laplace fit");
    assert_eq!(fit.method, FitMethod::Laplace);
    assert!(fit.objective.is_finite());
    assert!(fit.report.betas[0] > 0.0);
    assert!(fit.report.betas[1] < -0.5);
    assert_eq!(fit.report.pid.len(), 4);
    assert!(fit.report.pid.iter().sum::<f64>().abs() < 1e-3);
}

#[test]
fn prior_only_fit_returns_to_the_prior_mode() {
    let mut sim = simulate(80, 3, 99);
    sim.data.prior_only = true;
    let fit = fit_model(&sim.data, &ModelConfig::default()).expect("prior-only fit");
    assert_eq!(fit.log_likelihood, 0.0);
    // With no data the betas have nothing pulling them from their N(0, 1) mode.
    for beta in &fit.report.betas {
        assert!(beta.abs() < 0.05, "beta {beta}");
    }
}

#[test]
fn saved_model_reproduces_its_objective() {
    let sim = simulate(120, 3, 31);
    let config = ModelConfig::default();
    let fit = fit_model(&sim.data, &config).expect("MAP fit");
    let model = FittedModel::new(
        config,
        vec!["intercept".to_string(), "x".to_string()],
        vec!["a".to_string(), "b".to_string(), "c".to_string()],
        &fit,
    );
    assert_eq!(model.layout(), ParameterLayout::new(2, 3));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fitted.toml");
    model.save(&path).unwrap();
    let loaded = FittedModel::load(&path).unwrap();

    assert_eq!(loaded.group_labels, model.group_labels);
    let evaluation = loaded.evaluate(&sim.data).unwrap();
    assert!((evaluation.objective - fit.objective).abs() < 1e-8 * (1.0 + fit.objective.abs()));
    assert_eq!(evaluation.expected.len(), 120);
}

#[test]
fn reordered_covariate_columns_are_rejected_at_evaluation() {
    let dir = tempfile::tempdir().unwrap();
    let rows = [
        ("0.21", "a", "-1.0", "0.40"),
        ("0.35", "b", "-0.5", "0.52"),
        ("0", "c", "-0.8", "-0.47"),
        ("0.48", "a", "0.0", "0.61"),
        ("0.52", "b", "0.2", "-0.38"),
        ("1", "c", "1.1", "0.15"),
        ("0.66", "a", "0.6", "-0.44"),
        ("0.71", "b", "0.9", "0.29"),
    ];
    let fitted_order: String = std::iter::once("y\tgroup\tdose\tage\n".to_string())
        .chain(rows.iter().map(|(y, g, d, a)| format!("{y}\t{g}\t{d}\t{a}\n")))
        .collect();
    let swapped_order: String = std::iter::once("y\tgroup\tage\tdose\n".to_string())
        .chain(rows.iter().map(|(y, g, d, a)| format!("{y}\t{g}\t{a}\t{d}\n")))
        .collect();
    let train = dir.path().join("train.tsv");
    let swapped = dir.path().join("swapped.tsv");
    fs::write(&train, fitted_order).unwrap();
    fs::write(&swapped, swapped_order).unwrap();

    let config = ModelConfig::default();
    let loaded = load_tsv(&train, config.intercept, false, None).unwrap();
    let fit = fit_model(&loaded.data, &config).expect("MAP fit");
    let model = FittedModel::new(config, loaded.covariate_names, loaded.group_labels, &fit);

    let same = model.load_data(&train).unwrap();
    assert!(model.evaluate(&same.data).is_ok());

    let err = model.load_data(&swapped).unwrap_err();
    match err {
        ModelError::MismatchedCovariateNames { found, expected } => {
            assert_eq!(found, vec!["intercept", "age", "dose"]);
            assert_eq!(expected, vec!["intercept", "dose", "age"]);
        }
        other => panic!("unexpected error: {other}"),
    }
}
