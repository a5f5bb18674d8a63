#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

use clap::{Args, Parser, Subcommand, ValueEnum};
use itertools::Itertools;
use std::path::{Path, PathBuf};
use std::process;

use zoib::data::load_tsv;
use zoib::estimate::{FitMethod, fit_model};
use zoib::model::{FittedModel, ModelConfig, ModelEvaluation};

#[derive(Parser)]
#[command(
    name = "zoib",
    about = "Fit and evaluate zero-one-inflated beta regression models",
    long_about = "Fits a zero-one-inflated beta regression with a normal group effect on the \
                 logit of the beta mean, either by joint MAP or by integrating the group \
                 effects out with a Laplace approximation."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum MethodCli {
    Map,
    Laplace,
}

impl From<MethodCli> for FitMethod {
    fn from(method: MethodCli) -> Self {
        match method {
            MethodCli::Map => FitMethod::Map,
            MethodCli::Laplace => FitMethod::Laplace,
        }
    }
}

#[derive(Args)]
struct FitArgs {
    /// Path to a TSV file with a `y` column, a `group` column and numeric covariates
    data: PathBuf,

    /// Model configuration (TOML); defaults are used when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides the fitting method from the configuration
    #[arg(long, value_enum)]
    method: Option<MethodCli>,

    /// Fit the prior alone, ignoring the responses
    #[arg(long)]
    prior_only: bool,

    /// Where to write the fitted model
    #[arg(long, default_value = "fitted.toml")]
    output: PathBuf,
}

#[derive(Args)]
struct EvaluateArgs {
    /// Path to a TSV file with the same columns and groups as the fitting data
    data: PathBuf,

    /// Path to a fitted model (.toml)
    #[arg(long)]
    model: PathBuf,

    /// Where to write per-observation predictions
    #[arg(long, default_value = "predictions.tsv")]
    output: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit a model (outputs: fitted.toml)
    Fit(FitArgs),
    /// Evaluate a fitted model on data (outputs: predictions.tsv)
    Evaluate(EvaluateArgs),
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Fit(args) => fit(args),
        Commands::Evaluate(args) => evaluate(args),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn fit(args: FitArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => ModelConfig::load(path)?,
        None => ModelConfig::default(),
    };
    if let Some(method) = args.method {
        config.fit.method = method.into();
    }
    if args.prior_only {
        config.prior_only = true;
    }

    let loaded = load_tsv(&args.data, config.intercept, config.prior_only, None)?;
    println!("Covariates: {}", loaded.covariate_names.iter().join(", "));
    println!("Groups: {}", loaded.group_labels.iter().join(", "));

    let fit = fit_model(&loaded.data, &config)?;
    let model = FittedModel::new(config, loaded.covariate_names, loaded.group_labels, &fit);

    println!("Method: {}", model.method);
    println!("Objective: {:.6}", model.objective);
    for (name, value) in &model.betas {
        println!("  beta {name}: {value:.6}");
    }
    println!(
        "  phi: {:.6}  zoi: {:.6}  coi: {:.6}  sd_pid: {:.6}",
        model.phi, model.zoi, model.coi, model.sd_pid
    );
    if !model.converged {
        println!("Warning: the optimiser stopped before its convergence test was met.");
    }

    model.save(&args.output)?;
    println!("Model saved to: {}", args.output.display());
    Ok(())
}

fn evaluate(args: EvaluateArgs) -> Result<(), Box<dyn std::error::Error>> {
    let model = FittedModel::load(&args.model)?;
    let loaded = model.load_data(&args.data)?;

    let evaluation = model.evaluate(&loaded.data)?;
    println!("Objective: {:.6}", evaluation.objective);
    println!("Log prior: {:.6}", evaluation.log_prior);
    println!("Log likelihood: {:.6}", evaluation.log_likelihood);

    save_predictions(&evaluation, &args.output)?;
    println!("Predictions saved to: {}", args.output.display());
    Ok(())
}

fn save_predictions(evaluation: &ModelEvaluation, path: &Path) -> Result<(), csv::Error> {
    let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_path(path)?;
    writer.write_record(["mu", "expected"])?;
    for (mu, expected) in evaluation.report.mu.iter().zip(&evaluation.expected) {
        writer.write_record([format!("{mu:.6}"), format!("{expected:.6}")])?;
    }
    writer.flush()?;
    Ok(())
}
