use std::env;
use std::path::PathBuf;

use burn::backend::Autodiff;
use dotenv::dotenv;
use neuroins::rl::{CsvSink, MultiSink, ReinforceTrainer, TrainConfig, TracingSink};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[cfg(not(feature = "metal"))]
type InnerBackend = burn::backend::NdArray;
#[cfg(feature = "metal")]
type InnerBackend = burn::backend::Metal;

type TrainBackend = Autodiff<InnerBackend>;

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("neuroins=debug,info"));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(true)
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("a global tracing subscriber was already installed");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Train,
    Eval,
}

fn mode_from_env() -> Result<Mode, Box<dyn std::error::Error>> {
    match env::var("NEUROINS_MODE").as_deref() {
        Err(_) | Ok("train") => Ok(Mode::Train),
        Ok("eval") => Ok(Mode::Eval),
        Ok(other) => Err(format!("unknown NEUROINS_MODE '{other}', expected train or eval").into()),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    init_logging();

    let mode = mode_from_env()?;
    let config = TrainConfig::from_env()?;
    config.validate()?;
    tracing::info!("Mode: {:?}", mode);
    tracing::debug!("Configuration: {:?}", config);

    let device = Default::default();
    let mut trainer = ReinforceTrainer::<TrainBackend>::new(device, config.clone())?;
    if let Some(log_dir) = &config.log_dir {
        trainer = trainer.with_sink(MultiSink::new().with(TracingSink).with(CsvSink::new(log_dir)?));
    }
    if let Some(resume) = &config.resume {
        trainer.load_checkpoint(resume)?;
    }

    let val_dataset = trainer.validation_dataset()?;
    if let Some(path) = env::var("NEUROINS_SAVE_VAL_DATASET").ok().map(PathBuf::from) {
        val_dataset.save(&path)?;
        tracing::info!("Wrote validation set to {}", path.display());
    }

    match mode {
        Mode::Train => {
            if !config.no_saving {
                std::fs::create_dir_all(&config.save_dir)?;
                config.save(PathBuf::from(&config.save_dir).join("config.json"))?;
            }
            trainer.train(&val_dataset)?;
        }
        Mode::Eval => {
            let report = trainer.validate(&val_dataset, trainer.start_epoch())?;
            tracing::info!(
                "Evaluated {} instances, mean closed tour {:.4}",
                report.len(),
                report.closed_costs.iter().sum::<f32>() / report.len().max(1) as f32
            );
        }
    }

    Ok(())
}
