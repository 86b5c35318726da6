use std::{fs::File, io::BufReader, path::PathBuf, process};

use anyhow::{Context, Result};
use structopt::StructOpt;
use tracing_subscriber::*;
use xaynet_vfl::{
    crypto::{CipherSuite, Plaintext, SealedScalar},
    dataset::{Dataset, SparseDataset},
    session::{pair, LocalGuest, Session},
    settings::{Encryption, SessionSettings, Settings, SgdSettings},
    sgd::validation::{scorer, validation_mask},
    FitOutcome,
    InitialModel,
    Trainer,
};

#[macro_use]
extern crate tracing;

#[derive(Debug, StructOpt)]
#[structopt(name = "VFL Host")]
struct Opt {
    /// Path of the configuration file
    #[structopt(short, parse(from_os_str))]
    config_path: PathBuf,

    /// Path of the training data in LIBSVM format
    #[structopt(short, parse(from_os_str))]
    data_path: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let Opt {
        config_path,
        data_path,
    } = Opt::from_args();

    let settings = Settings::new(config_path).unwrap_or_else(|err| {
        eprintln!("{}", err);
        process::exit(1);
    });
    let Settings {
        sgd: sgd_settings,
        session: session_settings,
        log: log_settings,
    } = settings;

    let _fmt_subscriber = FmtSubscriber::builder()
        .with_env_filter(log_settings.filter)
        .with_ansi(true)
        .init();

    let file = File::open(&data_path)
        .with_context(|| format!("failed to open {}", data_path.display()))?;
    let dataset = SparseDataset::from_libsvm(BufReader::new(file), None)
        .with_context(|| format!("failed to read {}", data_path.display()))?;
    info!(
        "loaded {} samples with {} features",
        dataset.sample_count(),
        dataset.n_features()
    );

    let outcome = match session_settings.encryption {
        Encryption::Plaintext => run(Plaintext, sgd_settings, session_settings, dataset).await?,
        Encryption::Sealed => {
            let suite = SealedScalar::new().context("failed to initialize sodiumoxide")?;
            run(suite, sgd_settings, session_settings, dataset).await?
        }
    };

    info!(
        "finished after {} epochs ({}), intercept {}",
        outcome.epochs, outcome.termination, outcome.intercept
    );
    if outcome.skipped_samples > 0 {
        warn!("{} samples were skipped", outcome.skipped_samples);
    }
    let weights = outcome
        .average_weights
        .as_ref()
        .unwrap_or(&outcome.weights);
    println!("{:?}", weights);
    Ok(())
}

/// Fits the model against a simulated guest holding the labels of the dataset.
async fn run<C>(
    suite: C,
    sgd_settings: SgdSettings,
    session_settings: SessionSettings,
    mut dataset: SparseDataset,
) -> Result<FitOutcome>
where
    C: CipherSuite + Copy + 'static,
{
    let session_id = session_settings.session_id();
    let (host, guest_end) = pair(session_id);
    let guest = LocalGuest::with_labels(suite, sgd_settings.loss, dataset.labels().to_vec());
    let guest = tokio::spawn(guest.serve(guest_end));

    let mut trainer = Trainer::new(sgd_settings.clone(), suite, Session::new(session_id, host))
        .with_exchange(session_settings.exchange());
    if sgd_settings.early_stopping {
        let mask = validation_mask(
            dataset.sample_count(),
            sgd_settings.validation_fraction,
            sgd_settings.seed,
        );
        let score = scorer(&dataset, &mask, sgd_settings.loss.is_classification());
        trainer = trainer.with_validation(mask, score);
    }

    let outcome = trainer
        .fit(InitialModel::zeros(dataset.n_features()), &mut dataset)
        .await?;
    let answered = guest.await?.context("guest failed")?;
    debug!("guest answered {} predictions", answered);
    Ok(outcome)
}
