use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fs::{self, OpenOptions};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use ante::batch::build_batch;
use ante::io_utils::{ante_cli_error, io_cli_error, simple_cli_error, CliError};
use ante::{
    CheckpointStore, Config, Corpus, ErrorResponse, GrammarSet, Model, SymbolTable, Token,
    TranslateRequest, Trainer, Translator, Variant,
};

/// Train and run the variant translation model.
#[derive(Parser)]
#[command(name = "ante")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Encode text into token ids with a merge table
    Encode {
        /// Merge table file
        #[arg(long)]
        table: PathBuf,
        text: String,
    },
    /// Decode token ids back into text
    Decode {
        #[arg(long)]
        table: PathBuf,
        /// Print `/`-separated symbols instead of plain text
        #[arg(long)]
        render: bool,
        ids: Vec<Token>,
    },
    /// Train on the cached corpus, resuming from the save directory
    Train {
        #[command(flatten)]
        common: Common,
        /// Number of epochs to run
        #[arg(long, default_value_t = 1)]
        epochs: usize,
        /// Ignore any existing checkpoint
        #[arg(long)]
        fresh: bool,
    },
    /// Translate primary-variant text with a saved model
    Translate {
        #[command(flatten)]
        common: Common,
        #[arg(long, default_value = "sec")]
        variant: Variant,
        /// Attention sharpening factor
        #[arg(long)]
        boost: Option<f32>,
        /// Read a JSON request from stdin and print a JSON response
        #[arg(long)]
        json: bool,
        text: Option<String>,
    },
    /// Print randomly drawn training pairs
    Sample {
        #[command(flatten)]
        common: Common,
        #[arg(long, default_value = "sec")]
        variant: Variant,
        #[arg(long, default_value_t = 4)]
        count: usize,
    },
}

#[derive(Args)]
struct Common {
    /// JSON config file
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    cache_dir: Option<PathBuf>,
    #[arg(long)]
    save_dir: Option<PathBuf>,
    #[arg(long)]
    seed: Option<u64>,
}

impl Common {
    fn load(&self) -> Result<Config, CliError> {
        let mut cfg = match &self.config {
            Some(path) => Config::load(path).map_err(|e| ante_cli_error("loading config", e))?,
            None => Config::default(),
        };
        if let Some(dir) = &self.cache_dir {
            cfg.paths.cache_dir = dir.clone();
        }
        if let Some(dir) = &self.save_dir {
            cfg.paths.save_dir = dir.clone();
        }
        if self.seed.is_some() {
            cfg.seed = self.seed;
        }
        Ok(cfg)
    }
}

fn main() {
    if let Err(e) = run() {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("ante=info".parse()?),
        )
        .with_writer(io::stderr)
        .init();

    match Cli::parse().command {
        Command::Encode { table, text } => {
            let table = load_table(&table)?;
            let ids: Vec<String> = table.encode(&text).iter().map(Token::to_string).collect();
            println!("{}", ids.join(" "));
        }
        Command::Decode { table, render, ids } => {
            let table = load_table(&table)?;
            if render {
                println!("{}", table.render(&ids));
            } else {
                println!("{}", table.decode(&ids));
            }
        }
        Command::Train {
            common,
            epochs,
            fresh,
        } => train(&common.load()?, epochs, fresh)?,
        Command::Translate {
            common,
            variant,
            boost,
            json,
            text,
        } => {
            let cfg = common.load()?;
            let grammars =
                GrammarSet::load(&cfg.paths).map_err(|e| ante_cli_error("loading tables", e))?;
            let model = CheckpointStore::new(&cfg.paths.save_dir)
                .load_model()
                .map_err(|e| ante_cli_error("loading checkpoint", e))?;
            let translator = Translator::new(
                &grammars.primary,
                grammars.target(variant),
                &model.encoder,
                model.decoder(variant),
            );
            if json {
                let mut body = String::new();
                io::stdin().read_to_string(&mut body)?;
                let outcome = serde_json::from_str::<TranslateRequest>(&body)
                    .map_err(|e| format!("invalid request: {e}"))
                    .and_then(|req| translator.handle(&req).map_err(|e| e.to_string()));
                match outcome {
                    Ok(response) => println!("{}", serde_json::to_string(&response)?),
                    Err(error) => {
                        let reply = ErrorResponse {
                            error: error.clone(),
                        };
                        println!("{}", serde_json::to_string(&reply)?);
                        return Err(simple_cli_error(&format!("translating: {error}")).into());
                    }
                }
            } else {
                let request = TranslateRequest {
                    input: text.ok_or_else(|| simple_cli_error("no text to translate"))?,
                    confidence_boost: boost,
                };
                let response = translator
                    .handle(&request)
                    .map_err(|e| ante_cli_error("translating", e))?;
                println!("{}\t{:.4}", response.result, response.confidence);
            }
        }
        Command::Sample {
            common,
            variant,
            count,
        } => {
            let cfg = common.load()?;
            let grammars =
                GrammarSet::load(&cfg.paths).map_err(|e| ante_cli_error("loading tables", e))?;
            let corpus =
                Corpus::open(&cfg.paths, &grammars).map_err(|e| ante_cli_error("opening corpus", e))?;
            let mut rng = make_rng(cfg.seed);
            let batch = build_batch(
                &corpus,
                count,
                variant,
                None,
                cfg.training.max_sampling_attempts,
                &mut rng,
            )
            .map_err(|e| ante_cli_error("sampling", e))?;
            for r in 0..batch.source.rows() {
                println!("{}", grammars.primary.render(&batch.source.content(r)));
                println!("  {}", grammars.target(variant).render(&batch.target.content(r)));
            }
        }
    }
    Ok(())
}

fn load_table(path: &Path) -> Result<SymbolTable, CliError> {
    SymbolTable::from_path(path).map_err(|e| match e {
        ante::AnteError::Io(io) => io_cli_error("reading merge table", path, io),
        other => ante_cli_error("loading merge table", other),
    })
}

fn make_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    }
}

fn train(cfg: &Config, epochs: usize, fresh: bool) -> Result<(), Box<dyn std::error::Error>> {
    let grammars = GrammarSet::load(&cfg.paths).map_err(|e| ante_cli_error("loading tables", e))?;
    let corpus =
        Corpus::open(&cfg.paths, &grammars).map_err(|e| ante_cli_error("opening corpus", e))?;
    let store = CheckpointStore::new(&cfg.paths.save_dir);
    let mut rng = make_rng(cfg.seed);

    let mut trainer = if !fresh && store.exists() {
        let model = store
            .load_model()
            .map_err(|e| ante_cli_error("loading checkpoint", e))?;
        let optimizers = store
            .load_optimizers()
            .map_err(|e| ante_cli_error("loading optimizer state", e))?;
        tracing::info!(dir = %store.dir().display(), "resuming from checkpoint");
        match optimizers {
            Some(opt) => Trainer::resume(model, opt, cfg.training.clone()),
            None => Trainer::new(model, cfg.training.clone()),
        }
    } else {
        Trainer::new(
            Model::new(&cfg.model, &grammars, &mut rng),
            cfg.training.clone(),
        )
    };

    let steps = (cfg.training.rounds_per_epoch * cfg.training.schedule.len()) as u64;
    for epoch in 0..epochs {
        let pb = ProgressBar::new(steps);
        pb.set_style(
            ProgressStyle::with_template("epoch {prefix} [{bar:30}] {pos}/{len} {msg}")?
                .progress_chars("=> "),
        );
        pb.set_prefix(epoch.to_string());
        let summary = trainer
            .train_epoch(&corpus, epoch, &mut rng, Some(&pb))
            .map_err(|e| ante_cli_error("training", e))?;
        pb.finish_and_clear();
        tracing::info!(
            epoch,
            sec_loss = summary.secondary_loss,
            aux_loss = summary.auxiliary_loss,
            "epoch finished"
        );

        store
            .save(&trainer.model, Some(&trainer.optimizers))
            .map_err(|e| ante_cli_error("saving checkpoint", e))?;

        for variant in Variant::ALL {
            let samples = trainer
                .sample_translations(&corpus, variant, &mut rng)
                .map_err(|e| ante_cli_error("sampling", e))?;
            let target = grammars.target(variant);
            for (src, reference, hyp) in samples {
                tracing::info!(
                    %variant,
                    source = %grammars.primary.render(&src),
                    reference = %target.render(&reference),
                    output = %target.render(&hyp),
                    "sample"
                );
            }
        }

        if let Some(path) = &cfg.paths.metrics_csv {
            append_metrics(path, &summary)?;
        }
    }
    Ok(())
}

fn append_metrics(path: &Path, summary: &ante::EpochSummary) -> Result<(), CliError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| io_cli_error("creating", parent, e))?;
    }
    let new_file = !path.exists();
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| io_cli_error("opening metrics file", path, e))?;
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(new_file)
        .from_writer(file);
    wtr.serialize(summary)
        .map_err(|e| simple_cli_error(&format!("writing metrics: {e}")))?;
    wtr.flush()
        .map_err(|e| io_cli_error("writing metrics file", path, e))?;
    Ok(())
}

