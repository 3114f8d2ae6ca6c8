// Prepare the quantized MNIST test data, or validate a compiled runtime against it
use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, Context};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use q7_digits::dataset::MnistSplit;
use q7_digits::exchange::{self, ExchangeFiles, ExternalBinary};
use q7_digits::quantization::{FixedPoint, PixelQuantizer};
use q7_digits::shift_table::{ShiftTable, INPUT_TENSOR, OUTPUT_TENSOR};
use q7_digits::test_bin::export_test_bin;
use q7_digits::validation::{
    FailurePolicy, ValidationConfig, Validator, ACCURACY_THRESHOLD, CONFIDENCE_THRESHOLD,
    PROGRESS_INTERVAL,
};

#[derive(Parser, Debug)]
#[command(
    name = "q7-digits",
    version,
    about = "Quantize MNIST for a q7 inference runtime and check the runtime's accuracy."
)]
struct Cli {
    /// Set to YES to run `validate` when no subcommand is given
    #[arg(long, env = "NNOM_TEST_ON_CI", hide = true)]
    test_on_ci: Option<String>,

    /// Any non-empty value marks a non-interactive run (plain log output)
    #[arg(long, env = "NNOM_ON_CI", hide = true)]
    on_ci: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Quantize the dataset and write the labelled test binary
    Prepare(PrepareArgs),

    /// Run every test sample through the compiled runtime and check its accuracy
    Validate(ValidateArgs),
}

#[derive(Args, Debug)]
struct PrepareArgs {
    /// Directory holding the MNIST IDX files (optionally gzipped)
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Test binary to write
    #[arg(long, default_value = "mnist_test_data.bin")]
    test_bin: PathBuf,

    /// Overwrite the test binary if it already exists
    #[arg(long)]
    force: bool,

    /// Also load and quantize the training split
    #[arg(long)]
    train: bool,
}

#[derive(Args, Debug)]
struct ValidateArgs {
    /// Directory holding the MNIST IDX files (optionally gzipped)
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Shift table written alongside the model weights
    #[arg(long, default_value = ".shift_list")]
    shift_list: PathBuf,

    /// Compiled inference runtime, run once per sample without arguments
    #[arg(long, default_value = exchange::DEFAULT_PROGRAM)]
    program: PathBuf,

    /// File the runtime reads its input tensor from
    #[arg(long, default_value = exchange::DEFAULT_INPUT)]
    input_file: PathBuf,

    /// File the runtime writes its output tensor to
    #[arg(long, default_value = exchange::DEFAULT_OUTPUT)]
    output_file: PathBuf,

    /// Shift table key of the input tensor
    #[arg(long, default_value = INPUT_TENSOR)]
    input_tensor: String,

    /// Shift table key of the output tensor
    #[arg(long, default_value = OUTPUT_TENSOR)]
    output_tensor: String,

    /// Fractional bits of the output, instead of the shift table entry
    #[arg(long, allow_negative_numbers = true)]
    output_shift: Option<i32>,

    /// Minimum decoded score for a prediction to count as correct
    #[arg(long, default_value_t = CONFIDENCE_THRESHOLD)]
    confidence: f32,

    /// Accuracy the runtime has to exceed
    #[arg(long, default_value_t = ACCURACY_THRESHOLD)]
    threshold: f64,

    /// How samples whose runtime invocation fails are scored
    #[arg(long, value_enum, default_value_t = FailurePolicy::CountIncorrect)]
    on_failure: FailurePolicy,

    /// Print running accuracy every this many samples (0 to disable)
    #[arg(long, default_value_t = PROGRESS_INTERVAL)]
    progress_interval: usize,

    /// Only validate the first N test samples
    #[arg(long)]
    limit: Option<usize>,

    /// Also write the full report, with confusion matrix, to this file
    #[arg(long)]
    report: Option<PathBuf>,
}

impl From<&ValidateArgs> for ValidationConfig {
    fn from(a: &ValidateArgs) -> Self {
        ValidationConfig {
            input_tensor: a.input_tensor.clone(),
            output_tensor: a.output_tensor.clone(),
            output_shift: a.output_shift,
            confidence_threshold: a.confidence,
            accuracy_threshold: a.threshold,
            failure_policy: a.on_failure,
            progress_interval: a.progress_interval,
            ..ValidationConfig::default()
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let interactive = cli.on_ci.as_deref().map_or(true, str::is_empty);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("q7_digits=info".parse()?))
        .with_ansi(interactive)
        .with_writer(std::io::stderr)
        .init();

    let command = match cli.command {
        Some(command) => command,
        None => {
            let name = if cli.test_on_ci.as_deref() == Some("YES") {
                "validate"
            } else {
                "prepare"
            };
            Cli::parse_from(["q7-digits", name])
                .command
                .ok_or_else(|| anyhow!("no default command"))?
        }
    };

    match command {
        Commands::Prepare(args) => prepare(args),
        Commands::Validate(args) => validate(args),
    }
}

fn prepare(args: PrepareArgs) -> anyhow::Result<()> {
    // one quantizer for every split
    let quantizer = PixelQuantizer::default();

    if args.train {
        let train = MnistSplit::train(&args.data_dir).context("loading training split")?;
        let q_train = train.images.quantize(&quantizer);
        println!("{} train samples", train.len());
        if let Some((lo, hi)) = q_train.min_and_max() {
            println!("train data range {lo} {hi}");
        }
    }

    let test = MnistSplit::test(&args.data_dir).context("loading test split")?;
    println!("{} test samples", test.len());
    let q_test = test.images.quantize(&quantizer);
    if let Some((lo, hi)) = q_test.min_and_max() {
        println!("data range {lo} {hi}");
    }

    if args.test_bin.exists() && !args.force {
        tracing::info!(
            "{} exists, leaving it in place",
            args.test_bin.display()
        );
        return Ok(());
    }

    let values = q_test.dequantize(&FixedPoint::new(0));
    let written = export_test_bin(&values, &test.labels, &args.test_bin)?;
    println!("{written} samples written to {}", args.test_bin.display());
    Ok(())
}

fn validate(args: ValidateArgs) -> anyhow::Result<()> {
    let shifts = ShiftTable::load(&args.shift_list)
        .with_context(|| format!("reading {}", args.shift_list.display()))?;

    let test = MnistSplit::test(&args.data_dir).context("loading test split")?;
    let n = args.limit.unwrap_or(test.len()).min(test.len());
    let images = test.images.quantize(&PixelQuantizer::default()).take(n);
    let labels = &test.labels[..n];
    if let Some((lo, hi)) = images.min_and_max() {
        println!("data range {lo} {hi}");
    }

    let files = ExchangeFiles::new(&args.input_file, &args.output_file);
    let runtime = ExternalBinary::new(&args.program);
    let mut validator = Validator::new((&args).into(), &shifts, files, runtime)?;

    let report = validator.run(&images, labels, |progress| {
        println!("{}", progress.progress_line())
    })?;
    println!("{}", report.progress_line());

    if let Some(path) = &args.report {
        fs::write(path, report.to_string())
            .with_context(|| format!("writing {}", path.display()))?;
        tracing::info!("Report written to {}", path.display());
    }

    report.check(args.threshold)?;
    Ok(())
}
