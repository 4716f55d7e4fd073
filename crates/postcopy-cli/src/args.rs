use std::{
    io::{self, BufRead, Write},
    str::FromStr,
};

use clap::{ArgAction, Parser};
use postcopy_core::{CoreConfig, PageSize};

/// Post-copy live VM migration simulator.
///
/// Any parameter that is missing or invalid on the command line is asked
/// for interactively, unless `--non-interactive` is given.
#[derive(Parser, Debug)]
#[command(name = "postcopy-sim", version, allow_negative_numbers = true)]
pub struct Cli {
    /// VM size in megabytes (default: 2048)
    pub vm_size: Option<String>,

    /// Fraction of pages that are free before migration, 0.0 to 1.0
    /// (default: 0.20)
    pub free_ratio: Option<String>,

    /// Link speed in megabits per second (default: 1000)
    pub link_speed: Option<String>,

    /// Never prompt; fall back to defaults instead
    #[arg(short = 'y', long)]
    pub non_interactive: bool,

    /// Seed for page classification and the workload
    #[arg(long)]
    pub seed: Option<u64>,

    /// Print the final report as JSON; prompts go to stderr
    #[arg(long)]
    pub json: bool,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Picks the stream prompts are written to.
    ///
    /// With `--json`, stdout carries only the report.
    pub fn prompt_writer<'a>(
        &self,
        stdout: impl Write + 'a,
        stderr: impl Write + 'a,
    ) -> Box<dyn Write + 'a> {
        if self.json {
            Box::new(stderr)
        }
        else {
            Box::new(stdout)
        }
    }
}

/// A prompted parameter.
pub struct Field<T> {
    prompt: &'static str,
    default: T,
    out_of_range: &'static str,
    invalid: &'static str,
    valid: fn(&T) -> bool,
}

/// VM size in megabytes.
pub const VM_SIZE_MB: Field<u64> = Field {
    prompt: "Enter VM size in MB (default: 2048): ",
    default: CoreConfig::DEFAULT_VM_SIZE_MB,
    out_of_range: "VM size must be between 1 and 1048576 MB. Using default: 2048 MB",
    invalid: "Invalid input. Using default: 2048 MB",
    valid: positive_size,
};

/// Free page ratio.
pub const FREE_PAGE_RATIO: Field<f64> = Field {
    prompt: "Enter free page ratio (0.0-1.0, default: 0.20): ",
    default: CoreConfig::DEFAULT_FREE_PAGE_RATIO,
    out_of_range: "Ratio must be between 0.0 and 1.0. Using default: 0.20",
    invalid: "Invalid input. Using default: 0.20",
    valid: unit_ratio,
};

/// Link speed in Mbps.
pub const LINK_SPEED_MBPS: Field<f64> = Field {
    prompt: "Enter link speed in Mbps (default: 1000): ",
    default: CoreConfig::DEFAULT_LINK_SPEED_MBPS,
    out_of_range: "Link speed must be positive. Using default: 1000 Mbps",
    invalid: "Invalid input. Using default: 1000 Mbps",
    valid: positive_speed,
};

/// Largest VM size in MB the residency tables accept.
const MAX_VM_SIZE_MB: u64 =
    CoreConfig::MAX_TOTAL_PAGES * PageSize::KIB_4.bytes() / (1024 * 1024);

fn positive_size(mb: &u64) -> bool {
    (1..=MAX_VM_SIZE_MB).contains(mb)
}

fn unit_ratio(ratio: &f64) -> bool {
    (0.0..=1.0).contains(ratio)
}

fn positive_speed(mbps: &f64) -> bool {
    mbps.is_finite() && *mbps > 0.0
}

/// Resolves parameters from arguments, falling back to prompts.
pub struct Prompter<R, W> {
    input: R,
    output: W,
    interactive: bool,
}

impl<R, W> Prompter<R, W>
where
    R: BufRead,
    W: Write,
{
    /// Creates a new prompter.
    ///
    /// A non-interactive prompter never reads `input` and uses defaults for
    /// anything the arguments do not provide.
    pub fn new(input: R, output: W, interactive: bool) -> Self {
        Self {
            input,
            output,
            interactive,
        }
    }

    /// Returns the value of `field`, taken from `arg` if it is valid.
    pub fn resolve<T>(&mut self, arg: Option<&str>, field: &Field<T>) -> io::Result<T>
    where
        T: FromStr + Copy,
    {
        if let Some(arg) = arg {
            match arg.trim().parse::<T>() {
                Ok(value) if (field.valid)(&value) => return Ok(value),
                _ => tracing::debug!(arg, "ignoring invalid argument"),
            }
        }

        if !self.interactive {
            return Ok(field.default);
        }

        write!(self.output, "{}", field.prompt)?;
        self.output.flush()?;

        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            writeln!(self.output)?;
            return Ok(field.default);
        }

        let line = line.trim();
        if line.is_empty() {
            return Ok(field.default);
        }

        match line.parse::<T>() {
            Ok(value) if (field.valid)(&value) => Ok(value),
            Ok(_) => {
                writeln!(self.output, "{}", field.out_of_range)?;
                Ok(field.default)
            }
            Err(_) => {
                writeln!(self.output, "{}", field.invalid)?;
                Ok(field.default)
            }
        }
    }

    /// Shows `message` and waits for a line of input.
    pub fn pause(&mut self, message: &str) -> io::Result<()> {
        if !self.interactive {
            return Ok(());
        }

        write!(self.output, "{message}")?;
        self.output.flush()?;

        let mut line = String::new();
        self.input.read_line(&mut line)?;
        writeln!(self.output)
    }
}
