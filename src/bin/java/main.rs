use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use javaclass::{Error, JavaValue, Runtime, RuntimeBuilder};
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "java")]
#[command(about = "Run the main method of a compiled class")]
#[command(version)]
struct Cli {
    /// Directories and .jar/.zip archives to search, separated by ':'
    #[arg(short = 'c', long = "class-path", visible_alias = "cp", value_name = "PATHS", default_value = ".")]
    class_path: String,

    /// Frames allowed on one call stack
    #[arg(long, value_name = "N")]
    max_call_depth: Option<usize>,

    /// Log every executed instruction
    #[arg(long)]
    trace: bool,

    /// Class whose `main(String[])` runs, e.g. com.example.Main
    #[arg(value_name = "CLASS")]
    class: String,

    /// Arguments passed to main
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.trace { "trace" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(Error::Thrown(thrown)) => {
            eprintln!("Exception in thread \"main\" {}", describe_thrown(&thrown));
            ExitCode::FAILURE
        }
        Err(err) => {
            error!(%err, class = %cli.class, "failed to run");
            eprintln!("Error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> javaclass::Result<()> {
    let mut builder = Runtime::builder().trace_instructions(cli.trace);
    if let Some(max_call_depth) = cli.max_call_depth {
        builder = builder.max_call_depth(max_call_depth);
    }
    builder = add_class_path(builder, &cli.class_path)?;
    let runtime = builder.build()?;

    let args = cli.args.iter().map(|arg| JavaValue::from(arg.as_str())).collect();
    debug!(class = %cli.class, "invoking main");
    runtime
        .load(&cli.class)?
        .get_invoker()
        .get_static()
        .get_methods()
        .call_with_descriptor("main", "([Ljava/lang/String;)V", &[JavaValue::Array(args)])?;
    Ok(())
}

fn add_class_path(mut builder: RuntimeBuilder, class_path: &str) -> javaclass::Result<RuntimeBuilder> {
    for entry in class_path.split(':').filter(|entry| !entry.is_empty()) {
        let path = PathBuf::from(entry);
        let is_archive = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("jar") || ext.eq_ignore_ascii_case("zip"));
        builder = if is_archive {
            builder.archive(&path)?
        } else {
            builder.class_path(path)
        };
    }
    Ok(builder)
}

fn describe_thrown(thrown: &javaclass::ThrownException) -> String {
    let name = thrown.class_name.replace('/', ".");
    match &thrown.message {
        Some(message) => format!("{name}: {message}"),
        None => name,
    }
}
