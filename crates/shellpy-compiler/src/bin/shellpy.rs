/// shellpy command line

use std::path::{Path, PathBuf};
use std::process;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use shellpy_compiler::{launcher, runtime, CompileOptions, Compiler, ImportHook};
use shellpy_exec::{ExecConfig, Execution, Executor, Flags, Scope, Template};
use tracing_subscriber::EnvFilter;

const SUBCOMMANDS: &[&str] = &["run", "compile", "resolve", "runtime", "exec", "help"];

/// Global options that consume the following argument.
const VALUE_OPTIONS: &[&str] = &["--cache-dir", "--python"];

#[derive(Parser, Debug)]
#[command(name = "shellpy")]
#[command(
    about = "Convenient shell scripting in Python: run .spy files mixing Python and shell commands"
)]
#[command(version)]
struct Cli {
    /// Directory holding the per-user output tree (defaults to the system temp dir)
    #[arg(long, global = true, env = launcher::CACHE_DIR_ENV, value_name = "DIR")]
    cache_dir: Option<PathBuf>,

    /// Log compiler internals to stderr
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile and run a .spy script
    Run(RunArgs),

    /// Compile a .spy file or module directory and print the output path
    Compile(CompileArgs),

    /// Compile the shellpy source importable as NAME if stale and print the directory holding it
    Resolve(ResolveArgs),

    /// Install the Python runtime module and print its directory
    Runtime,

    /// Run one shell command the way a compiled script does
    Exec(ExecArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Print every command before it runs
    #[arg(short, long)]
    verbose: bool,

    /// Also print stdout and stderr of every command
    #[arg(long = "vv")]
    very_verbose: bool,

    /// Do not raise on non-zero return codes
    #[arg(long)]
    no_throw_on_error: bool,

    /// Interpreter version for the shebang line, e.g. 3.12
    #[arg(long, value_name = "VER")]
    python: Option<String>,

    /// Script to run
    #[arg(value_name = "FILE")]
    file: PathBuf,

    /// Arguments passed to the script
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

#[derive(Args, Debug)]
struct CompileArgs {
    /// Source file, or module directory with --module
    #[arg(value_name = "PATH")]
    path: PathBuf,

    /// Compile every .spy file under a module directory
    #[arg(long)]
    module: bool,

    /// Compile as a root script (shebang, executable, import hook)
    #[arg(long, conflicts_with = "module")]
    root: bool,
}

#[derive(Args, Debug)]
struct ResolveArgs {
    /// Module name as written in the import statement
    name: String,

    /// Search path to resolve against
    #[arg(last = true, value_name = "SEARCH_PATH")]
    search_path: Vec<PathBuf>,
}

#[derive(Args, Debug)]
struct ExecArgs {
    /// Flag letters: p print stdout, e print stderr, i interactive, n no throw
    #[arg(short, long, default_value = "")]
    flags: String,

    /// Bind a placeholder, NAME=VALUE
    #[arg(long = "var", value_name = "NAME=VALUE", value_parser = parse_binding)]
    vars: Vec<(String, String)>,

    /// Command text
    #[arg(last = true, required = true)]
    command: Vec<String>,
}

fn parse_binding(text: &str) -> Result<(String, String), String> {
    text.split_once('=')
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", text))
}

/// Insert `run` when the first positional argument is not a subcommand, so
/// `shellpy script.spy` works like `shellpy run script.spy`.
fn inject_run(mut args: Vec<String>) -> Vec<String> {
    let mut i = 1;
    while i < args.len() {
        let arg = args[i].as_str();
        if arg == "--" {
            return args;
        }
        if VALUE_OPTIONS.contains(&arg) {
            i += 2;
        } else if arg.starts_with('-') {
            i += 1;
        } else {
            if !SUBCOMMANDS.contains(&arg) {
                args.insert(1, "run".to_string());
            }
            return args;
        }
    }
    args
}

fn main() {
    let cli = Cli::parse_from(inject_run(std::env::args().collect()));

    let default_level = if cli.debug { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let code = match dispatch(&cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("shellpy: {:#}", e);
            1
        }
    };
    process::exit(code);
}

fn dispatch(cli: &Cli) -> anyhow::Result<i32> {
    let cache_root = cli.cache_dir.as_deref();
    match &cli.command {
        Command::Run(args) => run(args, cache_root),
        Command::Compile(args) => compile(args, cache_root),
        Command::Resolve(args) => resolve(args, cache_root),
        Command::Runtime => install_runtime(cache_root),
        Command::Exec(args) => exec(args),
    }
}

fn compiler(cache_root: Option<&Path>, host_version: Option<&str>) -> Compiler {
    let mut options = CompileOptions::new();
    if let Some(root) = cache_root {
        options = options.cache_root(root);
    }
    if let Some(version) = host_version {
        options = options.host_version(version);
    }
    Compiler::new(options)
}

fn run(args: &RunArgs, cache_root: Option<&Path>) -> anyhow::Result<i32> {
    let config = ExecConfig {
        print_all_commands: args.verbose || args.very_verbose,
        print_stdout_always: args.very_verbose,
        print_stderr_always: args.very_verbose,
        throw_on_error: !args.no_throw_on_error,
    };
    let compiler = compiler(cache_root, args.python.as_deref());
    let code = launcher::run_script(&compiler, cache_root, &args.file, &args.args, &config)
        .with_context(|| format!("cannot run {}", args.file.display()))?;
    Ok(code)
}

fn compile(args: &CompileArgs, cache_root: Option<&Path>) -> anyhow::Result<i32> {
    let compiler = compiler(cache_root, None);
    let output = if args.module {
        compiler.preprocess_module(&args.path)
    } else {
        compiler.preprocess_file(&args.path, args.root)
    }
    .with_context(|| format!("cannot compile {}", args.path.display()))?;

    println!("{}", output.display());
    Ok(0)
}

fn resolve(args: &ResolveArgs, cache_root: Option<&Path>) -> anyhow::Result<i32> {
    let hook = ImportHook::new(compiler(cache_root, None));
    let dir = hook
        .compile_source(&args.name, &args.search_path)
        .with_context(|| format!("cannot resolve {}", args.name))?;

    match dir {
        Some(dir) => {
            tracing::debug!("Resolved {} in {}", args.name, dir.display());
            println!("{}", dir.display());
            Ok(0)
        }
        None => {
            tracing::debug!("No shellpy source for {}", args.name);
            Ok(1)
        }
    }
}

fn install_runtime(cache_root: Option<&Path>) -> anyhow::Result<i32> {
    let compiler = compiler(cache_root, None);
    let path = runtime::install(compiler.layout()).context("cannot install the runtime module")?;
    println!("{}", compiler.layout().root().display());
    tracing::debug!("Runtime module at {}", path.display());
    Ok(0)
}

fn exec(args: &ExecArgs) -> anyhow::Result<i32> {
    let text = args.command.join(" ");
    let mut scope = Scope::from_env();
    for (name, value) in &args.vars {
        scope.bind_local(name, value);
    }
    let command = Template::parse(&text).render(&scope)?;

    let flags = Flags::parse(&args.flags);
    let executor = Executor::from_env()?;
    let echoes_stdout = flags.print_stdout || executor.config().print_stdout_always;

    match executor.exe(&command, &args.flags) {
        Ok(Execution::Captured(result)) => {
            if !echoes_stdout && !result.stdout_lines.is_empty() {
                println!("{}", result.stdout());
            }
            Ok(result.returncode)
        }
        Ok(Execution::Interactive(mut result)) => {
            while let Some(line) = result.read_line()? {
                if !echoes_stdout {
                    println!("{}", line);
                }
            }
            Ok(result.returncode()?)
        }
        Err(shellpy_exec::Error::NonZeroReturnCode { command, result }) => {
            if !echoes_stdout && !result.stdout_lines.is_empty() {
                println!("{}", result.stdout());
            }
            eprintln!("Command '{}' failed with error code {}", command, result.returncode);
            Ok(result.returncode)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_inject_run_for_bare_script() {
        assert_eq!(
            inject_run(argv(&["shellpy", "-v", "a.spy", "x"])),
            argv(&["shellpy", "run", "-v", "a.spy", "x"])
        );
    }

    #[test]
    fn test_inject_run_skips_option_values() {
        assert_eq!(
            inject_run(argv(&["shellpy", "--cache-dir", "/c", "a.spy"])),
            argv(&["shellpy", "run", "--cache-dir", "/c", "a.spy"])
        );
    }

    #[test]
    fn test_known_subcommand_untouched() {
        let args = argv(&["shellpy", "compile", "a.spy"]);
        assert_eq!(inject_run(args.clone()), args);
    }

    #[test]
    fn test_cli_parses_run_with_script_args() {
        let cli = Cli::parse_from(inject_run(argv(&["shellpy", "a.spy", "--flag", "1"])));
        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.file, PathBuf::from("a.spy"));
                assert_eq!(args.args, vec!["--flag", "1"]);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_cli_parses_exec_bindings() {
        let cli = Cli::parse_from(argv(&[
            "shellpy", "exec", "-f", "pn", "--var", "x=1", "--", "echo", "{x}",
        ]));
        match cli.command {
            Command::Exec(args) => {
                assert_eq!(args.flags, "pn");
                assert_eq!(args.vars, vec![("x".to_string(), "1".to_string())]);
                assert_eq!(args.command, vec!["echo", "{x}"]);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_runtime_subcommand_not_taken_for_script() {
        let args = argv(&["shellpy", "--cache-dir", "/c", "runtime"]);
        assert_eq!(inject_run(args.clone()), args);
        assert!(matches!(Cli::parse_from(args).command, Command::Runtime));
    }

    #[test]
    fn test_resolve_prints_directory_of_fresh_output() {
        let cache = tempfile::TempDir::new().unwrap();
        let src = tempfile::TempDir::new().unwrap();
        std::fs::write(src.path().join("helper.spy"), "x = 1\n").unwrap();

        let args = ResolveArgs {
            name: "helper".to_string(),
            search_path: vec![src.path().to_path_buf()],
        };
        assert_eq!(resolve(&args, Some(cache.path())).unwrap(), 0);
        assert_eq!(resolve(&args, Some(cache.path())).unwrap(), 0);

        let missing = ResolveArgs {
            name: "absent".to_string(),
            search_path: vec![src.path().to_path_buf()],
        };
        assert_eq!(resolve(&missing, Some(cache.path())).unwrap(), 1);
    }

    #[test]
    fn test_parse_binding_requires_equals() {
        assert!(parse_binding("novalue").is_err());
        assert_eq!(parse_binding("a=b=c").unwrap(), ("a".to_string(), "b=c".to_string()));
    }
}
