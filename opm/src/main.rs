//! Opm is the deployment CLI: it renders typed configuration modules into
//! platform resources and reconciles them against a cluster.

use std::path::PathBuf;
use std::process;

use clap::{Arg, ArgAction, ArgMatches, Command, ValueHint, crate_description, crate_name, crate_version};
use is_terminal::IsTerminal;
use tokio_util::sync::CancellationToken;
use tracing::error;

mod commands;
mod config;
mod output;
mod scaffold;

use commands::Common;
use output::Format;

fn main() {
    let cmd = Command::new(crate_name!())
        .version(crate_version!())
        .about(crate_description!())
        .subcommand_required(true)
        .subcommands([
            Command::new("mod")
                .about("work with modules")
                .subcommand_required(true)
                .subcommands([
                    Command::new("init")
                        .about("scaffold a module directory")
                        .arg(module_arg()),
                    with_globals(
                        Command::new("build")
                            .about("render a module to ordered YAML documents")
                            .args([module_arg(), output_arg()]),
                    ),
                    with_globals(
                        Command::new("vet")
                            .about("render without emitting manifests and report validity")
                            .arg(module_arg()),
                    ),
                    with_globals(
                        Command::new("apply")
                            .about("render, apply, and commit the inventory")
                            .args([
                                module_arg(),
                                Arg::new("dry_run")
                                    .long("dry-run")
                                    .help("validate server-side without persisting")
                                    .action(ArgAction::SetTrue),
                            ]),
                    ),
                    with_globals(
                        Command::new("diff")
                            .about("compare rendered resources against live state")
                            .arg(module_arg()),
                    ),
                    with_globals(
                        Command::new("delete")
                            .about("delete a release from its inventory")
                            .arg(
                                Arg::new("ignore_not_found")
                                    .long("ignore-not-found")
                                    .help("succeed when the release does not exist")
                                    .action(ArgAction::SetTrue),
                            ),
                    ),
                    with_globals(
                        Command::new("status").about("report per-resource release health"),
                    ),
                ]),
            Command::new("config")
                .about("work with the user configuration")
                .subcommand_required(true)
                .subcommands([
                    Command::new("init").about("write a starter configuration file"),
                    Command::new("vet").about("validate the configuration file"),
                ]),
        ]);

    process::exit(run(cmd.get_matches()));
}

// Module_arg is the positional module directory.
fn module_arg() -> Arg {
    Arg::new("module")
        .help("module directory")
        .value_hint(ValueHint::DirPath)
        .default_value(".")
}

fn output_arg() -> Arg {
    Arg::new("output")
        .long("output")
        .short('o')
        .help("write manifests to a file instead of stdout")
        .value_hint(ValueHint::FilePath)
}

// With_globals attaches the flags every cluster-touching command accepts.
fn with_globals(cmd: Command) -> Command {
    cmd.args([
        Arg::new("name")
            .long("name")
            .alias("release-name")
            .help("release name (defaults to the module name)"),
        Arg::new("namespace")
            .long("namespace")
            .short('n')
            .env("OPM_NAMESPACE")
            .help("release namespace"),
        Arg::new("values")
            .long("values")
            .short('f')
            .action(ArgAction::Append)
            .value_hint(ValueHint::FilePath)
            .help("values overlay file; repeatable, later files win"),
        Arg::new("kubeconfig")
            .long("kubeconfig")
            .env("OPM_KUBECONFIG")
            .value_hint(ValueHint::FilePath)
            .help("path to a kubeconfig file"),
        Arg::new("context")
            .long("context")
            .env("OPM_CONTEXT")
            .help("kubeconfig context to use"),
        Arg::new("provider")
            .long("provider")
            .help("provider name or directory"),
        Arg::new("registry")
            .long("registry")
            .env("OPM_REGISTRY")
            .help("registry root for provider resolution"),
        Arg::new("strict")
            .long("strict")
            .help("treat unhandled traits as errors")
            .action(ArgAction::SetTrue),
        Arg::new("verbose")
            .long("verbose")
            .help("enable debug logging")
            .action(ArgAction::SetTrue),
        Arg::new("format")
            .long("format")
            .env("OPM_FORMAT")
            .value_parser(["text", "json"])
            .help("output format"),
    ])
}

fn run(matches: ArgMatches) -> i32 {
    let (command, sub) = match matches.subcommand() {
        Some(("mod", m)) => match m.subcommand() {
            Some((name, sm)) => (format!("mod {name}"), sm.clone()),
            None => unreachable!(),
        },
        Some(("config", m)) => match m.subcommand() {
            Some((name, sm)) => (format!("config {name}"), sm.clone()),
            None => unreachable!(),
        },
        _ => unreachable!(),
    };

    let user_config = config::config_path()
        .map(|p| config::load(&p))
        .unwrap_or_else(|| Ok(config::UserConfig::default()));
    let user_config = match user_config {
        Ok(c) => c,
        Err(err) => {
            eprintln!("error: {err:#}");
            return 2;
        }
    };

    let format = sub
        .try_get_one::<String>("format")
        .ok()
        .flatten()
        .cloned()
        .or_else(|| user_config.format.clone())
        .and_then(|s| s.parse::<Format>().ok())
        .unwrap_or_default();
    output::init(format);
    init_tracing(
        sub.try_get_one::<bool>("verbose").ok().flatten().copied().unwrap_or(false),
    );

    if let Err(err) = config::ensure_registry(
        &user_config,
        sub.try_get_one::<String>("registry").ok().flatten().map(String::as_str),
    ) {
        eprintln!("error: {err:#}");
        return 2;
    }

    // Scaffolding commands never touch the runtime.
    match command.as_str() {
        "mod init" => {
            let path = sub
                .get_one::<String>("module")
                .map(PathBuf::from)
                .unwrap_or_else(|| ".".into());
            return match scaffold::write_module(&path) {
                Ok(()) => {
                    println!("module scaffolded at {}", path.display());
                    0
                }
                Err(err) => {
                    eprintln!("error: {err:#}");
                    1
                }
            };
        }
        "config init" => {
            let Some(path) = config::config_path() else {
                eprintln!("error: cannot resolve a home directory for the config file");
                return 1;
            };
            return match scaffold::write_config(&path) {
                Ok(()) => {
                    println!("config written to {}", path.display());
                    0
                }
                Err(err) => {
                    eprintln!("error: {err:#}");
                    1
                }
            };
        }
        "config vet" => {
            // Load already validated; reaching this point means the file is
            // well-formed (or absent).
            println!("config ok");
            return 0;
        }
        _ => {}
    }

    let common = Common::from_matches(&sub, &user_config);
    let rt = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("error: {err}");
            return 1;
        }
    };
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    rt.spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("error reading interrupt: {err}");
        }
        signal_cancel.cancel();
    });

    let result = rt.block_on(async {
        match command.as_str() {
            "mod build" => {
                let out = sub.get_one::<String>("output").map(PathBuf::from);
                commands::build(&common, out, &cancel).await
            }
            "mod vet" => commands::vet(&common, &cancel).await,
            "mod apply" => {
                let dry_run = sub.get_flag("dry_run");
                commands::apply(&common, dry_run, &cancel).await
            }
            "mod diff" => commands::diff(&common, &cancel).await,
            "mod delete" => {
                let ignore = sub.get_flag("ignore_not_found");
                commands::delete(&common, ignore, &cancel).await
            }
            "mod status" => commands::status(&common, &cancel).await,
            other => anyhow::bail!("unknown command {other:?}"),
        }
    });

    match result {
        Ok(code) => code,
        Err(err) => {
            match output::format() {
                Format::Json => output::envelope(
                    &command,
                    false,
                    serde_json::json!(null),
                    &[],
                    &[format!("{err:#}")],
                ),
                Format::Text => eprintln!("error: {err:#}"),
            }
            commands::exit_code(&err)
        }
    }
}

// Init_tracing installs the subscriber once: human layer on a terminal,
// JSON lines otherwise.
fn init_tracing(verbose: bool) {
    use tracing_subscriber::{filter::EnvFilter, prelude::*};

    let default = if verbose { "debug" } else { "warn" };
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default))
        .expect("static filter parses");
    let collector = tracing_subscriber::Registry::default()
        .with(env_filter)
        .with(if std::io::stderr().is_terminal() {
            Some(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        } else {
            None
        })
        .with(if std::io::stderr().is_terminal() {
            None
        } else {
            Some(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        });
    // A second init (tests) is harmless.
    let _ = tracing::subscriber::set_global_default(collector);
}
