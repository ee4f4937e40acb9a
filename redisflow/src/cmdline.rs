use clap::{Arg, ArgAction, ArgMatches, Command};
use redisflow_core::config::params::{LaunchInput, PARAMS, ParamSpec};

pub(super) fn root_cli() -> Command {
    Command::new("redisflow")
        .about("Writes key/value records into Redis from a batch pipeline")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(add_run_subcommand())
        .subcommand(add_launch_subcommand())
        .subcommand(add_diagnose_subcommand())
}

fn add_run_subcommand() -> Command {
    Command::new("run")
        .about("Build the pipeline and either run it or save it as a template")
        .args(PARAMS.iter().map(pipeline_option))
}

/// One `--<name>` option per declared launch parameter, e.g. `--redisHost=localhost`.
fn pipeline_option(spec: &'static ParamSpec) -> Arg {
    let arg = Arg::new(spec.name)
        .long(spec.name)
        .help(spec.description)
        .action(ArgAction::Set);
    if spec.flag {
        arg.num_args(0..=1)
            .require_equals(true)
            .default_missing_value("true")
            .value_parser(["true", "false"])
    } else {
        arg.value_parser(clap::value_parser!(String))
    }
}

/// Collects the pipeline options given to `run`. Options left out are not set, so the
/// environment can still fill them.
pub(super) fn launch_input(matches: &ArgMatches) -> LaunchInput {
    PARAMS
        .iter()
        .filter_map(|spec| {
            matches
                .get_one::<String>(spec.name)
                .map(|value| (spec.name, value.clone()))
        })
        .collect()
}

fn add_launch_subcommand() -> Command {
    Command::new("launch")
        .about("Execute a saved template, binding its deferred parameters")
        .arg(
            Arg::new("template")
                .long("template")
                .help("Path or file:// URI of the template")
                .required(true)
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(String)),
        )
        .arg(
            Arg::new("param")
                .long("param")
                .help("Deferred parameter binding, e.g. redisHost=localhost")
                .action(ArgAction::Append)
                .value_parser(clap::value_parser!(String)),
        )
        .arg(
            Arg::new("wait-until-finish")
                .long("wait-until-finish")
                .help("Block until the run reaches a terminal state")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("store")
                .long("store")
                .help("Store backend the workers write to")
                .default_value("redis")
                .value_parser(["redis", "memory"]),
        )
}

fn add_diagnose_subcommand() -> Command {
    Command::new("diagnose")
        .about("Write and read back a test key to check connectivity")
        .arg_required_else_help(true)
        .arg(
            Arg::new("host")
                .help("Redis host")
                .required(true)
                .value_parser(clap::value_parser!(String)),
        )
        .arg(
            Arg::new("port")
                .help("Redis port")
                .required(true)
                .value_parser(clap::value_parser!(u16)),
        )
}
