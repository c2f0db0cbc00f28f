#[macro_use] extern crate clap;

use clap::{App, ArgMatches};
use env_logger::{from_env, Env};
use minibox::{
    errors::{ConfigError, PipelineError},
    registry::{parse_url, Client, ClientBuilder, DefaultRegistry},
    ImageName, Sandbox, ScratchDir,
};
use std::{path::Path, process, time::Duration};

fn main() {
    let yaml = load_yaml!("cli.yml");
    let matches = App::from_yaml(yaml).get_matches();

    let log_level = matches.value_of("log_level").unwrap();
    from_env(Env::default().default_filter_or(log_level)).init();

    if let Some(run_matches) = matches.subcommand_matches("run") {
        match run(run_matches) {
            Ok(code) => process::exit(code),
            Err(err) => {
                log::debug!("{:?}", err);
                eprintln!("minibox: {} failed: {}", err.stage(), err);
                process::exit(err.exit_code());
            }
        }
    }
}

/// Pull the image, enter it, and run the command, returning its exit code
fn run(matches: &ArgMatches) -> Result<i32, PipelineError> {
    let image: ImageName = matches.value_of("image_reference").unwrap().parse()?;
    let run_args = string_values(matches, "run_args");
    let run_env = env_values(matches, "run_env");
    let (program, args) = run_args.split_first().unwrap();

    let client = client_builder(matches)?.build()?;
    let scratch = ScratchDir::new()?;

    // Threads from the pull stage are gone before the root changes
    let root = {
        let runtime = tokio::runtime::Runtime::new().map_err(ConfigError::Runtime)?;
        runtime.block_on(client.pull(&image, scratch))?
    };

    for path in string_values(matches, "copy") {
        root.copy_from_host(Path::new(&path))?;
    }

    let sandbox = Sandbox::enter(root)?;
    let status = sandbox
        .command(program)
        .args(args)
        .envs(run_env)
        .status();
    if let Err(err) = sandbox.close() {
        log::warn!("{}", err);
    }
    Ok(status?.exit_code())
}

fn client_builder(matches: &ArgMatches) -> Result<ClientBuilder, PipelineError> {
    let mut registry = match matches.value_of("registry") {
        Some(url) => DefaultRegistry::from_url(parse_url(url)?),
        None => Client::default_registry()?,
    };
    if let Some(url) = matches.value_of("auth_url") {
        registry.token_url = Some(parse_url(url)?);
    }

    let mut builder = Client::builder().registry(&registry);
    if matches.is_present("timeout") {
        let secs = value_t!(matches, "timeout", u64).unwrap_or_else(|e| e.exit());
        builder = builder.request_timeout(Duration::from_secs(secs));
    }
    if matches.is_present("connect_timeout") {
        let secs = value_t!(matches, "connect_timeout", u64).unwrap_or_else(|e| e.exit());
        builder = builder.connect_timeout(Duration::from_secs(secs));
    }
    if matches.is_present("jobs") {
        let jobs = value_t!(matches, "jobs", usize).unwrap_or_else(|e| e.exit());
        builder = builder.max_concurrent_downloads(jobs);
    }
    Ok(builder)
}

fn string_values<S: AsRef<str>>(matches: &ArgMatches, name: S) -> Vec<String> {
    matches
        .values_of(name)
        .into_iter()
        .map(|values| values.map(|value| value.to_string()))
        .flatten()
        .collect()
}

fn env_values<S: AsRef<str>>(matches: &ArgMatches, name: S) -> Vec<(String, String)> {
    string_values(matches, name)
        .iter()
        .map(|env_str| {
            let mut parts = env_str.splitn(2, '=');
            (
                parts.next().unwrap().to_string(),
                parts.next().unwrap_or("").to_string(),
            )
        })
        .collect()
}
